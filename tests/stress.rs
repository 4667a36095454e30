//! Stress tests for mihub
//!
//! Run with: cargo test --release stress -- --ignored

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use mihub::*;
use rand::Rng;
use serde_json::json;

const DEVICES: usize = 64;

fn gateway() -> GatewayAnnouncement {
    let address: SocketAddr = "192.168.1.10:9898".parse().unwrap();
    (0..DEVICES).fold(GatewayAnnouncement::new("34ce0088db36", address), |g, i| {
        g.with_device(DeviceDescriptor::new(format!("158d{:04x}", i), "sensor_ht"))
    })
}

fn bridge() -> (Bridge, Arc<MemoryClient>, Arc<RecordingHost>) {
    let client = Arc::new(MemoryClient::with_rounds(vec![vec![gateway()]]));
    let host = Arc::new(RecordingHost::new());
    let bridge = Bridge::setup(BridgeConfig::default(), client.clone(), host.clone()).unwrap();
    (bridge, client, host)
}

#[test]
#[ignore] // Run manually with --ignored
fn stress_test_push_throughput() {
    let (bridge, _client, _host) = bridge();
    let mut rng = rand::thread_rng();

    let iterations = 200_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let sid = format!("158d{:04x}", rng.gen_range(0..DEVICES));
        let data = json!({
            "temperature": rng.gen_range(-2000..4000).to_string(),
            "voltage": rng.gen_range(2700..3400),
        });
        if let serde_json::Value::Object(data) = data {
            bridge.pipeline().on_push("34ce0088db36", &sid, &data);
        }
    }

    let elapsed = start.elapsed();
    let rate = iterations as f64 / elapsed.as_secs_f64();

    println!("Ingested {} pushes in {:?}", iterations, elapsed);
    println!("Rate: {:.0} pushes/second", rate);

    assert!(
        rate > 10_000.0,
        "Should ingest at least 10k pushes/s, got {:.0}",
        rate
    );
}

#[test]
#[ignore]
fn stress_test_snapshots_never_torn() {
    let (bridge, client, _host) = bridge();
    let bridge = Arc::new(bridge);
    let done = Arc::new(AtomicBool::new(false));

    // Every push carries a temperature and a voltage derived from the same
    // seed, so a snapshot can check both halves belong together.
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..20_000 {
                    let seed: i64 = rng.gen_range(0..=100);
                    let event = PushEvent::new(
                        "34ce0088db36",
                        "158d0000",
                        json!({
                            "temperature": (seed * 10).to_string(),
                            "voltage": 2800 + seed * 5,
                        }),
                    );
                    client.push(&event).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let bridge = bridge.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut checked = 0u64;
            while !done.load(Ordering::SeqCst) {
                for snapshot in bridge.snapshots() {
                    if snapshot.name != "Temperature_158d0000" || snapshot.state.is_null() {
                        continue;
                    }
                    let temperature = snapshot.state.as_f64().unwrap();
                    let battery = snapshot.attributes[ATTR_BATTERY_LEVEL].as_u64().unwrap();
                    // seed * 10 / 100 degrees, seed percent
                    assert_eq!((temperature * 10.0).round() as u64, battery);
                    checked += 1;
                }
            }
            checked
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let checked = reader.join().unwrap();
    println!("Checked {} snapshots", checked);
}
