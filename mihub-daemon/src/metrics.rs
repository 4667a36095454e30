// mihub daemon - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the bridge.
//!
//! All metrics live in the default registry and are exposed on `/metrics`.

use lazy_static::lazy_static;
use mihub::{DiscoveryReport, IngestionStats};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder,
};

lazy_static! {
    // ============================================================
    // Discovery
    // ============================================================

    /// Gateways registered after discovery.
    pub static ref GATEWAYS_DISCOVERED: Gauge = register_gauge!(
        "mihub_gateways_discovered",
        "Gateways registered after discovery"
    ).unwrap();

    /// Discovery calls performed during setup.
    pub static ref DISCOVERY_ATTEMPTS: Gauge = register_gauge!(
        "mihub_discovery_attempts",
        "Discovery calls performed during setup"
    ).unwrap();

    /// Device handlers registered with the host (labeled by platform).
    pub static ref DEVICES_REGISTERED: GaugeVec = register_gauge_vec!(
        "mihub_devices_registered",
        "Device handlers registered with the host",
        &["platform"]
    ).unwrap();

    // ============================================================
    // Ingestion
    // ============================================================

    /// Push events fed into the pipeline.
    pub static ref PUSH_EVENTS_TOTAL: Counter = register_counter!(
        "mihub_push_events_total",
        "Push events fed into the ingestion pipeline"
    ).unwrap();

    /// State change notifications (labeled by platform).
    pub static ref STATE_CHANGES_TOTAL: CounterVec = register_counter_vec!(
        "mihub_state_changes_total",
        "State change notifications sent to the host",
        &["platform"]
    ).unwrap();

    /// Device events (labeled by click type).
    pub static ref DEVICE_EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "mihub_device_events_total",
        "Device events sent to the host",
        &["click_type"]
    ).unwrap();

    /// Rejected report fields.
    pub static ref PARSE_ERRORS_TOTAL: Counter = register_counter!(
        "mihub_parse_errors_total",
        "Report fields rejected by a device handler"
    ).unwrap();

    /// Battery level per device (labeled by device name).
    pub static ref BATTERY_LEVEL: GaugeVec = register_gauge_vec!(
        "mihub_battery_level_percent",
        "Battery level of a device in percent",
        &["device"]
    ).unwrap();

    // ============================================================
    // Actions
    // ============================================================

    /// Action invocations (labeled by action and outcome).
    pub static ref ACTION_INVOCATIONS_TOTAL: CounterVec = register_counter_vec!(
        "mihub_action_invocations_total",
        "Remote action invocations",
        &["action", "outcome"]
    ).unwrap();

    // ============================================================
    // Replay
    // ============================================================

    /// Current replay position (event index).
    pub static ref REPLAY_POSITION: Gauge = register_gauge!(
        "mihub_replay_position",
        "Current replay position (event index)"
    ).unwrap();

    /// Total events in the replay scenario.
    pub static ref REPLAY_TOTAL_EVENTS: Gauge = register_gauge!(
        "mihub_replay_total_events",
        "Total events in the replay scenario"
    ).unwrap();

    /// Replay speed multiplier.
    pub static ref REPLAY_SPEED: Gauge = register_gauge!(
        "mihub_replay_speed",
        "Replay speed multiplier"
    ).unwrap();
}

/// Record the outcome of setup discovery.
pub fn update_discovery_metrics(report: &DiscoveryReport) {
    GATEWAYS_DISCOVERED.set(report.connections.len() as f64);
    DISCOVERY_ATTEMPTS.set(report.attempts as f64);
}

/// Count a registered handler.
pub fn record_device_registered(platform: &str) {
    DEVICES_REGISTERED.with_label_values(&[platform]).inc();
}

/// Count a state change notification.
pub fn record_state_change(platform: &str) {
    STATE_CHANGES_TOTAL.with_label_values(&[platform]).inc();
}

/// Count a device event.
pub fn record_device_event(click_type: &str) {
    DEVICE_EVENTS_TOTAL.with_label_values(&[click_type]).inc();
}

/// Update a device's battery gauge.
pub fn update_battery_level(device: &str, percent: f64) {
    BATTERY_LEVEL.with_label_values(&[device]).set(percent);
}

/// Count delivered pushes and their parse failures.
pub fn record_push(delta: &IngestionStats) {
    PUSH_EVENTS_TOTAL.inc_by(delta.pushes as f64);
    PARSE_ERRORS_TOTAL.inc_by(delta.parse_errors as f64);
}

/// Count an action invocation.
pub fn record_action(action: &str, outcome: &str) {
    ACTION_INVOCATIONS_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}

/// Update replay position metrics.
pub fn update_replay_metrics(position: usize, total: usize, speed: f64) {
    REPLAY_POSITION.set(position as f64);
    REPLAY_TOTAL_EVENTS.set(total as f64);
    REPLAY_SPEED.set(speed);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_action_labels() {
        record_action("play_ringtone", "ok");
        record_action("play_ringtone", "ok");
        let count = ACTION_INVOCATIONS_TOTAL
            .with_label_values(&["play_ringtone", "ok"])
            .get();
        assert!(count >= 2.0);
    }

    #[test]
    fn test_battery_gauge() {
        update_battery_level("Door Window Sensor_158d0001", 60.0);
        assert_eq!(
            BATTERY_LEVEL
                .with_label_values(&["Door Window Sensor_158d0001"])
                .get(),
            60.0
        );
    }

    #[test]
    fn test_encode_metrics() {
        update_replay_metrics(3, 10, 2.0);
        record_state_change("sensor");

        let output = encode_metrics();
        assert!(output.contains("mihub_replay_position"));
        assert!(output.contains("mihub_state_changes_total"));
    }
}
