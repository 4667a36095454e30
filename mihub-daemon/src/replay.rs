// mihub daemon - Scenario replay engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scenario replay engine.
//!
//! A scenario scripts what the gateways announce during discovery and which
//! push reports arrive afterwards:
//!
//! ```json
//! {
//!   "gateways": [
//!     { "sid": "34ce0088db36", "address": "192.168.1.10:9898",
//!       "devices": [{ "sid": "158d0001", "model": "magnet" }] }
//!   ],
//!   "rounds": [["34ce0088db36"]],
//!   "events": [
//!     { "at_ms": 1000, "gateway_sid": "34ce0088db36", "sid": "158d0001",
//!       "data": { "status": "open", "voltage": 3100 } }
//!   ]
//! }
//! ```
//!
//! Without `rounds`, every gateway answers the first discovery call.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mihub::{normalize_sid, Bridge, ClientError, GatewayAnnouncement, MemoryClient, PushEvent};
use serde::Deserialize;
use tokio::task::yield_now;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::metrics::{record_push, update_replay_metrics};

/// Configuration for scenario replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Replay speed multiplier (1.0 = real-time, 10.0 = 10x faster).
    pub speed: f64,
    /// Whether to loop the event list.
    pub loop_replay: bool,
    /// Pause after the last event before looping, in milliseconds.
    pub default_interval_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_replay: true,
            default_interval_ms: 1_000,
        }
    }
}

/// State of the replay engine.
#[derive(Debug, Default)]
pub struct ReplayState {
    /// Index of the next event.
    pub position: AtomicUsize,
    /// Total events in the scenario.
    pub total_events: AtomicUsize,
    /// Whether replay is running.
    pub running: AtomicBool,
}

/// A push report scheduled at an offset from replay start.
#[derive(Debug, Clone, Deserialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: PushEvent,
}

/// A replay scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub gateways: Vec<GatewayAnnouncement>,
    #[serde(default)]
    pub rounds: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
}

impl Scenario {
    /// Load a scenario; events are sorted by time.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReplayError::FileNotFound(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ReplayError> {
        let mut scenario: Scenario = serde_json::from_str(json)?;
        if scenario.gateways.is_empty() {
            return Err(ReplayError::InvalidFormat(
                "scenario announces no gateway".to_string(),
            ));
        }
        scenario.events.sort_by_key(|e| e.at_ms);
        Ok(scenario)
    }

    /// Build the scripted client answering discovery as the scenario says.
    pub fn client(&self) -> Result<MemoryClient, ReplayError> {
        let rounds = match &self.rounds {
            None => return Ok(MemoryClient::with_rounds(vec![self.gateways.clone()])),
            Some(rounds) => rounds,
        };

        let client = MemoryClient::new();
        for round in rounds {
            let announced = round
                .iter()
                .map(|sid| self.gateway(sid))
                .collect::<Result<Vec<_>, _>>()?;
            client.push_round(announced);
        }
        Ok(client)
    }

    fn gateway(&self, sid: &str) -> Result<GatewayAnnouncement, ReplayError> {
        let wanted = normalize_sid(sid);
        self.gateways
            .iter()
            .find(|g| normalize_sid(&g.sid) == wanted)
            .cloned()
            .ok_or_else(|| {
                ReplayError::InvalidFormat(format!("round references unknown gateway {}", sid))
            })
    }

    /// Scenario information.
    pub fn info(&self) -> ScenarioInfo {
        let duration_ms = match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.at_ms - first.at_ms,
            _ => 0,
        };
        ScenarioInfo {
            gateway_count: self.gateways.len(),
            event_count: self.events.len(),
            duration_ms,
        }
    }
}

/// Scenario information.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioInfo {
    pub gateway_count: usize,
    pub event_count: usize,
    pub duration_ms: u64,
}

/// Replay engine that delivers scenario events through the client's listen
/// loop.
pub struct ReplayEngine {
    config: ReplayConfig,
    state: Arc<ReplayState>,
    client: Arc<MemoryClient>,
    bridge: Arc<Bridge>,
    events: Vec<TimedEvent>,
}

impl ReplayEngine {
    pub fn new(
        config: ReplayConfig,
        client: Arc<MemoryClient>,
        bridge: Arc<Bridge>,
        events: Vec<TimedEvent>,
    ) -> Result<Self, ReplayError> {
        if events.is_empty() {
            return Err(ReplayError::EmptyScenario);
        }
        if config.speed <= 0.0 || !config.speed.is_finite() {
            return Err(ReplayError::InvalidFormat(format!(
                "speed must be positive, got {}",
                config.speed
            )));
        }

        let state = Arc::new(ReplayState::default());
        state.total_events.store(events.len(), Ordering::SeqCst);

        Ok(Self {
            config,
            state,
            client,
            bridge,
            events,
        })
    }

    /// Get the replay state.
    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// Run the replay until the scenario ends, the client stops listening or
    /// [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        self.state.running.store(true, Ordering::SeqCst);
        info!(
            "Starting replay: speed={}, loop={}",
            self.config.speed, self.config.loop_replay
        );

        loop {
            if !self.state.running.load(Ordering::SeqCst) {
                break;
            }

            let position = self.state.position.load(Ordering::SeqCst);

            if position >= self.events.len() {
                if self.config.loop_replay {
                    info!("Scenario complete, looping...");
                    self.state.position.store(0, Ordering::SeqCst);
                    continue;
                } else {
                    info!("Scenario complete, stopping");
                    self.state.running.store(false, Ordering::SeqCst);
                    break;
                }
            }

            if let Err(e) = self.process_event(position) {
                info!("Ending replay: {}", e);
                self.state.running.store(false, Ordering::SeqCst);
                break;
            }
            self.state.position.fetch_add(1, Ordering::SeqCst);
            update_replay_metrics(position + 1, self.events.len(), self.config.speed);

            let base_interval_ms = match self.events.get(position + 1) {
                Some(next) => next.at_ms.saturating_sub(self.events[position].at_ms),
                None => self.config.default_interval_ms,
            };
            let sleep_ms = (base_interval_ms as f64 / self.config.speed) as u64;
            if sleep_ms > 0 {
                sleep(Duration::from_millis(sleep_ms)).await;
            } else {
                // Pushes are synchronous; yield so other tasks still run
                yield_now().await;
            }
        }
    }

    fn process_event(&self, position: usize) -> Result<(), ClientError> {
        let timed = &self.events[position];
        let event = &timed.event;
        debug!("Replaying event {} at {}ms for {}", position, timed.at_ms, event.sid);

        let pipeline = self.bridge.pipeline();
        let before = pipeline.stats();
        self.client.push(event)?;
        let delta = pipeline.stats().since(&before);

        if delta.unrouted > 0 {
            warn!(
                "Event {} for {} on {} reached no device",
                position, event.sid, event.gateway_sid
            );
        }
        record_push(&delta);
        Ok(())
    }

    /// Stop the replay after the current event.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// Replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Scenario has no events")]
    EmptyScenario,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
