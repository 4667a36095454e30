// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Gateway client abstraction
//!
//! The gateway wire protocol (multicast `whois`, hub sockets, token signing)
//! lives behind the [`GatewayClient`] trait. The bridge only needs four
//! operations from it: discovery, listen, stop-listen and write.
//!
//! [`MemoryClient`] is a scripted in-memory implementation used by tests and
//! by the daemon's replay mode.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::util::lock;

/// Raw data reported for one sub-device (`"data"` object of a report)
pub type DeviceData = serde_json::Map<String, Value>;

/// Ringtone id that stops playback
pub const STOP_RINGTONE_MID: i64 = 10000;

/// A sub-device reported by a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device sid
    pub sid: String,
    /// Device model (`sensor_ht`, `magnet`, `plug`, ...)
    pub model: String,
    /// Initial data read at discovery time
    #[serde(default)]
    pub data: DeviceData,
}

impl DeviceDescriptor {
    /// Create a descriptor without initial data
    pub fn new(sid: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            model: model.into(),
            data: DeviceData::new(),
        }
    }

    /// Attach initial data
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }
}

/// A gateway that answered a discovery broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAnnouncement {
    /// Gateway sid as reported on the wire
    pub sid: String,
    /// Unicast address of the hub
    pub address: SocketAddr,
    /// Protocol version reported by the hub
    #[serde(default)]
    pub proto_version: Option<String>,
    /// Sub-devices known to the hub
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

impl GatewayAnnouncement {
    /// Create an announcement without sub-devices
    pub fn new(sid: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            sid: sid.into(),
            address,
            proto_version: None,
            devices: Vec::new(),
        }
    }

    /// Add a sub-device
    pub fn with_device(mut self, device: DeviceDescriptor) -> Self {
        self.devices.push(device);
        self
    }
}

/// An unsolicited report for one sub-device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Sid of the gateway the report came from
    pub gateway_sid: String,
    /// Sid of the reporting sub-device
    pub sid: String,
    /// Device model, if the report carries one
    #[serde(default)]
    pub model: Option<String>,
    /// Reported fields
    #[serde(default)]
    pub data: DeviceData,
}

impl PushEvent {
    /// Create a push event from a JSON data object
    pub fn new(gateway_sid: impl Into<String>, sid: impl Into<String>, data: Value) -> Self {
        Self {
            gateway_sid: gateway_sid.into(),
            sid: sid.into(),
            model: None,
            data: match data {
                Value::Object(map) => map,
                _ => DeviceData::new(),
            },
        }
    }
}

/// Receiver of push events from a listening client
pub trait PushHandler: Send + Sync {
    /// Handle one push event
    fn handle_push(&self, event: &PushEvent);
}

/// Where a hub write goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubTarget {
    /// Gateway sid
    pub sid: String,
    /// Unicast address of the hub
    pub address: SocketAddr,
    /// Gateway key used to sign the write
    pub key: Option<String>,
}

/// A typed write to a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubCommand {
    /// Play a ringtone, optionally at a volume
    PlayRingtone { mid: i64, vol: Option<i64> },
    /// Stop the current ringtone
    StopRingtone,
}

#[derive(Serialize)]
struct RingtonePayload {
    mid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    vol: Option<i64>,
}

impl HubCommand {
    /// Wire payload (`"data"` object of the write)
    pub fn payload(&self) -> Value {
        let payload = match *self {
            HubCommand::PlayRingtone { mid, vol } => RingtonePayload { mid, vol },
            HubCommand::StopRingtone => RingtonePayload {
                mid: STOP_RINGTONE_MID,
                vol: None,
            },
        };
        serde_json::to_value(payload).unwrap_or(Value::Null)
    }

    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            HubCommand::PlayRingtone { .. } => "play_ringtone",
            HubCommand::StopRingtone => "stop_ringtone",
        }
    }
}

/// Operations the bridge needs from a gateway client
pub trait GatewayClient: Send + Sync {
    /// Select the network interface used for multicast discovery and push
    /// reception (`any` for all interfaces)
    fn bind_interface(&self, interface: &str) -> Result<(), ClientError>;

    /// Send one discovery broadcast and return the gateways that answered
    fn discover_gateways(&self) -> Result<Vec<GatewayAnnouncement>, ClientError>;

    /// Start delivering push events to `handler`
    fn listen(&self, handler: Arc<dyn PushHandler>) -> Result<(), ClientError>;

    /// Stop the listen loop and release its socket
    fn stop_listen(&self) -> Result<(), ClientError>;

    /// Write a command to a hub
    fn write_to_hub(&self, target: &HubTarget, command: &HubCommand) -> Result<(), ClientError>;
}

/// Scripted in-memory gateway client
///
/// Each call to [`discover_gateways`](GatewayClient::discover_gateways)
/// consumes one scripted round; once the script is exhausted, discovery
/// returns no gateways. Writes are recorded instead of sent.
#[derive(Default)]
pub struct MemoryClient {
    /// Scripted discovery answers, one entry per call
    rounds: Mutex<VecDeque<Result<Vec<GatewayAnnouncement>, ClientError>>>,
    /// Handler installed by `listen`
    handler: Mutex<Option<Arc<dyn PushHandler>>>,
    /// Recorded writes
    writes: Mutex<Vec<(HubTarget, HubCommand)>>,
    /// Reject every write when set
    reject_writes: AtomicBool,
    /// Interface selected by `bind_interface`
    interface: Mutex<Option<String>>,
    discover_calls: AtomicUsize,
    listen_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl MemoryClient {
    /// Create a client with an empty discovery script
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client from discovery rounds
    pub fn with_rounds(rounds: Vec<Vec<GatewayAnnouncement>>) -> Self {
        let client = Self::new();
        for round in rounds {
            client.push_round(round);
        }
        client
    }

    /// Create a client that reveals one gateway per discovery call
    pub fn revealing_one_per_call(gateways: Vec<GatewayAnnouncement>) -> Self {
        Self::with_rounds(gateways.into_iter().map(|g| vec![g]).collect())
    }

    /// Append a discovery round
    pub fn push_round(&self, round: Vec<GatewayAnnouncement>) {
        lock(&self.rounds).push_back(Ok(round));
    }

    /// Append a failing discovery round
    pub fn push_failure(&self, error: ClientError) {
        lock(&self.rounds).push_back(Err(error));
    }

    /// Deliver a push event to the listening handler
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotListening`] if `listen` has not been called
    /// or `stop_listen` already ran.
    pub fn push(&self, event: &PushEvent) -> Result<(), ClientError> {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => {
                handler.handle_push(event);
                Ok(())
            }
            None => Err(ClientError::NotListening),
        }
    }

    /// Make every subsequent write fail
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Recorded writes, oldest first
    pub fn writes(&self) -> Vec<(HubTarget, HubCommand)> {
        lock(&self.writes).clone()
    }

    /// Recorded write payloads, oldest first
    pub fn write_payloads(&self) -> Vec<Value> {
        lock(&self.writes)
            .iter()
            .map(|(_, command)| command.payload())
            .collect()
    }

    /// Interface the bridge bound, if any
    pub fn interface(&self) -> Option<String> {
        lock(&self.interface).clone()
    }

    /// Number of discovery calls so far
    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    /// Number of listen calls so far
    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    /// Number of stop-listen calls so far
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether a push handler is installed
    pub fn is_listening(&self) -> bool {
        lock(&self.handler).is_some()
    }
}

impl GatewayClient for MemoryClient {
    fn bind_interface(&self, interface: &str) -> Result<(), ClientError> {
        *lock(&self.interface) = Some(interface.to_string());
        Ok(())
    }

    fn discover_gateways(&self) -> Result<Vec<GatewayAnnouncement>, ClientError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.rounds).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn listen(&self, handler: Arc<dyn PushHandler>) -> Result<(), ClientError> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.handler) = Some(handler);
        Ok(())
    }

    fn stop_listen(&self) -> Result<(), ClientError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.handler).take();
        Ok(())
    }

    fn write_to_hub(&self, target: &HubTarget, command: &HubCommand) -> Result<(), ClientError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(ClientError::WriteRejected {
                sid: target.sid.clone(),
                reason: "rejected by memory client".to_string(),
            });
        }
        lock(&self.writes).push((target.clone(), *command));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("pending_rounds", &lock(&self.rounds).len())
            .field("listening", &self.is_listening())
            .field("writes", &lock(&self.writes).len())
            .finish()
    }
}
