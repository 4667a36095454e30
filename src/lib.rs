//! # mihub - Xiaomi gateway bridge
//!
//! Bridges Xiaomi (Aqara/Lumi) Zigbee gateways into a host automation
//! system.
//!
//! ## Key Features
//!
//! - **Credential validation**: 16 character gateway keys, sid normalization
//! - **Bounded discovery**: fixed number of attempts, early exit once every
//!   configured gateway answered
//! - **Push ingestion**: reports routed to every handler of a device, with
//!   battery voltage turned into a percentage
//! - **Remote actions**: play or stop a ringtone on a gateway
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use mihub::{
//!     Bridge, BridgeConfig, DeviceDescriptor, GatewayAnnouncement, MemoryClient, PushEvent,
//!     RecordingHost,
//! };
//! use serde_json::json;
//!
//! let gateway = GatewayAnnouncement::new("34:ce:00:88:db:36", "192.168.1.10:9898".parse().unwrap())
//!     .with_device(DeviceDescriptor::new("158d0001", "magnet"));
//! let client = Arc::new(MemoryClient::with_rounds(vec![vec![gateway]]));
//! let host = Arc::new(RecordingHost::new());
//!
//! let bridge = Bridge::setup(BridgeConfig::default(), client.clone(), host.clone()).unwrap();
//!
//! client
//!     .push(&PushEvent::new("34ce0088db36", "158d0001", json!({ "voltage": 3100 })))
//!     .unwrap();
//! assert_eq!(host.changes()[0].attributes["battery_level"], json!(60));
//!
//! bridge.shutdown();
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Gateway credentials and bridge settings
//! - [`registry`]: Configured gateways and live connections
//! - [`discovery`]: Bounded discovery and listen activation
//! - [`ingestion`]: Push routing to device handlers
//! - [`battery`]: Voltage to battery percentage
//! - [`actions`]: Ringtone actions
//! - [`bridge`]: Setup orchestration

// Modules
pub mod actions;
pub mod battery;
pub mod bridge;
pub mod client;
pub mod config;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod error;
pub mod host;
pub mod ingestion;
pub mod registry;

mod util;

// Re-exports for convenient access
pub use actions::{
    ActionKind, ActionOutcome, PlayRingtoneParams, RemoteActionDispatcher, StopRingtoneParams,
    RESERVED_RINGTONE_IDS,
};
pub use battery::{battery_percent, voltage_to_percent, ATTR_BATTERY_LEVEL};
pub use bridge::Bridge;
pub use client::{
    DeviceData, DeviceDescriptor, GatewayAnnouncement, GatewayClient, HubCommand, HubTarget,
    MemoryClient, PushEvent, PushHandler,
};
pub use config::{normalize_sid, BridgeConfig, GatewayConfig, DOMAIN};
pub use connection::GatewayConnection;
pub use device::{Device, DeviceClass, DeviceEvent, DeviceSnapshot};
pub use discovery::{DiscoveryCoordinator, DiscoveryReport, ShutdownHook};
pub use error::{
    ActionError, BridgeError, ClientError, ConfigError, DiscoveryError, ParseError, RegistryError,
    Result,
};
pub use host::{Host, RecordingHost};
pub use ingestion::{IngestionPipeline, IngestionStats, PushReport};
pub use registry::{Diagnostic, GatewayRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
