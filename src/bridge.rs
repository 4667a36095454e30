// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bridge setup and teardown
//!
//! [`Bridge::setup`] wires the components together in a fixed order:
//!
//! 1. validate the configuration
//! 2. store gateway credentials in the registry
//! 3. discover gateways
//! 4. start listening and subscribe the stop hook
//! 5. register every device handler with the host
//! 6. register the ringtone actions
//!
//! Any failure before step 4 aborts setup. Nothing is left listening on
//! error.

use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::actions::{ActionKind, ActionOutcome, RemoteActionDispatcher};
use crate::client::GatewayClient;
use crate::config::{BridgeConfig, DOMAIN};
use crate::device::DeviceSnapshot;
use crate::discovery::{DiscoveryCoordinator, DiscoveryReport, ShutdownHook};
use crate::error::Result;
use crate::host::Host;
use crate::ingestion::IngestionPipeline;
use crate::registry::GatewayRegistry;

/// A running bridge
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<GatewayRegistry>,
    pipeline: Arc<IngestionPipeline>,
    dispatcher: RemoteActionDispatcher,
    shutdown: ShutdownHook,
    discovery: DiscoveryReport,
}

impl Bridge {
    /// Validate, discover, listen and register
    ///
    /// # Errors
    ///
    /// Returns a [`crate::BridgeError`] for invalid configuration, when the
    /// client cannot bind the configured interface, when no gateway answered
    /// discovery, or when the client refused to listen.
    pub fn setup(
        mut config: BridgeConfig,
        client: Arc<dyn GatewayClient>,
        host: Arc<dyn Host>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(GatewayRegistry::new(config.gateways.clone()));

        client.bind_interface(&config.interface)?;

        let expected = config.expected_gateways();
        info!("Expecting {} gateways", expected);
        let coordinator = DiscoveryCoordinator::new(client.clone(), registry.clone());
        let discovery = coordinator.discover(expected, config.discovery_retry)?;

        let pipeline = Arc::new(IngestionPipeline::new(registry.clone(), host.clone()));
        let shutdown = coordinator.start_listening(pipeline.clone(), host.as_ref())?;

        for connection in registry.connections() {
            for device in connection.devices() {
                host.register_device(&device.snapshot());
            }
        }

        for action in ActionKind::ALL {
            host.register_action(DOMAIN, action.name());
        }

        info!(
            "Bridge ready: {} gateways, {} devices",
            registry.len(),
            registry.device_count()
        );

        Ok(Self {
            config,
            dispatcher: RemoteActionDispatcher::new(registry.clone(), client),
            registry,
            pipeline,
            shutdown,
            discovery,
        })
    }

    /// Stop listening and release every connection
    ///
    /// Safe to call more than once, and safe to call after the host already
    /// fired the stop hook.
    pub fn shutdown(&self) {
        self.shutdown.fire();
        self.registry.clear();
    }

    /// Whether the stop hook already fired
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// Run a host action; failures are logged, not returned
    pub fn invoke(&self, action: &str, data: &Value) -> ActionOutcome {
        self.dispatcher.invoke(action, data)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<GatewayRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &RemoteActionDispatcher {
        &self.dispatcher
    }

    /// Outcome of the discovery run performed during setup
    pub fn discovery(&self) -> &DiscoveryReport {
        &self.discovery
    }

    /// Current state of every device handler
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.registry.snapshots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeviceDescriptor, GatewayAnnouncement, MemoryClient};
    use crate::config::GatewayConfig;
    use crate::error::{BridgeError, ConfigError, DiscoveryError};
    use crate::host::RecordingHost;

    fn announcement() -> GatewayAnnouncement {
        GatewayAnnouncement::new("34ce0088db36", "192.168.1.10:9898".parse().unwrap())
            .with_device(DeviceDescriptor::new("158d0001", "sensor_ht"))
            .with_device(DeviceDescriptor::new("158d0002", "magnet"))
    }

    #[test]
    fn test_setup_registers_devices_and_actions() {
        let client = Arc::new(MemoryClient::with_rounds(vec![vec![announcement()]]));
        let host = Arc::new(RecordingHost::new());
        let bridge = Bridge::setup(BridgeConfig::default(), client.clone(), host.clone()).unwrap();

        assert_eq!(bridge.registry().len(), 1);
        assert_eq!(host.registered().len(), 3);
        assert_eq!(
            host.actions(),
            vec![
                ("xiaomi".to_string(), "play_ringtone".to_string()),
                ("xiaomi".to_string(), "stop_ringtone".to_string()),
            ]
        );
        assert_eq!(client.listen_calls(), 1);
        assert_eq!(host.hook_count(), 1);
        assert_eq!(bridge.discovery().attempts, 1);
    }

    #[test]
    fn test_setup_binds_configured_interface() {
        let client = Arc::new(MemoryClient::with_rounds(vec![vec![announcement()]]));
        let mut config = BridgeConfig::default();
        config.interface = "192.168.1.2".to_string();

        Bridge::setup(config, client.clone(), Arc::new(RecordingHost::new())).unwrap();
        assert_eq!(client.interface().as_deref(), Some("192.168.1.2"));

        let client = Arc::new(MemoryClient::with_rounds(vec![vec![announcement()]]));
        Bridge::setup(BridgeConfig::default(), client.clone(), Arc::new(RecordingHost::new()))
            .unwrap();
        assert_eq!(client.interface().as_deref(), Some("any"));
    }

    #[test]
    fn test_setup_rejects_bad_key_before_discovery() {
        let client = Arc::new(MemoryClient::with_rounds(vec![vec![announcement()]]));
        let config = BridgeConfig::with_gateways(vec![GatewayConfig {
            sid: Some("34ce0088db36".to_string()),
            key: Some("short".to_string()),
        }]);

        let result = Bridge::setup(config, client.clone(), Arc::new(RecordingHost::new()));
        assert!(matches!(
            result,
            Err(BridgeError::Config(ConfigError::InvalidKeyLength { length: 5, .. }))
        ));
        assert_eq!(client.discover_calls(), 0);
    }

    #[test]
    fn test_setup_fails_without_gateways() {
        let client = Arc::new(MemoryClient::new());
        let host = Arc::new(RecordingHost::new());
        let result = Bridge::setup(BridgeConfig::with_discovery_retry(2), client.clone(), host.clone());

        assert!(matches!(
            result,
            Err(BridgeError::Discovery(DiscoveryError::NoGatewaysDiscovered { attempts: 2 }))
        ));
        assert_eq!(client.listen_calls(), 0);
        assert_eq!(host.hook_count(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let client = Arc::new(MemoryClient::with_rounds(vec![vec![announcement()]]));
        let host = Arc::new(RecordingHost::new());
        let bridge = Bridge::setup(BridgeConfig::default(), client.clone(), host.clone()).unwrap();

        host.stop();
        bridge.shutdown();
        bridge.shutdown();

        assert_eq!(client.stop_calls(), 1);
        assert!(bridge.is_shut_down());
        assert!(bridge.registry().is_empty());
        assert!(bridge.snapshots().is_empty());
    }
}
