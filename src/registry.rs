// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Gateway registry
//!
//! The [`GatewayRegistry`] joins configured credentials with the live
//! connections created by discovery. Both sides are keyed by the normalized
//! gateway sid, so `34:CE:00:88:DB:36` and `34ce0088db36` are the same
//! gateway.

use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};

use crate::config::{normalize_sid, GatewayConfig};
use crate::connection::GatewayConnection;
use crate::device::DeviceSnapshot;
use crate::error::RegistryError;
use crate::util::{lock, read, write};

/// Non-fatal configuration findings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A gateway was configured without a key; writes will not be possible
    MissingKey { sid: String },
}

/// Configured gateways and their live connections
#[derive(Debug, Default)]
pub struct GatewayRegistry {
    configured: RwLock<Vec<GatewayConfig>>,
    connections: RwLock<Vec<Arc<GatewayConnection>>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl GatewayRegistry {
    /// Create a registry from validated gateway configs
    pub fn new(configs: Vec<GatewayConfig>) -> Self {
        let registry = Self::default();
        for config in configs {
            registry.add_config(config);
        }
        registry
    }

    /// Store credentials for one gateway
    pub fn add_config(&self, config: GatewayConfig) {
        if config.key.is_none() {
            warn!(
                "Gateway Key is not provided for {}. Controlling gateway device will not be possible.",
                config.display_sid()
            );
            lock(&self.diagnostics).push(Diagnostic::MissingKey {
                sid: config.display_sid().to_string(),
            });
        }
        write(&self.configured).push(config);
    }

    /// Credentials for a discovered gateway
    ///
    /// An explicit sid match wins over the first wildcard entry. `None` means
    /// the gateway is not configured.
    pub fn credentials_for(&self, sid: &str) -> Option<GatewayConfig> {
        let sid = normalize_sid(sid);
        let configured = read(&self.configured);
        configured
            .iter()
            .find(|c| c.sid.as_deref() == Some(sid.as_str()))
            .or_else(|| configured.iter().find(|c| c.is_wildcard()))
            .cloned()
    }

    /// Insert a live connection
    ///
    /// If a connection with the same sid is already registered, it is kept
    /// and returned instead.
    pub fn register(&self, connection: Arc<GatewayConnection>) -> Arc<GatewayConnection> {
        let mut connections = write(&self.connections);
        if let Some(existing) = connections.iter().find(|c| c.sid() == connection.sid()) {
            debug!("Gateway {} already registered", existing.sid());
            return existing.clone();
        }
        connections.push(connection.clone());
        connection
    }

    /// Look up a live connection; the sid is normalized first
    pub fn find(&self, sid: &str) -> Result<Arc<GatewayConnection>, RegistryError> {
        let sid = normalize_sid(sid);
        read(&self.connections)
            .iter()
            .find(|c| c.sid() == sid)
            .cloned()
            .ok_or(RegistryError::NotFound(sid))
    }

    /// Whether a connection with this sid is live
    pub fn contains(&self, sid: &str) -> bool {
        self.find(sid).is_ok()
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        read(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.connections).is_empty()
    }

    /// Live connections, in registration order
    pub fn connections(&self) -> Vec<Arc<GatewayConnection>> {
        read(&self.connections).clone()
    }

    /// Total number of device handlers across all gateways
    pub fn device_count(&self) -> usize {
        read(&self.connections)
            .iter()
            .map(|c| c.device_count())
            .sum()
    }

    /// Current state of every handler of every gateway
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.connections()
            .iter()
            .flat_map(|c| c.snapshots())
            .collect()
    }

    /// Diagnostics raised while storing credentials
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    /// Release every live connection
    pub fn clear(&self) {
        write(&self.connections).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "192.168.1.10:9898".parse().unwrap()
    }

    fn connection(sid: &str) -> Arc<GatewayConnection> {
        Arc::new(GatewayConnection::new(sid, addr(), None))
    }

    #[test]
    fn test_missing_key_diagnostic() {
        let registry = GatewayRegistry::new(vec![
            GatewayConfig::new(Some("aa"), Some("0123456789abcdef")).unwrap(),
            GatewayConfig::new(Some("bb"), None).unwrap(),
        ]);
        assert_eq!(
            registry.diagnostics(),
            vec![Diagnostic::MissingKey {
                sid: "bb".to_string()
            }]
        );
    }

    #[test]
    fn test_find_normalizes_sid() {
        let registry = GatewayRegistry::default();
        registry.register(connection("34ce0088db36"));

        assert!(registry.find("34:CE:00:88:DB:36").is_ok());
        assert!(registry.find("34CE0088DB36").is_ok());
        assert_eq!(
            registry.find("ffff").unwrap_err(),
            RegistryError::NotFound("ffff".to_string())
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = GatewayRegistry::default();
        let first = registry.register(connection("aa"));
        let second = registry.register(connection("AA"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_credentials_explicit_before_wildcard() {
        let registry = GatewayRegistry::new(vec![
            GatewayConfig::wildcard(),
            GatewayConfig::new(Some("AA"), Some("0123456789abcdef")).unwrap(),
        ]);
        let explicit = registry.credentials_for("aa").unwrap();
        assert_eq!(explicit.key.as_deref(), Some("0123456789abcdef"));

        let wildcard = registry.credentials_for("bb").unwrap();
        assert!(wildcard.is_wildcard());
    }

    #[test]
    fn test_credentials_unconfigured() {
        let registry =
            GatewayRegistry::new(vec![GatewayConfig::new(Some("aa"), None).unwrap()]);
        assert!(registry.credentials_for("bb").is_none());
    }

    #[test]
    fn test_clear_releases_connections() {
        let registry = GatewayRegistry::default();
        registry.register(connection("aa"));
        registry.register(connection("bb"));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("bb"));

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.device_count(), 0);
    }
}
