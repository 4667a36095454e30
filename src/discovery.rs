// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Gateway discovery
//!
//! Discovery is a bounded loop: each attempt performs exactly one blocking
//! `discover_gateways` call and stops as soon as the registry holds the
//! expected number of gateways. There is no backoff between attempts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::client::{GatewayAnnouncement, GatewayClient, PushHandler};
use crate::connection::GatewayConnection;
use crate::error::{ClientError, DiscoveryError};
use crate::host::Host;
use crate::registry::GatewayRegistry;

/// Outcome of a successful discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Number of `discover_gateways` calls performed
    pub attempts: u32,
    /// Live connections after the run
    pub connections: Vec<Arc<GatewayConnection>>,
}

struct HookInner {
    client: Arc<dyn GatewayClient>,
    fired: AtomicBool,
}

/// One-shot stop-listen hook
///
/// Clones share the same flag: however many times and from however many
/// places the hook is fired, `stop_listen` runs at most once.
#[derive(Clone)]
pub struct ShutdownHook {
    inner: Arc<HookInner>,
}

impl ShutdownHook {
    fn new(client: Arc<dyn GatewayClient>) -> Self {
        Self {
            inner: Arc::new(HookInner {
                client,
                fired: AtomicBool::new(false),
            }),
        }
    }

    /// Stop listening; returns true if this call did the work
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("Stopping Xiaomi gateway listener");
        if let Err(e) = self.inner.client.stop_listen() {
            error!("Failed to stop listening: {}", e);
        }
        true
    }

    /// Whether the hook already fired
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Drives discovery and listen activation
pub struct DiscoveryCoordinator {
    client: Arc<dyn GatewayClient>,
    registry: Arc<GatewayRegistry>,
}

impl DiscoveryCoordinator {
    pub fn new(client: Arc<dyn GatewayClient>, registry: Arc<GatewayRegistry>) -> Self {
        Self { client, registry }
    }

    /// Discover gateways until `expected` are registered or `max_retries`
    /// attempts were made
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoGatewaysDiscovered`] if the registry is
    /// still empty after the last attempt. Discovering fewer gateways than
    /// expected is not an error.
    pub fn discover(
        &self,
        expected: usize,
        max_retries: u32,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let mut attempts = 0;

        while attempts < max_retries {
            attempts += 1;
            info!("Discovering Xiaomi Gateways (Try {})", attempts);

            match self.client.discover_gateways() {
                Ok(announcements) => {
                    for announcement in &announcements {
                        self.accept(announcement);
                    }
                }
                Err(e) => error!("Discovery attempt {} failed: {}", attempts, e),
            }

            if self.registry.len() >= expected {
                break;
            }
        }

        if self.registry.is_empty() {
            return Err(DiscoveryError::NoGatewaysDiscovered { attempts });
        }
        if self.registry.len() < expected {
            warn!(
                "Discovered {} of {} expected gateways",
                self.registry.len(),
                expected
            );
        }

        Ok(DiscoveryReport {
            attempts,
            connections: self.registry.connections(),
        })
    }

    fn accept(&self, announcement: &GatewayAnnouncement) {
        if self.registry.contains(&announcement.sid) {
            debug!("Gateway {} already known", announcement.sid);
            return;
        }

        let credentials = match self.registry.credentials_for(&announcement.sid) {
            Some(credentials) => credentials,
            None => {
                info!(
                    "Gateway {} at {} is not configured, skipping",
                    announcement.sid, announcement.address
                );
                return;
            }
        };

        let connection = GatewayConnection::establish(announcement, credentials.key);
        info!(
            "Xiaomi Gateway {} found at {} with {} devices",
            connection.sid(),
            connection.address(),
            connection.device_count()
        );
        self.registry.register(connection);
    }

    /// Start the client's listen loop and subscribe the stop hook
    ///
    /// `listen` is called exactly once. The returned hook is the same one
    /// handed to the host.
    pub fn start_listening(
        &self,
        handler: Arc<dyn PushHandler>,
        host: &dyn Host,
    ) -> Result<ShutdownHook, ClientError> {
        self.client.listen(handler)?;
        let hook = ShutdownHook::new(self.client.clone());
        host.listen_once_shutdown(hook.clone());
        Ok(hook)
    }
}

impl fmt::Debug for DiscoveryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryCoordinator")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeviceDescriptor, MemoryClient, PushEvent};
    use crate::config::GatewayConfig;
    use crate::host::RecordingHost;
    use std::net::SocketAddr;

    struct NullHandler;

    impl PushHandler for NullHandler {
        fn handle_push(&self, _event: &PushEvent) {}
    }

    fn gateway(sid: &str, host: u8) -> GatewayAnnouncement {
        let address: SocketAddr = format!("192.168.1.{}:9898", host).parse().unwrap();
        GatewayAnnouncement::new(sid, address)
    }

    fn wildcard_registry(count: usize) -> Arc<GatewayRegistry> {
        Arc::new(GatewayRegistry::new(vec![GatewayConfig::wildcard(); count]))
    }

    #[test]
    fn test_discover_stops_when_expected_reached() {
        let client = Arc::new(MemoryClient::revealing_one_per_call(vec![
            gateway("aa", 10),
            gateway("bb", 11),
            gateway("cc", 12),
        ]));
        let registry = wildcard_registry(2);
        let coordinator = DiscoveryCoordinator::new(client.clone(), registry.clone());

        let report = coordinator.discover(2, 5).unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(client.discover_calls(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_discover_exhausts_retries() {
        let client = Arc::new(MemoryClient::new());
        let coordinator = DiscoveryCoordinator::new(client.clone(), wildcard_registry(1));

        let result = coordinator.discover(1, 4);
        assert_eq!(
            result.unwrap_err(),
            DiscoveryError::NoGatewaysDiscovered { attempts: 4 }
        );
        assert_eq!(client.discover_calls(), 4);
    }

    #[test]
    fn test_partial_discovery_succeeds() {
        let client = Arc::new(MemoryClient::with_rounds(vec![vec![gateway("aa", 10)]]));
        let registry = wildcard_registry(2);
        let coordinator = DiscoveryCoordinator::new(client.clone(), registry);

        let report = coordinator.discover(2, 3).unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.connections.len(), 1);
    }

    #[test]
    fn test_failed_attempt_counts() {
        let client = Arc::new(MemoryClient::new());
        client.push_failure(ClientError::Io("socket closed".to_string()));
        client.push_round(vec![gateway("aa", 10)]);
        let coordinator = DiscoveryCoordinator::new(client.clone(), wildcard_registry(1));

        let report = coordinator.discover(1, 3).unwrap();
        assert_eq!(report.attempts, 2);
    }

    #[test]
    fn test_unconfigured_gateway_skipped() {
        let client = Arc::new(MemoryClient::with_rounds(vec![vec![
            gateway("aa", 10),
            gateway("bb", 11),
        ]]));
        let registry = Arc::new(GatewayRegistry::new(vec![
            GatewayConfig::new(Some("BB"), Some("0123456789abcdef")).unwrap(),
        ]));
        let coordinator = DiscoveryCoordinator::new(client, registry.clone());

        coordinator.discover(1, 1).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.find("bb").unwrap().has_key());
        assert!(registry.find("aa").is_err());
    }

    #[test]
    fn test_repeated_announcement_keeps_connection() {
        let announced = gateway("aa", 10).with_device(DeviceDescriptor::new("158d0001", "magnet"));
        let client = Arc::new(MemoryClient::with_rounds(vec![
            vec![announced.clone()],
            vec![announced],
        ]));
        let registry = wildcard_registry(2);
        let coordinator = DiscoveryCoordinator::new(client, registry.clone());

        coordinator.discover(2, 2).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_start_listening_once() {
        let client = Arc::new(MemoryClient::new());
        let host = RecordingHost::new();
        let coordinator = DiscoveryCoordinator::new(client.clone(), wildcard_registry(1));

        let hook = coordinator
            .start_listening(Arc::new(NullHandler), &host)
            .unwrap();
        assert_eq!(client.listen_calls(), 1);
        assert_eq!(host.hook_count(), 1);

        assert!(hook.fire());
        assert!(!hook.fire());
        host.stop();
        assert_eq!(client.stop_calls(), 1);
        assert!(!client.is_listening());
    }
}
