// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Live gateway connections
//!
//! A [`GatewayConnection`] is created when a configured gateway answers
//! discovery. It owns the handlers of every sub-device the gateway reported;
//! handlers point back at it through a `Weak` reference.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};

use crate::client::{GatewayAnnouncement, HubTarget};
use crate::config::normalize_sid;
use crate::device::{build_devices, Device, DeviceSnapshot};
use crate::util::{read, write};

#[derive(Debug, Default)]
struct DeviceTable {
    by_sid: HashMap<String, Vec<Arc<Device>>>,
    order: Vec<Arc<Device>>,
}

/// A discovered, configured gateway
#[derive(Debug)]
pub struct GatewayConnection {
    sid: String,
    address: SocketAddr,
    proto_version: Option<String>,
    key: Option<String>,
    devices: RwLock<DeviceTable>,
}

impl GatewayConnection {
    /// Create a connection without devices
    pub fn new(sid: &str, address: SocketAddr, key: Option<String>) -> Self {
        Self {
            sid: normalize_sid(sid),
            address,
            proto_version: None,
            key,
            devices: RwLock::new(DeviceTable::default()),
        }
    }

    /// Create a connection from a discovery answer, with its device handlers
    pub fn establish(announcement: &GatewayAnnouncement, key: Option<String>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<GatewayConnection>| {
            let mut table = DeviceTable::default();
            for descriptor in &announcement.devices {
                for device in build_devices(descriptor, weak) {
                    table.insert(Arc::new(device));
                }
            }

            Self {
                sid: normalize_sid(&announcement.sid),
                address: announcement.address,
                proto_version: announcement.proto_version.clone(),
                key,
                devices: RwLock::new(table),
            }
        })
    }

    /// Normalized gateway sid
    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn proto_version(&self) -> Option<&str> {
        self.proto_version.as_deref()
    }

    /// Whether writes can be signed
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Register a handler; handlers sharing a sid keep insertion order
    pub fn add_device(&self, device: Arc<Device>) {
        write(&self.devices).insert(device);
    }

    /// Handlers registered under a device sid
    pub fn handlers_for(&self, sid: &str) -> Vec<Arc<Device>> {
        read(&self.devices)
            .by_sid
            .get(sid)
            .cloned()
            .unwrap_or_default()
    }

    /// All handlers, in registration order
    pub fn devices(&self) -> Vec<Arc<Device>> {
        read(&self.devices).order.clone()
    }

    pub fn device_count(&self) -> usize {
        read(&self.devices).order.len()
    }

    /// Current state of every handler
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.devices().iter().map(|d| d.snapshot()).collect()
    }

    /// Write destination for this gateway
    pub fn target(&self) -> HubTarget {
        HubTarget {
            sid: self.sid.clone(),
            address: self.address,
            key: self.key.clone(),
        }
    }
}

impl DeviceTable {
    fn insert(&mut self, device: Arc<Device>) {
        self.by_sid
            .entry(device.sid().to_string())
            .or_default()
            .push(device.clone());
        self.order.push(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DeviceDescriptor;
    use crate::device::DeviceClass;
    use serde_json::json;

    fn announcement() -> GatewayAnnouncement {
        GatewayAnnouncement::new("34:CE:00:88:DB:36", "192.168.1.10:9898".parse().unwrap())
            .with_device(DeviceDescriptor::new("158d0001", "sensor_ht"))
            .with_device(
                DeviceDescriptor::new("158d0002", "magnet").with_data(json!({ "status": "open" })),
            )
    }

    #[test]
    fn test_establish_builds_handlers() {
        let connection = GatewayConnection::establish(&announcement(), None);
        assert_eq!(connection.sid(), "34ce0088db36");
        assert_eq!(connection.device_count(), 3);
        assert_eq!(connection.handlers_for("158d0001").len(), 2);
        assert!(connection.handlers_for("158d9999").is_empty());
        assert!(!connection.has_key());
    }

    #[test]
    fn test_handlers_point_back_to_connection() {
        let connection = GatewayConnection::establish(&announcement(), None);
        for device in connection.devices() {
            let owner = device.gateway().unwrap();
            assert!(Arc::ptr_eq(&owner, &connection));
        }
    }

    #[test]
    fn test_initial_data_seeded() {
        let connection = GatewayConnection::establish(&announcement(), None);
        let door = &connection.handlers_for("158d0002")[0];
        assert_eq!(door.snapshot().state, json!(true));
    }

    #[test]
    fn test_add_device_preserves_order() {
        let connection = GatewayConnection::new("aa", "10.0.0.2:9898".parse().unwrap(), None);
        let first = Arc::new(Device::new(
            "158d0003",
            "Wall Switch Left",
            "ctrl_neutral2",
            DeviceClass::Switch {
                data_key: "channel_0",
                plug: false,
            },
            Weak::new(),
        ));
        let second = Arc::new(Device::new(
            "158d0003",
            "Wall Switch Right",
            "ctrl_neutral2",
            DeviceClass::Switch {
                data_key: "channel_1",
                plug: false,
            },
            Weak::new(),
        ));
        connection.add_device(first);
        connection.add_device(second);

        let names: Vec<_> = connection
            .handlers_for("158d0003")
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["Wall Switch Left_158d0003", "Wall Switch Right_158d0003"]);
    }

    #[test]
    fn test_target_carries_key() {
        let connection =
            GatewayConnection::establish(&announcement(), Some("0123456789abcdef".to_string()));
        let target = connection.target();
        assert_eq!(target.sid, "34ce0088db36");
        assert_eq!(target.key.as_deref(), Some("0123456789abcdef"));
        assert!(connection.has_key());
    }
}
