// mihub daemon - Host implementation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! The daemon's side of the host contract.
//!
//! Keeps the latest snapshot of every device for `/devices`, mirrors state
//! changes into Prometheus and holds the stop hook until Ctrl-C.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use mihub::{DeviceEvent, DeviceSnapshot, Host, ShutdownHook, ATTR_BATTERY_LEVEL};
use tracing::{debug, info};

use crate::metrics::{
    record_device_event, record_device_registered, record_state_change, update_battery_level,
};

/// Host backing the HTTP surface
#[derive(Debug, Default)]
pub struct DaemonHost {
    devices: Mutex<BTreeMap<String, DeviceSnapshot>>,
    hooks: Mutex<Vec<ShutdownHook>>,
    actions: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DaemonHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot of every device, ordered by name
    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        lock(&self.devices).values().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        lock(&self.devices).len()
    }

    /// Registered actions as `domain.action`
    pub fn actions(&self) -> Vec<String> {
        lock(&self.actions).clone()
    }

    /// Fire every subscribed stop hook
    pub fn shutdown(&self) {
        let hooks: Vec<_> = lock(&self.hooks).drain(..).collect();
        for hook in hooks {
            hook.fire();
        }
    }

    fn store(&self, snapshot: &DeviceSnapshot) {
        if let Some(level) = snapshot
            .attributes
            .get(ATTR_BATTERY_LEVEL)
            .and_then(|v| v.as_f64())
        {
            update_battery_level(&snapshot.name, level);
        }
        lock(&self.devices).insert(snapshot.name.clone(), snapshot.clone());
    }
}

impl Host for DaemonHost {
    fn register_device(&self, snapshot: &DeviceSnapshot) {
        debug!("Registering {} ({})", snapshot.name, snapshot.platform);
        record_device_registered(snapshot.platform);
        self.store(snapshot);
    }

    fn state_changed(&self, snapshot: &DeviceSnapshot) {
        debug!("{} -> {}", snapshot.name, snapshot.state);
        record_state_change(snapshot.platform);
        self.store(snapshot);
    }

    fn device_event(&self, event: &DeviceEvent) {
        info!("{} {}: {}", event.name, event.event_type, event.click_type);
        record_device_event(&event.click_type);
    }

    fn listen_once_shutdown(&self, hook: ShutdownHook) {
        lock(&self.hooks).push(hook);
    }

    fn register_action(&self, domain: &str, action: &str) {
        info!("Action {}.{} available", domain, action);
        lock(&self.actions).push(format!("{}.{}", domain, action));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(name: &str, battery: Option<u8>) -> DeviceSnapshot {
        let mut attributes = BTreeMap::new();
        if let Some(level) = battery {
            attributes.insert(ATTR_BATTERY_LEVEL.to_string(), json!(level));
        }
        DeviceSnapshot {
            sid: "158d0001".to_string(),
            name: name.to_string(),
            model: "magnet".to_string(),
            platform: "binary_sensor",
            state: json!(false),
            attributes,
        }
    }

    #[test]
    fn test_state_change_replaces_snapshot() {
        let host = DaemonHost::new();
        host.register_device(&snapshot("Door Window Sensor_158d0001", None));
        host.state_changed(&snapshot("Door Window Sensor_158d0001", Some(60)));

        let devices = host.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].attributes[ATTR_BATTERY_LEVEL], json!(60));
    }

    #[test]
    fn test_register_action() {
        let host = DaemonHost::new();
        host.register_action("xiaomi", "play_ringtone");
        assert_eq!(host.actions(), vec!["xiaomi.play_ringtone"]);
    }
}
