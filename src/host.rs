// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Host collaborator
//!
//! The host is whatever embeds the bridge: it keeps the entity registry,
//! receives state changes, exposes the actions and signals shutdown.
//! [`RecordingHost`] keeps every call in memory for tests.

use std::sync::Mutex;

use crate::device::{DeviceEvent, DeviceSnapshot};
use crate::discovery::ShutdownHook;
use crate::util::lock;

/// Services the bridge needs from its host
pub trait Host: Send + Sync {
    /// A device handler became available
    fn register_device(&self, snapshot: &DeviceSnapshot);

    /// A device handler's state or attributes changed
    fn state_changed(&self, snapshot: &DeviceSnapshot);

    /// A device emitted a momentary event
    fn device_event(&self, event: &DeviceEvent);

    /// Fire `hook` once when the host stops
    fn listen_once_shutdown(&self, hook: ShutdownHook);

    /// An action became callable under `domain`
    fn register_action(&self, domain: &str, action: &str);
}

/// In-memory host recording every call
#[derive(Debug, Default)]
pub struct RecordingHost {
    registered: Mutex<Vec<DeviceSnapshot>>,
    changes: Mutex<Vec<DeviceSnapshot>>,
    events: Mutex<Vec<DeviceEvent>>,
    hooks: Mutex<Vec<ShutdownHook>>,
    actions: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered devices, in registration order
    pub fn registered(&self) -> Vec<DeviceSnapshot> {
        lock(&self.registered).clone()
    }

    /// State change notifications, oldest first
    pub fn changes(&self) -> Vec<DeviceSnapshot> {
        lock(&self.changes).clone()
    }

    /// Notifications for one device name
    pub fn changes_for(&self, name: &str) -> Vec<DeviceSnapshot> {
        lock(&self.changes)
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.events).clone()
    }

    /// Registered actions as `(domain, action)`
    pub fn actions(&self) -> Vec<(String, String)> {
        lock(&self.actions).clone()
    }

    /// Number of subscribed shutdown hooks
    pub fn hook_count(&self) -> usize {
        lock(&self.hooks).len()
    }

    /// Simulate host shutdown: fire and drop every subscribed hook
    pub fn stop(&self) {
        let hooks: Vec<_> = lock(&self.hooks).drain(..).collect();
        for hook in hooks {
            hook.fire();
        }
    }
}

impl Host for RecordingHost {
    fn register_device(&self, snapshot: &DeviceSnapshot) {
        lock(&self.registered).push(snapshot.clone());
    }

    fn state_changed(&self, snapshot: &DeviceSnapshot) {
        lock(&self.changes).push(snapshot.clone());
    }

    fn device_event(&self, event: &DeviceEvent) {
        lock(&self.events).push(event.clone());
    }

    fn listen_once_shutdown(&self, hook: ShutdownHook) {
        lock(&self.hooks).push(hook);
    }

    fn register_action(&self, domain: &str, action: &str) {
        lock(&self.actions).push((domain.to_string(), action.to_string()));
    }
}
