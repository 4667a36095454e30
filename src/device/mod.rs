// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sub-device handlers
//!
//! A [`Device`] is one host-visible entity backed by a gateway sub-device.
//! A physical device may be represented by several handlers sharing its sid
//! (a `sensor_ht` yields a temperature and a humidity handler).
//!
//! Each handler owns its state behind a mutex. [`Device::ingest`] applies a
//! whole push (device fields and battery voltage) under one lock, so a
//! concurrent [`Device::snapshot`] never observes half of an update.

mod catalog;
mod class;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::Value;

use crate::battery::{battery_percent, ATTR_BATTERY_LEVEL};
use crate::client::DeviceData;
use crate::connection::GatewayConnection;
use crate::error::ParseError;
use crate::util::lock;

pub use catalog::{build_devices, handlers_for_model, HandlerSpec, SUPPORTED_MODELS};
pub use class::{BinaryKind, DeviceClass, SensorKind};

/// Mutable state of one handler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Primary state (`true`/`false`, a reading, a position, ...)
    pub state: Value,
    /// Externally visible attributes
    pub attributes: BTreeMap<String, Value>,
}

/// Owned copy of a handler's state, handed to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub sid: String,
    pub name: String,
    pub model: String,
    pub platform: &'static str,
    pub state: Value,
    pub attributes: BTreeMap<String, Value>,
}

/// A momentary device event (button clicks)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    pub sid: String,
    pub name: String,
    pub event_type: &'static str,
    pub click_type: String,
}

/// Result of applying one push to a handler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ingest {
    /// Snapshot after the update, present when anything changed
    pub changed: Option<DeviceSnapshot>,
    /// Parse failures of this push
    pub errors: Vec<ParseError>,
}

/// A host-visible handler for a gateway sub-device
#[derive(Debug)]
pub struct Device {
    sid: String,
    name: String,
    model: String,
    class: DeviceClass,
    gateway: Weak<GatewayConnection>,
    state: Mutex<DeviceState>,
}

impl Device {
    /// Create a handler; the display name is `{name}_{sid}`
    pub fn new(
        sid: impl Into<String>,
        name: &str,
        model: impl Into<String>,
        class: DeviceClass,
        gateway: Weak<GatewayConnection>,
    ) -> Self {
        let sid = sid.into();
        Self {
            name: format!("{}_{}", name, sid),
            sid,
            model: model.into(),
            class,
            gateway,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Device sid
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device model
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Device class
    pub fn class(&self) -> &DeviceClass {
        &self.class
    }

    /// Owning gateway, if it is still alive
    pub fn gateway(&self) -> Option<Arc<GatewayConnection>> {
        self.gateway.upgrade()
    }

    /// Parse device specific fields; true if an observable value changed
    pub fn parse_data(&self, data: &DeviceData) -> Result<bool, ParseError> {
        self.class.parse_data(data, &mut lock(&self.state))
    }

    /// Parse the battery voltage; true whenever the report carries one
    pub fn parse_voltage(&self, data: &DeviceData) -> Result<bool, ParseError> {
        apply_voltage(data, &mut lock(&self.state))
    }

    /// Apply a whole push under one lock
    ///
    /// Both parsers always run. The returned snapshot is taken before the
    /// lock is released.
    pub fn ingest(&self, data: &DeviceData) -> Ingest {
        let mut state = lock(&self.state);
        let mut errors = Vec::new();

        let data_changed = self.class.parse_data(data, &mut state).unwrap_or_else(|e| {
            errors.push(e);
            false
        });
        let voltage_changed = apply_voltage(data, &mut state).unwrap_or_else(|e| {
            errors.push(e);
            false
        });

        let changed = (data_changed || voltage_changed).then(|| self.snapshot_of(&state));
        Ingest { changed, errors }
    }

    /// Event carried by a push, if any
    pub fn event_for(&self, data: &DeviceData) -> Option<DeviceEvent> {
        self.class.click_type(data).map(|click_type| DeviceEvent {
            sid: self.sid.clone(),
            name: self.name.clone(),
            event_type: "click",
            click_type,
        })
    }

    /// Current state
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot_of(&lock(&self.state))
    }

    fn snapshot_of(&self, state: &DeviceState) -> DeviceSnapshot {
        DeviceSnapshot {
            sid: self.sid.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            platform: self.class.platform(),
            state: state.state.clone(),
            attributes: state.attributes.clone(),
        }
    }
}

fn apply_voltage(data: &DeviceData, state: &mut DeviceState) -> Result<bool, ParseError> {
    match battery_percent(data)? {
        Some(percent) => {
            state
                .attributes
                .insert(ATTR_BATTERY_LEVEL.to_string(), Value::from(percent));
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> DeviceData {
        match value {
            Value::Object(map) => map,
            _ => DeviceData::new(),
        }
    }

    fn door() -> Device {
        Device::new(
            "158d0001",
            "Door Window Sensor",
            "magnet",
            DeviceClass::BinarySensor(BinaryKind::Door),
            Weak::new(),
        )
    }

    #[test]
    fn test_device_name() {
        let device = door();
        assert_eq!(device.name(), "Door Window Sensor_158d0001");
        assert_eq!(device.sid(), "158d0001");
        assert_eq!(device.model(), "magnet");
        assert!(device.gateway().is_none());
    }

    #[test]
    fn test_parse_voltage_always_reports_change() {
        let device = door();
        assert_eq!(device.parse_voltage(&data(json!({ "voltage": 3100 }))), Ok(true));
        assert_eq!(device.parse_voltage(&data(json!({ "voltage": 3100 }))), Ok(true));
        assert_eq!(
            device.snapshot().attributes.get(ATTR_BATTERY_LEVEL),
            Some(&json!(60))
        );
        assert_eq!(device.parse_voltage(&data(json!({ "status": "open" }))), Ok(false));
    }

    #[test]
    fn test_ingest_runs_both_parsers() {
        let device = door();
        let ingest = device.ingest(&data(json!({ "status": "open", "voltage": 3300 })));
        let snapshot = ingest.changed.unwrap();
        assert_eq!(snapshot.state, json!(true));
        assert_eq!(snapshot.attributes.get(ATTR_BATTERY_LEVEL), Some(&json!(100)));
        assert!(ingest.errors.is_empty());
    }

    #[test]
    fn test_ingest_without_change() {
        let device = door();
        let ingest = device.ingest(&data(json!({ "unrelated": 1 })));
        assert!(ingest.changed.is_none());
        assert!(ingest.errors.is_empty());
    }

    #[test]
    fn test_ingest_keeps_partial_update_on_error() {
        let device = door();
        let ingest = device.ingest(&data(json!({ "status": "open", "voltage": "n/a" })));
        assert_eq!(ingest.errors.len(), 1);
        assert_eq!(ingest.changed.unwrap().state, json!(true));
    }

    #[test]
    fn test_button_event() {
        let button = Device::new("158d0002", "Switch", "switch", DeviceClass::Button, Weak::new());
        let event = button.event_for(&data(json!({ "status": "double_click" }))).unwrap();
        assert_eq!(event.event_type, "click");
        assert_eq!(event.click_type, "double_click");
        assert!(button.event_for(&data(json!({ "voltage": 3000 }))).is_none());
        assert!(door().event_for(&data(json!({ "status": "click" }))).is_none());
    }

    #[test]
    fn test_concurrent_ingest_snapshots_stay_consistent() {
        use std::thread;

        let device = Arc::new(Device::new(
            "158d0000",
            "Temperature",
            "sensor_ht",
            DeviceClass::Sensor(SensorKind::Temperature),
            Weak::new(),
        ));

        // Temperature and voltage of one report derive from the same seed
        let writers: Vec<_> = (0..2i64)
            .map(|writer| {
                let device = device.clone();
                thread::spawn(move || {
                    for n in 0..500i64 {
                        let seed = (writer * 37 + n) % 101;
                        device.ingest(&data(json!({
                            "temperature": (seed * 10).to_string(),
                            "voltage": 2800 + seed * 5,
                        })));
                    }
                })
            })
            .collect();

        let reader = {
            let device = device.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let snapshot = device.snapshot();
                    if snapshot.state.is_null() {
                        continue;
                    }
                    let temperature = snapshot.state.as_f64().unwrap();
                    let battery = snapshot.attributes[ATTR_BATTERY_LEVEL].as_u64().unwrap();
                    assert_eq!((temperature * 10.0).round() as u64, battery);
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
    }
}
