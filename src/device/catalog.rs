//! Model catalog
//!
//! Maps a reported device model onto the handlers that represent it.

use std::sync::Weak;

use log::{debug, warn};

use super::{BinaryKind, Device, DeviceClass, SensorKind};
use crate::client::DeviceDescriptor;
use crate::connection::GatewayConnection;

/// One handler a model expands to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    /// Base display name
    pub name: &'static str,
    /// Handler class
    pub class: DeviceClass,
}

const fn spec(name: &'static str, class: DeviceClass) -> HandlerSpec {
    HandlerSpec { name, class }
}

const fn wall_switch(name: &'static str, data_key: &'static str) -> HandlerSpec {
    spec(name, DeviceClass::Switch { data_key, plug: false })
}

/// Models with at least one handler
pub const SUPPORTED_MODELS: &[&str] = &[
    "gateway",
    "sensor_ht",
    "weather.v1",
    "motion",
    "sensor_motion.aq2",
    "magnet",
    "sensor_magnet.aq2",
    "smoke",
    "natgas",
    "sensor_wleak.aq1",
    "switch",
    "sensor_switch.aq2",
    "plug",
    "86plug",
    "ctrl_neutral1",
    "ctrl_neutral2",
    "ctrl_ln1",
    "ctrl_ln2",
    "curtain",
];

/// Handlers for a device model, in registration order
pub fn handlers_for_model(model: &str) -> Vec<HandlerSpec> {
    use BinaryKind::*;
    use SensorKind::*;

    match model {
        "gateway" => vec![
            spec("Gateway Light", DeviceClass::Light),
            spec("Illumination", DeviceClass::Sensor(Illumination)),
        ],
        "sensor_ht" => vec![
            spec("Temperature", DeviceClass::Sensor(Temperature)),
            spec("Humidity", DeviceClass::Sensor(Humidity)),
        ],
        "weather.v1" => vec![
            spec("Temperature", DeviceClass::Sensor(Temperature)),
            spec("Humidity", DeviceClass::Sensor(Humidity)),
            spec("Pressure", DeviceClass::Sensor(Pressure)),
        ],
        "motion" => vec![spec("Motion Sensor", DeviceClass::BinarySensor(Motion))],
        "sensor_motion.aq2" => vec![
            spec("Motion Sensor", DeviceClass::BinarySensor(Motion)),
            spec("Illumination", DeviceClass::Sensor(Lux)),
        ],
        "magnet" | "sensor_magnet.aq2" => {
            vec![spec("Door Window Sensor", DeviceClass::BinarySensor(Door))]
        }
        "smoke" => vec![spec("Smoke Sensor", DeviceClass::BinarySensor(Smoke))],
        "natgas" => vec![spec("Natgas Sensor", DeviceClass::BinarySensor(NaturalGas))],
        "sensor_wleak.aq1" => vec![spec("Water Leak Sensor", DeviceClass::BinarySensor(WaterLeak))],
        "switch" | "sensor_switch.aq2" => vec![spec("Switch", DeviceClass::Button)],
        "plug" => vec![spec(
            "Plug",
            DeviceClass::Switch {
                data_key: "status",
                plug: true,
            },
        )],
        "86plug" => vec![spec(
            "Wall Plug",
            DeviceClass::Switch {
                data_key: "status",
                plug: true,
            },
        )],
        "ctrl_neutral1" => vec![wall_switch("Wall Switch", "channel_0")],
        "ctrl_neutral2" => vec![
            wall_switch("Wall Switch Left", "channel_0"),
            wall_switch("Wall Switch Right", "channel_1"),
        ],
        "ctrl_ln1" => vec![wall_switch("Wall Switch LN", "channel_0")],
        "ctrl_ln2" => vec![
            wall_switch("Wall Switch LN Left", "channel_0"),
            wall_switch("Wall Switch LN Right", "channel_1"),
        ],
        "curtain" => vec![spec("Curtain", DeviceClass::Cover)],
        _ => Vec::new(),
    }
}

/// Build and seed the handlers of a reported device
///
/// The initial data is applied without notifying anyone; parse failures
/// are logged and leave the handler in its default state.
pub fn build_devices(descriptor: &DeviceDescriptor, gateway: &Weak<GatewayConnection>) -> Vec<Device> {
    let specs = handlers_for_model(&descriptor.model);
    if specs.is_empty() {
        debug!(
            "Unsupported model {} for device {}",
            descriptor.model, descriptor.sid
        );
    }

    specs
        .into_iter()
        .map(|spec| {
            let device = Device::new(
                descriptor.sid.clone(),
                spec.name,
                descriptor.model.clone(),
                spec.class,
                gateway.clone(),
            );
            for error in device.ingest(&descriptor.data).errors {
                warn!("Initial data of {} rejected: {}", device.name(), error);
            }
            device
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_supported_model_has_handlers() {
        for model in SUPPORTED_MODELS {
            assert!(
                !handlers_for_model(model).is_empty(),
                "model {} has no handlers",
                model
            );
        }
        assert!(handlers_for_model("lumi.unknown").is_empty());
    }

    #[test]
    fn test_sensor_ht_expands_in_order() {
        let specs = handlers_for_model("sensor_ht");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].class, DeviceClass::Sensor(SensorKind::Temperature));
        assert_eq!(specs[1].class, DeviceClass::Sensor(SensorKind::Humidity));
    }

    #[test]
    fn test_build_devices_seeds_state() {
        let descriptor = DeviceDescriptor::new("158d0001", "sensor_ht").with_data(json!({
            "temperature": "2210",
            "humidity": "4800",
            "voltage": 3050
        }));
        let devices = build_devices(&descriptor, &Weak::new());
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name(), "Temperature_158d0001");
        assert_eq!(devices[1].name(), "Humidity_158d0001");

        let snapshot = devices[0].snapshot();
        assert_eq!(snapshot.platform, "sensor");
        assert_eq!(snapshot.attributes.get("battery_level"), Some(&json!(50)));
    }

    #[test]
    fn test_build_devices_unknown_model() {
        let descriptor = DeviceDescriptor::new("158d0009", "lumi.vibration");
        assert!(build_devices(&descriptor, &Weak::new()).is_empty());
    }
}
