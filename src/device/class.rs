//! Per-class field extraction
//!
//! Every device class knows which report fields it cares about and when a
//! report counts as a change. Numeric fields arrive either as JSON numbers or
//! as decimal strings, depending on hub firmware.

use serde_json::Value;

use super::DeviceState;
use crate::client::DeviceData;
use crate::error::ParseError;

/// Readings a sensor handler can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// `temperature`, hundredths of °C
    Temperature,
    /// `humidity`, hundredths of %
    Humidity,
    /// `pressure`, hundredths of hPa
    Pressure,
    /// `illumination` of the gateway, offset by 300
    Illumination,
    /// `lux` of aq2 motion sensors
    Lux,
}

impl SensorKind {
    /// Report field holding the reading
    pub fn data_key(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Pressure => "pressure",
            SensorKind::Illumination => "illumination",
            SensorKind::Lux => "lux",
        }
    }

    /// Convert a raw reading; `None` rejects it as out of range
    fn convert(&self, raw: f64) -> Option<f64> {
        let value = match self {
            SensorKind::Temperature | SensorKind::Humidity | SensorKind::Pressure => raw / 100.0,
            SensorKind::Illumination => (raw - 300.0).max(0.0),
            SensorKind::Lux => raw,
        };
        match self {
            SensorKind::Temperature if !(-50.0..=60.0).contains(&value) => None,
            SensorKind::Humidity if value <= 0.0 || value > 100.0 => None,
            _ => Some((value * 100.0).round() / 100.0),
        }
    }
}

/// Two-state sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Motion,
    Door,
    Smoke,
    NaturalGas,
    WaterLeak,
}

/// Device class of a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceClass {
    /// Numeric reading
    Sensor(SensorKind),
    /// On/off sensor
    BinarySensor(BinaryKind),
    /// Plug or wall switch channel
    Switch { data_key: &'static str, plug: bool },
    /// Gateway ring light
    Light,
    /// Curtain motor
    Cover,
    /// Wireless button; only emits events
    Button,
}

const CLICK_TYPES: [&str; 4] = [
    "click",
    "double_click",
    "long_click_press",
    "long_click_release",
];

impl DeviceClass {
    /// Host platform the handler belongs to
    pub fn platform(&self) -> &'static str {
        match self {
            DeviceClass::Sensor(_) => "sensor",
            DeviceClass::BinarySensor(_) | DeviceClass::Button => "binary_sensor",
            DeviceClass::Switch { .. } => "switch",
            DeviceClass::Light => "light",
            DeviceClass::Cover => "cover",
        }
    }

    /// Apply class specific fields of a report
    pub(crate) fn parse_data(
        &self,
        data: &DeviceData,
        state: &mut DeviceState,
    ) -> Result<bool, ParseError> {
        match self {
            DeviceClass::Sensor(kind) => parse_sensor(*kind, data, state),
            DeviceClass::BinarySensor(kind) => parse_binary(*kind, data, state),
            DeviceClass::Switch { data_key, plug } => parse_switch(data_key, *plug, data, state),
            DeviceClass::Light => parse_light(data, state),
            DeviceClass::Cover => parse_cover(data, state),
            DeviceClass::Button => Ok(false),
        }
    }

    /// Click kind of a button report
    pub(crate) fn click_type(&self, data: &DeviceData) -> Option<String> {
        if *self != DeviceClass::Button {
            return None;
        }
        data.get("status")
            .and_then(Value::as_str)
            .filter(|status| CLICK_TYPES.contains(status))
            .map(str::to_string)
    }
}

fn number(field: &str, raw: &Value) -> Result<f64, ParseError> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .ok_or_else(|| ParseError::invalid(field, raw))
}

fn text<'a>(field: &str, raw: &'a Value) -> Result<&'a str, ParseError> {
    raw.as_str().ok_or_else(|| ParseError::invalid(field, raw))
}

fn set_state(state: &mut DeviceState, value: Value) -> bool {
    let changed = state.state != value;
    state.state = value;
    changed
}

fn set_attribute(state: &mut DeviceState, name: &str, value: Value) -> bool {
    state.attributes.insert(name.to_string(), value.clone()) != Some(value)
}

fn parse_sensor(
    kind: SensorKind,
    data: &DeviceData,
    state: &mut DeviceState,
) -> Result<bool, ParseError> {
    let key = kind.data_key();
    let raw = match data.get(key) {
        Some(raw) => raw,
        None => return Ok(false),
    };
    match kind.convert(number(key, raw)?) {
        Some(value) => {
            state.state = Value::from(value);
            Ok(true)
        }
        None => Ok(false),
    }
}

fn parse_binary(
    kind: BinaryKind,
    data: &DeviceData,
    state: &mut DeviceState,
) -> Result<bool, ParseError> {
    match kind {
        BinaryKind::Motion => {
            if let Some(since) = data.get("no_motion") {
                let seconds = number("no_motion", since)?;
                state
                    .attributes
                    .insert("no_motion_since".to_string(), Value::from(seconds as u64));
                state.state = Value::Bool(false);
                return Ok(true);
            }
            match data.get("status") {
                Some(raw) if text("status", raw)? == "motion" => {
                    state
                        .attributes
                        .insert("no_motion_since".to_string(), Value::from(0));
                    state.state = Value::Bool(true);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        BinaryKind::Door => {
            if let Some(since) = data.get("no_close") {
                let seconds = number("no_close", since)?;
                state
                    .attributes
                    .insert("open_since".to_string(), Value::from(seconds as u64));
                return Ok(true);
            }
            match data.get("status").map(|raw| text("status", raw)).transpose()? {
                Some("open") => {
                    state.attributes.insert("open_since".to_string(), Value::from(0));
                    Ok(set_state(state, Value::Bool(true)))
                }
                Some("close") => {
                    state.attributes.insert("open_since".to_string(), Value::from(0));
                    Ok(set_state(state, Value::Bool(false)))
                }
                _ => Ok(false),
            }
        }
        BinaryKind::Smoke | BinaryKind::NaturalGas => {
            let mut changed = false;
            if let Some(raw) = data.get("density") {
                let density = number("density", raw)?;
                changed |= set_attribute(state, "density", Value::from(density as i64));
            }
            if let Some(raw) = data.get("alarm") {
                let alarm = number("alarm", raw)? as i64;
                match alarm {
                    0 => changed |= set_state(state, Value::Bool(false)),
                    1 | 2 => changed |= set_state(state, Value::Bool(true)),
                    _ => return Err(ParseError::invalid("alarm", raw)),
                }
            }
            Ok(changed)
        }
        BinaryKind::WaterLeak => match data.get("status").map(|raw| text("status", raw)).transpose()? {
            Some("leak") => Ok(set_state(state, Value::Bool(true))),
            Some("no_leak") => Ok(set_state(state, Value::Bool(false))),
            _ => Ok(false),
        },
    }
}

fn parse_switch(
    data_key: &str,
    plug: bool,
    data: &DeviceData,
    state: &mut DeviceState,
) -> Result<bool, ParseError> {
    let mut changed = false;

    if plug {
        if let Some(raw) = data.get("inuse") {
            let in_use = number("inuse", raw)? != 0.0;
            changed |= set_attribute(state, "in_use", Value::Bool(in_use));
            if !in_use {
                changed |= set_attribute(state, "load_power", Value::from(0.0));
            }
        }
        if let Some(raw) = data.get("load_power") {
            let power = (number("load_power", raw)? * 100.0).round() / 100.0;
            changed |= set_attribute(state, "load_power", Value::from(power));
        }
        if let Some(raw) = data.get("power_consumed") {
            let consumed = number("power_consumed", raw)?;
            changed |= set_attribute(state, "power_consumed", Value::from(consumed));
        }
    }

    if let Some(raw) = data.get(data_key) {
        let on = match text(data_key, raw)? {
            "on" => true,
            "off" => false,
            _ => return Err(ParseError::invalid(data_key, raw)),
        };
        state.state = Value::Bool(on);
        changed = true;
    }

    Ok(changed)
}

fn parse_light(data: &DeviceData, state: &mut DeviceState) -> Result<bool, ParseError> {
    let raw = match data.get("rgb") {
        Some(raw) => raw,
        None => return Ok(false),
    };
    let packed = number("rgb", raw)?;
    if packed < 0.0 || packed > u32::MAX as f64 {
        return Err(ParseError::invalid("rgb", raw));
    }
    let packed = packed as u32;

    if packed == 0 {
        return Ok(set_state(state, Value::Bool(false)));
    }

    let brightness = (packed >> 24) & 0xff;
    let rgb = [(packed >> 16) & 0xff, (packed >> 8) & 0xff, packed & 0xff];
    state
        .attributes
        .insert("brightness".to_string(), Value::from(brightness));
    state
        .attributes
        .insert("rgb_color".to_string(), Value::from(rgb.to_vec()));
    state.state = Value::Bool(true);
    Ok(true)
}

fn parse_cover(data: &DeviceData, state: &mut DeviceState) -> Result<bool, ParseError> {
    let raw = match data.get("curtain_level") {
        Some(raw) => raw,
        None => return Ok(false),
    };
    let level = number("curtain_level", raw)?;
    if !(0.0..=100.0).contains(&level) {
        return Err(ParseError::invalid("curtain_level", raw));
    }
    let position = level.round() as u64;
    state
        .attributes
        .insert("current_position".to_string(), Value::from(position));
    state.state = Value::from(if position > 0 { "open" } else { "closed" });
    Ok(true)
}
