//! Battery telemetry
//!
//! Battery powered Xiaomi sub-devices report their cell voltage in
//! millivolts. The usable range of a CR2032/CR1632 cell is mapped linearly
//! onto 0..=100 percent.

use serde_json::Value;

use crate::client::DeviceData;
use crate::error::ParseError;

/// Attribute under which the battery percentage is stored
pub const ATTR_BATTERY_LEVEL: &str = "battery_level";

/// Field carrying the raw voltage in a device report
pub const VOLTAGE_FIELD: &str = "voltage";

/// Voltage at 0 percent (mV)
pub const MIN_VOLTAGE_MV: f64 = 2800.0;

/// Voltage at 100 percent (mV)
pub const MAX_VOLTAGE_MV: f64 = 3300.0;

/// Convert a voltage in millivolts to a battery percentage
///
/// The input is clamped to [2800, 3300] and the result is rounded half up.
pub fn voltage_to_percent(millivolts: f64) -> u8 {
    let clamped = millivolts.clamp(MIN_VOLTAGE_MV, MAX_VOLTAGE_MV);
    let percent = (clamped - MIN_VOLTAGE_MV) * 100.0 / (MAX_VOLTAGE_MV - MIN_VOLTAGE_MV);
    (percent + 0.5).floor() as u8
}

/// Battery percentage of a device report
///
/// Returns `Ok(None)` when the report has no voltage field. Voltages may be
/// JSON numbers or numeric strings.
pub fn battery_percent(data: &DeviceData) -> Result<Option<u8>, ParseError> {
    let raw = match data.get(VOLTAGE_FIELD) {
        Some(raw) => raw,
        None => return Ok(None),
    };

    let millivolts = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| !v.is_nan())
    .ok_or_else(|| ParseError::invalid(VOLTAGE_FIELD, raw))?;

    Ok(Some(voltage_to_percent(millivolts)))
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

    #[test]
    fn test_voltage_bounds() {
        assert_eq!(voltage_to_percent(2800.0), 0);
        assert_eq!(voltage_to_percent(3300.0), 100);
        assert_eq!(voltage_to_percent(3050.0), 50);
    }

    #[test]
    fn test_voltage_clamped() {
        assert_eq!(voltage_to_percent(2500.0), 0);
        assert_eq!(voltage_to_percent(3600.0), 100);
        assert_eq!(voltage_to_percent(0.0), 0);
        assert_eq!(voltage_to_percent(f64::INFINITY), 100);
    }

    #[test]
    fn test_voltage_rounding() {
        assert_eq!(voltage_to_percent(3100.0), 60);
        // 2802.5 mV is exactly 0.5 percent
        assert_eq!(voltage_to_percent(2802.5), 1);
        assert_eq!(voltage_to_percent(2802.0), 0);
        assert_eq!(voltage_to_percent(3005.0), 41);
    }

    #[test]
    fn test_voltage_monotonic() {
        let mut last = 0;
        for mv in (2700..3400).step_by(7) {
            let percent = voltage_to_percent(mv as f64);
            assert!(percent >= last);
            assert!(percent <= 100);
            last = percent;
        }
    }

    #[test]
    fn test_battery_percent_missing_field() {
        assert_eq!(battery_percent(&data(json!({ "status": "open" }))), Ok(None));
    }

    #[test]
    fn test_battery_percent_number_and_string() {
        assert_eq!(battery_percent(&data(json!({ "voltage": 3100 }))), Ok(Some(60)));
        assert_eq!(battery_percent(&data(json!({ "voltage": "3050" }))), Ok(Some(50)));
    }

    #[test]
    fn test_battery_percent_malformed() {
        let result = battery_percent(&data(json!({ "voltage": "high" })));
        assert!(matches!(result, Err(ParseError::InvalidValue { .. })));

        let result = battery_percent(&data(json!({ "voltage": null })));
        assert!(result.is_err());
    }
}
