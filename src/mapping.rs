//! Record mappers: decoded message payloads to time-series data points.
//!
//! Both mappers are pure; the caller supplies the processing-time timestamp
//! so tests stay deterministic.

use serde_json::Value;

use crate::error::BridgeError;
use crate::point::{DataPoint, FieldValue};

/// Map a sensor reading payload to a data point.
///
/// Expects `{sensor_id, value, unit}`. Missing fields fall back to defaults
/// (empty string / 0.0); a present but non-numeric `value` is a mapping
/// error.
pub fn map_reading(
    measurement: &str,
    payload: &Value,
    timestamp_ns: u64,
) -> Result<DataPoint, BridgeError> {
    let point = DataPoint::new(measurement, timestamp_ns)
        .tag("sensor_id", coerce_string(payload.get("sensor_id")))
        .field("value", FieldValue::Float(coerce_float(payload.get("value"), "value")?))
        .field("unit", FieldValue::String(coerce_string(payload.get("unit"))));
    Ok(point)
}

/// Map a health metrics payload to a data point.
///
/// Expects `{sensor_id, success_request, total_request}`; the two counters
/// are coerced to floats, defaulting to 0.0 when absent.
pub fn map_health(
    measurement: &str,
    payload: &Value,
    timestamp_ns: u64,
) -> Result<DataPoint, BridgeError> {
    let point = DataPoint::new(measurement, timestamp_ns)
        .tag("sensor_id", coerce_string(payload.get("sensor_id")))
        .field(
            "success_request",
            FieldValue::Float(coerce_float(payload.get("success_request"), "success_request")?),
        )
        .field(
            "total_request",
            FieldValue::Float(coerce_float(payload.get("total_request"), "total_request")?),
        );
    Ok(point)
}

/// Best-effort string coercion for tag values.
///
/// Strings pass through, numbers and bools are stringified, anything else
/// (missing, null, arrays, objects) becomes the empty string.
fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Numeric coercion for field values.
///
/// Accepts JSON numbers and numeric strings; a missing or null value
/// defaults to 0.0. Anything else fails with a mapping error naming the
/// field.
fn coerce_float(value: Option<&Value>, field: &str) -> Result<f64, BridgeError> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| BridgeError::Mapping {
            field: field.to_string(),
            reason: format!("number {n} is not representable as f64"),
        }),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| BridgeError::Mapping {
            field: field.to_string(),
            reason: format!("'{s}' is not numeric"),
        }),
        Some(other) => Err(BridgeError::Mapping {
            field: field.to_string(),
            reason: format!("unsupported value type: {other}"),
        }),
    }
}
