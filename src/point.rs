//! Time-series data point and InfluxDB v2 Line Protocol rendering.
//!
//! A rendered point looks like:
//!
//! ```text
//! measurement,tag1=val1 field1=1.5,field2="text" timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A value stored in a data point field.
///
/// The mappers only produce floats and strings; readings carry a numeric
/// `value` plus a string `unit`, health metrics carry two numeric counters.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string, quoted and escaped on render.
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\"")
            }
        }
    }
}

/// One timestamped record destined for the time-series store.
///
/// Created transiently per message by the record mappers and discarded once
/// the store write returns.
#[derive(Debug, Clone)]
pub struct DataPoint {
    /// Measurement name.
    pub measurement: String,
    /// Indexed tag key/value pairs (always strings).
    pub tags: Vec<(String, String)>,
    /// Field key/value pairs (the actual data).
    pub fields: Vec<(String, FieldValue)>,
    /// Nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

impl DataPoint {
    /// Create an empty point for a measurement at the given timestamp.
    pub fn new(measurement: impl Into<String>, timestamp_ns: u64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns,
        }
    }

    /// Append a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Append a field.
    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Render this point as a single Line Protocol line.
    ///
    /// Returns `None` when the point has no fields; the store rejects
    /// field-less points, so the writer skips them.
    pub fn to_line_protocol(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }

        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_string());
        }

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        Some(line)
    }
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Escape a measurement name: commas and spaces need a backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value, or field key: commas, equals, spaces.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_simple_point() {
        let point = DataPoint::new("reading", 1_000_000_000)
            .tag("sensor_id", "s1")
            .field("value", FieldValue::Float(23.5));
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "reading,sensor_id=s1 value=23.5 1000000000"
        );
    }

    #[test]
    fn renders_multiple_fields_in_insertion_order() {
        let point = DataPoint::new("health", 42)
            .tag("sensor_id", "s2")
            .field("success_request", FieldValue::Float(9.0))
            .field("total_request", FieldValue::Float(10.0));
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "health,sensor_id=s2 success_request=9,total_request=10 42"
        );
    }

    #[test]
    fn string_fields_are_quoted_and_escaped() {
        let point = DataPoint::new("reading", 7)
            .field("unit", FieldValue::String("say \"C\"".into()));
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "reading unit=\"say \\\"C\\\"\" 7"
        );
    }

    #[test]
    fn special_characters_are_escaped() {
        let point = DataPoint::new("my measurement", 1)
            .tag("tag key", "tag,value")
            .field("field=key", FieldValue::Float(1.0));
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "my\\ measurement,tag\\ key=tag\\,value field\\=key=1 1"
        );
    }

    #[test]
    fn point_without_fields_renders_nothing() {
        let point = DataPoint::new("reading", 1).tag("sensor_id", "s1");
        assert!(point.to_line_protocol().is_none());
    }

    #[test]
    fn timestamp_helper_is_nanosecond_scale() {
        // 2020-01-01 in ns is ~1.577e18; anything after that is fine.
        assert!(now_timestamp_ns() > 1_577_000_000_000_000_000);
    }
}
