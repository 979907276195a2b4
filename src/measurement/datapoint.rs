//! Timestamped data points handed to the sink.
//!
//! A `DataPoint` carries exactly one field. Points are built once and not mutated
//! afterwards; tags are attached while constructing.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use emf_daq::measurement::{DataPoint, FieldValue};
//!
//! let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! let point = DataPoint::new("emf390_data", "emf_value", FieldValue::Float(1.5), ts)
//!     .with_tag("device", "gq_emf390");
//!
//! assert_eq!(
//!     point.to_line_protocol(),
//!     "emf390_data,device=gq_emf390 emf_value=1.5 1700000000000000000"
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Value of a point's single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric reading
    Float(f64),
    /// Mode name or version string
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Text(text) => f.write_str(text),
        }
    }
}

/// One measurement field at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    measurement: String,
    field: String,
    value: FieldValue,
    timestamp: DateTime<Utc>,
    tags: BTreeMap<String, String>,
}

impl DataPoint {
    /// Create an untagged point.
    pub fn new(
        measurement: impl Into<String>,
        field: impl Into<String>,
        value: FieldValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            field: field.into(),
            value,
            timestamp,
            tags: BTreeMap::new(),
        }
    }

    /// Attach a tag. A later tag with the same key replaces the earlier one.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Attach several tags.
    pub fn with_tags<'a, I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Field value.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// UTC timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Tag set, sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Render as one line of InfluxDB line protocol with a nanosecond timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }
        line.push(' ');
        line.push_str(&escape(&self.field, &[',', '=', ' ']));
        line.push('=');
        match &self.value {
            FieldValue::Float(value) => line.push_str(&value.to_string()),
            FieldValue::Text(text) => {
                line.push('"');
                line.push_str(&escape(text, &['"', '\\']));
                line.push('"');
            }
        }
        line.push(' ');
        line.push_str(
            &self
                .timestamp
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_string(),
        );
        line
    }
}

/// Backslash-escape `special`. Line breaks end a line-protocol record and cannot be
/// escaped, so they become spaces.
fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let c = if matches!(c, '\n' | '\r') { ' ' } else { c };
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 123).unwrap()
    }

    #[test]
    fn renders_float_point() {
        let point = DataPoint::new("emf390_data", "ef_value", FieldValue::Float(12.5), ts());
        assert_eq!(
            point.to_line_protocol(),
            "emf390_data ef_value=12.5 1700000000000000123"
        );
    }

    #[test]
    fn renders_string_field_with_quotes() {
        let point = DataPoint::new(
            "emf390_data",
            "mode",
            FieldValue::Text(r#"RF "Peak" \ avg"#.into()),
            ts(),
        );
        assert_eq!(
            point.to_line_protocol(),
            r#"emf390_data mode="RF \"Peak\" \\ avg" 1700000000000000123"#
        );
    }

    #[test]
    fn escapes_tags_and_keys() {
        let point = DataPoint::new("emf 390,data", "rf band", FieldValue::Float(-40.0), ts())
            .with_tag("mode", "RF Peak")
            .with_tag("device", "gq=emf,390");
        assert_eq!(
            point.to_line_protocol(),
            r"emf\ 390\,data,device=gq\=emf\,390,mode=RF\ Peak rf\ band=-40 1700000000000000123"
        );
    }

    #[test]
    fn line_breaks_never_split_the_record() {
        let tagged = DataPoint::new("emf390_data", "rf_band_max", FieldValue::Float(-38.2), ts())
            .with_tag("mode", "RF\r\nPeak");
        assert_eq!(
            tagged.to_line_protocol(),
            r"emf390_data,mode=RF\ \ Peak rf_band_max=-38.2 1700000000000000123"
        );

        let text = DataPoint::new("emf390_data", "version", FieldValue::Text("GQ\n1.04".into()), ts());
        let line = text.to_line_protocol();
        assert_eq!(line, r#"emf390_data version="GQ 1.04" 1700000000000000123"#);
        assert!(!line.contains(['\n', '\r']));
    }

    #[test]
    fn tags_merge_and_override() {
        let base: BTreeMap<String, String> =
            [("device".to_string(), "gq_emf390".to_string())].into();
        let point = DataPoint::new("m", "f", FieldValue::Float(1.0), ts())
            .with_tags(&base)
            .with_tag("device", "bench");
        assert_eq!(point.tags().len(), 1);
        assert_eq!(point.tags()["device"], "bench");
        assert_eq!(point.measurement(), "m");
        assert_eq!(point.field(), "f");
        assert_eq!(point.value(), &FieldValue::Float(1.0));
        assert_eq!(point.timestamp(), ts());
    }
}
