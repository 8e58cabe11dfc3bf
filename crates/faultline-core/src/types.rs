//! Date/time types shared by the storage layer and the HTTP API

use chrono::{DateTime as ChronoDateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;
use utoipa::ToSchema;

/// Canonical UTC timestamp used for event and group columns.
///
/// Serializes as RFC 3339 with a `Z` suffix. In OpenAPI schemas annotate fields with
/// `#[schema(value_type = String, format = DateTime)]`.
pub type UtcDateTime = ChronoDateTime<Utc>;

/// Query-string friendly timestamp.
///
/// Accepts `2024-01-15T14:30:00` (assumed UTC), `2024-01-15T14:30:00Z` and
/// `2024-01-15T14:30:00+02:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
#[schema(value_type = String, example = "2024-01-15T14:30:00Z")]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        parse_timestamp_str(&s).map(DateTime).ok_or_else(|| {
            serde::de::Error::custom("Invalid datetime format. Use ISO 8601: YYYY-MM-DDTHH:MM:SSZ")
        })
    }
}

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl Deref for DateTime {
    type Target = ChronoDateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(dt: ChronoDateTime<Utc>) -> Self {
        DateTime(dt)
    }
}

impl From<DateTime> for ChronoDateTime<Utc> {
    fn from(dt: DateTime) -> Self {
        dt.0
    }
}

/// Parses an RFC 3339 or naive ISO 8601 string into UTC
pub fn parse_timestamp_str(s: &str) -> Option<UtcDateTime> {
    if let Ok(dt) = s.parse::<ChronoDateTime<Utc>>() {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ChronoDateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

/// Converts fractional unix seconds (the SDK wire form) into UTC
pub fn from_unix_seconds(seconds: f64) -> Option<UtcDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole, nanos.min(999_999_999)).single()
}

/// Accepts either wire form of an event timestamp
pub fn timestamp_from_json(value: &serde_json::Value) -> Option<UtcDateTime> {
    match value {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => n.as_f64().and_then(from_unix_seconds),
        _ => None,
    }
}

/// Half-open `[from, to)` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: UtcDateTime,
    pub to: UtcDateTime,
}

impl TimeRange {
    pub fn new(from: UtcDateTime, to: UtcDateTime) -> Self {
        Self { from, to }
    }

    /// The window of length `span` that ends at `end`
    pub fn ending_at(end: UtcDateTime, span: Duration) -> Self {
        Self {
            from: end - span,
            to: end,
        }
    }

    pub fn contains(&self, at: UtcDateTime) -> bool {
        at >= self.from && at < self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_datetime_deserialize_naive_and_offset() {
        let dt: DateTime = serde_json::from_str(r#""2024-01-15T14:30:00""#).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.hour(), 14);

        let dt: DateTime = serde_json::from_str(r#""2024-01-15T16:30:00+02:00""#).unwrap();
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn test_datetime_deserialize_invalid() {
        let result: Result<DateTime, _> = serde_json::from_str(r#""yesterday""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_datetime_serialize() {
        let dt = DateTime(parse_timestamp_str("2024-01-15T14:30:00Z").unwrap());
        assert_eq!(
            serde_json::to_string(&dt).unwrap(),
            r#""2024-01-15T14:30:00+00:00""#
        );
    }

    #[test]
    fn test_timestamp_from_json_accepts_both_forms() {
        let from_float = timestamp_from_json(&serde_json::json!(1687962600.5)).unwrap();
        assert_eq!(from_float.timestamp(), 1687962600);
        assert_eq!(from_float.timestamp_subsec_millis(), 500);

        let from_str = timestamp_from_json(&serde_json::json!("2023-06-28T14:30:00.000Z")).unwrap();
        assert_eq!(from_str.timestamp(), 1687962600);

        assert!(timestamp_from_json(&serde_json::json!(true)).is_none());
    }

    #[test]
    fn test_time_range_contains() {
        let end = parse_timestamp_str("2024-01-15T14:00:00Z").unwrap();
        let range = TimeRange::ending_at(end, Duration::hours(1));
        assert!(range.contains(end - Duration::minutes(30)));
        assert!(!range.contains(end));
        assert!(!range.contains(end - Duration::hours(2)));
    }
}
