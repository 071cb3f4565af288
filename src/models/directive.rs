//! Counter directives handed to the storage sink

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::event::RouteRecord;

/// Which counter produced a directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterType {
    Pv,
    Uv,
}

impl CounterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterType::Pv => "pv",
            CounterType::Uv => "uv",
        }
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Width of the time buckets counters are grouped into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Day,
    Hour,
    Minute,
    Second,
}

impl TimeGranularity {
    pub fn seconds(&self) -> i64 {
        match self {
            TimeGranularity::Day => 86400,
            TimeGranularity::Hour => 3600,
            TimeGranularity::Minute => 60,
            TimeGranularity::Second => 1,
        }
    }

    /// Truncate a raw event timestamp to its bucket start (Unix seconds)
    ///
    /// Returns `None` when the timestamp is in none of the accepted formats.
    pub fn bucket(&self, raw: &str) -> Option<i64> {
        let unix = parse_timestamp(raw)?;
        let width = self.seconds();
        Some(unix.div_euclid(width) * width)
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc().timestamp())
}

/// ZINCRBY-style increment: add `amount` to the score of (route, time bucket)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementOp {
    pub route: String,
    pub time_bucket: Option<i64>,
    pub amount: u64,
}

/// A single counter increment for the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDirective {
    counter_type: CounterType,
    pub operation: IncrementOp,
    pub payload: RouteRecord,
}

impl CounterDirective {
    /// Build an increment-by-one directive for the record's route
    pub fn increment(
        counter_type: CounterType,
        payload: RouteRecord,
        granularity: TimeGranularity,
    ) -> Self {
        let operation = IncrementOp {
            route: payload.route.clone(),
            time_bucket: granularity.bucket(&payload.timestamp),
            amount: 1,
        };

        Self {
            counter_type,
            operation,
            payload,
        }
    }

    /// Counter type is fixed by the stage that created the directive
    pub fn counter_type(&self) -> CounterType {
        self.counter_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_formats() {
        let hour = TimeGranularity::Hour;
        // 2024-01-01T00:00:00Z
        let expected = Some(1_704_067_200);
        assert_eq!(hour.bucket("2024-01-01T00:30:15"), expected);
        assert_eq!(hour.bucket("2024-01-01 00:59:59"), expected);
        assert_eq!(hour.bucket("2024-01-01T00:10:00Z"), expected);
        assert_eq!(hour.bucket("1704068000"), expected);
    }

    #[test]
    fn test_bucket_granularity() {
        let raw = "2024-01-01T13:45:30";
        assert_eq!(TimeGranularity::Day.bucket(raw), Some(1_704_067_200));
        assert_eq!(TimeGranularity::Minute.bucket(raw), Some(1_704_116_700));
        assert_eq!(TimeGranularity::Second.bucket(raw), Some(1_704_116_730));
    }

    #[test]
    fn test_bucket_unparseable() {
        assert_eq!(TimeGranularity::Hour.bucket(""), None);
        assert_eq!(TimeGranularity::Hour.bucket("yesterday"), None);
    }

    #[test]
    fn test_increment_directive() {
        let record = RouteRecord {
            route: "home".to_string(),
            visitor_id: "abc".to_string(),
            url: "http://site.com/home".to_string(),
            timestamp: "2024-01-01T00:00:00".to_string(),
        };
        let directive = CounterDirective::increment(CounterType::Uv, record, TimeGranularity::Hour);

        assert_eq!(directive.counter_type(), CounterType::Uv);
        assert_eq!(directive.operation.route, "home");
        assert_eq!(directive.operation.time_bucket, Some(1_704_067_200));
        assert_eq!(directive.operation.amount, 1);
    }

    #[test]
    fn test_counter_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&CounterType::Pv).unwrap(), "\"pv\"");
    }
}
