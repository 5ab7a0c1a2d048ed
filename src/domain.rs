use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// one detection reading as reported by a trap device
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    /// trap identifier (small integer, e.g. 1 or 2)
    pub trap: u8,

    /// cumulative detection counter as reported by the device.
    /// monotonic-ish: it only goes backwards when the device restarts.
    pub detection: i64,

    /// reported position (the designer overlays traps on a floor plan)
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,

    /// reading timestamp in epoch milliseconds
    pub timestamp_ms: i64,
}

/// latest reading per trap, shared between the ingest path and the api.
/// keyed by trap id instead of the old fixed two-slot array.
#[derive(Clone, Default, Serialize)]
pub struct LiveState {
    pub traps: BTreeMap<u8, Detection>,
    /// unix timestamp (ms) of last successful update
    pub last_update: i64,
}

/// deduplicated tuple the persistence layer hands to the hourly aggregator,
/// ordered by (trap, timestamp_ms)
#[derive(Clone, Debug, PartialEq)]
pub struct HourlyReading {
    pub trap: u8,
    pub detection: i64,
    pub timestamp_ms: i64,
    /// local hour of day, 0-23, derived from timestamp_ms at insert time
    pub hour: u8,
    /// local calendar day, "YYYY-MM-DD"
    pub day: String,
}

/// one row of the per-hour report, shaped for the dashboard chart
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HourlyPoint {
    /// "HH:00"
    pub name: String,
    #[serde(rename = "Trap 1")]
    pub trap1: i64,
    #[serde(rename = "Trap 2")]
    pub trap2: i64,
}

/// one row of the per-day report
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DailyPoint {
    /// "YYYY-MM-DD"
    pub name: String,
    #[serde(rename = "Trap 1")]
    pub trap1: i64,
    #[serde(rename = "Trap 2")]
    pub trap2: i64,
}

/// derive the local hour-of-day and calendar day for a reading timestamp
pub fn local_hour_and_day(timestamp_ms: i64) -> Result<(u8, String)> {
    let dt = Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .with_context(|| format!("timestamp {timestamp_ms} is out of range"))?;
    Ok((dt.hour() as u8, dt.format("%Y-%m-%d").to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_rows_use_dashboard_keys() {
        let point = HourlyPoint {
            name: "07:00".to_string(),
            trap1: 3,
            trap2: 0,
        };
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["name"], "07:00");
        assert_eq!(json["Trap 1"], 3);
        assert_eq!(json["Trap 2"], 0);
    }

    #[test]
    fn hour_and_day_are_stable_for_same_timestamp() {
        let ts = 1_700_000_000_000;
        let a = local_hour_and_day(ts).unwrap();
        let b = local_hour_and_day(ts).unwrap();
        assert_eq!(a, b);
        assert!(a.0 < 24);
        assert_eq!(a.1.len(), 10);
    }

    #[test]
    fn detection_payload_position_defaults_to_origin() {
        let d: Detection =
            serde_json::from_str(r#"{"trap":1,"detection":5,"timestamp_ms":1700000000000}"#)
                .unwrap();
        assert_eq!(d.x, 0.0);
        assert_eq!(d.y, 0.0);
    }
}
