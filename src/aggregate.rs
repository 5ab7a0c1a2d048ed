//! ==============================================================================
//! aggregate.rs - hourly increment aggregator
//! ==============================================================================
//!
//! purpose:
//!     turns the raw cumulative counters the traps report into per-hour
//!     detection increments for the dashboard bar chart.
//!
//!     a trap reports a running total ("7 detections since boot"), so the
//!     interesting number for hour H is how much the counter GREW during H,
//!     not what it read. this module computes that growth from successive
//!     readings and folds it into 24 hour-of-day buckets.
//!
//! reset handling:
//!     when a trap loses power the counter starts over from zero, which would
//!     make the naive delta negative. a negative delta is treated as a new
//!     baseline: the raw count itself becomes the increment and subsequent
//!     deltas are taken from there. increments are therefore never negative.
//!
//! relationships:
//!     - input: deduplicated, (trap, timestamp)-ordered readings from db.rs
//!     - output: 24 HourlyPoint rows consumed by server.rs
//!
//! note:
//!     buckets are keyed by hour-of-day only. two readings at 14:xx on
//!     different days land in the same "14:00" bucket. the dashboard uses
//!     this for daily-pattern analysis, so it is kept that way on purpose.
//!
//! ==============================================================================

use std::collections::BTreeMap;

use crate::domain::{HourlyPoint, HourlyReading};

pub const HOURS_PER_DAY: usize = 24;

/// fold an ordered reading sequence into 24 hourly increment totals per trap.
///
/// each trap is processed independently:
/// - the first reading seen for a trap contributes its raw count (baseline)
/// - every later reading contributes current - previous
/// - a negative delta (counter reset) contributes the raw count instead
///
/// the caller guarantees readings are sorted by (trap, timestamp) and carry no
/// duplicate timestamps per trap; a pure pass over that snapshot is all this is.
pub fn hourly_increments(readings: &[HourlyReading]) -> BTreeMap<u8, [i64; HOURS_PER_DAY]> {
    let mut buckets: BTreeMap<u8, [i64; HOURS_PER_DAY]> = BTreeMap::new();
    let mut last_count: BTreeMap<u8, i64> = BTreeMap::new();

    for reading in readings {
        let increment = match last_count.get(&reading.trap) {
            None => reading.detection,
            Some(previous) => {
                let delta = reading.detection - previous;
                if delta < 0 {
                    // counter reset: re-baseline on the raw count
                    reading.detection
                } else {
                    delta
                }
            }
        };
        last_count.insert(reading.trap, reading.detection);

        let totals = buckets.entry(reading.trap).or_insert([0; HOURS_PER_DAY]);
        if let Some(slot) = totals.get_mut(reading.hour as usize) {
            *slot += increment;
        }
    }

    buckets
}

/// shape per-trap bucket totals into the 24 chart rows, hours ascending.
/// always 24 rows, zero-filled for hours (or traps) with no data.
pub fn hourly_report(readings: &[HourlyReading]) -> Vec<HourlyPoint> {
    let per_trap = hourly_increments(readings);

    (0..HOURS_PER_DAY)
        .map(|hour| HourlyPoint {
            name: format!("{hour:02}:00"),
            trap1: per_trap.get(&1).map_or(0, |totals| totals[hour]),
            trap2: per_trap.get(&2).map_or(0, |totals| totals[hour]),
        })
        .collect()
}

/// the zero-filled structure served when the database is unreachable
pub fn empty_hourly_report() -> Vec<HourlyPoint> {
    hourly_report(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(trap: u8, hour: u8, detection: i64, timestamp_ms: i64) -> HourlyReading {
        HourlyReading {
            trap,
            detection,
            timestamp_ms,
            hour,
            day: "2026-08-27".to_string(),
        }
    }

    #[test]
    fn empty_input_yields_24_zero_buckets() {
        let report = hourly_report(&[]);
        assert_eq!(report.len(), 24);
        for (hour, point) in report.iter().enumerate() {
            assert_eq!(point.name, format!("{hour:02}:00"));
            assert_eq!(point.trap1, 0);
            assert_eq!(point.trap2, 0);
        }
    }

    #[test]
    fn fallback_report_matches_empty_input() {
        assert_eq!(empty_hourly_report(), hourly_report(&[]));
    }

    #[test]
    fn first_reading_is_taken_as_baseline() {
        let report = hourly_report(&[reading(1, 5, 7, 1_000)]);
        assert_eq!(report[5].trap1, 7);
        let others: i64 = report
            .iter()
            .enumerate()
            .filter(|(h, _)| *h != 5)
            .map(|(_, p)| p.trap1 + p.trap2)
            .sum();
        assert_eq!(others, 0);
    }

    #[test]
    fn same_hour_readings_accumulate_baseline_plus_delta() {
        let report = hourly_report(&[reading(1, 3, 5, 1_000), reading(1, 3, 9, 2_000)]);
        // 5 (baseline) + 4 (9 - 5)
        assert_eq!(report[3].trap1, 9);
    }

    #[test]
    fn counter_reset_rebaselines_instead_of_going_negative() {
        let report = hourly_report(&[reading(1, 4, 10, 1_000), reading(1, 5, 3, 2_000)]);
        assert_eq!(report[4].trap1, 10);
        // not 3 - 10 = -7; the raw count becomes the new baseline
        assert_eq!(report[5].trap1, 3);
        assert!(report.iter().all(|p| p.trap1 >= 0 && p.trap2 >= 0));
    }

    #[test]
    fn deltas_continue_from_the_new_baseline_after_a_reset() {
        let report = hourly_report(&[
            reading(1, 8, 20, 1_000),
            reading(1, 9, 2, 2_000),
            reading(1, 9, 6, 3_000),
        ]);
        assert_eq!(report[8].trap1, 20);
        // 2 (re-baseline) + 4 (6 - 2)
        assert_eq!(report[9].trap1, 6);
    }

    #[test]
    fn traps_are_aggregated_independently() {
        let report = hourly_report(&[
            reading(1, 6, 4, 1_000),
            reading(2, 6, 100, 1_500),
            reading(1, 7, 5, 2_000),
            reading(2, 7, 90, 2_500), // trap 2 resets, trap 1 keeps counting
        ]);
        assert_eq!(report[6].trap1, 4);
        assert_eq!(report[7].trap1, 1);
        assert_eq!(report[6].trap2, 100);
        assert_eq!(report[7].trap2, 90);
    }

    #[test]
    fn same_hour_across_days_shares_one_bucket() {
        let mut day_two = reading(1, 14, 8, 90_000_000);
        day_two.day = "2026-08-28".to_string();
        let report = hourly_report(&[reading(1, 14, 6, 1_000), day_two]);
        // 6 (baseline) + 2 (8 - 6), dates ignored by design
        assert_eq!(report[14].trap1, 8);
    }

    #[test]
    fn unknown_trap_ids_still_aggregate_internally() {
        let buckets = hourly_increments(&[reading(9, 2, 5, 1_000)]);
        assert_eq!(buckets.get(&9).map(|t| t[2]), Some(5));
        // the two-trap chart shape just doesn't surface them
        let report = hourly_report(&[reading(9, 2, 5, 1_000)]);
        assert_eq!(report[2].trap1, 0);
        assert_eq!(report[2].trap2, 0);
    }

    #[test]
    fn out_of_range_hour_is_ignored() {
        let report = hourly_report(&[reading(1, 24, 5, 1_000)]);
        assert_eq!(report.len(), 24);
        assert!(report.iter().all(|p| p.trap1 == 0));
    }
}
