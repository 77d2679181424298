use serde::{Deserialize, Serialize};

use crate::services::normalize::parse_datetime;

/// One scheduled shuttle departure.
///
/// Trips are immutable snapshots rebuilt wholesale on every sync; date and
/// time are canonicalized ("YYYY/MM/DD" / "HH:MM") by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub date: String,
    pub time: String,
    /// Total booked passenger count across the trip
    pub booked: u32,
}

impl Trip {
    /// Canonical "YYYY/MM/DD HH:MM" departure string.
    pub fn departure_label(&self) -> String {
        format!("{} {}", self.date, self.time)
    }

    /// Scheduled departure as epoch milliseconds (local time), 0 if malformed.
    pub fn departure_ts(&self) -> i64 {
        parse_datetime(&self.departure_label())
    }
}

/// Pick the trip whose scheduled departure is closest to `now_ms`.
///
/// The nearest future and the most recent past trip are compared by absolute
/// delta; ties favor the past trip.
pub fn find_nearest_trip(trips: &[Trip], now_ms: i64) -> Option<&Trip> {
    let mut best_future: Option<(&Trip, i64)> = None;
    let mut last_past: Option<(&Trip, i64)> = None;

    for trip in trips {
        let ts = trip.departure_ts();
        if ts >= now_ms {
            if best_future.map_or(true, |(_, best)| ts < best) {
                best_future = Some((trip, ts));
            }
        } else if last_past.map_or(true, |(_, best)| ts > best) {
            last_past = Some((trip, ts));
        }
    }

    match (best_future, last_past) {
        (Some((future, future_ts)), Some((past, past_ts))) => {
            let future_delta = future_ts - now_ms;
            let past_delta = now_ms - past_ts;
            if past_delta <= future_delta {
                Some(past)
            } else {
                Some(future)
            }
        }
        (Some((future, _)), None) => Some(future),
        (None, Some((past, _))) => Some(past),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn trip(id: &str, date: &str, time: &str) -> Trip {
        Trip {
            id: id.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            booked: 0,
        }
    }

    fn local_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(find_nearest_trip(&[], 0), None);
    }

    #[test]
    fn test_prefers_closest_future() {
        let trips = vec![
            trip("a", "2025/06/01", "10:00"),
            trip("b", "2025/06/01", "12:00"),
        ];
        let now = local_ms(2025, 6, 1, 9, 0);
        assert_eq!(find_nearest_trip(&trips, now).unwrap().id, "a");
    }

    #[test]
    fn test_recent_past_beats_distant_future() {
        let trips = vec![
            trip("past", "2025/06/01", "09:50"),
            trip("future", "2025/06/01", "12:00"),
        ];
        let now = local_ms(2025, 6, 1, 10, 0);
        assert_eq!(find_nearest_trip(&trips, now).unwrap().id, "past");
    }

    #[test]
    fn test_tie_favors_past() {
        let trips = vec![
            trip("past", "2025/06/01", "09:00"),
            trip("future", "2025/06/01", "11:00"),
        ];
        let now = local_ms(2025, 6, 1, 10, 0);
        assert_eq!(find_nearest_trip(&trips, now).unwrap().id, "past");
    }

    #[test]
    fn test_only_past_trips() {
        let trips = vec![trip("a", "2025/06/01", "08:00")];
        let now = local_ms(2025, 6, 1, 20, 0);
        assert_eq!(find_nearest_trip(&trips, now).unwrap().id, "a");
    }
}
