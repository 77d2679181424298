//! Canonicalization of the backend's heterogeneous date, time and station
//! strings.
//!
//! Every function here is total: malformed input falls back to a defined
//! default (usually the input itself) instead of failing the caller.

use crate::models::{BoardingAction, Direction, Passenger};
use chrono::{Local, NaiveDate, NaiveTime, TimeZone};

/// Canonical station labels, in boarding-flow order.
pub const STATION_HOTEL_OUTBOUND: &str = "1. 福泰大飯店 (去)";
pub const STATION_MRT: &str = "2. 南港捷運站";
pub const STATION_TRAIN: &str = "3. 南港火車站";
pub const STATION_MALL: &str = "4. LaLaport 購物中心";
pub const STATION_HOTEL_RETURN: &str = "5. 福泰大飯店 (回)";
/// Fallback label for legs without any recognizable station text.
pub const STATION_OTHER: &str = "其他站點";

/// The five waypoints in visiting order; anything else sorts last.
pub const STATION_ORDER: [&str; 5] = [
    STATION_HOTEL_OUTBOUND,
    STATION_MRT,
    STATION_TRAIN,
    STATION_MALL,
    STATION_HOTEL_RETURN,
];

/// Sentinel sort key for labels outside the fixed waypoint order.
const STATION_SORT_LAST: usize = 999;

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Zero-pad the hour of an "H:MM" or "HH:MM" time string.
///
/// Any other shape is returned unchanged.
pub fn normalize_time(raw: &str) -> String {
    if let Some((hours, minutes)) = raw.split_once(':') {
        if hours.len() <= 2 && is_digits(hours) && minutes.len() == 2 && is_digits(minutes) {
            return format!("{:0>2}:{}", hours, minutes);
        }
    }
    raw.to_string()
}

/// Normalize the time segment of a "<date> <time>" string.
///
/// Strings that do not split into exactly two space-separated parts are
/// returned unchanged.
pub fn normalize_datetime(raw: &str) -> String {
    let parts: Vec<&str> = raw.trim().split(' ').collect();
    if parts.len() == 2 {
        format!("{} {}", parts[0], normalize_time(parts[1]))
    } else {
        raw.to_string()
    }
}

/// Parse a loosely formatted local datetime into epoch milliseconds.
///
/// Accepts "-" or "/" date separators and an optional "HH:MM" time; missing
/// month/day default to 01 and missing time to 00:00. Returns 0 for empty or
/// unparseable input.
pub fn parse_datetime(raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }

    let (date_part, time_part) = match raw.split_once(' ') {
        Some((d, t)) => (d, Some(t)),
        None => (raw, None),
    };

    let date_part = date_part.replace('-', "/");
    let mut date_fields = date_part.split('/');
    let year = date_fields.next().unwrap_or("");
    let month = date_fields.next().filter(|s| !s.is_empty()).unwrap_or("01");
    let day = date_fields.next().filter(|s| !s.is_empty()).unwrap_or("01");

    let (hour, minute) = match time_part {
        Some(t) => {
            let mut fields = t.split(':');
            let h = fields.next().filter(|s| !s.is_empty()).unwrap_or("00");
            let m = fields.next().filter(|s| !s.is_empty()).unwrap_or("00");
            (h, m)
        }
        None => ("00", "00"),
    };

    let parsed = (|| {
        let date = NaiveDate::from_ymd_opt(
            year.trim().parse().ok()?,
            month.trim().parse().ok()?,
            day.trim().parse().ok()?,
        )?;
        let time = NaiveTime::from_hms_opt(hour.trim().parse().ok()?, minute.trim().parse().ok()?, 0)?;
        Local
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.timestamp_millis())
    })();

    parsed.unwrap_or(0)
}

/// Display normalization of a "<date> <time>" string: zero-padded date
/// fields and time. Malformed shapes are returned unchanged.
pub fn format_datetime_label(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let mut parts = raw.split(' ');
    let date_part = match parts.next() {
        Some(d) if !d.is_empty() => d,
        _ => return raw.to_string(),
    };
    let date_fields: Vec<String> = date_part
        .replace('-', "/")
        .split('/')
        .map(|s| s.to_string())
        .collect();
    if date_fields.len() != 3 {
        return raw.to_string();
    }
    let time = match parts.next() {
        Some(t) if !t.is_empty() => {
            let mut fields = t.split(':');
            let h = fields.next().filter(|s| !s.is_empty()).unwrap_or("00");
            let m = fields.next().filter(|s| !s.is_empty()).unwrap_or("00");
            format!(" {:0>2}:{:0>2}", h, m)
        }
        _ => String::new(),
    };
    format!(
        "{}/{:0>2}/{:0>2}{}",
        date_fields[0], date_fields[1], date_fields[2], time
    )
}

/// Loose station classification used when synthesizing a global-roster entry
/// from a single leg record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationKind {
    Hotel,
    Metro,
    Train,
    Mall,
}

/// Classify free-text station text against the loose waypoint substrings.
pub fn classify_station(raw: &str) -> Option<StationKind> {
    let s = raw.trim();
    if s.contains("福泰") || s.contains("Forte") {
        Some(StationKind::Hotel)
    } else if s.contains("捷運") || s.contains("Exhibition") {
        Some(StationKind::Metro)
    } else if s.contains("火車") || s.contains("Train") {
        Some(StationKind::Train)
    } else if s.contains("LaLaport") || s.contains("Lalaport") {
        Some(StationKind::Mall)
    } else {
        None
    }
}

/// Resolve a leg's free-text station into its canonical label.
///
/// The hotel is labeled outbound by default and flips to the return label
/// only for a return-leg alighting. Unrecognized text passes through
/// verbatim; empty text resolves to the generic label.
pub fn canonical_station(p: &Passenger) -> String {
    let raw = p.station.trim();

    let has = |needle: &str| raw.contains(needle);

    if has("福泰大飯店") || has("Forte Hotel") {
        if p.direction == Direction::Return && p.updown == BoardingAction::Alight {
            return STATION_HOTEL_RETURN.to_string();
        }
        return STATION_HOTEL_OUTBOUND.to_string();
    }
    if has("南港展覽館捷運站")
        || has("Nangang Exhibition Center")
        || has("南港捷運站")
        || has("捷運南港展覽館站")
    {
        return STATION_MRT.to_string();
    }
    if has("南港火車站") || has("Nangang Train Station") {
        return STATION_TRAIN.to_string();
    }
    if has("LaLaport") {
        return STATION_MALL.to_string();
    }

    if raw.is_empty() {
        STATION_OTHER.to_string()
    } else {
        raw.to_string()
    }
}

/// Fixed sort key of a canonical station label; unmatched labels sort last.
pub fn station_sort_key(label: &str) -> usize {
    STATION_ORDER
        .iter()
        .position(|s| *s == label)
        .unwrap_or(STATION_SORT_LAST)
}
