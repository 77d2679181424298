use serde::{Deserialize, Serialize};

/// Substring markers used by the backend's free-text status fields
pub const STATUS_BOARDED_MARKER: &str = "已上車";
pub const STATUS_NO_SHOW_MARKER: &str = "No-show";

/// Ride status derived from the backend's free-text status field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Booked,
    Boarded,
    Cancelled,
    NoShow,
}

impl RideStatus {
    /// Derive a status from the backend's free text.
    ///
    /// The boarded marker takes precedence over the no-show marker; anything
    /// else (including empty text) is a plain booking.
    pub fn from_remote(raw: &str) -> Self {
        if raw.contains(STATUS_BOARDED_MARKER) {
            Self::Boarded
        } else if raw.contains(STATUS_NO_SHOW_MARKER) {
            Self::NoShow
        } else {
            Self::Booked
        }
    }
}

/// Travel direction of a booking leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "去程")]
    Outbound,
    #[serde(rename = "回程")]
    Return,
    #[serde(other)]
    Unknown,
}

impl Direction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "去程" => Self::Outbound,
            "回程" => Self::Return,
            _ => Self::Unknown,
        }
    }
}

/// Whether the passenger boards or alights at a leg's station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardingAction {
    #[serde(rename = "上車")]
    Board,
    #[serde(rename = "下車")]
    Alight,
    #[serde(other)]
    Unknown,
}

impl BoardingAction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "上車" => Self::Board,
            "下車" => Self::Alight,
            _ => Self::Unknown,
        }
    }
}

/// A booking as seen by the driver.
///
/// The same struct backs both the trip-scoped view (one entry per leg, with
/// `trip_id`, `station` and `updown` populated) and the global roster view
/// (no trip association, waypoint markers populated instead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    /// Booking code, unique per booking but not per leg
    pub booking_code: String,
    /// Trip this record belongs to; the global view carries none
    pub trip_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub room: String,
    /// Party size, always at least 1
    pub pax: u32,
    /// Free-text station label of this leg (empty in the global view)
    pub station: String,
    pub direction: Direction,
    pub updown: BoardingAction,
    pub status: RideStatus,
    /// Waypoint markers, verbatim backend text ("上", "下車", ...)
    pub hotel_go: String,
    pub mrt: String,
    pub train: String,
    pub mall: String,
    pub hotel_back: String,
    /// Canonical "YYYY/MM/DD HH:MM" departure of the booking's main trip
    pub main_datetime: String,
}

impl Passenger {
    /// True once the passenger has been checked in, locally or remotely.
    pub fn is_boarded(&self) -> bool {
        self.status == RideStatus::Boarded
    }
}
