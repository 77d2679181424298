mod passenger;
mod trip;

pub use passenger::{BoardingAction, Direction, Passenger, RideStatus};
pub use trip::{find_nearest_trip, Trip};
