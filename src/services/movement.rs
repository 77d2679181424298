//! Sliding-window movement detection backing the tracking auto-shutdown.

use crate::providers::geolocation::GeoFix;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Decides whether tracking should auto-terminate because the vehicle has
/// not moved.
///
/// This measures net displacement between the oldest and newest sample in
/// the window, not path length: a vehicle that drives out and returns
/// within the window reads as idle. Accepted approximation.
#[derive(Debug, Default)]
pub struct MovementDetector {
    samples: Vec<GeoFix>,
}

impl MovementDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fix and report whether the window shows the vehicle idle.
    ///
    /// Samples older than `timestamp - window_ms` are dropped; fewer than
    /// two retained samples answer false.
    pub fn should_shutdown(
        &mut self,
        lat: f64,
        lng: f64,
        timestamp: i64,
        window_ms: i64,
        min_distance_m: f64,
    ) -> bool {
        self.samples.push(GeoFix {
            lat,
            lng,
            timestamp,
        });

        let cutoff = timestamp - window_ms;
        self.samples.retain(|s| s.timestamp >= cutoff);

        if self.samples.len() < 2 {
            return false;
        }

        let first = self.samples[0];
        let last = self.samples[self.samples.len() - 1];
        haversine(first.lat, first.lng, last.lat, last.lng) < min_distance_m
    }

    /// Drop all history, used when tracking restarts.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_MS: i64 = 30 * 60 * 1000;

    #[test]
    fn test_haversine_known_distance() {
        // Nangang Exhibition Center to Nangang Station, roughly 1.5 km
        let d = haversine(25.0553, 121.6171, 25.0532, 121.6065);
        assert!(d > 1000.0 && d < 1300.0, "unexpected distance {}", d);

        assert!(haversine(25.0, 121.0, 25.0, 121.0) < f64::EPSILON);
    }

    #[test]
    fn test_single_sample_is_not_enough() {
        let mut detector = MovementDetector::new();
        assert!(!detector.should_shutdown(25.0, 121.0, 1000, WINDOW_MS, 500.0));
    }

    #[test]
    fn test_idle_vehicle_triggers_shutdown() {
        let mut detector = MovementDetector::new();
        // ~100 m apart, well under the 500 m threshold
        assert!(!detector.should_shutdown(25.0000, 121.0000, 0, WINDOW_MS, 500.0));
        assert!(detector.should_shutdown(25.0009, 121.0000, 60_000, WINDOW_MS, 500.0));
    }

    #[test]
    fn test_moving_vehicle_keeps_tracking() {
        let mut detector = MovementDetector::new();
        assert!(!detector.should_shutdown(25.00, 121.00, 0, WINDOW_MS, 500.0));
        // ~1.1 km north
        assert!(!detector.should_shutdown(25.01, 121.00, 60_000, WINDOW_MS, 500.0));
    }

    #[test]
    fn test_window_pruning_forgets_old_samples() {
        let mut detector = MovementDetector::new();
        assert!(!detector.should_shutdown(25.0000, 121.0000, 0, WINDOW_MS, 500.0));

        // The first sample ages out; only one sample remains in the window
        assert!(!detector.should_shutdown(
            25.0001,
            121.0000,
            WINDOW_MS + 1,
            WINDOW_MS,
            500.0
        ));
    }

    #[test]
    fn test_out_and_back_reads_as_idle() {
        // Documented approximation: net displacement, not path length
        let mut detector = MovementDetector::new();
        assert!(!detector.should_shutdown(25.00, 121.00, 0, WINDOW_MS, 500.0));
        assert!(!detector.should_shutdown(25.02, 121.00, 60_000, WINDOW_MS, 500.0));
        assert!(detector.should_shutdown(25.0001, 121.00, 120_000, WINDOW_MS, 500.0));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut detector = MovementDetector::new();
        assert!(!detector.should_shutdown(25.0, 121.0, 0, WINDOW_MS, 500.0));
        detector.reset();
        assert!(!detector.should_shutdown(25.0, 121.0, 60_000, WINDOW_MS, 500.0));
    }
}
