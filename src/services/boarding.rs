//! QR boarding: local validation gates, optimistic check-in, and delayed
//! flushing of pending confirmations to the backend.
//!
//! Scan feedback must stay sub-second, so a scan is verified entirely
//! against the in-memory dataset and confirmed to the server later in one
//! batched pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::BoardingConfig;
use crate::models::{find_nearest_trip, Passenger, RideStatus, Trip};
use crate::providers::dispatch::DispatchApi;
use crate::services::location::LocationEngine;
use crate::services::normalize::parse_datetime;
use crate::sync::SharedDataStore;

/// Expected first segment of a boarding QR payload.
pub const QR_PREFIX: &str = "FT";

/// Why a scan was not checked in. Every variant is a business-rule or
/// format rejection, distinct from a plumbing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanRejection {
    #[error("malformed QR payload")]
    BadFormat,
    #[error("no trip to check against")]
    NoTrips,
    #[error("booking not in the current dataset")]
    UnknownBooking,
    #[error("passenger already boarded")]
    AlreadyBoarded,
    #[error("booking has no resolvable trip datetime")]
    MissingDatetime,
    #[error("booking does not belong to the nearest trip")]
    NotNearestTrip,
    #[error("trip departed more than {0} minutes ago")]
    Overdue(i64),
    #[error("trip departs more than {0} minutes from now")]
    TooEarly(i64),
}

/// A locally verified scan.
#[derive(Debug, Clone)]
pub struct ScanAccepted {
    pub booking_code: String,
    pub passenger: Passenger,
}

/// Extract the booking code from a `"FT:<booking>:<...>"` payload.
pub fn parse_scan_payload(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.len() >= 3 && parts[0] == QR_PREFIX && !parts[1].is_empty() {
        Some(parts[1].to_string())
    } else {
        None
    }
}

#[derive(Default)]
struct PendingState {
    items: HashSet<String>,
    flush_armed: bool,
}

/// Buffers scan-confirmed boardings and flushes them to the backend on a
/// single delayed timer.
pub struct BoardingQueue {
    api: Arc<dyn DispatchApi>,
    store: SharedDataStore,
    location: Option<Arc<LocationEngine>>,
    current_trip: Arc<RwLock<Option<Trip>>>,
    config: BoardingConfig,
    pending: Arc<Mutex<PendingState>>,
}

impl BoardingQueue {
    pub fn new(
        api: Arc<dyn DispatchApi>,
        store: SharedDataStore,
        location: Option<Arc<LocationEngine>>,
        current_trip: Arc<RwLock<Option<Trip>>>,
        config: BoardingConfig,
    ) -> Self {
        Self {
            api,
            store,
            location,
            current_trip,
            config,
            pending: Arc::new(Mutex::new(PendingState::default())),
        }
    }

    /// Verify a scan against local data and check the passenger in
    /// optimistically.
    ///
    /// Each gate short-circuits with its own rejection reason; a rejected
    /// scan leaves every collection untouched. An accepted scan marks the
    /// booking boarded in the store, enqueues the raw payload and arms the
    /// flush timer if it is not already armed.
    pub async fn record_scan(&self, raw: &str, now_ms: i64) -> Result<ScanAccepted, ScanRejection> {
        let booking_code = parse_scan_payload(raw).ok_or(ScanRejection::BadFormat)?;

        let (passenger, departure_ts) = {
            let store = self.store.read().await;

            let nearest = find_nearest_trip(store.trips(), now_ms)
                .ok_or(ScanRejection::NoTrips)?
                .clone();

            let passenger = store
                .find_booking(&booking_code)
                .ok_or(ScanRejection::UnknownBooking)?;

            if passenger.is_boarded() {
                return Err(ScanRejection::AlreadyBoarded);
            }
            if passenger.main_datetime.is_empty() {
                return Err(ScanRejection::MissingDatetime);
            }
            if passenger.main_datetime != nearest.departure_label() {
                return Err(ScanRejection::NotNearestTrip);
            }

            let departure_ts = parse_datetime(&passenger.main_datetime);
            (passenger, departure_ts)
        };

        let diff_sec = (now_ms - departure_ts) / 1000;
        if diff_sec > self.config.overdue_minutes * 60 {
            return Err(ScanRejection::Overdue(self.config.overdue_minutes));
        }
        if diff_sec < -self.config.early_minutes * 60 {
            return Err(ScanRejection::TooEarly(self.config.early_minutes));
        }

        // Optimistic: boarded everywhere immediately, server catches up on
        // the next flush
        self.store
            .write()
            .await
            .set_status(&booking_code, RideStatus::Boarded);

        {
            let mut pending = self.pending.lock().await;
            pending.items.insert(raw.trim().to_string());
            if !pending.flush_armed {
                pending.flush_armed = true;
                self.spawn_flush();
            }
        }

        info!(booking = %booking_code, "scan accepted");
        Ok(ScanAccepted {
            booking_code,
            passenger,
        })
    }

    /// Number of scans waiting for the next flush.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.items.len()
    }

    fn spawn_flush(&self) {
        let api = Arc::clone(&self.api);
        let pending = Arc::clone(&self.pending);
        let location = self.location.clone();
        let current_trip = Arc::clone(&self.current_trip);
        let delay = Duration::from_millis(self.config.flush_delay_ms);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let items: Vec<String> = {
                let mut state = pending.lock().await;
                state.flush_armed = false;
                state.items.drain().collect()
            };
            if items.is_empty() {
                return;
            }

            // One forced GPS fix per flush batch
            if let Some(engine) = &location {
                if engine.is_enabled() {
                    let trip_id = current_trip.read().await.as_ref().map(|t| t.id.clone());
                    let send = Arc::clone(engine).send_location(trip_id.as_deref(), true);
                    if send.await.is_none() {
                        warn!("location send failed during boarding flush");
                    }
                }
            }

            debug!(count = items.len(), "flushing pending boardings");
            for qrcode in items {
                // Fire and forget: the optimistic local state is the source
                // of truth until the next full sync
                if let Err(e) = api.confirm_boarding(&qrcode).await {
                    debug!(error = %e, "boarding confirmation failed, not retried");
                }
            }
        });
    }
}
