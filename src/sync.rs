//! Reconciliation of raw dispatch payloads into consistent in-memory views.
//!
//! This module handles:
//! - Merging the three server collections (trips, per-leg records, global
//!   roster) into one coherent snapshot with a single derived status per
//!   booking
//! - In-flight deduplication of concurrent fetch-and-reconcile calls
//! - The optimistic status overlay that bridges local edits until the next
//!   full sync replaces the snapshot

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::models::{BoardingAction, Direction, Passenger, RideStatus, Trip};
use crate::providers::dispatch::{DispatchApi, DriverDataPayload, RawTripPassenger};
use crate::services::normalize::{classify_station, normalize_datetime, normalize_time, StationKind};

/// One reconciled snapshot of the driver dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledData {
    pub trips: Vec<Trip>,
    /// One entry per trip-scoped leg record; a booking riding multiple legs
    /// of the same trip produces multiple entries
    pub trip_passengers: Vec<Passenger>,
    /// Global roster: every booking appearing anywhere in the payload shows
    /// up here at least once
    pub all_passengers: Vec<Passenger>,
}

impl ReconciledData {
    pub fn is_empty(&self) -> bool {
        self.trips.is_empty() && self.trip_passengers.is_empty() && self.all_passengers.is_empty()
    }
}

/// Merge a raw payload into the three canonical collections.
///
/// Pure and deterministic: identical payloads reconcile to identical
/// snapshots. A booking's datetime is preferred from its global record and
/// otherwise derived from the first leg sharing the booking code, in payload
/// order.
pub fn reconcile(payload: &DriverDataPayload) -> ReconciledData {
    // Trip lookup: id -> (canonical date, canonical time)
    let mut trips = Vec::with_capacity(payload.trips.len());
    let mut trip_map: HashMap<&str, (String, String)> = HashMap::new();
    for t in &payload.trips {
        let date = t.date.replace('-', "/");
        let time = normalize_time(&t.time);
        trips.push(Trip {
            id: t.trip_id.clone(),
            date: date.clone(),
            time: time.clone(),
            booked: t.total_pax,
        });
        trip_map.insert(t.trip_id.as_str(), (date, time));
    }

    let derived_datetime = |trip_id: &str| -> String {
        trip_map
            .get(trip_id)
            .map(|(date, time)| format!("{} {}", date, time))
            .unwrap_or_default()
    };

    // Global-detail lookup: booking code -> record
    let detail_map: HashMap<&str, &crate::providers::dispatch::RawPassengerDetail> = payload
        .passenger_list
        .iter()
        .map(|p| (p.booking_id.as_str(), p))
        .collect();

    // Trip-scoped view: one entry per leg, enriched from the global detail
    let mut trip_passengers = Vec::with_capacity(payload.trip_passengers.len());
    for p in &payload.trip_passengers {
        let details = detail_map.get(p.booking_id.as_str());
        let main_datetime = match details {
            Some(d) if !d.main_datetime.is_empty() => {
                normalize_datetime(&d.main_datetime.replace('-', "/"))
            }
            _ => derived_datetime(&p.trip_id),
        };

        trip_passengers.push(Passenger {
            booking_code: p.booking_id.clone(),
            trip_id: Some(p.trip_id.clone()),
            name: p.name.clone(),
            phone: p.phone.clone(),
            room: p.room.clone(),
            pax: p.pax,
            station: p.station.clone(),
            direction: Direction::parse(&p.direction),
            updown: BoardingAction::parse(&p.updown),
            status: RideStatus::from_remote(&p.status),
            hotel_go: details.map(|d| d.hotel_go.clone()).unwrap_or_default(),
            mrt: details.map(|d| d.mrt.clone()).unwrap_or_default(),
            train: details.map(|d| d.train.clone()).unwrap_or_default(),
            mall: details.map(|d| d.mall.clone()).unwrap_or_default(),
            hotel_back: details.map(|d| d.hotel_back.clone()).unwrap_or_default(),
            main_datetime,
        });
    }

    // Global view, pass 1: every global-detail record, datetime derived from
    // the first leg with the same booking code when missing
    let mut processed: HashSet<&str> = HashSet::new();
    let mut all_passengers = Vec::with_capacity(payload.passenger_list.len());
    for p in &payload.passenger_list {
        processed.insert(p.booking_id.as_str());

        let main_datetime = if p.main_datetime.is_empty() {
            payload
                .trip_passengers
                .iter()
                .find(|tp| tp.booking_id == p.booking_id)
                .map(|tp| derived_datetime(&tp.trip_id))
                .unwrap_or_default()
        } else {
            normalize_datetime(&p.main_datetime.replace('-', "/"))
        };

        all_passengers.push(Passenger {
            booking_code: p.booking_id.clone(),
            trip_id: None,
            name: p.name.clone(),
            phone: p.phone.clone(),
            room: p.room.clone(),
            pax: p.pax,
            station: String::new(),
            direction: Direction::parse(&p.direction),
            updown: BoardingAction::Unknown,
            status: RideStatus::from_remote(&p.ride_status),
            hotel_go: p.hotel_go.clone(),
            mrt: p.mrt.clone(),
            train: p.train.clone(),
            mall: p.mall.clone(),
            hotel_back: p.hotel_back.clone(),
            main_datetime,
        });
    }

    // Global view, pass 2: bookings that only exist at the leg level get a
    // synthesized roster entry with markers inferred from their single leg
    for p in &payload.trip_passengers {
        if processed.contains(p.booking_id.as_str()) {
            continue;
        }
        processed.insert(p.booking_id.as_str());

        let markers = infer_markers(p);
        all_passengers.push(Passenger {
            booking_code: p.booking_id.clone(),
            trip_id: Some(p.trip_id.clone()),
            name: p.name.clone(),
            phone: p.phone.clone(),
            room: p.room.clone(),
            pax: p.pax,
            station: String::new(),
            direction: Direction::parse(&p.direction),
            updown: BoardingAction::Unknown,
            status: RideStatus::from_remote(&p.status),
            hotel_go: markers.hotel_go,
            mrt: markers.mrt,
            train: markers.train,
            mall: markers.mall,
            hotel_back: markers.hotel_back,
            main_datetime: derived_datetime(&p.trip_id),
        });
    }

    ReconciledData {
        trips,
        trip_passengers,
        all_passengers,
    }
}

#[derive(Default)]
struct InferredMarkers {
    hotel_go: String,
    mrt: String,
    train: String,
    mall: String,
    hotel_back: String,
}

/// Heuristic waypoint markers from a single leg's station text.
///
/// Hotel text is assigned to the outbound or return marker by direction,
/// falling back on the up/down action when the direction is absent; the
/// other waypoints map to their single marker directly.
fn infer_markers(p: &RawTripPassenger) -> InferredMarkers {
    let mut markers = InferredMarkers::default();
    let updown = p.updown.clone();

    match classify_station(&p.station) {
        Some(StationKind::Hotel) => match Direction::parse(&p.direction) {
            Direction::Outbound => markers.hotel_go = updown,
            Direction::Return => markers.hotel_back = updown,
            Direction::Unknown => {
                if BoardingAction::parse(&p.updown) == BoardingAction::Board {
                    markers.hotel_go = updown;
                } else {
                    markers.hotel_back = updown;
                }
            }
        },
        Some(StationKind::Metro) => markers.mrt = updown,
        Some(StationKind::Train) => markers.train = updown,
        Some(StationKind::Mall) => markers.mall = updown,
        None => {}
    }
    markers
}

/// In-memory view of the last good snapshot plus the optimistic overlay.
///
/// The snapshot is replaced wholesale on every successful sync, which also
/// clears the overlay: the sync always wins over unflushed local edits.
#[derive(Debug, Default)]
pub struct DataStore {
    snapshot: ReconciledData,
    status_overrides: HashMap<String, RideStatus>,
}

impl DataStore {
    pub fn apply_snapshot(&mut self, data: ReconciledData) {
        self.snapshot = data;
        self.status_overrides.clear();
    }

    /// Optimistic status edit, visible in every view until the next sync.
    pub fn set_status(&mut self, booking_code: &str, status: RideStatus) {
        self.status_overrides.insert(booking_code.to_string(), status);
    }

    pub fn trips(&self) -> &[Trip] {
        &self.snapshot.trips
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    fn with_overlay(&self, p: &Passenger) -> Passenger {
        let mut p = p.clone();
        if let Some(status) = self.status_overrides.get(&p.booking_code) {
            p.status = *status;
        }
        p
    }

    pub fn trip_passengers(&self) -> Vec<Passenger> {
        self.snapshot
            .trip_passengers
            .iter()
            .map(|p| self.with_overlay(p))
            .collect()
    }

    pub fn all_passengers(&self) -> Vec<Passenger> {
        self.snapshot
            .all_passengers
            .iter()
            .map(|p| self.with_overlay(p))
            .collect()
    }

    pub fn passengers_for_trip(&self, trip_id: &str) -> Vec<Passenger> {
        self.snapshot
            .trip_passengers
            .iter()
            .filter(|p| p.trip_id.as_deref() == Some(trip_id))
            .map(|p| self.with_overlay(p))
            .collect()
    }

    /// Look up a booking, preferring its global roster entry over leg
    /// records.
    pub fn find_booking(&self, booking_code: &str) -> Option<Passenger> {
        self.snapshot
            .all_passengers
            .iter()
            .find(|p| p.booking_code == booking_code)
            .or_else(|| {
                self.snapshot
                    .trip_passengers
                    .iter()
                    .find(|p| p.booking_code == booking_code)
            })
            .map(|p| self.with_overlay(p))
    }
}

/// Shared handle to the reconciled dataset.
pub type SharedDataStore = Arc<RwLock<DataStore>>;

type SharedFetch = Shared<BoxFuture<'static, ReconciledData>>;

/// Fetch-and-reconcile engine with in-flight deduplication.
pub struct SyncEngine {
    api: Arc<dyn DispatchApi>,
    store: SharedDataStore,
    inflight: Arc<Mutex<Option<SharedFetch>>>,
}

impl SyncEngine {
    pub fn new(api: Arc<dyn DispatchApi>, store: SharedDataStore) -> Self {
        Self {
            api,
            store,
            inflight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> SharedDataStore {
        Arc::clone(&self.store)
    }

    /// Fetch the full dataset and reconcile it.
    ///
    /// Calls arriving while a fetch is already in flight await the same
    /// result instead of issuing a duplicate upstream request. Upstream
    /// failure yields an empty snapshot, never an error.
    pub async fn fetch_all(&self) -> ReconciledData {
        let fut = {
            let mut guard = self.inflight.lock().await;
            if let Some(existing) = guard.as_ref() {
                existing.clone()
            } else {
                let api = Arc::clone(&self.api);
                let inflight = Arc::clone(&self.inflight);
                let fut: SharedFetch = async move {
                    let result = match api.get_driver_data().await {
                        Ok(payload) => reconcile(&payload),
                        Err(e) => {
                            warn!(error = %e, "driver data fetch failed");
                            ReconciledData::default()
                        }
                    };
                    // Clear the slot so the next caller starts a fresh fetch
                    *inflight.lock().await = None;
                    result
                }
                .boxed()
                .shared();
                *guard = Some(fut.clone());
                fut
            }
        };

        fut.await
    }

    /// Fetch and apply to the store.
    ///
    /// An empty result means the sync failed, not that no data exists: the
    /// previous snapshot is preserved. Returns whether the store was
    /// updated.
    pub async fn sync(&self) -> bool {
        let data = self.fetch_all().await;
        if data.is_empty() {
            warn!("sync yielded no data, keeping previous snapshot");
            return false;
        }

        info!(
            trips = data.trips.len(),
            trip_passengers = data.trip_passengers.len(),
            all_passengers = data.all_passengers.len(),
            "applying reconciled snapshot"
        );
        let mut store = self.store.write().await;
        store.apply_snapshot(data);
        true
    }
}
