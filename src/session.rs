//! The driver session: one context object owning every service and the two
//! background loops.
//!
//! All previously ambient state (pending scans, last-sent location, provider
//! cache, in-flight fetches) lives in fields here, so independent sessions
//! and tests do not interfere with each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{RideStatus, Trip};
use crate::providers::dispatch::{DispatchApi, TripCompleteRequest, TripStartRequest};
use crate::providers::geolocation::GeoProvider;
use crate::providers::notifier::Notifier;
use crate::services::boarding::{BoardingQueue, ScanAccepted, ScanRejection};
use crate::services::location::LocationEngine;
use crate::services::movement::MovementDetector;
use crate::services::notifications::NotificationScheduler;
use crate::storage::{keys, LocalStore};
use crate::sync::{DataStore, SharedDataStore, SyncEngine};

const DEFAULT_DRIVER_ROLE: &str = "driverA";

/// One driver's client session.
pub struct Session {
    config: Config,
    store: Arc<LocalStore>,
    api: Arc<dyn DispatchApi>,
    data: SharedDataStore,
    sync: SyncEngine,
    location: Arc<LocationEngine>,
    boarding: BoardingQueue,
    movement: Mutex<MovementDetector>,
    notifications: NotificationScheduler,
    current_trip: Arc<RwLock<Option<Trip>>>,
    foreground: AtomicBool,
}

impl Session {
    pub async fn new(
        config: Config,
        api: Arc<dyn DispatchApi>,
        store: Arc<LocalStore>,
        primary: Arc<dyn GeoProvider>,
        secondary: Option<Arc<dyn GeoProvider>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let data: SharedDataStore = Arc::new(RwLock::new(DataStore::default()));
        let current_trip: Arc<RwLock<Option<Trip>>> = Arc::new(RwLock::new(None));

        let gps_enabled = store.flag(keys::GPS_ENABLED).await;
        let location = Arc::new(LocationEngine::new(
            Arc::clone(&api),
            Arc::clone(&store),
            primary,
            secondary,
            config.location.clone(),
            gps_enabled,
        ));

        let boarding = BoardingQueue::new(
            Arc::clone(&api),
            Arc::clone(&data),
            Some(Arc::clone(&location)),
            Arc::clone(&current_trip),
            config.boarding.clone(),
        );

        let sync = SyncEngine::new(Arc::clone(&api), Arc::clone(&data));
        let notifications = NotificationScheduler::new(
            Arc::clone(&store),
            notifier,
            config.notifications.clone(),
        );

        Self {
            config,
            store,
            api,
            data,
            sync,
            location,
            boarding,
            movement: Mutex::new(MovementDetector::new()),
            notifications,
            current_trip,
            foreground: AtomicBool::new(true),
        }
    }

    pub fn data(&self) -> SharedDataStore {
        Arc::clone(&self.data)
    }

    pub fn location(&self) -> Arc<LocationEngine> {
        Arc::clone(&self.location)
    }

    pub fn boarding(&self) -> &BoardingQueue {
        &self.boarding
    }

    pub fn notifications(&self) -> &NotificationScheduler {
        &self.notifications
    }

    /// Mark the app foregrounded or backgrounded; the data loop widens its
    /// interval while backgrounded.
    pub fn set_foreground(&self, active: bool) {
        self.foreground.store(active, Ordering::SeqCst);
    }

    pub async fn current_trip(&self) -> Option<Trip> {
        self.current_trip.read().await.clone()
    }

    /// Select the trip the driver is working, or clear it.
    pub async fn set_current_trip(&self, trip: Option<Trip>) {
        *self.current_trip.write().await = trip;
    }

    /// Verify and record a QR scan against the current dataset.
    pub async fn record_scan(&self, raw: &str) -> Result<ScanAccepted, ScanRejection> {
        self.boarding
            .record_scan(raw, Local::now().timestamp_millis())
            .await
    }

    /// Full resync: force-send one location fix, fetch and reconcile, then
    /// sweep today's departure reminders. Returns whether new data arrived.
    pub async fn refresh(&self) -> bool {
        if self.force_send_location().await.is_none() && self.location.is_enabled() {
            warn!("location send failed during refresh");
        }

        let updated = self.sync.sync().await;

        let trips = self.data.read().await.trips().to_vec();
        self.notifications.schedule_today(&trips, Local::now()).await;

        updated
    }

    /// Start working a trip: report it to the backend, remember the shared
    /// trip id and turn tracking on.
    pub async fn start_trip(&self, trip: Trip) -> Result<(), crate::providers::dispatch::DispatchError> {
        let driver_role = self.driver_role().await;
        let request = TripStartRequest {
            main_datetime: trip.departure_label(),
            driver_role,
            stops: None,
        };
        let response = self.api.start_trip(&request).await?;

        if let Some(trip_id) = response.trip_id {
            if let Err(e) = self.store.set(keys::ACTIVE_TRIP_ID, &trip_id).await {
                warn!(error = %e, "failed to persist active trip id");
            }
        }

        info!(trip = %trip.id, "trip started");
        *self.current_trip.write().await = Some(trip);
        self.location.set_enabled(true).await;
        Ok(())
    }

    /// Finish the active trip. Returns false when no trip is active or the
    /// backend rejects the completion.
    pub async fn complete_trip(&self) -> Result<bool, crate::providers::dispatch::DispatchError> {
        let trip = match self.current_trip.read().await.clone() {
            Some(trip) => trip,
            None => return Ok(false),
        };

        let trip_id = match self.store.get(keys::ACTIVE_TRIP_ID).await {
            Ok(Some(id)) => id,
            _ => trip.id.clone(),
        };
        let request = TripCompleteRequest {
            trip_id,
            driver_role: self.driver_role().await,
            main_datetime: trip.departure_label(),
        };

        let ok = self.api.complete_trip(&request).await?;
        if ok {
            *self.current_trip.write().await = None;
            if let Err(e) = self.store.remove(keys::ACTIVE_TRIP_ID).await {
                warn!(error = %e, "failed to clear active trip id");
            }
            info!(trip = %trip.id, "trip completed");
        }
        Ok(ok)
    }

    /// Mark a booking as a no-show, optimistically and on the backend.
    pub async fn mark_no_show(&self, booking_code: &str) -> bool {
        self.force_send_location().await;

        match self.api.mark_no_show(booking_code).await {
            Ok(true) => {
                self.data
                    .write()
                    .await
                    .set_status(booking_code, RideStatus::NoShow);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(booking = %booking_code, error = %e, "no-show request failed");
                false
            }
        }
    }

    /// Board a passenger without a scan, optimistically and on the backend.
    pub async fn manual_boarding(&self, booking_code: &str) -> bool {
        self.force_send_location().await;

        match self.api.manual_boarding(booking_code).await {
            Ok(true) => {
                self.data
                    .write()
                    .await
                    .set_status(booking_code, RideStatus::Boarded);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(booking = %booking_code, error = %e, "manual boarding request failed");
                false
            }
        }
    }

    /// One data-loop tick: resync inside the daily service window only.
    pub async fn data_tick(&self) {
        let now = Local::now();
        let minutes = now.hour() * 60 + now.minute();
        let window = &self.config.data_sync;
        if minutes < window.service_window_start_minutes
            || minutes > window.service_window_end_minutes
        {
            return;
        }
        self.refresh().await;
    }

    /// One location-loop tick: non-forced send, then the auto-shutdown
    /// check over the returned fix.
    pub async fn location_tick(&self) {
        if !self.location.is_enabled() {
            return;
        }

        let trip_id = self.current_trip_id().await;
        let send = Arc::clone(&self.location).send_location(trip_id.as_deref(), false);
        let fix = match send.await {
            Some(fix) => fix,
            None => return,
        };

        let shutdown_cfg = &self.config.auto_shutdown;
        if !shutdown_cfg.enabled || !self.location.is_enabled() {
            return;
        }

        let window_ms = shutdown_cfg.window_minutes.max(1) as i64 * 60_000;
        let min_distance = shutdown_cfg.min_distance_meters.max(1.0);
        let idle = self.movement.lock().await.should_shutdown(
            fix.lat,
            fix.lng,
            fix.timestamp,
            window_ms,
            min_distance,
        );
        if !idle {
            return;
        }

        // Shutdown only ever turns tracking off; nothing here blocks the
        // driver turning it back on
        self.location.set_enabled(false).await;
        self.movement.lock().await.reset();
        info!(
            window_minutes = shutdown_cfg.window_minutes,
            min_distance_meters = shutdown_cfg.min_distance_meters,
            "tracking auto-shutdown"
        );

        if self.current_trip.read().await.is_some() {
            match self.complete_trip().await {
                Ok(true) => info!("active trip auto-completed after shutdown"),
                Ok(false) => warn!("auto-completion rejected by backend"),
                Err(e) => warn!(error = %e, "auto-completion failed"),
            }
        }
    }

    /// Run the two background loops forever: data resync (interval depends
    /// on foreground state) and location upload (fixed interval).
    pub async fn run(self: Arc<Self>) {
        info!("starting driver session");
        self.refresh().await;

        let data_self = Arc::clone(&self);
        let data_handle = tokio::spawn(async move {
            loop {
                let minutes = if data_self.foreground.load(Ordering::SeqCst) {
                    data_self.config.data_sync.foreground_interval_minutes
                } else {
                    data_self.config.data_sync.background_interval_minutes
                };
                tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
                data_self.data_tick().await;
            }
        });

        let gps_self = Arc::clone(&self);
        let gps_handle = tokio::spawn(async move {
            let interval =
                Duration::from_secs(gps_self.config.location.min_interval_minutes.max(3) * 60);
            loop {
                gps_self.location_tick().await;
                tokio::time::sleep(interval).await;
            }
        });

        let _ = tokio::join!(data_handle, gps_handle);
    }

    async fn current_trip_id(&self) -> Option<String> {
        self.current_trip.read().await.as_ref().map(|t| t.id.clone())
    }

    /// Force one location upload when tracking is on, swallowing failures.
    async fn force_send_location(&self) -> Option<crate::providers::geolocation::GeoFix> {
        if !self.location.is_enabled() {
            return None;
        }
        let trip_id = self.current_trip_id().await;
        Arc::clone(&self.location)
            .send_location(trip_id.as_deref(), true)
            .await
    }

    async fn driver_role(&self) -> String {
        match self.store.get(keys::DRIVER_ROLE).await {
            Ok(Some(role)) if !role.is_empty() => role,
            _ => DEFAULT_DRIVER_ROLE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationConfig;
    use crate::providers::dispatch::{
        CheckinResponse, DispatchError, DriverDataPayload, LocationUpload, RawTrip,
        RawTripPassenger, TripStartResponse,
    };
    use crate::providers::geolocation::{GeoError, GeoFix};
    use crate::providers::notifier::{DepartureReminder, NotifyError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockApi {
        data_calls: AtomicUsize,
        complete_calls: AtomicUsize,
        no_show_ok: bool,
    }

    #[async_trait]
    impl DispatchApi for MockApi {
        async fn get_driver_data(&self) -> Result<DriverDataPayload, DispatchError> {
            self.data_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DriverDataPayload {
                trips: vec![RawTrip {
                    trip_id: "t1".to_string(),
                    date: "2025-12-08".to_string(),
                    time: "8:00".to_string(),
                    total_pax: 2,
                }],
                trip_passengers: vec![RawTripPassenger {
                    trip_id: "t1".to_string(),
                    station: "南港捷運站".to_string(),
                    updown: "上車".to_string(),
                    booking_id: "B1".to_string(),
                    name: "王小明".to_string(),
                    phone: String::new(),
                    room: String::new(),
                    pax: 2,
                    status: String::new(),
                    direction: "去程".to_string(),
                    qrcode: "FT:B1:x".to_string(),
                }],
                passenger_list: vec![],
            })
        }

        async fn confirm_boarding(&self, _qrcode: &str) -> Result<CheckinResponse, DispatchError> {
            Ok(CheckinResponse::default())
        }

        async fn mark_no_show(&self, _booking_id: &str) -> Result<bool, DispatchError> {
            Ok(self.no_show_ok)
        }

        async fn manual_boarding(&self, _booking_id: &str) -> Result<bool, DispatchError> {
            Ok(true)
        }

        async fn send_location(&self, _upload: &LocationUpload) -> Result<(), DispatchError> {
            Ok(())
        }

        async fn start_trip(
            &self,
            _req: &TripStartRequest,
        ) -> Result<TripStartResponse, DispatchError> {
            Ok(TripStartResponse {
                trip_id: Some("shared-99".to_string()),
                share_url: None,
                stops: None,
            })
        }

        async fn complete_trip(&self, req: &TripCompleteRequest) -> Result<bool, DispatchError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            assert!(!req.driver_role.is_empty());
            Ok(true)
        }
    }

    struct FixedProvider;

    #[async_trait]
    impl GeoProvider for FixedProvider {
        fn name(&self) -> &str {
            "primary"
        }

        async fn current_position(&self) -> Result<GeoFix, GeoError> {
            Ok(GeoFix {
                lat: 25.0553,
                lng: 121.6171,
                timestamp: 1748700000000,
            })
        }
    }

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn schedule(&self, _reminder: DepartureReminder) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    async fn session(api: Arc<MockApi>) -> Session {
        let mut config = Config::default();
        config.location = LocationConfig {
            min_interval_minutes: 3,
            debounce_ms: 10,
            provider_cache_ms: 5000,
        };
        let store = Arc::new(LocalStore::in_memory().await.unwrap());
        store.set_flag(keys::GPS_ENABLED, true).await.unwrap();
        Session::new(
            config,
            api,
            store,
            Arc::new(FixedProvider),
            None,
            Arc::new(NoopNotifier),
        )
        .await
    }

    fn trip() -> Trip {
        Trip {
            id: "t1".to_string(),
            date: "2025/12/08".to_string(),
            time: "08:00".to_string(),
            booked: 2,
        }
    }

    #[tokio::test]
    async fn test_refresh_populates_store() {
        let api = Arc::new(MockApi::default());
        let session = session(api.clone()).await;

        assert!(session.refresh().await);
        assert_eq!(api.data_calls.load(Ordering::SeqCst), 1);

        let data = session.data();
        let data = data.read().await;
        assert_eq!(data.trips().len(), 1);
        assert_eq!(data.trips()[0].date, "2025/12/08");
        assert_eq!(data.passengers_for_trip("t1").len(), 1);
    }

    #[tokio::test]
    async fn test_start_trip_enables_tracking_and_stores_shared_id() {
        let api = Arc::new(MockApi::default());
        let session = session(api).await;
        session.location().set_enabled(false).await;

        session.start_trip(trip()).await.unwrap();

        assert!(session.location().is_enabled());
        assert_eq!(session.current_trip().await.unwrap().id, "t1");
        assert_eq!(
            session.store.get(keys::ACTIVE_TRIP_ID).await.unwrap().as_deref(),
            Some("shared-99")
        );
    }

    #[tokio::test]
    async fn test_complete_trip_without_active_trip() {
        let api = Arc::new(MockApi::default());
        let session = session(api.clone()).await;
        assert!(!session.complete_trip().await.unwrap());
        assert_eq!(api.complete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_complete_trip_clears_state() {
        let api = Arc::new(MockApi::default());
        let session = session(api.clone()).await;

        session.start_trip(trip()).await.unwrap();
        assert!(session.complete_trip().await.unwrap());

        assert_eq!(api.complete_calls.load(Ordering::SeqCst), 1);
        assert!(session.current_trip().await.is_none());
        assert_eq!(session.store.get(keys::ACTIVE_TRIP_ID).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_no_show_applies_optimistic_status() {
        let api = Arc::new(MockApi {
            no_show_ok: true,
            ..Default::default()
        });
        let session = session(api).await;
        session.refresh().await;

        assert!(session.mark_no_show("B1").await);
        let data = session.data();
        let data = data.read().await;
        assert_eq!(
            data.find_booking("B1").unwrap().status,
            RideStatus::NoShow
        );
    }

    #[tokio::test]
    async fn test_mark_no_show_rejected_leaves_status() {
        let api = Arc::new(MockApi::default());
        let session = session(api).await;
        session.refresh().await;

        assert!(!session.mark_no_show("B1").await);
        let data = session.data();
        let data = data.read().await;
        assert_eq!(
            data.find_booking("B1").unwrap().status,
            RideStatus::Booked
        );
    }

    #[tokio::test]
    async fn test_manual_boarding_applies_optimistic_status() {
        let api = Arc::new(MockApi::default());
        let session = session(api).await;
        session.refresh().await;

        assert!(session.manual_boarding("B1").await);
        let data = session.data();
        let data = data.read().await;
        assert_eq!(
            data.find_booking("B1").unwrap().status,
            RideStatus::Boarded
        );
    }

    #[tokio::test]
    async fn test_idle_vehicle_shuts_tracking_down_and_completes_trip() {
        let api = Arc::new(MockApi::default());
        let session = session(api.clone()).await;
        session.start_trip(trip()).await.unwrap();

        // Two ticks at the same position: the second one sees < 500 m of
        // movement inside the window and shuts tracking down
        session.location_tick().await;
        session.location_tick().await;

        assert!(!session.location().is_enabled());
        assert!(session.current_trip().await.is_none());
        assert_eq!(api.complete_calls.load(Ordering::SeqCst), 1);
    }
}
