//! Departure reminder scheduling with per-day deduplication.
//!
//! A reminder's id is derived from its trip time and lead minutes, so the
//! same reminder computed twice maps to the same id; ids already scheduled
//! today are skipped. The dedup set is keyed by the wall-clock day at
//! scheduling time, not the trip's day.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, TimeZone};
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::models::Trip;
use crate::providers::notifier::{DepartureReminder, Notifier, NotifyError};
use crate::services::normalize::parse_datetime;
use crate::storage::{keys, LocalStore};

const REMINDER_TITLE: &str = "汐止福泰接駁車_系統通知";

/// What happened to a scheduling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// The same reminder was already scheduled today
    DuplicateSkipped,
    /// The trip itself already departed; nothing to remind about
    TripAlreadyDeparted,
}

/// Schedules departure reminders through the injected OS notifier.
pub struct NotificationScheduler {
    store: Arc<LocalStore>,
    notifier: Arc<dyn Notifier>,
    config: NotificationConfig,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<LocalStore>,
        notifier: Arc<dyn Notifier>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Stable reminder id: the fire time in epoch seconds.
    pub fn reminder_id(trip_time: DateTime<Local>, lead_minutes: i64) -> i64 {
        (trip_time.timestamp_millis() - lead_minutes * 60_000).div_euclid(1000)
    }

    /// Schedule one departure reminder.
    ///
    /// If the lead time already passed but the trip is still ahead, the fire
    /// time is clamped to a few seconds from now so the reminder still
    /// surfaces; if the trip itself passed, nothing is scheduled.
    pub async fn schedule_departure(
        &self,
        trip_time: DateTime<Local>,
        lead_minutes: i64,
        sound_enabled: bool,
        sound_id: &str,
        skip_dedup: bool,
        now: DateTime<Local>,
    ) -> Result<ScheduleOutcome, NotifyError> {
        let id = Self::reminder_id(trip_time, lead_minutes);
        let day_key = keys::scheduled_ids(&now.format("%Y%m%d").to_string());

        if !skip_dedup {
            let scheduled = match self.store.id_set(&day_key).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "failed to read scheduled ids, assuming none");
                    Default::default()
                }
            };
            if scheduled.contains(&id) {
                debug!(id, "reminder already scheduled today");
                return Ok(ScheduleOutcome::DuplicateSkipped);
            }
        }

        let mut fire_at = trip_time - Duration::minutes(lead_minutes);
        if fire_at < now && trip_time > now {
            fire_at = now + Duration::seconds(10);
        }
        if trip_time <= now {
            return Ok(ScheduleOutcome::TripAlreadyDeparted);
        }

        let time_label = trip_time.format("%H:%M").to_string();
        self.notifier
            .schedule(DepartureReminder {
                id,
                fire_at,
                title: REMINDER_TITLE.to_string(),
                body: format!("班次【{} 】即將發車，請準備前往接駁", time_label),
                channel_id: format!("departures_vibrate_{}", sound_id),
                sound_enabled,
                sound_id: sound_id.to_string(),
            })
            .await?;

        if let Err(e) = self.store.add_id(&day_key, id).await {
            warn!(error = %e, id, "failed to persist scheduled id");
        }
        info!(id, fire_at = %fire_at, "departure reminder scheduled");
        Ok(ScheduleOutcome::Scheduled)
    }

    /// Schedule reminders for every trip departing today.
    ///
    /// Returns how many reminders were newly scheduled.
    pub async fn schedule_today(&self, trips: &[Trip], now: DateTime<Local>) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let today = now.format("%Y/%m/%d").to_string();
        let mut scheduled = 0;

        for trip in trips {
            if trip.date != today {
                continue;
            }
            let ts = parse_datetime(&trip.departure_label());
            if ts == 0 {
                continue;
            }
            let trip_time = match Local.timestamp_millis_opt(ts).single() {
                Some(dt) => dt,
                None => continue,
            };

            match self
                .schedule_departure(
                    trip_time,
                    self.config.lead_minutes,
                    true,
                    &self.config.sound_id,
                    false,
                    now,
                )
                .await
            {
                Ok(ScheduleOutcome::Scheduled) => scheduled += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(trip = %trip.id, error = %e, "failed to schedule reminder");
                }
            }
        }

        scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct MockNotifier {
        scheduled: Mutex<Vec<DepartureReminder>>,
    }

    impl MockNotifier {
        fn new() -> Self {
            Self {
                scheduled: Mutex::new(Vec::new()),
            }
        }

        async fn count(&self) -> usize {
            self.scheduled.lock().await.len()
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn schedule(&self, reminder: DepartureReminder) -> Result<(), NotifyError> {
            self.scheduled.lock().await.push(reminder);
            Ok(())
        }
    }

    async fn scheduler() -> (NotificationScheduler, Arc<MockNotifier>, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::in_memory().await.unwrap());
        let notifier = Arc::new(MockNotifier::new());
        let scheduler = NotificationScheduler::new(
            Arc::clone(&store),
            notifier.clone(),
            NotificationConfig::default(),
        );
        (scheduler, notifier, store)
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_reminder_id_formula() {
        let trip = local(2025, 6, 1, 10, 0);
        let id = NotificationScheduler::reminder_id(trip, 30);
        assert_eq!(id, (trip.timestamp_millis() - 30 * 60_000) / 1000);
    }

    #[tokio::test]
    async fn test_duplicate_same_day_is_suppressed() {
        let (scheduler, notifier, _) = scheduler().await;
        let now = local(2025, 6, 1, 8, 0);
        let trip = local(2025, 6, 1, 10, 0);

        let first = scheduler
            .schedule_departure(trip, 30, true, "notify_sound_1", false, now)
            .await
            .unwrap();
        assert_eq!(first, ScheduleOutcome::Scheduled);

        let second = scheduler
            .schedule_departure(trip, 30, true, "notify_sound_1", false, now)
            .await
            .unwrap();
        assert_eq!(second, ScheduleOutcome::DuplicateSkipped);
        assert_eq!(notifier.count().await, 1);
    }

    #[tokio::test]
    async fn test_new_day_schedules_again() {
        let (scheduler, notifier, _) = scheduler().await;
        let trip = local(2025, 6, 2, 10, 0);

        scheduler
            .schedule_departure(trip, 30, true, "notify_sound_1", false, local(2025, 6, 1, 9, 0))
            .await
            .unwrap();

        // Same reminder processed on the next wall-clock day: fresh set
        let outcome = scheduler
            .schedule_departure(trip, 30, true, "notify_sound_1", false, local(2025, 6, 2, 8, 0))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Scheduled);
        assert_eq!(notifier.count().await, 2);
    }

    #[tokio::test]
    async fn test_skip_dedup_bypasses_the_set() {
        let (scheduler, notifier, _) = scheduler().await;
        let now = local(2025, 6, 1, 8, 0);
        let trip = local(2025, 6, 1, 10, 0);

        for _ in 0..2 {
            scheduler
                .schedule_departure(trip, 30, true, "notify_sound_1", true, now)
                .await
                .unwrap();
        }
        assert_eq!(notifier.count().await, 2);
    }

    #[tokio::test]
    async fn test_passed_lead_time_clamps_fire_time() {
        let (scheduler, notifier, _) = scheduler().await;
        let now = local(2025, 6, 1, 9, 45);
        let trip = local(2025, 6, 1, 10, 0);

        let outcome = scheduler
            .schedule_departure(trip, 30, true, "notify_sound_1", false, now)
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Scheduled);

        let reminders = notifier.scheduled.lock().await;
        let fire_at = reminders[0].fire_at;
        assert!(fire_at > now && fire_at <= now + Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_departed_trip_is_never_scheduled() {
        let (scheduler, notifier, store) = scheduler().await;
        let now = local(2025, 6, 1, 11, 0);
        let trip = local(2025, 6, 1, 10, 0);

        let outcome = scheduler
            .schedule_departure(trip, 30, true, "notify_sound_1", false, now)
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::TripAlreadyDeparted);
        assert_eq!(notifier.count().await, 0);

        // Nothing recorded either: a later sync may still retry legitimately
        let day_key = keys::scheduled_ids("20250601");
        assert!(store.id_set(&day_key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reminder_payload() {
        let (scheduler, notifier, _) = scheduler().await;
        let now = local(2025, 6, 1, 8, 0);
        let trip = local(2025, 6, 1, 10, 30);

        scheduler
            .schedule_departure(trip, 30, true, "notify_sound_2", false, now)
            .await
            .unwrap();

        let reminders = notifier.scheduled.lock().await;
        let reminder = &reminders[0];
        assert_eq!(reminder.title, REMINDER_TITLE);
        assert!(reminder.body.contains("10:30"));
        assert_eq!(reminder.channel_id, "departures_vibrate_notify_sound_2");
        assert_eq!(reminder.fire_at, trip - Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_schedule_today_only_todays_trips_once() {
        let (scheduler, notifier, _) = scheduler().await;
        let now = local(2025, 6, 1, 7, 0);

        let trips = vec![
            Trip {
                id: "t1".to_string(),
                date: "2025/06/01".to_string(),
                time: "10:00".to_string(),
                booked: 3,
            },
            Trip {
                id: "t2".to_string(),
                date: "2025/06/02".to_string(),
                time: "10:00".to_string(),
                booked: 3,
            },
        ];

        assert_eq!(scheduler.schedule_today(&trips, now).await, 1);
        assert_eq!(notifier.count().await, 1);

        // Re-running the sweep schedules nothing new
        assert_eq!(scheduler.schedule_today(&trips, now).await, 0);
        assert_eq!(notifier.count().await, 1);
    }
}
