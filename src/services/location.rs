//! Rate-limited, debounced GPS uploads with a pluggable provider chain.
//!
//! Non-forced sends are coalesced over a short debounce window and gated by
//! a minimum interval; forced sends always perform a fresh device read.
//! Concurrent sends for the same logical request collapse into one in-flight
//! operation, mirroring the sync engine's fetch deduplication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::LocationConfig;
use crate::providers::dispatch::{DispatchApi, LocationUpload};
use crate::providers::geolocation::{GeoFix, GeoProvider};
use crate::storage::{keys, LocalStore};

/// Which configured provider the preference flags select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Primary,
    Secondary,
}

struct LastSent {
    sent_at_ms: i64,
    fix: GeoFix,
}

struct DebounceState {
    handle: JoinHandle<()>,
    waiters: Arc<Mutex<Vec<oneshot::Sender<Option<GeoFix>>>>>,
}

type SharedSend = Shared<BoxFuture<'static, Option<GeoFix>>>;

/// Location throttle/debounce engine.
pub struct LocationEngine {
    api: Arc<dyn DispatchApi>,
    store: Arc<LocalStore>,
    primary: Arc<dyn GeoProvider>,
    secondary: Option<Arc<dyn GeoProvider>>,
    config: LocationConfig,
    enabled: AtomicBool,
    last_sent: Mutex<Option<LastSent>>,
    provider_cache: Mutex<Option<(ProviderRole, Instant)>>,
    pending: Arc<Mutex<HashMap<String, SharedSend>>>,
    debounce: Mutex<Option<DebounceState>>,
}

impl LocationEngine {
    pub fn new(
        api: Arc<dyn DispatchApi>,
        store: Arc<LocalStore>,
        primary: Arc<dyn GeoProvider>,
        secondary: Option<Arc<dyn GeoProvider>>,
        config: LocationConfig,
        enabled: bool,
    ) -> Self {
        Self {
            api,
            store,
            primary,
            secondary,
            config,
            enabled: AtomicBool::new(enabled),
            last_sent: Mutex::new(None),
            provider_cache: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            debounce: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip tracking on or off, persisting the flag.
    pub async fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
        if let Err(e) = self.store.set_flag(keys::GPS_ENABLED, on).await {
            warn!(error = %e, "failed to persist gps flag");
        }
    }

    /// Send the current location using the configured minimum interval.
    pub async fn send_location(
        self: Arc<Self>,
        trip_id: Option<&str>,
        force: bool,
    ) -> Option<GeoFix> {
        let min_interval = Duration::from_secs(self.config.min_interval_minutes * 60);
        self.send_location_min_interval(trip_id, force, min_interval)
            .await
    }

    /// Send the current location.
    ///
    /// Non-forced calls are debounced: calls landing inside the window
    /// collapse into one device read and upload, and every coalesced caller
    /// receives that single result. Forced calls bypass the debounce and
    /// the interval gate.
    pub async fn send_location_min_interval(
        self: Arc<Self>,
        trip_id: Option<&str>,
        force: bool,
        min_interval: Duration,
    ) -> Option<GeoFix> {
        if force {
            return self.send_now(trip_id.map(String::from), true, min_interval).await;
        }

        let rx = {
            let mut slot = self.debounce.lock().await;

            // Rearm: cancel the pending window, carry its waiters over
            let waiters = match slot.take() {
                Some(state) => {
                    state.handle.abort();
                    state.waiters
                }
                None => Arc::new(Mutex::new(Vec::new())),
            };

            let (tx, rx) = oneshot::channel();
            waiters.lock().await.push(tx);

            let engine = Arc::clone(&self);
            let task_waiters = Arc::clone(&waiters);
            let trip_id = trip_id.map(String::from);
            let delay = Duration::from_millis(self.config.debounce_ms);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // Clear the slot first so late callers open a fresh window
                *engine.debounce.lock().await = None;
                let result = engine.send_now(trip_id, false, min_interval).await;
                for tx in task_waiters.lock().await.drain(..) {
                    let _ = tx.send(result);
                }
            });

            *slot = Some(DebounceState { handle, waiters });
            rx
        };

        rx.await.unwrap_or(None)
    }

    /// Perform (or join) the actual read-and-upload for a request key.
    async fn send_now(
        self: Arc<Self>,
        trip_id: Option<String>,
        force: bool,
        min_interval: Duration,
    ) -> Option<GeoFix> {
        let key = format!(
            "location_{}_{}",
            trip_id.as_deref().unwrap_or("none"),
            force
        );

        let fut = {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(&key) {
                existing.clone()
            } else {
                let engine = Arc::clone(&self);
                let map = Arc::clone(&self.pending);
                let cleanup_key = key.clone();
                let fut: SharedSend = async move {
                    let result = engine.execute_send(trip_id, force, min_interval).await;
                    map.lock().await.remove(&cleanup_key);
                    result
                }
                .boxed()
                .shared();
                pending.insert(key, fut.clone());
                fut
            }
        };

        fut.await
    }

    async fn execute_send(
        self: Arc<Self>,
        trip_id: Option<String>,
        force: bool,
        min_interval: Duration,
    ) -> Option<GeoFix> {
        let now_ms = Utc::now().timestamp_millis();

        // Interval gate: answer from the cache instead of touching the
        // device or the network
        if !force {
            let last = self.last_sent.lock().await;
            if let Some(last) = &*last {
                if now_ms - last.sent_at_ms < min_interval.as_millis() as i64 {
                    return Some(last.fix);
                }
            }
        }

        let choice = self.resolve_provider(true).await;
        let (fix, provider_name, device_id) = match (choice, &self.secondary) {
            (Some(ProviderRole::Secondary), Some(secondary)) => {
                match secondary.current_position().await {
                    Ok(fix) => (fix, secondary.name().to_string(), secondary.device_id().await),
                    Err(e) => {
                        // Transparent fallback; the upload reports the
                        // provider actually used
                        warn!(error = %e, provider = secondary.name(), "secondary provider failed, falling back");
                        match self.primary.current_position().await {
                            Ok(fix) => (fix, self.primary.name().to_string(), None),
                            Err(e) => {
                                warn!(error = %e, "primary provider failed");
                                return None;
                            }
                        }
                    }
                }
            }
            _ => match self.primary.current_position().await {
                Ok(fix) => (fix, self.primary.name().to_string(), None),
                Err(e) => {
                    warn!(error = %e, "primary provider failed");
                    return None;
                }
            },
        };

        let upload = LocationUpload {
            lat: fix.lat,
            lng: fix.lng,
            timestamp: fix.timestamp,
            trip_id,
            location_provider: provider_name.clone(),
            device_id,
        };
        if let Err(e) = self.api.send_location(&upload).await {
            warn!(error = %e, "location upload failed");
            return None;
        }

        debug!(
            lat = fix.lat,
            lng = fix.lng,
            provider = %provider_name,
            "location sent"
        );

        *self.last_sent.lock().await = Some(LastSent {
            sent_at_ms: now_ms,
            fix,
        });
        if let Err(e) = self.store.set_last_location(&fix).await {
            debug!(error = %e, "failed to persist last location");
        }

        Some(fix)
    }

    /// Resolve which provider the preference flags select.
    ///
    /// The secondary tracking provider wins over the primary; the decision
    /// is cached for a short TTL to keep the hot path off the preference
    /// store. `None` means no preference is set and the engine will fall
    /// back to a plain primary device read.
    pub async fn resolve_provider(&self, use_cache: bool) -> Option<ProviderRole> {
        if use_cache {
            let cache = self.provider_cache.lock().await;
            if let Some((role, cached_at)) = &*cache {
                if cached_at.elapsed() < Duration::from_millis(self.config.provider_cache_ms) {
                    return Some(*role);
                }
            }
        }

        let secondary_enabled = self.store.flag(keys::PROVIDER_SECONDARY).await;
        let primary_enabled = self.store.flag(keys::PROVIDER_PRIMARY).await;

        let role = if secondary_enabled && self.secondary.is_some() {
            Some(ProviderRole::Secondary)
        } else if primary_enabled {
            Some(ProviderRole::Primary)
        } else {
            None
        };

        if let Some(role) = role {
            *self.provider_cache.lock().await = Some((role, Instant::now()));
        }
        role
    }

    /// Drop the cached provider decision, used when preferences change.
    pub async fn clear_provider_cache(&self) {
        *self.provider_cache.lock().await = None;
    }

    /// Last successfully sent sample, without a new device read.
    pub async fn last_known_location(&self) -> Option<GeoFix> {
        if let Some(last) = &*self.last_sent.lock().await {
            return Some(last.fix);
        }
        self.store.last_location().await.unwrap_or_default()
    }
}
