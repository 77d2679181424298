use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Base URL of the dispatch backend
    pub api_base: String,
    /// Data resync configuration
    #[serde(default)]
    pub data_sync: DataSyncConfig,
    /// Location upload configuration
    #[serde(default)]
    pub location: LocationConfig,
    /// Auto-shutdown movement detection
    #[serde(default)]
    pub auto_shutdown: AutoShutdownConfig,
    /// Departure reminder configuration
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Boarding flush queue configuration
    #[serde(default)]
    pub boarding: BoardingConfig,
}

/// Configuration for the periodic data resync loop
#[derive(Debug, Clone, Deserialize)]
pub struct DataSyncConfig {
    /// Resync interval in minutes while the app is foregrounded (default: 5)
    #[serde(default = "DataSyncConfig::default_foreground_interval_minutes")]
    pub foreground_interval_minutes: u64,
    /// Resync interval in minutes while backgrounded (default: 30)
    #[serde(default = "DataSyncConfig::default_background_interval_minutes")]
    pub background_interval_minutes: u64,
    /// Start of the daily service window, minutes from midnight (default: 07:00)
    #[serde(default = "DataSyncConfig::default_service_window_start_minutes")]
    pub service_window_start_minutes: u32,
    /// End of the daily service window, minutes from midnight (default: 22:00)
    #[serde(default = "DataSyncConfig::default_service_window_end_minutes")]
    pub service_window_end_minutes: u32,
}

impl Default for DataSyncConfig {
    fn default() -> Self {
        Self {
            foreground_interval_minutes: Self::default_foreground_interval_minutes(),
            background_interval_minutes: Self::default_background_interval_minutes(),
            service_window_start_minutes: Self::default_service_window_start_minutes(),
            service_window_end_minutes: Self::default_service_window_end_minutes(),
        }
    }
}

impl DataSyncConfig {
    fn default_foreground_interval_minutes() -> u64 {
        5
    }
    fn default_background_interval_minutes() -> u64 {
        30
    }
    fn default_service_window_start_minutes() -> u32 {
        7 * 60
    }
    fn default_service_window_end_minutes() -> u32 {
        22 * 60
    }
}

/// Configuration for the location throttle/debounce engine
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Minimum interval between non-forced uploads, in minutes (default: 3)
    #[serde(default = "LocationConfig::default_min_interval_minutes")]
    pub min_interval_minutes: u64,
    /// Debounce window for coalescing non-forced calls, in milliseconds (default: 1000)
    #[serde(default = "LocationConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Provider preference cache TTL in milliseconds (default: 5000)
    #[serde(default = "LocationConfig::default_provider_cache_ms")]
    pub provider_cache_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            min_interval_minutes: Self::default_min_interval_minutes(),
            debounce_ms: Self::default_debounce_ms(),
            provider_cache_ms: Self::default_provider_cache_ms(),
        }
    }
}

impl LocationConfig {
    fn default_min_interval_minutes() -> u64 {
        3
    }
    fn default_debounce_ms() -> u64 {
        1000
    }
    fn default_provider_cache_ms() -> u64 {
        5000
    }
}

/// Configuration for the auto-shutdown movement detector
#[derive(Debug, Clone, Deserialize)]
pub struct AutoShutdownConfig {
    /// Whether tracking auto-shutdown is enabled (default: true)
    #[serde(default = "AutoShutdownConfig::default_enabled")]
    pub enabled: bool,
    /// Sliding window length in minutes (default: 30)
    #[serde(default = "AutoShutdownConfig::default_window_minutes")]
    pub window_minutes: u64,
    /// Net displacement below which the vehicle counts as idle, in meters (default: 500)
    #[serde(default = "AutoShutdownConfig::default_min_distance_meters")]
    pub min_distance_meters: f64,
}

impl Default for AutoShutdownConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            window_minutes: Self::default_window_minutes(),
            min_distance_meters: Self::default_min_distance_meters(),
        }
    }
}

impl AutoShutdownConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_window_minutes() -> u64 {
        30
    }
    fn default_min_distance_meters() -> f64 {
        500.0
    }
}

/// Configuration for departure reminders
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Whether reminders are enabled at all (default: true)
    #[serde(default = "NotificationConfig::default_enabled")]
    pub enabled: bool,
    /// Minutes before departure to fire the reminder (default: 30)
    #[serde(default = "NotificationConfig::default_lead_minutes")]
    pub lead_minutes: i64,
    /// Whether the reminder plays a sound (default: true)
    #[serde(default = "NotificationConfig::default_sound_enabled")]
    pub sound_enabled: bool,
    /// Sound resource name (default: "notify_sound_1")
    #[serde(default = "NotificationConfig::default_sound_id")]
    pub sound_id: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            lead_minutes: Self::default_lead_minutes(),
            sound_enabled: Self::default_sound_enabled(),
            sound_id: Self::default_sound_id(),
        }
    }
}

impl NotificationConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_lead_minutes() -> i64 {
        30
    }
    fn default_sound_enabled() -> bool {
        true
    }
    fn default_sound_id() -> String {
        "notify_sound_1".to_string()
    }
}

/// Configuration for the boarding flush queue
#[derive(Debug, Clone, Deserialize)]
pub struct BoardingConfig {
    /// Delay before the pending boarding set is flushed, in milliseconds (default: 5000)
    #[serde(default = "BoardingConfig::default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    /// Reject scans whose trip departed more than this many minutes ago (default: 60)
    #[serde(default = "BoardingConfig::default_overdue_minutes")]
    pub overdue_minutes: i64,
    /// Reject scans whose trip departs more than this many minutes from now (default: 30)
    #[serde(default = "BoardingConfig::default_early_minutes")]
    pub early_minutes: i64,
}

impl Default for BoardingConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: Self::default_flush_delay_ms(),
            overdue_minutes: Self::default_overdue_minutes(),
            early_minutes: Self::default_early_minutes(),
        }
    }
}

impl BoardingConfig {
    fn default_flush_delay_ms() -> u64 {
        5000
    }
    fn default_overdue_minutes() -> i64 {
        60
    }
    fn default_early_minutes() -> i64 {
        30
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("api_base: \"http://localhost\"").unwrap();
        assert_eq!(config.data_sync.foreground_interval_minutes, 5);
        assert_eq!(config.data_sync.background_interval_minutes, 30);
        assert_eq!(config.location.min_interval_minutes, 3);
        assert_eq!(config.location.debounce_ms, 1000);
        assert_eq!(config.auto_shutdown.window_minutes, 30);
        assert_eq!(config.auto_shutdown.min_distance_meters, 500.0);
        assert_eq!(config.notifications.lead_minutes, 30);
        assert_eq!(config.boarding.flush_delay_ms, 5000);
        assert_eq!(config.boarding.overdue_minutes, 60);
        assert_eq!(config.boarding.early_minutes, 30);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
api_base: "https://dispatch.example.com"
location:
  min_interval_minutes: 10
notifications:
  sound_id: notify_sound_2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api_base, "https://dispatch.example.com");
        assert_eq!(config.location.min_interval_minutes, 10);
        assert_eq!(config.location.debounce_ms, 1000);
        assert_eq!(config.notifications.sound_id, "notify_sound_2");
        assert!(config.notifications.sound_enabled);
    }
}
