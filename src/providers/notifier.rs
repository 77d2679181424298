use async_trait::async_trait;
use chrono::{DateTime, Local};
use thiserror::Error;

/// A departure reminder handed to the OS notification layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DepartureReminder {
    /// Stable id derived from the trip time and lead minutes
    pub id: i64,
    /// When the reminder should surface
    pub fire_at: DateTime<Local>,
    pub title: String,
    pub body: String,
    /// Notification channel, unique per sound so sound changes take effect
    pub channel_id: String,
    pub sound_enabled: bool,
    pub sound_id: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification scheduling failed: {0}")]
    ScheduleFailed(String),
}

/// OS-level local notification scheduling, injected by the embedder.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule(&self, reminder: DepartureReminder) -> Result<(), NotifyError>;
}
