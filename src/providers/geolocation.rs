use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single device position fix, epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: i64,
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("No usable fix from provider")]
    NoFix,
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// A device position source.
///
/// The session is wired with a primary provider and optionally a secondary
/// tracking provider; the location engine resolves between them per call.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Provider name as reported in the upload payload.
    fn name(&self) -> &str;

    /// Read the current device position.
    async fn current_position(&self) -> Result<GeoFix, GeoError>;

    /// Stable device identifier, if the provider has one.
    async fn device_id(&self) -> Option<String> {
        None
    }
}
