//! HTTP client for the dispatch backend.
//!
//! The core talks to the backend only through the [`DispatchApi`] trait so
//! the sync, boarding and location engines can be exercised against mock
//! transports in tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Raw trip record as served by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrip {
    pub trip_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub total_pax: u32,
}

/// Raw trip-scoped leg record.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTripPassenger {
    pub trip_id: String,
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub updown: String,
    pub booking_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub room: String,
    #[serde(default = "default_pax", deserialize_with = "lenient_pax")]
    pub pax: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub qrcode: String,
}

/// Raw global passenger-detail record.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPassengerDetail {
    pub booking_id: String,
    #[serde(default)]
    pub main_datetime: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub room: String,
    #[serde(default = "default_pax", deserialize_with = "lenient_pax")]
    pub pax: u32,
    #[serde(default)]
    pub ride_status: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub hotel_go: String,
    #[serde(default)]
    pub mrt: String,
    #[serde(default)]
    pub train: String,
    #[serde(default)]
    pub mall: String,
    #[serde(default)]
    pub hotel_back: String,
}

/// Full driver dataset: trips, per-leg records and the global roster.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriverDataPayload {
    #[serde(default)]
    pub trips: Vec<RawTrip>,
    #[serde(default)]
    pub trip_passengers: Vec<RawTripPassenger>,
    #[serde(default)]
    pub passenger_list: Vec<RawPassengerDetail>,
}

/// Response to a boarding confirmation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckinResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub booking_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_pax", deserialize_with = "lenient_pax")]
    pub pax: u32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub main_datetime: Option<String>,
}

impl CheckinResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,
}

/// One shuttle stop on a shared trip route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripStop {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripStartRequest {
    pub main_datetime: String,
    pub driver_role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stops: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripStartResponse {
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub stops: Option<Vec<TripStop>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripCompleteRequest {
    pub trip_id: String,
    pub driver_role: String,
    pub main_datetime: String,
}

/// Location upload payload.
#[derive(Debug, Clone, Serialize)]
pub struct LocationUpload {
    pub lat: f64,
    pub lng: f64,
    /// Fix timestamp, epoch milliseconds
    pub timestamp: i64,
    pub trip_id: Option<String>,
    /// Provider actually used for the fix, not the configured preference
    pub location_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

fn default_pax() -> u32 {
    1
}

/// Accept the backend's party size as a number or a numeric string;
/// anything unparseable or non-positive becomes 1.
fn lenient_pax<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPax {
        Int(i64),
        Float(f64),
        Text(String),
    }

    let value = match Option::<RawPax>::deserialize(deserializer)? {
        Some(RawPax::Int(n)) => n,
        Some(RawPax::Float(f)) => f as i64,
        Some(RawPax::Text(s)) => s.trim().parse::<i64>().unwrap_or(1),
        None => 1,
    };
    Ok(if value >= 1 { value as u32 } else { 1 })
}

/// Boundary consumed by the sync, boarding, location and trip components.
#[async_trait]
pub trait DispatchApi: Send + Sync {
    async fn get_driver_data(&self) -> Result<DriverDataPayload, DispatchError>;
    async fn confirm_boarding(&self, qrcode: &str) -> Result<CheckinResponse, DispatchError>;
    async fn mark_no_show(&self, booking_id: &str) -> Result<bool, DispatchError>;
    async fn manual_boarding(&self, booking_id: &str) -> Result<bool, DispatchError>;
    async fn send_location(&self, upload: &LocationUpload) -> Result<(), DispatchError>;
    async fn start_trip(&self, req: &TripStartRequest) -> Result<TripStartResponse, DispatchError>;
    async fn complete_trip(&self, req: &TripCompleteRequest) -> Result<bool, DispatchError>;
}

/// Dispatch backend client over HTTP.
pub struct DispatchClient {
    client: Client,
    base_url: String,
}

impl DispatchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DispatchError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DispatchError> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(%request_id, path, error = %e, "dispatch GET failed");
            DispatchError::Network(e.to_string())
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(%request_id, path, status, "dispatch GET returned error status");
            return Err(DispatchError::Api(format!("HTTP error: {}", status)));
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| DispatchError::Parse(e.to_string()))?;
        debug!(
            %request_id,
            path,
            status,
            duration_ms = start.elapsed().as_millis() as u64,
            "dispatch GET"
        );
        Ok(parsed)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DispatchError> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            warn!(%request_id, path, error = %e, "dispatch POST failed");
            DispatchError::Network(e.to_string())
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(%request_id, path, status, "dispatch POST returned error status");
            return Err(DispatchError::Api(format!("HTTP error: {}", status)));
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| DispatchError::Parse(e.to_string()))?;
        debug!(
            %request_id,
            path,
            status,
            duration_ms = start.elapsed().as_millis() as u64,
            "dispatch POST"
        );
        Ok(parsed)
    }

    /// POST where only the status code matters; the ack body is not parsed.
    async fn post_ack<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), DispatchError> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            warn!(%request_id, path, error = %e, "dispatch POST failed");
            DispatchError::Network(e.to_string())
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(%request_id, path, status, "dispatch POST returned error status");
            return Err(DispatchError::Api(format!("HTTP error: {}", status)));
        }
        debug!(
            %request_id,
            path,
            status,
            duration_ms = start.elapsed().as_millis() as u64,
            "dispatch POST"
        );
        Ok(())
    }
}

#[async_trait]
impl DispatchApi for DispatchClient {
    async fn get_driver_data(&self) -> Result<DriverDataPayload, DispatchError> {
        self.get_json("/api/driver/data").await
    }

    async fn confirm_boarding(&self, qrcode: &str) -> Result<CheckinResponse, DispatchError> {
        self.post_json(
            "/api/driver/checkin",
            &serde_json::json!({ "qrcode": qrcode }),
        )
        .await
    }

    async fn mark_no_show(&self, booking_id: &str) -> Result<bool, DispatchError> {
        let resp: StatusResponse = self
            .post_json(
                "/api/driver/no_show",
                &serde_json::json!({ "booking_id": booking_id }),
            )
            .await?;
        Ok(resp.status == "success")
    }

    async fn manual_boarding(&self, booking_id: &str) -> Result<bool, DispatchError> {
        let resp: StatusResponse = self
            .post_json(
                "/api/driver/manual_boarding",
                &serde_json::json!({ "booking_id": booking_id }),
            )
            .await?;
        Ok(resp.status == "success")
    }

    async fn send_location(&self, upload: &LocationUpload) -> Result<(), DispatchError> {
        self.post_ack("/api/driver/location", upload).await
    }

    async fn start_trip(&self, req: &TripStartRequest) -> Result<TripStartResponse, DispatchError> {
        self.post_json("/api/driver/google/trip_start", req).await
    }

    async fn complete_trip(&self, req: &TripCompleteRequest) -> Result<bool, DispatchError> {
        let resp: StatusResponse = self.post_json("/api/driver/google/trip_complete", req).await?;
        Ok(resp.status == "success")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_pax() {
        let p: RawTripPassenger = serde_json::from_str(
            r#"{"trip_id":"t1","booking_id":"B1","pax":3}"#,
        )
        .unwrap();
        assert_eq!(p.pax, 3);

        let p: RawTripPassenger = serde_json::from_str(
            r#"{"trip_id":"t1","booking_id":"B1","pax":"2"}"#,
        )
        .unwrap();
        assert_eq!(p.pax, 2);

        let p: RawTripPassenger = serde_json::from_str(
            r#"{"trip_id":"t1","booking_id":"B1","pax":"abc"}"#,
        )
        .unwrap();
        assert_eq!(p.pax, 1);

        let p: RawTripPassenger = serde_json::from_str(
            r#"{"trip_id":"t1","booking_id":"B1","pax":0}"#,
        )
        .unwrap();
        assert_eq!(p.pax, 1);

        let p: RawTripPassenger = serde_json::from_str(
            r#"{"trip_id":"t1","booking_id":"B1","pax":null}"#,
        )
        .unwrap();
        assert_eq!(p.pax, 1);

        let p: RawTripPassenger =
            serde_json::from_str(r#"{"trip_id":"t1","booking_id":"B1"}"#).unwrap();
        assert_eq!(p.pax, 1);
    }

    #[test]
    fn test_payload_tolerates_missing_sections() {
        let payload: DriverDataPayload = serde_json::from_str(r#"{"trips":[]}"#).unwrap();
        assert!(payload.trips.is_empty());
        assert!(payload.trip_passengers.is_empty());
        assert!(payload.passenger_list.is_empty());
    }

    #[test]
    fn test_checkin_response() {
        let resp: CheckinResponse = serde_json::from_str(
            r#"{"status":"success","booking_id":"B1","name":"王小明","pax":2}"#,
        )
        .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.pax, 2);

        let resp: CheckinResponse =
            serde_json::from_str(r#"{"status":"error","message":"not found"}"#).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.message.as_deref(), Some("not found"));
    }

    #[test]
    fn test_location_upload_omits_absent_device_id() {
        let upload = LocationUpload {
            lat: 25.05,
            lng: 121.61,
            timestamp: 1,
            trip_id: None,
            location_provider: "primary".to_string(),
            device_id: None,
        };
        let json = serde_json::to_value(&upload).unwrap();
        assert!(json.get("device_id").is_none());
        assert!(json.get("trip_id").unwrap().is_null());
    }
}
