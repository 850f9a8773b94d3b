use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    alerts::{Alert, Differential, Reading},
    home::{HomeConfig, NotificationSettings, NotificationSettingsPatch, SensorConfig, Thresholds, ThresholdsPatch},
    notify::Notification,
    poll::PollState,
    telemetry::aggregate::{Bucket, SeriesStats},
};

/// Format epoch seconds in the server's local time zone.
pub fn local_datetime(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|utc| {
            utc.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// GET /api/history
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryPointDto {
    /// Bucket start, epoch seconds.
    pub timestamp: i64,
    pub datetime: String,
    /// Bucket average.
    pub temperature: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: Option<f64>,
}

impl From<&Bucket> for HistoryPointDto {
    fn from(b: &Bucket) -> Self {
        Self {
            timestamp: b.start,
            datetime: local_datetime(b.start),
            temperature: b.avg_temp,
            temp_min: b.min_temp,
            temp_max: b.max_temp,
            humidity: b.avg_humidity,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SensorHistoryDto {
    pub id: String,
    pub name: String,
    pub location: String,
    pub data: Vec<HistoryPointDto>,
    /// `null` when the range holds no data.
    pub stats: Option<SeriesStats>,
    pub thresholds: Thresholds,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub success: bool,
    pub range: String,
    pub start_time: i64,
    pub end_time: i64,
    pub sensors: Vec<SensorHistoryDto>,
}

// ---------------------------------------------------------------------------
// GET /api/snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct SensorSnapshotDto {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub location: String,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub timestamp: i64,
    pub datetime: String,
    pub thresholds: Thresholds,
    /// `"cold"` or `"hot"` while the sensor is out of bounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
}

impl From<&Reading<'_>> for SensorSnapshotDto {
    fn from(r: &Reading<'_>) -> Self {
        Self {
            id: r.sensor.id.clone(),
            name: r.sensor.name.clone(),
            icon: r.sensor.icon.clone(),
            location: r.sensor.location.clone().into(),
            temperature: r.snapshot.temperature,
            humidity: r.snapshot.humidity,
            timestamp: r.snapshot.timestamp,
            datetime: local_datetime(r.snapshot.timestamp),
            thresholds: r.sensor.thresholds,
            alert: r.alert.as_ref().map(|a| a.kind.badge().to_owned()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SnapshotResponse {
    pub success: bool,
    pub home_name: String,
    pub sensors: Vec<SensorSnapshotDto>,
    pub alerts: Vec<Alert>,
    pub differential: Option<Differential>,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// /api/subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionCountResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionDto {
    pub endpoint: Option<String>,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

/// Request body for `POST /api/subscriptions`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub subscription: Option<SubscriptionDto>,
}

/// Request body for `DELETE /api/subscriptions`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UnsubscribeRequest {
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: &str) -> Self {
        Self { success: true, message: message.to_owned() }
    }
}

// ---------------------------------------------------------------------------
// /api/thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct SensorThresholdsDto {
    pub id: String,
    pub name: String,
    pub location: String,
    pub thresholds: Thresholds,
}

impl From<&SensorConfig> for SensorThresholdsDto {
    fn from(s: &SensorConfig) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            location: s.location.clone().into(),
            thresholds: s.thresholds,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ThresholdsResponse {
    pub success: bool,
    pub sensors: Vec<SensorThresholdsDto>,
    pub notification_settings: NotificationSettings,
}

/// Request body for `POST /api/thresholds`. Either part may be sent alone.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateThresholdsRequest {
    pub sensor_id: Option<String>,
    pub thresholds: Option<ThresholdsPatch>,
    pub notification_settings: Option<NotificationSettingsPatch>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateThresholdsResponse {
    pub success: bool,
    pub message: String,
    pub config: HomeConfig,
}

// ---------------------------------------------------------------------------
// /api/notifications and /api/poll
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationsResponse {
    pub success: bool,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PollStateResponse {
    pub state: PollState,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WakeResponse {
    pub success: bool,
    /// `false` when the wake was folded into a running or pending check.
    pub accepted: bool,
}
