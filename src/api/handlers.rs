use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use utoipa::OpenApi;

use super::{
    dto::*,
    errors::{bad_body, bad_query, AppError},
    AppState,
};
use crate::{
    alerts::{self, Alert, AlertKind, Differential},
    error::Error,
    home::{HomeConfig, NotificationSettings, NotificationSettingsPatch, SensorConfig, Thresholds, ThresholdsPatch},
    notify::Notification,
    poll::PollState,
    telemetry::aggregate::{aggregate, summarize, HistoryRange, SeriesStats},
};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub sensor: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationsParams {
    pub endpoint: String,
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Bucketed history for one sensor or all of them.
///
/// Unknown `range` values fall back to `24h`; the response echoes the range
/// actually used.
#[utoipa::path(
    get,
    path = "/api/history",
    params(
        ("sensor" = Option<String>, Query, description = "Sensor id or `all` (default)"),
        ("range"  = Option<String>, Query, description = "One of 6h, 12h, 24h, 7d, 30d (default 24h)"),
    ),
    responses(
        (status = 200, description = "Aggregated history", body = HistoryResponse),
        (status = 400, description = "No sensor matches the selector"),
        (status = 500, description = "Configuration or telemetry store unavailable"),
    ),
    tag = "telemetry"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let range = HistoryRange::parse_or_default(params.range.as_deref().unwrap_or_default());
    let selector = params.sensor.as_deref().unwrap_or("all");

    let config = state.config.load().await?;
    let selected = config.select(selector);
    if selected.is_empty() {
        return Err(Error::Validation("Sensor not found".to_owned()).into());
    }

    let now = Utc::now().timestamp();
    let start_time = range.start_time(now);

    let mut sensors = Vec::with_capacity(selected.len());
    for sensor in selected {
        let samples = state.telemetry.samples_since(sensor.channel, start_time).await?;
        let buckets = aggregate(&samples, range, now);
        sensors.push(SensorHistoryDto {
            id: sensor.id.clone(),
            name: sensor.name.clone(),
            location: sensor.location.clone().into(),
            stats: summarize(&buckets),
            data: buckets.iter().map(Into::into).collect(),
            thresholds: sensor.thresholds,
        });
    }

    Ok(Json(HistoryResponse {
        success: true,
        range: range.label().to_owned(),
        start_time,
        end_time: now,
        sensors,
    }))
}

/// Latest reading of every sensor with its alert state and the
/// upstairs/downstairs differential. Also served at `/api/sensors`.
#[utoipa::path(
    get,
    path = "/api/snapshot",
    responses(
        (status = 200, description = "Current readings", body = SnapshotResponse),
        (status = 500, description = "Configuration or telemetry store unavailable"),
    ),
    tag = "telemetry"
)]
pub async fn get_snapshot(State(state): State<AppState>) -> Result<Json<SnapshotResponse>, AppError> {
    let config = state.config.load().await?;
    let snapshots = state.telemetry.latest_all(&config.sensors).await?;
    let survey = alerts::survey(snapshots);

    Ok(Json(SnapshotResponse {
        success: true,
        home_name: config.home_name.clone(),
        sensors: survey.readings.iter().map(Into::into).collect(),
        alerts: survey.alerts(),
        differential: survey.differential,
        timestamp: Utc::now().timestamp(),
    }))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/subscriptions",
    responses(
        (status = 200, description = "Number of registered targets", body = SubscriptionCountResponse),
        (status = 500, description = "Registry unreadable"),
    ),
    tag = "subscriptions"
)]
pub async fn get_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<SubscriptionCountResponse>, AppError> {
    let count = state.dispatcher.count().await?;
    Ok(Json(SubscriptionCountResponse { success: true, count }))
}

/// Register a notification target. Registering the same endpoint twice is a
/// no-op.
#[utoipa::path(
    post,
    path = "/api/subscriptions",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Target registered", body = MessageResponse),
        (status = 400, description = "Missing subscription or endpoint"),
    ),
    tag = "subscriptions"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload.map_err(bad_body)?;
    let sub = req
        .subscription
        .ok_or_else(|| Error::Validation("Invalid subscription data".to_owned()))?;
    let endpoint = sub.endpoint.unwrap_or_default();

    state
        .dispatcher
        .subscribe(&endpoint, sub.keys, Utc::now().timestamp())
        .await?;
    Ok(Json(MessageResponse::ok("Subscription saved")))
}

/// Remove a notification target. Unknown endpoints succeed silently.
#[utoipa::path(
    delete,
    path = "/api/subscriptions",
    request_body = UnsubscribeRequest,
    responses(
        (status = 200, description = "Target removed", body = MessageResponse),
        (status = 400, description = "Missing endpoint"),
    ),
    tag = "subscriptions"
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload.map_err(bad_body)?;
    let endpoint = req
        .endpoint
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| Error::Validation("Invalid request".to_owned()))?;

    if state.dispatcher.unsubscribe(&endpoint).await? {
        let dropped = state.inbox.discard(&endpoint).await;
        if dropped > 0 {
            info!(endpoint = %endpoint, dropped, "discarded queued notifications");
        }
    }
    Ok(Json(MessageResponse::ok("Unsubscribed successfully")))
}

/// Drain the in-process inbox of a non-HTTP target.
#[utoipa::path(
    get,
    path = "/api/notifications",
    params(
        ("endpoint" = String, Query, description = "Target endpoint whose queue to drain"),
    ),
    responses(
        (status = 200, description = "Queued notifications, oldest first", body = NotificationsResponse),
        (status = 400, description = "Missing endpoint"),
    ),
    tag = "subscriptions"
)]
pub async fn drain_notifications(
    State(state): State<AppState>,
    params: Result<Query<NotificationsParams>, QueryRejection>,
) -> Result<Json<NotificationsResponse>, AppError> {
    let Query(params) = params.map_err(bad_query)?;
    let notifications = state.inbox.drain(&params.endpoint).await;
    Ok(Json(NotificationsResponse { success: true, notifications }))
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/thresholds",
    responses(
        (status = 200, description = "Per-sensor thresholds and notification settings", body = ThresholdsResponse),
        (status = 500, description = "Configuration unavailable"),
    ),
    tag = "thresholds"
)]
pub async fn get_thresholds(State(state): State<AppState>) -> Result<Json<ThresholdsResponse>, AppError> {
    let config = state.config.load().await?;
    Ok(Json(ThresholdsResponse {
        success: true,
        sensors: config.sensors.iter().map(Into::into).collect(),
        notification_settings: config.notification_settings,
    }))
}

/// Patch one sensor's thresholds and/or the notification settings.
///
/// Only the supplied fields change. The update is validated as a whole and
/// nothing is written if any part is rejected.
#[utoipa::path(
    post,
    path = "/api/thresholds",
    request_body = UpdateThresholdsRequest,
    responses(
        (status = 200, description = "Updated configuration", body = UpdateThresholdsResponse),
        (status = 400, description = "Nothing to update or invalid values"),
        (status = 404, description = "Unknown sensor"),
        (status = 409, description = "Concurrent modification"),
    ),
    tag = "thresholds"
)]
pub async fn update_thresholds(
    State(state): State<AppState>,
    payload: Result<Json<UpdateThresholdsRequest>, JsonRejection>,
) -> Result<Json<UpdateThresholdsResponse>, AppError> {
    let Json(req) = payload.map_err(bad_body)?;
    let sensor_patch = req.sensor_id.as_deref().zip(req.thresholds.as_ref());
    if sensor_patch.is_none() && req.notification_settings.is_none() {
        return Err(Error::Validation(
            "Provide sensor_id with thresholds, or notification_settings".to_owned(),
        )
        .into());
    }

    let (config, ()) = state
        .config
        .update(|doc| {
            if let Some((sensor_id, patch)) = sensor_patch {
                doc.update_thresholds(sensor_id, patch)?;
            }
            if let Some(patch) = &req.notification_settings {
                doc.update_notification_settings(patch)?;
            }
            Ok(())
        })
        .await?;

    info!(sensor_id = ?req.sensor_id, "thresholds updated");
    Ok(Json(UpdateThresholdsResponse {
        success: true,
        message: "Thresholds updated successfully".to_owned(),
        config,
    }))
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/poll",
    responses(
        (status = 200, description = "Current poll loop state", body = PollStateResponse),
    ),
    tag = "poll"
)]
pub async fn get_poll_state(State(state): State<AppState>) -> Json<PollStateResponse> {
    Json(PollStateResponse { state: state.poll.state() })
}

/// Request an immediate check. Coalesces with a running or pending one.
#[utoipa::path(
    post,
    path = "/api/poll/wake",
    responses(
        (status = 200, description = "Whether a new check was scheduled", body = WakeResponse),
    ),
    tag = "poll"
)]
pub async fn wake_poll(State(state): State<AppState>) -> Json<WakeResponse> {
    Json(WakeResponse { success: true, accepted: state.poll.wake() })
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_history,
        get_snapshot,
        get_subscriptions,
        subscribe,
        unsubscribe,
        drain_notifications,
        get_thresholds,
        update_thresholds,
        get_poll_state,
        wake_poll,
        health,
    ),
    components(schemas(
        HistoryResponse, SensorHistoryDto, HistoryPointDto, SeriesStats,
        SnapshotResponse, SensorSnapshotDto, Alert, AlertKind, Differential,
        SubscriptionCountResponse, SubscribeRequest, SubscriptionDto, UnsubscribeRequest, MessageResponse,
        NotificationsResponse, Notification,
        ThresholdsResponse, SensorThresholdsDto, UpdateThresholdsRequest, UpdateThresholdsResponse,
        Thresholds, ThresholdsPatch, NotificationSettings, NotificationSettingsPatch,
        HomeConfig, SensorConfig,
        PollStateResponse, WakeResponse, PollState,
    )),
    tags(
        (name = "telemetry",     description = "Sensor history and current readings"),
        (name = "subscriptions", description = "Notification targets"),
        (name = "thresholds",    description = "Alert bounds and notification settings"),
        (name = "poll",          description = "Background check loop"),
        (name = "system",        description = "System endpoints"),
    ),
    info(
        title = "Home Climate API",
        version = "0.1.0",
        description = "Temperature and humidity history, alerts and notification targets"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
