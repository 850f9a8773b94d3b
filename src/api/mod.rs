pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::{header, HeaderValue, Method},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    assets::{self, AssetCache},
    home::ConfigStore,
    notify::{Dispatcher, Inbox},
    poll::PollHandle,
    telemetry::TelemetryStore,
};
use handlers::ApiDoc;

/// Everything a handler can reach. Cloned per request, so every field is a
/// handle onto shared state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub telemetry: TelemetryStore,
    pub dispatcher: Arc<Dispatcher>,
    pub inbox: Inbox,
    pub poll: PollHandle,
    pub assets: AssetCache,
}

impl FromRef<AppState> for AssetCache {
    fn from_ref(state: &AppState) -> Self {
        state.assets.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let (api_router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/history", get(handlers::get_history))
        .route("/snapshot", get(handlers::get_snapshot))
        .route("/sensors", get(handlers::get_snapshot))
        .route(
            "/subscriptions",
            get(handlers::get_subscriptions)
                .post(handlers::subscribe)
                .delete(handlers::unsubscribe),
        )
        .route("/notifications", get(handlers::drain_notifications))
        .route(
            "/thresholds",
            get(handlers::get_thresholds).post(handlers::update_thresholds),
        )
        .route("/poll", get(handlers::get_poll_state))
        .route("/poll/wake", post(handlers::wake_poll))
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .nest("/api", api_router.layer(middleware::map_response(no_store)))
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
        .fallback(assets::fallback)
        .layer(cors)
        .with_state(state)
}

/// Live API responses must never be served from an intermediate cache.
async fn no_store(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}
