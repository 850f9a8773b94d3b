//! Request routing for everything that is not a live API handler.
//!
//! Requests fall into two categories, each with its own fetch policy:
//!
//! | Category | Policy        | Behaviour                                               |
//! |----------|---------------|---------------------------------------------------------|
//! | `Api`    | network-first | live handlers only; unmatched paths get the offline body |
//! | `Static` | cache-first   | in-memory cache, then `STATIC_DIR`, cached on success   |
use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::{fs, sync::RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCategory {
    Api,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    NetworkFirst,
    CacheFirst,
}

impl RequestCategory {
    pub fn classify(path: &str) -> Self {
        if path == "/api" || path.contains("/api/") {
            Self::Api
        } else {
            Self::Static
        }
    }

    pub fn policy(self) -> FetchPolicy {
        match self {
            Self::Api => FetchPolicy::NetworkFirst,
            Self::Static => FetchPolicy::CacheFirst,
        }
    }
}

/// Body returned when an API request cannot be answered live.
pub fn offline_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Offline", "message": "Unable to connect to server" })),
    )
        .into_response()
}

#[derive(Debug, Clone)]
struct CachedAsset {
    content_type: &'static str,
    bytes: Bytes,
}

/// Cache-first store of static files under `root`.
///
/// Wrapped in `Arc` so it can be cheaply cloned into router state.
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
    entries: Arc<RwLock<HashMap<String, CachedAsset>>>,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Arc::default(),
        }
    }

    /// Serve `path` from the cache, falling back to disk. Only successful
    /// reads are cached.
    async fn fetch(&self, path: &str) -> Option<CachedAsset> {
        let key = normalize(path)?;
        if let Some(hit) = self.entries.read().await.get(&key) {
            return Some(hit.clone());
        }

        let file = self.root.join(&key);
        let bytes = fs::read(&file).await.ok()?;
        let asset = CachedAsset {
            content_type: content_type(&file),
            bytes: Bytes::from(bytes),
        };
        debug!(path = %key, bytes = asset.bytes.len(), "static asset cached");
        self.entries.write().await.insert(key, asset.clone());
        Some(asset)
    }

    #[cfg(test)]
    async fn cached(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Map a request path to a relative file path under the asset root.
/// Rejects anything that could escape it.
fn normalize(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('/');
    let rel = if trimmed.is_empty() || trimmed.ends_with('/') {
        format!("{trimmed}index.html")
    } else {
        trimmed.to_owned()
    };
    Path::new(&rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(rel)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("webmanifest") => "application/manifest+json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Router fallback: applies the category's fetch policy.
pub async fn fallback(State(assets): State<AssetCache>, uri: Uri) -> Response {
    let path = uri.path();
    match RequestCategory::classify(path).policy() {
        FetchPolicy::NetworkFirst => offline_response(),
        FetchPolicy::CacheFirst => match assets.fetch(path).await {
            Some(asset) => ([(header::CONTENT_TYPE, asset.content_type)], asset.bytes).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
    }
}
