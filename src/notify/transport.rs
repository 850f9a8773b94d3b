use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{header::CONTENT_TYPE, Client};
use sha2::Sha256;
use tracing::debug;

use super::{Inbox, Notification, Notifier, Target, TransportError};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// POSTs the notification as JSON to an `http(s)://` endpoint.
///
/// Targets that registered an `auth` key get a signed request:
///
/// | Header        | Value                                          |
/// |---------------|------------------------------------------------|
/// | `t`           | 13-digit Unix timestamp in milliseconds        |
/// | `sign_method` | `HMAC-SHA256`                                  |
/// | `sign`        | uppercase hex HMAC-SHA256 of `t + body`, keyed by `auth` |
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, target: &Target, notification: &Notification) -> Result<(), TransportError> {
        let body = serde_json::to_vec(notification).map_err(|e| TransportError::Request(e.to_string()))?;

        let mut request = self
            .http
            .post(&target.endpoint)
            .header(CONTENT_TYPE, "application/json");

        if let Some(secret) = target.keys.get("auth") {
            let t = chrono::Utc::now().timestamp_millis().to_string();
            let sign = sign_payload(secret, &t, &body);
            request = request
                .header("t", t)
                .header("sign_method", "HMAC-SHA256")
                .header("sign", sign);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status.as_u16()));
        }

        debug!(endpoint = %target.endpoint, status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}

/// Uppercase hex HMAC-SHA256 over `t` followed by the raw body.
pub(crate) fn sign_payload(secret: &str, t: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(t.as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes()).to_uppercase()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Webhook for `http(s)://` endpoints, inbox for everything else.
#[derive(Clone)]
pub struct RoutingNotifier {
    webhook: WebhookNotifier,
    inbox: Inbox,
}

impl RoutingNotifier {
    pub fn new(webhook: WebhookNotifier, inbox: Inbox) -> Self {
        Self { webhook, inbox }
    }
}

fn is_web_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("http://") || endpoint.starts_with("https://")
}

#[async_trait]
impl Notifier for RoutingNotifier {
    async fn deliver(&self, target: &Target, notification: &Notification) -> Result<(), TransportError> {
        if is_web_endpoint(&target.endpoint) {
            self.webhook.deliver(target, notification).await
        } else {
            self.inbox.deliver(target, notification).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use axum::{
        body::Bytes,
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use tokio::{net::TcpListener, sync::Mutex};
    use uuid::Uuid;

    use super::*;

    type Seen = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

    async fn hook_server(status: StatusCode) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::default();

        let captured = seen.clone();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: Bytes| {
                let captured = captured.clone();
                async move {
                    captured.lock().await.push((headers, body));
                    status
                }
            }),
        );
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (format!("http://{addr}/hook"), seen)
    }

    fn target(endpoint: &str, auth: Option<&str>) -> Target {
        let mut keys = BTreeMap::new();
        if let Some(a) = auth {
            keys.insert("auth".to_owned(), a.to_owned());
        }
        Target {
            endpoint: endpoint.to_owned(),
            keys,
            subscribed_at: 0,
            last_notified: BTreeMap::new(),
        }
    }

    fn note() -> Notification {
        Notification {
            id: Uuid::new_v4(),
            title: "Temperature Alert".to_owned(),
            body: "Den is too hot: 82°F (max: 78°F)".to_owned(),
            tag: "alert-den".to_owned(),
            sensor_id: "den".to_owned(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn sign_is_uppercase_hex_and_body_sensitive() {
        let a = sign_payload("secret", "1588925778000", b"{}");
        let b = sign_payload("secret", "1588925778000", b"{\"x\":1}");
        assert_eq!(a.len(), 64);
        assert_eq!(a.to_uppercase(), a);
        assert_ne!(a, b);
        assert_eq!(a, sign_payload("secret", "1588925778000", b"{}"));
    }

    #[tokio::test]
    async fn webhook_posts_signed_json() {
        let (url, seen) = hook_server(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();
        let n = note();

        notifier.deliver(&target(&url, Some("k3y")), &n).await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        let (headers, body) = &seen[0];
        let sent: Notification = serde_json::from_slice(body).unwrap();
        assert_eq!(sent, n);

        let t = headers["t"].to_str().unwrap();
        assert_eq!(headers["sign_method"], "HMAC-SHA256");
        assert_eq!(headers["sign"].to_str().unwrap(), sign_payload("k3y", t, body));
    }

    #[tokio::test]
    async fn webhook_without_auth_is_unsigned() {
        let (url, seen) = hook_server(StatusCode::NO_CONTENT).await;
        let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();

        notifier.deliver(&target(&url, None), &note()).await.unwrap();

        let seen = seen.lock().await;
        assert!(!seen[0].0.contains_key("sign"));
    }

    #[tokio::test]
    async fn webhook_error_status_is_rejected() {
        let (url, _) = hook_server(StatusCode::GONE).await;
        let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();

        let err = notifier.deliver(&target(&url, None), &note()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(410)));
    }

    #[tokio::test]
    async fn routing_sends_opaque_endpoints_to_inbox() {
        let inbox = Inbox::new();
        let notifier = RoutingNotifier::new(
            WebhookNotifier::new(Duration::from_secs(5)).unwrap(),
            inbox.clone(),
        );

        notifier.deliver(&target("local-1700000000000", None), &note()).await.unwrap();

        assert_eq!(inbox.pending("local-1700000000000").await, 1);
        assert!(is_web_endpoint("https://example.com/hook"));
        assert!(!is_web_endpoint("local-1"));
    }
}
