pub mod dispatcher;
pub mod inbox;
pub mod transport;

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{alerts::Alert, documents::Document};

pub use dispatcher::{DispatchReport, Dispatcher};
pub use inbox::Inbox;
pub use transport::{RoutingNotifier, WebhookNotifier};

// ---------------------------------------------------------------------------
// Notification payload
// ---------------------------------------------------------------------------

/// What a target receives for one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    /// Identical for repeated alerts of one sensor so clients can replace
    /// rather than stack them.
    pub tag: String,
    pub sensor_id: String,
    pub created_at: i64,
}

impl Notification {
    pub fn for_alert(alert: &Alert, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: "Temperature Alert".to_owned(),
            body: alert.message.clone(),
            tag: format!("alert-{}", alert.sensor_id),
            sensor_id: alert.sensor_id.clone(),
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A single failed delivery attempt. Never fatal for the cycle.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("delivery timed out")]
    Timeout,

    #[error("endpoint rejected delivery with HTTP {0}")]
    Rejected(u16),

    #[error("delivery request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, target: &Target, notification: &Notification) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Target registry document (`subscriptions.json`)
// ---------------------------------------------------------------------------

/// A registered notification destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub endpoint: String,
    #[serde(default, deserialize_with = "lenient_keys")]
    pub keys: BTreeMap<String, String>,
    pub subscribed_at: i64,
    /// Epoch seconds of the last successful delivery, per sensor id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_notified: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub subscriptions: Vec<Target>,
}

impl Document for Registry {
    fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for target in &self.subscriptions {
            if target.endpoint.is_empty() {
                return Err("subscription endpoint must not be empty".to_owned());
            }
            if !seen.insert(target.endpoint.as_str()) {
                return Err(format!("duplicate subscription endpoint: {:?}", target.endpoint));
            }
        }
        Ok(())
    }
}

impl Registry {
    pub fn target(&self, endpoint: &str) -> Option<&Target> {
        self.subscriptions.iter().find(|t| t.endpoint == endpoint)
    }

    /// Insert `endpoint` unless it is already registered. Returns whether a
    /// new entry was created.
    pub fn subscribe(&mut self, endpoint: &str, keys: BTreeMap<String, String>, now: i64) -> bool {
        if self.target(endpoint).is_some() {
            return false;
        }
        self.subscriptions.push(Target {
            endpoint: endpoint.to_owned(),
            keys,
            subscribed_at: now,
            last_notified: BTreeMap::new(),
        });
        true
    }

    /// Remove `endpoint` if present. Returns whether anything was removed.
    pub fn unsubscribe(&mut self, endpoint: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|t| t.endpoint != endpoint);
        self.subscriptions.len() != before
    }
}

// Registries written by older clients carry `"last_notified": null` and
// `"keys": []`.
fn null_as_empty<'de, D>(d: D) -> Result<BTreeMap<String, i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, i64>>::deserialize(d)?.unwrap_or_default())
}

fn lenient_keys<'de, D>(d: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keys {
        Map(BTreeMap<String, String>),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Keys::deserialize(d)? {
        Keys::Map(m) => m,
        Keys::Other(_) => BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;

    #[test]
    fn subscribe_is_idempotent() {
        let mut reg = Registry::default();
        assert!(reg.subscribe("local-1", BTreeMap::new(), 100));
        assert!(!reg.subscribe("local-1", BTreeMap::new(), 200));
        assert_eq!(reg.subscriptions.len(), 1);
        assert_eq!(reg.subscriptions[0].subscribed_at, 100);
    }

    #[test]
    fn unsubscribe_absent_is_harmless() {
        let mut reg = Registry::default();
        reg.subscribe("local-1", BTreeMap::new(), 100);
        assert!(!reg.unsubscribe("local-2"));
        assert!(reg.unsubscribe("local-1"));
        assert!(reg.subscriptions.is_empty());
    }

    #[test]
    fn legacy_registry_deserializes() {
        let reg: Registry = serde_json::from_str(
            r#"{"subscriptions":[{"endpoint":"local-1700000000000","keys":[],"subscribed_at":1700000000,"last_notified":null}]}"#,
        )
        .unwrap();
        let t = &reg.subscriptions[0];
        assert!(t.keys.is_empty());
        assert!(t.last_notified.is_empty());
    }

    #[test]
    fn duplicate_endpoints_fail_validation() {
        let t = Target {
            endpoint: "a".to_owned(),
            keys: BTreeMap::new(),
            subscribed_at: 0,
            last_notified: BTreeMap::new(),
        };
        let reg = Registry { subscriptions: vec![t.clone(), t] };
        assert!(reg.validate().is_err());
    }

    #[test]
    fn notification_mirrors_alert() {
        let alert = Alert {
            sensor_id: "s1".to_owned(),
            sensor_name: "Den".to_owned(),
            kind: AlertKind::TempHigh,
            value: 82.0,
            threshold: 78.0,
            message: "Den is too hot: 82°F (max: 78°F)".to_owned(),
        };
        let n = Notification::for_alert(&alert, 42);
        assert_eq!(n.title, "Temperature Alert");
        assert_eq!(n.tag, "alert-s1");
        assert_eq!(n.body, alert.message);
        assert_eq!(n.created_at, 42);
    }
}
