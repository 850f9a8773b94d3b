use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use serde::Serialize;
use tokio::{sync::Mutex, time};
use tracing::{debug, info, warn};

use super::{Notification, Notifier, Registry, TransportError};
use crate::{
    alerts::Alert,
    documents::DocumentStore,
    error::{Error, Result},
};

/// One successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub endpoint: String,
    pub sensor_id: String,
}

/// What happened to each `(alert, target)` pair of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: Vec<Delivery>,
    pub suppressed: usize,
    pub failed: usize,
}

/// Owns the target registry and decides which alerts reach which targets.
///
/// Dispatches are serialized by their own lock, which is held from the
/// cooldown decision until the delivery stamps are saved, so two overlapping
/// dispatches can never both see an expired cooldown for the same
/// `(endpoint, sensor)` and both deliver. Every registry write goes through
/// [`DocumentStore::update`] and is retried when the file changed on disk.
pub struct Dispatcher {
    registry: DocumentStore<Registry>,
    notifier: Arc<dyn Notifier>,
    delivery_timeout: Duration,
    dispatch_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        registry: DocumentStore<Registry>,
        notifier: Arc<dyn Notifier>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            notifier,
            delivery_timeout,
            dispatch_lock: Mutex::new(()),
        }
    }

    /// Number of registered targets.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.registry.load().await?.subscriptions.len())
    }

    /// Register `endpoint`. Re-registering an existing endpoint changes
    /// nothing. Returns whether a new entry was created.
    pub async fn subscribe(
        &self,
        endpoint: &str,
        keys: BTreeMap<String, String>,
        now: i64,
    ) -> Result<bool> {
        if endpoint.trim().is_empty() {
            return Err(Error::Validation("Invalid subscription endpoint".to_owned()));
        }

        if self.registry.load().await?.target(endpoint).is_some() {
            return Ok(false);
        }
        let (_, added) = self
            .registry
            .update(|doc| Ok(doc.subscribe(endpoint, keys.clone(), now)))
            .await?;
        if added {
            info!(endpoint = %endpoint, "notification target registered");
        }
        Ok(added)
    }

    /// Remove `endpoint`. Unknown endpoints are not an error. Returns whether
    /// anything was removed.
    pub async fn unsubscribe(&self, endpoint: &str) -> Result<bool> {
        if self.registry.load().await?.target(endpoint).is_none() {
            return Ok(false);
        }
        let (_, removed) = self
            .registry
            .update(|doc| Ok(doc.unsubscribe(endpoint)))
            .await?;
        if removed {
            info!(endpoint = %endpoint, "notification target removed");
        }
        Ok(removed)
    }

    /// Deliver `alerts` to every registered target whose cooldown for the
    /// alert's sensor has elapsed.
    ///
    /// A pair is suppressed while `now - last_notified < cooldown_secs`.
    /// Every attempt is bounded by the delivery timeout; a failing target is
    /// logged and skipped without affecting the others, and its cooldown is
    /// left untouched so the next cycle retries it.
    pub async fn dispatch(&self, alerts: &[Alert], cooldown_secs: i64, now: i64) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if alerts.is_empty() {
            return Ok(report);
        }

        let _guard = self.dispatch_lock.lock().await;
        let registry = self.registry.load().await?;

        let mut seen = HashSet::new();
        let mut attempts = Vec::new();
        for alert in alerts {
            for target in &registry.subscriptions {
                if !seen.insert((target.endpoint.as_str(), alert.sensor_id.as_str())) {
                    continue;
                }
                match target.last_notified.get(&alert.sensor_id) {
                    Some(&last) if now - last < cooldown_secs => {
                        debug!(endpoint = %target.endpoint, sensor_id = %alert.sensor_id, last, "alert suppressed by cooldown");
                        report.suppressed += 1;
                    }
                    _ => attempts.push((target, Notification::for_alert(alert, now))),
                }
            }
        }

        let outcomes = join_all(attempts.iter().map(|(target, notification)| async move {
            match time::timeout(self.delivery_timeout, self.notifier.deliver(target, notification)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        }))
        .await;

        for ((target, notification), outcome) in attempts.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered.push(Delivery {
                    endpoint: target.endpoint.clone(),
                    sensor_id: notification.sensor_id,
                }),
                Err(e) => {
                    warn!(endpoint = %target.endpoint, sensor_id = %notification.sensor_id, error = %e, "notification delivery failed");
                    report.failed += 1;
                }
            }
        }

        if !report.delivered.is_empty() {
            // Stamps are merged into a fresh read so that targets added or
            // removed during delivery are kept as they are.
            self.registry
                .update(|doc| {
                    for d in &report.delivered {
                        if let Some(target) = doc.subscriptions.iter_mut().find(|t| t.endpoint == d.endpoint) {
                            target.last_notified.insert(d.sensor_id.clone(), now);
                        }
                    }
                    Ok(())
                })
                .await?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{alerts::AlertKind, notify::Target};

    /// Records deliveries; fails or stalls for configured endpoints.
    #[derive(Default)]
    struct FakeNotifier {
        sent: StdMutex<Vec<(String, String)>>,
        failing: HashSet<String>,
        stalling: HashSet<String>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn deliver(&self, target: &Target, n: &Notification) -> Result<(), TransportError> {
            if self.stalling.contains(&target.endpoint) {
                time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.contains(&target.endpoint) {
                return Err(TransportError::Rejected(500));
            }
            self.sent
                .lock()
                .unwrap()
                .push((target.endpoint.clone(), n.sensor_id.clone()));
            Ok(())
        }
    }

    impl FakeNotifier {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    fn alert(sensor_id: &str) -> Alert {
        Alert {
            sensor_id: sensor_id.to_owned(),
            sensor_name: sensor_id.to_owned(),
            kind: AlertKind::TempHigh,
            value: 82.0,
            threshold: 78.0,
            message: format!("{sensor_id} is too hot: 82°F (max: 78°F)"),
        }
    }

    fn dispatcher(dir: &tempfile::TempDir, notifier: Arc<FakeNotifier>) -> Dispatcher {
        Dispatcher::new(
            DocumentStore::with_default(dir.path().join("subscriptions.json")),
            notifier,
            Duration::from_millis(200),
        )
    }

    const COOLDOWN_MINUTES: i64 = 30;
    const COOLDOWN: i64 = COOLDOWN_MINUTES * 60;

    #[tokio::test]
    async fn subscribe_twice_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir, Arc::default());

        assert!(d.subscribe("local-1", BTreeMap::new(), 10).await.unwrap());
        assert!(!d.subscribe("local-1", BTreeMap::new(), 20).await.unwrap());
        assert_eq!(d.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir, Arc::default());
        let err = d.subscribe("  ", BTreeMap::new(), 10).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir, Arc::default());
        d.subscribe("local-1", BTreeMap::new(), 10).await.unwrap();

        assert!(d.unsubscribe("local-1").await.unwrap());
        assert!(!d.unsubscribe("local-1").await.unwrap());
        assert_eq!(d.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cooldown_law() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeNotifier::default());
        let d = dispatcher(&dir, fake.clone());
        d.subscribe("local-1", BTreeMap::new(), 0).await.unwrap();

        let t = 1_000_000;
        let r = d.dispatch(&[alert("s1")], COOLDOWN, t).await.unwrap();
        assert_eq!(r.delivered.len(), 1);

        let r = d.dispatch(&[alert("s1")], COOLDOWN, t + COOLDOWN - 1).await.unwrap();
        assert!(r.delivered.is_empty());
        assert_eq!(r.suppressed, 1);

        let r = d.dispatch(&[alert("s1")], COOLDOWN, t + COOLDOWN + 1).await.unwrap();
        assert_eq!(r.delivered.len(), 1);
        assert_eq!(fake.sent().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_is_per_sensor_and_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeNotifier::default());
        let d = dispatcher(&dir, fake.clone());
        d.subscribe("local-1", BTreeMap::new(), 0).await.unwrap();

        d.dispatch(&[alert("s1")], COOLDOWN, 100).await.unwrap();

        // A different sensor is not held back by s1's cooldown.
        let r = d.dispatch(&[alert("s1"), alert("s2")], COOLDOWN, 200).await.unwrap();
        assert_eq!(r.delivered, vec![Delivery { endpoint: "local-1".into(), sensor_id: "s2".into() }]);
        assert_eq!(r.suppressed, 1);

        // A newly registered target gets s1 even though local-1 is cooling down.
        d.subscribe("local-2", BTreeMap::new(), 250).await.unwrap();
        let r = d.dispatch(&[alert("s1")], COOLDOWN, 300).await.unwrap();
        assert_eq!(r.delivered, vec![Delivery { endpoint: "local-2".into(), sensor_id: "s1".into() }]);
    }

    #[tokio::test]
    async fn cooldown_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeNotifier::default());
        {
            let d = dispatcher(&dir, fake.clone());
            d.subscribe("local-1", BTreeMap::new(), 0).await.unwrap();
            d.dispatch(&[alert("s1")], COOLDOWN, 100).await.unwrap();
        }

        let d = dispatcher(&dir, fake.clone());
        let r = d.dispatch(&[alert("s1")], COOLDOWN, 160).await.unwrap();
        assert_eq!(r.suppressed, 1);
        assert_eq!(fake.sent().len(), 1);
    }

    #[tokio::test]
    async fn failing_target_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeNotifier {
            failing: HashSet::from(["bad".to_owned()]),
            stalling: HashSet::from(["slow".to_owned()]),
            ..Default::default()
        });
        let d = dispatcher(&dir, fake.clone());
        for e in ["bad", "slow", "good"] {
            d.subscribe(e, BTreeMap::new(), 0).await.unwrap();
        }

        let r = d.dispatch(&[alert("s1")], COOLDOWN, 100).await.unwrap();
        assert_eq!(r.failed, 2);
        assert_eq!(r.delivered, vec![Delivery { endpoint: "good".into(), sensor_id: "s1".into() }]);

        // Failed targets were not put on cooldown and are retried.
        let r = d.dispatch(&[alert("s1")], COOLDOWN, 160).await.unwrap();
        assert_eq!(r.failed, 2);
        assert_eq!(r.suppressed, 1);
    }

    #[tokio::test]
    async fn concurrent_dispatches_deliver_once() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeNotifier::default());
        let d = Arc::new(dispatcher(&dir, fake.clone()));
        d.subscribe("local-1", BTreeMap::new(), 0).await.unwrap();

        let alerts = [alert("s1")];
        let (a, b) = tokio::join!(
            d.dispatch(&alerts, COOLDOWN, 100),
            d.dispatch(&alerts, COOLDOWN, 100)
        );
        let delivered = a.unwrap().delivered.len() + b.unwrap().delivered.len();
        assert_eq!(delivered, 1);
        assert_eq!(fake.sent().len(), 1);
    }

    /// Rewrites the registry on disk during its first delivery, as another
    /// process registering a target would.
    struct RewritingNotifier {
        path: std::path::PathBuf,
        rewritten: std::sync::atomic::AtomicBool,
        sent: StdMutex<usize>,
    }

    #[async_trait]
    impl Notifier for RewritingNotifier {
        async fn deliver(&self, _target: &Target, _n: &Notification) -> Result<(), TransportError> {
            if !self.rewritten.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let mut raw: serde_json::Value =
                    serde_json::from_slice(&std::fs::read(&self.path).unwrap()).unwrap();
                raw["revision"] = (raw["revision"].as_u64().unwrap() + 1).into();
                raw["subscriptions"].as_array_mut().unwrap().push(serde_json::json!({
                    "endpoint": "local-2", "keys": {}, "subscribed_at": 50
                }));
                std::fs::write(&self.path, serde_json::to_vec(&raw).unwrap()).unwrap();
            }
            *self.sent.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn external_write_during_delivery_keeps_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let notifier = Arc::new(RewritingNotifier {
            path: path.clone(),
            rewritten: Default::default(),
            sent: StdMutex::new(0),
        });
        let d = Dispatcher::new(DocumentStore::with_default(&path), notifier.clone(), Duration::from_secs(1));
        d.subscribe("local-1", BTreeMap::new(), 0).await.unwrap();

        let r = d.dispatch(&[alert("s1")], COOLDOWN, 100).await.unwrap();
        assert_eq!(r.delivered.len(), 1);

        // The external registration survived and local-1 is cooling down.
        let r = d.dispatch(&[alert("s1")], COOLDOWN, 160).await.unwrap();
        assert_eq!(r.suppressed, 1);
        assert_eq!(r.delivered, vec![Delivery { endpoint: "local-2".into(), sensor_id: "s1".into() }]);
        assert_eq!(*notifier.sent.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn registry_writes_follow_external_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let d = dispatcher(&dir, Arc::default());
        d.subscribe("local-1", BTreeMap::new(), 0).await.unwrap();

        let mut raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["revision"] = 7.into();
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert!(d.subscribe("local-2", BTreeMap::new(), 10).await.unwrap());
        assert!(d.unsubscribe("local-1").await.unwrap());
        assert_eq!(d.count().await.unwrap(), 1);
        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["revision"], 9);
    }

    #[tokio::test]
    async fn no_alerts_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir, Arc::default());
        let r = d.dispatch(&[], COOLDOWN, 100).await.unwrap();
        assert_eq!(r, DispatchReport::default());
        assert!(!dir.path().join("subscriptions.json").exists());
    }
}
