use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    time,
};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::{
    alerts,
    error::Result,
    home::ConfigStore,
    notify::{DispatchReport, Dispatcher},
    telemetry::TelemetryStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// Waiting for the next tick or a wake signal.
    Idle,
    /// Snapshot → evaluate → dispatch in flight.
    Checking,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub sensors: usize,
    pub alerts: usize,
    /// `None` when notifications are disabled.
    pub dispatch: Option<DispatchReport>,
}

/// Cheap, cloneable control surface for a running [`PollLoop`].
#[derive(Debug, Clone)]
pub struct PollHandle {
    wake: mpsc::Sender<()>,
    state: watch::Receiver<PollState>,
}

impl PollHandle {
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Ask for an immediate check. Returns `false` when the request was
    /// coalesced: a cycle is already running, or a wake is already pending.
    pub fn wake(&self) -> bool {
        if self.state() == PollState::Checking {
            return false;
        }
        self.wake.try_send(()).is_ok()
    }
}

/// Drives snapshot → evaluate → dispatch on a fixed period.
///
/// At most one cycle is ever in flight. The period is re-read from the
/// configuration document every time the loop goes idle, so edits to
/// `check_interval_minutes` apply from the next wait on.
pub struct PollLoop {
    config: Arc<ConfigStore>,
    telemetry: TelemetryStore,
    dispatcher: Arc<Dispatcher>,
    fallback_period: Duration,
    wake_rx: mpsc::Receiver<()>,
    state_tx: watch::Sender<PollState>,
}

impl PollLoop {
    pub fn new(
        config: Arc<ConfigStore>,
        telemetry: TelemetryStore,
        dispatcher: Arc<Dispatcher>,
        fallback_period: Duration,
    ) -> (Self, PollHandle) {
        // Capacity 1: a second wake while one is pending is dropped.
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);

        let poll = Self {
            config,
            telemetry,
            dispatcher,
            fallback_period,
            wake_rx,
            state_tx,
        };
        let handle = PollHandle { wake: wake_tx, state: state_rx };
        (poll, handle)
    }

    /// Runs until `shutdown` flips (or its sender goes away). A cycle that is
    /// in flight at that moment is abandoned as-is.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(fallback_secs = self.fallback_period.as_secs(), "Poll loop started");
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                _ = time::sleep(wait) => {}
                Some(()) = self.wake_rx.recv() => debug!("Poll loop woken early"),
                _ = shutdown.changed() => break,
            }

            self.state_tx.send_replace(PollState::Checking);
            let now = chrono::Utc::now().timestamp();

            tokio::select! {
                result = self.run_once(now) => match result {
                    Ok(report) => log_cycle(&report),
                    Err(e) => error!(error = %e, "Poll cycle failed"),
                },
                _ = shutdown.changed() => {
                    info!("Shutdown requested during poll cycle; abandoning it");
                    break;
                }
            }

            // Wakes that raced with the finished cycle are already satisfied.
            while self.wake_rx.try_recv().is_ok() {}
            self.state_tx.send_replace(PollState::Idle);
            wait = self.period().await;
        }

        self.state_tx.send_replace(PollState::Idle);
        info!("Poll loop stopped");
    }

    /// One full check. The configuration is loaded fresh, so threshold edits
    /// take effect on the very next cycle.
    pub async fn run_once(&self, now: i64) -> Result<CycleReport> {
        let config = self.config.load().await?;
        let snapshots = self.telemetry.latest_all(&config.sensors).await?;
        let survey = alerts::survey(snapshots);
        let alerts = survey.alerts();

        let mut report = CycleReport {
            sensors: survey.readings.len(),
            alerts: alerts.len(),
            dispatch: None,
        };

        let settings = &config.notification_settings;
        if !settings.enabled {
            debug!(alerts = alerts.len(), "Notifications disabled; skipping dispatch");
            return Ok(report);
        }

        report.dispatch = Some(
            self.dispatcher
                .dispatch(&alerts, settings.cooldown_secs(), now)
                .await?,
        );
        Ok(report)
    }

    async fn period(&self) -> Duration {
        match self.config.load().await {
            Ok(config) => config.notification_settings.check_interval(),
            Err(e) => {
                warn!(error = %e, "Cannot read check interval; using fallback period");
                self.fallback_period
            }
        }
    }
}

fn log_cycle(report: &CycleReport) {
    match &report.dispatch {
        Some(d) => info!(
            sensors = report.sensors,
            alerts = report.alerts,
            delivered = d.delivered.len(),
            suppressed = d.suppressed,
            failed = d.failed,
            "Poll cycle complete"
        ),
        None => info!(
            sensors = report.sensors,
            alerts = report.alerts,
            "Poll cycle complete (notifications disabled)"
        ),
    }
}
