//! Threshold evaluation over the latest snapshot of each sensor.
//!
//! Everything here is a pure function of its inputs; the caller decides
//! whether the resulting alerts go anywhere.
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    home::{Location, SensorConfig},
    telemetry::{aggregate::round1, Snapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TempLow,
    TempHigh,
}

impl AlertKind {
    /// Short label the dashboard shows on the sensor card.
    pub fn badge(self) -> &'static str {
        match self {
            AlertKind::TempLow => "cold",
            AlertKind::TempHigh => "hot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Alert {
    pub sensor_id: String,
    pub sensor_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Compare a snapshot against its sensor's bounds.
///
/// The low bound is checked first, so a sensor with inverted bounds reports
/// `TempLow` rather than both.
pub fn evaluate(sensor: &SensorConfig, snapshot: &Snapshot) -> Option<Alert> {
    let value = snapshot.temperature;
    let t = &sensor.thresholds;

    let (kind, threshold, message) = if value < t.temp_min {
        (
            AlertKind::TempLow,
            t.temp_min,
            format!("{} is too cold: {}°F (min: {}°F)", sensor.name, value, t.temp_min),
        )
    } else if value > t.temp_max {
        (
            AlertKind::TempHigh,
            t.temp_max,
            format!("{} is too hot: {}°F (max: {}°F)", sensor.name, value, t.temp_max),
        )
    } else {
        return None;
    };

    Some(Alert {
        sensor_id: sensor.id.clone(),
        sensor_name: sensor.name.clone(),
        kind,
        value,
        threshold,
        message,
    })
}

// ---------------------------------------------------------------------------
// Floor differential
// ---------------------------------------------------------------------------

/// Average upstairs temperature minus average of everything else.
/// Informational only; it never raises an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Differential {
    pub upstairs_avg: f64,
    pub downstairs_avg: f64,
    pub difference: f64,
}

/// `None` unless both groups have at least one reading.
pub fn differential<'a>(readings: impl IntoIterator<Item = (&'a Location, f64)>) -> Option<Differential> {
    let (mut up_sum, mut up_n, mut down_sum, mut down_n) = (0.0, 0u32, 0.0, 0u32);
    for (location, temperature) in readings {
        if location.is_upstairs() {
            up_sum += temperature;
            up_n += 1;
        } else {
            down_sum += temperature;
            down_n += 1;
        }
    }

    if up_n == 0 || down_n == 0 {
        return None;
    }

    let up = up_sum / f64::from(up_n);
    let down = down_sum / f64::from(down_n);
    Some(Differential {
        upstairs_avg: round1(up),
        downstairs_avg: round1(down),
        difference: round1(up - down),
    })
}

// ---------------------------------------------------------------------------
// Survey
// ---------------------------------------------------------------------------

/// One sensor's snapshot together with the alert it raised, if any.
#[derive(Debug, Clone)]
pub struct Reading<'a> {
    pub sensor: &'a SensorConfig,
    pub snapshot: Snapshot,
    pub alert: Option<Alert>,
}

/// Result of evaluating every sensor that has reported at least once.
#[derive(Debug, Clone)]
pub struct Survey<'a> {
    pub readings: Vec<Reading<'a>>,
    pub differential: Option<Differential>,
}

impl Survey<'_> {
    pub fn alerts(&self) -> Vec<Alert> {
        self.readings.iter().filter_map(|r| r.alert.clone()).collect()
    }
}

/// Evaluate each `(sensor, snapshot)` pair and compute the differential.
pub fn survey<'a>(snapshots: Vec<(&'a SensorConfig, Snapshot)>) -> Survey<'a> {
    let readings: Vec<Reading<'a>> = snapshots
        .into_iter()
        .map(|(sensor, snapshot)| {
            let alert = evaluate(sensor, &snapshot);
            Reading { sensor, snapshot, alert }
        })
        .collect();

    let differential = differential(
        readings
            .iter()
            .map(|r| (&r.sensor.location, r.snapshot.temperature)),
    );

    Survey { readings, differential }
}
