use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    documents::{Document, DocumentStore},
    error::{Error, Result},
};

/// The persisted configuration document (`sensors.json`).
pub type ConfigStore = DocumentStore<HomeConfig>;

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Archive column pair a sensor is recorded in.
///
/// This is the only place column names come from: a sensor's channel is
/// resolved when the configuration document is deserialized, so an unknown
/// channel makes the whole document invalid instead of reaching a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Inside,
    Outside,
    Extra1,
    Extra2,
    Extra3,
}

impl Channel {
    pub fn temperature_column(self) -> &'static str {
        match self {
            Channel::Inside => "inTemp",
            Channel::Outside => "outTemp",
            Channel::Extra1 => "extraTemp1",
            Channel::Extra2 => "extraTemp2",
            Channel::Extra3 => "extraTemp3",
        }
    }

    pub fn humidity_column(self) -> &'static str {
        match self {
            Channel::Inside => "inHumidity",
            Channel::Outside => "outHumidity",
            Channel::Extra1 => "extraHumid1",
            Channel::Extra2 => "extraHumid2",
            Channel::Extra3 => "extraHumid3",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Inside => "inside",
            Channel::Outside => "outside",
            Channel::Extra1 => "extra1",
            Channel::Extra2 => "extra2",
            Channel::Extra3 => "extra3",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Where a sensor sits. Only `upstairs` has meaning for the differential;
/// anything else is grouped with `downstairs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Location {
    Upstairs,
    Downstairs,
    Other(String),
}

impl Location {
    pub fn is_upstairs(&self) -> bool {
        matches!(self, Location::Upstairs)
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        match s.as_str() {
            "upstairs" => Self::Upstairs,
            "downstairs" => Self::Downstairs,
            _ => Self::Other(s),
        }
    }
}

impl From<Location> for String {
    fn from(l: Location) -> Self {
        match l {
            Location::Upstairs => "upstairs".to_owned(),
            Location::Downstairs => "downstairs".to_owned(),
            Location::Other(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Alert bounds for one sensor, in °F / %RH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Thresholds {
    pub temp_min: f64,
    pub temp_max: f64,
    #[serde(default = "default_humidity_min")]
    pub humidity_min: f64,
    #[serde(default = "default_humidity_max")]
    pub humidity_max: f64,
}

fn default_humidity_min() -> f64 {
    30.0
}

fn default_humidity_max() -> f64 {
    60.0
}

/// Partial threshold update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ThresholdsPatch {
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
}

impl Thresholds {
    fn all_finite(&self) -> bool {
        [self.temp_min, self.temp_max, self.humidity_min, self.humidity_max]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Merge `patch` into a copy of these thresholds and check the result.
    pub fn patched(&self, patch: &ThresholdsPatch) -> Result<Self> {
        let next = Self {
            temp_min: patch.temp_min.unwrap_or(self.temp_min),
            temp_max: patch.temp_max.unwrap_or(self.temp_max),
            humidity_min: patch.humidity_min.unwrap_or(self.humidity_min),
            humidity_max: patch.humidity_max.unwrap_or(self.humidity_max),
        };

        if !next.all_finite() {
            return Err(Error::Validation("Thresholds must be finite numbers".to_owned()));
        }
        if next.temp_min >= next.temp_max {
            return Err(Error::Validation(format!(
                "temp_min ({}) must be below temp_max ({})",
                next.temp_min, next.temp_max
            )));
        }
        if next.humidity_min > next.humidity_max {
            return Err(Error::Validation(format!(
                "humidity_min ({}) must not exceed humidity_max ({})",
                next.humidity_min, next.humidity_max
            )));
        }
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Notification settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_check_interval() -> u32 {
    1
}

fn default_cooldown() -> u32 {
    30
}

fn default_enabled() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            check_interval_minutes: default_check_interval(),
            cooldown_minutes: default_cooldown(),
            enabled: default_enabled(),
        }
    }
}

impl NotificationSettings {
    /// Time the poll loop waits between checks.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_interval_minutes.max(1)) * 60)
    }

    /// Minimum seconds between two deliveries to the same (target, sensor).
    pub fn cooldown_secs(&self) -> i64 {
        i64::from(self.cooldown_minutes) * 60
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NotificationSettingsPatch {
    pub check_interval_minutes: Option<u32>,
    pub cooldown_minutes: Option<u32>,
    pub enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Sensors and the document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorConfig {
    pub id: String,
    pub name: String,
    #[schema(value_type = String)]
    pub location: Location,
    #[serde(default)]
    pub icon: String,
    pub channel: Channel,
    pub thresholds: Thresholds,
    /// Keys this service does not interpret, written back untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HomeConfig {
    pub home_name: String,
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Document for HomeConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.trim().is_empty() {
                return Err("sensor id must not be empty".to_owned());
            }
            if !seen.insert(sensor.id.as_str()) {
                return Err(format!("duplicate sensor id: {:?}", sensor.id));
            }
            if !sensor.thresholds.all_finite() {
                return Err(format!("sensor {:?} has non-finite thresholds", sensor.id));
            }
        }
        Ok(())
    }
}

impl HomeConfig {
    pub fn sensor(&self, id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// `"all"` selects every configured sensor; anything else selects the
    /// sensor with that id, if any.
    pub fn select(&self, selector: &str) -> Vec<&SensorConfig> {
        if selector == "all" {
            self.sensors.iter().collect()
        } else {
            self.sensor(selector).into_iter().collect()
        }
    }

    /// Update only the provided threshold fields of one sensor.
    pub fn update_thresholds(&mut self, sensor_id: &str, patch: &ThresholdsPatch) -> Result<()> {
        let sensor = self
            .sensors
            .iter_mut()
            .find(|s| s.id == sensor_id)
            .ok_or_else(|| Error::NotFound {
                entity: "Sensor",
                id: sensor_id.to_owned(),
            })?;
        sensor.thresholds = sensor.thresholds.patched(patch)?;
        Ok(())
    }

    pub fn update_notification_settings(&mut self, patch: &NotificationSettingsPatch) -> Result<()> {
        let ns = &mut self.notification_settings;
        if let Some(minutes) = patch.check_interval_minutes {
            if minutes == 0 {
                return Err(Error::Validation(
                    "check_interval_minutes must be at least 1".to_owned(),
                ));
            }
            ns.check_interval_minutes = minutes;
        }
        if let Some(minutes) = patch.cooldown_minutes {
            ns.cooldown_minutes = minutes;
        }
        if let Some(enabled) = patch.enabled {
            ns.enabled = enabled;
        }
        Ok(())
    }
}
