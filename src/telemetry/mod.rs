pub mod aggregate;

use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::time;
use tracing::debug;

use crate::{
    db::models::Sample,
    error::Result,
    home::{Channel, SensorConfig},
};

/// The newest qualifying reading of one sensor at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub sensor_id: String,
    pub timestamp: i64,
    pub temperature: f64,
    pub humidity: Option<f64>,
}

/// Read-only access to the weather-station archive.
///
/// Every query is bounded by `timeout`; a timeout or driver error surfaces
/// as `Error::StoreUnavailable` and no partial result is returned.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl TelemetryStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// All samples on `channel` at or after `start` with a temperature,
    /// ordered by time ascending.
    pub async fn samples_since(&self, channel: Channel, start: i64) -> Result<Vec<Sample>> {
        let sql = format!(
            r#"
            SELECT dateTime            AS timestamp,
                   CAST({t} AS REAL)   AS temperature,
                   CAST({h} AS REAL)   AS humidity
            FROM archive
            WHERE dateTime >= ?1
              AND {t} IS NOT NULL
            ORDER BY dateTime ASC
            "#,
            t = channel.temperature_column(),
            h = channel.humidity_column(),
        );

        let rows = time::timeout(
            self.timeout,
            sqlx::query_as::<_, Sample>(&sql).bind(start).fetch_all(&self.pool),
        )
        .await??;

        debug!(channel = %channel, start, rows = rows.len(), "archive samples fetched");
        Ok(rows)
    }

    /// The most recent sample with a temperature for `sensor`, rounded to one
    /// decimal, or `None` if the channel has never reported.
    pub async fn latest(&self, sensor: &SensorConfig) -> Result<Option<Snapshot>> {
        let sql = format!(
            r#"
            SELECT dateTime          AS timestamp,
                   ROUND({t}, 1)     AS temperature,
                   ROUND({h}, 1)     AS humidity
            FROM archive
            WHERE {t} IS NOT NULL
            ORDER BY dateTime DESC
            LIMIT 1
            "#,
            t = sensor.channel.temperature_column(),
            h = sensor.channel.humidity_column(),
        );

        let row = time::timeout(
            self.timeout,
            sqlx::query_as::<_, Sample>(&sql).fetch_optional(&self.pool),
        )
        .await??;

        Ok(row.and_then(|r| {
            r.temperature.map(|temperature| Snapshot {
                sensor_id: sensor.id.clone(),
                timestamp: r.timestamp,
                temperature,
                humidity: r.humidity,
            })
        }))
    }

    /// Latest snapshot of every sensor that has reported at least once, in
    /// configuration order. Any failing query fails the whole call.
    pub async fn latest_all<'a>(
        &self,
        sensors: &'a [SensorConfig],
    ) -> Result<Vec<(&'a SensorConfig, Snapshot)>> {
        let mut out = Vec::with_capacity(sensors.len());
        for sensor in sensors {
            match self.latest(sensor).await? {
                Some(snapshot) => out.push((sensor, snapshot)),
                None => debug!(sensor_id = %sensor.id, "no readings for sensor yet"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use sqlx::sqlite::SqlitePoolOptions;

    use super::TelemetryStore;
    use crate::home::Channel;

    /// A single-connection in-memory archive with the weewx column layout.
    pub(crate) async fn archive_store() -> TelemetryStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE archive (
                dateTime    INTEGER NOT NULL PRIMARY KEY,
                inTemp      REAL, inHumidity  REAL,
                outTemp     REAL, outHumidity REAL,
                extraTemp1  REAL, extraHumid1 REAL,
                extraTemp2  REAL, extraHumid2 REAL,
                extraTemp3  REAL, extraHumid3 REAL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        TelemetryStore::new(pool, Duration::from_secs(5))
    }

    pub(crate) async fn record(
        store: &TelemetryStore,
        timestamp: i64,
        channel: Channel,
        temperature: Option<f64>,
        humidity: Option<f64>,
    ) {
        let sql = format!(
            "INSERT INTO archive (dateTime, {t}, {h}) VALUES (?1, ?2, ?3)
             ON CONFLICT (dateTime) DO UPDATE SET {t} = excluded.{t}, {h} = excluded.{h}",
            t = channel.temperature_column(),
            h = channel.humidity_column(),
        );
        sqlx::query(&sql)
            .bind(timestamp)
            .bind(temperature)
            .bind(humidity)
            .execute(&store.pool)
            .await
            .unwrap();
    }
}
