//! Downsampling of raw archive samples into chart-ready buckets.
use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::Sample;

// ---------------------------------------------------------------------------
// HistoryRange
// ---------------------------------------------------------------------------

/// Supported history windows. Each maps to a fixed lookback and bucket width
/// so every chart carries roughly the same number of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryRange {
    SixHours,
    TwelveHours,
    #[default]
    Day,
    Week,
    Month,
}

impl HistoryRange {
    pub const ALL: [HistoryRange; 5] = [
        HistoryRange::SixHours,
        HistoryRange::TwelveHours,
        HistoryRange::Day,
        HistoryRange::Week,
        HistoryRange::Month,
    ];

    /// Parse a range label; anything unrecognised falls back to `24h`.
    pub fn parse_or_default(label: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|r| r.label() == label)
            .unwrap_or_default()
    }

    pub fn label(self) -> &'static str {
        match self {
            HistoryRange::SixHours => "6h",
            HistoryRange::TwelveHours => "12h",
            HistoryRange::Day => "24h",
            HistoryRange::Week => "7d",
            HistoryRange::Month => "30d",
        }
    }

    pub fn lookback_secs(self) -> i64 {
        const HOUR: i64 = 3600;
        match self {
            HistoryRange::SixHours => 6 * HOUR,
            HistoryRange::TwelveHours => 12 * HOUR,
            HistoryRange::Day => 24 * HOUR,
            HistoryRange::Week => 7 * 24 * HOUR,
            HistoryRange::Month => 30 * 24 * HOUR,
        }
    }

    /// | Range | Bucket  |
    /// |-------|---------|
    /// | 6h    | 5 min   |
    /// | 12h   | 10 min  |
    /// | 24h   | 15 min  |
    /// | 7d    | 1 h     |
    /// | 30d   | 4 h     |
    pub fn bucket_secs(self) -> i64 {
        match self {
            HistoryRange::SixHours => 300,
            HistoryRange::TwelveHours => 600,
            HistoryRange::Day => 900,
            HistoryRange::Week => 3600,
            HistoryRange::Month => 14_400,
        }
    }

    pub fn start_time(self, now: i64) -> i64 {
        now - self.lookback_secs()
    }
}

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

/// Aggregated statistics of one fixed-width interval.
///
/// `start` is floor-aligned to the range's bucket width. All values are
/// rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    pub start: i64,
    pub avg_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub avg_humidity: Option<f64>,
}

#[derive(Debug)]
struct Accumulator {
    count: u32,
    temp_sum: f64,
    temp_min: f64,
    temp_max: f64,
    humidity_sum: f64,
    humidity_count: u32,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            temp_sum: 0.0,
            temp_min: f64::INFINITY,
            temp_max: f64::NEG_INFINITY,
            humidity_sum: 0.0,
            humidity_count: 0,
        }
    }
}

impl Accumulator {
    fn push(&mut self, temperature: f64, humidity: Option<f64>) {
        self.count += 1;
        self.temp_sum += temperature;
        self.temp_min = self.temp_min.min(temperature);
        self.temp_max = self.temp_max.max(temperature);
        if let Some(h) = humidity {
            self.humidity_sum += h;
            self.humidity_count += 1;
        }
    }

    fn finish(self, start: i64) -> Bucket {
        let avg_humidity = (self.humidity_count > 0)
            .then(|| round1(self.humidity_sum / f64::from(self.humidity_count)));
        Bucket {
            start,
            avg_temp: round1(self.temp_sum / f64::from(self.count)),
            min_temp: round1(self.temp_min),
            max_temp: round1(self.temp_max),
            avg_humidity,
        }
    }
}

/// Group `samples` into `range`-wide buckets ending at `now`.
///
/// Samples older than the range's start or without a temperature are
/// dropped first. Buckets come out in ascending time order; intervals with
/// no samples are omitted rather than zero-filled.
pub fn aggregate(samples: &[Sample], range: HistoryRange, now: i64) -> Vec<Bucket> {
    let start_time = range.start_time(now);
    let width = range.bucket_secs();

    let mut buckets: BTreeMap<i64, Accumulator> = BTreeMap::new();
    for sample in samples {
        if sample.timestamp < start_time {
            continue;
        }
        let Some(temperature) = sample.temperature.filter(|t| t.is_finite()) else {
            continue;
        };
        let key = sample.timestamp.div_euclid(width) * width;
        let humidity = sample.humidity.filter(|h| h.is_finite());
        buckets.entry(key).or_default().push(temperature, humidity);
    }

    buckets
        .into_iter()
        .map(|(start, acc)| acc.finish(start))
        .collect()
}

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

/// Summary over a series' bucket averages. `current` is the newest bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub current: f64,
}

/// `None` when there are no buckets; an empty series has no statistics
/// rather than zeroes.
pub fn summarize(buckets: &[Bucket]) -> Option<SeriesStats> {
    let current = buckets.last()?.avg_temp;
    let (min, max, sum) = buckets.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), b| (min.min(b.avg_temp), max.max(b.avg_temp), sum + b.avg_temp),
    );
    Some(SeriesStats {
        min,
        max,
        avg: round1(sum / buckets.len() as f64),
        current,
    })
}

/// Round to one decimal place.
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
