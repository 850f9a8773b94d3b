use serde::Serialize;
use sqlx::FromRow;

/// One archive row projected onto a single sensor's channel.
///
/// `timestamp` is epoch seconds (UTC). Either reading may be missing in the
/// archive; rows without a temperature never take part in aggregation.
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize)]
pub struct Sample {
    pub timestamp: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}
