use time::OffsetDateTime;

use super::IsoDuration;

/// Equally spaced values for one sensor over `[start, start + duration)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementBatch {
    pub sensor_id: u64,
    pub start: OffsetDateTime,
    pub duration: IsoDuration,
    pub values: Vec<f64>,
    pub unit: String,
}
