use std::collections::HashMap;

use flex_client::domain::{MeasurementBatch, Sensor};

use crate::{
    error::IngestionError,
    pipeline::{Envelope, Transform},
};

/// Pure validation of a `MeasurementBatch` against the sensor it targets.
///
/// Rules:
/// - the batch unit must equal the sensor unit (no coercion).
/// - values × sensor resolution must equal the batch duration.
pub fn validate_batch(sensor: &Sensor, batch: &MeasurementBatch) -> Result<(), IngestionError> {
    if batch.sensor_id != sensor.id {
        return Err(IngestionError::UnknownSensor(batch.sensor_id));
    }

    if batch.unit != sensor.unit {
        return Err(IngestionError::UnitMismatch {
            sensor_id: sensor.id,
            batch_unit: batch.unit.clone(),
            sensor_unit: sensor.unit.clone(),
        });
    }

    let covered = sensor.event_resolution.checked_mul(batch.values.len());
    if batch.values.is_empty() || covered != Some(batch.duration) {
        return Err(IngestionError::Window {
            sensor_id: sensor.id,
            values: batch.values.len(),
            resolution: sensor.event_resolution,
            duration: batch.duration,
        });
    }

    Ok(())
}

/// Validates each batch against the sensors provisioned for this run.
#[derive(Clone, Default)]
pub struct BatchValidation {
    sensors: HashMap<u64, Sensor>,
}

impl BatchValidation {
    pub fn new<'a>(sensors: impl IntoIterator<Item = &'a Sensor>) -> Self {
        Self {
            sensors: sensors.into_iter().map(|s| (s.id, s.clone())).collect(),
        }
    }
}

#[async_trait::async_trait]
impl Transform<MeasurementBatch, MeasurementBatch> for BatchValidation {
    async fn apply(
        &self,
        input: Envelope<MeasurementBatch>,
    ) -> Result<Envelope<MeasurementBatch>, IngestionError> {
        let result = match self.sensors.get(&input.payload.sensor_id) {
            Some(sensor) => validate_batch(sensor, &input.payload),
            None => Err(IngestionError::UnknownSensor(input.payload.sensor_id)),
        };

        match result {
            Ok(()) => Ok(input),
            Err(e) => {
                metrics::counter!("flex_measurement_batches_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
