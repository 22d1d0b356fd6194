//! Measurement loading: validation and posting of batches, built on the
//! source/transform/sink pipeline.

use flex_client::{
    domain::{MeasurementBatch, Sensor},
    Platform,
};

use crate::{
    error::IngestionError,
    pipeline::{Envelope, Pipeline, Sink, Source},
    sinks::PlatformSink,
    sources::MeasurementListSource,
    transform::{validate_batch, BatchValidation},
};

pub const DEFAULT_WORKERS: usize = 4;

pub struct MeasurementLoader<'a, P: ?Sized> {
    platform: &'a P,
    workers: usize,
}

impl<'a, P> MeasurementLoader<'a, P>
where
    P: Platform + ?Sized,
{
    pub fn new(platform: &'a P) -> Self {
        Self {
            platform,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Push one batch into one sensor. The batch is checked locally first,
    /// so a malformed window never reaches the platform.
    pub async fn load_batch(&self, sensor: &Sensor, batch: MeasurementBatch) -> Result<(), IngestionError> {
        validate_batch(sensor, &batch)?;
        let sink = PlatformSink::new(self.platform, 1);
        sink.run(futures::stream::iter([Ok::<_, IngestionError>(Envelope::new(batch))])).await
    }

    /// Validate every batch from `source` against `sensors` and post it,
    /// fanning out across sensors. Returns the number of batches posted.
    pub async fn load<S>(&self, source: S, sensors: &[Sensor]) -> Result<usize, IngestionError>
    where
        S: Source<MeasurementBatch>,
    {
        Pipeline::<_, MeasurementBatch, _>::new(source, PlatformSink::new(self.platform, self.workers))
            .with_transform(BatchValidation::new(sensors))
            .run()
            .await
    }

    /// Validate all batches up front, then post them. Nothing is posted if any
    /// batch is malformed.
    pub async fn load_all(&self, batches: Vec<MeasurementBatch>, sensors: &[Sensor]) -> Result<usize, IngestionError> {
        for batch in &batches {
            match sensors.iter().find(|s| s.id == batch.sensor_id) {
                Some(sensor) => validate_batch(sensor, batch)?,
                None => return Err(IngestionError::UnknownSensor(batch.sensor_id)),
            }
        }

        self.load(MeasurementListSource::new(batches), sensors).await
    }
}
