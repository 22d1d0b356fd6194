use flex_client::domain::MeasurementBatch;

use crate::pipeline::{Envelope, EnvelopeStream, Source};

/// Batches prepared in memory, e.g. from the run configuration.
#[derive(Debug, Clone, Default)]
pub struct MeasurementListSource {
    batches: Vec<MeasurementBatch>,
}

impl MeasurementListSource {
    pub fn new(batches: Vec<MeasurementBatch>) -> Self {
        Self { batches }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[async_trait::async_trait]
impl Source<MeasurementBatch> for MeasurementListSource {
    async fn stream(&self) -> EnvelopeStream<MeasurementBatch> {
        let items: Vec<_> = self
            .batches
            .iter()
            .cloned()
            .map(|b| Ok(Envelope::new(b)))
            .collect();
        Box::pin(futures::stream::iter(items))
    }
}
