use std::time::SystemTime;

use flex_client::{domain::MeasurementBatch, Platform};
use futures::{future::try_join_all, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::IngestionError,
    pipeline::{Envelope, Sink},
};

fn shard_index(sensor_id: u64, workers: usize) -> usize {
    (sensor_id % workers.max(1) as u64) as usize
}

/// Posts batches to the platform over a fixed number of lanes.
///
/// Batches are sharded by sensor id, so different sensors are posted
/// concurrently while batches for one sensor stay in order on one lane.
/// The first failing batch aborts the whole run.
pub struct PlatformSink<'a, P: ?Sized> {
    platform: &'a P,
    workers: usize,
}

impl<'a, P> PlatformSink<'a, P>
where
    P: Platform + ?Sized,
{
    pub fn new(platform: &'a P, workers: usize) -> Self {
        Self {
            platform,
            workers: workers.max(1),
        }
    }

    async fn post(&self, env: Envelope<MeasurementBatch>) -> Result<(), IngestionError> {
        let batch = &env.payload;
        match self.platform.post_measurements(batch).await {
            Ok(()) => {
                metrics::counter!("flex_measurement_batches_posted_total").increment(1);
                metrics::counter!("flex_measurement_values_posted_total").increment(batch.values.len() as u64);
                if let Ok(dur) = SystemTime::now().duration_since(env.received_at) {
                    metrics::histogram!("flex_measurement_post_latency_seconds").record(dur.as_secs_f64());
                }
                tracing::info!(
                    sensor_id = batch.sensor_id,
                    values = batch.values.len(),
                    start = %batch.start,
                    "measurements posted"
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!(sensor_id = batch.sensor_id, error = %source, "posting measurements failed");
                metrics::counter!("flex_measurement_post_errors_total").increment(1);
                Err(IngestionError::Transport {
                    sensor_id: batch.sensor_id,
                    source,
                })
            }
        }
    }

    async fn lane(&self, rx: mpsc::Receiver<Envelope<MeasurementBatch>>) -> Result<(), IngestionError> {
        let mut batches = ReceiverStream::new(rx);
        while let Some(env) = batches.next().await {
            self.post(env).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<'a, P> Sink<MeasurementBatch> for PlatformSink<'a, P>
where
    P: Platform + ?Sized,
{
    async fn run<S>(&self, mut input: S) -> Result<(), IngestionError>
    where
        S: futures::Stream<Item = Result<Envelope<MeasurementBatch>, IngestionError>> + Send + Unpin + 'static,
    {
        let mut txs = Vec::with_capacity(self.workers);
        let mut lanes = Vec::with_capacity(self.workers);

        for _ in 0..self.workers {
            let (tx, rx) = mpsc::channel::<Envelope<MeasurementBatch>>(4);
            txs.push(tx);
            lanes.push(self.lane(rx));
        }

        let dispatch = async move {
            while let Some(item) = input.next().await {
                let env = match item {
                    Ok(env) => env,
                    Err(e) => {
                        tracing::error!(error = %e, "rejected batch in upstream pipeline for PlatformSink");
                        return Err(e);
                    }
                };

                let idx = shard_index(env.payload.sensor_id, txs.len());
                if txs[idx].send(env).await.is_err() {
                    return Err(IngestionError::Worker("ingestion lane closed".to_string()));
                }
            }
            // Dropping the senders lets the lanes drain and finish.
            drop(txs);
            Ok(())
        };

        futures::try_join!(dispatch, try_join_all(lanes))?;
        Ok(())
    }
}
