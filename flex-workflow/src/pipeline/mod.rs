//! Source → transforms → sink plumbing used by the measurement loader.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::SystemTime,
};

use futures::{Stream, StreamExt};

use crate::error::IngestionError;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, IngestionError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, IngestionError>;
}

/// Consumes the stream. An `Err` item means the run is already failed.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), IngestionError>
    where
        S: Stream<Item = Result<Envelope<T>, IngestionError>> + Send + Unpin + 'static;
}

type SharedTransform<T> = Arc<dyn Transform<T, T> + Send + Sync>;

pub struct Pipeline<S, T, K> {
    source: S,
    transforms: Vec<SharedTransform<T>>,
    sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync,
    K: Sink<T> + Send + Sync,
{
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            sink,
        }
    }

    /// Append a transform. Transforms run in the order they were added.
    pub fn with_transform(mut self, transform: impl Transform<T, T> + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Drive the source through every transform into the sink. Returns the
    /// number of envelopes that reached the sink.
    pub async fn run(self) -> Result<usize, IngestionError> {
        let delivered = Arc::new(AtomicUsize::new(0));

        let stream = self
            .transforms
            .into_iter()
            .fold(self.source.stream().await, |stream, t| -> EnvelopeStream<T> {
                Box::pin(stream.then(move |item| {
                    let t = t.clone();
                    async move { t.apply(item?).await }
                }))
            });

        let counter = delivered.clone();
        let counted = stream.inspect(move |item| {
            if item.is_ok() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        self.sink.run(Box::pin(counted)).await?;

        let delivered = delivered.load(Ordering::Relaxed);
        tracing::debug!(delivered, "pipeline drained");
        Ok(delivered)
    }
}
