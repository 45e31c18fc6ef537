//! The downstream batch processor boundary.
//!
//! The engine only ever calls [`BatchProcessor::process_batch`] with a
//! non-empty batch of at most `batch_size` jobs, in drain order.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::job::Job;

/// Result type for batch processors.
pub type BatchResult = std::result::Result<(), BatchError>;

/// Error returned from a batch processor.
///
/// Any processor failure is terminal for the dispatcher; there is no retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Error message.
    pub message: String,
}

impl BatchError {
    /// Create a new error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for BatchError {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Downstream capability that consumes whole batches.
///
/// Implementations must be thread-safe (Send + Sync); the dispatcher
/// awaits each call before draining the next batch.
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Process one non-empty batch, ordered by priority then arrival.
    async fn process_batch(&self, jobs: Vec<Job<T>>) -> BatchResult;
}

/// A type-erased processor that can be shared across tasks.
pub type SharedProcessor<T> = Arc<dyn BatchProcessor<T>>;

/// Adapter turning an async closure into a [`BatchProcessor`].
pub struct FnProcessor<T, F, Fut>
where
    F: Fn(Vec<Job<T>>) -> Fut + Send + Sync,
    Fut: Future<Output = BatchResult> + Send,
{
    handler: F,
    _phantom: PhantomData<fn(Vec<Job<T>>)>,
}

impl<T, F, Fut> FnProcessor<T, F, Fut>
where
    F: Fn(Vec<Job<T>>) -> Fut + Send + Sync,
    Fut: Future<Output = BatchResult> + Send,
{
    /// Wrap a handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> BatchProcessor<T> for FnProcessor<T, F, Fut>
where
    T: Send + 'static,
    F: Fn(Vec<Job<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult> + Send + 'static,
{
    async fn process_batch(&self, jobs: Vec<Job<T>>) -> BatchResult {
        (self.handler)(jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_batch_error_display() {
        let err = BatchError::new("downstream unavailable");
        assert_eq!(format!("{}", err), "downstream unavailable");
    }

    #[test]
    fn test_batch_error_from_std_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: BatchError = io.into();
        assert_eq!(err.message, "disk full");
    }

    #[tokio::test]
    async fn test_fn_processor_forwards_batch() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let processor = FnProcessor::new(move |jobs: Vec<Job<u32>>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(jobs.len(), Ordering::SeqCst);
                Ok(())
            }
        });

        let batch = vec![Job::new("a", 1).unwrap(), Job::new("b", 2).unwrap()];
        processor.process_batch(batch).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_processor_propagates_error() {
        let processor: SharedProcessor<u32> =
            Arc::new(FnProcessor::new(|_jobs: Vec<Job<u32>>| async {
                Err(BatchError::new("BOOM"))
            }));

        let err = processor
            .process_batch(vec![Job::new("a", 1).unwrap()])
            .await
            .unwrap_err();
        assert_eq!(err.message, "BOOM");
    }
}
