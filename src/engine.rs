//! Public entry point wiring submission, queue and dispatcher together.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::dispatcher::{BatchDispatcher, DispatcherState};
use crate::error::{MicroBatchError, Result};
use crate::job::{Job, JobResult};
use crate::processor::{BatchProcessor, BatchResult, FnProcessor, SharedProcessor};
use crate::queue::PriorityJobQueue;

/// Rejection message for submissions made after shutdown began.
pub const SHUTDOWN_REJECTION: &str = "Cannot accept Job as shutdown has been executed.";
/// Rejection message for submissions made after the processor failed.
pub const FAILED_REJECTION: &str = "Cannot accept Job as batch processing has failed.";

enum Lifecycle {
    Idle,
    Running(JoinHandle<Result<()>>),
    Stopped,
}

/// Builder for MicroBatchingEngine.
pub struct MicroBatchingEngineBuilder<T>
where
    T: Send + 'static,
{
    config: EngineConfig,
    processor: Option<SharedProcessor<T>>,
    runtime: Option<Handle>,
}

impl<T> Default for MicroBatchingEngineBuilder<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MicroBatchingEngineBuilder<T>
where
    T: Send + 'static,
{
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            processor: None,
            runtime: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the interval between drains.
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.batch_interval = interval;
        self
    }

    /// Wake the dispatcher as soon as a full batch is pending.
    pub fn flush_when_full(mut self, enabled: bool) -> Self {
        self.config.flush_when_full = enabled;
        self
    }

    /// Set the batch processor.
    pub fn processor(mut self, processor: impl BatchProcessor<T> + 'static) -> Self {
        let processor: SharedProcessor<T> = Arc::new(processor);
        self.processor = Some(processor);
        self
    }

    /// Set a processor that is shared with other owners.
    pub fn shared_processor(mut self, processor: SharedProcessor<T>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Use an async closure as the batch processor.
    pub fn handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(Vec<Job<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchResult> + Send + 'static,
    {
        self.processor(FnProcessor::new(handler))
    }

    /// Set the runtime the dispatcher is spawned on.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the MicroBatchingEngine.
    pub fn build(self) -> Result<MicroBatchingEngine<T>> {
        self.config.validate()?;

        let processor = self.processor.ok_or_else(|| {
            MicroBatchError::invalid_config("processor", "A batch processor is required")
        })?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                MicroBatchError::invalid_config(
                    "runtime",
                    "The engine must be built inside a Tokio runtime or given a runtime handle",
                )
            })?,
        };

        Ok(MicroBatchingEngine::from_parts(self.config, processor, runtime))
    }
}

/// Accepts jobs one at a time and hands them to a [`BatchProcessor`] in batches.
///
/// The dispatcher task starts with the first accepted submission. Call
/// [`shutdown`](Self::shutdown) to flush everything still queued.
pub struct MicroBatchingEngine<T>
where
    T: Send + 'static,
{
    config: EngineConfig,
    queue: Arc<PriorityJobQueue<T>>,
    dispatcher: Arc<BatchDispatcher<T>>,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    shutting_down: AtomicBool,
}

impl<T> std::fmt::Debug for MicroBatchingEngine<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroBatchingEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T> MicroBatchingEngine<T>
where
    T: Send + 'static,
{
    /// Create an engine on the current Tokio runtime.
    pub fn new(config: EngineConfig, processor: impl BatchProcessor<T> + 'static) -> Result<Self> {
        Self::builder().config(config).processor(processor).build()
    }

    /// Create a new builder for MicroBatchingEngine.
    pub fn builder() -> MicroBatchingEngineBuilder<T> {
        MicroBatchingEngineBuilder::new()
    }

    fn from_parts(config: EngineConfig, processor: SharedProcessor<T>, runtime: Handle) -> Self {
        let queue = Arc::new(PriorityJobQueue::new());
        let dispatcher = Arc::new(BatchDispatcher::new(queue.clone(), processor, &config));

        Self {
            config,
            queue,
            dispatcher,
            runtime,
            lifecycle: Mutex::new(Lifecycle::Idle),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Queue a job for the next batch.
    ///
    /// Never waits on batch processing. After shutdown began, or after the
    /// processor failed, the job is dropped and a failed result is returned.
    pub fn submit(&self, job: Job<T>) -> JobResult {
        let id = job.id().clone();

        if self.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!(job_id = %id, "Rejected job submitted after shutdown");
            return JobResult::rejected(id, SHUTDOWN_REJECTION);
        }

        if self.queue.enqueue(job).is_err() {
            // The queue closes either on shutdown or on processor failure.
            let message = if self.shutting_down.load(Ordering::SeqCst) {
                SHUTDOWN_REJECTION
            } else {
                FAILED_REJECTION
            };
            tracing::warn!(job_id = %id, reason = message, "Rejected job");
            return JobResult::rejected(id, message);
        }

        tracing::trace!(job_id = %id, "Job queued");
        self.ensure_started();

        if self.config.flush_when_full && self.queue.len() >= self.config.batch_size {
            self.dispatcher.wake();
        }

        JobResult::accepted(id)
    }

    /// Stop accepting jobs and wait until everything queued was processed.
    ///
    /// Every call, including concurrent and repeated ones, returns only once
    /// the dispatcher is `Stopped` and reports the same outcome: the
    /// processor failure or panic that stopped it, if any. There is no
    /// timeout: a processor that never returns blocks this call.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown already requested");
        }
        self.queue.close();
        self.dispatcher.request_shutdown();

        let previous = {
            let mut lifecycle = self.lifecycle();
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        match previous {
            Lifecycle::Idle => {
                // Never started: flush on the runtime so a panicking
                // processor is contained the same way as in the loop.
                let dispatcher = self.dispatcher.clone();
                let handle = self
                    .runtime
                    .spawn(async move { dispatcher.drain_to_stop().await });
                self.join(handle).await;
            }
            Lifecycle::Running(handle) => self.join(handle).await,
            Lifecycle::Stopped => {}
        }

        self.dispatcher.stopped().await
    }

    async fn join(&self, handle: JoinHandle<Result<()>>) {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Dispatcher task failed");
            let _ = self
                .dispatcher
                .finish(Err(MicroBatchError::Dispatcher(e.to_string())));
        }
    }

    /// Number of jobs waiting for a batch.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Current dispatcher state.
    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    /// Watch dispatcher state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<DispatcherState> {
        self.dispatcher.subscribe()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The validated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_started(&self) {
        let mut lifecycle = self.lifecycle();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return;
        }

        let dispatcher = self.dispatcher.clone();
        let handle = self.runtime.spawn(async move { dispatcher.run().await });
        *lifecycle = Lifecycle::Running(handle);
    }
}

impl<T> Drop for MicroBatchingEngine<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        // A running loop flushes what is left and exits on its own.
        self.dispatcher.request_shutdown();
    }
}
