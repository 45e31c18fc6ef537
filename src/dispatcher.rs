//! Background loop that turns the queue into batches.
//!
//! The dispatcher moves through four states:
//!
//! ```text
//! Idle --first submit--> Running --shutdown--> Draining --queue empty--> Stopped
//! ```
//!
//! While `Running` it drains at most `batch_size` jobs, hands a non-empty
//! batch to the processor, then waits one `batch_interval`. Once shutdown is
//! requested it stops waiting and keeps draining until the queue is empty.
//! A processor failure stops the loop immediately and is returned to the
//! caller awaiting the dispatcher. A processor that panics stops it the same
//! way: the queue is closed and the state still ends at `Stopped`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{MicroBatchError, Result};
use crate::processor::SharedProcessor;
use crate::queue::PriorityJobQueue;

/// Lifecycle state of a [`BatchDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    /// Not started yet; nothing has been submitted.
    Idle,
    /// Draining one batch per interval.
    Running,
    /// Shutdown requested; flushing the queue without waiting.
    Draining,
    /// Terminal. No further drains happen.
    Stopped,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Running => "running",
            DispatcherState::Draining => "draining",
            DispatcherState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Drains the shared queue into batches for the processor.
pub struct BatchDispatcher<T>
where
    T: Send + 'static,
{
    queue: Arc<PriorityJobQueue<T>>,
    processor: SharedProcessor<T>,
    batch_size: usize,
    interval: Duration,
    shutdown: CancellationToken,
    wake: Notify,
    state: watch::Sender<DispatcherState>,
    outcome: OnceLock<Result<()>>,
}

/// Moves the dispatcher to `Stopped` when a drain unwinds or is dropped
/// before it finished.
struct StopGuard<'a, T>
where
    T: Send + 'static,
{
    dispatcher: &'a BatchDispatcher<T>,
    armed: bool,
}

impl<'a, T> StopGuard<'a, T>
where
    T: Send + 'static,
{
    fn new(dispatcher: &'a BatchDispatcher<T>) -> Self {
        Self {
            dispatcher,
            armed: true,
        }
    }

    fn finish(mut self, result: Result<()>) -> Result<()> {
        self.armed = false;
        self.dispatcher.finish(result)
    }
}

impl<T> Drop for StopGuard<'_, T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let reason = if std::thread::panicking() {
            "batch processor panicked"
        } else {
            "dispatcher was cancelled before the queue was drained"
        };
        tracing::error!(
            reason,
            pending = self.dispatcher.queue.len(),
            "Dispatcher stopped abnormally"
        );
        let _ = self
            .dispatcher
            .finish(Err(MicroBatchError::Dispatcher(reason.to_string())));
    }
}

impl<T> BatchDispatcher<T>
where
    T: Send + 'static,
{
    /// Create an idle dispatcher over `queue`.
    pub fn new(
        queue: Arc<PriorityJobQueue<T>>,
        processor: SharedProcessor<T>,
        config: &EngineConfig,
    ) -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);

        Self {
            queue,
            processor,
            batch_size: config.batch_size,
            interval: config.batch_interval,
            shutdown: CancellationToken::new(),
            wake: Notify::new(),
            state,
            outcome: OnceLock::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// The result the dispatcher stopped with, or `None` while it has not.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.outcome.get().cloned()
    }

    /// Wait until the dispatcher reaches `Stopped` and return its outcome.
    ///
    /// Any number of callers may wait; all of them see the same result.
    pub async fn stopped(&self) -> Result<()> {
        let mut state = self.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = state.wait_for(|s| *s == DispatcherState::Stopped).await;
        self.outcome().unwrap_or(Ok(()))
    }

    /// Ask the loop to leave `Running` and flush the queue.
    ///
    /// Observed between iterations; an in-flight batch is never interrupted.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cut the current interval short so the next drain happens now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Run the dispatcher loop until it reaches `Stopped`.
    ///
    /// Returns the processor failure that stopped the loop, if any.
    pub async fn run(&self) -> Result<()> {
        let guard = StopGuard::new(self);
        self.transition(DispatcherState::Running);
        tracing::info!(
            batch_size = self.batch_size,
            interval_ms = self.interval.as_millis() as u64,
            "Dispatcher started"
        );

        let result = self.run_until_drained().await;
        match &result {
            Ok(()) => tracing::info!("Dispatcher stopped"),
            Err(e) => tracing::error!(
                error = %e,
                pending = self.queue.len(),
                "Dispatcher stopped on processor failure"
            ),
        }
        guard.finish(result)
    }

    /// Flush the queue without ever entering `Running`.
    ///
    /// Used when shutdown happens before the loop was started.
    pub async fn drain_to_stop(&self) -> Result<()> {
        let guard = StopGuard::new(self);
        self.transition(DispatcherState::Draining);
        let result = self.drain_remaining().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, pending = self.queue.len(), "Final drain failed");
        }
        guard.finish(result)
    }

    /// Record the terminal outcome and move to `Stopped`.
    ///
    /// The first recorded outcome wins and is returned. A failure closes the
    /// queue: nothing else may be queued behind a dead processor.
    pub(crate) fn finish(&self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.queue.close();
        }
        let _ = self.outcome.set(result);
        self.transition(DispatcherState::Stopped);
        self.outcome().unwrap_or(Ok(()))
    }

    async fn run_until_drained(&self) -> Result<()> {
        while !self.shutdown.is_cancelled() {
            self.dispatch_next().await?;

            tokio::select! {
                _ = time::sleep(self.interval) => {}
                _ = self.wake.notified() => {
                    tracing::trace!("Dispatcher woken early");
                }
                _ = self.shutdown.cancelled() => {}
            }
        }

        self.transition(DispatcherState::Draining);
        tracing::info!(pending = self.queue.len(), "Shutdown requested, draining...");
        self.drain_remaining().await
    }

    async fn drain_remaining(&self) -> Result<()> {
        while self.dispatch_next().await? > 0 {}
        Ok(())
    }

    /// Drain one batch and hand it to the processor. Returns its size.
    async fn dispatch_next(&self) -> Result<usize> {
        let batch = self.queue.drain_up_to(self.batch_size);
        if batch.is_empty() {
            return Ok(0);
        }

        let size = batch.len();
        tracing::debug!(
            batch_size = size,
            first_job = %batch[0].id(),
            pending = self.queue.len(),
            "Dispatching batch"
        );

        self.processor
            .process_batch(batch)
            .await
            .map_err(MicroBatchError::ExternalProcessing)?;

        Ok(size)
    }

    fn transition(&self, next: DispatcherState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Dispatcher state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobPriority};
    use crate::processor::{BatchError, BatchProcessor, BatchResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<String>>>,
        fail_on_call: Option<usize>,
        panic_on_call: Option<usize>,
    }

    #[async_trait]
    impl BatchProcessor<u32> for Recorder {
        async fn process_batch(&self, jobs: Vec<Job<u32>>) -> BatchResult {
            let call = self.batches.lock().unwrap().len();
            if self.panic_on_call == Some(call) {
                panic!("processor exploded");
            }

            let mut batches = self.batches.lock().unwrap();
            if self.fail_on_call == Some(batches.len()) {
                return Err(BatchError::new("BOOM"));
            }
            batches.push(jobs.iter().map(|j| j.id().to_string()).collect());
            Ok(())
        }
    }

    fn setup(
        batch_size: usize,
        recorder: Arc<Recorder>,
    ) -> (Arc<PriorityJobQueue<u32>>, BatchDispatcher<u32>) {
        let queue: Arc<PriorityJobQueue<u32>> = Arc::new(PriorityJobQueue::new());
        let processor: SharedProcessor<u32> = recorder;
        let config = EngineConfig::new(batch_size, Duration::from_millis(1000));
        let dispatcher = BatchDispatcher::new(queue.clone(), processor, &config);
        (queue, dispatcher)
    }

    fn fill(queue: &PriorityJobQueue<u32>, n: u32) {
        for i in 0..n {
            queue.enqueue(Job::new(i.to_string(), i).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_new_dispatcher_is_idle() {
        let (_, dispatcher) = setup(5, Arc::new(Recorder::default()));
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert!(!dispatcher.is_shutdown_requested());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DispatcherState::Draining.to_string(), "draining");
        assert_eq!(DispatcherState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn test_drain_to_stop_flushes_in_capped_batches() {
        let recorder = Arc::new(Recorder::default());
        let (queue, dispatcher) = setup(5, recorder.clone());
        fill(&queue, 12);

        dispatcher.drain_to_stop().await.unwrap();

        let batches = recorder.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert!(queue.is_empty());
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_empty_queue_never_calls_processor() {
        let recorder = Arc::new(Recorder::default());
        let (_, dispatcher) = setup(5, recorder.clone());

        dispatcher.drain_to_stop().await.unwrap();
        assert!(recorder.batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_once_per_interval() {
        let recorder = Arc::new(Recorder::default());
        let (queue, dispatcher) = setup(2, recorder.clone());
        fill(&queue, 5);
        let dispatcher = Arc::new(dispatcher);

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run().await }
        });

        // first drain happens as soon as the loop starts
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.batches.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.state(), DispatcherState::Running);

        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(recorder.batches.lock().unwrap().len(), 2);

        dispatcher.request_shutdown();
        handle.await.unwrap().unwrap();

        let batches = recorder.batches.lock().unwrap();
        assert_eq!(
            *batches,
            vec![
                vec!["0".to_string(), "1".to_string()],
                vec!["2".to_string(), "3".to_string()],
                vec!["4".to_string()],
            ]
        );
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_cuts_interval_short() {
        let recorder = Arc::new(Recorder::default());
        let (queue, dispatcher) = setup(5, recorder.clone());
        let dispatcher = Arc::new(dispatcher);

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run().await }
        });
        time::sleep(Duration::from_millis(10)).await;

        fill(&queue, 3);
        dispatcher.wake();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.batches.lock().unwrap().len(), 1);

        dispatcher.request_shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_processor_failure_stops_loop() {
        let recorder = Arc::new(Recorder {
            fail_on_call: Some(0),
            ..Default::default()
        });
        let (queue, dispatcher) = setup(5, recorder.clone());
        fill(&queue, 6);

        let err = dispatcher.drain_to_stop().await.unwrap_err();
        assert!(matches!(err, MicroBatchError::ExternalProcessing(_)));
        assert_eq!(
            err.to_string(),
            "ProcessBatch() on BatchProcessor failed: BOOM"
        );

        // the second batch was never attempted
        assert_eq!(queue.len(), 1);
        assert!(queue.is_closed());
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_processor_panic_still_reaches_stopped() {
        let recorder = Arc::new(Recorder {
            panic_on_call: Some(0),
            ..Default::default()
        });
        let (queue, dispatcher) = setup(5, recorder.clone());
        fill(&queue, 6);
        let dispatcher = Arc::new(dispatcher);

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run().await }
        });
        assert!(handle.await.unwrap_err().is_panic());

        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 1);

        let err = dispatcher.stopped().await.unwrap_err();
        assert_eq!(err.to_string(), "Dispatcher error: batch processor panicked");
    }

    #[tokio::test]
    async fn test_every_waiter_sees_the_failure() {
        let recorder = Arc::new(Recorder {
            fail_on_call: Some(0),
            ..Default::default()
        });
        let (queue, dispatcher) = setup(5, recorder.clone());
        fill(&queue, 3);
        let dispatcher = Arc::new(dispatcher);
        assert!(dispatcher.outcome().is_none());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.stopped().await })
            })
            .collect();

        let first = dispatcher.drain_to_stop().await.unwrap_err();
        for waiter in waiters {
            let err = waiter.await.unwrap().unwrap_err();
            assert_eq!(err.to_string(), first.to_string());
        }
        assert!(matches!(
            dispatcher.outcome(),
            Some(Err(MicroBatchError::ExternalProcessing(_)))
        ));
    }

    #[tokio::test]
    async fn test_batches_follow_priority() {
        let recorder = Arc::new(Recorder::default());
        let (queue, dispatcher) = setup(5, recorder.clone());
        fill(&queue, 5);
        queue
            .enqueue(Job::with_priority("urgent", 99, JobPriority::High).unwrap())
            .unwrap();

        dispatcher.drain_to_stop().await.unwrap();

        let batches = recorder.batches.lock().unwrap();
        assert_eq!(batches[0], vec!["urgent", "0", "1", "2", "3"]);
        assert_eq!(batches[1], vec!["4"]);
    }
}
