//! # microbatch - Micro-Batching Engine
//!
//! Accepts jobs one at a time and hands them to a downstream processor in
//! bounded batches, amortising the cost of an expensive bulk operation.
//!
//! ## Features
//!
//! - **Bounded batches**: at most `batch_size` jobs per processor call
//! - **Periodic dispatch**: one batch per `batch_interval` while running
//! - **Priorities**: `High` jobs leave before `Medium` before `Low`, FIFO within each
//! - **Non-blocking submission**: `submit` never waits on the processor
//! - **Graceful shutdown**: everything queued is flushed before `shutdown` returns
//! - **Fail fast**: a processor error stops the dispatcher and is reported by `shutdown`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microbatch::{BatchResult, Job, MicroBatchingEngine};
//! use std::time::Duration;
//!
//! async fn send_bulk(jobs: Vec<Job<String>>) -> BatchResult {
//!     println!("sending {} jobs", jobs.len());
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> microbatch::Result<()> {
//!     let engine = MicroBatchingEngine::builder()
//!         .batch_size(50)
//!         .batch_interval(Duration::from_millis(200))
//!         .handler(send_bulk)
//!         .build()?;
//!
//!     for i in 0..120 {
//!         let result = engine.submit(Job::new(i.to_string(), format!("payload {}", i))?);
//!         assert!(result.is_success());
//!     }
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod job;
pub mod processor;
pub mod queue;

// Re-export main types
pub use config::{EngineConfig, EngineConfigBuilder, MAX_BATCH_INTERVAL, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
pub use dispatcher::{BatchDispatcher, DispatcherState};
pub use engine::{MicroBatchingEngine, MicroBatchingEngineBuilder, FAILED_REJECTION, SHUTDOWN_REJECTION};
pub use error::{MicroBatchError, Result};
pub use job::{Job, JobBuilder, JobId, JobPriority, JobResult};
pub use processor::{BatchError, BatchProcessor, BatchResult, FnProcessor, SharedProcessor};
pub use queue::PriorityJobQueue;
