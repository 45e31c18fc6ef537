//! Basic example batching email notifications.
//!
//! This example demonstrates:
//! - Building an engine with an async closure as the batch processor
//! - Submitting jobs with different priorities
//! - Flushing the queue with a graceful shutdown
//!
//! Run with: `cargo run --example basic`
//! Tune with `MICROBATCH_BATCH_SIZE` and `MICROBATCH_BATCH_INTERVAL_MS`.

use microbatch::{BatchResult, EngineConfig, Job, JobPriority, MicroBatchingEngine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Email notification job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailJob {
    to: String,
    subject: String,
}

/// Send a batch of emails in one bulk call.
async fn send_emails(jobs: Vec<Job<EmailJob>>) -> BatchResult {
    println!("[bulk] sending {} emails", jobs.len());
    for job in &jobs {
        println!(
            "       {:?} {} -> {} ({})",
            job.priority(),
            job.id(),
            job.payload().to,
            job.payload().subject
        );
    }

    // Simulate one round trip for the whole batch
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("[bulk] sent\n");
    Ok(())
}

#[tokio::main]
async fn main() -> microbatch::Result<()> {
    // RUST_LOG=microbatch=debug shows every dispatched batch
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("microbatch example\n");

    let mut config = EngineConfig::from_env()?;
    if std::env::var(microbatch::config::ENV_BATCH_SIZE).is_err() {
        config.batch_size = 4;
    }

    let engine = MicroBatchingEngine::builder()
        .config(config)
        .handler(send_emails)
        .build()?;

    let users = ["alice", "bob", "charlie", "diana", "eve", "frank", "grace"];
    for (i, user) in users.iter().enumerate() {
        let job = Job::new(
            format!("welcome-{}", i),
            EmailJob {
                to: format!("{}@example.com", user),
                subject: "Welcome!".to_string(),
            },
        )?;
        let result = engine.submit(job);
        println!("  submitted: {} success={}", result.id, result.success);
    }

    let reset = Job::builder("reset-0")
        .payload(EmailJob {
            to: "bob@example.com".to_string(),
            subject: "Password reset".to_string(),
        })
        .priority(JobPriority::High)
        .build()?;
    engine.submit(reset);

    println!("\nPending: {}\n", engine.pending());

    engine.shutdown().await?;

    let late = Job::new(
        "late",
        EmailJob {
            to: "zed@example.com".to_string(),
            subject: "Too late".to_string(),
        },
    )?;
    let result = engine.submit(late);
    println!("late submission: success={} ({})", result.success, result.error_message);

    Ok(())
}
