//! Job definition and related types.

use serde::{Deserialize, Serialize};

use crate::error::{MicroBatchError, Result};

/// Caller-supplied identifier for a job.
///
/// Uniqueness is the caller's concern; the engine never deduplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Create a JobId, rejecting empty or whitespace-only values.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(MicroBatchError::invalid_job(
                "id",
                "Job id must not be empty or whitespace",
            ));
        }
        Ok(Self(id))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = MicroBatchError;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Dispatch priority of a job.
///
/// Ordering follows dispatch order: `High < Medium < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum JobPriority {
    /// Dispatched before everything else.
    High,
    /// Dispatched after high priority jobs.
    Medium,
    /// Dispatched last.
    #[default]
    Low,
}

impl JobPriority {
    /// All priorities in dispatch order.
    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Medium, JobPriority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Medium => 1,
            JobPriority::Low => 2,
        }
    }
}

/// A unit of work with its payload and priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<T> {
    id: JobId,
    payload: T,
    priority: JobPriority,
}

impl<T> Job<T> {
    /// Create a new low priority job.
    pub fn new(id: impl Into<String>, payload: T) -> Result<Self> {
        Self::with_priority(id, payload, JobPriority::default())
    }

    /// Create a new job with an explicit priority.
    pub fn with_priority(id: impl Into<String>, payload: T, priority: JobPriority) -> Result<Self> {
        Ok(Self {
            id: JobId::new(id)?,
            payload,
            priority,
        })
    }

    /// Start building a job whose payload is supplied later.
    pub fn builder(id: impl Into<String>) -> JobBuilder<T> {
        JobBuilder::new(id)
    }

    /// The job id.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// The job payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The job priority.
    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    /// Change the priority. Only meaningful before the job is submitted.
    pub fn set_priority(&mut self, priority: JobPriority) {
        self.priority = priority;
    }

    /// Consume the job, returning its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T> Job<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    /// Serialize the job to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a job from JSON.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder for [`Job`] when the payload is produced separately from the id.
#[derive(Debug)]
pub struct JobBuilder<T> {
    id: String,
    payload: Option<T>,
    priority: JobPriority,
}

impl<T> JobBuilder<T> {
    /// Create a new builder.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: None,
            priority: JobPriority::default(),
        }
    }

    /// Set the payload.
    pub fn payload(mut self, payload: T) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Build the Job.
    pub fn build(self) -> Result<Job<T>> {
        let id = JobId::new(self.id)?;
        let payload = self
            .payload
            .ok_or_else(|| MicroBatchError::invalid_job("payload", "Job payload is required"))?;

        Ok(Job {
            id,
            payload,
            priority: self.priority,
        })
    }
}

/// Outcome of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Id of the submitted job.
    pub id: JobId,
    /// Whether the job was accepted into the queue.
    pub success: bool,
    /// Rejection reason; empty when accepted.
    pub error_message: String,
}

impl JobResult {
    /// The job was queued.
    pub fn accepted(id: JobId) -> Self {
        Self {
            id,
            success: true,
            error_message: String::new(),
        }
    }

    /// The job was not queued.
    pub fn rejected(id: JobId, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error_message: message.into(),
        }
    }

    /// Check if the job was accepted.
    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestPayload {
        message: String,
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new("1", "data").unwrap();
        assert_eq!(job.id().as_str(), "1");
        assert_eq!(*job.payload(), "data");
    }

    #[test]
    fn test_job_priority_defaults_to_low() {
        let job = Job::new("1", ()).unwrap();
        assert_eq!(job.priority(), JobPriority::Low);
    }

    #[test]
    fn test_job_keeps_explicit_priority() {
        for priority in JobPriority::ALL {
            let job = Job::with_priority("1", (), priority).unwrap();
            assert_eq!(job.priority(), priority);
        }
    }

    #[test]
    fn test_job_rejects_empty_id() {
        let err = Job::new("", ()).unwrap_err();
        assert!(matches!(err, MicroBatchError::InvalidJob { field: "id", .. }));
    }

    #[test]
    fn test_job_rejects_whitespace_id() {
        let err = Job::new(" \t\n", ()).unwrap_err();
        assert!(matches!(err, MicroBatchError::InvalidJob { field: "id", .. }));
    }

    #[test]
    fn test_job_builder_requires_payload() {
        let err = Job::<String>::builder("1").build().unwrap_err();
        assert!(matches!(
            err,
            MicroBatchError::InvalidJob {
                field: "payload",
                ..
            }
        ));
    }

    #[test]
    fn test_job_builder_checks_id_first() {
        let err = Job::<String>::builder("  ").build().unwrap_err();
        assert!(matches!(err, MicroBatchError::InvalidJob { field: "id", .. }));
    }

    #[test]
    fn test_job_builder() {
        let job = Job::builder("42")
            .payload(7u32)
            .priority(JobPriority::High)
            .build()
            .unwrap();
        assert_eq!(job.id().as_str(), "42");
        assert_eq!(job.priority(), JobPriority::High);
        assert_eq!(job.into_payload(), 7);
    }

    #[test]
    fn test_set_priority() {
        let mut job = Job::new("1", ()).unwrap();
        job.set_priority(JobPriority::Medium);
        assert_eq!(job.priority(), JobPriority::Medium);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High < JobPriority::Medium);
        assert!(JobPriority::Medium < JobPriority::Low);
    }

    #[test]
    fn test_job_serialization() {
        let job = Job::with_priority(
            "abc",
            TestPayload {
                message: "test".to_string(),
            },
            JobPriority::Medium,
        )
        .unwrap();
        let json = job.to_json().unwrap();
        assert!(json.contains("\"id\":\"abc\""));

        let deserialized: Job<TestPayload> = Job::from_json(&json).unwrap();
        assert_eq!(deserialized, job);
    }

    #[test]
    fn test_job_deserialization_rejects_blank_id() {
        let result = Job::<u32>::from_json(r#"{"id":"  ","payload":1,"priority":"Low"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_job_result_accepted() {
        let result = JobResult::accepted(JobId::new("1").unwrap());
        assert!(result.is_success());
        assert!(result.error_message.is_empty());
    }

    #[test]
    fn test_job_result_rejected() {
        let result = JobResult::rejected(JobId::new("1").unwrap(), "nope");
        assert!(!result.is_success());
        assert_eq!(result.error_message, "nope");
        assert_eq!(result.id.as_str(), "1");
    }
}
