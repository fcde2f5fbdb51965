/// One row of `"BackgroundJob"` as claimed by this worker.
///
/// `attempts` is the post-claim value of `retried` (or `attemptNum`), i.e. it
/// already counts the attempt in flight.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: Option<Vec<u8>>,
    pub status: String,
    pub attempts: i32,
    pub max_retries: i32,
}

impl Job {
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}
