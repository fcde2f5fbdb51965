use chrono::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Upper bound on the `attempts²` minute delay.
    pub ceiling_minutes: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            ceiling_minutes: 60,
        }
    }
}

/// What the result transaction writes for a processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Complete,
    Retry { delay: Duration },
    Fail,
}

/// Backoff in minutes after attempt `attempts`: `attempts²`, capped.
pub fn backoff_minutes(attempts: i32, cfg: &RetryConfig) -> i64 {
    let attempts = i64::from(attempts.max(1));
    attempts
        .saturating_mul(attempts)
        .min(cfg.ceiling_minutes.max(1))
}

pub fn next_delay(attempts: i32, cfg: &RetryConfig) -> Duration {
    Duration::minutes(backoff_minutes(attempts, cfg))
}

/// `attempts` is the post-claim counter, so it already includes this attempt.
pub fn decide(delivered: bool, attempts: i32, max_retries: i32, cfg: &RetryConfig) -> Transition {
    if delivered {
        Transition::Complete
    } else if attempts < max_retries {
        Transition::Retry {
            delay: next_delay(attempts, cfg),
        }
    } else {
        Transition::Fail
    }
}
