use crate::jobs::model::{Job, JobStatus};
use crate::jobs::retry::Transition;
use crate::schema::{JobTableCapabilities, PayloadEncoding};
use sqlx::PgPool;
use std::sync::Arc;

pub const BATCH_SIZE: i64 = 10;
pub const MAX_RETRIES_ERROR: &str = "Failed to process job after maximum retries";

/// Which column counts attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptCounter {
    Retried,
    AttemptNum,
}

impl AttemptCounter {
    pub fn column(&self) -> &'static str {
        match self {
            AttemptCounter::Retried => "retried",
            AttemptCounter::AttemptNum => r#""attemptNum""#,
        }
    }
}

/// How `"BackgroundJob"` is driven: an attempt counter and `runAt` scheduling
/// are probed independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimVariant {
    /// `None`: every claim is attempt 1.
    pub counter: Option<AttemptCounter>,
    /// `runAt` gates eligibility and carries the retry backoff.
    pub scheduled: bool,
}

impl ClaimVariant {
    pub fn for_capabilities(caps: &JobTableCapabilities) -> Self {
        let counter = if caps.retried {
            Some(AttemptCounter::Retried)
        } else if caps.attempt_num {
            Some(AttemptCounter::AttemptNum)
        } else {
            None
        };

        Self {
            counter,
            scheduled: caps.run_at,
        }
    }

    pub fn counter_column(&self) -> Option<&'static str> {
        self.counter.map(|c| c.column())
    }

    pub fn schedules_with_run_at(&self) -> bool {
        self.scheduled
    }
}

/// SQL built once from the probed schema.
#[derive(Debug, Clone)]
pub struct JobQueries {
    pub variant: ClaimVariant,
    pub select_pending: String,
    pub claim: String,
    pub release: String,
    pub complete: String,
    pub reschedule: String,
    pub fail: String,
    pub count_pending: String,
}

const ACTIVE_GUARD: &str = "status::text IN ('PROCESSING', 'IN_PROGRESS')";

impl JobQueries {
    pub fn build(caps: &JobTableCapabilities) -> Self {
        let variant = ClaimVariant::for_capabilities(caps);

        let payload = match caps.payload {
            PayloadEncoding::Bytes => "payload".to_string(),
            PayloadEncoding::Text => "convert_to(payload::text, 'UTF8')".to_string(),
        };
        let attempts = variant
            .counter_column()
            .map(|c| format!("COALESCE({c}, 0)"))
            .unwrap_or_else(|| "0".to_string());
        let (eligible, order) = if variant.schedules_with_run_at() {
            (
                r#"AND ("runAt" IS NULL OR "runAt" <= NOW())"#,
                r#""runAt" ASC NULLS FIRST, id ASC"#,
            )
        } else {
            ("", "id ASC")
        };

        let select_pending = format!(
            r#"
            SELECT id,
                   name,
                   {payload} AS payload,
                   status::text AS status,
                   {attempts}::int4 AS attempts,
                   COALESCE("maxRetries", 0)::int4 AS max_retries
            FROM "BackgroundJob"
            WHERE status = 'PENDING'
              {eligible}
            ORDER BY {order}
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#
        );

        let mut claim_set = vec![format!("status = '{}'", JobStatus::Processing.as_str())];
        let mut release_set = vec![format!("status = '{}'", JobStatus::Pending.as_str())];
        if let Some(c) = variant.counter_column() {
            claim_set.push(format!("{c} = COALESCE({c}, 0) + 1"));
            release_set.push(format!("{c} = GREATEST(COALESCE({c}, 0) - 1, 0)"));
        }
        if caps.last_retried_at {
            claim_set.push(r#""lastRetriedAt" = NOW()"#.to_string());
        }
        let returning = variant
            .counter_column()
            .map(|c| format!("{c}::int4"))
            .unwrap_or_else(|| "1::int4".to_string());

        let claim = format!(
            r#"UPDATE "BackgroundJob" SET {} WHERE id = $1 RETURNING {returning}"#,
            claim_set.join(", ")
        );
        let release = format!(
            r#"UPDATE "BackgroundJob" SET {} WHERE id = $1 AND {ACTIVE_GUARD}"#,
            release_set.join(", ")
        );

        let complete = format!(
            r#"UPDATE "BackgroundJob" SET status = '{}' WHERE id = $1 AND {ACTIVE_GUARD}"#,
            JobStatus::Completed.as_str()
        );

        let reschedule = if variant.schedules_with_run_at() {
            format!(
                r#"UPDATE "BackgroundJob" SET status = '{}', "runAt" = NOW() + ($2::int * INTERVAL '1 minute') WHERE id = $1 AND {ACTIVE_GUARD}"#,
                JobStatus::Pending.as_str()
            )
        } else {
            format!(
                r#"UPDATE "BackgroundJob" SET status = '{}' WHERE id = $1 AND {ACTIVE_GUARD}"#,
                JobStatus::Pending.as_str()
            )
        };

        let fail = if caps.last_error {
            format!(
                r#"UPDATE "BackgroundJob" SET status = '{}', "lastError" = $2 WHERE id = $1 AND {ACTIVE_GUARD}"#,
                JobStatus::Failed.as_str()
            )
        } else {
            format!(
                r#"UPDATE "BackgroundJob" SET status = '{}' WHERE id = $1 AND {ACTIVE_GUARD}"#,
                JobStatus::Failed.as_str()
            )
        };

        Self {
            variant,
            select_pending,
            claim,
            release,
            complete,
            reschedule,
            fail,
            count_pending: r#"SELECT COUNT(*) FROM "BackgroundJob" WHERE status = 'PENDING'"#
                .to_string(),
        }
    }
}

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
    caps: JobTableCapabilities,
    queries: Arc<JobQueries>,
}

impl JobsRepo {
    pub fn new(pool: PgPool, caps: JobTableCapabilities) -> Self {
        Self {
            pool,
            caps,
            queries: Arc::new(JobQueries::build(&caps)),
        }
    }

    pub fn capabilities(&self) -> &JobTableCapabilities {
        &self.caps
    }

    pub fn variant(&self) -> ClaimVariant {
        self.queries.variant
    }

    pub async fn count_pending(&self) -> anyhow::Result<i64> {
        let n: i64 = sqlx::query_scalar(&self.queries.count_pending)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Claims up to `limit` eligible jobs.
    /// Uses SELECT ... FOR UPDATE SKIP LOCKED so concurrent workers never claim the same row.
    /// The returned jobs are committed as PROCESSING with their counter incremented.
    pub async fn claim_batch(&self, limit: i64) -> anyhow::Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;

        let mut jobs = sqlx::query_as::<_, Job>(&self.queries.select_pending)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        for job in &mut jobs {
            let attempts: i32 = sqlx::query_scalar(&self.queries.claim)
                .bind(&job.id)
                .fetch_one(&mut *tx)
                .await?;
            job.attempts = attempts;
            job.status = JobStatus::Processing.as_str().to_string();
        }

        tx.commit().await?;
        Ok(jobs)
    }

    /// Undoes a claim for a job whose delivery never started.
    pub async fn release(&self, job_id: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(&self.queries.release)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn mark_completed(&self, job_id: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(&self.queries.complete)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn reschedule(&self, job_id: &str, delay_minutes: i64) -> anyhow::Result<u64> {
        let mut q = sqlx::query(&self.queries.reschedule).bind(job_id);
        if self.queries.variant.schedules_with_run_at() {
            q = q.bind(i32::try_from(delay_minutes).unwrap_or(i32::MAX));
        }
        let res = q.execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    pub async fn mark_failed(&self, job_id: &str) -> anyhow::Result<u64> {
        let mut q = sqlx::query(&self.queries.fail).bind(job_id);
        if self.caps.last_error {
            q = q.bind(MAX_RETRIES_ERROR);
        }
        let res = q.execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    /// Writes the result of one attempt. Returns the number of rows touched.
    pub async fn apply(&self, job_id: &str, transition: Transition) -> anyhow::Result<u64> {
        match transition {
            Transition::Complete => self.mark_completed(job_id).await,
            Transition::Retry { delay } => self.reschedule(job_id, delay.num_minutes()).await,
            Transition::Fail => self.mark_failed(job_id).await,
        }
    }
}
