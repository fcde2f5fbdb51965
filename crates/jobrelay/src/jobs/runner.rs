use crate::delivery::{DeliveryError, JobHeaders, WebhookClient};
use crate::jobs::{
    canonical::{canonicalize, is_forwarded},
    enrich::Enricher,
    model::Job,
    repo::{JobsRepo, BATCH_SIZE},
    retry::{decide, RetryConfig, Transition},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// What one attempt at a claimed job came to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Skipped,
    Failed,
    /// Cancelled before the request went out; the claim is released.
    NotStarted,
    /// Cancelled mid-delivery; the row is left in PROCESSING.
    Interrupted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub released: usize,
    pub interrupted: usize,
}

#[derive(Clone)]
pub struct JobRunner {
    jobs: JobsRepo,
    enricher: Enricher,
    client: WebhookClient,
    retry_cfg: RetryConfig,
    batch_size: i64,
}

impl JobRunner {
    pub fn new(
        jobs: JobsRepo,
        enricher: Enricher,
        client: WebhookClient,
        retry_cfg: RetryConfig,
    ) -> Self {
        Self {
            jobs,
            enricher,
            client,
            retry_cfg,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn jobs(&self) -> &JobsRepo {
        &self.jobs
    }

    /// Claims one batch and drives every job in it to its next state.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> anyhow::Result<CycleStats> {
        let mut stats = CycleStats::default();

        match self.jobs.count_pending().await {
            Ok(n) => debug!(pending = n, "pending jobs"),
            Err(e) => debug!(error = %e, "could not count pending jobs"),
        }

        let batch = self.jobs.claim_batch(self.batch_size).await?;
        stats.claimed = batch.len();
        if batch.is_empty() {
            return Ok(stats);
        }
        info!(claimed = batch.len(), "claimed jobs");

        let mut remaining = batch.into_iter();
        while let Some(job) = remaining.next() {
            if cancel.is_cancelled() {
                stats.released += self.release(std::iter::once(job).chain(remaining)).await;
                break;
            }

            let span = tracing::info_span!("job", job.id = %job.id, job.name = %job.name);
            self.process(job, cancel, &mut stats).instrument(span).await;
        }

        Ok(stats)
    }

    async fn process(&self, job: Job, cancel: &CancellationToken, stats: &mut CycleStats) {
        let outcome = self.attempt(&job, cancel).await;

        let transition = match outcome {
            Outcome::NotStarted => {
                stats.released += self.release(std::iter::once(job)).await;
                return;
            }
            Outcome::Interrupted => {
                stats.interrupted += 1;
                warn!(attempt = job.attempts, "cancelled during delivery; job left PROCESSING");
                return;
            }
            Outcome::Delivered | Outcome::Skipped => Transition::Complete,
            Outcome::Failed => decide(false, job.attempts, job.max_retries, &self.retry_cfg),
        };

        match self.jobs.apply(&job.id, transition).await {
            Ok(0) => warn!(?transition, "job changed under us; result not written"),
            Ok(_) => {
                match (outcome, transition) {
                    (Outcome::Skipped, _) => stats.skipped += 1,
                    (_, Transition::Complete) => stats.completed += 1,
                    (_, Transition::Retry { .. }) => stats.retried += 1,
                    (_, Transition::Fail) => stats.failed += 1,
                }
                log_transition(&job, transition);
            }
            Err(e) => warn!(error = %e, ?transition, "failed to write job result"),
        }
    }

    async fn attempt(&self, job: &Job, cancel: &CancellationToken) -> Outcome {
        let canonical = canonicalize(&job.name);
        if !is_forwarded(&job.name, &canonical) {
            info!(job.kind = %canonical, "not a forwarded job type; skipping");
            return Outcome::Skipped;
        }

        let enriched = self.enricher.enrich(&job.name, job.payload_bytes()).await;
        let body = match enriched.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "could not serialize envelope");
                return Outcome::Failed;
            }
        };

        if cancel.is_cancelled() {
            return Outcome::NotStarted;
        }

        let headers = JobHeaders {
            job_type: &job.name,
            job_id: &enriched.job_id,
        };
        match self.client.deliver(Some(headers), body, cancel).await {
            Ok(_) => Outcome::Delivered,
            Err(DeliveryError::Cancelled) => Outcome::Interrupted,
            Err(e) => {
                warn!(job.kind = %enriched.job_id, status = ?e.status(), error = %e, "delivery failed");
                Outcome::Failed
            }
        }
    }

    async fn release(&self, jobs: impl Iterator<Item = Job>) -> usize {
        let mut released = 0;
        for job in jobs {
            match self.jobs.release(&job.id).await {
                Ok(n) if n > 0 => {
                    released += 1;
                    info!(job.id = %job.id, "released claim on shutdown");
                }
                Ok(_) => {}
                Err(e) => warn!(job.id = %job.id, error = %e, "failed to release claim"),
            }
        }
        released
    }
}

fn log_transition(job: &Job, transition: Transition) {
    match transition {
        Transition::Complete => info!(attempt = job.attempts, "job completed"),
        Transition::Retry { delay } => info!(
            attempt = job.attempts,
            max_retries = job.max_retries,
            retry_in_minutes = delay.num_minutes(),
            "job rescheduled"
        ),
        Transition::Fail => warn!(
            attempt = job.attempts,
            max_retries = job.max_retries,
            "job failed after maximum retries"
        ),
    }
}
