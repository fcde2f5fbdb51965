use crate::config::Config;
use crate::delivery::WebhookClient;
use crate::documents::DocumentNotifier;
use crate::jobs::{retry::RetryConfig, Enricher, JobRunner, JobsRepo};
use crate::schema::{Capabilities, SchemaProbe};
use rand::Rng;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which path a poll tick takes, fixed by the schema probe at startup.
pub enum Mode {
    Jobs(JobRunner),
    Documents(DocumentNotifier),
    /// Neither table exists; ticks do nothing.
    Idle,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Jobs(_) => "jobs",
            Mode::Documents(_) => "documents",
            Mode::Idle => "idle",
        }
    }
}

pub struct Poller {
    mode: Mode,
    interval: Duration,
    jitter: Duration,
}

impl Poller {
    pub fn new(mode: Mode, interval: Duration, jitter: Duration) -> Self {
        Self {
            mode,
            interval,
            jitter,
        }
    }

    /// Probes the schema and wires the matching path.
    pub async fn build(pool: PgPool, cfg: &Config) -> anyhow::Result<Self> {
        let caps = SchemaProbe::new(pool.clone()).capabilities().await?;
        let client = WebhookClient::new(cfg.webhook_url.clone(), cfg.webhook_secret.clone())?;
        let url = client.url().clone();
        let mode = mode_for(pool, caps, client, cfg);

        info!(
            mode = mode.name(),
            %url,
            poll_interval_secs = cfg.poll_interval.as_secs(),
            "poller ready"
        );
        Ok(Self::new(mode, cfg.poll_interval, cfg.poll_jitter))
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// One tick. Errors are logged here; the loop never stops on them.
    pub async fn poll_once(&self, cancel: &CancellationToken) {
        match &self.mode {
            Mode::Jobs(runner) => match runner.run_cycle(cancel).await {
                Ok(stats) if stats.claimed > 0 => info!(?stats, "cycle finished"),
                Ok(_) => debug!("no eligible jobs"),
                Err(e) => log_cycle_error("job cycle failed", &e),
            },
            Mode::Documents(notifier) => match notifier.run_once(cancel).await {
                Ok(stats) if stats.found > 0 => info!(?stats, "document cycle finished"),
                Ok(_) => debug!("no completed documents to announce"),
                Err(e) => log_cycle_error("document cycle failed", &e),
            },
            Mode::Idle => debug!("no job or document table; nothing to poll"),
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("poll loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.poll_once(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.next_sleep()) => {}
            }
        }
        info!("poll loop stopped");
    }

    fn next_sleep(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

fn mode_for(pool: PgPool, caps: Capabilities, client: WebhookClient, cfg: &Config) -> Mode {
    if let Some(job_caps) = caps.jobs {
        let jobs = JobsRepo::new(pool.clone(), job_caps);
        info!(variant = ?jobs.variant(), caps = ?jobs.capabilities(), "using BackgroundJob queue");
        let enricher = Enricher::new(pool, cfg.signing_url_base.clone())
            .with_document_id_cast(caps.recipient_document_id);
        let retry_cfg = RetryConfig {
            ceiling_minutes: cfg.backoff_ceiling_minutes,
        };
        return Mode::Jobs(JobRunner::new(jobs, enricher, client, retry_cfg));
    }

    if let Some(doc_caps) = caps.documents {
        info!(
            webhook_notified = doc_caps.webhook_notified,
            "no BackgroundJob table; announcing completed documents instead"
        );
        return Mode::Documents(DocumentNotifier::new(pool, doc_caps, client));
    }

    warn!("neither BackgroundJob nor Document table found");
    Mode::Idle
}

/// Missing relations are a schema mismatch, not a fault; keep them out of the error log.
pub fn is_missing_relation(e: &anyhow::Error) -> bool {
    format!("{e:#}").contains("does not exist")
}

fn log_cycle_error(msg: &str, e: &anyhow::Error) {
    if is_missing_relation(e) {
        debug!(error = %e, "{msg}");
    } else {
        error!(error = %e, "{msg}");
    }
}
