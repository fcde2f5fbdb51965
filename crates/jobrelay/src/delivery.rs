use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LOGGED_BODY_LIMIT: usize = 512;

pub const SECRET_HEADER: &str = "X-Documenso-Secret";
pub const SIGNATURE_HEADER: &str = "X-Documenso-Signature";
pub const JOB_TYPE_HEADER: &str = "X-Documenso-Job-Type";
pub const JOB_ID_HEADER: &str = "X-Documenso-Job-ID";
pub const JOB_DEFINITION_ID_HEADER: &str = "X-Documenso-Job-Definition-ID";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend responded with status {status}")]
    Rejected { status: u16, body: String },

    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Transport(e) => e.status().map(|s| s.as_u16()),
            DeliveryError::Rejected { status, .. } => Some(*status),
            DeliveryError::Cancelled => None,
        }
    }
}

/// Extra headers sent with job deliveries.
#[derive(Debug, Clone, Copy)]
pub struct JobHeaders<'a> {
    /// Raw job name from the row.
    pub job_type: &'a str,
    /// Canonical job ID.
    pub job_id: &'a str,
}

/// Posts envelopes to the backend webhook. One per process; cheap to clone.
#[derive(Clone)]
pub struct WebhookClient {
    http: Client,
    url: Url,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(url: Url, secret: Option<String>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, url, secret })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Posts `body`. `Ok` carries the 2xx status; every other outcome is an error.
    pub async fn deliver(
        &self,
        job: Option<JobHeaders<'_>>,
        body: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<u16, DeliveryError> {
        let mut req = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json");

        if let Some(job) = job {
            req = req
                .header(JOB_TYPE_HEADER, job.job_type)
                .header(JOB_ID_HEADER, job.job_id)
                .header(JOB_DEFINITION_ID_HEADER, job.job_id);
        }

        // Both headers carry the same secret; backend routes differ in which one they read.
        if let Some(secret) = &self.secret {
            req = req
                .header(SECRET_HEADER, secret.as_str())
                .header(SIGNATURE_HEADER, secret.as_str());
        }

        let send = async {
            let resp = req.body(body).send().await?;
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            res = send => res?,
        };

        let body = truncate(&text, LOGGED_BODY_LIMIT);
        if status.is_success() {
            info!(url = %self.url, status = status.as_u16(), "delivered");
            debug!(response = %body, "backend response");
            Ok(status.as_u16())
        } else {
            warn!(url = %self.url, status = status.as_u16(), response = %body, "delivery rejected");
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: body.to_string(),
            })
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
