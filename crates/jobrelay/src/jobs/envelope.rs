use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Body posted to the backend for a claimed job.
///
/// `event`, `job`, `job_type`, `job_id` and `job_definition_id` all carry the
/// canonical job ID; the backend reads different ones depending on its route.
#[derive(Debug, Clone, Serialize)]
pub struct JobEnvelope {
    pub event: String,
    pub data: Value,
    pub job: String,
    pub job_type: String,
    pub job_id: String,
    pub job_definition_id: String,
    pub original_job_name: String,
    pub timestamp: i64,
    #[serde(rename = "documentId", skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl JobEnvelope {
    pub fn new(job_id: &str, original_job_name: &str, data: Value, timestamp: i64) -> Self {
        Self {
            event: job_id.to_string(),
            data,
            job: job_id.to_string(),
            job_type: job_id.to_string(),
            job_id: job_id.to_string(),
            job_definition_id: job_id.to_string(),
            original_job_name: original_job_name.to_string(),
            timestamp,
            document_id: None,
        }
    }

    pub fn with_document_id(mut self, document_id: Option<String>) -> Self {
        self.document_id = document_id;
        self
    }
}

/// Body posted for a document completion found without a job row.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentCompletedEnvelope {
    pub event: &'static str,
    pub data: DocumentCompletedData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCompletedData {
    pub document_id: i64,
    pub status: String,
    pub completed_at: String,
}

impl DocumentCompletedEnvelope {
    pub fn new(document_id: i64, status: &str, completed_at: DateTime<Utc>) -> Self {
        Self {
            event: crate::jobs::canonical::DOCUMENT_COMPLETED,
            data: DocumentCompletedData {
                document_id,
                status: status.to_string(),
                completed_at: completed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        }
    }
}
