//! Probes for optional tables and columns in the signing service's schema.
//!
//! The upstream schema has drifted across releases, so the worker asks
//! `information_schema` once and builds every query from the answer.

use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub const JOB_TABLE: &str = "BackgroundJob";
pub const DOCUMENT_TABLE: &str = "Document";
pub const RECIPIENT_TABLE: &str = "Recipient";

/// How the `payload` column is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    Bytes,
    /// `text`, `json`, `jsonb`: read through a UTF-8 conversion.
    Text,
}

/// Cast target for a bound id compared against a column of `data_type`.
pub fn id_cast_for(data_type: &str) -> Option<&'static str> {
    match data_type {
        "integer" => Some("int4"),
        "bigint" => Some("int8"),
        "smallint" => Some("int2"),
        "text" | "character varying" => Some("text"),
        "uuid" => Some("uuid"),
        _ => None,
    }
}

impl PayloadEncoding {
    pub fn from_data_type(data_type: &str) -> Self {
        if data_type.eq_ignore_ascii_case("bytea") {
            PayloadEncoding::Bytes
        } else {
            PayloadEncoding::Text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTableCapabilities {
    pub attempt_num: bool,
    pub run_at: bool,
    pub retried: bool,
    pub last_error: bool,
    pub last_retried_at: bool,
    pub payload: PayloadEncoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentCapabilities {
    pub webhook_notified: bool,
}

/// Everything the poll loop needs to know about the schema, computed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub jobs: Option<JobTableCapabilities>,
    pub documents: Option<DocumentCapabilities>,
    /// Cast for ids compared with `"Recipient"."documentId"`.
    pub recipient_document_id: Option<&'static str>,
}

type ProbeKey = (String, Option<String>);

pub struct SchemaProbe {
    pool: PgPool,
    // (table, None) -> table exists; (table, Some(column)) -> column data type
    cache: Mutex<HashMap<ProbeKey, Option<String>>>,
}

impl SchemaProbe {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &ProbeKey) -> Option<Option<String>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember(&self, key: ProbeKey, value: Option<String>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    pub async fn has_table(&self, table: &str) -> anyhow::Result<bool> {
        let key = (table.to_string(), None);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit.is_some());
        }

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema()
                  AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        self.remember(key, exists.then(|| "table".to_string()));
        Ok(exists)
    }

    /// Data type of `table.column`, or `None` when the column is absent.
    pub async fn column_type(&self, table: &str, column: &str) -> anyhow::Result<Option<String>> {
        let key = (table.to_string(), Some(column.to_string()));
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let data_type: Option<String> = sqlx::query_scalar(
            r#"
            SELECT data_type::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = $1
              AND column_name = $2
            "#,
        )
        .bind(table)
        .bind(column)
        .fetch_optional(&self.pool)
        .await?;

        self.remember(key, data_type.clone());
        Ok(data_type)
    }

    pub async fn has_column(&self, table: &str, column: &str) -> anyhow::Result<bool> {
        Ok(self.column_type(table, column).await?.is_some())
    }

    pub async fn job_capabilities(&self) -> anyhow::Result<Option<JobTableCapabilities>> {
        if !self.has_table(JOB_TABLE).await? {
            return Ok(None);
        }

        let payload = self
            .column_type(JOB_TABLE, "payload")
            .await?
            .map(|t| PayloadEncoding::from_data_type(&t))
            .unwrap_or(PayloadEncoding::Text);

        Ok(Some(JobTableCapabilities {
            attempt_num: self.has_column(JOB_TABLE, "attemptNum").await?,
            run_at: self.has_column(JOB_TABLE, "runAt").await?,
            retried: self.has_column(JOB_TABLE, "retried").await?,
            last_error: self.has_column(JOB_TABLE, "lastError").await?,
            last_retried_at: self.has_column(JOB_TABLE, "lastRetriedAt").await?,
            payload,
        }))
    }

    pub async fn document_capabilities(&self) -> anyhow::Result<Option<DocumentCapabilities>> {
        if !self.has_table(DOCUMENT_TABLE).await? {
            return Ok(None);
        }

        Ok(Some(DocumentCapabilities {
            webhook_notified: self.has_column(DOCUMENT_TABLE, "webhookNotified").await?,
        }))
    }

    pub async fn capabilities(&self) -> anyhow::Result<Capabilities> {
        let caps = Capabilities {
            jobs: self.job_capabilities().await?,
            documents: self.document_capabilities().await?,
            recipient_document_id: self
                .column_type(RECIPIENT_TABLE, "documentId")
                .await?
                .and_then(|t| id_cast_for(&t)),
        };
        info!(?caps, "schema probed");
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_encoding_from_information_schema_type() {
        assert_eq!(PayloadEncoding::from_data_type("bytea"), PayloadEncoding::Bytes);
        assert_eq!(PayloadEncoding::from_data_type("jsonb"), PayloadEncoding::Text);
        assert_eq!(PayloadEncoding::from_data_type("text"), PayloadEncoding::Text);
    }

    #[test]
    fn id_casts_cover_common_key_types() {
        assert_eq!(id_cast_for("integer"), Some("int4"));
        assert_eq!(id_cast_for("bigint"), Some("int8"));
        assert_eq!(id_cast_for("character varying"), Some("text"));
        assert_eq!(id_cast_for("numeric"), None);
    }
}
