//! Fallback relay for deployments without a `"BackgroundJob"` table: completed
//! documents are read straight from `"Document"` and announced as
//! `document.completed`.

use crate::delivery::{DeliveryError, WebhookClient};
use crate::jobs::envelope::DocumentCompletedEnvelope;
use crate::schema::DocumentCapabilities;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BATCH_SIZE: i64 = 10;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompletedDocument {
    pub id: i64,
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyStats {
    pub found: usize,
    pub delivered: usize,
    pub marked: usize,
}

pub fn completed_documents_sql(caps: &DocumentCapabilities) -> &'static str {
    if caps.webhook_notified {
        r#"
        SELECT d.id::int8 AS id,
               d.status::text AS status,
               d."completedAt"::timestamptz AS completed_at
        FROM "Document" d
        WHERE d.status::text = 'COMPLETED'
          AND d."completedAt" IS NOT NULL
          AND COALESCE(d."webhookNotified", false) = false
          AND EXISTS (
              SELECT 1 FROM "Webhook" w
              WHERE w."userId" = d."userId" OR w."teamId" = d."teamId"
          )
        ORDER BY d."completedAt" ASC, d.id ASC
        LIMIT $1
        "#
    } else {
        // Without the flag, recency bounds how often a document is re-announced.
        r#"
        SELECT d.id::int8 AS id,
               d.status::text AS status,
               d."completedAt"::timestamptz AS completed_at
        FROM "Document" d
        WHERE d.status::text = 'COMPLETED'
          AND d."completedAt" IS NOT NULL
          AND d."completedAt" > NOW() - INTERVAL '1 day'
          AND EXISTS (
              SELECT 1 FROM "Webhook" w
              WHERE w."userId" = d."userId" OR w."teamId" = d."teamId"
          )
        ORDER BY d."completedAt" ASC, d.id ASC
        LIMIT $1
        "#
    }
}

#[derive(Clone)]
pub struct DocumentNotifier {
    pool: PgPool,
    caps: DocumentCapabilities,
    client: WebhookClient,
}

impl DocumentNotifier {
    pub fn new(pool: PgPool, caps: DocumentCapabilities, client: WebhookClient) -> Self {
        Self { pool, caps, client }
    }

    pub async fn completed_documents(&self) -> anyhow::Result<Vec<CompletedDocument>> {
        let docs = sqlx::query_as::<_, CompletedDocument>(completed_documents_sql(&self.caps))
            .bind(BATCH_SIZE)
            .fetch_all(&self.pool)
            .await?;
        Ok(docs)
    }

    pub async fn mark_notified(&self, document_id: i64) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE "Document" SET "webhookNotified" = true WHERE id = $1"#)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Announces up to one batch of completed documents.
    pub async fn run_once(&self, cancel: &CancellationToken) -> anyhow::Result<NotifyStats> {
        let docs = self.completed_documents().await?;
        let mut stats = NotifyStats {
            found: docs.len(),
            ..Default::default()
        };

        for doc in docs {
            if cancel.is_cancelled() {
                break;
            }

            let body = serde_json::to_vec(&DocumentCompletedEnvelope::new(
                doc.id,
                &doc.status,
                doc.completed_at,
            ))?;

            match self.client.deliver(None, body, cancel).await {
                Ok(_) => stats.delivered += 1,
                Err(DeliveryError::Cancelled) => break,
                Err(e) => {
                    warn!(document_id = doc.id, status = ?e.status(), error = %e, "document.completed delivery failed");
                    continue;
                }
            }

            if !self.caps.webhook_notified {
                debug!(document_id = doc.id, "no webhookNotified column; not marking");
                continue;
            }

            match self.mark_notified(doc.id).await {
                Ok(()) => {
                    stats.marked += 1;
                    info!(document_id = doc.id, "document marked as notified");
                }
                Err(e) => warn!(document_id = doc.id, error = %e, "failed to mark document notified"),
            }
        }

        Ok(stats)
    }
}
