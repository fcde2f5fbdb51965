//! Turns a stored job payload into the envelope the backend expects.
//!
//! Lookups against `VerificationToken` and `Recipient` are best effort: a miss
//! or a query error leaves the optional field out and the job still goes out.

use crate::jobs::canonical::{canonicalize, JobKind};
use crate::jobs::envelope::JobEnvelope;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::{debug, info, warn};

const DOCUMENT_ID_FIELDS: [&str; 5] = ["documentId", "document_id", "id", "docId", "doc_id"];

/// Enrichment output: the canonical ID used for headers and the serialized envelope.
#[derive(Debug, Clone)]
pub struct EnrichedJob {
    pub job_id: String,
    pub envelope: JobEnvelope,
}

impl EnrichedJob {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.envelope)?)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RecipientRow {
    email: Option<String>,
    name: Option<String>,
    token: Option<String>,
}

#[derive(Clone)]
pub struct Enricher {
    pool: PgPool,
    signing_url_base: String,
    // Cast applied to the bound id so `"Recipient"."documentId"` is compared uncast.
    document_id_cast: Option<&'static str>,
}

impl Enricher {
    pub fn new(pool: PgPool, signing_url_base: impl Into<String>) -> Self {
        Self {
            pool,
            signing_url_base: signing_url_base.into(),
            document_id_cast: Some("int4"),
        }
    }

    /// `None` falls back to comparing the column as text.
    pub fn with_document_id_cast(mut self, cast: Option<&'static str>) -> Self {
        self.document_id_cast = cast;
        self
    }

    pub async fn enrich(&self, job_name: &str, payload: &[u8]) -> EnrichedJob {
        self.enrich_at(job_name, payload, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn enrich_at(&self, job_name: &str, payload: &[u8], timestamp: i64) -> EnrichedJob {
        let mut data = parse_payload(payload);
        let job_id = canonicalize(job_name);
        let mut document_id = None;

        match JobKind::of(&job_id) {
            JobKind::SignupConfirmation => self.add_verification_token(&mut data).await,
            JobKind::Signing => self.add_recipients(&mut data).await,
            JobKind::DocumentCompleted => {
                document_id = document_id_from(&data);
                match &document_id {
                    Some(id) => debug!(document_id = %id, "document.completed job"),
                    None => warn!("document.completed job without a document id"),
                }
            }
            JobKind::Other => {}
        }

        let envelope = JobEnvelope::new(&job_id, job_name, Value::Object(data), timestamp)
            .with_document_id(document_id);

        EnrichedJob { job_id, envelope }
    }

    async fn add_verification_token(&self, data: &mut Map<String, Value>) {
        let Some(email) = data
            .get("email")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
        else {
            warn!("signup confirmation payload has no email");
            return;
        };

        match self.verification_token(&email).await {
            Ok(Some(token)) => {
                info!(%email, "added verification token to confirmation payload");
                data.insert("token".to_string(), Value::String(token));
            }
            Ok(None) => warn!(%email, "no open verification token for email"),
            Err(e) => warn!(%email, error = %e, "verification token lookup failed"),
        }
    }

    async fn add_recipients(&self, data: &mut Map<String, Value>) {
        let Some(document_id) = document_id_from(data) else {
            debug!("signing payload has no document id");
            return;
        };

        let mut recipients = recipients_from_payload(data);
        if recipients.is_empty() {
            match self.recipients_for_document(&document_id).await {
                Ok(rows) => {
                    recipients = rows
                        .into_iter()
                        .map(|r| recipient_with_signing_url(r, &self.signing_url_base))
                        .collect();
                }
                Err(e) => warn!(%document_id, error = %e, "recipient lookup failed"),
            }
        }

        info!(
            %document_id,
            recipients = recipients.len(),
            "enriched signing payload"
        );
        data.insert("document_id".to_string(), Value::String(document_id));
        if !recipients.is_empty() {
            data.insert("recipients".to_string(), Value::Array(recipients));
        }
    }

    pub async fn verification_token(&self, email: &str) -> anyhow::Result<Option<String>> {
        let token: Option<String> = sqlx::query_scalar(
            r#"
            SELECT vt."token"
            FROM "VerificationToken" vt
            JOIN "User" u ON u."id" = vt."userId"
            WHERE u."email" = $1
              AND vt."identifier" = 'confirmation-email'
              AND vt."completed" = false
            ORDER BY vt."createdAt" DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn recipients_for_document(&self, document_id: &str) -> anyhow::Result<Vec<RecipientRow>> {
        let rows = sqlx::query_as::<_, RecipientRow>(&recipients_sql(self.document_id_cast))
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

fn recipients_sql(document_id_cast: Option<&str>) -> String {
    let filter = match document_id_cast {
        Some(cast) => format!(r#"r."documentId" = $1::{cast}"#),
        None => r#"r."documentId"::text = $1"#.to_string(),
    };
    format!(
        r#"
        SELECT r."email", r."name", r."token"
        FROM "Recipient" r
        WHERE {filter}
        ORDER BY r."email" ASC
        "#
    )
}

/// Parses a stored payload as a JSON object, wrapping anything else as `raw_data`.
pub fn parse_payload(payload: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Map<String, Value>>(payload) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "job payload is not a JSON object; wrapping as raw_data");
            let mut map = Map::new();
            map.insert(
                "raw_data".to_string(),
                Value::String(String::from_utf8_lossy(payload).into_owned()),
            );
            map
        }
    }
}

/// Finds a document ID at the top level, then under `payload`, then under `data`.
pub fn document_id_from(payload: &Map<String, Value>) -> Option<String> {
    document_id_in(payload)
        .or_else(|| {
            payload
                .get("payload")
                .and_then(Value::as_object)
                .and_then(document_id_in)
        })
        .or_else(|| {
            payload
                .get("data")
                .and_then(Value::as_object)
                .and_then(document_id_in)
        })
}

fn document_id_in(obj: &Map<String, Value>) -> Option<String> {
    DOCUMENT_ID_FIELDS.iter().find_map(|field| match obj.get(*field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| format!("{f:.0}"))
            }
        }
        _ => None,
    })
}

/// Recipients carried in `data.recipients`, reduced to the fields the backend reads.
pub fn recipients_from_payload(payload: &Map<String, Value>) -> Vec<Value> {
    let Some(list) = payload
        .get("data")
        .and_then(|d| d.get("recipients"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    list.iter()
        .filter_map(Value::as_object)
        .filter_map(|r| {
            let mut out = Map::new();
            if let Some(email) = r.get("email").and_then(Value::as_str) {
                out.insert("email".to_string(), json!(email));
            }
            if let Some(name) = r.get("name").and_then(Value::as_str) {
                out.insert("name".to_string(), json!(name));
            }
            if let Some(url) = r.get("signingUrl").and_then(Value::as_str) {
                out.insert("signing_url".to_string(), json!(url));
            }
            (!out.is_empty()).then_some(Value::Object(out))
        })
        .collect()
}

fn recipient_with_signing_url(row: RecipientRow, signing_url_base: &str) -> Value {
    let token = row.token.unwrap_or_default();
    json!({
        "email": row.email.unwrap_or_default(),
        "name": row.name.unwrap_or_default(),
        "signing_url": format!("{signing_url_base}{token}"),
        "token": token,
    })
}
