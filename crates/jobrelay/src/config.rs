use reqwest::Url;
use std::fmt;
use std::time::Duration;

const DEFAULT_BACKEND_URL: &str = "https://api.curiousdev.net";
const DEFAULT_WEBHOOK_PATH: &str = "/webhooks/documenso";
pub const DEFAULT_SIGNING_URL_BASE: &str = "https://documen.so/sign/";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid delivery url {url:?}: {reason}")]
    InvalidWebhookUrl { url: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Connection parts for the jobs database.
#[derive(Clone)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Full URI tried ahead of the synthesized dialects.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

// Keep the password out of logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

// Config is the single typed view of the environment.
// It is built once at startup and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub db: DbConfig,
    pub startup_delay: Duration,
    pub max_connection_retries: u32,
    pub webhook_url: Url,
    pub webhook_secret: Option<String>,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub debug: bool,
    pub signing_url_base: String,
    pub backoff_ceiling_minutes: i64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = Self::from_lookup(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let db = DbConfig {
            user: text("POSTGRES_USER", "documenso"),
            password: text("POSTGRES_PASSWORD", "password"),
            host: text("POSTGRES_HOST", "documenso-postgres"),
            port: parse_or(get("POSTGRES_PORT"), 5432u16, |p| *p > 0),
            database: text("POSTGRES_DB", "documenso"),
            url: get("DATABASE_URL"),
            max_connections: parse_or(get("DB_MAX_CONNECTIONS"), 4u32, |_| true).clamp(2, 32),
            acquire_timeout: Duration::from_secs(
                parse_or(get("DB_ACQUIRE_TIMEOUT_SECS"), 10u64, |_| true).clamp(1, 60),
            ),
        };

        let backend_url = text("BACKEND_URL", DEFAULT_BACKEND_URL);
        let webhook_path = text("WEBHOOK_PATH", DEFAULT_WEBHOOK_PATH);
        let webhook_url = parse_webhook_url(&format!("{backend_url}{webhook_path}"))?;

        let log_format = match get("LOG_FORMAT").map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            db,
            startup_delay: Duration::from_secs(parse_or(get("STARTUP_DELAY"), 60u64, |_| true)),
            max_connection_retries: parse_or(get("MAX_CONNECTION_RETRIES"), 30u32, |_| true)
                .max(1),
            webhook_url,
            webhook_secret: get("DOCUMENSO_WEBHOOK_SECRET"),
            poll_interval: Duration::from_secs(parse_or(get("POLL_INTERVAL"), 15u64, |s| *s > 0)),
            poll_jitter: Duration::from_millis(parse_or(get("POLL_JITTER_MS"), 0u64, |_| true)),
            debug: get("DEBUG").map(|v| is_truthy(&v)).unwrap_or(false),
            signing_url_base: text("SIGNING_URL_BASE", DEFAULT_SIGNING_URL_BASE),
            backoff_ceiling_minutes: parse_or(
                get("RETRY_BACKOFF_CEILING_MINUTES"),
                60i64,
                |m| *m > 0,
            ),
            log_format,
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T, valid: impl Fn(&T) -> bool) -> T {
    raw.and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| valid(v))
        .unwrap_or(default)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_webhook_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidWebhookUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}
