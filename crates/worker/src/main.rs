use jobrelay::config::{self, LogFormat};
use jobrelay::db;
use jobrelay::poller::Poller;
use jobrelay::telemetry;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match config::Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            telemetry::init(false, LogFormat::Text);
            error!(error = %e, "invalid configuration");
            return Err(e);
        }
    };

    telemetry::init(cfg.debug, cfg.log_format);

    info!(
        db_host = %cfg.db.host,
        db_port = cfg.db.port,
        db_name = %cfg.db.database,
        url = %cfg.webhook_url,
        secret = if cfg.webhook_secret.is_some() { "set" } else { "unset" },
        poll_interval_secs = cfg.poll_interval.as_secs(),
        startup_delay_secs = cfg.startup_delay.as_secs(),
        max_connection_retries = cfg.max_connection_retries,
        "jobrelay worker starting"
    );
    if cfg.webhook_secret.is_none() {
        warn!("DOCUMENSO_WEBHOOK_SECRET is not set; deliveries go out unsigned");
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    if !cfg.startup_delay.is_zero() {
        info!(secs = cfg.startup_delay.as_secs(), "waiting before first connect");
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown requested during startup delay");
                return Ok(());
            }
            _ = tokio::time::sleep(cfg.startup_delay) => {}
        }
    }

    let Some(pool) = db::connect_with_retry(&cfg, &cancel).await? else {
        info!("shutdown requested while connecting");
        return Ok(());
    };

    match db::server_version(&pool).await {
        Ok(version) => info!(%version, "database server"),
        Err(e) => warn!(error = %e, "could not read server version"),
    }

    let poller = Poller::build(pool.clone(), &cfg).await?;
    poller.run(cancel).await;

    pool.close().await;
    info!("jobrelay worker stopped");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
    cancel.cancel();
}
