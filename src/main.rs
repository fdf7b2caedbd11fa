use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use tokio::signal;
use tracing::{error, info};

use checkout_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let app_state = api::AppState::from_config(cfg.clone(), db_arc)
        .context("failed to build application state")?;

    if let Some(secs) = cfg.renewal_interval_secs.filter(|s| *s > 0) {
        spawn_renewal_loop(app_state.renewals.clone(), Duration::from_secs(secs));
    }

    let app = api::build_router(app_state);

    // Bind and serve
    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);
    info!("checkout-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// In-process alternative to the external scheduler.
fn spawn_renewal_loop(scheduler: Arc<api::services::renewals::RenewalScheduler>, every: Duration) {
    info!(interval_secs = every.as_secs(), "in-process renewal schedule enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match scheduler.run_due(Utc::now().date_naive()).await {
                Ok(summary) => info!(
                    processed = summary.processed,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "scheduled renewal batch finished"
                ),
                Err(e) => error!(error = %e, "scheduled renewal batch failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
