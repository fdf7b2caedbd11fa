//! Runs the subscription renewal batch once. Meant for cron or a Kubernetes CronJob.
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::info;

use checkout_api::{config, db, AppState};

#[derive(Debug, Parser)]
#[command(
    name = "renewal-runner",
    about = "Converts due subscriptions into pending orders"
)]
struct Cli {
    /// Treat this date (YYYY-MM-DD) as today instead of the current UTC date
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Print the summary as compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,

    /// Exit non-zero when any subscription failed to renew
    #[arg(long)]
    fail_on_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        db::run_migrations(&pool)
            .await
            .context("failed running migrations")?;
    }

    let state = AppState::from_config(cfg, Arc::new(pool))?;
    let today = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    info!(%today, "running renewal batch");

    let summary = state.renewals.run_due(today).await?;
    let rendered = if cli.compact {
        serde_json::to_string(&summary)?
    } else {
        serde_json::to_string_pretty(&summary)?
    };
    println!("{}", rendered);

    if cli.fail_on_error && summary.failed > 0 {
        bail!("{} subscription(s) failed to renew", summary.failed);
    }
    Ok(())
}
