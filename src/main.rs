use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use dues_ledger::{config::Config, db, services::sweep_service, PgLedgerStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting dues ledger sweep worker...");

    let config = Config::from_env()?;
    tracing::info!(
        sweep_interval_secs = config.sweep_interval_secs,
        late_fee_amount = %config.late_fee_amount,
        billing_currency = %config.billing_currency,
        webhook_secret_configured = config.provider_webhook_secret.is_some(),
        webhook_tolerance_secs = config.webhook_tolerance_secs,
        "Configuration loaded"
    );

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    db::run_migrations(&pool).await?;

    let store = PgLedgerStore::new(pool);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let today = Utc::now().date_naive();
                if let Err(e) = sweep_service::run_sweep(&store, config.late_fee_amount, today).await {
                    tracing::error!(error = %e, "Ledger sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, stopping sweep worker");
                break;
            }
        }
    }

    Ok(())
}
