//! Currency watcher
//!
//! Resolves the configured currencies and keeps logging the pushed rates

use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use fx_client::RateCache;
use fx_core::{init_logging, Settings, BASE_CURRENCY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    init_logging(settings.log.json);

    info!(endpoint = %settings.client.endpoint, "Connecting to currency service");
    let cache = RateCache::connect(settings.client.endpoint.clone()).await?;

    for code in &settings.client.watch {
        match cache.resolve(code).await {
            Ok(rate) => info!(base = BASE_CURRENCY, dest = %code, rate, "Resolved rate"),
            Err(e) => error!(dest = %code, error = %e, "Unable to resolve rate"),
        }
    }

    let mut report = tokio::time::interval(Duration::from_secs(settings.fluctuation.interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
            _ = report.tick() => {
                if !cache.is_connected() {
                    warn!("Subscription stream closed, cached rates are frozen");
                    break;
                }
                for (code, rate) in cache.rates() {
                    info!(dest = %code, rate, "Cached rate");
                }
            }
        }
    }

    info!("Watcher stopped");
    Ok(())
}
