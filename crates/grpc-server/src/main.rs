//! Currency service
//!
//! Main entry point for the gRPC server

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use fx_core::{init_logging, Settings};
use fx_grpc_server::{CurrencyServiceImpl, GrpcServer, GrpcServerConfig, ServiceConfig};
use fx_rate_feed::{EcbFeed, RateTable};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    init_logging(settings.log.json);

    info!("Starting currency service v{}", env!("CARGO_PKG_VERSION"));

    // Initial rates; the service does not start without them
    let feed = EcbFeed::from_settings(&settings.feed)?;
    let table = match RateTable::load(&feed).await {
        Ok(table) => table,
        Err(e) => {
            error!(url = %feed.url(), error = %e, "unable to load initial rates");
            return Err(e.into());
        }
    };
    info!(currencies = table.snapshot().len(), "Initial rates loaded");

    let service = CurrencyServiceImpl::with_config(Arc::new(table), ServiceConfig::from(&settings));

    // Start background services
    service.start();

    let server = GrpcServer::with_service(GrpcServerConfig::from(&settings.grpc), service.clone());

    // Setup shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C");
            }
            _ = terminate => {
                info!("Received termination signal");
            }
        }

        let _ = shutdown_tx.send(());
    });

    info!("gRPC server listening on {}", server.address());
    info!("Press Ctrl+C to shutdown");

    let result = server.start_with_shutdown(shutdown_rx).await;
    service.stop();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e);
    }

    info!(uptime = ?service.uptime(), "Server shutdown complete");
    Ok(())
}
