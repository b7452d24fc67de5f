//! gRPC service implementation

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use fx_core::{RateError, RatePair, RateResult, Settings, StreamSettings};
use fx_rate_feed::{FluctuationConfig, FluctuationDriver, RateTable};

use crate::broadcaster::Broadcaster;
use crate::connection::StreamConnection;
use crate::conversions::{rate_error_to_status, rate_response};
use crate::proto::currency_server::Currency;
use crate::proto::{RateRequest, RateResponse, StreamingRateResponse};
use crate::registry::SubscriptionRegistry;

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub fluctuation: FluctuationConfig,
    pub outbound_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            fluctuation: FluctuationConfig::default(),
            outbound_buffer: StreamSettings::default().outbound_buffer,
        }
    }
}

impl From<&Settings> for ServiceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            fluctuation: settings.fluctuation.clone().into(),
            outbound_buffer: settings.stream.outbound_buffer,
        }
    }
}

/// Service state
pub struct ServiceState {
    pub start_time: Instant,
    pub background: Vec<JoinHandle<()>>,
}

/// gRPC service implementation
#[derive(Clone)]
pub struct CurrencyServiceImpl {
    table: Arc<RateTable>,
    registry: Arc<SubscriptionRegistry>,
    config: ServiceConfig,
    state: Arc<RwLock<ServiceState>>,
}

impl CurrencyServiceImpl {
    pub fn new(table: Arc<RateTable>) -> Self {
        Self::with_config(table, ServiceConfig::default())
    }

    pub fn with_config(table: Arc<RateTable>, config: ServiceConfig) -> Self {
        Self {
            table,
            registry: Arc::new(SubscriptionRegistry::new()),
            config,
            state: Arc::new(RwLock::new(ServiceState {
                start_time: Instant::now(),
                background: Vec::new(),
            })),
        }
    }

    pub fn table(&self) -> Arc<RateTable> {
        Arc::clone(&self.table)
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.table), Arc::clone(&self.registry))
    }

    /// Start the fluctuation driver and the broadcaster
    pub fn start(&self) {
        let mut state = self.state.write();
        if !state.background.is_empty() {
            warn!("Background services already running");
            return;
        }

        let driver = FluctuationDriver::new(self.config.fluctuation.clone(), Arc::clone(&self.table));
        let (driver_handle, changed) = driver.spawn();
        let broadcaster_handle = self.broadcaster().spawn(changed);

        state.background.push(driver_handle);
        state.background.push(broadcaster_handle);
        info!("Fluctuation driver and broadcaster started");
    }

    /// Stop all background services
    pub fn stop(&self) {
        let mut state = self.state.write();
        for handle in state.background.drain(..) {
            handle.abort();
        }
        info!("All services stopped");
    }

    /// End every subscription stream so a graceful shutdown can complete
    pub fn close_connections(&self) {
        let closed = self.registry.close_all();
        info!(connections = closed, "Closed subscription streams");
    }

    pub fn is_running(&self) -> bool {
        !self.state.read().background.is_empty()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.state.read().start_time.elapsed()
    }

    /// Resolve a unary lookup
    ///
    /// Identical currencies are rejected before the table is consulted.
    pub fn lookup(&self, base: &str, destination: &str) -> RateResult<(RatePair, f64)> {
        let pair = RatePair::parse(base, destination)?;

        if pair.is_identity() {
            return Err(RateError::InvalidArgument {
                base: pair.base.to_string(),
                destination: pair.destination.to_string(),
            });
        }

        let rate = self.table.get_rate(&pair.base, &pair.destination)?;
        Ok((pair, rate))
    }
}

#[tonic::async_trait]
impl Currency for CurrencyServiceImpl {
    async fn get_rate(
        &self,
        request: Request<RateRequest>,
    ) -> Result<Response<RateResponse>, Status> {
        let req = request.into_inner();
        info!(base = %req.base, dest = %req.destination, "handle request for GetRate");

        match self.lookup(&req.base, &req.destination) {
            Ok((pair, rate)) => Ok(Response::new(rate_response(&pair, rate))),
            Err(e) => {
                warn!(base = %req.base, dest = %req.destination, error = %e, "GetRate failed");
                Err(rate_error_to_status(&e))
            }
        }
    }

    type SubscribeRatesStream =
        Pin<Box<dyn Stream<Item = Result<StreamingRateResponse, Status>> + Send>>;

    async fn subscribe_rates(
        &self,
        request: Request<Streaming<RateRequest>>,
    ) -> Result<Response<Self::SubscribeRatesStream>, Status> {
        let inbound = request.into_inner();
        let (connection, rx) =
            StreamConnection::open(Arc::clone(&self.registry), self.config.outbound_buffer);
        let connection_id = connection.id();

        // Inbound loop runs on its own task; outbound is drained by tonic
        tokio::spawn(async move {
            if let Err(e) = connection.run(inbound).await {
                warn!(connection_id = %connection_id, error = %e, "connection terminated");
            }
        });

        let stream = ReceiverStream::new(rx).map(|message| Ok(StreamingRateResponse::from(message)));
        Ok(Response::new(Box::pin(stream)))
    }
}
