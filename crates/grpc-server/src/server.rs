//! gRPC server configuration and startup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;

use fx_core::GrpcSettings;

use crate::proto::currency_server::CurrencyServer;
use crate::proto::FILE_DESCRIPTOR_SET;
use crate::service::CurrencyServiceImpl;

/// Server configuration
#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    pub host: String,
    pub port: u16,
    pub concurrency_limit_per_connection: usize,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        GrpcServerConfig::from(&GrpcSettings::default())
    }
}

impl From<&GrpcSettings> for GrpcServerConfig {
    fn from(settings: &GrpcSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            concurrency_limit_per_connection: 256,
            keep_alive_interval: Duration::from_secs(settings.keep_alive_interval_secs),
            keep_alive_timeout: Duration::from_secs(settings.keep_alive_timeout_secs),
        }
    }
}

/// gRPC server wrapper
pub struct GrpcServer {
    config: GrpcServerConfig,
    service: Arc<CurrencyServiceImpl>,
}

impl GrpcServer {
    pub fn with_service(config: GrpcServerConfig, service: CurrencyServiceImpl) -> Self {
        Self {
            config,
            service: Arc::new(service),
        }
    }

    /// Get reference to the service
    pub fn service(&self) -> &CurrencyServiceImpl {
        &self.service
    }

    /// Currency service plus server reflection, so clients can discover
    /// the available methods
    fn router(&self) -> anyhow::Result<Router> {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build()?;

        Ok(Server::builder()
            .concurrency_limit_per_connection(self.config.concurrency_limit_per_connection)
            .tcp_keepalive(Some(self.config.keep_alive_interval))
            .http2_keepalive_interval(Some(self.config.keep_alive_interval))
            .http2_keepalive_timeout(Some(self.config.keep_alive_timeout))
            .add_service(reflection)
            .add_service(CurrencyServer::new((*self.service).clone())))
    }

    /// Start the server
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.address().parse()?;
        info!("Starting gRPC server on {}", addr);

        self.router()?.serve(addr).await?;
        Ok(())
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = self.address().parse()?;
        info!("Starting gRPC server on {} (with graceful shutdown)", addr);

        let signal = self.shutdown_signal(async {
            shutdown.await.ok();
        });
        self.router()?.serve_with_shutdown(addr, signal).await?;

        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting gRPC server on {}", listener.local_addr()?);

        let signal = self.shutdown_signal(shutdown);
        self.router()?
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await?;

        Ok(())
    }

    /// Wrap a shutdown trigger so open subscription streams end with it
    ///
    /// Graceful shutdown waits for in-flight streams, and subscription
    /// streams only end when their connection closes.
    fn shutdown_signal<F>(&self, shutdown: F) -> impl Future<Output = ()>
    where
        F: Future<Output = ()>,
    {
        let service = Arc::clone(&self.service);
        async move {
            shutdown.await;
            info!("Shutdown signal received");
            service.close_connections();
        }
    }

    /// Get server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Builder for server configuration
pub struct GrpcServerBuilder {
    config: GrpcServerConfig,
    service: Option<CurrencyServiceImpl>,
}

impl GrpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: GrpcServerConfig::default(),
            service: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn concurrency_limit_per_connection(mut self, limit: usize) -> Self {
        self.config.concurrency_limit_per_connection = limit;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keep_alive_timeout = timeout;
        self
    }

    pub fn service(mut self, service: CurrencyServiceImpl) -> Self {
        self.service = Some(service);
        self
    }

    pub fn build(self) -> anyhow::Result<GrpcServer> {
        let service = self
            .service
            .ok_or_else(|| anyhow::anyhow!("gRPC server needs a currency service"))?;
        Ok(GrpcServer::with_service(self.config, service))
    }
}

impl Default for GrpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
