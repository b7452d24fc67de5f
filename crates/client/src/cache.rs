//! Client-side rate cache

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Status, Streaming};
use tracing::{debug, error, info, warn};

use fx_core::{ClientError, ClientResult, CurrencyCode, RatePair, StreamMessage};
use fx_proto::proto::currency_client::CurrencyClient;
use fx_proto::proto::{RateRequest, StreamingRateResponse};

/// Subscribe requests queued before the stream applies backpressure
const SUBSCRIBE_BUFFER: usize = 32;

/// State shared between the cache handle and its receive loop
#[derive(Default)]
struct CacheState {
    rates: DashMap<CurrencyCode, f64>,
    /// Codes a subscribe request has been sent for
    subscribed: DashSet<CurrencyCode>,
    /// In-band subscription errors reported by the server
    rejected: AtomicUsize,
}

/// Last known rates from the base currency, updated by server pushes
///
/// Entries are added on the first successful [`RateCache::resolve`] of a
/// code and overwritten by every later push. Each code is subscribed at
/// most once, even when resolved concurrently. Once the subscription
/// stream ends the cache keeps its last values.
pub struct RateCache {
    client: CurrencyClient<Channel>,
    state: Arc<CacheState>,
    subscriptions: mpsc::Sender<RateRequest>,
    receiver: JoinHandle<()>,
}

impl RateCache {
    /// Connect to the service and open the subscription stream
    pub async fn connect(endpoint: impl Into<String>) -> ClientResult<Self> {
        let endpoint = endpoint.into();
        let client = CurrencyClient::connect(endpoint.clone())
            .await
            .map_err(|e| ClientError::Transport(format!("{endpoint}: {e}")))?;

        Self::new(client).await
    }

    pub async fn new(mut client: CurrencyClient<Channel>) -> ClientResult<Self> {
        let (subscriptions, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
        let inbound = client
            .subscribe_rates(ReceiverStream::new(rx))
            .await
            .map_err(status_to_error)?
            .into_inner();

        let state = Arc::new(CacheState::default());
        let receiver = tokio::spawn(receive_loop(inbound, Arc::clone(&state)));

        Ok(Self {
            client,
            state,
            subscriptions,
            receiver,
        })
    }

    /// Rate from the base currency to `destination`
    ///
    /// A cached rate is returned without contacting the service. Otherwise
    /// the rate is looked up, cached, and subscribed to. Failed lookups are
    /// not cached.
    pub async fn resolve(&self, destination: &str) -> ClientResult<f64> {
        let destination = CurrencyCode::new(destination)
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;

        if let Some(rate) = self.cached(&destination) {
            return Ok(rate);
        }

        let request = RateRequest::from(&RatePair::from_base(destination.clone()));
        let response = self
            .client
            .clone()
            .get_rate(request.clone())
            .await
            .map_err(|status| {
                error!(currency = %destination, error = %status.message(), "unable to get rate");
                status_to_error(status)
            })?
            .into_inner();

        self.state.rates.insert(destination.clone(), response.rate);

        // A concurrent resolve of the same code may already have subscribed
        if !self.state.subscribed.insert(destination.clone()) {
            return Ok(response.rate);
        }

        if self.subscriptions.send(request).await.is_err() {
            warn!(currency = %destination, "subscription stream closed, rate will not be updated");
        }

        Ok(response.rate)
    }

    pub fn cached(&self, destination: &CurrencyCode) -> Option<f64> {
        self.state.rates.get(destination).map(|entry| *entry.value())
    }

    /// Convert an amount in the base currency, rounded to one decimal place
    pub async fn convert(&self, amount: f64, destination: &str) -> ClientResult<f64> {
        let rate = self.resolve(destination).await?;
        Ok(round_to_tenth(amount * rate))
    }

    /// Cached rates sorted by currency code
    pub fn rates(&self) -> Vec<(CurrencyCode, f64)> {
        let mut rates: Vec<_> = self
            .state
            .rates
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rates.sort_by(|a, b| a.0.cmp(&b.0));
        rates
    }

    /// Whether pushes are still being received
    pub fn is_connected(&self) -> bool {
        !self.receiver.is_finished()
    }

    /// Subscription errors the server has reported on the stream
    pub fn rejected_subscriptions(&self) -> usize {
        self.state.rejected.load(Ordering::Relaxed)
    }
}

impl Drop for RateCache {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

async fn receive_loop(
    mut inbound: Streaming<StreamingRateResponse>,
    state: Arc<CacheState>,
) {
    loop {
        match inbound.message().await {
            Ok(Some(response)) => match StreamMessage::try_from(response) {
                Ok(message) => handle_message(&state, message),
                Err(status) => warn!(error = %status.message(), "malformed message from server"),
            },
            Ok(None) => {
                info!("subscription stream closed by server");
                break;
            }
            Err(status) => {
                error!(error = %status, "error receiving message");
                break;
            }
        }
    }
}

fn handle_message(state: &CacheState, message: StreamMessage) {
    match message {
        StreamMessage::RateUpdate { pair, rate } => {
            if !pair.base.is_base() {
                debug!(pair = %pair, "ignoring update for foreign base");
                return;
            }
            info!(dest = %pair.destination, rate, "received updated rate from server");
            state.rates.insert(pair.destination, rate);
        }
        StreamMessage::SubscriptionError { code, message, request } => {
            state.rejected.fetch_add(1, Ordering::Relaxed);
            error!(
                code = %code,
                error = %message,
                details = %request,
                "received error from currency service rate subscription"
            );
        }
    }
}

fn status_to_error(status: Status) -> ClientError {
    match status.code() {
        Code::InvalidArgument => ClientError::InvalidArgument(status.message().to_string()),
        Code::NotFound => ClientError::RateNotFound(status.message().to_string()),
        _ => ClientError::Transport(status.to_string()),
    }
}
