//! Server side of one streaming subscription
//!
//! A connection is `Open` from registration until its inbound stream ends
//! or fails, then `Closed`. While open, subscribe requests are applied to
//! the registry; rejected requests are answered in-band on the same
//! connection. Outbound rate updates reach the client through the
//! connection's queue, which has a single consumer, so writes to the
//! transport never interleave.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tonic::Status;
use tracing::{error, info, warn};

use fx_core::{ConnectionError, ConnectionId, RatePair, RejectedRequest, StreamMessage};

use crate::proto::RateRequest;
use crate::registry::{Outbound, SubscriptionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

pub struct StreamConnection {
    id: ConnectionId,
    registry: Arc<SubscriptionRegistry>,
    outbound: Outbound,
    state: ConnectionState,
}

impl StreamConnection {
    /// Register a new connection and return it with its outbound queue
    pub fn open(
        registry: Arc<SubscriptionRegistry>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<StreamMessage>) {
        let (outbound, rx) = mpsc::channel(buffer);
        let id = registry.register(outbound.clone());

        let connection = Self {
            id,
            registry,
            outbound,
            state: ConnectionState::Open,
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consume subscribe requests until the client ends the stream
    ///
    /// End of stream closes the connection cleanly; any other read failure
    /// closes it with a transport error. Both remove the connection's
    /// subscriptions. Server shutdown also closes the connection cleanly,
    /// which ends the outbound stream.
    pub async fn run<S>(mut self, mut inbound: S) -> Result<(), ConnectionError>
    where
        S: Stream<Item = Result<RateRequest, Status>> + Unpin,
    {
        info!(connection_id = %self.id, "client connected");
        let mut closing = self.registry.closing();

        let result = loop {
            tokio::select! {
                biased;

                _ = closed(&mut closing) => {
                    info!(connection_id = %self.id, "server shutting down, closing connection");
                    break Ok(());
                }
                next = inbound.next() => match next {
                    Some(Ok(request)) => self.handle_request(request).await,
                    None => {
                        info!(connection_id = %self.id, "client has closed connection");
                        break Ok(());
                    }
                    Some(Err(status)) => {
                        error!(connection_id = %self.id, error = %status, "unable to read from client");
                        break Err(ConnectionError::Transport(status.to_string()));
                    }
                },
            }
        };

        self.close();
        result
    }

    async fn handle_request(&self, request: RateRequest) {
        info!(
            connection_id = %self.id,
            request_base = %request.base,
            request_dest = %request.destination,
            "handle client request"
        );

        let rejection = match RatePair::try_from(request.clone()) {
            Ok(pair) => match self.registry.subscribe(self.id, pair) {
                Ok(()) => return,
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        warn!(
            connection_id = %self.id,
            base = %request.base,
            dest = %request.destination,
            reason = %rejection,
            "subscription rejected"
        );

        let message = StreamMessage::rejected(RejectedRequest::from(request), rejection);
        if self.outbound.send(message).await.is_err() {
            warn!(connection_id = %self.id, "unable to send subscription error, outbound closed");
        }
    }

    fn close(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closed;
            self.registry.remove(self.id);
        }
    }
}

/// Resolves once the registry raises its closing signal
async fn closed(closing: &mut watch::Receiver<bool>) {
    loop {
        let is_closing = *closing.borrow_and_update();
        if is_closing {
            return;
        }
        if closing.changed().await.is_err() {
            // Registry gone, nothing will ever close this connection
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}
