//! Fan-out of rate updates after each fluctuation tick

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fx_core::StreamMessage;
use fx_rate_feed::RateTable;

use crate::registry::SubscriptionRegistry;

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub connections: usize,
    /// Updates queued on a connection
    pub delivered: usize,
    /// Pairs that no longer resolve against the table
    pub skipped: usize,
    /// Updates dropped because a connection's queue was full
    pub dropped: usize,
    /// Connections found closed and removed
    pub closed: usize,
}

/// Pushes the current rate of every subscribed pair to its connection
///
/// Sends never wait: a full queue loses that update, a closed queue removes
/// the connection. Neither affects any other connection.
#[derive(Clone)]
pub struct Broadcaster {
    table: Arc<RateTable>,
    registry: Arc<SubscriptionRegistry>,
}

impl Broadcaster {
    pub fn new(table: Arc<RateTable>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { table, registry }
    }

    /// Push one round of updates from a single table snapshot
    pub fn on_tick(&self) -> BroadcastStats {
        let snapshot = self.table.snapshot();
        let targets = self.registry.targets();
        let mut stats = BroadcastStats {
            connections: targets.len(),
            ..Default::default()
        };

        for target in targets {
            for pair in target.pairs {
                let rate = match snapshot.get_pair_rate(&pair) {
                    Ok(rate) => rate,
                    Err(e) => {
                        error!(
                            connection_id = %target.id,
                            base = %pair.base,
                            destination = %pair.destination,
                            error = %e,
                            "unable to get updated rate"
                        );
                        stats.skipped += 1;
                        continue;
                    }
                };

                match target.outbound.try_send(StreamMessage::rate_update(pair, rate)) {
                    Ok(()) => stats.delivered += 1,
                    Err(TrySendError::Full(message)) => {
                        if let StreamMessage::RateUpdate { pair, .. } = &message {
                            warn!(
                                connection_id = %target.id,
                                pair = %pair,
                                "outbound queue full, dropping rate update"
                            );
                        }
                        stats.dropped += 1;
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(connection_id = %target.id, "connection closed during broadcast");
                        self.registry.remove(target.id);
                        stats.closed += 1;
                        break;
                    }
                }
            }
        }

        stats
    }

    pub fn spawn(self, changed: watch::Receiver<u64>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(changed).await;
        })
    }

    /// Broadcast after every change signal until the signal source goes away
    pub async fn run(self, mut changed: watch::Receiver<u64>) {
        info!("Starting rate broadcaster");

        while changed.changed().await.is_ok() {
            let tick = *changed.borrow_and_update();
            let stats = self.on_tick();

            info!(
                tick,
                connections = stats.connections,
                delivered = stats.delivered,
                skipped = stats.skipped,
                dropped = stats.dropped,
                closed = stats.closed,
                "got updated rates"
            );
        }

        warn!("Fluctuation signal closed, broadcaster stopping");
    }
}
