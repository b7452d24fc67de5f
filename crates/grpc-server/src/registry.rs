//! Per-connection subscription registry
//!
//! Connections are keyed by a generated [`ConnectionId`]; the registry keeps
//! the outbound queue handle and the ordered list of subscribed pairs for
//! each one. All access goes through a single mutex and no critical section
//! awaits.
//!
//! On shutdown [`SubscriptionRegistry::close_all`] drops every queue handle
//! and raises the closing signal, which ends each open connection.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use fx_core::{ConnectionId, RatePair, RegistryError, RegistryResult, StreamMessage};

/// Outbound queue of one connection
pub type Outbound = mpsc::Sender<StreamMessage>;

#[derive(Debug)]
struct ConnectionEntry {
    outbound: Outbound,
    pairs: Vec<RatePair>,
}

/// One connection's share of a broadcast
#[derive(Debug, Clone)]
pub struct BroadcastTarget {
    pub id: ConnectionId,
    pub outbound: Outbound,
    pub pairs: Vec<RatePair>,
}

#[derive(Debug)]
pub struct SubscriptionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    closing: watch::Sender<bool>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            connections: Mutex::new(HashMap::new()),
            closing,
        }
    }

    /// Register a new connection with its outbound queue
    pub fn register(&self, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.lock().insert(
            id,
            ConnectionEntry {
                outbound,
                pairs: Vec::new(),
            },
        );
        debug!(connection_id = %id, "connection registered");
        id
    }

    /// Add a pair to a connection's subscriptions
    ///
    /// A pair that is already subscribed is rejected and the registry is
    /// left untouched.
    pub fn subscribe(&self, id: ConnectionId, pair: RatePair) -> RegistryResult<()> {
        let mut connections = self.connections.lock();
        let entry = connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        if entry.pairs.contains(&pair) {
            return Err(RegistryError::DuplicateSubscription(pair));
        }

        entry.pairs.push(pair);
        Ok(())
    }

    /// Drop a connection and all of its subscriptions
    ///
    /// Returns false when the connection was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().remove(&id);
        if let Some(entry) = &removed {
            debug!(
                connection_id = %id,
                subscriptions = entry.pairs.len(),
                "connection removed"
            );
        }
        removed.is_some()
    }

    /// Remove every connection and signal open connections to close
    ///
    /// Returns the number of connections removed. Connections opened after
    /// this call close immediately.
    pub fn close_all(&self) -> usize {
        self.closing.send_replace(true);
        let removed = std::mem::take(&mut *self.connections.lock());
        debug!(connections = removed.len(), "all connections removed");
        removed.len()
    }

    /// Signal raised by [`SubscriptionRegistry::close_all`]
    pub fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    /// Subscribed pairs of one connection, in subscription order
    pub fn subscriptions(&self, id: ConnectionId) -> Vec<RatePair> {
        self.connections
            .lock()
            .get(&id)
            .map(|entry| entry.pairs.clone())
            .unwrap_or_default()
    }

    /// Every connection with at least one subscription
    pub fn targets(&self) -> Vec<BroadcastTarget> {
        self.connections
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.pairs.is_empty())
            .map(|(id, entry)| BroadcastTarget {
                id: *id,
                outbound: entry.outbound.clone(),
                pairs: entry.pairs.clone(),
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn subscription_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .map(|entry| entry.pairs.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(base: &str, destination: &str) -> RatePair {
        RatePair::parse(base, destination).unwrap()
    }

    fn outbound() -> (Outbound, mpsc::Receiver<StreamMessage>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_duplicate_subscription_rejected() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = outbound();
        let id = registry.register(tx);

        registry.subscribe(id, pair("EUR", "USD")).unwrap();
        assert_eq!(
            registry.subscribe(id, pair("EUR", "USD")),
            Err(RegistryError::DuplicateSubscription(pair("EUR", "USD")))
        );

        assert_eq!(registry.subscriptions(id), vec![pair("EUR", "USD")]);
    }

    #[test]
    fn test_same_pair_on_different_connections() {
        let registry = SubscriptionRegistry::new();
        let (a_tx, _a_rx) = outbound();
        let (b_tx, _b_rx) = outbound();
        let a = registry.register(a_tx);
        let b = registry.register(b_tx);

        registry.subscribe(a, pair("EUR", "USD")).unwrap();
        registry.subscribe(b, pair("EUR", "USD")).unwrap();
        registry.subscribe(a, pair("USD", "EUR")).unwrap();

        assert_eq!(registry.subscription_count(), 3);
        assert_eq!(
            registry.subscriptions(a),
            vec![pair("EUR", "USD"), pair("USD", "EUR")]
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = outbound();
        let id = registry.register(tx);
        registry.subscribe(id, pair("EUR", "GBP")).unwrap();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.is_registered(id));
        assert!(registry.subscriptions(id).is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_unknown_connection() {
        let registry = SubscriptionRegistry::new();
        let id = ConnectionId::new();

        assert_eq!(
            registry.subscribe(id, pair("EUR", "USD")),
            Err(RegistryError::UnknownConnection(id))
        );
    }

    #[test]
    fn test_close_all_drops_queues_and_signals() {
        let registry = SubscriptionRegistry::new();
        let (a_tx, mut a_rx) = outbound();
        let (b_tx, _b_rx) = outbound();
        let a = registry.register(a_tx);
        let b = registry.register(b_tx);
        registry.subscribe(a, pair("EUR", "USD")).unwrap();
        let closing = registry.closing();
        assert!(!*closing.borrow());

        assert_eq!(registry.close_all(), 2);

        assert!(*closing.borrow());
        assert!(registry.is_closing());
        assert!(!registry.is_registered(a));
        assert!(!registry.is_registered(b));
        assert!(registry.targets().is_empty());
        // Last sender for A was held by the registry
        assert!(matches!(
            a_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_targets_skip_idle_connections() {
        let registry = SubscriptionRegistry::new();
        let (a_tx, _a_rx) = outbound();
        let (b_tx, _b_rx) = outbound();
        let a = registry.register(a_tx);
        let _idle = registry.register(b_tx);
        registry.subscribe(a, pair("EUR", "USD")).unwrap();

        let targets = registry.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, a);
        assert_eq!(registry.connection_count(), 2);
    }
}
