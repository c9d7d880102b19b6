use crate::types::MessagePublication;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Default capacity for watcher-facing channels, matching the inbound
/// gossip queues.
pub const WATCHER_CHANNEL_CAPACITY: usize = 50;

/// Creates the watcher-to-core observation channel. Watchers put every
/// structured observation they derive onto the sending side.
pub fn observation_channel(
    capacity: usize,
) -> (mpsc::Sender<MessagePublication>, mpsc::Receiver<MessagePublication>) {
    mpsc::channel(capacity)
}

/// Asks a specific watcher to re-derive a missed observation. The core
/// routes these by chain id and does not inspect the transaction
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReobservationRequest {
    pub chain_id: u16,
    pub tx_hash: Vec<u8>,
}

/// Routes reobservation requests to the watcher registered for each chain.
/// Sends are non-blocking: a request for an unknown chain or a full
/// watcher queue is logged and dropped rather than stalling the core.
pub struct ReobservationRouter {
    routes: RwLock<HashMap<u16, mpsc::Sender<ReobservationRequest>>>,
}

impl ReobservationRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the watcher for `chain_id`, returning the receiving end it
    /// should consume. Re-registering a chain replaces the previous route.
    pub async fn register(&self, chain_id: u16) -> mpsc::Receiver<ReobservationRequest> {
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        self.routes.write().await.insert(chain_id, tx);
        rx
    }

    /// Forwards a request to its chain's watcher. Returns whether the
    /// request was accepted.
    pub async fn route(&self, req: ReobservationRequest) -> bool {
        let routes = self.routes.read().await;
        let Some(tx) = routes.get(&req.chain_id) else {
            tracing::warn!(chain = req.chain_id, "no watcher registered, dropping reobservation request");
            return false;
        };

        match tx.try_send(req) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "watcher queue rejected reobservation request");
                false
            }
        }
    }
}

impl Default for ReobservationRouter {
    fn default() -> Self {
        Self::new()
    }
}
