use crate::error::BrokerError;
use crate::types::VAA;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery channel capacity per subscriber. One in-flight message bounds
/// worst-case buffering per client; a client that cannot keep up hits the
/// delivery timeout and is torn down instead of stalling the publisher.
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 1;

/// A single (chain, emitter) match criterion. A subscription with no
/// filters matches every message; with filters, any one match suffices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaaFilter {
    pub chain_id: u16,
    pub emitter_address: [u8; 32],
}

struct Subscription {
    filters: Vec<VaaFilter>,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Fans verified VAAs out to any number of independently filtered
/// subscribers. Publishes are serialized through one lock, so each
/// subscriber observes messages in publish order; there is no ordering
/// guarantee across subscribers.
///
/// A subscriber that drops its receiver, or fails to accept a message
/// within the delivery timeout, is removed during the publish pass. The
/// publisher never blocks on one client at the expense of the others, and
/// `unsubscribe` never deadlocks against a concurrent `publish` because a
/// dropped receiver fails the pending send immediately.
pub struct SignedVaaBroker {
    subs: RwLock<HashMap<String, Subscription>>,
    delivery_timeout: Duration,
}

impl SignedVaaBroker {
    pub fn new() -> Self {
        Self::with_delivery_timeout(DEFAULT_DELIVERY_TIMEOUT)
    }

    pub fn with_delivery_timeout(delivery_timeout: Duration) -> Self {
        Self {
            subs: RwLock::new(HashMap::new()),
            delivery_timeout,
        }
    }

    /// Registers a subscription and returns its id together with the
    /// receiving end of its delivery channel. The subscription lives until
    /// `unsubscribe` or until delivery to it times out.
    pub async fn subscribe(&self, filters: Vec<VaaFilter>) -> (String, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let id = uuid::Uuid::new_v4().to_string();

        self.subs
            .write()
            .await
            .insert(id.clone(), Subscription { filters, tx });

        tracing::debug!(subscription = %id, "subscriber registered");
        (id, rx)
    }

    /// Removes a subscription. Idempotent; safe to call while a publish is
    /// in flight.
    pub async fn unsubscribe(&self, id: &str) {
        if self.subs.write().await.remove(id).is_some() {
            tracing::debug!(subscription = %id, "subscriber removed");
        }
    }

    /// Delivers `vaa_bytes` to every matching subscriber. The emitter
    /// fields are decoded at most once per call and reused across all
    /// subscriber checks. Returns the number of successful deliveries.
    ///
    /// If the bytes cannot be decoded, unfiltered subscribers still receive
    /// them and the error is reported after the pass.
    pub async fn publish(&self, vaa_bytes: &[u8]) -> Result<usize, BrokerError> {
        let mut subs = self.subs.write().await;

        let mut parsed: Option<(u16, [u8; 32])> = None;
        let mut parse_error: Option<anyhow::Error> = None;
        let mut delivered = 0usize;
        let mut dead: Vec<String> = Vec::new();

        for (id, sub) in subs.iter() {
            let matches = if sub.filters.is_empty() {
                true
            } else {
                if parsed.is_none() && parse_error.is_none() {
                    match VAA::deserialize(vaa_bytes) {
                        Ok(vaa) => parsed = Some((vaa.emitter_chain, vaa.emitter_address)),
                        Err(err) => parse_error = Some(err),
                    }
                }
                match parsed {
                    Some((chain, emitter)) => sub
                        .filters
                        .iter()
                        .any(|f| f.chain_id == chain && f.emitter_address == emitter),
                    None => false,
                }
            };

            if !matches {
                continue;
            }

            match tokio::time::timeout(self.delivery_timeout, sub.tx.send(vaa_bytes.to_vec()))
                .await
            {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {
                    // Receiver dropped; the client is gone.
                    dead.push(id.clone());
                }
                Err(_) => {
                    tracing::warn!(
                        subscription = %id,
                        timeout = ?self.delivery_timeout,
                        "subscriber too slow, tearing down"
                    );
                    dead.push(id.clone());
                }
            }
        }

        for id in dead {
            subs.remove(&id);
        }

        if let Some(err) = parse_error {
            return Err(BrokerError::MalformedVaa(err));
        }
        Ok(delivered)
    }

    /// Advisory count of live subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subs.read().await.len()
    }
}

impl Default for SignedVaaBroker {
    fn default() -> Self {
        Self::new()
    }
}
