use crate::error::{HeartbeatError, InvalidReason, RegistryError};
use crate::signer::recover_signer;
use crate::types::{GuardianSet, VAA};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_MAX_AGE: Duration = Duration::from_secs(60);

/// Cap on tracked nodes per guardian address. Bounds heartbeat memory
/// against a guardian running many duplicate or rogue nodes.
pub const MAX_NODES_PER_GUARDIAN: usize = 32;

/// Authoritative external source of guardian sets, typically a core
/// contract read over chain RPC. The registry is the only caller.
#[async_trait::async_trait]
pub trait GuardianSetSource: Send + Sync {
    async fn fetch_guardian_set(&self, index: u32) -> Result<GuardianSet>;
}

/// Outcome of quorum verification. `Unavailable` is transient and should
/// be retried with backoff; `Invalid` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumVerdict {
    Valid,
    Invalid(InvalidReason),
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    /// Sender-reported unix timestamp.
    pub timestamp: i64,
    /// When this node received the heartbeat; drives expiry.
    pub received_at: Instant,
}

/// Process-wide trust-anchor state: the currently active guardian set and
/// per-guardian node liveness. Created once at startup and shared by
/// reference; the active set is replaced wholesale, never mutated.
pub struct GuardianSetState {
    current: RwLock<Option<GuardianSet>>,
    heartbeats: RwLock<HashMap<[u8; 20], HashMap<String, Heartbeat>>>,
    node_cap: usize,
    max_age: Duration,
}

impl GuardianSetState {
    pub fn new() -> Self {
        Self::with_limits(MAX_NODES_PER_GUARDIAN, DEFAULT_HEARTBEAT_MAX_AGE)
    }

    pub fn with_limits(node_cap: usize, max_age: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            heartbeats: RwLock::new(HashMap::new()),
            node_cap,
            max_age,
        }
    }

    pub async fn current(&self) -> Option<GuardianSet> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, new_set: GuardianSet) {
        let mut current = self.current.write().await;
        tracing::info!(
            index = new_set.index,
            guardians = new_set.keys.len(),
            "guardian set updated"
        );
        *current = Some(new_set);
    }

    /// Records the latest heartbeat for (guardian, node). Updating a known
    /// node always succeeds; a new node id is rejected once the per-guardian
    /// cap is reached.
    pub async fn set_heartbeat(
        &self,
        guardian: [u8; 20],
        node_id: &str,
        timestamp: i64,
    ) -> Result<(), HeartbeatError> {
        let mut heartbeats = self.heartbeats.write().await;
        let nodes = heartbeats.entry(guardian).or_default();

        if !nodes.contains_key(node_id) && nodes.len() >= self.node_cap {
            return Err(HeartbeatError::NodeCapExceeded {
                guardian: hex::encode(guardian),
                node_id: node_id.to_string(),
                cap: self.node_cap,
            });
        }

        nodes.insert(
            node_id.to_string(),
            Heartbeat {
                timestamp,
                received_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub async fn heartbeats(&self, guardian: &[u8; 20]) -> Vec<(String, Heartbeat)> {
        self.heartbeats
            .read()
            .await
            .get(guardian)
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|(id, hb)| (id.clone(), hb.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deletes heartbeats older than the max age. Not self-scheduling; the
    /// caller drives the cadence.
    pub async fn cleanup(&self) {
        let mut heartbeats = self.heartbeats.write().await;
        let max_age = self.max_age;
        let mut purged = 0usize;
        heartbeats.retain(|_, nodes| {
            nodes.retain(|_, hb| {
                let fresh = hb.received_at.elapsed() <= max_age;
                if !fresh {
                    purged += 1;
                }
                fresh
            });
            !nodes.is_empty()
        });
        if purged > 0 {
            tracing::debug!(purged, "purged stale heartbeats");
        }
    }
}

impl Default for GuardianSetState {
    fn default() -> Self {
        Self::new()
    }
}

/// Versioned trust anchor: resolves guardian sets by index and decides
/// whether a VAA's signature set is authoritative.
///
/// The lookup cache is append-only and never evicted; VAAs reference
/// historical set indices that must stay verifiable indefinitely.
pub struct GuardianSetRegistry {
    state: Arc<GuardianSetState>,
    cache: RwLock<HashMap<u32, GuardianSet>>,
    source: Option<Arc<dyn GuardianSetSource>>,
    fetch_timeout: Duration,
}

impl GuardianSetRegistry {
    pub fn new(state: Arc<GuardianSetState>, source: Option<Arc<dyn GuardianSetSource>>) -> Self {
        Self::with_fetch_timeout(state, source, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_fetch_timeout(
        state: Arc<GuardianSetState>,
        source: Option<Arc<dyn GuardianSetSource>>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            state,
            cache: RwLock::new(HashMap::new()),
            source,
            fetch_timeout,
        }
    }

    pub async fn current(&self) -> Option<GuardianSet> {
        self.state.current().await
    }

    /// Installs a newly observed guardian set as the active one and caches
    /// it for historical lookups.
    pub async fn replace(&self, new_set: GuardianSet) {
        self.cache
            .write()
            .await
            .insert(new_set.index, new_set.clone());
        self.state.replace(new_set).await;
    }

    pub async fn lookup_by_index(&self, index: u32) -> Result<GuardianSet, RegistryError> {
        if let Some(set) = self.cache.read().await.get(&index) {
            return Ok(set.clone());
        }

        let source = self
            .source
            .as_ref()
            .ok_or(RegistryError::NoSource(index))?;

        let fetched = tokio::time::timeout(self.fetch_timeout, source.fetch_guardian_set(index))
            .await
            .map_err(|_| RegistryError::SourceTimeout(index))?
            .map_err(|err| RegistryError::Source { index, source: err })?;

        self.cache.write().await.insert(index, fetched.clone());
        tracing::info!(index, guardians = fetched.keys.len(), "cached guardian set");
        Ok(fetched)
    }

    /// Decides whether the VAA carries a quorum of distinct, correctly
    /// ordered signatures from members of the set it claims.
    pub async fn verify_quorum(&self, vaa: &VAA) -> QuorumVerdict {
        let set = match self.lookup_by_index(vaa.guardian_set_index).await {
            Ok(set) => set,
            Err(err) => {
                tracing::warn!(
                    index = vaa.guardian_set_index,
                    error = %err,
                    "guardian set unresolvable, verdict unavailable"
                );
                return QuorumVerdict::Unavailable;
            }
        };

        if vaa.signatures.len() > set.keys.len() {
            return QuorumVerdict::Invalid(InvalidReason::TooManySignatures);
        }

        let digest = vaa.signing_digest();
        let quorum = set.quorum_size();

        let mut last_index: Option<u8> = None;
        let mut signing_addresses: Vec<[u8; 20]> = Vec::with_capacity(vaa.signatures.len());

        for sig in &vaa.signatures {
            let idx = sig.guardian_index;

            if idx as usize >= set.keys.len() {
                return QuorumVerdict::Invalid(InvalidReason::IndexOutOfRange(idx));
            }

            if let Some(last) = last_index {
                if idx <= last {
                    return QuorumVerdict::Invalid(InvalidReason::NonIncreasingIndex(idx));
                }
            }
            last_index = Some(idx);

            let address = match recover_signer(digest, &sig.to_bytes()) {
                Ok(address) => address,
                Err(_) => return QuorumVerdict::Invalid(InvalidReason::RecoveryFailed(idx)),
            };

            if address != set.keys[idx as usize] {
                return QuorumVerdict::Invalid(InvalidReason::SignerMismatch(idx));
            }

            if signing_addresses.contains(&address) {
                return QuorumVerdict::Invalid(InvalidReason::DuplicateSigner(idx));
            }
            signing_addresses.push(address);
        }

        if signing_addresses.len() >= quorum {
            QuorumVerdict::Valid
        } else {
            QuorumVerdict::Invalid(InvalidReason::BelowQuorum {
                have: signing_addresses.len(),
                need: quorum,
            })
        }
    }

    /// Like `verify_quorum`, but retries an `Unavailable` verdict up to
    /// `max_attempts` times with a doubling delay between attempts. Valid
    /// and Invalid verdicts are returned immediately; the caller gets the
    /// last verdict once the attempt budget is spent.
    pub async fn verify_quorum_with_retry(
        &self,
        vaa: &VAA,
        max_attempts: usize,
        initial_delay: Duration,
    ) -> QuorumVerdict {
        let mut delay = initial_delay;
        let mut verdict = self.verify_quorum(vaa).await;
        for attempt in 1..max_attempts {
            if verdict != QuorumVerdict::Unavailable {
                return verdict;
            }
            tracing::debug!(
                message = %vaa.message_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "guardian set unavailable, retrying verification"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            verdict = self.verify_quorum(vaa).await;
        }
        verdict
    }
}
