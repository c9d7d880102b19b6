use thiserror::Error;

/// Failure to resolve a guardian set. Callers treat every variant as
/// transient: the set may simply not have propagated to the source yet.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("guardian set {0} not cached and no source configured")]
    NoSource(u32),
    #[error("timed out fetching guardian set {0}")]
    SourceTimeout(u32),
    #[error("fetching guardian set {index}: {source}")]
    Source {
        index: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("guardian {guardian} already tracks {cap} nodes, rejecting {node_id}")]
    NodeCapExceeded {
        guardian: String,
        node_id: String,
        cap: usize,
    },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("empty message id")]
    EmptyMessageId,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("malformed VAA bytes, filtered subscribers skipped: {0}")]
    MalformedVaa(#[source] anyhow::Error),
}

/// Why a signature set was rejected. Terminal: a VAA that fails for any of
/// these reasons is logged and dropped, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    #[error("more signatures than guardians in the set")]
    TooManySignatures,
    #[error("guardian index {0} out of range")]
    IndexOutOfRange(u8),
    #[error("guardian indices not strictly increasing at index {0}")]
    NonIncreasingIndex(u8),
    #[error("guardian address recovered more than once (index {0})")]
    DuplicateSigner(u8),
    #[error("signature recovery failed for guardian index {0}")]
    RecoveryFailed(u8),
    #[error("recovered address does not match guardian at index {0}")]
    SignerMismatch(u8),
    #[error("signature count {have} below quorum {need}")]
    BelowQuorum { have: usize, need: usize },
}
