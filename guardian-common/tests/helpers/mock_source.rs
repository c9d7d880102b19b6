use anyhow::{anyhow, Result};
use guardian_common::registry::GuardianSetSource;
use guardian_common::types::GuardianSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory stand-in for the authoritative chain RPC guardian set source.
pub struct MockGuardianSetSource {
    sets: Mutex<HashMap<u32, GuardianSet>>,
    calls: AtomicUsize,
    hang: bool,
}

impl MockGuardianSetSource {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            hang: false,
        }
    }

    /// A source that never answers, for exercising the fetch timeout.
    pub fn hanging() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            hang: true,
        }
    }

    pub fn insert(&self, set: GuardianSet) {
        self.sets.lock().unwrap().insert(set.index, set);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GuardianSetSource for MockGuardianSetSource {
    async fn fetch_guardian_set(&self, index: u32) -> Result<GuardianSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }

        self.sets
            .lock()
            .unwrap()
            .get(&index)
            .cloned()
            .ok_or_else(|| anyhow!("guardian set {} not known to source", index))
    }
}

impl Default for MockGuardianSetSource {
    fn default() -> Self {
        Self::new()
    }
}
