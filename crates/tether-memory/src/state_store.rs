use std::sync::Arc;

use tracing::debug;

use tether_core::error::Result;
use tether_core::state::ExecutionState;
use tether_core::traits::KeyValueStore;
use tether_core::types::ThreadId;

const KEY_PREFIX: &str = "thread_state:";

/// Thread-keyed persistence of execution state.
///
/// The graph executor saves through this after every node invocation so a
/// later message on the same thread can resume where the last run stopped.
/// Nothing is evicted automatically.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn key(thread_id: &ThreadId) -> String {
        format!("{}{}", KEY_PREFIX, thread_id)
    }

    pub async fn load(&self, thread_id: &ThreadId) -> Result<Option<ExecutionState>> {
        match self.kv.get(&Self::key(thread_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, state: &ExecutionState) -> Result<()> {
        let value = serde_json::to_value(state)?;
        self.kv.set(&Self::key(&state.thread_id), value).await?;
        debug!(
            thread_id = %state.thread_id,
            node_id = %state.metadata.current_node_id,
            "Execution state persisted"
        );
        Ok(())
    }

    /// Drop a thread's state. Returns whether one existed.
    pub async fn evict(&self, thread_id: &ThreadId) -> Result<bool> {
        self.kv.delete(&Self::key(thread_id)).await
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadId>> {
        let entries = self.kv.scan_prefix(KEY_PREFIX).await?;
        Ok(entries
            .keys()
            .filter_map(|k| k.strip_prefix(KEY_PREFIX))
            .map(ThreadId::from_str)
            .collect())
    }
}
