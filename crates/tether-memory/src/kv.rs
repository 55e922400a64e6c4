use std::collections::BTreeMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use tether_core::error::{Result, TetherError};
use tether_core::traits::KeyValueStore;

/// Process-local key-value store. Used by tests and single-instance setups.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> TetherError {
    TetherError::Store(e.to_string())
}

impl KeyValueStore for InMemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<serde_json::Value>>> {
        Box::pin(async move {
            let entries = self.entries.lock().map_err(poisoned)?;
            Ok(entries.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: serde_json::Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().map_err(poisoned)?;
            entries.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().map_err(poisoned)?;
            Ok(entries.remove(key).is_some())
        })
    }

    fn scan_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<BTreeMap<String, serde_json::Value>>> {
        Box::pin(async move {
            let entries = self.entries.lock().map_err(poisoned)?;
            Ok(entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }
}
