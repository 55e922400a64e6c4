use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::Result;

/// Asynchronous key-value persistence shared by the engine and the lease
/// registry. Reads are expected to reflect the most recent successful write;
/// nothing stronger is assumed.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a value. `None` when the key is absent.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<serde_json::Value>>>;

    /// Write a value, replacing any previous one.
    fn set<'a>(&'a self, key: &'a str, value: serde_json::Value) -> BoxFuture<'a, Result<()>>;

    /// Delete a key. Returns whether it existed.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<BTreeMap<String, serde_json::Value>>>;

    /// Read a value, falling back to `default` when the key is absent.
    fn get_or<'a>(
        &'a self,
        key: &'a str,
        default: serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move { Ok(self.get(key).await?.unwrap_or(default)) })
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Source of fresh identifiers (executor ids, plan ids).
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> String;
}
