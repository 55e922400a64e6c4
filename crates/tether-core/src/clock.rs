use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::traits::{Clock, IdGenerator};

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Random v4 UUIDs with an optional prefix.
#[derive(Debug, Clone, Default)]
pub struct UuidGenerator {
    prefix: Option<String>,
}

impl UuidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}-{}", prefix, Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        }
    }
}
