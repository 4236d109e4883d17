//! Persistence: the collection gateway, the write-ahead journal, and the
//! serialized in-memory store that ties them together.

pub mod gateway;
pub mod journal;
pub mod store;

use std::time::Duration;

use gateway::Collection;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("saving {collection:?} timed out after {timeout:?}")]
    Timeout {
        collection: Collection,
        timeout: Duration,
    },
    #[error("gateway rejected {collection:?}: {message}")]
    Gateway {
        collection: Collection,
        message: String,
    },
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}
