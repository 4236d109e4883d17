//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};

/// State for a single identified WebSocket connection.
pub struct GatewaySession {
    /// `conn_` prefixed ULID.
    pub connection_id: String,
    pub user_id: String,
    /// Display name captured at IDENTIFY time.
    pub username: String,
    /// Sequence number of the last dispatch sent on this connection.
    seq: AtomicU64,
}

impl GatewaySession {
    pub fn new(connection_id: String, user_id: String, username: String) -> Self {
        Self {
            connection_id,
            user_id,
            username,
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let session = GatewaySession::new("conn_1".into(), "u1".into(), "ada".into());
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
    }
}
