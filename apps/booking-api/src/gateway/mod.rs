pub mod fanout;
pub mod handler;
pub mod messaging;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;

/// Failures on the real-time path. Clients have no error channel, so these
/// are logged and dropped by the connection loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("recipient {0} is offline")]
    RecipientOffline(String),
    #[error("message text is empty")]
    EmptyMessage,
    #[error("message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("recipient id is empty")]
    InvalidRecipient,
    #[error("topic id is empty")]
    InvalidTopic,
    #[error("spot {0} not found")]
    UnknownSpot(String),
    #[error("user {user_id} does not own spot {spot_id}")]
    NotOwner { user_id: String, spot_id: String },
}
