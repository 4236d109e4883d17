use std::path::PathBuf;
use std::time::Duration;

/// Booking API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret used to verify signed payment events and announcements.
    pub webhook_secret: String,
    /// Directory holding the record collections and the write-ahead journal.
    pub data_dir: PathBuf,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Optional endpoint of the receipt generation pipeline.
    pub receipt_webhook_url: Option<String>,
    /// Maximum age of a signed event timestamp.
    pub signature_tolerance: Duration,
    /// Upper bound on a single collection save.
    pub persist_timeout: Duration,
    /// Typing indicators without a refresh expire after this long.
    pub typing_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            webhook_secret: required_var("WEBHOOK_SECRET"),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            port: parsed_var("PORT").unwrap_or(4100),
            receipt_webhook_url: std::env::var("RECEIPT_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            signature_tolerance: Duration::from_secs(
                parsed_var("SIGNATURE_TOLERANCE_SECS").unwrap_or(300),
            ),
            persist_timeout: Duration::from_millis(parsed_var("PERSIST_TIMEOUT_MS").unwrap_or(5000)),
            typing_timeout: Duration::from_secs(parsed_var("TYPING_TIMEOUT_SECS").unwrap_or(5)),
        }
    }

    /// Configuration for tests and local tooling: fixed secret, no receipt
    /// pipeline, data under the given directory.
    pub fn for_data_dir(webhook_secret: &str, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
            data_dir: data_dir.into(),
            port: 0,
            receipt_webhook_url: None,
            signature_tolerance: Duration::from_secs(300),
            persist_timeout: Duration::from_secs(5),
            typing_timeout: Duration::from_secs(5),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
