pub mod server_chan;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification key is not set")]
    MissingKey,

    #[error("malformed notification key")]
    InvalidKey,

    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification service returned status {0}")]
    Status(u16),

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Notification service trait, every push target implements this
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a notification
    async fn send(&self, title: &str, content: &str) -> Result<(), NotifyError>;
}
