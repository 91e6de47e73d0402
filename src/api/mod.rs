pub mod helix;

use async_trait::async_trait;
use thiserror::Error;

/// A single account following a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follower {
    /// Display name, may be missing or empty for some accounts
    pub display_name: Option<String>,
    /// Login/account name
    pub account_name: String,
}

impl Follower {
    pub fn new(display_name: Option<&str>, account_name: &str) -> Self {
        Self {
            display_name: display_name.map(str::to_string),
            account_name: account_name.to_string(),
        }
    }

    /// Name used to tell followers apart: the display name when present,
    /// otherwise the account name.
    ///
    /// An account seeded under its account name that later gains a display
    /// name shows up once more under the new identity.
    pub fn identity(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.account_name,
        }
    }
}

/// One follower fetch for a channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerPage {
    /// Followers returned by the fetch, newest first
    pub followers: Vec<Follower>,
    /// Total follower count reported by the platform
    pub total: u64,
}

/// Live stream snapshot, only present while a channel is broadcasting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    pub viewer_count: u64,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Twitch API unavailable: {0}")]
    Unavailable(String),

    #[error("Twitch API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Failed to decode Twitch API response: {0}")]
    Decode(String),

    #[error("Twitch API request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Data source the watcher polls. Every call may fail; the watcher treats a
/// failure as "skip this channel for this cycle".
#[async_trait]
pub trait TwitchApi: Send + Sync {
    /// Fetch up to `limit` followers of `channel`, plus the total count
    async fn fetch_followers(&self, channel: &str, limit: usize) -> ApiResult<FollowerPage>;

    /// Fetch the live stream of `channel`, `None` when it is offline
    async fn fetch_stream_status(&self, channel: &str) -> ApiResult<Option<StreamStatus>>;
}
