use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::watcher::WatchConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Notification configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// ServerChan key, empty disables push notifications
    pub server_chan_key: String,
}

/// Application configuration, as stored in the JSON config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Channels to watch
    pub channels: Vec<String>,
    pub stream_interval_secs: u64,
    pub follower_interval_secs: u64,
    pub tick_interval_ms: u64,
    pub follower_limit: usize,
    pub notification: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let watch = WatchConfig::default();
        Self {
            channels: Vec::new(),
            stream_interval_secs: watch.stream_interval.as_secs(),
            follower_interval_secs: watch.follower_interval.as_secs(),
            tick_interval_ms: watch.tick_interval.as_millis() as u64,
            follower_limit: watch.follower_limit,
            notification: NotificationConfig::default(),
        }
    }
}

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub channels: Vec<String>,
    pub stream_interval_secs: Option<u64>,
    pub follower_interval_secs: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub follower_limit: Option<usize>,
    pub server_chan_key: Option<String>,
}

impl AppConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Apply command line values. Channels from both sources are trimmed and
    /// lowercased, file order first, repeats dropped.
    pub fn merge(mut self, overrides: Overrides) -> Self {
        let listed = std::mem::take(&mut self.channels);
        for channel in listed.into_iter().chain(overrides.channels) {
            let channel = channel.trim().to_lowercase();
            if !channel.is_empty() && !self.channels.contains(&channel) {
                self.channels.push(channel);
            }
        }
        if let Some(secs) = overrides.stream_interval_secs {
            self.stream_interval_secs = secs;
        }
        if let Some(secs) = overrides.follower_interval_secs {
            self.follower_interval_secs = secs;
        }
        if let Some(ms) = overrides.tick_interval_ms {
            self.tick_interval_ms = ms;
        }
        if let Some(limit) = overrides.follower_limit {
            self.follower_limit = limit;
        }
        if let Some(key) = overrides.server_chan_key {
            self.notification.server_chan_key = key;
        }
        self
    }

    /// Polling settings for the watcher
    pub fn watch_config(&self) -> Result<WatchConfig, ConfigError> {
        if self.stream_interval_secs == 0 {
            return Err(ConfigError::Zero("stream_interval_secs"));
        }
        if self.follower_interval_secs == 0 {
            return Err(ConfigError::Zero("follower_interval_secs"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("tick_interval_ms"));
        }
        if self.follower_limit == 0 {
            return Err(ConfigError::Zero("follower_limit"));
        }

        Ok(WatchConfig {
            stream_interval: Duration::from_secs(self.stream_interval_secs),
            follower_interval: Duration::from_secs(self.follower_interval_secs),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            follower_limit: self.follower_limit,
        })
    }
}
