pub mod api;
pub mod config;
pub mod notifiers;
pub mod watcher;

pub use api::{ApiError, Follower, FollowerPage, StreamStatus, TwitchApi};
pub use watcher::events::{Event, EventKind};
pub use watcher::{ChannelWatcher, LoopState, WatchConfig, WatchError};
