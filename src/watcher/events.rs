use std::collections::HashSet;
use std::fmt::{self, Display};

use anyhow::Result;

/// Callback for new followers: (new follower names, channel, total followers)
pub type NewFollowersCallback = Box<dyn Fn(&HashSet<String>, &str, u64) -> Result<()> + Send + Sync>;

/// Callback for stream start/stop: (channel)
pub type ChannelCallback = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Callback for viewer count changes: (viewer count, channel)
pub type ViewersCallback = Box<dyn Fn(u64, &str) -> Result<()> + Send + Sync>;

/// Kind of a detected transition, one subscription list per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewFollowers,
    StreamStart,
    StreamStop,
    ViewersChanged,
}

/// A transition detected by comparing a snapshot against cached state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NewFollowers {
        channel: String,
        followers: HashSet<String>,
        total: u64,
    },
    StreamStart {
        channel: String,
    },
    StreamStop {
        channel: String,
    },
    ViewersChanged {
        channel: String,
        viewers: u64,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewFollowers { .. } => EventKind::NewFollowers,
            Event::StreamStart { .. } => EventKind::StreamStart,
            Event::StreamStop { .. } => EventKind::StreamStop,
            Event::ViewersChanged { .. } => EventKind::ViewersChanged,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Event::NewFollowers { channel, .. }
            | Event::StreamStart { channel }
            | Event::StreamStop { channel }
            | Event::ViewersChanged { channel, .. } => channel,
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NewFollowers {
                channel,
                followers,
                total,
            } => {
                let mut names: Vec<&str> = followers.iter().map(String::as_str).collect();
                names.sort_unstable();
                write!(
                    f,
                    "{} has {} new follower(s): {} (total {})",
                    channel,
                    names.len(),
                    names.join(", "),
                    total
                )
            }
            Event::StreamStart { channel } => write!(f, "{} went live", channel),
            Event::StreamStop { channel } => write!(f, "{} went offline", channel),
            Event::ViewersChanged { channel, viewers } => {
                write!(f, "{} now has {} viewer(s)", channel, viewers)
            }
        }
    }
}

/// Registered callbacks, one list per event kind in subscription order
#[derive(Default)]
pub struct Subscriptions {
    new_followers: Vec<NewFollowersCallback>,
    stream_start: Vec<ChannelCallback>,
    stream_stop: Vec<ChannelCallback>,
    viewers_changed: Vec<ViewersCallback>,
}

impl Subscriptions {
    pub fn add_new_followers(&mut self, callback: NewFollowersCallback) {
        self.new_followers.push(callback);
    }

    pub fn add_stream_start(&mut self, callback: ChannelCallback) {
        self.stream_start.push(callback);
    }

    pub fn add_stream_stop(&mut self, callback: ChannelCallback) {
        self.stream_stop.push(callback);
    }

    pub fn add_viewers_changed(&mut self, callback: ViewersCallback) {
        self.viewers_changed.push(callback);
    }

    #[cfg(test)]
    pub(crate) fn count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::NewFollowers => self.new_followers.len(),
            EventKind::StreamStart => self.stream_start.len(),
            EventKind::StreamStop => self.stream_stop.len(),
            EventKind::ViewersChanged => self.viewers_changed.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.wants_streams() && !self.wants_followers()
    }

    /// Whether anything listens to stream start, stop or viewer changes
    pub fn wants_streams(&self) -> bool {
        !self.stream_start.is_empty()
            || !self.stream_stop.is_empty()
            || !self.viewers_changed.is_empty()
    }

    pub fn wants_followers(&self) -> bool {
        !self.new_followers.is_empty()
    }

    /// Invoke every callback subscribed to the event's kind, in order.
    ///
    /// The first failing callback stops the remaining ones for this event
    /// and its error is returned.
    pub fn dispatch(&self, event: &Event) -> Result<()> {
        match event {
            Event::NewFollowers {
                channel,
                followers,
                total,
            } => {
                for callback in &self.new_followers {
                    callback(followers, channel, *total)?;
                }
            }
            Event::StreamStart { channel } => {
                for callback in &self.stream_start {
                    callback(channel)?;
                }
            }
            Event::StreamStop { channel } => {
                for callback in &self.stream_stop {
                    callback(channel)?;
                }
            }
            Event::ViewersChanged { channel, viewers } => {
                for callback in &self.viewers_changed {
                    callback(*viewers, channel)?;
                }
            }
        }
        Ok(())
    }
}
