use std::collections::HashSet;

use log::{debug, warn};

use crate::api::TwitchApi;

/// Cached state of one watched channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel login name
    pub name: String,
    /// Whether the channel was live at the last stream poll
    pub online: bool,
    /// Last viewer count seen while online
    pub last_viewer_count: Option<u64>,
    /// Followers already reported, by identity
    pub known_followers: HashSet<String>,
}

impl Channel {
    pub fn new(name: &str, known_followers: HashSet<String>) -> Self {
        Self {
            name: name.to_string(),
            online: false,
            last_viewer_count: None,
            known_followers,
        }
    }
}

/// The fixed set of watched channels, in registration order
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    /// Build the registry, seeding each channel's follower cache from the API.
    ///
    /// Never fails: a channel whose seed fetch fails starts with no known
    /// followers. Repeated names collapse into their first entry.
    pub async fn initialize<A>(names: &[String], api: &A, follower_limit: usize) -> Self
    where
        A: TwitchApi + ?Sized,
    {
        let mut channels: Vec<Channel> = Vec::with_capacity(names.len());

        for name in names {
            if channels.iter().any(|c| &c.name == name) {
                debug!("Channel {} listed more than once, ignoring repeat", name);
                continue;
            }

            let known: HashSet<String> = match api.fetch_followers(name, follower_limit).await {
                Ok(page) => page
                    .followers
                    .iter()
                    .map(|f| f.identity().to_string())
                    .collect(),
                Err(e) => {
                    warn!("Twitch API unavailable while seeding followers for {}: {}", name, e);
                    HashSet::new()
                }
            };

            debug!("Seeded {} with {} known followers", name, known.len());
            channels.push(Channel::new(name, known));
        }

        Self { channels }
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }
}
