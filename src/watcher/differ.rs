use std::collections::HashSet;

use log::debug;

use crate::api::{FollowerPage, StreamStatus};
use crate::watcher::events::Event;
use crate::watcher::registry::Channel;

/// Compare a stream snapshot against the channel's cached state.
///
/// The online/offline comparison runs first; the viewer comparison then
/// sees the updated `online` flag, so a channel going live yields
/// `StreamStart` followed by `ViewersChanged`.
pub fn compare_stream(channel: &mut Channel, snapshot: Option<&StreamStatus>) -> Vec<Event> {
    let mut events = Vec::new();

    match (snapshot, channel.online) {
        (Some(_), false) => {
            debug!("{} went live", channel.name);
            channel.online = true;
            events.push(Event::StreamStart {
                channel: channel.name.clone(),
            });
        }
        (None, true) => {
            debug!("{} went offline", channel.name);
            channel.online = false;
            events.push(Event::StreamStop {
                channel: channel.name.clone(),
            });
        }
        _ => {}
    }

    if let Some(event) = compare_viewers(channel, snapshot) {
        events.push(event);
    }

    events
}

/// Viewer counts only matter while online; offline counts are not cached.
fn compare_viewers(channel: &mut Channel, snapshot: Option<&StreamStatus>) -> Option<Event> {
    if !channel.online {
        return None;
    }
    let viewers = snapshot?.viewer_count;

    if channel.last_viewer_count == Some(viewers) {
        return None;
    }

    debug!(
        "{} viewers {:?} -> {}",
        channel.name, channel.last_viewer_count, viewers
    );
    channel.last_viewer_count = Some(viewers);
    Some(Event::ViewersChanged {
        channel: channel.name.clone(),
        viewers,
    })
}

/// Compare a follower fetch against the known followers.
///
/// New identities are added to the cache, so each one is reported once.
pub fn compare_followers(channel: &mut Channel, page: &FollowerPage) -> Option<Event> {
    let new_follows: HashSet<String> = page
        .followers
        .iter()
        .map(|f| f.identity())
        .filter(|identity| !channel.known_followers.contains(*identity))
        .map(str::to_string)
        .collect();

    if new_follows.is_empty() {
        return None;
    }

    debug!("{} gained {} new follower(s)", channel.name, new_follows.len());
    channel
        .known_followers
        .extend(new_follows.iter().cloned());

    Some(Event::NewFollowers {
        channel: channel.name.clone(),
        followers: new_follows,
        total: page.total,
    })
}
