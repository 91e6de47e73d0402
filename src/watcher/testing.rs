//! Scripted in-memory `TwitchApi` used by the watcher tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{ApiError, ApiResult, Follower, FollowerPage, StreamStatus, TwitchApi};

#[derive(Clone)]
enum Reply<T> {
    Ok(T),
    Unavailable,
}

impl<T: Clone> Reply<T> {
    fn into_result(self, channel: &str) -> ApiResult<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Unavailable => Err(ApiError::Unavailable(format!("{} unreachable", channel))),
        }
    }
}

/// Per-channel reply queues. The last queued reply repeats once the queue
/// is drained down to it.
#[derive(Default)]
struct Script {
    followers: HashMap<String, VecDeque<Reply<FollowerPage>>>,
    streams: HashMap<String, VecDeque<Reply<Option<StreamStatus>>>>,
    follower_calls: HashMap<String, usize>,
    stream_calls: HashMap<String, usize>,
    /// Every fetch as "stream:<channel>" or "followers:<channel>", in order
    calls: Vec<String>,
}

fn next_reply<T: Clone>(queue: Option<&mut VecDeque<Reply<T>>>, fallback: T) -> Reply<T> {
    match queue {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
        Some(queue) => queue.front().cloned().unwrap_or(Reply::Ok(fallback)),
        None => Reply::Ok(fallback),
    }
}

#[derive(Default)]
pub struct FakeApi {
    script: Mutex<Script>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(names: &[&str], total: u64) -> FollowerPage {
        FollowerPage {
            followers: names.iter().map(|&n| Follower::new(Some(n), n)).collect(),
            total,
        }
    }

    /// Replace the channel's follower replies with one that always answers `names`
    pub fn set_followers(&self, channel: &str, names: &[&str], total: u64) {
        self.set_followers_raw(channel, Self::page(names, total).followers, total);
    }

    pub fn set_followers_raw(&self, channel: &str, followers: Vec<Follower>, total: u64) {
        let mut script = self.script.lock().unwrap();
        script.followers.insert(
            channel.to_string(),
            VecDeque::from([Reply::Ok(FollowerPage { followers, total })]),
        );
    }

    pub fn fail_followers(&self, channel: &str) {
        let mut script = self.script.lock().unwrap();
        script
            .followers
            .insert(channel.to_string(), VecDeque::from([Reply::Unavailable]));
    }

    /// Replace the channel's stream replies with one that always answers `viewers`
    pub fn set_stream(&self, channel: &str, viewers: Option<u64>) {
        let status = viewers.map(|viewer_count| StreamStatus { viewer_count });
        let mut script = self.script.lock().unwrap();
        script
            .streams
            .insert(channel.to_string(), VecDeque::from([Reply::Ok(status)]));
    }

    pub fn push_stream(&self, channel: &str, viewers: Option<u64>) {
        let status = viewers.map(|viewer_count| StreamStatus { viewer_count });
        let mut script = self.script.lock().unwrap();
        script
            .streams
            .entry(channel.to_string())
            .or_default()
            .push_back(Reply::Ok(status));
    }

    pub fn fail_stream(&self, channel: &str) {
        let mut script = self.script.lock().unwrap();
        script
            .streams
            .insert(channel.to_string(), VecDeque::from([Reply::Unavailable]));
    }

    pub fn stream_calls(&self, channel: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.stream_calls.get(channel).copied().unwrap_or(0)
    }

    pub fn follower_calls(&self, channel: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.follower_calls.get(channel).copied().unwrap_or(0)
    }

    /// Drain the fetch log
    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut self.script.lock().unwrap().calls)
    }
}

#[async_trait]
impl TwitchApi for FakeApi {
    async fn fetch_followers(&self, channel: &str, limit: usize) -> ApiResult<FollowerPage> {
        let mut script = self.script.lock().unwrap();
        *script.follower_calls.entry(channel.to_string()).or_default() += 1;
        script.calls.push(format!("followers:{}", channel));
        let reply = next_reply(script.followers.get_mut(channel), FollowerPage::default());
        let mut page = reply.into_result(channel)?;
        page.followers.truncate(limit);
        Ok(page)
    }

    async fn fetch_stream_status(&self, channel: &str) -> ApiResult<Option<StreamStatus>> {
        let mut script = self.script.lock().unwrap();
        *script.stream_calls.entry(channel.to_string()).or_default() += 1;
        script.calls.push(format!("stream:{}", channel));
        next_reply(script.streams.get_mut(channel), None).into_result(channel)
    }
}
