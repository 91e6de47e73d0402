//! Channel watcher: polls Twitch for stream and follower changes on a
//! background task and dispatches subscriber callbacks for each transition.
//!
//! Subscriptions may be added at any time, including while the watcher is
//! running; they are guarded by a lock and take effect on the next tick.
//! Callbacks run on the polling task and must not subscribe from inside a
//! callback.

pub mod differ;
pub mod events;
pub mod registry;
pub mod schedule;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::TwitchApi;
use events::{Event, Subscriptions};
use registry::{Channel, ChannelRegistry};
use schedule::PollClock;

/// Polling cadences and fetch sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Minimum time between stream status passes
    pub stream_interval: Duration,
    /// Minimum time between follower passes
    pub follower_interval: Duration,
    /// Sleep between scheduler evaluations
    pub tick_interval: Duration,
    /// Followers fetched per channel and pass
    pub follower_limit: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stream_interval: Duration::from_secs(20),
            follower_interval: Duration::from_secs(60),
            tick_interval: Duration::from_millis(500),
            follower_limit: 100,
        }
    }
}

/// Lifecycle state of the polling task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("not starting, no callbacks registered")]
    NoSubscribers,

    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("polling task panicked: {0}")]
    LoopPanicked(String),
}

/// Watches a fixed set of channels and notifies subscribers of changes
pub struct ChannelWatcher<A: TwitchApi + ?Sized + 'static> {
    api: Arc<A>,
    config: WatchConfig,
    registry: Arc<Mutex<ChannelRegistry>>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    task: StdMutex<Option<PollTask>>,
}

/// A spawned polling task and its own run flag
struct PollTask {
    /// Checked once per loop iteration
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl<A: TwitchApi + ?Sized + 'static> ChannelWatcher<A> {
    /// Create a watcher for `names`, seeding each channel's known followers.
    ///
    /// Seed fetch failures are logged and leave that channel with no known
    /// followers; construction itself never fails.
    pub async fn new(names: &[String], api: Arc<A>, config: WatchConfig) -> Self {
        let registry = ChannelRegistry::initialize(names, api.as_ref(), config.follower_limit).await;
        info!("Watching {} channel(s)", registry.len());

        Self {
            api,
            config,
            registry: Arc::new(Mutex::new(registry)),
            subscriptions: Arc::new(RwLock::new(Subscriptions::default())),
            task: StdMutex::new(None),
        }
    }

    pub fn subscribe_new_followers<F>(&self, callback: F)
    where
        F: Fn(&HashSet<String>, &str, u64) -> Result<()> + Send + Sync + 'static,
    {
        self.write_subscriptions().add_new_followers(Box::new(callback));
    }

    pub fn subscribe_streaming_start<F>(&self, callback: F)
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.write_subscriptions().add_stream_start(Box::new(callback));
    }

    pub fn subscribe_streaming_stop<F>(&self, callback: F)
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.write_subscriptions().add_stream_stop(Box::new(callback));
    }

    pub fn subscribe_viewers_changed<F>(&self, callback: F)
    where
        F: Fn(u64, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.write_subscriptions().add_viewers_changed(Box::new(callback));
    }

    /// Spawn the polling task on the current tokio runtime.
    ///
    /// Fails without spawning anything when no callback is registered or
    /// when the watcher is already running.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            warn!("Twitch API polling already running, ignoring start");
            return Err(WatchError::AlreadyRunning);
        }

        if self.read_subscriptions().is_empty() {
            error!("Not starting Twitch API polling, no callbacks registered");
            return Err(WatchError::NoSubscribers);
        }

        let running = Arc::new(AtomicBool::new(true));
        let poller = Poller {
            api: self.api.clone(),
            config: self.config,
            registry: self.registry.clone(),
            subscriptions: self.subscriptions.clone(),
            running: running.clone(),
        };
        *task = Some(PollTask {
            running,
            handle: tokio::spawn(poller.run()),
        });

        Ok(())
    }

    /// Stop the polling task and wait for it to exit.
    ///
    /// An in-flight pass completes first; once this returns no more polls or
    /// callbacks happen. Stopping a stopped watcher does nothing.
    pub async fn stop(&self) -> Result<(), WatchError> {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(task) = task else {
            return Ok(());
        };

        info!("Attempting to stop Twitch API polling");
        task.running.store(false, Ordering::SeqCst);
        task.handle
            .await
            .map_err(|e| WatchError::LoopPanicked(e.to_string()))
    }

    pub fn state(&self) -> LoopState {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        match task.as_ref() {
            Some(t) if !t.handle.is_finished() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    /// Snapshot of every channel's cached state, in registration order
    pub async fn channels(&self) -> Vec<Channel> {
        self.registry.lock().await.iter().cloned().collect()
    }

    fn read_subscriptions(&self) -> RwLockReadGuard<'_, Subscriptions> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_subscriptions(&self) -> RwLockWriteGuard<'_, Subscriptions> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// State moved into the polling task
struct Poller<A: TwitchApi + ?Sized> {
    api: Arc<A>,
    config: WatchConfig,
    registry: Arc<Mutex<ChannelRegistry>>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    running: Arc<AtomicBool>,
}

impl<A: TwitchApi + ?Sized> Poller<A> {
    async fn run(self) {
        info!("Starting Twitch API polling");
        let now = Instant::now();
        let mut clock = PollClock::new(now, self.config.stream_interval, self.config.follower_interval);

        while self.running.load(Ordering::SeqCst) {
            let (wants_streams, wants_followers) = {
                let subs = self
                    .subscriptions
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                (subs.wants_streams(), subs.wants_followers())
            };

            if wants_streams && clock.stream_due(Instant::now()) {
                self.poll_streams().await;
                clock.stream_polled(Instant::now());
            }

            if wants_followers && clock.followers_due(Instant::now()) {
                self.poll_followers().await;
                clock.followers_polled(Instant::now());
            }

            tokio::time::sleep(self.config.tick_interval).await;
        }

        info!("Stopped Twitch API polling");
    }

    /// One stream pass over every channel in registration order
    async fn poll_streams(&self) {
        debug!("Polling stream status");
        let mut registry = self.registry.lock().await;

        for channel in registry.iter_mut() {
            let snapshot = match self.api.fetch_stream_status(&channel.name).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("Error while grabbing stream for {}: {}", channel.name, e);
                    continue;
                }
            };

            for event in differ::compare_stream(channel, snapshot.as_ref()) {
                self.dispatch(&event);
            }
        }
    }

    async fn poll_followers(&self) {
        debug!("Polling followers");
        let mut registry = self.registry.lock().await;

        for channel in registry.iter_mut() {
            let page = match self
                .api
                .fetch_followers(&channel.name, self.config.follower_limit)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!("Error while getting followers for {}: {}", channel.name, e);
                    continue;
                }
            };

            if let Some(event) = differ::compare_followers(channel, &page) {
                self.dispatch(&event);
            }
        }
    }

    fn dispatch(&self, event: &Event) {
        let subs = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = subs.dispatch(event) {
            error!(
                "{:?} callback for {} failed, skipping remaining callbacks: {:#}",
                event.kind(),
                event.channel(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::testing::FakeApi;
    use anyhow::anyhow;

    type Log = Arc<StdMutex<Vec<String>>>;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn watcher(api: &Arc<FakeApi>, channels: &[&str]) -> ChannelWatcher<FakeApi> {
        ChannelWatcher::new(&names(channels), api.clone(), WatchConfig::default()).await
    }

    /// Record every stream event as "kind:channel[:viewers]"
    fn record_streams(watcher: &ChannelWatcher<FakeApi>) -> Log {
        let log: Log = Arc::default();

        let events = log.clone();
        watcher.subscribe_streaming_start(move |channel| {
            events.lock().unwrap().push(format!("start:{}", channel));
            Ok(())
        });
        let events = log.clone();
        watcher.subscribe_streaming_stop(move |channel| {
            events.lock().unwrap().push(format!("stop:{}", channel));
            Ok(())
        });
        let events = log.clone();
        watcher.subscribe_viewers_changed(move |viewers, channel| {
            events
                .lock()
                .unwrap()
                .push(format!("viewers:{}:{}", channel, viewers));
            Ok(())
        });

        log
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    async fn run_for(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_to_start_without_callbacks() {
        let api = Arc::new(FakeApi::new());
        let watcher = watcher(&api, &["alpha"]).await;

        assert!(matches!(watcher.start(), Err(WatchError::NoSubscribers)));
        assert_eq!(watcher.state(), LoopState::Stopped);

        run_for(30).await;
        assert_eq!(api.stream_calls("alpha"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let api = Arc::new(FakeApi::new());
        let watcher = watcher(&api, &["alpha"]).await;
        record_streams(&watcher);

        watcher.start().unwrap();
        assert_eq!(watcher.state(), LoopState::Running);
        assert!(matches!(watcher.start(), Err(WatchError::AlreadyRunning)));

        run_for(1).await;
        assert_eq!(api.stream_calls("alpha"), 1);

        watcher.stop().await.unwrap();
        assert_eq!(watcher.state(), LoopState::Stopped);
        watcher.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stream_scenario_over_four_passes() {
        let api = Arc::new(FakeApi::new());
        api.set_followers("alpha", &["bob"], 1);
        for viewers in [None, Some(10), Some(10), None] {
            api.push_stream("alpha", viewers);
        }

        let watcher = watcher(&api, &["alpha"]).await;
        let log = record_streams(&watcher);
        watcher.start().unwrap();

        // passes at 0s, 20s, 40s and 60s
        run_for(70).await;
        watcher.stop().await.unwrap();

        assert_eq!(api.stream_calls("alpha"), 4);
        assert_eq!(take(&log), vec!["start:alpha", "viewers:alpha:10", "stop:alpha"]);
        // nobody listens for followers, so only the seed fetch happened
        assert_eq!(api.follower_calls("alpha"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn follower_scenario_reports_once() {
        let api = Arc::new(FakeApi::new());
        api.set_followers("alpha", &["bob"], 1);
        let watcher = watcher(&api, &["alpha"]).await;
        api.set_followers("alpha", &["bob", "carol"], 2);

        let log: Log = Arc::default();
        let events = log.clone();
        watcher.subscribe_new_followers(move |followers, channel, total| {
            let mut names: Vec<&String> = followers.iter().collect();
            names.sort();
            events
                .lock()
                .unwrap()
                .push(format!("{:?}:{}:{}", names, channel, total));
            Ok(())
        });
        watcher.start().unwrap();

        run_for(1).await;
        assert_eq!(take(&log), vec![r#"["carol"]:alpha:2"#]);

        // second pass at 60s sees the same followers
        run_for(70).await;
        watcher.stop().await.unwrap();

        assert!(take(&log).is_empty());
        assert_eq!(api.follower_calls("alpha"), 3);
        assert_eq!(api.stream_calls("alpha"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_channel_does_not_block_others() {
        let api = Arc::new(FakeApi::new());
        api.fail_stream("alpha");
        api.set_stream("beta", Some(7));

        let watcher = watcher(&api, &["alpha", "beta"]).await;
        let log = record_streams(&watcher);
        watcher.start().unwrap();

        run_for(1).await;
        assert_eq!(watcher.state(), LoopState::Running);
        watcher.stop().await.unwrap();

        assert_eq!(take(&log), vec!["start:beta", "viewers:beta:7"]);
        let channels = watcher.channels().await;
        assert!(!channels[0].online);
        assert!(channels[1].online);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_pass_finishes_before_follower_pass() {
        let api = Arc::new(FakeApi::new());
        let watcher = watcher(&api, &["alpha", "beta"]).await;
        api.take_calls();

        record_streams(&watcher);
        watcher.subscribe_new_followers(|_, _, _| Ok(()));
        watcher.start().unwrap();

        run_for(1).await;
        watcher.stop().await.unwrap();

        assert_eq!(
            api.take_calls(),
            vec!["stream:alpha", "stream:beta", "followers:alpha", "followers:beta"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_follower_fetch_does_not_block_others() {
        let api = Arc::new(FakeApi::new());
        api.set_followers("alpha", &["bob"], 1);
        api.set_followers("beta", &["bob"], 1);
        let watcher = watcher(&api, &["alpha", "beta"]).await;

        api.fail_followers("alpha");
        api.set_followers("beta", &["bob", "carol"], 2);

        let log: Log = Arc::default();
        let events = log.clone();
        watcher.subscribe_new_followers(move |followers, channel, total| {
            let mut names: Vec<&String> = followers.iter().collect();
            names.sort();
            events
                .lock()
                .unwrap()
                .push(format!("{:?}:{}:{}", names, channel, total));
            Ok(())
        });
        watcher.start().unwrap();

        run_for(1).await;
        assert_eq!(watcher.state(), LoopState::Running);
        watcher.stop().await.unwrap();

        assert_eq!(take(&log), vec![r#"["carol"]:beta:2"#]);
        assert_eq!(api.follower_calls("alpha"), 2);
        let channels = watcher.channels().await;
        assert_eq!(channels[0].known_followers.len(), 1);
        assert_eq!(channels[1].known_followers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_passes_still_wait_for_the_interval() {
        let api = Arc::new(FakeApi::new());
        api.fail_followers("alpha");
        api.fail_stream("alpha");
        api.fail_stream("beta");

        let watcher = watcher(&api, &["alpha", "beta"]).await;
        let log = record_streams(&watcher);
        watcher.subscribe_new_followers(|_, _, _| Ok(()));
        watcher.start().unwrap();

        // stream passes at 0s and 20s, one follower pass at 0s
        run_for(30).await;
        assert_eq!(watcher.state(), LoopState::Running);
        watcher.stop().await.unwrap();

        assert!(take(&log).is_empty());
        assert_eq!(api.stream_calls("alpha"), 2);
        assert_eq!(api.stream_calls("beta"), 2);
        // seed plus the first pass
        assert_eq!(api.follower_calls("alpha"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_during_stop_keeps_the_new_task() {
        let api = Arc::new(FakeApi::new());
        api.set_stream("alpha", Some(2));

        let watcher = watcher(&api, &["alpha"]).await;
        record_streams(&watcher);
        watcher.start().unwrap();
        run_for(1).await;
        assert_eq!(api.stream_calls("alpha"), 1);

        // stop is polled first and takes the old task, then start spawns a new one
        let (stopped, started) = tokio::join!(watcher.stop(), async { watcher.start() });
        stopped.unwrap();
        started.unwrap();
        assert_eq!(watcher.state(), LoopState::Running);

        run_for(1).await;
        assert_eq!(api.stream_calls("alpha"), 2);

        watcher.stop().await.unwrap();
        assert_eq!(watcher.state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_seed_leaves_channel_empty() {
        let api = Arc::new(FakeApi::new());
        api.fail_followers("alpha");
        api.set_followers("beta", &["bob"], 1);

        let watcher = watcher(&api, &["alpha", "beta"]).await;
        let channels = watcher.channels().await;

        assert_eq!(channels.len(), 2);
        assert!(channels.iter().all(|c| !c.online));
        assert!(channels[0].known_followers.is_empty());
        assert!(channels[1].known_followers.contains("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_callbacks_after_stop() {
        let api = Arc::new(FakeApi::new());
        let watcher = watcher(&api, &["alpha"]).await;
        let log = record_streams(&watcher);

        watcher.start().unwrap();
        run_for(1).await;
        watcher.stop().await.unwrap();
        let calls = api.stream_calls("alpha");

        api.set_stream("alpha", Some(3));
        run_for(120).await;

        assert!(take(&log).is_empty());
        assert_eq!(api.stream_calls("alpha"), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_skips_the_rest_but_keeps_polling() {
        let api = Arc::new(FakeApi::new());
        api.push_stream("alpha", Some(1));
        api.push_stream("alpha", None);

        let watcher = watcher(&api, &["alpha"]).await;
        watcher.subscribe_streaming_start(|_| Err(anyhow!("callback broke")));
        let log = record_streams(&watcher);
        watcher.start().unwrap();

        run_for(30).await;
        watcher.stop().await.unwrap();

        // the second start callback never ran, later events still flowed
        assert_eq!(take(&log), vec!["viewers:alpha:1", "stop:alpha"]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribing_while_running_takes_effect() {
        let api = Arc::new(FakeApi::new());
        api.set_stream("alpha", Some(4));

        let watcher = watcher(&api, &["alpha"]).await;
        watcher.subscribe_new_followers(|_, _, _| Ok(()));
        watcher.start().unwrap();

        run_for(1).await;
        assert_eq!(api.stream_calls("alpha"), 0);

        let log = record_streams(&watcher);
        run_for(1).await;
        watcher.stop().await.unwrap();

        assert_eq!(take(&log), vec!["start:alpha", "viewers:alpha:4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_cached_state() {
        let api = Arc::new(FakeApi::new());
        api.set_stream("alpha", Some(9));

        let watcher = watcher(&api, &["alpha"]).await;
        let log = record_streams(&watcher);

        watcher.start().unwrap();
        run_for(1).await;
        watcher.stop().await.unwrap();
        assert_eq!(take(&log), vec!["start:alpha", "viewers:alpha:9"]);

        watcher.start().unwrap();
        run_for(1).await;
        watcher.stop().await.unwrap();
        assert!(take(&log).is_empty());
        assert_eq!(api.stream_calls("alpha"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_is_reported_on_stop() {
        let api = Arc::new(FakeApi::new());
        api.set_stream("alpha", Some(1));

        let watcher = watcher(&api, &["alpha"]).await;
        watcher.subscribe_streaming_start(|_| panic!("callback panicked"));
        watcher.start().unwrap();

        run_for(1).await;
        assert_eq!(watcher.state(), LoopState::Stopped);
        assert!(matches!(watcher.stop().await, Err(WatchError::LoopPanicked(_))));
    }
}
