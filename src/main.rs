use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use twitch_watch::api::helix::HelixClient;
use twitch_watch::config::{AppConfig, Overrides};
use twitch_watch::notifiers::server_chan::ServerChanNotifier;
use twitch_watch::notifiers::Notifier;
use twitch_watch::{ChannelWatcher, Event, TwitchApi};

/// Watch Twitch channels for going live, going offline, viewer and follower changes
#[derive(Parser)]
#[command(name = "twitch_watch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Channels to watch, added to those in the config file
    #[arg(value_name = "CHANNEL")]
    channels: Vec<String>,

    /// Twitch application client id
    #[arg(long, env = "TWITCH_CLIENT_ID")]
    client_id: String,

    /// Twitch access token. Follower lists need a user token with the
    /// moderator:read:followers scope for each watched channel; with an app
    /// token Helix returns only follower totals and no follower events fire
    #[arg(long, env = "TWITCH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Stream status polling interval (seconds)
    #[arg(long, value_name = "SECS")]
    stream_interval: Option<u64>,

    /// Follower polling interval (seconds)
    #[arg(long, value_name = "SECS")]
    follower_interval: Option<u64>,

    /// Scheduler tick (milliseconds)
    #[arg(long, value_name = "MS")]
    tick_ms: Option<u64>,

    /// Followers fetched per channel and poll
    #[arg(long, value_name = "N")]
    follower_limit: Option<usize>,

    /// ServerChan key for push notifications
    #[arg(long, env = "SERVER_CHAN_KEY", hide_env_values = true)]
    server_chan_key: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            channels: self.channels.clone(),
            stream_interval_secs: self.stream_interval,
            follower_interval_secs: self.follower_interval,
            tick_interval_ms: self.tick_ms,
            follower_limit: self.follower_limit,
            server_chan_key: self.server_chan_key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment variables and logging
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => {
            info!("Loading settings from config file: {:?}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    let config = file_config.merge(cli.overrides());

    if config.channels.is_empty() {
        bail!("No channels to watch, pass them as arguments or list them in the config file");
    }
    let watch_config = config.watch_config()?;

    let api = Arc::new(HelixClient::new(&cli.client_id, &cli.access_token)?);
    let watcher = ChannelWatcher::new(&config.channels, api, watch_config).await;

    // Forward events to the push service off the polling task
    let key = config.notification.server_chan_key.trim();
    let (forward, forwarder) = if key.is_empty() {
        info!("No ServerChan key configured, events are only logged");
        (None, None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = ServerChanNotifier::new(key);
        (Some(tx), Some(tokio::spawn(forward_events(rx, notifier))))
    };

    subscribe_all(&watcher, forward);
    watcher.start()?;

    tokio::signal::ctrl_c().await?;
    watcher.stop().await?;

    // dropping the watcher drops the callbacks and closes the channel
    drop(watcher);
    if let Some(forwarder) = forwarder {
        forwarder.await?;
    }

    Ok(())
}

/// Log every event and hand it to the forwarder when one is running
fn subscribe_all<A: TwitchApi + ?Sized + 'static>(
    watcher: &ChannelWatcher<A>,
    forward: Option<UnboundedSender<Event>>,
) {
    let report = move |event: Event| -> Result<()> {
        info!("Change detected: {}", event);
        if let Some(tx) = &forward {
            // the forwarder only goes away at shutdown
            let _ = tx.send(event);
        }
        Ok(())
    };
    let report = Arc::new(report);

    let r = report.clone();
    watcher.subscribe_new_followers(move |followers, channel, total| {
        r(Event::NewFollowers {
            channel: channel.to_string(),
            followers: followers.clone(),
            total,
        })
    });

    let r = report.clone();
    watcher.subscribe_streaming_start(move |channel| {
        r(Event::StreamStart {
            channel: channel.to_string(),
        })
    });

    let r = report.clone();
    watcher.subscribe_streaming_stop(move |channel| {
        r(Event::StreamStop {
            channel: channel.to_string(),
        })
    });

    watcher.subscribe_viewers_changed(move |viewers, channel| {
        report(Event::ViewersChanged {
            channel: channel.to_string(),
            viewers,
        })
    });
}

async fn forward_events<N: Notifier>(mut rx: UnboundedReceiver<Event>, notifier: N) {
    while let Some(event) = rx.recv().await {
        let details = format!("https://www.twitch.tv/{}", event.channel());
        if let Err(e) = notifier.send(&event.to_string(), &details).await {
            error!("Failed to send notification: {}", e);
        }
    }
}
