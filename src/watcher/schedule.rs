use std::time::Duration;

use tokio::time::Instant;

/// Next-due instants of the two independent poll paths
#[derive(Debug, Clone, Copy)]
pub struct PollClock {
    next_stream_check: Instant,
    next_follower_check: Instant,
    stream_interval: Duration,
    follower_interval: Duration,
}

impl PollClock {
    /// Both paths start due at `now`
    pub fn new(now: Instant, stream_interval: Duration, follower_interval: Duration) -> Self {
        Self {
            next_stream_check: now,
            next_follower_check: now,
            stream_interval,
            follower_interval,
        }
    }

    pub fn stream_due(&self, now: Instant) -> bool {
        now >= self.next_stream_check
    }

    pub fn followers_due(&self, now: Instant) -> bool {
        now >= self.next_follower_check
    }

    /// Push the stream path out by one cadence, whatever the pass outcome
    pub fn stream_polled(&mut self, now: Instant) {
        self.next_stream_check = now + self.stream_interval;
    }

    pub fn followers_polled(&mut self, now: Instant) {
        self.next_follower_check = now + self.follower_interval;
    }
}
