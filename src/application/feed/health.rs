use std::time::{Duration, Instant};
use tracing::debug;

/// Monitor for detecting silent (zombie) account streams.
pub struct FeedHealthMonitor {
    last_event_received_at: Instant,
    silence_threshold: Duration,
    name: String,
}

impl FeedHealthMonitor {
    pub fn new(name: &str, silence_threshold: Duration) -> Self {
        Self {
            last_event_received_at: Instant::now(),
            silence_threshold,
            name: name.to_string(),
        }
    }

    /// Record that an event has been received.
    pub fn record_event(&mut self) {
        self.last_event_received_at = Instant::now();
    }

    /// Returns true if healthy, false once the silence threshold is exceeded.
    pub fn is_healthy(&self) -> bool {
        let elapsed = self.last_event_received_at.elapsed();
        if elapsed > self.silence_threshold {
            debug!(
                "FeedHealthMonitor[{}]: Stream is silent for {:?} (Threshold: {:?})",
                self.name, elapsed, self.silence_threshold
            );
            return false;
        }
        true
    }

    pub fn last_event_elapsed(&self) -> Duration {
        self.last_event_received_at.elapsed()
    }
}
