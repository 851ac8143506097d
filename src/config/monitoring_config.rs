//! Monitoring engine configuration parsing from environment variables.

use crate::application::feed::FeedMode;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use std::env;
use std::time::Duration;

/// Feed, scheduler, and enforcement knobs.
#[derive(Debug, Clone)]
pub struct MonitoringEnvConfig {
    pub mode: FeedMode,
    pub poll_interval: Duration,
    pub stale_threshold: Duration,
    pub stale_check_interval: Duration,
    /// UTC wall-clock instant of the daily reset.
    pub reset_time: NaiveTime,
    pub close_retry_max: u32,
    pub bus_message_ttl: Duration,
    pub queue_depth: usize,
    pub stop_grace: Duration,
}

impl MonitoringEnvConfig {
    pub fn from_env() -> Result<Self> {
        let mode = env::var("MONITORING_MODE")
            .unwrap_or_else(|_| "poll".to_string())
            .parse::<FeedMode>()?;

        let poll_interval = Duration::from_secs(parse_u64("POLL_INTERVAL_SECS", 10)?);
        // Default stale threshold: twice the poll interval.
        let stale_threshold = Duration::from_secs(parse_u64(
            "STALE_THRESHOLD_SECS",
            poll_interval.as_secs() * 2,
        )?);

        let reset_raw = env::var("DAILY_RESET_TIME").unwrap_or_else(|_| "00:01".to_string());
        let reset_time = NaiveTime::parse_from_str(&reset_raw, "%H:%M")
            .with_context(|| format!("Failed to parse DAILY_RESET_TIME: {}", reset_raw))?;

        Ok(Self {
            mode,
            poll_interval,
            stale_threshold,
            stale_check_interval: Duration::from_secs(parse_u64("STALE_CHECK_INTERVAL_SECS", 30)?),
            reset_time,
            close_retry_max: parse_u64("CLOSE_RETRY_MAX", 3)? as u32,
            bus_message_ttl: Duration::from_secs(parse_u64("BUS_MESSAGE_TTL_SECS", 300)?),
            queue_depth: parse_u64("QUEUE_DEPTH", 64)? as usize,
            stop_grace: Duration::from_secs(parse_u64("STOP_GRACE_SECS", 30)?),
        })
    }
}

fn parse_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {}: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them to defaults only.
    #[test]
    fn test_defaults() {
        let config = MonitoringEnvConfig::from_env().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.stale_threshold, Duration::from_secs(20));
        assert_eq!(config.reset_time, NaiveTime::from_hms_opt(0, 1, 0).unwrap());
        assert_eq!(config.close_retry_max, 3);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.bus_message_ttl, Duration::from_secs(300));
    }
}
