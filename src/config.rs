//! Worker-level configuration with environment overrides.

use std::{env, time::Duration};

use tracing::warn;

/// Immutable runtime configuration shared across the sync components.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Offline duration at or above which a startup sync is required.
    pub downtime_threshold: Duration,
    /// Cadence of the liveness heartbeat while idle.
    pub heartbeat_interval: Duration,
    /// Shortened retry cadence after a failed heartbeat write.
    pub heartbeat_retry_interval: Duration,
    /// Base interval between periodic backstop passes.
    pub periodic_base_interval: Duration,
    /// Shortest interval the inverted backoff may reach on repeated failures.
    pub periodic_floor_interval: Duration,
    /// Upper bound of the random jitter before the first periodic pass.
    pub startup_jitter_max: Duration,
    /// Sleep chunk size; shutdown is observed at most this late.
    pub shutdown_poll_interval: Duration,
    /// Trailing window (days) within which a managed message is active.
    pub active_window_days: i64,
    /// Window (days) bounding full sync passes around today.
    pub full_sync_window_days: i64,
    /// Window (days) bounding the downtime activity query.
    pub activity_limit_days: i64,
    /// Concurrent operations allowed per match.
    pub per_match_limit: usize,
    /// Concurrent match reconciliations allowed across a pass.
    pub global_limit: usize,
    /// How long a sync task waits for a governor slot before skipping.
    pub governor_acquire_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            downtime_threshold: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(300),
            heartbeat_retry_interval: Duration::from_secs(60),
            periodic_base_interval: Duration::from_secs(6 * 60 * 60),
            periodic_floor_interval: Duration::from_secs(60 * 60),
            startup_jitter_max: Duration::from_secs(60),
            shutdown_poll_interval: Duration::from_secs(30),
            active_window_days: 14,
            full_sync_window_days: 7,
            activity_limit_days: 7,
            per_match_limit: 2,
            global_limit: 3,
            governor_acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Load the configuration, applying any environment overrides on top of
    /// the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("SYNC_DOWNTIME_THRESHOLD_SECS") {
            config.downtime_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("SYNC_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("SYNC_PERIODIC_INTERVAL_SECS") {
            config.periodic_base_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("SYNC_PERIODIC_FLOOR_SECS") {
            config.periodic_floor_interval = Duration::from_secs(secs);
        }
        if let Some(days) = env_u64("SYNC_ACTIVE_WINDOW_DAYS") {
            config.active_window_days = days as i64;
        }
        if let Some(limit) = env_u64("SYNC_GLOBAL_LIMIT") {
            config.global_limit = (limit as usize).max(1);
        }
        if let Some(limit) = env_u64("SYNC_PER_MATCH_LIMIT") {
            config.per_match_limit = (limit as usize).max(1);
        }

        config
    }
}

fn env_u64(var: &str) -> Option<u64> {
    let raw = env::var(var).ok()?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                var,
                value = raw,
                "ignoring unparseable configuration override"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.downtime_threshold, Duration::from_secs(300));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(300));
        assert_eq!(config.periodic_base_interval, Duration::from_secs(21_600));
        assert_eq!(config.periodic_floor_interval, Duration::from_secs(3_600));
        assert_eq!(config.global_limit, 3);
        assert_eq!(config.per_match_limit, 2);
        assert_eq!(config.active_window_days, 14);
    }
}
