//! Periodic consistency backstop.
//!
//! Event-driven updates keep reactions and the store aligned in the common
//! case; this driver exists for everything they miss. It runs a full pass on
//! a long base interval and inverts the usual backoff: failures shorten the
//! interval toward a floor so drift is recovered sooner, successes stretch it
//! back out to the base.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::SyncConfig,
    model::{PassSummary, SyncPriority, UserId},
    platform::ChatPlatform,
    store::{RsvpStore, StoreResult},
};

use super::{
    full_reconcile_pass, governor::ConcurrencyGovernor, interruptible_sleep,
    reconcile::ReconcileEngine,
};

/// Long-interval full-pass driver running for the life of the process.
pub struct ScheduledSyncDriver {
    engine: Arc<ReconcileEngine>,
    store: Arc<dyn RsvpStore>,
    governor: Arc<ConcurrencyGovernor>,
    config: SyncConfig,
}

impl ScheduledSyncDriver {
    /// Create a driver sharing the process-wide governor.
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn RsvpStore>,
        governor: Arc<ConcurrencyGovernor>,
        config: SyncConfig,
        self_user_id: UserId,
    ) -> Self {
        let engine = Arc::new(ReconcileEngine::new(
            platform,
            store.clone(),
            self_user_id,
        ));
        Self {
            engine,
            store,
            governor,
            config,
        }
    }

    /// Run passes until shutdown. A random initial jitter keeps a fleet of
    /// workers restarted together from hammering the store in lockstep.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let jitter = Duration::from_secs(
            rand::rng().random_range(0..=self.config.startup_jitter_max.as_secs()),
        );
        info!(jitter_secs = jitter.as_secs(), "periodic sync driver starting");
        if interruptible_sleep(jitter, self.config.shutdown_poll_interval, &mut shutdown).await {
            return;
        }

        let mut interval = self.config.periodic_base_interval;
        loop {
            if interruptible_sleep(interval, self.config.shutdown_poll_interval, &mut shutdown)
                .await
            {
                info!("periodic sync driver stopping");
                return;
            }

            interval = match self.run_pass().await {
                Ok(summary) if summary.failed == 0 => {
                    relaxed_interval(interval, self.config.periodic_base_interval)
                }
                Ok(summary) => {
                    warn!(
                        failed = summary.failed,
                        "pass had failing matches, shortening interval"
                    );
                    shortened_interval(interval, self.config.periodic_floor_interval)
                }
                Err(err) => {
                    warn!(error = %err, "periodic pass failed, shortening interval");
                    shortened_interval(interval, self.config.periodic_floor_interval)
                }
            };
            info!(
                next_pass_secs = interval.as_secs(),
                "periodic pass scheduled"
            );
        }
    }

    async fn run_pass(&self) -> StoreResult<PassSummary> {
        full_reconcile_pass(
            &self.store,
            &self.engine,
            &self.governor,
            &self.config,
            SyncPriority::PeriodicBackstop,
        )
        .await
    }
}

/// Inverted backoff: a failed pass halves the interval, bounded by the floor,
/// so drift is recovered sooner than the base cadence would allow.
fn shortened_interval(interval: Duration, floor: Duration) -> Duration {
    (interval / 2).max(floor)
}

/// A healthy pass relaxes the interval back toward the base cadence.
fn relaxed_interval(interval: Duration, base: Duration) -> Duration {
    (interval * 2).min(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortening_halves_down_to_the_floor() {
        let config = SyncConfig::default();
        let base = config.periodic_base_interval;
        let floor = config.periodic_floor_interval;

        let mut interval = base;
        interval = shortened_interval(interval, floor);
        assert_eq!(interval, base / 2);
        interval = shortened_interval(interval, floor);
        interval = shortened_interval(interval, floor);
        interval = shortened_interval(interval, floor);
        assert_eq!(interval, floor);
        // Stays pinned at the floor once reached.
        assert_eq!(shortened_interval(interval, floor), floor);
    }

    #[test]
    fn recovery_doubles_back_up_to_the_base() {
        let config = SyncConfig::default();
        let base = config.periodic_base_interval;
        let floor = config.periodic_floor_interval;

        let mut interval = floor;
        interval = relaxed_interval(interval, base);
        assert_eq!(interval, floor * 2);
        interval = relaxed_interval(interval, base);
        interval = relaxed_interval(interval, base);
        assert_eq!(interval, base);
        assert_eq!(relaxed_interval(interval, base), base);
    }
}
