//! Downtime-aware sync manager.
//!
//! On startup the manager measures how long the worker was offline and only
//! syncs what plausibly drifted: a short blip skips syncing entirely, a real
//! outage triggers a targeted pass over matches with RSVP activity during the
//! window, and any failure along the way degrades to a full pass. Once idle it
//! keeps the liveness heartbeat fresh so the next boot can measure downtime.

use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::SyncConfig,
    model::{
        DowntimeWindow, HeartbeatRecord, ManagedMessage, MatchId, PassSummary, SyncPriority,
        UserId,
    },
    platform::ChatPlatform,
    store::{RsvpStore, StoreResult},
};

use super::{
    full_reconcile_pass,
    governor::ConcurrencyGovernor,
    interruptible_sleep,
    reconcile::ReconcileEngine,
    retry::{RetryPolicy, retry_with_backoff},
    run_sync_pass, tasks_from_messages,
};

/// Slot name under which this worker's heartbeat is stored.
const INSTANCE_TYPE: &str = "main";

/// Lifecycle phase of the manager, observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// Measuring downtime and deciding what to sync.
    CheckingStartup,
    /// A startup sync pass is in flight.
    Syncing,
    /// Startup finished; only the heartbeat loop is running.
    Idle,
}

/// What the startup check decided and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// No prior heartbeat existed; everything was synced.
    FirstRunFullSync(PassSummary),
    /// The worker was back before the downtime threshold; nothing to do.
    SkippedShortDowntime,
    /// Matches with activity during the outage were synced.
    TargetedSync {
        /// Matches the activity query selected.
        matches: usize,
        /// Outcome of the targeted pass.
        summary: PassSummary,
    },
    /// The targeted path failed somewhere; a full pass ran instead.
    FallbackFullSync(PassSummary),
    /// Even the fallback full pass could not run. The periodic backstop
    /// covers the gap on its next pass.
    Failed,
}

/// Orchestrates the startup downtime check and the steady-state heartbeat.
pub struct SyncManager {
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn RsvpStore>,
    governor: Arc<ConcurrencyGovernor>,
    config: SyncConfig,
    self_user_id: UserId,
    instance_id: String,
    phase: RwLock<ManagerPhase>,
}

impl SyncManager {
    /// Create a manager. The instance id is derived from the boot timestamp
    /// so restarts are distinguishable in the store.
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn RsvpStore>,
        governor: Arc<ConcurrencyGovernor>,
        config: SyncConfig,
        self_user_id: UserId,
    ) -> Self {
        let instance_id = format!(
            "matchday-sync-{}",
            OffsetDateTime::now_utc().unix_timestamp()
        );
        Self {
            platform,
            store,
            governor,
            config,
            self_user_id,
            instance_id,
            phase: RwLock::new(ManagerPhase::CheckingStartup),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ManagerPhase {
        match self.phase.read() {
            Ok(phase) => *phase,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_phase(&self, phase: ManagerPhase) {
        match self.phase.write() {
            Ok(mut slot) => *slot = phase,
            Err(poisoned) => *poisoned.into_inner() = phase,
        }
    }

    /// Run the startup downtime check and whatever sync it calls for, then
    /// refresh the heartbeat so the next boot measures downtime from now.
    pub async fn run_startup_check(&self) -> StartupOutcome {
        self.set_phase(ManagerPhase::CheckingStartup);
        let outcome = self.startup_sync().await;

        if let Err(err) = self.write_heartbeat().await {
            warn!(error = %err, "failed to write startup heartbeat");
        }
        self.set_phase(ManagerPhase::Idle);
        info!(outcome = ?outcome, "startup check complete");
        outcome
    }

    async fn startup_sync(&self) -> StartupOutcome {
        let last_online = retry_with_backoff(RetryPolicy::default(), "last_online", || {
            self.store.last_online()
        })
        .await;
        let now = OffsetDateTime::now_utc();

        match last_online {
            Err(err) => {
                warn!(error = %err, "could not read last-online marker, falling back to full sync");
                self.fallback_full_sync(None).await
            }
            Ok(None) => {
                info!("no prior heartbeat found, running first-start full sync");
                match self.full_sync(None).await {
                    Ok(summary) => StartupOutcome::FirstRunFullSync(summary),
                    Err(err) => {
                        warn!(error = %err, "first-start full sync failed");
                        StartupOutcome::Failed
                    }
                }
            }
            Ok(Some(last_online)) => {
                let offline = now - last_online;
                if offline.whole_seconds() < self.config.downtime_threshold.as_secs() as i64 {
                    info!(
                        offline_secs = offline.whole_seconds(),
                        "downtime below threshold, skipping startup sync"
                    );
                    return StartupOutcome::SkippedShortDowntime;
                }

                let window = DowntimeWindow {
                    start: last_online,
                    end: now,
                };
                info!(
                    offline_secs = offline.whole_seconds(),
                    "downtime exceeds threshold, running targeted sync"
                );
                match self.targeted_sync(window).await {
                    Ok((matches, summary)) => StartupOutcome::TargetedSync { matches, summary },
                    Err(err) => {
                        warn!(error = %err, "targeted sync failed, falling back to full sync");
                        self.fallback_full_sync(Some(window)).await
                    }
                }
            }
        }
    }

    /// Sync only matches whose RSVPs plausibly changed during the outage.
    async fn targeted_sync(
        &self,
        window: DowntimeWindow,
    ) -> StoreResult<(usize, PassSummary)> {
        let match_ids =
            retry_with_backoff(RetryPolicy::default(), "matches_with_activity_since", || {
                self.store
                    .matches_with_activity_since(window.start, self.config.activity_limit_days)
            })
            .await?;
        if match_ids.is_empty() {
            info!("no rsvp activity during the outage, nothing to sync");
            return Ok((0, PassSummary::default()));
        }

        let messages = retry_with_backoff(RetryPolicy::default(), "scheduled_messages", || {
            self.store.scheduled_messages(self.config.full_sync_window_days)
        })
        .await?;

        let wanted: HashSet<MatchId> = match_ids.into_iter().collect();
        let now = OffsetDateTime::now_utc();
        let targeted: Vec<ManagedMessage> = messages
            .into_iter()
            .filter(|message| {
                wanted.contains(&message.match_id)
                    && message.is_active(now, self.config.active_window_days)
            })
            .collect();

        let tasks = tasks_from_messages(targeted, SyncPriority::StartupTargeted);
        let matches = tasks.len();
        info!(matches, "starting targeted startup sync");

        self.set_phase(ManagerPhase::Syncing);
        let engine = self.engine(Some(window));
        let summary = run_sync_pass(
            engine,
            self.governor.clone(),
            self.config.governor_acquire_timeout,
            tasks,
            false,
        )
        .await;
        Ok((matches, summary))
    }

    async fn full_sync(&self, window: Option<DowntimeWindow>) -> StoreResult<PassSummary> {
        self.set_phase(ManagerPhase::Syncing);
        let engine = self.engine(window);
        full_reconcile_pass(
            &self.store,
            &engine,
            &self.governor,
            &self.config,
            SyncPriority::StartupTargeted,
        )
        .await
    }

    async fn fallback_full_sync(&self, window: Option<DowntimeWindow>) -> StartupOutcome {
        match self.full_sync(window).await {
            Ok(summary) => StartupOutcome::FallbackFullSync(summary),
            Err(err) => {
                warn!(error = %err, "fallback full sync failed");
                StartupOutcome::Failed
            }
        }
    }

    fn engine(&self, window: Option<DowntimeWindow>) -> Arc<ReconcileEngine> {
        let mut engine =
            ReconcileEngine::new(self.platform.clone(), self.store.clone(), self.self_user_id);
        if let Some(window) = window {
            engine = engine.with_downtime_window(window);
        }
        Arc::new(engine)
    }

    async fn write_heartbeat(&self) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        self.store
            .write_heartbeat(HeartbeatRecord {
                instance_id: self.instance_id.clone(),
                instance_type: INSTANCE_TYPE.to_string(),
                last_online: now,
                last_updated: now,
            })
            .await
    }

    /// Keep the heartbeat fresh until shutdown. A failed write retries on the
    /// shortened interval instead of waiting out a full period.
    pub async fn run_heartbeat_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next_in = match self.write_heartbeat().await {
                Ok(()) => self.config.heartbeat_interval,
                Err(err) => {
                    warn!(error = %err, "heartbeat write failed, retrying on short interval");
                    self.config.heartbeat_retry_interval
                }
            };

            if interruptible_sleep(next_in, self.config.shutdown_poll_interval, &mut shutdown)
                .await
            {
                info!("heartbeat loop stopping");
                return;
            }
        }
    }

    /// Identifier written with every heartbeat, unique per process start.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Convenience for tests and diagnostics.
impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("instance_id", &self.instance_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
