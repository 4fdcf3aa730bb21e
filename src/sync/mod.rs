//! RSVP reconciliation core: engine, conflict resolver, sync drivers, and the
//! concurrency governor that gates them.

pub mod conflict;
pub mod governor;
pub mod manager;
pub mod reconcile;
pub mod retry;
pub mod scheduler;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::{sync::watch, time::sleep};
use tracing::{info, warn};

use crate::{
    config::SyncConfig,
    model::{ManagedMessage, MatchSyncResult, PassSummary, SyncPriority, SyncTask},
    store::{RsvpStore, StoreResult},
};

use governor::ConcurrencyGovernor;
use reconcile::ReconcileEngine;
use retry::{RetryPolicy, retry_with_backoff};

/// Group managed messages into one [`SyncTask`] per match, in match order.
pub fn tasks_from_messages(
    messages: impl IntoIterator<Item = ManagedMessage>,
    priority: SyncPriority,
) -> Vec<SyncTask> {
    let mut by_match: BTreeMap<i64, Vec<ManagedMessage>> = BTreeMap::new();
    for message in messages {
        by_match.entry(message.match_id).or_default().push(message);
    }

    by_match
        .into_iter()
        .map(|(match_id, messages)| SyncTask {
            match_id,
            messages,
            priority,
        })
        .collect()
}

/// Run one reconciliation pass over the given tasks.
///
/// Matches proceed concurrently up to the governor's limits; messages within
/// one match are reconciled sequentially so two corrections for the same
/// message never race. Per-match failures are recorded and never abort the
/// rest of the pass.
pub async fn run_sync_pass(
    engine: Arc<ReconcileEngine>,
    governor: Arc<ConcurrencyGovernor>,
    acquire_timeout: Duration,
    tasks: Vec<SyncTask>,
    force: bool,
) -> PassSummary {
    let total = tasks.len();
    let results = futures::future::join_all(tasks.into_iter().map(|task| {
        let engine = engine.clone();
        let governor = governor.clone();
        async move { run_sync_task(engine, governor, acquire_timeout, task, force).await }
    }))
    .await;

    let mut summary = PassSummary::default();
    for result in &results {
        summary.record(result);
    }
    info!(
        matches = total,
        synced = summary.synced,
        failed = summary.failed,
        skipped = summary.skipped,
        "reconciliation pass complete"
    );
    summary
}

async fn run_sync_task(
    engine: Arc<ReconcileEngine>,
    governor: Arc<ConcurrencyGovernor>,
    acquire_timeout: Duration,
    task: SyncTask,
    force: bool,
) -> MatchSyncResult {
    let permit = match tokio::time::timeout(acquire_timeout, governor.acquire(task.match_id)).await
    {
        Ok(permit) => permit,
        Err(_) => {
            warn!(
                match_id = task.match_id,
                "no governor slot within timeout, skipping match this pass"
            );
            return MatchSyncResult::Skipped {
                match_id: task.match_id,
            };
        }
    };

    let mut updated = false;
    let mut failure: Option<String> = None;
    for message in &task.messages {
        match engine.reconcile_message(message, force).await {
            Ok(outcome) => updated |= outcome.updated,
            Err(err) => {
                warn!(
                    match_id = task.match_id,
                    team_id = message.team_id,
                    message_id = message.message_id,
                    error = %err,
                    "message reconciliation failed, continuing with remaining messages"
                );
                failure = Some(err.to_string());
            }
        }
    }
    drop(permit);

    match failure {
        Some(reason) => MatchSyncResult::Failed {
            match_id: task.match_id,
            reason,
        },
        None => MatchSyncResult::Synced {
            match_id: task.match_id,
            updated,
        },
    }
}

/// Fetch every active managed message and reconcile all of them.
pub(crate) async fn full_reconcile_pass(
    store: &Arc<dyn RsvpStore>,
    engine: &Arc<ReconcileEngine>,
    governor: &Arc<ConcurrencyGovernor>,
    config: &SyncConfig,
    priority: SyncPriority,
) -> StoreResult<PassSummary> {
    let messages = retry_with_backoff(RetryPolicy::default(), "scheduled_messages", || {
        store.scheduled_messages(config.full_sync_window_days)
    })
    .await?;

    let now = time::OffsetDateTime::now_utc();
    let active: Vec<ManagedMessage> = messages
        .into_iter()
        .filter(|message| message.is_active(now, config.active_window_days))
        .collect();

    let tasks = tasks_from_messages(active, priority);
    Ok(run_sync_pass(
        engine.clone(),
        governor.clone(),
        config.governor_acquire_timeout,
        tasks,
        false,
    )
    .await)
}

/// Sleep for `total`, waking at most `chunk` after a shutdown signal.
///
/// Returns `true` when shutdown was observed (including a dropped sender).
pub(crate) async fn interruptible_sleep(
    total: Duration,
    chunk: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    let mut remaining = total;
    while !remaining.is_zero() {
        let step = remaining.min(chunk);
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
            _ = sleep(step) => {
                remaining = remaining.saturating_sub(step);
            }
        }
    }
    false
}
