//! Two-level bounded-parallelism scheduler gating reconciliation work.
//!
//! A global semaphore caps aggregate load against the chat platform while
//! lazily created per-match semaphores stop two passes over the same match
//! from racing and double-correcting. Per-match entries are reference-counted
//! and evicted as soon as no task references the match, so the map stays
//! bounded over the lifetime of a long-running worker.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::model::MatchId;

/// Bounded-parallelism scheduler shared by every sync driver in the process.
pub struct ConcurrencyGovernor {
    global: Arc<Semaphore>,
    matches: Arc<DashMap<MatchId, MatchSlot>>,
    per_match_limit: usize,
}

struct MatchSlot {
    semaphore: Arc<Semaphore>,
    refs: usize,
}

impl ConcurrencyGovernor {
    /// Create a governor with the given per-match and global limits.
    pub fn new(per_match_limit: usize, global_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            matches: Arc::new(DashMap::new()),
            per_match_limit: per_match_limit.max(1),
        }
    }

    /// Wait for a slot for the given match. Never fails, only blocks; callers
    /// that cannot wait indefinitely wrap this in a timeout and report the
    /// match as skipped.
    pub async fn acquire(&self, match_id: MatchId) -> SyncPermit {
        let guard = MatchRef::register(self.matches.clone(), match_id, self.per_match_limit);
        let match_semaphore = guard.semaphore.clone();

        // Per-match first so same-match waiters do not pin global slots.
        let match_permit = match_semaphore
            .acquire_owned()
            .await
            .expect("governor semaphores are never closed");
        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("governor semaphores are never closed");

        SyncPermit {
            _match_permit: match_permit,
            _global_permit: global_permit,
            _guard: guard,
        }
    }

    /// Number of matches currently holding a per-match entry.
    pub fn tracked_matches(&self) -> usize {
        self.matches.len()
    }
}

/// Scoped permit; dropping it releases both levels and lets the next waiter
/// for the match (and the global pool) proceed.
pub struct SyncPermit {
    _match_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
    _guard: MatchRef,
}

/// Reference on a per-match slot. Registration creates the slot lazily; the
/// last dropped reference evicts it.
struct MatchRef {
    matches: Arc<DashMap<MatchId, MatchSlot>>,
    match_id: MatchId,
    semaphore: Arc<Semaphore>,
}

impl MatchRef {
    fn register(
        matches: Arc<DashMap<MatchId, MatchSlot>>,
        match_id: MatchId,
        per_match_limit: usize,
    ) -> Self {
        let semaphore = {
            let mut slot = matches.entry(match_id).or_insert_with(|| MatchSlot {
                semaphore: Arc::new(Semaphore::new(per_match_limit)),
                refs: 0,
            });
            slot.refs += 1;
            slot.semaphore.clone()
        };

        Self {
            matches,
            match_id,
            semaphore,
        }
    }
}

impl Drop for MatchRef {
    fn drop(&mut self) {
        self.matches
            .remove_if_mut(&self.match_id, |_, slot| {
                slot.refs -= 1;
                slot.refs == 0
            });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::time::sleep;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn global_limit_bounds_in_flight_work() {
        let governor = Arc::new(ConcurrencyGovernor::new(2, 3));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for match_id in 0..10 {
            let governor = governor.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire(match_id).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn per_match_limit_serializes_same_match() {
        let governor = Arc::new(ConcurrencyGovernor::new(1, 8));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let governor = governor.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire(101).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_match_entries_are_evicted_when_unreferenced() {
        let governor = ConcurrencyGovernor::new(2, 3);
        assert_eq!(governor.tracked_matches(), 0);

        let first = governor.acquire(7).await;
        let second = governor.acquire(8).await;
        assert_eq!(governor.tracked_matches(), 2);

        drop(first);
        assert_eq!(governor.tracked_matches(), 1);
        drop(second);
        assert_eq!(governor.tracked_matches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_releases_its_reference() {
        let governor = Arc::new(ConcurrencyGovernor::new(1, 1));
        let held = governor.acquire(5).await;

        let waiter = governor.clone();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), waiter.acquire(5)).await;
        assert!(abandoned.is_err());

        drop(held);
        assert_eq!(governor.tracked_matches(), 0);
    }
}
