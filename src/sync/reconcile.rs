//! Reconciliation engine keeping chat-platform reactions aligned to the store.
//!
//! The store exclusively owns the durable RSVP value; reactions are a cache
//! the engine corrects toward it. The single exception is a reaction with no
//! store record at all, which is treated as a new vote and written back.
//! Removal of a reaction is informational only and never erases a previously
//! recorded vote: a user may be mid-swap between options, and erasure is the
//! job of explicit removal events debounced outside this engine.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    model::{
        DowntimeWindow, ManagedMessage, ReconcileOutcome, RsvpObservation, RsvpResponse,
        RsvpSource, TeamRsvps, UserId,
    },
    platform::{ChatPlatform, MessageRef, PlatformError},
    store::{RsvpStore, StoreError},
};

use super::{
    conflict::resolve_rsvp_conflict,
    retry::{RetryPolicy, retry_with_backoff},
};

/// Failures that abort reconciliation of a single message.
///
/// These never propagate past the task driving the message's match; other
/// matches in the same pass continue unaffected.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A chat-platform call failed terminally or exhausted its retries.
    #[error("chat platform failure")]
    Platform(#[from] PlatformError),
    /// A store call failed terminally or exhausted its retries.
    #[error("store failure")]
    Store(#[from] StoreError),
}

/// Corrective action computed by the diff step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    /// Make sure a voting emoji is present on the message (added as the
    /// worker itself; the platform cannot add reactions on a user's behalf).
    EnsureEmoji {
        /// Emoji to ensure.
        emoji: &'static str,
    },
    /// Remove one user's reaction with the given emoji.
    RemoveReaction {
        /// User whose reaction is removed.
        user_id: UserId,
        /// Emoji to remove.
        emoji: &'static str,
    },
    /// Record a new vote in the store.
    WriteStore {
        /// User whose vote is recorded.
        user_id: UserId,
        /// Response to record.
        response: RsvpResponse,
    },
}

/// Engine reconciling one managed message at a time.
pub struct ReconcileEngine {
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn RsvpStore>,
    /// The worker's own account; its reactions are the voting buttons and are
    /// never interpreted as votes or stripped.
    self_user_id: UserId,
    /// Outage interval competing claims are weighted against, when the engine
    /// runs as part of a startup recovery pass.
    downtime: Option<DowntimeWindow>,
    retry: RetryPolicy,
}

impl ReconcileEngine {
    /// Create an engine over the given capability handles.
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn RsvpStore>,
        self_user_id: UserId,
    ) -> Self {
        Self {
            platform,
            store,
            self_user_id,
            downtime: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy applied to every external call.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach the outage interval so competing claims are resolved against it.
    pub fn with_downtime_window(mut self, window: DowntimeWindow) -> Self {
        self.downtime = Some(window);
        self
    }

    /// Bring one message's reaction state and the store into agreement.
    ///
    /// Returns whether anything changed. With `force`, the summary content is
    /// refreshed even when no corrective action was needed.
    pub async fn reconcile_message(
        &self,
        message: &ManagedMessage,
        force: bool,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let reference = MessageRef {
            channel_id: message.channel_id,
            message_id: message.message_id,
        };

        let fetched = retry_with_backoff(self.retry, "fetch_message", || {
            self.platform.fetch_message(reference)
        })
        .await?;
        let reactions = retry_with_backoff(self.retry, "get_reactions", || {
            self.platform.get_reactions(reference)
        })
        .await?;
        let rsvps = retry_with_backoff(self.retry, "match_rsvps", || {
            self.store.match_rsvps(message.match_id, message.team_id)
        })
        .await?;
        let store_votes = rsvps.response_by_user();

        let mut outcome = ReconcileOutcome::default();

        // Unrecognized reactions are removed outright and never fed into the
        // diff; recognized ones are bucketed per user.
        let mut platform_votes: BTreeMap<UserId, BTreeSet<RsvpResponse>> = BTreeMap::new();
        for (emoji, users) in &reactions {
            let Some(response) = RsvpResponse::from_emoji(emoji) else {
                for &user_id in users {
                    self.apply_removal(&mut outcome, reference, emoji, user_id)
                        .await;
                }
                continue;
            };
            for &user_id in users {
                if user_id == self.self_user_id {
                    continue;
                }
                platform_votes.entry(user_id).or_default().insert(response);
            }
        }

        // Strip reactions from users who are not on the team roster. Users
        // already present in the store view are members by construction, so
        // only platform-only users need the membership call.
        let mut members: BTreeMap<UserId, BTreeSet<RsvpResponse>> = BTreeMap::new();
        for (user_id, votes) in platform_votes {
            if store_votes.contains_key(&user_id) {
                members.insert(user_id, votes);
                continue;
            }
            match retry_with_backoff(self.retry, "is_user_on_team", || {
                self.store.is_user_on_team(user_id, message.team_id)
            })
            .await
            {
                Ok(true) => {
                    members.insert(user_id, votes);
                }
                Ok(false) => {
                    for response in votes {
                        if let Some(emoji) = response.emoji() {
                            self.apply_removal(&mut outcome, reference, emoji, user_id)
                                .await;
                        }
                    }
                }
                Err(err) => {
                    // Do not strip a possibly-valid vote on a failed lookup;
                    // the next pass retries the user.
                    warn!(
                        match_id = message.match_id,
                        user_id,
                        error = %err,
                        "membership check failed, skipping user this pass"
                    );
                }
            }
        }

        // Disagreements between a member's reaction and the store go through
        // the resolver so the winning value is chosen (and logged) in one
        // place. Reaction edit times are not exposed by the platform, so both
        // claims carry the observation time of this pass.
        let mut authoritative = store_votes.clone();
        let observed_at = OffsetDateTime::now_utc();
        for (&user_id, votes) in &members {
            let Some(&recorded) = store_votes.get(&user_id) else {
                continue;
            };
            let Some(claimed) = preferred_response(votes) else {
                continue;
            };
            if claimed == recorded {
                continue;
            }
            let observation = |source, response| RsvpObservation {
                source,
                match_id: message.match_id,
                user_id,
                response,
                observed_at,
            };
            if let Ok(resolution) = resolve_rsvp_conflict(
                Some(observation(RsvpSource::ChatPlatform, claimed)),
                Some(observation(RsvpSource::Store, recorded)),
                None,
                self.downtime,
                Uuid::new_v4(),
            ) {
                authoritative.insert(user_id, resolution.resolved_response);
            }
        }

        let corrections = plan_corrections(&fetched.reaction_emoji, &members, &authoritative);
        for correction in corrections {
            self.apply_correction(&mut outcome, message, reference, correction)
                .await;
        }

        if outcome.corrections_applied > 0 || force {
            self.refresh_summary(&mut outcome, message, reference).await;
        }

        debug!(
            match_id = message.match_id,
            team_id = message.team_id,
            applied = outcome.corrections_applied,
            failed = outcome.corrections_failed,
            updated = outcome.updated,
            "message reconciled"
        );
        Ok(outcome)
    }

    async fn apply_removal(
        &self,
        outcome: &mut ReconcileOutcome,
        reference: MessageRef,
        emoji: &str,
        user_id: UserId,
    ) {
        let result = retry_with_backoff(self.retry, "remove_reaction", || {
            self.platform
                .remove_reaction(reference, emoji.to_string(), user_id)
        })
        .await;
        record_action(outcome, "remove_reaction", result);
    }

    async fn apply_correction(
        &self,
        outcome: &mut ReconcileOutcome,
        message: &ManagedMessage,
        reference: MessageRef,
        correction: Correction,
    ) {
        match correction {
            Correction::EnsureEmoji { emoji } => {
                let result = retry_with_backoff(self.retry, "add_reaction", || {
                    self.platform.add_reaction(reference, emoji.to_string())
                })
                .await;
                record_action(outcome, "add_reaction", result);
            }
            Correction::RemoveReaction { user_id, emoji } => {
                self.apply_removal(outcome, reference, emoji, user_id).await;
            }
            Correction::WriteStore { user_id, response } => {
                let responded_at = OffsetDateTime::now_utc();
                let result = retry_with_backoff(self.retry, "record_response", || {
                    self.store
                        .record_response(message.match_id, user_id, response, responded_at)
                })
                .await;
                record_action(outcome, "record_response", result);
            }
        }
    }

    /// Regenerate the summary content from fresh authoritative store counts.
    async fn refresh_summary(
        &self,
        outcome: &mut ReconcileOutcome,
        message: &ManagedMessage,
        reference: MessageRef,
    ) {
        let rsvps = match retry_with_backoff(self.retry, "match_rsvps", || {
            self.store.match_rsvps(message.match_id, message.team_id)
        })
        .await
        {
            Ok(rsvps) => rsvps,
            Err(err) => {
                warn!(
                    match_id = message.match_id,
                    team_id = message.team_id,
                    error = %err,
                    "summary refresh skipped, store counts unavailable"
                );
                return;
            }
        };

        let content = render_summary(&rsvps);
        match retry_with_backoff(self.retry, "edit_message", || {
            self.platform.edit_message(reference, content.clone())
        })
        .await
        {
            Ok(()) => outcome.updated = true,
            Err(err) => warn!(
                match_id = message.match_id,
                error = %err,
                "failed to push refreshed summary"
            ),
        }
    }
}

fn record_action<E: std::fmt::Display>(
    outcome: &mut ReconcileOutcome,
    action: &str,
    result: Result<(), E>,
) {
    match result {
        Ok(()) => {
            outcome.corrections_applied += 1;
            outcome.updated = true;
        }
        Err(err) => {
            outcome.corrections_failed += 1;
            warn!(action, error = %err, "corrective action failed, continuing");
        }
    }
}

/// Highest-priority option among a user's recognized reactions, used when a
/// multi-reaction state has to collapse to one claim.
fn preferred_response(votes: &BTreeSet<RsvpResponse>) -> Option<RsvpResponse> {
    [RsvpResponse::Yes, RsvpResponse::No, RsvpResponse::Maybe]
        .into_iter()
        .find(|candidate| votes.contains(candidate))
}

/// Compute the minimal corrective actions for one message.
///
/// `present_emoji` is the raw emoji list on the message, `platform_votes` the
/// per-member recognized reactions, `store_votes` the authoritative store map.
pub(crate) fn plan_corrections(
    present_emoji: &[String],
    platform_votes: &BTreeMap<UserId, BTreeSet<RsvpResponse>>,
    store_votes: &HashMap<UserId, RsvpResponse>,
) -> Vec<Correction> {
    let mut corrections = Vec::new();

    // The three voting buttons always come first so a bare message becomes
    // usable before any per-user correction lands.
    for emoji in RsvpResponse::BASE_EMOJI {
        if !present_emoji.iter().any(|present| present == emoji) {
            corrections.push(Correction::EnsureEmoji { emoji });
        }
    }

    let mut user_ids: BTreeSet<UserId> = platform_votes.keys().copied().collect();
    user_ids.extend(store_votes.keys().copied());

    for user_id in user_ids {
        let platform = platform_votes.get(&user_id);
        let store = store_votes.get(&user_id).copied();

        match (platform, store) {
            // Store wins: strip reactions that contradict the recorded vote.
            // A missing matching reaction is not per-user correctable (the
            // platform only lets the worker react as itself), so display
            // convergence comes from the voting buttons plus the summary.
            (Some(votes), Some(recorded)) => {
                for vote in votes {
                    if *vote != recorded
                        && let Some(emoji) = vote.emoji()
                    {
                        corrections.push(Correction::RemoveReaction { user_id, emoji });
                    }
                }
            }
            // New vote observed on the platform: record it. Ambiguous
            // multi-reaction states keep the highest-priority option and shed
            // the rest so repeated passes converge.
            (Some(votes), None) => {
                let Some(winner) = preferred_response(votes) else {
                    continue;
                };
                corrections.push(Correction::WriteStore {
                    user_id,
                    response: winner,
                });
                for vote in votes {
                    if *vote != winner
                        && let Some(emoji) = vote.emoji()
                    {
                        corrections.push(Correction::RemoveReaction { user_id, emoji });
                    }
                }
            }
            // Store value with no reaction: informational only. Writing
            // NO_RESPONSE here would erase a real vote mid-swap.
            (None, Some(_)) | (None, None) => {}
        }
    }

    corrections
}

/// Render the plain-text summary pushed into the managed message.
pub(crate) fn render_summary(rsvps: &TeamRsvps) -> String {
    let mut lines = Vec::with_capacity(3);
    for (label, response) in [
        ("Yes", RsvpResponse::Yes),
        ("No", RsvpResponse::No),
        ("Maybe", RsvpResponse::Maybe),
    ] {
        let bucket = rsvps.bucket(response);
        let names = if bucket.is_empty() {
            "None".to_string()
        } else {
            bucket
                .iter()
                .map(|entry| entry.player_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let emoji = response.emoji().unwrap_or_default();
        lines.push(format!("{emoji} {label} ({}): {names}", bucket.len()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use crate::model::RosterEntry;

    use super::*;

    fn votes(entries: &[(UserId, &[RsvpResponse])]) -> BTreeMap<UserId, BTreeSet<RsvpResponse>> {
        entries
            .iter()
            .map(|(user_id, responses)| (*user_id, responses.iter().copied().collect()))
            .collect()
    }

    fn present_all() -> Vec<String> {
        RsvpResponse::BASE_EMOJI
            .iter()
            .map(|emoji| emoji.to_string())
            .collect()
    }

    #[test]
    fn agreement_produces_no_corrections() {
        let platform = votes(&[(1, &[RsvpResponse::Yes])]);
        let store = HashMap::from([(1, RsvpResponse::Yes)]);
        assert!(plan_corrections(&present_all(), &platform, &store).is_empty());
    }

    #[test]
    fn store_wins_over_a_conflicting_reaction() {
        let platform = votes(&[(1, &[RsvpResponse::No])]);
        let store = HashMap::from([(1, RsvpResponse::Yes)]);
        let corrections = plan_corrections(&present_all(), &platform, &store);
        assert_eq!(
            corrections,
            vec![Correction::RemoveReaction {
                user_id: 1,
                emoji: "👎"
            }]
        );
    }

    #[test]
    fn platform_only_vote_is_written_to_the_store() {
        let platform = votes(&[(1, &[RsvpResponse::Maybe])]);
        let store = HashMap::new();
        let corrections = plan_corrections(&present_all(), &platform, &store);
        assert_eq!(
            corrections,
            vec![Correction::WriteStore {
                user_id: 1,
                response: RsvpResponse::Maybe
            }]
        );
    }

    #[test]
    fn store_only_value_never_triggers_a_store_erasure() {
        let platform = BTreeMap::new();
        let store = HashMap::from([(1, RsvpResponse::Yes)]);
        let corrections = plan_corrections(&present_all(), &platform, &store);
        assert!(
            corrections
                .iter()
                .all(|correction| !matches!(correction, Correction::WriteStore { .. }))
        );
    }

    #[test]
    fn ambiguous_reactions_keep_the_highest_priority_option() {
        let platform = votes(&[(1, &[RsvpResponse::No, RsvpResponse::Maybe])]);
        let store = HashMap::new();
        let corrections = plan_corrections(&present_all(), &platform, &store);
        assert_eq!(
            corrections,
            vec![
                Correction::WriteStore {
                    user_id: 1,
                    response: RsvpResponse::No
                },
                Correction::RemoveReaction {
                    user_id: 1,
                    emoji: "🤷"
                },
            ]
        );
    }

    #[test]
    fn missing_voting_buttons_are_restored_first() {
        let corrections = plan_corrections(&["👍".to_string()], &BTreeMap::new(), &HashMap::new());
        assert_eq!(
            corrections,
            vec![
                Correction::EnsureEmoji { emoji: "👎" },
                Correction::EnsureEmoji { emoji: "🤷" },
            ]
        );
    }

    #[test]
    fn summary_lists_counts_and_names() {
        let rsvps = TeamRsvps {
            yes: vec![
                RosterEntry {
                    player_id: 1,
                    player_name: "Ada".into(),
                    discord_id: Some(1001),
                },
                RosterEntry {
                    player_id: 2,
                    player_name: "Ben".into(),
                    discord_id: None,
                },
            ],
            no: vec![],
            maybe: vec![RosterEntry {
                player_id: 3,
                player_name: "Cal".into(),
                discord_id: Some(1003),
            }],
        };

        let summary = render_summary(&rsvps);
        assert_eq!(summary, "👍 Yes (2): Ada, Ben\n👎 No (0): None\n🤷 Maybe (1): Cal");
    }
}
