//! Domain types shared by the reconciliation engine, conflict resolver, and sync manager.

use std::collections::HashMap;

use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of a match in the league store.
pub type MatchId = i64;
/// Identifier of a team in the league store.
pub type TeamId = i64;
/// Chat-platform channel identifier (snowflake).
pub type ChannelId = u64;
/// Chat-platform message identifier (snowflake).
pub type MessageId = u64;
/// Chat-platform user identifier (snowflake).
pub type UserId = u64;

/// A player's answer to an availability poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RsvpResponse {
    /// Player is attending.
    Yes,
    /// Player is not attending.
    No,
    /// Player is undecided.
    Maybe,
    /// Player has not answered (absence of a vote, never an explicit choice).
    NoResponse,
}

impl RsvpResponse {
    /// Reaction emoji representing this response, if it has one.
    pub fn emoji(self) -> Option<&'static str> {
        match self {
            RsvpResponse::Yes => Some("👍"),
            RsvpResponse::No => Some("👎"),
            RsvpResponse::Maybe => Some("🤷"),
            RsvpResponse::NoResponse => None,
        }
    }

    /// Map a reaction emoji back to a response. Unrecognized emoji yield `None`
    /// and are stripped from managed messages without further processing.
    pub fn from_emoji(emoji: &str) -> Option<Self> {
        match emoji {
            "👍" => Some(RsvpResponse::Yes),
            "👎" => Some(RsvpResponse::No),
            "🤷" => Some(RsvpResponse::Maybe),
            _ => None,
        }
    }

    /// Wire representation used by the store API.
    pub fn as_wire(self) -> &'static str {
        match self {
            RsvpResponse::Yes => "yes",
            RsvpResponse::No => "no",
            RsvpResponse::Maybe => "maybe",
            RsvpResponse::NoResponse => "no_response",
        }
    }

    /// Parse the store API wire representation.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "yes" => Some(RsvpResponse::Yes),
            "no" => Some(RsvpResponse::No),
            "maybe" => Some(RsvpResponse::Maybe),
            "no_response" => Some(RsvpResponse::NoResponse),
            _ => None,
        }
    }

    /// Whether this is an explicit vote rather than the absence of one.
    pub fn is_explicit(self) -> bool {
        !matches!(self, RsvpResponse::NoResponse)
    }

    /// The three voting emoji the bot keeps present on every managed message.
    pub const BASE_EMOJI: [&'static str; 3] = ["👍", "👎", "🤷"];
}

/// Where an RSVP observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsvpSource {
    /// Reaction state read from the chat platform.
    ChatPlatform,
    /// Durable record in the relational store (source of truth).
    Store,
    /// Cached state reported by the mobile/web client.
    MobileCache,
}

impl RsvpSource {
    /// Precedence rank used by the conflict resolver; higher wins.
    pub fn authority(self) -> u8 {
        match self {
            RsvpSource::Store => 3,
            RsvpSource::ChatPlatform => 2,
            RsvpSource::MobileCache => 1,
        }
    }
}

/// One posted availability poll the sync engine is responsible for.
///
/// At most one exists per `(match_id, team_id)`; entries are never mutated
/// after posting and simply age out of the active window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedMessage {
    /// Chat-platform message identifier.
    pub message_id: MessageId,
    /// Channel the message was posted in.
    pub channel_id: ChannelId,
    /// Match this poll collects RSVPs for.
    pub match_id: MatchId,
    /// Team whose roster this poll addresses.
    pub team_id: TeamId,
    /// When the poll was posted.
    pub posted_at: OffsetDateTime,
    /// Scheduled match date, used for staleness filtering.
    pub match_date: OffsetDateTime,
}

impl ManagedMessage {
    /// Whether the message still falls inside the trailing active window.
    ///
    /// Stale entries are skipped by periodic sync but never deleted.
    pub fn is_active(&self, now: OffsetDateTime, window_days: i64) -> bool {
        (now - self.match_date).whole_days() <= window_days
    }
}

/// One player in a store RSVP bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Store-side player identifier.
    pub player_id: i64,
    /// Display name used in the summary content.
    pub player_name: String,
    /// Linked chat-platform account, if the player has one.
    pub discord_id: Option<UserId>,
}

/// Normalized store view of one team's RSVPs for a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamRsvps {
    /// Players who answered yes.
    pub yes: Vec<RosterEntry>,
    /// Players who answered no.
    pub no: Vec<RosterEntry>,
    /// Players who answered maybe.
    pub maybe: Vec<RosterEntry>,
}

impl TeamRsvps {
    /// The bucket holding the given explicit response.
    pub fn bucket(&self, response: RsvpResponse) -> &[RosterEntry] {
        match response {
            RsvpResponse::Yes => &self.yes,
            RsvpResponse::No => &self.no,
            RsvpResponse::Maybe => &self.maybe,
            RsvpResponse::NoResponse => &[],
        }
    }

    /// Flatten the buckets into a per-user response map, restricted to
    /// players with a linked chat-platform account.
    pub fn response_by_user(&self) -> HashMap<UserId, RsvpResponse> {
        let mut map = HashMap::new();
        for (response, entries) in [
            (RsvpResponse::Yes, &self.yes),
            (RsvpResponse::No, &self.no),
            (RsvpResponse::Maybe, &self.maybe),
        ] {
            for entry in entries {
                if let Some(discord_id) = entry.discord_id {
                    map.insert(discord_id, response);
                }
            }
        }
        map
    }
}

/// A single source's view of one user's response to one match.
///
/// Constructed fresh on every reconciliation pass and never persisted; only
/// the resolved outcome is written back to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsvpObservation {
    /// Which system reported this value.
    pub source: RsvpSource,
    /// Match the observation refers to.
    pub match_id: MatchId,
    /// User the observation refers to.
    pub user_id: UserId,
    /// The reported response.
    pub response: RsvpResponse,
    /// When the value was (approximately) recorded. Reaction timestamps are
    /// approximate because the chat platform does not expose edit times.
    pub observed_at: OffsetDateTime,
}

/// Interval during which the worker was offline and external state may have
/// drifted unobserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DowntimeWindow {
    /// Last confirmed heartbeat before the outage.
    pub start: OffsetDateTime,
    /// Startup time when observation resumed.
    pub end: OffsetDateTime,
}

/// Outcome of resolving competing observations for one `(match, user)` pair.
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    /// Match under resolution.
    pub match_id: MatchId,
    /// User under resolution.
    pub user_id: UserId,
    /// Exactly the set of sources that had non-null data.
    pub conflicting_states: Vec<RsvpObservation>,
    /// Winning source; always a member of `conflicting_states`.
    pub chosen_source: RsvpSource,
    /// Winning response value.
    pub resolved_response: RsvpResponse,
    /// Downtime window the resolution was weighted against, if known.
    pub downtime_window: Option<DowntimeWindow>,
    /// Diagnostics correlation id.
    pub trace_id: Uuid,
}

impl ConflictResolution {
    /// True when more than one source reported data and the values disagreed.
    /// Single-source resolutions are trivial and must not be logged as
    /// conflict events.
    pub fn is_conflict(&self) -> bool {
        self.conflicting_states.len() > 1
            && self
                .conflicting_states
                .iter()
                .any(|state| state.response != self.resolved_response)
    }
}

/// Persisted liveness marker for one worker instance slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// Unique per process start, derived from the boot timestamp.
    pub instance_id: String,
    /// Logical slot this record occupies.
    pub instance_type: String,
    /// Timestamp refreshed on every heartbeat interval.
    pub last_online: OffsetDateTime,
    /// When the record itself was written.
    pub last_updated: OffsetDateTime,
}

/// Relative urgency of a sync task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPriority {
    /// Created by the startup downtime check for a match that plausibly
    /// changed while the worker was offline.
    StartupTargeted,
    /// Created by the periodic consistency backstop.
    PeriodicBackstop,
}

/// Unit of work: reconcile every managed message of one match.
///
/// Discarded after completion; failures are logged and picked up again by the
/// next periodic pass rather than retried within the same pass.
#[derive(Debug, Clone)]
pub struct SyncTask {
    /// Match to reconcile.
    pub match_id: MatchId,
    /// Managed messages belonging to the match (home/away polls).
    pub messages: Vec<ManagedMessage>,
    /// Why the task was created.
    pub priority: SyncPriority,
}

impl SyncTask {
    /// Teams addressed by this task's messages.
    pub fn team_ids(&self) -> Vec<TeamId> {
        self.messages.iter().map(|message| message.team_id).collect()
    }

    /// Channels the task's messages live in.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.messages
            .iter()
            .map(|message| message.channel_id)
            .collect()
    }
}

/// What a single `reconcile_message` call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Whether any corrective action or summary refresh was applied.
    pub updated: bool,
    /// Number of corrective actions that succeeded.
    pub corrections_applied: usize,
    /// Number of corrective actions that failed and were skipped.
    pub corrections_failed: usize,
}

/// Aggregate result of one reconciliation pass over many matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Matches reconciled successfully.
    pub synced: usize,
    /// Matches that failed reconciliation this pass.
    pub failed: usize,
    /// Matches skipped because a governor slot never became available.
    pub skipped: usize,
}

impl PassSummary {
    /// Fold one match-level result into the summary.
    pub fn record(&mut self, result: &MatchSyncResult) {
        match result {
            MatchSyncResult::Synced { .. } => self.synced += 1,
            MatchSyncResult::Failed { .. } => self.failed += 1,
            MatchSyncResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Per-match outcome reported by the pass drivers.
#[derive(Debug, Clone)]
pub enum MatchSyncResult {
    /// All of the match's messages reconciled.
    Synced {
        /// Match that was reconciled.
        match_id: MatchId,
        /// Whether any message actually changed.
        updated: bool,
    },
    /// At least one message failed reconciliation.
    Failed {
        /// Match that failed.
        match_id: MatchId,
        /// Human-readable failure description.
        reason: String,
    },
    /// The governor slot wait timed out; retried on the next pass.
    Skipped {
        /// Match that was skipped.
        match_id: MatchId,
    },
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn emoji_round_trip_for_explicit_responses() {
        for response in [RsvpResponse::Yes, RsvpResponse::No, RsvpResponse::Maybe] {
            let emoji = response.emoji().unwrap();
            assert_eq!(RsvpResponse::from_emoji(emoji), Some(response));
        }
        assert_eq!(RsvpResponse::NoResponse.emoji(), None);
        assert_eq!(RsvpResponse::from_emoji("🎉"), None);
    }

    #[test]
    fn wire_names_match_store_api() {
        assert_eq!(RsvpResponse::from_wire("yes"), Some(RsvpResponse::Yes));
        assert_eq!(RsvpResponse::from_wire("attending"), None);
        assert_eq!(RsvpResponse::Maybe.as_wire(), "maybe");
        assert_eq!(RsvpResponse::NoResponse.as_wire(), "no_response");
    }

    #[test]
    fn store_outranks_platform_outranks_mobile() {
        assert!(RsvpSource::Store.authority() > RsvpSource::ChatPlatform.authority());
        assert!(RsvpSource::ChatPlatform.authority() > RsvpSource::MobileCache.authority());
    }

    #[test]
    fn message_active_window_is_trailing() {
        let message = ManagedMessage {
            message_id: 1,
            channel_id: 2,
            match_id: 3,
            team_id: 4,
            posted_at: datetime!(2025-03-01 12:00 UTC),
            match_date: datetime!(2025-03-08 19:00 UTC),
        };

        assert!(message.is_active(datetime!(2025-03-10 12:00 UTC), 14));
        assert!(!message.is_active(datetime!(2025-03-30 12:00 UTC), 14));
        // Future matches are always inside the trailing window.
        assert!(message.is_active(datetime!(2025-03-01 12:00 UTC), 14));
    }

    #[test]
    fn single_source_resolution_is_not_a_conflict() {
        let observation = RsvpObservation {
            source: RsvpSource::Store,
            match_id: 3,
            user_id: 42,
            response: RsvpResponse::Yes,
            observed_at: datetime!(2025-03-01 12:00 UTC),
        };
        let resolution = ConflictResolution {
            match_id: 3,
            user_id: 42,
            conflicting_states: vec![observation],
            chosen_source: RsvpSource::Store,
            resolved_response: RsvpResponse::Yes,
            downtime_window: None,
            trace_id: Uuid::new_v4(),
        };
        assert!(!resolution.is_conflict());
    }
}
