//! Source-of-truth store capability.
//!
//! The relational store behind the league web application exclusively owns
//! the durable RSVP value; everything here is a thin, typed client over its
//! JSON API. The reconciliation engine treats chat-platform reactions as a
//! cache aligned to this store, never the reverse.

pub mod error;
mod http;
pub mod models;

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::model::{HeartbeatRecord, ManagedMessage, MatchId, RsvpResponse, TeamId, TeamRsvps, UserId};

pub use error::{StoreError, StoreResult};
pub use http::{HttpRsvpStore, StoreConfig};

/// Abstraction over the league store operations the sync engine needs.
///
/// Team membership rides along in the same trait because the store is the one
/// system that knows rosters; splitting it would only duplicate wiring.
pub trait RsvpStore: Send + Sync {
    /// Read every RSVP for one `(match, team)`, grouped by response.
    fn match_rsvps(
        &self,
        match_id: MatchId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StoreResult<TeamRsvps>>;

    /// Record a response observed on the chat platform as the player's vote.
    fn record_response(
        &self,
        match_id: MatchId,
        user_id: UserId,
        response: RsvpResponse,
        responded_at: OffsetDateTime,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Read the persisted last-online timestamp for this worker slot.
    fn last_online(&self) -> BoxFuture<'static, StoreResult<Option<OffsetDateTime>>>;

    /// Overwrite the heartbeat record for this worker slot.
    fn write_heartbeat(&self, record: HeartbeatRecord) -> BoxFuture<'static, StoreResult<()>>;

    /// Matches that had RSVP activity since `since`, bounded to matches within
    /// `limit_days` of today.
    fn matches_with_activity_since(
        &self,
        since: OffsetDateTime,
        limit_days: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<MatchId>>>;

    /// Whether the chat-platform user is on the team's current roster.
    fn is_user_on_team(
        &self,
        user_id: UserId,
        team_id: TeamId,
    ) -> BoxFuture<'static, StoreResult<bool>>;

    /// Every managed message whose match date falls within the active window.
    fn scheduled_messages(
        &self,
        window_days: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<ManagedMessage>>>;
}
