//! Deterministic resolution of competing RSVP observations.
//!
//! Up to three systems can report a user's response for the same match:
//! chat-platform reactions, the durable store, and the mobile client cache.
//! The resolver applies a total precedence order so the same inputs always
//! pick the same winner, and distinguishes trivial single-source resolutions
//! from true conflicts so only the latter reach the logs.

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::model::{ConflictResolution, DowntimeWindow, RsvpObservation, RsvpSource};

/// Failure modes of conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The caller supplied no observation from any source.
    #[error("conflict resolution requires at least one observation")]
    NoObservations,
}

/// Resolve competing observations of one user's RSVP.
///
/// Precedence, in order:
/// 1. a single populated source wins trivially;
/// 2. a store write stamped after the downtime window ended wins
///    unconditionally, since it reflects an action taken once the system was
///    already back online;
/// 3. otherwise store > chat platform > mobile cache;
/// 4. an explicit vote is never overridden by an absence: if the winner holds
///    `NO_RESPONSE` while a lower-precedence source holds an explicit value,
///    the highest-precedence explicit value wins instead.
///
/// Identical timestamps fall through to rule 3, so the store also wins ties.
pub fn resolve_rsvp_conflict(
    chat_state: Option<RsvpObservation>,
    store_state: Option<RsvpObservation>,
    mobile_state: Option<RsvpObservation>,
    downtime_window: Option<DowntimeWindow>,
    trace_id: Uuid,
) -> Result<ConflictResolution, ResolveError> {
    let states: Vec<RsvpObservation> = [chat_state, store_state, mobile_state]
        .into_iter()
        .flatten()
        .collect();

    let first = states.first().ok_or(ResolveError::NoObservations)?;
    let (match_id, user_id) = (first.match_id, first.user_id);

    let winner = choose_winner(&states, downtime_window);

    let resolution = ConflictResolution {
        match_id,
        user_id,
        chosen_source: winner.source,
        resolved_response: winner.response,
        conflicting_states: states,
        downtime_window,
        trace_id,
    };

    if resolution.is_conflict() {
        warn!(
            match_id,
            user_id,
            %trace_id,
            chosen_source = ?resolution.chosen_source,
            resolved_response = resolution.resolved_response.as_wire(),
            sources = resolution.conflicting_states.len(),
            "resolved rsvp conflict"
        );
    }

    Ok(resolution)
}

fn choose_winner(
    states: &[RsvpObservation],
    downtime_window: Option<DowntimeWindow>,
) -> RsvpObservation {
    // Rule 2: a store write from after the outage reflects the freshest
    // authoritative action and is not subject to the hierarchy.
    if let Some(window) = downtime_window
        && let Some(store) = states
            .iter()
            .find(|state| state.source == RsvpSource::Store)
        && store.observed_at > window.end
    {
        return store.clone();
    }

    let by_authority = |candidates: &[&RsvpObservation]| -> RsvpObservation {
        candidates
            .iter()
            .max_by_key(|state| state.source.authority())
            .copied()
            .cloned()
            .expect("choose_winner is only called with at least one state")
    };

    let all: Vec<&RsvpObservation> = states.iter().collect();
    let chosen = by_authority(&all);

    // Rule 4: an explicit vote from a lesser source beats an absence.
    if !chosen.response.is_explicit() {
        let explicit: Vec<&RsvpObservation> = states
            .iter()
            .filter(|state| state.response.is_explicit())
            .collect();
        if !explicit.is_empty() {
            return by_authority(&explicit);
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use time::{Duration, macros::datetime};

    use crate::model::{MatchId, RsvpResponse, UserId};

    use super::*;

    const MATCH: MatchId = 101;
    const USER: UserId = 4242;

    fn observation(
        source: RsvpSource,
        response: RsvpResponse,
        observed_at: time::OffsetDateTime,
    ) -> RsvpObservation {
        RsvpObservation {
            source,
            match_id: MATCH,
            user_id: USER,
            response,
            observed_at,
        }
    }

    fn downtime() -> DowntimeWindow {
        DowntimeWindow {
            start: datetime!(2025-03-01 10:00 UTC),
            end: datetime!(2025-03-01 11:00 UTC),
        }
    }

    #[test]
    fn no_observations_is_an_error() {
        let result = resolve_rsvp_conflict(None, None, None, None, Uuid::new_v4());
        assert_eq!(result.unwrap_err(), ResolveError::NoObservations);
    }

    #[test]
    fn single_source_wins_trivially() {
        let window = downtime();
        for source in [
            RsvpSource::ChatPlatform,
            RsvpSource::Store,
            RsvpSource::MobileCache,
        ] {
            let state = observation(source, RsvpResponse::Maybe, window.start);
            let (chat, store, mobile) = match source {
                RsvpSource::ChatPlatform => (Some(state), None, None),
                RsvpSource::Store => (None, Some(state), None),
                RsvpSource::MobileCache => (None, None, Some(state)),
            };
            let resolution =
                resolve_rsvp_conflict(chat, store, mobile, Some(window), Uuid::new_v4()).unwrap();

            assert_eq!(resolution.chosen_source, source);
            assert_eq!(resolution.resolved_response, RsvpResponse::Maybe);
            assert_eq!(resolution.conflicting_states.len(), 1);
            assert!(!resolution.is_conflict());
        }
    }

    #[test]
    fn store_write_after_downtime_wins_unconditionally() {
        let window = downtime();
        let chat = observation(
            RsvpSource::ChatPlatform,
            RsvpResponse::No,
            window.start + Duration::minutes(30),
        );
        let store = observation(
            RsvpSource::Store,
            RsvpResponse::Yes,
            window.end + Duration::minutes(10),
        );

        let resolution =
            resolve_rsvp_conflict(Some(chat), Some(store), None, Some(window), Uuid::new_v4())
                .unwrap();

        assert_eq!(resolution.chosen_source, RsvpSource::Store);
        assert_eq!(resolution.resolved_response, RsvpResponse::Yes);
        assert!(resolution.is_conflict());
    }

    #[test]
    fn hierarchy_applies_when_everything_predates_recovery() {
        let window = downtime();
        let during = window.start + Duration::minutes(5);
        let chat = observation(RsvpSource::ChatPlatform, RsvpResponse::No, during);
        let store = observation(RsvpSource::Store, RsvpResponse::Yes, during);
        let mobile = observation(RsvpSource::MobileCache, RsvpResponse::Maybe, during);

        let resolution = resolve_rsvp_conflict(
            Some(chat.clone()),
            Some(store),
            Some(mobile.clone()),
            Some(window),
            Uuid::new_v4(),
        )
        .unwrap();
        assert_eq!(resolution.chosen_source, RsvpSource::Store);

        let resolution = resolve_rsvp_conflict(
            Some(chat),
            None,
            Some(mobile),
            Some(window),
            Uuid::new_v4(),
        )
        .unwrap();
        assert_eq!(resolution.chosen_source, RsvpSource::ChatPlatform);
        assert_eq!(resolution.resolved_response, RsvpResponse::No);
    }

    #[test]
    fn identical_timestamps_fall_back_to_the_store() {
        let window = downtime();
        let at = window.start + Duration::minutes(1);
        let chat = observation(RsvpSource::ChatPlatform, RsvpResponse::No, at);
        let store = observation(RsvpSource::Store, RsvpResponse::Yes, at);

        let resolution =
            resolve_rsvp_conflict(Some(chat), Some(store), None, Some(window), Uuid::new_v4())
                .unwrap();
        assert_eq!(resolution.chosen_source, RsvpSource::Store);
    }

    #[test]
    fn explicit_vote_beats_absence_from_a_higher_source() {
        let window = downtime();
        let at = window.start + Duration::minutes(1);
        let store = observation(RsvpSource::Store, RsvpResponse::NoResponse, at);
        let chat = observation(RsvpSource::ChatPlatform, RsvpResponse::Yes, at);
        let mobile = observation(RsvpSource::MobileCache, RsvpResponse::Maybe, at);

        let resolution = resolve_rsvp_conflict(
            Some(chat),
            Some(store),
            Some(mobile),
            Some(window),
            Uuid::new_v4(),
        )
        .unwrap();

        assert_eq!(resolution.chosen_source, RsvpSource::ChatPlatform);
        assert_eq!(resolution.resolved_response, RsvpResponse::Yes);
    }

    #[test]
    fn conflicting_states_lists_exactly_the_populated_sources() {
        let window = downtime();
        let at = window.start;
        let store = observation(RsvpSource::Store, RsvpResponse::Yes, at);
        let mobile = observation(RsvpSource::MobileCache, RsvpResponse::Yes, at);

        let resolution = resolve_rsvp_conflict(
            None,
            Some(store),
            Some(mobile),
            Some(window),
            Uuid::new_v4(),
        )
        .unwrap();

        let sources: Vec<RsvpSource> = resolution
            .conflicting_states
            .iter()
            .map(|state| state.source)
            .collect();
        assert_eq!(sources, vec![RsvpSource::Store, RsvpSource::MobileCache]);
        // Sources agree, so this is not a conflict even with two inputs.
        assert!(!resolution.is_conflict());
    }
}
