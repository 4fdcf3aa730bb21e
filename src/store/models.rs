//! Wire representations of the store API payloads.
//!
//! These are the only types that see raw JSON; everything is normalized into
//! the domain model in one step so internal logic never branches on string
//! literals from the wire.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use crate::model::{ManagedMessage, RosterEntry, TeamRsvps, UserId};

use super::error::{StoreError, StoreResult};

/// `GET /get_match_rsvps/{match_id}` payload: players grouped by response.
#[derive(Debug, Default, Deserialize)]
pub struct MatchRsvpsDocument {
    #[serde(default)]
    pub(crate) yes: Vec<PlayerDocument>,
    #[serde(default)]
    pub(crate) no: Vec<PlayerDocument>,
    #[serde(default)]
    pub(crate) maybe: Vec<PlayerDocument>,
}

/// One player entry inside an RSVP bucket.
#[derive(Debug, Deserialize)]
pub struct PlayerDocument {
    pub(crate) player_id: i64,
    #[serde(default)]
    pub(crate) player_name: String,
    #[serde(default)]
    pub(crate) discord_id: Option<String>,
}

impl MatchRsvpsDocument {
    /// Normalize the wire buckets into the domain view. Entries with an
    /// unparseable chat-platform id keep their roster slot but drop the link.
    pub fn into_domain(self) -> TeamRsvps {
        TeamRsvps {
            yes: normalize_bucket(self.yes),
            no: normalize_bucket(self.no),
            maybe: normalize_bucket(self.maybe),
        }
    }
}

fn normalize_bucket(entries: Vec<PlayerDocument>) -> Vec<RosterEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let discord_id = match entry.discord_id.as_deref() {
                None | Some("") => None,
                Some(raw) => match raw.parse::<UserId>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!(
                            player_id = entry.player_id,
                            discord_id = raw,
                            "ignoring unparseable discord id in store payload"
                        );
                        None
                    }
                },
            };
            RosterEntry {
                player_id: entry.player_id,
                player_name: entry.player_name,
                discord_id,
            }
        })
        .collect()
}

/// `POST /update_availability_from_discord` body.
#[derive(Debug, Serialize)]
pub struct AvailabilityUpdateRequest {
    pub(crate) match_id: i64,
    pub(crate) discord_id: String,
    pub(crate) response: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) responded_at: OffsetDateTime,
}

/// `GET /discord_bot_last_online` payload.
#[derive(Debug, Deserialize)]
pub struct LastOnlineDocument {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub(crate) last_online: Option<OffsetDateTime>,
}

/// `POST /discord_bot_last_online` body.
#[derive(Debug, Serialize)]
pub struct HeartbeatRequest {
    pub(crate) instance_id: String,
    pub(crate) instance_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) last_online: OffsetDateTime,
}

/// `GET /matches_with_rsvp_activity_since` payload.
#[derive(Debug, Deserialize)]
pub struct ActivityDocument {
    #[serde(default)]
    pub(crate) matches: Vec<ActivityMatchDocument>,
}

/// One match entry in the activity payload.
#[derive(Debug, Deserialize)]
pub struct ActivityMatchDocument {
    pub(crate) match_id: i64,
}

/// `POST /is_user_on_team` body.
#[derive(Debug, Serialize)]
pub struct MembershipRequest {
    pub(crate) discord_id: String,
    pub(crate) team_id: i64,
}

/// `POST /is_user_on_team` payload.
#[derive(Debug, Deserialize)]
pub struct MembershipDocument {
    #[serde(default)]
    pub(crate) is_team_member: bool,
}

/// `GET /get_scheduled_messages` payload.
#[derive(Debug, Deserialize)]
pub struct ScheduledMessagesDocument {
    #[serde(default)]
    pub(crate) messages: Vec<ScheduledMessageDocument>,
}

/// One managed message entry as the store serializes it. Snowflakes travel as
/// strings to survive JSON number precision limits.
#[derive(Debug, Deserialize)]
pub struct ScheduledMessageDocument {
    pub(crate) message_id: String,
    pub(crate) channel_id: String,
    pub(crate) match_id: i64,
    pub(crate) team_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) posted_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) match_date: OffsetDateTime,
}

impl ScheduledMessageDocument {
    /// Normalize into a [`ManagedMessage`], rejecting unparseable snowflakes.
    pub fn into_domain(self, path: &str) -> StoreResult<ManagedMessage> {
        let message_id = self
            .message_id
            .parse()
            .map_err(|_| StoreError::Malformed {
                path: path.to_string(),
                detail: format!("invalid message id `{}`", self.message_id),
            })?;
        let channel_id = self
            .channel_id
            .parse()
            .map_err(|_| StoreError::Malformed {
                path: path.to_string(),
                detail: format!("invalid channel id `{}`", self.channel_id),
            })?;

        Ok(ManagedMessage {
            message_id,
            channel_id,
            match_id: self.match_id,
            team_id: self.team_id,
            posted_at: self.posted_at,
            match_date: self.match_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::model::RsvpResponse;

    use super::*;

    #[test]
    fn buckets_normalize_and_drop_bad_discord_ids() {
        let document: MatchRsvpsDocument = serde_json::from_value(serde_json::json!({
            "yes": [
                {"player_id": 1, "player_name": "Ada", "discord_id": "1001"},
                {"player_id": 2, "player_name": "Ben", "discord_id": "not-a-snowflake"},
            ],
            "no": [],
            "maybe": [
                {"player_id": 3, "player_name": "Cal", "discord_id": null},
            ],
        }))
        .unwrap();

        let rsvps = document.into_domain();
        assert_eq!(rsvps.yes.len(), 2);
        assert_eq!(rsvps.yes[0].discord_id, Some(1001));
        assert_eq!(rsvps.yes[1].discord_id, None);

        let by_user = rsvps.response_by_user();
        assert_eq!(by_user.get(&1001), Some(&RsvpResponse::Yes));
        assert_eq!(by_user.len(), 1);
    }

    #[test]
    fn scheduled_message_parses_snowflake_strings() {
        let document: ScheduledMessageDocument = serde_json::from_value(serde_json::json!({
            "message_id": "111222333444555666",
            "channel_id": "999888777666555444",
            "match_id": 101,
            "team_id": 7,
            "posted_at": "2025-03-01T12:00:00Z",
            "match_date": "2025-03-08T19:00:00Z",
        }))
        .unwrap();

        let message = document.into_domain("get_scheduled_messages").unwrap();
        assert_eq!(message.message_id, 111222333444555666);
        assert_eq!(message.match_id, 101);
    }

    #[test]
    fn scheduled_message_rejects_bad_snowflakes() {
        let document = ScheduledMessageDocument {
            message_id: "oops".into(),
            channel_id: "1".into(),
            match_id: 1,
            team_id: 1,
            posted_at: OffsetDateTime::UNIX_EPOCH,
            match_date: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(matches!(
            document.into_domain("get_scheduled_messages"),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_last_online_deserializes_to_none() {
        let document: LastOnlineDocument = serde_json::from_str("{}").unwrap();
        assert!(document.last_online.is_none());
    }
}
