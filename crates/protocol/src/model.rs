//! Domain types shared by requests, responses and pushes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::lenient;

// ── Game sessions ────────────────────────────────────────────────────

/// A single key/value game property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameProperty {
    pub key: String,
    pub value: String,
}

/// A game session as seen by the server process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameSession {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub fleet_id: String,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i32",
        deserialize_with = "lenient::positive_i32"
    )]
    pub maximum_player_session_count: Option<i32>,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i32",
        deserialize_with = "lenient::positive_i32"
    )]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub matchmaker_data: String,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub game_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub dns_name: String,
}

impl GameSession {
    pub fn properties(&self) -> Vec<GameProperty> {
        self.game_properties
            .iter()
            .map(|(key, value)| GameProperty {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// Why the control plane sent an `UpdateGameSession` push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateReason {
    MatchmakingDataUpdated,
    BackfillFailed,
    BackfillTimedOut,
    BackfillCancelled,
    #[default]
    Unknown,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchmakingDataUpdated => "MATCHMAKING_DATA_UPDATED",
            Self::BackfillFailed => "BACKFILL_FAILED",
            Self::BackfillTimedOut => "BACKFILL_TIMED_OUT",
            Self::BackfillCancelled => "BACKFILL_CANCELLED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "MATCHMAKING_DATA_UPDATED" => Self::MatchmakingDataUpdated,
            "BACKFILL_FAILED" => Self::BackfillFailed,
            "BACKFILL_TIMED_OUT" => Self::BackfillTimedOut,
            "BACKFILL_CANCELLED" => Self::BackfillCancelled,
            _ => Self::Unknown,
        }
    }
}

impl Serialize for UpdateReason {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UpdateReason {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Self::from_wire(&lenient::string(d)?))
    }
}

/// The payload handed to the update-session callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateGameSession {
    pub game_session: GameSession,
    pub update_reason: UpdateReason,
    pub backfill_ticket_id: String,
}

// ── Player sessions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayerSessionStatus {
    #[default]
    NotSet,
    Reserved,
    Active,
    Completed,
    Timedout,
}

impl PlayerSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSet => "NOT_SET",
            Self::Reserved => "RESERVED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Timedout => "TIMEDOUT",
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "RESERVED" => Self::Reserved,
            "ACTIVE" => Self::Active,
            "COMPLETED" => Self::Completed,
            "TIMEDOUT" => Self::Timedout,
            _ => Self::NotSet,
        }
    }

    pub fn is_not_set(&self) -> bool {
        *self == Self::NotSet
    }
}

impl Serialize for PlayerSessionStatus {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlayerSessionStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Self::from_wire(&lenient::string(d)?))
    }
}

/// Whether a game session accepts new player sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSessionCreationPolicy {
    NotSet,
    AcceptAll,
    DenyAll,
}

impl PlayerSessionCreationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSet => "NOT_SET",
            Self::AcceptAll => "ACCEPT_ALL",
            Self::DenyAll => "DENY_ALL",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerSession {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub fleet_id: String,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i64",
        deserialize_with = "lenient::positive_i64"
    )]
    pub creation_time: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i64",
        deserialize_with = "lenient::positive_i64"
    )]
    pub termination_time: Option<i64>,
    #[serde(default, skip_serializing_if = "PlayerSessionStatus::is_not_set")]
    pub status: PlayerSessionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub ip_address: String,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i32",
        deserialize_with = "lenient::positive_i32"
    )]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub dns_name: String,
}

// ── Matchmaking ──────────────────────────────────────────────────────

/// A typed matchmaking attribute, tagged by `AttrType` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "AttrType")]
pub enum AttributeValue {
    #[serde(rename = "STRING")]
    String {
        #[serde(rename = "S", default)]
        value: String,
    },
    #[serde(rename = "DOUBLE")]
    Double {
        #[serde(rename = "N", default)]
        value: f64,
    },
    #[serde(rename = "STRING_LIST")]
    StringList {
        #[serde(rename = "SL", default)]
        values: Vec<String>,
    },
    #[serde(rename = "STRING_DOUBLE_MAP")]
    StringDoubleMap {
        #[serde(rename = "SDM", default)]
        values: BTreeMap<String, f64>,
    },
}

/// A player to add through match backfill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_id: String,
    #[serde(default)]
    pub player_attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub team: String,
    #[serde(default)]
    pub latency_in_ms: BTreeMap<String, i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_session_is_sparse_but_keeps_properties() {
        let gs = GameSession {
            game_session_id: "gs-1".into(),
            port: Some(0),
            ..Default::default()
        };
        let json = serde_json::to_string(&gs).unwrap();
        assert_eq!(json, r#"{"GameSessionId":"gs-1","GameProperties":{}}"#);
    }

    #[test]
    fn attribute_values_carry_their_type_tag() {
        let attr = AttributeValue::StringList {
            values: vec!["a".into(), "b".into()],
        };
        let json = serde_json::to_string(&attr).unwrap();
        assert_eq!(json, r#"{"AttrType":"STRING_LIST","SL":["a","b"]}"#);

        let back: AttributeValue =
            serde_json::from_str(r#"{"AttrType":"DOUBLE","N":1.5}"#).unwrap();
        assert_eq!(back, AttributeValue::Double { value: 1.5 });
    }

    #[test]
    fn unknown_status_decodes_as_not_set() {
        let ps: PlayerSession =
            serde_json::from_str(r#"{"PlayerSessionId":"p","Status":"EXPLODED"}"#).unwrap();
        assert_eq!(ps.status, PlayerSessionStatus::NotSet);
        let ps: PlayerSession =
            serde_json::from_str(r#"{"Status":"ACTIVE","Port":7777}"#).unwrap();
        assert_eq!(ps.status, PlayerSessionStatus::Active);
        assert_eq!(ps.port, Some(7777));
    }

    #[test]
    fn update_reason_round_trips_through_wire_names() {
        assert_eq!(
            UpdateReason::from_wire(UpdateReason::BackfillTimedOut.as_str()),
            UpdateReason::BackfillTimedOut
        );
        assert_eq!(UpdateReason::from_wire("nope"), UpdateReason::Unknown);
    }
}
