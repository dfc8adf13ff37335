//! Unsolicited pushes from the control plane.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::model::{GameSession, UpdateGameSession, UpdateReason};
use crate::{Envelope, Message};

/// Asks the process to start hosting a game session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateGameSession {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub matchmaker_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub dns_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub ip_address: String,
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
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub game_properties: BTreeMap<String, String>,
}
crate::impl_message!(CreateGameSession, "CreateGameSession");

impl CreateGameSession {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::push(Self::ACTION),
            ..Default::default()
        }
    }

    /// Convert the push into the session handed to the start callback.
    /// The fleet id is not part of the push and must be injected by the
    /// receiver.
    pub fn into_game_session(self) -> GameSession {
        GameSession {
            game_session_id: self.game_session_id,
            name: self.game_session_name,
            fleet_id: String::new(),
            maximum_player_session_count: self.maximum_player_session_count,
            port: self.port,
            ip_address: self.ip_address,
            game_session_data: self.game_session_data,
            matchmaker_data: self.matchmaker_data,
            game_properties: self.game_properties,
            dns_name: self.dns_name,
        }
    }
}

/// Matchmaker changed the running session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateGameSessionEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, deserialize_with = "lenient::object")]
    pub game_session: GameSession,
    #[serde(default)]
    pub update_reason: UpdateReason,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub backfill_ticket_id: String,
}
crate::impl_message!(UpdateGameSessionEvent, "UpdateGameSession");

impl UpdateGameSessionEvent {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::push(Self::ACTION),
            ..Default::default()
        }
    }

    pub fn into_update(self) -> UpdateGameSession {
        UpdateGameSession {
            game_session: self.game_session,
            update_reason: self.update_reason,
            backfill_ticket_id: self.backfill_ticket_id,
        }
    }
}

/// The fleet is reclaiming this process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TerminateProcess {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i64",
        deserialize_with = "lenient::positive_i64"
    )]
    pub termination_time: Option<i64>,
}
crate::impl_message!(TerminateProcess, "TerminateProcess");

impl TerminateProcess {
    pub fn new(termination_time: i64) -> Self {
        Self {
            envelope: Envelope::push(Self::ACTION),
            termination_time: Some(termination_time),
        }
    }
}

/// Rotate to a new endpoint / token before the current one expires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RefreshConnection {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub refresh_connection_endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub auth_token: String,
}
crate::impl_message!(RefreshConnection, "RefreshConnection");

impl RefreshConnection {
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::push(Self::ACTION),
            refresh_connection_endpoint: endpoint.into(),
            auth_token: auth_token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    #[test]
    fn create_game_session_decodes_into_session() {
        let push: CreateGameSession = decode(
            r#"{"Action":"CreateGameSession","GameSessionId":"gs-1","GameSessionName":"arena",
                "MaximumPlayerSessionCount":8,"Port":"bad","GameProperties":{"mode":"ctf"}}"#,
        )
        .unwrap();
        let session = push.into_game_session();
        assert_eq!(session.game_session_id, "gs-1");
        assert_eq!(session.name, "arena");
        assert_eq!(session.maximum_player_session_count, Some(8));
        assert_eq!(session.port, None);
        assert_eq!(session.game_properties.get("mode").map(String::as_str), Some("ctf"));
        assert!(session.fleet_id.is_empty());
    }

    #[test]
    fn update_event_tolerates_missing_session() {
        let push: UpdateGameSessionEvent =
            decode(r#"{"Action":"UpdateGameSession","UpdateReason":"BACKFILL_FAILED"}"#).unwrap();
        let update = push.into_update();
        assert_eq!(update.update_reason, UpdateReason::BackfillFailed);
        assert_eq!(update.game_session, GameSession::default());
    }

    #[test]
    fn terminate_push_has_no_request_id() {
        let json = TerminateProcess::new(1_700_000_000).to_json().unwrap();
        assert_eq!(json, r#"{"Action":"TerminateProcess","TerminationTime":1700000000}"#);
    }
}
