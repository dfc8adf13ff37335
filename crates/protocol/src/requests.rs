//! Requests sent by the server process to the control plane.

use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::model::{Player, PlayerSessionCreationPolicy};
use crate::{Envelope, Message};

/// Registers the process as ready to host game sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateServerProcess {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub sdk_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub sdk_language: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub sdk_tool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub sdk_tool_version: String,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i32",
        deserialize_with = "lenient::positive_i32"
    )]
    pub port: Option<i32>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub log_paths: Vec<String>,
}
crate::impl_message!(ActivateServerProcess, "ActivateServerProcess");

impl ActivateServerProcess {
    pub fn new(
        sdk_version: impl Into<String>,
        sdk_language: impl Into<String>,
        sdk_tool_name: impl Into<String>,
        sdk_tool_version: impl Into<String>,
        port: i32,
        log_paths: Vec<String>,
    ) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            sdk_version: sdk_version.into(),
            sdk_language: sdk_language.into(),
            sdk_tool_name: sdk_tool_name.into(),
            sdk_tool_version: sdk_tool_version.into(),
            port: Some(port),
            log_paths,
        }
    }
}

/// Periodic liveness report.  `HealthStatus` is always written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatServerProcess {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub health_status: bool,
}
crate::impl_message!(HeartbeatServerProcess, "HeartbeatServerProcess");

impl HeartbeatServerProcess {
    pub fn new(healthy: bool) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            health_status: healthy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminateServerProcess {
    #[serde(flatten)]
    pub envelope: Envelope,
}
crate::impl_message!(TerminateServerProcess, "TerminateServerProcess");

impl TerminateServerProcess {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateGameSession {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
}
crate::impl_message!(ActivateGameSession, "ActivateGameSession");

impl ActivateGameSession {
    pub fn new(game_session_id: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            game_session_id: game_session_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdatePlayerSessionCreationPolicy {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_session_policy: String,
}
crate::impl_message!(UpdatePlayerSessionCreationPolicy, "UpdatePlayerSessionCreationPolicy");

impl UpdatePlayerSessionCreationPolicy {
    pub fn new(game_session_id: impl Into<String>, policy: PlayerSessionCreationPolicy) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            game_session_id: game_session_id.into(),
            player_session_policy: policy.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AcceptPlayerSession {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_session_id: String,
}
crate::impl_message!(AcceptPlayerSession, "AcceptPlayerSession");

impl AcceptPlayerSession {
    pub fn new(game_session_id: impl Into<String>, player_session_id: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            game_session_id: game_session_id.into(),
            player_session_id: player_session_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemovePlayerSession {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_session_id: String,
}
crate::impl_message!(RemovePlayerSession, "RemovePlayerSession");

impl RemovePlayerSession {
    pub fn new(game_session_id: impl Into<String>, player_session_id: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            game_session_id: game_session_id.into(),
            player_session_id: player_session_id.into(),
        }
    }
}

/// Query player sessions by game session, player or player session id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribePlayerSessions {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub player_session_status_filter: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub next_token: String,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i32",
        deserialize_with = "lenient::positive_i32"
    )]
    pub limit: Option<i32>,
}
crate::impl_message!(DescribePlayerSessions, "DescribePlayerSessions");

impl DescribePlayerSessions {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            ..Default::default()
        }
    }

    pub fn for_game_session(game_session_id: impl Into<String>) -> Self {
        Self {
            game_session_id: game_session_id.into(),
            ..Self::new()
        }
    }
}

/// Ask matchmaking to add players to a running game session.
/// `Players` is always written, even when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartMatchBackfill {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub ticket_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub matchmaking_configuration_arn: String,
    #[serde(default, deserialize_with = "lenient::list")]
    pub players: Vec<Player>,
}
crate::impl_message!(StartMatchBackfill, "StartMatchBackfill");

impl StartMatchBackfill {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopMatchBackfill {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub ticket_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub game_session_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub matchmaking_configuration_arn: String,
}
crate::impl_message!(StopMatchBackfill, "StopMatchBackfill");

impl StopMatchBackfill {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetComputeCertificate {
    #[serde(flatten)]
    pub envelope: Envelope,
}
crate::impl_message!(GetComputeCertificate, "GetComputeCertificate");

impl GetComputeCertificate {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetFleetRoleCredentials {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub role_session_name: String,
}
crate::impl_message!(GetFleetRoleCredentials, "GetFleetRoleCredentials");

impl GetFleetRoleCredentials {
    pub fn new(role_arn: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::request(Self::ACTION),
            role_arn: role_arn.into(),
            role_session_name: String::new(),
        }
    }

    pub fn with_role_session_name(mut self, name: impl Into<String>) -> Self {
        self.role_session_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    #[test]
    fn heartbeat_always_writes_health_status() {
        let mut hb = HeartbeatServerProcess::new(false);
        hb.envelope.request_id = "r1".into();
        assert_eq!(
            hb.to_json().unwrap(),
            r#"{"Action":"HeartbeatServerProcess","RequestId":"r1","HealthStatus":false}"#
        );
    }

    #[test]
    fn activate_server_process_omits_zero_port_and_empty_tool() {
        let mut msg = ActivateServerProcess::new("5.3.0", "Rust", "", "", 0, vec![]);
        msg.envelope.request_id = "r2".into();
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"Action":"ActivateServerProcess","RequestId":"r2","SdkVersion":"5.3.0","SdkLanguage":"Rust","LogPaths":[]}"#
        );
    }

    #[test]
    fn backfill_always_writes_players() {
        let mut msg = StartMatchBackfill::new();
        msg.envelope.request_id = "r3".into();
        msg.ticket_id = "t".into();
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"Action":"StartMatchBackfill","RequestId":"r3","TicketId":"t","Players":[]}"#
        );
    }

    #[test]
    fn describe_player_sessions_limit_is_sparse() {
        let mut msg = DescribePlayerSessions::for_game_session("gs");
        msg.limit = Some(-1);
        let json = msg.to_json().unwrap();
        assert!(!json.contains("Limit"));
        msg.limit = Some(10);
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""Limit":10"#));

        let back: DescribePlayerSessions = decode(&json).unwrap();
        assert_eq!(back.game_session_id, "gs");
        assert_eq!(back.limit, Some(10));
    }

    #[test]
    fn policy_uses_wire_names() {
        let msg = UpdatePlayerSessionCreationPolicy::new("gs", PlayerSessionCreationPolicy::DenyAll);
        assert_eq!(msg.player_session_policy, "DENY_ALL");
    }
}
