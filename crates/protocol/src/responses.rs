//! Responses from the control plane.

use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::model::PlayerSession;
use crate::{Envelope, OK_STATUS_CODE};

/// Generic response header.  Every inbound frame is first decoded as this
/// to find out which pending request (if any) it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::any_i32")]
    pub status_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub error_message: String,
}

impl ResponseEnvelope {
    /// A response for `request_id` carrying `status_code`.
    pub fn reply(action: &str, request_id: &str, status_code: i32) -> Self {
        Self {
            envelope: Envelope {
                action: action.to_string(),
                request_id: request_id.to_string(),
            },
            status_code: Some(status_code),
            error_message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == Some(OK_STATUS_CODE)
    }

    pub fn action(&self) -> &str {
        &self.envelope.action
    }

    pub fn request_id(&self) -> &str {
        &self.envelope.request_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribePlayerSessionsResponse {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub next_token: String,
    #[serde(default, deserialize_with = "lenient::list")]
    pub player_sessions: Vec<PlayerSession>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartMatchBackfillResponse {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub ticket_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetComputeCertificateResponse {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub compute_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub certificate_path: String,
}

/// Temporary credentials for the fleet's IAM role.  `Expiration` is epoch
/// milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetFleetRoleCredentialsResponse {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub assumed_role_user_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub assumed_role_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub access_key_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient::string")]
    pub session_token: String,
    #[serde(
        default,
        skip_serializing_if = "lenient::not_positive_i64",
        deserialize_with = "lenient::positive_i64"
    )]
    pub expiration: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    #[test]
    fn envelope_reads_status_and_error() {
        let env: ResponseEnvelope = decode(
            r#"{"Action":"AcceptPlayerSession","RequestId":"r","StatusCode":400,"ErrorMessage":"nope"}"#,
        )
        .unwrap();
        assert_eq!(env.request_id(), "r");
        assert_eq!(env.status_code, Some(400));
        assert!(!env.is_success());
        assert_eq!(env.error_message, "nope");
    }

    #[test]
    fn missing_status_is_not_success() {
        let env: ResponseEnvelope = decode(r#"{"Action":"X","RequestId":"r"}"#).unwrap();
        assert!(!env.is_success());
    }

    #[test]
    fn describe_response_skips_bad_entries() {
        let resp: DescribePlayerSessionsResponse = decode(
            r#"{"NextToken":"n","PlayerSessions":[{"PlayerSessionId":"a"},7,{"PlayerSessionId":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.next_token, "n");
        let ids: Vec<_> = resp.player_sessions.iter().map(|p| p.player_session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
