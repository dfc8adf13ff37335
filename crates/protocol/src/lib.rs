//! Control-plane wire protocol: message envelope, typed requests, responses
//! and server-pushed events.
//!
//! Every frame is one JSON object.  Requests carry `Action` and a fresh
//! `RequestId`; responses echo both and add `StatusCode` / `ErrorMessage`;
//! pushes from the control plane carry an `Action` and an empty `RequestId`.
//!
//! Encoding is sparse: empty strings and non-positive numbers are omitted
//! rather than written as `null`.  Decoding is lenient: a field with the
//! wrong JSON type falls back to its default instead of failing the frame.

pub mod events;
pub mod lenient;
pub mod model;
pub mod requests;
pub mod responses;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use events::{CreateGameSession, RefreshConnection, TerminateProcess, UpdateGameSessionEvent};
pub use model::{
    AttributeValue, GameProperty, GameSession, Player, PlayerSession,
    PlayerSessionCreationPolicy, PlayerSessionStatus, UpdateGameSession, UpdateReason,
};
pub use requests::{
    AcceptPlayerSession, ActivateGameSession, ActivateServerProcess, DescribePlayerSessions,
    GetComputeCertificate, GetFleetRoleCredentials, HeartbeatServerProcess, RemovePlayerSession,
    StartMatchBackfill, StopMatchBackfill, TerminateServerProcess,
    UpdatePlayerSessionCreationPolicy,
};
pub use responses::{
    DescribePlayerSessionsResponse, GetComputeCertificateResponse,
    GetFleetRoleCredentialsResponse, ResponseEnvelope, StartMatchBackfillResponse,
};

/// Status code the control plane uses for a successful response.
pub const OK_STATUS_CODE: i32 = 200;

// ── Envelope ─────────────────────────────────────────────────────────

/// Fields shared by every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "lenient::string"
    )]
    pub action: String,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "lenient::string"
    )]
    pub request_id: String,
}

impl Envelope {
    /// Envelope for an outbound request with a freshly generated id.
    pub fn request(action: &str) -> Self {
        Self {
            action: action.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Envelope for a server push (no request id).
    pub fn push(action: &str) -> Self {
        Self {
            action: action.to_string(),
            request_id: String::new(),
        }
    }
}

// ── Message capability ───────────────────────────────────────────────

/// A typed frame that knows its action name and request id.
pub trait Message: Serialize {
    /// Wire action name.
    const ACTION: &'static str;

    fn envelope(&self) -> &Envelope;
    fn envelope_mut(&mut self) -> &mut Envelope;

    fn request_id(&self) -> &str {
        &self.envelope().request_id
    }

    /// Fill in the action and a fresh request id when the caller built the
    /// message through `Default` instead of `new()`.
    fn stamp(&mut self) {
        let env = self.envelope_mut();
        if env.action.is_empty() {
            env.action = Self::ACTION.to_string();
        }
        if env.request_id.is_empty() {
            env.request_id = uuid::Uuid::new_v4().to_string();
        }
    }

    fn to_json(&self) -> Result<String, CodecError> {
        encode(self)
    }
}

/// Implements [`Message`] for a struct with a flattened `envelope` field.
macro_rules! impl_message {
    ($ty:ty, $action:literal) => {
        impl $crate::Message for $ty {
            const ACTION: &'static str = $action;

            fn envelope(&self) -> &$crate::Envelope {
                &self.envelope
            }

            fn envelope_mut(&mut self) -> &mut $crate::Envelope {
                &mut self.envelope
            }
        }
    };
}
pub(crate) use impl_message;

// ── Codec ────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("decode: expected a JSON object")]
    NotAnObject,
}

/// Serialize any frame to its text form.
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::Encode)
}

/// Decode a frame.  Never panics: malformed text or a non-object payload
/// is reported as [`CodecError`], mistyped fields fall back to defaults.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(CodecError::Decode)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    serde_json::from_value(value).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_has_fresh_ids() {
        let a = Envelope::request("ActivateGameSession");
        let b = Envelope::request("ActivateGameSession");
        assert_eq!(a.action, "ActivateGameSession");
        assert!(!a.request_id.is_empty());
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn push_envelope_omits_request_id() {
        let json = encode(&Envelope::push("TerminateProcess")).unwrap();
        assert_eq!(json, r#"{"Action":"TerminateProcess"}"#);
    }

    #[test]
    fn decode_rejects_garbage_without_panicking() {
        assert!(decode::<Envelope>("not json").is_err());
        assert!(matches!(
            decode::<Envelope>("[1,2,3]"),
            Err(CodecError::NotAnObject)
        ));
    }

    #[test]
    fn decode_tolerates_mistyped_fields() {
        let env: Envelope = decode(r#"{"Action":42,"RequestId":"abc"}"#).unwrap();
        assert_eq!(env.action, "");
        assert_eq!(env.request_id, "abc");
    }

    #[test]
    fn stamp_fills_missing_fields_only() {
        let mut msg = TerminateServerProcess::default();
        msg.stamp();
        assert_eq!(msg.envelope.action, "TerminateServerProcess");
        let id = msg.request_id().to_string();
        assert!(!id.is_empty());
        msg.stamp();
        assert_eq!(msg.request_id(), id);
    }
}
