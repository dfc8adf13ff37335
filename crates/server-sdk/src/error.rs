//! Error taxonomy for every public operation.

/// Result alias used throughout the SDK.
pub type Result<T, E = GameLiftError> = std::result::Result<T, E>;

/// Every failure a public operation can report.
///
/// Only [`GameLiftError::WebsocketRetriableSendMessageFailure`] drives the
/// backoff / reconnect machinery; everything else propagates to the caller
/// on first occurrence.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GameLiftError {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("not_initialized: the server SDK has not been initialized")]
    NotInitialized,
    #[error("already_initialized: the server SDK has already been initialized")]
    AlreadyInitialized,
    #[error("initialization_mismatch: the registered instance has a different type")]
    InitializationMismatch,
    #[error("process_not_ready: ProcessReady has not been called successfully")]
    ProcessNotReady,
    #[error("game_session_id_not_set: no game session has been started on this process")]
    GameSessionIdNotSet,
    #[error("server_not_initialized: the control-plane connection is not established")]
    ServerNotInitialized,

    // ── Caller / service ─────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad_request: {0}")]
    BadRequest(String),
    #[error("internal_service: {0}")]
    InternalService(String),

    // ── Transport ────────────────────────────────────────────────────
    #[error("websocket_connect_failure: {0}")]
    WebsocketConnectFailure(String),
    #[error("websocket_connect_forbidden: the control plane rejected the credentials")]
    WebsocketConnectForbidden,
    #[error("websocket_connect_invalid_url: {0}")]
    WebsocketConnectInvalidUrl(String),
    #[error("websocket_connect_timeout: no response from the control plane")]
    WebsocketConnectTimeout,
    #[error("websocket_send_message_failure: {0}")]
    WebsocketSendMessageFailure(String),
    #[error("websocket_retriable_send_message_failure: {0}")]
    WebsocketRetriableSendMessageFailure(String),
}

impl GameLiftError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WebsocketRetriableSendMessageFailure(_))
    }

    /// Classify a non-success response from the control plane.  `body` is the
    /// raw frame so the caller sees exactly what the service returned.
    pub fn from_status(status: Option<i32>, body: &str) -> Self {
        let msg = match status {
            Some(code) => format!("status {code}: {body}"),
            None => format!("missing status: {body}"),
        };
        match status {
            Some(401) | Some(403) => Self::Unauthorized(msg),
            Some(code) if (400..500).contains(&code) => Self::BadRequest(msg),
            _ => Self::InternalService(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retriable_send_failure_is_retryable() {
        assert!(GameLiftError::WebsocketRetriableSendMessageFailure("x".into()).is_retryable());
        assert!(!GameLiftError::WebsocketSendMessageFailure("x".into()).is_retryable());
        assert!(!GameLiftError::BadRequest("x".into()).is_retryable());
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert!(matches!(
            GameLiftError::from_status(Some(403), "{}"),
            GameLiftError::Unauthorized(_)
        ));
        assert!(matches!(
            GameLiftError::from_status(Some(400), "{}"),
            GameLiftError::BadRequest(_)
        ));
        assert!(matches!(
            GameLiftError::from_status(Some(500), "{}"),
            GameLiftError::InternalService(_)
        ));
        assert!(matches!(
            GameLiftError::from_status(None, "{}"),
            GameLiftError::InternalService(_)
        ));
    }

    #[test]
    fn status_error_keeps_raw_body() {
        let err = GameLiftError::from_status(Some(404), r#"{"ErrorMessage":"gone"}"#);
        assert!(err.to_string().contains("gone"));
    }
}
