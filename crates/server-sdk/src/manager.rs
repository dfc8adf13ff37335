//! Owns the current [`WebSocketConnection`] and the parameters used to open it.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use gl_protocol::Message;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SdkSettings;
use crate::error::{GameLiftError, Result};
use crate::transport::{ControlEvent, EventHandler, HandlerOutcome, WebSocketConnection};
use crate::{SDK_LANGUAGE, SDK_VERSION};

const IDEMPOTENCY_TOKEN_LEN: usize = 32;

/// Where to connect and how to authenticate.  Either `auth_token` or
/// `sigv4` is used, never both.
#[derive(Clone, Default)]
pub struct ConnectTarget {
    pub endpoint: String,
    pub auth_token: String,
    pub process_id: String,
    pub host_id: String,
    pub fleet_id: String,
    /// Pre-encoded SigV4 query parameters.
    pub sigv4: BTreeMap<String, String>,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("endpoint", &self.endpoint)
            .field("process_id", &self.process_id)
            .field("host_id", &self.host_id)
            .field("fleet_id", &self.fleet_id)
            .field("signed", &!self.sigv4.is_empty())
            .finish_non_exhaustive()
    }
}

impl ConnectTarget {
    /// Full connection URI.  Values are joined verbatim; SigV4 values arrive
    /// already encoded.
    pub fn uri(&self, idempotency_token: &str) -> String {
        let mut base = self.endpoint.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        let mut params: Vec<(&str, &str)> = vec![
            ("pID", self.process_id.as_str()),
            ("sdkVersion", SDK_VERSION),
            ("sdkLanguage", SDK_LANGUAGE),
            ("ComputeId", self.host_id.as_str()),
            ("FleetId", self.fleet_id.as_str()),
            ("idempotencyToken", idempotency_token),
        ];
        if !self.auth_token.is_empty() {
            params.push(("Authorization", self.auth_token.as_str()));
        } else {
            params.extend(self.sigv4.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{base}?{}", query.join("&"))
    }
}

fn idempotency_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(IDEMPOTENCY_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub struct ConnectionManager {
    settings: SdkSettings,
    current: RwLock<Arc<WebSocketConnection>>,
    target: RwLock<Option<ConnectTarget>>,
    /// Re-applied to every replacement connection.
    handlers: RwLock<Vec<(String, EventHandler)>>,
    events: mpsc::UnboundedSender<ControlEvent>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Must be called inside a Tokio runtime: spawns the control loop.
    pub fn new(settings: SdkSettings) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let first = WebSocketConnection::new(settings.clone(), Some(events.clone()));
        let manager = Arc::new(Self {
            settings,
            current: RwLock::new(first),
            target: RwLock::new(None),
            handlers: RwLock::new(Vec::new()),
            events,
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(control_loop(
            Arc::downgrade(&manager),
            rx,
            manager.shutdown.clone(),
        ));
        manager
    }

    pub fn current(&self) -> Arc<WebSocketConnection> {
        self.current.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    pub fn target(&self) -> Option<ConnectTarget> {
        self.target.read().clone()
    }

    /// Remember `target` and open the current connection to it.
    pub async fn connect(&self, target: ConnectTarget) -> Result<()> {
        tracing::info!(
            endpoint = %target.endpoint,
            process_id = %target.process_id,
            fleet_id = %target.fleet_id,
            signed = !target.sigv4.is_empty(),
            "connecting to control plane"
        );
        let uri = target.uri(&idempotency_token());
        *self.target.write() = Some(target);
        self.current().connect(&uri).await
    }

    /// Reopen the current connection with the stored target.
    pub async fn reconnect(&self) -> Result<()> {
        let Some(target) = self.target() else {
            return Err(GameLiftError::ServerNotInitialized);
        };
        let uri = target.uri(&idempotency_token());
        self.current().connect(&uri).await
    }

    /// Point the stored target at a new endpoint and token, then move the
    /// current connection there.
    pub async fn refresh(&self, endpoint: &str, auth_token: &str) -> Result<()> {
        let uri = {
            let mut guard = self.target.write();
            let target = guard.get_or_insert_with(ConnectTarget::default);
            target.endpoint = endpoint.to_string();
            target.auth_token = auth_token.to_string();
            target.uri(&idempotency_token())
        };
        tracing::info!(endpoint = %endpoint, "refreshing control-plane connection");
        self.current().connect(&uri).await
    }

    pub fn register_handler(&self, action: &str, handler: EventHandler) {
        {
            let mut handlers = self.handlers.write();
            handlers.retain(|(a, _)| a != action);
            handlers.push((action.to_string(), handler.clone()));
        }
        self.current().register_handler(action, handler);
    }

    /// Serialize `msg` and send it on the current connection.
    pub async fn send_message<M: Message>(&self, msg: &M) -> HandlerOutcome {
        let text = msg
            .to_json()
            .map_err(|e| GameLiftError::InternalService(e.to_string()))?;
        self.current().send_message(msg.request_id(), text).await
    }

    pub fn disconnect(&self) {
        self.current().close();
    }

    /// Open a fresh connection carrying the same handlers to the stored
    /// target, then swap it in and close the old one.  The old connection
    /// stays current until the swap; if the fresh one cannot connect nothing
    /// changes.
    pub async fn replace_connection(&self) -> Result<Arc<WebSocketConnection>> {
        let Some(target) = self.target() else {
            return Err(GameLiftError::ServerNotInitialized);
        };
        let fresh = self.fresh_connection();
        fresh.connect(&target.uri(&idempotency_token())).await?;

        let old = {
            let mut current = self.current.write();
            current.close();
            std::mem::replace(&mut *current, fresh.clone())
        };
        tracing::info!(
            old_connection = old.id(),
            new_connection = fresh.id(),
            "replaced control-plane connection"
        );
        Ok(fresh)
    }

    fn fresh_connection(&self) -> Arc<WebSocketConnection> {
        let fresh = WebSocketConnection::new(self.settings.clone(), Some(self.events.clone()));
        for (action, handler) in self.handlers.read().iter() {
            fresh.register_handler(action, handler.clone());
        }
        fresh
    }

    /// Stop the control loop and close the current connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ── Control loop ─────────────────────────────────────────────────────

async fn control_loop(
    weak: Weak<ConnectionManager>,
    mut rx: mpsc::UnboundedReceiver<ControlEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(manager) = weak.upgrade() else {
            break;
        };
        match event {
            ControlEvent::Reconnect { connection_id, uri } => {
                let current = manager.current();
                if current.id() != connection_id {
                    tracing::debug!(connection_id, "ignoring reconnect for retired connection");
                    continue;
                }
                tracing::warn!(connection_id, "connection dropped, reconnecting");
                if let Err(e) = current.connect(&uri).await {
                    tracing::error!(connection_id, error = %e, "reconnect failed");
                }
            }
        }
    }
    tracing::debug!("control loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target() -> ConnectTarget {
        ConnectTarget {
            endpoint: "wss://example.test".into(),
            auth_token: "tok".into(),
            process_id: "p-1".into(),
            host_id: "h-1".into(),
            fleet_id: "f-1".into(),
            sigv4: BTreeMap::new(),
        }
    }

    #[test]
    fn uri_has_slash_and_token_auth() {
        let uri = target().uri("abc");
        assert_eq!(
            uri,
            format!(
                "wss://example.test/?pID=p-1&sdkVersion={SDK_VERSION}&sdkLanguage={SDK_LANGUAGE}\
                 &ComputeId=h-1&FleetId=f-1&idempotencyToken=abc&Authorization=tok"
            )
        );
    }

    #[test]
    fn uri_uses_sigv4_only_without_token() {
        let mut t = target();
        t.auth_token.clear();
        t.endpoint = "wss://example.test/".into();
        t.sigv4.insert("Authorization".into(), "SigV4".into());
        t.sigv4.insert("X-Amz-Signature".into(), "ff".into());
        let uri = t.uri("abc");
        assert!(uri.starts_with("wss://example.test/?pID="));
        assert!(uri.ends_with("&Authorization=SigV4&X-Amz-Signature=ff"));
        assert_eq!(uri.matches("Authorization=").count(), 1);
    }

    #[test]
    fn idempotency_token_is_alphanumeric() {
        let t = idempotency_token();
        assert_eq!(t.len(), IDEMPOTENCY_TOKEN_LEN);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(t, idempotency_token());
    }

    #[test]
    fn debug_hides_token() {
        let mut t = target();
        t.auth_token = "very-secret".into();
        let out = format!("{t:?}");
        assert!(!out.contains("very-secret"));
        assert!(out.contains("p-1"));
    }

    #[tokio::test]
    async fn fresh_connection_carries_handlers() {
        let manager = ConnectionManager::new(SdkSettings::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        manager.register_handler(
            "X",
            Arc::new(move |_: &str| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(crate::transport::ResponsePayload::Empty)
            }),
        );
        let fresh = manager.fresh_connection();
        assert_ne!(manager.current().id(), fresh.id());
        fresh.on_message(r#"{"Action":"X"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_replacement_keeps_current_connection() {
        let manager = ConnectionManager::new(SdkSettings {
            connect_backoff: crate::retry::GeometricBackoff {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(
            manager.replace_connection().await.unwrap_err(),
            GameLiftError::ServerNotInitialized
        );

        let before = manager.current().id();
        *manager.target.write() = Some(ConnectTarget {
            endpoint: "http://example.invalid".into(),
            ..target()
        });
        assert!(matches!(
            manager.replace_connection().await,
            Err(GameLiftError::WebsocketConnectInvalidUrl(_))
        ));
        assert_eq!(manager.current().id(), before);
    }

    #[tokio::test]
    async fn reconnect_without_target_is_rejected() {
        let manager = ConnectionManager::new(SdkSettings::default());
        assert_eq!(
            manager.reconnect().await.unwrap_err(),
            GameLiftError::ServerNotInitialized
        );
    }
}
