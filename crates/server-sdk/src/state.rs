//! Per-process server state: lifecycle, public operations, the health loop
//! and the handlers for server-pushed events.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use gl_protocol::{
    decode, AcceptPlayerSession, ActivateGameSession, ActivateServerProcess, CreateGameSession,
    DescribePlayerSessions, DescribePlayerSessionsResponse, GetComputeCertificate,
    GetComputeCertificateResponse, GetFleetRoleCredentials, GetFleetRoleCredentialsResponse,
    HeartbeatServerProcess, Message, PlayerSessionCreationPolicy, RefreshConnection,
    RemovePlayerSession, StartMatchBackfill, StartMatchBackfillResponse, StopMatchBackfill,
    TerminateProcess, TerminateServerProcess, UpdateGameSessionEvent,
    UpdatePlayerSessionCreationPolicy,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{
    ProcessParameters, SdkSettings, ServerParameters, ENV_ACCESS_KEY, ENV_AUTH_TOKEN,
    ENV_SDK_TOOL_NAME, ENV_SDK_TOOL_VERSION, ENV_SECRET_KEY, ENV_SESSION_TOKEN,
};
use crate::error::{GameLiftError, Result};
use crate::manager::{ConnectTarget, ConnectionManager};
use crate::registry::InstanceRegistry;
use crate::retry::{Retryable, RetryingCallable};
use crate::security::{sign_query, ContainerMetadataClient, SigV4Parameters};
use crate::transport::{EventHandler, HandlerOutcome, ResponsePayload};
use crate::{SDK_LANGUAGE, SDK_VERSION};

const ANYWHERE_CREDENTIALS_MESSAGE: &str = "Fleet role credentials not available for Anywhere fleet.";
const ROLE_SESSION_NAME_TOO_LONG: &str = "GetFleetRoleCredentials failed; the role session name is too long. \
     Please check role arn or session name and try again.";
const CONTAINER_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Temporary credentials for the fleet's IAM role.
#[derive(Clone, PartialEq, Eq)]
pub struct FleetRoleCredentials {
    pub assumed_role_user_arn: String,
    pub assumed_role_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for FleetRoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetRoleCredentials")
            .field("assumed_role_user_arn", &self.assumed_role_user_arn)
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl FleetRoleCredentials {
    fn from_response(resp: GetFleetRoleCredentialsResponse) -> Self {
        let expiration = resp
            .expiration
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        Self {
            assumed_role_user_arn: resp.assumed_role_user_arn,
            assumed_role_id: resp.assumed_role_id,
            access_key_id: resp.access_key_id,
            secret_access_key: resp.secret_access_key,
            session_token: resp.session_token,
            expiration,
        }
    }
}

pub struct ServerState {
    me: Weak<ServerState>,
    settings: SdkSettings,
    manager: Arc<ConnectionManager>,
    /// Used by the default terminate handling to tear the instance down.
    registry: Option<&'static InstanceRegistry>,
    context: RwLock<ServerParameters>,
    callbacks: RwLock<ProcessParameters>,
    network_initialized: AtomicBool,
    process_ready: AtomicBool,
    health: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    game_session_id: RwLock<Option<String>>,
    termination_time: RwLock<Option<i64>>,
    /// role ARN → credentials.
    credentials: Mutex<HashMap<String, FleetRoleCredentials>>,
    on_managed_compute: AtomicBool,
}

impl ServerState {
    /// Must be called inside a Tokio runtime.
    pub fn new(settings: SdkSettings, registry: Option<&'static InstanceRegistry>) -> Arc<Self> {
        let manager = ConnectionManager::new(settings.clone());
        let state = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            manager,
            registry,
            context: RwLock::new(ServerParameters::default()),
            callbacks: RwLock::new(ProcessParameters::default()),
            network_initialized: AtomicBool::new(false),
            process_ready: AtomicBool::new(false),
            health: Mutex::new(None),
            game_session_id: RwLock::new(None),
            termination_time: RwLock::new(None),
            credentials: Mutex::new(HashMap::new()),
            on_managed_compute: AtomicBool::new(true),
        });
        state.register_handlers();
        state
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn is_process_ready(&self) -> bool {
        self.process_ready.load(Ordering::SeqCst)
    }

    fn require_network(&self) -> Result<()> {
        if self.network_initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GameLiftError::ServerNotInitialized)
        }
    }

    fn require_process_ready(&self) -> Result<()> {
        if self.is_process_ready() {
            Ok(())
        } else {
            Err(GameLiftError::ProcessNotReady)
        }
    }

    fn require_game_session_id(&self) -> Result<String> {
        self.game_session_id
            .read()
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(GameLiftError::GameSessionIdNotSet)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Networking
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Validate `params` and open the control-plane connection.
    pub async fn initialize_networking(&self, params: ServerParameters) -> Result<()> {
        let has_token = !params.auth_token.is_empty();
        if !has_token && !params.has_sigv4_material() && !params.is_container() {
            return Err(GameLiftError::Unauthorized(format!(
                "Unauthorized attempt to initialize networking. Auth token or AWS Signature V4 (SigV4) required. \
                 Auth token may be set via ServerParameters::auth_token or the {ENV_AUTH_TOKEN} environment variable. \
                 SigV4 may be set via {ENV_ACCESS_KEY}, {ENV_SECRET_KEY} and {ENV_SESSION_TOKEN} environment variables."
            )));
        }
        if params.websocket_url.is_empty() {
            return Err(GameLiftError::Validation("webSocketUrl is missing.".into()));
        }
        if params.process_id.is_empty() {
            return Err(GameLiftError::Validation("processId is missing.".into()));
        }
        if params.fleet_id.is_empty() {
            return Err(GameLiftError::Validation("fleetId is missing.".into()));
        }
        if params.host_id.is_empty() && !params.is_container() {
            return Err(GameLiftError::Validation("hostId is missing.".into()));
        }

        let mut params = params;
        let mut target = ConnectTarget {
            endpoint: params.websocket_url.clone(),
            auth_token: params.auth_token.clone(),
            process_id: params.process_id.clone(),
            host_id: params.host_id.clone(),
            fleet_id: params.fleet_id.clone(),
            sigv4: BTreeMap::new(),
        };

        if !has_token {
            if params.is_container() {
                self.load_container_identity(&mut params).await?;
                target.host_id = params.host_id.clone();
            }
            target.sigv4 = signed_query(&params)?;
        }

        tracing::info!(
            process_id = %params.process_id,
            host_id = %params.host_id,
            fleet_id = %params.fleet_id,
            "initializing networking"
        );
        *self.context.write() = params;
        self.manager.connect(target).await?;
        self.network_initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_container_identity(&self, params: &mut ServerParameters) -> Result<()> {
        let lookup_failed = |what: &str, e: &dyn std::fmt::Display| {
            tracing::error!(error = %e, "failed to get container {what}");
            GameLiftError::InternalService(format!("failed to get container {what}"))
        };
        let client = ContainerMetadataClient::new(CONTAINER_LOOKUP_TIMEOUT)
            .map_err(|e| lookup_failed("credentials", &e))?;
        let creds = client
            .fetch_credentials()
            .await
            .map_err(|e| lookup_failed("credentials", &e))?;
        let meta = client
            .fetch_task_metadata()
            .await
            .map_err(|e| lookup_failed("task metadata", &e))?;
        params.access_key = creds.access_key;
        params.secret_key = creds.secret_key;
        params.session_token = creds.session_token;
        params.host_id = meta.task_id;
        Ok(())
    }

    fn register_handlers(&self) {
        let m = &self.manager;
        m.register_handler(CreateGameSession::ACTION, self.push(Self::on_start_game_session));
        m.register_handler(UpdateGameSessionEvent::ACTION, self.push(Self::on_update_game_session));
        m.register_handler(TerminateProcess::ACTION, self.push(Self::on_terminate_process));
        m.register_handler(RefreshConnection::ACTION, self.push(Self::on_refresh_connection));
        m.register_handler(
            DescribePlayerSessions::ACTION,
            typed::<DescribePlayerSessionsResponse>(ResponsePayload::PlayerSessions),
        );
        m.register_handler(
            StartMatchBackfill::ACTION,
            typed::<StartMatchBackfillResponse>(ResponsePayload::MatchBackfill),
        );
        m.register_handler(
            GetComputeCertificate::ACTION,
            typed::<GetComputeCertificateResponse>(ResponsePayload::ComputeCertificate),
        );
        m.register_handler(
            GetFleetRoleCredentials::ACTION,
            typed::<GetFleetRoleCredentialsResponse>(ResponsePayload::FleetRoleCredentials),
        );
    }

    fn push(&self, on_event: fn(&Arc<ServerState>, &str)) -> EventHandler {
        let weak = self.me.clone();
        Arc::new(move |raw: &str| {
            if let Some(state) = weak.upgrade() {
                on_event(&state, raw);
            }
            Ok(ResponsePayload::Empty)
        })
    }

    // ── Send with retries ────────────────────────────────────────────

    /// Send `msg` under the send backoff.  Repeated retryable failures
    /// replace the connection; a failed replacement ends the retries.
    pub async fn send_with_retries<M>(&self, msg: &M) -> HandlerOutcome
    where
        M: Message + Send + Sync,
    {
        let attempt = SendAttempt {
            state: self,
            msg,
            consecutive_failures: 0,
            outcome: None,
        };
        let attempt = RetryingCallable::new(&self.settings.send_backoff, attempt)
            .call()
            .await;
        match attempt.outcome {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(e)) if e.is_retryable() => {
                tracing::error!(action = M::ACTION, error = %e, "send retries exhausted");
                Err(GameLiftError::WebsocketSendMessageFailure(e.to_string()))
            }
            Some(Err(e)) => Err(e),
            None => Err(GameLiftError::WebsocketSendMessageFailure(
                "no send attempt was made".into(),
            )),
        }
    }

    /// Open a brand-new connection with the stored target and make it
    /// current.
    async fn replace_and_reconnect(&self) -> Result<()> {
        tracing::warn!("repeated send failures, replacing control-plane connection");
        self.manager.replace_connection().await.map(|_| ())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Process lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn process_ready(&self, params: ProcessParameters) -> Result<()> {
        tracing::info!(port = params.port, "calling ProcessReady");
        let port = params.port;
        let log_paths = params.log_paths.clone();
        *self.callbacks.write() = params;

        if !(0..=65535).contains(&port) {
            return Err(GameLiftError::Validation("Port number is invalid.".into()));
        }
        self.require_network()?;

        let tool_name = std::env::var(ENV_SDK_TOOL_NAME).unwrap_or_default();
        let tool_version = std::env::var(ENV_SDK_TOOL_VERSION).unwrap_or_default();
        let request = ActivateServerProcess::new(
            SDK_VERSION,
            SDK_LANGUAGE,
            tool_name,
            tool_version,
            port,
            log_paths,
        );
        match self.send_with_retries(&request).await {
            Ok(_) => {
                tracing::info!("server process activated, starting health check");
                self.process_ready.store(true, Ordering::SeqCst);
                self.start_health_loop();
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "ActivateServerProcess failed");
                Err(e)
            }
        }
    }

    pub async fn process_ending(&self) -> Result<()> {
        self.process_ready.store(false, Ordering::SeqCst);
        self.stop_health_loop();
        self.require_network()?;
        self.send_with_retries(&TerminateServerProcess::new())
            .await
            .map(|_| ())
    }

    /// Stop the health loop, close the connection and forget callbacks.
    pub fn destroy(&self) {
        tracing::info!("destroying server state");
        self.process_ready.store(false, Ordering::SeqCst);
        self.stop_health_loop();
        self.network_initialized.store(false, Ordering::SeqCst);
        self.manager.shutdown();
        *self.callbacks.write() = ProcessParameters::default();
        *self.termination_time.write() = None;
    }

    // ── Health check ─────────────────────────────────────────────────

    fn start_health_loop(&self) {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let weak = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(state) = weak.upgrade() else { break };
                if !state.is_process_ready() {
                    break;
                }
                let wait = state.next_health_interval();
                tokio::spawn(async move {
                    state.report_health().await;
                });
                tracing::debug!(wait_ms = wait.as_millis() as u64, "next health check scheduled");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        });
        let previous = self.health.lock().replace((cancel, handle));
        if let Some((token, _)) = previous {
            token.cancel();
        }
    }

    fn stop_health_loop(&self) {
        let current = self.health.lock().take();
        if let Some((token, _)) = current {
            token.cancel();
        }
    }

    fn next_health_interval(&self) -> Duration {
        let base = self.settings.health_check_interval.as_millis() as i64;
        let jitter = self.settings.health_check_jitter.as_millis() as i64;
        let offset = if jitter > 0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0
        };
        Duration::from_millis((base + offset).max(0) as u64)
    }

    /// Ask the process whether it is healthy and, if it is still ready,
    /// send a heartbeat.  Returns the status the callback produced.
    pub async fn report_health(&self) -> bool {
        let callback = self.callbacks.read().on_health_check.clone();
        let healthy = match callback {
            None => true,
            Some(check) => {
                let checking = tokio::task::spawn_blocking(move || check());
                match tokio::time::timeout(self.settings.health_check_timeout, checking).await {
                    Ok(Ok(healthy)) => healthy,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "health callback failed, reporting unhealthy");
                        false
                    }
                    Err(_) => {
                        tracing::warn!("health callback timed out, reporting unhealthy");
                        false
                    }
                }
            }
        };

        if !self.is_process_ready() {
            tracing::debug!(healthy, "process no longer ready, skipping heartbeat");
            return healthy;
        }
        tracing::info!(healthy, "reporting process health");
        if let Err(e) = self
            .send_with_retries(&HeartbeatServerProcess::new(healthy))
            .await
        {
            tracing::error!(error = %e, "failed to report process health");
        }
        healthy
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Game sessions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn get_game_session_id(&self) -> Result<String> {
        self.require_process_ready()?;
        self.require_game_session_id()
    }

    pub fn get_termination_time(&self) -> Option<i64> {
        *self.termination_time.read()
    }

    pub async fn activate_game_session(&self) -> Result<()> {
        self.require_process_ready()?;
        self.require_network()?;
        let id = self.require_game_session_id()?;
        self.send_with_retries(&ActivateGameSession::new(id))
            .await
            .map(|_| ())
    }

    pub async fn update_player_session_creation_policy(
        &self,
        policy: PlayerSessionCreationPolicy,
    ) -> Result<()> {
        self.require_process_ready()?;
        self.require_network()?;
        let id = self.require_game_session_id()?;
        self.send_with_retries(&UpdatePlayerSessionCreationPolicy::new(id, policy))
            .await
            .map(|_| ())
    }

    pub async fn accept_player_session(&self, player_session_id: &str) -> Result<()> {
        self.require_process_ready()?;
        require_player_session_id(player_session_id)?;
        self.require_network()?;
        let id = self.require_game_session_id()?;
        self.send_with_retries(&AcceptPlayerSession::new(id, player_session_id))
            .await
            .map(|_| ())
    }

    pub async fn remove_player_session(&self, player_session_id: &str) -> Result<()> {
        self.require_process_ready()?;
        require_player_session_id(player_session_id)?;
        self.require_network()?;
        let id = self.require_game_session_id()?;
        self.send_with_retries(&RemovePlayerSession::new(id, player_session_id))
            .await
            .map(|_| ())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Transport-only queries
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn describe_player_sessions(
        &self,
        mut request: DescribePlayerSessions,
    ) -> Result<DescribePlayerSessionsResponse> {
        self.require_network()?;
        request.stamp();
        match self.send_with_retries(&request).await? {
            ResponsePayload::PlayerSessions(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub async fn start_match_backfill(
        &self,
        mut request: StartMatchBackfill,
    ) -> Result<StartMatchBackfillResponse> {
        self.require_network()?;
        if request.players.is_empty() {
            return Err(GameLiftError::Validation("Players cannot be empty.".into()));
        }
        request.stamp();
        match self.send_with_retries(&request).await? {
            ResponsePayload::MatchBackfill(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stop_match_backfill(&self, mut request: StopMatchBackfill) -> Result<()> {
        self.require_network()?;
        request.stamp();
        self.send_with_retries(&request).await.map(|_| ())
    }

    pub async fn get_compute_certificate(&self) -> Result<GetComputeCertificateResponse> {
        self.require_network()?;
        match self.send_with_retries(&GetComputeCertificate::new()).await? {
            ResponsePayload::ComputeCertificate(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_fleet_role_credentials(
        &self,
        mut request: GetFleetRoleCredentials,
    ) -> Result<FleetRoleCredentials> {
        self.require_network()?;
        if !self.on_managed_compute.load(Ordering::SeqCst) {
            return Err(GameLiftError::BadRequest(ANYWHERE_CREDENTIALS_MESSAGE.into()));
        }

        if let Some(cached) = self.cached_credentials(&request.role_arn) {
            tracing::debug!(role_arn = %request.role_arn, "using cached fleet role credentials");
            return Ok(cached);
        }

        let max_len = self.settings.max_role_session_name_len;
        if request.role_session_name.is_empty() {
            let (fleet_id, host_id) = {
                let ctx = self.context.read();
                (ctx.fleet_id.clone(), ctx.host_id.clone())
            };
            request.role_session_name = format!("{fleet_id}-{host_id}").chars().take(max_len).collect();
        }
        if request.role_session_name.chars().count() > max_len {
            return Err(GameLiftError::BadRequest(ROLE_SESSION_NAME_TOO_LONG.into()));
        }

        request.stamp();
        let resp = match self.send_with_retries(&request).await? {
            ResponsePayload::FleetRoleCredentials(resp) => resp,
            other => return Err(unexpected(other)),
        };
        if resp.access_key_id.is_empty() {
            tracing::warn!("fleet role credentials are empty, treating fleet as Anywhere");
            self.on_managed_compute.store(false, Ordering::SeqCst);
            return Err(GameLiftError::BadRequest(ANYWHERE_CREDENTIALS_MESSAGE.into()));
        }

        let creds = FleetRoleCredentials::from_response(resp);
        self.credentials
            .lock()
            .insert(request.role_arn.clone(), creds.clone());
        Ok(creds)
    }

    /// Cached credentials that still have at least the TTL margin left.
    /// Stale entries are evicted.
    fn cached_credentials(&self, role_arn: &str) -> Option<FleetRoleCredentials> {
        let margin = chrono::Duration::from_std(self.settings.credential_ttl_margin)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let mut cache = self.credentials.lock();
        let fresh = cache
            .get(role_arn)
            .map(|c| c.expiration - margin > Utc::now())?;
        if fresh {
            cache.get(role_arn).cloned()
        } else {
            cache.remove(role_arn);
            None
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Server-pushed events
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn on_start_game_session(self: &Arc<Self>, raw: &str) {
        let push: CreateGameSession = match decode(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "malformed CreateGameSession");
                return;
            }
        };
        let mut session = push.into_game_session();
        session.fleet_id = self.context.read().fleet_id.clone();
        *self.game_session_id.write() = Some(session.game_session_id.clone());
        tracing::info!(game_session_id = %session.game_session_id, "game session started");

        if !self.is_process_ready() {
            tracing::warn!("got a game session on an inactive process, ignoring");
            return;
        }
        let callback = self.callbacks.read().on_start_game_session.clone();
        if let Some(on_start) = callback {
            tokio::task::spawn_blocking(move || on_start(session));
        }
    }

    fn on_update_game_session(self: &Arc<Self>, raw: &str) {
        let push: UpdateGameSessionEvent = match decode(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "malformed UpdateGameSession");
                return;
            }
        };
        if !self.is_process_ready() {
            tracing::warn!("got an updated game session on an inactive process, ignoring");
            return;
        }
        let update = push.into_update();
        tracing::info!(
            game_session_id = %update.game_session.game_session_id,
            reason = update.update_reason.as_str(),
            "game session updated"
        );
        let callback = self.callbacks.read().on_update_game_session.clone();
        if let Some(on_update) = callback {
            tokio::task::spawn_blocking(move || on_update(update));
        }
    }

    fn on_terminate_process(self: &Arc<Self>, raw: &str) {
        let push: TerminateProcess = match decode(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "malformed TerminateProcess");
                return;
            }
        };
        if !self.is_process_ready() {
            tracing::warn!("got a termination request on an inactive process, ignoring");
            return;
        }
        *self.termination_time.write() = push.termination_time;
        tracing::info!(termination_time = ?push.termination_time, "process termination requested");

        let callback = self.callbacks.read().on_process_terminate.clone();
        match callback {
            Some(on_terminate) => {
                tokio::task::spawn_blocking(move || on_terminate());
            }
            None => {
                let state = self.clone();
                tokio::spawn(async move {
                    tracing::info!("no terminate callback registered, ending process");
                    let ended = state.process_ending().await;
                    state.destroy();
                    if let Some(registry) = state.registry {
                        registry.remove_if(&state);
                    }
                    let code = if ended.is_ok() { 0 } else { -1 };
                    std::process::exit(code);
                });
            }
        }
    }

    fn on_refresh_connection(self: &Arc<Self>, raw: &str) {
        let push: RefreshConnection = match decode(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "malformed RefreshConnection");
                return;
            }
        };
        if !self.is_process_ready() {
            tracing::warn!("got a connection refresh on an inactive process, ignoring");
            return;
        }
        {
            let mut ctx = self.context.write();
            ctx.websocket_url = push.refresh_connection_endpoint.clone();
            ctx.auth_token = push.auth_token.clone();
        }
        let state = self.clone();
        tokio::spawn(async move {
            let refreshed = state
                .manager
                .refresh(&push.refresh_connection_endpoint, &push.auth_token)
                .await;
            if let Err(e) = refreshed {
                tracing::error!(error = %e, "connection refresh failed");
            }
        });
    }
}

impl Drop for ServerState {
    fn drop(&mut self) {
        if let Some((token, _)) = self.health.get_mut().take() {
            token.cancel();
        }
        self.manager.shutdown();
    }
}

// ── Send attempt ─────────────────────────────────────────────────────

struct SendAttempt<'a, M> {
    state: &'a ServerState,
    msg: &'a M,
    consecutive_failures: u32,
    outcome: Option<HandlerOutcome>,
}

#[async_trait::async_trait]
impl<M> Retryable for SendAttempt<'_, M>
where
    M: Message + Send + Sync,
{
    async fn attempt(&mut self) -> bool {
        match self.state.manager.send_message(self.msg).await {
            Ok(payload) => {
                self.consecutive_failures = 0;
                self.outcome = Some(Ok(payload));
                true
            }
            Err(e) if e.is_retryable() => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    action = M::ACTION,
                    failures = self.consecutive_failures,
                    error = %e,
                    "retryable send failure"
                );
                self.outcome = Some(Err(e));
                if self.consecutive_failures < self.state.settings.reconnect_threshold {
                    return false;
                }
                match self.state.replace_and_reconnect().await {
                    Ok(()) => {
                        self.consecutive_failures = 0;
                        false
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "reconnect after repeated failures failed");
                        self.outcome = Some(Err(GameLiftError::WebsocketSendMessageFailure(
                            format!("reconnect failed: {e}"),
                        )));
                        true
                    }
                }
            }
            Err(e) => {
                self.outcome = Some(Err(e));
                true
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn typed<T: DeserializeOwned + 'static>(wrap: fn(T) -> ResponsePayload) -> EventHandler {
    Arc::new(move |raw: &str| {
        let body: T = decode(raw)
            .map_err(|e| GameLiftError::InternalService(format!("malformed response: {e}")))?;
        Ok(wrap(body))
    })
}

fn unexpected(payload: ResponsePayload) -> GameLiftError {
    GameLiftError::InternalService(format!("unexpected response payload: {payload:?}"))
}

fn require_player_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(GameLiftError::Validation("Player session id is empty.".into()));
    }
    Ok(())
}

fn signed_query(params: &ServerParameters) -> Result<BTreeMap<String, String>> {
    let query = BTreeMap::from([
        ("ComputeId".to_string(), params.host_id.clone()),
        ("FleetId".to_string(), params.fleet_id.clone()),
        ("pID".to_string(), params.process_id.clone()),
    ]);
    let signing = SigV4Parameters {
        region: &params.aws_region,
        access_key: &params.access_key,
        secret_key: &params.secret_key,
        session_token: &params.session_token,
        query_params: &query,
        request_time: Utc::now(),
    };
    sign_query(&signing).map_err(|e| {
        tracing::error!(error = %e, "failed to sign connection query");
        GameLiftError::InternalService(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SdkSettings {
        SdkSettings {
            service_call_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unauthorized_is_checked_first() {
        let state = ServerState::new(settings(), None);
        let err = state
            .initialize_networking(ServerParameters::new())
            .await
            .unwrap_err();
        match err {
            GameLiftError::Unauthorized(msg) => assert!(msg.contains(ENV_AUTH_TOKEN)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_fields_are_validated_in_order() {
        let state = ServerState::new(settings(), None);
        let base = ServerParameters::new().auth_token("t");
        let cases = [
            (base.clone(), "webSocketUrl is missing."),
            (base.clone().websocket_url("ws://x"), "processId is missing."),
            (base.clone().websocket_url("ws://x").process_id("p"), "fleetId is missing."),
            (
                base.clone().websocket_url("ws://x").process_id("p").fleet_id("f"),
                "hostId is missing.",
            ),
        ];
        for (params, expected) in cases {
            let err = state.initialize_networking(params).await.unwrap_err();
            assert_eq!(err, GameLiftError::Validation(expected.into()));
        }
    }

    #[tokio::test]
    async fn operations_before_networking_are_rejected() {
        let state = ServerState::new(settings(), None);
        assert_eq!(
            state.get_compute_certificate().await.unwrap_err(),
            GameLiftError::ServerNotInitialized
        );
        assert_eq!(
            state.activate_game_session().await.unwrap_err(),
            GameLiftError::ProcessNotReady
        );
        assert_eq!(
            state.accept_player_session("").await.unwrap_err(),
            GameLiftError::ProcessNotReady
        );
        assert_eq!(
            state.process_ready(ProcessParameters::new(7777)).await.unwrap_err(),
            GameLiftError::ServerNotInitialized
        );
        assert_eq!(state.get_termination_time(), None);
    }

    #[tokio::test]
    async fn invalid_port_is_rejected_before_network_check() {
        let state = ServerState::new(settings(), None);
        for port in [-1, 70000] {
            let err = state.process_ready(ProcessParameters::new(port)).await.unwrap_err();
            assert_eq!(err, GameLiftError::Validation("Port number is invalid.".into()));
        }
    }

    #[tokio::test]
    async fn health_defaults_to_true_without_callback() {
        let state = ServerState::new(settings(), None);
        assert!(state.report_health().await);
    }

    #[tokio::test]
    async fn health_callback_result_is_reported() {
        let state = ServerState::new(settings(), None);
        *state.callbacks.write() = ProcessParameters::new(1).on_health_check(|| false);
        assert!(!state.report_health().await);
    }

    #[tokio::test]
    async fn health_interval_stays_within_jitter() {
        let state = ServerState::new(SdkSettings::default(), None);
        for _ in 0..50 {
            let wait = state.next_health_interval();
            assert!(wait >= Duration::from_secs(50) && wait <= Duration::from_secs(70));
        }
    }

    #[tokio::test]
    async fn cached_credentials_respect_margin() {
        let state = ServerState::new(settings(), None);
        let creds = |mins: i64| FleetRoleCredentials {
            assumed_role_user_arn: String::new(),
            assumed_role_id: String::new(),
            access_key_id: "AKID".into(),
            secret_access_key: "s".into(),
            session_token: "t".into(),
            expiration: Utc::now() + chrono::Duration::minutes(mins),
        };
        state.credentials.lock().insert("fresh".into(), creds(60));
        state.credentials.lock().insert("stale".into(), creds(10));
        assert!(state.cached_credentials("fresh").is_some());
        assert!(state.cached_credentials("stale").is_none());
        assert!(!state.credentials.lock().contains_key("stale"));
    }

    #[test]
    fn wire_expiration_is_milliseconds() {
        let creds = FleetRoleCredentials::from_response(GetFleetRoleCredentialsResponse {
            access_key_id: "AKID".into(),
            expiration: Some(1_700_000_000_000),
            ..Default::default()
        });
        assert_eq!(creds.expiration.timestamp(), 1_700_000_000);
    }

    #[test]
    fn signed_query_covers_identity_params() {
        let params = ServerParameters::new()
            .process_id("p")
            .host_id("h")
            .fleet_id("f")
            .aws_credentials("us-west-2", "AKID", "secret", "");
        let signed = signed_query(&params).unwrap();
        assert_eq!(signed["Authorization"], "SigV4");
        assert!(signed.contains_key("X-Amz-Signature"));
    }
}
