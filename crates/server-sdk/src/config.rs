//! SDK configuration: connection parameters, process parameters and tunables.

use std::sync::Arc;
use std::time::Duration;

use gl_protocol::{GameSession, UpdateGameSession};

use crate::retry::{GeometricBackoff, JitteredGeometricBackoff};

// ── Environment variables ────────────────────────────────────────────

pub const ENV_WEBSOCKET_URL: &str = "GAMELIFT_SDK_WEBSOCKET_URL";
pub const ENV_AUTH_TOKEN: &str = "GAMELIFT_SDK_AUTH_TOKEN";
pub const ENV_PROCESS_ID: &str = "GAMELIFT_SDK_PROCESS_ID";
pub const ENV_HOST_ID: &str = "GAMELIFT_SDK_HOST_ID";
pub const ENV_FLEET_ID: &str = "GAMELIFT_SDK_FLEET_ID";
pub const ENV_COMPUTE_TYPE: &str = "GAMELIFT_COMPUTE_TYPE";
pub const ENV_AWS_REGION: &str = "GAMELIFT_REGION";
pub const ENV_ACCESS_KEY: &str = "GAMELIFT_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "GAMELIFT_SECRET_KEY";
pub const ENV_SESSION_TOKEN: &str = "GAMELIFT_SESSION_TOKEN";
pub const ENV_SDK_TOOL_NAME: &str = "GAMELIFT_SDK_TOOL_NAME";
pub const ENV_SDK_TOOL_VERSION: &str = "GAMELIFT_SDK_TOOL_VERSION";

/// Process id value that asks the SDK to generate one.
pub const GENERATED_PROCESS_ID_PLACEHOLDER: &str = "ManagedContainerProcess";
pub const COMPUTE_TYPE_CONTAINER: &str = "CONTAINER";

// ── Tunables ─────────────────────────────────────────────────────────

/// Timeouts, backoff policies and limits.  `Default` carries production
/// values; tests shrink them.
#[derive(Debug, Clone)]
pub struct SdkSettings {
    /// How long a sent request waits for its response.
    pub service_call_timeout: Duration,
    /// Handshake timeout for a single connect attempt.
    pub connect_timeout: Duration,
    pub connect_backoff: GeometricBackoff,
    pub send_backoff: JitteredGeometricBackoff,
    /// Consecutive retryable send failures before a full reconnect.
    pub reconnect_threshold: u32,
    /// Polls spent waiting for an in-progress reconnect before a send fails.
    pub wait_for_reconnect_attempts: u32,
    pub wait_for_reconnect_delay: Duration,
    pub health_check_interval: Duration,
    /// Health-check interval is randomized by up to this much either way.
    pub health_check_jitter: Duration,
    /// A health callback slower than this is reported as unhealthy.
    pub health_check_timeout: Duration,
    /// Cached fleet-role credentials are reused only while they have at
    /// least this much lifetime left.
    pub credential_ttl_margin: Duration,
    pub max_role_session_name_len: usize,
    /// Outbound frames queued per connection before sends are refused.
    pub outbound_queue_depth: usize,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            service_call_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(20),
            connect_backoff: GeometricBackoff::default(),
            send_backoff: JitteredGeometricBackoff::default(),
            reconnect_threshold: 2,
            wait_for_reconnect_attempts: 5,
            wait_for_reconnect_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(60),
            health_check_jitter: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(50),
            credential_ttl_margin: Duration::from_secs(15 * 60),
            max_role_session_name_len: 64,
            outbound_queue_depth: 64,
        }
    }
}

// ── Server parameters ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ComputeType {
    #[default]
    Standard,
    Container,
}

/// Identity and credentials used to open the control-plane connection.
#[derive(Clone, Default)]
pub struct ServerParameters {
    pub websocket_url: String,
    pub process_id: String,
    pub host_id: String,
    pub fleet_id: String,
    pub auth_token: String,
    pub aws_region: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub compute_type: ComputeType,
}

impl std::fmt::Debug for ServerParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerParameters")
            .field("websocket_url", &self.websocket_url)
            .field("process_id", &self.process_id)
            .field("host_id", &self.host_id)
            .field("fleet_id", &self.fleet_id)
            .field("aws_region", &self.aws_region)
            .field("compute_type", &self.compute_type)
            .finish_non_exhaustive()
    }
}

impl ServerParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    pub fn process_id(mut self, id: impl Into<String>) -> Self {
        self.process_id = id.into();
        self
    }

    pub fn host_id(mut self, id: impl Into<String>) -> Self {
        self.host_id = id.into();
        self
    }

    pub fn fleet_id(mut self, id: impl Into<String>) -> Self {
        self.fleet_id = id.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Long-term or temporary AWS credentials for SigV4-signed connections.
    pub fn aws_credentials(
        mut self,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        self.aws_region = region.into();
        self.access_key = access_key.into();
        self.secret_key = secret_key.into();
        self.session_token = session_token.into();
        self
    }

    pub fn compute_type(mut self, compute_type: ComputeType) -> Self {
        self.compute_type = compute_type;
        self
    }

    /// Apply `GAMELIFT_*` environment overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.  A non-empty value wins over
    /// the explicit parameter.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_WEBSOCKET_URL) {
            tracing::info!(websocket_url = %url, "env override for websocket url");
            self.websocket_url = url;
        }
        if let Some(token) = get(ENV_AUTH_TOKEN) {
            tracing::info!("using env override for auth token");
            self.auth_token = token;
        }
        if let Some(pid) = get(ENV_PROCESS_ID) {
            tracing::info!(process_id = %pid, "env override for process id");
            self.process_id = pid;
        }
        if let Some(host) = get(ENV_HOST_ID) {
            tracing::info!(host_id = %host, "env override for host id");
            self.host_id = host;
        }
        if let Some(fleet) = get(ENV_FLEET_ID) {
            tracing::info!(fleet_id = %fleet, "env override for fleet id");
            self.fleet_id = fleet;
        }
        if let Some(kind) = get(ENV_COMPUTE_TYPE) {
            tracing::info!(compute_type = %kind, "env override for compute type");
            if kind == COMPUTE_TYPE_CONTAINER {
                self.compute_type = ComputeType::Container;
            }
        }
        if let Some(region) = get(ENV_AWS_REGION) {
            tracing::info!(aws_region = %region, "env override for aws region");
            self.aws_region = region;
        }
        // Credentials are never logged.
        if let Some(v) = get(ENV_ACCESS_KEY) {
            self.access_key = v;
        }
        if let Some(v) = get(ENV_SECRET_KEY) {
            self.secret_key = v;
        }
        if let Some(v) = get(ENV_SESSION_TOKEN) {
            self.session_token = v;
        }

        if self.process_id == GENERATED_PROCESS_ID_PLACEHOLDER {
            self.process_id = uuid::Uuid::new_v4().to_string();
            tracing::info!(process_id = %self.process_id, "generated process id");
        }
        self
    }

    /// Region, access key and secret key are all present.
    pub fn has_sigv4_material(&self) -> bool {
        !self.aws_region.is_empty() && !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    pub fn is_container(&self) -> bool {
        self.compute_type == ComputeType::Container
    }
}

// ── Process parameters ───────────────────────────────────────────────

pub type StartGameSessionFn = Arc<dyn Fn(GameSession) + Send + Sync>;
pub type UpdateGameSessionFn = Arc<dyn Fn(UpdateGameSession) + Send + Sync>;
pub type ProcessTerminateFn = Arc<dyn Fn() + Send + Sync>;
pub type HealthCheckFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// What the process listens on and how it wants to be called back.
///
/// Callbacks run on blocking worker threads, never on the connection's
/// receive loop, so they may block.
#[derive(Clone, Default)]
pub struct ProcessParameters {
    pub port: i32,
    pub log_paths: Vec<String>,
    pub(crate) on_start_game_session: Option<StartGameSessionFn>,
    pub(crate) on_update_game_session: Option<UpdateGameSessionFn>,
    pub(crate) on_process_terminate: Option<ProcessTerminateFn>,
    pub(crate) on_health_check: Option<HealthCheckFn>,
}

impl ProcessParameters {
    pub fn new(port: i32) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn log_paths(mut self, paths: Vec<String>) -> Self {
        self.log_paths = paths;
        self
    }

    pub fn on_start_game_session(mut self, f: impl Fn(GameSession) + Send + Sync + 'static) -> Self {
        self.on_start_game_session = Some(Arc::new(f));
        self
    }

    pub fn on_update_game_session(
        mut self,
        f: impl Fn(UpdateGameSession) + Send + Sync + 'static,
    ) -> Self {
        self.on_update_game_session = Some(Arc::new(f));
        self
    }

    /// Without this callback a terminate push ends the process.
    pub fn on_process_terminate(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_process_terminate = Some(Arc::new(f));
        self
    }

    /// Without this callback the process always reports healthy.
    pub fn on_health_check(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.on_health_check = Some(Arc::new(f));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_win_over_explicit_values() {
        let params = ServerParameters::new()
            .websocket_url("wss://explicit/")
            .fleet_id("fleet-explicit")
            .with_overrides(lookup(&[
                (ENV_WEBSOCKET_URL, "wss://env/"),
                (ENV_COMPUTE_TYPE, "CONTAINER"),
                (ENV_FLEET_ID, ""),
            ]));
        assert_eq!(params.websocket_url, "wss://env/");
        assert_eq!(params.fleet_id, "fleet-explicit");
        assert!(params.is_container());
    }

    #[test]
    fn placeholder_process_id_is_replaced() {
        let params = ServerParameters::new()
            .with_overrides(lookup(&[(ENV_PROCESS_ID, GENERATED_PROCESS_ID_PLACEHOLDER)]));
        assert_ne!(params.process_id, GENERATED_PROCESS_ID_PLACEHOLDER);
        assert!(uuid::Uuid::parse_str(&params.process_id).is_ok());
    }

    #[test]
    fn sigv4_material_needs_region_and_keys() {
        let partial = ServerParameters::new().aws_credentials("us-west-2", "AKID", "", "");
        assert!(!partial.has_sigv4_material());
        let full = ServerParameters::new().aws_credentials("us-west-2", "AKID", "secret", "");
        assert!(full.has_sigv4_material());
    }

    #[test]
    fn debug_output_hides_credentials() {
        let params = ServerParameters::new()
            .auth_token("super-secret-token")
            .aws_credentials("us-west-2", "AKID", "hidden-secret", "");
        let out = format!("{params:?}");
        assert!(!out.contains("super-secret-token"));
        assert!(!out.contains("hidden-secret"));
    }

    #[test]
    fn default_settings_match_production_values() {
        let s = SdkSettings::default();
        assert_eq!(s.service_call_timeout, Duration::from_secs(20));
        assert_eq!(s.reconnect_threshold, 2);
        assert_eq!(s.max_role_session_name_len, 64);
        assert_eq!(s.credential_ttl_margin, Duration::from_secs(900));
    }
}
