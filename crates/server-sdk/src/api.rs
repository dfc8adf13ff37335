//! Process-wide entry points.
//!
//! Each function looks up the single [`ServerState`] registered by
//! [`init_sdk`] and delegates to it.

use std::sync::Arc;

use gl_protocol::{
    DescribePlayerSessions, DescribePlayerSessionsResponse, GetComputeCertificateResponse,
    GetFleetRoleCredentials, PlayerSessionCreationPolicy, StartMatchBackfill,
    StartMatchBackfillResponse, StopMatchBackfill,
};

use crate::config::{ProcessParameters, SdkSettings, ServerParameters};
use crate::error::Result;
use crate::registry::InstanceRegistry;
use crate::state::{FleetRoleCredentials, ServerState};
use crate::SDK_VERSION;

static REGISTRY: InstanceRegistry = InstanceRegistry::new();

fn instance() -> Result<Arc<ServerState>> {
    REGISTRY.get::<ServerState>()
}

pub fn get_sdk_version() -> &'static str {
    SDK_VERSION
}

/// Create the process-wide instance and connect it.  Environment variables
/// override `params`.
pub async fn init_sdk(params: ServerParameters) -> Result<()> {
    init_sdk_with_settings(params, SdkSettings::default()).await
}

/// Initialize purely from `GAMELIFT_*` environment variables.
pub async fn init_sdk_from_env() -> Result<()> {
    init_sdk(ServerParameters::new()).await
}

pub async fn init_sdk_with_settings(params: ServerParameters, settings: SdkSettings) -> Result<()> {
    let params = params.with_env_overrides();
    let state = ServerState::new(settings, Some(&REGISTRY));
    REGISTRY.set(state.clone())?;
    if let Err(e) = state.initialize_networking(params).await {
        tracing::error!(error = %e, "networking initialization failed");
        REGISTRY.remove_if(&state);
        state.destroy();
        return Err(e);
    }
    tracing::info!(version = SDK_VERSION, "server SDK initialized");
    Ok(())
}

pub async fn process_ready(params: ProcessParameters) -> Result<()> {
    instance()?.process_ready(params).await
}

pub async fn process_ending() -> Result<()> {
    instance()?.process_ending().await
}

pub async fn activate_game_session() -> Result<()> {
    instance()?.activate_game_session().await
}

pub async fn update_player_session_creation_policy(policy: PlayerSessionCreationPolicy) -> Result<()> {
    instance()?.update_player_session_creation_policy(policy).await
}

pub fn get_game_session_id() -> Result<String> {
    instance()?.get_game_session_id()
}

/// Epoch time the fleet will reclaim this process, once announced.
pub fn get_termination_time() -> Result<Option<i64>> {
    Ok(instance()?.get_termination_time())
}

pub async fn accept_player_session(player_session_id: &str) -> Result<()> {
    instance()?.accept_player_session(player_session_id).await
}

pub async fn remove_player_session(player_session_id: &str) -> Result<()> {
    instance()?.remove_player_session(player_session_id).await
}

pub async fn describe_player_sessions(
    request: DescribePlayerSessions,
) -> Result<DescribePlayerSessionsResponse> {
    instance()?.describe_player_sessions(request).await
}

pub async fn start_match_backfill(request: StartMatchBackfill) -> Result<StartMatchBackfillResponse> {
    instance()?.start_match_backfill(request).await
}

pub async fn stop_match_backfill(request: StopMatchBackfill) -> Result<()> {
    instance()?.stop_match_backfill(request).await
}

pub async fn get_compute_certificate() -> Result<GetComputeCertificateResponse> {
    instance()?.get_compute_certificate().await
}

pub async fn get_fleet_role_credentials(request: GetFleetRoleCredentials) -> Result<FleetRoleCredentials> {
    instance()?.get_fleet_role_credentials(request).await
}

/// Tear down the instance.  A later [`init_sdk`] starts from scratch.
pub fn destroy() -> Result<()> {
    let state = instance()?;
    REGISTRY.destroy()?;
    state.destroy();
    Ok(())
}
