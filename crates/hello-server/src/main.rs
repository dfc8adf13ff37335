//! Reference game server for the fleet control plane.
//!
//! Initializes the SDK from the environment, reports ready on a port,
//! activates every game session it is given and exits cleanly when the
//! fleet asks it to terminate or on Ctrl-C.
//!
//! Usage:
//!   GAMELIFT_SDK_WEBSOCKET_URL=wss://… GAMELIFT_SDK_AUTH_TOKEN=… \
//!   GAMELIFT_SDK_PROCESS_ID=… GAMELIFT_SDK_HOST_ID=… GAMELIFT_SDK_FLEET_ID=… \
//!   gl-hello-server [port]
//!
//! Env vars:
//!   RUST_LOG   log filter (default: "info")

use std::sync::Arc;

use gl_server_sdk::{api, ProcessParameters};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port: i32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 7777,
    };

    tracing::info!(version = api::get_sdk_version(), port, "starting hello server");
    api::init_sdk_from_env().await?;

    let terminate = Arc::new(Notify::new());
    let runtime = tokio::runtime::Handle::current();

    let on_terminate = terminate.clone();
    let params = ProcessParameters::new(port)
        .log_paths(vec!["logs".into()])
        .on_start_game_session(move |session| {
            tracing::info!(
                game_session_id = %session.game_session_id,
                max_players = ?session.maximum_player_session_count,
                "starting game session"
            );
            // Callbacks run on a blocking thread, so waiting here is fine.
            if let Err(e) = runtime.block_on(api::activate_game_session()) {
                tracing::error!(error = %e, "failed to activate game session");
            }
        })
        .on_update_game_session(|update| {
            tracing::info!(
                game_session_id = %update.game_session.game_session_id,
                reason = update.update_reason.as_str(),
                "game session updated"
            );
        })
        .on_process_terminate(move || {
            tracing::info!(termination_time = ?api::get_termination_time(), "fleet requested termination");
            on_terminate.notify_one();
        })
        .on_health_check(|| true);

    api::process_ready(params).await?;
    tracing::info!("process ready, waiting for game sessions");

    tokio::select! {
        _ = terminate.notified() => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    if let Err(e) = api::process_ending().await {
        tracing::error!(error = %e, "ProcessEnding failed");
    }
    api::destroy()?;
    Ok(())
}
