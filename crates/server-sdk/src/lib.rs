//! `gl-server-sdk`: client SDK for game server processes hosted on a
//! managed fleet.
//!
//! A game server process uses this crate to register with the fleet control
//! plane over a persistent WebSocket, receive game-session lifecycle events,
//! manage player sessions and report health.  The SDK owns the connection
//! management, request/response correlation, retries and reconnects.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your game server                                         │
//! │                                                           │
//! │   api::init_sdk(ServerParameters::new()                   │
//! │       .websocket_url("wss://…")                           │
//! │       .auth_token("…") …).await?;                         │
//! │   api::process_ready(ProcessParameters::new(7777)         │
//! │       .on_start_game_session(|gs| …)).await?;             │
//! └──────────────┬────────────────────────────────────────────┘
//!                ▼
//!   ServerState ──► ConnectionManager ──► WebSocketConnection ──► control plane
//!     health loop        current conn        pending map / handlers
//! ```
//!
//! # Connection flow
//!
//! 1. Validate parameters, sign the query (SigV4) unless an auth token is set
//! 2. Connect with geometric backoff; the query carries the process identity
//! 3. `ProcessReady` activates the process and starts the heartbeat loop
//! 4. Requests are retried with jittered backoff; two consecutive retryable
//!    failures replace the connection
//! 5. Server pushes (`CreateGameSession`, `UpdateGameSession`,
//!    `TerminateProcess`, `RefreshConnection`) reach your callbacks on
//!    blocking worker threads

pub mod api;
pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod security;
pub mod state;
pub mod transport;

/// Version reported to the control plane.
pub const SDK_VERSION: &str = "5.3.0";
pub const SDK_LANGUAGE: &str = "Rust";

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use config::{ComputeType, ProcessParameters, SdkSettings, ServerParameters};
pub use error::{GameLiftError, Result};
pub use manager::{ConnectTarget, ConnectionManager};
pub use registry::InstanceRegistry;
pub use retry::{GeometricBackoff, JitteredGeometricBackoff, RetryStrategy, Retryable, RetryingCallable};
pub use state::{FleetRoleCredentials, ServerState};
pub use transport::{ConnectionState, ResponsePayload, WebSocketConnection};

// Re-export the wire model so servers never need to import gl-protocol directly.
pub use gl_protocol::{
    AttributeValue, DescribePlayerSessions, DescribePlayerSessionsResponse, GameProperty,
    GameSession, GetComputeCertificateResponse, GetFleetRoleCredentials, Player, PlayerSession,
    PlayerSessionCreationPolicy, PlayerSessionStatus, StartMatchBackfill,
    StartMatchBackfillResponse, StopMatchBackfill, UpdateGameSession, UpdateReason,
};
