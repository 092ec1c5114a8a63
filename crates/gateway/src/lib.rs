//! Gateway: HTTP login surface, WebSocket upgrade, connection registry and
//! the socket lifecycle around the conversation engine.
//!
//! Lifecycle:
//! 1. Load config, connect SQLite, run migrations
//! 2. Assemble the service graph ([`server::build_state`])
//! 3. Serve HTTP + WebSocket ([`server::serve`]) until shutdown
//!
//! Domain logic lives in `murmur-chat`; this crate owns only transport
//! concerns: auth extraction, framing, per-client queues, fan-out.

pub mod auth_middleware;
pub mod auth_routes;
pub mod client;
pub mod error;
pub mod registry;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    client::{Client, SendError},
    registry::{Registry, WorkerFn},
    server::{build_router, build_state, build_state_with_db, serve},
    state::AppState,
};
