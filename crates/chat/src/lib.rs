//! The real-time conversation engine: session identity resolution, message
//! ingest/commit, orchestration, and the per-conversation stream worker.

pub mod error;
pub mod manager;
pub mod messages;
pub mod session;
pub mod worker;

pub use {
    error::{Error, Result},
    manager::{HeartbeatTuning, ManagerService},
    messages::{MessageService, RoomSink},
    session::{Session, SessionService},
    worker::ConversationWorker,
};
