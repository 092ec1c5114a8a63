//! Conversation wire protocol definitions.
//!
//! All communication uses JSON frames over a bidirectional byte transport.
//! Server → client frames are discriminated by `type`:
//! - `handshake` — sent exactly once after identity resolution
//! - `ack`       — delivery receipt, single tick (`server_received`) or
//!   double tick (`persisted`, carries the assigned `seq`)
//! - `message`   — room broadcast
//! - `presence`  — current online sender ids
//! - `error`     — protocol-safe error report
//!
//! Client → server frames carry `{client_msg_id, payload}` after the
//! handshake. Timestamps are RFC 3339 on the wire.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Largest inbound frame accepted on the socket.
pub const MAX_PAYLOAD_BYTES: usize = 524_288; // 512 KiB
/// Per-frame write deadline applied by client write loops.
pub const WRITE_TIMEOUT_MS: u64 = 10_000;
/// Outbound queue capacity per connected client.
pub const OUTBOUND_QUEUE_CAP: usize = 256;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const TRANSPORT: &str = "TRANSPORT";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── Stream payload ───────────────────────────────────────────────────────────

/// The unit carried through the durable conversation stream between the
/// ingest path and the commit path.
///
/// `message_id` is minted at ingest and becomes the committed message's
/// primary key, so a redelivered stream entry can never commit twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub message_id: Uuid,
    pub client_msg_id: String,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

// ── Server → client frames ───────────────────────────────────────────────────

/// Sent once, immediately after the socket is established and the sender
/// identity has been resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeFrame {
    pub r#type: String, // always "handshake"
    pub sender_id: String,
    pub is_new_identity: bool,
}

impl HandshakeFrame {
    pub fn new(sender_id: impl Into<String>, is_new_identity: bool) -> Self {
        Self {
            r#type: "handshake".into(),
            sender_id: sender_id.into(),
            is_new_identity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    ServerReceived,
    Persisted,
}

/// Delivery receipt, addressed to the sending client only.
///
/// `seq` is present only on `persisted` acks; the single tick is not
/// ordered with respect to the double tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub r#type: String, // always "ack"
    pub client_msg_id: String,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl AckFrame {
    /// Single tick: the server has enqueued the message but not committed it.
    pub fn server_received(client_msg_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            r#type: "ack".into(),
            client_msg_id: client_msg_id.into(),
            status: AckStatus::ServerReceived,
            seq: None,
            timestamp: now,
        }
    }

    /// Double tick: the message is durably ordered at `seq`.
    pub fn persisted(client_msg_id: impl Into<String>, seq: i64, now: DateTime<Utc>) -> Self {
        Self {
            r#type: "ack".into(),
            client_msg_id: client_msg_id.into(),
            status: AckStatus::Persisted,
            seq: Some(seq),
            timestamp: now,
        }
    }
}

/// Broadcast to room subscribers other than the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFrame {
    pub r#type: String, // always "message"
    pub conversation_id: String,
    pub sender_id: String,
    pub seq: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl MessageFrame {
    pub fn new(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        seq: i64,
        payload: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            r#type: "message".into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            seq,
            payload: payload.into(),
            created_at,
        }
    }
}

/// Pushed to every room member on presence transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceFrame {
    pub r#type: String, // always "presence"
    pub online_sender_ids: Vec<String>,
}

impl PresenceFrame {
    pub fn new(online_sender_ids: Vec<String>) -> Self {
        Self {
            r#type: "presence".into(),
            online_sender_ids,
        }
    }
}

/// Socket-safe error report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub r#type: String, // always "error"
    pub code: String,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: "error".into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Client → server frames ───────────────────────────────────────────────────

/// Inbound chat frame, accepted after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub client_msg_id: String,
    pub payload: String,
}
