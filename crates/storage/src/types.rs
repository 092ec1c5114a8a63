use {
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

/// Stable account identity (in practice a phone number). Immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A chat room. Lazily created on first connect, opportunistically deleted
/// when the last participant disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The ephemeral identity bridge: `id` is the sender id shown to peers.
/// Multiple historical rows may exist per (user, conversation); at most one
/// is active for rejoin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// A chat entry with its ordering sequence. `seq` is unique and gapless
/// within a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub seq: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn parse_id(value: &str, err: crate::Error) -> crate::Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| err)
}
