//! Message store: atomic sequence allocation and the visibility read.

use {
    chrono::{DateTime, Utc},
    sqlx::{Row, SqliteConnection, sqlite::SqliteRow},
    uuid::Uuid,
};

use crate::{
    Error, Result,
    types::{Message, ms_to_datetime, parse_id},
};

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: parse_id(row.get("id"), Error::Message {
            message: "malformed message id".into(),
        })?,
        conversation_id: parse_id(row.get("conversation_id"), Error::InvalidConversationId)?,
        sender_id: parse_id(row.get("sender_id"), Error::InvalidParticipantId)?,
        seq: row.get("seq"),
        payload: row.get("payload"),
        created_at: ms_to_datetime(row.get("created_at")),
    })
}

/// Allocate the next sequence number and insert the message, both on the
/// caller's executor. Run inside `with_tx`: the sequence-row write lock is
/// what serialises concurrent writers per conversation.
pub async fn save_with_sequence(conn: &mut SqliteConnection, msg: &Message) -> Result<i64> {
    if msg.conversation_id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    let seq: i64 = sqlx::query_scalar(
        "UPDATE conversation_sequences
         SET last_seq = last_seq + 1
         WHERE conversation_id = ?
         RETURNING last_seq",
    )
    .bind(msg.conversation_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(Error::SequenceNotInitialized)?;

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, seq, payload, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(msg.id.to_string())
    .bind(msg.conversation_id.to_string())
    .bind(msg.sender_id.to_string())
    .bind(seq)
    .bind(&msg.payload)
    .bind(msg.created_at.timestamp_millis())
    .execute(conn)
    .await?;
    Ok(seq)
}

/// The committed seq for a message id, if that message already exists.
/// Lets the commit path recognise a redelivered stream entry.
pub async fn seq_for_id(conn: &mut SqliteConnection, message_id: Uuid) -> Result<Option<i64>> {
    let seq = sqlx::query_scalar("SELECT seq FROM messages WHERE id = ?")
        .bind(message_id.to_string())
        .fetch_optional(conn)
        .await?;
    Ok(seq)
}

/// Messages with `created_at >= cutoff`, ordered by `seq` ascending. The
/// caller computes the cutoff as max(joined_at, now − recency window).
pub async fn visible_since(
    conn: &mut SqliteConnection,
    conversation_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Message>> {
    if conversation_id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    let rows = sqlx::query(
        "SELECT id, conversation_id, sender_id, seq, payload, created_at
         FROM messages
         WHERE conversation_id = ? AND created_at >= ?
         ORDER BY seq ASC",
    )
    .bind(conversation_id.to_string())
    .bind(cutoff.timestamp_millis())
    .fetch_all(conn)
    .await?;
    rows.iter().map(message_from_row).collect()
}
