//! Participant store: the ephemeral identity rows behind sender ids.

use {
    chrono::{DateTime, Utc},
    sqlx::{Row, SqliteConnection, sqlite::SqliteRow},
    uuid::Uuid,
};

use crate::{
    Error, Result,
    types::{Participant, ms_to_datetime, parse_id},
};

fn participant_from_row(row: &SqliteRow) -> Result<Participant> {
    Ok(Participant {
        id: parse_id(row.get("id"), Error::InvalidParticipantId)?,
        conversation_id: parse_id(row.get("conversation_id"), Error::InvalidConversationId)?,
        user_id: row.get("user_id"),
        joined_at: ms_to_datetime(row.get("joined_at")),
        last_seen_at: ms_to_datetime(row.get("last_seen_at")),
        left_at: row
            .get::<Option<i64>, _>("left_at")
            .map(ms_to_datetime),
    })
}

/// Most recent row with `left_at IS NULL` for (user, conversation); `None`
/// when the user has no active identity there.
pub async fn find_recent(
    conn: &mut SqliteConnection,
    user_id: &str,
    conversation_id: Uuid,
) -> Result<Option<Participant>> {
    if conversation_id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    let row = sqlx::query(
        "SELECT id, conversation_id, user_id, joined_at, last_seen_at, left_at
         FROM conversation_participants
         WHERE user_id = ? AND conversation_id = ? AND left_at IS NULL
         ORDER BY last_seen_at DESC
         LIMIT 1",
    )
    .bind(user_id)
    .bind(conversation_id.to_string())
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(participant_from_row).transpose()
}

pub async fn create(conn: &mut SqliteConnection, p: &Participant) -> Result<()> {
    if p.id.is_nil() {
        return Err(Error::InvalidParticipantId);
    }
    if p.conversation_id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    sqlx::query(
        "INSERT INTO conversation_participants (
             id, conversation_id, user_id, joined_at, last_seen_at
         ) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(p.id.to_string())
    .bind(p.conversation_id.to_string())
    .bind(&p.user_id)
    .bind(p.joined_at.timestamp_millis())
    .bind(p.last_seen_at.timestamp_millis())
    .execute(conn)
    .await?;
    Ok(())
}

/// Durable presence touch: `last_seen_at = now`.
pub async fn update_presence(
    conn: &mut SqliteConnection,
    participant_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    if participant_id.is_nil() {
        return Err(Error::InvalidParticipantId);
    }
    let result = sqlx::query("UPDATE conversation_participants SET last_seen_at = ? WHERE id = ?")
        .bind(now.timestamp_millis())
        .bind(participant_id.to_string())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::ParticipantNotFound);
    }
    Ok(())
}

/// Permanent leave. `left_at` only transitions nil → set; marking an
/// already-left row reports not-found.
pub async fn mark_left(
    conn: &mut SqliteConnection,
    participant_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    if participant_id.is_nil() {
        return Err(Error::InvalidParticipantId);
    }
    let result = sqlx::query(
        "UPDATE conversation_participants
         SET left_at = ?1, last_seen_at = ?1
         WHERE id = ?2 AND left_at IS NULL",
    )
    .bind(now.timestamp_millis())
    .bind(participant_id.to_string())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::ParticipantNotFound);
    }
    Ok(())
}
