//! Conversation store.
//!
//! `create` is the lazy-create upsert: it also seeds the sequence row the
//! commit path relies on. `delete` is conditional: it refuses to remove a
//! room that still has an active participant, which closes the race between
//! a last-disconnect teardown and a concurrent rejoin. Sequence rows survive
//! deletion so a recreated room keeps counting instead of colliding with
//! historical message seqs.

use {
    chrono::{DateTime, Utc},
    sqlx::{Row, SqliteConnection},
    uuid::Uuid,
};

use crate::{
    Error, Result,
    types::{Conversation, ms_to_datetime},
};

/// Idempotent upsert: insert the conversation row if absent and make sure
/// its sequence row exists.
pub async fn create(
    conn: &mut SqliteConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    if id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    sqlx::query("INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(now.timestamp_millis())
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT OR IGNORE INTO conversation_sequences (conversation_id, last_seq) VALUES (?, 0)",
    )
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;
    get(conn, id).await
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Conversation> {
    if id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    let row = sqlx::query("SELECT created_at FROM conversations WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or(Error::ConversationNotFound)?;
    Ok(Conversation {
        id,
        created_at: ms_to_datetime(row.get("created_at")),
    })
}

/// Opportunistic teardown: remove the room unless a participant other than
/// the departing sender still holds an active identity, which is exactly
/// what a reconnect racing this delete would have just created. Returns
/// `true` when a row was actually deleted.
pub async fn delete_if_abandoned(
    conn: &mut SqliteConnection,
    id: Uuid,
    departing: Uuid,
) -> Result<bool> {
    if id.is_nil() {
        return Err(Error::InvalidConversationId);
    }
    let result = sqlx::query(
        "DELETE FROM conversations
         WHERE id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM conversation_participants
               WHERE conversation_id = ?1 AND left_at IS NULL AND id <> ?2
           )",
    )
    .bind(id.to_string())
    .bind(departing.to_string())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{participants, test_support::make_db, types::Participant};

    #[tokio::test]
    async fn create_is_idempotent_and_seeds_sequence() {
        let db = make_db().await;
        let mut conn = db.acquire().await.unwrap();
        let id = Uuid::new_v4();

        let first = create(&mut conn, id, Utc::now()).await.unwrap();
        let second = create(&mut conn, id, Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);

        let last_seq: i64 = sqlx::query_scalar(
            "SELECT last_seq FROM conversation_sequences WHERE conversation_id = ?",
        )
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(last_seq, 0);
    }

    #[tokio::test]
    async fn teardown_is_blocked_by_other_active_participants() {
        let db = make_db().await;
        let mut conn = db.acquire().await.unwrap();
        let conv = Uuid::new_v4();
        let now = Utc::now();
        create(&mut conn, conv, now).await.unwrap();

        let departing = Uuid::new_v4();
        for id in [departing, Uuid::new_v4()] {
            participants::create(&mut conn, &Participant {
                id,
                conversation_id: conv,
                user_id: format!("+1555000{id}"),
                joined_at: now,
                last_seen_at: now,
                left_at: None,
            })
            .await
            .unwrap();
        }

        // The other participant's identity (e.g. a racing reconnect) keeps
        // the room alive.
        assert!(!delete_if_abandoned(&mut conn, conv, departing).await.unwrap());
        assert!(get(&mut conn, conv).await.is_ok());
    }

    #[tokio::test]
    async fn teardown_ignores_the_departing_participant() {
        let db = make_db().await;
        let mut conn = db.acquire().await.unwrap();
        let conv = Uuid::new_v4();
        let now = Utc::now();
        create(&mut conn, conv, now).await.unwrap();

        let departing = Uuid::new_v4();
        participants::create(&mut conn, &Participant {
            id: departing,
            conversation_id: conv,
            user_id: "+15550001".into(),
            joined_at: now,
            last_seen_at: now,
            left_at: None,
        })
        .await
        .unwrap();

        assert!(delete_if_abandoned(&mut conn, conv, departing).await.unwrap());
        assert!(matches!(
            get(&mut conn, conv).await,
            Err(Error::ConversationNotFound)
        ));

        // The sequence row survives so a recreated room keeps counting.
        let last_seq: i64 = sqlx::query_scalar(
            "SELECT last_seq FROM conversation_sequences WHERE conversation_id = ?",
        )
        .bind(conv.to_string())
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(last_seq, 0);
    }

    #[tokio::test]
    async fn nil_conversation_id_is_rejected() {
        let db = make_db().await;
        let mut conn = db.acquire().await.unwrap();
        assert!(matches!(
            create(&mut conn, Uuid::nil(), Utc::now()).await,
            Err(Error::InvalidConversationId)
        ));
    }
}
