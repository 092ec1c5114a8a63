//! Account store. Creation is idempotent so OTP verification can upsert
//! blindly.

use {
    chrono::{DateTime, Utc},
    sqlx::{Row, SqliteConnection},
};

use crate::{
    Error, Result,
    types::{User, ms_to_datetime},
};

/// Insert the user if absent; returns the stored record either way.
pub async fn create(conn: &mut SqliteConnection, id: &str, now: DateTime<Utc>) -> Result<User> {
    if id.is_empty() {
        return Err(Error::InvalidUserId);
    }
    sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?, ?)")
        .bind(id)
        .bind(now.timestamp_millis())
        .execute(&mut *conn)
        .await?;
    get(conn, id).await?.ok_or(Error::UserNotFound)
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|row| User {
        id: id.to_string(),
        created_at: ms_to_datetime(row.get("created_at")),
    }))
}
