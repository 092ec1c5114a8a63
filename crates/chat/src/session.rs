//! Session identity resolution: the short-window rejoin rule and the
//! durable presence flush.

use {
    chrono::{DateTime, Duration, Utc},
    tracing::debug,
    uuid::Uuid,
};

use murmur_storage::{Db, participants, types::Participant};

use crate::{Error, Result};

/// Active connection context for a user in a room, bridging the stable
/// account and the anonymous participant. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub conversation_id: Uuid,
    /// The participant id peers see.
    pub sender_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub is_new_identity: bool,
}

pub struct SessionService {
    db: Db,
    rejoin_window: Duration,
}

impl SessionService {
    pub fn new(db: Db, rejoin_window: std::time::Duration) -> Self {
        Self {
            db,
            rejoin_window: Duration::seconds(rejoin_window.as_secs() as i64),
        }
    }

    /// Resolve the identity for (user, conversation): hand back the previous
    /// sender id when the user reconnects inside the rejoin window, rotate
    /// to a fresh one otherwise. Runs in one transaction.
    pub async fn start_session(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        force_new: bool,
    ) -> Result<Session> {
        if user_id.is_empty() {
            return Err(Error::invalid_argument("user id is required"));
        }
        if conversation_id.is_nil() {
            return Err(Error::invalid_argument("invalid conversation id"));
        }
        let user_id = user_id.to_string();
        let window = self.rejoin_window;
        let session = self
            .db
            .with_tx(move |conn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let existing =
                        participants::find_recent(conn, &user_id, conversation_id).await?;
                    if !force_new
                        && let Some(p) = &existing
                        && p.left_at.is_none()
                        && now - p.last_seen_at <= window
                    {
                        return Ok(Session {
                            user_id,
                            conversation_id,
                            sender_id: p.id,
                            joined_at: p.joined_at,
                            is_new_identity: false,
                        });
                    }
                    // Identity rotation: close the stale identity so at most
                    // one row per (user, conversation) stays active, then
                    // mint a brand-new participant row.
                    if let Some(p) = &existing
                        && p.left_at.is_none()
                    {
                        participants::mark_left(conn, p.id, now).await?;
                    }
                    let p = Participant {
                        id: Uuid::new_v4(),
                        conversation_id,
                        user_id: user_id.clone(),
                        joined_at: now,
                        last_seen_at: now,
                        left_at: None,
                    };
                    participants::create(conn, &p).await?;
                    Ok::<_, Error>(Session {
                        user_id,
                        conversation_id,
                        sender_id: p.id,
                        joined_at: now,
                        is_new_identity: true,
                    })
                })
            })
            .await?;
        debug!(
            sender_id = %session.sender_id,
            conversation_id = %conversation_id,
            is_new = session.is_new_identity,
            "session started"
        );
        Ok(session)
    }

    /// Explicit leave: breaks the rejoin link for this sender id.
    pub async fn stop_session(&self, sender_id: Uuid) -> Result<()> {
        if sender_id.is_nil() {
            return Err(Error::invalid_argument("invalid sender id"));
        }
        self.db
            .with_tx(move |conn| {
                Box::pin(async move {
                    participants::mark_left(conn, sender_id, Utc::now()).await?;
                    Ok::<_, Error>(())
                })
            })
            .await
    }

    /// Durable presence flush: `last_seen_at = now`. Called on connect and
    /// from the slow heartbeat timer.
    pub async fn session_sync(&self, sender_id: Uuid) -> Result<()> {
        if sender_id.is_nil() {
            return Err(Error::invalid_argument("invalid sender id"));
        }
        self.db
            .with_tx(move |conn| {
                Box::pin(async move {
                    participants::update_presence(conn, sender_id, Utc::now()).await?;
                    Ok::<_, Error>(())
                })
            })
            .await
    }
}
