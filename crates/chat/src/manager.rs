//! Top-level orchestration of connect / disconnect / heartbeat / message /
//! history.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    uuid::Uuid,
};

use {
    murmur_presence::PresenceIndex,
    murmur_protocol::ClientFrame,
    murmur_storage::{Db, conversations, types::Message},
};

use crate::{
    Error, Result,
    messages::MessageService,
    session::{Session, SessionService},
};

/// Heartbeat cadence. The fast tick feeds the volatile presence index, the
/// slow tick flushes durable `last_seen_at`.
#[derive(Debug, Clone)]
pub struct HeartbeatTuning {
    pub fast: Duration,
    pub slow: Duration,
    pub online_ttl: Duration,
}

impl Default for HeartbeatTuning {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(30),
            slow: Duration::from_secs(120),
            online_ttl: Duration::from_secs(45),
        }
    }
}

pub struct ManagerService {
    db: Db,
    presence: Arc<PresenceIndex>,
    session: Arc<SessionService>,
    message: Arc<MessageService>,
    heartbeat: HeartbeatTuning,
}

impl ManagerService {
    pub fn new(
        db: Db,
        presence: Arc<PresenceIndex>,
        session: Arc<SessionService>,
        message: Arc<MessageService>,
        heartbeat: HeartbeatTuning,
    ) -> Self {
        Self {
            db,
            presence,
            session,
            message,
            heartbeat,
        }
    }

    /// Resolve identity for a connecting user. Lazily creates the
    /// conversation when the room looks empty, then starts the session and
    /// immediately touches durable presence.
    pub async fn handle_connect(
        &self,
        user_id: &str,
        conv_id: &str,
        force_new: bool,
    ) -> Result<Session> {
        if user_id.is_empty() || conv_id.is_empty() {
            return Err(Error::invalid_argument("invalid connect parameters"));
        }
        let conversation_id = Uuid::parse_str(conv_id)
            .map_err(|_| Error::invalid_argument("invalid conversation id"))?;

        // Lazy-create rule: a conversation row exists iff at least one
        // session has opened it since the room was last empty. The index is
        // keyed by the canonical id, never the raw query-string form.
        if self
            .presence
            .get_online(&conversation_id.to_string())
            .is_empty()
        {
            self.create_conversation(conversation_id).await?;
        }

        let session = self
            .session
            .start_session(user_id, conversation_id, force_new)
            .await?;
        // Immediate durable-presence touch.
        self.session.session_sync(session.sender_id).await?;
        info!(
            conversation_id = %conversation_id,
            sender_id = %session.sender_id,
            is_new = session.is_new_identity,
            "participant connected"
        );
        Ok(session)
    }

    /// Final durable presence flush plus opportunistic room teardown when
    /// the presence index reports the room empty.
    ///
    /// The participant row is left active: the rejoin window runs from this
    /// last flush, so a reconnect inside it gets the same sender id back.
    /// Identities are closed by rotation or by an explicit
    /// [`SessionService::stop_session`], not by dropping the socket.
    /// Teardown failures are logged, never surfaced.
    pub async fn handle_disconnect(&self, sender_id: Uuid, conversation_id: Uuid) -> Result<()> {
        if sender_id.is_nil() || conversation_id.is_nil() {
            return Err(Error::invalid_argument("invalid disconnect parameters"));
        }
        // Anchor the rejoin window at the disconnect instant.
        if let Err(e) = self.session.session_sync(sender_id).await {
            warn!(sender_id = %sender_id, error = %e, "final presence flush failed");
        }

        let conv_key = conversation_id.to_string();
        self.presence.remove(&conv_key, &sender_id.to_string());
        if self.presence.get_online(&conv_key).is_empty() {
            match self
                .delete_conversation_if_abandoned(conversation_id, sender_id)
                .await
            {
                Ok(deleted) => {
                    if deleted {
                        info!(conversation_id = %conversation_id, "empty conversation deleted");
                    }
                },
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "conversation teardown failed");
                },
            }
            self.presence.clear(&conv_key);
        }
        Ok(())
    }

    /// Drive the two presence timers for the lifetime of `cancel`. Each tick
    /// logs and continues on error.
    pub async fn handle_heartbeat(
        &self,
        cancel: CancellationToken,
        sender_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<()> {
        if sender_id.is_nil() || conversation_id.is_nil() {
            return Err(Error::invalid_argument("invalid heartbeat parameters"));
        }
        let conv_key = conversation_id.to_string();
        let sender_key = sender_id.to_string();
        let mut fast = tokio::time::interval(self.heartbeat.fast);
        let mut slow = tokio::time::interval(self.heartbeat.slow);
        // Intervals fire immediately; the connect path already did both
        // touches, so consume the initial ticks.
        fast.tick().await;
        slow.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = fast.tick() => {
                    self.presence
                        .update_online(&conv_key, &sender_key, self.heartbeat.online_ttl);
                },
                _ = slow.tick() => {
                    if let Err(e) = self.session.session_sync(sender_id).await {
                        warn!(sender_id = %sender_id, error = %e, "durable presence flush failed");
                    }
                },
            }
        }
    }

    /// Parse an inbound chat frame and hand it to the ingest path. The
    /// commit is deferred to the conversation worker.
    pub async fn handle_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        raw: &[u8],
    ) -> Result<()> {
        let frame: ClientFrame = serde_json::from_slice(raw)
            .map_err(|e| Error::invalid_argument(format!("malformed chat frame: {e}")))?;
        self.message
            .accept_message(sender_id, conversation_id, frame.payload, frame.client_msg_id)
            .await?;
        Ok(())
    }

    /// History read under the visibility window.
    pub async fn handle_history(
        &self,
        conv_id: &str,
        joined_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        if conv_id.is_empty() {
            return Err(Error::invalid_argument("invalid conversation id"));
        }
        let conversation_id = Uuid::parse_str(conv_id)
            .map_err(|_| Error::invalid_argument("invalid conversation id"))?;
        self.message.messages_since(conversation_id, joined_at).await
    }

    /// When the user holds an active identity in the room, the join bound
    /// for their visibility window.
    pub async fn joined_at_for(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.db.acquire().await?;
        let participant =
            murmur_storage::participants::find_recent(&mut conn, user_id, conversation_id).await?;
        Ok(participant.map(|p| p.joined_at))
    }

    /// Current online sender ids for a room, per the volatile index.
    pub fn online_participants(&self, conversation_id: Uuid) -> Vec<String> {
        self.presence.get_online(&conversation_id.to_string())
    }

    /// Record a heartbeat in the volatile index (used on connect so the
    /// first fast tick is not 30s away).
    pub fn touch_online(&self, conversation_id: Uuid, sender_id: Uuid) {
        self.presence.update_online(
            &conversation_id.to_string(),
            &sender_id.to_string(),
            self.heartbeat.online_ttl,
        );
    }

    async fn create_conversation(&self, conversation_id: Uuid) -> Result<()> {
        self.db
            .with_tx(move |conn| {
                Box::pin(async move {
                    conversations::create(conn, conversation_id, Utc::now()).await?;
                    Ok::<_, Error>(())
                })
            })
            .await
    }

    async fn delete_conversation_if_abandoned(
        &self,
        conversation_id: Uuid,
        departing: Uuid,
    ) -> Result<bool> {
        self.db
            .with_tx(move |conn| {
                Box::pin(async move {
                    let deleted =
                        conversations::delete_if_abandoned(conn, conversation_id, departing)
                            .await?;
                    Ok::<_, Error>(deleted)
                })
            })
            .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::test_support::make_service;

    async fn make_manager() -> (Db, Arc<PresenceIndex>, ManagerService) {
        let (db, _queue, _sink, message) = make_service().await;
        let presence = Arc::new(PresenceIndex::new());
        let session = Arc::new(SessionService::new(
            db.clone(),
            Duration::from_secs(180),
        ));
        let manager = ManagerService::new(
            db.clone(),
            Arc::clone(&presence),
            session,
            Arc::new(message),
            HeartbeatTuning::default(),
        );
        (db, presence, manager)
    }

    #[tokio::test]
    async fn connect_lazily_creates_the_conversation() {
        let (db, _presence, manager) = make_manager().await;
        let conv = Uuid::new_v4();

        let session = manager
            .handle_connect("+15550001", &conv.to_string(), false)
            .await
            .unwrap();
        assert!(session.is_new_identity);

        let mut conn = db.acquire().await.unwrap();
        assert!(conversations::get(&mut conn, conv).await.is_ok());
    }

    #[tokio::test]
    async fn connect_rejects_malformed_ids() {
        let (_db, _presence, manager) = make_manager().await;
        assert!(matches!(
            manager.handle_connect("+15550001", "not-a-uuid", false).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            manager.handle_connect("", "11111111-1111-1111-1111-111111111111", false).await,
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn disconnect_of_last_member_tears_the_room_down() {
        let (db, presence, manager) = make_manager().await;
        let conv = Uuid::new_v4();

        let session = manager
            .handle_connect("+15550001", &conv.to_string(), false)
            .await
            .unwrap();
        manager
            .handle_disconnect(session.sender_id, conv)
            .await
            .unwrap();

        assert!(presence.get_online(&conv.to_string()).is_empty());
        let mut conn = db.acquire().await.unwrap();
        assert!(matches!(
            conversations::get(&mut conn, conv).await,
            Err(murmur_storage::Error::ConversationNotFound)
        ));
    }

    #[tokio::test]
    async fn disconnect_spares_the_room_while_others_are_online() {
        let (db, _presence, manager) = make_manager().await;
        let conv = Uuid::new_v4();

        let alice = manager
            .handle_connect("+15550001", &conv.to_string(), false)
            .await
            .unwrap();
        let bob = manager
            .handle_connect("+15550002", &conv.to_string(), false)
            .await
            .unwrap();
        manager.touch_online(conv, bob.sender_id);

        manager
            .handle_disconnect(alice.sender_id, conv)
            .await
            .unwrap();

        let mut conn = db.acquire().await.unwrap();
        assert!(conversations::get(&mut conn, conv).await.is_ok());
    }

    #[tokio::test]
    async fn reconnect_during_teardown_window_is_not_lost() {
        let (db, _presence, manager) = make_manager().await;
        let conv = Uuid::new_v4();

        let alice = manager
            .handle_connect("+15550001", &conv.to_string(), false)
            .await
            .unwrap();
        // Bob reconnects while alice's disconnect is tearing down: his
        // active participant row makes the conditional delete a no-op.
        let _bob = manager
            .handle_connect("+15550002", &conv.to_string(), false)
            .await
            .unwrap();

        manager
            .handle_disconnect(alice.sender_id, conv)
            .await
            .unwrap();

        let mut conn = db.acquire().await.unwrap();
        assert!(conversations::get(&mut conn, conv).await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_keeps_the_rejoin_window_open() {
        let (_db, _presence, manager) = make_manager().await;
        let conv = Uuid::new_v4();

        let first = manager
            .handle_connect("+15550001", &conv.to_string(), false)
            .await
            .unwrap();
        manager
            .handle_disconnect(first.sender_id, conv)
            .await
            .unwrap();

        // The room was torn down, but a prompt reconnect still resolves to
        // the same sender id and the sequence row keeps counting.
        let second = manager
            .handle_connect("+15550001", &conv.to_string(), false)
            .await
            .unwrap();
        assert_eq!(second.sender_id, first.sender_id);
        assert!(!second.is_new_identity);
    }

    #[tokio::test]
    async fn malformed_chat_frames_are_rejected() {
        let (_db, _presence, manager) = make_manager().await;
        let result = manager
            .handle_message(Uuid::new_v4(), Uuid::new_v4(), b"not json")
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn heartbeat_returns_on_cancellation() {
        let (_db, _presence, manager) = make_manager().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        manager
            .handle_heartbeat(cancel, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
    }
}
