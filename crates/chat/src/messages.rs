//! Message ingest (publish + single tick) and commit (sequence + double
//! tick + broadcast) paths.

use std::sync::Arc;

use {
    chrono::{DateTime, Duration, Utc},
    tracing::debug,
    uuid::Uuid,
};

use {
    murmur_protocol::{AckFrame, MessageFrame, MessagePayload},
    murmur_queue::StreamQueue,
    murmur_storage::{Db, messages, types::Message},
};

use crate::{Error, Result};

/// Local delivery capability, injected so the message service never depends
/// on the concrete connection registry.
pub trait RoomSink: Send + Sync {
    /// Deliver a committed message to every room member except its sender.
    fn broadcast(&self, conversation_id: &str, msg: &MessageFrame);
    /// Deliver an ack to one sender's client, silently dropping if absent.
    fn send_ack(&self, sender_id: &str, ack: &AckFrame);
}

pub struct MessageService {
    db: Db,
    queue: Arc<StreamQueue>,
    sink: Arc<dyn RoomSink>,
}

impl MessageService {
    pub fn new(db: Db, queue: Arc<StreamQueue>, sink: Arc<dyn RoomSink>) -> Self {
        Self { db, queue, sink }
    }

    /// Ingest path: stamp and publish the payload to the conversation's
    /// durable stream, then single-tick the sender. A failed publish returns
    /// the error and sends no ack.
    pub async fn accept_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        payload: String,
        client_msg_id: String,
    ) -> Result<MessagePayload> {
        if sender_id.is_nil() || conversation_id.is_nil() {
            return Err(Error::invalid_argument("sender and conversation required"));
        }
        let message_payload = MessagePayload {
            message_id: Uuid::new_v4(),
            client_msg_id,
            conversation_id,
            sender_id,
            payload,
            created_at: Utc::now(),
        };
        let raw = serde_json::to_vec(&message_payload).map_err(Error::transport)?;
        self.queue
            .publish(&conversation_id.to_string(), &raw)
            .await?;

        let ack = AckFrame::server_received(&message_payload.client_msg_id, Utc::now());
        self.sink.send_ack(&sender_id.to_string(), &ack);
        Ok(message_payload)
    }

    /// Commit path: allocate the sequence and insert in one transaction;
    /// after commit, broadcast to the room and double-tick the sender.
    /// Returns the assigned seq.
    ///
    /// Delivery from the stream is at-least-once, so a redelivered payload
    /// whose message id is already committed resolves to the existing seq:
    /// the double tick is re-sent (the prior attempt may have died before
    /// acking) but the room is not broadcast to twice.
    pub async fn save_and_broadcast(&self, payload: &MessagePayload) -> Result<i64> {
        let msg = Message {
            id: payload.message_id,
            conversation_id: payload.conversation_id,
            sender_id: payload.sender_id,
            seq: 0,
            payload: payload.payload.clone(),
            created_at: payload.created_at,
        };
        let (seq, already_committed) = self
            .db
            .with_tx(move |conn| {
                Box::pin(async move {
                    if let Some(seq) = messages::seq_for_id(conn, msg.id).await? {
                        return Ok((seq, true));
                    }
                    let seq = messages::save_with_sequence(conn, &msg).await?;
                    Ok::<_, Error>((seq, false))
                })
            })
            .await?;
        debug!(
            conversation_id = %payload.conversation_id,
            seq,
            already_committed,
            "message committed"
        );

        let conversation_id = payload.conversation_id.to_string();
        let sender_id = payload.sender_id.to_string();
        let ack = AckFrame::persisted(&payload.client_msg_id, seq, Utc::now());
        if !already_committed {
            let out = MessageFrame::new(
                &conversation_id,
                &sender_id,
                seq,
                &payload.payload,
                payload.created_at,
            );
            // Absence of the sender does not prevent the broadcast.
            self.sink.broadcast(&conversation_id, &out);
        }
        self.sink.send_ack(&sender_id, &ack);
        Ok(seq)
    }

    /// Visibility read: messages from max(joined_at, now − 1 min) onward,
    /// in seq order, wrapped in a transaction for read consistency.
    pub async fn messages_since(
        &self,
        conversation_id: Uuid,
        joined_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        if conversation_id.is_nil() {
            return Err(Error::invalid_argument("invalid conversation id"));
        }
        // Fixed one-minute recency bound of the visibility window.
        let recency = Utc::now() - Duration::minutes(1);
        let cutoff = match joined_at {
            Some(joined) if joined > recency => joined,
            _ => recency,
        };
        self.db
            .with_tx(move |conn| {
                Box::pin(async move {
                    messages::visible_since(conn, conversation_id, cutoff)
                        .await
                        .map_err(Error::from)
                })
            })
            .await
    }
}
