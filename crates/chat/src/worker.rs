//! Per-conversation stream consumer driving the commit path.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use {
    murmur_protocol::MessagePayload,
    murmur_queue::{StreamHandler, StreamQueue},
};

use crate::{Error, Result, messages::MessageService};

/// Consumer loop for one conversation stream. Created by the connection
/// registry when a room gains its first member and cancelled when the room
/// empties.
pub struct ConversationWorker {
    queue: Arc<StreamQueue>,
    messages: Arc<MessageService>,
    group: String,
}

impl ConversationWorker {
    pub fn new(queue: Arc<StreamQueue>, messages: Arc<MessageService>, group: String) -> Self {
        Self {
            queue,
            messages,
            group,
        }
    }

    /// Subscribe to the conversation's stream and process entries until
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken, conversation_id: &str) -> Result<()> {
        info!(conversation_id, group = %self.group, "conversation worker started");
        let processor = EntryProcessor {
            queue: Arc::clone(&self.queue),
            messages: Arc::clone(&self.messages),
            group: self.group.clone(),
        };
        self.queue
            .subscribe(cancel, conversation_id, &self.group, processor)
            .await?;
        info!(conversation_id, "conversation worker stopped");
        Ok(())
    }
}

struct EntryProcessor {
    queue: Arc<StreamQueue>,
    messages: Arc<MessageService>,
    group: String,
}

impl EntryProcessor {
    /// Decode → commit → ack → delete. Decode/commit failures propagate so
    /// the entry stays pending for redelivery; a delete failure is logged
    /// only, since the entry is already acked.
    async fn process(&self, entry_id: i64, raw: &[u8]) -> Result<()> {
        let payload: MessagePayload = serde_json::from_slice(raw).map_err(|e| {
            error!(entry_id, error = %e, "stream entry payload is malformed");
            Error::invalid_argument("malformed stream payload")
        })?;
        self.messages.save_and_broadcast(&payload).await?;

        let conversation_id = payload.conversation_id.to_string();
        self.queue
            .ack(&conversation_id, &self.group, entry_id)
            .await?;
        if let Err(e) = self.queue.delete(&conversation_id, entry_id).await {
            warn!(entry_id, error = %e, "stream entry delete failed after ack");
        }
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for EntryProcessor {
    async fn handle(&self, entry_id: i64, data: &[u8]) -> anyhow::Result<()> {
        self.process(entry_id, data).await.map_err(anyhow::Error::from)
    }
}
