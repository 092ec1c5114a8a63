use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chrono::Utc,
    sqlx::{Row, SqlitePool},
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
    uuid::Uuid,
};

use crate::Result;

/// How long a poll blocks waiting for a wakeup before re-reading.
const READ_BLOCK: Duration = Duration::from_secs(2);

/// Callback invoked for each delivered stream entry. Returning an error
/// leaves the entry in the pending list for redelivery.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, entry_id: i64, data: &[u8]) -> anyhow::Result<()>;
}

/// One delivery handed to the subscribe loop.
struct Delivery {
    entry_id: i64,
    data: Vec<u8>,
    delivery_count: i64,
}

/// Durable per-conversation append-only log with named consumer groups.
///
/// Delivery is at-least-once: an entry is recorded pending before the
/// handler runs and stays there until [`StreamQueue::ack`]. Entries
/// redelivered past `max_deliveries` are parked (logged and dropped) so a
/// poison message cannot wedge its conversation.
pub struct StreamQueue {
    pool: SqlitePool,
    stream_cap: i64,
    max_deliveries: i64,
    /// Process-local publish wakeups per conversation; polling covers
    /// writers in other processes.
    wakeups: std::sync::Mutex<HashMap<String, Arc<Notify>>>,
}

impl StreamQueue {
    /// Wrap an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool, stream_cap: i64, max_deliveries: i64) -> Self {
        Self {
            pool,
            stream_cap,
            max_deliveries,
            wakeups: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn wakeup(&self, conversation_id: &str) -> Arc<Notify> {
        let mut map = match self.wakeups.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(map.entry(conversation_id.to_string()).or_default())
    }

    /// Append an entry to the conversation's stream, trimming past the
    /// approximate cap, and wake local subscribers.
    pub async fn publish(&self, conversation_id: &str, data: &[u8]) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO stream_entries (conversation_id, data, appended_at) VALUES (?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(data)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;
        let entry_id = result.last_insert_rowid();

        // Approximate cap: drop everything older than the newest `stream_cap`
        // entries.
        sqlx::query(
            "DELETE FROM stream_entries
             WHERE conversation_id = ?1
               AND id <= (
                   SELECT id FROM stream_entries
                   WHERE conversation_id = ?1
                   ORDER BY id DESC
                   LIMIT 1 OFFSET ?2
               )",
        )
        .bind(conversation_id)
        .bind(self.stream_cap)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.wakeup(conversation_id).notify_one();
        Ok(entry_id)
    }

    /// Consume the conversation's stream under `group` until `cancel` fires.
    ///
    /// The group is created idempotently; the consumer name is unique per
    /// call. Each poll redelivers this consumer's oldest pending entry
    /// first, then reads the next entry past the group cursor, then blocks
    /// up to 2 s. Handler failures keep the entry pending; transient read
    /// errors are logged and retried without backoff.
    pub async fn subscribe<H: StreamHandler>(
        &self,
        cancel: CancellationToken,
        conversation_id: &str,
        group: &str,
        handler: H,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO stream_groups (conversation_id, group_name, cursor)
             VALUES (?, ?, 0)",
        )
        .bind(conversation_id)
        .bind(group)
        .execute(&self.pool)
        .await?;
        let consumer = Uuid::new_v4().to_string();
        // Adopt whatever a previous consumer left unacked (e.g. a worker
        // cancelled mid-commit) so those entries are redelivered here.
        sqlx::query(
            "UPDATE stream_pending SET consumer = ?
             WHERE conversation_id = ? AND group_name = ?",
        )
        .bind(&consumer)
        .bind(conversation_id)
        .bind(group)
        .execute(&self.pool)
        .await?;
        debug!(conversation_id, group, consumer, "stream subscriber started");

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.next_delivery(conversation_id, group, &consumer).await {
                Ok(Some(delivery)) => {
                    if delivery.delivery_count > self.max_deliveries {
                        error!(
                            conversation_id,
                            group,
                            entry_id = delivery.entry_id,
                            deliveries = delivery.delivery_count - 1,
                            "parking poison stream entry"
                        );
                        if let Err(e) = self.ack(conversation_id, group, delivery.entry_id).await {
                            warn!(error = %e, "failed to ack parked entry");
                        }
                        if let Err(e) = self.delete(conversation_id, delivery.entry_id).await {
                            warn!(error = %e, "failed to delete parked entry");
                        }
                        continue;
                    }
                    if let Err(e) = handler.handle(delivery.entry_id, &delivery.data).await {
                        warn!(
                            conversation_id,
                            entry_id = delivery.entry_id,
                            error = %e,
                            "stream handler failed, entry stays pending"
                        );
                    }
                },
                Ok(None) => {
                    let notify = self.wakeup(conversation_id);
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = notify.notified() => {},
                        _ = tokio::time::sleep(READ_BLOCK) => {},
                    }
                },
                Err(e) => {
                    warn!(conversation_id, group, error = %e, "stream read error, retrying");
                },
            }
        }
    }

    /// Hand out the next entry for `consumer`: a previously failed pending
    /// entry if one exists, otherwise the next new entry past the cursor.
    async fn next_delivery(
        &self,
        conversation_id: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<Delivery>> {
        let mut tx = self.pool.begin().await?;

        // Pending rows whose entry was trimmed away can never be redelivered.
        sqlx::query(
            "DELETE FROM stream_pending
             WHERE conversation_id = ?1 AND group_name = ?2
               AND entry_id NOT IN (
                   SELECT id FROM stream_entries WHERE conversation_id = ?1
               )",
        )
        .bind(conversation_id)
        .bind(group)
        .execute(&mut *tx)
        .await?;

        let pending = sqlx::query(
            "SELECT p.entry_id, p.delivery_count, e.data
             FROM stream_pending p
             JOIN stream_entries e ON e.id = p.entry_id
             WHERE p.conversation_id = ? AND p.group_name = ? AND p.consumer = ?
             ORDER BY p.entry_id ASC
             LIMIT 1",
        )
        .bind(conversation_id)
        .bind(group)
        .bind(consumer)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = pending {
            let entry_id: i64 = row.get("entry_id");
            let delivery_count: i64 = row.get::<i64, _>("delivery_count") + 1;
            sqlx::query(
                "UPDATE stream_pending
                 SET delivery_count = ?, delivered_at = ?
                 WHERE conversation_id = ? AND group_name = ? AND entry_id = ?",
            )
            .bind(delivery_count)
            .bind(Utc::now().timestamp_millis())
            .bind(conversation_id)
            .bind(group)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(Some(Delivery {
                entry_id,
                data: row.get("data"),
                delivery_count,
            }));
        }

        let next = sqlx::query(
            "SELECT e.id, e.data
             FROM stream_entries e
             WHERE e.conversation_id = ?1
               AND e.id > (SELECT cursor FROM stream_groups
                           WHERE conversation_id = ?1 AND group_name = ?2)
             ORDER BY e.id ASC
             LIMIT 1",
        )
        .bind(conversation_id)
        .bind(group)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = next else {
            tx.commit().await?;
            return Ok(None);
        };
        let entry_id: i64 = row.get("id");
        sqlx::query(
            "UPDATE stream_groups SET cursor = ? WHERE conversation_id = ? AND group_name = ?",
        )
        .bind(entry_id)
        .bind(conversation_id)
        .bind(group)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO stream_pending
                 (conversation_id, group_name, entry_id, consumer, delivery_count, delivered_at)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(conversation_id)
        .bind(group)
        .bind(entry_id)
        .bind(consumer)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(Delivery {
            entry_id,
            data: row.get("data"),
            delivery_count: 1,
        }))
    }

    /// Remove an entry from the group's pending list.
    pub async fn ack(&self, conversation_id: &str, group: &str, entry_id: i64) -> Result<()> {
        sqlx::query(
            "DELETE FROM stream_pending
             WHERE conversation_id = ? AND group_name = ? AND entry_id = ?",
        )
        .bind(conversation_id)
        .bind(group)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard-remove an entry from the stream.
    pub async fn delete(&self, conversation_id: &str, entry_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM stream_entries WHERE conversation_id = ? AND id = ?")
            .bind(conversation_id)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop the whole stream: entries, pending rows and groups.
    pub async fn delete_stream(&self, conversation_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM stream_entries WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stream_pending WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stream_groups WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Entries currently stored for a conversation.
    pub async fn len(&self, conversation_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stream_entries WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn is_empty(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.len(conversation_id).await? == 0)
    }
}
