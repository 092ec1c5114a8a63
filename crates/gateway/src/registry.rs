//! Process-local connection registry.
//!
//! Owns the live client handles, the per-room membership maps, and the
//! lifecycle of conversation workers: the first member of a room spawns its
//! worker, the last one out cancels it. Injected everywhere it is needed,
//! never a true global.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use {
    futures::future::BoxFuture,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use murmur_protocol::{AckFrame, MessageFrame, PresenceFrame};

use crate::client::Client;

/// Factory driving one conversation's worker loop until cancellation. Set
/// once after construction, which breaks the registry ↔ worker ↔ message
/// service construction cycle.
pub type WorkerFn =
    Arc<dyn Fn(CancellationToken, String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Inner {
    /// sender id → client (one connection per sender id).
    clients: HashMap<String, Arc<Client>>,
    /// conversation → (sender id → client).
    rooms: HashMap<String, HashMap<String, Arc<Client>>>,
    /// conversation → worker cancellation handle.
    workers: HashMap<String, CancellationToken>,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
    run_worker: OnceLock<WorkerFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject the worker factory. Later calls are ignored.
    pub fn set_worker(&self, run_worker: WorkerFn) {
        let _ = self.run_worker.set(run_worker);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a client into both maps; the first client in a room spawns the
    /// conversation worker. A stale connection for the same sender id is
    /// closed and replaced.
    pub fn register(&self, client: Arc<Client>) {
        let conversation_id = client.conversation_id().to_string();
        let sender_id = client.sender_id().to_string();
        let mut inner = self.write();

        let room = inner.rooms.entry(conversation_id.clone()).or_default();
        let first_in_room = room.is_empty();
        if let Some(stale) = room.insert(sender_id.clone(), Arc::clone(&client)) {
            stale.close();
        }
        if let Some(stale) = inner.clients.insert(sender_id, Arc::clone(&client)) {
            stale.close();
        }

        if first_in_room {
            match self.run_worker.get() {
                Some(run_worker) => {
                    let cancel = CancellationToken::new();
                    inner
                        .workers
                        .insert(conversation_id.clone(), cancel.clone());
                    let run_worker = Arc::clone(run_worker);
                    tokio::spawn(async move {
                        run_worker(cancel, conversation_id).await;
                    });
                },
                None => warn!(conversation_id, "no worker factory injected"),
            }
        }
    }

    /// Remove a client; the last one out of a room cancels its worker. A
    /// client that was already replaced by a newer connection for the same
    /// sender id is left alone.
    pub fn unregister(&self, client: &Arc<Client>) {
        let conversation_id = client.conversation_id();
        let sender_id = client.sender_id();
        let mut inner = self.write();

        if let Some(room) = inner.rooms.get_mut(conversation_id) {
            if room
                .get(sender_id)
                .is_some_and(|current| Arc::ptr_eq(current, client))
            {
                room.remove(sender_id);
            }
            if room.is_empty() {
                inner.rooms.remove(conversation_id);
                if let Some(cancel) = inner.workers.remove(conversation_id) {
                    cancel.cancel();
                    debug!(conversation_id, "conversation worker cancelled");
                }
            }
        }
        if inner
            .clients
            .get(sender_id)
            .is_some_and(|current| Arc::ptr_eq(current, client))
        {
            inner.clients.remove(sender_id);
        }
    }

    /// Serialize once and deliver to every room member except the sender.
    pub fn broadcast(&self, conversation_id: &str, msg: &MessageFrame) {
        let frame = match serde_json::to_string(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast frame");
                return;
            },
        };
        let recipients: Vec<Arc<Client>> = {
            let inner = self.read();
            inner
                .rooms
                .get(conversation_id)
                .map(|room| {
                    room.iter()
                        .filter(|(sender_id, _)| sender_id.as_str() != msg.sender_id)
                        .map(|(_, client)| Arc::clone(client))
                        .collect()
                })
                .unwrap_or_default()
        };
        for client in recipients {
            let _ = client.send(&frame);
        }
    }

    /// Unicast an ack; silently dropped when the sender has no local client.
    pub fn send_ack(&self, sender_id: &str, ack: &AckFrame) {
        let frame = match serde_json::to_string(ack) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to serialize ack frame");
                return;
            },
        };
        let client = {
            let inner = self.read();
            inner.clients.get(sender_id).cloned()
        };
        if let Some(client) = client {
            let _ = client.send(&frame);
        }
    }

    /// Push a presence frame to every member of a room.
    pub fn send_presence(&self, conversation_id: &str, frame: &PresenceFrame) {
        let frame = match serde_json::to_string(frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to serialize presence frame");
                return;
            },
        };
        let recipients: Vec<Arc<Client>> = {
            let inner = self.read();
            inner
                .rooms
                .get(conversation_id)
                .map(|room| room.values().cloned().collect())
                .unwrap_or_default()
        };
        for client in recipients {
            let _ = client.send(&frame);
        }
    }

    pub fn room_size(&self, conversation_id: &str) -> usize {
        self.read()
            .rooms
            .get(conversation_id)
            .map_or(0, HashMap::len)
    }

    pub fn has_worker(&self, conversation_id: &str) -> bool {
        self.read().workers.contains_key(conversation_id)
    }
}

/// The registry is the concrete local delivery capability behind the
/// message service.
impl murmur_chat::RoomSink for Registry {
    fn broadcast(&self, conversation_id: &str, msg: &MessageFrame) {
        Registry::broadcast(self, conversation_id, msg);
    }

    fn send_ack(&self, sender_id: &str, ack: &AckFrame) {
        Registry::send_ack(self, sender_id, ack);
    }
}
