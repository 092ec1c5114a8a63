#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end engine tests: ingest → durable stream → worker → commit →
//! fan-out, against an in-memory database.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {tokio_util::sync::CancellationToken, uuid::Uuid};

use {
    murmur_chat::{
        ConversationWorker, HeartbeatTuning, ManagerService, MessageService, RoomSink,
        SessionService,
    },
    murmur_presence::PresenceIndex,
    murmur_protocol::{AckFrame, AckStatus, MessageFrame},
    murmur_queue::StreamQueue,
    murmur_storage::Db,
};

#[derive(Default)]
struct RecordingSink {
    broadcasts: Mutex<Vec<(String, MessageFrame)>>,
    acks: Mutex<Vec<(String, AckFrame)>>,
}

impl RoomSink for RecordingSink {
    fn broadcast(&self, conversation_id: &str, msg: &MessageFrame) {
        self.broadcasts
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), msg.clone()));
    }

    fn send_ack(&self, sender_id: &str, ack: &AckFrame) {
        self.acks
            .lock()
            .unwrap()
            .push((sender_id.to_string(), ack.clone()));
    }
}

struct Engine {
    db: Db,
    queue: Arc<StreamQueue>,
    sink: Arc<RecordingSink>,
    manager: Arc<ManagerService>,
    worker: Arc<ConversationWorker>,
}

async fn make_engine() -> Engine {
    let db = Db::connect("sqlite::memory:", 1).await.unwrap();
    murmur_queue::run_migrations(db.pool()).await.unwrap();
    let queue = Arc::new(StreamQueue::with_pool(db.pool().clone(), 1000, 5));
    let sink = Arc::new(RecordingSink::default());
    let presence = Arc::new(PresenceIndex::new());
    let session = Arc::new(SessionService::new(db.clone(), Duration::from_secs(180)));
    let message = Arc::new(MessageService::new(
        db.clone(),
        Arc::clone(&queue),
        Arc::clone(&sink) as Arc<dyn RoomSink>,
    ));
    let manager = Arc::new(ManagerService::new(
        db.clone(),
        presence,
        session,
        Arc::clone(&message),
        HeartbeatTuning::default(),
    ));
    let worker = Arc::new(ConversationWorker::new(
        Arc::clone(&queue),
        message,
        "conversation-workers".into(),
    ));
    Engine {
        db,
        queue,
        sink,
        manager,
        worker,
    }
}

fn spawn_worker(engine: &Engine, conv: Uuid) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let worker = Arc::clone(&engine.worker);
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        worker
            .run(task_cancel, &conv.to_string())
            .await
            .unwrap();
    });
    (cancel, handle)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn fresh_join_gets_both_ticks_and_seq_one() {
    let engine = make_engine().await;
    let conv = Uuid::new_v4();

    let session = engine
        .manager
        .handle_connect("+15550001", &conv.to_string(), false)
        .await
        .unwrap();
    assert!(session.is_new_identity);

    let (cancel, handle) = spawn_worker(&engine, conv);
    engine
        .manager
        .handle_message(
            session.sender_id,
            conv,
            br#"{"client_msg_id":"m1","payload":"hi"}"#,
        )
        .await
        .unwrap();

    let sink = Arc::clone(&engine.sink);
    wait_until(move || {
        sink.acks
            .lock()
            .unwrap()
            .iter()
            .any(|(_, ack)| ack.status == AckStatus::Persisted)
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    // The single tick is not ordered with respect to the double tick, so
    // assert on the set: exactly one of each, both addressed to the sender.
    let acks = engine.sink.acks.lock().unwrap();
    assert_eq!(acks.len(), 2);
    let single: Vec<_> = acks
        .iter()
        .filter(|(_, ack)| ack.status == AckStatus::ServerReceived)
        .collect();
    let double: Vec<_> = acks
        .iter()
        .filter(|(_, ack)| ack.status == AckStatus::Persisted)
        .collect();
    assert_eq!(single.len(), 1);
    assert_eq!(double.len(), 1);
    assert_eq!(double[0].1.seq, Some(1));
    assert!(acks.iter().all(|(to, _)| *to == session.sender_id.to_string()));

    // Entry deleted iff committed.
    assert!(engine.queue.is_empty(&conv.to_string()).await.unwrap());
}

#[tokio::test]
async fn concurrent_senders_get_gapless_sequences() {
    let engine = make_engine().await;
    let conv = Uuid::new_v4();

    let alice = engine
        .manager
        .handle_connect("+15550001", &conv.to_string(), false)
        .await
        .unwrap();
    let bob = engine
        .manager
        .handle_connect("+15550002", &conv.to_string(), false)
        .await
        .unwrap();

    let (cancel, handle) = spawn_worker(&engine, conv);

    const PER_SENDER: usize = 25;
    let mut tasks = Vec::new();
    for sender in [alice.sender_id, bob.sender_id] {
        let manager = Arc::clone(&engine.manager);
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                let frame = format!(
                    r#"{{"client_msg_id":"{sender}-{i}","payload":"msg {i}"}}"#
                );
                manager
                    .handle_message(sender, conv, frame.as_bytes())
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let sink = Arc::clone(&engine.sink);
    wait_until(move || {
        sink.acks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, ack)| ack.status == AckStatus::Persisted)
            .count()
            == PER_SENDER * 2
    })
    .await;
    cancel.cancel();
    handle.await.unwrap();

    let mut conn = engine.db.acquire().await.unwrap();
    let mut seqs: Vec<i64> =
        sqlx::query_scalar("SELECT seq FROM messages WHERE conversation_id = ?")
            .bind(conv.to_string())
            .fetch_all(&mut *conn)
            .await
            .unwrap();
    seqs.sort_unstable();
    let expected: Vec<i64> = (1..=(PER_SENDER as i64 * 2)).collect();
    assert_eq!(seqs, expected);

    // Every broadcast carries the conversation and a committed seq.
    let broadcasts = engine.sink.broadcasts.lock().unwrap();
    assert_eq!(broadcasts.len(), PER_SENDER * 2);
    assert!(broadcasts.iter().all(|(c, _)| *c == conv.to_string()));
}

#[tokio::test]
async fn poison_entries_do_not_wedge_the_worker() {
    let engine = make_engine().await;
    let conv = Uuid::new_v4();

    let session = engine
        .manager
        .handle_connect("+15550001", &conv.to_string(), false)
        .await
        .unwrap();

    // A raw garbage entry lands on the stream ahead of a real message.
    engine
        .queue
        .publish(&conv.to_string(), b"definitely not json")
        .await
        .unwrap();

    let (cancel, handle) = spawn_worker(&engine, conv);
    engine
        .manager
        .handle_message(
            session.sender_id,
            conv,
            br#"{"client_msg_id":"m1","payload":"hi"}"#,
        )
        .await
        .unwrap();

    let sink = Arc::clone(&engine.sink);
    wait_until(move || {
        sink.acks
            .lock()
            .unwrap()
            .iter()
            .any(|(_, ack)| ack.status == AckStatus::Persisted)
    })
    .await;

    // The poison entry is eventually parked and the stream drains.
    let queue = Arc::clone(&engine.queue);
    let conv_key = conv.to_string();
    tokio::time::timeout(Duration::from_secs(10), async move {
        loop {
            if queue.is_empty(&conv_key).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    handle.await.unwrap();
}
