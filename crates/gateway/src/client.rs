//! A connected socket client: sender identity plus a bounded outbound queue.

use {
    thiserror::Error,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

use murmur_protocol::OUTBOUND_QUEUE_CAP;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("client closed")]
    Closed,
}

/// Handle owned by the registry for one live connection. The paired
/// receiver feeds the connection's write loop. `send` never blocks: a full
/// queue means the peer is too slow, so the frame is dropped and the client
/// closed rather than stalling a broadcast.
pub struct Client {
    sender_id: String,
    conversation_id: String,
    out: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Client {
    /// Create the handle and the outbound receiver for the write loop.
    pub fn new(
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> (Self, mpsc::Receiver<String>) {
        let (out, rx) = mpsc::channel(OUTBOUND_QUEUE_CAP);
        (
            Self {
                sender_id: sender_id.into(),
                conversation_id: conversation_id.into(),
                out,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Non-blocking enqueue of a serialized frame.
    pub fn send(&self, frame: &str) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        match self.out.try_send(frame.to_string()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    sender_id = %self.sender_id,
                    "outbound queue full, closing slow client"
                );
                self.close();
                Err(SendError::Closed)
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by the connection's read and write loops.
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_enqueues_frames_in_order() {
        let (client, mut rx) = Client::new("s1", "c1");
        client.send("a").unwrap();
        client.send("b").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
    }

    #[test]
    fn send_after_close_reports_closed() {
        let (client, _rx) = Client::new("s1", "c1");
        client.close();
        assert_eq!(client.send("a"), Err(SendError::Closed));
    }

    #[test]
    fn full_queue_drops_the_frame_and_closes() {
        let (client, _rx) = Client::new("s1", "c1");
        for _ in 0..OUTBOUND_QUEUE_CAP {
            client.send("x").unwrap();
        }
        assert_eq!(client.send("overflow"), Err(SendError::Closed));
        assert!(client.is_closed());
    }
}
