//! In-process pair transport.
//!
//! Two connection handles reference each other: writing on one enqueues the
//! message directly into the other's read queue, passing buffer ownership
//! with no serialization. Closing either side delivers end-of-stream to the
//! peer's outstanding and future reads.

use crate::connection::{Connection, Listener, MessageSink, MessageSource};
use crate::message::Message;
use async_trait::async_trait;
use crimson_common::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

struct DirectSource {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl MessageSource for DirectSource {
    async fn read_message(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }
}

struct DirectSink {
    tx: Option<mpsc::UnboundedSender<Message>>,
}

#[async_trait]
impl MessageSink for DirectSink {
    async fn write_message(&mut self, message: Message) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(message).map_err(|_| Error::Closed),
            None => Err(Error::Closed),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

/// Create a connected pair of in-process endpoints
#[must_use]
pub fn direct_pair() -> (Connection, Connection) {
    let (a_to_b, b_from_a) = mpsc::unbounded_channel();
    let (b_to_a, a_from_b) = mpsc::unbounded_channel();
    let a = Connection::new(
        Box::new(DirectSource { rx: a_from_b }),
        Box::new(DirectSink { tx: Some(a_to_b) }),
        "direct",
    );
    let b = Connection::new(
        Box::new(DirectSource { rx: b_from_a }),
        Box::new(DirectSink { tx: Some(b_to_a) }),
        "direct",
    );
    (a, b)
}

/// Rendezvous listener for in-process dialers
#[derive(Default)]
pub struct DirectListener {
    state: Arc<Mutex<ListenerState>>,
}

#[derive(Default)]
struct ListenerState {
    pending: Option<oneshot::Sender<Connection>>,
    closed: bool,
}

impl DirectListener {
    /// Create an idle listener
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for in-process dialers
    #[must_use]
    pub fn dialer(&self) -> DirectDialer {
        DirectDialer {
            state: self.state.clone(),
        }
    }
}

/// Dialing end of a [`DirectListener`]
#[derive(Clone)]
pub struct DirectDialer {
    state: Arc<Mutex<ListenerState>>,
}

impl DirectDialer {
    /// Dial the listener: pairs with a waiting `accept`.
    pub async fn connect(&self) -> Result<Connection> {
        let waiter = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            state.pending.take()
        };
        let Some(waiter) = waiter else {
            return Err(Error::invalid_argument("connection refused"));
        };
        let (ours, theirs) = direct_pair();
        waiter.send(theirs).map_err(|_| Error::Closed)?;
        Ok(ours)
    }
}

#[async_trait]
impl Listener for DirectListener {
    async fn accept(&mut self) -> Result<Connection> {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            if state.pending.is_some() {
                return Err(Error::invalid_argument("address in use"));
            }
            let (tx, rx) = oneshot::channel();
            state.pending = Some(tx);
            rx
        };
        rx.await.map_err(|_| Error::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ping(sequence: u32) -> Message {
        Message::OsdWrite {
            sequence,
            object: "o".to_string(),
            offset: 0,
            flags: crate::FLAG_ON_APPLY,
            data: Bytes::from_static(b"ping"),
        }
    }

    #[tokio::test]
    async fn test_pair_passes_messages_both_ways() {
        let (mut a, mut b) = direct_pair();
        a.write_message(ping(1)).await.unwrap();
        assert_eq!(b.read_message().await.unwrap().unwrap().sequence(), 1);

        b.write_message(ping(2)).await.unwrap();
        assert_eq!(a.read_message().await.unwrap().unwrap().sequence(), 2);
    }

    #[tokio::test]
    async fn test_close_delivers_eof_to_peer() {
        let (mut a, mut b) = direct_pair();
        a.write_message(ping(1)).await.unwrap();
        a.close().await.unwrap();

        // queued message first, then end of stream
        assert!(b.read_message().await.unwrap().is_some());
        assert!(b.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_read() {
        let (a, mut b) = direct_pair();
        let reader = tokio::spawn(async move { b.read_message().await });
        tokio::task::yield_now().await;

        let mut a = a;
        a.close().await.unwrap();
        assert!(reader.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut a, b) = direct_pair();
        a.close().await.unwrap();
        assert!(matches!(a.write_message(ping(1)).await, Err(Error::Closed)));
        drop(b);
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_fails() {
        let (mut a, b) = direct_pair();
        drop(b);
        assert!(matches!(a.write_message(ping(1)).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_listener_rendezvous() {
        let mut listener = DirectListener::new();
        let dialer = listener.dialer();

        // no accept pending yet
        assert!(matches!(
            dialer.connect().await,
            Err(Error::InvalidArgument(_))
        ));

        let accept = tokio::spawn(async move { listener.accept().await });
        tokio::task::yield_now().await;

        let mut client = dialer.connect().await.unwrap();
        let mut server = accept.await.unwrap().unwrap();

        client.write_message(ping(5)).await.unwrap();
        assert_eq!(server.read_message().await.unwrap().unwrap().sequence(), 5);
    }

    #[tokio::test]
    async fn test_listener_close_fails_pending_accept() {
        let mut listener = DirectListener::new();
        let dialer = listener.dialer();
        let mut closer = DirectListener {
            state: listener.state.clone(),
        };

        let accept = tokio::spawn(async move { listener.accept().await });
        tokio::task::yield_now().await;

        closer.close().await.unwrap();
        assert!(matches!(accept.await.unwrap(), Err(Error::Closed)));
        assert!(matches!(dialer.connect().await, Err(Error::Closed)));
    }
}
