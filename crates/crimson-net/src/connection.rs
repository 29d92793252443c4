//! Connection seam: message-oriented read/write over some byte transport.
//!
//! A connection pairs a read half and a write half. Connections are
//! single-ownership; splitting hands the halves to different owners (the
//! write client runs its reader loop on one while sending on the other).

use crate::message::Message;
use async_trait::async_trait;
use crimson_common::Result;

/// The read half of a connection
#[async_trait]
pub trait MessageSource: Send {
    /// Await one full message. `None` means the peer closed the stream;
    /// a stream that dies mid-message is a protocol error.
    async fn read_message(&mut self) -> Result<Option<Message>>;
}

/// The write half of a connection
#[async_trait]
pub trait MessageSink: Send {
    /// Serialize and flush one message. Writes resolve in submission order.
    async fn write_message(&mut self, message: Message) -> Result<()>;

    /// Close the output stream; previously queued writes resolve or fail
    /// before this completes.
    async fn close(&mut self) -> Result<()>;
}

/// A bidirectional message connection
pub struct Connection {
    source: Box<dyn MessageSource>,
    sink: Box<dyn MessageSink>,
    peer: String,
}

impl Connection {
    /// Assemble a connection from transport halves
    pub fn new(
        source: Box<dyn MessageSource>,
        sink: Box<dyn MessageSink>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sink,
            peer: peer.into(),
        }
    }

    /// Description of the peer endpoint, for logging
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Await one full message from the peer
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        self.source.read_message().await
    }

    /// Serialize and flush one message to the peer
    pub async fn write_message(&mut self, message: Message) -> Result<()> {
        self.sink.write_message(message).await
    }

    /// Close the write side
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }

    /// Break the connection into its independently owned halves
    #[must_use]
    pub fn split(self) -> (Box<dyn MessageSource>, Box<dyn MessageSink>) {
        (self.source, self.sink)
    }
}

/// Acceptor yielding one connection per peer
#[async_trait]
pub trait Listener: Send {
    /// Await the next incoming connection
    async fn accept(&mut self) -> Result<Connection>;

    /// Stop accepting; outstanding accepts fail with `Closed`.
    async fn close(&mut self) -> Result<()>;
}
