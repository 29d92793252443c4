//! TCP transport for the frame protocol.

use crate::connection::{Connection, Listener, MessageSink, MessageSource};
use crate::frame;
use crate::message::Message;
use async_trait::async_trait;
use crimson_common::{Error, Result};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

struct SocketSource {
    input: BufReader<OwnedReadHalf>,
}

#[async_trait]
impl MessageSource for SocketSource {
    async fn read_message(&mut self) -> Result<Option<Message>> {
        match frame::read_frame(&mut self.input).await? {
            Some(segments) => Ok(Some(Message::decode(segments)?)),
            None => Ok(None),
        }
    }
}

struct SocketSink {
    output: BufWriter<OwnedWriteHalf>,
}

#[async_trait]
impl MessageSink for SocketSink {
    async fn write_message(&mut self, message: Message) -> Result<()> {
        frame::write_frame(&mut self.output, &message.encode()).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.output.flush().await?;
        self.output.shutdown().await?;
        Ok(())
    }
}

fn wrap(stream: TcpStream, peer: impl Into<String>) -> Connection {
    // latency matters more than throughput for small framed messages
    let _ = stream.set_nodelay(true);
    let (read, write) = stream.into_split();
    Connection::new(
        Box::new(SocketSource {
            input: BufReader::new(read),
        }),
        Box::new(SocketSink {
            output: BufWriter::new(write),
        }),
        peer,
    )
}

/// Dial a remote endpoint
pub async fn connect(addr: impl ToSocketAddrs) -> Result<Connection> {
    let stream = TcpStream::connect(addr).await?;
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(%peer, "connected");
    Ok(wrap(stream, peer))
}

/// TCP listener yielding one connection per accepted socket
pub struct SocketListener {
    listener: Option<TcpListener>,
}

impl SocketListener {
    /// Bind a listening socket
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener: Some(listener),
        })
    }

    /// The bound local address
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(Error::Closed),
        }
    }
}

#[async_trait]
impl Listener for SocketListener {
    async fn accept(&mut self) -> Result<Connection> {
        let Some(listener) = &self.listener else {
            return Err(Error::Closed);
        };
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");
        Ok(wrap(stream, peer.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.listener.take();
        Ok(())
    }
}
