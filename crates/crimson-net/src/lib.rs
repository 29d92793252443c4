//! Wire protocol for Crimson: segmented frames over a byte stream, the
//! message schema carried inside them, and the connection transports.
//!
//! A frame is one or more word-aligned segments, length-prefixed with a
//! little-endian segment table. Messages decode zero-copy: payload segments
//! keep ownership of the buffers read off the stream.

pub mod direct;
pub mod frame;
pub mod message;
pub mod socket;

mod connection;

pub use connection::{Connection, Listener, MessageSink, MessageSource};
pub use direct::{direct_pair, DirectDialer, DirectListener};
pub use message::{Message, FLAG_ON_APPLY, FLAG_ON_COMMIT};
pub use socket::{connect, SocketListener};
