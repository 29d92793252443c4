//! Write client for the Crimson wire protocol.
//!
//! A [`WriteClient`] drives sequence-numbered write requests at one object
//! over a connection, keeping at most a configured number of unapplied
//! requests in flight and correlating multi-stage replies back to their
//! senders.

mod write_client;

pub use write_client::WriteClient;
