//! Bounded-window reply correlation.
//!
//! Each `send` acquires a window permit, registers its sequence with the
//! stages it expects (`ON_APPLY | ON_COMMIT`), writes the request, and
//! resolves once every expected stage has been acknowledged. A background
//! reader loop consumes replies: `ON_APPLY` returns the window permit, and a
//! reply that clears the last expected stage resolves the sender. The server
//! may acknowledge the stages separately or in one combined reply.
//!
//! A failure in the reader loop is parked in a sticky slot and surfaced on
//! the next foreground `send` or `close`.

use bytes::Bytes;
use crimson_common::{Error, Result, WriteClientConfig};
use crimson_net::{Connection, Message, MessageSink, MessageSource, FLAG_ON_APPLY, FLAG_ON_COMMIT};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify, Semaphore};
use tracing::{debug, error, warn};

/// Client issuing ordered write requests at a single target object
pub struct WriteClient {
    object: String,
    sink: tokio::sync::Mutex<Box<dyn MessageSink>>,
    window: Arc<Semaphore>,
    state: Arc<Mutex<Tracker>>,
    drained: Arc<Notify>,
    reader: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct Tracker {
    entries: HashMap<u32, Entry>,
    next_sequence: u32,
    sticky: Option<Error>,
    done: bool,
}

struct Entry {
    /// Stages we still expect to see acknowledged
    expected: u32,
    tx: oneshot::Sender<Result<()>>,
}

impl WriteClient {
    /// Take ownership of a connection and start the reply reader.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        connection: Connection,
        object: impl Into<String>,
        config: &WriteClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (source, sink) = connection.split();
        let window = Arc::new(Semaphore::new(config.max_in_flight));
        let state = Arc::new(Mutex::new(Tracker::default()));
        let drained = Arc::new(Notify::new());
        let reader = tokio::spawn(reader_loop(
            source,
            state.clone(),
            window.clone(),
            drained.clone(),
        ));
        Ok(Self {
            object: object.into(),
            sink: tokio::sync::Mutex::new(sink),
            window,
            state,
            drained,
            reader,
        })
    }

    /// Permits currently available in the send window
    #[must_use]
    pub fn available_window(&self) -> usize {
        self.window.available_permits()
    }

    /// Send a write request for `data` at `offset`, requesting both reply
    /// stages. Resolves once the server has acknowledged them all.
    pub async fn send(&self, offset: u64, data: Bytes) -> Result<()> {
        self.check_sticky()?;

        let permit = self
            .window
            .acquire()
            .await
            .map_err(|_| self.sticky_or_closed())?;
        // the reader loop hands the permit back on ON_APPLY
        permit.forget();
        if let Err(err) = self.check_sticky() {
            self.window.add_permits(1);
            return Err(err);
        }

        // hold the sink while assigning the sequence so wire order matches
        // sequence order
        let mut sink = self.sink.lock().await;
        let (sequence, rx) = {
            let mut state = self.state.lock();
            if state.done {
                drop(state);
                self.window.add_permits(1);
                return Err(self.sticky_or_closed());
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let (tx, rx) = oneshot::channel();
            state.entries.insert(
                sequence,
                Entry {
                    expected: FLAG_ON_APPLY | FLAG_ON_COMMIT,
                    tx,
                },
            );
            (sequence, rx)
        };

        debug!(sequence, offset, length = data.len(), "osd_write");
        let written = sink
            .write_message(Message::OsdWrite {
                sequence,
                object: self.object.clone(),
                offset,
                flags: FLAG_ON_APPLY | FLAG_ON_COMMIT,
                data,
            })
            .await;
        drop(sink);

        if let Err(err) = written {
            // never reached the wire: retract the entry and the permit
            let mut state = self.state.lock();
            state.entries.remove(&sequence);
            let empty = state.entries.is_empty();
            drop(state);
            self.window.add_permits(1);
            if empty {
                self.drained.notify_waiters();
            }
            return Err(err);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.sticky_or_closed()),
        }
    }

    /// Await every pending reply, then close the connection.
    pub async fn close(&self) -> Result<()> {
        self.check_sticky()?;
        loop {
            let mut notified = std::pin::pin!(self.drained.notified());
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if let Some(sticky) = &state.sticky {
                    return Err(sticky.clone());
                }
                if state.entries.is_empty() {
                    break;
                }
            }
            notified.await;
        }
        self.sink.lock().await.close().await
    }

    fn check_sticky(&self) -> Result<()> {
        match &self.state.lock().sticky {
            Some(sticky) => Err(sticky.clone()),
            None => Ok(()),
        }
    }

    fn sticky_or_closed(&self) -> Error {
        self.state.lock().sticky.clone().unwrap_or(Error::Closed)
    }
}

impl Drop for WriteClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Consume replies until end of stream, resolving tracker entries.
async fn reader_loop(
    mut source: Box<dyn MessageSource>,
    state: Arc<Mutex<Tracker>>,
    window: Arc<Semaphore>,
    drained: Arc<Notify>,
) {
    loop {
        match source.read_message().await {
            Ok(Some(message)) => on_reply(message, &state, &window, &drained),
            Ok(None) => break,
            Err(err) => {
                error!(%err, "write client reader failed");
                state.lock().sticky = Some(err);
                break;
            }
        }
    }

    // fail whatever is still pending and wake blocked senders
    let mut tracker = state.lock();
    tracker.done = true;
    for (_, entry) in tracker.entries.drain() {
        drop(entry.tx);
    }
    drop(tracker);
    window.close();
    drained.notify_waiters();
}

fn on_reply(message: Message, state: &Mutex<Tracker>, window: &Semaphore, drained: &Notify) {
    let Message::OsdWriteReply {
        sequence,
        flags,
        error_code,
    } = message
    else {
        warn!(tag = message.tag_name(), "dropping unexpected message");
        return;
    };

    if error_code != 0 {
        error!(sequence, error_code, "osd_write_reply carried an error");
        let err = Error::from_errno(error_code, &format!("osd_write seq {sequence}"));
        let mut tracker = state.lock();
        tracker.sticky = Some(err.clone());
        if let Some(entry) = tracker.entries.remove(&sequence) {
            if entry.expected & FLAG_ON_APPLY != 0 {
                window.add_permits(1);
            }
            let _ = entry.tx.send(Err(err));
        }
        let empty = tracker.entries.is_empty();
        drop(tracker);
        if empty {
            drained.notify_waiters();
        }
        return;
    }

    let mut tracker = state.lock();
    let Some(entry) = tracker.entries.get_mut(&sequence) else {
        drop(tracker);
        warn!(sequence, "dropping reply for unknown sequence");
        return;
    };

    debug!(sequence, flags, "osd_write_reply");
    let delta = entry.expected & flags;
    if delta & FLAG_ON_APPLY != 0 {
        window.add_permits(1);
    }
    entry.expected &= !delta;
    if entry.expected == 0 {
        if let Some(entry) = tracker.entries.remove(&sequence) {
            let _ = entry.tx.send(Ok(()));
        }
        let empty = tracker.entries.is_empty();
        drop(tracker);
        if empty {
            drained.notify_waiters();
        }
    }
}
