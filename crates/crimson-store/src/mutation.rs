//! Per-object mutation ordering.
//!
//! Every write-class operation registers a token in the object's mutation
//! queue when it begins and resolves it when it completes. A commit registers
//! a barrier token whose signal fires once every earlier token has resolved;
//! mutations issued after the commit do not hold it back.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Default)]
pub(crate) struct MutationQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<Entry>,
    next_id: u64,
}

struct Entry {
    id: u64,
    state: EntryState,
}

enum EntryState {
    Pending,
    Done,
    Commit(oneshot::Sender<()>),
}

impl MutationQueue {
    /// Register an in-progress mutation; the returned guard resolves the
    /// token when dropped.
    pub(crate) fn register(self: &Arc<Self>) -> MutationGuard {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push_back(Entry {
                id,
                state: EntryState::Pending,
            });
            id
        };
        MutationGuard {
            queue: self.clone(),
            id,
        }
    }

    /// Register a commit barrier. The receiver fires once every mutation
    /// registered before this call has resolved.
    pub(crate) fn register_commit(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push_back(Entry {
            id,
            state: EntryState::Commit(tx),
        });
        inner.drain_head();
        rx
    }

    fn resolve(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().find(|entry| entry.id == id) {
            entry.state = EntryState::Done;
        }
        inner.drain_head();
    }
}

impl QueueInner {
    /// Pop resolved tokens off the head, firing any commit token that
    /// reaches it.
    fn drain_head(&mut self) {
        while let Some(entry) = self.entries.front() {
            match entry.state {
                EntryState::Pending => break,
                EntryState::Done => {
                    self.entries.pop_front();
                }
                EntryState::Commit(_) => {
                    if let Some(Entry {
                        state: EntryState::Commit(tx),
                        ..
                    }) = self.entries.pop_front()
                    {
                        let _ = tx.send(());
                    }
                }
            }
        }
    }
}

/// RAII token for an in-progress mutation
pub(crate) struct MutationGuard {
    queue: Arc<MutationQueue>,
    id: u64,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.queue.resolve(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_on_empty_queue_fires_immediately() {
        let queue = Arc::new(MutationQueue::default());
        let mut rx = queue.register_commit();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_commit_waits_for_prior_mutations() {
        let queue = Arc::new(MutationQueue::default());
        let first = queue.register();
        let second = queue.register();
        let mut rx = queue.register_commit();

        drop(second);
        assert!(rx.try_recv().is_err());

        drop(first);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_later_mutations_do_not_block_commit() {
        let queue = Arc::new(MutationQueue::default());
        let before = queue.register();
        let mut rx = queue.register_commit();
        let _after = queue.register();

        drop(before);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_out_of_order_resolution() {
        let queue = Arc::new(MutationQueue::default());
        let first = queue.register();
        let second = queue.register();
        let third = queue.register();
        let mut rx = queue.register_commit();

        drop(third);
        drop(first);
        assert!(rx.try_recv().is_err());
        drop(second);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_stacked_commits_fire_together() {
        let queue = Arc::new(MutationQueue::default());
        let pending = queue.register();
        let mut first_commit = queue.register_commit();
        let mut second_commit = queue.register_commit();

        drop(pending);
        assert!(first_commit.try_recv().is_ok());
        assert!(second_commit.try_recv().is_ok());
    }
}
