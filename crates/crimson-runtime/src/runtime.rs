//! Core identity and cross-core task submission.
//!
//! [`Runtime::new`] spawns one worker thread per core. Each worker runs a
//! tokio current-thread scheduler with a `LocalSet` and drains a task queue;
//! a submitted closure is executed on the target core, where it builds a
//! (possibly `!Send`) future that is polled to completion there. The result
//! travels back to the submitter over a oneshot channel.

use crimson_common::{Error, Result};
use parking_lot::RwLock;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Index of a core in the sharded runtime
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CoreId(u32);

impl CoreId {
    /// Create a core id from its index
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index into per-core vectors
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

thread_local! {
    static CURRENT_CORE: Cell<Option<CoreId>> = const { Cell::new(None) };
}

/// The core the calling thread belongs to, or `None` outside the sharded
/// runtime's worker threads.
#[must_use]
pub fn current_core() -> Option<CoreId> {
    CURRENT_CORE.with(Cell::get)
}

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    senders: RwLock<Option<Vec<mpsc::UnboundedSender<Task>>>>,
    core_count: usize,
}

/// Cloneable handle for submitting work to cores
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    /// Number of cores in the runtime
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.inner.core_count
    }

    /// Iterate over every core id
    pub fn cores(&self) -> impl Iterator<Item = CoreId> {
        (0..self.inner.core_count as u32).map(CoreId::new)
    }

    /// The core the calling thread belongs to, if any
    #[must_use]
    pub fn current_core(&self) -> Option<CoreId> {
        current_core()
    }

    /// Schedule `f` on `core` and await its result.
    ///
    /// `f` runs on the target core's thread, where it builds a future that is
    /// polled there; the future does not have to be `Send`. Fails with
    /// [`Error::Closed`] once the runtime has shut down.
    pub async fn submit_to<F, Fut, T>(&self, core: CoreId, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        if core.index() >= self.inner.core_count {
            return Err(Error::invalid_argument(format!(
                "{core} out of range for {} cores",
                self.inner.core_count
            )));
        }
        let sender = {
            let guard = self.inner.senders.read();
            guard
                .as_ref()
                .and_then(|senders| senders.get(core.index()).cloned())
        };
        let Some(sender) = sender else {
            return Err(Error::Closed);
        };

        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            let fut = f();
            tokio::task::spawn_local(async move {
                let _ = tx.send(fut.await);
            });
        });
        sender.send(task).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Fan a task out to every core and join; the first error wins.
    pub async fn parallel_for_each<F, G, Fut>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(CoreId) -> G,
        G: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let pending: Vec<_> = self
            .cores()
            .map(|core| {
                let task = f(core);
                self.submit_to(core, task)
            })
            .collect();
        for result in futures::future::join_all(pending).await {
            result.and_then(|inner| inner)?;
        }
        Ok(())
    }

    /// Map every core to a partial result and fold the partials.
    ///
    /// `reduce` must be associative; partials are folded in core order.
    pub async fn map_reduce<F, G, Fut, T, R, RF>(
        &self,
        mut map: F,
        init: R,
        mut reduce: RF,
    ) -> Result<R>
    where
        F: FnMut(CoreId) -> G,
        G: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + 'static,
        T: Send + 'static,
        RF: FnMut(R, T) -> R,
    {
        let pending: Vec<_> = self
            .cores()
            .map(|core| {
                let task = map(core);
                self.submit_to(core, task)
            })
            .collect();
        let mut acc = init;
        for result in futures::future::join_all(pending).await {
            acc = reduce(acc, result.and_then(|inner| inner)?);
        }
        Ok(acc)
    }
}

/// The sharded runtime: one cooperative single-threaded scheduler per core
pub struct Runtime {
    handle: Handle,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Runtime {
    /// Spawn `core_count` worker threads and their task queues
    pub fn new(core_count: usize) -> Result<Self> {
        if core_count == 0 {
            return Err(Error::invalid_argument("core_count must be at least 1"));
        }

        let mut senders = Vec::with_capacity(core_count);
        let mut threads = Vec::with_capacity(core_count);
        for index in 0..core_count as u32 {
            let core = CoreId::new(index);
            let rt = tokio::runtime::Builder::new_current_thread().build()?;
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            let thread = thread::Builder::new()
                .name(format!("{core}"))
                .spawn(move || worker_main(core, rt, rx))?;
            threads.push(thread);
        }
        debug!(core_count, "sharded runtime started");

        Ok(Self {
            handle: Handle {
                inner: Arc::new(Inner {
                    senders: RwLock::new(Some(senders)),
                    core_count,
                }),
            },
            threads,
        })
    }

    /// Get a cloneable submission handle
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Stop accepting work and join the worker threads.
    ///
    /// Tasks still queued are abandoned; their submitters observe
    /// [`Error::Closed`].
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.handle.inner.senders.write().take();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn worker_main(core: CoreId, rt: tokio::runtime::Runtime, mut rx: mpsc::UnboundedReceiver<Task>) {
    CURRENT_CORE.with(|current| current.set(Some(core)));
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        while let Some(task) = rx.recv().await {
            task();
        }
    });
}
