//! Sharded in-memory object store
//!
//! A [`Store`] manages named collections of named objects. Object bytes live
//! in copy-on-write pages partitioned across cores; each object additionally
//! carries two ordered attribute namespaces and an opaque header blob. Every
//! component is owned by a home core selected by hashing its name, and every
//! public operation either runs on that core or forwards itself there.

mod attr;
mod collection;
mod compound;
mod iovec;
mod mutation;
mod object;
mod page;
mod pageset;
mod store;

pub use attr::AttrCursor;
pub use collection::Collection;
pub use compound::{Compound, Op, Sequencer};
pub use iovec::Iovec;
pub use object::Object;
pub use store::Store;

use crimson_common::Result;
use crimson_runtime::{CoreId, Handle};
use std::future::Future;
use xxhash_rust::xxh64::xxh64;

/// Home core for a name: `xxh64(name) mod core_count`.
///
/// The same formula places collections in the store, objects in a
/// collection, and decides where a collection's per-core object shards live,
/// so external schedulers can pre-hash without asking us.
#[must_use]
pub fn core_for(name: &[u8], core_count: usize) -> CoreId {
    CoreId::new((xxh64(name, 0) % core_count as u64) as u32)
}

/// Home-core trampoline: run `f` locally when the caller is already on
/// `core`, otherwise forward it there.
pub(crate) async fn run_on<T, F, Fut>(runtime: &Handle, core: CoreId, f: F) -> Result<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + 'static,
    T: Send + 'static,
{
    if runtime.current_core() == Some(core) {
        f().await
    } else {
        runtime.submit_to(core, f).await?
    }
}
