//! Shard-per-core cooperative runtime
//!
//! Crimson shards every data structure across a fixed set of cores. Each core
//! is a dedicated thread running a single-threaded cooperative scheduler;
//! within a core, tasks interleave only at await points, so core-local state
//! never needs synchronization for correctness. All cross-core access goes
//! through [`Handle::submit_to`].

mod runtime;

pub use runtime::{current_core, CoreId, Handle, Runtime};
