//! Reactive Primitives
//!
//! This module implements the core reactive system: data cells,
//! computations, clocks and owners. These primitives form the public
//! surface of Cascade.
//!
//! # Concepts
//!
//! ## Data cells
//!
//! A data cell is a container for mutable state. When a cell is read inside
//! a computation, the computation records it as a dependency. When the
//! cell's value changes, every dependent computation re-runs, once, after
//! all of its own changed inputs have settled.
//!
//! ## Computations
//!
//! A computation is a derived value that caches its result. It re-runs only
//! when something it read in its latest run changes. Computations are also
//! where side effects live: a computation that returns `()` is an effect.
//!
//! ## Clocks
//!
//! Writes are grouped into batches. Inside a batch every reader sees the
//! values from before the batch; the batch then applies all writes at once
//! and propagates them in ticks. Subclocks give a group of nodes their own
//! ticks, so the group can iterate to a fixpoint before anyone outside
//! observes its results.
//!
//! ## Owners
//!
//! Computations created while another runs are owned by it and disposed
//! when it re-runs or is disposed. `root` opens an owner outside of any
//! computation.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local context stack to detect
//! dependencies and owners, and a thread-local runtime holding the graph.
//! All handles are `!Send`: a reactive graph belongs to one thread.

mod clock;
mod computation;
mod context;
mod data;
mod owner;
mod runtime;

pub use clock::{subclock, Clock};
pub use computation::{computation, computation_with, on, on_changes, sample, Computation, Track};
pub use context::ReactiveContext;
pub use data::{data, value, DataCell, Value};
pub use owner::{cleanup, dispose, pin, root, Dispose, Disposer};
pub use runtime::{config, configure, stats};

use crate::error::Result;

/// Run `f` as a single batch.
///
/// Writes made inside `f` are staged: reads in `f` still see the old
/// values. When `f` returns, all writes apply at once and propagate before
/// `batch` returns. If `f` fails, its staged writes are discarded and the
/// error is returned.
///
/// Nested calls join the enclosing batch.
pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    runtime::batch(f)
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    runtime::is_batching()
}

/// Whether reads are currently recorded as dependencies.
pub fn is_listening() -> bool {
    ReactiveContext::is_listening()
}
