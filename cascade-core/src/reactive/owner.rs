//! Ownership
//!
//! Every computation created while another one runs is owned by it. The
//! owner tree decides lifetimes: when an owner re-runs, the children of its
//! previous run are disposed; when an owner is disposed, its whole subtree
//! goes with it, cleanups included.
//!
//! `root` provides an owner outside of any computation, so that top-level
//! computations can be disposed as a group.

use crate::error::Result;
use crate::graph::NodeId;

use super::computation::Computation;
use super::context::{self, ContextGuard};
use super::runtime;

/// Disposes the owner created by [`root`].
#[derive(Debug, Clone, Copy)]
pub struct Disposer {
    id: NodeId,
}

impl Disposer {
    /// Dispose every computation created inside the root.
    ///
    /// # Errors
    ///
    /// Any error raised while propagating writes made by cleanups.
    pub fn dispose(&self) -> Result<()> {
        runtime::dispose(self.id)
    }
}

/// Something that can be disposed through [`dispose`].
pub trait Dispose {
    fn dispose_node(&self) -> Result<()>;
}

impl Dispose for Disposer {
    fn dispose_node(&self) -> Result<()> {
        self.dispose()
    }
}

impl<T: Clone + 'static> Dispose for Computation<T> {
    fn dispose_node(&self) -> Result<()> {
        Computation::dispose(self)
    }
}

/// Run `f` inside a new owner, returning what `f` returns.
///
/// Computations created in `f` are owned by the root and live until the
/// [`Disposer`] passed to `f` is used, even if `f` is nested in another
/// computation's run. The root is not owned by that computation.
pub fn root<R>(f: impl FnOnce(Disposer) -> R) -> R {
    runtime::with_root(|id| f(Disposer { id }))
}

/// Register `f` to run when the current owner re-runs (`false`) or is
/// disposed (`true`).
///
/// Fails with
/// [`ReactiveError::CleanupOutsideComputation`](crate::ReactiveError::CleanupOutsideComputation)
/// outside of any computation or root.
pub fn cleanup(f: impl FnOnce(bool) + 'static) -> Result<()> {
    runtime::on_cleanup(Box::new(f))
}

/// Run `f` so that computations created in it survive the current owner's
/// re-runs. They are still disposed with the owner.
pub fn pin<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ContextGuard::enter(context::pinned());
    f()
}

/// Dispose a computation or root.
pub fn dispose<D: Dispose + ?Sized>(target: &D) -> Result<()> {
    target.dispose_node()
}
