//! Computations
//!
//! A computation runs a function, records every source it reads, and runs
//! it again whenever one of those sources changes. Its result is cached and
//! can itself be read by other computations.
//!
//! # Dependency Tracking
//!
//! Dependencies are re-derived on every run. A source read in the previous
//! run but not in this one stops triggering the computation, so branches
//! that are not taken cost nothing.
//!
//! # Ownership
//!
//! Computations created while another computation runs are owned by it.
//! They are disposed right before the owner re-runs, and with it. Use
//! [`pin`](crate::pin) to keep a child alive across the owner's re-runs.
//!
//! # Elision
//!
//! A computation whose first run read nothing, created nothing and
//! registered no cleanup can never change. It is not kept in the graph:
//! the handle just holds the value.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{Body, NodeId};

use super::context::{self, ContextGuard};
use super::runtime;

/// A source that can be subscribed to explicitly.
///
/// Implemented by [`DataCell`](crate::DataCell) and [`Computation`]; used
/// by [`on`] and [`on_changes`] to name dependencies up front.
pub trait Track {
    /// Graph node behind this source.
    fn node_id(&self) -> NodeId;

    /// Record a dependency of the current listener on this source, bringing
    /// it up to date first.
    fn track(&self) -> Result<()>;
}

/// A cached derived value.
///
/// Cloning the handle shares the computation. Dropping every handle does
/// not stop it: a computation lives until it or its owner is disposed.
///
/// # Example
///
/// ```rust
/// use cascade_core::{computation, data, root};
///
/// root(|_| {
///     let first = data("Ada".to_string())?;
///     let last = data("Lovelace".to_string())?;
///     let full = {
///         let (first, last) = (first.clone(), last.clone());
///         computation(move || Ok(format!("{} {}", first.read(), last.read())))?
///     };
///
///     last.write("Byron".to_string())?;
///     assert_eq!(full.read()?, "Ada Byron");
///     Ok::<_, cascade_core::ReactiveError>(())
/// })
/// .unwrap();
/// ```
pub struct Computation<T> {
    id: NodeId,
    value: Rc<RefCell<T>>,
}

impl<T: Clone + 'static> Computation<T> {
    /// Create a computation from a function of its previous value.
    ///
    /// `seed` is passed to the first run. With `sample`, the first run does
    /// not record dependencies.
    pub fn create<F>(seed: Option<T>, sample: bool, mut step: F) -> Result<Self>
    where
        F: FnMut(Option<T>) -> Result<T> + 'static,
    {
        let mut slot = None;
        let id = runtime::create(sample, || {
            let first = step(seed)?;
            let value = Rc::new(RefCell::new(first));
            let cached = Rc::clone(&value);
            slot = Some(value);

            let body: Body = Box::new(move || {
                let previous = match cached.try_borrow_mut() {
                    Ok(slot) => slot.clone(),
                    Err(_) => return Err(ReactiveError::ValueInUse),
                };
                let next = step(Some(previous))?;
                *cached.try_borrow_mut().map_err(|_| ReactiveError::ValueInUse)? = next;
                Ok(())
            });
            Ok(body)
        })?;

        match slot {
            Some(value) => Ok(Self { id, value }),
            // The first run succeeded whenever `create` did
            None => unreachable!("computation created without a first value"),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recording the dependency if called inside
    /// another computation.
    ///
    /// If the computation is stale (an input changed this tick and it has
    /// not re-run yet) it is brought up to date first, so readers never see
    /// a mix of old and new values.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::CircularDependency`](crate::ReactiveError::CircularDependency)
    /// if the computation is itself running, or any error from re-running it.
    pub fn read(&self) -> Result<T> {
        runtime::track(self.id)?;
        Ok(self.value.borrow().clone())
    }

    /// Borrow the current value, with the same tracking as [`read`](Self::read).
    ///
    /// If a write made inside `f` makes this computation re-run, the re-run
    /// fails with [`ReactiveError::ValueInUse`] and the value is kept.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        runtime::track(self.id)?;
        Ok(f(&self.value.borrow()))
    }

    /// Get the cached value without tracking or updating.
    pub fn peek(&self) -> T {
        self.value.borrow().clone()
    }

    /// Dispose the computation and everything it owns.
    ///
    /// Inside a batch, teardown happens at the end of the current tick; the
    /// computation stops reacting immediately. No-op if already disposed or
    /// elided.
    ///
    /// # Errors
    ///
    /// Any error raised while propagating writes made by cleanups.
    pub fn dispose(&self) -> Result<()> {
        runtime::dispose(self.id)
    }

    /// Whether the computation still reacts to its sources.
    ///
    /// False once disposed, and for elided computations.
    pub fn is_live(&self) -> bool {
        !runtime::is_disposed(self.id)
    }

    /// Number of sources read during the latest run.
    pub fn dependency_count(&self) -> usize {
        runtime::active_sources(self.id)
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: Debug> Debug for Computation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id)
            .field("value", &*self.value.borrow())
            .finish()
    }
}

impl<T: Clone + 'static> Track for Computation<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn track(&self) -> Result<()> {
        runtime::track(self.id)
    }
}

/// Create a computation.
///
/// `f` runs immediately, and again whenever anything it read changes.
pub fn computation<T, F>(mut f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut() -> Result<T> + 'static,
{
    Computation::create(None, false, move |_| f())
}

/// Create a computation that folds over its previous value, starting at
/// `seed`.
pub fn computation_with<T, F>(seed: T, mut f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut(T) -> Result<T> + 'static,
{
    let fallback = seed.clone();
    Computation::create(Some(seed), false, move |previous| {
        f(previous.unwrap_or_else(|| fallback.clone()))
    })
}

/// Create a computation that depends only on `sources`.
///
/// `f` is called with the previous value (starting at `seed`) and runs
/// untracked: reads inside it do not add dependencies.
pub fn on<T, F>(sources: &[&dyn Track], seed: T, f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut(T) -> Result<T> + 'static,
{
    explicit(sources, seed, false, f)
}

/// Like [`on`], but `f` is skipped on the first run: the computation starts
/// at `seed` and `f` only runs when a source changes.
pub fn on_changes<T, F>(sources: &[&dyn Track], seed: T, f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut(T) -> Result<T> + 'static,
{
    explicit(sources, seed, true, f)
}

fn explicit<T, F>(sources: &[&dyn Track], seed: T, defer: bool, mut f: F) -> Result<Computation<T>>
where
    T: Clone + 'static,
    F: FnMut(T) -> Result<T> + 'static,
{
    let ids: Vec<NodeId> = sources.iter().map(|source| source.node_id()).collect();
    let fallback = seed.clone();
    let mut waiting = defer;

    Computation::create(Some(seed), false, move |previous| {
        for id in &ids {
            runtime::track(*id)?;
        }
        let previous = previous.unwrap_or_else(|| fallback.clone());
        if waiting {
            waiting = false;
            return Ok(previous);
        }
        sample(|| f(previous))
    })
}

/// Run `f` without recording dependencies.
///
/// Computations created inside `f` are still owned by the current owner.
pub fn sample<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ContextGuard::enter(context::untracked());
    f()
}
