//! Data Cells
//!
//! A data cell is the fundamental reactive source. It holds a value and is
//! read by computations, which the runtime then records as its dependents.
//!
//! # Writes
//!
//! A write outside any batch applies immediately and propagates before
//! `write` returns. Inside a batch (or while a computation is running) the
//! value is staged and applied at the start of the next tick of the cell's
//! clock, so every reader in the current tick still sees the old value.
//!
//! At most one distinct value may be staged per tick: a second write of an
//! equal value is absorbed, a different one fails with
//! [`ReactiveError::Conflict`].
//!
//! # Memory Layout
//!
//! A handle is an `Rc` to the cell's value and staged value. The graph node
//! keeps only a weak hook used to apply the staged value; the node is freed
//! when the last handle is dropped.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, PendingChange};

use super::computation::Track;
use super::context;
use super::runtime;

/// Values that can be stored in a data cell.
///
/// `is_unset` identifies the reserved "no value" state. Writing it fails
/// with [`ReactiveError::InvalidValue`]. Only `Option::None` is unset among
/// the provided implementations.
pub trait Value: Clone + PartialEq + 'static {
    fn is_unset(&self) -> bool {
        false
    }
}

impl<T: Clone + PartialEq + 'static> Value for Option<T> {
    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

macro_rules! impl_value {
    ($($ty:ty),* $(,)?) => {
        $(impl Value for $ty {})*
    };
}

impl_value!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str,
);

impl<T: Clone + PartialEq + 'static> Value for Vec<T> {}
impl<T: PartialEq + 'static> Value for Rc<T> {}
impl<T: Clone + PartialEq + 'static> Value for Box<T> {}

macro_rules! impl_value_tuple {
    ($($name:ident),+) => {
        impl<$($name: Clone + PartialEq + 'static),+> Value for ($($name,)+) {}
    };
}

impl_value_tuple!(A);
impl_value_tuple!(A, B);
impl_value_tuple!(A, B, C);
impl_value_tuple!(A, B, C, D);

struct Slot<T> {
    value: T,
    pending: Option<T>,
}

struct CellInner<T> {
    id: NodeId,
    slot: RefCell<Slot<T>>,
    /// Ignore writes equal to the current value.
    skip_equal: bool,
}

impl<T: Value> PendingChange for CellInner<T> {
    fn commit(&self) {
        match self.slot.try_borrow_mut() {
            Ok(mut slot) => {
                if let Some(next) = slot.pending.take() {
                    slot.value = next;
                }
            }
            Err(_) => warn!(node = ?self.id, "cell borrowed during commit; staged value dropped"),
        }
    }

    fn discard(&self) {
        if let Ok(mut slot) = self.slot.try_borrow_mut() {
            slot.pending = None;
        }
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        runtime::release(self.id);
    }
}

/// A reactive data cell holding a value of type `T`.
///
/// Cloning the handle shares the cell.
///
/// # Example
///
/// ```rust
/// use cascade_core::{computation, data};
///
/// let count = data(1).unwrap();
/// let double = {
///     let count = count.clone();
///     computation(move || Ok(count.read() * 2)).unwrap()
/// };
///
/// count.write(5).unwrap();
/// assert_eq!(double.read().unwrap(), 10);
/// ```
pub struct DataCell<T: Value> {
    inner: Rc<CellInner<T>>,
}

impl<T: Value> DataCell<T> {
    fn new(value: T, skip_equal: bool) -> Result<Self> {
        if value.is_unset() {
            return Err(ReactiveError::InvalidValue);
        }
        let clock = context::current().clock;
        let inner = Rc::new_cyclic(|weak: &Weak<CellInner<T>>| {
            let hook: Weak<dyn PendingChange> = weak.clone();
            CellInner {
                id: runtime::with(|rt| rt.alloc_data(clock, hook)),
                slot: RefCell::new(Slot {
                    value,
                    pending: None,
                }),
                skip_equal,
            }
        });
        Ok(Self { inner })
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a computation, this also records the cell as one of
    /// its dependencies.
    pub fn read(&self) -> T {
        runtime::observe(self.inner.id);
        self.inner.slot.borrow().value.clone()
    }

    /// Borrow the current value, recording the dependency like [`read`](Self::read).
    ///
    /// Writing this cell from inside `f` fails with
    /// [`ReactiveError::ValueInUse`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        runtime::observe(self.inner.id);
        f(&self.inner.slot.borrow().value)
    }

    /// Get the current value without recording a dependency.
    pub fn peek(&self) -> T {
        self.inner.slot.borrow().value.clone()
    }

    /// The value staged for the next tick, if any.
    pub fn pending(&self) -> Option<T> {
        self.inner.slot.borrow().pending.clone()
    }

    /// Set a new value and return it.
    ///
    /// # Errors
    ///
    /// - [`ReactiveError::InvalidValue`] if `value` is the unset value.
    /// - [`ReactiveError::Conflict`] if a different value is already staged
    ///   for this tick.
    /// - [`ReactiveError::CircularDependency`] if a running computation in the
    ///   root clock depends on this cell.
    /// - [`ReactiveError::ValueInUse`] if called from inside [`with`](Self::with)
    ///   on this cell.
    /// - Any error raised by a computation re-run because of this write, when
    ///   the write opened the batch.
    pub fn write(&self, value: T) -> Result<T> {
        if value.is_unset() {
            return Err(ReactiveError::InvalidValue);
        }
        let id = self.inner.id;

        let (frozen, feedback) = runtime::with(|rt| {
            let frozen = rt.frozen();
            (frozen, frozen && rt.is_feedback(id))
        });
        if feedback {
            return Err(ReactiveError::CircularDependency);
        }

        {
            let mut slot = self
                .inner
                .slot
                .try_borrow_mut()
                .map_err(|_| ReactiveError::ValueInUse)?;
            if let Some(pending) = &slot.pending {
                if *pending != value {
                    return Err(ReactiveError::Conflict);
                }
                return Ok(value);
            }
            if self.inner.skip_equal && slot.value == value {
                return Ok(value);
            }
            slot.pending = Some(value.clone());
        }

        if frozen {
            runtime::with(|rt| rt.enqueue_change(id));
        } else {
            let root = runtime::with(|rt| {
                rt.begin_freeze();
                rt.enqueue_change(id);
                rt.root_clock
            });
            runtime::run_clock(root)?;
        }
        Ok(value)
    }

    /// Write a value derived from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<T> {
        let next = f(&self.peek());
        self.write(next)
    }

    /// Number of computations that read this cell in their latest run.
    pub fn dependents(&self) -> usize {
        runtime::dependents(self.inner.id)
    }
}

impl<T: Value> Clone for DataCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Value + Debug> Debug for DataCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot.borrow();
        f.debug_struct("DataCell")
            .field("id", &self.inner.id)
            .field("value", &slot.value)
            .field("pending", &slot.pending)
            .finish()
    }
}

impl<T: Value> Track for DataCell<T> {
    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn track(&self) -> Result<()> {
        runtime::observe(self.inner.id);
        Ok(())
    }
}

/// Create a data cell.
///
/// Fails with [`ReactiveError::InvalidValue`] if `value` is unset.
pub fn data<T: Value>(value: T) -> Result<DataCell<T>> {
    DataCell::new(value, false)
}

/// Create a data cell that ignores writes equal to its current value.
///
/// Computations reading it only re-run when the value actually changes.
pub fn value<T: Value>(value: T) -> Result<DataCell<T>> {
    DataCell::new(value, true)
}
