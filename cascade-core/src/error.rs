//! Error Types
//!
//! Every fallible engine operation returns [`Result`]. Recompute functions
//! return it too, so an engine error raised by a read inside a computation
//! propagates with `?` to whoever triggered the batch.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by the reactive engine.
#[derive(Error, Debug, Clone)]
pub enum ReactiveError {
    /// Two different values were written to the same cell in one tick.
    #[error("conflicting values written to the same cell in one tick")]
    Conflict,

    /// The reserved unset value was used as a cell value.
    #[error("the unset value cannot be stored in a cell")]
    InvalidValue,

    /// A computation depends on its own result, directly or through a cell
    /// it writes.
    #[error("circular dependency detected")]
    CircularDependency,

    /// A batch kept producing work past the configured tick ceiling.
    #[error("runaway batch: still changing after {limit} ticks")]
    RunawayBatch { limit: usize },

    /// A value was replaced while a `with` call still borrows it.
    #[error("value is borrowed by an active `with` call")]
    ValueInUse,

    /// `cleanup` was called with no computation or root to attach to.
    #[error("cleanup registered outside of any computation or root")]
    CleanupOutsideComputation,

    /// A recompute function failed.
    #[error("computation failed: {0}")]
    Computation(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Engine configuration could not be loaded or is out of range.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

impl ReactiveError {
    /// A computation failure carrying a plain message.
    pub fn computation(message: impl Into<String>) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync> = message.into().into();
        Self::Computation(Arc::from(boxed))
    }

    /// A computation failure wrapping an arbitrary error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Computation(Arc::new(error))
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, ReactiveError>;
