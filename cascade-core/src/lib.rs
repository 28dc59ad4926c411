//! Cascade Core
//!
//! This crate provides a fine-grained reactive computation engine. It
//! implements:
//!
//! - Data cells and computations with automatic, dynamic dependency tracking
//! - Glitch-free propagation: a computation re-runs at most once per change,
//!   after all of its inputs are up to date
//! - Atomic batches, hierarchical clocks and subclocks
//! - An ownership tree with cascading disposal and cleanups
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Public primitives, the per-thread runtime and the context stack
//! - `graph`: Dependency graph storage and the mark/notify propagation algorithms
//! - `config`: Engine settings and statistics
//! - `error`: The error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use cascade_core::{batch, computation, data, root};
//!
//! root(|disposer| {
//!     let count = data(1)?;
//!     let doubled = {
//!         let count = count.clone();
//!         computation(move || Ok(count.read() * 2))?
//!     };
//!     let log = {
//!         let (count, doubled) = (count.clone(), doubled.clone());
//!         computation(move || Ok(format!("{} -> {}", count.read(), doubled.read()?)))?
//!     };
//!
//!     count.write(5)?;
//!     assert_eq!(log.read()?, "5 -> 10");
//!
//!     batch(|| {
//!         count.write(6)?;
//!         // Not applied until the batch closes
//!         assert_eq!(count.read(), 5);
//!         Ok(())
//!     })?;
//!     assert_eq!(doubled.read()?, 12);
//!
//!     disposer.dispose()?;
//!     Ok::<_, cascade_core::ReactiveError>(())
//! })
//! .unwrap();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{EngineConfig, EngineStats};
pub use error::{ReactiveError, Result};
pub use reactive::{
    batch, cleanup, computation, computation_with, config, configure, data, dispose, is_batching,
    is_listening, on, on_changes, pin, root, sample, stats, subclock, value, Clock, Computation,
    DataCell, Dispose, Disposer, Track, Value,
};
