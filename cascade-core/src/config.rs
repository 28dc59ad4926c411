//! Engine Configuration and Diagnostics
//!
//! The engine is configured per thread: each thread has its own runtime, and
//! [`configure`](crate::configure) replaces that runtime's settings. Settings
//! can be built in code or loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Default tick ceiling per batch.
pub const DEFAULT_RUNAWAY_LIMIT: usize = 100_000;

/// Default number of inactive edges a computation keeps for reuse.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 16;

/// Tunable engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum ticks a single clock may run in one batch before the batch is
    /// aborted with [`ReactiveError::RunawayBatch`].
    pub runaway_limit: usize,

    /// Inactive inbound edges a computation may retain before its dependency
    /// log is compacted.
    pub compaction_threshold: usize,

    /// Log a warning when a computation is created with no owner.
    pub warn_unowned: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runaway_limit: DEFAULT_RUNAWAY_LIMIT,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            warn_unowned: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ReactiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is in range.
    pub fn validate(&self) -> Result<()> {
        if self.runaway_limit == 0 {
            return Err(ReactiveError::Config(
                "runaway_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_runaway_limit(mut self, limit: usize) -> Self {
        self.runaway_limit = limit;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    pub fn with_warn_unowned(mut self, warn: bool) -> Self {
        self.warn_unowned = warn;
        self
    }
}

/// A snapshot of the current thread's engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Live nodes of every kind.
    pub nodes: usize,
    /// Live computations.
    pub computations: usize,
    /// Live clocks, the root clock included.
    pub clocks: usize,
    /// Edges read by their consumer's latest run.
    pub active_edges: usize,
    /// Edges kept for reuse after their consumer stopped reading them.
    pub inactive_edges: usize,
    /// Ticks run across all clocks.
    pub ticks: u64,
    /// Batches run to completion or failure.
    pub batches: u64,
    /// Recompute function invocations, including first runs.
    pub runs: u64,
    /// Dependency-log compactions.
    pub compactions: u64,
}
