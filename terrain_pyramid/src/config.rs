//! Explicit build configuration, threaded through the driver and pipeline
//! instead of any global mutable state.

use std::path::PathBuf;

use terrain_core::{DEFAULT_CACHE_BUDGET_BYTES, DEFAULT_WORKER_COUNT};

/// Parameters for one pyramid build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
	/// Root directory for both source data and the output tile database.
	pub base_dir: PathBuf,
	/// Cache eviction ceiling, in bytes.
	pub cache_budget_bytes: u64,
	/// Worker thread count for the parallel fine-level pipeline.
	pub worker_count: usize,
	/// Geographic box the build is restricted to: `(latT, lonL, latB, lonR)`.
	pub bbox: (f64, f64, f64, f64),
}

impl BuildConfig {
	#[must_use]
	pub fn new(base_dir: PathBuf, bbox: (f64, f64, f64, f64)) -> BuildConfig {
		BuildConfig { base_dir, cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES, worker_count: DEFAULT_WORKER_COUNT, bbox }
	}
}
