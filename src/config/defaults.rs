//! Default constants for spartan configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Runtime Defaults
// =============================================================================

/// Default number of worker lanes when not specified.
/// Uses the number of CPU cores for optimal parallelism.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Shards per worker for tables created without an explicit shard count.
pub const DEFAULT_SHARDS_PER_WORKER: usize = 2;

/// Capacity of each worker's pending-update queue.
/// Senders block once a worker falls this far behind.
pub const DEFAULT_UPDATE_QUEUE_CAPACITY: usize = 10_000;

// =============================================================================
// Array Defaults
// =============================================================================

/// Maximum tile edge length when splitting a new array into extents.
pub const DEFAULT_TILE_DIM: usize = 512;

// =============================================================================
// Local Expression Defaults
// =============================================================================

/// Evaluate DAG nodes shared by several parents once per evaluation pass.
pub const DEFAULT_MEMOIZE_SHARED: bool = true;

/// Request the accelerator backend from the compiled-function provider.
pub const DEFAULT_USE_ACCELERATOR: bool = false;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SPARTAN_";
