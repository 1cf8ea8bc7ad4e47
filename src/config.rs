//! Engine-wide configuration.
//!
//! Follows the teacher's plain-struct-with-`Default` configuration style
//! rather than a builder or config-file crate: every field has a sane
//! default and call sites override only what they need.

/// Tunables for the scheduler and the operators it drives.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker threads. Defaults to the host's logical core count.
    pub num_workers: usize,
    /// Pin each worker thread to a distinct CPU core when the platform
    /// supports it. Best-effort; silently ignored where unsupported.
    pub pin_workers: bool,
    /// Maximum number of data bytes per block.
    pub block_capacity: usize,
    /// Capacity of the scheduler's profiling event ring buffer.
    pub task_event_capacity: usize,
    /// Rolling-window size used by LIP to estimate per-filter hit rate.
    pub filter_memory: usize,
    /// Target false-positive rate for LIP Bloom filters.
    pub bloom_false_positive_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_workers: num_cpus::get(),
            pin_workers: false,
            block_capacity: 1 << 20,
            task_event_capacity: 4096,
            filter_memory: 10,
            bloom_false_positive_rate: 1e-2,
        }
    }
}
