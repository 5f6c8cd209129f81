//! Tuning for the write pipeline.

/// Environment variable overriding the insert batch size.
pub const BATCH_SIZE_ENV: &str = "GEOPORT_DBIMPORT_BATCHSIZE";

/// Rows per insert batch when no override is set.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Capacity of the bounded channels between stages.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Immutable settings for one write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Rows per batch forwarded to the sink.
    pub batch_size: usize,
    /// Messages buffered per channel before senders block.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Override the batch size; zero falls back to the default.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
}

/// Interpret the raw value of [`BATCH_SIZE_ENV`].
///
/// Unset, empty, zero and unparsable values all yield
/// [`DEFAULT_BATCH_SIZE`].
///
/// # Examples
/// ```
/// use geoport_data::{DEFAULT_BATCH_SIZE, batch_size_from_env};
///
/// assert_eq!(batch_size_from_env(Some("128")), 128);
/// assert_eq!(batch_size_from_env(Some("0")), DEFAULT_BATCH_SIZE);
/// assert_eq!(batch_size_from_env(None), DEFAULT_BATCH_SIZE);
/// ```
#[must_use]
pub fn batch_size_from_env(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_BATCH_SIZE)
}
