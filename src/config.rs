use std::num::NonZeroUsize;

use crate::enums::ResolutionPolicy;

/// Extension of the source acquisition files.
pub const DEFAULT_EXTENSION: &str = "czi";

/// Run settings shared by the loader and the derivation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Source file extension, matched case-insensitively and without the dot.
    pub extension: String,
    /// Decode worker count. `None` uses the available parallelism.
    pub workers: Option<NonZeroUsize>,
    pub resolution_policy: ResolutionPolicy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            workers: None,
            resolution_policy: ResolutionPolicy::default(),
        }
    }
}

impl SamplingConfig {
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_resolution_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.resolution_policy = policy;
        self
    }

    /// Number of decode workers to spawn.
    pub fn worker_count(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }
}
