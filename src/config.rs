//! Environment-driven configuration for the importers and the benchmark.

use std::env;
use std::time::Duration;

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    env_optional_usize(key).unwrap_or(default)
}

/// Unset, empty, zero or unparsable values all read as `None`.
pub(crate) fn env_optional_usize(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}

pub(crate) fn env_optional_u32(key: &str) -> Option<u32> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(default)
}

pub(crate) fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub const DEFAULT_PARALLELISM: usize = 20;
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Options recognised by the import strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct ImporterConfig {
    /// Maximum in-flight single-item writes (parallel writer).
    pub parallelism: usize,
    /// Operations per submission (bulk-operations writer).
    pub batch_size: usize,
    /// Pre-split size for procedure chunks; `None` sends each partition whole.
    pub max_chunk_size: Option<usize>,
    /// Let the procedure skip items whose key already exists.
    pub ignore_conflicts: bool,
    /// Maximum number of overflow bisections along one branch.
    pub max_split_depth: Option<u32>,
    /// Maximum number of partial-progress continuations of one chunk.
    pub max_continuations: Option<u32>,
}

impl ImporterConfig {
    /// Built-in defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            batch_size: DEFAULT_BATCH_SIZE,
            max_chunk_size: None,
            ignore_conflicts: false,
            max_split_depth: None,
            max_continuations: None,
        }
    }

    pub fn from_env() -> Self {
        Self {
            parallelism: env_usize("PARALLELISM", DEFAULT_PARALLELISM).max(1),
            batch_size: env_usize("BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            max_chunk_size: env_optional_usize("CHUNK_MAX_SIZE"),
            ignore_conflicts: env_bool("IGNORE_CONFLICTS", false),
            max_split_depth: env_optional_u32("CHUNK_MAX_SPLIT_DEPTH"),
            max_continuations: env_optional_u32("CHUNK_MAX_CONTINUATIONS"),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: Option<usize>) -> Self {
        self.max_chunk_size = max_chunk_size.filter(|size| *size > 0);
        self
    }

    pub fn with_ignore_conflicts(mut self, ignore_conflicts: bool) -> Self {
        self.ignore_conflicts = ignore_conflicts;
        self
    }

    pub fn with_max_split_depth(mut self, depth: Option<u32>) -> Self {
        self.max_split_depth = depth;
        self
    }

    pub fn with_max_continuations(mut self, continuations: Option<u32>) -> Self {
        self.max_continuations = continuations;
        self
    }
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Settings of the sequential benchmark driver.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub items_to_insert: usize,
    pub word_count: usize,
    pub cooldown: Duration,
}

impl BenchmarkConfig {
    pub fn from_env() -> Self {
        Self {
            items_to_insert: env_usize("ITEMS_TO_INSERT", 1000),
            word_count: env_usize("WORD_COUNT", 10),
            cooldown: env_duration_millis("COOLDOWN_MS", 5_000),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
