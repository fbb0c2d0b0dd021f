//! Parameters for a cluster run.
//!

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which algorithm `Pipeline::sorted()` uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortStrategy {
    /// Sample-based range partitioning with disk spills; memory bounded.
    Sampling,
    /// Sort locally first, then exchange out-of-range slices. Everything stays in memory.
    Presorted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameters {
    pub split_batch: usize,

    pub sort_samples: usize,
    pub sort_strategy: SortStrategy,

    pub merge_fan_in: usize,
    pub spill_min_items: usize,
    pub spill_dir: Option<PathBuf>,
    pub spill_compression: bool,

    pub memory_safety_margin: u64,
    pub memory_interval: Duration,

    pub min_tag: i32,
    pub max_tag: i32,

    pub workers: usize,
}

impl Default for Parameters {
    fn default() -> Parameters {
        Parameters::new()
    }
}

impl Parameters {
    pub fn new() -> Parameters {
        Parameters {
            split_batch: 256,
            sort_samples: 1024,
            sort_strategy: SortStrategy::Sampling,
            merge_fan_in: 64,
            spill_min_items: 16,
            spill_dir: None,
            spill_compression: true,
            memory_safety_margin: 16 * 1024 * 1024,
            memory_interval: Duration::from_secs(1),
            min_tag: 1,
            max_tag: i32::MAX,
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }

    /// How many elements a pull source hands out at once when split for parallel local
    /// processing. Splitting never causes network traffic beyond what pulling would.
    ///
    /// Default 256
    pub fn set_split_batch(mut self, n: usize) -> Parameters {
        self.split_batch = n.max(1);
        self
    }

    /// Total number of samples the sampling sort draws across the whole group in order to
    /// establish the range boundaries. Every member contributes its share.
    ///
    /// Default 1024
    pub fn set_sort_samples(mut self, n: usize) -> Parameters {
        self.sort_samples = n;
        self
    }

    /// Default: Sampling
    pub fn set_sort_strategy(mut self, s: SortStrategy) -> Parameters {
        self.sort_strategy = s;
        self
    }

    /// fan_in: How many spill runs are merged in one pass. If more runs exist at the end of a
    /// sort, the smallest ones are merged first until at most fan_in remain.
    /// Default 64.
    ///
    /// min_items: A receive buffer smaller than this is never spilled, even under memory
    /// pressure. Default 16.
    pub fn set_merge_opts(mut self, fan_in: usize, min_items: usize) -> Parameters {
        self.merge_fan_in = fan_in.max(2);
        self.spill_min_items = min_items;
        self
    }

    /// Where spill directories are created, and whether runs are deflate-compressed.
    /// Default: system temp dir, compressed.
    pub fn set_spill(mut self, dir: Option<PathBuf>, compression: bool) -> Parameters {
        self.spill_dir = dir;
        self.spill_compression = compression;
        self
    }

    /// The memory monitor samples free memory every `interval` and reports low memory if the
    /// free amount is projected to drop below `margin` bytes by the next sample.
    ///
    /// Default 16 MiB / 1 s
    pub fn set_memory_opts(mut self, margin: u64, interval: Duration) -> Parameters {
        self.memory_safety_margin = margin;
        self.memory_interval = interval;
        self
    }

    /// The range collective tags are wrapped into. Tag 0 is reserved for control traffic, so
    /// `min` must be positive. Some transports limit the upper bound.
    ///
    /// Default [1; i32::MAX]
    pub fn set_tag_range(mut self, min: i32, max: i32) -> Parameters {
        self.min_tag = min.max(1);
        self.max_tag = max.max(self.min_tag.saturating_add(1));
        self
    }

    /// Number of threads in the worker pool used for parallel local operations.
    pub fn set_workers(mut self, n: usize) -> Parameters {
        self.workers = n.max(1);
        self
    }

    /// Width of the tag range.
    pub fn tag_wrap(&self) -> i64 {
        self.max_tag as i64 - self.min_tag as i64
    }
}
