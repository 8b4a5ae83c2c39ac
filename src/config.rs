//! Limits and policies for one extraction run.

/// What to do when a branch fails for a reason other than a resource limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Exclude the failing branch, record the error and keep going.
    #[default]
    SkipBranch,
    /// Fail the whole run on the first branch error.
    Abort,
}

/// Configuration for an [`Extractor`](crate::Extractor).
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Maximum recursion depth; the root is depth 0.
    pub max_depth: u32,
    /// Cap on the sum of all extracted entry sizes in one run.
    pub max_total_bytes: u64,
    /// Cap on the number of entries extracted in one run.
    pub max_total_files: u64,
    /// Cap on decompressed:compressed size for a single expansion step.
    pub max_single_expansion_ratio: f64,
    /// Entries larger than this are spooled to an on-disk temporary file.
    pub memory_threshold: usize,
    /// Number of concurrent tasks in parallel mode.
    pub workers: usize,
    pub error_policy: ErrorPolicy,
}

/// Expansions below this size never trip the ratio check.
pub const RATIO_FLOOR: u64 = 64 * 1024;

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            max_depth: 32,
            max_total_bytes: 10 * 1024 * 1024 * 1024,
            max_total_files: 1_000_000,
            max_single_expansion_ratio: 60.0,
            memory_threshold: 8 * 1024 * 1024,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            error_policy: ErrorPolicy::SkipBranch,
        }
    }
}

impl ExtractorConfig {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_total_bytes(mut self, max_total_bytes: u64) -> Self {
        self.max_total_bytes = max_total_bytes;
        self
    }

    pub fn with_max_total_files(mut self, max_total_files: u64) -> Self {
        self.max_total_files = max_total_files;
        self
    }

    pub fn with_max_ratio(mut self, ratio: f64) -> Self {
        self.max_single_expansion_ratio = ratio;
        self
    }

    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Most bytes one expansion step may produce from `parent_len` input bytes.
    pub fn ratio_allowance(&self, parent_len: u64) -> u64 {
        let scaled = parent_len as f64 * self.max_single_expansion_ratio;
        let scaled = if scaled >= u64::MAX as f64 {
            u64::MAX
        } else {
            scaled as u64
        };
        scaled.max(RATIO_FLOOR)
    }
}
