use clap::Parser;
use std::path::PathBuf;

use multiextract::{ErrorPolicy, ExtractorConfig};

#[derive(Parser, Debug)]
#[command(name = "multiextract")]
#[command(version)]
#[command(about = "List every file inside nested archives, safely", long_about = None)]
#[command(after_help = "Examples:\n  \
  multiextract firmware.zip              list all leaf files, depth first\n  \
  multiextract --parallel --json a.tgz   JSON lines, expanded in parallel\n  \
  multiextract --detect *.bin            print the detected format only\n\n\
Exit status is 2 when a resource limit stops the run, 1 on other errors.")]
pub struct Cli {
    /// Archives to list
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Expand sibling entries concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Maximum recursion depth (root = 0)
    #[arg(long, value_name = "N")]
    pub max_depth: Option<u32>,

    /// Cap on total extracted bytes
    #[arg(long, value_name = "BYTES")]
    pub max_bytes: Option<u64>,

    /// Cap on total extracted files
    #[arg(long, value_name = "N")]
    pub max_files: Option<u64>,

    /// Cap on decompressed:compressed size for one expansion step
    #[arg(long, value_name = "RATIO")]
    pub max_ratio: Option<f64>,

    /// Entries larger than this are spooled to a temporary file
    #[arg(long, value_name = "BYTES")]
    pub memory_threshold: Option<usize>,

    /// Concurrent tasks in parallel mode
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Fail on the first corrupt branch instead of skipping it
    #[arg(long)]
    pub abort_on_error: bool,

    /// One JSON object per leaf
    #[arg(long)]
    pub json: bool,

    /// Only print the detected archive type of each FILE
    #[arg(long)]
    pub detect: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn config(&self) -> ExtractorConfig {
        let mut config = ExtractorConfig::default();
        if let Some(depth) = self.max_depth {
            config = config.with_max_depth(depth);
        }
        if let Some(bytes) = self.max_bytes {
            config = config.with_max_total_bytes(bytes);
        }
        if let Some(files) = self.max_files {
            config = config.with_max_total_files(files);
        }
        if let Some(ratio) = self.max_ratio {
            config = config.with_max_ratio(ratio);
        }
        if let Some(threshold) = self.memory_threshold {
            config = config.with_memory_threshold(threshold);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.abort_on_error {
            config = config.with_error_policy(ErrorPolicy::Abort);
        }
        config
    }
}
