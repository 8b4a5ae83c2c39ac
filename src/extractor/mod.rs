//! Recursive traversal driver.
//!
//! Every entry goes through the same step: detect its type, look up a
//! handler, and either emit it as a leaf or expand it into children. Each
//! child is admitted against the run's cumulative limits before it is
//! visited. Sequential runs walk an explicit stack lazily; parallel runs
//! fan entries out over a bounded set of blocking tasks.

mod context;
mod parallel;

pub use context::{BranchError, CappedReader, ExpansionBudget, ExtractionContext, ExtractionStats};

use bytes::Bytes;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::archive::{Children, HandlerRegistry};
use crate::config::ExtractorConfig;
use crate::entry::{Content, FileEntry};
use crate::error::Result;
use crate::magic::MiniMagic;

/// Entry point for recursive extraction.
///
/// An extractor holds configuration and handlers only; every call creates a
/// fresh [`ExtractionContext`], so limits never carry over between runs.
#[derive(Clone, Default)]
pub struct Extractor {
    config: ExtractorConfig,
    registry: HandlerRegistry,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Extractor {
            config,
            registry: HandlerRegistry::with_defaults(),
        }
    }

    pub fn with_registry(config: ExtractorConfig, registry: HandlerRegistry) -> Self {
        Extractor { config, registry }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Extract a file on disk.
    pub fn extract_file(&self, path: impl AsRef<Path>, parallel: bool) -> Result<Extraction> {
        let entry = FileEntry::open(path.as_ref())?;
        self.extract_entry(entry, parallel)
    }

    /// Extract an in-memory buffer named `name`.
    pub fn extract_bytes(
        &self,
        name: &str,
        bytes: impl Into<Bytes>,
        parallel: bool,
    ) -> Result<Extraction> {
        let entry = FileEntry::new(name, "", Content::from_bytes(bytes));
        self.extract_entry(entry, parallel)
    }

    /// Extract from a caller-built root entry.
    ///
    /// Sequential mode returns immediately and does its work as the result
    /// is iterated. Parallel mode runs to completion before returning. Inside
    /// a multi-thread tokio runtime it borrows the calling worker; from a
    /// current-thread runtime it fails, so use [`Extractor::extract_async`].
    pub fn extract_entry(&self, root: FileEntry, parallel: bool) -> Result<Extraction> {
        let ctx = ExtractionContext::new(self.config.clone());
        debug!(
            "extracting {} ({} mode)",
            root.full_path(),
            if parallel { "parallel" } else { "sequential" }
        );
        if parallel {
            let leaves = parallel::run_blocking(Arc::clone(&ctx), self.registry.clone(), root)?;
            Ok(Extraction::completed(ctx, leaves))
        } else {
            Ok(Extraction::sequential(ctx, self.registry.clone(), root))
        }
    }

    /// Parallel extraction for callers already inside a tokio runtime.
    pub async fn extract_async(&self, root: FileEntry) -> Result<Extraction> {
        let ctx = ExtractionContext::new(self.config.clone());
        let leaves = parallel::run(Arc::clone(&ctx), self.registry.clone(), root).await?;
        Ok(Extraction::completed(ctx, leaves))
    }
}

/// Outcome of visiting one entry.
pub(crate) enum Step {
    Leaf(FileEntry),
    Expand { path: String, children: Children },
    /// Expansion failed and the error policy excluded the branch.
    Skipped,
}

/// Detect `entry` and start expanding it.
///
/// Failures scoped to this entry go through the error policy; the returned
/// error is always one that must end the run.
pub(crate) fn visit(
    ctx: &Arc<ExtractionContext>,
    registry: &HandlerRegistry,
    mut entry: FileEntry,
) -> Result<Step> {
    ctx.ensure_active()?;
    let archive_type = MiniMagic::detect(&mut entry);
    if archive_type.is_unknown() {
        return Ok(Step::Leaf(entry));
    }
    let Some(handler) = registry.get(archive_type) else {
        warn!(
            "no handler for {archive_type}, emitting {} as a leaf",
            entry.full_path()
        );
        return Ok(Step::Leaf(entry));
    };

    let path = entry.full_path();
    debug!("expanding {path} as {}", handler.format_name());
    let budget = ctx.budget(&entry, handler.expands());
    match handler.expand(entry, budget) {
        Ok(children) => Ok(Step::Expand { path, children }),
        Err(e) => {
            ctx.branch_failed(&path, e)?;
            Ok(Step::Skipped)
        }
    }
}

/// Children being walked for one expanded entry.
struct Frame {
    path: String,
    children: Children,
}

enum State {
    /// Depth-first walk driven by `next()`.
    Walking {
        registry: HandlerRegistry,
        pending: Option<FileEntry>,
        stack: Vec<Frame>,
    },
    /// Parallel run already finished; leaves are handed out in order.
    Completed(std::vec::IntoIter<FileEntry>),
    Done,
}

/// The flattened leaf sequence of one run.
///
/// A resource-limit failure is yielded as the final `Err` item; nothing is
/// yielded after it.
pub struct Extraction {
    ctx: Arc<ExtractionContext>,
    state: State,
}

impl Extraction {
    fn sequential(ctx: Arc<ExtractionContext>, registry: HandlerRegistry, root: FileEntry) -> Self {
        Extraction {
            ctx,
            state: State::Walking {
                registry,
                pending: Some(root),
                stack: Vec::new(),
            },
        }
    }

    fn completed(ctx: Arc<ExtractionContext>, leaves: Vec<FileEntry>) -> Self {
        log_summary(&ctx);
        Extraction {
            ctx,
            state: State::Completed(leaves.into_iter()),
        }
    }

    /// Counters for the run so far.
    pub fn stats(&self) -> ExtractionStats {
        self.ctx.stats()
    }

    /// Branches excluded by [`ErrorPolicy::SkipBranch`] so far.
    ///
    /// [`ErrorPolicy::SkipBranch`]: crate::config::ErrorPolicy::SkipBranch
    pub fn take_branch_errors(&mut self) -> Vec<BranchError> {
        self.ctx.take_branch_errors()
    }

    fn finish(&mut self) {
        self.state = State::Done;
    }

    fn next_sequential(&mut self) -> Option<Result<FileEntry>> {
        let State::Walking {
            registry,
            pending,
            stack,
        } = &mut self.state
        else {
            return None;
        };

        loop {
            if let Some(entry) = pending.take() {
                match visit(&self.ctx, registry, entry) {
                    Ok(Step::Leaf(leaf)) => return Some(Ok(leaf)),
                    Ok(Step::Expand { path, children }) => stack.push(Frame { path, children }),
                    Ok(Step::Skipped) => {}
                    Err(e) => return Some(Err(e)),
                }
                continue;
            }

            let frame = stack.last_mut()?;
            match frame.children.next() {
                None => {
                    stack.pop();
                }
                Some(Ok(child)) => {
                    if let Err(e) = self.ctx.admit(&child) {
                        return Some(Err(e));
                    }
                    *pending = Some(child);
                }
                Some(Err(e)) => {
                    let path = frame.path.clone();
                    stack.pop();
                    if let Err(e) = self.ctx.branch_failed(&path, e) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

impl Iterator for Extraction {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match &mut self.state {
            State::Walking { .. } => self.next_sequential(),
            State::Completed(leaves) => leaves.next().map(Ok),
            State::Done => return None,
        };
        match &item {
            Some(Ok(_)) => {}
            Some(Err(_)) => self.finish(),
            None => {
                if matches!(self.state, State::Walking { .. }) {
                    log_summary(&self.ctx);
                }
                self.finish();
            }
        }
        item
    }
}

fn log_summary(ctx: &ExtractionContext) {
    let stats = ctx.stats();
    info!(
        "extracted {} files ({} bytes, max depth {}) in {:?}; {} branches skipped",
        stats.total_files, stats.total_bytes, stats.max_depth, stats.elapsed, stats.branch_errors
    );
}
