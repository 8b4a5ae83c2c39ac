//! Per-run accounting shared by every task of one extraction.
//!
//! A context is created for each top-level call and dropped when the call
//! finishes, so counters never leak between runs. All updates are atomic;
//! the branch error list is the only lock-protected piece.

use log::warn;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{ErrorPolicy, ExtractorConfig};
use crate::entry::FileEntry;
use crate::error::{ExtractError, LimitExceeded, LimitKind, Result};

/// A branch that was excluded from the result because it failed to expand.
#[derive(Debug)]
pub struct BranchError {
    pub path: String,
    pub error: ExtractError,
}

/// Snapshot of a run's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub total_bytes: u64,
    pub total_files: u64,
    pub max_depth: u32,
    pub branch_errors: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct ExtractionContext {
    config: ExtractorConfig,
    total_bytes: AtomicU64,
    total_files: AtomicU64,
    max_depth_seen: AtomicU32,
    cancelled: AtomicBool,
    branches_skipped: AtomicUsize,
    branch_errors: Mutex<Vec<BranchError>>,
    started: Instant,
}

impl ExtractionContext {
    pub fn new(config: ExtractorConfig) -> Arc<Self> {
        Arc::new(ExtractionContext {
            config,
            total_bytes: AtomicU64::new(0),
            total_files: AtomicU64::new(0),
            max_depth_seen: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            branches_skipped: AtomicUsize::new(0),
            branch_errors: Mutex::new(Vec::new()),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn total_files(&self) -> u64 {
        self.total_files.load(Ordering::Acquire)
    }

    /// Account for one child produced at `child.depth`.
    ///
    /// Counters are bumped before the comparison, so every child strictly
    /// increases the file count and a run over an unbounded expansion trips
    /// a limit in finite time.
    pub fn admit(&self, child: &FileEntry) -> Result<()> {
        self.ensure_active()?;
        self.check_depth(child.depth, &child.full_path())?;

        let files = self.total_files.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = self
            .total_bytes
            .fetch_add(child.len(), Ordering::AcqRel)
            .saturating_add(child.len());
        self.max_depth_seen.fetch_max(child.depth, Ordering::AcqRel);

        if files > self.config.max_total_files {
            return Err(self.trip(
                LimitKind::TotalFiles,
                self.config.max_total_files,
                files,
                &child.full_path(),
            ));
        }
        if bytes > self.config.max_total_bytes {
            return Err(self.trip(
                LimitKind::TotalBytes,
                self.config.max_total_bytes,
                bytes,
                &child.full_path(),
            ));
        }
        Ok(())
    }

    pub fn check_depth(&self, depth: u32, path: &str) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(self.trip(
                LimitKind::Depth,
                self.config.max_depth as u64,
                depth as u64,
                path,
            ));
        }
        Ok(())
    }

    /// Bytes that may still be extracted before the total limit trips.
    pub fn remaining_bytes(&self) -> u64 {
        self.config.max_total_bytes.saturating_sub(self.total_bytes())
    }

    /// Start accounting for one expansion step of `parent`.
    pub fn budget(self: &Arc<Self>, parent: &FileEntry, enforce_ratio: bool) -> ExpansionBudget {
        ExpansionBudget {
            ctx: Arc::clone(self),
            path: parent.full_path(),
            ratio_allowance: self.config.ratio_allowance(parent.len()),
            enforce_ratio,
            produced: 0,
        }
    }

    /// Stop all work for this run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Apply the error policy to a failure scoped to `path`.
    ///
    /// Returns the error back when it has to end the run.
    pub fn branch_failed(&self, path: &str, error: ExtractError) -> Result<()> {
        if error.is_fatal() {
            self.cancel();
            return Err(error);
        }
        match self.config.error_policy {
            ErrorPolicy::Abort => {
                self.cancel();
                Err(error)
            }
            ErrorPolicy::SkipBranch => {
                warn!("skipping {path}: {error}");
                self.branches_skipped.fetch_add(1, Ordering::AcqRel);
                if let Ok(mut errors) = self.branch_errors.lock() {
                    errors.push(BranchError {
                        path: path.to_string(),
                        error,
                    });
                }
                Ok(())
            }
        }
    }

    pub fn take_branch_errors(&self) -> Vec<BranchError> {
        self.branch_errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }

    pub fn stats(&self) -> ExtractionStats {
        ExtractionStats {
            total_bytes: self.total_bytes(),
            total_files: self.total_files(),
            max_depth: self.max_depth_seen.load(Ordering::Acquire),
            branch_errors: self.branches_skipped.load(Ordering::Acquire),
            elapsed: self.started.elapsed(),
        }
    }

    fn trip(&self, kind: LimitKind, limit: u64, actual: u64, path: &str) -> ExtractError {
        self.cancel();
        ExtractError::ResourceLimit {
            kind,
            limit,
            actual,
            path: path.to_string(),
        }
    }
}

/// Byte allowance for the children of one parent.
///
/// Handlers check declared sizes against it before reading anything and
/// wrap every decoding reader in [`ExpansionBudget::reader`], so an entry
/// that lies about its size still cannot exceed the allowance.
pub struct ExpansionBudget {
    ctx: Arc<ExtractionContext>,
    path: String,
    ratio_allowance: u64,
    enforce_ratio: bool,
    produced: u64,
}

impl ExpansionBudget {
    pub fn context(&self) -> &Arc<ExtractionContext> {
        &self.ctx
    }

    /// Spool threshold for materialized children.
    pub fn threshold(&self) -> usize {
        self.ctx.config.memory_threshold
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Reject a member before reading it if its declared size alone would
    /// break a limit.
    pub fn check_declared(&self, declared: u64, member: &str) -> Result<()> {
        self.ctx.ensure_active()?;
        let after = self.produced.saturating_add(declared);
        if self.enforce_ratio && after > self.ratio_allowance {
            return Err(self.ctx.trip(
                LimitKind::ExpansionRatio,
                self.ratio_allowance,
                after,
                member,
            ));
        }
        let total = self.ctx.total_bytes().saturating_add(declared);
        if total > self.ctx.config.max_total_bytes {
            return Err(self.ctx.trip(
                LimitKind::TotalBytes,
                self.ctx.config.max_total_bytes,
                total,
                member,
            ));
        }
        Ok(())
    }

    /// Wrap a decoder so it fails once it yields more than the budget allows.
    pub fn reader<R: Read>(&self, inner: R, member: &str) -> CappedReader<R> {
        let ratio_left = if self.enforce_ratio {
            self.ratio_allowance.saturating_sub(self.produced)
        } else {
            u64::MAX
        };
        let total_left = self.ctx.remaining_bytes();
        let (cap, kind, limit, base) = if ratio_left < total_left {
            (
                ratio_left,
                LimitKind::ExpansionRatio,
                self.ratio_allowance,
                self.produced,
            )
        } else {
            (
                total_left,
                LimitKind::TotalBytes,
                self.ctx.config.max_total_bytes,
                self.ctx.total_bytes(),
            )
        };
        CappedReader {
            inner,
            ctx: Arc::clone(&self.ctx),
            cap,
            read: 0,
            kind,
            limit,
            base,
            path: if member.is_empty() {
                self.path.clone()
            } else {
                member.to_string()
            },
        }
    }

    /// Record bytes produced by a finished child.
    pub fn record(&mut self, bytes: u64) {
        self.produced = self.produced.saturating_add(bytes);
    }
}

/// Reader that errors with a resource-limit payload once more than `cap`
/// bytes have been read, and stops as soon as the run is cancelled.
pub struct CappedReader<R> {
    inner: R,
    ctx: Arc<ExtractionContext>,
    cap: u64,
    read: u64,
    kind: LimitKind,
    limit: u64,
    base: u64,
    path: String,
}

impl<R> CappedReader<R> {
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CappedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.ctx.is_cancelled() {
            return Err(io::Error::other(ExtractError::Cancelled));
        }
        // Allow one byte past the cap so that hitting it exactly is not an error.
        let window = self.cap.saturating_sub(self.read).saturating_add(1);
        let want = (buf.len() as u64).min(window) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.read += n as u64;
        if self.read > self.cap {
            self.ctx.cancel();
            return Err(LimitExceeded {
                kind: self.kind,
                limit: self.limit,
                actual: self.base.saturating_add(self.read),
                path: self.path.clone(),
            }
            .into_io());
        }
        Ok(n)
    }
}
