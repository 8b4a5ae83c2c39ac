//! Bounded parallel driver.
//!
//! Each pending entry becomes one blocking task that detects it and expands
//! it fully, admitting every child against the shared context. Finished
//! tasks feed their children back into the queue. At most `workers` tasks
//! are in flight; the first fatal error cancels the context, aborts the
//! remaining tasks and is returned once they have drained.

use log::{debug, trace};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinSet;

use super::{ExtractionContext, Step, visit};
use crate::archive::HandlerRegistry;
use crate::entry::FileEntry;
use crate::error::{ExtractError, Result};

enum Outcome {
    Leaf(FileEntry),
    Children(Vec<FileEntry>),
}

/// Visit one entry and drain its children.
fn process(
    ctx: &Arc<ExtractionContext>,
    registry: &HandlerRegistry,
    entry: FileEntry,
) -> Result<Outcome> {
    match visit(ctx, registry, entry)? {
        Step::Leaf(leaf) => Ok(Outcome::Leaf(leaf)),
        Step::Skipped => Ok(Outcome::Children(Vec::new())),
        Step::Expand { path, children } => {
            let mut admitted = Vec::new();
            for child in children {
                match child {
                    Ok(child) => {
                        ctx.admit(&child)?;
                        admitted.push(child);
                    }
                    Err(e) => {
                        // Children yielded before the failure stay in the result.
                        ctx.branch_failed(&path, e)?;
                        break;
                    }
                }
            }
            trace!("{path}: {} children", admitted.len());
            Ok(Outcome::Children(admitted))
        }
    }
}

/// Run a whole extraction on the blocking pool of the current runtime.
pub(crate) async fn run(
    ctx: Arc<ExtractionContext>,
    registry: HandlerRegistry,
    root: FileEntry,
) -> Result<Vec<FileEntry>> {
    let workers = ctx.config().workers.max(1);
    let mut pending = VecDeque::from([root]);
    let mut tasks: JoinSet<Result<Outcome>> = JoinSet::new();
    let mut leaves = Vec::new();

    loop {
        while tasks.len() < workers {
            let Some(entry) = pending.pop_front() else {
                break;
            };
            let ctx = Arc::clone(&ctx);
            let registry = registry.clone();
            tasks.spawn_blocking(move || process(&ctx, &registry, entry));
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let outcome = joined
            .map_err(|e| ExtractError::Io(io::Error::other(format!("worker task failed: {e}"))))
            .and_then(|r| r);

        match outcome {
            Ok(Outcome::Leaf(leaf)) => leaves.push(leaf),
            Ok(Outcome::Children(children)) => pending.extend(children),
            Err(mut e) => {
                debug!("parallel run failed, cancelling {} tasks: {e}", tasks.len());
                ctx.cancel();
                tasks.abort_all();
                while let Some(joined) = tasks.join_next().await {
                    // A sibling may have observed the cancellation before the
                    // task that caused it was joined.
                    if let Ok(Err(other)) = joined {
                        if matches!(e, ExtractError::Cancelled)
                            && !matches!(other, ExtractError::Cancelled)
                        {
                            e = other;
                        }
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(leaves)
}

/// Synchronous wrapper around [`run`].
///
/// Outside a runtime, drives the run on a private current-thread runtime
/// whose blocking pool is sized to the worker count. On a multi-thread
/// runtime the calling worker is handed over with `block_in_place`. A
/// current-thread runtime cannot be blocked on and gets an error.
pub(crate) fn run_blocking(
    ctx: Arc<ExtractionContext>,
    registry: HandlerRegistry,
    root: FileEntry,
) -> Result<Vec<FileEntry>> {
    if let Ok(handle) = Handle::try_current() {
        return match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(run(ctx, registry, root)))
            }
            flavor => Err(ExtractError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("cannot block a {flavor:?} tokio runtime; use extract_async"),
            ))),
        };
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .max_blocking_threads(ctx.config().workers.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(run(ctx, registry, root))
}
