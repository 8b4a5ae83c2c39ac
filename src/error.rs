//! Error types for recursive extraction.
//!
//! Errors fall into two groups. Resource-limit errors are fatal: they abort the
//! whole run and are the designed response to decompression bombs and quine
//! archives. Everything else is scoped to the branch of the expansion tree
//! that produced it, and the configured [`ErrorPolicy`] decides whether the
//! branch is skipped or the run fails.
//!
//! [`ErrorPolicy`]: crate::config::ErrorPolicy

use std::fmt;
use std::io;

use crate::magic::ArchiveType;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Which cumulative bound was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Depth,
    TotalBytes,
    TotalFiles,
    ExpansionRatio,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::Depth => "recursion depth",
            LimitKind::TotalBytes => "total extracted bytes",
            LimitKind::TotalFiles => "total extracted files",
            LimitKind::ExpansionRatio => "single-step expansion ratio",
        };
        f.write_str(name)
    }
}

/// Errors produced while detecting, parsing or expanding entries.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// A cumulative counter or the depth bound was tripped.
    #[error("resource limit exceeded: {kind} {actual} > {limit} at {path}")]
    ResourceLimit {
        kind: LimitKind,
        limit: u64,
        actual: u64,
        path: String,
    },

    /// A container declared more bytes for a member than it holds.
    #[error("size mismatch in {path}: declared {declared} bytes, {available} available")]
    SizeMismatch {
        path: String,
        declared: u64,
        available: u64,
    },

    /// Structural corruption in a built-in container format.
    #[error("malformed archive {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// An external codec could not decode a recognized stream.
    #[error("failed to decode {format} archive {path}: {source}")]
    Backend {
        path: String,
        format: ArchiveType,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Another task of the same run hit a fatal error.
    #[error("extraction cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExtractError {
    /// Whether this error must abort the whole run regardless of policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::ResourceLimit { .. } | ExtractError::Cancelled
        )
    }

    /// The limit that was exceeded, if this is a resource-limit error.
    pub fn limit_kind(&self) -> Option<LimitKind> {
        match self {
            ExtractError::ResourceLimit { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        ExtractError::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn backend<E>(path: &str, format: ArchiveType, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ExtractError::Backend {
            path: path.to_string(),
            format,
            source: source.into(),
        }
    }

    /// Convert an I/O error raised while decoding `path`.
    ///
    /// A limit tripped inside a capped reader travels through codec crates as
    /// an `io::Error`; it is turned back into [`ExtractError::ResourceLimit`]
    /// here so that bombs are never reported as ordinary decode failures.
    pub(crate) fn from_decode(path: &str, format: ArchiveType, err: io::Error) -> Self {
        match Self::carried_by(&err) {
            Some(inner) => inner,
            None => ExtractError::backend(path, format, err),
        }
    }

    /// Like [`ExtractError::from_decode`] for plain reads and temp-file writes.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match Self::carried_by(&err) {
            Some(inner) => inner,
            None => ExtractError::Io(err),
        }
    }

    /// A limit hit or cancellation smuggled through an `io::Error`.
    fn carried_by(err: &io::Error) -> Option<ExtractError> {
        if let Some(hit) = LimitExceeded::find(err) {
            return Some(hit.into_error());
        }
        let cancelled = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ExtractError>())
            .is_some_and(|inner| matches!(inner, ExtractError::Cancelled));
        cancelled.then_some(ExtractError::Cancelled)
    }
}

/// Payload carried inside an `io::Error` when a capped reader runs out of budget.
#[derive(Debug, Clone)]
pub(crate) struct LimitExceeded {
    pub kind: LimitKind,
    pub limit: u64,
    pub actual: u64,
    pub path: String,
}

impl LimitExceeded {
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    pub fn into_error(self) -> ExtractError {
        ExtractError::ResourceLimit {
            kind: self.kind,
            limit: self.limit,
            actual: self.actual,
            path: self.path,
        }
    }

    /// Look for a limit payload anywhere in an I/O error's source chain.
    pub fn find(err: &io::Error) -> Option<LimitExceeded> {
        let mut current: Option<&(dyn std::error::Error + 'static)> =
            err.get_ref().map(|inner| inner as &(dyn std::error::Error + 'static));
        while let Some(e) = current {
            if let Some(hit) = e.downcast_ref::<LimitExceeded>() {
                return Some(hit.clone());
            }
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                if let Some(hit) = LimitExceeded::find(io_err) {
                    return Some(hit);
                }
            }
            current = e.source();
        }
        None
    }
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} > {} at {}",
            self.kind, self.actual, self.limit, self.path
        )
    }
}

impl std::error::Error for LimitExceeded {}

impl From<ExtractError> for io::Error {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Io(e) => e,
            ExtractError::ResourceLimit {
                kind,
                limit,
                actual,
                path,
            } => LimitExceeded {
                kind,
                limit,
                actual,
                path,
            }
            .into_io(),
            other => io::Error::other(other),
        }
    }
}
