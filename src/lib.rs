//! Recursive enumeration of files inside nested, mixed-format archives.
//!
//! The extractor detects each entry's format from its magic bytes, expands
//! containers through a registry of handlers (built-in parsers for ar/deb,
//! ISO9660 and VHD/VHDX images; codec backends for zip, 7z, rar, tar, gzip,
//! bzip2 and xz), and yields every leaf file as a flat sequence. Cumulative
//! limits on depth, bytes, file count and per-step expansion ratio make
//! decompression bombs and self-replicating archives fail fast instead of
//! exhausting the machine.
//!
//! ```no_run
//! use multiextract::{ExtractorConfig, extract};
//!
//! # fn main() -> multiextract::Result<()> {
//! for leaf in extract("package.deb", false, ExtractorConfig::default())? {
//!     let leaf = leaf?;
//!     println!("{} ({} bytes)", leaf.full_path(), leaf.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod entry;
pub mod error;
pub mod extractor;
pub mod magic;

use std::path::Path;

pub use archive::ar::ArMembers;
pub use archive::{ArchiveHandler, Children, HandlerRegistry};
pub use config::{ErrorPolicy, ExtractorConfig};
pub use entry::{Content, FileEntry};
pub use error::{ExtractError, LimitKind, Result};
pub use extractor::{BranchError, ExpansionBudget, Extraction, ExtractionStats, Extractor};
pub use magic::{ArchiveType, MiniMagic};

/// Extract everything under the file at `path` with the default handlers.
pub fn extract(path: impl AsRef<Path>, parallel: bool, config: ExtractorConfig) -> Result<Extraction> {
    Extractor::new(config).extract_file(path, parallel)
}
