pub mod ar;
pub mod compressed;
pub mod iso;
pub mod rar;
pub mod sevenz;
pub mod tar;
pub mod vhd;
pub mod zip;

use std::collections::HashMap;
use std::sync::Arc;

use crate::entry::FileEntry;
use crate::error::Result;
use crate::extractor::ExpansionBudget;
use crate::magic::ArchiveType;

/// Lazy sequence of children produced by one expansion step.
///
/// The iterator owns the parent entry, so the parent's backing storage is
/// released exactly when the iterator is dropped.
pub type Children = Box<dyn Iterator<Item = Result<FileEntry>> + Send>;

/// Capability for turning one archive entry into its children.
///
/// Built-in fixed-layout parsers and the codecs for standard formats both
/// sit behind this trait; the extractor applies the same limits to whatever
/// a handler yields.
pub trait ArchiveHandler: Send + Sync {
    /// Short human-readable format name for logging.
    fn format_name(&self) -> &str;

    /// Whether children are produced by decoding rather than slicing, in which
    /// case the single-step expansion ratio applies.
    fn expands(&self) -> bool {
        true
    }

    /// Start expanding `entry`.
    ///
    /// Errors returned here, or yielded by the iterator, are scoped to this
    /// branch unless they are resource-limit errors.
    fn expand(&self, entry: FileEntry, budget: ExpansionBudget) -> Result<Children>;
}

/// Maps each archive type to the handler that expands it.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ArchiveType, Arc<dyn ArchiveHandler>>,
}

impl HandlerRegistry {
    /// A registry with no handlers; every entry becomes a leaf.
    pub fn empty() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// The built-in parsers plus the bundled codec backends.
    pub fn with_defaults() -> Self {
        let mut registry = HandlerRegistry::empty();
        registry.register(ArchiveType::Ar, Arc::new(ar::ArHandler));
        registry.register(ArchiveType::Deb, Arc::new(ar::ArHandler));
        registry.register(ArchiveType::Iso9660, Arc::new(iso::IsoHandler));
        registry.register(ArchiveType::Vhd, Arc::new(vhd::VhdHandler));
        registry.register(ArchiveType::Vhdx, Arc::new(vhd::VhdxHandler));
        registry.register(ArchiveType::Tar, Arc::new(tar::TarHandler));
        registry.register(ArchiveType::Zip, Arc::new(zip::ZipHandler));
        registry.register(ArchiveType::SevenZip, Arc::new(sevenz::SevenZipHandler));
        registry.register(ArchiveType::Rar, Arc::new(rar::RarHandler));
        for codec in [ArchiveType::Gzip, ArchiveType::Bzip2, ArchiveType::Xz] {
            registry.register(codec, Arc::new(compressed::CompressedHandler::new(codec)));
        }
        registry
    }

    /// Register or replace the handler for `archive_type`.
    pub fn register(&mut self, archive_type: ArchiveType, handler: Arc<dyn ArchiveHandler>) {
        if archive_type.is_unknown() {
            return;
        }
        self.handlers.insert(archive_type, handler);
    }

    pub fn get(&self, archive_type: ArchiveType) -> Option<Arc<dyn ArchiveHandler>> {
        self.handlers.get(&archive_type).cloned()
    }

    pub fn supports(&self, archive_type: ArchiveType) -> bool {
        self.handlers.contains_key(&archive_type)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
