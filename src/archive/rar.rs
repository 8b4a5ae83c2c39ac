//! RAR backend (v4 and v5) on the `unrar` crate.
//!
//! The library only opens archives by path, so the parent is copied into a
//! named temp file for the duration of the walk. Members are read in
//! archive order while the archive is open; every declared size is checked
//! before unpacking and every member stream passes through the budget.

use log::{debug, trace};
use std::fmt::Display;
use std::io;
use std::path::Path;
use unrar::Archive;

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;
use crate::magic::ArchiveType;

pub struct RarHandler;

impl ArchiveHandler for RarHandler {
    fn format_name(&self) -> &str {
        "rar"
    }

    fn expand(&self, mut entry: FileEntry, mut budget: ExpansionBudget) -> Result<Children> {
        let mut content = entry.take_content();
        content.rewind_to_start()?;

        let mut spool = tempfile::Builder::new()
            .prefix("multiextract-")
            .suffix(".rar")
            .tempfile()?;
        io::copy(&mut content, spool.as_file_mut())?;
        drop(content);

        let mut children = Vec::new();
        if let Err(e) = read_members(&entry, spool.path(), &mut budget, &mut children) {
            children.push(Err(e));
        }
        debug!(
            "{}: rar archive yielded {} results",
            entry.full_path(),
            children.len()
        );
        Ok(Box::new(children.into_iter()))
    }
}

fn rar_error(path: &str, err: impl Display) -> ExtractError {
    ExtractError::backend(path, ArchiveType::Rar, err.to_string())
}

fn read_members(
    parent: &FileEntry,
    archive_path: &Path,
    budget: &mut ExpansionBudget,
    children: &mut Vec<Result<FileEntry>>,
) -> Result<()> {
    let parent_path = parent.full_path();
    let mut archive = Archive::new(archive_path)
        .open_for_processing()
        .map_err(|e| rar_error(&parent_path, e))?;

    let mut index = 0usize;
    loop {
        budget.context().ensure_active()?;
        let Some(header) = archive
            .read_header()
            .map_err(|e| rar_error(&parent_path, e))?
        else {
            return Ok(());
        };

        let (is_file, filename, declared) = {
            let member = header.entry();
            (member.is_file(), member.filename.clone(), member.unpacked_size)
        };
        let name = filename.to_string_lossy().replace('\\', "/");
        trace!("{parent_path}: rar header {name:?} size {declared}");

        if !is_file {
            archive = header.skip().map_err(|e| rar_error(&parent_path, e))?;
            continue;
        }

        index += 1;
        let name = if name.trim_matches(['/', '.']).is_empty() {
            format!("member{index}")
        } else {
            name
        };
        let member_path = format!("{parent_path}/{name}");

        budget.check_declared(declared, &member_path)?;
        let (data, rest) = header.read().map_err(|e| rar_error(&member_path, e))?;
        archive = rest;

        let mut reader = budget.reader(&data[..], &member_path);
        let content = Content::spool(&mut reader, budget.threshold())
            .map_err(|e| ExtractError::from_decode(&member_path, ArchiveType::Rar, e))?;
        drop(reader);

        if content.len() != declared {
            return Err(ExtractError::SizeMismatch {
                path: member_path,
                declared,
                available: content.len(),
            });
        }
        budget.record(content.len());

        let child = FileEntry::child(parent, &name, content);
        if child.name.is_empty() {
            continue;
        }
        children.push(Ok(child));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::extractor::ExtractionContext;

    #[test]
    fn test_garbage_after_signature_is_backend_error() {
        let ctx = ExtractionContext::new(ExtractorConfig::default());
        let mut data = b"Rar!\x1A\x07\x01\x00".to_vec();
        data.extend_from_slice(&[0xEE; 64]);
        let entry = FileEntry::new("broken.rar", "", Content::from_bytes(data));
        let budget = ctx.budget(&entry, true);
        let results: Vec<_> = RarHandler.expand(entry, budget).unwrap().collect();
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Backend {
                format: ArchiveType::Rar,
                ..
            }
        ));
        assert!(!err.is_fatal());
    }
}
