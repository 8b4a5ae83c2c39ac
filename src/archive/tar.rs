//! TAR members through the `tar` crate.
//!
//! `tar::Entries` borrows its archive, so members are read while the walk
//! runs and handed out afterwards. Each entry's data passes through the
//! expansion budget. A failure ends the walk; members read before it are
//! still yielded, followed by the error.

use log::{debug, trace};
use std::io;
use tar::{Archive, EntryType};

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;

pub struct TarHandler;

impl ArchiveHandler for TarHandler {
    fn format_name(&self) -> &str {
        "tar"
    }

    fn expands(&self) -> bool {
        false
    }

    fn expand(&self, mut entry: FileEntry, mut budget: ExpansionBudget) -> Result<Children> {
        let mut content = entry.take_content();
        content.rewind_to_start()?;

        let mut children = Vec::new();
        if let Err(e) = read_members(&entry, content, &mut budget, &mut children) {
            children.push(Err(e));
        }
        debug!(
            "{}: tar archive yielded {} results",
            entry.full_path(),
            children.len()
        );
        Ok(Box::new(children.into_iter()))
    }
}

/// Header-level failures come back from the tar crate as plain I/O errors.
fn tar_error(path: &str, err: io::Error) -> ExtractError {
    match err.kind() {
        io::ErrorKind::Other | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            ExtractError::malformed(path, err.to_string())
        }
        _ => ExtractError::from_io(err),
    }
}

fn read_members(
    parent: &FileEntry,
    content: Content,
    budget: &mut ExpansionBudget,
    children: &mut Vec<Result<FileEntry>>,
) -> Result<()> {
    let parent_path = parent.full_path();
    let mut archive = Archive::new(content);
    let entries = archive
        .entries_with_seek()
        .map_err(|e| tar_error(&parent_path, e))?;

    let mut index = 0usize;
    for member in entries {
        budget.context().ensure_active()?;
        let member = member.map_err(|e| tar_error(&parent_path, e))?;

        let entry_type = member.header().entry_type();
        let path = member
            .path()
            .map_err(|e| tar_error(&parent_path, e))?
            .to_string_lossy()
            .into_owned();
        let declared = member.size();
        trace!("{parent_path}: tar header {path:?} type {entry_type:?} size {declared}");

        // Directories, links, devices and fifos carry no file data.
        if !matches!(entry_type, EntryType::Regular | EntryType::Continuous) || path.ends_with('/')
        {
            continue;
        }

        index += 1;
        let path = if path.trim_matches('/').is_empty() {
            format!("member{index}")
        } else {
            path
        };
        let member_path = format!("{parent_path}/{path}");

        budget.check_declared(declared, &member_path)?;
        let mut reader = budget.reader(member, &member_path);
        let content =
            Content::spool(&mut reader, budget.threshold()).map_err(ExtractError::from_io)?;
        drop(reader);

        if content.len() != declared {
            return Err(ExtractError::SizeMismatch {
                path: member_path,
                declared,
                available: content.len(),
            });
        }
        budget.record(content.len());

        let child = FileEntry::child(parent, &path, content);
        if child.name.is_empty() {
            debug!("{parent_path}: skipping unnamed member {path:?}");
            continue;
        }
        children.push(Ok(child));
    }
    Ok(())
}
