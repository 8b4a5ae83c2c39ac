//! ISO9660 image parser.
//!
//! The primary volume descriptor sits in logical sector 16 and points at the
//! root directory record. Directory extents are walked depth-first; file
//! records are collected first (metadata only) and their data is sliced out
//! of the image lazily. Rock Ridge and Joliet extensions are ignored, so
//! names are the plain ISO identifiers with the `;1` version removed.
//!
//! Records may share or overlap extents, so the files listed can add up to
//! far more than the image holds. The handler keeps the default
//! `expands() == true` and the ratio allowance bounds that sum.

use log::{debug, trace};
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;

pub const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR: u64 = 16;
/// Descriptors scanned before giving up on finding the primary one.
const MAX_DESCRIPTORS: u64 = 32;
const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;
const ROOT_RECORD_OFFSET: usize = 156;
const MIN_RECORD_LEN: usize = 34;
const FLAG_DIRECTORY: u8 = 0x02;

pub struct IsoHandler;

impl ArchiveHandler for IsoHandler {
    fn format_name(&self) -> &str {
        "iso9660"
    }

    fn expand(&self, mut entry: FileEntry, budget: ExpansionBudget) -> Result<Children> {
        let files = list_files(&mut entry, &budget)?;
        debug!("{}: ISO9660 image lists {} files", entry.full_path(), files.len());
        Ok(Box::new(IsoMembers {
            parent: entry,
            budget,
            files: files.into_iter(),
            done: false,
        }))
    }
}

/// One parsed directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirRecord {
    extent: u32,
    data_len: u32,
    flags: u8,
    identifier: Vec<u8>,
}

impl DirRecord {
    fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < MIN_RECORD_LEN - 1 {
            return None;
        }
        let name_len = raw[32] as usize;
        let identifier = raw.get(33..33 + name_len)?.to_vec();
        Some(DirRecord {
            extent: u32::from_le_bytes(raw[2..6].try_into().ok()?),
            data_len: u32::from_le_bytes(raw[10..14].try_into().ok()?),
            flags: raw[25],
            identifier,
        })
    }

    fn is_dir(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// The `.` and `..` entries.
    fn is_self_or_parent(&self) -> bool {
        matches!(self.identifier.as_slice(), [0] | [1])
    }

    /// Identifier without the `;N` version and the trailing dot of an
    /// extension-less name.
    fn name(&self) -> String {
        let raw = String::from_utf8_lossy(&self.identifier).to_string();
        let base = match raw.rfind(';') {
            Some(i) => &raw[..i],
            None => raw.as_str(),
        };
        let base = base.strip_suffix('.').unwrap_or(base);
        base.to_string()
    }
}

/// A file found in the directory tree.
#[derive(Debug, Clone)]
struct IsoFile {
    path: String,
    offset: u64,
    size: u64,
}

fn read_block(content: &mut Content, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = content.peek_at(offset, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Locate the primary volume descriptor and return (block size, root record).
fn primary_descriptor(entry: &mut FileEntry) -> Result<(u64, DirRecord)> {
    let path = entry.full_path();
    for sector in FIRST_DESCRIPTOR..FIRST_DESCRIPTOR + MAX_DESCRIPTORS {
        let desc = read_block(&mut entry.content, sector * SECTOR_SIZE, SECTOR_SIZE as usize)?;
        if desc.len() < SECTOR_SIZE as usize || &desc[1..6] != b"CD001" {
            break;
        }
        match desc[0] {
            DESCRIPTOR_PRIMARY => {
                let block_size = u16::from_le_bytes([desc[128], desc[129]]) as u64;
                let block_size = match block_size {
                    512 | 1024 | 2048 => block_size,
                    _ => SECTOR_SIZE,
                };
                let root = DirRecord::parse(
                    &desc[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + MIN_RECORD_LEN],
                )
                .ok_or_else(|| ExtractError::malformed(&path, "unreadable root directory record"))?;
                return Ok((block_size, root));
            }
            DESCRIPTOR_TERMINATOR => break,
            _ => continue,
        }
    }
    Err(ExtractError::malformed(&path, "no primary volume descriptor"))
}

/// Walk the directory tree and collect every file record.
fn list_files(entry: &mut FileEntry, budget: &ExpansionBudget) -> Result<Vec<IsoFile>> {
    let image_path = entry.full_path();
    let image_len = entry.content.len();
    let (block_size, root) = primary_descriptor(entry)?;

    let mut files = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root.extent, root.data_len, String::new())];
    visited.insert(root.extent);

    while let Some((extent, data_len, dir_path)) = stack.pop() {
        budget.context().ensure_active()?;
        let start = extent as u64 * block_size;
        let len = data_len as u64;
        if start.saturating_add(len) > image_len {
            return Err(ExtractError::SizeMismatch {
                path: format!("{image_path}:{dir_path}/"),
                declared: len,
                available: image_len.saturating_sub(start),
            });
        }
        let data = read_block(&mut entry.content, start, len as usize)?;

        let mut subdirs = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let rec_len = data[pos] as usize;
            if rec_len == 0 {
                // Records never straddle a block; zero fill runs to the next one.
                let next = (pos as u64 / block_size + 1) * block_size;
                pos = next as usize;
                continue;
            }
            if rec_len < MIN_RECORD_LEN - 1 || pos + rec_len > data.len() {
                return Err(ExtractError::malformed(
                    &image_path,
                    format!("bad directory record at byte {} of {dir_path:?}", pos),
                ));
            }
            let Some(record) = DirRecord::parse(&data[pos..pos + rec_len]) else {
                return Err(ExtractError::malformed(
                    &image_path,
                    format!("truncated directory record in {dir_path:?}"),
                ));
            };
            pos += rec_len;
            if record.is_self_or_parent() {
                continue;
            }

            let name = record.name();
            let path = if dir_path.is_empty() {
                name.clone()
            } else {
                format!("{dir_path}/{name}")
            };
            trace!("{image_path}: record {path:?} extent {}", record.extent);

            if record.is_dir() {
                if visited.insert(record.extent) {
                    subdirs.push((record.extent, record.data_len, path));
                } else {
                    debug!("{image_path}: directory loop at {path:?}, skipping");
                }
            } else {
                files.push(IsoFile {
                    path,
                    offset: record.extent as u64 * block_size,
                    size: record.data_len as u64,
                });
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }

    Ok(files)
}

/// Lazy iterator over the files of one ISO image.
pub struct IsoMembers {
    parent: FileEntry,
    budget: ExpansionBudget,
    files: std::vec::IntoIter<IsoFile>,
    done: bool,
}

impl IsoMembers {
    fn read_file(&mut self, file: IsoFile) -> Result<FileEntry> {
        let image_len = self.parent.content.len();
        let member_path = format!("{}/{}", self.parent.full_path(), file.path);
        if file.offset.saturating_add(file.size) > image_len {
            return Err(ExtractError::SizeMismatch {
                path: member_path,
                declared: file.size,
                available: image_len.saturating_sub(file.offset),
            });
        }

        self.budget.check_declared(file.size, &member_path)?;
        self.parent.content.seek(SeekFrom::Start(file.offset))?;
        let slice = (&mut self.parent.content).take(file.size);
        let mut reader = self.budget.reader(slice, &member_path);
        let content = Content::spool(&mut reader, self.budget.threshold())
            .map_err(ExtractError::from_io)?;
        self.budget.record(content.len());

        Ok(FileEntry::child(&self.parent, &file.path, content))
    }
}

impl Iterator for IsoMembers {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let file = self.files.next()?;
            if file.path.trim_matches('/').is_empty() {
                continue;
            }
            let result = self.read_file(file);
            if result.is_err() {
                self.done = true;
            }
            return Some(result);
        }
    }
}
