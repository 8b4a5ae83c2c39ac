//! AR-family container parser (`.a`, `.ar`, `.deb`).
//!
//! Layout: an 8-byte global magic, then a sequence of members, each a 60-byte
//! ASCII header immediately followed by the member bytes. Members with an odd
//! size are followed by one `\n` padding byte.
//!
//! Header fields (offsets within the 60 bytes):
//! - 0..16: file name, space padded
//! - 16..28: modification time, decimal
//! - 28..34: owner id, decimal
//! - 34..40: group id, decimal
//! - 40..48: mode, octal
//! - 48..58: size, decimal
//! - 58..60: terminator "`\n"
//!
//! The walk is driven entirely by the headers: each member's position is the
//! previous member's data end plus padding. There is no member count, so a
//! header whose size field is not a number ends the archive.

use log::{debug, trace};
use std::io::{Read, Seek, SeekFrom};

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;

pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
pub const HEADER_LEN: u64 = 60;

/// Handler for GNU/BSD ar archives and Debian packages.
pub struct ArHandler;

impl ArchiveHandler for ArHandler {
    fn format_name(&self) -> &str {
        "ar"
    }

    fn expands(&self) -> bool {
        false
    }

    fn expand(&self, mut entry: FileEntry, budget: ExpansionBudget) -> Result<Children> {
        let mut magic = [0u8; 8];
        let n = entry.content.peek_at(0, &mut magic)?;
        if n < magic.len() || &magic != AR_MAGIC {
            return Err(ExtractError::malformed(
                &entry.full_path(),
                "missing !<arch> signature",
            ));
        }
        Ok(Box::new(ArMembers::new(entry, budget)))
    }
}

/// One parsed 60-byte member header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArHeader {
    pub raw_name: String,
    pub size: u64,
    pub mtime: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
}

impl ArHeader {
    /// Parse a header. Returns `None` when the size field is not a
    /// non-negative decimal integer, which marks the end of the archive.
    pub fn parse(header: &[u8; HEADER_LEN as usize]) -> Option<Self> {
        let size = field(&header[48..58]).parse::<u64>().ok()?;
        Some(ArHeader {
            raw_name: field(&header[0..16]),
            size,
            mtime: field(&header[16..28]).parse().ok(),
            uid: field(&header[28..34]).parse().ok(),
            gid: field(&header[34..40]).parse().ok(),
            mode: u32::from_str_radix(&field(&header[40..48]), 8).ok(),
        })
    }
}

/// Trim an ASCII header field.
fn field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// How a member's name is stored.
#[derive(Debug, PartialEq, Eq)]
enum MemberName {
    /// Regular name, with the GNU trailing `/` removed.
    Plain(String),
    /// GNU symbol table (`/` or `/SYM64/`) or BSD `__.SYMDEF`.
    SymbolTable,
    /// GNU long-name table (`//`).
    LongNameTable,
    /// GNU long name: offset into the long-name table.
    LongNameRef(usize),
    /// BSD long name: the first `n` bytes of the member data.
    Embedded(u64),
}

impl MemberName {
    fn classify(raw: &str) -> Self {
        match raw {
            "/" | "/SYM64/" | "__.SYMDEF" | "__.SYMDEF SORTED" => return MemberName::SymbolTable,
            "//" => return MemberName::LongNameTable,
            _ => {}
        }
        if let Some(len) = raw.strip_prefix("#1/") {
            if let Ok(len) = len.parse() {
                return MemberName::Embedded(len);
            }
        }
        if let Some(offset) = raw.strip_prefix('/') {
            if let Ok(offset) = offset.parse() {
                return MemberName::LongNameRef(offset);
            }
        }
        MemberName::Plain(raw.strip_suffix('/').unwrap_or(raw).to_string())
    }
}

/// Lazy iterator over the members of one ar container.
///
/// Owns the parent entry; each member is materialized into its own scoped
/// temporary resource when it is yielded.
pub struct ArMembers {
    parent: FileEntry,
    budget: ExpansionBudget,
    offset: u64,
    long_names: Vec<u8>,
    index: usize,
    done: bool,
}

impl ArMembers {
    pub fn new(parent: FileEntry, budget: ExpansionBudget) -> Self {
        ArMembers {
            parent,
            budget,
            offset: AR_MAGIC.len() as u64,
            long_names: Vec::new(),
            index: 0,
            done: false,
        }
    }

    /// Read the next header; `None` at a normal end of archive.
    fn next_header(&mut self) -> Result<Option<(ArHeader, u64)>> {
        let len = self.parent.content.len();
        if len.saturating_sub(self.offset) < HEADER_LEN {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_LEN as usize];
        self.parent.content.seek(SeekFrom::Start(self.offset))?;
        self.parent.content.read_exact(&mut raw)?;

        let Some(header) = ArHeader::parse(&raw) else {
            debug!(
                "{}: non-numeric size at offset {}, treating as end of archive",
                self.parent.full_path(),
                self.offset
            );
            return Ok(None);
        };
        trace!("{}: member header {header:?}", self.parent.full_path());

        let data_start = self.offset + HEADER_LEN;
        let available = len - data_start;
        if header.size > available {
            return Err(ExtractError::SizeMismatch {
                path: format!("{}:{}", self.parent.full_path(), header.raw_name),
                declared: header.size,
                available,
            });
        }

        self.offset = data_start + header.size + (header.size & 1);
        Ok(Some((header, data_start)))
    }

    fn resolve_long_name(&self, offset: usize) -> Option<String> {
        let table = self.long_names.get(offset..)?;
        let end = table
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(table.len());
        let name = String::from_utf8_lossy(&table[..end]);
        let name = name.trim_end().trim_end_matches('/');
        (!name.is_empty()).then(|| name.to_string())
    }

    fn read_member(&mut self) -> Result<Option<FileEntry>> {
        loop {
            let Some((header, data_start)) = self.next_header()? else {
                return Ok(None);
            };

            let (name, skip) = match MemberName::classify(&header.raw_name) {
                MemberName::SymbolTable => continue,
                MemberName::LongNameTable => {
                    self.budget.check_declared(header.size, &self.parent.full_path())?;
                    let mut table = Vec::with_capacity(header.size as usize);
                    self.parent.content.seek(SeekFrom::Start(data_start))?;
                    (&mut self.parent.content)
                        .take(header.size)
                        .read_to_end(&mut table)?;
                    self.long_names = table;
                    continue;
                }
                MemberName::LongNameRef(offset) => (self.resolve_long_name(offset), 0),
                MemberName::Embedded(name_len) => {
                    if name_len > header.size {
                        return Err(ExtractError::SizeMismatch {
                            path: format!("{}:{}", self.parent.full_path(), header.raw_name),
                            declared: name_len,
                            available: header.size,
                        });
                    }
                    let mut raw = vec![0u8; name_len as usize];
                    self.parent.content.seek(SeekFrom::Start(data_start))?;
                    self.parent.content.read_exact(&mut raw)?;
                    let name = String::from_utf8_lossy(&raw)
                        .trim_end_matches('\0')
                        .to_string();
                    (Some(name), name_len)
                }
                MemberName::Plain(name) => (Some(name), 0),
            };

            self.index += 1;
            let name = name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("member{}", self.index));
            let size = header.size - skip;
            let member_path = format!("{}/{name}", self.parent.full_path());

            self.budget.check_declared(size, &member_path)?;
            self.parent.content.seek(SeekFrom::Start(data_start + skip))?;
            let slice = (&mut self.parent.content).take(size);
            let mut reader = self.budget.reader(slice, &member_path);
            let content = Content::spool(&mut reader, self.budget.threshold())
                .map_err(ExtractError::from_io)?;

            if content.len() != size {
                return Err(ExtractError::SizeMismatch {
                    path: member_path,
                    declared: size,
                    available: content.len(),
                });
            }

            self.budget.record(size);
            return Ok(Some(FileEntry::child(&self.parent, &name, content)));
        }
    }
}

impl Iterator for ArMembers {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_member() {
            Ok(Some(child)) => Some(Ok(child)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
