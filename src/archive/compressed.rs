//! Single-stream codecs: gzip, bzip2 and xz.
//!
//! Each yields exactly one child holding the decoded stream. The decoder
//! output goes through the expansion budget, so a small input that inflates
//! without bound trips the ratio or byte limit instead of filling the disk.

use flate2::bufread::GzDecoder;
use log::{debug, trace};
use std::io::{self, BufRead, BufReader, Read};

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;
use crate::magic::ArchiveType;

pub struct CompressedHandler {
    codec: ArchiveType,
}

impl CompressedHandler {
    /// `codec` must be one of `Gzip`, `Bzip2` or `Xz`.
    pub fn new(codec: ArchiveType) -> Self {
        CompressedHandler { codec }
    }

    fn decoder<'a, R: Read + Send + 'a>(&self, reader: R) -> Box<dyn Read + Send + 'a> {
        match self.codec {
            ArchiveType::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            ArchiveType::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            _ => Box::new(GzMembers::new(BufReader::new(reader))),
        }
    }

    fn decode(&self, mut entry: FileEntry, mut budget: ExpansionBudget) -> Result<FileEntry> {
        budget.context().ensure_active()?;
        let name = decompressed_name(&entry.name, self.codec);
        let parent_path = entry.full_path();
        let member_path = format!("{parent_path}/{name}");
        debug!("decoding {} stream {parent_path}", self.codec);

        entry.content.rewind_to_start()?;
        let decoder = self.decoder(&mut entry.content);
        let mut reader = budget.reader(decoder, &member_path);
        let content = Content::spool(&mut reader, budget.threshold())
            .map_err(|e| ExtractError::from_decode(&parent_path, self.codec, e))?;
        drop(reader);

        budget.record(content.len());
        Ok(FileEntry::child(&entry, &name, content))
    }
}

/// Concatenated gzip members decoded one after another.
///
/// Input that holds nothing but zero bytes after a member, such as the block
/// padding tape tools append to a `.tar.gz`, ends the stream cleanly.
struct GzMembers<R: BufRead> {
    decoder: Option<GzDecoder<R>>,
    members: usize,
}

impl<R: BufRead> GzMembers<R> {
    fn new(input: R) -> Self {
        GzMembers {
            decoder: Some(GzDecoder::new(input)),
            members: 0,
        }
    }
}

/// Skip zero bytes; true when nothing else follows.
fn only_zeros_left<R: BufRead>(input: &mut R) -> io::Result<bool> {
    loop {
        let buf = input.fill_buf()?;
        if buf.is_empty() {
            return Ok(true);
        }
        if let Some(pos) = buf.iter().position(|&b| b != 0) {
            input.consume(pos);
            return Ok(false);
        }
        let len = buf.len();
        input.consume(len);
    }
}

impl<R: BufRead> Read for GzMembers<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(0);
            };
            let n = decoder.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }

            self.members += 1;
            let Some(mut input) = self.decoder.take().map(GzDecoder::into_inner) else {
                return Ok(0);
            };
            if only_zeros_left(&mut input)? {
                trace!("gzip stream ended after {} members", self.members);
                return Ok(0);
            }
            self.decoder = Some(GzDecoder::new(input));
        }
    }
}

impl ArchiveHandler for CompressedHandler {
    fn format_name(&self) -> &str {
        self.codec.as_str()
    }

    fn expand(&self, entry: FileEntry, budget: ExpansionBudget) -> Result<Children> {
        let handler = CompressedHandler { codec: self.codec };
        let mut pending = Some((entry, budget));
        Ok(Box::new(std::iter::from_fn(move || {
            pending
                .take()
                .map(|(entry, budget)| handler.decode(entry, budget))
        })))
    }
}

/// Name for the decoded child: the compression suffix is removed, and the
/// tarball shorthands map back to `.tar`.
pub fn decompressed_name(name: &str, codec: ArchiveType) -> String {
    let (suffixes, tar_shorthands): (&[&str], &[&str]) = match codec {
        ArchiveType::Gzip => (&[".gz", ".gzip", ".z"], &[".tgz", ".taz"]),
        ArchiveType::Bzip2 => (&[".bz2", ".bzip2", ".bz"], &[".tbz2", ".tbz", ".tb2"]),
        ArchiveType::Xz => (&[".xz"], &[".txz"]),
        _ => (&[], &[]),
    };

    let lower = name.to_lowercase();
    for shorthand in tar_shorthands {
        if lower.ends_with(shorthand) && lower.len() > shorthand.len() {
            return format!("{}.tar", &name[..name.len() - shorthand.len()]);
        }
    }
    for suffix in suffixes {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    format!("{name}.out")
}
