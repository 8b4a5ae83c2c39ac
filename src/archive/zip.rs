use log::{debug, trace};
use zip::ZipArchive;
use zip::result::ZipError;

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;
use crate::magic::ArchiveType;

pub struct ZipHandler;

impl ArchiveHandler for ZipHandler {
    fn format_name(&self) -> &str {
        "zip"
    }

    fn expand(&self, mut entry: FileEntry, budget: ExpansionBudget) -> Result<Children> {
        let mut content = entry.take_content();
        content.rewind_to_start()?;
        let archive = ZipArchive::new(content).map_err(|e| zip_error(&entry.full_path(), e))?;
        debug!(
            "{}: zip central directory lists {} entries",
            entry.full_path(),
            archive.len()
        );
        Ok(Box::new(ZipMembers {
            parent: entry,
            archive,
            budget,
            index: 0,
            done: false,
        }))
    }
}

fn zip_error(path: &str, err: ZipError) -> ExtractError {
    match err {
        ZipError::Io(e) => ExtractError::from_decode(path, ArchiveType::Zip, e),
        other => ExtractError::backend(path, ArchiveType::Zip, other),
    }
}

/// Lazy iterator over the file entries of one ZIP archive.
///
/// `parent` keeps the archive's name and lineage; its bytes live in
/// `archive` for as long as the iterator does.
pub struct ZipMembers {
    parent: FileEntry,
    archive: ZipArchive<Content>,
    budget: ExpansionBudget,
    index: usize,
    done: bool,
}

impl ZipMembers {
    fn read_member(&mut self) -> Result<Option<FileEntry>> {
        let parent_path = self.parent.full_path();
        while self.index < self.archive.len() {
            self.budget.context().ensure_active()?;
            let i = self.index;
            self.index += 1;

            let file = self
                .archive
                .by_index(i)
                .map_err(|e| zip_error(&parent_path, e))?;
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            let name = if name.trim_matches(['/', '\\', '.']).is_empty() {
                format!("member{}", i + 1)
            } else {
                name
            };
            let member_path = format!("{parent_path}/{name}");
            trace!(
                "{member_path}: {} bytes ({} compressed)",
                file.size(),
                file.compressed_size()
            );

            // Zip bomb protection: refuse on the declared size before inflating
            let declared = file.size();
            self.budget.check_declared(declared, &member_path)?;

            let mut reader = self.budget.reader(file, &member_path);
            let content = Content::spool(&mut reader, self.budget.threshold())
                .map_err(|e| ExtractError::from_decode(&member_path, ArchiveType::Zip, e))?;
            drop(reader);

            if content.len() != declared {
                return Err(ExtractError::SizeMismatch {
                    path: member_path,
                    declared,
                    available: content.len(),
                });
            }

            self.budget.record(content.len());
            let child = FileEntry::child(&self.parent, &name, content);
            if child.name.is_empty() {
                continue;
            }
            return Ok(Some(child));
        }
        Ok(None)
    }
}

impl Iterator for ZipMembers {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.read_member().transpose();
        if !matches!(result, Some(Ok(_))) {
            self.done = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::error::LimitKind;
    use crate::extractor::ExtractionContext;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in members {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn members_with(config: ExtractorConfig, data: Vec<u8>) -> Vec<Result<FileEntry>> {
        let ctx = ExtractionContext::new(config);
        let entry = FileEntry::new("test.zip", "", Content::from_bytes(data));
        let budget = ctx.budget(&entry, true);
        ZipHandler.expand(entry, budget).unwrap().collect()
    }

    #[test]
    fn test_files_are_yielded_and_directories_skipped() {
        let data = build_zip(&[
            ("docs/", b""),
            ("docs/readme.txt", b"read me"),
            ("root.bin", b"\x00\x01"),
        ]);
        let mut members: Vec<_> = members_with(ExtractorConfig::default(), data)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "readme.txt");
        assert_eq!(members[0].full_path(), "test.zip/docs/readme.txt");
        assert_eq!(members[0].content.read_all().unwrap(), b"read me");
        assert_eq!(members[1].full_path(), "test.zip/root.bin");
        assert_eq!(members[1].depth, 1);
    }

    #[test]
    fn test_declared_size_over_ratio_is_refused() {
        let zeros = vec![0u8; 2 * 1024 * 1024];
        let data = build_zip(&[("zeros.bin", &zeros)]);
        let config = ExtractorConfig::default().with_max_ratio(5.0);
        let results = members_with(config, data);
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.limit_kind(), Some(LimitKind::ExpansionRatio));
    }

    #[test]
    fn test_understated_size_is_size_mismatch() {
        let body = b"the quick brown fox jumps over a lazy dog";
        assert_eq!(body.len(), 41);
        let mut data = build_zip(&[("fox.txt", body)]);

        // Uncompressed size lives at +22 in the local header and +24 in the
        // central directory record.
        data[22..26].copy_from_slice(&5u32.to_le_bytes());
        let central = data
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        data[central + 24..central + 28].copy_from_slice(&5u32.to_le_bytes());

        let results = members_with(ExtractorConfig::default(), data);
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(ExtractError::SizeMismatch {
                declared,
                available,
                ..
            }) => {
                assert_eq!(*declared, 5);
                assert_eq!(*available, 41);
            }
            other => panic!("expected a size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_backend_error() {
        let ctx = ExtractionContext::new(ExtractorConfig::default());
        let data = &b"PK\x03\x04 truncated"[..];
        let entry = FileEntry::new("bad.zip", "", Content::from_bytes(data));
        let budget = ctx.budget(&entry, true);
        let err = ZipHandler.expand(entry, budget).err().unwrap();
        assert!(matches!(
            err,
            ExtractError::Backend {
                format: ArchiveType::Zip,
                ..
            }
        ));
    }
}
