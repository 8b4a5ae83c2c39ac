//! 7-Zip backend.
//!
//! `sevenz-rust` hands out member streams through a callback, so members are
//! materialized up front while the callback runs. Every stream still passes
//! through the expansion budget, and the first failure stops the walk.

use log::debug;
use sevenz_rust::{Password, SevenZReader};

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;
use crate::magic::ArchiveType;

pub struct SevenZipHandler;

impl ArchiveHandler for SevenZipHandler {
    fn format_name(&self) -> &str {
        "7z"
    }

    fn expand(&self, mut entry: FileEntry, mut budget: ExpansionBudget) -> Result<Children> {
        let parent_path = entry.full_path();
        let mut content = entry.take_content();
        content.rewind_to_start()?;
        let len = content.len();

        let mut reader = SevenZReader::new(content, len, Password::empty()).map_err(|e| {
            ExtractError::backend(&parent_path, ArchiveType::SevenZip, e.to_string())
        })?;

        let mut children = Vec::new();
        let mut failure: Option<ExtractError> = None;
        let mut index = 0usize;

        let walked = reader.for_each_entries(|member, stream| {
            if member.is_directory {
                return Ok(true);
            }
            index += 1;
            let name = member.name.clone();
            let name = if name.trim_matches(['/', '\\', '.']).is_empty() {
                format!("member{index}")
            } else {
                name
            };
            let member_path = format!("{parent_path}/{name}");

            let declared = member.size;
            let result = budget
                .check_declared(declared, &member_path)
                .and_then(|_| {
                    let mut capped = budget.reader(stream, &member_path);
                    Content::spool(&mut capped, budget.threshold()).map_err(|e| {
                        ExtractError::from_decode(&member_path, ArchiveType::SevenZip, e)
                    })
                })
                .and_then(|content| {
                    if content.len() == declared {
                        Ok(content)
                    } else {
                        Err(ExtractError::SizeMismatch {
                            path: member_path.clone(),
                            declared,
                            available: content.len(),
                        })
                    }
                });
            match result {
                Ok(content) => {
                    budget.record(content.len());
                    children.push(FileEntry::child(&entry, &name, content));
                    Ok(true)
                }
                Err(e) => {
                    failure = Some(e);
                    Ok(false)
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        walked.map_err(|e| {
            ExtractError::backend(&parent_path, ArchiveType::SevenZip, e.to_string())
        })?;

        debug!("{parent_path}: 7z archive yielded {} files", children.len());
        Ok(Box::new(children.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::extractor::ExtractionContext;

    fn build_7z(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = sevenz_rust::SevenZWriter::new(std::io::Cursor::new(Vec::new())).unwrap();
        for (name, data) in members {
            let mut member = sevenz_rust::SevenZArchiveEntry::new();
            member.name = name.to_string();
            writer.push_archive_entry(member, Some(*data)).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn members_with(config: ExtractorConfig, data: Vec<u8>) -> Result<Vec<FileEntry>> {
        let ctx = ExtractionContext::new(config);
        let entry = FileEntry::new("test.7z", "", Content::from_bytes(data));
        let budget = ctx.budget(&entry, true);
        SevenZipHandler.expand(entry, budget)?.collect()
    }

    #[test]
    fn test_members_are_yielded_with_contents() {
        let data = build_7z(&[("top.txt", b"top level"), ("dir/inner.bin", &[3u8; 100])]);
        let mut members = members_with(ExtractorConfig::default(), data).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].full_path(), "test.7z/top.txt");
        assert_eq!(members[0].content.read_all().unwrap(), b"top level");
        assert_eq!(members[1].name, "inner.bin");
        assert_eq!(members[1].parent_path, "test.7z/dir");
        assert_eq!(members[1].content.read_all().unwrap(), vec![3u8; 100]);
        assert_eq!(members[1].depth, 1);
    }

    #[test]
    fn test_declared_size_over_ratio_is_refused() {
        let zeros = vec![0u8; 2 * 1024 * 1024];
        let data = build_7z(&[("zeros.bin", &zeros)]);
        let config = ExtractorConfig::default().with_max_ratio(5.0);
        let err = members_with(config, data).unwrap_err();
        assert_eq!(err.limit_kind(), Some(crate::error::LimitKind::ExpansionRatio));
    }

    #[test]
    fn test_truncated_archive_is_backend_error() {
        let ctx = ExtractionContext::new(ExtractorConfig::default());
        let mut data = b"7z\xBC\xAF\x27\x1C\x00\x04".to_vec();
        data.extend_from_slice(&[0xFF; 4]);
        data.extend_from_slice(&1000u64.to_le_bytes());
        data.extend_from_slice(&50u64.to_le_bytes());
        data.extend_from_slice(&[0xFF; 4]);
        let entry = FileEntry::new("broken.7z", "", Content::from_bytes(data));
        let budget = ctx.budget(&entry, true);
        let err = SevenZipHandler.expand(entry, budget).err().unwrap();
        assert!(matches!(
            err,
            ExtractError::Backend {
                format: ArchiveType::SevenZip,
                ..
            }
        ));
        assert!(!err.is_fatal());
    }
}
