//! Magic-byte archive type detection.

use log::debug;
use std::fmt;

use crate::entry::{Content, FileEntry};

/// Archive formats the extractor knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveType {
    Zip,
    SevenZip,
    Tar,
    Rar,
    Bzip2,
    Gzip,
    Xz,
    Deb,
    Ar,
    Iso9660,
    Vhd,
    Vhdx,
    /// Terminal: no further expansion is attempted.
    Unknown,
}

impl ArchiveType {
    pub const ALL: [ArchiveType; 13] = [
        ArchiveType::Zip,
        ArchiveType::SevenZip,
        ArchiveType::Tar,
        ArchiveType::Rar,
        ArchiveType::Bzip2,
        ArchiveType::Gzip,
        ArchiveType::Xz,
        ArchiveType::Deb,
        ArchiveType::Ar,
        ArchiveType::Iso9660,
        ArchiveType::Vhd,
        ArchiveType::Vhdx,
        ArchiveType::Unknown,
    ];

    pub fn is_unknown(&self) -> bool {
        matches!(self, ArchiveType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveType::Zip => "ZIP",
            ArchiveType::SevenZip => "7-ZIP",
            ArchiveType::Tar => "TAR",
            ArchiveType::Rar => "RAR",
            ArchiveType::Bzip2 => "BZIP2",
            ArchiveType::Gzip => "GZIP",
            ArchiveType::Xz => "XZ",
            ArchiveType::Deb => "DEB",
            ArchiveType::Ar => "AR",
            ArchiveType::Iso9660 => "ISO9660",
            ArchiveType::Vhd => "VHD",
            ArchiveType::Vhdx => "VHDX",
            ArchiveType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leading bytes read from offset 0; covers every signature except the
/// ISO9660 volume descriptor and the VHD footer, which are checked at fixed offsets.
const PREFIX_LEN: usize = 512;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const DEB_FIRST_MEMBER: &[u8] = b"debian-binary";
const ISO_MAGIC_OFFSET: u64 = 0x8001;
const ISO_MAGIC: &[u8] = b"CD001";
const VHD_COOKIE: &[u8] = b"conectix";
const VHD_FOOTER_LEN: u64 = 512;
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// One row of the signature table: a byte pattern at a fixed offset in the prefix.
struct Signature {
    archive_type: ArchiveType,
    offset: usize,
    magic: &'static [u8],
}

/// Ordered signature table. More specific signatures come first, so DEB is
/// tested before the plain AR magic it shares.
const SIGNATURES: &[Signature] = &[
    Signature {
        archive_type: ArchiveType::Ar,
        offset: 0,
        magic: AR_MAGIC,
    },
    Signature {
        archive_type: ArchiveType::Zip,
        offset: 0,
        magic: b"PK\x03\x04",
    },
    Signature {
        archive_type: ArchiveType::Zip,
        offset: 0,
        magic: b"PK\x05\x06",
    },
    Signature {
        archive_type: ArchiveType::Zip,
        offset: 0,
        magic: b"PK\x07\x08",
    },
    Signature {
        archive_type: ArchiveType::SevenZip,
        offset: 0,
        magic: b"7z\xBC\xAF\x27\x1C",
    },
    Signature {
        archive_type: ArchiveType::Rar,
        offset: 0,
        magic: b"Rar!\x1A\x07\x00",
    },
    Signature {
        archive_type: ArchiveType::Rar,
        offset: 0,
        magic: b"Rar!\x1A\x07\x01\x00",
    },
    Signature {
        archive_type: ArchiveType::Gzip,
        offset: 0,
        magic: b"\x1F\x8B\x08",
    },
    Signature {
        archive_type: ArchiveType::Bzip2,
        offset: 0,
        magic: b"BZh",
    },
    Signature {
        archive_type: ArchiveType::Xz,
        offset: 0,
        magic: b"\xFD7zXZ\x00",
    },
    Signature {
        archive_type: ArchiveType::Vhdx,
        offset: 0,
        magic: b"vhdxfile",
    },
    Signature {
        archive_type: ArchiveType::Vhd,
        offset: 0,
        magic: VHD_COOKIE,
    },
    Signature {
        archive_type: ArchiveType::Tar,
        offset: TAR_MAGIC_OFFSET,
        magic: TAR_MAGIC,
    },
];

/// Stateless magic-byte classifier.
///
/// Detection always inspects the stream from offset 0, whatever the current
/// position, and restores the position before returning. It holds no state
/// and may be called from any number of threads at once.
pub struct MiniMagic;

impl MiniMagic {
    /// Classify an entry's content.
    pub fn detect(entry: &mut FileEntry) -> ArchiveType {
        let detected = Self::detect_content(&mut entry.content);
        debug!("detected {detected} for {}", entry.full_path());
        detected
    }

    /// Classify a raw content stream. Read failures classify as `Unknown`.
    pub fn detect_content(content: &mut Content) -> ArchiveType {
        let mut prefix = [0u8; PREFIX_LEN];
        let n = match content.peek_at(0, &mut prefix) {
            Ok(n) => n,
            Err(e) => {
                debug!("detection read failed: {e}");
                return ArchiveType::Unknown;
            }
        };
        let prefix = &prefix[..n];

        if let Some(found) = Self::match_prefix(prefix) {
            return found;
        }

        if Self::matches_at(content, ISO_MAGIC_OFFSET, ISO_MAGIC) {
            return ArchiveType::Iso9660;
        }

        let len = content.len();
        if len >= VHD_FOOTER_LEN && Self::matches_at(content, len - VHD_FOOTER_LEN, VHD_COOKIE) {
            return ArchiveType::Vhd;
        }

        ArchiveType::Unknown
    }

    /// Match the leading bytes against the signature table.
    pub fn match_prefix(prefix: &[u8]) -> Option<ArchiveType> {
        for sig in SIGNATURES {
            let end = sig.offset + sig.magic.len();
            if prefix.len() < end || &prefix[sig.offset..end] != sig.magic {
                continue;
            }
            match sig.archive_type {
                ArchiveType::Ar if Self::is_deb(prefix) => return Some(ArchiveType::Deb),
                // "BZh" alone is too common in text; require the block size digit.
                ArchiveType::Bzip2 if !matches!(prefix.get(3), Some(b'1'..=b'9')) => continue,
                found => return Some(found),
            }
        }
        None
    }

    /// A DEB is an ar archive whose first member is `debian-binary`.
    fn is_deb(prefix: &[u8]) -> bool {
        let start = AR_MAGIC.len();
        let end = start + DEB_FIRST_MEMBER.len();
        prefix.len() >= end && &prefix[start..end] == DEB_FIRST_MEMBER
    }

    fn matches_at(content: &mut Content, offset: u64, magic: &[u8]) -> bool {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..magic.len()];
        matches!(content.peek_at(offset, buf), Ok(n) if n == magic.len() && buf == magic)
    }
}
