//! Virtual hard disk images: VHD (fixed and dynamic) and VHDX.
//!
//! Each image yields a single child, `<name>.img`, holding the flattened
//! virtual disk. Sparse images are assembled block by block from their
//! allocation table; blocks that are not stored in the file read as zeros.
//! The declared virtual size is checked against the budget before any byte
//! is produced.

use log::{debug, trace};
use std::io::{self, Read, Seek, SeekFrom};

use super::{ArchiveHandler, Children};
use crate::entry::{Content, FileEntry};
use crate::error::{ExtractError, Result};
use crate::extractor::ExpansionBudget;
use crate::magic::ArchiveType;

const VHD_FOOTER_LEN: u64 = 512;
const VHD_SECTOR: u64 = 512;
const VHD_COOKIE: &[u8; 8] = b"conectix";
const VHD_SPARSE_COOKIE: &[u8; 8] = b"cxsparse";
const VHD_DYNAMIC_HEADER_LEN: usize = 1024;
const VHD_UNALLOCATED: u32 = 0xFFFF_FFFF;

const DISK_FIXED: u32 = 2;
const DISK_DYNAMIC: u32 = 3;
const DISK_DIFFERENCING: u32 = 4;

const VHDX_REGION_TABLE: u64 = 192 * 1024;
const VHDX_MB: u64 = 1024 * 1024;
const VHDX_MAX_REGIONS: u32 = 2047;
const VHDX_MAX_METADATA_ENTRIES: u16 = 2047;

// GUIDs as stored on disk (first three fields little-endian).
const GUID_BAT: [u8; 16] = [
    0x66, 0x77, 0xC2, 0x2D, 0x23, 0xF6, 0x00, 0x42, 0x9D, 0x64, 0x11, 0x5E, 0x9B, 0xFD, 0x4A, 0x08,
];
const GUID_METADATA: [u8; 16] = [
    0x06, 0xA2, 0x7C, 0x8B, 0x90, 0x47, 0x9A, 0x4B, 0xB8, 0xFE, 0x57, 0x5F, 0x05, 0x0F, 0x88, 0x6E,
];
const GUID_FILE_PARAMETERS: [u8; 16] = [
    0x37, 0x67, 0xA1, 0xCA, 0x36, 0xFA, 0x43, 0x4D, 0xB3, 0xB6, 0x33, 0xF0, 0xAA, 0x44, 0xE7, 0x6B,
];
const GUID_VIRTUAL_DISK_SIZE: [u8; 16] = [
    0x24, 0x42, 0xA5, 0x2F, 0x1B, 0xCD, 0x76, 0x48, 0xB2, 0x11, 0x5D, 0xBE, 0xD8, 0x3B, 0xF4, 0xB8,
];
const GUID_LOGICAL_SECTOR_SIZE: [u8; 16] = [
    0x1D, 0xBF, 0x41, 0x81, 0x6F, 0xA9, 0x09, 0x47, 0xBA, 0x47, 0xF2, 0x33, 0xA8, 0xFA, 0xAB, 0x5F,
];

const BAT_FULLY_PRESENT: u64 = 6;
const BAT_PARTIALLY_PRESENT: u64 = 7;

/// Name of the flattened disk: the image suffix replaced by `.img`.
pub fn image_name(name: &str) -> String {
    let lower = name.to_lowercase();
    for suffix in [".vhdx", ".vhd"] {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return format!("{}.img", &name[..name.len() - suffix.len()]);
        }
    }
    format!("{name}.img")
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be_u64(b: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    u64::from_be_bytes(raw)
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    u64::from_le_bytes(raw)
}

/// Read `len` bytes at `offset`, failing before allocating if the range
/// does not lie inside the image.
fn read_exact_at(content: &mut Content, offset: u64, len: usize, path: &str) -> Result<Vec<u8>> {
    let end = offset.saturating_add(len as u64);
    if end > content.len() {
        return Err(ExtractError::SizeMismatch {
            path: path.to_string(),
            declared: end,
            available: content.len(),
        });
    }
    let mut buf = vec![0u8; len];
    content.peek_at(offset, &mut buf)?;
    Ok(buf)
}

/// Virtual disk assembled from fixed-size blocks of the image file.
///
/// `blocks[i]` is the file offset of block `i`, or `None` for a block that
/// reads as zeros.
struct SparseDisk<'a> {
    source: &'a mut Content,
    virtual_size: u64,
    block_size: u64,
    blocks: Vec<Option<u64>>,
    pos: u64,
}

impl Read for SparseDisk<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.virtual_size || buf.is_empty() {
            return Ok(0);
        }
        let block = (self.pos / self.block_size) as usize;
        let within = self.pos % self.block_size;
        let want = (buf.len() as u64)
            .min(self.block_size - within)
            .min(self.virtual_size - self.pos) as usize;

        match self.blocks.get(block).copied().flatten() {
            Some(offset) => {
                self.source.seek(SeekFrom::Start(offset + within))?;
                self.source.read_exact(&mut buf[..want])?;
            }
            None => buf[..want].fill(0),
        }
        self.pos += want as u64;
        Ok(want)
    }
}

/// Stream a disk through the budget into a single `<name>.img` child.
fn flatten<R: Read>(
    parent: &FileEntry,
    budget: &mut ExpansionBudget,
    format: ArchiveType,
    virtual_size: u64,
    disk: R,
) -> Result<FileEntry> {
    let name = image_name(&parent.name);
    let member_path = format!("{}/{name}", parent.full_path());
    budget.check_declared(virtual_size, &member_path)?;

    let mut reader = budget.reader(disk, &member_path);
    let content = Content::spool(&mut reader, budget.threshold())
        .map_err(|e| ExtractError::from_decode(&member_path, format, e))?;
    drop(reader);
    budget.record(content.len());
    Ok(FileEntry::child(parent, &name, content))
}

fn single(child: Result<FileEntry>) -> Result<Children> {
    Ok(Box::new(std::iter::once(child)))
}

/// Legacy VHD: 512-byte big-endian footer at the end of the file.
pub struct VhdHandler;

impl VhdHandler {
    fn footer(entry: &mut FileEntry) -> Result<Vec<u8>> {
        let path = entry.full_path();
        let len = entry.content.len();
        if len >= VHD_FOOTER_LEN {
            let footer = read_exact_at(
                &mut entry.content,
                len - VHD_FOOTER_LEN,
                VHD_FOOTER_LEN as usize,
                &path,
            )?;
            if footer.starts_with(VHD_COOKIE) {
                return Ok(footer);
            }
        }
        // Dynamic disks keep a copy of the footer at offset 0.
        let copy = read_exact_at(&mut entry.content, 0, VHD_FOOTER_LEN as usize, &path)?;
        if copy.starts_with(VHD_COOKIE) {
            return Ok(copy);
        }
        Err(ExtractError::malformed(&path, "missing conectix footer"))
    }

    fn expand_fixed(
        entry: &mut FileEntry,
        budget: &mut ExpansionBudget,
        virtual_size: u64,
    ) -> Result<FileEntry> {
        let len = entry.content.len();
        let data_len = len.saturating_sub(VHD_FOOTER_LEN);
        if virtual_size > data_len {
            return Err(ExtractError::SizeMismatch {
                path: entry.full_path(),
                declared: virtual_size,
                available: data_len,
            });
        }
        let parent = entry.detached();
        entry.content.rewind_to_start()?;
        let disk = (&mut entry.content).take(virtual_size);
        flatten(&parent, budget, ArchiveType::Vhd, virtual_size, disk)
    }

    fn expand_dynamic(
        entry: &mut FileEntry,
        budget: &mut ExpansionBudget,
        footer: &[u8],
        virtual_size: u64,
    ) -> Result<FileEntry> {
        let path = entry.full_path();
        let len = entry.content.len();
        let header_offset = be_u64(&footer[16..24]);
        let header = read_exact_at(
            &mut entry.content,
            header_offset,
            VHD_DYNAMIC_HEADER_LEN,
            &path,
        )?;
        if !header.starts_with(VHD_SPARSE_COOKIE) {
            return Err(ExtractError::malformed(&path, "missing cxsparse header"));
        }

        let table_offset = be_u64(&header[16..24]);
        let max_entries = be_u32(&header[28..32]) as u64;
        let block_size = be_u32(&header[32..36]) as u64;
        if block_size == 0 || block_size % VHD_SECTOR != 0 {
            return Err(ExtractError::malformed(
                &path,
                format!("invalid block size {block_size}"),
            ));
        }
        let block_count = virtual_size.div_ceil(block_size);
        if block_count > max_entries {
            return Err(ExtractError::malformed(
                &path,
                format!("{block_count} blocks but table holds {max_entries}"),
            ));
        }

        budget.check_declared(virtual_size, &format!("{path}/{}", image_name(&entry.name)))?;
        let table = read_exact_at(
            &mut entry.content,
            table_offset,
            (block_count * 4) as usize,
            &path,
        )?;
        let bitmap_len = (block_size / VHD_SECTOR).div_ceil(8).div_ceil(VHD_SECTOR) * VHD_SECTOR;
        let mut blocks = Vec::with_capacity(block_count as usize);
        for (i, raw) in table.chunks_exact(4).enumerate() {
            let sector = be_u32(raw);
            if sector == VHD_UNALLOCATED {
                blocks.push(None);
                continue;
            }
            let offset = sector as u64 * VHD_SECTOR + bitmap_len;
            if offset.saturating_add(block_size) > len {
                return Err(ExtractError::SizeMismatch {
                    path: format!("{path}:block{i}"),
                    declared: block_size,
                    available: len.saturating_sub(offset),
                });
            }
            blocks.push(Some(offset));
        }
        trace!(
            "{path}: dynamic VHD, {block_count} blocks of {block_size}, {} allocated",
            blocks.iter().filter(|b| b.is_some()).count()
        );

        let parent = entry.detached();
        let disk = SparseDisk {
            source: &mut entry.content,
            virtual_size,
            block_size,
            blocks,
            pos: 0,
        };
        flatten(&parent, budget, ArchiveType::Vhd, virtual_size, disk)
    }
}

impl ArchiveHandler for VhdHandler {
    fn format_name(&self) -> &str {
        "vhd"
    }

    fn expand(&self, mut entry: FileEntry, mut budget: ExpansionBudget) -> Result<Children> {
        let footer = Self::footer(&mut entry)?;
        let disk_type = be_u32(&footer[60..64]);
        let virtual_size = be_u64(&footer[48..56]);
        debug!(
            "{}: VHD disk type {disk_type}, virtual size {virtual_size}",
            entry.full_path()
        );

        let child = match disk_type {
            DISK_FIXED => Self::expand_fixed(&mut entry, &mut budget, virtual_size),
            DISK_DYNAMIC => Self::expand_dynamic(&mut entry, &mut budget, &footer, virtual_size),
            DISK_DIFFERENCING => Err(ExtractError::malformed(
                &entry.full_path(),
                "differencing disk needs its parent image",
            )),
            other => Err(ExtractError::malformed(
                &entry.full_path(),
                format!("unknown disk type {other}"),
            )),
        };
        single(child)
    }
}

/// VHDX: region table, BAT and metadata region, all little-endian.
pub struct VhdxHandler;

/// Location of one region or metadata item.
#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u64,
}

impl VhdxHandler {
    fn regions(entry: &mut FileEntry) -> Result<(Extent, Extent)> {
        let path = entry.full_path();
        let table = read_exact_at(&mut entry.content, VHDX_REGION_TABLE, 64 * 1024, &path)?;
        if &table[0..4] != b"regi" {
            return Err(ExtractError::malformed(&path, "missing region table"));
        }
        let count = le_u32(&table[8..12]);
        if count > VHDX_MAX_REGIONS {
            return Err(ExtractError::malformed(&path, format!("{count} regions")));
        }

        let (mut bat, mut metadata) = (None, None);
        for raw in table[16..].chunks_exact(32).take(count as usize) {
            let extent = Extent {
                offset: le_u64(&raw[16..24]),
                len: le_u32(&raw[24..28]) as u64,
            };
            let guid = &raw[..16];
            if guid == GUID_BAT {
                bat = Some(extent);
            } else if guid == GUID_METADATA {
                metadata = Some(extent);
            }
        }
        match (bat, metadata) {
            (Some(bat), Some(metadata)) => Ok((bat, metadata)),
            _ => Err(ExtractError::malformed(&path, "BAT or metadata region missing")),
        }
    }

    /// Returns (block size, virtual disk size, logical sector size).
    fn metadata(entry: &mut FileEntry, region: Extent) -> Result<(u64, u64, u64)> {
        let path = entry.full_path();
        let header = read_exact_at(&mut entry.content, region.offset, 32, &path)?;
        if &header[0..8] != b"metadata" {
            return Err(ExtractError::malformed(&path, "missing metadata table"));
        }
        let count = le_u16(&header[10..12]);
        if count > VHDX_MAX_METADATA_ENTRIES {
            return Err(ExtractError::malformed(&path, format!("{count} metadata entries")));
        }
        let entries = read_exact_at(
            &mut entry.content,
            region.offset + 32,
            count as usize * 32,
            &path,
        )?;

        let (mut block_size, mut virtual_size, mut sector_size) = (None, None, None);
        for raw in entries.chunks_exact(32) {
            let item = Extent {
                offset: region.offset + le_u32(&raw[16..20]) as u64,
                len: le_u32(&raw[20..24]) as u64,
            };
            let guid = &raw[..16];
            if guid == GUID_FILE_PARAMETERS {
                let value = read_exact_at(&mut entry.content, item.offset, 8, &path)?;
                if le_u32(&value[4..8]) & 0x2 != 0 {
                    return Err(ExtractError::malformed(
                        &path,
                        "differencing disk needs its parent image",
                    ));
                }
                block_size = Some(le_u32(&value[0..4]) as u64);
            } else if guid == GUID_VIRTUAL_DISK_SIZE {
                let value = read_exact_at(&mut entry.content, item.offset, 8, &path)?;
                virtual_size = Some(le_u64(&value));
            } else if guid == GUID_LOGICAL_SECTOR_SIZE {
                let value = read_exact_at(&mut entry.content, item.offset, 4, &path)?;
                sector_size = Some(le_u32(&value) as u64);
            }
            trace!("{path}: metadata item at {} ({} bytes)", item.offset, item.len);
        }

        match (block_size, virtual_size, sector_size) {
            (Some(b), Some(v), Some(s)) if b > 0 && s > 0 => Ok((b, v, s)),
            _ => Err(ExtractError::malformed(&path, "incomplete disk metadata")),
        }
    }

    fn flatten_disk(entry: &mut FileEntry, budget: &mut ExpansionBudget) -> Result<FileEntry> {
        let path = entry.full_path();
        let len = entry.content.len();
        let (bat_region, metadata_region) = Self::regions(entry)?;
        let (block_size, virtual_size, sector_size) = Self::metadata(entry, metadata_region)?;

        let chunk_ratio = ((1u64 << 23) * sector_size / block_size).max(1);
        let block_count = virtual_size.div_ceil(block_size);
        let bat_entries = block_count + block_count.saturating_sub(1) / chunk_ratio;
        if bat_entries.saturating_mul(8) > bat_region.len {
            return Err(ExtractError::SizeMismatch {
                path: format!("{path}:bat"),
                declared: bat_entries.saturating_mul(8),
                available: bat_region.len,
            });
        }
        debug!(
            "{path}: VHDX {virtual_size} bytes in {block_count} blocks of {block_size}"
        );

        // Check the declared size before the table is materialized.
        budget.check_declared(virtual_size, &format!("{path}/{}", image_name(&entry.name)))?;
        let bat = read_exact_at(
            &mut entry.content,
            bat_region.offset,
            (bat_entries * 8) as usize,
            &path,
        )?;

        let mut blocks = Vec::with_capacity(block_count as usize);
        for i in 0..block_count {
            let index = (i + i / chunk_ratio) as usize;
            let raw = le_u64(&bat[index * 8..index * 8 + 8]);
            let state = raw & 0x7;
            if state != BAT_FULLY_PRESENT && state != BAT_PARTIALLY_PRESENT {
                blocks.push(None);
                continue;
            }
            let offset = (raw >> 20) * VHDX_MB;
            if offset.saturating_add(block_size) > len {
                return Err(ExtractError::SizeMismatch {
                    path: format!("{path}:block{i}"),
                    declared: block_size,
                    available: len.saturating_sub(offset),
                });
            }
            blocks.push(Some(offset));
        }

        let parent = entry.detached();
        let disk = SparseDisk {
            source: &mut entry.content,
            virtual_size,
            block_size,
            blocks,
            pos: 0,
        };
        flatten(&parent, budget, ArchiveType::Vhdx, virtual_size, disk)
    }
}

impl ArchiveHandler for VhdxHandler {
    fn format_name(&self) -> &str {
        "vhdx"
    }

    fn expand(&self, mut entry: FileEntry, mut budget: ExpansionBudget) -> Result<Children> {
        single(Self::flatten_disk(&mut entry, &mut budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::error::LimitKind;
    use crate::extractor::ExtractionContext;

    fn footer(disk_type: u32, size: u64, data_offset: u64) -> Vec<u8> {
        let mut f = vec![0u8; VHD_FOOTER_LEN as usize];
        f[0..8].copy_from_slice(VHD_COOKIE);
        f[16..24].copy_from_slice(&data_offset.to_be_bytes());
        f[40..48].copy_from_slice(&size.to_be_bytes());
        f[48..56].copy_from_slice(&size.to_be_bytes());
        f[60..64].copy_from_slice(&disk_type.to_be_bytes());
        f
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn expand_one(
        handler: &dyn ArchiveHandler,
        config: ExtractorConfig,
        name: &str,
        data: Vec<u8>,
    ) -> Result<FileEntry> {
        let ctx = ExtractionContext::new(config);
        let entry = FileEntry::new(name, "", Content::from_bytes(data));
        let budget = ctx.budget(&entry, handler.expands());
        let mut children = handler.expand(entry, budget)?;
        let child = children.next().expect("one child");
        assert!(children.next().is_none());
        child
    }

    /// Dynamic VHD with two 4 KiB blocks; only the first is allocated.
    fn dynamic_vhd(block: &[u8]) -> Vec<u8> {
        let block_size = 4096u32;
        let virtual_size = 2 * block_size as u64;
        let mut image = footer(DISK_DYNAMIC, virtual_size, 512);

        let mut header = vec![0u8; VHD_DYNAMIC_HEADER_LEN];
        header[0..8].copy_from_slice(VHD_SPARSE_COOKIE);
        header[8..16].copy_from_slice(&u64::MAX.to_be_bytes());
        header[16..24].copy_from_slice(&1536u64.to_be_bytes());
        header[28..32].copy_from_slice(&2u32.to_be_bytes());
        header[32..36].copy_from_slice(&block_size.to_be_bytes());
        image.extend(header);

        let mut bat = vec![0xFFu8; 512];
        bat[0..4].copy_from_slice(&4u32.to_be_bytes());
        image.extend(bat);

        image.extend(vec![0xFFu8; 512]);
        image.extend_from_slice(block);
        image.extend(footer(DISK_DYNAMIC, virtual_size, 512));
        image
    }

    fn vhdx(block: &[u8]) -> Vec<u8> {
        const KIB: usize = 1024;
        let mib = VHDX_MB as usize;
        let mut image = vec![0u8; 2 * mib];
        image[0..8].copy_from_slice(b"vhdxfile");

        let regions = 192 * KIB;
        image[regions..regions + 4].copy_from_slice(b"regi");
        image[regions + 8..regions + 12].copy_from_slice(&2u32.to_le_bytes());
        for (i, (guid, offset)) in [(GUID_BAT, 320 * KIB), (GUID_METADATA, 256 * KIB)]
            .into_iter()
            .enumerate()
        {
            let at = regions + 16 + i * 32;
            image[at..at + 16].copy_from_slice(&guid);
            image[at + 16..at + 24].copy_from_slice(&(offset as u64).to_le_bytes());
            image[at + 24..at + 28].copy_from_slice(&(64 * KIB as u32).to_le_bytes());
        }

        let meta = 256 * KIB;
        image[meta..meta + 8].copy_from_slice(b"metadata");
        image[meta + 10..meta + 12].copy_from_slice(&3u16.to_le_bytes());
        let items: [([u8; 16], u32, Vec<u8>); 3] = [
            (GUID_FILE_PARAMETERS, 0x100, {
                let mut v = (VHDX_MB as u32).to_le_bytes().to_vec();
                v.extend_from_slice(&0u32.to_le_bytes());
                v
            }),
            (GUID_VIRTUAL_DISK_SIZE, 0x108, (2 * VHDX_MB).to_le_bytes().to_vec()),
            (GUID_LOGICAL_SECTOR_SIZE, 0x110, 512u32.to_le_bytes().to_vec()),
        ];
        for (i, (guid, offset, value)) in items.iter().enumerate() {
            let at = meta + 32 + i * 32;
            image[at..at + 16].copy_from_slice(guid);
            image[at + 16..at + 20].copy_from_slice(&offset.to_le_bytes());
            image[at + 20..at + 24].copy_from_slice(&(value.len() as u32).to_le_bytes());
            let v = meta + *offset as usize;
            image[v..v + value.len()].copy_from_slice(value);
        }

        let bat = 320 * KIB;
        let present = (1u64 << 20) | BAT_FULLY_PRESENT;
        image[bat..bat + 8].copy_from_slice(&present.to_le_bytes());

        image[mib..mib + block.len()].copy_from_slice(block);
        image
    }

    #[test]
    fn test_image_name() {
        assert_eq!(image_name("disk.vhd"), "disk.img");
        assert_eq!(image_name("Disk.VHDX"), "Disk.img");
        assert_eq!(image_name("raw"), "raw.img");
    }

    #[test]
    fn test_fixed_vhd() {
        let data = pattern(3000);
        let mut image = data.clone();
        image.extend(footer(DISK_FIXED, data.len() as u64, u64::MAX));

        let mut child =
            expand_one(&VhdHandler, ExtractorConfig::default(), "disk.vhd", image).unwrap();
        assert_eq!(child.full_path(), "disk.vhd/disk.img");
        assert_eq!(child.depth, 1);
        assert_eq!(child.content.read_all().unwrap(), data);
    }

    #[test]
    fn test_dynamic_vhd_zero_fills_unallocated_blocks() {
        let block = pattern(4096);
        let image = dynamic_vhd(&block);
        let mut child =
            expand_one(&VhdHandler, ExtractorConfig::default(), "sparse.vhd", image).unwrap();
        let disk = child.content.read_all().unwrap();
        assert_eq!(disk.len(), 8192);
        assert_eq!(&disk[..4096], block.as_slice());
        assert!(disk[4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_differencing_vhd_is_malformed() {
        let mut image = vec![0u8; 1024];
        image.extend(footer(DISK_DIFFERENCING, 1024, 512));
        let err = expand_one(&VhdHandler, ExtractorConfig::default(), "child.vhd", image)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }

    #[test]
    fn test_huge_declared_virtual_size_trips_ratio() {
        let mut image = footer(DISK_DYNAMIC, 1 << 40, 512);
        let mut header = vec![0u8; VHD_DYNAMIC_HEADER_LEN];
        header[0..8].copy_from_slice(VHD_SPARSE_COOKIE);
        header[16..24].copy_from_slice(&1536u64.to_be_bytes());
        header[28..32].copy_from_slice(&u32::MAX.to_be_bytes());
        header[32..36].copy_from_slice(&(2u32 << 20).to_be_bytes());
        image.extend(header);
        image.extend(footer(DISK_DYNAMIC, 1 << 40, 512));

        let err = expand_one(&VhdHandler, ExtractorConfig::default(), "bomb.vhd", image)
            .unwrap_err();
        assert_eq!(err.limit_kind(), Some(LimitKind::ExpansionRatio));
    }

    #[test]
    fn test_vhdx_flattens_payload_blocks() {
        let block = pattern(VHDX_MB as usize);
        let image = vhdx(&block);
        let mut child =
            expand_one(&VhdxHandler, ExtractorConfig::default(), "vm.vhdx", image).unwrap();
        assert_eq!(child.name, "vm.img");
        let disk = child.content.read_all().unwrap();
        assert_eq!(disk.len(), 2 * VHDX_MB as usize);
        assert_eq!(&disk[..VHDX_MB as usize], block.as_slice());
        assert!(disk[VHDX_MB as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_vhdx_without_region_table_is_malformed() {
        let mut image = vec![0u8; 512 * 1024];
        image[0..8].copy_from_slice(b"vhdxfile");
        let err = expand_one(&VhdxHandler, ExtractorConfig::default(), "bad.vhdx", image)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }
}
