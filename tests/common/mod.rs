//! Fixture builders. Every archive is assembled in memory at test time.
#![allow(dead_code)]

use std::io::{Cursor, Write};

use multiextract::{Extraction, FileEntry};

/// One 60-byte ar member header; `size` is written verbatim.
pub fn ar_header(name: &str, size: &str) -> Vec<u8> {
    let mut h = format!(
        "{name:<16}{:<12}{:<6}{:<6}{:<8}{size:<10}",
        1700000000, 0, 0, 100644
    )
    .into_bytes();
    h.extend_from_slice(b"`\n");
    assert_eq!(h.len(), 60);
    h
}

pub fn ar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"!<arch>\n".to_vec();
    for (name, data) in members {
        out.extend(ar_header(name, &data.len().to_string()));
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

pub fn tar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn zip(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// A non-solid 7z archive; each member is its own LZMA2 folder.
pub fn sevenz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = sevenz_rust::SevenZWriter::new(Cursor::new(Vec::new())).unwrap();
    for (name, data) in members {
        let mut entry = sevenz_rust::SevenZArchiveEntry::new();
        entry.name = name.to_string();
        writer.push_archive_entry(entry, Some(*data)).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// RAR 4.x header block: low 16 bits of the body's CRC32, then the body.
fn rar4_block(body: &[u8]) -> Vec<u8> {
    let mut block = (crc32(body) as u16).to_le_bytes().to_vec();
    block.extend_from_slice(body);
    block
}

/// A RAR 4.x archive with every member stored uncompressed.
pub fn rar4(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"Rar!\x1A\x07\x00".to_vec();

    let mut main = vec![0x73];
    main.extend(0u16.to_le_bytes());
    main.extend(13u16.to_le_bytes());
    main.extend([0u8; 6]);
    out.extend(rar4_block(&main));

    for (name, data) in members {
        let size = data.len() as u32;
        let mut file = vec![0x74];
        file.extend(0x8000u16.to_le_bytes());
        file.extend((32 + name.len() as u16).to_le_bytes());
        file.extend(size.to_le_bytes()); // packed
        file.extend(size.to_le_bytes()); // unpacked
        file.push(0); // host os
        file.extend(crc32(data).to_le_bytes());
        file.extend(0x5A21_0000u32.to_le_bytes()); // dos time
        file.push(20); // version needed
        file.push(0x30); // stored
        file.extend((name.len() as u16).to_le_bytes());
        file.extend(0x20u32.to_le_bytes());
        file.extend_from_slice(name.as_bytes());
        out.extend(rar4_block(&file));
        out.extend_from_slice(data);
    }

    let mut end = vec![0x7B];
    end.extend(0x4000u16.to_le_bytes());
    end.extend(7u16.to_le_bytes());
    out.extend(rar4_block(&end));
    out
}

fn vint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// RAR 5.0 block: CRC32 over the size vint and the header, then both.
fn rar5_block(header: &[u8]) -> Vec<u8> {
    let mut sized = vint(header.len() as u64);
    sized.extend_from_slice(header);
    let mut block = crc32(&sized).to_le_bytes().to_vec();
    block.extend(sized);
    block
}

/// A RAR 5.0 archive with every member stored uncompressed.
pub fn rar5(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"Rar!\x1A\x07\x01\x00".to_vec();
    out.extend(rar5_block(&[vint(1), vint(0), vint(0)].concat()));

    for (name, data) in members {
        let size = data.len() as u64;
        let header = [
            vint(2),    // file header
            vint(2),    // has data area
            vint(size), // data size
            vint(4),    // data CRC32 present
            vint(size),
            vint(0x20), // attributes
            crc32(data).to_le_bytes().to_vec(),
            vint(0), // stored, version 0
            vint(0), // host os
            vint(name.len() as u64),
            name.as_bytes().to_vec(),
        ]
        .concat();
        out.extend(rar5_block(&header));
        out.extend_from_slice(data);
    }

    out.extend(rar5_block(&[vint(5), vint(0), vint(0)].concat()));
    out
}

/// tar.gz → tar → {text, zip → {ar → objects, nested dir}, tar.bz2, xz}.
pub fn mixed_nest() -> Vec<u8> {
    let lib = ar(&[("a.o", b"object a"), ("b.o", b"object b!")]);
    let bundle = zip(&[("lib.a", &lib), ("notes/info.txt", b"release notes")]);
    let data = bzip2(&tar(&[("x.bin", &[1, 2, 3])]));
    let blob = xz(b"compressed blob contents");
    let outer = tar(&[
        ("readme.txt", b"read me first"),
        ("bundle.zip", &bundle),
        ("data.tar.bz2", &data),
        ("blob.xz", &blob),
    ]);
    gzip(&outer)
}

/// A zip of `k` tar.gz archives, each holding `m` small text files.
pub fn k_by_m(k: usize, m: usize) -> Vec<u8> {
    let files: Vec<(String, Vec<u8>)> = (0..m)
        .map(|j| (format!("dir/file{j}.txt"), format!("contents of file {j}").into_bytes()))
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(n, d)| (n.as_str(), d.as_slice()))
        .collect();
    let inner = gzip(&tar(&refs));

    let names: Vec<String> = (0..k).map(|i| format!("part{i}.tar.gz")).collect();
    let outer: Vec<(&str, &[u8])> = names
        .iter()
        .map(|n| (n.as_str(), inner.as_slice()))
        .collect();
    zip(&outer)
}

/// Drain an extraction into sorted `(full_path, bytes)` pairs.
pub fn collect_sorted(extraction: Extraction) -> Vec<(String, Vec<u8>)> {
    let mut leaves: Vec<_> = extraction
        .map(|leaf| {
            let mut leaf: FileEntry = leaf.unwrap();
            let bytes = leaf.content.read_all().unwrap();
            (leaf.full_path(), bytes)
        })
        .collect();
    leaves.sort();
    leaves
}
