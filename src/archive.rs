//! `.arc` archive decoder.
//!
//! # On-disk layout
//!
//! ```text
//! [header][payload bytes][parts table][name table][record directory]
//! ```
//!
//! Header (offset 0, little-endian):
//!
//! ```text
//! [0x00] reserved
//! [0x04] version = 3
//! [0x08] file_count
//! [0x0C] record_count
//! [0x10] record_size      (bytes in parts table)
//! [0x14] string_size      (bytes in name table)
//! [0x18] record_offset    (byte offset of parts table)
//! ```
//!
//! Parts are `3 x u32` each: `{offset, compressed_size, uncompressed_size}`.
//! Names are NUL-terminated, `file_count` entries. Directory entries are 44
//! bytes: `type, offset, compressed_size, uncompressed_size, reserved:u32,
//! time:u64, part_count, part_index, string_size, string_offset`. Entries
//! with `uncompressed_size == 0` are placeholders; a placeholder's slot
//! becomes `None` at its original index rather than being spliced out of the
//! list, so the name at index `i` always pairs with the directory entry read
//! at index `i`, placeholders included.
//!
//! A logical file's bytes are the concatenation of uncompressed parts
//! `[part_index, part_index + part_count)`. A part is LZ4-block-compressed
//! unless `compressed_size == uncompressed_size`, in which case it is stored
//! raw.
//!
//! `.txt` members (matched case-sensitively, like the original's
//! `filepath.Ext`) are parsed as tag files: line endings (CR, LF, CRLF) are
//! normalized to a single LF, `^` is stripped without merging lines, and any
//! non-empty line whose lowercased form starts with `tag` is split at the
//! first `=` into a key/value pair.

use std::fs;
use std::path::Path;

use crate::error::{GrimVaultError, Result};
use crate::lz4block::decompress_block_into;
use crate::reader::RawReader;

const FMT: &str = "arc";
const EXPECTED_VERSION: u32 = 3;

/// One `key = value` pair extracted from a `.txt` member of the archive.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

struct Header {
    file_count: u32,
    record_count: u32,
    record_size: u32,
    string_size: u32,
    record_offset: u32,
}

struct Part {
    offset: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

struct DirectoryEntry {
    #[allow(dead_code)]
    typ: u32,
    #[allow(dead_code)]
    offset: u32,
    #[allow(dead_code)]
    compressed_size: u32,
    uncompressed_size: u32,
    #[allow(dead_code)]
    time: u64,
    part_count: u32,
    part_index: u32,
    #[allow(dead_code)]
    string_size: u32,
    #[allow(dead_code)]
    string_offset: u32,
}

fn read_header(r: &mut RawReader) -> Result<Header> {
    let _reserved = r.u32()?;
    let version = r.u32()?;
    if version != EXPECTED_VERSION {
        return Err(GrimVaultError::UnsupportedVersion {
            fmt: FMT,
            got: version as u64,
            expected: EXPECTED_VERSION as u64,
            path: None,
        });
    }
    Ok(Header {
        file_count: r.u32()?,
        record_count: r.u32()?,
        record_size: r.u32()?,
        string_size: r.u32()?,
        record_offset: r.u32()?,
    })
}

fn read_parts(r: &mut RawReader, header: &Header) -> Result<Vec<Part>> {
    r.seek(header.record_offset as usize)?;
    let mut parts = Vec::with_capacity(header.record_count as usize);
    for _ in 0..header.record_count {
        parts.push(Part {
            offset: r.u32()?,
            compressed_size: r.u32()?,
            uncompressed_size: r.u32()?,
        });
    }
    Ok(parts)
}

fn read_file_names(r: &mut RawReader, header: &Header) -> Result<Vec<String>> {
    r.seek(header.record_offset as usize + header.record_size as usize)?;
    let mut names = Vec::with_capacity(header.file_count as usize);
    for _ in 0..header.file_count {
        names.push(r.cstring()?);
    }
    Ok(names)
}

fn read_directory_entry(r: &mut RawReader) -> Result<DirectoryEntry> {
    let typ = r.u32()?;
    let offset = r.u32()?;
    let compressed_size = r.u32()?;
    let uncompressed_size = r.u32()?;
    let _unknown = r.u32()?;
    let time = r.u64()?;
    let part_count = r.u32()?;
    let part_index = r.u32()?;
    let string_size = r.u32()?;
    let string_offset = r.u32()?;
    Ok(DirectoryEntry {
        typ,
        offset,
        compressed_size,
        uncompressed_size,
        time,
        part_count,
        part_index,
        string_size,
        string_offset,
    })
}

/// Read `header.file_count` raw directory entries, one per name-table slot.
/// Placeholders (`uncompressed_size == 0`) become `None` at their original
/// slot rather than being spliced out, so a name at index `i` always pairs
/// with the directory entry read at index `i` — dropping a placeholder never
/// shifts the pairing of the names and entries that follow it.
fn read_records(r: &mut RawReader, header: &Header) -> Result<Vec<Option<DirectoryEntry>>> {
    r.seek(header.record_offset as usize + header.record_size as usize + header.string_size as usize)?;
    let mut records = Vec::with_capacity(header.file_count as usize);
    for _ in 0..header.file_count {
        let entry = read_directory_entry(r)?;
        records.push(if entry.uncompressed_size > 0 { Some(entry) } else { None });
    }
    Ok(records)
}

fn reassemble(r: &mut RawReader, parts: &[Part], record: &DirectoryEntry) -> Result<Vec<u8>> {
    let mut data = vec![0u8; record.uncompressed_size as usize];
    let mut offset = 0usize;
    for k in 0..record.part_count as usize {
        let part_idx = record.part_index as usize + k;
        let part = parts.get(part_idx).ok_or_else(|| {
            GrimVaultError::malformed(FMT, r.cursor(), format!("part index {part_idx} out of range"))
        })?;

        let compressed = r.read_at_absolute(part.offset as usize, part.compressed_size as usize)?;
        let end = offset + part.uncompressed_size as usize;
        if end > data.len() {
            return Err(GrimVaultError::malformed(
                FMT,
                part.offset as usize,
                "part uncompressed_size overruns record buffer",
            ));
        }
        if part.compressed_size == part.uncompressed_size {
            data[offset..end].copy_from_slice(compressed);
        } else {
            decompress_block_into(FMT, part.offset as usize, compressed, &mut data[offset..end])?;
        }
        offset = end;
    }
    Ok(data)
}

/// Normalize CR / LF / CRLF line endings to a single LF, and strip `^`
/// without merging lines.
fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '^' => continue,
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\n' => out.push('\n'),
            other => out.push(other),
        }
    }
    out
}

fn parse_tags(text: &str) -> Vec<Tag> {
    let normalized = normalize_text(text);
    let mut tags = Vec::new();
    for raw_line in normalized.split('\n') {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.to_lowercase().starts_with("tag") {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => tags.push(Tag {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => {
                // Non-fatal: counted but no tag record emitted for this line.
                continue;
            }
        }
    }
    tags
}

/// Decode a `.arc` archive from an in-memory buffer.
pub fn read_archive_bytes(data: &[u8]) -> Result<Vec<Tag>> {
    let mut r = RawReader::new(data, FMT);
    let header = read_header(&mut r)?;
    let parts = read_parts(&mut r, &header)?;
    let names = read_file_names(&mut r, &header)?;
    let records = read_records(&mut r, &header)?;

    let mut tags = Vec::new();
    for (name, record) in names.iter().zip(records.iter()) {
        // Case-sensitive, matching the original's `filepath.Ext(file) != ".txt"`:
        // a member named "FOO.TXT" is not scanned.
        if !name.ends_with(".txt") {
            continue;
        }
        let Some(record) = record else {
            continue;
        };
        let bytes = reassemble(&mut r, &parts, record)?;
        let text = String::from_utf8_lossy(&bytes);
        tags.extend(parse_tags(&text));
    }
    Ok(tags)
}

/// Decode a `.arc` archive from a file path.
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<Vec<Tag>> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| GrimVaultError::io(FMT, e).with_path(path))?;
    read_archive_bytes(&data).map_err(|e| e.with_path(path))
}
