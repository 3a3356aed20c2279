//! `.arz` object database decoder.
//!
//! # On-disk layout
//!
//! ```text
//! [header: 24 bytes][... records and payloads ...][string table]
//! ```
//!
//! Header (little-endian):
//!
//! ```text
//! [0x00] tag:u16      = 2
//! [0x02] version:u16  = 3
//! [0x04] record_start:u32
//! [0x08] reserved:u32
//! [0x0C] record_count:u32
//! [0x10] string_start:u32
//! [0x14] string_byte_count:u32
//! ```
//!
//! The string table occupies `string_byte_count` bytes starting at
//! `string_start` and is organized into one or more groups: each group is a
//! `u32` count followed by that many length-prefixed strings. Groups repeat
//! until the byte range is exhausted; every group's strings are concatenated
//! into a single positional array. Every other length-prefixed field in the
//! format (record names, attribute string values) indexes into this table or
//! is itself a length-prefixed string read the same way.
//!
//! A record is `{string_index:u32, name:string, offset:u32, compressed_size:u32,
//! uncompressed_size:u32, reserved:8 bytes}`. Its payload is an LZ4 block
//! stored at absolute offset `offset + 24`, always block-compressed (no raw
//! fallback, unlike `.arc` parts).
//!
//! A decompressed payload is a sequence of attribute groups. Each group is a
//! header `{type_id:u16, entry_count:u16, string_index:u32}` (8 bytes)
//! immediately followed by `entry_count` 4-byte values. `type_id == 1` reads
//! `f32`s and keeps values with `|v| > 0.01`; `type_id == 2` reads `u32`
//! string-table indices and keeps in-range, non-empty strings; any other
//! `type_id` reads plain `u32`s and keeps values `> 0`. Groups repeat until
//! the payload is exhausted.

use std::fs;
use std::path::Path;

use crate::error::{GrimVaultError, Result};
use crate::lz4block::decompress_block_into;
use crate::reader::RawReader;

const FMT: &str = "arz";
const EXPECTED_TAG: u16 = 2;
const EXPECTED_VERSION: u16 = 3;

/// A single typed attribute value recovered from a record's payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AttributeValue {
    Float(f32),
    String(String),
    Integer(u32),
}

/// One `name = value` attribute belonging to a [`DatabaseRecord`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stat {
    pub name: String,
    pub value: AttributeValue,
}

/// A single decoded object: its key (from the string table) and its stats.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DatabaseRecord {
    pub key: String,
    pub stats: Vec<Stat>,
}

/// Metadata about a record's storage, kept alongside the decoded value for
/// callers that want to correlate decoded records back to their raw layout
/// (container offset, compressed/uncompressed sizes) without re-reading the
/// file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatabaseRecordMeta {
    pub name: String,
    pub offset: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

struct Header {
    record_start: u32,
    record_count: u32,
    string_start: u32,
    string_byte_count: u32,
}

struct RawRecord {
    string_index: u32,
    name: String,
    offset: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

fn read_header(r: &mut RawReader) -> Result<Header> {
    let tag = r.u16()?;
    if tag != EXPECTED_TAG {
        return Err(GrimVaultError::BadMagic {
            fmt: FMT,
            got: tag as u64,
            at: 0,
            path: None,
        });
    }
    let version = r.u16()?;
    if version != EXPECTED_VERSION {
        return Err(GrimVaultError::UnsupportedVersion {
            fmt: FMT,
            got: version as u64,
            expected: EXPECTED_VERSION as u64,
            path: None,
        });
    }
    let record_start = r.u32()?;
    let _reserved0 = r.u32()?;
    let record_count = r.u32()?;
    let string_start = r.u32()?;
    let string_byte_count = r.u32()?;
    Ok(Header {
        record_start,
        record_count,
        string_start,
        string_byte_count,
    })
}

/// Read the string table as one or more count-prefixed groups spanning
/// `header.string_byte_count` bytes from `header.string_start`.
fn read_string_table(r: &mut RawReader, header: &Header) -> Result<Vec<String>> {
    let end = header.string_start as usize + header.string_byte_count as usize;
    r.seek(header.string_start as usize)?;
    let mut strings = Vec::new();
    while r.cursor() < end {
        let count = r.u32()?;
        for _ in 0..count {
            strings.push(r.string_len_prefixed()?);
        }
    }
    Ok(strings)
}

fn read_raw_record(r: &mut RawReader) -> Result<RawRecord> {
    let string_index = r.u32()?;
    let name = r.string_len_prefixed()?;
    let offset = r.u32()?;
    let compressed_size = r.u32()?;
    let uncompressed_size = r.u32()?;
    r.advance(8)?;
    Ok(RawRecord {
        string_index,
        name,
        offset,
        compressed_size,
        uncompressed_size,
    })
}

fn read_raw_records(r: &mut RawReader, header: &Header) -> Result<Vec<RawRecord>> {
    r.seek(header.record_start as usize)?;
    let mut records = Vec::with_capacity(header.record_count as usize);
    for _ in 0..header.record_count {
        records.push(read_raw_record(r)?);
    }
    Ok(records)
}

fn decompress_payload(r: &mut RawReader, rec: &RawRecord) -> Result<Vec<u8>> {
    let payload_offset = rec.offset as usize + 24;
    let compressed = r.read_at_absolute(payload_offset, rec.compressed_size as usize)?;
    let mut data = vec![0u8; rec.uncompressed_size as usize];
    decompress_block_into(FMT, payload_offset, compressed, &mut data)?;
    Ok(data)
}

fn string_at(strings: &[String], index: usize, at: usize) -> Result<&str> {
    strings
        .get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| GrimVaultError::malformed(FMT, at, format!("string index {index} out of range")))
}

/// Decode a record's attribute payload into its stat list, per the three
/// retention rules documented on the module.
fn decode_entry(strings: &[String], rec: &RawRecord, data: &[u8]) -> Result<DatabaseRecord> {
    let key = string_at(strings, rec.string_index as usize, 0)?.to_string();
    let mut r = RawReader::new(data, FMT);
    let mut stats = Vec::new();

    let word_count = data.len() / 4;
    let mut consumed = 0usize;
    let mut offset = 0u32;

    while consumed < word_count {
        r.seek(offset as usize)?;
        let type_id = r.u16()?;
        let entry_count = r.u16()?;
        let string_index = r.u32()?;

        consumed += 2 + entry_count as usize;
        let name = string_at(strings, string_index as usize, offset as usize)?.to_string();

        for n in 0..entry_count as u32 {
            r.seek(offset as usize + 8 + 4 * n)?;
            match type_id {
                1 => {
                    let f = r.f32()?;
                    if f.abs() > 0.01 {
                        stats.push(Stat {
                            name: name.clone(),
                            value: AttributeValue::Float(f),
                        });
                    }
                }
                2 => {
                    let index = r.u32()?;
                    if let Some(value) = strings.get(index as usize) {
                        if !value.is_empty() {
                            stats.push(Stat {
                                name: name.clone(),
                                value: AttributeValue::String(value.clone()),
                            });
                        }
                    }
                }
                _ => {
                    let value = r.u32()?;
                    if value > 0 {
                        stats.push(Stat {
                            name: name.clone(),
                            value: AttributeValue::Integer(value),
                        });
                    }
                }
            }
        }

        offset += 8 + 4 * entry_count as u32;
    }

    Ok(DatabaseRecord { key, stats })
}

/// Decode a `.arz` database from an in-memory buffer.
pub fn read_database_bytes(data: &[u8]) -> Result<Vec<DatabaseRecord>> {
    let mut r = RawReader::new(data, FMT);
    let header = read_header(&mut r)?;
    let strings = read_string_table(&mut r, &header)?;
    let raw_records = read_raw_records(&mut r, &header)?;

    let mut entries = Vec::with_capacity(raw_records.len());
    for rec in &raw_records {
        let payload = decompress_payload(&mut r, rec)?;
        entries.push(decode_entry(&strings, rec, &payload)?);
    }
    Ok(entries)
}

/// Decode a `.arz` database from a file path.
pub fn read_database<P: AsRef<Path>>(path: P) -> Result<Vec<DatabaseRecord>> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| GrimVaultError::io(FMT, e).with_path(path))?;
    read_database_bytes(&data).map_err(|e| e.with_path(path))
}

/// Read only the record directory's metadata (name, offset, sizes) without
/// decompressing or decoding attribute payloads.
pub fn read_database_meta_bytes(data: &[u8]) -> Result<Vec<DatabaseRecordMeta>> {
    let mut r = RawReader::new(data, FMT);
    let header = read_header(&mut r)?;
    let raw_records = read_raw_records(&mut r, &header)?;
    Ok(raw_records
        .into_iter()
        .map(|rec| DatabaseRecordMeta {
            name: rec.name,
            offset: rec.offset,
            compressed_size: rec.compressed_size,
            uncompressed_size: rec.uncompressed_size,
        })
        .collect())
}
