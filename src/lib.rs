//! # grimvault-format-readers
//!
//! Decoders for three proprietary binary formats used by an action-RPG:
//!
//! - `.arc` — archive container: parts table, name table, record directory,
//!   LZ4-block-compressed payloads reassembled per logical file.
//! - `.arz` — object database: header, shared string table, per-record
//!   LZ4-compressed typed attribute stream.
//! - `.gst` — player stash save: a self-modifying XOR stream cipher with
//!   length-bracketed blocks and a fixed item schema.
//!
//! Every decoder is a pure function from a file path or byte slice to an
//! owned value tree — no writing, no random access, no streaming, no
//! corruption recovery. See each module for its on-disk layout.

pub mod error;
pub mod reader;
pub mod lz4block;
pub mod archive;
pub mod database;
pub mod stash;

pub use error::{GrimVaultError, Result};
pub use archive::{read_archive, read_archive_bytes, Tag};
pub use database::{
    read_database, read_database_bytes, read_database_meta_bytes, AttributeValue, DatabaseRecord,
    DatabaseRecordMeta, Stat,
};
pub use stash::{read_stash, read_stash_bytes, Item, Stash, StashTab};
