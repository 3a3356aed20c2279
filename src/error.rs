//! Shared error taxonomy for all three decoders.
//!
//! One enum, one subsystem tag per variant (`"arc"` / `"arz"` / `"gst"`), so a
//! caller juggling all three formats can tell failures apart from the message
//! alone. No recovery is attempted anywhere in this crate: any error aborts
//! the current decode and partial results are never returned.
//!
//! The path-taking entry points (`read_archive`, `read_database`,
//! `read_stash`) attach the file path to whichever error comes back via
//! [`GrimVaultError::with_path`], so a caller decoding many files concurrently
//! can tell which one failed without threading the path through every
//! internal parsing step.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrimVaultError {
    #[error("{fmt}: IO error: {source}{}", path_suffix(path))]
    Io {
        fmt: &'static str,
        #[source]
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("{fmt}: unsupported version {got} (expected {expected}){}", path_suffix(path))]
    UnsupportedVersion {
        fmt: &'static str,
        got: u64,
        expected: u64,
        path: Option<PathBuf>,
    },

    #[error("{fmt}: bad magic value {got} at byte {at}{}", path_suffix(path))]
    BadMagic {
        fmt: &'static str,
        got: u64,
        at: usize,
        path: Option<PathBuf>,
    },

    #[error("{fmt}: truncated buffer at cursor {cursor}, needed {need} more byte(s){}", path_suffix(path))]
    Truncated {
        fmt: &'static str,
        cursor: usize,
        need: usize,
        path: Option<PathBuf>,
    },

    #[error("{fmt}: malformed data at byte {at}: {detail}{}", path_suffix(path))]
    Malformed {
        fmt: &'static str,
        at: usize,
        detail: String,
        path: Option<PathBuf>,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" (file: {})", p.display()),
        None => String::new(),
    }
}

impl GrimVaultError {
    pub fn io(fmt: &'static str, source: io::Error) -> Self {
        GrimVaultError::Io { fmt, source, path: None }
    }

    pub fn malformed(fmt: &'static str, at: usize, detail: impl Into<String>) -> Self {
        GrimVaultError::Malformed {
            fmt,
            at,
            detail: detail.into(),
            path: None,
        }
    }

    /// Attach the file path this error occurred while reading, so a caller
    /// juggling several files can identify which one failed from the error
    /// value alone.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        let p = Some(path.as_ref().to_path_buf());
        match &mut self {
            GrimVaultError::Io { path, .. }
            | GrimVaultError::UnsupportedVersion { path, .. }
            | GrimVaultError::BadMagic { path, .. }
            | GrimVaultError::Truncated { path, .. }
            | GrimVaultError::Malformed { path, .. } => *path = p,
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, GrimVaultError>;
