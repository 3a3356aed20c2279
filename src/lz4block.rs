//! LZ4 block-format decompression primitive.
//!
//! Both `.arc` parts and `.arz` record payloads use the raw LZ4 *block*
//! format (no frame header, no size prefix) — the uncompressed size is
//! always known ahead of time from the container's own metadata. This is
//! a thin wrapper over [`lz4_flex::block::decompress_into`], which is the
//! same primitive the ecosystem uses for size-known block decompression
//! (see e.g. `lz4_flex::block::decompress`/`decompress_into` call sites in
//! LZ4 CLI ports).

use crate::error::{GrimVaultError, Result};

/// Decompress an LZ4 block `src` into `dst`, which must already be sized to
/// the exact expected uncompressed length. Returns the number of bytes
/// written, which is always `dst.len()` on success.
pub fn decompress_block_into(fmt: &'static str, at: usize, src: &[u8], dst: &mut [u8]) -> Result<usize> {
    lz4_flex::block::decompress_into(src, dst)
        .map_err(|e| GrimVaultError::malformed(fmt, at, format!("LZ4 block decompression failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_via_lz4_flex_compress() {
        let original = b"the quick brown fox jumps over the lazy dog, the quick brown fox";
        let compressed = lz4_flex::block::compress(original);
        let mut out = vec![0u8; original.len()];
        let n = decompress_block_into("test", 0, &compressed, &mut out).unwrap();
        assert_eq!(n, original.len());
        assert_eq!(&out[..], &original[..]);
    }

    #[test]
    fn reports_malformed_on_garbage_input() {
        let mut out = vec![0u8; 16];
        let err = decompress_block_into("test", 0, &[0xff, 0xff, 0xff, 0xff], &mut out).unwrap_err();
        assert!(matches!(err, GrimVaultError::Malformed { .. }));
    }
}
