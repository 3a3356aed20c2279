//! `.gst` stash save decoder.
//!
//! The file is a custom XOR stream cipher wrapped around a block-structured
//! layout; there is no compression involved. [`StashDecoder`] owns both the
//! raw byte cursor and the cipher's running key, since almost every read
//! advances the key as a side effect.
//!
//! # Key schedule
//!
//! The first 4 bytes of the file are XORed with `0x5555_5555` to produce the
//! initial key. From that seed, 256 rounds of `rotate_right(1)` followed by
//! `wrapping_mul(39916801)` fill a 256-entry table; entry `i` is the XOR mask
//! applied to the running key after the `i`-th ciphertext byte value is
//! consumed (indexed by the byte's own value, not its position).
//!
//! # Running key
//!
//! After decoding a 4-byte little-endian value, the key is updated once per
//! byte of the *encoded* (ciphertext) value: `key ^= table[byte]`, in byte
//! order. Some reads (a block's length field, a block's trailing zero word)
//! pass `update_key = false` and leave the key untouched — these are framing
//! fields the format does not fold into the stream.
//!
//! # Blocks
//!
//! A block is `{result: u32, length: u32}` followed by `length` bytes of
//! content and a mandatory trailing zero `u32`. `length` is read without
//! updating the key. At the block's end, the cursor must sit exactly at
//! `start_of_content + length`, and the trailing word must be `0`.

use std::fs;
use std::path::Path;

use crate::error::{GrimVaultError, Result};
use crate::reader::RawReader;

const FMT: &str = "gst";
const TABLE_LENGTH: usize = 256;
const XOR_KEY: u32 = 0x5555_5555;
const PRIME: u32 = 39916801;

struct Block {
    result: u32,
    length: u32,
    end: usize,
}

struct StashDecoder<'a> {
    reader: RawReader<'a>,
    key: u32,
    key_table: [u32; TABLE_LENGTH],
}

impl<'a> StashDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        let mut reader = RawReader::new(data, FMT);
        let seed = decode_initial_key(&mut reader)?;
        let mut key_table = [0u32; TABLE_LENGTH];
        let mut x = seed;
        for slot in key_table.iter_mut() {
            x = x.rotate_right(1);
            x = x.wrapping_mul(PRIME);
            *slot = x;
        }
        Ok(StashDecoder {
            reader,
            key: seed,
            key_table,
        })
    }

    fn cursor(&self) -> usize {
        self.reader.cursor()
    }

    fn decode_ex(&mut self, encoded: u32, update_key: bool) -> u32 {
        let n = encoded ^ self.key;
        if update_key {
            for b in encoded.to_le_bytes() {
                self.key ^= self.key_table[b as usize];
            }
        }
        n
    }

    fn read_uint_ex(&mut self, update_key: bool) -> Result<u32> {
        let encoded = self.reader.u32()?;
        Ok(self.decode_ex(encoded, update_key))
    }

    fn read_uint(&mut self) -> Result<u32> {
        self.read_uint_ex(true)
    }

    fn read_bool(&mut self) -> Result<bool> {
        let b = self.reader.u8()?;
        let n = (b as u32) ^ self.key;
        self.key ^= self.key_table[b as usize];
        Ok((n & 0xFF) == 1)
    }

    fn read_block(&mut self) -> Result<Block> {
        let result = self.read_uint()?;
        let length = self.read_uint_ex(false)?;
        let end = self.cursor() + length as usize;
        Ok(Block {
            result,
            length,
            end,
        })
    }

    fn read_block_end(&mut self, block: &Block) -> Result<()> {
        if block.end != self.cursor() {
            return Err(GrimVaultError::malformed(
                FMT,
                self.cursor(),
                format!("unexpected cursor position at block end, wanted {}", block.end),
            ));
        }
        let trailer = self.read_uint_ex(false)?;
        if trailer > 0 {
            return Err(GrimVaultError::malformed(
                FMT,
                self.cursor(),
                format!("non-zero block trailer: {trailer}"),
            ));
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_uint()?;
        if length == 0 {
            return Ok(String::new());
        }
        if self.cursor() + length as usize > self.reader.len() {
            return Err(GrimVaultError::malformed(FMT, self.cursor(), "too little data"));
        }
        let bytes = self.reader.bytes(length as usize)?.to_vec();
        let mut decoded = Vec::with_capacity(bytes.len());
        for b in bytes {
            decoded.push((b as u32 ^ self.key) as u8);
            self.key ^= self.key_table[b as usize];
        }
        String::from_utf8(decoded)
            .map_err(|e| GrimVaultError::malformed(FMT, self.cursor(), format!("invalid UTF-8 in string: {e}")))
    }
}

fn decode_initial_key(r: &mut RawReader) -> Result<u32> {
    let b0 = r.u8()? as u32;
    let b1 = r.u8()? as u32;
    let b2 = r.u8()? as u32;
    let b3 = r.u8()? as u32;
    let raw = b0 | (b1 << 8) | (b2 << 0x10) | (b3 << 0x18);
    Ok(raw ^ XOR_KEY)
}

/// An inventory item. `material_combines`-adjacent reserved field from the
/// wire format is read and discarded; it carries no observable state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Item {
    pub base: String,
    pub prefix: String,
    pub suffix: String,
    pub modifier: String,
    pub transmute: String,
    pub material: String,
    pub relic_completion_bonus: String,
    pub enchantment: String,
    pub seed: u32,
    pub relic_seed: u32,
    pub enchantment_seed: u32,
    pub material_combines: u32,
    pub stack_size: u32,
    pub x: u32,
    pub y: u32,
}

fn read_item(d: &mut StashDecoder) -> Result<Item> {
    let base = d.read_string()?;
    let prefix = d.read_string()?;
    let suffix = d.read_string()?;
    let modifier = d.read_string()?;
    let transmute = d.read_string()?;
    let seed = d.read_uint()?;
    let material = d.read_string()?;
    let relic_completion_bonus = d.read_string()?;
    let relic_seed = d.read_uint()?;
    let enchantment = d.read_string()?;
    let _reserved = d.read_uint()?;
    let enchantment_seed = d.read_uint()?;
    let material_combines = d.read_uint()?;
    let stack_size = d.read_uint()?;
    let x = d.read_uint()?;
    let y = d.read_uint()?;
    Ok(Item {
        base,
        prefix,
        suffix,
        modifier,
        transmute,
        material,
        relic_completion_bonus,
        enchantment,
        seed,
        relic_seed,
        enchantment_seed,
        material_combines,
        stack_size,
        x,
        y,
    })
}

/// One tab of the stash, with its grid dimensions and contained items.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StashTab {
    pub items: Vec<Item>,
    pub width: u32,
    pub height: u32,
}

fn read_stash_tab(d: &mut StashDecoder) -> Result<StashTab> {
    let block = d.read_block()?;
    let width = d.read_uint()?;
    let height = d.read_uint()?;
    let item_count = d.read_uint()?;
    let mut items = Vec::with_capacity(item_count as usize);
    for _ in 0..item_count {
        items.push(read_item(d)?);
    }
    d.read_block_end(&block)?;
    Ok(StashTab {
        items,
        width,
        height,
    })
}

/// The full decoded stash: an ordered list of tabs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stash {
    pub tabs: Vec<StashTab>,
}

/// Decode a `.gst` stash save from an in-memory buffer.
pub fn read_stash_bytes(data: &[u8]) -> Result<Stash> {
    let mut d = StashDecoder::new(data)?;

    let literal = d.read_uint()?;
    if literal != 2 {
        return Err(GrimVaultError::BadMagic {
            fmt: FMT,
            got: literal as u64,
            at: 0,
            path: None,
        });
    }

    let main_block = d.read_block()?;
    if main_block.result != 18 {
        return Err(GrimVaultError::BadMagic {
            fmt: FMT,
            got: main_block.result as u64,
            at: d.cursor(),
            path: None,
        });
    }

    let version = d.read_uint()?;
    let zero = d.read_uint_ex(false)?;
    if zero != 0 {
        return Err(GrimVaultError::malformed(FMT, d.cursor(), format!("expected literal 0, got {zero}")));
    }

    let _header_string = d.read_string()?;

    if version >= 5 {
        let _is_expansion = d.read_bool()?;
    }

    let tab_count = d.read_uint()?;
    let mut tabs = Vec::with_capacity(tab_count as usize);
    for _ in 0..tab_count {
        tabs.push(read_stash_tab(&mut d)?);
    }

    d.read_block_end(&main_block)?;

    Ok(Stash { tabs })
}

/// Decode a `.gst` stash save from a file path.
pub fn read_stash<P: AsRef<Path>>(path: P) -> Result<Stash> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| GrimVaultError::io(FMT, e).with_path(path))?;
    read_stash_bytes(&data).map_err(|e| e.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Encoder {
        key: u32,
        key_table: [u32; TABLE_LENGTH],
        buf: Vec<u8>,
    }

    impl Encoder {
        fn new(seed_plain: u32) -> Self {
            let key = seed_plain ^ XOR_KEY;
            let mut key_table = [0u32; TABLE_LENGTH];
            let mut x = key;
            for slot in key_table.iter_mut() {
                x = x.rotate_right(1);
                x = x.wrapping_mul(PRIME);
                *slot = x;
            }
            let mut buf = Vec::new();
            buf.extend_from_slice(&seed_plain.to_le_bytes());
            Encoder { key, key_table, buf }
        }

        fn write_uint_ex(&mut self, plain: u32, update_key: bool) {
            let encoded = plain ^ self.key;
            if update_key {
                for b in encoded.to_le_bytes() {
                    self.key ^= self.key_table[b as usize];
                }
            }
            self.buf.extend_from_slice(&encoded.to_le_bytes());
        }

        fn write_uint(&mut self, plain: u32) {
            self.write_uint_ex(plain, true);
        }

        fn write_bool(&mut self, value: bool) {
            let plain = if value { 1u8 } else { 0u8 };
            let encoded = plain ^ (self.key as u8);
            self.key ^= self.key_table[encoded as usize];
            self.buf.push(encoded);
        }

        fn write_string(&mut self, s: &str) {
            self.write_uint(s.len() as u32);
            for &b in s.as_bytes() {
                let encoded = b ^ (self.key as u8);
                self.key ^= self.key_table[encoded as usize];
                self.buf.push(encoded);
            }
        }

        fn write_block_start(&mut self, result: u32, length: u32) {
            self.write_uint(result);
            self.write_uint_ex(length, false);
        }

        fn write_block_trailer(&mut self) {
            self.write_uint_ex(0, false);
        }

        fn write_item(&mut self, item: &Item) {
            self.write_string(&item.base);
            self.write_string(&item.prefix);
            self.write_string(&item.suffix);
            self.write_string(&item.modifier);
            self.write_string(&item.transmute);
            self.write_uint(item.seed);
            self.write_string(&item.material);
            self.write_string(&item.relic_completion_bonus);
            self.write_uint(item.relic_seed);
            self.write_string(&item.enchantment);
            self.write_uint(0); // reserved
            self.write_uint(item.enchantment_seed);
            self.write_uint(item.material_combines);
            self.write_uint(item.stack_size);
            self.write_uint(item.x);
            self.write_uint(item.y);
        }
    }

    fn sample_item() -> Item {
        Item {
            base: "weapons/axe/axe01.dbr".into(),
            prefix: "prefix01.dbr".into(),
            suffix: "".into(),
            modifier: "".into(),
            transmute: "".into(),
            material: "".into(),
            relic_completion_bonus: "".into(),
            enchantment: "".into(),
            seed: 1234,
            relic_seed: 0,
            enchantment_seed: 0,
            material_combines: 0,
            stack_size: 1,
            x: 3,
            y: 5,
        }
    }

    #[test]
    fn decodes_stash_with_zero_tabs_version_4() {
        // Version 4 has no expansion-flag bool before tab_count, matching
        // the pre-expansion wire format.
        let data = build_fixture(4);
        let stash = read_stash_bytes(&data).unwrap();
        assert_eq!(stash.tabs.len(), 0);
    }

    #[test]
    fn decodes_stash_with_zero_tabs_version_5() {
        let data = build_fixture(5);
        let stash = read_stash_bytes(&data).unwrap();
        assert_eq!(stash.tabs.len(), 0);
    }

    /// Build a minimal well-formed stash buffer for the given version by
    /// running the real encoder logic forward and fixing up the block length
    /// in a second pass once the body size is known.
    fn build_fixture(version: u32) -> Vec<u8> {
        // First pass: encode the body alone to learn its length, with a
        // decoder-compatible key schedule starting from the same seed the
        // real header will use.
        let seed_plain = 0xDEAD_BEEFu32;

        // Determine body length by encoding into a throwaway encoder whose
        // key state starts exactly where it will after `result=18` is
        // written in the real stream.
        let mut probe = Encoder::new(seed_plain);
        probe.write_uint(2);
        probe.write_uint(18); // same as result field of main block
        let body_start = probe.buf.len();
        probe.write_uint(version);
        probe.write_uint_ex(0, false);
        probe.write_string("stash header");
        if version >= 5 {
            probe.write_bool(false);
        }
        probe.write_uint(0);
        let body_len = (probe.buf.len() - body_start) as u32;

        // Second pass: the real stream, with the now-known length.
        let mut enc = Encoder::new(seed_plain);
        enc.write_uint(2);
        enc.write_block_start(18, body_len);
        enc.write_uint(version);
        enc.write_uint_ex(0, false);
        enc.write_string("stash header");
        if version >= 5 {
            enc.write_bool(false);
        }
        enc.write_uint(0);
        enc.write_block_trailer();
        enc.buf
    }

    #[test]
    fn rejects_non_literal_two_header() {
        let mut data = build_fixture(4);
        // Corrupt the first plaintext-affecting byte so the decoded literal
        // is no longer 2. XOR the first encoded byte with 0xFF.
        data[4] ^= 0xFF;
        let err = read_stash_bytes(&data).unwrap_err();
        assert!(matches!(err, GrimVaultError::BadMagic { .. }));
    }

    /// Build a stash with one tab holding one real item, probing the tab's
    /// body length the same two-pass way `build_fixture` probes the outer
    /// block. Exercises `read_item`'s byte-at-a-time string cipher and its
    /// reserved-word skip, not just the zero-item tab path every other test
    /// in this module covers.
    fn build_fixture_with_item(version: u32, item: &Item) -> Vec<u8> {
        let seed_plain = 0xDEAD_BEEFu32;

        let mut probe = Encoder::new(seed_plain);
        probe.write_uint(2);
        probe.write_uint(18);
        let body_start = probe.buf.len();
        probe.write_uint(version);
        probe.write_uint_ex(0, false);
        probe.write_string("stash header");
        if version >= 5 {
            probe.write_bool(false);
        }
        probe.write_uint(1); // tab_count

        let mut tab_probe = Encoder { key: probe.key, key_table: probe.key_table, buf: Vec::new() };
        tab_probe.write_uint(10);
        tab_probe.write_uint(20);
        tab_probe.write_uint(1); // item_count
        tab_probe.write_item(item);
        let tab_body_len = tab_probe.buf.len() as u32;

        probe.write_block_start(1, tab_body_len);
        probe.write_uint(10);
        probe.write_uint(20);
        probe.write_uint(1);
        probe.write_item(item);
        probe.write_block_trailer();
        let body_len = (probe.buf.len() - body_start) as u32;

        let mut enc = Encoder::new(seed_plain);
        enc.write_uint(2);
        enc.write_block_start(18, body_len);
        enc.write_uint(version);
        enc.write_uint_ex(0, false);
        enc.write_string("stash header");
        if version >= 5 {
            enc.write_bool(false);
        }
        enc.write_uint(1);
        enc.write_block_start(1, tab_body_len);
        enc.write_uint(10);
        enc.write_uint(20);
        enc.write_uint(1);
        enc.write_item(item);
        enc.write_block_trailer();
        enc.write_block_trailer();
        enc.buf
    }

    #[test]
    fn decodes_tab_item_fields_through_cipher() {
        let item = sample_item();
        let data = build_fixture_with_item(5, &item);
        let stash = read_stash_bytes(&data).unwrap();
        assert_eq!(stash.tabs.len(), 1);
        assert_eq!(stash.tabs[0].width, 10);
        assert_eq!(stash.tabs[0].height, 20);
        assert_eq!(stash.tabs[0].items, vec![item]);
    }
}
