//! Raw byte reader — a cursor over an immutable buffer with typed
//! little-endian primitive reads.
//!
//! # Invariant
//! `0 <= cursor <= data.len()` always holds after any successful operation.
//! A failed read never moves the cursor.
//!
//! The reader does no decoding of its own; [`crate::stash`] wraps it to
//! apply the stash stream cipher on top of these raw reads.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{GrimVaultError, Result};

pub struct RawReader<'a> {
    data: &'a [u8],
    cursor: usize,
    fmt: &'static str,
}

impl<'a> RawReader<'a> {
    pub fn new(data: &'a [u8], fmt: &'static str) -> Self {
        RawReader {
            data,
            cursor: 0,
            fmt,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn truncated(&self, cursor: usize, need: usize) -> GrimVaultError {
        GrimVaultError::Truncated {
            fmt: self.fmt,
            cursor,
            need,
            path: None,
        }
    }

    /// Set the cursor to an absolute byte position. Fails if `pos > len`.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.truncated(pos, 0));
        }
        self.cursor = pos;
        Ok(())
    }

    /// Move the cursor forward by `n` bytes. Fails if it would run past the end.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        let next = self
            .cursor
            .checked_add(n)
            .ok_or_else(|| self.truncated(self.cursor, n))?;
        self.seek(next)
    }

    /// Return a view of `n` bytes at the current cursor and advance past them.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.read_at_absolute(self.cursor, n)
    }

    /// Return a view of `n` bytes starting at the absolute offset `off`.
    ///
    /// Side effect preserved from the original implementation: the cursor is
    /// advanced by `n` regardless of `off`, even when `off` differs from the
    /// current cursor. Callers that want a pure random-access read must save
    /// and restore the cursor themselves; this is why the operation is named
    /// for the side effect rather than called a plain "peek".
    pub fn read_at_absolute(&mut self, off: usize, n: usize) -> Result<&'a [u8]> {
        let end = off
            .checked_add(n)
            .ok_or_else(|| self.truncated(off, n))?;
        if end > self.data.len() {
            return Err(self.truncated(off, n));
        }
        let slice = &self.data[off..end];
        let new_cursor = self
            .cursor
            .checked_add(n)
            .ok_or_else(|| self.truncated(self.cursor, n))?;
        if new_cursor > self.data.len() {
            return Err(self.truncated(self.cursor, n));
        }
        self.cursor = new_cursor;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    /// Read a `u32` length prefix followed by that many bytes of UTF-8 text.
    /// A length of 0 yields an empty string.
    pub fn string_len_prefixed(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GrimVaultError::malformed(self.fmt, self.cursor, format!("invalid UTF-8 in string: {e}")))
    }

    /// Read bytes up to (and including) a NUL terminator; return the content
    /// before the terminator.
    pub fn cstring(&mut self) -> Result<String> {
        let start = self.cursor;
        let mut end = start;
        loop {
            if end >= self.data.len() {
                return Err(self.truncated(start, 1));
            }
            if self.data[end] == 0 {
                break;
            }
            end += 1;
        }
        let content = &self.data[start..end];
        self.cursor = end + 1;
        String::from_utf8(content.to_vec())
            .map_err(|e| GrimVaultError::malformed(self.fmt, start, format!("invalid UTF-8 in cstring: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primitives_little_endian() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut r = RawReader::new(&data, "test");
        assert_eq!(r.u16().unwrap(), 1);
        assert_eq!(r.u32().unwrap(), 2);
    }

    #[test]
    fn truncated_read_does_not_move_cursor() {
        let data = [0x01, 0x02];
        let mut r = RawReader::new(&data, "test");
        assert!(r.u32().is_err());
        assert_eq!(r.cursor(), 0);
    }

    #[test]
    fn cstring_stops_before_terminator() {
        let data = b"hello\0world";
        let mut r = RawReader::new(data, "test");
        assert_eq!(r.cstring().unwrap(), "hello");
        assert_eq!(r.cursor(), 6);
    }

    #[test]
    fn string_len_prefixed_zero_length_is_empty() {
        let data = [0u8, 0, 0, 0];
        let mut r = RawReader::new(&data, "test");
        assert_eq!(r.string_len_prefixed().unwrap(), "");
    }

    #[test]
    fn read_at_absolute_advances_cursor_by_n_not_to_off() {
        let data = [10u8, 20, 30, 40, 50];
        let mut r = RawReader::new(&data, "test");
        r.seek(1).unwrap();
        let slice = r.read_at_absolute(3, 2).unwrap();
        assert_eq!(slice, &[40, 50]);
        // cursor advanced by n=2 from its prior position (1), not to off+n.
        assert_eq!(r.cursor(), 3);
    }

    proptest::proptest! {
        /// Every primitive read either returns a value drawn from in-bounds
        /// bytes or a `Truncated` error; it never panics on arbitrary input,
        /// which matters since every field width in this crate comes from
        /// untrusted file data.
        #[test]
        fn primitive_reads_never_panic(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64)) {
            let mut r = RawReader::new(&data, "test");
            for _ in 0..32 {
                let _ = r.u8();
                let _ = r.u16();
                let _ = r.u32();
                let _ = r.u64();
                let _ = r.f32();
                let _ = r.string_len_prefixed();
                let _ = r.cstring();
            }
        }

        /// `seek` never leaves the cursor past `data.len()`, whether it
        /// succeeds or fails.
        #[test]
        fn seek_keeps_cursor_in_bounds(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32), pos in 0usize..64) {
            let mut r = RawReader::new(&data, "test");
            let _ = r.seek(pos);
            prop_assert!(r.cursor() <= data.len());
        }
    }
}
