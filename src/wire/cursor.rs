// Bounds-checked byte cursors used by every encoder and decoder.
// All multi-byte values are little-endian; strings are NUL-terminated.

use bytes::{Buf, BufMut, BytesMut};

use super::WireError;

/// Reader over a received buffer. Every read checks the remaining length
/// and fails with `WireError::Truncated` instead of panicking.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread part of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let mut b = self.take(1)?;
        Ok(b.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let mut b = self.take(2)?;
        Ok(b.get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        let mut b = self.take(2)?;
        Ok(b.get_i16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let mut b = self.take(4)?;
        Ok(b.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let mut b = self.take(4)?;
        Ok(b.get_i32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let mut b = self.take(4)?;
        Ok(b.get_f32_le())
    }

    /// Returns the bytes up to (not including) the next NUL and consumes the NUL.
    pub fn read_cstr(&mut self) -> Result<&'a [u8], WireError> {
        let rest = self.rest();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(WireError::Truncated {
                needed: rest.len() + 1,
                remaining: rest.len(),
            })?;
        let s = self.take(len)?;
        self.pos += 1;
        Ok(s)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_cstr()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn skip_cstr(&mut self) -> Result<(), WireError> {
        self.read_cstr().map(|_| ())
    }
}

/// Growable writer backed by `BytesMut`.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..]
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Writes `data` up to its first NUL, then the terminator.
    pub fn write_cstr(&mut self, data: &[u8]) {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        self.buf.put_slice(&data[..end]);
        self.buf.put_u8(0);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_cstr(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut w = Writer::new();
        w.write_u16(0x0102);
        w.write_u32(0x0304_0506);
        w.write_str("ab");
        assert_eq!(w.as_slice(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03, b'a', b'b', 0]);

        let data = w.into_vec();
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u32().unwrap(), 0x0304_0506);
        assert_eq!(r.read_string().unwrap(), "ab");
        assert!(r.is_empty());
    }

    #[test]
    fn test_truncated_reads_fail() {
        let data = [1u8, 2, 3];
        let mut r = Reader::new(&data);
        assert_eq!(
            r.read_u32(),
            Err(WireError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
        // A failed read consumes nothing.
        assert_eq!(r.position(), 0);
        assert!(r.read_cstr().is_err());
    }

    #[test]
    fn test_interior_nul_truncates_string() {
        let mut w = Writer::new();
        w.write_cstr(b"say\0hidden");
        assert_eq!(w.as_slice(), b"say\0");
    }
}
