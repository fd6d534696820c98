//! Little-endian field reader shared by both codecs.

use crate::error::{Error, Result};

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self.pos + count;
        if end > self.buf.len() {
            return Err(Error::TruncatedFrame {
                needed: end,
                available: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn i16s<const N: usize>(&mut self) -> Result<[i16; N]> {
        let mut out = [0i16; N];
        for value in &mut out {
            *value = self.i16()?;
        }
        Ok(out)
    }

    pub fn u16s<const N: usize>(&mut self) -> Result<[u16; N]> {
        let mut out = [0u16; N];
        for value in &mut out {
            *value = self.u16()?;
        }
        Ok(out)
    }

    /// NUL-padded ASCII field.
    pub fn ascii(&mut self, count: usize) -> Result<String> {
        let raw = self.take(count)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// Write `text` into a fixed-width NUL-padded field.
pub(crate) fn put_ascii(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width);
    out.extend_from_slice(&bytes[..len]);
    out.resize(out.len() + width - len, 0);
}
