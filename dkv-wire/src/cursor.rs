//! Bounds-checked message reader and writer.
//!
//! Every read states how many bytes it needs and fails with
//! [`WireError::Exhausted`] if the message is shorter. There is no way to
//! read outside the buffer.

use bytes::{BufMut, Bytes, BytesMut};
use dkv_types::constant::MAX_RAW_DATA_SIZE;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("read of {requested} bytes exceeds remaining {remaining}")]
    Exhausted { requested: usize, remaining: usize },
    #[error("declared size {0} exceeds message capacity")]
    Oversized(usize),
    #[error("invalid wire value for {0}")]
    Invalid(&'static str),
    #[error("interface descriptor mismatch")]
    BadDescriptor,
    #[error("unknown operation code {0}")]
    UnknownOp(u32),
}

/// Sequential reader over a received message.
pub struct BufReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BufReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::Exhausted {
                requested: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::Invalid("bool")),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// A length-prefixed blob. The declared length is checked against the
    /// remaining message and the global sanity bound before any allocation
    /// happens.
    pub fn read_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        if len > MAX_RAW_DATA_SIZE {
            return Err(WireError::Oversized(len));
        }
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::Invalid("utf-8 string"))
    }

    pub fn read_string_list(&mut self) -> Result<Vec<String>, WireError> {
        let count = self.read_u32()? as usize;
        // Each string carries at least its length word.
        if count * 4 > self.remaining() {
            return Err(WireError::Invalid("string list count"));
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_string()?);
        }
        Ok(out)
    }

    /// A sub-reader over the next `len` bytes, consumed from this one.
    /// Used for raw sections so their cells cannot read past the section.
    pub fn sub_reader(&mut self, len: usize) -> Result<BufReader<'a>, WireError> {
        Ok(BufReader::new(self.take(len)?))
    }
}

/// Sequential writer building an outgoing message.
#[derive(Default)]
pub struct BufWriter {
    buf: BytesMut,
}

impl BufWriter {
    pub fn new() -> Self {
        BufWriter::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        BufWriter {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_blob(&mut self, data: &[u8]) {
        self.buf.put_u32_le(data.len() as u32);
        self.buf.put_slice(data);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_blob(s.as_bytes());
    }

    pub fn write_string_list(&mut self, items: &[String]) {
        self.write_u32(items.len() as u32);
        for s in items {
            self.write_string(s);
        }
    }

    /// Appends bytes with no length prefix; used for raw sections whose
    /// size was already declared.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
