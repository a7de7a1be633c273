//! Little-endian binary writer/reader used by the compiled unit format

use thiserror::Error;

/// Errors raised while decoding binary data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the value was complete
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// A string was not valid UTF-8
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Unknown opcode byte
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown enum tag
    #[error("Invalid tag {tag} for {what} at offset {offset}")]
    InvalidTag {
        /// What was being decoded
        what: &'static str,
        /// The tag value
        tag: u8,
        /// Offset of the tag
        offset: usize,
    },

    /// A type or method signature failed to parse
    #[error("Invalid signature '{0}'")]
    InvalidSignature(String),
}

/// Growable binary buffer with typed emitters
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    /// Raw output buffer
    pub buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Emit a single byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a u16
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a u32
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an i64
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an f64
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit an optional string (presence byte + string)
    pub fn emit_opt_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.emit_u8(1);
                self.emit_string(s);
            }
            None => self.emit_u8(0),
        }
    }

    /// Emit a count-prefixed list of strings
    pub fn emit_strings(&mut self, values: &[String]) {
        self.emit_u32(values.len() as u32);
        for value in values {
            self.emit_string(value);
        }
    }

    /// Overwrite a previously emitted u32
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Finish and take the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Cursor over a byte slice with typed readers
#[derive(Debug)]
pub struct BytecodeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether unread bytes remain
    pub fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a u16
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a u32
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    /// Read an i64
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    /// Read an f64
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(buf))
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read an optional string
    pub fn read_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        if self.read_u8()? != 0 {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    /// Read a count-prefixed list of strings
    pub fn read_strings(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.read_u32()? as usize;
        let mut values = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(7);
        writer.emit_u16(513);
        writer.emit_i64(-42);
        writer.emit_f64(2.5);
        writer.emit_string("hello");
        writer.emit_opt_string(None);

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16().unwrap(), 513);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert_eq!(reader.read_f64().unwrap(), 2.5);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.read_opt_string().unwrap(), None);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = BytecodeReader::new(&[1, 0]);
        assert_eq!(reader.read_u32(), Err(DecodeError::UnexpectedEof(0)));
    }

    #[test]
    fn test_patch_u32() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u32(0);
        writer.patch_u32(0, 0xDEADBEEF);
        let bytes = writer.into_bytes();
        assert_eq!(BytecodeReader::new(&bytes).read_u32().unwrap(), 0xDEADBEEF);
    }
}
