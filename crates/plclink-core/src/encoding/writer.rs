use crate::EncodeError;

/// Cursor that encodes into a caller-owned buffer without allocating.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.write_all(&[value])
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if self.remaining() < data.len() {
            return Err(EncodeError::BufferTooSmall);
        }
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes a byte-count prefix followed by `values` packed LSB-first.
    pub fn write_packed_bits<I>(&mut self, count: usize, values: I) -> Result<(), EncodeError>
    where
        I: IntoIterator<Item = bool>,
    {
        let byte_count = count.div_ceil(8);
        let prefix = u8::try_from(byte_count).map_err(|_| EncodeError::ValueOutOfRange)?;
        if self.remaining() < byte_count + 1 {
            return Err(EncodeError::BufferTooSmall);
        }
        self.write_u8(prefix)?;
        let start = self.pos;
        self.buf[start..start + byte_count].fill(0);
        for (i, value) in values.into_iter().take(count).enumerate() {
            if value {
                self.buf[start + i / 8] |= 1u8 << (i % 8);
            }
        }
        self.pos += byte_count;
        Ok(())
    }

    /// Writes a byte-count prefix followed by big-endian registers.
    pub fn write_registers<I>(&mut self, count: usize, values: I) -> Result<(), EncodeError>
    where
        I: IntoIterator<Item = u16>,
    {
        let prefix = u8::try_from(count * 2).map_err(|_| EncodeError::ValueOutOfRange)?;
        if self.remaining() < count * 2 + 1 {
            return Err(EncodeError::BufferTooSmall);
        }
        self.write_u8(prefix)?;
        let mut written = 0usize;
        for value in values.into_iter().take(count) {
            self.write_be_u16(value)?;
            written += 1;
        }
        if written != count {
            return Err(EncodeError::InvalidLength);
        }
        Ok(())
    }
}
