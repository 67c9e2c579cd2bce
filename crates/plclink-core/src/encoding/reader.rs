use crate::DecodeError;

/// Forward-only cursor that hands out borrowed sub-slices of the input.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::UnexpectedEof)?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_be_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_exact(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a Modbus byte-count prefix followed by that many payload bytes.
    pub fn read_counted(&mut self) -> Result<&'a [u8], DecodeError> {
        let byte_count = usize::from(self.read_u8()?);
        if byte_count == 0 {
            return Err(DecodeError::InvalidLength);
        }
        self.read_exact(byte_count)
    }
}

/// Bit `index` of an LSB-first packed coil/input payload.
pub(crate) fn packed_bit(packed: &[u8], index: usize) -> Option<bool> {
    let byte = packed.get(index / 8)?;
    Some((byte & (1u8 << (index % 8))) != 0)
}

/// Register `index` of a big-endian register payload.
pub(crate) fn be_register(data: &[u8], index: usize) -> Option<u16> {
    let offset = index.checked_mul(2)?;
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::{be_register, packed_bit, Reader};
    use crate::DecodeError;

    #[test]
    fn reads_big_endian_words_and_tracks_position() {
        let mut r = Reader::new(&[0x12, 0x34, 0x56]);
        assert_eq!(r.read_be_u16().unwrap(), 0x1234);
        assert_eq!(r.position(), 2);
        assert_eq!(r.read_be_u16().unwrap_err(), DecodeError::UnexpectedEof);
        assert_eq!(r.read_u8().unwrap(), 0x56);
        assert!(r.is_empty());
    }

    #[test]
    fn counted_payload_requires_non_zero_count() {
        let mut r = Reader::new(&[0x00]);
        assert_eq!(r.read_counted().unwrap_err(), DecodeError::InvalidLength);

        let mut r = Reader::new(&[0x02, 0xAA, 0xBB, 0xCC]);
        assert_eq!(r.read_counted().unwrap(), &[0xAA, 0xBB]);
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn counted_payload_rejects_short_body() {
        let mut r = Reader::new(&[0x04, 0xAA]);
        assert_eq!(r.read_counted().unwrap_err(), DecodeError::UnexpectedEof);
    }

    #[test]
    fn bit_and_register_helpers_index_payloads() {
        let packed = [0b0000_1001, 0b0000_0001];
        assert_eq!(packed_bit(&packed, 0), Some(true));
        assert_eq!(packed_bit(&packed, 1), Some(false));
        assert_eq!(packed_bit(&packed, 3), Some(true));
        assert_eq!(packed_bit(&packed, 8), Some(true));
        assert_eq!(packed_bit(&packed, 16), None);

        let regs = [0x00, 0x2A, 0xFF, 0xFE];
        assert_eq!(be_register(&regs, 1), Some(0xFFFE));
        assert_eq!(be_register(&regs, 2), None);
    }
}
