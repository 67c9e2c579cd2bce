//! MBAP (Modbus Application Protocol) framing for Modbus TCP.

use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

pub const MBAP_HEADER_LEN: usize = 7;
/// Largest PDU a Modbus TCP ADU may carry.
pub const MAX_PDU_LEN: usize = 253;
pub const MAX_ADU_LEN: usize = MBAP_HEADER_LEN + MAX_PDU_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Counts the unit-id byte plus the PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn for_pdu(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Result<Self, EncodeError> {
        if pdu_len == 0 || pdu_len > MAX_PDU_LEN {
            return Err(EncodeError::InvalidLength);
        }
        // pdu_len <= 253, so the +1 cannot overflow u16
        let length = u16::try_from(pdu_len + 1).map_err(|_| EncodeError::ValueOutOfRange)?;
        Ok(Self {
            transaction_id,
            protocol_id: 0,
            length,
            unit_id,
        })
    }

    pub fn pdu_len(&self) -> usize {
        usize::from(self.length).saturating_sub(1)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)?;
        Ok(())
    }

    /// Decodes and validates a header. A zero-length PDU or a non-Modbus
    /// protocol id is rejected; oversized lengths are left to the caller so
    /// it can drain the stream.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let transaction_id = r.read_be_u16()?;
        let protocol_id = r.read_be_u16()?;
        let length = r.read_be_u16()?;
        let unit_id = r.read_u8()?;

        if protocol_id != 0 {
            return Err(DecodeError::InvalidProtocolId);
        }
        if length < 2 {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }
}

pub fn encode_frame(
    w: &mut Writer<'_>,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), EncodeError> {
    MbapHeader::for_pdu(transaction_id, unit_id, pdu.len())?.encode(w)?;
    w.write_all(pdu)
}

pub fn decode_frame<'a>(r: &mut Reader<'a>) -> Result<(MbapHeader, &'a [u8]), DecodeError> {
    let header = MbapHeader::decode(r)?;
    if header.pdu_len() > MAX_PDU_LEN {
        return Err(DecodeError::InvalidLength);
    }
    let pdu = r.read_exact(header.pdu_len())?;
    Ok((header, pdu))
}
