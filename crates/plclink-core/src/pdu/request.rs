use crate::encoding::{be_register, Reader, Writer};
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};

/// Largest coil or discrete-input block one read may ask for.
pub const MAX_READ_BITS: u16 = 2000;
/// Largest holding-register block one read may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_REGISTERS: u16 = 123;

fn span_fits(start_address: u16, quantity: u16) -> bool {
    u32::from(start_address) + u32::from(quantity) <= 0x1_0000
}

fn validate_quantity(start_address: u16, quantity: u16, max: u16) -> Result<(), EncodeError> {
    if quantity == 0 || quantity > max || !span_fits(start_address, quantity) {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(())
}

fn validate_quantity_decode(start_address: u16, quantity: u16, max: u16) -> Result<(), DecodeError> {
    if quantity == 0 || quantity > max || !span_fits(start_address, quantity) {
        return Err(DecodeError::InvalidValue);
    }
    Ok(())
}

fn coil_word(value: bool) -> u16 {
    if value {
        0xFF00
    } else {
        0x0000
    }
}

fn decode_coil_word(raw: u16) -> Result<bool, DecodeError> {
    match raw {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(DecodeError::InvalidValue),
    }
}

/// FC01/FC02/FC03 read of a contiguous block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub function: FunctionCode,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub const fn coils(start_address: u16, quantity: u16) -> Self {
        Self {
            function: FunctionCode::ReadCoils,
            start_address,
            quantity,
        }
    }

    pub const fn discrete_inputs(start_address: u16, quantity: u16) -> Self {
        Self {
            function: FunctionCode::ReadDiscreteInputs,
            start_address,
            quantity,
        }
    }

    pub const fn holding_registers(start_address: u16, quantity: u16) -> Self {
        Self {
            function: FunctionCode::ReadHoldingRegisters,
            start_address,
            quantity,
        }
    }

    /// Protocol ceiling for this read's function, or `None` for a write code.
    pub const fn max_quantity(function: FunctionCode) -> Option<u16> {
        match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => Some(MAX_READ_BITS),
            FunctionCode::ReadHoldingRegisters => Some(MAX_READ_REGISTERS),
            _ => None,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let max = Self::max_quantity(self.function).ok_or(EncodeError::ValueOutOfRange)?;
        validate_quantity(self.start_address, self.quantity, max)?;
        w.write_u8(self.function.as_u8())?;
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(self.quantity)?;
        Ok(())
    }

    fn decode_body(function: FunctionCode, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let start_address = r.read_be_u16()?;
        let quantity = r.read_be_u16()?;
        let max = Self::max_quantity(function).ok_or(DecodeError::InvalidFunctionCode)?;
        validate_quantity_decode(start_address, quantity, max)?;
        Ok(Self {
            function,
            start_address,
            quantity,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleCoilRequest {
    pub address: u16,
    pub value: bool,
}

impl WriteSingleCoilRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleCoil.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(coil_word(self.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterRequest {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleRegisterRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequest<'a> {
    pub start_address: u16,
    pub values: &'a [u16],
}

impl<'a> WriteMultipleRegistersRequest<'a> {
    pub fn quantity(&self) -> Result<u16, EncodeError> {
        let quantity =
            u16::try_from(self.values.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        validate_quantity(self.start_address, quantity, MAX_WRITE_REGISTERS)?;
        Ok(quantity)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let quantity = self.quantity()?;
        w.write_u8(FunctionCode::WriteMultipleRegisters.as_u8())?;
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(quantity)?;
        w.write_registers(self.values.len(), self.values.iter().copied())
    }
}

/// FC16 payload as seen by a server: values stay in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequestData<'a> {
    pub start_address: u16,
    pub quantity: u16,
    pub values_bytes: &'a [u8],
}

impl<'a> WriteMultipleRegistersRequestData<'a> {
    pub fn register(&self, index: usize) -> Option<u16> {
        if index >= usize::from(self.quantity) {
            return None;
        }
        be_register(self.values_bytes, index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Read(ReadRequest),
    WriteSingleCoil(WriteSingleCoilRequest),
    WriteSingleRegister(WriteSingleRegisterRequest),
    WriteMultipleRegisters(WriteMultipleRegistersRequest<'a>),
}

impl<'a> Request<'a> {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::Read(req) => req.encode(w),
            Self::WriteSingleCoil(req) => req.encode(w),
            Self::WriteSingleRegister(req) => req.encode(w),
            Self::WriteMultipleRegisters(req) => req.encode(w),
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::Read(req) => req.function,
            Self::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }
}

/// Request model handed to server implementations after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedRequest<'a> {
    Read(ReadRequest),
    WriteSingleCoil(WriteSingleCoilRequest),
    WriteSingleRegister(WriteSingleRegisterRequest),
    WriteMultipleRegisters(WriteMultipleRegistersRequestData<'a>),
}

impl<'a> DecodedRequest<'a> {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::Read(req) => req.function,
            Self::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub fn decode(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let function = FunctionCode::from_u8(r.read_u8()?)?;
        match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters => {
                Ok(Self::Read(ReadRequest::decode_body(function, r)?))
            }
            FunctionCode::WriteSingleCoil => {
                let address = r.read_be_u16()?;
                let value = decode_coil_word(r.read_be_u16()?)?;
                Ok(Self::WriteSingleCoil(WriteSingleCoilRequest { address, value }))
            }
            FunctionCode::WriteSingleRegister => {
                let address = r.read_be_u16()?;
                let value = r.read_be_u16()?;
                Ok(Self::WriteSingleRegister(WriteSingleRegisterRequest {
                    address,
                    value,
                }))
            }
            FunctionCode::WriteMultipleRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity_decode(start_address, quantity, MAX_WRITE_REGISTERS)?;
                let values_bytes = r.read_counted()?;
                if values_bytes.len() != usize::from(quantity) * 2 {
                    return Err(DecodeError::InvalidLength);
                }
                Ok(Self::WriteMultipleRegisters(
                    WriteMultipleRegistersRequestData {
                        start_address,
                        quantity,
                        values_bytes,
                    },
                ))
            }
        }
    }
}

pub(crate) fn decode_single_coil_echo(r: &mut Reader<'_>) -> Result<(u16, bool), DecodeError> {
    let address = r.read_be_u16()?;
    Ok((address, decode_coil_word(r.read_be_u16()?)?))
}

pub(crate) fn encode_single_coil_echo(
    w: &mut Writer<'_>,
    address: u16,
    value: bool,
) -> Result<(), EncodeError> {
    w.write_be_u16(address)?;
    w.write_be_u16(coil_word(value))
}

#[cfg(test)]
mod tests {
    use super::{
        DecodedRequest, ReadRequest, Request, WriteMultipleRegistersRequest,
        WriteSingleCoilRequest, MAX_READ_BITS, MAX_READ_REGISTERS,
    };
    use crate::encoding::{Reader, Writer};
    use crate::pdu::FunctionCode;
    use crate::{DecodeError, EncodeError};

    fn encode(req: Request<'_>) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; 260];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w)?;
        Ok(w.as_written().to_vec())
    }

    #[test]
    fn read_requests_respect_protocol_limits() {
        assert!(encode(Request::Read(ReadRequest::coils(0, MAX_READ_BITS))).is_ok());
        assert_eq!(
            encode(Request::Read(ReadRequest::coils(0, MAX_READ_BITS + 1))).unwrap_err(),
            EncodeError::ValueOutOfRange
        );
        assert!(encode(Request::Read(ReadRequest::holding_registers(
            0,
            MAX_READ_REGISTERS
        )))
        .is_ok());
        assert_eq!(
            encode(Request::Read(ReadRequest::holding_registers(
                0,
                MAX_READ_REGISTERS + 1
            )))
            .unwrap_err(),
            EncodeError::ValueOutOfRange
        );
        assert_eq!(
            encode(Request::Read(ReadRequest::discrete_inputs(0, 0))).unwrap_err(),
            EncodeError::ValueOutOfRange
        );
    }

    #[test]
    fn read_span_may_not_wrap_the_address_space() {
        assert!(encode(Request::Read(ReadRequest::holding_registers(0xFFFF, 1))).is_ok());
        assert_eq!(
            encode(Request::Read(ReadRequest::holding_registers(0xFFFF, 2))).unwrap_err(),
            EncodeError::ValueOutOfRange
        );
    }

    #[test]
    fn read_request_with_write_code_is_rejected() {
        let req = ReadRequest {
            function: FunctionCode::WriteSingleRegister,
            start_address: 0,
            quantity: 1,
        };
        assert_eq!(
            encode(Request::Read(req)).unwrap_err(),
            EncodeError::ValueOutOfRange
        );
    }

    #[test]
    fn fc16_carries_byte_count_and_words() {
        let req = Request::WriteMultipleRegisters(WriteMultipleRegistersRequest {
            start_address: 0x0064,
            values: &[0x4148, 0xF5C3],
        });
        assert_eq!(
            encode(req).unwrap(),
            vec![0x10, 0x00, 0x64, 0x00, 0x02, 0x04, 0x41, 0x48, 0xF5, 0xC3]
        );
    }

    #[test]
    fn fc16_rejects_too_many_registers() {
        let values = [0u16; 124];
        let req = Request::WriteMultipleRegisters(WriteMultipleRegistersRequest {
            start_address: 0,
            values: &values,
        });
        assert_eq!(encode(req).unwrap_err(), EncodeError::ValueOutOfRange);
    }

    #[test]
    fn decodes_reads_with_their_function() {
        let mut r = Reader::new(&[0x02, 0x00, 0x0A, 0x00, 0x10]);
        let decoded = DecodedRequest::decode(&mut r).unwrap();
        assert_eq!(
            decoded,
            DecodedRequest::Read(ReadRequest::discrete_inputs(10, 16))
        );
        assert_eq!(decoded.function_code(), FunctionCode::ReadDiscreteInputs);
        assert!(r.is_empty());
    }

    #[test]
    fn decodes_fc16_payload() {
        let mut r = Reader::new(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78]);
        match DecodedRequest::decode(&mut r).unwrap() {
            DecodedRequest::WriteMultipleRegisters(req) => {
                assert_eq!(req.start_address, 1);
                assert_eq!(req.quantity, 2);
                assert_eq!(req.register(0), Some(0x1234));
                assert_eq!(req.register(1), Some(0x5678));
                assert_eq!(req.register(2), None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_mismatched_fc16_byte_count() {
        let mut r = Reader::new(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x12, 0x34, 0x56]);
        assert_eq!(
            DecodedRequest::decode(&mut r).unwrap_err(),
            DecodeError::InvalidLength
        );
    }

    #[test]
    fn single_coil_uses_ff00_encoding() {
        let on = Request::WriteSingleCoil(WriteSingleCoilRequest {
            address: 3,
            value: true,
        });
        assert_eq!(encode(on).unwrap(), vec![0x05, 0x00, 0x03, 0xFF, 0x00]);

        let mut r = Reader::new(&[0x05, 0x00, 0x01, 0x12, 0x34]);
        assert_eq!(
            DecodedRequest::decode(&mut r).unwrap_err(),
            DecodeError::InvalidValue
        );
    }
}
