use crate::encoding::{be_register, packed_bit, Reader, Writer};
use crate::pdu::request::{decode_single_coil_echo, encode_single_coil_echo};
use crate::pdu::{ExceptionResponse, FunctionCode, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
use crate::{DecodeError, EncodeError};

/// FC01/FC02 reply: bits packed LSB-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBitsResponse<'a> {
    pub packed: &'a [u8],
}

impl<'a> ReadBitsResponse<'a> {
    /// Encodes a bit reply straight from values, without staging a packed copy.
    pub fn encode_values<I>(
        w: &mut Writer<'_>,
        function: FunctionCode,
        count: usize,
        values: I,
    ) -> Result<(), EncodeError>
    where
        I: IntoIterator<Item = bool>,
    {
        if !matches!(
            function,
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs
        ) {
            return Err(EncodeError::ValueOutOfRange);
        }
        w.write_u8(function.as_u8())?;
        w.write_packed_bits(count, values)
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        packed_bit(self.packed, index)
    }

    /// Number of bits the payload can describe; the tail of the last byte is padding.
    pub fn capacity(&self) -> usize {
        self.packed.len() * 8
    }
}

/// FC03 reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegistersResponse<'a> {
    pub data: &'a [u8],
}

impl<'a> ReadRegistersResponse<'a> {
    fn decode_body(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let data = r.read_counted()?;
        if data.len() % 2 != 0 || data.len() > usize::from(MAX_READ_REGISTERS) * 2 {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self { data })
    }

    pub fn encode_values<I>(w: &mut Writer<'_>, count: usize, values: I) -> Result<(), EncodeError>
    where
        I: IntoIterator<Item = u16>,
    {
        w.write_u8(FunctionCode::ReadHoldingRegisters.as_u8())?;
        w.write_registers(count, values)
    }

    pub fn register_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        be_register(self.data, index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleCoilResponse {
    pub address: u16,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterResponse {
    pub address: u16,
    pub value: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersResponse {
    pub start_address: u16,
    pub quantity: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    ReadCoils(ReadBitsResponse<'a>),
    ReadDiscreteInputs(ReadBitsResponse<'a>),
    ReadHoldingRegisters(ReadRegistersResponse<'a>),
    WriteSingleCoil(WriteSingleCoilResponse),
    WriteSingleRegister(WriteSingleRegisterResponse),
    WriteMultipleRegisters(WriteMultipleRegistersResponse),
    Exception(ExceptionResponse),
}

impl<'a> Response<'a> {
    pub fn decode(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let function_byte = r.read_u8()?;
        if FunctionCode::is_exception(function_byte) {
            return Ok(Self::Exception(ExceptionResponse::decode(function_byte, r)?));
        }

        match FunctionCode::from_u8(function_byte)? {
            FunctionCode::ReadCoils => Ok(Self::ReadCoils(ReadBitsResponse {
                packed: r.read_counted()?,
            })),
            FunctionCode::ReadDiscreteInputs => Ok(Self::ReadDiscreteInputs(ReadBitsResponse {
                packed: r.read_counted()?,
            })),
            FunctionCode::ReadHoldingRegisters => Ok(Self::ReadHoldingRegisters(
                ReadRegistersResponse::decode_body(r)?,
            )),
            FunctionCode::WriteSingleCoil => {
                let (address, value) = decode_single_coil_echo(r)?;
                Ok(Self::WriteSingleCoil(WriteSingleCoilResponse { address, value }))
            }
            FunctionCode::WriteSingleRegister => {
                Ok(Self::WriteSingleRegister(WriteSingleRegisterResponse {
                    address: r.read_be_u16()?,
                    value: r.read_be_u16()?,
                }))
            }
            FunctionCode::WriteMultipleRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                if quantity == 0 || quantity > MAX_WRITE_REGISTERS {
                    return Err(DecodeError::InvalidValue);
                }
                Ok(Self::WriteMultipleRegisters(WriteMultipleRegistersResponse {
                    start_address,
                    quantity,
                }))
            }
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadCoils(resp) | Self::ReadDiscreteInputs(resp) => {
                let count = u8::try_from(resp.packed.len())
                    .map_err(|_| EncodeError::ValueOutOfRange)?;
                if count == 0 {
                    return Err(EncodeError::InvalidLength);
                }
                w.write_u8(self.function_byte())?;
                w.write_u8(count)?;
                w.write_all(resp.packed)
            }
            Self::ReadHoldingRegisters(resp) => {
                if resp.data.is_empty() || resp.data.len() % 2 != 0 {
                    return Err(EncodeError::InvalidLength);
                }
                ReadRegistersResponse::encode_values(
                    w,
                    resp.register_count(),
                    (0..resp.register_count()).filter_map(|i| resp.register(i)),
                )
            }
            Self::WriteSingleCoil(resp) => {
                w.write_u8(FunctionCode::WriteSingleCoil.as_u8())?;
                encode_single_coil_echo(w, resp.address, resp.value)
            }
            Self::WriteSingleRegister(resp) => {
                w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
                w.write_be_u16(resp.address)?;
                w.write_be_u16(resp.value)
            }
            Self::WriteMultipleRegisters(resp) => {
                if resp.quantity == 0 || resp.quantity > MAX_WRITE_REGISTERS {
                    return Err(EncodeError::ValueOutOfRange);
                }
                w.write_u8(FunctionCode::WriteMultipleRegisters.as_u8())?;
                w.write_be_u16(resp.start_address)?;
                w.write_be_u16(resp.quantity)
            }
            Self::Exception(resp) => resp.encode(w),
        }
    }

    /// Raw function byte the response answers; exceptions report the code they reject.
    pub fn function_byte(&self) -> u8 {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils.as_u8(),
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs.as_u8(),
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters.as_u8(),
            Self::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil.as_u8(),
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister.as_u8(),
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters.as_u8(),
            Self::Exception(ex) => ex.function_code,
        }
    }
}
