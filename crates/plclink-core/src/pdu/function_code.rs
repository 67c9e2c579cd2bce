use crate::DecodeError;

/// Function codes spoken by the supervisory client and the bundled simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    /// Anything outside the supported set, including exception-flagged
    /// bytes, is reported as [`DecodeError::InvalidFunctionCode`].
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x10 => Ok(Self::WriteMultipleRegisters),
            _ => Err(DecodeError::InvalidFunctionCode),
        }
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & 0x80) != 0
    }

    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadDiscreteInputs | Self::ReadHoldingRegisters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionCode;
    use crate::DecodeError;

    #[test]
    fn parses_supported_codes() {
        for code in [
            FunctionCode::ReadCoils,
            FunctionCode::ReadDiscreteInputs,
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::WriteSingleCoil,
            FunctionCode::WriteSingleRegister,
            FunctionCode::WriteMultipleRegisters,
        ] {
            assert_eq!(FunctionCode::from_u8(code.as_u8()).unwrap(), code);
        }
    }

    #[test]
    fn rejects_unsupported_and_exception_codes() {
        assert_eq!(
            FunctionCode::from_u8(0x04).unwrap_err(),
            DecodeError::InvalidFunctionCode
        );
        assert_eq!(
            FunctionCode::from_u8(0x83).unwrap_err(),
            DecodeError::InvalidFunctionCode
        );
    }

    #[test]
    fn classifies_reads() {
        assert!(FunctionCode::ReadDiscreteInputs.is_read());
        assert!(!FunctionCode::WriteSingleCoil.is_read());
        assert!(FunctionCode::is_exception(0x81));
        assert!(!FunctionCode::is_exception(0x01));
    }
}
