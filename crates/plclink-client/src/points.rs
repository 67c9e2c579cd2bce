use plclink_core::pdu::{FunctionCode, MAX_READ_BITS, MAX_READ_REGISTERS};
use std::fmt;

/// The three Modbus tables a supervisory client touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PointKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
}

impl PointKind {
    pub const ALL: [PointKind; 3] = [Self::Coil, Self::DiscreteInput, Self::HoldingRegister];

    pub const fn read_function(self) -> FunctionCode {
        match self {
            Self::Coil => FunctionCode::ReadCoils,
            Self::DiscreteInput => FunctionCode::ReadDiscreteInputs,
            Self::HoldingRegister => FunctionCode::ReadHoldingRegisters,
        }
    }

    /// Largest block a single read of this kind may cover.
    pub const fn max_read(self) -> u16 {
        match self {
            Self::Coil | Self::DiscreteInput => MAX_READ_BITS,
            Self::HoldingRegister => MAX_READ_REGISTERS,
        }
    }

    pub const fn is_bit(self) -> bool {
        !matches!(self, Self::HoldingRegister)
    }

    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::DiscreteInput)
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete input",
            Self::HoldingRegister => "holding register",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBlock {
    start_address: u16,
    values: Vec<bool>,
}

impl BitBlock {
    pub fn new(start_address: u16, values: Vec<bool>) -> Self {
        Self {
            start_address,
            values,
        }
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }

    pub fn get(&self, address: u16) -> Option<bool> {
        let offset = usize::from(address.checked_sub(self.start_address)?);
        self.values.get(offset).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    start_address: u16,
    values: Vec<u16>,
}

impl RegisterBlock {
    pub fn new(start_address: u16, values: Vec<u16>) -> Self {
        Self {
            start_address,
            values,
        }
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u16] {
        &self.values
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        let offset = usize::from(address.checked_sub(self.start_address)?);
        self.values.get(offset).copied()
    }

    /// Two consecutive registers, the first one holding the high word.
    pub fn get_u32(&self, address: u16) -> Option<u32> {
        let high = self.get(address)?;
        let low = self.get(address.checked_add(1)?)?;
        Some((u32::from(high) << 16) | u32::from(low))
    }
}

/// Result of one batched read, addressed by absolute Modbus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointBlock {
    Bits(BitBlock),
    Registers(RegisterBlock),
}

impl PointBlock {
    pub fn start_address(&self) -> u16 {
        match self {
            Self::Bits(block) => block.start_address(),
            Self::Registers(block) => block.start_address(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bits(block) => block.len(),
            Self::Registers(block) => block.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bit(&self, address: u16) -> Option<bool> {
        match self {
            Self::Bits(block) => block.get(address),
            Self::Registers(_) => None,
        }
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        match self {
            Self::Registers(block) => block.get(address),
            Self::Bits(_) => None,
        }
    }

    pub fn register_pair(&self, address: u16) -> Option<u32> {
        match self {
            Self::Registers(block) => block.get_u32(address),
            Self::Bits(_) => None,
        }
    }
}
