//! In-memory PLC used by the `plcsim` tool and by integration tests.

use crate::{ModbusService, ServiceError};
use plclink_core::encoding::Writer;
use plclink_core::pdu::{
    DecodedRequest, ExceptionCode, FunctionCode, ReadBitsResponse, ReadRegistersResponse,
    Response, WriteMultipleRegistersResponse, WriteSingleCoilResponse,
    WriteSingleRegisterResponse,
};
use plclink_core::EncodeError;
use std::ops::Range;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBank {
    values: Vec<bool>,
}

impl BitBank {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![false; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: bool) -> Result<(), ServiceError> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?;
        *slot = value;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    values: Vec<u16>,
}

impl RegisterBank {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![0u16; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u16) -> Result<(), ServiceError> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?;
        *slot = value;
        Ok(())
    }
}

/// Process image of the simulated PLC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlcImage {
    pub coils: BitBank,
    pub discrete_inputs: BitBank,
    pub holding_registers: RegisterBank,
}

impl PlcImage {
    pub fn new(coil_count: usize, discrete_input_count: usize, holding_register_count: usize) -> Self {
        Self {
            coils: BitBank::new(coil_count),
            discrete_inputs: BitBank::new(discrete_input_count),
            holding_registers: RegisterBank::new(holding_register_count),
        }
    }
}

#[derive(Debug)]
pub struct SimulatedPlc {
    image: RwLock<PlcImage>,
}

impl SimulatedPlc {
    pub fn new(coil_count: usize, discrete_input_count: usize, holding_register_count: usize) -> Self {
        Self::with_image(PlcImage::new(
            coil_count,
            discrete_input_count,
            holding_register_count,
        ))
    }

    pub fn with_image(image: PlcImage) -> Self {
        Self {
            image: RwLock::new(image),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PlcImage> {
        self.image.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PlcImage> {
        self.image.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PlcImage {
        self.read().clone()
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), ServiceError> {
        self.write().coils.set(usize::from(address), value)
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), ServiceError> {
        self.write().discrete_inputs.set(usize::from(address), value)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), ServiceError> {
        self.write()
            .holding_registers
            .set(usize::from(address), value)
    }

    /// Stores an IEEE-754 float across two registers, high word first.
    pub fn set_holding_f32(&self, address: u16, value: f32) -> Result<(), ServiceError> {
        let bits = value.to_bits();
        let mut image = self.write();
        let start = usize::from(address);
        if image.holding_registers.get(start + 1).is_none() {
            return Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress));
        }
        image.holding_registers.set(start, (bits >> 16) as u16)?;
        image.holding_registers.set(start + 1, bits as u16)
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.read().coils.get(usize::from(address))
    }

    pub fn discrete_input(&self, address: u16) -> Option<bool> {
        self.read().discrete_inputs.get(usize::from(address))
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.read().holding_registers.get(usize::from(address))
    }
}

impl ModbusService for SimulatedPlc {
    fn handle(
        &self,
        unit_id: u8,
        request: DecodedRequest<'_>,
        response_pdu: &mut [u8],
    ) -> Result<usize, ServiceError> {
        trace!(unit_id, function = request.function_code().as_u8(), "simulated plc request");
        let mut w = Writer::new(response_pdu);

        match request {
            DecodedRequest::Read(req) => {
                let image = self.read();
                match req.function {
                    FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                        let bank = if req.function == FunctionCode::ReadCoils {
                            &image.coils
                        } else {
                            &image.discrete_inputs
                        };
                        let range = checked_range(req.start_address, req.quantity, bank.len())?;
                        let count = range.len();
                        ReadBitsResponse::encode_values(
                            &mut w,
                            req.function,
                            count,
                            range.map(|address| bank.get(address).unwrap_or(false)),
                        )
                        .map_err(map_encode)?;
                    }
                    _ => {
                        let bank = &image.holding_registers;
                        let range = checked_range(req.start_address, req.quantity, bank.len())?;
                        let count = range.len();
                        ReadRegistersResponse::encode_values(
                            &mut w,
                            count,
                            range.map(|address| bank.get(address).unwrap_or(0)),
                        )
                        .map_err(map_encode)?;
                    }
                }
            }
            DecodedRequest::WriteSingleCoil(req) => {
                self.write().coils.set(usize::from(req.address), req.value)?;
                Response::WriteSingleCoil(WriteSingleCoilResponse {
                    address: req.address,
                    value: req.value,
                })
                .encode(&mut w)
                .map_err(map_encode)?;
            }
            DecodedRequest::WriteSingleRegister(req) => {
                self.write()
                    .holding_registers
                    .set(usize::from(req.address), req.value)?;
                Response::WriteSingleRegister(WriteSingleRegisterResponse {
                    address: req.address,
                    value: req.value,
                })
                .encode(&mut w)
                .map_err(map_encode)?;
            }
            DecodedRequest::WriteMultipleRegisters(req) => {
                let mut image = self.write();
                let range = checked_range(
                    req.start_address,
                    req.quantity,
                    image.holding_registers.len(),
                )?;
                for (i, address) in range.enumerate() {
                    let value = req
                        .register(i)
                        .ok_or(ServiceError::InvalidRequest("invalid register payload"))?;
                    image.holding_registers.set(address, value)?;
                }
                Response::WriteMultipleRegisters(WriteMultipleRegistersResponse {
                    start_address: req.start_address,
                    quantity: req.quantity,
                })
                .encode(&mut w)
                .map_err(map_encode)?;
            }
        }

        Ok(w.position())
    }
}

fn checked_range(start: u16, quantity: u16, len: usize) -> Result<Range<usize>, ServiceError> {
    let start = usize::from(start);
    let end = start + usize::from(quantity);
    if quantity == 0 || end > len {
        return Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress));
    }
    Ok(start..end)
}

fn map_encode(err: EncodeError) -> ServiceError {
    let msg = match err {
        EncodeError::BufferTooSmall => "response buffer too small",
        EncodeError::ValueOutOfRange => "response value out of range",
        EncodeError::InvalidLength => "response length invalid",
    };
    ServiceError::Internal(msg)
}
