use crate::tags::{DataType, Tag, TagRegistry};
use plclink_client::{ModbusSession, PointKind, SessionError};
use plclink_datalink::Connector;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Operator-supplied value, in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandValue {
    Bool(bool),
    Number(f64),
}

impl From<bool> for CommandValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CommandValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for CommandValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid tag {tag}: {reason}")]
    InvalidTag { tag: String, reason: &'static str },
    #[error("value {value} out of range for tag {tag}")]
    ValueOutOfRange { tag: String, value: CommandValue },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Wire form of a validated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    Coil(u16, bool),
    Register(u16, u16),
    /// High word first.
    RegisterPair(u16, [u16; 2]),
}

/// Converts an engineering value into its wire form without any I/O.
pub fn plan_write(tag: &Tag, value: CommandValue) -> Result<WritePlan, CommandError> {
    let out_of_range = || CommandError::ValueOutOfRange {
        tag: tag.name.clone(),
        value,
    };
    match tag.kind {
        PointKind::DiscreteInput => {
            return Err(CommandError::InvalidTag {
                tag: tag.name.clone(),
                reason: "discrete inputs are read-only",
            })
        }
        PointKind::Coil => {
            let bit = match value {
                CommandValue::Bool(b) => b,
                CommandValue::Number(n) if n == 0.0 => false,
                CommandValue::Number(n) if n == 1.0 => true,
                CommandValue::Number(_) => return Err(out_of_range()),
            };
            return Ok(WritePlan::Coil(tag.address, bit));
        }
        PointKind::HoldingRegister => {}
    }

    let CommandValue::Number(engineering) = value else {
        return Err(out_of_range());
    };
    let raw = engineering / tag.scale;
    if !raw.is_finite() {
        return Err(out_of_range());
    }
    match tag.data_type {
        DataType::UInt16 => {
            let raw = raw.round();
            if !(0.0..=f64::from(u16::MAX)).contains(&raw) {
                return Err(out_of_range());
            }
            Ok(WritePlan::Register(tag.address, raw as u16))
        }
        DataType::Int16 => {
            let raw = raw.round();
            if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&raw) {
                return Err(out_of_range());
            }
            Ok(WritePlan::Register(tag.address, raw as i16 as u16))
        }
        DataType::Float32 => {
            let single = raw as f32;
            if !single.is_finite() {
                return Err(out_of_range());
            }
            let bits = single.to_bits();
            Ok(WritePlan::RegisterPair(
                tag.address,
                [(bits >> 16) as u16, bits as u16],
            ))
        }
        DataType::Bool => Err(CommandError::InvalidTag {
            tag: tag.name.clone(),
            reason: "boolean register tags cannot be written",
        }),
    }
}

/// Validated write path for operator commands.
///
/// Writes share the session's FIFO lock with poll batches; nothing jumps the
/// queue.
pub struct CommandPort<C: Connector> {
    session: ModbusSession<C>,
    registry: Arc<TagRegistry>,
}

impl<C: Connector> Clone for CommandPort<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<C: Connector> CommandPort<C> {
    pub fn new(session: ModbusSession<C>, registry: Arc<TagRegistry>) -> Self {
        Self { session, registry }
    }

    fn tag(&self, name: &str) -> Result<&Arc<Tag>, CommandError> {
        self.registry
            .get(name)
            .ok_or_else(|| CommandError::InvalidTag {
                tag: name.to_string(),
                reason: "no such tag",
            })
    }

    pub async fn write(
        &self,
        name: &str,
        value: impl Into<CommandValue>,
    ) -> Result<(), CommandError> {
        let value = value.into();
        let tag = self.tag(name)?;
        let plan = plan_write(tag, value)?;
        match plan {
            WritePlan::Coil(address, bit) => self.session.write_coil(address, bit).await?,
            WritePlan::Register(address, word) => {
                self.session.write_register(address, word).await?
            }
            WritePlan::RegisterPair(address, words) => {
                self.session.write_registers(address, &words).await?
            }
        }
        info!(tag = %name, %value, "command written");
        Ok(())
    }

    /// Reads a coil tag and writes back its inverse. Returns the new state.
    pub async fn toggle(&self, name: &str) -> Result<bool, CommandError> {
        let tag = self.tag(name)?;
        if tag.kind != PointKind::Coil {
            return Err(CommandError::InvalidTag {
                tag: name.to_string(),
                reason: "only coils can be toggled",
            });
        }
        let current = self
            .session
            .read_coils(tag.address, 1)
            .await?
            .first()
            .copied()
            .unwrap_or(false);
        self.session.write_coil(tag.address, !current).await?;
        info!(tag = %name, value = !current, "coil toggled");
        Ok(!current)
    }
}
