//! Supervisory layer for a single PLC: named tags polled in batches, alarms
//! derived from them, and validated operator commands.
//!
//! Everything funnels through one [`ModbusSession`](plclink_client::ModbusSession).
//! Tag values and connection state are published as whole snapshots, so a
//! reader never observes a half-finished poll cycle.

#![forbid(unsafe_code)]

pub mod alarm;
pub mod command;
pub mod config;
pub mod poll;
pub mod supervisor;
pub mod tags;
pub mod value;

pub use alarm::{
    AlarmCondition, AlarmDefinition, AlarmEngine, AlarmError, AlarmHistoryEntry, AlarmInstance,
    AlarmState, Severity, TransitionKind, DEFAULT_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY,
};
pub use command::{CommandError, CommandPort, CommandValue};
pub use config::{
    AlarmConfig, ConfigError, ModbusConfig, PollingConfig, SupervisorConfig, TagConfig,
};
pub use poll::{CycleReport, PollingEngine};
pub use supervisor::Supervisor;
pub use tags::{plan_reads, DataType, ReadBatch, Tag, TagRegistry};
pub use value::{RawValue, ScaledValue, TagSnapshot, TagValue};
