use crate::tags::{DataType, Tag};
use chrono::{DateTime, Utc};
use plclink_client::PointBlock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Value exactly as it came off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawValue {
    Bit(bool),
    Word(u16),
    /// Two registers, high word first.
    DoubleWord(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScaledValue {
    Bool(bool),
    Number(f64),
}

impl ScaledValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            Self::Number(_) => None,
        }
    }

    /// Booleans read as 0.0 and 1.0.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(b)),
            Self::Number(n) => n,
        }
    }
}

impl fmt::Display for ScaledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Pulls the tag's raw value out of a batch read.
pub fn decode(tag: &Tag, block: &PointBlock) -> Option<RawValue> {
    match tag.data_type {
        DataType::Bool => block.bit(tag.address).map(RawValue::Bit),
        DataType::UInt16 | DataType::Int16 => block.register(tag.address).map(RawValue::Word),
        DataType::Float32 => block.register_pair(tag.address).map(RawValue::DoubleWord),
    }
}

/// Applies the tag's data type and scale. Booleans pass through unscaled.
pub fn scale(tag: &Tag, raw: RawValue) -> ScaledValue {
    match (tag.data_type, raw) {
        (_, RawValue::Bit(b)) => ScaledValue::Bool(b),
        (DataType::Int16, RawValue::Word(w)) => {
            ScaledValue::Number(f64::from(w as i16) * tag.scale)
        }
        (_, RawValue::Word(w)) => ScaledValue::Number(f64::from(w) * tag.scale),
        (_, RawValue::DoubleWord(bits)) => {
            ScaledValue::Number(f64::from(f32::from_bits(bits)) * tag.scale)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagValue {
    pub tag: Arc<Tag>,
    pub raw: Option<RawValue>,
    pub scaled: Option<ScaledValue>,
    /// Time of the last successful read. `None` until the tag was polled once.
    pub timestamp: Option<DateTime<Utc>>,
    pub valid: bool,
}

impl TagValue {
    pub fn never_polled(tag: Arc<Tag>) -> Self {
        Self {
            tag,
            raw: None,
            scaled: None,
            timestamp: None,
            valid: false,
        }
    }

    pub fn good(tag: Arc<Tag>, raw: RawValue, at: DateTime<Utc>) -> Self {
        let scaled = scale(&tag, raw);
        Self {
            tag,
            raw: Some(raw),
            scaled: Some(scaled),
            timestamp: Some(at),
            valid: true,
        }
    }

    /// Keeps the last good value and timestamp but marks them stale.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_stale(&self) -> bool {
        !self.valid && self.timestamp.is_some()
    }

    pub fn is_never_polled(&self) -> bool {
        self.timestamp.is_none()
    }

    /// The scaled value, only while it is current.
    pub fn current(&self) -> Option<ScaledValue> {
        if self.valid {
            self.scaled
        } else {
            None
        }
    }
}

/// Every tag's value as of one completed poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSnapshot {
    cycle: u64,
    taken_at: Option<DateTime<Utc>>,
    values: Vec<TagValue>,
    #[serde(skip)]
    index: Arc<HashMap<String, usize>>,
}

impl TagSnapshot {
    /// Snapshot before the first cycle: every tag never polled.
    pub fn empty(tags: &[Arc<Tag>]) -> Self {
        let values: Vec<_> = tags
            .iter()
            .map(|tag| TagValue::never_polled(Arc::clone(tag)))
            .collect();
        let index = values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.tag.name.clone(), i))
            .collect();
        Self {
            cycle: 0,
            taken_at: None,
            values,
            index: Arc::new(index),
        }
    }

    /// Successor snapshot sharing this one's name index.
    pub fn next(&self, values: Vec<TagValue>, taken_at: DateTime<Utc>) -> Self {
        Self {
            cycle: self.cycle + 1,
            taken_at: Some(taken_at),
            values,
            index: Arc::clone(&self.index),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.index.get(name).and_then(|&i| self.values.get(i))
    }

    pub fn values(&self) -> &[TagValue] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
