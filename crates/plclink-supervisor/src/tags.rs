use crate::config::{ConfigError, TagConfig};
use plclink_client::PointKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::warn;

/// How the raw wire value of a tag is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "int16")]
    Int16,
    /// IEEE-754 single spread over two registers, high word first.
    #[serde(rename = "float32")]
    Float32,
}

impl DataType {
    /// Points covered on the wire.
    pub const fn width(self) -> u16 {
        match self {
            Self::Float32 => 2,
            _ => 1,
        }
    }

    pub const fn default_for(kind: PointKind) -> Self {
        if kind.is_bit() {
            Self::Bool
        } else {
            Self::UInt16
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::Float32 => "float32",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub name: String,
    pub kind: PointKind,
    pub address: u16,
    pub data_type: DataType,
    pub scale: f64,
    pub unit: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, kind: PointKind, address: u16, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            kind,
            address,
            data_type,
            scale: 1.0,
            unit: String::new(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn width(&self) -> u16 {
        self.data_type.width()
    }

    /// Address range on the wire, end exclusive.
    pub fn span(&self) -> Range<u32> {
        let start = u32::from(self.address);
        start..start + u32::from(self.width())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTag {
            tag: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("tag name is empty"));
        }
        if self.kind.is_bit() != (self.data_type == DataType::Bool) {
            return Err(invalid(&format!(
                "data type {} does not fit a {}",
                self.data_type, self.kind
            )));
        }
        if self.span().end > 0x1_0000 {
            return Err(invalid("address range runs past 65535"));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(invalid("scale must be finite and non-zero"));
        }
        Ok(())
    }
}

/// One read request covering a contiguous run of tags of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBatch {
    pub kind: PointKind,
    pub start: u16,
    pub count: u16,
    /// Indices into [`TagRegistry::tags`].
    pub tags: Vec<usize>,
}

impl ReadBatch {
    fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }
}

/// Groups tags by kind and coalesces adjacent or overlapping spans.
///
/// A batch never covers more than `limit(kind)` points. Gaps between tags are
/// never read.
pub fn plan_reads(tags: &[Arc<Tag>], limit: impl Fn(PointKind) -> u16) -> Vec<ReadBatch> {
    let mut batches = Vec::new();
    for kind in PointKind::ALL {
        let mut spans: Vec<(Range<u32>, usize)> = tags
            .iter()
            .enumerate()
            .filter(|(_, tag)| tag.kind == kind)
            .map(|(index, tag)| (tag.span(), index))
            .collect();
        spans.sort_by_key(|(span, index)| (span.start, span.end, *index));

        let max = u32::from(limit(kind).max(1));
        let mut current: Option<ReadBatch> = None;
        for (span, index) in spans {
            match current.as_mut() {
                Some(batch)
                    if span.start <= batch.end()
                        && span.end.max(batch.end()) - u32::from(batch.start) <= max =>
                {
                    let end = span.end.max(batch.end());
                    batch.count = (end - u32::from(batch.start)) as u16;
                    batch.tags.push(index);
                }
                _ => {
                    batches.extend(current.take());
                    current = Some(ReadBatch {
                        kind,
                        start: span.start as u16,
                        count: (span.end - span.start) as u16,
                        tags: vec![index],
                    });
                }
            }
        }
        batches.extend(current);
    }
    batches
}

/// Validated, immutable tag set with its precomputed read plan.
#[derive(Debug)]
pub struct TagRegistry {
    tags: Vec<Arc<Tag>>,
    index: HashMap<String, usize>,
    batches: Vec<ReadBatch>,
}

impl TagRegistry {
    pub fn new(tags: impl IntoIterator<Item = Tag>) -> Result<Self, ConfigError> {
        let mut registry = Self {
            tags: Vec::new(),
            index: HashMap::new(),
            batches: Vec::new(),
        };
        for tag in tags {
            tag.validate()?;
            if registry.index.contains_key(&tag.name) {
                return Err(ConfigError::DuplicateTag(tag.name));
            }
            if let Some(other) = registry
                .tags
                .iter()
                .find(|other| other.kind == tag.kind && overlaps(&other.span(), &tag.span()))
            {
                warn!(tag = %tag.name, other = %other.name, kind = %tag.kind, "tags alias the same address");
            }
            registry.index.insert(tag.name.clone(), registry.tags.len());
            registry.tags.push(Arc::new(tag));
        }
        registry.batches = plan_reads(&registry.tags, PointKind::max_read);
        Ok(registry)
    }

    /// Tags come out ordered by name.
    pub fn from_config(tags: &BTreeMap<String, TagConfig>) -> Result<Self, ConfigError> {
        Self::new(tags.iter().map(|(name, config)| config.to_tag(name)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tag>> {
        self.index.get(name).map(|&i| &self.tags[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Tags in the order they were handed to [`TagRegistry::new`].
    pub fn tags(&self) -> &[Arc<Tag>] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn batches(&self) -> &[ReadBatch] {
        &self.batches
    }
}

fn overlaps(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

#[cfg(test)]
mod tests {
    use super::{plan_reads, DataType, Tag, TagRegistry};
    use crate::config::ConfigError;
    use plclink_client::PointKind;
    use std::sync::Arc;

    fn hr(name: &str, address: u16) -> Tag {
        Tag::new(name, PointKind::HoldingRegister, address, DataType::UInt16)
    }

    fn coil(name: &str, address: u16) -> Tag {
        Tag::new(name, PointKind::Coil, address, DataType::Bool)
    }

    #[test]
    fn adjacent_tags_share_one_read() {
        let registry = TagRegistry::new([
            hr("pressure", 101),
            hr("temperature", 100),
            Tag::new("flow", PointKind::HoldingRegister, 102, DataType::Float32),
            coil("motor", 0),
        ])
        .unwrap();

        let batches = registry.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].kind, PointKind::Coil);
        assert_eq!((batches[0].start, batches[0].count), (0, 1));
        assert_eq!(batches[1].kind, PointKind::HoldingRegister);
        assert_eq!((batches[1].start, batches[1].count), (100, 4));
        assert_eq!(batches[1].tags, vec![1, 0, 2]);
    }

    #[test]
    fn gaps_split_batches() {
        let registry = TagRegistry::new([hr("a", 10), hr("b", 12), coil("c", 3)]).unwrap();
        let spans: Vec<_> = registry
            .batches()
            .iter()
            .map(|b| (b.kind, b.start, b.count))
            .collect();
        assert_eq!(
            spans,
            vec![
                (PointKind::Coil, 3, 1),
                (PointKind::HoldingRegister, 10, 1),
                (PointKind::HoldingRegister, 12, 1)
            ]
        );
    }

    #[test]
    fn batches_respect_the_request_limit() {
        let tags: Vec<_> = (0..10).map(|i| Arc::new(hr(&format!("r{i}"), i))).collect();
        let batches = plan_reads(&tags, |_| 4);
        let spans: Vec<_> = batches.iter().map(|b| (b.start, b.count)).collect();
        assert_eq!(spans, vec![(0, 4), (4, 4), (8, 2)]);
        assert!(batches.iter().all(|b| b.tags.len() == usize::from(b.count)));
    }

    #[test]
    fn aliased_tags_are_read_once() {
        let registry = TagRegistry::new([
            hr("raw", 5),
            Tag::new("signed", PointKind::HoldingRegister, 5, DataType::Int16),
        ])
        .unwrap();
        assert_eq!(registry.batches().len(), 1);
        assert_eq!(registry.batches()[0].count, 1);
        assert_eq!(registry.batches()[0].tags.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = TagRegistry::new([hr("a", 1), coil("a", 1)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTag(name) if name == "a"));
    }

    #[test]
    fn malformed_tags_are_rejected() {
        let bool_register = Tag::new("x", PointKind::HoldingRegister, 0, DataType::Bool);
        assert!(matches!(
            TagRegistry::new([bool_register]).unwrap_err(),
            ConfigError::InvalidTag { .. }
        ));

        let numeric_coil = Tag::new("x", PointKind::Coil, 0, DataType::UInt16);
        assert!(TagRegistry::new([numeric_coil]).is_err());

        let float_at_top = Tag::new("x", PointKind::HoldingRegister, 0xFFFF, DataType::Float32);
        assert!(TagRegistry::new([float_at_top]).is_err());

        assert!(TagRegistry::new([hr("x", 0).with_scale(0.0)]).is_err());
        assert!(TagRegistry::new([hr("x", 0).with_scale(f64::NAN)]).is_err());
        assert!(TagRegistry::new([hr(" ", 0)]).is_err());
    }

    #[test]
    fn lookup_by_name() {
        let registry = TagRegistry::new([hr("temperature", 100).with_unit("°C")]).unwrap();
        assert_eq!(registry.get("temperature").unwrap().unit, "°C");
        assert_eq!(registry.index_of("temperature"), Some(0));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }
}
