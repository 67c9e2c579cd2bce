//! Alarm lifecycle derived from polled tag values.
//!
//! ```text
//! Inactive --condition--> Active --acknowledge--> Acknowledged
//!    ^                      |                          |
//!    +------- cleared ------+------ condition false ---+
//! ```
//!
//! Every transition lands in a bounded history ring and is broadcast to
//! subscribers.

use crate::tags::Tag;
use crate::value::{ScaledValue, TagSnapshot, TagValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Upper bound on retained history entries; larger requests are clamped.
pub const MAX_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_HISTORY_CAPACITY: usize = MAX_HISTORY_CAPACITY;
const EVENT_CAPACITY: usize = 256;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

/// When the source tag counts as "in alarm".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCondition {
    #[default]
    IsTrue,
    IsFalse,
    /// Scaled value strictly above the limit.
    Above(f64),
    /// Scaled value strictly below the limit.
    Below(f64),
}

impl AlarmCondition {
    pub fn holds(&self, value: ScaledValue) -> bool {
        let v = value.as_f64();
        match *self {
            Self::IsTrue => v != 0.0,
            Self::IsFalse => v == 0.0,
            Self::Above(limit) => v > limit,
            Self::Below(limit) => v < limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmDefinition {
    pub id: String,
    pub source: Arc<Tag>,
    pub description: String,
    pub severity: Severity,
    pub condition: AlarmCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Inactive,
    Active,
    Acknowledged,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Activated,
    Acknowledged,
    Cleared,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Activated => "activated",
            Self::Acknowledged => "acknowledged",
            Self::Cleared => "cleared",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmInstance {
    pub definition: Arc<AlarmDefinition>,
    pub state: AlarmState,
    pub activated_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
    /// Condition at the last evaluation that had a valid source value.
    pub condition: Option<bool>,
}

impl AlarmInstance {
    fn new(definition: AlarmDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            state: AlarmState::Inactive,
            activated_at: None,
            acknowledged_at: None,
            cleared_at: None,
            condition: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn is_raised(&self) -> bool {
        self.state != AlarmState::Inactive
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmHistoryEntry {
    pub alarm_id: String,
    pub transition: TransitionKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlarmError {
    #[error("unknown alarm {0}")]
    UnknownAlarm(String),
}

struct AlarmBook {
    instances: Vec<AlarmInstance>,
    history: VecDeque<AlarmHistoryEntry>,
    capacity: usize,
}

impl AlarmBook {
    fn position(&self, id: &str) -> Result<usize, AlarmError> {
        self.instances
            .iter()
            .position(|instance| instance.id() == id)
            .ok_or_else(|| AlarmError::UnknownAlarm(id.to_string()))
    }

    fn record(
        &mut self,
        index: usize,
        transition: TransitionKind,
        at: DateTime<Utc>,
    ) -> AlarmHistoryEntry {
        let instance = &self.instances[index];
        info!(
            alarm = %instance.id(),
            severity = %instance.definition.severity,
            %transition,
            "alarm transition"
        );
        let entry = AlarmHistoryEntry {
            alarm_id: instance.id().to_string(),
            transition,
            timestamp: at,
        };
        self.history.push_back(entry.clone());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        entry
    }

    fn observe(
        &mut self,
        index: usize,
        condition: bool,
        at: DateTime<Utc>,
    ) -> Option<AlarmHistoryEntry> {
        let instance = &mut self.instances[index];
        instance.condition = Some(condition);
        let transition = match (instance.state, condition) {
            (AlarmState::Inactive, true) => {
                instance.state = AlarmState::Active;
                instance.activated_at = Some(at);
                instance.acknowledged_at = None;
                instance.cleared_at = None;
                TransitionKind::Activated
            }
            (AlarmState::Active | AlarmState::Acknowledged, false) => {
                instance.state = AlarmState::Inactive;
                instance.cleared_at = Some(at);
                TransitionKind::Cleared
            }
            _ => return None,
        };
        Some(self.record(index, transition, at))
    }

    fn acknowledge(&mut self, index: usize, at: DateTime<Utc>) -> Option<AlarmHistoryEntry> {
        let instance = &mut self.instances[index];
        if instance.state != AlarmState::Active {
            return None;
        }
        instance.state = AlarmState::Acknowledged;
        instance.acknowledged_at = Some(at);
        Some(self.record(index, TransitionKind::Acknowledged, at))
    }
}

/// Owns every alarm instance. Shared by reference; all methods take `&self`.
pub struct AlarmEngine {
    book: Mutex<AlarmBook>,
    events: broadcast::Sender<AlarmHistoryEntry>,
}

impl AlarmEngine {
    /// `capacity` is clamped to `1..=MAX_HISTORY_CAPACITY`.
    pub fn new(definitions: impl IntoIterator<Item = AlarmDefinition>, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HISTORY_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            book: Mutex::new(AlarmBook {
                instances: definitions.into_iter().map(AlarmInstance::new).collect(),
                history: VecDeque::with_capacity(capacity),
                capacity,
            }),
            events,
        }
    }

    fn book(&self) -> MutexGuard<'_, AlarmBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, entries: &[AlarmHistoryEntry]) {
        for entry in entries {
            let _ = self.events.send(entry.clone());
        }
    }

    /// Feeds one snapshot through every alarm in declaration order.
    ///
    /// Alarms whose source is invalid or was never polled keep their state.
    pub fn evaluate(&self, snapshot: &TagSnapshot) -> Vec<AlarmHistoryEntry> {
        let at = snapshot.taken_at().unwrap_or_else(Utc::now);
        let mut entries = Vec::new();
        {
            let mut book = self.book();
            for index in 0..book.instances.len() {
                let definition = Arc::clone(&book.instances[index].definition);
                let Some(value) = snapshot
                    .get(&definition.source.name)
                    .and_then(TagValue::current)
                else {
                    continue;
                };
                let condition = definition.condition.holds(value);
                entries.extend(book.observe(index, condition, at));
            }
        }
        debug!(cycle = snapshot.cycle(), transitions = entries.len(), "alarms evaluated");
        self.publish(&entries);
        entries
    }

    /// Applies a condition to one alarm directly, bypassing tag lookup.
    pub fn observe(
        &self,
        id: &str,
        condition: bool,
    ) -> Result<Option<AlarmHistoryEntry>, AlarmError> {
        let entry = {
            let mut book = self.book();
            let index = book.position(id)?;
            book.observe(index, condition, Utc::now())
        };
        self.publish(entry.as_slice());
        Ok(entry)
    }

    /// Moves an `Active` alarm to `Acknowledged`. Any other state is left
    /// alone and `Ok(false)` is returned.
    pub fn acknowledge(&self, id: &str) -> Result<bool, AlarmError> {
        let entry = {
            let mut book = self.book();
            let index = book.position(id)?;
            book.acknowledge(index, Utc::now())
        };
        self.publish(entry.as_slice());
        Ok(entry.is_some())
    }

    pub fn acknowledge_all(&self) -> usize {
        let at = Utc::now();
        let entries: Vec<_> = {
            let mut book = self.book();
            (0..book.instances.len())
                .filter_map(|index| book.acknowledge(index, at))
                .collect()
        };
        self.publish(&entries);
        entries.len()
    }

    /// Returns acknowledged alarms whose condition is no longer true to
    /// `Inactive`. Alarms still in alarm stay acknowledged.
    ///
    /// Evaluation already clears an acknowledged alarm the moment its
    /// condition goes false, so through `observe`/`evaluate` alone every
    /// acknowledged alarm is still in alarm and this returns 0.
    pub fn reset(&self) -> usize {
        let at = Utc::now();
        let entries: Vec<_> = {
            let mut book = self.book();
            let mut entries = Vec::new();
            for index in 0..book.instances.len() {
                let instance = &mut book.instances[index];
                if instance.state != AlarmState::Acknowledged || instance.condition == Some(true) {
                    continue;
                }
                instance.state = AlarmState::Inactive;
                instance.cleared_at = Some(at);
                entries.push(book.record(index, TransitionKind::Cleared, at));
            }
            entries
        };
        self.publish(&entries);
        entries.len()
    }

    pub fn instances(&self) -> Vec<AlarmInstance> {
        self.book().instances.clone()
    }

    pub fn instance(&self, id: &str) -> Option<AlarmInstance> {
        let book = self.book();
        let index = book.position(id).ok()?;
        Some(book.instances[index].clone())
    }

    /// Oldest entry first.
    pub fn history(&self) -> Vec<AlarmHistoryEntry> {
        self.book().history.iter().cloned().collect()
    }

    pub fn history_capacity(&self) -> usize {
        self.book().capacity
    }

    /// Alarms currently active or acknowledged.
    pub fn raised_count(&self) -> usize {
        self.book()
            .instances
            .iter()
            .filter(|instance| instance.is_raised())
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmHistoryEntry> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AlarmCondition, AlarmDefinition, AlarmEngine, AlarmError, AlarmState, Severity,
        TransitionKind, MAX_HISTORY_CAPACITY,
    };
    use crate::tags::{DataType, Tag};
    use crate::value::{RawValue, ScaledValue, TagSnapshot, TagValue};
    use chrono::Utc;
    use plclink_client::PointKind;
    use std::sync::Arc;

    fn definition(id: &str, source: &Arc<Tag>, condition: AlarmCondition) -> AlarmDefinition {
        AlarmDefinition {
            id: id.to_string(),
            source: Arc::clone(source),
            description: String::new(),
            severity: Severity::High,
            condition,
        }
    }

    fn engine(ids: &[&str]) -> AlarmEngine {
        engine_with_capacity(ids, 100)
    }

    fn engine_with_capacity(ids: &[&str], capacity: usize) -> AlarmEngine {
        let tag = Arc::new(Tag::new("x", PointKind::Coil, 0, DataType::Bool));
        AlarmEngine::new(
            ids.iter()
                .map(|id| definition(id, &tag, AlarmCondition::IsTrue)),
            capacity,
        )
    }

    fn transitions(engine: &AlarmEngine) -> Vec<TransitionKind> {
        engine.history().iter().map(|e| e.transition).collect()
    }

    #[test]
    fn lifecycle_with_acknowledge() {
        let engine = engine(&["door"]);
        let mut states = Vec::new();

        engine.observe("door", false).unwrap();
        states.push(engine.instance("door").unwrap().state);
        engine.observe("door", true).unwrap();
        states.push(engine.instance("door").unwrap().state);
        engine.observe("door", true).unwrap();
        assert!(engine.acknowledge("door").unwrap());
        states.push(engine.instance("door").unwrap().state);
        engine.observe("door", false).unwrap();
        states.push(engine.instance("door").unwrap().state);

        assert_eq!(
            states,
            vec![
                AlarmState::Inactive,
                AlarmState::Active,
                AlarmState::Acknowledged,
                AlarmState::Inactive
            ]
        );
        assert_eq!(
            transitions(&engine),
            vec![
                TransitionKind::Activated,
                TransitionKind::Acknowledged,
                TransitionKind::Cleared
            ]
        );
        let door = engine.instance("door").unwrap();
        assert!(door.activated_at.is_some());
        assert!(door.acknowledged_at.is_some());
        assert!(door.cleared_at.is_some());
    }

    #[test]
    fn clearing_before_acknowledge_goes_straight_to_inactive() {
        let engine = engine(&["door"]);
        engine.observe("door", true).unwrap();
        engine.observe("door", false).unwrap();
        assert_eq!(engine.instance("door").unwrap().state, AlarmState::Inactive);
        assert_eq!(
            transitions(&engine),
            vec![TransitionKind::Activated, TransitionKind::Cleared]
        );
    }

    #[test]
    fn acknowledging_an_inactive_alarm_changes_nothing() {
        let engine = engine(&["door"]);
        assert!(!engine.acknowledge("door").unwrap());
        assert_eq!(engine.instance("door").unwrap().state, AlarmState::Inactive);
        assert!(engine.history().is_empty());

        engine.observe("door", true).unwrap();
        assert!(engine.acknowledge("door").unwrap());
        assert!(!engine.acknowledge("door").unwrap());
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn unknown_alarm_is_an_error() {
        let engine = engine(&["door"]);
        assert_eq!(
            engine.acknowledge("window"),
            Err(AlarmError::UnknownAlarm("window".to_string()))
        );
    }

    #[test]
    fn history_evicts_oldest_first() {
        let engine = engine(&["door"]);
        for i in 0..101 {
            engine.observe("door", i % 2 == 0).unwrap();
        }
        let history = engine.history();
        assert_eq!(history.len(), 100);
        // Transition 0 was "activated"; with it gone the ring starts at "cleared".
        assert_eq!(history[0].transition, TransitionKind::Cleared);
        assert_eq!(history[99].transition, TransitionKind::Activated);
        assert_eq!(engine.instance("door").unwrap().state, AlarmState::Active);
    }

    #[test]
    fn reset_leaves_alarms_that_are_still_true() {
        let engine = engine(&["door"]);
        engine.observe("door", true).unwrap();
        engine.acknowledge("door").unwrap();
        assert_eq!(engine.reset(), 0);
        assert_eq!(
            engine.instance("door").unwrap().state,
            AlarmState::Acknowledged
        );
    }

    #[test]
    fn reset_after_condition_clears_changes_nothing() {
        let engine = engine(&["door", "gate"]);
        engine.observe("door", true).unwrap();
        engine.observe("gate", true).unwrap();
        assert_eq!(engine.acknowledge_all(), 2);
        engine.observe("door", false).unwrap();
        assert_eq!(engine.instance("door").unwrap().state, AlarmState::Inactive);
        let before = engine.history().len();

        assert_eq!(engine.reset(), 0);
        assert_eq!(engine.history().len(), before);
        assert_eq!(engine.instance("door").unwrap().state, AlarmState::Inactive);
        assert_eq!(
            engine.instance("gate").unwrap().state,
            AlarmState::Acknowledged
        );
    }

    #[test]
    fn history_capacity_is_capped() {
        assert_eq!(engine_with_capacity(&[], 0).history_capacity(), 1);

        let engine = engine_with_capacity(&["door"], 500);
        assert_eq!(engine.history_capacity(), MAX_HISTORY_CAPACITY);
        for i in 0..300 {
            engine.observe("door", i % 2 == 0).unwrap();
        }
        assert_eq!(engine.history().len(), MAX_HISTORY_CAPACITY);
    }

    #[test]
    fn reset_on_inactive_alarms_is_a_no_op() {
        let engine = engine(&["door"]);
        assert_eq!(engine.reset(), 0);
        assert!(engine.history().is_empty());
    }

    #[test]
    fn evaluation_follows_declaration_order() {
        let temperature = Arc::new(
            Tag::new("temperature", PointKind::HoldingRegister, 100, DataType::UInt16)
                .with_scale(0.1),
        );
        let motor = Arc::new(Tag::new("motor", PointKind::Coil, 0, DataType::Bool));
        let engine = AlarmEngine::new(
            [
                definition("too_hot", &temperature, AlarmCondition::Above(80.0)),
                definition("motor_stopped", &motor, AlarmCondition::IsFalse),
                definition("too_cold", &temperature, AlarmCondition::Below(5.0)),
            ],
            100,
        );
        let mut events = engine.subscribe();

        let tags = vec![Arc::clone(&temperature), Arc::clone(&motor)];
        let now = Utc::now();
        let snapshot = TagSnapshot::empty(&tags).next(
            vec![
                TagValue::good(Arc::clone(&temperature), RawValue::Word(850), now),
                TagValue::good(Arc::clone(&motor), RawValue::Bit(false), now),
            ],
            now,
        );

        let entries = engine.evaluate(&snapshot);
        let ids: Vec<_> = entries.iter().map(|e| e.alarm_id.as_str()).collect();
        assert_eq!(ids, vec!["too_hot", "motor_stopped"]);
        assert_eq!(events.try_recv().unwrap().alarm_id, "too_hot");
        assert_eq!(events.try_recv().unwrap().alarm_id, "motor_stopped");
        assert_eq!(engine.raised_count(), 2);
    }

    #[test]
    fn invalid_source_leaves_state_alone() {
        let motor = Arc::new(Tag::new("motor", PointKind::Coil, 0, DataType::Bool));
        let engine = AlarmEngine::new([definition("running", &motor, AlarmCondition::IsTrue)], 100);
        engine.observe("running", true).unwrap();

        let now = Utc::now();
        let mut stale = TagValue::good(Arc::clone(&motor), RawValue::Bit(false), now);
        stale.invalidate();
        let snapshot = TagSnapshot::empty(&[Arc::clone(&motor)]).next(vec![stale], now);

        assert!(engine.evaluate(&snapshot).is_empty());
        assert_eq!(engine.instance("running").unwrap().state, AlarmState::Active);

        let never = TagSnapshot::empty(&[motor]);
        assert!(engine.evaluate(&never).is_empty());
    }

    #[test]
    fn conditions_compare_scaled_values() {
        assert!(AlarmCondition::Above(80.0).holds(ScaledValue::Number(80.5)));
        assert!(!AlarmCondition::Above(80.0).holds(ScaledValue::Number(80.0)));
        assert!(AlarmCondition::Below(5.0).holds(ScaledValue::Number(4.9)));
        assert!(AlarmCondition::IsTrue.holds(ScaledValue::Bool(true)));
        assert!(AlarmCondition::IsFalse.holds(ScaledValue::Bool(false)));
        assert!(!AlarmCondition::IsFalse.holds(ScaledValue::Number(3.0)));
    }
}
