//! Fixed-period poll cycle.
//!
//! Each cycle issues the registry's batches through the session, builds a new
//! [`TagSnapshot`] from the results, publishes it in one replace and then runs
//! alarm evaluation against it. Read failures only mark the affected tags
//! stale; they never reach the caller.

use crate::alarm::AlarmEngine;
use crate::tags::TagRegistry;
use crate::value::{decode, TagSnapshot, TagValue};
use chrono::Utc;
use plclink_client::{ModbusSession, SessionError};
use plclink_datalink::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub batches_ok: usize,
    pub batches_failed: usize,
    pub alarm_transitions: usize,
}

pub struct PollingEngine<C: Connector> {
    session: ModbusSession<C>,
    registry: Arc<TagRegistry>,
    alarms: Arc<AlarmEngine>,
    period: Duration,
    alarms_enabled: bool,
    snapshot: watch::Sender<Arc<TagSnapshot>>,
}

impl<C: Connector> PollingEngine<C> {
    pub fn new(
        session: ModbusSession<C>,
        registry: Arc<TagRegistry>,
        alarms: Arc<AlarmEngine>,
        period: Duration,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(TagSnapshot::empty(registry.tags())));
        Self {
            session,
            registry,
            alarms,
            period,
            alarms_enabled: true,
            snapshot,
        }
    }

    pub fn with_alarms_enabled(mut self, enabled: bool) -> Self {
        self.alarms_enabled = enabled;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn snapshot(&self) -> Arc<TagSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TagSnapshot>> {
        self.snapshot.subscribe()
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let previous = self.snapshot();
        let mut values: Vec<TagValue> = previous.values().to_vec();
        let mut report = CycleReport::default();

        for batch in self.registry.batches() {
            match self
                .session
                .read_block(batch.kind, batch.start, batch.count)
                .await
            {
                Ok(block) => {
                    report.batches_ok += 1;
                    let at = Utc::now();
                    for &index in &batch.tags {
                        let tag = &self.registry.tags()[index];
                        match decode(tag, &block) {
                            Some(raw) => values[index] = TagValue::good(Arc::clone(tag), raw, at),
                            None => values[index].invalidate(),
                        }
                    }
                }
                Err(err) => {
                    report.batches_failed += 1;
                    if !matches!(err, SessionError::NotConnected) {
                        warn!(
                            kind = %batch.kind,
                            start = batch.start,
                            count = batch.count,
                            error = %err,
                            "poll batch failed"
                        );
                    }
                    for &index in &batch.tags {
                        values[index].invalidate();
                    }
                }
            }
        }

        let next = Arc::new(previous.next(values, Utc::now()));
        report.cycle = next.cycle();
        self.snapshot.send_replace(Arc::clone(&next));

        if self.alarms_enabled {
            report.alarm_transitions = self.alarms.evaluate(&next).len();
        }
        debug!(
            cycle = report.cycle,
            ok = report.batches_ok,
            failed = report.batches_failed,
            alarm_transitions = report.alarm_transitions,
            "poll cycle complete"
        );
        report
    }

    /// Runs cycles every period until `cancel` fires. A cycle already under
    /// way is allowed to finish.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.run_cycle().await;
            }
            debug!("polling stopped");
        })
    }
}
