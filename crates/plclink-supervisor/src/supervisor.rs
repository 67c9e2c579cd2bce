use crate::alarm::{AlarmEngine, AlarmError, AlarmHistoryEntry, AlarmInstance};
use crate::command::{CommandError, CommandPort, CommandValue};
use crate::config::{ConfigError, SupervisorConfig};
use crate::poll::PollingEngine;
use crate::tags::TagRegistry;
use crate::value::TagSnapshot;
use plclink_client::{ConnectionState, ModbusSession, StateTransition};
use plclink_datalink::{Connector, TcpConnector};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Session, poller, alarms and command port wired together for one PLC.
///
/// `start` and `stop` may be called any number of times; the read-only views
/// stay valid throughout.
pub struct Supervisor<C: Connector = TcpConnector> {
    session: ModbusSession<C>,
    registry: Arc<TagRegistry>,
    alarms: Arc<AlarmEngine>,
    poller: Arc<PollingEngine<C>>,
    commands: CommandPort<C>,
    poll_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Supervisor<TcpConnector> {
    pub fn from_config(config: &SupervisorConfig) -> Result<Self, ConfigError> {
        Self::with_connector(config.connector(), config)
    }
}

impl<C: Connector> Supervisor<C> {
    /// Validates `config` and builds every component around `connector`.
    pub fn with_connector(connector: C, config: &SupervisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(config.registry()?);
        let definitions = config.alarm_definitions(&registry)?;
        let alarms = Arc::new(AlarmEngine::new(
            definitions,
            config.polling.history_capacity,
        ));
        let session = ModbusSession::new(connector, config.session_config(&registry));
        let poller = Arc::new(
            PollingEngine::new(
                session.clone(),
                Arc::clone(&registry),
                Arc::clone(&alarms),
                config.refresh_rate(),
            )
            .with_alarms_enabled(config.polling.alarms_enabled),
        );
        let commands = CommandPort::new(session.clone(), Arc::clone(&registry));
        info!(
            peer = %session.peer(),
            tags = registry.len(),
            batches = registry.batches().len(),
            alarms = alarms.instances().len(),
            "supervisor configured"
        );
        Ok(Self {
            session,
            registry,
            alarms,
            poller,
            commands,
            poll_task: Mutex::new(None),
        })
    }

    pub fn start(&self) {
        self.session.start();
        let mut poll_task = self.poll_task.lock().unwrap_or_else(PoisonError::into_inner);
        if poll_task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&self.poller).spawn(cancel.clone());
        *poll_task = Some((cancel, handle));
        info!(period_ms = self.poller.period().as_millis() as u64, "supervisor started");
    }

    /// Cancels the next poll, lets a running cycle finish, then disconnects.
    pub async fn stop(&self) {
        let poll_task = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((cancel, handle)) = poll_task {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(error = %err, "poll task failed");
            }
        }
        self.session.stop().await;
        info!("supervisor stopped");
    }

    pub fn session(&self) -> &ModbusSession<C> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    pub fn alarms(&self) -> &Arc<AlarmEngine> {
        &self.alarms
    }

    pub fn poller(&self) -> &Arc<PollingEngine<C>> {
        &self.poller
    }

    pub fn commands(&self) -> &CommandPort<C> {
        &self.commands
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe_state()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.session.subscribe_transitions()
    }

    pub fn snapshot(&self) -> Arc<TagSnapshot> {
        self.poller.snapshot()
    }

    pub fn subscribe_values(&self) -> watch::Receiver<Arc<TagSnapshot>> {
        self.poller.subscribe()
    }

    pub fn alarm_instances(&self) -> Vec<AlarmInstance> {
        self.alarms.instances()
    }

    pub fn alarm_history(&self) -> Vec<AlarmHistoryEntry> {
        self.alarms.history()
    }

    pub fn subscribe_alarms(&self) -> broadcast::Receiver<AlarmHistoryEntry> {
        self.alarms.subscribe()
    }

    pub fn acknowledge(&self, alarm_id: &str) -> Result<bool, AlarmError> {
        self.alarms.acknowledge(alarm_id)
    }

    pub fn reset_alarms(&self) -> usize {
        self.alarms.reset()
    }

    pub async fn write(
        &self,
        tag: &str,
        value: impl Into<CommandValue>,
    ) -> Result<(), CommandError> {
        self.commands.write(tag, value).await
    }

    pub async fn toggle(&self, tag: &str) -> Result<bool, CommandError> {
        self.commands.toggle(tag).await
    }
}
