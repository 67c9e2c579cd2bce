//! Reconnecting session around a single PLC connection.
//!
//! The session owns the [`ConnectionState`]. A background manager task drives
//! `Connecting -> Connected -> Reconnecting -> Connecting` while operations run
//! against the live client one at a time through a fair async mutex. An
//! operation that breaks the link hands recovery back to the manager and
//! reports [`SessionError::Communication`]; nothing here retries on the
//! caller's behalf.

use crate::{ClientConfig, ClientError, ModbusClient, PointBlock, PointKind};
use plclink_core::pdu::ExceptionResponse;
use plclink_core::EncodeError;
use plclink_datalink::{Connector, DataLink};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TRANSITION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Single-point read issued right after connecting.
///
/// Any well-formed reply, including an exception, proves the device answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub kind: PointKind,
    pub address: u16,
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            kind: PointKind::HoldingRegister,
            address: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub unit_id: u8,
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
    pub client: ClientConfig,
    pub probe: Option<Probe>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            unit_id: 1,
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            client: ClientConfig::default(),
            probe: Some(Probe::default()),
        }
    }
}

impl SessionConfig {
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_probe(mut self, probe: Option<Probe>) -> Self {
        self.probe = probe;
        self
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,
    #[error("communication error: {0}")]
    Communication(#[source] ClientError),
    #[error("modbus exception: {0}")]
    Exception(ExceptionResponse),
    #[error("invalid request: {0}")]
    InvalidRequest(#[source] EncodeError),
}

struct Live<L: DataLink> {
    client: ModbusClient<L>,
    lost: CancellationToken,
}

struct Shared<C: Connector> {
    connector: C,
    config: SessionConfig,
    live: Mutex<Option<Live<C::Link>>>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<StateTransition>,
    manager: StdMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<C: Connector> Shared<C> {
    fn transition(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        info!(peer = %self.connector.peer(), %from, %to, "connection state changed");
        let _ = self.transitions.send(StateTransition { from, to });
    }

    async fn connect_and_probe(&self) -> Result<ModbusClient<C::Link>, ClientError> {
        let link = self.connector.connect().await?;
        let client = ModbusClient::with_config(link, self.config.client);
        if let Some(probe) = self.config.probe {
            match client
                .read_block(self.config.unit_id, probe.kind, probe.address, 1)
                .await
            {
                Ok(_) | Err(ClientError::Exception(_)) => {}
                Err(err) => {
                    client.close().await;
                    return Err(err);
                }
            }
        }
        Ok(client)
    }

    async fn manage(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.transition(ConnectionState::Connecting);
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                attempt = self.connect_and_probe() => attempt,
            };

            match attempt {
                Ok(client) => {
                    let lost = CancellationToken::new();
                    *self.live.lock().await = Some(Live {
                        client,
                        lost: lost.clone(),
                    });
                    self.transition(ConnectionState::Connected);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = lost.cancelled() => {}
                    }
                }
                Err(err) => {
                    warn!(peer = %self.connector.peer(), error = %err, "connect attempt failed");
                    if self.config.auto_reconnect {
                        self.transition(ConnectionState::Reconnecting);
                    }
                }
            }

            if !self.config.auto_reconnect {
                self.transition(ConnectionState::Disconnected);
                return;
            }

            debug!(delay_ms = self.config.reconnect_delay.as_millis() as u64, "reconnect scheduled");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }
}

/// Cloneable handle; clones share one connection and one state machine.
pub struct ModbusSession<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ModbusSession<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> ModbusSession<C> {
    pub fn new(connector: C, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                live: Mutex::new(None),
                state,
                transitions,
                manager: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn unit_id(&self) -> u8 {
        self.shared.config.unit_id
    }

    pub fn peer(&self) -> String {
        self.shared.connector.peer()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.shared.transitions.subscribe()
    }

    /// Starts the connection manager. Does nothing while one is already running.
    pub fn start(&self) {
        let mut manager = self
            .shared
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((_, handle)) = manager.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).manage(cancel.clone()));
        *manager = Some((cancel, handle));
    }

    /// Stops the manager, closes the link and parks the session in `Disconnected`.
    ///
    /// An operation already holding the connection finishes first.
    pub async fn stop(&self) {
        let manager = self
            .shared
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((cancel, handle)) = manager {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(error = %err, "session manager task failed");
            }
        }
        if let Some(live) = self.shared.live.lock().await.take() {
            live.client.close().await;
            live.lost.cancel();
        }
        self.shared.transition(ConnectionState::Disconnected);
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Option<Live<C::Link>>>, SessionError> {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let live = self.shared.live.lock().await;
        if live.is_none() {
            return Err(SessionError::NotConnected);
        }
        Ok(live)
    }

    async fn settle<T>(
        &self,
        live: &mut MutexGuard<'_, Option<Live<C::Link>>>,
        operation: &'static str,
        result: Result<T, ClientError>,
    ) -> Result<T, SessionError> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        match err {
            ClientError::Exception(ex) => Err(SessionError::Exception(ex)),
            ClientError::Encode(err) => Err(SessionError::InvalidRequest(err)),
            err => {
                warn!(operation, error = %err, "link lost during operation");
                if let Some(broken) = live.take() {
                    broken.client.close().await;
                    self.shared.transition(ConnectionState::Reconnecting);
                    broken.lost.cancel();
                }
                Err(SessionError::Communication(err))
            }
        }
    }

    pub async fn read_block(
        &self,
        kind: PointKind,
        address: u16,
        count: u16,
    ) -> Result<PointBlock, SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => l.client.read_block(self.unit_id(), kind, address, count).await,
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "read block", result).await
    }

    pub async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>, SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => l.client.read_coils(self.unit_id(), address, count).await,
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "read coils", result).await
    }

    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => {
                l.client
                    .read_discrete_inputs(self.unit_id(), address, count)
                    .await
            }
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "read discrete inputs", result).await
    }

    pub async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => {
                l.client
                    .read_holding_registers(self.unit_id(), address, count)
                    .await
            }
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "read holding registers", result)
            .await
    }

    pub async fn write_coil(&self, address: u16, value: bool) -> Result<(), SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => l.client.write_single_coil(self.unit_id(), address, value).await,
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "write coil", result).await
    }

    pub async fn write_register(&self, address: u16, value: u16) -> Result<(), SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => {
                l.client
                    .write_single_register(self.unit_id(), address, value)
                    .await
            }
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "write register", result).await
    }

    pub async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), SessionError> {
        let mut live = self.acquire().await?;
        let result = match live.as_ref() {
            Some(l) => {
                l.client
                    .write_multiple_registers(self.unit_id(), address, values)
                    .await
            }
            None => return Err(SessionError::NotConnected),
        };
        self.settle(&mut live, "write registers", result).await
    }
}
