//! In-process links that hand request PDUs straight to a [`ModbusService`].
//!
//! Used to drive a session against [`SimulatedPlc`](crate::SimulatedPlc)
//! without sockets. The connector can be taken offline to simulate a PLC that
//! refuses connections and drops the links it already handed out.

use crate::server::{serve_pdu, ModbusService};
use crate::{Connector, DataLink, DataLinkError};
use async_trait::async_trait;
use plclink_core::frame::tcp::MAX_PDU_LEN;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
struct LinkState {
    online: AtomicBool,
    /// Bumped when the device goes offline; older links become dead.
    generation: AtomicU64,
    connects: AtomicUsize,
    exchanges: AtomicUsize,
}

/// Hands out [`ServiceLink`]s bound to one shared service.
pub struct ServiceConnector<S> {
    service: Arc<S>,
    state: Arc<LinkState>,
}

impl<S> Clone for ServiceConnector<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: ModbusService> ServiceConnector<S> {
    pub fn new(service: Arc<S>) -> Self {
        let state = LinkState::default();
        state.online.store(true, Ordering::SeqCst);
        Self {
            service,
            state: Arc::new(state),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Taking the device offline breaks every open link and refuses new ones.
    pub fn set_online(&self, online: bool) {
        let was = self.state.online.swap(online, Ordering::SeqCst);
        if was && !online {
            self.state.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    /// Connect attempts seen so far, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Request PDUs that reached the service.
    pub fn exchange_count(&self) -> usize {
        self.state.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: ModbusService> Connector for ServiceConnector<S> {
    type Link = ServiceLink<S>;

    async fn connect(&self) -> Result<Self::Link, DataLinkError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if !self.is_online() {
            return Err(DataLinkError::Connect {
                addr: self.peer(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(ServiceLink {
            service: Arc::clone(&self.service),
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        })
    }

    fn peer(&self) -> String {
        "in-process".to_string()
    }
}

pub struct ServiceLink<S> {
    service: Arc<S>,
    state: Arc<LinkState>,
    generation: u64,
    closed: AtomicBool,
}

#[async_trait]
impl<S: ModbusService> DataLink for ServiceLink<S> {
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataLinkError::Closed);
        }
        if self.state.generation.load(Ordering::SeqCst) != self.generation {
            return Err(DataLinkError::ConnectionClosed);
        }
        self.state.exchanges.fetch_add(1, Ordering::SeqCst);

        let mut reply = [0u8; MAX_PDU_LEN];
        let len = serve_pdu(self.service.as_ref(), unit_id, request_pdu, &mut reply)?;
        trace!(unit_id, request_len = request_pdu.len(), response_len = len, "in-process exchange");
        let available = response_pdu.len();
        let out = response_pdu
            .get_mut(..len)
            .ok_or(DataLinkError::ResponseBufferTooSmall {
                needed: len,
                available,
            })?;
        out.copy_from_slice(&reply[..len]);
        Ok(len)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
