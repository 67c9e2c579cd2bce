//! Async Modbus TCP transport and the seams the session layer builds on.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use plclink_core::encoding::{Reader, Writer};
use plclink_core::frame::tcp;
use plclink_core::{DecodeError, EncodeError};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

pub mod loopback;
pub mod server;
pub mod sim;
pub use loopback::{ServiceConnector, ServiceLink};
pub use server::{serve_pdu, ModbusService, ModbusTcpServer, ServiceError};
pub use sim::{BitBank, PlcImage, RegisterBank, SimulatedPlc};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("transport closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("transaction id mismatch: expected {expected}, got {got}")]
    MismatchedTransactionId { expected: u16, got: u16 },
    #[error("response buffer too small (needed {needed}, available {available})")]
    ResponseBufferTooSmall { needed: usize, available: usize },
}

impl DataLinkError {
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}

#[async_trait]
pub trait DataLink: Send + Sync {
    /// Send a request PDU to a unit and write the response PDU into `response_pdu`.
    ///
    /// Returns the number of response bytes written to `response_pdu`.
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError>;

    /// Release the underlying connection. Calling it more than once is harmless.
    async fn close(&self) {}
}

/// Opens fresh links. The session calls this on every (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: DataLink + 'static;

    async fn connect(&self) -> Result<Self::Link, DataLinkError>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Link = ModbusTcpTransport;

    async fn connect(&self) -> Result<Self::Link, DataLinkError> {
        ModbusTcpTransport::connect(&self.host, self.port, self.connect_timeout).await
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
pub struct ModbusTcpTransport {
    stream: Mutex<Option<TcpStream>>,
    next_transaction_id: AtomicU16,
}

impl ModbusTcpTransport {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, DataLinkError> {
        let addr = format!("{host}:{port}");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(DataLinkError::Connect { addr, source }),
            Err(_) => return Err(DataLinkError::ConnectTimeout { addr, timeout }),
        };
        stream.set_nodelay(true)?;
        debug!(peer = %addr, "modbus tcp transport connected");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            next_transaction_id: AtomicU16::new(1),
        }
    }

    /// Wraps at `u16::MAX` back to 0.
    fn next_tid(&self) -> u16 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn read_exact_or_connection_closed(
    stream: &mut TcpStream,
    buf: &mut [u8],
) -> Result<(), DataLinkError> {
    if let Err(err) = stream.read_exact(buf).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(DataLinkError::ConnectionClosed);
        }
        return Err(DataLinkError::Io(err));
    }
    Ok(())
}

async fn drain_exact(stream: &mut TcpStream, mut len: usize) -> Result<(), DataLinkError> {
    let mut scratch = [0u8; 256];
    while len > 0 {
        let chunk = len.min(scratch.len());
        read_exact_or_connection_closed(stream, &mut scratch[..chunk]).await?;
        len -= chunk;
    }
    Ok(())
}

fn check_correlation(
    header: &tcp::MbapHeader,
    transaction_id: u16,
    unit_id: u8,
) -> Result<(), DataLinkError> {
    if header.transaction_id != transaction_id {
        return Err(DataLinkError::MismatchedTransactionId {
            expected: transaction_id,
            got: header.transaction_id,
        });
    }
    if header.unit_id != unit_id {
        return Err(DataLinkError::InvalidResponse("unit id mismatch"));
    }
    Ok(())
}

#[async_trait]
impl DataLink for ModbusTcpTransport {
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError> {
        if request_pdu.is_empty() {
            return Err(DataLinkError::InvalidResponse("empty request pdu"));
        }

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(DataLinkError::Closed)?;

        let transaction_id = self.next_tid();
        let mut req_frame = [0u8; tcp::MAX_ADU_LEN];
        let mut writer = Writer::new(&mut req_frame);
        tcp::encode_frame(&mut writer, transaction_id, unit_id, request_pdu)?;

        trace!(
            transaction_id,
            unit_id,
            pdu_len = request_pdu.len(),
            "sending modbus tcp request"
        );
        stream.write_all(writer.as_written()).await?;

        let mut mbap = [0u8; tcp::MBAP_HEADER_LEN];
        read_exact_or_connection_closed(stream, &mut mbap).await?;
        let header = tcp::MbapHeader::decode(&mut Reader::new(&mbap))?;
        let pdu_len = header.pdu_len();

        if pdu_len > tcp::MAX_PDU_LEN {
            drain_exact(stream, pdu_len).await?;
            check_correlation(&header, transaction_id, unit_id)?;
            return Err(DataLinkError::InvalidResponse("response pdu too large"));
        }
        if pdu_len > response_pdu.len() {
            drain_exact(stream, pdu_len).await?;
            check_correlation(&header, transaction_id, unit_id)?;
            return Err(DataLinkError::ResponseBufferTooSmall {
                needed: pdu_len,
                available: response_pdu.len(),
            });
        }

        read_exact_or_connection_closed(stream, &mut response_pdu[..pdu_len]).await?;
        check_correlation(&header, transaction_id, unit_id)?;
        trace!(
            transaction_id,
            unit_id,
            pdu_len,
            "received modbus tcp response"
        );
        Ok(pdu_len)
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(err) = stream.shutdown().await {
                trace!(error = %err, "shutdown on close failed");
            }
            debug!("modbus tcp transport closed");
        }
    }
}
