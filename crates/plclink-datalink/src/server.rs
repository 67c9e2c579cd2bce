use crate::DataLinkError;
use plclink_core::encoding::{Reader, Writer};
use plclink_core::frame::tcp;
use plclink_core::pdu::{DecodedRequest, ExceptionCode, ExceptionResponse};
use plclink_core::DecodeError;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("modbus exception: {0}")]
    Exception(ExceptionCode),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl ServiceError {
    fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::Exception(code) => *code,
            Self::InvalidRequest(_) => ExceptionCode::IllegalDataValue,
            Self::Internal(_) => ExceptionCode::ServerDeviceFailure,
        }
    }
}

pub trait ModbusService: Send + Sync + 'static {
    /// Handle a decoded request and write a response PDU into `response_pdu`.
    ///
    /// Return the number of bytes written (function code plus payload).
    fn handle(
        &self,
        unit_id: u8,
        request: DecodedRequest<'_>,
        response_pdu: &mut [u8],
    ) -> Result<usize, ServiceError>;
}

impl<T> ModbusService for Arc<T>
where
    T: ModbusService + ?Sized,
{
    fn handle(
        &self,
        unit_id: u8,
        request: DecodedRequest<'_>,
        response_pdu: &mut [u8],
    ) -> Result<usize, ServiceError> {
        (**self).handle(unit_id, request, response_pdu)
    }
}

/// Modbus TCP server: one task per accepted connection.
pub struct ModbusTcpServer<S> {
    listener: TcpListener,
    service: Arc<S>,
}

impl<S: ModbusService> ModbusTcpServer<S> {
    pub async fn bind<A: ToSocketAddrs>(addr: A, service: S) -> Result<Self, DataLinkError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, service))
    }

    pub fn from_listener(listener: TcpListener, service: S) -> Self {
        Self {
            listener,
            service: Arc::new(service),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), DataLinkError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Accepts connections until `shutdown` fires. Open connections are
    /// cancelled with it.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<(), DataLinkError> {
        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("modbus tcp server stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };
            debug!(%peer, "modbus tcp client connected");
            let service = Arc::clone(&self.service);
            let shutdown = shutdown.child_token();

            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    result = handle_connection(socket, service) => {
                        if let Err(err) = result {
                            warn!(%peer, error = %err, "modbus tcp server connection ended with error");
                        } else {
                            debug!(%peer, "modbus tcp client disconnected");
                        }
                    }
                }
            });
        }
    }
}

async fn handle_connection<S: ModbusService>(
    mut socket: TcpStream,
    service: Arc<S>,
) -> Result<(), DataLinkError> {
    let mut request_pdu = [0u8; tcp::MAX_PDU_LEN];
    let mut response_pdu = [0u8; tcp::MAX_PDU_LEN];
    loop {
        let mut mbap = [0u8; tcp::MBAP_HEADER_LEN];
        if let Err(err) = socket.read_exact(&mut mbap).await {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(());
            }
            return Err(DataLinkError::Io(err));
        }

        let header = tcp::MbapHeader::decode(&mut Reader::new(&mbap))?;
        let pdu_len = header.pdu_len();
        if pdu_len > tcp::MAX_PDU_LEN {
            return Err(DataLinkError::InvalidResponse("invalid request pdu length"));
        }
        let request_pdu = &mut request_pdu[..pdu_len];
        socket.read_exact(request_pdu).await?;

        debug!(
            transaction_id = header.transaction_id,
            unit_id = header.unit_id,
            function = request_pdu.first().copied().unwrap_or_default(),
            pdu_len,
            "received modbus tcp request"
        );

        let len = serve_pdu(&*service, header.unit_id, request_pdu, &mut response_pdu)?;
        send_pdu(&mut socket, &header, &response_pdu[..len]).await?;
    }
}

/// Runs one request PDU through `service` and writes the reply PDU.
///
/// Malformed requests and service failures become exception replies, so the
/// returned length always covers a PDU worth sending.
pub fn serve_pdu<S: ModbusService + ?Sized>(
    service: &S,
    unit_id: u8,
    request_pdu: &[u8],
    response_pdu: &mut [u8],
) -> Result<usize, DataLinkError> {
    let function = request_pdu.first().copied().unwrap_or_default() & 0x7F;

    let mut request_reader = Reader::new(request_pdu);
    let decoded = match DecodedRequest::decode(&mut request_reader) {
        Ok(req) if request_reader.is_empty() => req,
        Ok(_) => {
            return write_exception(response_pdu, function, ExceptionCode::IllegalDataValue);
        }
        Err(err) => {
            return write_exception(response_pdu, function, map_decode_error_to_exception(err));
        }
    };

    match service.handle(unit_id, decoded, response_pdu) {
        Ok(len) if len > 0 && len <= response_pdu.len() => Ok(len),
        Ok(_) => write_exception(response_pdu, function, ExceptionCode::ServerDeviceFailure),
        Err(err) => {
            debug!(function, error = %err, "service rejected request");
            write_exception(response_pdu, function, err.exception_code())
        }
    }
}

fn map_decode_error_to_exception(err: DecodeError) -> ExceptionCode {
    match err {
        DecodeError::InvalidFunctionCode => ExceptionCode::IllegalFunction,
        DecodeError::InvalidLength | DecodeError::InvalidValue | DecodeError::UnexpectedEof => {
            ExceptionCode::IllegalDataValue
        }
        DecodeError::InvalidProtocolId => ExceptionCode::ServerDeviceFailure,
    }
}

fn write_exception(
    response_pdu: &mut [u8],
    function_code: u8,
    exception_code: ExceptionCode,
) -> Result<usize, DataLinkError> {
    let mut w = Writer::new(response_pdu);
    ExceptionResponse {
        function_code,
        exception_code,
    }
    .encode(&mut w)?;
    Ok(w.position())
}

async fn send_pdu(
    socket: &mut TcpStream,
    header: &tcp::MbapHeader,
    pdu: &[u8],
) -> Result<(), DataLinkError> {
    let mut frame = [0u8; tcp::MAX_ADU_LEN];
    let mut frame_writer = Writer::new(&mut frame);
    tcp::encode_frame(&mut frame_writer, header.transaction_id, header.unit_id, pdu)?;
    socket.write_all(frame_writer.as_written()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ModbusService, ModbusTcpServer, ServiceError};
    use crate::{DataLink, ModbusTcpTransport};
    use plclink_core::pdu::{DecodedRequest, ExceptionCode};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct FixedReadService;

    impl ModbusService for FixedReadService {
        fn handle(
            &self,
            _unit_id: u8,
            request: DecodedRequest<'_>,
            response_pdu: &mut [u8],
        ) -> Result<usize, ServiceError> {
            match request {
                DecodedRequest::Read(req) if req.function.as_u8() == 0x03 => {
                    let bytes = [0x03u8, 0x02, 0x00, 0x2A];
                    response_pdu[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                _ => Err(ServiceError::Exception(ExceptionCode::IllegalFunction)),
            }
        }
    }

    async fn connect(server: &ModbusTcpServer<FixedReadService>) -> ModbusTcpTransport {
        let port = server.local_addr().unwrap().port();
        ModbusTcpTransport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn answers_reads_and_rejects_other_functions() {
        let server = ModbusTcpServer::bind("127.0.0.1:0", FixedReadService)
            .await
            .unwrap();
        let transport = connect(&server).await;
        let task = tokio::spawn(server.run());

        let mut response = [0u8; 32];
        let len = transport
            .exchange(1, &[0x03, 0x00, 0x00, 0x00, 0x01], &mut response)
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x03, 0x02, 0x00, 0x2A]);

        let len = transport
            .exchange(1, &[0x05, 0x00, 0x00, 0xFF, 0x00], &mut response)
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x85, 0x01]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn malformed_and_unsupported_requests_become_exceptions() {
        let server = ModbusTcpServer::bind("127.0.0.1:0", FixedReadService)
            .await
            .unwrap();
        let transport = connect(&server).await;
        let task = tokio::spawn(server.run());

        let mut response = [0u8; 32];
        let len = transport
            .exchange(
                1,
                &[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x12, 0x34, 0x56],
                &mut response,
            )
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x90, 0x03]);

        let len = transport
            .exchange(1, &[0x04, 0x00, 0x00, 0x00, 0x01], &mut response)
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x84, 0x01]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn run_until_returns_on_shutdown() {
        let server = ModbusTcpServer::bind("127.0.0.1:0", FixedReadService)
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run_until(shutdown.clone()));
        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
