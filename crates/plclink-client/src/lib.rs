//! Typed Modbus client and the reconnecting session built on top of it.

#![forbid(unsafe_code)]

pub mod points;
pub mod session;

pub use points::{BitBlock, PointBlock, PointKind, RegisterBlock};
pub use session::{
    ConnectionState, ModbusSession, Probe, SessionConfig, SessionError, StateTransition,
};

use plclink_core::encoding::{Reader, Writer};
use plclink_core::frame::tcp::MAX_PDU_LEN;
use plclink_core::pdu::{
    ExceptionResponse, ReadRequest, Request, Response, WriteMultipleRegistersRequest,
    WriteSingleCoilRequest, WriteSingleRegisterRequest,
};
use plclink_core::{DecodeError, EncodeError};
use plclink_datalink::{DataLink, DataLinkError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Upper bound on one request/response exchange.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("datalink error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("request timed out")]
    Timeout,
    #[error("modbus exception: {0}")]
    Exception(ExceptionResponse),
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
}

impl ClientError {
    /// Whether the connection can no longer be trusted after this error.
    ///
    /// Exceptions are well-formed answers and encode errors never reach the
    /// wire, so neither says anything about the link.
    pub fn breaks_link(&self) -> bool {
        !matches!(self, Self::Exception(_) | Self::Encode(_))
    }
}

pub struct ModbusClient<D: DataLink> {
    datalink: D,
    config: ClientConfig,
    request_counter: AtomicU64,
}

impl<D: DataLink> ModbusClient<D> {
    pub fn new(datalink: D) -> Self {
        Self::with_config(datalink, ClientConfig::default())
    }

    pub fn with_config(datalink: D, config: ClientConfig) -> Self {
        Self {
            datalink,
            config,
            request_counter: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> ClientConfig {
        self.config
    }

    pub fn datalink(&self) -> &D {
        &self.datalink
    }

    pub async fn close(&self) {
        self.datalink.close().await;
    }

    fn next_correlation_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_request<'a>(
        &self,
        unit_id: u8,
        request: &Request<'_>,
        response_storage: &'a mut [u8],
    ) -> Result<Response<'a>, ClientError> {
        let correlation_id = self.next_correlation_id();
        let mut req_buf = [0u8; MAX_PDU_LEN];
        let mut writer = Writer::new(&mut req_buf);
        request.encode(&mut writer)?;

        debug!(
            correlation_id,
            unit_id,
            function = request.function_code().as_u8(),
            pdu_len = writer.as_written().len(),
            "dispatching modbus request"
        );

        let exchange = self
            .datalink
            .exchange(unit_id, writer.as_written(), response_storage);
        let response_len = match timeout(self.config.response_timeout, exchange).await {
            Ok(Ok(len)) => len,
            Ok(Err(err)) => {
                warn!(correlation_id, unit_id, error = %err, "modbus exchange failed");
                return Err(ClientError::DataLink(err));
            }
            Err(_) => {
                warn!(
                    correlation_id,
                    unit_id,
                    timeout_ms = self.config.response_timeout.as_millis() as u64,
                    "modbus request timed out"
                );
                return Err(ClientError::Timeout);
            }
        };

        let mut reader = Reader::new(&response_storage[..response_len]);
        let response = Response::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(ClientError::InvalidResponse("trailing bytes in response"));
        }
        if let Response::Exception(ex) = response {
            debug!(correlation_id, unit_id, exception = %ex, "modbus exception response");
            return Err(ClientError::Exception(ex));
        }
        if response.function_byte() != request.function_code().as_u8() {
            return Err(ClientError::InvalidResponse("unexpected function response"));
        }
        Ok(response)
    }

    /// Reads `quantity` points of `kind` starting at `start`.
    pub async fn read_block(
        &self,
        unit_id: u8,
        kind: PointKind,
        start: u16,
        quantity: u16,
    ) -> Result<PointBlock, ClientError> {
        let request = match kind {
            PointKind::Coil => ReadRequest::coils(start, quantity),
            PointKind::DiscreteInput => ReadRequest::discrete_inputs(start, quantity),
            PointKind::HoldingRegister => ReadRequest::holding_registers(start, quantity),
        };

        let mut response_buf = [0u8; MAX_PDU_LEN];
        let response = self
            .send_request(unit_id, &Request::Read(request), &mut response_buf)
            .await?;

        let count = usize::from(quantity);
        match response {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                if bits.packed.len() != count.div_ceil(8) {
                    return Err(ClientError::InvalidResponse("bit payload length mismatch"));
                }
                let values = (0..count).filter_map(|idx| bits.bit(idx)).collect();
                Ok(PointBlock::Bits(BitBlock::new(start, values)))
            }
            Response::ReadHoldingRegisters(regs) => {
                if regs.register_count() != count {
                    return Err(ClientError::InvalidResponse("register count mismatch"));
                }
                let values = (0..count).filter_map(|idx| regs.register(idx)).collect();
                Ok(PointBlock::Registers(RegisterBlock::new(start, values)))
            }
            _ => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    pub async fn read_coils(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        match self.read_block(unit_id, PointKind::Coil, start, quantity).await? {
            PointBlock::Bits(block) => Ok(block.values().to_vec()),
            PointBlock::Registers(_) => Err(ClientError::InvalidResponse("expected bits")),
        }
    }

    pub async fn read_discrete_inputs(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        match self
            .read_block(unit_id, PointKind::DiscreteInput, start, quantity)
            .await?
        {
            PointBlock::Bits(block) => Ok(block.values().to_vec()),
            PointBlock::Registers(_) => Err(ClientError::InvalidResponse("expected bits")),
        }
    }

    pub async fn read_holding_registers(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        match self
            .read_block(unit_id, PointKind::HoldingRegister, start, quantity)
            .await?
        {
            PointBlock::Registers(block) => Ok(block.values().to_vec()),
            PointBlock::Bits(_) => Err(ClientError::InvalidResponse("expected registers")),
        }
    }

    pub async fn write_single_coil(
        &self,
        unit_id: u8,
        address: u16,
        value: bool,
    ) -> Result<(), ClientError> {
        let request = Request::WriteSingleCoil(WriteSingleCoilRequest { address, value });

        let mut response_buf = [0u8; MAX_PDU_LEN];
        let response = self
            .send_request(unit_id, &request, &mut response_buf)
            .await?;

        match response {
            Response::WriteSingleCoil(resp) if resp.address == address && resp.value == value => {
                Ok(())
            }
            _ => Err(ClientError::InvalidResponse("write single coil echo mismatch")),
        }
    }

    pub async fn write_single_register(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<(), ClientError> {
        let request = Request::WriteSingleRegister(WriteSingleRegisterRequest { address, value });

        let mut response_buf = [0u8; MAX_PDU_LEN];
        let response = self
            .send_request(unit_id, &request, &mut response_buf)
            .await?;

        match response {
            Response::WriteSingleRegister(resp)
                if resp.address == address && resp.value == value =>
            {
                Ok(())
            }
            _ => Err(ClientError::InvalidResponse(
                "write single register echo mismatch",
            )),
        }
    }

    pub async fn write_multiple_registers(
        &self,
        unit_id: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError> {
        let request_variant = WriteMultipleRegistersRequest {
            start_address: start,
            values,
        };
        let expected_qty = request_variant.quantity()?;

        let request = Request::WriteMultipleRegisters(request_variant);
        let mut response_buf = [0u8; MAX_PDU_LEN];
        let response = self
            .send_request(unit_id, &request, &mut response_buf)
            .await?;

        match response {
            Response::WriteMultipleRegisters(resp)
                if resp.start_address == start && resp.quantity == expected_qty =>
            {
                Ok(())
            }
            _ => Err(ClientError::InvalidResponse(
                "write multiple registers echo mismatch",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, ClientError, ModbusClient, PointBlock, PointKind};
    use async_trait::async_trait;
    use plclink_datalink::{DataLink, DataLinkError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    type MockQueue = VecDeque<Result<Vec<u8>, DataLinkError>>;

    #[derive(Clone, Default)]
    struct MockLink {
        responses: Arc<Mutex<MockQueue>>,
        requests: Arc<Mutex<Vec<Vec<u8>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockLink {
        fn with_responses(responses: Vec<Result<Vec<u8>, DataLinkError>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                ..Self::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl DataLink for MockLink {
        async fn exchange(
            &self,
            _unit_id: u8,
            request_pdu: &[u8],
            response_pdu: &mut [u8],
        ) -> Result<usize, DataLinkError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.requests.lock().await.push(request_pdu.to_vec());
            let next = self
                .responses
                .lock()
                .await
                .pop_front()
                .ok_or(DataLinkError::InvalidResponse("no mock response"))?;
            let bytes = next?;
            response_pdu[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        }
    }

    struct StalledLink;

    #[async_trait]
    impl DataLink for StalledLink {
        async fn exchange(
            &self,
            _unit_id: u8,
            _request_pdu: &[u8],
            _response_pdu: &mut [u8],
        ) -> Result<usize, DataLinkError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn read_holding_registers_success() {
        let link = MockLink::with_responses(vec![Ok(vec![
            0x03, 0x04, 0x00, 0xEB, 0x00, 0x7D,
        ])]);
        let client = ModbusClient::new(link.clone());

        let values = client.read_holding_registers(1, 100, 2).await.unwrap();
        assert_eq!(values, vec![235, 125]);
        assert_eq!(
            link.requests.lock().await.as_slice(),
            &[vec![0x03, 0x00, 0x64, 0x00, 0x02]]
        );
    }

    #[tokio::test]
    async fn read_block_addresses_bits_absolutely() {
        let link = MockLink::with_responses(vec![Ok(vec![0x02, 0x01, 0b0000_0100])]);
        let client = ModbusClient::new(link);

        let block = client
            .read_block(1, PointKind::DiscreteInput, 8, 3)
            .await
            .unwrap();
        assert!(matches!(block, PointBlock::Bits(_)));
        assert_eq!(block.bit(10), Some(true));
        assert_eq!(block.bit(8), Some(false));
        assert_eq!(block.len(), 3);
    }

    #[tokio::test]
    async fn exception_is_mapped_and_keeps_the_link() {
        let link = MockLink::with_responses(vec![Ok(vec![0x83, 0x02])]);
        let client = ModbusClient::new(link);

        let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ClientError::Exception(_)));
        assert!(!err.breaks_link());
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        let link = MockLink::with_responses(vec![
            Err(DataLinkError::ConnectionClosed),
            Ok(vec![0x03, 0x02, 0x00, 0x2A]),
        ]);
        let client = ModbusClient::new(link.clone());

        let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::DataLink(DataLinkError::ConnectionClosed)
        ));
        assert!(err.breaks_link());
        assert_eq!(link.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_exchange_times_out() {
        let client = ModbusClient::with_config(
            StalledLink,
            ClientConfig::default().with_response_timeout(Duration::from_millis(250)),
        );
        let err = client.read_coils(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert!(err.breaks_link());
    }

    #[tokio::test]
    async fn short_bit_payload_is_rejected() {
        let link = MockLink::with_responses(vec![Ok(vec![0x01, 0x01, 0xFF])]);
        let client = ModbusClient::new(link);

        let err = client.read_coils(1, 0, 9).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("bit payload length mismatch")
        ));
    }

    #[tokio::test]
    async fn mismatched_function_is_rejected() {
        let link = MockLink::with_responses(vec![Ok(vec![0x01, 0x01, 0x01])]);
        let client = ModbusClient::new(link);

        let err = client.read_discrete_inputs(1, 0, 1).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("unexpected function response")
        ));
    }

    #[tokio::test]
    async fn write_echo_is_checked() {
        let link = MockLink::with_responses(vec![
            Ok(vec![0x05, 0x00, 0x00, 0xFF, 0x00]),
            Ok(vec![0x06, 0x00, 0x65, 0x00, 0x01]),
        ]);
        let client = ModbusClient::new(link);

        client.write_single_coil(1, 0, true).await.unwrap();
        let err = client.write_single_register(1, 101, 2).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("write single register echo mismatch")
        ));
    }

    #[tokio::test]
    async fn write_multiple_registers_sends_fc16() {
        let link = MockLink::with_responses(vec![Ok(vec![0x10, 0x00, 0xC8, 0x00, 0x02])]);
        let client = ModbusClient::new(link.clone());

        client
            .write_multiple_registers(1, 200, &[0x4148, 0x0000])
            .await
            .unwrap();
        assert_eq!(
            link.requests.lock().await[0],
            vec![0x10, 0x00, 0xC8, 0x00, 0x02, 0x04, 0x41, 0x48, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn invalid_quantity_never_reaches_the_link() {
        let link = MockLink::default();
        let client = ModbusClient::new(link.clone());

        let err = client.read_holding_registers(1, 0, 126).await.unwrap_err();
        assert!(matches!(err, ClientError::Encode(_)));
        assert!(!err.breaks_link());
        assert_eq!(link.call_count(), 0);
    }
}
