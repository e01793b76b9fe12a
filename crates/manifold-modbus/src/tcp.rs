// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus TCP protocol handler.
//!
//! One handler owns one socket. Transactions are correlated by the MBAP
//! transaction id and serialized under the transport lock, which keeps
//! deadline handling and metric updates simple.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use manifold_core::error::{HandlerError, HandlerResult};
use manifold_core::handler::ProtocolHandler;
use manifold_core::metrics::{ConnectionMetrics, ConnectionMetricsSnapshot};
use manifold_core::types::{ConnectionKind, ConnectionStatus};

use crate::frame::{self, MbapHeader, MAX_PDU_LEN, MBAP_LEN};
use crate::pdu;
use crate::transport::{read_exact, ByteTransport, MockTransport, TcpTransport};
use crate::types::ModbusTcpConfig;

/// Raw reads pull at most this many bytes per call.
const RAW_READ_LEN: usize = 256;

// =============================================================================
// ModbusTcpHandler
// =============================================================================

/// Modbus TCP client handler.
///
/// With the config's `mock` flag set, `connect` installs an in-memory mock
/// transport instead of dialing, so full round trips run without hardware.
pub struct ModbusTcpHandler {
    name: String,
    config: ModbusTcpConfig,
    transport: RwLock<Option<Box<dyn ByteTransport>>>,
    status: std::sync::RwLock<ConnectionStatus>,
    last_error: std::sync::RwLock<Option<String>>,
    metrics: Arc<ConnectionMetrics>,
    tx_counter: AtomicU16,
    cancel: CancellationToken,
}

impl ModbusTcpHandler {
    /// Creates a handler. No I/O happens until `connect`.
    pub fn new(
        name: impl Into<String>,
        config: ModbusTcpConfig,
        cancel: CancellationToken,
    ) -> HandlerResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            transport: RwLock::new(None),
            status: std::sync::RwLock::new(ConnectionStatus::Disconnected),
            last_error: std::sync::RwLock::new(None),
            metrics: Arc::new(ConnectionMetrics::new()),
            tx_counter: AtomicU16::new(0),
            cancel,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read().unwrap()
    }

    /// Returns the last error observed on this handler, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    /// Returns the configured default unit id.
    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().unwrap() = status;
    }

    fn set_last_error(&self, error: &HandlerError) {
        *self.last_error.write().unwrap() = Some(error.to_string());
    }

    async fn cancellable<T, F>(&self, fut: F) -> HandlerResult<T>
    where
        F: std::future::Future<Output = HandlerResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HandlerError::Cancelled),
            result = fut => result,
        }
    }

    /// Runs one framed transaction: send the PDU, await the matched response
    /// PDU.
    async fn transaction(&self, unit_id: u8, request_pdu: Vec<u8>) -> HandlerResult<Vec<u8>> {
        let start = Instant::now();
        let mut guard = self.transport.write().await;
        let transport = guard.as_mut().ok_or(HandlerError::NotConnected)?;

        // 16-bit counter; wraps naturally.
        let tx_id = self.tx_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        let mut request = MbapHeader::build(tx_id, unit_id, request_pdu.len())
            .encode()
            .to_vec();
        request.extend_from_slice(&request_pdu);

        transport.set_deadline(Some(Instant::now() + self.config.timeout()));

        let result = self
            .exchange(transport.as_mut(), &request, tx_id)
            .await;

        match result {
            Ok(response_pdu) => {
                self.metrics.record_latency(start.elapsed());
                Ok(response_pdu)
            }
            Err(err) => {
                self.metrics.record_error();
                self.set_last_error(&err);
                if err.closes_transport() {
                    if let Some(mut transport) = guard.take() {
                        transport.close().await.ok();
                    }
                    self.set_status(ConnectionStatus::Error);
                    tracing::warn!(
                        handler = %self.name,
                        error = %err,
                        "Transport failure, connection closed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        transport: &mut (dyn ByteTransport + '_),
        request: &[u8],
        tx_id: u16,
    ) -> HandlerResult<Vec<u8>> {
        self.cancellable(transport.write_all(request)).await?;
        self.metrics.record_write(request.len());

        let mut mbap = [0u8; MBAP_LEN];
        self.cancellable(read_exact(transport, &mut mbap)).await?;

        let header = MbapHeader::parse(&mbap)?;
        if header.transaction_id != tx_id {
            return Err(HandlerError::protocol(format!(
                "transaction id mismatch: sent {}, received {}",
                tx_id, header.transaction_id
            )));
        }
        if header.protocol_id != 0 {
            return Err(HandlerError::protocol(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }

        let pdu_len = header.pdu_len();
        if pdu_len == 0 || pdu_len > MAX_PDU_LEN {
            return Err(HandlerError::protocol(format!(
                "implausible PDU length {}",
                pdu_len
            )));
        }

        let mut response_pdu = vec![0u8; pdu_len];
        self.cancellable(read_exact(transport, &mut response_pdu))
            .await?;
        self.metrics.record_read(MBAP_LEN + pdu_len);

        frame::check_exception(&response_pdu)?;
        Ok(response_pdu)
    }

    fn count_parse_error<T>(&self, result: HandlerResult<T>) -> HandlerResult<T> {
        if let Err(ref err) = result {
            self.metrics.record_error();
            self.set_last_error(err);
        }
        result
    }

    // =========================================================================
    // Typed Operations
    // =========================================================================

    /// Reads coils (FC 0x01).
    pub async fn read_coils(
        &self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> HandlerResult<Vec<bool>> {
        let request = pdu::build_read_request(frame::FC_READ_COILS, address, quantity);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_bits_response(
            &response,
            frame::FC_READ_COILS,
            quantity,
        ))
    }

    /// Reads discrete inputs (FC 0x02).
    pub async fn read_discrete_inputs(
        &self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> HandlerResult<Vec<bool>> {
        let request = pdu::build_read_request(frame::FC_READ_DISCRETE_INPUTS, address, quantity);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_bits_response(
            &response,
            frame::FC_READ_DISCRETE_INPUTS,
            quantity,
        ))
    }

    /// Reads holding registers (FC 0x03).
    pub async fn read_holding_registers(
        &self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> HandlerResult<Vec<u16>> {
        let request = pdu::build_read_request(frame::FC_READ_HOLDING_REGISTERS, address, quantity);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_registers_response(
            &response,
            frame::FC_READ_HOLDING_REGISTERS,
            quantity,
        ))
    }

    /// Reads input registers (FC 0x04).
    pub async fn read_input_registers(
        &self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> HandlerResult<Vec<u16>> {
        let request = pdu::build_read_request(frame::FC_READ_INPUT_REGISTERS, address, quantity);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_registers_response(
            &response,
            frame::FC_READ_INPUT_REGISTERS,
            quantity,
        ))
    }

    /// Writes a single coil (FC 0x05).
    pub async fn write_single_coil(
        &self,
        unit_id: u8,
        address: u16,
        value: bool,
    ) -> HandlerResult<()> {
        let request = pdu::build_write_single_coil(address, value);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_write_single_coil_response(
            &response, address, value,
        ))
    }

    /// Writes a single holding register (FC 0x06).
    pub async fn write_single_register(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> HandlerResult<()> {
        let request = pdu::build_write_single_register(address, value);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_write_single_register_response(
            &response, address, value,
        ))
    }

    /// Writes multiple coils (FC 0x0F).
    pub async fn write_multiple_coils(
        &self,
        unit_id: u8,
        address: u16,
        values: &[bool],
    ) -> HandlerResult<()> {
        let request = pdu::build_write_multiple_coils(address, values);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_write_multiple_response(
            &response,
            frame::FC_WRITE_MULTIPLE_COILS,
            address,
            values.len() as u16,
        ))
    }

    /// Writes multiple holding registers (FC 0x10).
    pub async fn write_multiple_registers(
        &self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> HandlerResult<()> {
        let request = pdu::build_write_multiple_registers(address, values);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_write_multiple_response(
            &response,
            frame::FC_WRITE_MULTIPLE_REGISTERS,
            address,
            values.len() as u16,
        ))
    }

    /// Masks a holding register in place (FC 0x16).
    pub async fn mask_write_register(
        &self,
        unit_id: u8,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> HandlerResult<()> {
        let request = pdu::build_mask_write_register(address, and_mask, or_mask);
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_mask_write_response(
            &response, address, and_mask, or_mask,
        ))
    }

    /// Reads and writes registers in one transaction (FC 0x17).
    pub async fn read_write_multiple_registers(
        &self,
        unit_id: u8,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        write_values: &[u16],
    ) -> HandlerResult<Vec<u16>> {
        let request = pdu::build_read_write_multiple_registers(
            read_address,
            read_quantity,
            write_address,
            write_values,
        );
        let response = self.transaction(unit_id, request).await?;
        self.count_parse_error(pdu::parse_read_write_response(&response, read_quantity))
    }

    #[cfg(test)]
    pub(crate) async fn install_transport(&self, transport: Box<dyn ByteTransport>) {
        *self.transport.write().await = Some(transport);
        self.set_status(ConnectionStatus::Connected);
    }
}

// =============================================================================
// ProtocolHandler Implementation
// =============================================================================

#[async_trait]
impl ProtocolHandler for ModbusTcpHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectionKind {
        ConnectionKind::ModbusTcp
    }

    async fn connect(&self) -> HandlerResult<()> {
        let mut guard = self.transport.write().await;
        if guard.is_some() {
            return Ok(());
        }

        self.set_status(ConnectionStatus::Connecting);

        let transport: Box<dyn ByteTransport> = if self.config.mock {
            tracing::info!(handler = %self.name, mode = "mock", "Modbus TCP connection created");
            Box::new(MockTransport::tcp())
        } else {
            let addr = self.config.socket_addr();
            let connected = self
                .cancellable(TcpTransport::connect(&addr, self.config.timeout()))
                .await;
            match connected {
                Ok(transport) => {
                    tracing::info!(
                        handler = %self.name,
                        address = %addr,
                        "Modbus TCP connection established"
                    );
                    Box::new(transport)
                }
                Err(err) => {
                    self.set_status(ConnectionStatus::Error);
                    self.set_last_error(&err);
                    return Err(err);
                }
            }
        };

        *guard = Some(transport);
        self.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> HandlerResult<()> {
        let mut guard = self.transport.write().await;
        if let Some(mut transport) = guard.take() {
            if let Err(err) = transport.close().await {
                tracing::warn!(handler = %self.name, error = %err, "Error closing transport");
            }
            tracing::info!(handler = %self.name, "Modbus TCP connection closed");
        }
        self.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    async fn read_raw(&self) -> HandlerResult<Vec<u8>> {
        let mut guard = self.transport.write().await;
        let transport = guard.as_mut().ok_or(HandlerError::NotConnected)?;

        transport.set_deadline(Some(Instant::now() + self.config.timeout()));

        let mut buf = vec![0u8; RAW_READ_LEN];
        let result = self.cancellable(transport.read_into(&mut buf)).await;

        match result {
            Ok(0) => {
                let err = HandlerError::transport("connection closed by peer");
                self.metrics.record_error();
                self.set_last_error(&err);
                if let Some(mut transport) = guard.take() {
                    transport.close().await.ok();
                }
                self.set_status(ConnectionStatus::Error);
                Err(err)
            }
            Ok(n) => {
                self.metrics.record_read(n);
                buf.truncate(n);
                Ok(buf)
            }
            Err(err) => {
                self.metrics.record_error();
                self.set_last_error(&err);
                if err.closes_transport() {
                    if let Some(mut transport) = guard.take() {
                        transport.close().await.ok();
                    }
                    self.set_status(ConnectionStatus::Error);
                }
                Err(err)
            }
        }
    }

    async fn write_raw(&self, data: &[u8]) -> HandlerResult<()> {
        if data.is_empty() {
            return Err(HandlerError::protocol("cannot write empty data"));
        }

        let mut guard = self.transport.write().await;
        let transport = guard.as_mut().ok_or(HandlerError::NotConnected)?;

        transport.set_deadline(Some(Instant::now() + self.config.timeout()));

        match self.cancellable(transport.write_all(data)).await {
            Ok(()) => {
                self.metrics.record_write(data.len());
                Ok(())
            }
            Err(err) => {
                self.metrics.record_error();
                self.set_last_error(&err);
                if err.closes_transport() {
                    if let Some(mut transport) = guard.take() {
                        transport.close().await.ok();
                    }
                    self.set_status(ConnectionStatus::Error);
                }
                Err(err)
            }
        }
    }

    fn metrics(&self) -> ConnectionMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for ModbusTcpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusTcpHandler")
            .field("name", &self.name)
            .field("address", &self.config.socket_addr())
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EXC_ILLEGAL_DATA_ADDRESS;
    use std::time::Duration;

    fn mock_handler() -> ModbusTcpHandler {
        let config = ModbusTcpConfig::new("mock", 502)
            .with_timeout(Duration::from_secs(2))
            .with_mock();
        ModbusTcpHandler::new("bench-plc", config, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_mock_holding_register_round_trip() {
        let handler = mock_handler();
        handler.connect().await.unwrap();

        let values = handler.read_holding_registers(1, 0, 2).await.unwrap();
        assert_eq!(values, vec![10, 20]);

        let snap = handler.metrics();
        assert_eq!(snap.write_count, 1);
        assert_eq!(snap.read_count, 1);
        assert_eq!(snap.error_count, 0);
        assert!(snap.bytes_written > 0);
    }

    #[tokio::test]
    async fn test_mock_full_function_set() {
        let handler = mock_handler();
        handler.connect().await.unwrap();

        let coils = handler.read_coils(1, 0, 10).await.unwrap();
        assert_eq!(coils.len(), 10);
        assert!(coils[0] && !coils[1]);

        let inputs = handler.read_discrete_inputs(1, 0, 3).await.unwrap();
        assert_eq!(inputs, vec![true, false, true]);

        let regs = handler.read_input_registers(1, 100, 3).await.unwrap();
        assert_eq!(regs, vec![10, 20, 30]);

        handler.write_single_coil(1, 5, true).await.unwrap();
        handler.write_single_register(1, 5, 0xABCD).await.unwrap();
        handler
            .write_multiple_coils(1, 0, &[true, true, false])
            .await
            .unwrap();
        handler
            .write_multiple_registers(1, 0, &[1, 2, 3])
            .await
            .unwrap();
        handler
            .mask_write_register(1, 4, 0x00F2, 0x0025)
            .await
            .unwrap();

        let read_back = handler
            .read_write_multiple_registers(1, 0, 2, 10, &[7, 8])
            .await
            .unwrap();
        assert_eq!(read_back, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_transaction_ids_increment() {
        let handler = mock_handler();
        let transport = MockTransport::tcp();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;

        handler.read_holding_registers(1, 0, 1).await.unwrap();
        handler.read_holding_registers(1, 0, 1).await.unwrap();

        let frames = mock.written_frames();
        let first = MbapHeader::parse(&frames[0]).unwrap();
        let second = MbapHeader::parse(&frames[1]).unwrap();
        assert_eq!(first.transaction_id, 1);
        assert_eq!(second.transaction_id, 2);
    }

    #[tokio::test]
    async fn test_transaction_id_mismatch_is_protocol_error() {
        let handler = mock_handler();
        let transport = MockTransport::tcp();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;

        // A stale response with the wrong transaction id arrives first.
        let stale = MbapHeader::build(0x0999, 1, 2);
        let mut bytes = stale.encode().to_vec();
        bytes.extend_from_slice(&[0x03, 0x00]);
        mock.push_response(&bytes);

        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Protocol { .. }));
        assert!(err.to_string().contains("transaction id mismatch"));

        // Protocol errors do not close the transport.
        assert!(handler.is_connected());
        assert!(!mock.is_closed());
        assert_eq!(handler.metrics().error_count, 1);
    }

    #[tokio::test]
    async fn test_exception_response_surfaces() {
        let handler = mock_handler();
        let transport = MockTransport::tcp();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;

        let header = MbapHeader::build(1, 1, 2);
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[0x83, EXC_ILLEGAL_DATA_ADDRESS]);
        mock.push_response(&bytes);
        mock.mute();

        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        match err {
            HandlerError::Exception {
                function_code,
                exception_code,
            } => {
                assert_eq!(function_code, 0x03);
                assert_eq!(exception_code, EXC_ILLEGAL_DATA_ADDRESS);
            }
            other => panic!("expected Exception, got {:?}", other),
        }

        // Exceptions leave the transport open.
        assert!(handler.is_connected());
        assert!(!mock.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_transport_open() {
        let handler = mock_handler();
        let transport = MockTransport::tcp();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.mute();

        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { .. }));
        assert!(handler.is_connected());
        assert!(!mock.is_closed());
        assert_eq!(handler.metrics().error_count, 1);
    }

    #[tokio::test]
    async fn test_transport_error_closes_connection() {
        let handler = mock_handler();
        let transport = MockTransport::tcp();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.fail_next_write();

        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transport { .. }));
        assert!(!handler.is_connected());
        assert_eq!(handler.status(), ConnectionStatus::Error);
        assert!(handler.last_error().unwrap().contains("injected"));
        assert!(mock.is_closed());

        // Further operations fail fast.
        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotConnected));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_transaction() {
        let cancel = CancellationToken::new();
        let config = ModbusTcpConfig::new("mock", 502).with_mock();
        let handler = ModbusTcpHandler::new("plc", config, cancel.clone()).unwrap();
        handler.connect().await.unwrap();
        cancel.cancel();

        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Cancelled));
    }

    #[tokio::test]
    async fn test_not_connected_before_connect() {
        let handler = mock_handler();
        let err = handler.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let handler = mock_handler();
        handler.connect().await.unwrap();
        handler.disconnect().await.unwrap();
        handler.disconnect().await.unwrap();
        assert_eq!(handler.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_write_raw_rejects_empty() {
        let handler = mock_handler();
        handler.connect().await.unwrap();
        let err = handler.write_raw(&[]).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
