// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus RTU protocol handler.
//!
//! RTU has no transaction id; correlation is by arrival order on a
//! half-duplex single-master bus. The handler holds the transport lock for
//! the entire send-then-receive exchange, so requests on one port never
//! overlap.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use manifold_core::error::{HandlerError, HandlerResult};
use manifold_core::handler::ProtocolHandler;
use manifold_core::metrics::{ConnectionMetrics, ConnectionMetricsSnapshot};
use manifold_core::types::{ConnectionKind, ConnectionStatus};

use crate::frame::{self, MAX_RTU_FRAME_LEN};
use crate::pdu;
use crate::transport::{ByteTransport, MockTransport, SerialTransport};
use crate::types::ModbusRtuConfig;

/// Raw reads pull at most this many bytes per call.
const RAW_READ_LEN: usize = 256;

// =============================================================================
// ModbusRtuHandler
// =============================================================================

/// Modbus RTU client handler over a serial line.
///
/// With the config's `mock` flag set, `connect` installs an in-memory mock
/// port instead of opening the device.
pub struct ModbusRtuHandler {
    name: String,
    config: ModbusRtuConfig,
    transport: RwLock<Option<Box<dyn ByteTransport>>>,
    status: std::sync::RwLock<ConnectionStatus>,
    last_error: std::sync::RwLock<Option<String>>,
    metrics: Arc<ConnectionMetrics>,
    cancel: CancellationToken,
}

impl ModbusRtuHandler {
    /// Creates a handler. No I/O happens until `connect`.
    pub fn new(
        name: impl Into<String>,
        config: ModbusRtuConfig,
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
            cancel,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ModbusRtuConfig {
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

    /// Runs one framed transaction, holding the transport lock across the
    /// whole exchange.
    async fn transaction(&self, unit_id: u8, request_pdu: Vec<u8>) -> HandlerResult<Vec<u8>> {
        let start = Instant::now();
        let mut guard = self.transport.write().await;
        let transport = guard.as_mut().ok_or(HandlerError::NotConnected)?;

        let request = frame::build_rtu_frame(unit_id, &request_pdu);
        transport.set_deadline(Some(Instant::now() + self.config.timeout()));

        let result = self.exchange(transport.as_mut(), &request, unit_id).await;

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

    /// Sends the frame and accumulates the response until the
    /// function-code-dispatched expected length is reached or the deadline
    /// expires.
    async fn exchange(
        &self,
        transport: &mut (dyn ByteTransport + '_),
        request: &[u8],
        unit_id: u8,
    ) -> HandlerResult<Vec<u8>> {
        self.cancellable(transport.write_all(request)).await?;
        self.metrics.record_write(request.len());

        let mut buf = BytesMut::with_capacity(MAX_RTU_FRAME_LEN);
        let mut chunk = [0u8; MAX_RTU_FRAME_LEN];

        let expected = loop {
            let n = self.cancellable(transport.read_into(&mut chunk)).await?;
            if n == 0 {
                return Err(HandlerError::transport("serial line closed mid-read"));
            }
            buf.extend_from_slice(&chunk[..n]);

            if buf.len() < 3 {
                continue;
            }
            match frame::rtu_response_len(&buf) {
                Some(expected) if buf.len() >= expected => break expected,
                Some(_) => continue,
                None => {
                    return Err(HandlerError::protocol(format!(
                        "unrecognized function code echo {:#04x}",
                        buf[1]
                    )))
                }
            }
        };

        if buf.len() > expected {
            tracing::debug!(
                handler = %self.name,
                extra = buf.len() - expected,
                "Discarding trailing bytes after RTU frame"
            );
        }
        self.metrics.record_read(buf.len());

        let (echo_unit, response_pdu) = frame::split_rtu_frame(&buf[..expected])?;
        if echo_unit != unit_id {
            return Err(HandlerError::protocol(format!(
                "unit id mismatch: sent {}, received {}",
                unit_id, echo_unit
            )));
        }

        frame::check_exception(response_pdu)?;
        Ok(response_pdu.to_vec())
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
impl ProtocolHandler for ModbusRtuHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectionKind {
        ConnectionKind::ModbusRtu
    }

    async fn connect(&self) -> HandlerResult<()> {
        let mut guard = self.transport.write().await;
        if guard.is_some() {
            return Ok(());
        }

        self.set_status(ConnectionStatus::Connecting);

        let transport: Box<dyn ByteTransport> = if self.config.mock {
            tracing::info!(handler = %self.name, mode = "mock", "Modbus RTU mock port created");
            Box::new(MockTransport::rtu())
        } else {
            match SerialTransport::open(&self.config) {
                Ok(transport) => {
                    tracing::info!(
                        handler = %self.name,
                        port = %self.config.port,
                        baud = self.config.baud_rate,
                        "Modbus RTU connection established"
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
                tracing::warn!(handler = %self.name, error = %err, "Error closing serial port");
            }
            tracing::info!(handler = %self.name, "Modbus RTU connection closed");
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
                let err = HandlerError::transport("serial line closed");
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

impl std::fmt::Debug for ModbusRtuHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuHandler")
            .field("name", &self.name)
            .field("port", &self.config.port)
            .field("baud", &self.config.baud_rate)
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
    use crate::frame::EXC_SERVER_DEVICE_BUSY;
    use crate::types::Parity;
    use std::time::Duration;

    fn mock_handler() -> ModbusRtuHandler {
        let config = ModbusRtuConfig::new("/dev/null")
            .with_timeout(Duration::from_millis(500))
            .with_mock();
        ModbusRtuHandler::new("flow-meter", config, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_mock_round_trip_validates_crc() {
        let handler = mock_handler();
        handler.connect().await.unwrap();

        let values = handler.read_holding_registers(0x11, 0, 2).await.unwrap();
        assert_eq!(values, vec![10, 20]);

        let snap = handler.metrics();
        assert_eq!(snap.write_count, 1);
        assert_eq!(snap.read_count, 1);
        assert_eq!(snap.error_count, 0);
    }

    #[tokio::test]
    async fn test_mock_write_operations() {
        let handler = mock_handler();
        handler.connect().await.unwrap();

        handler.write_single_coil(1, 10, true).await.unwrap();
        handler.write_single_register(1, 10, 99).await.unwrap();
        handler
            .write_multiple_registers(1, 0, &[5, 6])
            .await
            .unwrap();
        handler
            .write_multiple_coils(1, 0, &[false, true])
            .await
            .unwrap();
        handler.mask_write_register(1, 2, 0xFF00, 0x00FF).await.unwrap();
    }

    #[tokio::test]
    async fn test_crc_mismatch_keeps_transport_open() {
        let handler = mock_handler();
        let transport = MockTransport::rtu();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.mute();

        // A frame whose trailer does not match its payload.
        let mut corrupt = frame::build_rtu_frame(0x01, &[0x03, 0x02, 0x00, 0x0A]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x55;
        mock.push_response(&corrupt);

        let err = handler.read_holding_registers(0x01, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Crc { .. }));
        assert!(handler.is_connected());
        assert!(!mock.is_closed());
        assert_eq!(handler.metrics().error_count, 1);
    }

    #[tokio::test]
    async fn test_exception_frame() {
        let handler = mock_handler();
        let transport = MockTransport::rtu();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.mute();
        mock.push_response(&frame::build_rtu_frame(
            0x01,
            &[0x83, EXC_SERVER_DEVICE_BUSY],
        ));

        let err = handler.read_holding_registers(0x01, 0, 1).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Exception {
                function_code: 0x03,
                exception_code: EXC_SERVER_DEVICE_BUSY,
            }
        ));
        assert!(handler.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_bus_times_out() {
        let handler = mock_handler();
        let transport = MockTransport::rtu();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.mute();

        let err = handler.read_holding_registers(0x01, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { .. }));
        assert!(handler.is_connected());
    }

    #[tokio::test]
    async fn test_unit_id_mismatch() {
        let handler = mock_handler();
        let transport = MockTransport::rtu();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.mute();
        mock.push_response(&frame::build_rtu_frame(0x22, &[0x03, 0x02, 0x00, 0x0A]));

        let err = handler.read_holding_registers(0x01, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Protocol { .. }));
        assert!(err.to_string().contains("unit id mismatch"));
    }

    #[tokio::test]
    async fn test_unknown_function_echo() {
        let handler = mock_handler();
        let transport = MockTransport::rtu();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.mute();
        mock.push_response(&frame::build_rtu_frame(0x01, &[0x2B, 0x00, 0x00]));

        let err = handler.read_holding_registers(0x01, 0, 1).await.unwrap_err();
        assert!(err.to_string().contains("unrecognized function code"));
    }

    #[tokio::test]
    async fn test_write_failure_closes_port() {
        let handler = mock_handler();
        let transport = MockTransport::rtu();
        let mock = transport.handle();
        handler.install_transport(Box::new(transport)).await;
        mock.fail_next_write();

        let err = handler.write_single_register(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transport { .. }));
        assert_eq!(handler.status(), ConnectionStatus::Error);
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let config = ModbusRtuConfig::new("/dev/null").with_mock();
        let handler = ModbusRtuHandler::new("meter", config, cancel.clone()).unwrap();
        handler.connect().await.unwrap();
        cancel.cancel();

        let err = handler.read_coils(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, HandlerError::Cancelled));
    }

    #[tokio::test]
    async fn test_mark_parity_rejected_at_connect() {
        let config = ModbusRtuConfig::new("/dev/ttyS0").with_parity(Parity::Mark);
        let handler =
            ModbusRtuHandler::new("legacy-meter", config, CancellationToken::new()).unwrap();

        let err = handler.connect().await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidConfig { .. }));
        assert_eq!(handler.status(), ConnectionStatus::Error);
    }
}
