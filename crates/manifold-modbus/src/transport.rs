// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte-oriented transports for Modbus handlers.
//!
//! [`ByteTransport`] is a narrow full-duplex channel with deadline-based
//! timeouts: the handler arms a deadline once per transaction and every
//! read/write under it shares the same clock, so composed operations never
//! reset it.
//!
//! Three realizations: TCP sockets, serial ports, and an in-memory mock that
//! synthesizes canonical success responses per function code so full round
//! trips run without hardware.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use manifold_core::error::{HandlerError, HandlerResult};

use crate::frame::{self, MbapHeader};
use crate::pdu;
use crate::types::ModbusRtuConfig;

// =============================================================================
// ByteTransport Trait
// =============================================================================

/// A byte-oriented full-duplex channel with deadline-based timeouts.
#[async_trait]
pub trait ByteTransport: Send + Sync {
    /// Writes the whole buffer.
    async fn write_all(&mut self, buf: &[u8]) -> HandlerResult<()>;

    /// Reads into `buf`, returning the number of bytes read. `Ok(0)` means
    /// the peer closed the channel.
    async fn read_into(&mut self, buf: &mut [u8]) -> HandlerResult<usize>;

    /// Closes the channel. Safe to call once; the transport is unusable
    /// afterwards.
    async fn close(&mut self) -> HandlerResult<()>;

    /// Arms (or clears) the deadline applied to subsequent reads and writes.
    fn set_deadline(&mut self, deadline: Option<Instant>);
}

/// Reads exactly `buf.len()` bytes via repeated [`ByteTransport::read_into`].
///
/// # Errors
///
/// [`HandlerError::Transport`] if the channel closes mid-read; whatever the
/// transport surfaces otherwise (timeouts included).
pub async fn read_exact(
    transport: &mut (dyn ByteTransport + '_),
    buf: &mut [u8],
) -> HandlerResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = transport.read_into(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(HandlerError::transport("connection closed mid-read"));
        }
        filled += n;
    }
    Ok(())
}

// =============================================================================
// Deadline
// =============================================================================

/// Tracks the armed deadline and the budget it was armed with (for error
/// reporting).
#[derive(Debug, Clone, Copy, Default)]
struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    fn arm(&mut self, deadline: Option<Instant>) {
        self.budget = deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        self.at = deadline;
    }

    fn timeout_error(&self) -> HandlerError {
        HandlerError::timeout(self.budget)
    }

    /// Runs an I/O future under the armed deadline.
    async fn run<T, F>(&self, fut: F) -> HandlerResult<T>
    where
        F: std::future::Future<Output = io::Result<T>>,
    {
        match self.at {
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result.map_err(io_error),
                Err(_) => Err(self.timeout_error()),
            },
            None => fut.await.map_err(io_error),
        }
    }
}

fn io_error(err: io::Error) -> HandlerError {
    HandlerError::transport_with(err.kind().to_string(), err)
}

// =============================================================================
// TcpTransport
// =============================================================================

/// TCP socket transport.
pub struct TcpTransport {
    stream: TcpStream,
    deadline: Deadline,
}

impl TcpTransport {
    /// Connects to `addr` within `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> HandlerResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| HandlerError::timeout(timeout))?
            .map_err(|e| {
                HandlerError::transport_with(format!("failed to connect to {}", addr), e)
            })?;

        stream.set_nodelay(true).ok();

        Ok(Self {
            stream,
            deadline: Deadline::default(),
        })
    }
}

#[async_trait]
impl ByteTransport for TcpTransport {
    async fn write_all(&mut self, buf: &[u8]) -> HandlerResult<()> {
        self.deadline.run(self.stream.write_all(buf)).await
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> HandlerResult<usize> {
        self.deadline.run(self.stream.read(buf)).await
    }

    async fn close(&mut self) -> HandlerResult<()> {
        self.stream.shutdown().await.map_err(io_error)
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline.arm(deadline);
    }
}

// =============================================================================
// SerialTransport
// =============================================================================

/// Serial port transport, configured once from [`ModbusRtuConfig`].
pub struct SerialTransport {
    port: SerialStream,
    deadline: Deadline,
}

impl SerialTransport {
    /// Opens the serial device described by `config`.
    pub fn open(config: &ModbusRtuConfig) -> HandlerResult<Self> {
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(config.serial_data_bits()?)
            .parity(config.parity.to_serial()?)
            .stop_bits(config.serial_stop_bits()?)
            .open_native_async()
            .map_err(|e| {
                HandlerError::transport_with(
                    format!("failed to open serial port {}", config.port),
                    e,
                )
            })?;

        Ok(Self {
            port,
            deadline: Deadline::default(),
        })
    }
}

#[async_trait]
impl ByteTransport for SerialTransport {
    async fn write_all(&mut self, buf: &[u8]) -> HandlerResult<()> {
        self.deadline.run(self.port.write_all(buf)).await
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> HandlerResult<usize> {
        self.deadline.run(self.port.read(buf)).await
    }

    async fn close(&mut self) -> HandlerResult<()> {
        // Dropping the stream releases the file descriptor; flush what we can.
        self.port.flush().await.ok();
        Ok(())
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline.arm(deadline);
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// Framing mode the mock speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// MBAP framing; responses echo the request transaction id.
    Tcp,
    /// RTU framing; responses carry a valid CRC trailer.
    Rtu,
}

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    closed: bool,
    muted: bool,
    fail_next_read: bool,
    fail_next_write: bool,
}

/// In-memory transport for deterministic tests.
///
/// Every written request frame is recorded and answered with a canonical
/// success response for its function code (register reads return
/// `10, 20, 30, ...`; coil reads return alternating bits; writes echo). A
/// read with nothing pending waits for the armed deadline and reports
/// `Timeout` - it never spins on zero-length reads.
pub struct MockTransport {
    mode: MockMode,
    state: Arc<Mutex<MockState>>,
    deadline: Deadline,
}

impl MockTransport {
    /// Creates a mock speaking MBAP framing.
    pub fn tcp() -> Self {
        Self::new(MockMode::Tcp)
    }

    /// Creates a mock speaking RTU framing.
    pub fn rtu() -> Self {
        Self::new(MockMode::Rtu)
    }

    fn new(mode: MockMode) -> Self {
        Self {
            mode,
            state: Arc::new(Mutex::new(MockState::default())),
            deadline: Deadline::default(),
        }
    }

    /// Returns a handle for inspecting and steering the mock from tests.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn synthesize(&self, frame_bytes: &[u8]) -> Option<Vec<u8>> {
        match self.mode {
            MockMode::Tcp => {
                let header = MbapHeader::parse(frame_bytes).ok()?;
                let request_pdu = frame_bytes.get(frame::MBAP_LEN..)?;
                let response_pdu = canonical_response(request_pdu)?;

                let response_header = MbapHeader {
                    transaction_id: header.transaction_id,
                    protocol_id: 0,
                    length: response_pdu.len() as u16 + 1,
                    unit_id: header.unit_id,
                };

                let mut out = response_header.encode().to_vec();
                out.extend_from_slice(&response_pdu);
                Some(out)
            }
            MockMode::Rtu => {
                let (unit_id, request_pdu) = frame::split_rtu_frame(frame_bytes).ok()?;
                let response_pdu = canonical_response(request_pdu)?;
                Some(frame::build_rtu_frame(unit_id, &response_pdu))
            }
        }
    }
}

#[async_trait]
impl ByteTransport for MockTransport {
    async fn write_all(&mut self, buf: &[u8]) -> HandlerResult<()> {
        let response = self.synthesize(buf);

        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(HandlerError::transport("mock transport closed"));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(HandlerError::transport("injected write failure"));
        }

        state.written.push(buf.to_vec());
        if !state.muted {
            if let Some(response) = response {
                state.queue.extend(response);
            }
        }
        Ok(())
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> HandlerResult<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(HandlerError::transport("mock transport closed"));
            }
            if state.fail_next_read {
                state.fail_next_read = false;
                return Err(HandlerError::transport("injected read failure"));
            }
            if !state.queue.is_empty() {
                let n = buf.len().min(state.queue.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.queue.pop_front().unwrap();
                }
                return Ok(n);
            }
        }

        // Nothing pending: park until the deadline, then time out.
        if let Some(at) = self.deadline.at {
            tokio::time::sleep_until(at).await;
        }
        Err(self.deadline.timeout_error())
    }

    async fn close(&mut self) -> HandlerResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline.arm(deadline);
    }
}

/// Shared inspection/steering handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Returns every frame written so far.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    /// Queues raw bytes to be returned by subsequent reads, ahead of any
    /// synthesized responses.
    pub fn push_response(&self, bytes: &[u8]) {
        self.state.lock().unwrap().queue.extend(bytes.iter().copied());
    }

    /// Drops any queued response bytes.
    pub fn clear_responses(&self) {
        self.state.lock().unwrap().queue.clear();
    }

    /// Stops synthesizing responses; subsequent reads run into the deadline.
    pub fn mute(&self) {
        self.state.lock().unwrap().muted = true;
    }

    /// Makes the next read fail with a transport error.
    pub fn fail_next_read(&self) {
        self.state.lock().unwrap().fail_next_read = true;
    }

    /// Makes the next write fail with a transport error.
    pub fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_next_write = true;
    }

    /// Returns `true` once the transport was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// The canonical success response PDU for a request PDU.
fn canonical_response(request_pdu: &[u8]) -> Option<Vec<u8>> {
    if request_pdu.is_empty() {
        return None;
    }

    let fc = request_pdu[0];
    match fc {
        frame::FC_READ_COILS | frame::FC_READ_DISCRETE_INPUTS => {
            let quantity = u16::from_be_bytes([*request_pdu.get(3)?, *request_pdu.get(4)?]);
            let bits: Vec<bool> = (0..quantity as usize).map(|i| i % 2 == 0).collect();
            let packed = pdu::pack_coils(&bits);
            let mut out = vec![fc, packed.len() as u8];
            out.extend_from_slice(&packed);
            Some(out)
        }
        frame::FC_READ_HOLDING_REGISTERS | frame::FC_READ_INPUT_REGISTERS => {
            let quantity = u16::from_be_bytes([*request_pdu.get(3)?, *request_pdu.get(4)?]);
            let mut out = vec![fc, (quantity * 2) as u8];
            for i in 0..quantity {
                out.extend_from_slice(&(10 * (i + 1)).to_be_bytes());
            }
            Some(out)
        }
        frame::FC_WRITE_SINGLE_COIL | frame::FC_WRITE_SINGLE_REGISTER => {
            (request_pdu.len() >= 5).then(|| request_pdu[..5].to_vec())
        }
        frame::FC_WRITE_MULTIPLE_COILS | frame::FC_WRITE_MULTIPLE_REGISTERS => {
            (request_pdu.len() >= 5).then(|| request_pdu[..5].to_vec())
        }
        frame::FC_MASK_WRITE_REGISTER => (request_pdu.len() >= 7).then(|| request_pdu[..7].to_vec()),
        frame::FC_READ_WRITE_MULTIPLE_REGISTERS => {
            let read_quantity = u16::from_be_bytes([*request_pdu.get(3)?, *request_pdu.get(4)?]);
            let mut out = vec![fc, (read_quantity * 2) as u8];
            for i in 0..read_quantity {
                out.extend_from_slice(&(10 * (i + 1)).to_be_bytes());
            }
            Some(out)
        }
        _ => Some(vec![fc | frame::EXCEPTION_BIT, frame::EXC_ILLEGAL_FUNCTION]),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::build_read_request;

    #[tokio::test]
    async fn test_mock_tcp_round_trip() {
        let mut transport = MockTransport::tcp();
        let request_pdu = build_read_request(frame::FC_READ_HOLDING_REGISTERS, 0, 2);
        let header = MbapHeader::build(7, 1, request_pdu.len());

        let mut request = header.encode().to_vec();
        request.extend_from_slice(&request_pdu);
        transport.write_all(&request).await.unwrap();

        let mut mbap = [0u8; frame::MBAP_LEN];
        read_exact(&mut transport, &mut mbap).await.unwrap();
        let response_header = MbapHeader::parse(&mbap).unwrap();
        assert_eq!(response_header.transaction_id, 7);
        assert_eq!(response_header.unit_id, 1);

        let mut response_pdu = vec![0u8; response_header.pdu_len()];
        read_exact(&mut transport, &mut response_pdu).await.unwrap();
        assert_eq!(response_pdu, vec![0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]);
    }

    #[tokio::test]
    async fn test_mock_rtu_round_trip_with_valid_crc() {
        let mut transport = MockTransport::rtu();
        let request_pdu = build_read_request(frame::FC_READ_HOLDING_REGISTERS, 0, 1);
        let request = frame::build_rtu_frame(0x11, &request_pdu);
        transport.write_all(&request).await.unwrap();

        let mut response = vec![0u8; 7];
        read_exact(&mut transport, &mut response).await.unwrap();

        let (unit, response_pdu) = frame::split_rtu_frame(&response).unwrap();
        assert_eq!(unit, 0x11);
        assert_eq!(response_pdu, &[0x03, 0x02, 0x00, 0x0A]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_idle_read_times_out_at_deadline() {
        let mut transport = MockTransport::tcp();
        transport.set_deadline(Some(Instant::now() + Duration::from_secs(3)));

        let mut buf = [0u8; 16];
        let started = Instant::now();
        let err = transport.read_into(&mut buf).await.unwrap_err();

        assert!(matches!(err, HandlerError::Timeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_mock_close_and_error_injection() {
        let mut transport = MockTransport::tcp();
        let handle = transport.handle();

        handle.fail_next_write();
        let err = transport.write_all(&[0u8; 8]).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transport { .. }));

        transport.close().await.unwrap();
        assert!(handle.is_closed());
        let err = transport.write_all(&[0u8; 8]).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_mock_records_written_frames() {
        let mut transport = MockTransport::rtu();
        let handle = transport.handle();

        let request = frame::build_rtu_frame(1, &build_read_request(0x01, 0, 8));
        transport.write_all(&request).await.unwrap();

        let written = handle.written_frames();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], request);
    }

    #[tokio::test]
    async fn test_mock_injected_response_takes_priority() {
        let mut transport = MockTransport::tcp();
        let handle = transport.handle();
        handle.push_response(&[0xDE, 0xAD]);

        let mut buf = [0u8; 2];
        read_exact(&mut transport, &mut buf).await.unwrap();
        assert_eq!(buf, [0xDE, 0xAD]);
    }

    #[test]
    fn test_canonical_response_unknown_fc_is_exception() {
        let response = canonical_response(&[0x2B, 0x00]).unwrap();
        assert_eq!(response, vec![0x2B | 0x80, frame::EXC_ILLEGAL_FUNCTION]);
    }

    #[test]
    fn test_canonical_coils_alternate() {
        let response = canonical_response(&build_read_request(0x01, 0, 4)).unwrap();
        // Bits 1,0,1,0 LSB-first = 0b0101.
        assert_eq!(response, vec![0x01, 0x01, 0x05]);
    }
}
