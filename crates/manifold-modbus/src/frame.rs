// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus framing: MBAP headers, RTU frames, CRC-16, exception decoding.
//!
//! Pure functions over byte buffers. No I/O, no state. All multi-byte fields
//! are big-endian on the wire except the RTU trailing CRC, which is
//! little-endian.

use manifold_core::error::{HandlerError, HandlerResult};

// =============================================================================
// Constants
// =============================================================================

/// Read Coils.
pub const FC_READ_COILS: u8 = 0x01;
/// Read Discrete Inputs.
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// Read Holding Registers.
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Read Input Registers.
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Write Single Coil.
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Write Single Register.
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Write Multiple Coils.
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
/// Write Multiple Registers.
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
/// Mask Write Register.
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;
/// Read/Write Multiple Registers.
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

/// High bit set on the echoed function code marks an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

/// Illegal Function.
pub const EXC_ILLEGAL_FUNCTION: u8 = 0x01;
/// Illegal Data Address.
pub const EXC_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
/// Illegal Data Value.
pub const EXC_ILLEGAL_DATA_VALUE: u8 = 0x03;
/// Server Device Failure.
pub const EXC_SERVER_DEVICE_FAILURE: u8 = 0x04;
/// Acknowledge.
pub const EXC_ACKNOWLEDGE: u8 = 0x05;
/// Server Device Busy.
pub const EXC_SERVER_DEVICE_BUSY: u8 = 0x06;
/// Memory Parity Error.
pub const EXC_MEMORY_PARITY_ERROR: u8 = 0x08;

/// MBAP header size in bytes.
pub const MBAP_LEN: usize = 7;

/// Maximum PDU size (function code + data).
pub const MAX_PDU_LEN: usize = 253;

/// Maximum Modbus TCP frame (MBAP + PDU).
pub const MAX_TCP_FRAME_LEN: usize = MBAP_LEN + MAX_PDU_LEN;

/// Maximum Modbus RTU frame (unit id + PDU + CRC).
pub const MAX_RTU_FRAME_LEN: usize = 256;

/// Returns the standard name of a Modbus exception code.
pub fn exception_name(code: u8) -> &'static str {
    match code {
        EXC_ILLEGAL_FUNCTION => "illegal function",
        EXC_ILLEGAL_DATA_ADDRESS => "illegal data address",
        EXC_ILLEGAL_DATA_VALUE => "illegal data value",
        EXC_SERVER_DEVICE_FAILURE => "server device failure",
        EXC_ACKNOWLEDGE => "acknowledge",
        EXC_SERVER_DEVICE_BUSY => "server device busy",
        EXC_MEMORY_PARITY_ERROR => "memory parity error",
        _ => "unknown exception",
    }
}

// =============================================================================
// CRC-16
// =============================================================================

/// Computes the Modbus CRC-16 (seed 0xFFFF, polynomial 0xA001 reflected).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Returns `true` if `expected` is the CRC-16 of `data`.
pub fn validate_crc(data: &[u8], expected: u16) -> bool {
    crc16(data) == expected
}

// =============================================================================
// MBAP Header
// =============================================================================

/// The 7-byte Modbus Application Protocol header carried over TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction correlator echoed by the server.
    pub transaction_id: u16,
    /// Always 0 for Modbus.
    pub protocol_id: u16,
    /// Remaining byte count: unit id + PDU.
    pub length: u16,
    /// Device address on a multi-drop bus.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Builds a header for a PDU of `pdu_len` bytes. The length field counts
    /// the unit id, hence `pdu_len + 1`.
    pub fn build(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_len as u16 + 1,
            unit_id,
        }
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; MBAP_LEN] {
        let mut buf = [0u8; MBAP_LEN];
        buf[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6] = self.unit_id;
        buf
    }

    /// Parses a header from the first 7 bytes of `buf`.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Protocol`] if `buf` is shorter than 7 bytes.
    pub fn parse(buf: &[u8]) -> HandlerResult<Self> {
        if buf.len() < MBAP_LEN {
            return Err(HandlerError::protocol(format!(
                "buffer too short for MBAP header: {} bytes",
                buf.len()
            )));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        })
    }

    /// The PDU length implied by the header (length minus the unit id byte).
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }
}

// =============================================================================
// RTU Framing
// =============================================================================

/// Builds an RTU frame: `unit_id || pdu || crc16_le(unit_id || pdu)`.
pub fn build_rtu_frame(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Splits an RTU frame into `(unit_id, pdu)`, validating the trailing CRC.
///
/// # Errors
///
/// - [`HandlerError::Protocol`] for frames shorter than 4 bytes
/// - [`HandlerError::Crc`] on checksum mismatch
pub fn split_rtu_frame(frame: &[u8]) -> HandlerResult<(u8, &[u8])> {
    if frame.len() < 4 {
        return Err(HandlerError::protocol(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }

    let (prefix, trailer) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([trailer[0], trailer[1]]);
    let expected = crc16(prefix);
    if expected != actual {
        return Err(HandlerError::crc(expected, actual));
    }

    Ok((prefix[0], &prefix[1..]))
}

/// Expected total RTU response frame length, dispatched by function code.
///
/// Needs at least 3 buffered bytes (`unit, fc, first PDU byte`). Read
/// responses carry a byte count in the third byte; write echoes and mask
/// writes have fixed lengths; exception responses are always 5 bytes.
/// Returns `None` for an unrecognized function code echo.
pub fn rtu_response_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }

    let fc = buf[1];
    if fc & EXCEPTION_BIT != 0 {
        // unit + fc + exception code + crc
        return Some(5);
    }

    match fc {
        FC_READ_COILS
        | FC_READ_DISCRETE_INPUTS
        | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS
        | FC_READ_WRITE_MULTIPLE_REGISTERS => {
            // unit + fc + byte count + data + crc
            Some(3 + buf[2] as usize + 2)
        }
        FC_WRITE_SINGLE_COIL
        | FC_WRITE_SINGLE_REGISTER
        | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => Some(8),
        FC_MASK_WRITE_REGISTER => Some(10),
        _ => None,
    }
}

// =============================================================================
// Exception Decoding
// =============================================================================

/// Checks a response PDU for an exception and surfaces it as an error.
///
/// # Errors
///
/// - [`HandlerError::Exception`] when the high bit of the function code is set
/// - [`HandlerError::Protocol`] for an exception PDU with no code byte
pub fn check_exception(pdu: &[u8]) -> HandlerResult<()> {
    if pdu.is_empty() {
        return Err(HandlerError::protocol("empty response PDU"));
    }

    if pdu[0] & EXCEPTION_BIT != 0 {
        if pdu.len() < 2 {
            return Err(HandlerError::protocol(
                "exception response missing exception code",
            ));
        }
        return Err(HandlerError::exception(pdu[0] & !EXCEPTION_BIT, pdu[1]));
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
