// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! PDU builders and response parsers for the standard function-code set.
//!
//! Requests and responses are identical on TCP and RTU; framing differs.
//! Register/address/quantity fields are big-endian. Packed-bit responses
//! order bits LSB-first within each byte, starting from the first requested
//! coil.

use manifold_core::error::{HandlerError, HandlerResult};

use crate::frame::{
    FC_MASK_WRITE_REGISTER, FC_READ_WRITE_MULTIPLE_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};

// =============================================================================
// Bit Packing
// =============================================================================

/// Packs coil states LSB-first into `(len + 7) / 8` bytes.
pub fn pack_coils(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; (values.len() + 7) / 8];
    for (i, &on) in values.iter().enumerate() {
        if on {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpacks `count` coil states from LSB-first packed bytes.
pub fn unpack_coils(bytes: &[u8], count: u16) -> Vec<bool> {
    (0..count as usize)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

// =============================================================================
// Request Builders
// =============================================================================

/// Builds a read request PDU (FCs 0x01-0x04): `fc, addr, qty`.
pub fn build_read_request(fc: u8, address: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(fc);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu
}

/// Builds a Write Single Coil request (0xFF00 on, 0x0000 off).
pub fn build_write_single_coil(address: u16, on: bool) -> Vec<u8> {
    let value: u16 = if on { 0xFF00 } else { 0x0000 };
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FC_WRITE_SINGLE_COIL);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value.to_be_bytes());
    pdu
}

/// Builds a Write Single Register request.
pub fn build_write_single_register(address: u16, value: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FC_WRITE_SINGLE_REGISTER);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value.to_be_bytes());
    pdu
}

/// Builds a Write Multiple Coils request: `fc, addr, qty, byte_count, bits`.
pub fn build_write_multiple_coils(address: u16, values: &[bool]) -> Vec<u8> {
    let packed = pack_coils(values);
    let mut pdu = Vec::with_capacity(6 + packed.len());
    pdu.push(FC_WRITE_MULTIPLE_COILS);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push(packed.len() as u8);
    pdu.extend_from_slice(&packed);
    pdu
}

/// Builds a Write Multiple Registers request: `fc, addr, qty, byte_count,
/// qty x u16`.
pub fn build_write_multiple_registers(address: u16, values: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(FC_WRITE_MULTIPLE_REGISTERS);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    pdu
}

/// Builds a Mask Write Register request: `fc, addr, and_mask, or_mask`.
pub fn build_mask_write_register(address: u16, and_mask: u16, or_mask: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(7);
    pdu.push(FC_MASK_WRITE_REGISTER);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&and_mask.to_be_bytes());
    pdu.extend_from_slice(&or_mask.to_be_bytes());
    pdu
}

/// Builds a Read/Write Multiple Registers request: `fc, read_addr, read_qty,
/// write_addr, write_qty, byte_count, write x u16`.
pub fn build_read_write_multiple_registers(
    read_address: u16,
    read_quantity: u16,
    write_address: u16,
    write_values: &[u16],
) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(10 + write_values.len() * 2);
    pdu.push(FC_READ_WRITE_MULTIPLE_REGISTERS);
    pdu.extend_from_slice(&read_address.to_be_bytes());
    pdu.extend_from_slice(&read_quantity.to_be_bytes());
    pdu.extend_from_slice(&write_address.to_be_bytes());
    pdu.extend_from_slice(&(write_values.len() as u16).to_be_bytes());
    pdu.push((write_values.len() * 2) as u8);
    for value in write_values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    pdu
}

// =============================================================================
// Response Parsers
// =============================================================================

fn check_function_code(pdu: &[u8], expected: u8) -> HandlerResult<()> {
    if pdu.is_empty() {
        return Err(HandlerError::protocol("empty response PDU"));
    }
    if pdu[0] != expected {
        return Err(HandlerError::protocol(format!(
            "unexpected function code: expected {:#04x}, got {:#04x}",
            expected, pdu[0]
        )));
    }
    Ok(())
}

/// Parses a packed-bit read response (FCs 0x01/0x02): `fc, byte_count, bits`.
pub fn parse_bits_response(pdu: &[u8], fc: u8, quantity: u16) -> HandlerResult<Vec<bool>> {
    check_function_code(pdu, fc)?;
    if pdu.len() < 2 {
        return Err(HandlerError::protocol("bit response missing byte count"));
    }

    let byte_count = pdu[1] as usize;
    let needed = (quantity as usize + 7) / 8;
    if byte_count < needed || pdu.len() < 2 + byte_count {
        return Err(HandlerError::protocol(format!(
            "invalid byte count {} for {} bits (PDU length {})",
            byte_count,
            quantity,
            pdu.len()
        )));
    }

    Ok(unpack_coils(&pdu[2..2 + byte_count], quantity))
}

/// Parses a register read response (FCs 0x03/0x04): `fc, byte_count,
/// qty x u16`.
pub fn parse_registers_response(pdu: &[u8], fc: u8, quantity: u16) -> HandlerResult<Vec<u16>> {
    check_function_code(pdu, fc)?;
    if pdu.len() < 2 {
        return Err(HandlerError::protocol("register response missing byte count"));
    }

    let byte_count = pdu[1] as usize;
    if byte_count != quantity as usize * 2 || pdu.len() < 2 + byte_count {
        return Err(HandlerError::protocol(format!(
            "invalid byte count {} for {} registers (PDU length {})",
            byte_count,
            quantity,
            pdu.len()
        )));
    }

    Ok(pdu[2..2 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Verifies a Write Single Coil echo against the request.
pub fn parse_write_single_coil_response(pdu: &[u8], address: u16, on: bool) -> HandlerResult<()> {
    check_function_code(pdu, FC_WRITE_SINGLE_COIL)?;
    if pdu.len() < 5 {
        return Err(HandlerError::protocol(format!(
            "short write-coil echo: {} bytes",
            pdu.len()
        )));
    }

    let echo_address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let echo_value = u16::from_be_bytes([pdu[3], pdu[4]]);
    let expected: u16 = if on { 0xFF00 } else { 0x0000 };

    if echo_address != address || echo_value != expected {
        return Err(HandlerError::protocol(format!(
            "write-coil echo mismatch: addr {:#06x}/{:#06x}, value {:#06x}/{:#06x}",
            address, echo_address, expected, echo_value
        )));
    }
    Ok(())
}

/// Verifies a Write Single Register echo against the request.
pub fn parse_write_single_register_response(
    pdu: &[u8],
    address: u16,
    value: u16,
) -> HandlerResult<()> {
    check_function_code(pdu, FC_WRITE_SINGLE_REGISTER)?;
    if pdu.len() < 5 {
        return Err(HandlerError::protocol(format!(
            "short write-register echo: {} bytes",
            pdu.len()
        )));
    }

    let echo_address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let echo_value = u16::from_be_bytes([pdu[3], pdu[4]]);
    if echo_address != address || echo_value != value {
        return Err(HandlerError::protocol(format!(
            "write-register echo mismatch: addr {:#06x}/{:#06x}, value {:#06x}/{:#06x}",
            address, echo_address, value, echo_value
        )));
    }
    Ok(())
}

/// Verifies a Write Multiple Coils / Registers acknowledgment: `fc, addr,
/// qty`.
pub fn parse_write_multiple_response(
    pdu: &[u8],
    fc: u8,
    address: u16,
    quantity: u16,
) -> HandlerResult<()> {
    check_function_code(pdu, fc)?;
    if pdu.len() < 5 {
        return Err(HandlerError::protocol(format!(
            "short write acknowledgment: {} bytes",
            pdu.len()
        )));
    }

    let echo_address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let echo_quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
    if echo_address != address || echo_quantity != quantity {
        return Err(HandlerError::protocol(format!(
            "write acknowledgment mismatch: addr {:#06x}/{:#06x}, qty {}/{}",
            address, echo_address, quantity, echo_quantity
        )));
    }
    Ok(())
}

/// Verifies a Mask Write Register echo against the request.
pub fn parse_mask_write_response(
    pdu: &[u8],
    address: u16,
    and_mask: u16,
    or_mask: u16,
) -> HandlerResult<()> {
    check_function_code(pdu, FC_MASK_WRITE_REGISTER)?;
    if pdu.len() < 7 {
        return Err(HandlerError::protocol(format!(
            "short mask-write echo: {} bytes",
            pdu.len()
        )));
    }

    let echo_address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let echo_and = u16::from_be_bytes([pdu[3], pdu[4]]);
    let echo_or = u16::from_be_bytes([pdu[5], pdu[6]]);
    if echo_address != address || echo_and != and_mask || echo_or != or_mask {
        return Err(HandlerError::protocol("mask-write echo mismatch"));
    }
    Ok(())
}

/// Parses a Read/Write Multiple Registers response: `fc, byte_count,
/// read_qty x u16`.
pub fn parse_read_write_response(pdu: &[u8], read_quantity: u16) -> HandlerResult<Vec<u16>> {
    parse_registers_response(pdu, FC_READ_WRITE_MULTIPLE_REGISTERS, read_quantity)
}

// =============================================================================
// Tests
// =============================================================================
