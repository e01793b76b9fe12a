// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end Modbus scenarios over the mock transports.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use manifold_core::error::HandlerError;
use manifold_core::handler::ProtocolHandler;
use manifold_modbus::frame::{self, MbapHeader};
use manifold_modbus::pdu;
use manifold_modbus::types::{ModbusRtuConfig, ModbusTcpConfig};
use manifold_modbus::{ModbusRtuHandler, ModbusTcpHandler};

fn mock_tcp_handler() -> ModbusTcpHandler {
    let config = ModbusTcpConfig::new("mock", 502)
        .with_timeout(Duration::from_secs(2))
        .with_mock();
    ModbusTcpHandler::new("it-plc", config, CancellationToken::new()).unwrap()
}

fn mock_rtu_handler() -> ModbusRtuHandler {
    let config = ModbusRtuConfig::new("/dev/null")
        .with_timeout(Duration::from_millis(500))
        .with_mock();
    ModbusRtuHandler::new("it-meter", config, CancellationToken::new()).unwrap()
}

#[test]
fn crc16_golden_vector() {
    let data = [0x01, 0x04, 0x02, 0xFF, 0xFF];
    let crc = frame::crc16(&data);
    assert_eq!(crc.to_le_bytes(), [0xB8, 0x80]);
    assert!(frame::validate_crc(&data, crc));
}

#[test]
fn mbap_build_golden_vector() {
    let header = MbapHeader::build(0x0001, 0x11, 6);
    assert_eq!(header.encode(), [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x11]);
}

#[test]
fn mbap_round_trip_property() {
    for tx in [0u16, 1, 0x00FF, 0xABCD, 0xFFFF] {
        for pdu_len in [1usize, 2, 64, 253] {
            let header = MbapHeader::build(tx, 0x42, pdu_len);
            let parsed = MbapHeader::parse(&header.encode()).unwrap();
            assert_eq!(parsed.transaction_id, tx);
            assert_eq!(parsed.protocol_id, 0);
            assert_eq!(parsed.length as usize, pdu_len + 1);
            assert_eq!(parsed.unit_id, 0x42);
        }
    }
}

#[test]
fn coil_response_decoding() {
    let response = [0x01, 0x02, 0xCD, 0x01];
    let bits = pdu::parse_bits_response(&response, frame::FC_READ_COILS, 10).unwrap();
    let expected: Vec<bool> = [1, 0, 1, 1, 0, 0, 1, 1, 1, 0]
        .iter()
        .map(|&b| b == 1)
        .collect();
    assert_eq!(bits, expected);
}

#[tokio::test]
async fn tcp_mock_holding_register_round_trip() {
    let handler = mock_tcp_handler();
    handler.connect().await.unwrap();

    // The mock answers FC 0x03 qty 2 with the PDU 03 04 00 0A 00 14.
    let values = handler.read_holding_registers(1, 0, 2).await.unwrap();
    assert_eq!(values, vec![10, 20]);

    handler.disconnect().await.unwrap();
    assert!(!handler.is_connected());
}

#[tokio::test]
async fn tcp_mock_write_echoes_verify() {
    let handler = mock_tcp_handler();
    handler.connect().await.unwrap();

    handler.write_single_coil(1, 0x00AC, true).await.unwrap();
    handler.write_single_register(1, 0x0001, 0x0003).await.unwrap();
    handler
        .write_multiple_coils(1, 0x0013, &[true, false, true, true])
        .await
        .unwrap();
    handler
        .write_multiple_registers(1, 0x0001, &[0x000A, 0x0102])
        .await
        .unwrap();
    handler
        .mask_write_register(1, 0x0004, 0x00F2, 0x0025)
        .await
        .unwrap();

    let snap = handler.metrics();
    assert_eq!(snap.write_count, 5);
    assert_eq!(snap.read_count, 5);
    assert_eq!(snap.error_count, 0);
    assert!(snap.average_latency_ms >= 0.0);
}

#[tokio::test]
async fn rtu_mock_round_trip_validates_crc() {
    let handler = mock_rtu_handler();
    handler.connect().await.unwrap();

    let values = handler.read_input_registers(0x11, 0x0008, 3).await.unwrap();
    assert_eq!(values, vec![10, 20, 30]);

    let coils = handler.read_coils(0x11, 0, 10).await.unwrap();
    assert_eq!(coils.len(), 10);

    handler.disconnect().await.unwrap();
}

#[tokio::test]
async fn rtu_read_write_multiple_registers() {
    let handler = mock_rtu_handler();
    handler.connect().await.unwrap();

    let read_back = handler
        .read_write_multiple_registers(0x01, 0x0000, 2, 0x0010, &[0xBEEF])
        .await
        .unwrap();
    assert_eq!(read_back, vec![10, 20]);
}

#[tokio::test]
async fn metrics_accumulate_across_operations() {
    let handler = mock_tcp_handler();
    handler.connect().await.unwrap();

    for _ in 0..4 {
        handler.read_holding_registers(1, 0, 1).await.unwrap();
    }

    let snap = handler.metrics();
    assert_eq!(snap.read_count, 4);
    assert_eq!(snap.write_count, 4);
    assert!(snap.bytes_read >= 4 * 11);
    assert!(snap.last_read.is_some());
    assert!(snap.last_write.is_some());
}

#[tokio::test]
async fn operations_require_connection() {
    let handler = mock_tcp_handler();
    let err = handler.read_coils(1, 0, 1).await.unwrap_err();
    assert!(matches!(err, HandlerError::NotConnected));

    let rtu = mock_rtu_handler();
    let err = rtu.write_single_register(1, 0, 1).await.unwrap_err();
    assert!(matches!(err, HandlerError::NotConnected));
}
