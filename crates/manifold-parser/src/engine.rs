// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The field-extraction engine.
//!
//! [`Engine::parse`] turns a raw response buffer into
//! `device_id -> field_name -> value` using either the parser's ordered field
//! list or one of the built-in whole-frame codecs. The engine is a pure
//! function over its inputs; any field failure aborts the whole parse and no
//! partial results are observable.

use std::collections::HashMap;

use manifold_core::error::{ParseError, ParseResult};
use manifold_core::types::{
    BuiltinKind, DeviceData, Endianness, FieldType, FieldValue, Parser, ParserField, ParserKind,
};

// =============================================================================
// Engine
// =============================================================================

/// Decodes raw response bytes according to a [`Parser`] descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Engine;

impl Engine {
    /// Creates an engine.
    pub fn new() -> Self {
        Self
    }

    /// Decodes `data` per the parser descriptor.
    ///
    /// # Errors
    ///
    /// - [`ParseError::OutOfRange`] when a field reaches past the buffer
    /// - [`ParseError::UnknownBuiltin`] for an unrecognized builtin tag
    /// - [`ParseError::Invalid`] for malformed field content
    pub fn parse(&self, parser: &Parser, data: &[u8]) -> ParseResult<DeviceData> {
        if parser.kind == ParserKind::Builtin {
            return self.parse_builtin(parser, data);
        }

        // Group by device, preserving first-seen device order and per-device
        // declaration order.
        let mut order: Vec<&str> = Vec::new();
        let mut grouped: HashMap<&str, Vec<&ParserField>> = HashMap::new();
        for field in &parser.fields {
            let entry = grouped.entry(field.device_id.as_str()).or_default();
            if entry.is_empty() {
                order.push(field.device_id.as_str());
            }
            entry.push(field);
        }

        let mut result: DeviceData = HashMap::new();
        for device_id in order {
            let fields = &grouped[device_id];
            let mut device_data = HashMap::with_capacity(fields.len());

            for field in fields {
                let value = decode_field(field, data).map_err(|e| {
                    tracing::debug!(
                        parser = %parser.id,
                        device = %device_id,
                        field = %field.name,
                        error = %e,
                        "Field decode failed"
                    );
                    e
                })?;
                device_data.insert(field.name.clone(), value);
            }

            result.insert(device_id.to_string(), device_data);
        }

        Ok(result)
    }

    fn parse_builtin(&self, parser: &Parser, data: &[u8]) -> ParseResult<DeviceData> {
        let tag = parser.builtin.as_deref().unwrap_or_default();
        let kind =
            BuiltinKind::parse(tag).ok_or_else(|| ParseError::unknown_builtin(tag))?;

        let mut result: DeviceData = HashMap::new();
        match kind {
            BuiltinKind::Ieee3Floats => {
                if data.len() < 12 {
                    return Err(ParseError::short_buffer(12, data.len()));
                }
                let labels = builtin_labels(parser, 3)?;

                let mut device_data = HashMap::with_capacity(3);
                for (i, label) in labels.iter().enumerate() {
                    let raw = u32::from_le_bytes(data[i * 4..(i + 1) * 4].try_into().unwrap());
                    device_data
                        .insert((*label).to_string(), FieldValue::Float(f32::from_bits(raw) as f64));
                }
                result.insert(builtin_device(parser)?, device_data);
            }
            BuiltinKind::Ascii3Floats => {
                if data.len() != 8 {
                    return Err(ParseError::invalid(format!(
                        "ascii_3_floats requires exactly 8 bytes, got {}",
                        data.len()
                    )));
                }
                let integral = parse_ascii_int(&data[0..4])?;
                let fractional = parse_ascii_int(&data[4..8])?;
                let value = integral as f64 + fractional as f64 / 10_000.0;

                let labels = builtin_labels(parser, 1)?;
                let mut device_data = HashMap::with_capacity(1);
                device_data.insert(labels[0].to_string(), FieldValue::Float(value));
                result.insert(builtin_device(parser)?, device_data);
            }
            BuiltinKind::Int16Signed => {
                if data.len() < 2 {
                    return Err(ParseError::short_buffer(2, data.len()));
                }
                let value = i16::from_be_bytes([data[0], data[1]]);
                let labels = builtin_labels(parser, 1)?;
                let mut device_data = HashMap::with_capacity(1);
                device_data.insert(labels[0].to_string(), FieldValue::Int(value as i64));
                result.insert(builtin_device(parser)?, device_data);
            }
            BuiltinKind::Int16Unsigned => {
                if data.len() < 2 {
                    return Err(ParseError::short_buffer(2, data.len()));
                }
                let value = u16::from_be_bytes([data[0], data[1]]);
                let labels = builtin_labels(parser, 1)?;
                let mut device_data = HashMap::with_capacity(1);
                device_data.insert(labels[0].to_string(), FieldValue::UInt(value as u64));
                result.insert(builtin_device(parser)?, device_data);
            }
            BuiltinKind::Int32Signed => {
                if data.len() < 4 {
                    return Err(ParseError::short_buffer(4, data.len()));
                }
                let value = i32::from_be_bytes(data[0..4].try_into().unwrap());
                let labels = builtin_labels(parser, 1)?;
                let mut device_data = HashMap::with_capacity(1);
                device_data.insert(labels[0].to_string(), FieldValue::Int(value as i64));
                result.insert(builtin_device(parser)?, device_data);
            }
            BuiltinKind::RawBytes => {
                let labels = builtin_labels(parser, 1)?;
                let mut device_data = HashMap::with_capacity(1);
                device_data.insert(labels[0].to_string(), FieldValue::Bytes(data.to_vec()));
                result.insert(builtin_device(parser)?, device_data);
            }
        }

        Ok(result)
    }
}

/// The first `count` field names, used as output labels by builtins.
fn builtin_labels(parser: &Parser, count: usize) -> ParseResult<Vec<&str>> {
    if parser.fields.len() < count {
        return Err(ParseError::invalid(format!(
            "builtin parser '{}' needs at least {} label field(s), has {}",
            parser.id,
            count,
            parser.fields.len()
        )));
    }
    Ok(parser.fields[..count].iter().map(|f| f.name.as_str()).collect())
}

/// The device id builtin output is keyed under (taken from the first field).
fn builtin_device(parser: &Parser) -> ParseResult<String> {
    parser
        .fields
        .first()
        .map(|f| f.device_id.clone())
        .ok_or_else(|| {
            ParseError::invalid(format!("builtin parser '{}' has no fields", parser.id))
        })
}

// =============================================================================
// Field Decoding
// =============================================================================

/// Decodes one field out of `data`.
fn decode_field(field: &ParserField, data: &[u8]) -> ParseResult<FieldValue> {
    if field.offset >= data.len() {
        return Err(ParseError::out_of_range(
            field.offset,
            field.field_type.width().unwrap_or(1),
            data.len(),
        ));
    }

    let off = field.offset;

    match field.field_type {
        FieldType::Uint8 => {
            check_bounds(field, 1, data.len())?;
            Ok(transform(data[off] as f64, field))
        }
        FieldType::Int8 => {
            check_bounds(field, 1, data.len())?;
            Ok(transform(data[off] as i8 as f64, field))
        }
        FieldType::Uint16 => {
            check_bounds(field, 2, data.len())?;
            let raw = read_u16(&data[off..off + 2], field.endianness);
            Ok(transform(raw as f64, field))
        }
        FieldType::Int16 => {
            check_bounds(field, 2, data.len())?;
            let raw = read_u16(&data[off..off + 2], field.endianness) as i16;
            Ok(transform(raw as f64, field))
        }
        FieldType::Uint32 => {
            check_bounds(field, 4, data.len())?;
            let raw = read_u32(&data[off..off + 4], field.endianness);
            Ok(transform(raw as f64, field))
        }
        FieldType::Int32 => {
            check_bounds(field, 4, data.len())?;
            let raw = read_u32(&data[off..off + 4], field.endianness) as i32;
            Ok(transform(raw as f64, field))
        }
        FieldType::Float32 => {
            check_bounds(field, 4, data.len())?;
            let bits = read_u32(&data[off..off + 4], field.endianness);
            Ok(transform(f32::from_bits(bits) as f64, field))
        }
        FieldType::Float64 => {
            check_bounds(field, 8, data.len())?;
            let bits = read_u64(&data[off..off + 8], field.endianness);
            Ok(transform(f64::from_bits(bits), field))
        }
        FieldType::AsciiInt => {
            let len = field.array_length.unwrap_or(4);
            check_bounds(field, len, data.len())?;
            let text = std::str::from_utf8(&data[off..off + len])
                .map_err(|_| ParseError::invalid("ascii_int field is not valid UTF-8"))?;
            let value: i64 = text
                .trim()
                .parse()
                .map_err(|_| ParseError::invalid(format!("ascii_int field '{}' is not a number", text.trim())))?;
            Ok(transform(value as f64, field))
        }
        FieldType::AsciiDecimal => {
            let len = field.array_length.unwrap_or(8);
            check_bounds(field, len, data.len())?;
            let half = len / 2;
            let integral = parse_ascii_int(&data[off..off + half])?;
            let fractional = parse_ascii_int(&data[off + half..off + len])?;
            let divisor = 10f64.powi((len - half) as i32);
            Ok(transform(integral as f64 + fractional as f64 / divisor, field))
        }
        FieldType::String => {
            let len = clamped_length(field, data.len());
            let text = String::from_utf8_lossy(&data[off..off + len]);
            Ok(FieldValue::Text(text.trim().to_string()))
        }
        FieldType::RawBytes => {
            let len = clamped_length(field, data.len());
            Ok(FieldValue::Bytes(data[off..off + len].to_vec()))
        }
    }
}

fn check_bounds(field: &ParserField, width: usize, len: usize) -> ParseResult<()> {
    if field.offset + width > len {
        return Err(ParseError::out_of_range(field.offset, width, len));
    }
    Ok(())
}

/// Array length clamped to the buffer remainder for length-driven types.
fn clamped_length(field: &ParserField, len: usize) -> usize {
    let remainder = len - field.offset;
    match field.array_length {
        Some(n) if n <= remainder => n,
        _ => remainder,
    }
}

/// Applies `value * (scale or 1.0) + value_offset`.
fn transform(value: f64, field: &ParserField) -> FieldValue {
    let scale = if field.scale == 0.0 { 1.0 } else { field.scale };
    FieldValue::Float(value * scale + field.value_offset)
}

fn read_u16(buf: &[u8], endianness: Endianness) -> u16 {
    let bytes: [u8; 2] = buf.try_into().unwrap();
    match endianness {
        Endianness::Big => u16::from_be_bytes(bytes),
        Endianness::Little => u16::from_le_bytes(bytes),
    }
}

fn read_u32(buf: &[u8], endianness: Endianness) -> u32 {
    let bytes: [u8; 4] = buf.try_into().unwrap();
    match endianness {
        Endianness::Big => u32::from_be_bytes(bytes),
        Endianness::Little => u32::from_le_bytes(bytes),
    }
}

fn read_u64(buf: &[u8], endianness: Endianness) -> u64 {
    let bytes: [u8; 8] = buf.try_into().unwrap();
    match endianness {
        Endianness::Big => u64::from_be_bytes(bytes),
        Endianness::Little => u64::from_le_bytes(bytes),
    }
}

/// Parses a run of ASCII digits (with optional sign) as i64.
fn parse_ascii_int(buf: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| ParseError::invalid("ASCII number field is not valid UTF-8"))?;
    text.trim()
        .parse()
        .map_err(|_| ParseError::invalid(format!("'{}' is not a number", text.trim())))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::types::Parser;

    fn field(name: &str, ty: FieldType, offset: usize) -> ParserField {
        ParserField::new(name, "dev-1", ty, offset)
    }

    fn fielded(fields: Vec<ParserField>) -> Parser {
        Parser::fielded("p-1", "test", fields)
    }

    #[test]
    fn test_uint16_big_endian() {
        let parser = fielded(vec![field("count", FieldType::Uint16, 0)]);
        let result = Engine::new().parse(&parser, &[0x01, 0x02]).unwrap();
        assert_eq!(result["dev-1"]["count"], FieldValue::Float(0x0102 as f64));
    }

    #[test]
    fn test_uint16_little_endian() {
        let parser = fielded(vec![
            field("count", FieldType::Uint16, 0).with_endianness(Endianness::Little)
        ]);
        let result = Engine::new().parse(&parser, &[0x01, 0x02]).unwrap();
        assert_eq!(result["dev-1"]["count"], FieldValue::Float(0x0201 as f64));
    }

    #[test]
    fn test_signed_types_sign_extend() {
        let parser = fielded(vec![
            field("a", FieldType::Int8, 0),
            field("b", FieldType::Int16, 1),
            field("c", FieldType::Int32, 3),
        ]);
        let data = [0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFF, 0xFC];
        let result = Engine::new().parse(&parser, &data).unwrap();
        assert_eq!(result["dev-1"]["a"], FieldValue::Float(-1.0));
        assert_eq!(result["dev-1"]["b"], FieldValue::Float(-2.0));
        assert_eq!(result["dev-1"]["c"], FieldValue::Float(-4.0));
    }

    #[test]
    fn test_float32_little_endian_with_transform() {
        // 2.2f32 LE = CD CC 0C 40; 2.2 * 2.0 + 1.0 ≈ 5.4
        let parser = fielded(vec![field("flow", FieldType::Float32, 0)
            .with_endianness(Endianness::Little)
            .with_scale(2.0)
            .with_value_offset(1.0)]);
        let result = Engine::new()
            .parse(&parser, &[0xCD, 0xCC, 0x0C, 0x40])
            .unwrap();
        let value = result["dev-1"]["flow"].as_f64().unwrap();
        assert!((value - 5.4).abs() < 1e-6, "got {}", value);
    }

    #[test]
    fn test_value_offset_used_for_every_numeric_type() {
        // Regression guard: the additive term is the configured value offset,
        // never the field's byte offset.
        let data = [0u8; 16];
        for ty in [
            FieldType::Uint8,
            FieldType::Int8,
            FieldType::Uint16,
            FieldType::Int16,
            FieldType::Uint32,
            FieldType::Int32,
            FieldType::Float32,
            FieldType::Float64,
        ] {
            let parser = fielded(vec![field("v", ty, 5).with_value_offset(7.5)]);
            let result = Engine::new().parse(&parser, &data).unwrap();
            assert_eq!(
                result["dev-1"]["v"],
                FieldValue::Float(7.5),
                "type {:?}",
                ty
            );
        }
    }

    #[test]
    fn test_float64_round_trip() {
        let parser = fielded(vec![field("v", FieldType::Float64, 0)]);
        let data = 1234.5678f64.to_be_bytes();
        let result = Engine::new().parse(&parser, &data).unwrap();
        assert_eq!(result["dev-1"]["v"], FieldValue::Float(1234.5678));
    }

    #[test]
    fn test_ascii_int_default_length() {
        let parser = fielded(vec![field("n", FieldType::AsciiInt, 0)]);
        let result = Engine::new().parse(&parser, b"  42extra").unwrap();
        assert_eq!(result["dev-1"]["n"], FieldValue::Float(42.0));
    }

    #[test]
    fn test_ascii_int_rejects_garbage() {
        let parser = fielded(vec![field("n", FieldType::AsciiInt, 0)]);
        let err = Engine::new().parse(&parser, b"12x4").unwrap_err();
        assert!(matches!(err, ParseError::Invalid { .. }));
    }

    #[test]
    fn test_ascii_decimal() {
        let parser = fielded(vec![field("v", FieldType::AsciiDecimal, 0)]);
        let result = Engine::new().parse(&parser, b"00121234").unwrap();
        let value = result["dev-1"]["v"].as_f64().unwrap();
        assert!((value - 12.1234).abs() < 1e-9);
    }

    #[test]
    fn test_string_trims_and_clamps() {
        let parser = fielded(vec![
            field("s", FieldType::String, 2).with_array_length(6)
        ]);
        let result = Engine::new().parse(&parser, b"xx ABC  ").unwrap();
        assert_eq!(result["dev-1"]["s"], FieldValue::Text("ABC".into()));

        // Array length longer than the remainder falls back to the remainder.
        let parser = fielded(vec![
            field("s", FieldType::String, 2).with_array_length(100)
        ]);
        let result = Engine::new().parse(&parser, b"xxAB").unwrap();
        assert_eq!(result["dev-1"]["s"], FieldValue::Text("AB".into()));
    }

    #[test]
    fn test_raw_bytes_untransformed() {
        let parser = fielded(vec![
            field("raw", FieldType::RawBytes, 1).with_array_length(2)
        ]);
        let result = Engine::new().parse(&parser, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(result["dev-1"]["raw"], FieldValue::Bytes(vec![0xBB, 0xCC]));
    }

    #[test]
    fn test_out_of_range_aborts_whole_parse() {
        let parser = fielded(vec![
            field("ok", FieldType::Uint8, 0),
            field("oob", FieldType::Uint32, 2),
        ]);
        let err = Engine::new().parse(&parser, &[0x01, 0x02, 0x03]).unwrap_err();
        assert_eq!(err, ParseError::out_of_range(2, 4, 3));
    }

    #[test]
    fn test_offset_past_end() {
        let parser = fielded(vec![field("v", FieldType::Uint8, 9)]);
        let err = Engine::new().parse(&parser, &[0x01]).unwrap_err();
        assert!(matches!(err, ParseError::OutOfRange { .. }));
    }

    #[test]
    fn test_multi_device_grouping() {
        let parser = fielded(vec![
            ParserField::new("a", "dev-1", FieldType::Uint8, 0),
            ParserField::new("b", "dev-2", FieldType::Uint8, 1),
            ParserField::new("c", "dev-1", FieldType::Uint8, 2),
        ]);
        let result = Engine::new().parse(&parser, &[1, 2, 3]).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result["dev-1"].len(), 2);
        assert_eq!(result["dev-2"].len(), 1);
        assert_eq!(result["dev-1"]["c"], FieldValue::Float(3.0));
    }

    #[test]
    fn test_builtin_ieee_3_floats() {
        let fields = vec![
            field("x", FieldType::Float32, 0),
            field("y", FieldType::Float32, 4),
            field("z", FieldType::Float32, 8),
        ];
        let parser = Parser::builtin("p-1", "xyz", BuiltinKind::Ieee3Floats, fields);

        let mut data = Vec::new();
        for v in [1.5f32, -2.25, 100.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }

        let result = Engine::new().parse(&parser, &data).unwrap();
        assert_eq!(result["dev-1"]["x"], FieldValue::Float(1.5));
        assert_eq!(result["dev-1"]["y"], FieldValue::Float(-2.25));
        assert_eq!(result["dev-1"]["z"], FieldValue::Float(100.0));
    }

    #[test]
    fn test_builtin_ieee_3_floats_short_buffer() {
        let parser = Parser::builtin(
            "p-1",
            "xyz",
            BuiltinKind::Ieee3Floats,
            vec![field("x", FieldType::Float32, 0)],
        );
        let err = Engine::new().parse(&parser, &[0u8; 8]).unwrap_err();
        assert_eq!(err, ParseError::short_buffer(12, 8));
    }

    #[test]
    fn test_builtin_ascii_3_floats() {
        let parser = Parser::builtin(
            "p-1",
            "level",
            BuiltinKind::Ascii3Floats,
            vec![field("level", FieldType::Float64, 0)],
        );
        let result = Engine::new().parse(&parser, b"00120034").unwrap();
        let value = result["dev-1"]["level"].as_f64().unwrap();
        assert!((value - 12.0034).abs() < 1e-9, "got {}", value);

        let err = Engine::new().parse(&parser, b"0012003").unwrap_err();
        assert!(matches!(err, ParseError::Invalid { .. }));
    }

    #[test]
    fn test_builtin_int16_variants() {
        let fields = vec![field("v", FieldType::Int16, 0)];

        let parser = Parser::builtin("p-1", "v", BuiltinKind::Int16Signed, fields.clone());
        let result = Engine::new().parse(&parser, &[0xFF, 0xFE]).unwrap();
        assert_eq!(result["dev-1"]["v"], FieldValue::Int(-2));

        let parser = Parser::builtin("p-2", "v", BuiltinKind::Int16Unsigned, fields.clone());
        let result = Engine::new().parse(&parser, &[0xFF, 0xFE]).unwrap();
        assert_eq!(result["dev-1"]["v"], FieldValue::UInt(0xFFFE));

        let parser = Parser::builtin("p-3", "v", BuiltinKind::Int32Signed, fields);
        let result = Engine::new()
            .parse(&parser, &[0xFF, 0xFF, 0xFF, 0xFB])
            .unwrap();
        assert_eq!(result["dev-1"]["v"], FieldValue::Int(-5));
    }

    #[test]
    fn test_builtin_raw_bytes() {
        let parser = Parser::builtin(
            "p-1",
            "dump",
            BuiltinKind::RawBytes,
            vec![field("payload", FieldType::RawBytes, 0)],
        );
        let result = Engine::new().parse(&parser, &[9, 8, 7]).unwrap();
        assert_eq!(result["dev-1"]["payload"], FieldValue::Bytes(vec![9, 8, 7]));
    }

    #[test]
    fn test_unknown_builtin() {
        let mut parser = Parser::builtin(
            "p-1",
            "weird",
            BuiltinKind::RawBytes,
            vec![field("x", FieldType::RawBytes, 0)],
        );
        parser.builtin = Some("tibetan_floats".to_string());

        let err = Engine::new().parse(&parser, &[0u8; 4]).unwrap_err();
        assert_eq!(err, ParseError::unknown_builtin("tibetan_floats"));
    }

    #[test]
    fn test_builtin_without_label_fields() {
        let parser = Parser::builtin("p-1", "empty", BuiltinKind::RawBytes, vec![]);
        let err = Engine::new().parse(&parser, &[1, 2]).unwrap_err();
        assert!(matches!(err, ParseError::Invalid { .. }));
    }
}
