// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data model for Manifold.
//!
//! This module defines the persisted records (sessions, connections, devices,
//! parsers, data points), the enums that tag them, and [`FieldValue`] — the
//! protocol-agnostic value produced by the parser engine.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Connection Enums
// =============================================================================

/// The protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Modbus over TCP (MBAP framing).
    ModbusTcp,
    /// Modbus over a serial line (RTU framing).
    ModbusRtu,
}

impl ConnectionKind {
    /// Returns the wire name of this kind (`modbus_tcp` / `modbus_rtu`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus_tcp",
            Self::ModbusRtu => "modbus_rtu",
        }
    }

    /// Parses a wire name into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "modbus_tcp" => Some(Self::ModbusTcp),
            "modbus_rtu" => Some(Self::ModbusRtu),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No live transport.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Transport is live and usable.
    Connected,
    /// Disconnected after a failure; the last error is retained.
    Error,
}

impl ConnectionStatus {
    /// Returns `true` if the connection holds a live transport.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, nothing running.
    #[default]
    Idle,
    /// Connections are actively polled.
    Running,
    /// Temporarily halted by the operator.
    Paused,
    /// A fatal error stopped the session.
    Error,
}

/// Framing mode carried for future generic byte-stream transports.
///
/// Modbus handlers frame on the wire protocol itself and ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// No generic framing.
    #[default]
    None,
    /// Records separated by a delimiter byte sequence.
    Delimited,
    /// Fixed-size records.
    Fixed,
}

// =============================================================================
// Persisted Records
// =============================================================================

/// A session groups connections created by one operator workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: SessionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A connection descriptor as persisted and exchanged with the manager.
///
/// The `config` blob is protocol-specific and deserialized by the matching
/// handler factory; the manager treats it as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Opaque connection id (uuid, assigned by the manager on create).
    pub id: String,
    /// Owning session id.
    pub session_id: String,
    /// Protocol kind.
    pub kind: ConnectionKind,
    /// Human-readable name.
    pub name: String,
    /// Serialized protocol-specific configuration.
    pub config: serde_json::Value,
    /// Optional parser attached to reads on this connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_id: Option<String>,
    /// Runtime status tag.
    #[serde(default)]
    pub status: ConnectionStatus,
    /// Generic framing mode (ignored by Modbus handlers).
    #[serde(default)]
    pub framing: FramingMode,
    /// Delimiter for [`FramingMode::Delimited`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// Record size for [`FramingMode::Fixed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_size: Option<usize>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Creates a record with the given kind, name, and config blob.
    ///
    /// The id is left empty; the manager assigns one on create.
    pub fn new(
        session_id: impl Into<String>,
        kind: ConnectionKind,
        name: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            session_id: session_id.into(),
            kind,
            name: name.into(),
            config,
            parser_id: None,
            status: ConnectionStatus::Disconnected,
            framing: FramingMode::None,
            delimiter: None,
            fixed_size: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches a parser id.
    pub fn with_parser(mut self, parser_id: impl Into<String>) -> Self {
        self.parser_id = Some(parser_id.into());
        self
    }
}

/// A field device reachable through a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Opaque device id.
    pub id: String,
    /// Owning session id.
    pub session_id: String,
    /// Connection the device is read through.
    pub connection_id: String,
    /// Protocol-level address (e.g. unit id on a multi-drop bus).
    pub address: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Parser producing this device's fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// One decoded sample, as handed to the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Opaque point id.
    pub id: String,
    /// Device the sample belongs to.
    pub device_id: String,
    /// Parser that produced the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_id: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    /// The decoded value.
    pub value: FieldValue,
}

// =============================================================================
// Parser Model
// =============================================================================

/// Discriminates field-by-field parsers from whole-frame builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Decode an ordered list of [`ParserField`]s.
    #[default]
    Fielded,
    /// Decode the whole buffer with a named builtin codec.
    Builtin,
}

/// Built-in whole-frame codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    /// Three little-endian IEEE-754 f32 values (≥ 12 bytes).
    Ieee3Floats,
    /// Eight ASCII digits: integral half + fractional half / 10000.
    Ascii3Floats,
    /// A single big-endian signed 16-bit value.
    Int16Signed,
    /// A single big-endian unsigned 16-bit value.
    Int16Unsigned,
    /// A single big-endian signed 32-bit value.
    Int32Signed,
    /// The whole buffer, untransformed.
    RawBytes,
}

impl BuiltinKind {
    /// Returns the wire tag for this builtin.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ieee3Floats => "ieee_3_floats",
            Self::Ascii3Floats => "ascii_3_floats",
            Self::Int16Signed => "int16_signed",
            Self::Int16Unsigned => "int16_unsigned",
            Self::Int32Signed => "int32_signed",
            Self::RawBytes => "raw_bytes",
        }
    }

    /// Parses a wire tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ieee_3_floats" => Some(Self::Ieee3Floats),
            "ascii_3_floats" => Some(Self::Ascii3Floats),
            "int16_signed" => Some(Self::Int16Signed),
            "int16_unsigned" => Some(Self::Int16Unsigned),
            "int32_signed" => Some(Self::Int32Signed),
            "raw_bytes" => Some(Self::RawBytes),
            _ => None,
        }
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data type of a single extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Signed 32-bit integer.
    Int32,
    /// IEEE-754 single precision.
    Float32,
    /// IEEE-754 double precision.
    Float64,
    /// ASCII decimal digits parsed as an integer (default 4 bytes).
    AsciiInt,
    /// ASCII integral + fractional halves (default 8 bytes).
    AsciiDecimal,
    /// UTF-8 text, trimmed of surrounding whitespace.
    String,
    /// Untransformed byte slice.
    RawBytes,
}

impl FieldType {
    /// Fixed decode width in bytes, or `None` for length-driven types.
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::Uint8 | Self::Int8 => Some(1),
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Uint32 | Self::Int32 | Self::Float32 => Some(4),
            Self::Float64 => Some(8),
            Self::AsciiInt | Self::AsciiDecimal | Self::String | Self::RawBytes => None,
        }
    }

    /// Returns `true` for types whose decoded value is numeric and therefore
    /// subject to the scale/offset transform.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String | Self::RawBytes)
    }
}

/// Byte order applied when decoding multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    /// Most significant byte first (Modbus register order).
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

/// One declarative extraction rule inside a fielded parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserField {
    /// Output field name.
    pub name: String,
    /// Device the field belongs to.
    pub device_id: String,
    /// Decode type.
    pub field_type: FieldType,
    /// Byte offset into the response buffer.
    pub offset: usize,
    /// Bit offset for future bit-level extraction (carried, not interpreted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_offset: Option<u8>,
    /// Bit width for future bit-level extraction (carried, not interpreted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_width: Option<u8>,
    /// Byte order for multi-byte types.
    #[serde(default)]
    pub endianness: Endianness,
    /// Multiplicative scale; 0 means 1.0.
    #[serde(default)]
    pub scale: f64,
    /// Additive offset, applied after scale.
    #[serde(default)]
    pub value_offset: f64,
    /// Length for array-like types (`ascii_*`, `string`, `raw_bytes`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_length: Option<usize>,
}

impl ParserField {
    /// Creates a field with defaults (big-endian, no transform).
    pub fn new(
        name: impl Into<String>,
        device_id: impl Into<String>,
        field_type: FieldType,
        offset: usize,
    ) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
            field_type,
            offset,
            bit_offset: None,
            bit_width: None,
            endianness: Endianness::Big,
            scale: 0.0,
            value_offset: 0.0,
            array_length: None,
        }
    }

    /// Sets the byte order.
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Sets the scale factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the additive value offset.
    pub fn with_value_offset(mut self, value_offset: f64) -> Self {
        self.value_offset = value_offset;
        self
    }

    /// Sets the array length.
    pub fn with_array_length(mut self, len: usize) -> Self {
        self.array_length = Some(len);
        self
    }
}

/// A parser descriptor: either an ordered field list or a builtin tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parser {
    /// Opaque parser id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Fielded or builtin.
    #[serde(default)]
    pub kind: ParserKind,
    /// Builtin tag, set when `kind` is [`ParserKind::Builtin`]. Kept as an
    /// open string so unrecognized tags surface from the engine as
    /// `UnknownBuiltin` rather than failing deserialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
    /// Ordered extraction rules. For builtins, the leading field names supply
    /// the output labels.
    #[serde(default)]
    pub fields: Vec<ParserField>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Parser {
    /// Creates a fielded parser.
    pub fn fielded(id: impl Into<String>, name: impl Into<String>, fields: Vec<ParserField>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind: ParserKind::Fielded,
            builtin: None,
            fields,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a builtin parser; `fields` supply the output labels.
    pub fn builtin(
        id: impl Into<String>,
        name: impl Into<String>,
        builtin: BuiltinKind,
        fields: Vec<ParserField>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind: ParserKind::Builtin,
            builtin: Some(builtin.as_str().to_string()),
            fields,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// Per-device decoded fields: `device_id -> field_name -> value`.
pub type DeviceData = HashMap<String, HashMap<String, FieldValue>>;

/// A decoded field value.
///
/// A closed tagged sum rather than a dynamic value, so downstream consumers
/// (persistence, transport) can pattern-match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
}

impl FieldValue {
    /// Returns the type name for logging and metrics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
        }
    }

    /// Returns the value as `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `bool` if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text content if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the byte content if this is a bytes value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{} bytes", v.len()),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_kind_round_trip() {
        assert_eq!(ConnectionKind::parse("modbus_tcp"), Some(ConnectionKind::ModbusTcp));
        assert_eq!(ConnectionKind::parse("modbus_rtu"), Some(ConnectionKind::ModbusRtu));
        assert_eq!(ConnectionKind::parse("dnp3"), None);
        assert_eq!(ConnectionKind::ModbusTcp.to_string(), "modbus_tcp");
    }

    #[test]
    fn test_connection_kind_serde() {
        let json = serde_json::to_string(&ConnectionKind::ModbusRtu).unwrap();
        assert_eq!(json, "\"modbus_rtu\"");
        let kind: ConnectionKind = serde_json::from_str("\"modbus_tcp\"").unwrap();
        assert_eq!(kind, ConnectionKind::ModbusTcp);
    }

    #[test]
    fn test_connection_status() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Error.is_connected());
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_connection_record_builder() {
        let record = ConnectionRecord::new(
            "sess-1",
            ConnectionKind::ModbusTcp,
            "plc-line-3",
            serde_json::json!({"host": "10.0.0.5", "port": 502}),
        )
        .with_parser("parser-1");

        assert!(record.id.is_empty());
        assert_eq!(record.session_id, "sess-1");
        assert_eq!(record.parser_id.as_deref(), Some("parser-1"));
        assert_eq!(record.status, ConnectionStatus::Disconnected);
        assert_eq!(record.framing, FramingMode::None);
    }

    #[test]
    fn test_builtin_kind_tags() {
        for kind in [
            BuiltinKind::Ieee3Floats,
            BuiltinKind::Ascii3Floats,
            BuiltinKind::Int16Signed,
            BuiltinKind::Int16Unsigned,
            BuiltinKind::Int32Signed,
            BuiltinKind::RawBytes,
        ] {
            assert_eq!(BuiltinKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BuiltinKind::parse("sha256"), None);
    }

    #[test]
    fn test_field_type_width() {
        assert_eq!(FieldType::Uint8.width(), Some(1));
        assert_eq!(FieldType::Int16.width(), Some(2));
        assert_eq!(FieldType::Float32.width(), Some(4));
        assert_eq!(FieldType::Float64.width(), Some(8));
        assert_eq!(FieldType::String.width(), None);
        assert!(FieldType::AsciiDecimal.is_numeric());
        assert!(!FieldType::RawBytes.is_numeric());
    }

    #[test]
    fn test_parser_field_builder() {
        let field = ParserField::new("temperature", "dev-1", FieldType::Float32, 4)
            .with_endianness(Endianness::Little)
            .with_scale(0.1)
            .with_value_offset(-40.0);

        assert_eq!(field.endianness, Endianness::Little);
        assert_eq!(field.scale, 0.1);
        assert_eq!(field.value_offset, -40.0);
        assert!(field.array_length.is_none());
    }

    #[test]
    fn test_parser_field_serde_defaults() {
        let json = r#"{"name":"t","device_id":"d","field_type":"uint16","offset":0}"#;
        let field: ParserField = serde_json::from_str(json).unwrap();
        assert_eq!(field.endianness, Endianness::Big);
        assert_eq!(field.scale, 0.0);
        assert_eq!(field.value_offset, 0.0);
    }

    #[test]
    fn test_field_value_accessors() {
        assert_eq!(FieldValue::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(FieldValue::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(FieldValue::UInt(7).as_f64(), Some(7.0));
        assert_eq!(FieldValue::Bool(true).as_f64(), None);
        assert_eq!(FieldValue::Bool(true).as_bool(), Some(true));
        assert_eq!(FieldValue::Text("ok".into()).as_text(), Some("ok"));
        assert_eq!(FieldValue::Bytes(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_field_value_serde_tagging() {
        let json = serde_json::to_string(&FieldValue::Float(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"float","value":1.5}"#);

        let value: FieldValue = serde_json::from_str(r#"{"type":"int","value":-9}"#).unwrap();
        assert_eq!(value, FieldValue::Int(-9));
    }

    #[test]
    fn test_parser_constructors() {
        let p = Parser::builtin(
            "p1",
            "three floats",
            BuiltinKind::Ieee3Floats,
            vec![ParserField::new("a", "dev-1", FieldType::Float32, 0)],
        );
        assert_eq!(p.kind, ParserKind::Builtin);
        assert_eq!(p.builtin.as_deref(), Some("ieee_3_floats"));

        let f = Parser::fielded("p2", "fielded", vec![]);
        assert_eq!(f.kind, ParserKind::Fielded);
        assert!(f.builtin.is_none());
    }
}
