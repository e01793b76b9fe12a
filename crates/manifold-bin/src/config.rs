// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bootstrap configuration.
//!
//! A small YAML file listing the connections to create and start at boot.
//! Full configuration management lives with the external store; this file
//! only seeds a standalone process.
//!
//! ```yaml
//! connections:
//!   - name: line-3 plc
//!     kind: modbus_tcp
//!     config:
//!       host: 192.168.1.50
//!       port: 502
//!       timeout: 10
//!   - name: flow meter
//!     kind: modbus_rtu
//!     parser: flow-parser
//!     config:
//!       port: /dev/ttyUSB0
//!       baud_rate: 9600
//!       timeout: 1000
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use manifold_core::error::{ConfigError, ConfigResult};
use manifold_core::types::ConnectionKind;

/// Session id used when an entry does not name one.
pub const DEFAULT_SESSION: &str = "default";

// =============================================================================
// BootstrapConfig
// =============================================================================

/// The root of the bootstrap file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Connections created and started at boot.
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

/// One bootstrap connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// Human-readable connection name.
    pub name: String,
    /// Protocol kind.
    pub kind: ConnectionKind,
    /// Owning session id; defaults to [`DEFAULT_SESSION`].
    #[serde(default)]
    pub session: Option<String>,
    /// Parser id to attach to reads.
    #[serde(default)]
    pub parser: Option<String>,
    /// Protocol-specific configuration blob.
    pub config: serde_json::Value,
}

impl ConnectionEntry {
    /// The session id this entry belongs to.
    pub fn session_id(&self) -> &str {
        self.session.as_deref().unwrap_or(DEFAULT_SESSION)
    }
}

impl BootstrapConfig {
    /// Loads and validates a bootstrap file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::parse(path, e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates entry names and blobs.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for entry in &self.connections {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::validation(
                    "connections.name",
                    "must not be empty",
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::validation(
                    "connections.name",
                    format!("duplicate connection name '{}'", entry.name),
                ));
            }
            if !entry.config.is_object() {
                return Err(ConfigError::validation(
                    format!("connections.{}.config", entry.name),
                    "must be a mapping",
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
connections:
  - name: line-3 plc
    kind: modbus_tcp
    config:
      host: 192.168.1.50
      port: 502
      timeout: 10
  - name: flow meter
    kind: modbus_rtu
    parser: flow-parser
    config:
      port: /dev/ttyUSB0
      baud_rate: 19200
      parity: E
      timeout: 750
"#;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample() {
        let file = write_file(SAMPLE);
        let config = BootstrapConfig::load(file.path()).unwrap();

        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connections[0].kind, ConnectionKind::ModbusTcp);
        assert_eq!(config.connections[0].session_id(), DEFAULT_SESSION);
        assert_eq!(config.connections[1].parser.as_deref(), Some("flow-parser"));
        assert_eq!(config.connections[1].config["baud_rate"], 19200);
    }

    #[test]
    fn test_missing_file() {
        let err = BootstrapConfig::load(Path::new("/nonexistent/manifold.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_yaml() {
        let file = write_file("connections: [not: {valid");
        let err = BootstrapConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let file = write_file(
            r#"
connections:
  - name: plc
    kind: modbus_tcp
    config: {host: a, port: 502}
  - name: plc
    kind: modbus_tcp
    config: {host: b, port: 502}
"#,
        );
        let err = BootstrapConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let file = write_file("connections: []");
        let config = BootstrapConfig::load(file.path()).unwrap();
        assert!(config.connections.is_empty());
    }
}
