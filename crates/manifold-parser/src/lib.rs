// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # manifold-parser
//!
//! Declarative field extraction for the Manifold telemetry backend.
//!
//! The [`Engine`] decodes raw device responses into typed per-device records
//! using the parser descriptors from `manifold-core`: either an ordered list
//! of offset/width/endianness field rules, or one of the built-in whole-frame
//! codecs (`ieee_3_floats`, `ascii_3_floats`, `int16_*`, `int32_signed`,
//! `raw_bytes`).
//!
//! # Example
//!
//! ```rust
//! use manifold_core::types::{FieldType, Parser, ParserField};
//! use manifold_parser::Engine;
//!
//! let parser = Parser::fielded(
//!     "p-1",
//!     "meter",
//!     vec![ParserField::new("count", "dev-1", FieldType::Uint16, 0)],
//! );
//!
//! let data = Engine::new().parse(&parser, &[0x00, 0x2A]).unwrap();
//! assert_eq!(data["dev-1"]["count"].as_f64(), Some(42.0));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

mod engine;

pub use engine::Engine;
