//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Tabpress.
//! The Tabpress project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! # Data Ingestion Module
//!
//! Turns a delimited text file into an ordered stream of row chunks.
//!
//! ## Module Components
//!
//! - **Format Detection** ([format.rs](format/index.html)): encoding, delimiter and header sniffing
//! - **Reader** ([reader.rs](reader/index.html)): bounded-memory chunked reading
//!
//! ## Supported Input
//!
//! - **Delimiters**: comma, tab, pipe, semicolon
//! - **Encodings**: UTF-8 (with or without BOM), UTF-16 LE/BE (BOM required),
//!   GB18030, Windows-1252
//! - **Line endings**: LF and CRLF
//!
//! Quoting is not modelled: a delimiter always separates fields, and any row
//! whose field count differs from the header (or the detected count) is a
//! malformed row.
//!
//! ## Usage Patterns
//!
//! ```rust
//! use tabpress::config::PipelineConfig;
//! use tabpress::ingest::{ChunkedTextReader, FormatSniffer};
//!
//! let config = PipelineConfig::default();
//! let descriptor = FormatSniffer::from_config(&config).sniff_path(&path)?;
//! for chunk in ChunkedTextReader::open(descriptor, &config)? {
//!     let chunk = chunk?;
//!     println!("chunk {} has {} rows", chunk.sequence, chunk.row_count());
//! }
//! ```

pub mod format;
pub mod reader;

pub use format::{delimiter_hint, FileDescriptor, FormatSniffer, LineTerminator, TextEncoding};
pub use reader::{ChunkedTextReader, RowChunk};
