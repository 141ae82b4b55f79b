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

//! # Tabpress Error Module
//!
//! This module defines the error types used throughout Tabpress for consistent
//! error handling and reporting.
//!
//! ## Error Categories
//!
//! - **Detection**: `FormatUndetectable`, `UnsupportedEncoding`
//! - **Row shape**: `MalformedRow` (the only kind a pipeline may recover from)
//! - **Artifact integrity**: `SchemaBlockMismatch`, `FrameChecksumMismatch`, `FrameTruncated`
//! - **Resources**: `ResourceExhausted` (memory budget or disk pressure)
//! - **Ambient**: `Io`, `Config`, `Serde`, `Cancelled`, `Internal`
//!
//! Every variant maps to a plain [`ErrorKind`] so outcomes can be recorded in
//! statistics and compared in tests without holding on to the error itself.
//!
//! ## Usage
//!
//! ```rust
//! use tabpress::errors::{Result, TabError};
//!
//! fn check(level: i32) -> Result<()> {
//!     if !(1..=22).contains(&level) {
//!         return Err(TabError::config(format!("compression level {level} out of range")));
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type used throughout Tabpress.
pub type Result<T> = std::result::Result<T, TabError>;

/// Canonical error enumeration for Tabpress.
#[derive(Debug, Error)]
pub enum TabError {
    /// No candidate delimiter had a stable per-line count, or the sample was empty.
    #[error("format undetectable for '{path}': {reason}")]
    FormatUndetectable { path: PathBuf, reason: String },

    /// A row's field count differs from the established field count.
    #[error(
        "malformed row in '{path}': data row {row_index} (line {line_number}) has {found} fields, expected {expected}"
    )]
    MalformedRow {
        path: PathBuf,
        /// 0-based index among data rows; the header is not counted.
        row_index: u64,
        /// 1-based physical line number.
        line_number: u64,
        expected: usize,
        found: usize,
    },

    /// A block disagrees with the schema it is decoded against.
    #[error("block {sequence} does not match schema: {message}")]
    SchemaBlockMismatch { sequence: u64, message: String },

    /// A frame's payload does not hash to the checksum it carries.
    #[error("frame {frame_index} checksum mismatch: expected {expected:#010x}, found {}", describe_checksum(.actual))]
    FrameChecksumMismatch {
        frame_index: u64,
        expected: u32,
        actual: Option<u32>,
    },

    /// A frame promised more bytes than the artifact holds, or the end marker is missing.
    #[error("frame {frame_index} truncated: expected {expected} bytes, {available} available")]
    FrameTruncated {
        frame_index: u64,
        expected: u64,
        available: u64,
    },

    /// The input is not decodable by any supported encoding.
    #[error("unsupported encoding for '{path}': {reason}")]
    UnsupportedEncoding { path: PathBuf, reason: String },

    /// Memory budget exceeded or the disk is full.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Errors originating from filesystem IO.
    #[error("io error: {0}")]
    Io(#[source] io::Error),

    /// Invalid configuration values.
    #[error("configuration error: {0}")]
    Config(String),

    /// Manifest or configuration (de)serialization failures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// The run was cancelled between two stages.
    #[error("pipeline cancelled during {stage}")]
    Cancelled { stage: String },

    /// Catch-all variant for unexpected situations.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`TabError`] recorded in statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FormatUndetectable,
    MalformedRow,
    SchemaBlockMismatch,
    FrameChecksumMismatch,
    FrameTruncated,
    UnsupportedEncoding,
    ResourceExhausted,
    Io,
    Config,
    Serde,
    Cancelled,
    Internal,
}

fn describe_checksum(actual: &Option<u32>) -> String {
    match actual {
        Some(value) => format!("{value:#010x}"),
        None => "undecodable payload".to_string(),
    }
}

impl From<io::Error> for TabError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::OutOfMemory => {
                TabError::ResourceExhausted(err.to_string())
            }
            _ => TabError::Io(err),
        }
    }
}

impl From<serde_json::Error> for TabError {
    fn from(err: serde_json::Error) -> Self {
        TabError::Serde(err.to_string())
    }
}

impl From<serde_yaml::Error> for TabError {
    fn from(err: serde_yaml::Error) -> Self {
        TabError::Serde(err.to_string())
    }
}

impl From<csv::Error> for TabError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(io_err) => io_err.into(),
            other => TabError::Internal(format!("CSV error: {other:?}")),
        }
    }
}

impl TabError {
    /// Helper to construct configuration errors.
    pub fn config<T: Into<String>>(message: T) -> Self {
        TabError::Config(message.into())
    }

    /// Helper to construct internal errors.
    pub fn internal<T: Into<String>>(message: T) -> Self {
        TabError::Internal(message.into())
    }

    /// Helper to construct schema/block mismatches.
    pub fn schema_mismatch(sequence: u64, message: impl Into<String>) -> Self {
        TabError::SchemaBlockMismatch {
            sequence,
            message: message.into(),
        }
    }

    /// Helper to construct cancellation errors.
    pub fn cancelled(stage: impl Into<String>) -> Self {
        TabError::Cancelled {
            stage: stage.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TabError::FormatUndetectable { .. } => ErrorKind::FormatUndetectable,
            TabError::MalformedRow { .. } => ErrorKind::MalformedRow,
            TabError::SchemaBlockMismatch { .. } => ErrorKind::SchemaBlockMismatch,
            TabError::FrameChecksumMismatch { .. } => ErrorKind::FrameChecksumMismatch,
            TabError::FrameTruncated { .. } => ErrorKind::FrameTruncated,
            TabError::UnsupportedEncoding { .. } => ErrorKind::UnsupportedEncoding,
            TabError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            TabError::Io(_) => ErrorKind::Io,
            TabError::Config(_) => ErrorKind::Config,
            TabError::Serde(_) => ErrorKind::Serde,
            TabError::Cancelled { .. } => ErrorKind::Cancelled,
            TabError::Internal(_) => ErrorKind::Internal,
        }
    }
}
