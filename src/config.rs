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

//! # Pipeline Configuration
//!
//! A single [`PipelineConfig`] is built at the application boundary (command
//! line, JSON or YAML file) and handed to every pipeline by reference. Missing
//! keys fall back to defaults, so a config file only needs the knobs it changes.
//!
//! ```yaml
//! chunk_row_count: 20000
//! compression_level: 9
//! worker_count: 4
//! on_malformed_row: skip
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TabError};

/// What the reader does with a row whose field count is wrong.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    /// Fail the file. Partial conversion would corrupt the columnar schema.
    #[default]
    Abort,
    /// Drop the row, log it and keep going.
    Skip,
}

/// Configuration for one pipeline run (one or many files).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows per chunk handed from the reader to the encoder.
    pub chunk_row_count: usize,
    /// Zstd level used for every frame.
    pub compression_level: i32,
    /// Worker threads used for frame compression and decompression.
    pub worker_count: usize,
    /// Buffer every block until finalization instead of journaling them to disk.
    pub buffer_all_for_finalization: bool,
    pub on_malformed_row: MalformedRowPolicy,
    /// Blocks allowed between submission to the worker pool and being written.
    /// Zero means twice the worker count.
    pub max_in_flight: usize,
    /// Bytes read from the head of a file for format detection.
    pub sample_size: usize,
    /// Byte block size used by the chunked reader.
    pub read_buffer_size: usize,
    /// Upper bound on encoded bytes held in memory in buffer-all mode.
    pub max_buffered_bytes: usize,
    /// Files processed concurrently by the directory runners.
    pub files_in_parallel: usize,
    /// Extensions picked up by the directory runners.
    pub extensions: Vec<String>,
    /// Minimum share of sample lines that must agree on the modal delimiter count.
    pub min_delimiter_consistency: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_row_count: 50_000,
            compression_level: 18,
            worker_count: num_cpus::get().max(1),
            buffer_all_for_finalization: true,
            on_malformed_row: MalformedRowPolicy::Abort,
            max_in_flight: 0,
            sample_size: 64 * 1024,
            read_buffer_size: 1024 * 1024,
            max_buffered_bytes: 1024 * 1024 * 1024,
            files_in_parallel: 1,
            extensions: vec!["tbl".to_string(), "csv".to_string(), "txt".to_string()],
            min_delimiter_consistency: 0.5,
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let config: PipelineConfig = match ext.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => {
                return Err(TabError::config(format!(
                    "unsupported config extension '{other}' for {}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_row_count == 0 {
            return Err(TabError::config("chunk_row_count must be greater than zero"));
        }
        if self.worker_count == 0 {
            return Err(TabError::config("worker_count must be at least one"));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(TabError::config(format!(
                "compression_level {} outside 1..=22",
                self.compression_level
            )));
        }
        if self.files_in_parallel == 0 {
            return Err(TabError::config("files_in_parallel must be at least one"));
        }
        if !(self.min_delimiter_consistency > 0.0 && self.min_delimiter_consistency <= 1.0) {
            return Err(TabError::config(format!(
                "min_delimiter_consistency {} outside (0, 1]",
                self.min_delimiter_consistency
            )));
        }
        if self.sample_size == 0 || self.read_buffer_size == 0 {
            return Err(TabError::config("sample_size and read_buffer_size must be non-zero"));
        }
        Ok(())
    }

    /// Backpressure bound a codec running `workers` threads applies. Zero in the
    /// config means twice the worker count.
    pub fn effective_in_flight(&self, workers: usize) -> usize {
        if self.max_in_flight == 0 {
            workers.max(1) * 2
        } else {
            self.max_in_flight
        }
    }

    /// Worker threads each file gets when `files_in_parallel` files share the budget.
    pub fn worker_share(&self) -> usize {
        (self.worker_count / self.files_in_parallel.max(1)).max(1)
    }

    pub fn with_chunk_row_count(mut self, rows: usize) -> Self {
        self.chunk_row_count = rows;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_buffer_all(mut self, buffer_all: bool) -> Self {
        self.buffer_all_for_finalization = buffer_all;
        self
    }

    pub fn with_malformed_row_policy(mut self, policy: MalformedRowPolicy) -> Self {
        self.on_malformed_row = policy;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit;
        self
    }

    pub fn with_files_in_parallel(mut self, files: usize) -> Self {
        self.files_in_parallel = files;
        self
    }

    pub fn with_max_buffered_bytes(mut self, bytes: usize) -> Self {
        self.max_buffered_bytes = bytes;
        self
    }
}
