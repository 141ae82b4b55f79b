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

use crate::columnar::block::{ColumnBuffer, ColumnarBlock};
use crate::columnar::schema::{ColumnDef, ColumnSchema, WideningEvent};
use crate::config::PipelineConfig;
use crate::errors::{Result, TabError};
use crate::ingest::RowChunk;

/// Where encoded blocks wait for the end-of-file finalization pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizationMode {
    /// Keep every block in memory until the schema is final.
    BufferAll,
    /// Hand blocks out immediately; stale ones are patched from a journal later.
    StreamThenPatch,
}

impl FinalizationMode {
    pub fn from_config(config: &PipelineConfig) -> Self {
        if config.buffer_all_for_finalization {
            FinalizationMode::BufferAll
        } else {
            FinalizationMode::StreamThenPatch
        }
    }
}

/// Final schema handed to the artifact manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalSchema {
    pub columns: Vec<ColumnDef>,
    pub version: u32,
    pub widenings: Vec<WideningEvent>,
}

impl FinalSchema {
    /// True when a block encoded at `sequence` predates a widening.
    pub fn is_stale(&self, sequence: u64) -> bool {
        self.widenings.iter().any(|e| e.sequence > sequence)
    }

    /// Re-encodes a stale block under the final column types.
    ///
    /// Values are carried over through their canonical text, which every
    /// final type accepts because the schema saw all of them.
    pub fn reencode(&self, block: ColumnarBlock) -> Result<ColumnarBlock> {
        if block.columns.len() != self.columns.len() {
            return Err(TabError::schema_mismatch(
                block.sequence,
                format!(
                    "block has {} columns, schema has {}",
                    block.columns.len(),
                    self.columns.len()
                ),
            ));
        }
        let sequence = block.sequence;
        let columns = block
            .columns
            .into_iter()
            .zip(&self.columns)
            .map(|(column, def)| {
                column
                    .convert(def.column_type)
                    .map_err(|e| TabError::schema_mismatch(sequence, format!("column '{}': {e}", def.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ColumnarBlock {
            sequence,
            schema_version: self.version,
            row_count: block.row_count,
            columns,
        })
    }
}

/// Turns row chunks into columnar blocks while tracking schema widening.
pub struct ColumnarEncoder {
    schema: ColumnSchema,
    mode: FinalizationMode,
    buffered: Vec<ColumnarBlock>,
    buffered_bytes: usize,
    max_buffered_bytes: usize,
    blocks_encoded: u64,
    rows_encoded: u64,
}

impl ColumnarEncoder {
    pub fn new(mode: FinalizationMode, max_buffered_bytes: usize) -> Self {
        Self {
            schema: ColumnSchema::new(),
            mode,
            buffered: Vec::new(),
            buffered_bytes: 0,
            max_buffered_bytes,
            blocks_encoded: 0,
            rows_encoded: 0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(FinalizationMode::from_config(config), config.max_buffered_bytes)
    }

    pub fn mode(&self) -> FinalizationMode {
        self.mode
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn set_column_names(&mut self, names: Vec<String>) {
        self.schema.set_names(names);
    }

    pub fn blocks_encoded(&self) -> u64 {
        self.blocks_encoded
    }

    pub fn rows_encoded(&self) -> u64 {
        self.rows_encoded
    }

    /// Encodes one chunk under the schema valid after observing it.
    pub fn encode(&mut self, chunk: RowChunk) -> Result<ColumnarBlock> {
        self.schema.observe(&chunk)?;

        let width = self.schema.column_count();
        let row_count = u32::try_from(chunk.rows.len()).map_err(|_| {
            TabError::ResourceExhausted(format!("chunk {} exceeds u32 rows", chunk.sequence))
        })?;
        if width > u16::MAX as usize {
            return Err(TabError::schema_mismatch(chunk.sequence, format!("{width} columns exceed the block limit")));
        }

        let mut columns: Vec<Vec<String>> = (0..width).map(|_| Vec::with_capacity(chunk.rows.len())).collect();
        for row in chunk.rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }

        let buffers = columns
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                ColumnBuffer::from_texts(self.schema.effective_type(index), values)
                    .map_err(|e| TabError::schema_mismatch(chunk.sequence, format!("column {index}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.blocks_encoded += 1;
        self.rows_encoded += u64::from(row_count);
        Ok(ColumnarBlock {
            sequence: chunk.sequence,
            schema_version: self.schema.version(),
            row_count,
            columns: buffers,
        })
    }

    /// Encodes a chunk and either keeps the block (buffer-all) or returns it for streaming.
    pub fn push(&mut self, chunk: RowChunk) -> Result<Option<ColumnarBlock>> {
        let block = self.encode(chunk)?;
        match self.mode {
            FinalizationMode::StreamThenPatch => Ok(Some(block)),
            FinalizationMode::BufferAll => {
                self.buffered_bytes += block.estimated_bytes();
                if self.buffered_bytes > self.max_buffered_bytes {
                    return Err(TabError::ResourceExhausted(format!(
                        "buffered blocks use {} bytes, budget is {}",
                        self.buffered_bytes, self.max_buffered_bytes
                    )));
                }
                self.buffered.push(block);
                Ok(None)
            }
        }
    }

    /// Closes the schema; `field_count` fixes the width when no row was seen.
    pub fn final_schema(&mut self, field_count: usize) -> FinalSchema {
        self.schema.ensure_columns(field_count);
        FinalSchema {
            columns: self.schema.definitions(),
            version: self.schema.version(),
            widenings: self.schema.widenings().to_vec(),
        }
    }

    /// Finalization pass for buffer-all mode: every buffered block, stale ones re-encoded.
    pub fn finish_buffered(&mut self, schema: &FinalSchema) -> Result<Vec<ColumnarBlock>> {
        let blocks = std::mem::take(&mut self.buffered);
        self.buffered_bytes = 0;
        let mut reencoded = 0usize;
        let finished = blocks
            .into_iter()
            .map(|block| {
                if schema.is_stale(block.sequence) {
                    reencoded += 1;
                    schema.reencode(block)
                } else {
                    Ok(block)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        if reencoded > 0 {
            log::info!("re-encoded {reencoded} of {} buffered blocks under schema v{}", finished.len(), schema.version);
        }
        Ok(finished)
    }
}
