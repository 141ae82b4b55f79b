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

use crate::columnar::block::ColumnarBlock;
use crate::columnar::schema::ColumnDef;
use crate::errors::{Result, TabError};
use crate::ingest::RowChunk;

/// Rebuilds row chunks from blocks decoded against the final schema.
///
/// Blocks must arrive in sequence order; numeric and boolean values render in
/// their canonical text form.
pub struct ColumnarDecoder {
    columns: Vec<ColumnDef>,
    next_sequence: u64,
    rows_decoded: u64,
}

impl ColumnarDecoder {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            next_sequence: 0,
            rows_decoded: 0,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn rows_decoded(&self) -> u64 {
        self.rows_decoded
    }

    pub fn decode(&mut self, block: ColumnarBlock) -> Result<RowChunk> {
        let sequence = block.sequence;
        if block.columns.len() != self.columns.len() {
            return Err(TabError::schema_mismatch(
                sequence,
                format!(
                    "block declares {} columns, schema has {}",
                    block.columns.len(),
                    self.columns.len()
                ),
            ));
        }
        if sequence != self.next_sequence {
            return Err(TabError::schema_mismatch(
                sequence,
                format!("expected block {}, got {sequence}", self.next_sequence),
            ));
        }
        for (index, (column, def)) in block.columns.iter().zip(&self.columns).enumerate() {
            if column.column_type() != def.column_type {
                return Err(TabError::schema_mismatch(
                    sequence,
                    format!(
                        "column {index} ('{}') is {}, schema says {}",
                        def.name,
                        column.column_type(),
                        def.column_type
                    ),
                ));
            }
            if column.len() != block.row_count as usize {
                return Err(TabError::schema_mismatch(
                    sequence,
                    format!("column {index} holds {} rows, block declares {}", column.len(), block.row_count),
                ));
            }
        }

        let row_count = block.row_count as usize;
        let mut rows: Vec<Vec<String>> = (0..row_count).map(|_| Vec::with_capacity(self.columns.len())).collect();
        for column in block.columns {
            for (row, text) in rows.iter_mut().zip(column.into_texts()) {
                row.push(text);
            }
        }

        let chunk = RowChunk {
            sequence,
            first_row_index: self.rows_decoded,
            rows,
        };
        self.next_sequence += 1;
        self.rows_decoded += row_count as u64;
        Ok(chunk)
    }
}
