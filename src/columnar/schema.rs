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

//! # Column Types and Schema Widening
//!
//! Every column starts uncommitted and moves up a fixed lattice as values
//! arrive:
//!
//! ```text
//!   Integer -> Floating -> String
//!   Boolean ------------> String
//! ```
//!
//! A type is only kept while *every* non-empty value seen so far parses
//! strictly under it, where strict means the canonical rendering of the parsed
//! value is the original text. The committed type therefore depends on the set
//! of values, never on how they were split into chunks.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TabError};
use crate::ingest::RowChunk;

/// Closed set of column types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Floating,
    Boolean,
}

impl ColumnType {
    pub fn tag(&self) -> u8 {
        match self {
            ColumnType::String => 0,
            ColumnType::Integer => 1,
            ColumnType::Floating => 2,
            ColumnType::Boolean => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ColumnType::String),
            1 => Some(ColumnType::Integer),
            2 => Some(ColumnType::Floating),
            3 => Some(ColumnType::Boolean),
            _ => None,
        }
    }

    /// Whether `text` is representable without loss. Empty text is null for every type.
    pub fn accepts(&self, text: &str) -> bool {
        text.is_empty()
            || match self {
                ColumnType::String => true,
                ColumnType::Integer => parse_integer(text).is_some(),
                ColumnType::Floating => parse_floating(text).is_some(),
                ColumnType::Boolean => parse_boolean(text).is_some(),
            }
    }

    /// Least upper bound of two types on the widening lattice.
    pub fn join(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Floating) | (Floating, Integer) => Floating,
            _ => String,
        }
    }

    /// True when `self` may be replaced by `to` without narrowing.
    pub fn widens_to(self, to: ColumnType) -> bool {
        self.join(to) == to
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Floating => "floating",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Strict integer parse: `+5`, `007` and `-0` are rejected.
pub fn parse_integer(text: &str) -> Option<i64> {
    let value: i64 = text.parse().ok()?;
    (value.to_string() == text).then_some(value)
}

/// Strict float parse: finite, and `Display` reproduces the text (`1.50`, `1e5` are rejected).
pub fn parse_floating(text: &str) -> Option<f64> {
    let value: f64 = text.parse().ok()?;
    (value.is_finite() && value.to_string() == text).then_some(value)
}

pub fn parse_boolean(text: &str) -> Option<bool> {
    match text {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Named, typed column as recorded in the artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// One upward move of a column on the lattice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideningEvent {
    pub column: usize,
    /// `None` when the column had not committed to a type yet.
    pub from: Option<ColumnType>,
    pub to: ColumnType,
    /// Sequence number of the chunk that caused the change.
    pub sequence: u64,
    /// Schema version after the change.
    pub version: u32,
}

#[derive(Clone, Debug)]
struct Viability {
    saw_value: bool,
    integer: bool,
    floating: bool,
    boolean: bool,
}

impl Default for Viability {
    fn default() -> Self {
        Self {
            saw_value: false,
            integer: true,
            floating: true,
            boolean: true,
        }
    }
}

impl Viability {
    fn observe(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.saw_value = true;
        if self.integer && parse_integer(text).is_none() {
            self.integer = false;
        }
        if self.floating && parse_floating(text).is_none() {
            self.floating = false;
        }
        if self.boolean && parse_boolean(text).is_none() {
            self.boolean = false;
        }
    }

    fn resolve(&self) -> Option<ColumnType> {
        if !self.saw_value {
            None
        } else if self.integer {
            Some(ColumnType::Integer)
        } else if self.floating {
            Some(ColumnType::Floating)
        } else if self.boolean {
            Some(ColumnType::Boolean)
        } else {
            Some(ColumnType::String)
        }
    }
}

/// Incrementally built schema of one file.
///
/// Empty before the first chunk; the first observed chunk fixes the column
/// count. Types only ever move up the lattice.
#[derive(Clone, Debug, Default)]
pub struct ColumnSchema {
    names: Vec<String>,
    committed: Vec<Option<ColumnType>>,
    viability: Vec<Viability>,
    version: u32,
    widenings: Vec<WideningEvent>,
}

impl ColumnSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.committed.len()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn widenings(&self) -> &[WideningEvent] {
        &self.widenings
    }

    /// Committed type, `None` while the column has only seen empty values.
    pub fn committed(&self, column: usize) -> Option<ColumnType> {
        self.committed.get(column).copied().flatten()
    }

    /// Type blocks are encoded under right now; uncommitted columns are strings.
    pub fn effective_type(&self, column: usize) -> ColumnType {
        self.committed(column).unwrap_or(ColumnType::String)
    }

    pub fn effective_types(&self) -> Vec<ColumnType> {
        (0..self.column_count()).map(|c| self.effective_type(c)).collect()
    }

    /// Header names, or `col_0..col_{n-1}` when none were supplied.
    pub fn names(&self) -> Vec<String> {
        if self.names.len() == self.column_count() {
            self.names.clone()
        } else {
            (0..self.column_count()).map(|i| format!("col_{i}")).collect()
        }
    }

    pub fn set_names(&mut self, names: Vec<String>) {
        self.names = names;
    }

    /// Fixes the column count without observing values (header-only files).
    pub fn ensure_columns(&mut self, count: usize) {
        if self.committed.is_empty() {
            self.committed = vec![None; count];
            self.viability = vec![Viability::default(); count];
        }
    }

    /// Final column definitions, uncommitted columns resolved to strings.
    pub fn definitions(&self) -> Vec<ColumnDef> {
        self.names()
            .into_iter()
            .zip(self.effective_types())
            .map(|(name, column_type)| ColumnDef { name, column_type })
            .collect()
    }

    /// True when some column changed after the chunk `sequence` was encoded.
    pub fn widened_after(&self, sequence: u64) -> bool {
        self.widenings.iter().any(|e| e.sequence > sequence)
    }

    /// Folds every value of `chunk` into the schema and returns the widenings it caused.
    pub fn observe(&mut self, chunk: &RowChunk) -> Result<Vec<WideningEvent>> {
        let width = chunk.field_count();
        self.ensure_columns(width);
        if width != self.column_count() {
            return Err(TabError::schema_mismatch(
                chunk.sequence,
                format!("chunk has {width} columns, schema has {}", self.column_count()),
            ));
        }

        for row in &chunk.rows {
            if row.len() != width {
                return Err(TabError::schema_mismatch(
                    chunk.sequence,
                    format!("ragged row with {} fields in a {width}-column chunk", row.len()),
                ));
            }
            for (viability, value) in self.viability.iter_mut().zip(row) {
                viability.observe(value);
            }
        }

        let mut changed = Vec::new();
        for column in 0..width {
            let resolved = self.viability[column].resolve();
            if resolved != self.committed[column] {
                changed.push((column, self.committed[column], resolved));
                self.committed[column] = resolved;
            }
        }
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        self.version += 1;
        let mut events = Vec::with_capacity(changed.len());
        for (column, from, to) in changed {
            let Some(to) = to else {
                return Err(TabError::internal(format!("column {column} lost its committed type")));
            };
            let event = WideningEvent {
                column,
                from,
                to,
                sequence: chunk.sequence,
                version: self.version,
            };
            match from {
                Some(previous) => log::info!(
                    "column {column} widened {previous} -> {to} at chunk {} (schema v{})",
                    chunk.sequence,
                    self.version
                ),
                None => log::debug!(
                    "column {column} committed to {to} at chunk {} (schema v{})",
                    chunk.sequence,
                    self.version
                ),
            }
            events.push(event);
        }
        self.widenings.extend(events.iter().cloned());
        Ok(events)
    }
}
