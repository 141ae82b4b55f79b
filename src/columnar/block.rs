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

//! # Columnar Block Layout
//!
//! ```text
//! ['B'][u64 sequence][u32 schema_version][u32 row_count][u16 column_count]
//! column_count x [u8 type tag][u32 body length][body]
//! ```
//!
//! All integers are little-endian. Bodies:
//!
//! - **Integer**: validity bitmap, then zigzag-encoded deltas between present
//!   values as LEB128
//! - **Floating**: validity bitmap, then `f64` for each present value
//! - **Boolean**: validity bitmap, then a bitmap of the present values
//! - **String**: LEB128 byte length for every row, then the concatenated UTF-8
//!
//! Bitmaps are LSB-first, one bit per row, rounded up to whole bytes.

use std::borrow::Cow;

use crate::columnar::schema::{parse_boolean, parse_floating, parse_integer, ColumnType};
use crate::errors::{Result, TabError};

/// Payload kind tag of a serialized block.
pub const BLOCK_KIND: u8 = b'B';

const HEADER_LEN: usize = 1 + 8 + 4 + 4 + 2;

/// One column of a block.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnBuffer {
    String(Vec<String>),
    Integer(Vec<Option<i64>>),
    Floating(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
}

impl ColumnBuffer {
    /// Strictly parses `values` under `column_type`; empty text becomes null.
    pub fn from_texts(column_type: ColumnType, values: Vec<String>) -> std::result::Result<Self, String> {
        fn typed<T>(
            values: Vec<String>,
            parse: impl Fn(&str) -> Option<T>,
            name: ColumnType,
        ) -> std::result::Result<Vec<Option<T>>, String> {
            values
                .iter()
                .map(|v| {
                    if v.is_empty() {
                        Ok(None)
                    } else {
                        parse(v)
                            .map(Some)
                            .ok_or_else(|| format!("value {v:?} is not a canonical {name}"))
                    }
                })
                .collect()
        }

        Ok(match column_type {
            ColumnType::String => ColumnBuffer::String(values),
            ColumnType::Integer => {
                ColumnBuffer::Integer(typed(values, parse_integer, ColumnType::Integer)?)
            }
            ColumnType::Floating => {
                ColumnBuffer::Floating(typed(values, parse_floating, ColumnType::Floating)?)
            }
            ColumnType::Boolean => {
                ColumnBuffer::Boolean(typed(values, parse_boolean, ColumnType::Boolean)?)
            }
        })
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnBuffer::String(_) => ColumnType::String,
            ColumnBuffer::Integer(_) => ColumnType::Integer,
            ColumnBuffer::Floating(_) => ColumnType::Floating,
            ColumnBuffer::Boolean(_) => ColumnType::Boolean,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuffer::String(v) => v.len(),
            ColumnBuffer::Integer(v) => v.len(),
            ColumnBuffer::Floating(v) => v.len(),
            ColumnBuffer::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical text of one row; nulls render as empty text.
    pub fn text_at(&self, row: usize) -> Cow<'_, str> {
        match self {
            ColumnBuffer::String(v) => Cow::Borrowed(v[row].as_str()),
            ColumnBuffer::Integer(v) => v[row].map(|x| Cow::Owned(x.to_string())).unwrap_or(Cow::Borrowed("")),
            ColumnBuffer::Floating(v) => v[row].map(|x| Cow::Owned(x.to_string())).unwrap_or(Cow::Borrowed("")),
            ColumnBuffer::Boolean(v) => v[row]
                .map(|x| Cow::Borrowed(if x { "true" } else { "false" }))
                .unwrap_or(Cow::Borrowed("")),
        }
    }

    pub fn into_texts(self) -> Vec<String> {
        match self {
            ColumnBuffer::String(v) => v,
            other => (0..other.len()).map(|row| other.text_at(row).into_owned()).collect(),
        }
    }

    /// Re-expresses the column under `to` through its canonical text.
    pub fn convert(self, to: ColumnType) -> std::result::Result<Self, String> {
        if self.column_type() == to {
            return Ok(self);
        }
        ColumnBuffer::from_texts(to, self.into_texts())
    }

    /// Rough in-memory footprint, used for the buffering budget.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            ColumnBuffer::String(v) => v.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum(),
            ColumnBuffer::Integer(v) => v.len() * std::mem::size_of::<Option<i64>>(),
            ColumnBuffer::Floating(v) => v.len() * std::mem::size_of::<Option<f64>>(),
            ColumnBuffer::Boolean(v) => v.len() * std::mem::size_of::<Option<bool>>(),
        }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            ColumnBuffer::String(values) => {
                for v in values {
                    write_leb128(v.len() as u64, out);
                }
                for v in values {
                    out.extend_from_slice(v.as_bytes());
                }
            }
            ColumnBuffer::Integer(values) => {
                write_validity(values.iter().map(Option::is_some), values.len(), out);
                let mut previous = 0i64;
                for v in values.iter().flatten() {
                    write_leb128(zigzag_encode(v.wrapping_sub(previous)), out);
                    previous = *v;
                }
            }
            ColumnBuffer::Floating(values) => {
                write_validity(values.iter().map(Option::is_some), values.len(), out);
                for v in values.iter().flatten() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            ColumnBuffer::Boolean(values) => {
                write_validity(values.iter().map(Option::is_some), values.len(), out);
                let present: Vec<bool> = values.iter().flatten().copied().collect();
                write_validity(present.iter().copied(), present.len(), out);
            }
        }
    }

    fn decode_body(column_type: ColumnType, rows: usize, body: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = ByteCursor::new(body);
        let column = match column_type {
            ColumnType::String => {
                let mut lengths = Vec::with_capacity(rows);
                for _ in 0..rows {
                    lengths.push(cursor.leb128()? as usize);
                }
                let mut values = Vec::with_capacity(rows);
                for len in lengths {
                    let bytes = cursor.take(len)?;
                    let text = std::str::from_utf8(bytes).map_err(|e| format!("string column: {e}"))?;
                    values.push(text.to_string());
                }
                ColumnBuffer::String(values)
            }
            ColumnType::Integer => {
                let validity = read_bitmap(&mut cursor, rows)?;
                let mut previous = 0i64;
                let mut values = Vec::with_capacity(rows);
                for present in validity {
                    if present {
                        previous = previous.wrapping_add(zigzag_decode(cursor.leb128()?));
                        values.push(Some(previous));
                    } else {
                        values.push(None);
                    }
                }
                ColumnBuffer::Integer(values)
            }
            ColumnType::Floating => {
                let validity = read_bitmap(&mut cursor, rows)?;
                let mut values = Vec::with_capacity(rows);
                for present in validity {
                    if present {
                        let bytes: [u8; 8] = cursor
                            .take(8)?
                            .try_into()
                            .map_err(|_| "short f64".to_string())?;
                        values.push(Some(f64::from_le_bytes(bytes)));
                    } else {
                        values.push(None);
                    }
                }
                ColumnBuffer::Floating(values)
            }
            ColumnType::Boolean => {
                let validity = read_bitmap(&mut cursor, rows)?;
                let present = validity.iter().filter(|p| **p).count();
                let mut bits = read_bitmap(&mut cursor, present)?.into_iter();
                let mut values = Vec::with_capacity(rows);
                for is_present in validity {
                    if is_present {
                        values.push(bits.next());
                    } else {
                        values.push(None);
                    }
                }
                ColumnBuffer::Boolean(values)
            }
        };
        if !cursor.is_done() {
            return Err(format!("{} trailing bytes in {column_type} column", cursor.remaining()));
        }
        Ok(column)
    }
}

/// One chunk's rows, stored column by column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnarBlock {
    pub sequence: u64,
    /// Schema version the columns were encoded under.
    pub schema_version: u32,
    pub row_count: u32,
    pub columns: Vec<ColumnBuffer>,
}

impl ColumnarBlock {
    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(ColumnBuffer::column_type).collect()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.columns.iter().map(ColumnBuffer::estimated_bytes).sum()
    }

    /// Serializes the block, kind tag included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.estimated_bytes());
        out.push(BLOCK_KIND);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.schema_version.to_le_bytes());
        out.extend_from_slice(&self.row_count.to_le_bytes());
        out.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());

        let mut body = Vec::new();
        for column in &self.columns {
            body.clear();
            column.encode_body(&mut body);
            out.push(column.column_type().tag());
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend_from_slice(&body);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let (kind, sequence, schema_version, row_count, column_count) = read_header(&mut cursor)
            .map_err(|e| TabError::schema_mismatch(0, format!("unreadable block header: {e}")))?;
        if kind != BLOCK_KIND {
            return Err(TabError::schema_mismatch(sequence, format!("unexpected payload kind {kind:#04x}")));
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for index in 0..column_count {
            let column = read_column(&mut cursor, row_count as usize)
                .map_err(|e| TabError::schema_mismatch(sequence, format!("column {index}: {e}")))?;
            columns.push(column);
        }
        if !cursor.is_done() {
            return Err(TabError::schema_mismatch(sequence, "trailing bytes after last column"));
        }

        Ok(Self {
            sequence,
            schema_version,
            row_count,
            columns,
        })
    }
}

type BlockHeader = (u8, u64, u32, u32, u16);

fn read_header(cursor: &mut ByteCursor<'_>) -> std::result::Result<BlockHeader, String> {
    Ok((cursor.u8()?, cursor.u64()?, cursor.u32()?, cursor.u32()?, cursor.u16()?))
}

fn read_column(cursor: &mut ByteCursor<'_>, rows: usize) -> std::result::Result<ColumnBuffer, String> {
    let tag = cursor.u8()?;
    let column_type = ColumnType::from_tag(tag).ok_or_else(|| format!("unknown type tag {tag}"))?;
    let len = cursor.u32()? as usize;
    let body = cursor.take(len)?;
    ColumnBuffer::decode_body(column_type, rows, body)
}

/// Maps signed integers onto unsigned so small magnitudes stay short.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_leb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_validity(bits: impl Iterator<Item = bool>, count: usize, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + count.div_ceil(8), 0);
    for (i, bit) in bits.enumerate() {
        if bit {
            out[start + i / 8] |= 1 << (i % 8);
        }
    }
}

fn read_bitmap(cursor: &mut ByteCursor<'_>, count: usize) -> std::result::Result<Vec<bool>, String> {
    let bytes = cursor.take(count.div_ceil(8))?;
    Ok((0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect())
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], String> {
        if len > self.remaining() {
            return Err(format!("needs {len} bytes, {} left", self.remaining()));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> std::result::Result<u16, String> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> std::result::Result<u64, String> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn leb128(&mut self) -> std::result::Result<u64, String> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err("LEB128 value overflows u64".to_string());
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err("LEB128 value overflows u64".to_string());
            }
        }
    }
}
