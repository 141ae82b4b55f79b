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

use std::fs::File;
use std::io::Read;

use encoding_rs::{Decoder, DecoderResult};

use crate::config::{MalformedRowPolicy, PipelineConfig};
use crate::errors::{Result, TabError};
use crate::ingest::format::FileDescriptor;

/// Ordered slice of a file's data rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowChunk {
    pub sequence: u64,
    /// Data-row index of the first row in this chunk.
    pub first_row_index: u64,
    pub rows: Vec<Vec<String>>,
}

impl RowChunk {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn field_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }
}

/// Streams a delimited file as bounded [`RowChunk`]s.
///
/// Bytes are read in blocks of `read_buffer_size` and decoded incrementally,
/// so a multi-byte character or a line may straddle two blocks. The sequence
/// is lazy and single-pass; once an error is returned the reader is spent.
pub struct ChunkedTextReader<R: Read = File> {
    descriptor: FileDescriptor,
    source: R,
    decoder: Decoder,
    chunk_row_count: usize,
    policy: MalformedRowPolicy,
    byte_buf: Vec<u8>,
    pending: String,
    cursor: usize,
    header: Option<Vec<String>>,
    expected_fields: usize,
    line_number: u64,
    data_row_index: u64,
    rows_emitted: u64,
    rows_skipped: u64,
    bytes_read: u64,
    next_sequence: u64,
    ended_with_newline: bool,
    eof: bool,
    finished: bool,
}

impl ChunkedTextReader<File> {
    pub fn open(descriptor: FileDescriptor, config: &PipelineConfig) -> Result<Self> {
        let file = File::open(&descriptor.path)?;
        Self::from_reader(descriptor, file, config)
    }
}

impl<R: Read> ChunkedTextReader<R> {
    /// Wraps any byte source positioned at the start of the file.
    pub fn from_reader(descriptor: FileDescriptor, mut source: R, config: &PipelineConfig) -> Result<Self> {
        let mut bytes_read = 0;
        if descriptor.has_bom {
            let mut bom = vec![0u8; descriptor.encoding.bom().len()];
            source.read_exact(&mut bom)?;
            bytes_read = bom.len() as u64;
        }
        let decoder = descriptor.encoding.as_encoding().new_decoder_without_bom_handling();
        let expected_fields = descriptor.field_count;

        Ok(Self {
            descriptor,
            source,
            decoder,
            chunk_row_count: config.chunk_row_count.max(1),
            policy: config.on_malformed_row,
            byte_buf: vec![0u8; config.read_buffer_size.max(1)],
            pending: String::new(),
            cursor: 0,
            header: None,
            expected_fields,
            line_number: 0,
            data_row_index: 0,
            rows_emitted: 0,
            rows_skipped: 0,
            bytes_read,
            next_sequence: 0,
            ended_with_newline: true,
            eof: false,
            finished: false,
        })
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Header fields, available once the first chunk has been requested.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether the last line of the file carried a terminator. Meaningful after exhaustion.
    pub fn ended_with_newline(&self) -> bool {
        self.ended_with_newline
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next chunk of at most `chunk_row_count` rows, `None` at end of file.
    pub fn next_chunk(&mut self) -> Result<Option<RowChunk>> {
        if self.finished {
            return Ok(None);
        }
        match self.fill_chunk() {
            Ok(chunk) => {
                if chunk.is_none() {
                    self.finished = true;
                }
                Ok(chunk)
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    fn fill_chunk(&mut self) -> Result<Option<RowChunk>> {
        let first_row_index = self.data_row_index;
        let mut rows = Vec::with_capacity(self.chunk_row_count.min(4096));

        while rows.len() < self.chunk_row_count {
            match self.take_line()? {
                Some(line) => {
                    if let Some(row) = self.accept_line(&line)? {
                        rows.push(row);
                    }
                }
                None => break,
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }
        let chunk = RowChunk {
            sequence: self.next_sequence,
            first_row_index,
            rows,
        };
        self.next_sequence += 1;
        self.rows_emitted += chunk.rows.len() as u64;
        log::debug!(
            "{}: chunk {} with {} rows",
            self.descriptor.path.display(),
            chunk.sequence,
            chunk.rows.len()
        );
        Ok(Some(chunk))
    }

    /// Splits a non-blank line into a data row; the header and skipped rows yield `None`.
    fn accept_line(&mut self, line: &str) -> Result<Option<Vec<String>>> {
        let fields: Vec<String> = line
            .split(self.descriptor.delimiter)
            .map(str::to_string)
            .collect();

        if self.descriptor.has_header && self.header.is_none() {
            self.expected_fields = fields.len();
            self.header = Some(fields);
            return Ok(None);
        }

        let row_index = self.data_row_index;
        self.data_row_index += 1;
        if fields.len() == self.expected_fields {
            return Ok(Some(fields));
        }

        let err = TabError::MalformedRow {
            path: self.descriptor.path.clone(),
            row_index,
            line_number: self.line_number,
            expected: self.expected_fields,
            found: fields.len(),
        };
        match self.policy {
            MalformedRowPolicy::Abort => Err(err),
            MalformedRowPolicy::Skip => {
                log::warn!("skipping {err}");
                self.rows_skipped += 1;
                Ok(None)
            }
        }
    }

    /// Next non-blank line without its terminator, `None` once the input is exhausted.
    fn take_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(offset) = self.pending[self.cursor..].find('\n') {
                let end = self.cursor + offset;
                let raw = &self.pending[self.cursor..end];
                let line = raw.strip_suffix('\r').unwrap_or(raw).to_string();
                self.cursor = end + 1;
                self.line_number += 1;
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.eof {
                if self.cursor < self.pending.len() {
                    let raw = &self.pending[self.cursor..];
                    let line = raw.strip_suffix('\r').unwrap_or(raw).to_string();
                    self.cursor = self.pending.len();
                    self.line_number += 1;
                    self.ended_with_newline = false;
                    if !line.is_empty() {
                        return Ok(Some(line));
                    }
                }
                return Ok(None);
            }

            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        self.pending.drain(..self.cursor);
        self.cursor = 0;

        let n = self.source.read(&mut self.byte_buf)?;
        self.bytes_read += n as u64;
        let last = n == 0;
        if last {
            self.eof = true;
        }

        let mut input = &self.byte_buf[..n];
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length_without_replacement(input.len())
                .ok_or_else(|| TabError::ResourceExhausted("decode buffer size overflow".to_string()))?;
            self.pending.reserve(needed);
            let (result, read) =
                self.decoder
                    .decode_to_string_without_replacement(input, &mut self.pending, last);
            input = &input[read..];
            match result {
                DecoderResult::InputEmpty => return Ok(()),
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(_, _) => {
                    return Err(TabError::UnsupportedEncoding {
                        path: self.descriptor.path.clone(),
                        reason: format!(
                            "invalid {} byte sequence near byte {}",
                            self.descriptor.encoding.name(),
                            self.bytes_read - input.len() as u64
                        ),
                    })
                }
            }
        }
    }
}

impl<R: Read> Iterator for ChunkedTextReader<R> {
    type Item = Result<RowChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
