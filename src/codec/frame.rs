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

//! # Frame Format
//!
//! ```text
//! [u32 LE length][u32 LE xxh32 of the uncompressed payload][zstd payload]
//! ```
//!
//! An artifact is a manifest frame, the block frames in sequence order and an
//! end-of-stream marker: a frame of length zero carrying
//! [`END_OF_STREAM_CHECKSUM`]. Reaching end of file before the marker means
//! the artifact was truncated.

use std::io::{self, Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh32::xxh32;

use crate::columnar::{ColumnDef, ColumnarBlock, WideningEvent, BLOCK_KIND};
use crate::errors::{Result, TabError};
use crate::ingest::{LineTerminator, TextEncoding};

/// Reserved checksum of the end-of-stream marker.
pub const END_OF_STREAM_CHECKSUM: u32 = 0xFFFF_FFFF;
pub const FRAME_HEADER_LEN: usize = 8;
pub const MANIFEST_KIND: u8 = b'M';
pub const FORMAT_VERSION: u32 = 1;
/// Extension appended to compressed artifacts.
pub const ARTIFACT_EXTENSION: &str = "tpz";

const CHECKSUM_SEED: u32 = 0;

pub fn payload_checksum(payload: &[u8]) -> u32 {
    xxh32(payload, CHECKSUM_SEED)
}

/// A frame as stored on disk: compressed bytes plus the checksum of what they expand to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    /// Position in the artifact, manifest included. Only used for error reports.
    pub index: u64,
    pub checksum: u32,
    pub compressed: Vec<u8>,
}

impl RawFrame {
    /// Compresses `payload` into a frame.
    pub fn seal(index: u64, payload: &[u8], level: i32) -> Result<Self> {
        let compressed = zstd::bulk::compress(payload, level)?;
        if compressed.len() > u32::MAX as usize {
            return Err(TabError::ResourceExhausted(format!(
                "frame {index} compresses to {} bytes",
                compressed.len()
            )));
        }
        Ok(Self {
            index,
            checksum: payload_checksum(payload),
            compressed,
        })
    }

    /// Decompresses the frame and verifies its checksum.
    pub fn open(&self) -> Result<Vec<u8>> {
        let payload = zstd::decode_all(&self.compressed[..]).map_err(|_| TabError::FrameChecksumMismatch {
            frame_index: self.index,
            expected: self.checksum,
            actual: None,
        })?;
        let actual = payload_checksum(&payload);
        if actual != self.checksum {
            return Err(TabError::FrameChecksumMismatch {
                frame_index: self.index,
                expected: self.checksum,
                actual: Some(actual),
            });
        }
        Ok(payload)
    }

    /// Bytes the frame occupies on disk, header included.
    pub fn encoded_len(&self) -> u64 {
        (FRAME_HEADER_LEN + self.compressed.len()) as u64
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.compressed.len() as u32).to_le_bytes())?;
        out.write_all(&self.checksum.to_le_bytes())?;
        out.write_all(&self.compressed)
    }
}

/// Self-describing header of an artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    /// File name of the source, e.g. `lineitem.tbl`.
    pub source_name: String,
    pub source_extension: String,
    pub encoding: TextEncoding,
    pub has_bom: bool,
    pub delimiter: char,
    pub has_header: bool,
    pub line_terminator: LineTerminator,
    pub trailing_newline: bool,
    pub columns: Vec<ColumnDef>,
    pub schema_version: u32,
    #[serde(default)]
    pub widenings: Vec<WideningEvent>,
    pub total_rows: u64,
    pub block_count: u64,
    #[serde(default)]
    pub rows_skipped: u64,
    pub source_bytes: u64,
}

impl ArtifactManifest {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Decoded contents of one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FramePayload {
    Manifest(ArtifactManifest),
    Block(ColumnarBlock),
}

impl FramePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            FramePayload::Manifest(manifest) => {
                let mut bytes = vec![MANIFEST_KIND];
                serde_json::to_writer(&mut bytes, manifest)?;
                Ok(bytes)
            }
            FramePayload::Block(block) => Ok(block.to_bytes()),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&MANIFEST_KIND) => Ok(FramePayload::Manifest(serde_json::from_slice(&bytes[1..])?)),
            Some(&BLOCK_KIND) => Ok(FramePayload::Block(ColumnarBlock::from_bytes(bytes)?)),
            Some(other) => Err(TabError::internal(format!("unknown frame payload kind {other:#04x}"))),
            None => Err(TabError::internal("empty frame payload")),
        }
    }
}

/// Appends frames to an artifact and seals it with the end marker.
pub struct FrameWriter<W: Write> {
    inner: W,
    frames_written: u64,
    bytes_written: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            frames_written: 0,
            bytes_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        frame.write_to(&mut self.inner)?;
        self.frames_written += 1;
        self.bytes_written += frame.encoded_len();
        Ok(())
    }

    /// Compresses and writes a payload in one step.
    pub fn write_payload(&mut self, payload: &FramePayload, level: i32) -> Result<()> {
        let frame = RawFrame::seal(self.frames_written, &payload.to_bytes()?, level)?;
        self.write_frame(&frame)
    }

    /// Writes the end marker, flushes, and returns the sink with the total bytes written.
    pub fn finish(mut self) -> Result<(W, u64)> {
        self.inner.write_all(&0u32.to_le_bytes())?;
        self.inner.write_all(&END_OF_STREAM_CHECKSUM.to_le_bytes())?;
        self.bytes_written += FRAME_HEADER_LEN as u64;
        self.inner.flush()?;
        Ok((self.inner, self.bytes_written))
    }
}

/// Reads frames back one at a time.
pub struct FrameReader<R: Read> {
    inner: R,
    next_index: u64,
    bytes_read: u64,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            next_index: 0,
            bytes_read: 0,
            done: false,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Next frame, `None` after the end marker.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.done {
            return Ok(None);
        }
        let result = self.read_frame();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        let index = self.next_index;
        let mut header = [0u8; FRAME_HEADER_LEN];
        let got = read_full(&mut self.inner, &mut header)?;
        self.bytes_read += got as u64;
        if got < FRAME_HEADER_LEN {
            return Err(TabError::FrameTruncated {
                frame_index: index,
                expected: FRAME_HEADER_LEN as u64,
                available: got as u64,
            });
        }

        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len == 0 {
            if checksum != END_OF_STREAM_CHECKSUM {
                return Err(TabError::FrameChecksumMismatch {
                    frame_index: index,
                    expected: END_OF_STREAM_CHECKSUM,
                    actual: Some(checksum),
                });
            }
            let mut extra = [0u8; 1];
            if read_full(&mut self.inner, &mut extra)? != 0 {
                return Err(TabError::internal(format!(
                    "trailing data after end-of-stream marker at byte {}",
                    self.bytes_read
                )));
            }
            return Ok(None);
        }

        let mut compressed = Vec::new();
        (&mut self.inner).take(u64::from(len)).read_to_end(&mut compressed)?;
        self.bytes_read += compressed.len() as u64;
        if compressed.len() < len as usize {
            return Err(TabError::FrameTruncated {
                frame_index: index,
                expected: u64::from(len),
                available: compressed.len() as u64,
            });
        }

        self.next_index += 1;
        Ok(Some(RawFrame {
            index,
            checksum,
            compressed,
        }))
    }

    /// Reads and parses the leading manifest frame.
    pub fn read_manifest(&mut self) -> Result<ArtifactManifest> {
        let frame = self
            .next_frame()?
            .ok_or_else(|| TabError::internal("artifact holds no manifest frame"))?;
        match FramePayload::parse(&frame.open()?)? {
            FramePayload::Manifest(manifest) => {
                if manifest.format_version != FORMAT_VERSION {
                    return Err(TabError::internal(format!(
                        "unsupported artifact format version {}",
                        manifest.format_version
                    )));
                }
                Ok(manifest)
            }
            FramePayload::Block(_) => Err(TabError::internal("artifact starts with a block frame")),
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
