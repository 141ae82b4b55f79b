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

//! # Text Writer Module
//!
//! Renders decoded row chunks back into delimited text in the source's
//! encoding, and provides the atomic output file every artifact goes through.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::ArtifactManifest;
use crate::errors::{Result, TabError};
use crate::ingest::{LineTerminator, RowChunk, TextEncoding};

/// Removes a file when dropped unless disarmed.
#[derive(Debug)]
pub struct ScratchPath {
    path: PathBuf,
    armed: bool,
}

impl ScratchPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScratchPath {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {err}", self.path.display());
                }
            }
        }
    }
}

/// Hidden sibling path used while `path` is being written.
pub fn temp_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(".{name}.{suffix}"))
}

/// File written under a temporary name and renamed into place on commit.
///
/// Dropping it uncommitted removes the temporary file, so a failed run never
/// leaves partial output under the final name.
#[derive(Debug)]
pub struct AtomicFile {
    final_path: PathBuf,
    scratch: ScratchPath,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl AtomicFile {
    pub fn create(final_path: impl Into<PathBuf>) -> Result<Self> {
        let final_path = final_path.into();
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let scratch = ScratchPath::new(temp_path(&final_path, "tmp"));
        let file = File::create(scratch.path())?;
        Ok(Self {
            final_path,
            scratch,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes, syncs and renames the file into place. Returns its size.
    pub fn commit(mut self) -> Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        std::fs::rename(self.scratch.path(), &self.final_path)?;
        self.scratch.disarm();
        Ok(self.bytes_written)
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// How reconstructed text is laid out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextLayout {
    pub encoding: TextEncoding,
    pub has_bom: bool,
    pub delimiter: char,
    pub line_terminator: LineTerminator,
    pub trailing_newline: bool,
    pub header: Option<Vec<String>>,
}

impl TextLayout {
    pub fn from_manifest(manifest: &ArtifactManifest) -> Self {
        Self {
            encoding: manifest.encoding,
            has_bom: manifest.has_bom,
            delimiter: manifest.delimiter,
            line_terminator: manifest.line_terminator,
            trailing_newline: manifest.trailing_newline,
            header: manifest.has_header.then(|| manifest.column_names()),
        }
    }
}

/// Statistics about one reconstructed file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub rows_written: u64,
    pub bytes_written: u64,
}

/// Writes rows as delimited text.
///
/// Fields are emitted verbatim (no quoting), so the output splits back into
/// exactly the fields that were read. The terminator of the last row is held
/// back until another row or [`TextWriter::finish`] decides whether the
/// source ended with one.
pub struct TextWriter<W: Write> {
    out: W,
    layout: TextLayout,
    stats: WriteStats,
    started: bool,
    pending_terminator: bool,
    encoded: Vec<u8>,
}

impl<W: Write> TextWriter<W> {
    pub fn new(out: W, layout: TextLayout) -> Result<Self> {
        if !layout.delimiter.is_ascii() {
            return Err(TabError::config(format!(
                "delimiter {:?} is not a single byte",
                layout.delimiter
            )));
        }
        Ok(Self {
            out,
            layout,
            stats: WriteStats::default(),
            started: false,
            pending_terminator: false,
            encoded: Vec::new(),
        })
    }

    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    pub fn write_chunk(&mut self, chunk: &RowChunk) -> Result<()> {
        self.start()?;
        self.write_rows(chunk.rows.iter().map(|r| r.as_slice()))?;
        self.stats.rows_written += chunk.rows.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(W, WriteStats)> {
        self.start()?;
        if self.pending_terminator && self.layout.trailing_newline {
            let terminator = self.layout.line_terminator.as_str();
            self.emit(terminator)?;
        }
        self.out.flush()?;
        Ok((self.out, self.stats))
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        if self.layout.has_bom {
            let bom = self.layout.encoding.bom();
            self.out.write_all(bom)?;
            self.stats.bytes_written += bom.len() as u64;
        }
        if let Some(header) = self.layout.header.take() {
            self.write_rows(std::iter::once(header.as_slice()))?;
            self.layout.header = Some(header);
        }
        Ok(())
    }

    fn write_rows<'a>(&mut self, rows: impl Iterator<Item = &'a [String]>) -> Result<()> {
        let terminator = match self.layout.line_terminator {
            LineTerminator::Lf => csv::Terminator::Any(b'\n'),
            LineTerminator::CrLf => csv::Terminator::CRLF,
        };
        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(self.layout.delimiter as u8)
            .quote_style(csv::QuoteStyle::Never)
            .terminator(terminator)
            .has_headers(false)
            .flexible(true)
            .from_writer(Vec::new());

        let mut any = false;
        for row in rows {
            csv_writer.write_record(row)?;
            any = true;
        }
        if !any {
            return Ok(());
        }
        let rendered = csv_writer
            .into_inner()
            .map_err(|e| TabError::internal(format!("CSV render error: {}", e.error())))?;
        let mut text = String::from_utf8(rendered)
            .map_err(|e| TabError::internal(format!("rendered rows are not UTF-8: {e}")))?;

        let terminator = self.layout.line_terminator.as_str();
        if text.ends_with(terminator) {
            text.truncate(text.len() - terminator.len());
        }
        if self.pending_terminator {
            self.emit(terminator)?;
        }
        self.emit(&text)?;
        self.pending_terminator = true;
        Ok(())
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        self.encoded.clear();
        self.layout.encoding.encode_into(text, &mut self.encoded)?;
        self.out.write_all(&self.encoded)?;
        self.stats.bytes_written += self.encoded.len() as u64;
        Ok(())
    }
}
