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

//! # Pipeline Orchestrator
//!
//! Drives one file at a time through the compress or decompress stages and
//! reports the outcome to a shared [`StatsAggregator`].
//!
//! ```text
//! compress:   Sniffing -> Reading -> Encoding -> Compressing -> Finalizing -> Done
//! decompress: Decompressing -> Decoding -> Reconstructing -> Done
//! ```
//!
//! Any stage may end in `Failed`. Output is always written under a temporary
//! name and renamed on success, so a failed file leaves nothing behind.
//! Directory runs keep going after a failed file.

use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::codec::{
    ArtifactManifest, FramePayload, FrameReader, FrameWriter, StreamCodec, ARTIFACT_EXTENSION, FORMAT_VERSION,
};
use crate::columnar::{ColumnarDecoder, ColumnarEncoder, FinalizationMode};
use crate::config::PipelineConfig;
use crate::errors::{ErrorKind, Result, TabError};
use crate::export::{temp_path, AtomicFile, ScratchPath, TextLayout, TextWriter};
use crate::ingest::{ChunkedTextReader, FormatSniffer};
use crate::stats::StatsAggregator;

/// Cooperative cancellation flag shared between a caller and running pipelines.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Stage of one file's run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Sniffing,
    Reading,
    Encoding,
    Compressing,
    Finalizing,
    Decompressing,
    Decoding,
    Reconstructing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Sniffing => "sniffing",
            PipelineState::Reading => "reading",
            PipelineState::Encoding => "encoding",
            PipelineState::Compressing => "compressing",
            PipelineState::Finalizing => "finalizing",
            PipelineState::Decompressing => "decompressing",
            PipelineState::Decoding => "decoding",
            PipelineState::Reconstructing => "reconstructing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a file went through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// Outcome of one file.
#[derive(Debug)]
pub struct FileReport {
    pub direction: Direction,
    pub input: PathBuf,
    /// Final output path, set only when the file succeeded.
    pub output: Option<PathBuf>,
    /// Every state entered, in order, ending in `Done` or `Failed`.
    pub states: Vec<PipelineState>,
    pub rows: u64,
    pub rows_skipped: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub blocks: u64,
    /// Blocks re-encoded by the finalization pass.
    pub reencoded_blocks: u64,
    /// Largest codec window observed.
    pub peak_in_flight: usize,
    pub elapsed: Duration,
    pub error: Option<TabError>,
}

impl FileReport {
    fn new(direction: Direction, input: &Path) -> Self {
        Self {
            direction,
            input: input.to_path_buf(),
            output: None,
            states: Vec::new(),
            rows: 0,
            rows_skipped: 0,
            bytes_in: 0,
            bytes_out: 0,
            blocks: 0,
            reencoded_blocks: 0,
            peak_in_flight: 0,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn final_state(&self) -> Option<PipelineState> {
        self.states.last().copied()
    }

    pub fn succeeded(&self) -> bool {
        self.final_state() == Some(PipelineState::Done)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(TabError::kind)
    }

    /// Turns the report into the output path or the error that stopped it.
    pub fn into_result(self) -> Result<PathBuf> {
        match (self.error, self.output) {
            (Some(err), _) => Err(err),
            (None, Some(path)) => Ok(path),
            (None, None) => Err(TabError::internal(format!(
                "{} finished without output",
                self.input.display()
            ))),
        }
    }

    /// Moves to `next` unless the run was cancelled in the current state.
    fn advance(&mut self, next: PipelineState, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            let stage = self.final_state().map(|s| s.as_str()).unwrap_or("start");
            return Err(TabError::cancelled(stage));
        }
        log::debug!("{}: {}", self.input.display(), next);
        self.states.push(next);
        Ok(())
    }
}

/// Per-file orchestrator bound to one configuration and one stats aggregator.
#[derive(Clone)]
pub struct Pipeline<'s> {
    config: PipelineConfig,
    stats: &'s StatsAggregator,
    cancel: CancellationToken,
    workers: usize,
}

impl<'s> Pipeline<'s> {
    pub fn new(config: PipelineConfig, stats: &'s StatsAggregator) -> Result<Self> {
        config.validate()?;
        let workers = config.worker_count;
        Ok(Self {
            config,
            stats,
            cancel: CancellationToken::new(),
            workers,
        })
    }

    /// Shares an existing token, e.g. one wired to a signal handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &'s StatsAggregator {
        self.stats
    }

    /// Compresses `input` into `<output_dir>/<file name>.tpz`.
    pub fn compress_file(&self, input: &Path, output_dir: &Path) -> FileReport {
        let started = Instant::now();
        let mut report = FileReport::new(Direction::Compress, input);
        let key = source_key(input);
        match self.run_compress(input, output_dir, &mut report) {
            Ok(artifact) => {
                report.elapsed = started.elapsed();
                report.output = Some(artifact);
                report.states.push(PipelineState::Done);
                self.stats.record_compress_time(&key, report.elapsed);
                self.stats.record_success(&key);
                log::info!(
                    "compressed {} ({} rows, {} -> {} bytes)",
                    input.display(),
                    report.rows,
                    report.bytes_in,
                    report.bytes_out
                );
            }
            Err(err) => self.fail(&key, &mut report, err, started),
        }
        report
    }

    /// Reconstructs the source text of `artifact` inside `output_dir`.
    pub fn decompress_file(&self, artifact: &Path, output_dir: &Path) -> FileReport {
        let started = Instant::now();
        let mut report = FileReport::new(Direction::Decompress, artifact);
        let key = artifact_key(artifact);
        match self.run_decompress(artifact, output_dir, &mut report) {
            Ok(output) => {
                report.elapsed = started.elapsed();
                report.output = Some(output);
                report.states.push(PipelineState::Done);
                self.stats.record_decompress_time(&key, report.elapsed);
                self.stats.record_success(&key);
                log::info!("decompressed {} ({} rows)", artifact.display(), report.rows);
            }
            Err(err) => self.fail(&key, &mut report, err, started),
        }
        report
    }

    /// Compresses every file in `input_dir` whose extension is configured.
    pub fn compress_directory(&self, input_dir: &Path, output_dir: &Path) -> Result<Vec<FileReport>> {
        let extensions: Vec<String> = self.config.extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
        let files = list_files(input_dir, |ext| extensions.iter().any(|e| e == ext))?;
        log::info!("compressing {} files from {}", files.len(), input_dir.display());
        Ok(self.run_batch(&files, |pipeline, file| pipeline.compress_file(file, output_dir)))
    }

    /// Decompresses every `.tpz` artifact in `compressed_dir`.
    pub fn decompress_directory(&self, compressed_dir: &Path, output_dir: &Path) -> Result<Vec<FileReport>> {
        let files = list_files(compressed_dir, |ext| ext == ARTIFACT_EXTENSION)?;
        log::info!("decompressing {} artifacts from {}", files.len(), compressed_dir.display());
        Ok(self.run_batch(&files, |pipeline, file| pipeline.decompress_file(file, output_dir)))
    }

    fn run_batch<F>(&self, files: &[PathBuf], run: F) -> Vec<FileReport>
    where
        F: Fn(&Pipeline<'s>, &Path) -> FileReport + Sync,
    {
        let lanes = self.config.files_in_parallel.min(files.len()).max(1);
        if lanes == 1 {
            return files.iter().map(|file| run(self, file)).collect();
        }

        let mut share = self.clone();
        share.workers = self.config.worker_share();

        #[cfg(feature = "parallel")]
        {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(lanes)
                .thread_name(|i| format!("tabpress-file-{i}"))
                .build()
            {
                Ok(pool) => {
                    return pool.install(|| files.par_iter().map(|file| run(&share, file)).collect());
                }
                Err(err) => log::warn!("falling back to sequential batch: {err}"),
            }
        }

        files.iter().map(|file| run(&share, file)).collect()
    }

    fn fail(&self, key: &str, report: &mut FileReport, err: TabError, started: Instant) {
        report.elapsed = started.elapsed();
        report.states.push(PipelineState::Failed);
        self.stats.record_failure(key, err.kind());
        log::error!("{} failed: {err}", report.input.display());
        report.error = Some(err);
    }

    fn run_compress(&self, input: &Path, output_dir: &Path, report: &mut FileReport) -> Result<PathBuf> {
        let cancel = &self.cancel;
        report.advance(PipelineState::Sniffing, cancel)?;
        let descriptor = FormatSniffer::from_config(&self.config).sniff_path(input)?;
        let source_name = source_key(input);
        let source_extension = descriptor.extension();
        let artifact_path = output_dir.join(format!("{source_name}.{ARTIFACT_EXTENSION}"));
        let codec = StreamCodec::from_config(&self.config, self.workers)?;
        let level = codec.level();

        report.advance(PipelineState::Reading, cancel)?;
        let mut reader = ChunkedTextReader::open(descriptor.clone(), &self.config)?;
        let mut encoder = ColumnarEncoder::from_config(&self.config);

        report.advance(PipelineState::Encoding, cancel)?;
        let journal = match encoder.mode() {
            FinalizationMode::BufferAll => {
                while let Some(chunk) = reader.next_chunk()? {
                    if cancel.is_cancelled() {
                        return Err(TabError::cancelled(PipelineState::Encoding.as_str()));
                    }
                    encoder.push(chunk)?;
                }
                None
            }
            FinalizationMode::StreamThenPatch => {
                // Blocks are compressed as they are encoded; the schema is not final yet.
                let scratch = ScratchPath::new(temp_path(&artifact_path, "journal"));
                if let Some(parent) = scratch.path().parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut writer = FrameWriter::new(BufWriter::new(File::create(scratch.path())?));
                let blocks = std::iter::from_fn(|| match reader.next_chunk() {
                    Ok(Some(chunk)) => Some(encoder.encode(chunk)),
                    Ok(None) => None,
                    Err(err) => Some(Err(err)),
                });
                let journaled = codec.compress(blocks, 0, &mut writer, cancel)?;
                writer.finish()?;
                report.peak_in_flight = journaled.peak_in_flight;
                Some(scratch)
            }
        };

        report.rows = encoder.rows_encoded();
        report.rows_skipped = reader.rows_skipped();
        report.blocks = encoder.blocks_encoded();
        report.bytes_in = descriptor.byte_size;
        self.stats.record_rows(&source_name, report.rows, report.rows_skipped);

        if let Some(header) = reader.header() {
            encoder.set_column_names(header.to_vec());
        }
        let width = reader.header().map(<[String]>::len).unwrap_or(descriptor.field_count);
        let schema = encoder.final_schema(width);
        let manifest = ArtifactManifest {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            source_name: source_name.clone(),
            source_extension,
            encoding: descriptor.encoding,
            has_bom: descriptor.has_bom,
            delimiter: descriptor.delimiter,
            has_header: descriptor.has_header,
            line_terminator: descriptor.line_terminator,
            trailing_newline: reader.ended_with_newline(),
            columns: schema.columns.clone(),
            schema_version: schema.version,
            widenings: schema.widenings.clone(),
            total_rows: report.rows,
            block_count: report.blocks,
            rows_skipped: report.rows_skipped,
            source_bytes: descriptor.byte_size,
        };
        drop(reader);

        report.advance(PipelineState::Compressing, cancel)?;
        let mut artifact = FrameWriter::new(AtomicFile::create(&artifact_path)?);
        artifact.write_payload(&FramePayload::Manifest(manifest), level)?;

        match journal {
            None => {
                let blocks = encoder.finish_buffered(&schema)?;
                report.reencoded_blocks = blocks.iter().filter(|b| schema.is_stale(b.sequence)).count() as u64;
                let written = codec.compress(blocks.into_iter().map(Ok), 1, &mut artifact, cancel)?;
                report.peak_in_flight = written.peak_in_flight;
                report.advance(PipelineState::Finalizing, cancel)?;
            }
            Some(scratch) => {
                report.advance(PipelineState::Finalizing, cancel)?;
                let frames = FrameReader::new(BufReader::new(File::open(scratch.path())?));
                let patched = codec.patch(frames, Arc::new(schema), 1, &mut artifact, cancel)?;
                report.reencoded_blocks = patched.patched;
                report.peak_in_flight = report.peak_in_flight.max(patched.peak_in_flight);
                if patched.frames != report.blocks {
                    return Err(TabError::internal(format!(
                        "journal held {} frames for {} blocks",
                        patched.frames, report.blocks
                    )));
                }
            }
        }

        let (file, _) = artifact.finish()?;
        let size = file.commit()?;
        report.bytes_out = size;
        // Sizes are only counted in pairs so the saved-space ratio covers finished files.
        self.stats.record_raw_bytes(&source_name, report.bytes_in);
        self.stats.record_compressed_bytes(&source_name, size);
        Ok(artifact_path)
    }

    fn run_decompress(&self, artifact: &Path, output_dir: &Path, report: &mut FileReport) -> Result<PathBuf> {
        let cancel = &self.cancel;
        report.advance(PipelineState::Decompressing, cancel)?;
        let file = File::open(artifact)?;
        report.bytes_in = file.metadata()?.len();
        let mut frames = FrameReader::new(BufReader::new(file));
        let manifest = frames.read_manifest()?;
        let codec = StreamCodec::from_config(&self.config, self.workers)?;

        let output_path = output_dir.join(restored_name(&manifest.source_name)?);
        let out = AtomicFile::create(&output_path)?;
        let mut text = TextWriter::new(out, TextLayout::from_manifest(&manifest))?;
        let mut decoder = ColumnarDecoder::new(manifest.columns.clone());

        report.advance(PipelineState::Decoding, cancel)?;
        let decoded = codec.decompress(
            &mut frames,
            |block| {
                let chunk = decoder.decode(block)?;
                text.write_chunk(&chunk)
            },
            cancel,
        )?;
        report.peak_in_flight = decoded.peak_in_flight;
        report.blocks = decoded.frames;
        report.rows = decoder.rows_decoded();

        if decoded.frames != manifest.block_count || report.rows != manifest.total_rows {
            return Err(TabError::schema_mismatch(
                decoded.frames,
                format!(
                    "artifact holds {} blocks and {} rows, manifest declares {} and {}",
                    decoded.frames, report.rows, manifest.block_count, manifest.total_rows
                ),
            ));
        }

        report.advance(PipelineState::Reconstructing, cancel)?;
        let (out, _) = text.finish()?;
        report.bytes_out = out.commit()?;
        Ok(output_path)
    }
}

/// Stats key and artifact stem of a source file: its full file name.
fn source_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Source name an artifact was made from, so both directions share one stats entry.
fn artifact_key(path: &Path) -> String {
    let name = source_key(path);
    match name.strip_suffix(&format!(".{ARTIFACT_EXTENSION}")) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Bare file name to restore a source as. Any directory part recorded in the
/// artifact is dropped so output never lands outside the output directory.
fn restored_name(source_name: &str) -> Result<&OsStr> {
    Path::new(source_name)
        .file_name()
        .ok_or_else(|| TabError::internal(format!("artifact names no restorable file: {source_name:?}")))
}

/// Regular files in `dir` whose lowercase extension passes `keep`, sorted by path.
fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if keep(&ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
