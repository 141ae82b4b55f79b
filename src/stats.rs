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

//! # Run Statistics
//!
//! One [`StatsAggregator`] is created per process and shared by reference
//! with every pipeline. Byte, row and time totals are atomic counters so
//! concurrent files never lose an update; per-file detail sits behind a mutex
//! keyed by source file name. Readers only ever see a [`StatsSnapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

const MIB: f64 = 1024.0 * 1024.0;

/// Final state of one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Succeeded,
    Failed { kind: ErrorKind },
}

/// Counters of one source file, across both directions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub compress_time: Duration,
    pub decompress_time: Duration,
    pub outcome: Option<FileOutcome>,
}

/// Totals over every file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsTotals {
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub compress_time: Duration,
    pub decompress_time: Duration,
}

/// Read-only copy of the aggregator's state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub totals: StatsTotals,
    pub files: BTreeMap<String, FileStats>,
}

impl StatsSnapshot {
    /// Compressed size over raw size, `None` before any raw bytes were seen.
    pub fn compression_ratio(&self) -> Option<f64> {
        (self.totals.raw_bytes > 0)
            .then(|| self.totals.compressed_bytes as f64 / self.totals.raw_bytes as f64)
    }

    /// Share of the raw size saved by compression, in percent.
    pub fn space_saved_percent(&self) -> Option<f64> {
        self.compression_ratio().map(|r| (1.0 - r) * 100.0)
    }

    pub fn failed_files(&self) -> Vec<(&str, ErrorKind)> {
        self.files
            .iter()
            .filter_map(|(name, stats)| match stats.outcome {
                Some(FileOutcome::Failed { kind }) => Some((name.as_str(), kind)),
                _ => None,
            })
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.totals.files_failed > 0
    }

    /// Human-readable end-of-run summary.
    pub fn render_summary(&self) -> String {
        let t = &self.totals;
        let mut out = String::new();
        out.push_str("====== Compression summary ======\n");
        out.push_str(&format!("Files processed:       {}\n", t.files_processed));
        out.push_str(&format!("Files failed:          {}\n", t.files_failed));
        out.push_str(&format!("Rows processed:        {}\n", t.rows_processed));
        if t.rows_skipped > 0 {
            out.push_str(&format!("Rows skipped:          {}\n", t.rows_skipped));
        }
        out.push_str(&format!("Total original size:   {:.2} MiB\n", t.raw_bytes as f64 / MIB));
        out.push_str(&format!("Total compressed size: {:.2} MiB\n", t.compressed_bytes as f64 / MIB));
        match self.space_saved_percent() {
            Some(saved) => out.push_str(&format!("Space saved:           {saved:.2}%\n")),
            None => out.push_str("Space saved:           n/a\n"),
        }
        out.push_str(&format!("Total compress time:   {:.2}s\n", t.compress_time.as_secs_f64()));
        out.push_str(&format!("Total decompress time: {:.2}s\n", t.decompress_time.as_secs_f64()));
        for (name, kind) in self.failed_files() {
            out.push_str(&format!("  failed: {name} ({kind:?})\n"));
        }
        out
    }
}

/// Thread-safe accumulator shared by all pipelines of a run.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    raw_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
    rows_processed: AtomicU64,
    rows_skipped: AtomicU64,
    compress_nanos: AtomicU64,
    decompress_nanos: AtomicU64,
    files: Mutex<BTreeMap<String, FileStats>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> MutexGuard<'_, BTreeMap<String, FileStats>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, file: &str, apply: impl FnOnce(&mut FileStats)) {
        let mut files = self.files();
        apply(files.entry(file.to_string()).or_default());
    }

    pub fn record_raw_bytes(&self, file: &str, bytes: u64) {
        self.raw_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.update(file, |s| s.raw_bytes += bytes);
    }

    pub fn record_compressed_bytes(&self, file: &str, bytes: u64) {
        self.compressed_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.update(file, |s| s.compressed_bytes += bytes);
    }

    pub fn record_rows(&self, file: &str, rows: u64, skipped: u64) {
        self.rows_processed.fetch_add(rows, Ordering::Relaxed);
        self.rows_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.update(file, |s| {
            s.rows_processed += rows;
            s.rows_skipped += skipped;
        });
    }

    pub fn record_compress_time(&self, file: &str, elapsed: Duration) {
        self.compress_nanos.fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        self.update(file, |s| s.compress_time += elapsed);
    }

    pub fn record_decompress_time(&self, file: &str, elapsed: Duration) {
        self.decompress_nanos.fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        self.update(file, |s| s.decompress_time += elapsed);
    }

    /// Marks a file done. A failure recorded earlier for the same file is kept.
    pub fn record_success(&self, file: &str) {
        self.update(file, |s| {
            if s.outcome.is_none() {
                s.outcome = Some(FileOutcome::Succeeded);
            }
        });
    }

    pub fn record_failure(&self, file: &str, kind: ErrorKind) {
        self.update(file, |s| s.outcome = Some(FileOutcome::Failed { kind }));
    }

    pub fn outcome(&self, file: &str) -> Option<FileOutcome> {
        self.files().get(file).and_then(|s| s.outcome)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let files = self.files().clone();
        let files_processed = files
            .values()
            .filter(|s| s.outcome == Some(FileOutcome::Succeeded))
            .count() as u64;
        let files_failed = files
            .values()
            .filter(|s| matches!(s.outcome, Some(FileOutcome::Failed { .. })))
            .count() as u64;

        StatsSnapshot {
            totals: StatsTotals {
                raw_bytes: self.raw_bytes.load(Ordering::Relaxed),
                compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
                rows_processed: self.rows_processed.load(Ordering::Relaxed),
                rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
                files_processed,
                files_failed,
                compress_time: Duration::from_nanos(self.compress_nanos.load(Ordering::Relaxed)),
                decompress_time: Duration::from_nanos(self.decompress_nanos.load(Ordering::Relaxed)),
            },
            files,
        }
    }
}

fn saturating_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}
