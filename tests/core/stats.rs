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

use std::time::Duration;

use tabpress::{ErrorKind, FileOutcome, Pipeline, PipelineConfig, PipelineState, StatsAggregator};

#[test]
fn two_files_accumulate_totals() {
    let stats = StatsAggregator::new();
    for (name, raw, compressed) in [("a.tbl", 1000, 300), ("b.tbl", 2000, 500)] {
        stats.record_raw_bytes(name, raw);
        stats.record_compressed_bytes(name, compressed);
        stats.record_success(name);
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.totals.raw_bytes, 3000);
    assert_eq!(snapshot.totals.compressed_bytes, 800);
    assert_eq!(snapshot.totals.files_processed, 2);
    assert_eq!(snapshot.totals.files_failed, 0);
    assert_eq!(snapshot.files["b.tbl"].compressed_bytes, 500);
    let saved = snapshot.space_saved_percent().expect("ratio");
    assert!((saved - 73.333).abs() < 0.01);
}

#[test]
fn concurrent_updates_are_not_lost() {
    let stats = StatsAggregator::new();
    std::thread::scope(|scope| {
        for t in 0..8 {
            let stats = &stats;
            scope.spawn(move || {
                let name = format!("file{}.csv", t % 4);
                for _ in 0..1000 {
                    stats.record_raw_bytes(&name, 3);
                    stats.record_compressed_bytes(&name, 1);
                    stats.record_rows(&name, 2, 0);
                    stats.record_compress_time(&name, Duration::from_micros(1));
                }
                stats.record_success(&name);
            });
        }
    });

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.totals.raw_bytes, 24_000);
    assert_eq!(snapshot.totals.compressed_bytes, 8_000);
    assert_eq!(snapshot.totals.rows_processed, 16_000);
    assert_eq!(snapshot.totals.compress_time, Duration::from_millis(8));
    assert_eq!(snapshot.files.len(), 4);
    assert_eq!(snapshot.files["file0.csv"].raw_bytes, 6_000);
    assert_eq!(snapshot.totals.files_processed, 4);
}

#[test]
fn pipeline_records_both_directions_under_source_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("lineitem.tbl");
    let mut content = String::new();
    for i in 0..50 {
        content.push_str(&format!("{i}|{}|N|O|1996-03-13|TRUCK\n", i % 7));
    }
    std::fs::write(&input, &content).expect("write");

    let stats = StatsAggregator::new();
    let pipeline = Pipeline::new(PipelineConfig::default().with_worker_count(2), &stats).expect("pipeline");
    let artifact = pipeline
        .compress_file(&input, &dir.path().join("c"))
        .into_result()
        .expect("compress");
    pipeline
        .decompress_file(&artifact, &dir.path().join("d"))
        .into_result()
        .expect("decompress");

    let snapshot = stats.snapshot();
    let file = &snapshot.files["lineitem.tbl"];
    assert_eq!(file.raw_bytes, content.len() as u64);
    assert_eq!(file.compressed_bytes, std::fs::metadata(&artifact).expect("meta").len());
    assert_eq!(file.rows_processed, 50);
    assert_eq!(file.outcome, Some(FileOutcome::Succeeded));
    assert!(file.compress_time > Duration::ZERO);
    assert!(file.decompress_time > Duration::ZERO);
    assert_eq!(snapshot.totals.files_processed, 1);
    assert!(snapshot.render_summary().contains("Files processed:       1"));
}

#[test]
fn failure_is_reported_in_summary() {
    let stats = StatsAggregator::new();
    stats.record_failure("broken.csv", ErrorKind::UnsupportedEncoding);
    let snapshot = stats.snapshot();
    assert!(snapshot.has_failures());
    assert!(snapshot.render_summary().contains("failed: broken.csv (UnsupportedEncoding)"));
}

#[test]
fn failed_file_adds_no_sizes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("orders.csv");
    std::fs::write(&input, "id,qty\n1,4\n2,9\n").expect("write");
    // A regular file where the output directory should be fails in Compressing.
    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, "").expect("write");

    let stats = StatsAggregator::new();
    let pipeline = Pipeline::new(PipelineConfig::default().with_worker_count(1), &stats).expect("pipeline");
    let report = pipeline.compress_file(&input, &blocked);
    assert_eq!(report.final_state(), Some(PipelineState::Failed));
    assert!(report.states.contains(&PipelineState::Compressing));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.totals.raw_bytes, 0);
    assert_eq!(snapshot.totals.compressed_bytes, 0);
    assert_eq!(snapshot.totals.files_failed, 1);
    assert_eq!(snapshot.space_saved_percent(), None);
}
