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
use std::io::BufReader;
use std::path::Path;

use tabpress::codec::{FrameReader, RawFrame};
use tabpress::{
    ErrorKind, FileOutcome, MalformedRowPolicy, Pipeline, PipelineConfig, PipelineState, StatsAggregator, TabError,
};

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_worker_count(2)
        .with_compression_level(3)
        .with_chunk_row_count(4)
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|d| {
            d.map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn block_frames(artifact: &Path) -> Vec<RawFrame> {
    let file = File::open(artifact).expect("open artifact");
    FrameReader::new(BufReader::new(file))
        .skip(1)
        .collect::<tabpress::Result<Vec<_>>>()
        .expect("frames")
}

#[test]
fn malformed_row_aborts_without_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("short.csv");
    std::fs::write(&input, "a,b\n1,2\n3\n").expect("write");
    let out = dir.path().join("compressed");

    let stats = StatsAggregator::new();
    let report = Pipeline::new(config(), &stats).expect("pipeline").compress_file(&input, &out);

    assert_eq!(
        report.states,
        vec![
            PipelineState::Sniffing,
            PipelineState::Reading,
            PipelineState::Encoding,
            PipelineState::Failed,
        ]
    );
    match report.error {
        Some(TabError::MalformedRow {
            row_index,
            line_number,
            expected,
            found,
            ..
        }) => {
            assert_eq!(row_index, 1);
            assert_eq!(line_number, 3);
            assert_eq!(expected, 2);
            assert_eq!(found, 1);
        }
        ref other => panic!("expected MalformedRow, got {other:?}"),
    }
    assert!(entries(&out).is_empty());
    assert_eq!(
        stats.outcome("short.csv"),
        Some(FileOutcome::Failed {
            kind: ErrorKind::MalformedRow
        })
    );
}

#[test]
fn skip_policy_drops_and_counts_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("ragged.csv");
    std::fs::write(&input, "a,b\n1,2\n3\n4,5\n6,7,8\n9,10\n").expect("write");

    let stats = StatsAggregator::new();
    let pipeline = Pipeline::new(config().with_malformed_row_policy(MalformedRowPolicy::Skip), &stats)
        .expect("pipeline");
    let report = pipeline.compress_file(&input, &dir.path().join("c"));
    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(report.rows, 3);
    assert_eq!(report.rows_skipped, 2);

    let artifact = report.output.expect("artifact");
    let restored = pipeline
        .decompress_file(&artifact, &dir.path().join("d"))
        .into_result()
        .expect("decompress");
    assert_eq!(std::fs::read_to_string(restored).expect("read"), "a,b\n1,2\n4,5\n9,10\n");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.totals.rows_processed, 3);
    assert_eq!(snapshot.totals.rows_skipped, 2);
}

#[test]
fn directory_run_continues_past_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).expect("mkdir");
    std::fs::write(input.join("good.csv"), "x,y\n1,2\n3,4\n").expect("write");
    std::fs::write(input.join("bad.csv"), "x,y\n1,2\n3\n").expect("write");
    std::fs::write(input.join("orders.TBL"), "1|a|2.5\n2|b|3.5\n").expect("write");
    std::fs::write(input.join("readme.md"), "# not data\n").expect("write");

    let stats = StatsAggregator::new();
    let pipeline = Pipeline::new(config().with_files_in_parallel(2), &stats).expect("pipeline");
    let compressed = dir.path().join("compressed");
    let reports = pipeline.compress_directory(&input, &compressed).expect("compress dir");
    assert_eq!(reports.len(), 3);
    assert_eq!(reports.iter().filter(|r| r.succeeded()).count(), 2);
    assert_eq!(entries(&compressed), vec!["good.csv.tpz", "orders.TBL.tpz"]);

    let restored = dir.path().join("restored");
    let reports = pipeline.decompress_directory(&compressed, &restored).expect("decompress dir");
    assert!(reports.iter().all(|r| r.succeeded()));
    assert_eq!(entries(&restored), vec!["good.csv", "orders.TBL"]);
    assert_eq!(
        std::fs::read(restored.join("orders.TBL")).expect("read"),
        std::fs::read(input.join("orders.TBL")).expect("read")
    );

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.totals.files_processed, 2);
    assert_eq!(snapshot.totals.files_failed, 1);
    assert!(snapshot.has_failures());
    assert_eq!(snapshot.failed_files(), vec![("bad.csv", ErrorKind::MalformedRow)]);
}

#[test]
fn in_flight_window_is_bounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("wide.csv");
    let mut content = String::from("k,v\n");
    for i in 0..400 {
        content.push_str(&format!("{i},value {}\n", i * 7));
    }
    std::fs::write(&input, content).expect("write");

    for buffer_all in [true, false] {
        let stats = StatsAggregator::new();
        let cfg = config()
            .with_worker_count(4)
            .with_max_in_flight(2)
            .with_chunk_row_count(5)
            .with_buffer_all(buffer_all);
        let report = Pipeline::new(cfg, &stats)
            .expect("pipeline")
            .compress_file(&input, &dir.path().join("c"));
        assert!(report.succeeded(), "{:?}", report.error);
        assert_eq!(report.blocks, 80);
        assert!(report.peak_in_flight >= 1 && report.peak_in_flight <= 2);
    }
}

#[test]
fn stream_then_patch_matches_buffer_all() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("drift.csv");
    let mut content = String::from("id,flag,amount\n");
    for i in 0..30 {
        let flag = if i == 25 { "maybe" } else if i % 2 == 0 { "true" } else { "false" };
        let amount = if i >= 17 { format!("{i}.5") } else { i.to_string() };
        content.push_str(&format!("{i},{flag},{amount}\n"));
    }
    std::fs::write(&input, content).expect("write");

    let stats = StatsAggregator::new();
    let buffered = Pipeline::new(config().with_buffer_all(true), &stats)
        .expect("pipeline")
        .compress_file(&input, &dir.path().join("buffered"));
    let streamed = Pipeline::new(config().with_buffer_all(false), &stats)
        .expect("pipeline")
        .compress_file(&input, &dir.path().join("streamed"));
    assert!(buffered.succeeded() && streamed.succeeded());
    assert!(streamed.reencoded_blocks > 0);
    assert_eq!(buffered.reencoded_blocks, streamed.reencoded_blocks);

    let a = block_frames(&buffered.output.expect("buffered artifact"));
    let b = block_frames(&streamed.output.expect("streamed artifact"));
    assert_eq!(a, b);
    // The journal is gone once the artifact is committed.
    assert_eq!(entries(&dir.path().join("streamed")), vec!["drift.csv.tpz"]);
}

#[test]
fn cancelled_decompression_leaves_no_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("t.csv");
    std::fs::write(&input, "a,b\n1,2\n3,4\n").expect("write");

    let stats = StatsAggregator::new();
    let pipeline = Pipeline::new(config(), &stats).expect("pipeline");
    let artifact = pipeline
        .compress_file(&input, dir.path())
        .into_result()
        .expect("compress");

    pipeline.cancellation_token().cancel();
    let out = dir.path().join("out");
    let report = pipeline.decompress_file(&artifact, &out);
    assert_eq!(report.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(report.final_state(), Some(PipelineState::Failed));
    assert!(entries(&out).is_empty());
}

#[test]
fn undetectable_input_fails_in_sniffing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("words.txt");
    std::fs::write(&input, "alpha\nbeta\ngamma\n").expect("write");

    let stats = StatsAggregator::new();
    let report = Pipeline::new(config(), &stats)
        .expect("pipeline")
        .compress_file(&input, dir.path());
    assert_eq!(report.states, vec![PipelineState::Sniffing, PipelineState::Failed]);
    assert_eq!(report.error_kind(), Some(ErrorKind::FormatUndetectable));
}

#[test]
fn buffer_budget_overflow_is_resource_exhausted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("big.csv");
    let mut content = String::from("k,v\n");
    for i in 0..200 {
        content.push_str(&format!("{i},some text value {i}\n"));
    }
    std::fs::write(&input, content).expect("write");

    let stats = StatsAggregator::new();
    let out = dir.path().join("c");
    let report = Pipeline::new(config().with_max_buffered_bytes(256), &stats)
        .expect("pipeline")
        .compress_file(&input, &out);
    assert_eq!(report.error_kind(), Some(ErrorKind::ResourceExhausted));
    assert!(entries(&out).is_empty());
}
