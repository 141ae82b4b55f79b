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

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tabpress::codec::{FramePayload, FrameReader, RawFrame, FRAME_HEADER_LEN};
use tabpress::{ErrorKind, FileOutcome, Pipeline, PipelineConfig, PipelineState, StatsAggregator, TabError};

const ROWS: usize = 10;

fn pipeline_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_chunk_row_count(2)
        .with_worker_count(2)
        .with_compression_level(3)
}

/// Compresses a ten-row file into five block frames and returns the artifact path.
fn build_artifact(dir: &Path, stats: &StatsAggregator) -> PathBuf {
    let mut content = String::from("id|city|amount\n");
    for i in 0..ROWS {
        content.push_str(&format!("{i}|city number {i}|{}.25\n", i * 3));
    }
    let input = dir.join("sales.tbl");
    std::fs::write(&input, content).expect("write input");
    Pipeline::new(pipeline_config(), stats)
        .expect("pipeline")
        .compress_file(&input, &dir.join("compressed"))
        .into_result()
        .expect("compress")
}

/// Byte range of each frame's compressed payload, end marker excluded.
fn payload_ranges(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    loop {
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("len")) as usize;
        if len == 0 {
            return ranges;
        }
        let start = offset + FRAME_HEADER_LEN;
        ranges.push((start, start + len));
        offset = start + len;
    }
}

#[test]
fn corrupted_frame_fails_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = StatsAggregator::new();
    let artifact = build_artifact(dir.path(), &stats);
    let pristine = std::fs::read(&artifact).expect("read artifact");

    let ranges = payload_ranges(&pristine);
    assert_eq!(ranges.len(), 1 + ROWS / 2);
    let (start, end) = ranges[3];
    let mut corrupted = pristine.clone();
    corrupted[(start + end) / 2] ^= 0xFF;

    let good: Vec<_> = FrameReader::new(Cursor::new(&pristine))
        .map(|f| f.expect("frame").open().expect("open"))
        .collect();
    let results: Vec<_> = FrameReader::new(Cursor::new(&corrupted))
        .map(|f| f.expect("frame").open())
        .collect();

    for (index, result) in results.iter().enumerate() {
        if index == 3 {
            match result {
                Err(TabError::FrameChecksumMismatch { frame_index, .. }) => assert_eq!(*frame_index, 3),
                other => panic!("frame 3 should fail its checksum, got {other:?}"),
            }
        } else {
            assert_eq!(result.as_ref().expect("intact frame"), &good[index]);
        }
    }
    assert!(matches!(FramePayload::parse(&good[1]).expect("parse"), FramePayload::Block(_)));
}

#[test]
fn corrupted_artifact_leaves_no_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = StatsAggregator::new();
    let artifact = build_artifact(dir.path(), &stats);
    let mut bytes = std::fs::read(&artifact).expect("read artifact");
    let (start, end) = payload_ranges(&bytes)[2];
    bytes[(start + end) / 2] ^= 0x5A;
    std::fs::write(&artifact, bytes).expect("rewrite artifact");

    let out_dir = dir.path().join("out");
    let report = Pipeline::new(pipeline_config(), &stats)
        .expect("pipeline")
        .decompress_file(&artifact, &out_dir);
    assert_eq!(report.final_state(), Some(PipelineState::Failed));
    assert_eq!(report.error_kind(), Some(ErrorKind::FrameChecksumMismatch));
    assert!(!out_dir.join("sales.tbl").exists());
    assert_eq!(std::fs::read_dir(&out_dir).map(|d| d.count()).unwrap_or(0), 0);
    assert_eq!(
        stats.outcome("sales.tbl"),
        Some(FileOutcome::Failed {
            kind: ErrorKind::FrameChecksumMismatch
        })
    );
}

#[test]
fn truncated_artifact_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = StatsAggregator::new();
    let artifact = build_artifact(dir.path(), &stats);
    let bytes = std::fs::read(&artifact).expect("read artifact");

    let (_, end) = payload_ranges(&bytes)[4];
    for cut in [end - 3, end, bytes.len() - FRAME_HEADER_LEN] {
        std::fs::write(&artifact, &bytes[..cut]).expect("truncate");
        let report = Pipeline::new(pipeline_config(), &stats)
            .expect("pipeline")
            .decompress_file(&artifact, &dir.path().join("out"));
        assert_eq!(report.error_kind(), Some(ErrorKind::FrameTruncated), "cut at {cut}");
        assert!(!dir.path().join("out").join("sales.tbl").exists());
    }
}

#[test]
fn swapped_manifest_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = StatsAggregator::new();
    let artifact = build_artifact(dir.path(), &stats);
    let bytes = std::fs::read(&artifact).expect("read artifact");

    // Drop the manifest frame so the artifact starts with a block.
    let (_, end) = payload_ranges(&bytes)[0];
    std::fs::write(&artifact, &bytes[end..]).expect("rewrite");
    let report = Pipeline::new(pipeline_config(), &stats)
        .expect("pipeline")
        .decompress_file(&artifact, &dir.path().join("out"));
    assert!(!report.succeeded());
    assert_eq!(report.error_kind(), Some(ErrorKind::Internal));
}

/// Rewrites the manifest frame of `artifact` with a different source name.
fn rename_source(artifact: &Path, source_name: &str) {
    let bytes = std::fs::read(artifact).expect("read artifact");
    let mut frames = FrameReader::new(Cursor::new(&bytes));
    let mut manifest = frames.read_manifest().expect("manifest");
    manifest.source_name = source_name.to_string();

    let payload = FramePayload::Manifest(manifest).to_bytes().expect("encode manifest");
    let mut rewritten = Vec::new();
    RawFrame::seal(0, &payload, 3)
        .expect("seal")
        .write_to(&mut rewritten)
        .expect("write frame");
    let (_, end) = payload_ranges(&bytes)[0];
    rewritten.extend_from_slice(&bytes[end..]);
    std::fs::write(artifact, rewritten).expect("rewrite artifact");
}

#[test]
fn source_name_cannot_escape_output_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = StatsAggregator::new();
    let artifact = build_artifact(dir.path(), &stats);
    rename_source(&artifact, "../../escaped.csv");

    let out_dir = dir.path().join("x").join("y").join("d");
    let report = Pipeline::new(pipeline_config(), &stats)
        .expect("pipeline")
        .decompress_file(&artifact, &out_dir);
    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(report.output, Some(out_dir.join("escaped.csv")));
    assert!(!dir.path().join("x").join("escaped.csv").exists());
}

#[test]
fn unnamed_source_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = StatsAggregator::new();
    let artifact = build_artifact(dir.path(), &stats);
    let out_dir = dir.path().join("out");

    for name in ["", "..", "nested/.."] {
        rename_source(&artifact, name);
        let report = Pipeline::new(pipeline_config(), &stats)
            .expect("pipeline")
            .decompress_file(&artifact, &out_dir);
        assert_eq!(report.error_kind(), Some(ErrorKind::Internal), "{name:?}");
        assert_eq!(std::fs::read_dir(&out_dir).map(|d| d.count()).unwrap_or(0), 0);
    }
}
