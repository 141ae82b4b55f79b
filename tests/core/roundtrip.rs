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

use proptest::prelude::*;
use tabpress::codec::FrameReader;
use tabpress::{ArtifactManifest, ColumnType, Pipeline, PipelineConfig, StatsAggregator, TextEncoding};

fn config(chunk_rows: usize, workers: usize) -> PipelineConfig {
    PipelineConfig::default()
        .with_chunk_row_count(chunk_rows)
        .with_worker_count(workers)
        .with_compression_level(3)
}

/// Compresses `content` stored as `name`, decompresses it, and returns the reconstructed bytes.
fn roundtrip(content: &[u8], name: &str, config: PipelineConfig) -> (Vec<u8>, ArtifactManifest) {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("in").join(name);
    std::fs::create_dir_all(input.parent().expect("parent")).expect("mkdir");
    std::fs::write(&input, content).expect("write input");

    let stats = StatsAggregator::new();
    let pipeline = Pipeline::new(config, &stats).expect("pipeline");
    let artifact = pipeline
        .compress_file(&input, &dir.path().join("compressed"))
        .into_result()
        .expect("compress");
    let manifest = read_manifest(&artifact);
    let output = pipeline
        .decompress_file(&artifact, &dir.path().join("out"))
        .into_result()
        .expect("decompress");
    assert_eq!(output.file_name().and_then(|n| n.to_str()), Some(name));
    (std::fs::read(output).expect("read output"), manifest)
}

fn read_manifest(artifact: &Path) -> ArtifactManifest {
    let file = File::open(artifact).expect("open artifact");
    FrameReader::new(BufReader::new(file)).read_manifest().expect("manifest")
}

#[test]
fn mixed_types_roundtrip_byte_for_byte() {
    let content = b"id,name,score,active,note\n1,alice,9.5,true,\n2,bob,-3,false,x y\n3,,0.25,,\"quoted\"\n";
    let (out, manifest) = roundtrip(content, "people.csv", config(2, 1));
    assert_eq!(out, content);
    assert!(manifest.has_header);
    assert_eq!(manifest.delimiter, ',');
    assert_eq!(manifest.total_rows, 3);
    assert_eq!(manifest.block_count, 2);
    let types: Vec<ColumnType> = manifest.columns.iter().map(|c| c.column_type).collect();
    assert_eq!(
        types,
        vec![
            ColumnType::Integer,
            ColumnType::String,
            ColumnType::Floating,
            ColumnType::Boolean,
            ColumnType::String,
        ]
    );
}

#[test]
fn pipe_table_without_header_or_final_newline() {
    let content = b"1|BUILDING|0.50|x\n2|AUTOMOBILE|12|y\n3|MACHINERY|7|z";
    let (out, manifest) = roundtrip(content, "customer.tbl", config(1, 2));
    assert_eq!(out, content);
    assert_eq!(manifest.delimiter, '|');
    assert!(!manifest.has_header);
    assert!(!manifest.trailing_newline);
    assert_eq!(manifest.column_names(), vec!["col_0", "col_1", "col_2", "col_3"]);
    assert_eq!(manifest.source_extension, "tbl");
    // "0.50" is not canonical, so the column stays text.
    assert_eq!(manifest.columns[2].column_type, ColumnType::String);
}

#[test]
fn crlf_tab_separated_roundtrip() {
    let content = b"k\tv\r\na\t1\r\nb\t2\r\n";
    let (out, _) = roundtrip(content, "pairs.txt", config(50, 1));
    assert_eq!(out, content);
}

#[test]
fn utf16_with_bom_roundtrip() {
    let mut content = vec![0xFF, 0xFE];
    TextEncoding::Utf16Le
        .encode_into("city;population\nZürich;421878\nGenève;203856\n", &mut content)
        .expect("encode");
    let (out, manifest) = roundtrip(&content, "cities.csv", config(1, 1));
    assert_eq!(out, content);
    assert_eq!(manifest.encoding, TextEncoding::Utf16Le);
    assert!(manifest.has_bom);
    assert_eq!(manifest.delimiter, ';');
}

#[test]
fn windows_1252_euro_sign_roundtrip() {
    let content = b"item,price\nwidget,\x805\ngadget,\x8012\n";
    let (out, manifest) = roundtrip(content, "prices.csv", config(2, 1));
    assert_eq!(out, content);
    assert_eq!(manifest.encoding, TextEncoding::Windows1252);
}

#[test]
fn gb18030_roundtrip() {
    let mut content = Vec::new();
    TextEncoding::Gb18030
        .encode_into("城市|人口|面积\n北京|2189|16410.54\n上海|2487|6340.5\n", &mut content)
        .expect("encode");
    let (out, manifest) = roundtrip(&content, "cities.tbl", config(1, 2));
    assert_eq!(out, content);
    assert_eq!(manifest.encoding, TextEncoding::Gb18030);
    assert!(manifest.has_header);
}

#[test]
fn late_widening_is_patched_in_both_modes() {
    let mut content = String::from("n,label\n");
    for i in 0..20 {
        content.push_str(&format!("{i},row{i}\n"));
    }
    content.push_str("n/a,last\n");

    for buffer_all in [true, false] {
        let (out, manifest) = roundtrip(content.as_bytes(), "late.csv", config(4, 3).with_buffer_all(buffer_all));
        assert_eq!(out, content.as_bytes(), "buffer_all={buffer_all}");
        assert_eq!(manifest.columns[0].column_type, ColumnType::String);
        assert!(manifest
            .widenings
            .iter()
            .any(|e| e.column == 0 && e.from == Some(ColumnType::Integer) && e.to == ColumnType::String));
    }
}

#[test]
fn column_committed_late_roundtrips() {
    let content = b"a,b\nx,\ny,\nz,5\n";
    let (out, manifest) = roundtrip(content, "sparse.csv", config(1, 1).with_buffer_all(false));
    assert_eq!(out, content);
    assert_eq!(manifest.columns[1].column_type, ColumnType::Integer);
}

#[test]
fn single_line_file_is_data_not_header() {
    let content = b"alpha,beta,gamma\n";
    let (out, manifest) = roundtrip(content, "single.csv", config(10, 1));
    assert_eq!(out, content);
    assert!(!manifest.has_header);
    assert_eq!(manifest.total_rows, 1);
    assert_eq!(manifest.columns.len(), 3);
}

fn field() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        (-1000i64..1000).prop_map(|v| v.to_string()),
        (-1000.0f64..1000.0).prop_map(|v| v.to_string()),
        any::<bool>().prop_map(|v| v.to_string()),
        "[a-z]{1,6}",
        Just("007".to_string()),
        Just("+5".to_string()),
        Just("1.50".to_string()),
    ]
}

fn table() -> impl Strategy<Value = Vec<Vec<String>>> {
    (2usize..5).prop_flat_map(|cols| prop::collection::vec(prop::collection::vec(field(), cols), 1..30))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_table_roundtrips_exactly(rows in table(), chunk in 1usize..8, buffer_all in any::<bool>()) {
        let cols = rows[0].len();
        let mut content = (0..cols).map(|i| format!("c{i}")).collect::<Vec<_>>().join(",");
        content.push('\n');
        for row in &rows {
            content.push_str(&row.join(","));
            content.push('\n');
        }

        let (out, manifest) = roundtrip(content.as_bytes(), "prop.csv", config(chunk, 2).with_buffer_all(buffer_all));
        prop_assert_eq!(out, content.as_bytes().to_vec());
        prop_assert_eq!(manifest.columns.len(), cols);
    }
}
