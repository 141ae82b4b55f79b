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

use proptest::prelude::*;
use tabpress::columnar::{ColumnSchema, ColumnType, ColumnarEncoder, FinalizationMode};
use tabpress::RowChunk;

fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
    values
        .iter()
        .map(|r| r.iter().map(|s| s.to_string()).collect())
        .collect()
}

fn chunked(rows: &[Vec<String>], size: usize) -> Vec<RowChunk> {
    rows.chunks(size.max(1))
        .enumerate()
        .map(|(i, part)| RowChunk {
            sequence: i as u64,
            first_row_index: (i * size) as u64,
            rows: part.to_vec(),
        })
        .collect()
}

fn final_types(rows: &[Vec<String>], size: usize) -> Vec<ColumnType> {
    let mut schema = ColumnSchema::new();
    for chunk in chunked(rows, size) {
        schema.observe(&chunk).expect("observe");
    }
    schema.effective_types()
}

#[test]
fn lattice_only_moves_up() {
    assert_eq!(ColumnType::Integer.join(ColumnType::Floating), ColumnType::Floating);
    assert_eq!(ColumnType::Boolean.join(ColumnType::Integer), ColumnType::String);
    assert!(ColumnType::Integer.widens_to(ColumnType::String));
    assert!(!ColumnType::String.widens_to(ColumnType::Integer));
    assert!(!ColumnType::Floating.widens_to(ColumnType::Integer));
}

#[test]
fn string_column_never_narrows() {
    let mut schema = ColumnSchema::new();
    for (i, chunk) in chunked(&rows(&[&["x"], &["1"], &["2"], &["3"]]), 1).iter().enumerate() {
        let before = schema.version();
        schema.observe(chunk).expect("observe");
        assert!(schema.version() >= before);
        if i > 0 {
            assert_eq!(schema.effective_type(0), ColumnType::String);
        }
    }
    assert_eq!(schema.widenings().len(), 1);
}

#[test]
fn integer_widens_to_floating_with_event() {
    let mut schema = ColumnSchema::new();
    let chunks = chunked(&rows(&[&["1", "true"], &["2.5", "false"]]), 1);
    schema.observe(&chunks[0]).expect("first");
    assert_eq!(schema.effective_types(), vec![ColumnType::Integer, ColumnType::Boolean]);

    let events = schema.observe(&chunks[1]).expect("second");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].column, 0);
    assert_eq!(events[0].from, Some(ColumnType::Integer));
    assert_eq!(events[0].to, ColumnType::Floating);
    assert_eq!(events[0].sequence, 1);
    assert!(schema.widened_after(0));
    assert!(!schema.widened_after(1));
}

#[test]
fn empty_values_leave_column_uncommitted() {
    let mut schema = ColumnSchema::new();
    schema.observe(&chunked(&rows(&[&["", "a"]]), 1)[0]).expect("observe");
    assert_eq!(schema.committed(0), None);
    assert_eq!(schema.effective_type(0), ColumnType::String);
    assert_eq!(schema.names(), vec!["col_0", "col_1"]);
}

#[test]
fn stale_blocks_are_reencoded_to_final_types() {
    let mut encoder = ColumnarEncoder::new(FinalizationMode::BufferAll, usize::MAX);
    for chunk in chunked(&rows(&[&["1", ""], &["2", ""], &["3.5", "7"]]), 1) {
        encoder.push(chunk).expect("push");
    }
    let schema = encoder.final_schema(2);
    let blocks = encoder.finish_buffered(&schema).expect("finish");
    assert_eq!(blocks.len(), 3);
    for block in &blocks {
        assert_eq!(block.column_types(), vec![ColumnType::Floating, ColumnType::Integer]);
    }
}

#[test]
fn buffer_budget_is_enforced() {
    let mut encoder = ColumnarEncoder::new(FinalizationMode::BufferAll, 16);
    let big = rows(&[&["a long enough string value"], &["another long string value"]]);
    let err = chunked(&big, 1)
        .into_iter()
        .try_for_each(|chunk| encoder.push(chunk).map(|_| ()))
        .expect_err("budget");
    assert_eq!(err.kind(), tabpress::ErrorKind::ResourceExhausted);
}

fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        (-50i64..50).prop_map(|v| v.to_string()),
        (-5.0f64..5.0).prop_map(|v| v.to_string()),
        any::<bool>().prop_map(|v| v.to_string()),
        "[a-c]{1,3}",
    ]
}

proptest! {
    #[test]
    fn final_schema_is_independent_of_chunk_size(
        table in (1usize..4).prop_flat_map(|cols| prop::collection::vec(prop::collection::vec(cell(), cols), 1..40)),
        size in 1usize..12,
    ) {
        let whole = final_types(&table, table.len());
        prop_assert_eq!(final_types(&table, size), whole);
    }

    #[test]
    fn versions_and_types_are_monotonic(
        table in prop::collection::vec(prop::collection::vec(cell(), 2), 1..40),
        size in 1usize..6,
    ) {
        let mut schema = ColumnSchema::new();
        let mut previous: Vec<Option<ColumnType>> = vec![None; 2];
        for chunk in chunked(&table, size) {
            let version = schema.version();
            schema.observe(&chunk).expect("observe");
            prop_assert!(schema.version() >= version);
            let current: Vec<Option<ColumnType>> = (0..2).map(|c| schema.committed(c)).collect();
            for (before, now) in previous.iter().zip(&current) {
                if let Some(before) = before {
                    prop_assert!(now.map_or(false, |now| before.widens_to(now)));
                }
            }
            previous = current;
        }
    }
}
