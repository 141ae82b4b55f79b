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

//! # Tabpress Core Library
//!
//! Tabpress turns large delimited text files (CSV, TSV, pipe-separated TBL)
//! into chunked columnar blocks, compresses each block into an independently
//! checksummed zstd frame, and reconstructs the original text from the
//! resulting artifact.
//!
//! ## Module Overview
//!
//! - **ingest**: encoding, delimiter and header detection; bounded chunked reading
//! - **columnar**: strict column typing with monotonic widening; block layout; encoder and decoder
//! - **codec**: artifact frame format and the parallel stream codec
//! - **export**: text reconstruction and atomic output files
//! - **pipeline**: per-file state machine and directory batch runs
//! - **stats**: thread-safe run statistics
//! - **config**: pipeline configuration
//! - **errors**: error types
//!
//! ## Feature Flags
//!
//! - `parallel` (default): compress and decompress frames on a Rayon pool
//!
//! ## Quick Start
//!
//! ```rust
//! use tabpress::{Pipeline, PipelineConfig, StatsAggregator};
//!
//! let stats = StatsAggregator::new();
//! let pipeline = Pipeline::new(PipelineConfig::default(), &stats)?;
//! let artifact = pipeline.compress_file("orders.tbl".as_ref(), "compressed".as_ref()).into_result()?;
//! pipeline.decompress_file(&artifact, "restored".as_ref()).into_result()?;
//! println!("{}", stats.snapshot().render_summary());
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, TabError>`](errors::Result).
//! Pipelines never return early on a per-file error; the error is kept in the
//! [`FileReport`] and recorded in the statistics.

pub mod codec;
pub mod columnar;
pub mod config;
pub mod errors;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod stats;

pub use codec::{ArtifactManifest, CodecReport, FrameReader, FrameWriter, StreamCodec, ARTIFACT_EXTENSION};
pub use columnar::{ColumnDef, ColumnSchema, ColumnType, ColumnarBlock, ColumnarDecoder, ColumnarEncoder, FinalizationMode};
pub use config::{MalformedRowPolicy, PipelineConfig};
pub use errors::{ErrorKind, Result, TabError};
pub use export::{AtomicFile, TextLayout, TextWriter};
pub use ingest::{ChunkedTextReader, FileDescriptor, FormatSniffer, RowChunk, TextEncoding};
pub use pipeline::{CancellationToken, Direction, FileReport, Pipeline, PipelineState};
pub use stats::{FileOutcome, FileStats, StatsAggregator, StatsSnapshot};
