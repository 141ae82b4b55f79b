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

//! # Data Export Module
//!
//! Output side of the pipeline: reconstructed text and atomic file placement.
//!
//! ## Module Components
//!
//! - **Writer** ([writer.rs](writer/index.html)): delimited text rendering,
//!   transcoding back to the source encoding, temp-then-rename output files
//!
//! ## Usage Patterns
//!
//! ```rust
//! use tabpress::export::{AtomicFile, TextLayout, TextWriter};
//!
//! let out = AtomicFile::create(&target)?;
//! let mut writer = TextWriter::new(out, TextLayout::from_manifest(&manifest))?;
//! writer.write_chunk(&chunk)?;
//! let (out, stats) = writer.finish()?;
//! out.commit()?;
//! ```

pub mod writer;

pub use writer::{temp_path, AtomicFile, ScratchPath, TextLayout, TextWriter, WriteStats};
