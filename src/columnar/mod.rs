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

//! # Columnar Module
//!
//! Text rows in, typed per-column blocks out, and back again.
//!
//! ## Module Components
//!
//! - **Schema** ([schema.rs](schema/index.html)): column type lattice and widening log
//! - **Block** ([block.rs](block/index.html)): in-memory block and its binary layout
//! - **Encoder** ([encoder.rs](encoder/index.html)): chunk to block, finalization pass
//! - **Decoder** ([decoder.rs](decoder/index.html)): block to chunk against the final schema
//!
//! ## Finalization
//!
//! A block is encoded under the schema known when its chunk arrived. If a
//! later chunk widens a column, the earlier block is stale and is re-encoded
//! before it reaches the artifact, so every stored block matches the final
//! schema exactly. [`FinalizationMode::BufferAll`] keeps blocks in memory for
//! this; [`FinalizationMode::StreamThenPatch`] lets them go to a journal and
//! patches the stale ones when the artifact is assembled.

pub mod block;
pub mod decoder;
pub mod encoder;
pub mod schema;

pub use block::{ColumnBuffer, ColumnarBlock, BLOCK_KIND};
pub use decoder::ColumnarDecoder;
pub use encoder::{ColumnarEncoder, FinalSchema, FinalizationMode};
pub use schema::{ColumnDef, ColumnSchema, ColumnType, WideningEvent};
