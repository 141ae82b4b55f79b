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

//! # Codec Module
//!
//! - **Frame** ([frame.rs](frame/index.html)): on-disk frame layout, manifest and end marker
//! - **Stream** ([stream.rs](stream/index.html)): parallel compression with backpressure and reordering

pub mod frame;
pub mod stream;

pub use frame::{
    payload_checksum, ArtifactManifest, FramePayload, FrameReader, FrameWriter, RawFrame, ARTIFACT_EXTENSION,
    END_OF_STREAM_CHECKSUM, FORMAT_VERSION, FRAME_HEADER_LEN, MANIFEST_KIND,
};
pub use stream::{CodecReport, StreamCodec};
