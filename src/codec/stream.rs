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

//! # Stream Codec
//!
//! Compresses blocks into frames and back on a bounded worker pool.
//!
//! Work items are numbered in submission order. Finished items wait in a
//! reorder buffer until every earlier item has been delivered, so output is
//! always in submission order no matter which worker finishes first. The
//! window between the oldest undelivered item and the newest submitted one
//! never exceeds `max_in_flight`; once it is full the producer stops pulling
//! input until the head of the window completes.
//!
//! With one worker, or without the `parallel` feature, items run inline on
//! the calling thread and the output is fully deterministic.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;

use crate::codec::frame::{FramePayload, FrameWriter, RawFrame};
use crate::columnar::{ColumnarBlock, FinalSchema};
use crate::config::PipelineConfig;
use crate::errors::{Result, TabError};
use crate::pipeline::CancellationToken;

/// Counters of one codec run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodecReport {
    pub frames: u64,
    /// Uncompressed payload bytes.
    pub payload_bytes: u64,
    /// On-disk frame bytes, headers included.
    pub frame_bytes: u64,
    /// Largest window of submitted but undelivered items observed.
    pub peak_in_flight: usize,
    /// Frames re-encoded during a patch run.
    pub patched: u64,
}

/// Frame compressor/decompressor with backpressure and in-order delivery.
pub struct StreamCodec {
    level: i32,
    workers: usize,
    max_in_flight: usize,
    #[cfg(feature = "parallel")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl StreamCodec {
    pub fn new(level: i32, workers: usize, max_in_flight: usize) -> Result<Self> {
        let workers = workers.max(1);
        #[cfg(feature = "parallel")]
        let pool = if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("tabpress-codec-{i}"))
                .build()
                .map_err(|e| TabError::internal(format!("failed to create codec thread pool: {e}")))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            level,
            workers,
            max_in_flight: max_in_flight.max(1),
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    /// Codec for one file given its share of the worker budget.
    pub fn from_config(config: &PipelineConfig, workers: usize) -> Result<Self> {
        Self::new(config.compression_level, workers, config.effective_in_flight(workers))
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Compresses `blocks` into frames numbered from `first_index` and writes them in order.
    pub fn compress<I, W>(
        &self,
        blocks: I,
        first_index: u64,
        writer: &mut FrameWriter<W>,
        cancel: &CancellationToken,
    ) -> Result<CodecReport>
    where
        I: IntoIterator<Item = Result<ColumnarBlock>>,
        W: Write,
    {
        let level = self.level;
        let mut report = CodecReport::default();
        let peak = self.run_ordered(
            blocks.into_iter(),
            move |slot, block: ColumnarBlock| {
                let payload = block.to_bytes();
                let frame = RawFrame::seal(first_index + slot, &payload, level)?;
                Ok((frame, payload.len() as u64))
            },
            |(frame, payload_len): (RawFrame, u64)| {
                writer.write_frame(&frame)?;
                report.frames += 1;
                report.payload_bytes += payload_len;
                report.frame_bytes += frame.encoded_len();
                Ok(())
            },
            cancel,
            "compressing",
        )?;
        report.peak_in_flight = peak;
        Ok(report)
    }

    /// Opens block frames and hands the blocks to `sink` in frame order.
    pub fn decompress<I, F>(&self, frames: I, mut sink: F, cancel: &CancellationToken) -> Result<CodecReport>
    where
        I: IntoIterator<Item = Result<RawFrame>>,
        F: FnMut(ColumnarBlock) -> Result<()>,
    {
        let mut report = CodecReport::default();
        let peak = self.run_ordered(
            frames.into_iter(),
            |_, frame: RawFrame| {
                let payload = frame.open()?;
                match FramePayload::parse(&payload)? {
                    FramePayload::Block(block) => Ok((block, payload.len() as u64, frame.encoded_len())),
                    FramePayload::Manifest(_) => Err(TabError::internal(format!(
                        "frame {} is a second manifest",
                        frame.index
                    ))),
                }
            },
            |(block, payload_len, frame_len): (ColumnarBlock, u64, u64)| {
                report.frames += 1;
                report.payload_bytes += payload_len;
                report.frame_bytes += frame_len;
                sink(block)
            },
            cancel,
            "decompressing",
        )?;
        report.peak_in_flight = peak;
        Ok(report)
    }

    /// Copies journal frames into `writer`, re-encoding the ones made stale by later widenings.
    ///
    /// Journal frame `k` holds block `k`; fresh frames are copied without
    /// being decompressed.
    pub fn patch<I, W>(
        &self,
        journal: I,
        schema: Arc<FinalSchema>,
        first_index: u64,
        writer: &mut FrameWriter<W>,
        cancel: &CancellationToken,
    ) -> Result<CodecReport>
    where
        I: IntoIterator<Item = Result<RawFrame>>,
        W: Write,
    {
        let level = self.level;
        let mut report = CodecReport::default();
        let peak = self.run_ordered(
            journal.into_iter(),
            move |slot, frame: RawFrame| {
                let index = first_index + slot;
                if !schema.is_stale(slot) {
                    return Ok((RawFrame { index, ..frame }, false));
                }
                let block = match FramePayload::parse(&frame.open()?)? {
                    FramePayload::Block(block) => block,
                    FramePayload::Manifest(_) => {
                        return Err(TabError::internal("manifest frame inside the block journal"))
                    }
                };
                if block.sequence != slot {
                    return Err(TabError::schema_mismatch(
                        block.sequence,
                        format!("journal position {slot} holds block {}", block.sequence),
                    ));
                }
                let block = schema.reencode(block)?;
                Ok((RawFrame::seal(index, &block.to_bytes(), level)?, true))
            },
            |(frame, patched): (RawFrame, bool)| {
                writer.write_frame(&frame)?;
                report.frames += 1;
                report.frame_bytes += frame.encoded_len();
                if patched {
                    report.patched += 1;
                }
                Ok(())
            },
            cancel,
            "finalizing",
        )?;
        report.peak_in_flight = peak;
        if report.patched > 0 {
            log::info!("patched {} of {} journal frames", report.patched, report.frames);
        }
        Ok(report)
    }

    /// Runs `work` over `inputs` and feeds results to `deliver` in input order.
    ///
    /// On any failure (input, work, delivery or cancellation) no further input
    /// is pulled, every dispatched item is drained, and the first error is
    /// returned. Returns the peak window size.
    fn run_ordered<T, U, I, F, D>(
        &self,
        inputs: I,
        work: F,
        mut deliver: D,
        cancel: &CancellationToken,
        stage: &str,
    ) -> Result<usize>
    where
        I: Iterator<Item = Result<T>>,
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(u64, T) -> Result<U> + Send + Sync + 'static,
        D: FnMut(U) -> Result<()>,
    {
        let work = Arc::new(work);
        let (tx, rx) = mpsc::channel::<(u64, Result<U>)>();
        let mut reorder: BTreeMap<u64, U> = BTreeMap::new();
        let mut submitted: u64 = 0;
        let mut delivered: u64 = 0;
        let mut outstanding: usize = 0;
        let mut peak: usize = 0;
        let mut failure: Option<TabError> = None;

        let mut absorb = |slot: u64,
                          result: Result<U>,
                          reorder: &mut BTreeMap<u64, U>,
                          delivered: &mut u64,
                          failure: &mut Option<TabError>| {
            if failure.is_some() {
                return;
            }
            match result {
                Ok(value) => {
                    reorder.insert(slot, value);
                    while let Some(value) = reorder.remove(delivered) {
                        if let Err(err) = deliver(value) {
                            *failure = Some(err);
                            reorder.clear();
                            return;
                        }
                        *delivered += 1;
                    }
                }
                Err(err) => {
                    *failure = Some(err);
                    reorder.clear();
                }
            }
        };

        for input in inputs {
            if cancel.is_cancelled() {
                failure = Some(TabError::cancelled(stage));
                break;
            }
            let item = match input {
                Ok(item) => item,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            // Backpressure: wait for the head of the window before growing it.
            while (submitted - delivered) as usize >= self.max_in_flight && failure.is_none() {
                let Ok((slot, result)) = rx.recv() else {
                    failure = Some(TabError::internal("codec worker channel closed"));
                    break;
                };
                outstanding -= 1;
                absorb(slot, result, &mut reorder, &mut delivered, &mut failure);
            }
            if failure.is_some() {
                break;
            }

            let slot = submitted;
            submitted += 1;
            outstanding += 1;
            peak = peak.max((submitted - delivered) as usize);
            let tx = tx.clone();
            let work = Arc::clone(&work);
            self.dispatch(move || {
                let result = work(slot, item);
                let _ = tx.send((slot, result));
            });

            while let Ok((slot, result)) = rx.try_recv() {
                outstanding -= 1;
                absorb(slot, result, &mut reorder, &mut delivered, &mut failure);
            }
            if failure.is_some() {
                break;
            }
        }

        // Drain: nothing dispatched is abandoned, even after a failure.
        while outstanding > 0 {
            match rx.recv() {
                Ok((slot, result)) => {
                    outstanding -= 1;
                    absorb(slot, result, &mut reorder, &mut delivered, &mut failure);
                }
                Err(_) => break,
            }
        }

        if let Some(err) = failure {
            log::debug!("{stage} stopped after {delivered} of {submitted} items: {err}");
            return Err(err);
        }
        Ok(peak)
    }

    fn dispatch<J>(&self, job: J)
    where
        J: FnOnce() + Send + 'static,
    {
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            pool.spawn(job);
            return;
        }
        job();
    }
}
