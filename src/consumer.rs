// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Record reader (consumer) side of the queue.
//!
//! The consumer delivers records in offset order and persists its progress
//! through its own offset word. [`consume`](Consumer::consume) blocks:
//! it busy-spins on the record's end marker for a bounded budget, then
//! falls back to sleeping between retries. Progress is only published by
//! an explicit [`commit`](Consumer::commit), so a crashed consumer re-reads
//! the record it never committed.
//!
//! ## Stuck detection
//!
//! When `unmatched_check_count` is non-zero, a consumer that sleeps
//! repeatedly at the same offset starts sampling the producer's offset
//! word. A producer that keeps advancing while the consumer cannot read
//! means the consumer is parked on a gap (a truncated or repositioned
//! segment); the consumer then drops its mapping and repositions itself
//! to the last observed producer offset.

use std::{path::PathBuf, sync::Arc, thread, time::Instant};

use bytes::Bytes;
use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    QueueOptions, Result,
    error::{NoSegmentOpenSnafu, SegmentStillOpenSnafu},
    offset::{OffsetWord, ReadOnlyOffsetWord},
    path::{consumer_offset_path, producer_offset_path, segment_dir},
    segment::Segment,
};

/// The reading half of a queue. Exactly one exists per queue.
#[derive(Debug)]
pub struct Consumer {
    /// Shared queue configuration.
    options:         Arc<QueueOptions>,
    /// Directory holding the segment files.
    segment_dir:     PathBuf,
    /// Next byte position to read; advanced by [`commit`](Consumer::commit).
    offset:          OffsetWord,
    /// Currently open head segment (read-only mapping).
    segment:         Option<Segment>,
    /// Read-only view of the producer offset, opened lazily by the stuck
    /// detector.
    producer_offset: Option<ReadOnlyOffsetWord>,
    /// Consecutive sleep cycles with an unchanged own offset.
    stalled_samples: u32,
    /// Own offset at the last sleep-cycle sample.
    last_offset_sample: i64,
    /// Producer offset at the previous probe, once the detector is armed.
    last_producer_sample: Option<i64>,
}

impl Consumer {
    pub(crate) fn new(options: Arc<QueueOptions>) -> Result<Self> {
        let offset = OffsetWord::open(consumer_offset_path(&options.store_path))?;
        let segment_dir = segment_dir(&options.store_path);
        let last_offset_sample = offset.read();

        Ok(Self {
            options,
            segment_dir,
            offset,
            segment: None,
            producer_offset: None,
            stalled_samples: 0,
            last_offset_sample,
            last_producer_sample: None,
        })
    }

    /// Blocks until the record at the current offset is published, then
    /// returns its payload.
    ///
    /// Waiting starts with a busy-spin bounded by
    /// `consumer_spin_wait_duration`, then degrades to sleeping
    /// `consumer_retry_interval` per retry. The offset does not move until
    /// [`commit`](Consumer::commit); consuming twice without a commit
    /// returns the same record.
    pub fn consume(&mut self) -> Result<Bytes> {
        let mut payload = vec![0u8; self.options.payload_size];
        let mut wait_start: Option<Instant> = None;

        loop {
            let offset = self.offset.read();

            if self.segment.is_none() {
                match Segment::try_find(
                    &self.segment_dir,
                    self.options.segment_size,
                    self.options.payload_size,
                    offset,
                )? {
                    Some(segment) => {
                        debug!(start = segment.start(), "Opened head segment");
                        self.segment = Some(segment);
                    }
                    None => {
                        thread::sleep(self.options.consumer_retry_interval);
                        if self.observe_sleep_cycle()? {
                            wait_start = None;
                        }
                        continue;
                    }
                }
            }

            if let Some(segment) = self.segment.as_ref()
                && segment.try_read(offset, &mut payload)?
            {
                self.reset_stall_tracking(offset);
                return Ok(Bytes::from(payload));
            }

            let started = *wait_start.get_or_insert_with(Instant::now);
            if started.elapsed() < self.options.consumer_spin_wait_duration {
                std::hint::spin_loop();
            } else {
                thread::sleep(self.options.consumer_retry_interval);
                if self.observe_sleep_cycle()? {
                    // Repositioned past a gap; restart the wait budget.
                    wait_start = None;
                }
            }
        }
    }

    /// Publishes progress past the record returned by the last
    /// [`consume`](Consumer::consume).
    ///
    /// # Errors
    ///
    /// Fails when no segment is open, which also makes a double commit
    /// impossible: crossing the segment boundary closes the segment, and
    /// within a segment each commit pairs with one consumed record.
    pub fn commit(&mut self) -> Result<()> {
        let last_writable = match self.segment.as_ref() {
            Some(segment) => segment.last_writable_offset(),
            None => return NoSegmentOpenSnafu.fail(),
        };

        let next = self.offset.advance(self.options.stride());
        if next > last_writable {
            // Fully consumed; the next consume opens the next segment.
            self.segment = None;
        }
        self.reset_stall_tracking(next);
        Ok(())
    }

    /// Repositions the consumer. Without `force` this fails while a
    /// segment is open; with `force` the open segment is dropped first.
    /// Backwards moves are permitted (recovery only).
    pub fn adjust_offset(&mut self, new_offset: i64, force: bool) -> Result<()> {
        if self.segment.is_some() {
            ensure!(force, SegmentStillOpenSnafu);
            self.segment = None;
        }
        self.offset.move_to(new_offset, true)?;
        self.reset_stall_tracking(new_offset);
        Ok(())
    }

    /// Non-blocking probe: is the record at the current offset published?
    ///
    /// Opens the covering segment when the file exists; a missing segment
    /// file means no record.
    pub fn next_message_available(&mut self) -> Result<bool> {
        let offset = self.offset.read();

        if self.segment.is_none() {
            self.segment = Segment::try_find(
                &self.segment_dir,
                self.options.segment_size,
                self.options.payload_size,
                offset,
            )?;
        }

        match self.segment.as_ref() {
            Some(segment) => segment.is_published(offset),
            None => Ok(false),
        }
    }

    /// Next byte position to read.
    #[must_use]
    pub fn offset(&self) -> i64 { self.offset.read() }

    /// One sleep cycle elapsed without a readable record. Returns `true`
    /// when the stuck detector repositioned the consumer.
    fn observe_sleep_cycle(&mut self) -> Result<bool> {
        if self.options.unmatched_check_count == 0 {
            return Ok(false);
        }

        let current = self.offset.read();
        if current != self.last_offset_sample {
            self.reset_stall_tracking(current);
            return Ok(false);
        }

        self.stalled_samples = self.stalled_samples.saturating_add(1);
        if self.stalled_samples < self.options.unmatched_check_count {
            return Ok(false);
        }

        // Stuck long enough; start watching the producer cursor. Probe
        // failures are absorbed: the producer side may not exist yet.
        if self.producer_offset.is_none() {
            self.producer_offset =
                ReadOnlyOffsetWord::open(producer_offset_path(&self.options.store_path)).ok();
        }
        let Some(word) = self.producer_offset.as_ref() else {
            return Ok(false);
        };

        let produced = word.read();
        let advancing = self
            .last_producer_sample
            .is_some_and(|previous| produced > previous);
        self.last_producer_sample = Some(produced);

        if advancing && produced > current {
            warn!(
                stuck_at = current,
                reposition_to = produced,
                "Producer advancing past unreadable offset, repositioning consumer"
            );
            self.segment = None;
            self.offset.move_to(produced, true)?;
            self.reset_stall_tracking(produced);
            return Ok(true);
        }

        Ok(false)
    }

    fn reset_stall_tracking(&mut self, offset: i64) {
        self.stalled_samples = 0;
        self.last_offset_sample = offset;
        self.last_producer_sample = None;
    }
}
