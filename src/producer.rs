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

//! Record writer (producer) side of the queue.
//!
//! The producer appends records in strict offset order, rolling to a new
//! segment file whenever the current one is full. Two cursors track its
//! progress:
//!
//! - the **offset word** reflects in-memory progress and is what the
//!   consumer polls;
//! - the **confirmed offset** reflects on-disk progress and only moves
//!   after a successful flush. Crash recovery rolls the offset word back
//!   to it, never forward past it.

use std::{path::PathBuf, sync::Arc};

use snafu::ensure;
use tracing::debug;

use crate::{
    QueueOptions, Result,
    error::{InternalSnafu, PayloadSizeMismatchSnafu, SegmentStillOpenSnafu},
    offset::OffsetWord,
    path::{producer_confirmed_path, producer_offset_path, segment_dir},
    segment::Segment,
};

/// The writing half of a queue. Exactly one exists per queue.
#[derive(Debug)]
pub struct Producer {
    /// Shared queue configuration.
    options:     Arc<QueueOptions>,
    /// Directory holding the segment files.
    segment_dir: PathBuf,
    /// Next byte position to write (in-memory progress, consumer-visible).
    offset:      OffsetWord,
    /// Highest offset whose records are flushed to stable storage.
    confirmed:   OffsetWord,
    /// Currently open writable tail segment.
    segment:     Option<Segment>,
    /// Records written since the last forced flush.
    unflushed:   u64,
}

impl Producer {
    pub(crate) fn new(options: Arc<QueueOptions>) -> Result<Self> {
        let offset = OffsetWord::open(producer_offset_path(&options.store_path))?;
        let confirmed = OffsetWord::open(producer_confirmed_path(&options.store_path))?;
        let segment_dir = segment_dir(&options.store_path);

        Ok(Self {
            options,
            segment_dir,
            offset,
            confirmed,
            segment: None,
            unflushed: 0,
        })
    }

    /// Appends one record.
    ///
    /// The payload must be exactly `payload_size` bytes. After this
    /// returns, the record is visible in-memory to any peer mapping the
    /// same segment; it is stable on disk once the confirmed offset
    /// passes it (segment rollover or every
    /// `producer_force_flush_interval_count` records).
    ///
    /// # Errors
    ///
    /// Returns an error on payload size mismatch or when segment creation,
    /// the write, or a forced flush fails. The offset word is not advanced
    /// past a failed record.
    pub fn produce(&mut self, payload: &[u8]) -> Result<()> {
        ensure!(
            payload.len() == self.options.payload_size,
            PayloadSizeMismatchSnafu {
                expected: self.options.payload_size,
                actual:   payload.len(),
            }
        );

        let offset = self.offset.read();

        if self.segment.is_none() {
            let segment = Segment::create_or_open(
                &self.segment_dir,
                self.options.segment_size,
                self.options.payload_size,
                offset,
            )?;
            debug!(start = segment.start(), "Opened tail segment");
            self.segment = Some(segment);
        }
        let segment = self.segment.as_mut().ok_or_else(|| {
            InternalSnafu {
                message: "No tail segment available".to_string(),
            }
            .build()
        })?;

        segment.write(offset, payload)?;
        let segment_start = segment.start();
        let last_writable = segment.last_writable_offset();

        let next = self.offset.advance(self.options.stride());
        self.unflushed += 1;

        if next > last_writable {
            // Segment exhausted: force durability before rolling.
            self.flush_and_confirm(next)?;
            self.segment = None;
            debug!(confirmed = next, "Rolled off full segment");
        } else if self.unflushed >= self.options.producer_force_flush_interval_count {
            // Periodic flush only needs the pages written since the last
            // confirm.
            let from = self.confirmed.read().clamp(segment_start, next);
            if let Some(segment) = self.segment.as_ref()
                && next > from
            {
                segment.flush_range(from, (next - from) as usize)?;
            }
            self.confirm(next)?;
        }

        Ok(())
    }

    /// Flushes the open segment and advances the confirmed offset to the
    /// current offset word. A no-op when this producer has nothing open
    /// and nothing unflushed, so an idle handle never confirms progress
    /// it did not write.
    pub fn flush(&mut self) -> Result<()> {
        if self.segment.is_none() && self.unflushed == 0 {
            return Ok(());
        }
        let offset = self.offset.read();
        self.flush_and_confirm(offset)
    }

    /// Repositions the offset word. Only legal while no segment is open;
    /// used exclusively by crash recovery, which may move it backwards.
    pub fn adjust_offset(&mut self, new_offset: i64) -> Result<()> {
        ensure!(self.segment.is_none(), SegmentStillOpenSnafu);
        self.offset.move_to(new_offset, true)?;
        Ok(())
    }

    /// Next byte position to write.
    #[must_use]
    pub fn offset(&self) -> i64 { self.offset.read() }

    /// Highest offset known to be stable on disk.
    #[must_use]
    pub fn confirmed_offset(&self) -> i64 { self.confirmed.read() }

    fn flush_and_confirm(&mut self, up_to: i64) -> Result<()> {
        if let Some(segment) = self.segment.as_ref() {
            segment.flush()?;
        }
        self.confirm(up_to)
    }

    fn confirm(&mut self, up_to: i64) -> Result<()> {
        self.confirmed.move_to(up_to, false)?;
        self.confirmed.flush()?;
        self.unflushed = 0;
        Ok(())
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // Best-effort final flush so a clean shutdown leaves
        // confirmed == offset and recovery has nothing to roll back.
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{Error, path::segment_file_name};

    const PAYLOAD_SIZE: usize = 7;

    fn test_options(store: &std::path::Path) -> Arc<QueueOptions> {
        Arc::new(QueueOptions {
            store_path: store.to_path_buf(),
            payload_size: PAYLOAD_SIZE,
            segment_size: 64,
            ..Default::default()
        })
    }

    #[test]
    fn test_produce_advances_offset() {
        let temp_dir = TempDir::new().unwrap();
        let mut producer = Producer::new(test_options(temp_dir.path())).unwrap();

        producer.produce(&[1u8; PAYLOAD_SIZE]).unwrap();
        assert_eq!(producer.offset(), 8);

        producer.produce(&[2u8; PAYLOAD_SIZE]).unwrap();
        assert_eq!(producer.offset(), 16);
    }

    #[test]
    fn test_payload_size_checked() {
        let temp_dir = TempDir::new().unwrap();
        let mut producer = Producer::new(test_options(temp_dir.path())).unwrap();

        let err = producer.produce(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, Error::PayloadSizeMismatch { .. }));
        assert_eq!(producer.offset(), 0);
    }

    #[test]
    fn test_rollover_creates_next_segment_and_confirms() {
        let temp_dir = TempDir::new().unwrap();
        let options = test_options(temp_dir.path());
        let mut producer = Producer::new(options.clone()).unwrap();

        // 8 records fill the first 64-byte segment.
        for i in 0..8u8 {
            producer.produce(&[i; PAYLOAD_SIZE]).unwrap();
        }
        assert_eq!(producer.offset(), 64);
        assert_eq!(producer.confirmed_offset(), 64);

        producer.produce(&[8u8; PAYLOAD_SIZE]).unwrap();
        assert_eq!(producer.offset(), 72);

        let dir = segment_dir(&options.store_path);
        assert!(dir.join(segment_file_name(0)).exists());
        assert!(dir.join(segment_file_name(64)).exists());
    }

    #[test]
    fn test_force_flush_interval_confirms() {
        let temp_dir = TempDir::new().unwrap();
        let mut options = QueueOptions {
            store_path: temp_dir.path().to_path_buf(),
            payload_size: PAYLOAD_SIZE,
            segment_size: 640,
            ..Default::default()
        };
        options.producer_force_flush_interval_count = 3;
        let mut producer = Producer::new(Arc::new(options)).unwrap();

        producer.produce(&[1u8; PAYLOAD_SIZE]).unwrap();
        producer.produce(&[2u8; PAYLOAD_SIZE]).unwrap();
        assert_eq!(producer.confirmed_offset(), 0);

        producer.produce(&[3u8; PAYLOAD_SIZE]).unwrap();
        assert_eq!(producer.confirmed_offset(), 24);
    }

    #[test]
    fn test_adjust_offset_requires_closed_segment() {
        let temp_dir = TempDir::new().unwrap();
        let mut producer = Producer::new(test_options(temp_dir.path())).unwrap();

        producer.produce(&[1u8; PAYLOAD_SIZE]).unwrap();
        let err = producer.adjust_offset(0).unwrap_err();
        assert!(matches!(err, Error::SegmentStillOpen { .. }));

        // A full segment closes itself; adjusting is legal again.
        for i in 1..8u8 {
            producer.produce(&[i; PAYLOAD_SIZE]).unwrap();
        }
        producer.adjust_offset(0).unwrap();
        assert_eq!(producer.offset(), 0);
    }

    #[test]
    fn test_drop_confirms_progress() {
        let temp_dir = TempDir::new().unwrap();
        let options = test_options(temp_dir.path());

        {
            let mut producer = Producer::new(options.clone()).unwrap();
            producer.produce(&[1u8; PAYLOAD_SIZE]).unwrap();
            producer.produce(&[2u8; PAYLOAD_SIZE]).unwrap();
            assert_eq!(producer.confirmed_offset(), 0);
        }

        let producer = Producer::new(options).unwrap();
        assert_eq!(producer.offset(), 16);
        assert_eq!(producer.confirmed_offset(), 16);
    }
}
