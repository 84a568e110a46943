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

//! Memory-mapped segment files.
//!
//! A segment backs a contiguous range `[start, start + A)` of the logical
//! byte stream, where `A` is the configured segment size truncated to an
//! integral number of records. Records are laid out back to back:
//!
//! ```text
//! ┌──────────────────────┬─────────────┐
//! │  payload (P bytes)   │  marker (1) │   stride S = P + 1
//! └──────────────────────┴─────────────┘
//! ```
//!
//! The marker byte is the commit point. Fresh segments are zero-filled, so
//! a zero marker means "no record yet"; the producer stores the sentinel
//! with release ordering after the payload bytes, and readers load it with
//! acquire ordering before copying the payload. That single ordered byte
//! is the only synchronization between producer and consumer, in-process
//! or across processes sharing the file.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    ptr,
    sync::atomic::{AtomicU8, Ordering},
};

use memmap2::{Mmap, MmapMut};
use snafu::ensure;

use crate::{
    Result,
    error::{
        InvalidOptionsSnafu, MisalignedOffsetSnafu, NegativeOffsetSnafu, OffsetOutOfRangeSnafu,
        PayloadSizeMismatchSnafu, ReadOnlySegmentSnafu, SegmentSizeMismatchSnafu,
    },
    path::segment_file_name,
};

/// Marker value proving the payload before it was fully written.
pub(crate) const RECORD_SENTINEL: u8 = 1;

#[derive(Debug)]
enum SegmentMap {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl SegmentMap {
    fn as_ptr(&self) -> *const u8 {
        match self {
            SegmentMap::Writable(m) => m.as_ptr(),
            SegmentMap::ReadOnly(m) => m.as_ptr(),
        }
    }
}

/// One memory-mapped segment file.
///
/// Writable segments belong to the producer; the consumer and the
/// retention worker only ever map read-only.
#[derive(Debug)]
pub struct Segment {
    map:           SegmentMap,
    path:          PathBuf,
    start:         i64,
    payload_size:  usize,
    stride:        i64,
    adjusted_size: i64,
    last_writable: i64,
}

impl Segment {
    /// Opens the writable segment covering `target_offset`, creating a
    /// zero-filled file of the adjusted size if it does not exist yet.
    /// An existing file with any other length is rejected.
    pub fn create_or_open(
        dir: &Path,
        segment_size: i64,
        payload_size: usize,
        target_offset: i64,
    ) -> Result<Self> {
        let (start, adjusted) = locate(segment_size, payload_size, target_offset)?;

        std::fs::create_dir_all(dir)?;
        let path = dir.join(segment_file_name(start));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.set_len(adjusted as u64)?;
        } else {
            ensure!(
                len == adjusted as u64,
                SegmentSizeMismatchSnafu {
                    path:     path.clone(),
                    expected: adjusted as u64,
                    actual:   len,
                }
            );
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self::from_parts(
            SegmentMap::Writable(mmap),
            path,
            start,
            payload_size,
            adjusted,
        ))
    }

    /// Read-only counterpart of [`create_or_open`](Segment::create_or_open):
    /// returns `None` when the segment file does not exist yet.
    pub fn try_find(
        dir: &Path,
        segment_size: i64,
        payload_size: usize,
        target_offset: i64,
    ) -> Result<Option<Self>> {
        let (start, adjusted) = locate(segment_size, payload_size, target_offset)?;
        let path = dir.join(segment_file_name(start));

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        ensure!(
            len == adjusted as u64,
            SegmentSizeMismatchSnafu {
                path:     path.clone(),
                expected: adjusted as u64,
                actual:   len,
            }
        );

        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Some(Self::from_parts(
            SegmentMap::ReadOnly(mmap),
            path,
            start,
            payload_size,
            adjusted,
        )))
    }

    fn from_parts(
        map: SegmentMap,
        path: PathBuf,
        start: i64,
        payload_size: usize,
        adjusted_size: i64,
    ) -> Self {
        let stride = payload_size as i64 + 1;
        Self {
            map,
            path,
            start,
            payload_size,
            stride,
            adjusted_size,
            last_writable: start + adjusted_size - stride,
        }
    }

    /// Writes a record at `offset`: payload bytes first, then the end
    /// marker with a release store so the payload is globally visible
    /// before the record reads as published.
    pub fn write(&mut self, offset: i64, payload: &[u8]) -> Result<()> {
        ensure!(
            payload.len() == self.payload_size,
            PayloadSizeMismatchSnafu {
                expected: self.payload_size,
                actual:   payload.len(),
            }
        );
        let rel = self.record_index(offset)?;

        let base = match &mut self.map {
            SegmentMap::Writable(m) => m.as_mut_ptr(),
            SegmentMap::ReadOnly(_) => {
                return ReadOnlySegmentSnafu { path: self.path.clone() }.fail();
            }
        };

        unsafe {
            ptr::copy_nonoverlapping(payload.as_ptr(), base.add(rel), self.payload_size);
            let marker = &*base.add(rel + self.payload_size).cast::<AtomicU8>();
            marker.store(RECORD_SENTINEL, Ordering::Release);
        }

        Ok(())
    }

    /// Attempts to read the record at `offset`. Returns `false` without
    /// touching `out` when the record is not published yet.
    pub fn try_read(&self, offset: i64, out: &mut [u8]) -> Result<bool> {
        ensure!(
            out.len() == self.payload_size,
            PayloadSizeMismatchSnafu {
                expected: self.payload_size,
                actual:   out.len(),
            }
        );
        let rel = self.record_index(offset)?;

        let base = self.map.as_ptr();
        let published = unsafe {
            let marker = &*base.add(rel + self.payload_size).cast::<AtomicU8>();
            marker.load(Ordering::Acquire) == RECORD_SENTINEL
        };
        if !published {
            return Ok(false);
        }

        unsafe {
            ptr::copy_nonoverlapping(base.add(rel), out.as_mut_ptr(), self.payload_size);
        }

        Ok(true)
    }

    /// Marker probe without copying the payload.
    pub fn is_published(&self, offset: i64) -> Result<bool> {
        let rel = self.record_index(offset)?;

        let base = self.map.as_ptr();
        let published = unsafe {
            let marker = &*base.add(rel + self.payload_size).cast::<AtomicU8>();
            marker.load(Ordering::Acquire) == RECORD_SENTINEL
        };
        Ok(published)
    }

    /// Requests the kernel to persist all dirty pages of the mapping.
    /// No-op on read-only segments.
    pub fn flush(&self) -> Result<()> {
        if let SegmentMap::Writable(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }

    /// Persists the pages covering `[offset, offset + len)`.
    pub fn flush_range(&self, offset: i64, len: usize) -> Result<()> {
        if let SegmentMap::Writable(m) = &self.map {
            ensure!(
                offset >= self.start && offset + len as i64 <= self.start + self.adjusted_size,
                OffsetOutOfRangeSnafu {
                    offset,
                    start: self.start,
                    last: self.last_writable,
                }
            );
            m.flush_range((offset - self.start) as usize, len)?;
        }
        Ok(())
    }

    /// First logical offset covered by this segment.
    pub fn start(&self) -> i64 { self.start }

    /// Segment capacity in bytes (an integral number of records).
    pub fn adjusted_size(&self) -> i64 { self.adjusted_size }

    /// Last offset at which a record may begin inside this segment.
    pub fn last_writable_offset(&self) -> i64 { self.last_writable }

    pub fn path(&self) -> &Path { &self.path }

    fn record_index(&self, offset: i64) -> Result<usize> {
        ensure!(
            offset >= self.start && offset <= self.last_writable,
            OffsetOutOfRangeSnafu {
                offset,
                start: self.start,
                last: self.last_writable,
            }
        );

        let rel = offset - self.start;
        ensure!(
            rel % self.stride == 0,
            MisalignedOffsetSnafu {
                offset,
                start: self.start,
                stride: self.stride,
            }
        );

        Ok(rel as usize)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let SegmentMap::Writable(m) = &self.map {
            let _ = m.flush();
        }
    }
}

/// Computes the `(start, adjusted_size)` of the segment whose range
/// contains `target_offset`.
fn locate(segment_size: i64, payload_size: usize, target_offset: i64) -> Result<(i64, i64)> {
    ensure!(target_offset >= 0, NegativeOffsetSnafu { offset: target_offset });

    let stride = payload_size as i64 + 1;
    ensure!(
        stride <= segment_size,
        InvalidOptionsSnafu {
            message: format!("segment size {segment_size} holds no record of stride {stride}"),
        }
    );

    let adjusted = (segment_size / stride) * stride;
    let start = (target_offset / adjusted) * adjusted;
    Ok((start, adjusted))
}
