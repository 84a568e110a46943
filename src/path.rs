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

//! Store directory layout.
//!
//! ```text
//! <store_path>/
//!   commitlog/                 segment files, 20-digit start offsets
//!     00000000000000000000
//!     00000000000000000064
//!   offset/
//!     producer.offset          8 bytes, producer cursor
//!     consumer.offset          8 bytes, consumer cursor
//!     producer.confirmed       8 bytes, last stably flushed offset
//!   queue.lock                 recovery lock
//! ```

use std::path::{Path, PathBuf};

use crate::Result;

pub const SEGMENT_DIR: &str = "commitlog";
pub const OFFSET_DIR: &str = "offset";

pub(crate) const PRODUCER_OFFSET_FILE: &str = "producer.offset";
pub(crate) const CONSUMER_OFFSET_FILE: &str = "consumer.offset";
pub(crate) const PRODUCER_CONFIRMED_FILE: &str = "producer.confirmed";
pub(crate) const RECOVERY_LOCK_FILE: &str = "queue.lock";

/// Segment file names are exactly this many decimal digits.
const SEGMENT_NAME_LEN: usize = 20;

/// Returns the segment directory: `store/commitlog`.
pub fn segment_dir<P: AsRef<Path>>(store: P) -> PathBuf { store.as_ref().join(SEGMENT_DIR) }

/// Returns the offset directory: `store/offset`.
pub fn offset_dir<P: AsRef<Path>>(store: P) -> PathBuf { store.as_ref().join(OFFSET_DIR) }

pub(crate) fn producer_offset_path<P: AsRef<Path>>(store: P) -> PathBuf {
    offset_dir(store).join(PRODUCER_OFFSET_FILE)
}

pub(crate) fn consumer_offset_path<P: AsRef<Path>>(store: P) -> PathBuf {
    offset_dir(store).join(CONSUMER_OFFSET_FILE)
}

pub(crate) fn producer_confirmed_path<P: AsRef<Path>>(store: P) -> PathBuf {
    offset_dir(store).join(PRODUCER_CONFIRMED_FILE)
}

pub(crate) fn recovery_lock_path<P: AsRef<Path>>(store: P) -> PathBuf {
    store.as_ref().join(RECOVERY_LOCK_FILE)
}

/// Generates a segment file name: the start offset as a zero-padded
/// 20-digit decimal string.
pub fn segment_file_name(start: i64) -> String { format!("{start:020}") }

/// Parses a segment file name back into its start offset.
///
/// Only names that are exactly 20 decimal digits qualify; everything else
/// in the directory is ignored.
pub(crate) fn parse_segment_file_name(name: &str) -> Option<i64> {
    if name.len() != SEGMENT_NAME_LEN || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Scans the segment directory and returns `(start, path)` pairs sorted
/// ascending by start offset. A missing directory yields an empty list.
pub(crate) fn scan_segment_files(dir: &Path) -> Result<Vec<(i64, PathBuf)>> {
    let mut files = Vec::new();

    if !dir.exists() {
        return Ok(files);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        if let Some(start) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(parse_segment_file_name)
        {
            files.push((start, path));
        }
    }

    files.sort_by_key(|(start, _)| *start);
    Ok(files)
}
