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

//! Memory-mapped offset words.
//!
//! An offset word is an 8-byte file mapped into memory and accessed as a
//! host-endian `AtomicI64`. Peers map the same file (read-write for the
//! owner, read-only for observers) and exchange the cursor through shared
//! pages, so polling it costs no syscalls. Release stores pair with
//! acquire loads: a peer that observes a new offset also observes the
//! record bytes published before it.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
};

use memmap2::{Mmap, MmapMut};
use snafu::ensure;

use crate::{
    Result,
    error::{NegativeOffsetSnafu, OffsetFileCorruptedSnafu, OffsetMovedBackwardsSnafu},
};

/// Offset words are exactly this many bytes on disk.
const OFFSET_WORD_LEN: u64 = 8;

/// A writable memory-mapped offset word, owned by exactly one side of the
/// queue.
#[derive(Debug)]
pub(crate) struct OffsetWord {
    mmap: MmapMut,
    path: PathBuf,
}

impl OffsetWord {
    /// Opens the word at `path`, creating an 8-byte zero file (and its
    /// parent directory) if absent. An existing file of any other length
    /// is rejected.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.set_len(OFFSET_WORD_LEN)?;
        } else {
            ensure!(
                len == OFFSET_WORD_LEN,
                OffsetFileCorruptedSnafu { path: path.clone(), len }
            );
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self { mmap, path })
    }

    fn word(&self) -> &AtomicI64 {
        // The mapping is page-aligned, so offset 0 satisfies AtomicI64
        // alignment.
        unsafe { &*self.mmap.as_ptr().cast::<AtomicI64>() }
    }

    /// Current value, ordered so that data published before the matching
    /// store is visible to the caller.
    pub fn read(&self) -> i64 { self.word().load(Ordering::Acquire) }

    /// Adds `delta` and returns the new value. The release store publishes
    /// every preceding write to peers that observe it.
    pub fn advance(&self, delta: i64) -> i64 {
        self.word().fetch_add(delta, Ordering::Release) + delta
    }

    /// Sets an absolute value. Moving backwards requires `allow_backwards`;
    /// only recovery and the consumer's stuck-detection path pass it.
    pub fn move_to(&self, value: i64, allow_backwards: bool) -> Result<()> {
        ensure!(value >= 0, NegativeOffsetSnafu { offset: value });

        let current = self.read();
        ensure!(
            allow_backwards || value >= current,
            OffsetMovedBackwardsSnafu { current, requested: value }
        );

        self.word().store(value, Ordering::Release);
        Ok(())
    }

    /// Requests the kernel to write the mapped page back to disk.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path { &self.path }
}

/// A read-only view of a peer's offset word. Fails to open when the file
/// does not exist yet.
#[derive(Debug)]
pub(crate) struct ReadOnlyOffsetWord {
    mmap: Mmap,
}

impl ReadOnlyOffsetWord {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        ensure!(
            len == OFFSET_WORD_LEN,
            OffsetFileCorruptedSnafu { path: path.to_path_buf(), len }
        );

        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self { mmap })
    }

    pub fn read(&self) -> i64 {
        let word = unsafe { &*self.mmap.as_ptr().cast::<AtomicI64>() };
        word.load(Ordering::Acquire)
    }
}
