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

//! Background deletion of fully-consumed segment files.
//!
//! The worker runs on a dedicated thread, sleeping `cleanup_interval`
//! between passes. Each pass reads the consumer offset through its own
//! read-only mapping and deletes segment files whose entire range lies
//! below it, always keeping the `min_retention_segments` newest files as
//! a safety tail. Pass errors are swallowed; the next pass retries.
//!
//! Cancellation follows the queue's worker idiom: dropping the sender
//! side of the cancel channel interrupts the sleep, and shutdown joins
//! the thread with a bounded timeout.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, info, warn};

use crate::{
    QueueOptions, Result,
    config::QueueEvent,
    error::InternalSnafu,
    offset::ReadOnlyOffsetWord,
    path::{consumer_offset_path, scan_segment_files, segment_dir},
};

/// How long shutdown waits for the worker thread before giving up on the
/// join.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle owning the retention worker thread.
#[derive(Debug)]
pub(crate) struct RetentionWorker {
    cancel_tx: Option<Sender<()>>,
    shutdown:  Arc<AtomicBool>,
    handle:    Option<JoinHandle<()>>,
}

impl RetentionWorker {
    /// Spawns the worker thread.
    pub fn spawn(options: Arc<QueueOptions>) -> Result<Self> {
        let (cancel_tx, cancel_rx) = bounded(0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let handle = thread::Builder::new()
            .name("queue-retention".into())
            .spawn(move || run(&cancel_rx, &options, &flag))?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            shutdown,
            handle: Some(handle),
        })
    }

    /// Cancels the worker and joins it with a bounded timeout.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        // Dropping the sender disconnects the channel and wakes the sleep.
        self.cancel_tx.take();

        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }

            if handle.is_finished() {
                handle.join().map_err(|_| {
                    InternalSnafu {
                        message: "Retention worker thread panicked".to_string(),
                    }
                    .build()
                })?;
            } else {
                warn!("Retention worker did not stop within timeout");
            }
        }

        Ok(())
    }
}

impl Drop for RetentionWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel_tx.take();
    }
}

fn run(cancel_rx: &Receiver<()>, options: &Arc<QueueOptions>, shutdown: &Arc<AtomicBool>) {
    info!(
        interval = ?options.retention.cleanup_interval,
        min_retention_segments = options.retention.min_retention_segments,
        "Retention worker starting"
    );

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match cancel_rx.recv_timeout(options.retention.cleanup_interval) {
            Err(RecvTimeoutError::Timeout) => {
                if let Err(error) = run_cleanup_pass(options) {
                    warn!(error = ?error, "Retention pass failed");
                    if let Some(observer) = options.exception_observer.as_ref() {
                        observer(&QueueEvent::RetentionError {
                            message: error.to_string(),
                        });
                    }
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Retention worker stopped");
}

/// One cleanup pass. Returns the number of deleted segment files.
pub(crate) fn run_cleanup_pass(options: &QueueOptions) -> Result<usize> {
    let dir = segment_dir(&options.store_path);
    let segments = scan_segment_files(&dir)?;
    if segments.is_empty() {
        return Ok(0);
    }

    // The consumer side may not exist yet, or may not have committed
    // anything; both mean there is nothing safe to delete.
    let consumed = match ReadOnlyOffsetWord::open(consumer_offset_path(&options.store_path)) {
        Ok(word) => word.read(),
        Err(_) => return Ok(0),
    };
    if consumed == 0 {
        return Ok(0);
    }

    let adjusted = options.adjusted_segment_size();
    let retained_tail = options.retention.min_retention_segments.min(segments.len());
    let deletable = segments.len() - retained_tail;

    let mut deleted = 0;
    for (start, path) in segments.into_iter().take(deletable) {
        let end = start + adjusted - 1;
        if end < consumed {
            std::fs::remove_file(&path)?;
            debug!(start, end, path = ?path, "Deleted fully consumed segment");
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!(deleted, consumed, "Retention pass complete");
    }
    Ok(deleted)
}
