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

//! Crash recovery for the queue.
//!
//! An unclean shutdown can leave the producer offset word ahead of the
//! last record that actually reached disk: the mapped pages carrying the
//! tail records may never have been written back. Recovery rolls the
//! producer offset back to the newest position known to be safe, which is
//! the larger of the consumer offset and the producer's confirmed offset
//! (the confirmed offset only moves after a successful flush, so it never
//! points past stable data).
//!
//! When even the record at the consumer offset is unpublished after the
//! rollback, that record is gone for good; recovery reports it through
//! the exception observer and repositions the consumer to the producer
//! offset so the queue can make progress again.
//!
//! The whole pass runs under an exclusive cross-process lock keyed to the
//! store directory, because two queues opening the same store must not
//! race on the truncating rollback.

use std::{fs::OpenOptions, sync::Arc};

use fd_lock::RwLock;
use tracing::{debug, info, warn};

use crate::{
    QueueOptions, Result,
    config::QueueEvent,
    consumer::Consumer,
    path::recovery_lock_path,
    producer::Producer,
};

/// Runs the recovery pass while holding the store's recovery lock.
pub(crate) fn recover(options: &Arc<QueueOptions>) -> Result<()> {
    let lock_path = recovery_lock_path(&options.store_path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    let mut lock = RwLock::new(file);
    let _guard = lock.write()?;

    run_locked(options)
}

fn run_locked(options: &Arc<QueueOptions>) -> Result<()> {
    // Temporaries: these open the offset words but no segments. They are
    // dropped at the end of the pass; later accessors re-create the real
    // producer and consumer lazily.
    let mut consumer = Consumer::new(options.clone())?;
    let mut producer = Producer::new(options.clone())?;

    let consumed = consumer.offset();
    let produced = producer.offset();

    if produced <= consumed {
        debug!(produced, consumed, "No recovery needed");
        return Ok(());
    }

    let rollback = consumed.max(producer.confirmed_offset());
    if produced > rollback {
        warn!(
            produced,
            rollback,
            confirmed = producer.confirmed_offset(),
            consumed,
            "Rolling producer offset back past torn tail"
        );
        producer.adjust_offset(rollback)?;
    }

    let produced = producer.offset();
    if produced > consumed && !consumer.next_message_available()? {
        // The record the consumer is parked on never reached disk; skip
        // the lost range so both sides can make progress.
        warn!(
            offset = consumed,
            repaired_to = produced,
            "Record at consumer offset unreadable after rollback, repositioning consumer"
        );
        if let Some(observer) = options.exception_observer.as_ref() {
            observer(&QueueEvent::CorruptedRecord {
                offset:      consumed,
                repaired_to: produced,
            });
        }
        consumer.adjust_offset(produced, true)?;
    }

    info!(
        producer_offset = producer.offset(),
        consumer_offset = consumer.offset(),
        "Recovery pass complete"
    );
    Ok(())
}
