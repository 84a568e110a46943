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

//! Main queue struct and lifecycle management.
//!
//! The [`Queue`] is the entry point for the crate. It:
//! - Validates the configuration and lays out the store directory
//! - Runs crash recovery when opening an existing store
//! - Hands out the singleton [`Producer`] and [`Consumer`]
//! - Owns the background retention worker
//!
//! ## Usage
//!
//! ```ignore
//! // Create or open a queue of 16-byte records.
//! let queue = QueueBuilder::new("/path/to/queue", 16)
//!     .segment_size(64 * 1024 * 1024)
//!     .build()?;
//!
//! // Write records.
//! let mut producer = queue.create_producer()?;
//! producer.produce(&[0u8; 16])?;
//!
//! // Read records.
//! let mut consumer = queue.create_consumer()?;
//! let record = consumer.consume()?;
//! consumer.commit()?;
//!
//! // Clean shutdown.
//! queue.shutdown()?;
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use snafu::ensure;
use tracing::info;

use crate::{
    QueueOptions, Result,
    consumer::Consumer,
    error::{
        ConsumerAlreadyCreatedSnafu, InvalidOptionsSnafu, ProducerAlreadyCreatedSnafu,
        StorePathIsFileSnafu,
    },
    path::{offset_dir, segment_dir},
    producer::Producer,
    recovery,
    retention::RetentionWorker,
};

/// A durable single-producer/single-consumer queue of fixed-size records.
///
/// The queue itself is cheap to share behind a reference; the producer
/// and consumer handles it creates carry the hot-path state and are
/// single-threaded each.
#[derive(Debug)]
pub struct Queue {
    /// Shared configuration.
    options:          Arc<QueueOptions>,
    /// Set once the singleton producer has been handed out.
    producer_created: AtomicBool,
    /// Set once the singleton consumer has been handed out.
    consumer_created: AtomicBool,
    /// Background cleanup worker. `None` when auto cleanup is disabled or
    /// after shutdown.
    retention:        Option<RetentionWorker>,
}

impl Queue {
    /// Creates a new queue instance.
    ///
    /// When the store directory already exists, a crash-recovery pass runs
    /// under an exclusive cross-process lock before anything else touches
    /// the store.
    pub(crate) fn new(options: QueueOptions) -> Result<Self> {
        validate(&options)?;

        let pre_existed = options.store_path.exists();
        std::fs::create_dir_all(segment_dir(&options.store_path))?;
        std::fs::create_dir_all(offset_dir(&options.store_path))?;

        let options = Arc::new(options);

        if pre_existed {
            recovery::recover(&options)?;
        }

        let retention = if options.retention.enable_auto_cleanup {
            Some(RetentionWorker::spawn(options.clone())?)
        } else {
            None
        };

        info!(
            path = ?options.store_path,
            payload_size = options.payload_size,
            segment_size = options.adjusted_segment_size(),
            recovered = pre_existed,
            "Queue initialized"
        );

        Ok(Self {
            options,
            producer_created: AtomicBool::new(false),
            consumer_created: AtomicBool::new(false),
            retention,
        })
    }

    /// Creates the queue's producer.
    ///
    /// # Errors
    ///
    /// This is a single-producer queue: a second call fails.
    pub fn create_producer(&self) -> Result<Producer> {
        ensure!(
            !self.producer_created.swap(true, Ordering::SeqCst),
            ProducerAlreadyCreatedSnafu
        );
        Producer::new(self.options.clone())
    }

    /// Creates the queue's consumer.
    ///
    /// # Errors
    ///
    /// This is a single-consumer queue: a second call fails.
    pub fn create_consumer(&self) -> Result<Consumer> {
        ensure!(
            !self.consumer_created.swap(true, Ordering::SeqCst),
            ConsumerAlreadyCreatedSnafu
        );
        Consumer::new(self.options.clone())
    }

    /// Gets the queue configuration.
    #[must_use]
    pub fn options(&self) -> &QueueOptions { &self.options }

    /// Shuts the queue down gracefully, stopping the retention worker.
    ///
    /// Producer and consumer handles stay usable; they own their mappings
    /// independently.
    pub fn shutdown(mut self) -> Result<()> {
        if let Some(worker) = self.retention.take() {
            worker.stop()?;
        }
        info!("Queue shutdown complete");
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // RetentionWorker::drop signals cancellation without joining.
        self.retention.take();
    }
}

fn validate(options: &QueueOptions) -> Result<()> {
    ensure!(
        !options.store_path.as_os_str().is_empty(),
        InvalidOptionsSnafu {
            message: "store path is empty".to_string(),
        }
    );
    ensure!(
        options.payload_size > 0,
        InvalidOptionsSnafu {
            message: "payload size must be positive".to_string(),
        }
    );
    ensure!(
        options.segment_size > 0,
        InvalidOptionsSnafu {
            message: "segment size must be positive".to_string(),
        }
    );
    ensure!(
        options.adjusted_segment_size() > 0,
        InvalidOptionsSnafu {
            message: format!(
                "segment size {} holds no record of stride {}",
                options.segment_size,
                options.stride()
            ),
        }
    );
    ensure!(
        !options.store_path.is_file(),
        StorePathIsFileSnafu {
            path: options.store_path.clone(),
        }
    );
    Ok(())
}
