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

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{Queue, QueueOptions, Result, config::QueueEvent};

pub struct QueueBuilder {
    options: QueueOptions,
}

impl QueueBuilder {
    /// Starts a builder for a queue at `store_path` carrying records of
    /// `payload_size` bytes.
    pub fn new<P: Into<PathBuf>>(store_path: P, payload_size: usize) -> Self {
        Self {
            options: QueueOptions {
                store_path: store_path.into(),
                payload_size,
                ..Default::default()
            },
        }
    }

    pub fn segment_size(mut self, size: i64) -> Self {
        self.options.segment_size = size;
        self
    }

    pub fn consumer_retry_interval(mut self, interval: Duration) -> Self {
        self.options.consumer_retry_interval = interval;
        self
    }

    pub fn consumer_spin_wait_duration(mut self, duration: Duration) -> Self {
        self.options.consumer_spin_wait_duration = duration;
        self
    }

    pub fn producer_force_flush_interval_count(mut self, count: u64) -> Self {
        self.options.producer_force_flush_interval_count = count;
        self
    }

    pub fn unmatched_check_count(mut self, count: u32) -> Self {
        self.options.unmatched_check_count = count;
        self
    }

    pub fn exception_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.options.exception_observer = Some(Arc::new(observer));
        self
    }

    pub fn auto_cleanup(mut self, enable: bool) -> Self {
        self.options.retention.enable_auto_cleanup = enable;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.options.retention.cleanup_interval = interval;
        self
    }

    pub fn min_retention_segments(mut self, count: usize) -> Self {
        self.options.retention.min_retention_segments = count;
        self
    }

    pub fn build(self) -> Result<Queue> { Queue::new(self.options) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue", 16);
        assert_eq!(builder.options.store_path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.options.payload_size, 16);
        assert_eq!(builder.options.consumer_retry_interval, Duration::from_secs(1));
        assert_eq!(builder.options.unmatched_check_count, 0);
        assert!(builder.options.retention.enable_auto_cleanup);
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue", 7)
            .segment_size(64)
            .consumer_retry_interval(Duration::from_millis(10))
            .consumer_spin_wait_duration(Duration::from_millis(2))
            .producer_force_flush_interval_count(100)
            .unmatched_check_count(3)
            .auto_cleanup(false)
            .cleanup_interval(Duration::from_secs(60))
            .min_retention_segments(4)
            .exception_observer(|_event| {});

        assert_eq!(builder.options.segment_size, 64);
        assert_eq!(builder.options.consumer_retry_interval, Duration::from_millis(10));
        assert_eq!(builder.options.consumer_spin_wait_duration, Duration::from_millis(2));
        assert_eq!(builder.options.producer_force_flush_interval_count, 100);
        assert_eq!(builder.options.unmatched_check_count, 3);
        assert!(!builder.options.retention.enable_auto_cleanup);
        assert_eq!(builder.options.retention.cleanup_interval, Duration::from_secs(60));
        assert_eq!(builder.options.retention.min_retention_segments, 4);
        assert!(builder.options.exception_observer.is_some());
    }
}
