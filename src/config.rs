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

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

/// Callback invoked with non-fatal queue notifications.
///
/// Recovery repairs and retention failures are reported here instead of
/// aborting the queue. The callback may be invoked from the retention
/// worker thread.
pub type ExceptionObserver = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Non-fatal notification passed to the [`ExceptionObserver`].
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Recovery found the record at the consumer offset unreadable and
    /// repositioned the consumer past it.
    CorruptedRecord { offset: i64, repaired_to: i64 },
    /// A retention pass failed; the next pass retries.
    RetentionError { message: String },
}

/// Configuration for a [`Queue`](crate::Queue).
///
/// `store_path`, `payload_size` and `segment_size` are required; the rest
/// has sensible defaults. Validation happens at queue construction.
#[derive(Clone)]
pub struct QueueOptions {
    /// Directory root for all queue state.
    pub store_path: PathBuf,
    /// Payload bytes per record (P). Every produced record carries exactly
    /// this many bytes; the on-disk stride is `payload_size + 1` for the
    /// end marker.
    pub payload_size: usize,
    /// Nominal bytes per segment file, adjusted downward to a multiple of
    /// the record stride.
    pub segment_size: i64,
    /// Sleep between consumer retries while waiting for a segment file or
    /// for new data after the spin budget is spent.
    pub consumer_retry_interval: Duration,
    /// Cumulative busy-spin budget per wait before the consumer falls back
    /// to sleeping.
    pub consumer_spin_wait_duration: Duration,
    /// Records between forced producer flushes. Each forced flush advances
    /// the confirmed offset.
    pub producer_force_flush_interval_count: u64,
    /// Consecutive unchanged consumer-offset samples before the consumer
    /// starts probing the producer offset. Zero disables the probe.
    pub unmatched_check_count: u32,
    /// Observer for non-fatal notifications.
    pub exception_observer: Option<ExceptionObserver>,
    /// Background cleanup of fully-consumed segments.
    pub retention: RetentionOptions,
}

impl QueueOptions {
    /// Record stride S: payload plus the end-marker byte.
    #[must_use]
    pub fn stride(&self) -> i64 { self.payload_size as i64 + 1 }

    /// Segment capacity A: `segment_size` truncated to an integral number
    /// of records.
    #[must_use]
    pub fn adjusted_segment_size(&self) -> i64 { (self.segment_size / self.stride()) * self.stride() }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./queue_data"),
            payload_size: 64,
            segment_size: 64 * 1024 * 1024,
            consumer_retry_interval: Duration::from_secs(1),
            consumer_spin_wait_duration: Duration::from_millis(100),
            producer_force_flush_interval_count: 1000,
            unmatched_check_count: 0,
            exception_observer: None,
            retention: RetentionOptions::default(),
        }
    }
}

impl fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOptions")
            .field("store_path", &self.store_path)
            .field("payload_size", &self.payload_size)
            .field("segment_size", &self.segment_size)
            .field("consumer_retry_interval", &self.consumer_retry_interval)
            .field("consumer_spin_wait_duration", &self.consumer_spin_wait_duration)
            .field(
                "producer_force_flush_interval_count",
                &self.producer_force_flush_interval_count,
            )
            .field("unmatched_check_count", &self.unmatched_check_count)
            .field("exception_observer", &self.exception_observer.is_some())
            .field("retention", &self.retention)
            .finish()
    }
}

/// Options for the background retention worker.
#[derive(Debug, Clone)]
pub struct RetentionOptions {
    /// Spawn the retention worker with the queue.
    pub enable_auto_cleanup: bool,
    /// Sleep between cleanup passes.
    pub cleanup_interval: Duration,
    /// Newest segment files retained unconditionally, on top of the
    /// consumed-below check.
    pub min_retention_segments: usize,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            enable_auto_cleanup:    true,
            cleanup_interval:       Duration::from_secs(5 * 60),
            min_retention_segments: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(7, 64, 64 ; "exact multiple")]
    #[test_case(7, 100, 96 ; "truncated to stride multiple")]
    #[test_case(7, 8, 8 ; "single record")]
    #[test_case(15, 1024, 1024 ; "power of two payload stride")]
    fn test_adjusted_segment_size(payload_size: usize, segment_size: i64, expected: i64) {
        let options = QueueOptions {
            payload_size,
            segment_size,
            ..Default::default()
        };
        assert_eq!(options.stride(), payload_size as i64 + 1);
        assert_eq!(options.adjusted_segment_size(), expected);
    }

    #[test]
    fn test_default_options() {
        let options = QueueOptions::default();
        assert_eq!(options.consumer_retry_interval, Duration::from_secs(1));
        assert_eq!(options.consumer_spin_wait_duration, Duration::from_millis(100));
        assert_eq!(options.producer_force_flush_interval_count, 1000);
        assert_eq!(options.unmatched_check_count, 0);
        assert!(options.exception_observer.is_none());
        assert!(options.retention.enable_auto_cleanup);
        assert_eq!(options.retention.cleanup_interval, Duration::from_secs(300));
        assert_eq!(options.retention.min_retention_segments, 2);
    }
}
