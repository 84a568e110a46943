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

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use recordq::{QueueBuilder, QueueEvent};
use tempfile::TempDir;

const PAYLOAD_SIZE: usize = 7;
const SEGMENT_SIZE: i64 = 64;

fn builder(store: &Path) -> QueueBuilder {
    QueueBuilder::new(store, PAYLOAD_SIZE)
        .segment_size(SEGMENT_SIZE)
        .consumer_retry_interval(Duration::from_millis(5))
        .consumer_spin_wait_duration(Duration::from_millis(1))
        .auto_cleanup(false)
}

fn segment_name(start: i64) -> String { format!("{start:020}") }

fn segment_path(store: &Path, start: i64) -> PathBuf {
    store.join("commitlog").join(segment_name(start))
}

/// Writes an offset word file directly, as a crashed process would have
/// left it.
fn write_offset_word(store: &Path, file: &str, value: i64) {
    let dir = store.join("offset");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), value.to_ne_bytes()).unwrap();
}

/// Lays down a 64-byte segment with records published at the given
/// offsets. Record payload byte j is `offset + j`, making every record
/// self-describing.
fn write_segment(store: &Path, start: i64, published: &[i64]) {
    let dir = store.join("commitlog");
    fs::create_dir_all(&dir).unwrap();

    let mut buf = vec![0u8; SEGMENT_SIZE as usize];
    for &offset in published {
        let rel = (offset - start) as usize;
        for j in 0..PAYLOAD_SIZE {
            buf[rel + j] = (offset as u8).wrapping_add(j as u8);
        }
        buf[rel + PAYLOAD_SIZE] = 1;
    }
    fs::write(dir.join(segment_name(start)), buf).unwrap();
}

fn expected_payload(offset: i64) -> Vec<u8> {
    (0..PAYLOAD_SIZE as u8)
        .map(|j| (offset as u8).wrapping_add(j))
        .collect()
}

#[test]
fn test_basic_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(temp_dir.path()).build().unwrap();

    let mut producer = queue.create_producer().unwrap();
    producer.produce(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]).unwrap();
    producer.produce(&[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17]).unwrap();
    producer.produce(&[0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27]).unwrap();
    assert_eq!(producer.offset(), 24);

    let mut consumer = queue.create_consumer().unwrap();
    for first in [0x01u8, 0x11, 0x21] {
        let payload = consumer.consume().unwrap();
        let expected: Vec<u8> = (0..7).map(|j| first + j).collect();
        assert_eq!(payload.as_ref(), expected.as_slice());
        consumer.commit().unwrap();
    }
    assert_eq!(consumer.offset(), 24);

    queue.shutdown().unwrap();
}

#[test]
fn test_segment_rollover() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(temp_dir.path()).build().unwrap();

    let mut producer = queue.create_producer().unwrap();
    for i in 0..9u8 {
        producer.produce(&[i; PAYLOAD_SIZE]).unwrap();
    }

    assert_eq!(producer.offset(), 72);
    // Crossing the boundary forces a flush; the confirmed offset proves it.
    assert_eq!(producer.confirmed_offset(), 64);

    for start in [0i64, 64] {
        let path = segment_path(temp_dir.path(), start);
        assert!(path.exists(), "missing segment {start}");
        assert_eq!(fs::metadata(&path).unwrap().len(), 64);
    }
    assert!(!segment_path(temp_dir.path(), 128).exists());

    queue.shutdown().unwrap();
}

#[test]
fn test_recovery_rolls_back_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let store = temp_dir.path();

    // Crashed state: the offset word claims 40, but only the records at
    // 0, 8, 16, 24 ever got their marker; the last flush covered 24.
    write_segment(store, 0, &[0, 8, 16, 24]);
    write_offset_word(store, "producer.offset", 40);
    write_offset_word(store, "producer.confirmed", 24);
    write_offset_word(store, "consumer.offset", 16);

    let queue = builder(store).build().unwrap();

    let producer = queue.create_producer().unwrap();
    assert_eq!(producer.offset(), 24);

    let mut consumer = queue.create_consumer().unwrap();
    for offset in [16i64, 24] {
        let payload = consumer.consume().unwrap();
        assert_eq!(payload.as_ref(), expected_payload(offset).as_slice());
        consumer.commit().unwrap();
    }
    assert_eq!(consumer.offset(), 32);

    queue.shutdown().unwrap();
}

#[test]
fn test_recovery_repairs_unreadable_head() {
    let temp_dir = TempDir::new().unwrap();
    let store = temp_dir.path();

    // Like the torn-tail case, but the record at the consumer offset is
    // itself unpublished.
    write_segment(store, 0, &[0, 8]);
    write_offset_word(store, "producer.offset", 40);
    write_offset_word(store, "producer.confirmed", 24);
    write_offset_word(store, "consumer.offset", 16);

    let events = Arc::new(Mutex::new(Vec::new()));
    let observer_events = events.clone();
    let queue = builder(store)
        .exception_observer(move |event: &QueueEvent| {
            observer_events.lock().unwrap().push(event.clone());
        })
        .build()
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueueEvent::CorruptedRecord { offset: 16, repaired_to: 24 }
    ));
    drop(events);

    let producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();
    assert_eq!(producer.offset(), 24);
    assert_eq!(consumer.offset(), 24);
    assert!(!consumer.next_message_available().unwrap());

    queue.shutdown().unwrap();
}

#[test]
fn test_retention_prunes_consumed_segments() {
    let temp_dir = TempDir::new().unwrap();
    let store = temp_dir.path();

    let queue = builder(store)
        .auto_cleanup(true)
        .cleanup_interval(Duration::from_millis(50))
        .min_retention_segments(2)
        .build()
        .unwrap();

    let mut producer = queue.create_producer().unwrap();
    for i in 0..200usize {
        producer.produce(&[i as u8; PAYLOAD_SIZE]).unwrap();
    }

    let mut consumer = queue.create_consumer().unwrap();
    for _ in 0..16 {
        consumer.consume().unwrap();
        consumer.commit().unwrap();
    }
    assert_eq!(consumer.offset(), 128);

    thread::sleep(Duration::from_millis(500));
    queue.shutdown().unwrap();

    assert!(!segment_path(store, 0).exists());
    assert!(!segment_path(store, 64).exists());
    for start in (128..1600).step_by(64) {
        assert!(segment_path(store, start).exists(), "segment {start} deleted");
    }
}

#[test]
fn test_stuck_consumer_repositions_to_producer() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(temp_dir.path()).unmatched_check_count(3).build().unwrap();

    // Open a gap: the producer starts at 16, so the marker at 0 stays
    // zero forever.
    let mut producer = queue.create_producer().unwrap();
    producer.adjust_offset(16).unwrap();
    producer.produce(&[0x80; PAYLOAD_SIZE]).unwrap();

    let mut consumer = queue.create_consumer().unwrap();
    let handle = thread::spawn(move || {
        let payload = consumer.consume().unwrap();
        consumer.commit().unwrap();
        (payload, consumer.offset())
    });

    // Keep the producer cursor advancing until the consumer has skipped
    // the gap and caught a record.
    let mut rounds = 0u32;
    while !handle.is_finished() && rounds < 400 {
        thread::sleep(Duration::from_millis(10));
        producer
            .produce(&[0x81 + (rounds % 0x40) as u8; PAYLOAD_SIZE])
            .unwrap();
        rounds += 1;
    }

    let (payload, committed) = handle.join().unwrap();
    assert!(committed > 16, "consumer never left the gap: {committed}");
    assert!(payload.iter().all(|&b| b > 0x80));

    queue.shutdown().unwrap();
}

#[test]
fn test_restart_resumes_both_sides() {
    let temp_dir = TempDir::new().unwrap();
    let store = temp_dir.path();

    {
        let queue = builder(store).build().unwrap();
        let mut producer = queue.create_producer().unwrap();
        for i in 0..5u8 {
            producer.produce(&[i; PAYLOAD_SIZE]).unwrap();
        }

        let mut consumer = queue.create_consumer().unwrap();
        for _ in 0..2 {
            consumer.consume().unwrap();
            consumer.commit().unwrap();
        }

        queue.shutdown().unwrap();
    }

    {
        let queue = builder(store).build().unwrap();
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();
        assert_eq!(producer.offset(), 40);
        assert_eq!(consumer.offset(), 16);

        for i in 5..8u8 {
            producer.produce(&[i; PAYLOAD_SIZE]).unwrap();
        }

        // Records 2..8 survive the restart uncommitted and arrive in
        // order.
        for i in 2..8u8 {
            let payload = consumer.consume().unwrap();
            assert_eq!(payload.as_ref(), &[i; PAYLOAD_SIZE]);
            consumer.commit().unwrap();
        }

        queue.shutdown().unwrap();
    }
}

#[test]
fn test_threaded_round_trip_preserves_order() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(temp_dir.path()).build().unwrap();

    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    const COUNT: usize = 500;

    let producer_handle = thread::spawn(move || {
        for i in 0..COUNT {
            let mut payload = [0u8; PAYLOAD_SIZE];
            payload[0] = (i & 0xFF) as u8;
            payload[1] = ((i >> 8) & 0xFF) as u8;
            producer.produce(&payload).unwrap();
        }
    });

    let consumer_handle = thread::spawn(move || {
        let mut seen = Vec::with_capacity(COUNT);
        for _ in 0..COUNT {
            let payload = consumer.consume().unwrap();
            seen.push(payload[0] as usize | (payload[1] as usize) << 8);
            consumer.commit().unwrap();
        }
        seen
    });

    producer_handle.join().unwrap();
    let seen = consumer_handle.join().unwrap();
    let expected: Vec<usize> = (0..COUNT).collect();
    assert_eq!(seen, expected);

    queue.shutdown().unwrap();
}

#[test]
fn test_double_commit_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(temp_dir.path()).build().unwrap();

    let mut consumer = queue.create_consumer().unwrap();
    assert!(consumer.commit().is_err());

    queue.shutdown().unwrap();
}
