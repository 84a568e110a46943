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

//! Durable single-producer/single-consumer queue of fixed-size records.
//!
//! Records are persisted through memory-mapped segment files and exchanged
//! without syscalls on the hot path:
//! - Fixed-layout records with a trailing end-marker byte as the commit
//!   point (release store, acquire load)
//! - Segment files sized to an integral number of records, named by their
//!   start offset, rolled by the producer
//! - Producer and consumer cursors in memory-mapped 8-byte offset words,
//!   shared between threads or processes
//! - Crash recovery that rolls a torn tail back to the last flushed offset
//! - A background retention worker pruning fully-consumed segments
//!
//! Durability is periodic: the producer flushes on segment rollover and
//! every `producer_force_flush_interval_count` records, advancing a
//! separately persisted confirmed offset that recovery trusts.

mod offset;
mod queue;
mod recovery;
mod retention;

pub mod builder;
pub mod config;
pub mod consumer;
pub mod error;
pub mod path;
pub mod producer;
pub mod segment;

pub use builder::QueueBuilder;
pub use config::{ExceptionObserver, QueueEvent, QueueOptions, RetentionOptions};
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use producer::Producer;
pub use queue::Queue;
pub use segment::Segment;
