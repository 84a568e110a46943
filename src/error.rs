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

use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("IO error"), context(false))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid queue options: {message}"))]
    InvalidOptions {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Store path names an existing file: {}", path.display()))]
    StorePathIsFile {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Segment file {} has length {actual}, expected {expected}", path.display()))]
    SegmentSizeMismatch {
        path:     PathBuf,
        expected: u64,
        actual:   u64,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Offset {offset} outside segment range [{start}, {last}]"))]
    OffsetOutOfRange {
        offset: i64,
        start:  i64,
        last:   i64,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Offset {offset} is not record-aligned (segment start {start}, stride {stride})"))]
    MisalignedOffset {
        offset: i64,
        start:  i64,
        stride: i64,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Payload has {actual} bytes, queue records carry {expected}"))]
    PayloadSizeMismatch {
        expected: usize,
        actual:   usize,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Offset may not be negative: {offset}"))]
    NegativeOffset {
        offset: i64,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Refusing to move offset backwards from {current} to {requested}"))]
    OffsetMovedBackwards {
        current:   i64,
        requested: i64,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    #[snafu(display("Operation requires no open segment"))]
    SegmentStillOpen {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Operation requires an open segment"))]
    NoSegmentOpen {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Segment {} is mapped read-only", path.display()))]
    ReadOnlySegment {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Offset file {} has length {len}, expected 8", path.display()))]
    OffsetFileCorrupted {
        path: PathBuf,
        len:  u64,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Queue already handed out its producer"))]
    ProducerAlreadyCreated {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Queue already handed out its consumer"))]
    ConsumerAlreadyCreated {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("{message}"))]
    Internal {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },
}
