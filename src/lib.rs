// Copyright 2024 Sparkey contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Sparkey: an embedded, read-optimized key-value store backed by an
//! append-only log file and an offline hash index.
//!
//! A [`log::LogWriter`] owns exclusive append access to a `.spl` log
//! for its lifetime; [`hash::hash_write`] scans a closed log once and
//! builds a `.spi` hash index next to it; [`hash::HashReader`] opens
//! the pair and serves `get` by probing the index and dereferencing
//! the log through a [`log::LogIter`]. See the module docs on
//! `log::writer`, `log::reader`, `hash::builder` and `hash::reader`
//! for the on-disk formats and state machines.

pub mod compression;
pub mod display;
pub mod error;
pub mod filename;
pub mod hash;
pub mod ioutil;
pub mod log;
pub mod murmur;
pub mod vlq;

pub use compression::CompressionType;
pub use error::{Error, Result};
pub use filename::{index_filename_for_log, log_filename_for_index};
pub use hash::{hash_write, HashHeader, HashReader, HashWriteOptions};
pub use log::{EntryType, IterState, LogHeader, LogIter, LogReader, LogWriter};
