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

pub mod builder;
pub mod header;
pub mod reader;

pub use builder::{hash_write, HashWriteOptions};
pub use header::{HashAlgorithm, HashHeader, HASH_HEADER_SIZE};
pub use reader::HashReader;

use crate::murmur::{murmur3_32, murmur3_64};

/// Hashes `key` under `algorithm`/`seed`. Shared by the builder and the
/// reader so the two can never disagree about where a key belongs —
/// any divergence here would silently break every lookup.
pub(crate) fn hash_key(algorithm: HashAlgorithm, seed: u32, key: &[u8]) -> u64 {
	match algorithm {
		HashAlgorithm::Murmur32 => murmur3_32(key, seed) as u64,
		HashAlgorithm::Murmur64 => murmur3_64(key, seed as u64),
	}
}

/// Truncates a full-width hash to the width actually stored in a slot.
/// A no-op for the 64-bit algorithm since `hash_key` already returns a
/// full `u64` there.
pub(crate) fn truncate_hash(algorithm: HashAlgorithm, hash: u64) -> u64 {
	match algorithm {
		HashAlgorithm::Murmur32 => hash & 0xffff_ffff,
		HashAlgorithm::Murmur64 => hash,
	}
}
