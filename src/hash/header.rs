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

// Hash header: fixed-layout little-endian preamble at offset 0 of the
// hash index file, followed by `capacity` packed slots of
// `hash_size + address_size` bytes each.
//
// Layout (offsets in bytes):
//   0   magic           4
//   4   major_version   u32
//   8   minor_version   u32
//   12  file_identifier u32
//   16  hash_seed       u32
//   20  hash_algorithm  u32  (0 = murmur3_32, 1 = murmur3_64)
//   24  capacity        u64
//   32  entry_count     u64
//   40  address_size    u32  (bytes per address: 4..=8)
//   44  hash_size       u32  (bytes per hash: 4 or 8)
//   48  max_displacement u32
//   52  header_size     u32

use std::fs::File;
use std::path::Path;

use crate::error::{Error, Result};
use crate::ioutil::{read_full, read_u32_le, read_u64_le, write_u32_le, write_u64_le};

pub const HASH_MAGIC: [u8; 4] = *b"SPI\x01";
pub const HASH_MAJOR_VERSION: u32 = 1;
pub const HASH_MINOR_VERSION: u32 = 0;
pub const HASH_HEADER_SIZE: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
	Murmur32,
	Murmur64,
}

impl HashAlgorithm {
	pub fn from_u32(tag: u32) -> Result<HashAlgorithm> {
		match tag {
			0 => Ok(HashAlgorithm::Murmur32),
			1 => Ok(HashAlgorithm::Murmur64),
			_ => Err(Error::HashHeaderCorrupt),
		}
	}

	pub fn as_u32(self) -> u32 {
		match self {
			HashAlgorithm::Murmur32 => 0,
			HashAlgorithm::Murmur64 => 1,
		}
	}

	pub fn hash_size(self) -> usize {
		match self {
			HashAlgorithm::Murmur32 => 4,
			HashAlgorithm::Murmur64 => 8,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashHeader {
	pub major_version: u32,
	pub minor_version: u32,
	pub file_identifier: u32,
	pub hash_seed: u32,
	pub hash_algorithm: HashAlgorithm,
	pub capacity: u64,
	pub entry_count: u64,
	pub address_size: u32,
	pub max_displacement: u32,
	pub header_size: u32,
}

impl HashHeader {
	pub fn hash_size(&self) -> usize {
		self.hash_algorithm.hash_size()
	}

	pub fn slot_size(&self) -> usize {
		self.hash_size() + self.address_size as usize
	}

	pub fn body_size(&self) -> u64 {
		self.capacity * self.slot_size() as u64
	}

	pub fn write_to(&self, buf: &mut [u8; HASH_HEADER_SIZE]) {
		buf[0..4].copy_from_slice(&HASH_MAGIC);
		write_u32_le(&mut buf[4..8], self.major_version);
		write_u32_le(&mut buf[8..12], self.minor_version);
		write_u32_le(&mut buf[12..16], self.file_identifier);
		write_u32_le(&mut buf[16..20], self.hash_seed);
		write_u32_le(&mut buf[20..24], self.hash_algorithm.as_u32());
		write_u64_le(&mut buf[24..32], self.capacity);
		write_u64_le(&mut buf[32..40], self.entry_count);
		write_u32_le(&mut buf[40..44], self.address_size);
		write_u32_le(&mut buf[44..48], self.hash_size() as u32);
		write_u32_le(&mut buf[48..52], self.max_displacement);
		write_u32_le(&mut buf[52..56], self.header_size);
	}

	pub fn parse(buf: &[u8; HASH_HEADER_SIZE]) -> Result<HashHeader> {
		if buf[0..4] != HASH_MAGIC {
			return Err(Error::WrongHashMagicNumber);
		}
		let major_version = read_u32_le(&buf[4..8]);
		if major_version != HASH_MAJOR_VERSION {
			return Err(Error::WrongHashMajorVersion);
		}
		let minor_version = read_u32_le(&buf[8..12]);
		if minor_version > HASH_MINOR_VERSION {
			return Err(Error::UnsupportedHashMinorVersion);
		}
		let hash_algorithm = HashAlgorithm::from_u32(read_u32_le(&buf[20..24]))?;
		let address_size = read_u32_le(&buf[40..44]);
		if !(4..=8).contains(&address_size) {
			return Err(Error::HashSizeInvalid);
		}
		let stored_hash_size = read_u32_le(&buf[44..48]);
		if stored_hash_size as usize != hash_algorithm.hash_size() {
			return Err(Error::HashHeaderCorrupt);
		}
		Ok(HashHeader {
			major_version,
			minor_version,
			file_identifier: read_u32_le(&buf[12..16]),
			hash_seed: read_u32_le(&buf[16..20]),
			hash_algorithm,
			capacity: read_u64_le(&buf[24..32]),
			entry_count: read_u64_le(&buf[32..40]),
			address_size,
			max_displacement: read_u32_le(&buf[48..52]),
			header_size: read_u32_le(&buf[52..56]),
		})
	}

	/// Reads and parses just the header of the hash index at `path`,
	/// without mapping the slot table. Used by `info`, which must
	/// inspect a file's header without assuming the body is well-formed.
	pub fn load(path: &Path) -> Result<HashHeader> {
		let mut file = File::open(path)?;
		let file_len = file.metadata()?.len();
		if file_len < HASH_HEADER_SIZE as u64 {
			return Err(Error::HashTooSmall);
		}
		let mut buf = [0u8; HASH_HEADER_SIZE];
		read_full(&mut file, &mut buf)?;
		HashHeader::parse(&buf)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn round_trip() {
		let header = HashHeader {
			major_version: HASH_MAJOR_VERSION,
			minor_version: HASH_MINOR_VERSION,
			file_identifier: 42,
			hash_seed: 7,
			hash_algorithm: HashAlgorithm::Murmur64,
			capacity: 1000,
			entry_count: 700,
			address_size: 5,
			max_displacement: 12,
			header_size: HASH_HEADER_SIZE as u32,
		};
		let mut buf = [0u8; HASH_HEADER_SIZE];
		header.write_to(&mut buf);
		let parsed = HashHeader::parse(&buf).unwrap();
		assert_eq!(parsed, header);
		assert_eq!(parsed.slot_size(), 8 + 5);
	}

	#[test]
	fn wrong_magic_is_rejected() {
		let mut buf = [0u8; HASH_HEADER_SIZE];
		buf[0..4].copy_from_slice(&HASH_MAGIC);
		buf[0] = !buf[0];
		assert!(matches!(HashHeader::parse(&buf), Err(Error::WrongHashMagicNumber)));
	}

	#[test]
	fn invalid_address_size_is_rejected() {
		let header = HashHeader {
			major_version: HASH_MAJOR_VERSION,
			minor_version: HASH_MINOR_VERSION,
			file_identifier: 1,
			hash_seed: 0,
			hash_algorithm: HashAlgorithm::Murmur32,
			capacity: 10,
			entry_count: 0,
			address_size: 3,
			max_displacement: 0,
			header_size: HASH_HEADER_SIZE as u32,
		};
		let mut buf = [0u8; HASH_HEADER_SIZE];
		header.write_to(&mut buf);
		assert!(matches!(HashHeader::parse(&buf), Err(Error::HashSizeInvalid)));
	}
}
