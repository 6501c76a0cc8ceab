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

// Hash reader: memory-maps a hash index alongside the log it indexes
// and answers `get(key)` by probing slots and dereferencing the log at
// the stored address.
//
// Mirrors `LogReader`'s "mmap once on open" shape; the two mmaps live
// side by side in the same struct since a hash file is useless without
// its paired log.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::hash::header::{HashHeader, HASH_HEADER_SIZE};
use crate::hash::{hash_key, truncate_hash};
use crate::ioutil::read_uint_le;
use crate::log::reader::{IterState, LogIter, LogReader};

pub struct HashReader {
	mmap: Mmap,
	header: HashHeader,
	log: LogReader,
}

impl HashReader {
	/// Opens `hash_path` and `log_path` together, validating both
	/// headers and that their `file_identifier`s agree.
	pub fn open(hash_path: &Path, log_path: &Path) -> Result<HashReader> {
		let log = LogReader::open(log_path)?;

		let file = File::open(hash_path)?;
		let file_len = file.metadata()?.len();
		if file_len < HASH_HEADER_SIZE as u64 {
			return Err(Error::HashTooSmall);
		}
		let mmap = unsafe { Mmap::map(&file).map_err(|_| Error::MmapFailed)? };

		let mut header_buf = [0u8; HASH_HEADER_SIZE];
		header_buf.copy_from_slice(&mmap[0..HASH_HEADER_SIZE]);
		let header = HashHeader::parse(&header_buf)?;
		if header.header_size as usize != HASH_HEADER_SIZE {
			return Err(Error::HashHeaderCorrupt);
		}
		if header.file_identifier != log.header().file_identifier {
			return Err(Error::FileIdentifierMismatch);
		}
		let body_end = header.header_size as u64 + header.body_size();
		if (mmap.len() as u64) < body_end {
			return Err(Error::HashTooSmall);
		}

		log::debug!(
			target: "sparkey",
			"opened hash {} ({} entries, capacity {})",
			hash_path.display(),
			header.entry_count,
			header.capacity,
		);
		Ok(HashReader { mmap, header, log })
	}

	pub fn header(&self) -> &HashHeader {
		&self.header
	}

	pub fn log(&self) -> &LogReader {
		&self.log
	}

	fn slot(&self, index: u64) -> (u64, u64) {
		let slot_size = self.header.slot_size();
		let hash_size = self.header.hash_size();
		let address_size = self.header.address_size as usize;
		let start = self.header.header_size as usize + index as usize * slot_size;
		let buf = &self.mmap[start..start + slot_size];
		let hash = read_uint_le(&buf[0..hash_size], hash_size);
		let address = read_uint_le(&buf[hash_size..hash_size + address_size], address_size);
		(hash, address)
	}

	/// Looks up `key`, positioning `iter` on its entry on success.
	/// Returns `true` (iterator left `Active`) iff `key` has a live put
	/// in the log; returns `false` (iterator left `Invalid`) otherwise.
	/// Stops after `max_displacement + 1` probes, per the bound the
	/// builder recorded in the header.
	pub fn get(&self, key: &[u8], iter: &mut LogIter) -> Result<bool> {
		if self.header.capacity == 0 {
			iter.seek(&self.log, 0)?;
			return Ok(false);
		}

		let hash = truncate_hash(self.header.hash_algorithm, hash_key(self.header.hash_algorithm, self.header.hash_seed, key));
		let slot0 = hash % self.header.capacity;
		let mut probes = 0u64;
		let mut pos = slot0;
		let mut key_buf = vec![0u8; key.len()];

		while probes <= self.header.max_displacement as u64 {
			let (stored_hash, address) = self.slot(pos);
			if address == 0 {
				iter.seek(&self.log, 0)?;
				return Ok(false);
			}
			if stored_hash == hash {
				iter.seek(&self.log, address)?;
				iter.next(&self.log)?;
				if iter.state() == IterState::Active && iter.key_len() as usize == key.len() {
					let mut given = 0;
					while given < key_buf.len() {
						let n = iter.fill_key(&self.log, &mut key_buf[given..])?;
						if n == 0 {
							break;
						}
						given += n;
					}
					if key_buf == key {
						return Ok(true);
					}
				}
			}
			pos = (pos + 1) % self.header.capacity;
			probes += 1;
		}

		iter.seek(&self.log, 0)?;
		Ok(false)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::compression::CompressionType;
	use crate::hash::builder::{hash_write, HashWriteOptions};
	use crate::log::writer::LogWriter;
	use std::path::PathBuf;

	struct TempFile(PathBuf);

	impl TempFile {
		fn new(name: &str) -> TempFile {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push(format!("sparkey-hashreader-test-{}-{}", name, std::process::id()));
			let _ = std::fs::remove_file(&path);
			TempFile(path)
		}
	}

	impl Drop for TempFile {
		fn drop(&mut self) {
			let _ = std::fs::remove_file(&self.0);
		}
	}

	fn read_value(reader: &HashReader, iter: &mut LogIter) -> Vec<u8> {
		let mut value = vec![0u8; iter.value_len() as usize];
		let mut given = 0;
		while given < value.len() {
			given += iter.fill_value(reader.log(), &mut value[given..]).unwrap();
		}
		value
	}

	#[test]
	fn empty_index_reports_not_found() {
		let log = TempFile::new("empty-log");
		let hash = TempFile::new("empty-hash");
		let writer = LogWriter::create(&log.0, CompressionType::None, 4096).unwrap();
		writer.close().unwrap();
		hash_write(&hash.0, &log.0, &HashWriteOptions::default()).unwrap();

		let reader = HashReader::open(&hash.0, &log.0).unwrap();
		let mut iter = reader.log().iter();
		assert!(!reader.get(b"anything", &mut iter).unwrap());
		assert_eq!(iter.state(), IterState::Invalid);
	}

	#[test]
	fn single_put_round_trips() {
		let log = TempFile::new("single-log");
		let hash = TempFile::new("single-hash");
		let mut writer = LogWriter::create(&log.0, CompressionType::None, 4096).unwrap();
		writer.put(b"k_0", b"v_0").unwrap();
		writer.close().unwrap();
		hash_write(&hash.0, &log.0, &HashWriteOptions::default()).unwrap();

		let reader = HashReader::open(&hash.0, &log.0).unwrap();
		let mut iter = reader.log().iter();
		assert!(reader.get(b"k_0", &mut iter).unwrap());
		assert_eq!(read_value(&reader, &mut iter), b"v_0");

		let mut iter = reader.log().iter();
		assert!(!reader.get(b"k_missing", &mut iter).unwrap());
	}

	#[test]
	fn deleted_key_is_not_found() {
		let log = TempFile::new("delete-log");
		let hash = TempFile::new("delete-hash");
		let mut writer = LogWriter::create(&log.0, CompressionType::None, 4096).unwrap();
		for i in 0..100 {
			writer.put(format!("k_{}", i).as_bytes(), format!("value_{}", i).as_bytes()).unwrap();
		}
		for i in 0..10 {
			writer.delete(format!("k_{}", i).as_bytes()).unwrap();
		}
		writer.close().unwrap();
		hash_write(&hash.0, &log.0, &HashWriteOptions::default()).unwrap();

		let reader = HashReader::open(&hash.0, &log.0).unwrap();
		let mut iter = reader.log().iter();
		assert!(!reader.get(b"k_0", &mut iter).unwrap());

		let mut iter = reader.log().iter();
		assert!(reader.get(b"k_50", &mut iter).unwrap());
		assert_eq!(read_value(&reader, &mut iter), b"value_50");
	}

	#[test]
	fn mismatched_identifier_is_rejected() {
		let log_a = TempFile::new("ident-log-a");
		let log_b = TempFile::new("ident-log-b");
		let hash_a = TempFile::new("ident-hash-a");

		let mut writer = LogWriter::create(&log_a.0, CompressionType::None, 4096).unwrap();
		writer.put(b"k", b"v").unwrap();
		writer.close().unwrap();
		hash_write(&hash_a.0, &log_a.0, &HashWriteOptions::default()).unwrap();

		let mut writer = LogWriter::create(&log_b.0, CompressionType::None, 4096).unwrap();
		writer.put(b"k", b"v").unwrap();
		writer.close().unwrap();

		assert!(matches!(HashReader::open(&hash_a.0, &log_b.0), Err(Error::FileIdentifierMismatch)));
	}
}
