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

// Hash index builder: scans a closed log twice and writes a hash file
// next to it.
//
// Pass 1 replays the log forward, tracking the last operation seen per
// key, to estimate how many live puts the index must hold (used only to
// size the capacity; it does not affect correctness of pass 2). Pass 2
// replays the log again in the same order, inserting or deleting a slot
// for every put/delete exactly as it's encountered — this is what
// actually determines final slot contents, including "newer put
// overwrites older slot" and "delete clears slot" semantics. Slots are
// open-addressed with Robin-Hood displacement: an insertion that would
// displace a slot with a shorter probe distance swaps in instead,
// bounding worst-case lookup by the table's recorded max displacement.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::error::{Error, Result};
use crate::hash::header::{HashAlgorithm, HashHeader, HASH_HEADER_SIZE};
use crate::ioutil::write_full;
use crate::log::reader::{EntryType, IterState, LogReader};

const DEFAULT_LOAD_FACTOR: f64 = 0.73;

/// Thresholds the capacity past which a 32-bit hash would see too much
/// collision pressure; picked so the expected number of colliding pairs
/// stays small for any index this implementation is likely to build.
const MURMUR64_CAPACITY_THRESHOLD: u64 = 1 << 26;

/// Tuning knobs for [`hash_write`]. Bundled into one struct rather than
/// passed as two scalars because a third (iteration order vs. random
/// probing) was about to be added as a positional argument otherwise.
#[derive(Debug, Clone, Copy)]
pub struct HashWriteOptions {
	/// Target capacity. When non-zero, honored directly instead of
	/// deriving a capacity from the live-put count.
	pub hash_size_hint: u64,
	/// Target load factor used to derive capacity from the live-put
	/// count when `hash_size_hint` is zero.
	pub max_load: f64,
}

impl Default for HashWriteOptions {
	fn default() -> HashWriteOptions {
		HashWriteOptions { hash_size_hint: 0, max_load: DEFAULT_LOAD_FACTOR }
	}
}

#[derive(Debug, Clone, Copy)]
struct Slot {
	hash: u64,
	address: u64,
}

struct Builder {
	capacity: u64,
	algorithm: HashAlgorithm,
	seed: u32,
	slots: Vec<Option<Slot>>,
	max_displacement: u64,
}

impl Builder {
	fn slot0(&self, hash: u64) -> u64 {
		hash % self.capacity
	}

	fn displacement(&self, pos: u64, slot0: u64) -> u64 {
		(pos + self.capacity - slot0) % self.capacity
	}

	fn truncate_hash(&self, hash: u64) -> u64 {
		crate::hash::truncate_hash(self.algorithm, hash)
	}

	fn hash_key(&self, key: &[u8]) -> u64 {
		crate::hash::hash_key(self.algorithm, self.seed, key)
	}

	fn key_at(&self, reader: &LogReader, iter: &mut crate::log::reader::LogIter, address: u64) -> Result<Vec<u8>> {
		iter.seek(reader, address)?;
		iter.next(reader)?;
		if iter.state() != IterState::Active {
			return Err(Error::HashHeaderCorrupt);
		}
		let mut key = vec![0u8; iter.key_len() as usize];
		let mut given = 0;
		while given < key.len() {
			let n = iter.fill_key(reader, &mut key[given..])?;
			if n == 0 {
				break;
			}
			given += n;
		}
		Ok(key)
	}

	/// Inserts or overwrites the slot for `key`, using Robin-Hood
	/// displacement. `key` is only needed to disambiguate a same-hash
	/// occupant before any displacement has happened; once the entry
	/// being carried forward is an existing occupant (post-swap), table
	/// invariants guarantee it can't collide on an equal key with
	/// anything still ahead of it, so no further key reads are needed.
	fn put(&mut self, key: &[u8], address: u64, reader: &LogReader, iter: &mut crate::log::reader::LogIter) -> Result<()> {
		let hash = self.truncate_hash(self.hash_key(key));
		let slot0 = self.slot0(hash);

		let mut carry_hash = hash;
		let mut carry_address = address;
		let mut pos = slot0;
		let mut disp = 0u64;
		let mut carrying_original = true;

		loop {
			match self.slots[pos as usize] {
				None => {
					self.slots[pos as usize] = Some(Slot { hash: carry_hash, address: carry_address });
					self.max_displacement = self.max_displacement.max(disp);
					return Ok(());
				}
				Some(occ) => {
					if carrying_original && occ.hash == carry_hash {
						let occ_key = self.key_at(reader, iter, occ.address)?;
						if occ_key == key {
							log::trace!(target: "sparkey", "overwriting prior put for key {}", crate::display::hex(key));
							self.slots[pos as usize] = Some(Slot { hash: carry_hash, address: carry_address });
							return Ok(());
						}
					}
					let occ_slot0 = self.slot0(occ.hash);
					let occ_disp = self.displacement(pos, occ_slot0);
					if occ_disp < disp {
						self.slots[pos as usize] = Some(Slot { hash: carry_hash, address: carry_address });
						self.max_displacement = self.max_displacement.max(disp);
						carry_hash = occ.hash;
						carry_address = occ.address;
						disp = occ_disp;
						carrying_original = false;
					}
				}
			}
			pos = (pos + 1) % self.capacity;
			disp += 1;
		}
	}

	/// Clears the slot for `key` if present, then backward-shifts any
	/// trailing displaced entries to keep probe distances honest for
	/// slots that used to sit behind this one in their chain (standard
	/// Robin-Hood deletion; the format description only says "clear it",
	/// which alone would leave later lookups stopping at a hole too
	/// early).
	fn delete(&mut self, key: &[u8], reader: &LogReader, iter: &mut crate::log::reader::LogIter) -> Result<()> {
		let hash = self.truncate_hash(self.hash_key(key));
		let slot0 = self.slot0(hash);
		let mut pos = slot0;
		let mut probes = 0u64;

		loop {
			match self.slots[pos as usize] {
				None => return Ok(()),
				Some(occ) => {
					if occ.hash == hash {
						let occ_key = self.key_at(reader, iter, occ.address)?;
						if occ_key == key {
							self.slots[pos as usize] = None;
							self.backshift(pos);
							return Ok(());
						}
					}
				}
			}
			pos = (pos + 1) % self.capacity;
			probes += 1;
			if probes > self.capacity {
				return Ok(());
			}
		}
	}

	fn backshift(&mut self, mut hole: u64) {
		loop {
			let next = (hole + 1) % self.capacity;
			match self.slots[next as usize] {
				Some(occ) => {
					let occ_slot0 = self.slot0(occ.hash);
					if occ_slot0 == next {
						// Occupant sits at its own home slot; nothing to pull back.
						return;
					}
					self.slots[hole as usize] = Some(occ);
					self.slots[next as usize] = None;
					hole = next;
				}
				None => return,
			}
		}
	}
}

/// Scans `log_path` and writes a hash index to `hash_path`. If
/// `options.hash_size_hint` is non-zero it's honored as the target
/// capacity directly instead of deriving one from the live-put count.
pub fn hash_write(hash_path: &Path, log_path: &Path, options: &HashWriteOptions) -> Result<()> {
	let hash_size_hint = options.hash_size_hint;
	let reader = LogReader::open(log_path)?;
	let header = reader.header().clone();

	let mut last_op = HashMap::new();
	let mut max_address = 0u64;
	{
		let mut iter = reader.iter();
		loop {
			iter.next(&reader)?;
			if iter.state() != IterState::Active {
				break;
			}
			let mut key = vec![0u8; iter.key_len() as usize];
			let mut given = 0;
			while given < key.len() {
				let n = iter.fill_key(&reader, &mut key[given..])?;
				if n == 0 {
					break;
				}
				given += n;
			}
			max_address = max_address.max(iter.entry_address());
			last_op.insert(key, iter.entry_type() == EntryType::Put);
		}
	}
	let live_puts = last_op.values().filter(|v| **v).count() as u64;

	let capacity = if hash_size_hint > 0 {
		if hash_size_hint <= live_puts {
			log::warn!(
				target: "sparkey",
				"hash_size_hint {} is too small for {} live puts; probe distances will suffer",
				hash_size_hint,
				live_puts,
			);
		}
		hash_size_hint
	} else if live_puts == 0 {
		0
	} else {
		((live_puts as f64 / options.max_load).ceil() as u64).max(live_puts + 1)
	};

	let algorithm = if capacity > MURMUR64_CAPACITY_THRESHOLD {
		HashAlgorithm::Murmur64
	} else {
		HashAlgorithm::Murmur32
	};

	let address_size = address_width(max_address.max(header.header_size as u64));
	let seed = rand::thread_rng().next_u32();

	let mut builder = Builder {
		capacity: capacity.max(1),
		algorithm,
		seed,
		slots: vec![None; capacity.max(1) as usize],
		max_displacement: 0,
	};

	if capacity > 0 {
		let mut iter = reader.iter();
		loop {
			iter.next(&reader)?;
			if iter.state() != IterState::Active {
				break;
			}
			let mut key = vec![0u8; iter.key_len() as usize];
			let mut given = 0;
			while given < key.len() {
				let n = iter.fill_key(&reader, &mut key[given..])?;
				if n == 0 {
					break;
				}
				given += n;
			}
			let address = iter.entry_address();
			match iter.entry_type() {
				EntryType::Put => {
					let mut put_iter = reader.iter();
					builder.put(&key, address, &reader, &mut put_iter)?;
				}
				EntryType::Delete => {
					let mut del_iter = reader.iter();
					builder.delete(&key, &reader, &mut del_iter)?;
				}
			}
		}
	}

	let hash_header = HashHeader {
		major_version: crate::hash::header::HASH_MAJOR_VERSION,
		minor_version: crate::hash::header::HASH_MINOR_VERSION,
		file_identifier: header.file_identifier,
		hash_seed: seed,
		hash_algorithm: algorithm,
		capacity: builder.capacity,
		entry_count: live_puts,
		address_size,
		max_displacement: builder.max_displacement as u32,
		header_size: HASH_HEADER_SIZE as u32,
	};

	write_hash_file(hash_path, &hash_header, &builder.slots)?;
	log::debug!(
		target: "sparkey",
		"wrote hash index {} ({} entries, capacity {}, max displacement {})",
		hash_path.display(),
		live_puts,
		hash_header.capacity,
		hash_header.max_displacement,
	);
	Ok(())
}

fn address_width(max_address: u64) -> u32 {
	let mut width = 4u32;
	while width < 8 && max_address >= (1u64 << (width * 8)) {
		width += 1;
	}
	width
}

fn write_hash_file(path: &Path, header: &HashHeader, slots: &[Option<Slot>]) -> Result<()> {
	let tmp_path = temp_path_for(path);
	{
		let file = File::create(&tmp_path)?;
		let mut header_buf = [0u8; HASH_HEADER_SIZE];
		header.write_to(&mut header_buf);
		write_full(&file, &header_buf)?;

		let slot_size = header.slot_size();
		let hash_size = header.hash_size();
		let address_size = header.address_size as usize;
		let mut slot_buf = vec![0u8; slot_size];
		for slot in slots {
			slot_buf.iter_mut().for_each(|b| *b = 0);
			if let Some(s) = slot {
				crate::ioutil::write_uint_le(&mut slot_buf[0..hash_size], hash_size, s.hash);
				crate::ioutil::write_uint_le(&mut slot_buf[hash_size..hash_size + address_size], address_size, s.address);
			}
			write_full(&file, &slot_buf)?;
		}
		file.sync_data()?;
	}
	fs::rename(&tmp_path, path)?;
	Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
	let mut tmp = path.to_path_buf();
	let file_name = tmp.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	tmp.set_file_name(format!("{}.tmp-{}", file_name, std::process::id()));
	tmp
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::compression::CompressionType;
	use crate::hash::reader::HashReader;
	use crate::log::writer::LogWriter;
	use std::path::PathBuf;

	struct TempFile(PathBuf);

	impl TempFile {
		fn new(name: &str) -> TempFile {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push(format!("sparkey-builder-test-{}-{}", name, std::process::id()));
			let _ = std::fs::remove_file(&path);
			TempFile(path)
		}
	}

	impl Drop for TempFile {
		fn drop(&mut self) {
			let _ = std::fs::remove_file(&self.0);
		}
	}

	#[test]
	fn empty_log_yields_zero_capacity_index() {
		let log = TempFile::new("empty-log");
		let hash = TempFile::new("empty-hash");
		let writer = LogWriter::create(&log.0, CompressionType::None, 4096).unwrap();
		writer.close().unwrap();

		hash_write(&hash.0, &log.0, &HashWriteOptions::default()).unwrap();
		let reader = HashReader::open(&hash.0, &log.0).unwrap();
		assert_eq!(reader.header().capacity, 1);
		assert_eq!(reader.header().entry_count, 0);
	}

	#[test]
	fn overrides_and_deletes_resolve_to_final_state() {
		let log = TempFile::new("overrides-log");
		let hash = TempFile::new("overrides-hash");
		let mut writer = LogWriter::create(&log.0, CompressionType::None, 4096).unwrap();
		for i in 0..50 {
			writer.put(format!("k{}", i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
		}
		writer.put(b"k0", b"new0").unwrap();
		writer.delete(b"k1").unwrap();
		writer.close().unwrap();

		hash_write(&hash.0, &log.0, &HashWriteOptions::default()).unwrap();
		let reader = HashReader::open(&hash.0, &log.0).unwrap();
		assert_eq!(reader.header().entry_count, 49);

		let mut iter = reader.log().iter();
		assert!(reader.get(b"k0", &mut iter).unwrap());
		let mut value = vec![0u8; iter.value_len() as usize];
		let mut given = 0;
		while given < value.len() {
			given += iter.fill_value(reader.log(), &mut value[given..]).unwrap();
		}
		assert_eq!(value, b"new0");

		let mut iter = reader.log().iter();
		assert!(!reader.get(b"k1", &mut iter).unwrap());

		let mut iter = reader.log().iter();
		assert!(reader.get(b"k2", &mut iter).unwrap());
	}
}
