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

// Log writer: owns exclusive write access to a log file for its
// lifetime, framing puts and deletes into the current compression
// block and rewriting the header on close.
//
// State is a `File` plus a handful of counters, single-threaded and
// without atomics — a `LogWriter` is never shared across threads, so
// plain fields suffice.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rand::RngCore;

use crate::compression::{self, CompressionType};
use crate::error::{Error, Result};
use crate::ioutil::write_full;
use crate::log::header::{LogHeader, LOG_HEADER_SIZE};
use crate::vlq::{vlq_size, write_vlq};

const MIN_BLOCK_SIZE: u32 = 16;
const MAX_BLOCK_SIZE: u32 = 1 << 30;

pub struct LogWriter {
	file: File,
	path: PathBuf,
	header: LogHeader,
	block: Vec<u8>,
	compressed_staging: Vec<u8>,
	poisoned: bool,
}

impl LogWriter {
	/// Creates a new, empty log file at `path`. Fails with
	/// `FileAlreadyExists` semantics surfaced through the underlying
	/// `io::Error` -> `Error` conversion if the file exists and the
	/// caller didn't intend to truncate it.
	pub fn create(path: &Path, compression_type: CompressionType, compression_block_size: u32) -> Result<LogWriter> {
		if compression_type.uses_compressor() && !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&compression_block_size) {
			return Err(Error::InvalidCompressionBlockSize);
		}
		let file = OpenOptions::new().create(true).truncate(true).read(true).write(true).open(path)?;
		file.try_lock_exclusive().map_err(|_| Error::FileBusy)?;

		let file_identifier = rand::thread_rng().next_u32();
		let header = LogHeader::new(file_identifier, compression_type, compression_block_size);

		let mut writer = LogWriter {
			file,
			path: path.to_path_buf(),
			header,
			block: Vec::new(),
			compressed_staging: Vec::new(),
			poisoned: false,
		};
		writer.write_header()?;
		log::debug!(target: "sparkey", "created log {} (compression: {}, block size: {})", writer.path.display(), compression_type, compression_block_size);
		Ok(writer)
	}

	/// Reopens an existing log file for appending. A fresh (possibly
	/// empty) compression block always starts here: any partially
	/// written block from a previous session is not resumed, so its
	/// tail bytes are left in place but never rewritten. Mid-block
	/// resumption would require reading back the last frame to rebuild
	/// `self.block`, which this writer deliberately avoids.
	pub fn append(path: &Path) -> Result<LogWriter> {
		let mut file = OpenOptions::new().read(true).write(true).open(path)?;
		file.try_lock_exclusive().map_err(|_| Error::FileBusy)?;

		let file_len = file.metadata()?.len();
		if file_len < LOG_HEADER_SIZE as u64 {
			return Err(Error::LogTooSmall);
		}
		let mut header_buf = [0u8; LOG_HEADER_SIZE];
		file.seek(SeekFrom::Start(0))?;
		std::io::Read::read_exact(&mut file, &mut header_buf)?;
		let header = LogHeader::parse(&header_buf)?;

		let data_start = header.header_size as u64;
		file.seek(SeekFrom::Start(data_start + header.data_len))?;

		log::debug!(target: "sparkey", "reopened log {} for append ({} entries so far)", path.display(), header.num_entries);
		Ok(LogWriter {
			file,
			path: path.to_path_buf(),
			header,
			block: Vec::new(),
			compressed_staging: Vec::new(),
			poisoned: false,
		})
	}

	fn check_open(&self) -> Result<()> {
		if self.poisoned {
			return Err(Error::LogClosed);
		}
		Ok(())
	}

	fn fail<T>(&mut self, err: Error) -> Result<T> {
		self.poisoned = true;
		Err(err)
	}

	/// Appends a put entry: `VLQ(valuelen+1) . VLQ(keylen) . key . value`.
	pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
		self.check_open()?;
		let mut entry = Vec::with_capacity(vlq_size(value.len() as u64 + 1) + vlq_size(key.len() as u64) + key.len() + value.len());
		write_vlq(&mut entry, value.len() as u64 + 1);
		write_vlq(&mut entry, key.len() as u64);
		entry.extend_from_slice(key);
		entry.extend_from_slice(value);
		let entry_len = entry.len();

		if let Err(e) = self.write_entry(entry) {
			return self.fail(e);
		}

		self.header.num_puts += 1;
		self.header.num_entries += 1;
		self.header.put_size += entry_len as u64;
		self.header.max_key_len = self.header.max_key_len.max(key.len() as u64);
		self.header.max_value_len = self.header.max_value_len.max(value.len() as u64);
		Ok(())
	}

	/// Appends a delete entry: `VLQ(0) . VLQ(keylen) . key`.
	pub fn delete(&mut self, key: &[u8]) -> Result<()> {
		self.check_open()?;
		let mut entry = Vec::with_capacity(1 + vlq_size(key.len() as u64) + key.len());
		write_vlq(&mut entry, 0);
		write_vlq(&mut entry, key.len() as u64);
		entry.extend_from_slice(key);
		let entry_len = entry.len();

		if let Err(e) = self.write_entry(entry) {
			return self.fail(e);
		}

		self.header.num_deletes += 1;
		self.header.num_entries += 1;
		self.header.delete_size += entry_len as u64;
		self.header.max_key_len = self.header.max_key_len.max(key.len() as u64);
		Ok(())
	}

	fn write_entry(&mut self, entry: Vec<u8>) -> Result<()> {
		if !self.header.compression_type.uses_compressor() {
			write_full(&self.file, &entry)?;
			self.header.data_len += entry.len() as u64;
			return Ok(());
		}

		let block_size = self.header.compression_block_size as usize;
		if !self.block.is_empty() && self.block.len() + entry.len() > block_size {
			self.flush()?;
		}
		self.block.extend_from_slice(&entry);
		Ok(())
	}

	/// Compresses and flushes the current block, if non-empty. A no-op
	/// under `CompressionType::None`, which never buffers.
	pub fn flush(&mut self) -> Result<()> {
		self.check_open()?;
		if !self.header.compression_type.uses_compressor() || self.block.is_empty() {
			return Ok(());
		}

		compression::compress_into(self.header.compression_type, &self.block, &mut self.compressed_staging)?;
		let compressed_len = self.compressed_staging.len();

		let mut frame = Vec::with_capacity(vlq_size(compressed_len as u64) + compressed_len);
		write_vlq(&mut frame, compressed_len as u64);
		frame.extend_from_slice(&self.compressed_staging);

		write_full(&self.file, &frame)?;
		self.header.data_len += frame.len() as u64;
		log::trace!(
			target: "sparkey",
			"flushed block: {} bytes -> {} bytes compressed",
			self.block.len(),
			compressed_len,
		);
		self.block.clear();
		Ok(())
	}

	/// Flushes the last block (if any) and rewrites the header with
	/// final counters. Always attempts to release the file lock and
	/// descriptor, even if the header rewrite fails.
	pub fn close(mut self) -> Result<()> {
		let result = self.flush().and_then(|_| self.write_header());
		// Dropping `self` releases the advisory lock regardless of
		// `result`; there is no cleanup left to skip on error.
		result
	}

	fn write_header(&mut self) -> Result<()> {
		let mut buf = [0u8; LOG_HEADER_SIZE];
		self.header.write_to(&mut buf);
		self.file.seek(SeekFrom::Start(0))?;
		write_full(&self.file, &buf)?;
		self.file.sync_data()?;
		self.file.seek(SeekFrom::End(0))?;
		Ok(())
	}

	pub fn header(&self) -> &LogHeader {
		&self.header
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::log::reader::LogReader;

	struct TempFile(PathBuf);

	impl TempFile {
		fn new(name: &str) -> TempFile {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push(format!("sparkey-writer-test-{}-{}", name, std::process::id()));
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
	fn empty_log_has_zero_entries() {
		let tmp = TempFile::new("empty");
		let writer = LogWriter::create(&tmp.0, CompressionType::None, 4096).unwrap();
		writer.close().unwrap();

		let reader = LogReader::open(&tmp.0).unwrap();
		assert_eq!(reader.header().num_entries, 0);
	}

	#[test]
	fn put_updates_counters() {
		let tmp = TempFile::new("counters");
		let mut writer = LogWriter::create(&tmp.0, CompressionType::None, 4096).unwrap();
		writer.put(b"key1", b"value1").unwrap();
		writer.put(b"key22", b"v").unwrap();
		writer.delete(b"key1").unwrap();
		writer.close().unwrap();

		let reader = LogReader::open(&tmp.0).unwrap();
		let header = reader.header();
		assert_eq!(header.num_puts, 2);
		assert_eq!(header.num_deletes, 1);
		assert_eq!(header.num_entries, 3);
		assert_eq!(header.max_key_len, 5);
		assert_eq!(header.max_value_len, 6);
	}

	#[test]
	fn closed_writer_rejects_further_writes() {
		let tmp = TempFile::new("poison");
		let mut writer = LogWriter::create(&tmp.0, CompressionType::None, 4096).unwrap();
		writer.put(b"k", b"v").unwrap();
		// Force poisoning by operating on an invalid state: simulate via
		// a second writer contending for the lock instead of corrupting
		// internals directly.
		assert!(matches!(LogWriter::create(&tmp.0, CompressionType::None, 4096), Err(Error::FileBusy)));
		writer.close().unwrap();
	}

	#[test]
	fn rejects_out_of_range_block_size() {
		let tmp = TempFile::new("badblock");
		assert!(matches!(
			LogWriter::create(&tmp.0, CompressionType::Zstd, 4),
			Err(Error::InvalidCompressionBlockSize)
		));
		assert!(matches!(
			LogWriter::create(&tmp.0, CompressionType::Zstd, 1 << 31),
			Err(Error::InvalidCompressionBlockSize)
		));
	}

	#[test]
	fn append_starts_a_fresh_block() {
		let tmp = TempFile::new("append");
		let mut writer = LogWriter::create(&tmp.0, CompressionType::Zstd, 256).unwrap();
		writer.put(b"a", b"1").unwrap();
		writer.close().unwrap();

		let mut writer = LogWriter::append(&tmp.0).unwrap();
		writer.put(b"b", b"2").unwrap();
		writer.close().unwrap();

		let reader = LogReader::open(&tmp.0).unwrap();
		assert_eq!(reader.header().num_puts, 2);
	}
}
