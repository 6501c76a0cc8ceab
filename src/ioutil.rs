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

// Small endian/IO helpers shared by the log and hash header codecs.
//
// Headers are packed byte ranges, not `#[repr(C)]` structs, so that the
// on-disk layout is independent of the host's struct layout rules (see
// the "variable-width packed slots" design note) — fields are read and
// written with explicit `from_le_bytes`/`to_le_bytes` calls against
// fixed offsets.

use std::convert::TryInto;
use std::io::{Read, Write};

use crate::error::Result;

/// Writes the entire buffer to `w`. `write_all` already retries on
/// `EINTR`-style partial writes internally, so this only needs to
/// surface the first hard error.
pub fn write_full<W: Write>(mut w: W, buf: &[u8]) -> Result<()> {
	w.write_all(buf)?;
	Ok(())
}

/// Reads exactly `buf.len()` bytes from `r`, failing with
/// `Error::UnexpectedEof` if the stream ends early.
pub fn read_full<R: Read>(mut r: R, buf: &mut [u8]) -> Result<()> {
	r.read_exact(buf).map_err(|e| {
		if e.kind() == std::io::ErrorKind::UnexpectedEof {
			crate::error::Error::UnexpectedEof
		} else {
			e.into()
		}
	})
}

pub fn read_u32_le(buf: &[u8]) -> u32 {
	u32::from_le_bytes(buf[0..4].try_into().unwrap())
}

pub fn write_u32_le(buf: &mut [u8], value: u32) {
	buf[0..4].copy_from_slice(&value.to_le_bytes());
}

pub fn read_u64_le(buf: &[u8]) -> u64 {
	u64::from_le_bytes(buf[0..8].try_into().unwrap())
}

pub fn write_u64_le(buf: &mut [u8], value: u64) {
	buf[0..8].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian unsigned integer of `width` bytes (1..=8) from
/// `buf[0..width]`. Used for the hash file's variable-width address and
/// hash fields.
pub fn read_uint_le(buf: &[u8], width: usize) -> u64 {
	let mut value: u64 = 0;
	for i in (0..width).rev() {
		value = (value << 8) | buf[i] as u64;
	}
	value
}

/// Writes the low `width` bytes of `value`, little-endian, into
/// `buf[0..width]`.
pub fn write_uint_le(buf: &mut [u8], width: usize, value: u64) {
	for i in 0..width {
		buf[i] = ((value >> (i * 8)) & 0xff) as u8;
	}
}
