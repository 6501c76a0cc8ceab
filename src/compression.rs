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

// Compressor registry: a fixed tag-dispatched table of `{None, Snappy,
// Zstd}`. Expressed as a tagged enum matched in the hot path instead of
// a vtable of function pointers, since the set of compressors is closed
// and known at compile time.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
	None,
	Snappy,
	Zstd,
}

impl CompressionType {
	pub fn from_u32(tag: u32) -> Result<CompressionType> {
		match tag {
			0 => Ok(CompressionType::None),
			1 => Ok(CompressionType::Snappy),
			2 => Ok(CompressionType::Zstd),
			_ => Err(Error::InvalidCompressionType),
		}
	}

	pub fn as_u32(self) -> u32 {
		match self {
			CompressionType::None => 0,
			CompressionType::Snappy => 1,
			CompressionType::Zstd => 2,
		}
	}

	pub fn uses_compressor(self) -> bool {
		!matches!(self, CompressionType::None)
	}
}

impl std::fmt::Display for CompressionType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			CompressionType::None => "none",
			CompressionType::Snappy => "snappy",
			CompressionType::Zstd => "zstd",
		};
		write!(f, "{}", s)
	}
}

impl std::str::FromStr for CompressionType {
	type Err = Error;

	fn from_str(s: &str) -> Result<CompressionType> {
		match s {
			"none" => Ok(CompressionType::None),
			"snappy" => Ok(CompressionType::Snappy),
			"zstd" => Ok(CompressionType::Zstd),
			_ => Err(Error::InvalidCompressionType),
		}
	}
}

const ZSTD_LEVEL: i32 = 3;

/// Rough upper bound on the compressed size of a `block_size`-byte
/// block, used only to pre-reserve capacity on the writer's staging
/// buffer; neither codec is asked to honor it as a hard limit; both
/// grow their output `Vec` on demand via their own one-shot helpers.
pub fn max_compressed_size(compression: CompressionType, block_size: u32) -> u32 {
	match compression {
		CompressionType::None => block_size,
		CompressionType::Snappy => snap::raw::max_compress_len(block_size as usize) as u32,
		// ZSTD_compressBound's formula, inlined as a capacity estimate;
		// `compress_into` below doesn't depend on this bound being exact.
		CompressionType::Zstd => block_size + (block_size >> 8) + 64,
	}
}

/// Compresses `input`, appending the result to `output` (which is
/// cleared first). `output` is reused across calls by the writer so a
/// single allocation can serve the lifetime of a log, per the "one
/// compression buffer per log" design note.
pub fn compress_into(compression: CompressionType, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
	output.clear();
	match compression {
		CompressionType::None => Err(Error::Internal("compress called for CompressionType::None".into())),
		CompressionType::Snappy => {
			let mut encoder = snap::raw::Encoder::new();
			let compressed = encoder.compress_vec(input).map_err(|e| Error::Internal(format!("snappy compress failed: {}", e)))?;
			output.extend_from_slice(&compressed);
			Ok(())
		}
		CompressionType::Zstd => {
			let compressed = zstd::encode_all(input, ZSTD_LEVEL).map_err(|e| Error::Internal(format!("zstd compress failed: {}", e)))?;
			output.extend_from_slice(&compressed);
			Ok(())
		}
	}
}

/// Decompresses `input`, appending the result to `output` (which is
/// cleared first). Both codecs recover the exact decompressed length
/// from their own framing (snappy's varint length prefix, zstd's frame
/// header) rather than needing it passed in.
pub fn decompress_into(compression: CompressionType, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
	output.clear();
	match compression {
		CompressionType::None => Err(Error::Internal("decompress called for CompressionType::None".into())),
		CompressionType::Snappy => {
			let mut decoder = snap::raw::Decoder::new();
			let decompressed = decoder.decompress_vec(input).map_err(|e| Error::Internal(format!("snappy decompress failed: {}", e)))?;
			output.extend_from_slice(&decompressed);
			Ok(())
		}
		CompressionType::Zstd => {
			let decompressed = zstd::decode_all(input).map_err(|e| Error::Internal(format!("zstd decompress failed: {}", e)))?;
			output.extend_from_slice(&decompressed);
			Ok(())
		}
	}
}
