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

// Murmur3 hash family, used to key the hash index. Two widths are
// supported: the 32-bit variant (x86_32) for small capacities and a
// 64-bit value derived from the 128-bit x64 variant (low 64 bits) for
// large capacities, where 32 bits of hash would collide too often.
//
// No crate in the dependency set provides Murmur3, so this is a direct
// transcription of the public-domain reference algorithm rather than a
// hand-rolled substitute for something the ecosystem already has.

use std::convert::TryInto;

const C1_32: u32 = 0xcc9e2d51;
const C2_32: u32 = 0x1b873593;

pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
	let mut h1 = seed;
	let nblocks = data.len() / 4;

	for i in 0..nblocks {
		let mut k1 = u32::from_le_bytes(data[i * 4..i * 4 + 4].try_into().unwrap());
		k1 = k1.wrapping_mul(C1_32);
		k1 = k1.rotate_left(15);
		k1 = k1.wrapping_mul(C2_32);

		h1 ^= k1;
		h1 = h1.rotate_left(13);
		h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
	}

	let tail = &data[nblocks * 4..];
	let mut k1: u32 = 0;
	if tail.len() >= 3 {
		k1 ^= (tail[2] as u32) << 16;
	}
	if tail.len() >= 2 {
		k1 ^= (tail[1] as u32) << 8;
	}
	if tail.len() >= 1 {
		k1 ^= tail[0] as u32;
		k1 = k1.wrapping_mul(C1_32);
		k1 = k1.rotate_left(15);
		k1 = k1.wrapping_mul(C2_32);
		h1 ^= k1;
	}

	h1 ^= data.len() as u32;
	h1 = fmix32(h1);
	h1
}

fn fmix32(mut h: u32) -> u32 {
	h ^= h >> 16;
	h = h.wrapping_mul(0x85ebca6b);
	h ^= h >> 13;
	h = h.wrapping_mul(0xc2b2ae35);
	h ^= h >> 16;
	h
}

const C1_64: u64 = 0x87c37b91114253d5;
const C2_64: u64 = 0x4cf5ad432745937f;

/// Murmur3 x64 128-bit variant, returning only the low 64 bits — enough
/// entropy for hash-file slots while keeping the on-disk hash width at
/// a single `u64`.
pub fn murmur3_64(data: &[u8], seed: u64) -> u64 {
	let mut h1: u64 = seed;
	let mut h2: u64 = seed;
	let nblocks = data.len() / 16;

	for i in 0..nblocks {
		let block = &data[i * 16..i * 16 + 16];
		let mut k1 = u64::from_le_bytes(block[0..8].try_into().unwrap());
		let mut k2 = u64::from_le_bytes(block[8..16].try_into().unwrap());

		k1 = k1.wrapping_mul(C1_64);
		k1 = k1.rotate_left(31);
		k1 = k1.wrapping_mul(C2_64);
		h1 ^= k1;

		h1 = h1.rotate_left(27);
		h1 = h1.wrapping_add(h2);
		h1 = h1.wrapping_mul(5).wrapping_add(0x52dce729);

		k2 = k2.wrapping_mul(C2_64);
		k2 = k2.rotate_left(33);
		k2 = k2.wrapping_mul(C1_64);
		h2 ^= k2;

		h2 = h2.rotate_left(31);
		h2 = h2.wrapping_add(h1);
		h2 = h2.wrapping_mul(5).wrapping_add(0x38495ab5);
	}

	let tail = &data[nblocks * 16..];
	let mut k1: u64 = 0;
	let mut k2: u64 = 0;
	for i in (0..tail.len()).rev() {
		let b = tail[i] as u64;
		if i >= 8 {
			k2 ^= b << ((i - 8) * 8);
			if i == 8 {
				k2 = k2.wrapping_mul(C2_64);
				k2 = k2.rotate_left(33);
				k2 = k2.wrapping_mul(C1_64);
				h2 ^= k2;
			}
		} else {
			k1 ^= b << (i * 8);
			if i == 0 {
				k1 = k1.wrapping_mul(C1_64);
				k1 = k1.rotate_left(31);
				k1 = k1.wrapping_mul(C2_64);
				h1 ^= k1;
			}
		}
	}

	h1 ^= data.len() as u64;
	h2 ^= data.len() as u64;
	h1 = h1.wrapping_add(h2);
	h2 = h2.wrapping_add(h1);
	h1 = fmix64(h1);
	h2 = fmix64(h2);
	h1 = h1.wrapping_add(h2);

	h1
}

fn fmix64(mut k: u64) -> u64 {
	k ^= k >> 33;
	k = k.wrapping_mul(0xff51afd7ed558ccd);
	k ^= k >> 33;
	k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
	k ^= k >> 33;
	k
}
