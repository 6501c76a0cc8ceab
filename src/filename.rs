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

// `.spi` <-> `.spl` filename transform. Treated as part of the external
// interface (the CLI depends on it to derive one filename from the
// other) rather than core log/hash logic, but kept in the library so
// the CLI doesn't have to reimplement it.

const MAX_LEN: usize = 10_000;

fn swap_extension(name: &str, expect: &str, other_last_char: char) -> Option<String> {
	if name.len() > MAX_LEN {
		return None;
	}
	if name.len() < 4 {
		return None;
	}
	if !name.ends_with(expect) {
		return None;
	}
	let mut result = name.to_string();
	let last = result.len() - 1;
	result.replace_range(last..last + 1, &other_last_char.to_string());
	Some(result)
}

/// Given a `.spi` index filename, returns the corresponding `.spl` log
/// filename, or `None` if `index_filename` doesn't end in `.spi`.
pub fn log_filename_for_index(index_filename: &str) -> Option<String> {
	swap_extension(index_filename, ".spi", 'l')
}

/// Given a `.spl` log filename, returns the corresponding `.spi` index
/// filename, or `None` if `log_filename` doesn't end in `.spl`.
pub fn index_filename_for_log(log_filename: &str) -> Option<String> {
	swap_extension(log_filename, ".spl", 'i')
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn transform_is_bijective() {
		assert_eq!(log_filename_for_index("foo.spi").as_deref(), Some("foo.spl"));
		assert_eq!(index_filename_for_log("foo.spl").as_deref(), Some("foo.spi"));
		let original = "some/path/data.spi";
		let log = log_filename_for_index(original).unwrap();
		let back = index_filename_for_log(&log).unwrap();
		assert_eq!(back, original);
	}

	#[test]
	fn rejects_other_extensions() {
		assert_eq!(log_filename_for_index("foo.txt"), None);
		assert_eq!(index_filename_for_log("foo.txt"), None);
		assert_eq!(log_filename_for_index("spi"), None);
		assert_eq!(log_filename_for_index(""), None);
	}

	#[test]
	fn rejects_ridiculously_long_names() {
		let long_name = format!("{}.spi", "a".repeat(MAX_LEN));
		assert_eq!(log_filename_for_index(&long_name), None);
	}
}
