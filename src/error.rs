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

// Error taxonomy for sparkey log/hash operations.
//
// A closed set of return codes (`sparkey_returncode`-style): every
// fallible operation in this crate returns `Result<T>` rather than
// panicking, and the variants below are final — no operation should
// need a variant that isn't listed here.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	Io(std::io::Error),

	PermissionDenied,
	TooManyOpenFiles,
	FileTooLarge,
	FileAlreadyExists,
	FileBusy,
	FileIsDirectory,
	FileSizeExceeded,
	OutOfDisk,
	UnexpectedEof,
	MmapFailed,

	WrongLogMagicNumber,
	WrongLogMajorVersion,
	UnsupportedLogMinorVersion,
	LogTooSmall,
	LogClosed,
	LogIteratorInactive,
	LogIteratorMismatch,
	LogIteratorClosed,
	LogHeaderCorrupt,
	InvalidCompressionBlockSize,
	InvalidCompressionType,

	WrongHashMagicNumber,
	WrongHashMajorVersion,
	UnsupportedHashMinorVersion,
	HashTooSmall,
	HashClosed,
	FileIdentifierMismatch,
	HashHeaderCorrupt,
	HashSizeInvalid,

	Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Io(e) => write!(f, "i/o error: {}", e),
			Error::PermissionDenied => write!(f, "permission denied"),
			Error::TooManyOpenFiles => write!(f, "too many open files"),
			Error::FileTooLarge => write!(f, "file too large"),
			Error::FileAlreadyExists => write!(f, "file already exists"),
			Error::FileBusy => write!(f, "file is busy"),
			Error::FileIsDirectory => write!(f, "file is a directory"),
			Error::FileSizeExceeded => write!(f, "file size exceeded"),
			Error::OutOfDisk => write!(f, "out of disk space"),
			Error::UnexpectedEof => write!(f, "unexpected end of file"),
			Error::MmapFailed => write!(f, "mmap failed"),

			Error::WrongLogMagicNumber => write!(f, "wrong log magic number"),
			Error::WrongLogMajorVersion => write!(f, "wrong log major version"),
			Error::UnsupportedLogMinorVersion => write!(f, "unsupported log minor version"),
			Error::LogTooSmall => write!(f, "log file too small"),
			Error::LogClosed => write!(f, "log is closed"),
			Error::LogIteratorInactive => write!(f, "log iterator is not active"),
			Error::LogIteratorMismatch => write!(f, "log iterator does not match this reader"),
			Error::LogIteratorClosed => write!(f, "log iterator is closed"),
			Error::LogHeaderCorrupt => write!(f, "log header is corrupt"),
			Error::InvalidCompressionBlockSize => write!(f, "invalid compression block size"),
			Error::InvalidCompressionType => write!(f, "invalid compression type"),

			Error::WrongHashMagicNumber => write!(f, "wrong hash magic number"),
			Error::WrongHashMajorVersion => write!(f, "wrong hash major version"),
			Error::UnsupportedHashMinorVersion => write!(f, "unsupported hash minor version"),
			Error::HashTooSmall => write!(f, "hash file too small"),
			Error::HashClosed => write!(f, "hash is closed"),
			Error::FileIdentifierMismatch => write!(f, "file identifier mismatch between log and hash"),
			Error::HashHeaderCorrupt => write!(f, "hash header is corrupt"),
			Error::HashSizeInvalid => write!(f, "invalid hash size"),

			Error::Internal(msg) => write!(f, "internal error: {}", msg),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		use std::io::ErrorKind;
		if let Some(errno) = e.raw_os_error() {
			if let Some(err) = from_errno(errno) {
				return err;
			}
		}
		match e.kind() {
			ErrorKind::NotFound => Error::Io(e),
			ErrorKind::PermissionDenied => Error::PermissionDenied,
			ErrorKind::AlreadyExists => Error::FileAlreadyExists,
			ErrorKind::UnexpectedEof => Error::UnexpectedEof,
			_ => Error::Io(e),
		}
	}
}

// Translate a raw errno into the finer-grained variants distinguished
// by open/create/remove failures. Only the codes worth distinguishing
// are mapped here; anything else falls through to an `io::Error`-
// wrapping variant.
#[cfg(unix)]
fn from_errno(errno: i32) -> Option<Error> {
	match errno {
		libc::EACCES | libc::EPERM | libc::EROFS => Some(Error::PermissionDenied),
		libc::ENFILE | libc::EMFILE => Some(Error::TooManyOpenFiles),
		libc::EOVERFLOW => Some(Error::FileTooLarge),
		libc::EEXIST => Some(Error::FileAlreadyExists),
		libc::EISDIR => Some(Error::FileIsDirectory),
		libc::EBUSY => Some(Error::FileBusy),
		libc::ENOSPC => Some(Error::OutOfDisk),
		_ => None,
	}
}

#[cfg(not(unix))]
fn from_errno(_errno: i32) -> Option<Error> {
	None
}
