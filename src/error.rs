#![allow(unknown_lints)]
#![allow(missing_docs)]

use std::{io, num};
use std::path::PathBuf;

use journal;

error_chain! {
	links {
		Journal(journal::Error, journal::ErrorKind);
	}

	foreign_links {
		Io(io::Error);
		Num(num::ParseIntError);
	}

	errors {
		/// Raised during `open()` when the master block's magic does not match.
		InvalidFormat(found: Vec<u8>) {
			description("Invalid database format")
			display("Invalid database format: expected magic {:?}, found {:?}", ::master::MAGIC, found),
		}
		/// Raised during `open()` when the master block's version is not supported.
		UnsupportedVersion(expected: u32, found: u32) {
			description("Unsupported database version")
			display("Unsupported database version: expected {}, found {}", expected, found),
		}
		/// `post_id` passed to `create_comment`/`fetch_post` does not exist.
		NotFound {
			description("Record not found")
			display("Record not found"),
		}
		/// A string passed to `create_post`/`create_comment` is longer than `u32::MAX` bytes.
		StringTooLarge(len: usize) {
			description("String too large")
			display("String of length {} exceeds the maximum of {} bytes", len, u32::max_value()),
		}
		/// The system clock returned a time before the Unix epoch.
		ClockError {
			description("Clock error")
			display("System clock returned a time before the Unix epoch"),
		}
		/// `next_post_id` wrapped around `u64::MAX`.
		IdSpaceExhausted {
			description("Id space exhausted")
			display("Post id space is exhausted"),
		}
		/// A read-only path observed mutated state, or another internal
		/// consistency invariant was violated.
		InternalInvariant(msg: String) {
			description("Internal invariant violated")
			display("Internal invariant violated: {}", msg),
		}
		/// `finish()` was called twice.
		AlreadyClosed {
			description("Database already closed")
			display("Database already closed"),
		}
		/// An operation was attempted after `finish()` completed.
		ShutDown {
			description("Database is shut down")
			display("Database is shut down"),
		}
		/// Options supplied to `open()` fail validation.
		InvalidOptions(field: &'static str, error: String) {
			description("Invalid options were provided")
			display("Invalid value of `{}`: {}", field, error),
		}
		/// Database file lock is held by another process/instance.
		DatabaseLocked(path: PathBuf) {
			description("Database file lock is currently acquired"),
			display("Could not acquire database file lock: {}. \
					 If you're sure that no other process is using \
					 the database you can delete this file.", path.display()),
		}
	}
}

impl PartialEq for ErrorKind {
	fn eq(&self, other: &Self) -> bool {
		use self::ErrorKind::*;

		match (self, other) {
			(&InvalidFormat(ref a), &InvalidFormat(ref b)) if a == b => true,
			(&UnsupportedVersion(e1, g1), &UnsupportedVersion(e2, g2))
				if e1 == e2 && g1 == g2 => true,
			(&NotFound, &NotFound) => true,
			(&StringTooLarge(a), &StringTooLarge(b)) if a == b => true,
			(&ClockError, &ClockError) => true,
			(&IdSpaceExhausted, &IdSpaceExhausted) => true,
			(&InternalInvariant(ref a), &InternalInvariant(ref b)) if a == b => true,
			(&AlreadyClosed, &AlreadyClosed) => true,
			(&ShutDown, &ShutDown) => true,
			(&InvalidOptions(f1, ref e1), &InvalidOptions(f2, ref e2))
				if f1 == f2 && e1 == e2 => true,
			(&DatabaseLocked(ref a), &DatabaseLocked(ref b)) if a == b => true,
			_ => false,
		}
	}
}
