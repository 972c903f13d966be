#![allow(unknown_lints)]
#![allow(missing_docs)]

use std::io;
use std::path::PathBuf;

error_chain! {
	foreign_links {
		Io(io::Error);
	}

	errors {
		/// Hash of a journal record does not match its recorded checksum.
		CorruptedJournal(path: PathBuf, msg: String) {
			description("Hash of journal data is invalid"),
			display("Database journal corruption detected in file at {}. {}", path.display(), msg),
		}
		/// Path to the journal is a directory rather than a regular file.
		InvalidJournalLocationIsDir {
			description("Path to journal is a directory"),
			display("Expected a file at the journal path, got a directory."),
		}
	}
}
