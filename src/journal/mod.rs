//! Write-ahead journal of after-images of modified blocks.
//!
//! A journal record is the set of blocks written by a single committed
//! transaction. Records are appended one after another; each is prefixed
//! by a `tiny_keccak::sha3_256` checksum of its own payload, so a record
//! torn by a crash mid-append is detected and ignored rather than
//! corrupting recovery.
//!
//! ```text
//!  checksum   count      (block_id  block)   ...
//!   /           /           /        /
//! |................|....|........|............|...
//!   32 bytes      4 bytes  8 bytes  BLOCK_SIZE bytes
//! ```

mod error;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ByteOrder, WriteBytesExt};
use hex_slice::AsHex;
use tiny_keccak::sha3_256;

pub use self::error::{Error, ErrorKind, Result};

use block::{BlockDevice, BlockId, BLOCK_SIZE};

const CHECKSUM_SIZE: usize = 32;
const COUNT_SIZE: usize = 4;
const RECORD_HEADER_SIZE: usize = CHECKSUM_SIZE + COUNT_SIZE;
const ENTRY_SIZE: usize = 8 + BLOCK_SIZE;

/// Append-only log backing the transaction engine's durability.
#[derive(Debug)]
pub struct Journal {
	path: PathBuf,
	file: File,
}

impl Journal {
	/// Opens the journal file at `<db-path>-journal`, creating it if absent.
	pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
		let path = journal_path(&db_path);

		if path.is_dir() {
			return Err(ErrorKind::InvalidJournalLocationIsDir.into());
		}


		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(&path)?;

		Ok(Journal { path, file })
	}

	/// Size of the journal file in bytes, used by the driver to decide
	/// whether to checkpoint after a commit.
	pub fn len_bytes(&self) -> Result<u64> {
		Ok(self.file.metadata()?.len())
	}

	/// Appends one journal record containing every block written by the
	/// transaction that is committing. `sync` controls whether the journal
	/// file is fsync'd before returning (the `sync_on_commit` option).
	pub fn append(&mut self, blocks: &[(BlockId, Box<[u8]>)], sync: bool) -> Result<()> {
		if blocks.is_empty() {
			return Ok(());
		}

		let mut payload = Vec::with_capacity(COUNT_SIZE + blocks.len() * ENTRY_SIZE);
		payload.write_u32::<LittleEndian>(blocks.len() as u32)?;
		for &(id, ref data) in blocks {
			payload.write_u64::<LittleEndian>(id)?;
			payload.extend_from_slice(data);
		}

		let checksum = sha3_256(&payload);

		self.file.seek(SeekFrom::End(0))?;
		self.file.write_all(&checksum)?;
		self.file.write_all(&payload)?;

		if sync {
			self.file.sync_data()?;
		}

		Ok(())
	}

	/// Replays every well-formed record in the journal into `device`,
	/// growing it as needed. Called on `open()` to recover from a crash
	/// that happened between a commit and the next checkpoint. A trailing
	/// record that is shorter than its declared length (a torn write) is
	/// ignored rather than treated as an error, since it was never fully
	/// flushed and therefore was never observably committed.
	pub fn replay_into(&mut self, device: &mut BlockDevice) -> Result<()> {
		self.file.seek(SeekFrom::Start(0))?;
		let mut data = Vec::new();
		self.file.read_to_end(&mut data)?;

		let mut offset = 0usize;
		while offset < data.len() {
			if data.len() - offset < RECORD_HEADER_SIZE {
				break;
			}

			let checksum = &data[offset..offset + CHECKSUM_SIZE];
			let count_offset = offset + CHECKSUM_SIZE;
			let count = LittleEndian::read_u32(&data[count_offset..count_offset + COUNT_SIZE]) as usize;
			let payload_start = count_offset;
			let payload_len = COUNT_SIZE + count * ENTRY_SIZE;

			if data.len() - payload_start < payload_len {
				// Torn write at the tail; stop replaying here.
				break;
			}

			let payload = &data[payload_start..payload_start + payload_len];
			let expected = sha3_256(payload);
			if &expected[..] != checksum {
				return Err(ErrorKind::CorruptedJournal(
					self.path.clone(),
					format!("Expected: {:02x}, Got: {:02x}", expected.as_hex(), checksum.as_hex()),
				).into());
			}

			let mut entry_offset = payload_start + COUNT_SIZE;
			for _ in 0..count {
				let id = LittleEndian::read_u64(&data[entry_offset..entry_offset + 8]);
				let block = &data[entry_offset + 8..entry_offset + 8 + BLOCK_SIZE];
				if id >= device.size() {
					device.grow(id + 1 - device.size())?;
				}
				device.write_block(id, block)?;
				entry_offset += ENTRY_SIZE;
			}

			offset = payload_start + payload_len;
		}

		device.sync()?;
		Ok(())
	}

	/// Truncates the journal to empty. Called after a checkpoint has
	/// merged every record into the database file.
	pub fn truncate(&mut self) -> Result<()> {
		self.file.set_len(0)?;
		self.file.seek(SeekFrom::Start(0))?;
		self.file.sync_all()?;
		Ok(())
	}

	/// Removes the journal file from disk. Called by `finish()` once a
	/// final checkpoint has drained it.
	pub fn remove(self) -> Result<()> {
		fs::remove_file(self.path)?;
		Ok(())
	}

	/// Whether the journal currently holds any undrained records.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.len_bytes()? == 0)
	}
}

fn journal_path<P: AsRef<Path>>(db_path: P) -> PathBuf {
	let mut s = db_path.as_ref().as_os_str().to_owned();
	s.push("-journal");
	PathBuf::from(s)
}
