//! Fixed-size block device over a single file.
//!
//! Blocks are `BLOCK_SIZE` bytes. The file is grown one or more blocks at a
//! time; it is never shrunk. Block 0 is reserved for the master block (see
//! `master.rs`) by convention of every caller above this module, not by
//! anything enforced here.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use error::{ErrorKind, Result};

/// Size in bytes of a single block.
pub const BLOCK_SIZE: usize = 4096;

/// Index of a block within the device.
pub type BlockId = u64;

/// A fixed-size block device backed by a regular file.
#[derive(Debug)]
pub struct BlockDevice {
	path: PathBuf,
	file: File,
	blocks: u64,
}

impl BlockDevice {
	/// Creates a new, empty (zero-block) database file. Fails if one
	/// already exists at `path`.
	pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create_new(true)
			.open(&path)?;

		file.try_lock_exclusive().map_err(|_| ErrorKind::DatabaseLocked(path.as_ref().to_owned()))?;

		Ok(BlockDevice {
			path: path.as_ref().to_owned(),
			file,
			blocks: 0,
		})
	}

	/// Opens an existing database file, computing its block count from its
	/// length on disk (which must be a multiple of `BLOCK_SIZE`).
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.open(&path)?;

		file.try_lock_exclusive().map_err(|_| ErrorKind::DatabaseLocked(path.as_ref().to_owned()))?;

		let len = file.metadata()?.len();
		let blocks = len / BLOCK_SIZE as u64;

		Ok(BlockDevice {
			path: path.as_ref().to_owned(),
			file,
			blocks,
		})
	}

	/// Number of blocks currently in the device.
	pub fn size(&self) -> u64 {
		self.blocks
	}

	/// Grows the device by `additional` blocks, zero-filling them.
	pub fn grow(&mut self, additional: u64) -> Result<()> {
		if additional == 0 {
			return Ok(());
		}

		let new_len = (self.blocks + additional) * BLOCK_SIZE as u64;
		self.file.set_len(new_len)?;
		self.blocks += additional;

		trace!("grew database file {} to {} blocks", self.path.display(), self.blocks);

		Ok(())
	}

	/// Reads block `idx` into `buf`, which must be exactly `BLOCK_SIZE` bytes.
	pub fn read_block(&mut self, idx: BlockId, buf: &mut [u8]) -> Result<()> {
		debug_assert_eq!(buf.len(), BLOCK_SIZE);
		self.file.seek(SeekFrom::Start(idx * BLOCK_SIZE as u64))?;
		self.file.read_exact(buf)?;
		Ok(())
	}

	/// Writes `buf` (exactly `BLOCK_SIZE` bytes) to block `idx`.
	pub fn write_block(&mut self, idx: BlockId, buf: &[u8]) -> Result<()> {
		debug_assert_eq!(buf.len(), BLOCK_SIZE);
		debug_assert!(idx < self.blocks, "write to block {} beyond device size {}", idx, self.blocks);
		self.file.seek(SeekFrom::Start(idx * BLOCK_SIZE as u64))?;
		self.file.write_all(buf)?;
		Ok(())
	}

	/// Flushes any buffered writes to disk.
	pub fn sync(&mut self) -> Result<()> {
		self.file.sync_all()?;
		Ok(())
	}

	/// Removes the underlying file from disk. Consumes `self` because the
	/// open file handle (and its lock) must be dropped first.
	pub fn remove(self) -> Result<()> {
		let path = self.path.clone();
		drop(self);
		fs::remove_file(path)?;
		Ok(())
	}
}
