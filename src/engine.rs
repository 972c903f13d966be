//! Transaction engine: block cache + journal + begin/commit/rollback/checkpoint.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use block::{BlockDevice, BlockId, BLOCK_SIZE};
use cache::{self, BlockRef, BlockRefMut, Cache};
use error::Result;
use journal::Journal;

/// Checkpoint automatically once the journal grows past this size.
pub const CHECKPOINT_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// Block cache + write-ahead journal + begin/commit/rollback/checkpoint.
///
/// Every read inside a transaction sees either the committed contents of a
/// block or the writes already made within that same transaction, because
/// writes only ever land in the cache (marked dirty) and reads are always
/// served from the cache first.
pub struct Engine {
	device: BlockDevice,
	journal: Journal,
	cache: Rc<RefCell<Cache>>,
	sync_on_commit: bool,
	in_tx: bool,
}

impl Engine {
	/// Creates a brand new (zero-block) database file and its journal.
	pub fn create<P: AsRef<Path>>(path: P, cache_blocks: u32, sync_on_commit: bool) -> Result<Self> {
		let device = BlockDevice::create(&path)?;
		let journal = Journal::open(&path)?;

		Ok(Engine {
			device,
			journal,
			cache: Cache::with_capacity(cache_blocks as usize),
			sync_on_commit,
			in_tx: false,
		})
	}

	/// Opens an existing database file, replaying any uncheckpointed
	/// journal records first (crash recovery).
	pub fn open<P: AsRef<Path>>(path: P, cache_blocks: u32, sync_on_commit: bool) -> Result<Self> {
		let mut device = BlockDevice::open(&path)?;
		let mut journal = Journal::open(&path)?;

		if !journal.is_empty()? {
			debug!("replaying uncheckpointed journal records for {}", path.as_ref().display());
			journal.replay_into(&mut device)?;
			journal.truncate()?;
		}

		Ok(Engine {
			device,
			journal,
			cache: Cache::with_capacity(cache_blocks as usize),
			sync_on_commit,
			in_tx: false,
		})
	}

	/// Number of blocks in the database file.
	pub fn size(&self) -> u64 {
		self.device.size()
	}

	/// Grows the database file by `additional` blocks. Used by the space
	/// allocator when it runs out of free blocks/extents.
	pub fn grow(&mut self, additional: u64) -> Result<()> {
		self.device.grow(additional)
	}

	/// Current size of the journal file in bytes.
	pub fn journal_size(&self) -> Result<u64> {
		Ok(self.journal.len_bytes()?)
	}

	/// Begins a new transaction. Only one transaction may be in progress
	/// at a time (enforced by the driver's single-writer mutex, not here).
	pub fn begin(&mut self) -> Result<()> {
		debug_assert!(!self.in_tx, "begin() called while a transaction is already in progress");
		self.in_tx = true;
		Ok(())
	}

	/// Returns a read-only handle to block `idx`, fetching it from disk
	/// into the cache on first access.
	pub fn read(&mut self, idx: BlockId) -> Result<BlockRef> {
		self.ensure_cached(idx)?;
		Ok(BlockRef::new(self.cache.clone(), idx))
	}

	/// Returns a mutable handle to block `idx`. The block is only marked
	/// dirty once its data is actually written through the handle.
	pub fn read_mut(&mut self, idx: BlockId) -> Result<BlockRefMut> {
		self.ensure_cached(idx)?;
		Ok(BlockRefMut::new(self.cache.clone(), idx))
	}

	fn ensure_cached(&mut self, idx: BlockId) -> Result<()> {
		if !self.cache.borrow().contains(idx) {
			let mut buf = vec![0u8; BLOCK_SIZE].into_boxed_slice();
			self.device.read_block(idx, &mut buf)?;
			self.cache.borrow_mut().insert_clean(idx, buf);
		}
		Ok(())
	}

	/// Commits the current transaction: every dirty block is written to
	/// the journal as one atomic record, then checkpointed to the database
	/// file later (or immediately, if the journal has grown past the
	/// checkpoint threshold).
	///
	/// Fails with `InternalInvariant` if any block handle is still pinned,
	/// per invariant I7.
	pub fn commit(&mut self) -> Result<()> {
		cache::assert_unpinned(&self.cache)?;

		let dirty = self.cache.borrow_mut().drain_dirty();
		self.journal.append(&dirty, self.sync_on_commit)?;
		self.in_tx = false;

		Ok(())
	}

	/// Discards every write made by the current transaction.
	///
	/// Fails with `InternalInvariant` if any block handle is still pinned,
	/// per invariant I7.
	pub fn rollback(&mut self) -> Result<()> {
		cache::assert_unpinned(&self.cache)?;

		self.cache.borrow_mut().discard_dirty();
		self.in_tx = false;

		Ok(())
	}

	/// Merges every committed-but-not-yet-checkpointed journal record into
	/// the database file, then truncates the journal.
	pub fn checkpoint(&mut self) -> Result<()> {
		if self.journal.is_empty()? {
			return Ok(());
		}

		debug!("checkpointing journal into database file");
		self.journal.replay_into(&mut self.device)?;
		self.journal.truncate()?;

		Ok(())
	}

	/// Runs a checkpoint if the journal has grown past the checkpoint
	/// threshold. Called by the driver after every commit.
	pub fn checkpoint_if_needed(&mut self) -> Result<()> {
		if self.journal_size()? > CHECKPOINT_THRESHOLD_BYTES {
			self.checkpoint()?;
		}
		Ok(())
	}

	/// Runs a final checkpoint (if the journal is non-empty) and removes
	/// the journal file. Called by `finish()`.
	pub fn close(mut self) -> Result<()> {
		if !self.journal.is_empty()? {
			self.checkpoint()?;
		}
		self.journal.remove()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use self::tempdir::TempDir;
	use block::BLOCK_SIZE;
	use super::Engine;

	#[test]
	fn test_commit_is_visible_after_checkpoint() {
		let temp = TempDir::new("test_engine_commit").unwrap();
		let path = temp.path().join("db");

		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();

		engine.begin().unwrap();
		{
			let mut b = engine.read_mut(0).unwrap();
			b.data_mut().copy_from_slice(&[5u8; BLOCK_SIZE]);
		}
		engine.commit().unwrap();
		engine.checkpoint().unwrap();

		let mut engine2 = Engine::open(&path, 16, true).unwrap();
		let b = engine2.read(0).unwrap();
		assert_eq!(&b.data()[..], &[5u8; BLOCK_SIZE][..]);
	}

	#[test]
	fn test_rollback_discards_writes() {
		let temp = TempDir::new("test_engine_rollback").unwrap();
		let path = temp.path().join("db");

		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();

		engine.begin().unwrap();
		{
			let mut b = engine.read_mut(0).unwrap();
			b.data_mut().copy_from_slice(&[5u8; BLOCK_SIZE]);
		}
		engine.rollback().unwrap();

		let b = engine.read(0).unwrap();
		assert_eq!(&b.data()[..], &[0u8; BLOCK_SIZE][..]);
	}

	#[test]
	fn test_commit_fails_while_pinned() {
		let temp = TempDir::new("test_engine_pinned_commit").unwrap();
		let path = temp.path().join("db");

		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();
		engine.begin().unwrap();

		let b = engine.read(0).unwrap();
		assert!(engine.commit().is_err());
		drop(b);
		assert!(engine.commit().is_ok());
	}

	#[test]
	fn test_crash_recovery_replays_uncheckpointed_journal() {
		let temp = TempDir::new("test_engine_recovery").unwrap();
		let path = temp.path().join("db");

		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();
		engine.begin().unwrap();
		{
			let mut b = engine.read_mut(0).unwrap();
			b.data_mut().copy_from_slice(&[7u8; BLOCK_SIZE]);
		}
		engine.commit().unwrap();
		// No checkpoint: simulate a crash before the journal was drained.
		drop(engine);

		let mut recovered = Engine::open(&path, 16, true).unwrap();
		let b = recovered.read(0).unwrap();
		assert_eq!(&b.data()[..], &[7u8; BLOCK_SIZE][..]);
		assert_eq!(recovered.journal_size().unwrap(), 0);
	}
}
