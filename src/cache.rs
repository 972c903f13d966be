//! In-memory block cache with pinning.
//!
//! The cache holds two kinds of blocks: plain reads kept around to avoid
//! re-hitting the block device, and blocks written by the transaction
//! currently in progress, which must stay resident (and marked dirty)
//! until the engine commits them to the journal. A block is *pinned*
//! while a `BlockRef`/`BlockRefMut` handle to it is alive; pinned blocks
//! are never evicted, and the engine refuses to commit or roll back while
//! any block is pinned, enforcing handle-release-before-commit.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use block::BlockId;
use error::{ErrorKind, Result};

struct Entry {
	data: Box<[u8]>,
	pins: u32,
	dirty: bool,
}

/// Block cache shared between the engine and the handles it hands out.
pub struct Cache {
	capacity: usize,
	entries: HashMap<BlockId, Entry>,
	lru: VecDeque<BlockId>,
}

impl Cache {
	/// Creates a cache that keeps at most `capacity` unpinned blocks
	/// resident before evicting the least recently touched one.
	pub fn with_capacity(capacity: usize) -> Rc<RefCell<Cache>> {
		Rc::new(RefCell::new(Cache {
			capacity,
			entries: HashMap::new(),
			lru: VecDeque::new(),
		}))
	}

	/// Inserts a clean (matches what is on disk) block, evicting an
	/// unpinned LRU entry first if the cache is at capacity.
	pub fn insert_clean(&mut self, idx: BlockId, data: Box<[u8]>) {
		if !self.entries.contains_key(&idx) {
			self.evict_if_needed();
		}
		self.entries.insert(idx, Entry { data, pins: 0, dirty: false });
		self.touch(idx);
	}

	/// Marks `idx` as dirty with `data`, e.g. newly-allocated blocks or
	/// blocks about to be mutated through a `BlockRefMut`.
	pub fn insert_dirty(&mut self, idx: BlockId, data: Box<[u8]>) {
		if !self.entries.contains_key(&idx) {
			self.evict_if_needed();
		}
		self.entries.insert(idx, Entry { data, pins: 0, dirty: true });
		self.touch(idx);
	}

	pub fn contains(&self, idx: BlockId) -> bool {
		self.entries.contains_key(&idx)
	}

	pub fn get(&self, idx: BlockId) -> Option<&[u8]> {
		self.entries.get(&idx).map(|e| &e.data[..])
	}

	pub fn pin(&mut self, idx: BlockId) {
		if let Some(entry) = self.entries.get_mut(&idx) {
			entry.pins += 1;
		}
	}

	pub fn unpin(&mut self, idx: BlockId) {
		if let Some(entry) = self.entries.get_mut(&idx) {
			debug_assert!(entry.pins > 0);
			entry.pins -= 1;
		}
	}

	pub fn mark_dirty(&mut self, idx: BlockId) {
		if let Some(entry) = self.entries.get_mut(&idx) {
			entry.dirty = true;
		}
	}

	/// Total number of outstanding pins across every cached block. Used by
	/// the engine to assert invariant I7 before commit/rollback.
	pub fn total_pins(&self) -> u32 {
		self.entries.values().map(|e| e.pins).sum()
	}

	/// Drains every dirty block, clearing the dirty flag. Called by the
	/// engine right before appending a journal record for the committing
	/// transaction.
	pub fn drain_dirty(&mut self) -> Vec<(BlockId, Box<[u8]>)> {
		let mut out = Vec::new();
		for (&idx, entry) in self.entries.iter_mut() {
			if entry.dirty {
				out.push((idx, entry.data.clone()));
				entry.dirty = false;
			}
		}
		out
	}

	/// Discards every dirty block outright, e.g. on rollback.
	pub fn discard_dirty(&mut self) {
		let dirty: Vec<BlockId> = self.entries.iter()
			.filter(|&(_, e)| e.dirty)
			.map(|(&idx, _)| idx)
			.collect();
		for idx in dirty {
			self.entries.remove(&idx);
			self.lru.retain(|&x| x != idx);
		}
	}

	fn touch(&mut self, idx: BlockId) {
		self.lru.retain(|&x| x != idx);
		self.lru.push_back(idx);
	}

	fn evict_if_needed(&mut self) {
		while self.entries.len() >= self.capacity.max(1) {
			let victim = self.lru.iter().cloned().find(|idx| {
				self.entries.get(idx).map(|e| e.pins == 0 && !e.dirty).unwrap_or(false)
			});

			match victim {
				Some(idx) => {
					self.entries.remove(&idx);
					self.lru.retain(|&x| x != idx);
				}
				None => break, // everything resident is pinned or dirty; let the cache grow
			}
		}
	}
}

/// A read-only handle to a cached block. While alive, the block cannot be
/// evicted.
pub struct BlockRef {
	cache: Rc<RefCell<Cache>>,
	idx: BlockId,
}

impl BlockRef {
	pub(crate) fn new(cache: Rc<RefCell<Cache>>, idx: BlockId) -> Self {
		cache.borrow_mut().pin(idx);
		BlockRef { cache, idx }
	}

	/// Index of the block this handle refers to.
	pub fn index(&self) -> BlockId {
		self.idx
	}

	/// Borrows the block's bytes.
	pub fn data(&self) -> Ref<[u8]> {
		Ref::map(self.cache.borrow(), |c| c.get(self.idx).expect("pinned block missing from cache"))
	}
}

impl Drop for BlockRef {
	fn drop(&mut self) {
		self.cache.borrow_mut().unpin(self.idx);
	}
}

/// A mutable handle to a cached block; any write through it marks the
/// block dirty so it is included in the next commit's journal record.
pub struct BlockRefMut {
	cache: Rc<RefCell<Cache>>,
	idx: BlockId,
}

impl BlockRefMut {
	pub(crate) fn new(cache: Rc<RefCell<Cache>>, idx: BlockId) -> Self {
		cache.borrow_mut().pin(idx);
		BlockRefMut { cache, idx }
	}

	/// Index of the block this handle refers to.
	pub fn index(&self) -> BlockId {
		self.idx
	}

	/// Borrows the block's bytes mutably, marking it dirty.
	pub fn data_mut(&mut self) -> RefMut<[u8]> {
		let idx = self.idx;
		RefMut::map(self.cache.borrow_mut(), |c| {
			c.mark_dirty(idx);
			c.entries.get_mut(&idx).map(|e| &mut e.data[..]).expect("pinned block missing from cache")
		})
	}
}

impl Drop for BlockRefMut {
	fn drop(&mut self) {
		self.cache.borrow_mut().unpin(self.idx);
	}
}

/// Asserts that no block is currently pinned, per invariant I7. Called by
/// the engine immediately before `commit()`/`rollback()`.
pub fn assert_unpinned(cache: &Rc<RefCell<Cache>>) -> Result<()> {
	let pins = cache.borrow().total_pins();
	if pins != 0 {
		return Err(ErrorKind::InternalInvariant(
			format!("{} block handle(s) still held at commit/rollback time", pins)
		).into());
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::Cache;
	use block::BLOCK_SIZE;

	#[test]
	fn test_pin_blocks_eviction() {
		let cache = Cache::with_capacity(1);
		cache.borrow_mut().insert_clean(0, vec![0u8; BLOCK_SIZE].into_boxed_slice());
		let r = super::BlockRef::new(cache.clone(), 0);
		cache.borrow_mut().insert_clean(1, vec![1u8; BLOCK_SIZE].into_boxed_slice());
		// pinned block 0 survives even though capacity is 1
		assert!(cache.borrow().contains(0));
		drop(r);
	}

	#[test]
	fn test_drain_dirty_clears_flag() {
		let cache = Cache::with_capacity(4);
		cache.borrow_mut().insert_dirty(0, vec![3u8; BLOCK_SIZE].into_boxed_slice());
		let drained = cache.borrow_mut().drain_dirty();
		assert_eq!(drained.len(), 1);
		assert_eq!(cache.borrow_mut().drain_dirty().len(), 0);
	}

	#[test]
	fn test_discard_dirty_removes_entries() {
		let cache = Cache::with_capacity(4);
		cache.borrow_mut().insert_dirty(5, vec![1u8; BLOCK_SIZE].into_boxed_slice());
		cache.borrow_mut().discard_dirty();
		assert!(!cache.borrow().contains(5));
	}
}
