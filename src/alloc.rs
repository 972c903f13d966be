//! Space allocator: hands out single blocks and contiguous multi-block
//! extents from the engine, tracking freed single blocks on an on-disk
//! singly linked free list anchored by a small fixed-size record.
//!
//! Nothing in this store ever deletes a post or comment, so the free list
//! is only ever populated by internal bookkeeping; the anchor is shaped so
//! a future bitmap-backed implementation could replace the free list
//! without changing its on-disk size.

use byteorder::{LittleEndian, ByteOrder};

use block::{BlockId, BLOCK_SIZE};
use engine::Engine;
use error::Result;

/// Sentinel marking "no free block" in the on-disk free-list head.
const NO_BLOCK: BlockId = ::std::u64::MAX;

/// Fixed-size, persistent state of the allocator. Embedded inline in the
/// master block (see `master.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorAnchor {
	/// One past the highest block ever handed out or reserved.
	next_block: BlockId,
	/// Head of the on-disk singly linked free list, or `NO_BLOCK`.
	free_head: BlockId,
	/// Number of blocks currently on the free list.
	free_count: u64,
}

impl AllocatorAnchor {
	/// Serialized size in bytes.
	pub const SIZE: usize = 24;

	/// A fresh anchor for a database that has no blocks allocated yet.
	/// `reserved` should be the number of blocks already spoken for
	/// outside the allocator (e.g. block 0, the master block).
	pub fn new(reserved: BlockId) -> Self {
		AllocatorAnchor {
			next_block: reserved,
			free_head: NO_BLOCK,
			free_count: 0,
		}
	}

	pub fn write_to(&self, buf: &mut [u8]) {
		debug_assert!(buf.len() >= Self::SIZE);
		LittleEndian::write_u64(&mut buf[0..8], self.next_block);
		LittleEndian::write_u64(&mut buf[8..16], self.free_head);
		LittleEndian::write_u64(&mut buf[16..24], self.free_count);
	}

	pub fn read_from(buf: &[u8]) -> Self {
		debug_assert!(buf.len() >= Self::SIZE);
		AllocatorAnchor {
			next_block: LittleEndian::read_u64(&buf[0..8]),
			free_head: LittleEndian::read_u64(&buf[8..16]),
			free_count: LittleEndian::read_u64(&buf[16..24]),
		}
	}
}

/// A live view of the allocator over a given anchor, mutating it in place
/// as blocks are allocated or freed. The owner is responsible for writing
/// the mutated anchor back to its master record.
pub struct Allocator<'a> {
	anchor: &'a mut AllocatorAnchor,
}

impl<'a> Allocator<'a> {
	/// Opens the allocator over its anchor.
	pub fn open(anchor: &'a mut AllocatorAnchor) -> Self {
		Allocator { anchor }
	}

	/// Allocates a single block, preferring a freed block over growing the
	/// device.
	pub fn alloc_block(&mut self, engine: &mut Engine) -> Result<BlockId> {
		if self.anchor.free_head != NO_BLOCK {
			let id = self.anchor.free_head;
			let next = {
				let block = engine.read(id)?;
				LittleEndian::read_u64(&block.data()[0..8])
			};
			self.anchor.free_head = next;
			self.anchor.free_count -= 1;
			return Ok(id);
		}

		let id = self.anchor.next_block;
		self.anchor.next_block += 1;
		if id >= engine.size() {
			engine.grow(id + 1 - engine.size())?;
		}
		Ok(id)
	}

	/// Allocates `count` contiguous blocks and returns the first one.
	/// Extents always come from growing the device; the free list (which
	/// only ever holds single freed blocks) is not consulted, since nothing
	/// in this store frees an extent and so never needs to reuse one.
	pub fn alloc_extent(&mut self, engine: &mut Engine, count: u64) -> Result<BlockId> {
		debug_assert!(count > 0);
		let start = self.anchor.next_block;
		self.anchor.next_block += count;
		if self.anchor.next_block > engine.size() {
			engine.grow(self.anchor.next_block - engine.size())?;
		}
		Ok(start)
	}

	/// Returns a single block to the free list.
	pub fn free_block(&mut self, engine: &mut Engine, id: BlockId) -> Result<()> {
		{
			let mut block = engine.read_mut(id)?;
			let mut data = block.data_mut();
			let mut header = [0u8; BLOCK_SIZE];
			LittleEndian::write_u64(&mut header[0..8], self.anchor.free_head);
			data.copy_from_slice(&header);
		}
		self.anchor.free_head = id;
		self.anchor.free_count += 1;
		Ok(())
	}

	/// Returns every block of a contiguous extent to the free list.
	pub fn free_extent(&mut self, engine: &mut Engine, start: BlockId, count: u64) -> Result<()> {
		for offset in 0..count {
			self.free_block(engine, start + offset)?;
		}
		Ok(())
	}

	/// Number of blocks reachable via `next_block` (allocated or free),
	/// for `dump()`.
	pub fn high_water_mark(&self) -> BlockId {
		self.anchor.next_block
	}

	/// Number of blocks currently on the free list, for `dump()`.
	pub fn free_count(&self) -> u64 {
		self.anchor.free_count
	}

	/// Every block currently on the free list, head first, for `dump()`.
	pub fn free_blocks(&self, engine: &mut Engine) -> Result<Vec<BlockId>> {
		let mut out = Vec::with_capacity(self.anchor.free_count as usize);
		let mut current = self.anchor.free_head;
		while current != NO_BLOCK {
			out.push(current);
			let r = engine.read(current)?;
			current = LittleEndian::read_u64(&r.data()[0..8]);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use self::tempdir::TempDir;
	use engine::Engine;
	use super::{Allocator, AllocatorAnchor};

	#[test]
	fn test_alloc_grows_device() {
		let temp = TempDir::new("test_alloc_grows").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap(); // block 0 reserved for master

		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let a = alloc.alloc_block(&mut engine).unwrap();
		let b = alloc.alloc_block(&mut engine).unwrap();
		assert_eq!(a, 1);
		assert_eq!(b, 2);
		assert_eq!(engine.size(), 3);
	}

	#[test]
	fn test_free_then_alloc_reuses_block() {
		let temp = TempDir::new("test_alloc_reuse").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();

		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let a = alloc.alloc_block(&mut engine).unwrap();
		let b = alloc.alloc_block(&mut engine).unwrap();
		alloc.free_block(&mut engine, a).unwrap();
		assert_eq!(alloc.free_count(), 1);

		let c = alloc.alloc_block(&mut engine).unwrap();
		assert_eq!(c, a);
		assert_eq!(alloc.free_count(), 0);

		let d = alloc.alloc_block(&mut engine).unwrap();
		assert_ne!(d, b);
	}

	#[test]
	fn test_free_blocks_lists_free_list_head_first() {
		let temp = TempDir::new("test_alloc_free_blocks").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();

		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let a = alloc.alloc_block(&mut engine).unwrap();
		let b = alloc.alloc_block(&mut engine).unwrap();
		assert!(alloc.free_blocks(&mut engine).unwrap().is_empty());

		alloc.free_block(&mut engine, a).unwrap();
		alloc.free_block(&mut engine, b).unwrap();
		assert_eq!(alloc.free_blocks(&mut engine).unwrap(), vec![b, a]);
	}

	#[test]
	fn test_extent_is_contiguous() {
		let temp = TempDir::new("test_alloc_extent").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();
		engine.grow(1).unwrap();

		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let start = alloc.alloc_extent(&mut engine, 4).unwrap();
		assert_eq!(start, 1);
		assert_eq!(engine.size(), 5);
	}

	#[test]
	fn test_anchor_roundtrip() {
		let anchor = AllocatorAnchor::new(7);
		let mut buf = [0u8; AllocatorAnchor::SIZE];
		anchor.write_to(&mut buf);
		let decoded = AllocatorAnchor::read_from(&buf);
		assert_eq!(anchor, decoded);
	}
}
