//! A doubly linked list of blocks, each holding exactly one encoded `T`
//! plus its `prev`/`next` block pointers.
//!
//! Used for a post's comment list: comments are always appended at the
//! tail (insertion order) while the frontend wants them newest-first, so
//! callers walk the list back-to-front with a cursor seeked to `Back`.

use byteorder::{LittleEndian, ByteOrder};

use alloc::Allocator;
use block::BlockId;
use engine::Engine;
use error::Result;

const NO_BLOCK: BlockId = ::std::u64::MAX;
const HEADER_SIZE: usize = 16; // prev (8) + next (8)

/// A record storable in a `List`.
pub trait ListItem: Sized {
	fn encoded_size() -> usize;
	fn encode(&self, buf: &mut [u8]);
	fn decode(buf: &[u8]) -> Self;
}

/// Fixed-size, persistent state of a list. Embedded inline in the owning
/// record (e.g. a post's comment list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListAnchor {
	head: BlockId,
	tail: BlockId,
	count: u64,
}

impl ListAnchor {
	pub const SIZE: usize = 24;

	pub fn empty() -> Self {
		ListAnchor { head: NO_BLOCK, tail: NO_BLOCK, count: 0 }
	}

	pub fn len(&self) -> u64 {
		self.count
	}

	pub fn write_to(&self, buf: &mut [u8]) {
		LittleEndian::write_u64(&mut buf[0..8], self.head);
		LittleEndian::write_u64(&mut buf[8..16], self.tail);
		LittleEndian::write_u64(&mut buf[16..24], self.count);
	}

	pub fn read_from(buf: &[u8]) -> Self {
		ListAnchor {
			head: LittleEndian::read_u64(&buf[0..8]),
			tail: LittleEndian::read_u64(&buf[8..16]),
			count: LittleEndian::read_u64(&buf[16..24]),
		}
	}
}

/// Which end of the list a freshly created cursor should start at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
	Front,
	Back,
}

fn node_prev(buf: &[u8]) -> BlockId {
	LittleEndian::read_u64(&buf[0..8])
}

fn set_node_prev(buf: &mut [u8], prev: BlockId) {
	LittleEndian::write_u64(&mut buf[0..8], prev);
}

fn node_next(buf: &[u8]) -> BlockId {
	LittleEndian::read_u64(&buf[8..16])
}

fn set_node_next(buf: &mut [u8], next: BlockId) {
	LittleEndian::write_u64(&mut buf[8..16], next);
}

/// A live view of a list over a given anchor, mutating it in place as
/// nodes are appended.
pub struct List<'a, T> {
	anchor: &'a mut ListAnchor,
	_marker: ::std::marker::PhantomData<T>,
}

impl<'a, T: ListItem> List<'a, T> {
	pub fn open(anchor: &'a mut ListAnchor) -> Self {
		List { anchor, _marker: ::std::marker::PhantomData }
	}

	pub fn len(&self) -> u64 {
		self.anchor.len()
	}

	/// Appends `value` as the new tail of the list.
	pub fn push_back(&mut self, engine: &mut Engine, alloc: &mut Allocator, value: T) -> Result<()> {
		let node = alloc.alloc_block(engine)?;
		let old_tail = self.anchor.tail;

		{
			let mut b = engine.read_mut(node)?;
			let mut data = b.data_mut();
			set_node_prev(&mut data, old_tail);
			set_node_next(&mut data, NO_BLOCK);
			value.encode(&mut data[HEADER_SIZE..HEADER_SIZE + T::encoded_size()]);
		}

		if old_tail != NO_BLOCK {
			let mut b = engine.read_mut(old_tail)?;
			let mut data = b.data_mut();
			set_node_next(&mut data, node);
		} else {
			self.anchor.head = node;
		}

		self.anchor.tail = node;
		self.anchor.count += 1;

		Ok(())
	}

	/// Creates a cursor seeked to the front or back of the list. Returns
	/// `None` on an empty list.
	pub fn create_cursor(&self, seek: Seek) -> Option<Cursor<T>> {
		let start = match seek {
			Seek::Front => self.anchor.head,
			Seek::Back => self.anchor.tail,
		};
		if start == NO_BLOCK {
			None
		} else {
			Some(Cursor { current: start, _marker: ::std::marker::PhantomData })
		}
	}
}

/// A stateful position inside a list.
pub struct Cursor<T> {
	current: BlockId,
	_marker: ::std::marker::PhantomData<T>,
}

impl<T: ListItem> Cursor<T> {
	pub fn is_valid(&self) -> bool {
		self.current != NO_BLOCK
	}

	/// Reads the item the cursor is positioned at.
	pub fn get(&self, engine: &mut Engine) -> Result<Option<T>> {
		if self.current == NO_BLOCK {
			return Ok(None);
		}
		let r = engine.read(self.current)?;
		let data = r.data();
		Ok(Some(T::decode(&data[HEADER_SIZE..HEADER_SIZE + T::encoded_size()])))
	}

	/// Overwrites the item the cursor is positioned at in place.
	pub fn set(&self, engine: &mut Engine, value: T) -> Result<()> {
		if self.current == NO_BLOCK {
			return Ok(());
		}
		let mut b = engine.read_mut(self.current)?;
		let mut data = b.data_mut();
		value.encode(&mut data[HEADER_SIZE..HEADER_SIZE + T::encoded_size()]);
		Ok(())
	}

	/// Moves towards the tail. Returns `false` (and invalidates the
	/// cursor) if already at the last node.
	pub fn move_next(&mut self, engine: &mut Engine) -> Result<bool> {
		if self.current == NO_BLOCK {
			return Ok(false);
		}
		let next = {
			let r = engine.read(self.current)?;
			node_next(&r.data())
		};
		self.current = next;
		Ok(self.current != NO_BLOCK)
	}

	/// Moves towards the head. Returns `false` (and invalidates the
	/// cursor) if already at the first node.
	pub fn move_prev(&mut self, engine: &mut Engine) -> Result<bool> {
		if self.current == NO_BLOCK {
			return Ok(false);
		}
		let prev = {
			let r = engine.read(self.current)?;
			node_prev(&r.data())
		};
		self.current = prev;
		Ok(self.current != NO_BLOCK)
	}
}
