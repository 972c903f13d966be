//! An on-disk B-tree keyed by a `u64` projection of the stored record
//! (`post.id` for this domain), balanced via node splitting on overflow
//! and a stack-based cursor for bidirectional traversal.
//!
//! There is no `remove`: posts are never deleted, so the tree only ever
//! grows and no rebalancing-on-delete logic exists.
//!
//! Every record `T` must serialize its key as the first 8 bytes of its
//! encoding (little-endian), so the tree can compare keys without
//! decoding the whole record.

use std::marker::PhantomData;

use byteorder::{LittleEndian, ByteOrder};

use alloc::Allocator;
use block::{BlockId, BLOCK_SIZE};
use engine::Engine;
use error::Result;

const NO_BLOCK: BlockId = ::std::u64::MAX;

const KIND_LEAF: u8 = 0;
const KIND_INTERNAL: u8 = 1;

const HEADER_SIZE: usize = 3; // kind (1) + count (2)
const INTERNAL_MAX_KEYS: usize = 255;
const KEYS_OFFSET: usize = HEADER_SIZE;
const CHILDREN_OFFSET: usize = KEYS_OFFSET + INTERNAL_MAX_KEYS * 8;

/// A record storable in a `BTree`. The key MUST be encoded as the first 8
/// bytes of `encode`'s output.
pub trait Record: Sized {
	/// Sort key.
	fn key(&self) -> u64;
	/// Fixed encoded size in bytes.
	fn encoded_size() -> usize;
	/// Encodes `self` into `buf` (exactly `encoded_size()` bytes).
	fn encode(&self, buf: &mut [u8]);
	/// Decodes a value previously written by `encode`.
	fn decode(buf: &[u8]) -> Self;
}

fn leaf_capacity(item_size: usize) -> usize {
	(BLOCK_SIZE - HEADER_SIZE) / item_size
}

fn node_kind(buf: &[u8]) -> u8 {
	buf[0]
}

fn node_count(buf: &[u8]) -> usize {
	LittleEndian::read_u16(&buf[1..3]) as usize
}

fn set_node_count(buf: &mut [u8], count: usize) {
	LittleEndian::write_u16(&mut buf[1..3], count as u16);
}

fn init_leaf(buf: &mut [u8]) {
	buf[0] = KIND_LEAF;
	set_node_count(buf, 0);
}

fn init_internal(buf: &mut [u8]) {
	buf[0] = KIND_INTERNAL;
	set_node_count(buf, 0);
}

fn leaf_item_offset(i: usize, item_size: usize) -> usize {
	HEADER_SIZE + i * item_size
}

fn leaf_key_at(buf: &[u8], i: usize, item_size: usize) -> u64 {
	let off = leaf_item_offset(i, item_size);
	LittleEndian::read_u64(&buf[off..off + 8])
}

fn internal_key_at(buf: &[u8], i: usize) -> u64 {
	LittleEndian::read_u64(&buf[KEYS_OFFSET + i * 8..KEYS_OFFSET + i * 8 + 8])
}

fn set_internal_key_at(buf: &mut [u8], i: usize, key: u64) {
	LittleEndian::write_u64(&mut buf[KEYS_OFFSET + i * 8..KEYS_OFFSET + i * 8 + 8], key);
}

fn internal_child_at(buf: &[u8], i: usize) -> BlockId {
	LittleEndian::read_u64(&buf[CHILDREN_OFFSET + i * 8..CHILDREN_OFFSET + i * 8 + 8])
}

fn set_internal_child_at(buf: &mut [u8], i: usize, child: BlockId) {
	LittleEndian::write_u64(&mut buf[CHILDREN_OFFSET + i * 8..CHILDREN_OFFSET + i * 8 + 8], child);
}

/// Fixed-size, persistent root pointer. Embedded inline in an owner record
/// (the store anchor, for the posts tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeAnchor {
	root: BlockId,
}

impl BTreeAnchor {
	pub const SIZE: usize = 8;

	pub fn empty() -> Self {
		BTreeAnchor { root: NO_BLOCK }
	}

	pub fn write_to(&self, buf: &mut [u8]) {
		LittleEndian::write_u64(&mut buf[0..8], self.root);
	}

	pub fn read_from(buf: &[u8]) -> Self {
		BTreeAnchor { root: LittleEndian::read_u64(&buf[0..8]) }
	}
}

/// Which end of the tree a freshly created cursor should start at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
	Min,
	Max,
}

/// A live view over a `BTreeAnchor`, mutating it in place as the tree
/// grows. The owner must write the (possibly mutated) anchor back to its
/// persistent location after the view is dropped.
pub struct BTree<'a, T: Record> {
	anchor: &'a mut BTreeAnchor,
	_marker: PhantomData<T>,
}

impl<'a, T: Record> BTree<'a, T> {
	pub fn open(anchor: &'a mut BTreeAnchor) -> Self {
		BTree { anchor, _marker: PhantomData }
	}

	fn is_full(&self, engine: &mut Engine, node: BlockId) -> Result<bool> {
		let r = engine.read(node)?;
		let data = r.data();
		Ok(match node_kind(&data) {
			KIND_LEAF => node_count(&data) >= leaf_capacity(T::encoded_size()),
			_ => node_count(&data) >= INTERNAL_MAX_KEYS,
		})
	}

	/// Inserts `value`, splitting nodes on the way down as needed so the
	/// recursive insert never has to propagate a split back up.
	pub fn insert(&mut self, engine: &mut Engine, alloc: &mut Allocator, value: T) -> Result<()> {
		if self.anchor.root == NO_BLOCK {
			let root = alloc.alloc_block(engine)?;
			{
				let mut b = engine.read_mut(root)?;
				init_leaf(&mut b.data_mut());
			}
			self.anchor.root = root;
		}

		if self.is_full(engine, self.anchor.root)? {
			let new_root = alloc.alloc_block(engine)?;
			{
				let mut b = engine.read_mut(new_root)?;
				let mut data = b.data_mut();
				init_internal(&mut data);
				set_internal_child_at(&mut data, 0, self.anchor.root);
			}
			split_child(engine, alloc, new_root, 0, T::encoded_size())?;
			self.anchor.root = new_root;
		}

		insert_nonfull(engine, alloc, self.anchor.root, value)
	}

	/// Looks a key up, returning a positioned cursor if found.
	pub fn find(&mut self, engine: &mut Engine, key: u64) -> Result<Option<Cursor<T>>> {
		if self.anchor.root == NO_BLOCK {
			return Ok(None);
		}

		let mut path = Vec::new();
		let mut node = self.anchor.root;

		loop {
			let r = engine.read(node)?;
			let data = r.data();
			match node_kind(&data) {
				KIND_LEAF => {
					let count = node_count(&data);
					for i in 0..count {
						if leaf_key_at(&data, i, T::encoded_size()) == key {
							path.push((node, i));
							return Ok(Some(Cursor { path, _marker: PhantomData }));
						}
					}
					return Ok(None);
				}
				_ => {
					let count = node_count(&data);
					let idx = upper_bound(&data, count, key);
					let child = internal_child_at(&data, idx);
					path.push((node, idx));
					drop(data);
					drop(r);
					node = child;
				}
			}
		}
	}

	/// Creates a cursor positioned at the smallest (`Seek::Min`) or
	/// largest (`Seek::Max`) key in the tree. Returns `None` on an empty
	/// tree.
	pub fn create_cursor(&mut self, engine: &mut Engine, seek: Seek) -> Result<Option<Cursor<T>>> {
		if self.anchor.root == NO_BLOCK {
			return Ok(None);
		}

		let mut path = Vec::new();
		let mut node = self.anchor.root;

		loop {
			let r = engine.read(node)?;
			let data = r.data();
			let count = node_count(&data);
			match node_kind(&data) {
				KIND_LEAF => {
					let idx = match seek {
						Seek::Min => 0,
						Seek::Max => count.saturating_sub(1),
					};
					path.push((node, idx));
					return Ok(Some(Cursor { path, _marker: PhantomData }));
				}
				_ => {
					let idx = match seek {
						Seek::Min => 0,
						Seek::Max => count,
					};
					let child = internal_child_at(&data, idx);
					path.push((node, idx));
					drop(data);
					drop(r);
					node = child;
				}
			}
		}
	}
}

fn upper_bound(buf: &[u8], count: usize, key: u64) -> usize {
	let mut lo = 0;
	let mut hi = count;
	while lo < hi {
		let mid = (lo + hi) / 2;
		if internal_key_at(buf, mid) <= key {
			lo = mid + 1;
		} else {
			hi = mid;
		}
	}
	lo
}

fn leaf_lower_bound(buf: &[u8], count: usize, key: u64, item_size: usize) -> usize {
	let mut lo = 0;
	let mut hi = count;
	while lo < hi {
		let mid = (lo + hi) / 2;
		if leaf_key_at(buf, mid, item_size) < key {
			lo = mid + 1;
		} else {
			hi = mid;
		}
	}
	lo
}

/// Splits the `idx`-th child of `parent` (already known not to be full)
/// in half, inserting the median key and a new sibling pointer into
/// `parent`.
fn split_child(engine: &mut Engine, alloc: &mut Allocator, parent: BlockId, idx: usize, item_size: usize) -> Result<()> {
	let child = {
		let r = engine.read(parent)?;
		internal_child_at(&r.data(), idx)
	};
	let child_kind = {
		let r = engine.read(child)?;
		node_kind(&r.data())
	};

	let sibling = alloc.alloc_block(engine)?;

	let median_key;

	match child_kind {
		KIND_LEAF => {
			let count;
			let mid;
			{
				let r = engine.read(child)?;
				let data = r.data();
				count = node_count(&data);
				mid = count / 2;
			}

			{
				let mut sb = engine.read_mut(sibling)?;
				let mut sdata = sb.data_mut();
				init_leaf(&mut sdata);
				let moved = count - mid;
				{
					let r = engine.read(child)?;
					let cdata = r.data();
					for i in 0..moved {
						let src = leaf_item_offset(mid + i, item_size);
						let dst = leaf_item_offset(i, item_size);
						sdata[dst..dst + item_size].copy_from_slice(&cdata[src..src + item_size]);
					}
				}
				set_node_count(&mut sdata, moved);
			}

			{
				let mut cb = engine.read_mut(child)?;
				let mut cdata = cb.data_mut();
				set_node_count(&mut cdata, mid);
			}

			let sr = engine.read(sibling)?;
			median_key = leaf_key_at(&sr.data(), 0, item_size);
		}
		_ => {
			let count;
			let mid;
			{
				let r = engine.read(child)?;
				let data = r.data();
				count = node_count(&data);
				mid = count / 2;
			}

			{
				let mut sb = engine.read_mut(sibling)?;
				let mut sdata = sb.data_mut();
				init_internal(&mut sdata);
				let moved_keys = count - mid - 1;
				{
					let r = engine.read(child)?;
					let cdata = r.data();
					for i in 0..moved_keys {
						set_internal_key_at(&mut sdata, i, internal_key_at(&cdata, mid + 1 + i));
					}
					for i in 0..(moved_keys + 1) {
						set_internal_child_at(&mut sdata, i, internal_child_at(&cdata, mid + 1 + i));
					}
				}
				set_node_count(&mut sdata, moved_keys);
			}

			let mkey;
			{
				let r = engine.read(child)?;
				mkey = internal_key_at(&r.data(), mid);
			}
			median_key = mkey;

			{
				let mut cb = engine.read_mut(child)?;
				let mut cdata = cb.data_mut();
				set_node_count(&mut cdata, mid);
			}
		}
	}

	// Insert (median_key, sibling) into parent at position idx.
	{
		let mut pb = engine.read_mut(parent)?;
		let mut pdata = pb.data_mut();
		let pcount = node_count(&pdata);

		for i in (idx..pcount).rev() {
			let k = internal_key_at(&pdata, i);
			set_internal_key_at(&mut pdata, i + 1, k);
		}
		set_internal_key_at(&mut pdata, idx, median_key);

		for i in (idx + 1..=pcount).rev() {
			let c = internal_child_at(&pdata, i);
			set_internal_child_at(&mut pdata, i + 1, c);
		}
		set_internal_child_at(&mut pdata, idx + 1, sibling);

		set_node_count(&mut pdata, pcount + 1);
	}

	Ok(())
}

fn insert_nonfull<T: Record>(engine: &mut Engine, alloc: &mut Allocator, node: BlockId, value: T) -> Result<()> {
	let kind = {
		let r = engine.read(node)?;
		node_kind(&r.data())
	};

	if kind == KIND_LEAF {
		let item_size = T::encoded_size();
		let mut b = engine.read_mut(node)?;
		let mut data = b.data_mut();
		let count = node_count(&data);
		let pos = leaf_lower_bound(&data, count, value.key(), item_size);

		for i in (pos..count).rev() {
			let (src, dst) = (leaf_item_offset(i, item_size), leaf_item_offset(i + 1, item_size));
			let mut tmp = vec![0u8; item_size];
			tmp.copy_from_slice(&data[src..src + item_size]);
			data[dst..dst + item_size].copy_from_slice(&tmp);
		}

		let off = leaf_item_offset(pos, item_size);
		value.encode(&mut data[off..off + item_size]);
		set_node_count(&mut data, count + 1);

		return Ok(());
	}

	let (child_idx, child) = {
		let r = engine.read(node)?;
		let data = r.data();
		let count = node_count(&data);
		let idx = upper_bound(&data, count, value.key());
		(idx, internal_child_at(&data, idx))
	};

	let child_full = {
		let r = engine.read(child)?;
		let data = r.data();
		match node_kind(&data) {
			KIND_LEAF => node_count(&data) >= leaf_capacity(T::encoded_size()),
			_ => node_count(&data) >= INTERNAL_MAX_KEYS,
		}
	};

	let mut actual_idx = child_idx;
	if child_full {
		split_child(engine, alloc, node, child_idx, T::encoded_size())?;
		let r = engine.read(node)?;
		let data = r.data();
		if internal_key_at(&data, child_idx) <= value.key() {
			actual_idx = child_idx + 1;
		}
	}

	let next_child = {
		let r = engine.read(node)?;
		internal_child_at(&r.data(), actual_idx)
	};

	insert_nonfull(engine, alloc, next_child, value)
}

/// A stateful position inside the tree, supporting `get`/`set`/`move_prev`/
/// `move_next`. The path is a stack of `(block, index)` from root to the
/// current leaf.
pub struct Cursor<T: Record> {
	path: Vec<(BlockId, usize)>,
	_marker: PhantomData<T>,
}

impl<T: Record> Cursor<T> {
	/// Whether the cursor is positioned on an item.
	pub fn is_valid(&self) -> bool {
		!self.path.is_empty()
	}

	/// Reads the item the cursor is positioned at.
	pub fn get(&self, engine: &mut Engine) -> Result<Option<T>> {
		let &(node, idx) = match self.path.last() {
			Some(p) => p,
			None => return Ok(None),
		};
		let r = engine.read(node)?;
		let data = r.data();
		if idx >= node_count(&data) {
			return Ok(None);
		}
		let off = leaf_item_offset(idx, T::encoded_size());
		Ok(Some(T::decode(&data[off..off + T::encoded_size()])))
	}

	/// Overwrites the item the cursor is positioned at. The key of `value`
	/// must equal the key currently stored there.
	pub fn set(&self, engine: &mut Engine, value: T) -> Result<()> {
		let &(node, idx) = match self.path.last() {
			Some(p) => p,
			None => return Ok(()),
		};
		let item_size = T::encoded_size();
		let mut b = engine.read_mut(node)?;
		let mut data = b.data_mut();
		let off = leaf_item_offset(idx, item_size);
		value.encode(&mut data[off..off + item_size]);
		Ok(())
	}

	/// Moves to the next item in key order. Returns `false` (and leaves
	/// the cursor invalid) if there is none.
	pub fn move_next(&mut self, engine: &mut Engine) -> Result<bool> {
		let item_size = T::encoded_size();

		{
			let &mut (leaf, ref mut idx) = self.path.last_mut().expect("move_next on invalid cursor");
			let r = engine.read(leaf)?;
			let count = node_count(&r.data());
			if *idx + 1 < count {
				*idx += 1;
				return Ok(true);
			}
		}

		// Pop back up to the nearest ancestor with an unvisited right
		// sibling, then descend leftmost from there.
		self.path.pop();
		while let Some(&mut (node, ref mut idx)) = self.path.last_mut() {
			let r = engine.read(node)?;
			let count = node_count(&r.data());
			if *idx + 1 <= count {
				*idx += 1;
				let next_child = internal_child_at(&r.data(), *idx);
				drop(r);
				self.descend_leftmost(engine, next_child)?;
				return Ok(true);
			}
			self.path.pop();
		}

		Ok(false)
		// (path is now empty: cursor invalid, matching `is_valid() == false`)
	}

	/// Moves to the previous item in key order.
	pub fn move_prev(&mut self, engine: &mut Engine) -> Result<bool> {
		{
			let &mut (_, ref mut idx) = self.path.last_mut().expect("move_prev on invalid cursor");
			if *idx > 0 {
				*idx -= 1;
				return Ok(true);
			}
		}

		self.path.pop();
		while let Some(&mut (node, ref mut idx)) = self.path.last_mut() {
			if *idx > 0 {
				*idx -= 1;
				let r = engine.read(node)?;
				let prev_child = internal_child_at(&r.data(), *idx);
				drop(r);
				self.descend_rightmost(engine, prev_child)?;
				return Ok(true);
			}
			self.path.pop();
		}

		Ok(false)
	}

	fn descend_leftmost(&mut self, engine: &mut Engine, mut node: BlockId) -> Result<()> {
		loop {
			let r = engine.read(node)?;
			let data = r.data();
			match node_kind(&data) {
				KIND_LEAF => {
					self.path.push((node, 0));
					return Ok(());
				}
				_ => {
					let child = internal_child_at(&data, 0);
					self.path.push((node, 0));
					drop(data);
					drop(r);
					node = child;
				}
			}
		}
	}

	fn descend_rightmost(&mut self, engine: &mut Engine, mut node: BlockId) -> Result<()> {
		loop {
			let r = engine.read(node)?;
			let data = r.data();
			let count = node_count(&data);
			match node_kind(&data) {
				KIND_LEAF => {
					self.path.push((node, count.saturating_sub(1)));
					return Ok(());
				}
				_ => {
					let child = internal_child_at(&data, count);
					self.path.push((node, count));
					drop(data);
					drop(r);
					node = child;
				}
			}
		}
	}
}
