//! An unordered blob heap: opaque variable-length byte blobs chained across
//! as many blocks as needed. Each block in the chain carries only the
//! single next-block pointer the chain needs, since a blob is never
//! split or resized in place once allocated.

use byteorder::{LittleEndian, ByteOrder};

use alloc::Allocator;
use block::{BlockId, BLOCK_SIZE};
use engine::Engine;
use error::Result;

const NO_BLOCK: BlockId = ::std::u64::MAX;

/// Bytes of continuation-pointer header at the front of every heap block.
const CHUNK_HEADER_SIZE: usize = 8;
const CHUNK_BODY_SIZE: usize = BLOCK_SIZE - CHUNK_HEADER_SIZE;

/// An opaque, totally-ordered handle to a blob stored in the heap. Two
/// `HeapRef`s compare equal only if they refer to the same allocation;
/// the ordering itself carries no semantic meaning beyond letting a
/// `HeapRef` be embedded in a sorted structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapRef {
	first_block: BlockId,
	len: u64,
}

impl HeapRef {
	pub const SIZE: usize = 16;

	/// A reference to the empty blob; never dereferences into the heap.
	pub fn empty() -> Self {
		HeapRef { first_block: NO_BLOCK, len: 0 }
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Byte length of the referenced blob.
	pub fn len(&self) -> u64 {
		self.len
	}

	pub fn write_to(&self, buf: &mut [u8]) {
		LittleEndian::write_u64(&mut buf[0..8], self.first_block);
		LittleEndian::write_u64(&mut buf[8..16], self.len);
	}

	pub fn read_from(buf: &[u8]) -> Self {
		HeapRef {
			first_block: LittleEndian::read_u64(&buf[0..8]),
			len: LittleEndian::read_u64(&buf[8..16]),
		}
	}
}

/// A live view of the heap over a given allocator, used to store and load
/// blobs.
pub struct Heap;

impl Heap {
	/// Copies `bytes` into a freshly allocated chain of blocks and returns a
	/// reference to it.
	pub fn store(engine: &mut Engine, alloc: &mut Allocator, bytes: &[u8]) -> Result<HeapRef> {
		if bytes.is_empty() {
			return Ok(HeapRef::empty());
		}

		let chunks: Vec<&[u8]> = bytes.chunks(CHUNK_BODY_SIZE).collect();
		let mut block_ids = Vec::with_capacity(chunks.len());
		for _ in 0..chunks.len() {
			block_ids.push(alloc.alloc_block(engine)?);
		}

		for (i, chunk) in chunks.iter().enumerate() {
			let next = if i + 1 < block_ids.len() { block_ids[i + 1] } else { NO_BLOCK };
			let mut b = engine.read_mut(block_ids[i])?;
			let mut data = b.data_mut();
			LittleEndian::write_u64(&mut data[0..8], next);
			data[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
		}

		Ok(HeapRef { first_block: block_ids[0], len: bytes.len() as u64 })
	}

	/// Reads the blob referenced by `ref_` into a freshly allocated `Vec`.
	pub fn load(engine: &mut Engine, ref_: HeapRef) -> Result<Vec<u8>> {
		let mut out = Vec::with_capacity(ref_.len as usize);
		if ref_.is_empty() {
			return Ok(out);
		}

		let mut block = ref_.first_block;
		let mut remaining = ref_.len as usize;

		while remaining > 0 {
			let r = engine.read(block)?;
			let data = r.data();
			let take = remaining.min(CHUNK_BODY_SIZE);
			out.extend_from_slice(&data[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + take]);
			remaining -= take;
			if remaining > 0 {
				block = LittleEndian::read_u64(&data[0..8]);
			}
		}

		Ok(out)
	}

	/// Reads the blob referenced by `ref_` into an existing buffer, which
	/// must be exactly `ref_.len()` bytes.
	pub fn load_into(engine: &mut Engine, ref_: HeapRef, buf: &mut [u8]) -> Result<()> {
		debug_assert_eq!(buf.len() as u64, ref_.len);

		if ref_.is_empty() {
			return Ok(());
		}

		let mut block = ref_.first_block;
		let mut offset = 0usize;
		let mut remaining = ref_.len as usize;

		while remaining > 0 {
			let r = engine.read(block)?;
			let data = r.data();
			let take = remaining.min(CHUNK_BODY_SIZE);
			buf[offset..offset + take].copy_from_slice(&data[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + take]);
			offset += take;
			remaining -= take;
			if remaining > 0 {
				block = LittleEndian::read_u64(&data[0..8]);
			}
		}

		Ok(())
	}

	/// Frees every block in the blob's chain.
	pub fn free(engine: &mut Engine, alloc: &mut Allocator, ref_: HeapRef) -> Result<()> {
		if ref_.is_empty() {
			return Ok(());
		}

		let mut block = ref_.first_block;
		loop {
			let next = {
				let r = engine.read(block)?;
				LittleEndian::read_u64(&r.data()[0..8])
			};
			alloc.free_block(engine, block)?;
			if next == NO_BLOCK {
				break;
			}
			block = next;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use self::tempdir::TempDir;
	use alloc::{Allocator, AllocatorAnchor};
	use engine::Engine;
	use super::{Heap, HeapRef};

	fn setup() -> (TempDir, Engine) {
		let temp = TempDir::new("test_heap").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 64, true).unwrap();
		engine.grow(1).unwrap();
		(temp, engine)
	}

	#[test]
	fn test_empty_blob_roundtrips_without_allocating() {
		let (_temp, mut engine) = setup();
		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let r = Heap::store(&mut engine, &mut alloc, &[]).unwrap();
		assert!(r.is_empty());
		assert_eq!(alloc.high_water_mark(), 1);
		assert_eq!(Heap::load(&mut engine, r).unwrap(), Vec::<u8>::new());
	}

	#[test]
	fn test_small_blob_roundtrips_in_one_block() {
		let (_temp, mut engine) = setup();
		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let payload = b"hello, blabber".to_vec();
		let r = Heap::store(&mut engine, &mut alloc, &payload).unwrap();
		assert_eq!(r.len(), payload.len() as u64);
		assert_eq!(Heap::load(&mut engine, r).unwrap(), payload);
	}

	#[test]
	fn test_large_blob_spans_multiple_blocks() {
		let (_temp, mut engine) = setup();
		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
		let r = Heap::store(&mut engine, &mut alloc, &payload).unwrap();
		let loaded = Heap::load(&mut engine, r).unwrap();
		assert_eq!(loaded, payload);
	}

	#[test]
	fn test_free_reclaims_every_block_in_chain() {
		let (_temp, mut engine) = setup();
		let mut anchor = AllocatorAnchor::new(1);
		let mut alloc = Allocator::open(&mut anchor);

		let before = alloc.high_water_mark();
		let payload: Vec<u8> = vec![1u8; 9000];
		let r = Heap::store(&mut engine, &mut alloc, &payload).unwrap();
		let chain_len = alloc.high_water_mark() - before;

		Heap::free(&mut engine, &mut alloc, r).unwrap();
		assert_eq!(alloc.free_count(), chain_len);
	}

	#[test]
	fn test_heap_ref_roundtrip() {
		let r = HeapRef { first_block: 42, len: 9000 };
		let mut buf = [0u8; HeapRef::SIZE];
		r.write_to(&mut buf);
		assert_eq!(HeapRef::read_from(&buf), r);
	}
}
