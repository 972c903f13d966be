//! Small-string-optimized text fields: short strings are stored inline in
//! the owning record, longer ones are spilled to the blob heap and
//! referenced by a `HeapRef`.
//!
//! `Cap` is a zero-sized marker fixing the inline threshold per field
//! (`UserCap` for a display name, `TitleCap` for a post title), so the
//! same `OptimizedString<C>` type can be reused with a different fixed
//! encoded size depending on where it's embedded.

use std::cmp;
use std::marker::PhantomData;

use alloc::Allocator;
use containers::{Heap, HeapRef};
use engine::Engine;
use error::{ErrorKind, Result};

const TAG_INLINE: u8 = 0;
const TAG_HEAP: u8 = 1;

/// A compile-time inline-length bound for an `OptimizedString` field.
pub trait Cap: Copy {
	fn inline_len() -> usize;
}

/// Inline threshold for a user display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCap;
impl Cap for UserCap {
	fn inline_len() -> usize { 15 }
}

/// Inline threshold for a post title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleCap;
impl Cap for TitleCap {
	fn inline_len() -> usize { 31 }
}

/// A string stored either inline (short) or on the blob heap (long). This
/// is the on-disk representation: loading the actual `String` out of it
/// requires heap access and so is a separate step (`load`).
#[derive(Debug, Clone)]
pub enum OptimizedString<C: Cap> {
	Inline(Vec<u8>, PhantomData<C>),
	Heap(HeapRef, PhantomData<C>),
}

impl<C: Cap> OptimizedString<C> {
	/// Fixed encoded size in bytes, regardless of variant.
	pub fn encoded_size() -> usize {
		1 + cmp::max(C::inline_len(), HeapRef::SIZE)
	}

	/// Stores `s`, spilling to the heap if it doesn't fit inline.
	/// Fails with `StringTooLarge` if `s` exceeds `u32::MAX` bytes (the
	/// limit the heap's length field can express).
	pub fn store(engine: &mut Engine, alloc: &mut Allocator, s: &str) -> Result<Self> {
		if s.len() > u32::max_value() as usize {
			return Err(ErrorKind::StringTooLarge(s.len()).into());
		}

		if s.len() <= C::inline_len() {
			Ok(OptimizedString::Inline(s.as_bytes().to_vec(), PhantomData))
		} else {
			let r = Heap::store(engine, alloc, s.as_bytes())?;
			Ok(OptimizedString::Heap(r, PhantomData))
		}
	}

	/// Loads the string's actual contents, reading from the heap if
	/// necessary.
	pub fn load(&self, engine: &mut Engine) -> Result<String> {
		match *self {
			OptimizedString::Inline(ref bytes, _) => {
				Ok(String::from_utf8(bytes.clone())
					.expect("OptimizedString only ever stores bytes that came from a valid &str; qed"))
			}
			OptimizedString::Heap(r, _) => {
				let bytes = Heap::load(engine, r)?;
				Ok(String::from_utf8(bytes)
					.expect("OptimizedString only ever stores bytes that came from a valid &str; qed"))
			}
		}
	}

	/// Encodes into `buf` (exactly `encoded_size()` bytes). The inline
	/// variant is not length-prefixed: it zero-pads its tail, and `decode`
	/// recovers the length from the first zero byte (or `Cap` if none),
	/// per spec's I5/§4.4. A consequence is that an inline string
	/// containing an embedded NUL byte loses everything from that byte on;
	/// only the heap variant (used once a string exceeds `Cap`) stores
	/// arbitrary bytes verbatim.
	pub fn encode(&self, buf: &mut [u8]) {
		match *self {
			OptimizedString::Inline(ref bytes, _) => {
				buf[0] = TAG_INLINE;
				for b in buf[1..].iter_mut() {
					*b = 0;
				}
				buf[1..1 + bytes.len()].copy_from_slice(bytes);
			}
			OptimizedString::Heap(r, _) => {
				buf[0] = TAG_HEAP;
				r.write_to(&mut buf[1..1 + HeapRef::SIZE]);
			}
		}
	}

	pub fn decode(buf: &[u8]) -> Self {
		match buf[0] {
			TAG_INLINE => {
				let region = &buf[1..1 + C::inline_len()];
				let len = region.iter().position(|&b| b == 0).unwrap_or_else(|| C::inline_len());
				OptimizedString::Inline(region[..len].to_vec(), PhantomData)
			}
			TAG_HEAP => {
				let r = HeapRef::read_from(&buf[1..1 + HeapRef::SIZE]);
				OptimizedString::Heap(r, PhantomData)
			}
			other => unreachable!("corrupt OptimizedString tag byte {}", other),
		}
	}
}
