//! The domain schema: posts (indexed by id in a B-tree, each owning a
//! comment list) and the strings heap backing long `user`/`title`/`content`
//! fields. This is the layer the public API in `driver.rs` actually calls
//! into once a transaction has a live master block.

use std::io::Write;

use byteorder::{LittleEndian, ByteOrder};

use alloc::Allocator;
use containers::{BTree, BTreeAnchor, BTreeRecord, BTreeSeek, Heap, HeapRef, List, ListAnchor, ListItem, ListSeek};
use engine::Engine;
use error::{ErrorKind, Result};
use string::{OptimizedString, TitleCap, UserCap};
use tracked::Tracked;

/// Persistent state owned by the store: the monotonic post id counter, the
/// posts B-tree anchor. The strings heap has no anchor of its own since
/// `Heap` keeps no state beyond the allocator it's handed at each call —
/// every `HeapRef` is independently dereferenceable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAnchor {
	next_post_id: u64,
	posts: BTreeAnchor,
}

impl StoreAnchor {
	pub const SIZE: usize = 8 + BTreeAnchor::SIZE;

	pub fn empty() -> Self {
		StoreAnchor { next_post_id: 1, posts: BTreeAnchor::empty() }
	}

	pub fn next_post_id(&self) -> u64 {
		self.next_post_id
	}

	pub fn write_to(&self, buf: &mut [u8]) {
		LittleEndian::write_u64(&mut buf[0..8], self.next_post_id);
		self.posts.write_to(&mut buf[8..8 + BTreeAnchor::SIZE]);
	}

	pub fn read_from(buf: &[u8]) -> Self {
		StoreAnchor {
			next_post_id: LittleEndian::read_u64(&buf[0..8]),
			posts: BTreeAnchor::read_from(&buf[8..8 + BTreeAnchor::SIZE]),
		}
	}
}

/// On-disk post record. `user`/`title` are small-string-optimized; `content`
/// always lives on the heap (its length is never capped); `comments` is
/// the anchor of this post's doubly linked comment list.
#[derive(Debug, Clone, Copy)]
struct PostRecord {
	id: u64,
	created_at: u64,
	user: OptimizedString<UserCap>,
	title: OptimizedString<TitleCap>,
	content: HeapRef,
	comments: ListAnchor,
}

impl BTreeRecord for PostRecord {
	fn key(&self) -> u64 {
		self.id
	}

	fn encoded_size() -> usize {
		8 + 8 + OptimizedString::<UserCap>::encoded_size() + OptimizedString::<TitleCap>::encoded_size()
			+ HeapRef::SIZE + ListAnchor::SIZE
	}

	fn encode(&self, buf: &mut [u8]) {
		let user_size = OptimizedString::<UserCap>::encoded_size();
		let title_size = OptimizedString::<TitleCap>::encoded_size();

		let mut off = 0;
		LittleEndian::write_u64(&mut buf[off..off + 8], self.id);
		off += 8;
		LittleEndian::write_u64(&mut buf[off..off + 8], self.created_at);
		off += 8;
		self.user.encode(&mut buf[off..off + user_size]);
		off += user_size;
		self.title.encode(&mut buf[off..off + title_size]);
		off += title_size;
		self.content.write_to(&mut buf[off..off + HeapRef::SIZE]);
		off += HeapRef::SIZE;
		self.comments.write_to(&mut buf[off..off + ListAnchor::SIZE]);
	}

	fn decode(buf: &[u8]) -> Self {
		let user_size = OptimizedString::<UserCap>::encoded_size();
		let title_size = OptimizedString::<TitleCap>::encoded_size();

		let mut off = 0;
		let id = LittleEndian::read_u64(&buf[off..off + 8]);
		off += 8;
		let created_at = LittleEndian::read_u64(&buf[off..off + 8]);
		off += 8;
		let user = OptimizedString::decode(&buf[off..off + user_size]);
		off += user_size;
		let title = OptimizedString::decode(&buf[off..off + title_size]);
		off += title_size;
		let content = HeapRef::read_from(&buf[off..off + HeapRef::SIZE]);
		off += HeapRef::SIZE;
		let comments = ListAnchor::read_from(&buf[off..off + ListAnchor::SIZE]);

		PostRecord { id, created_at, user, title, content, comments }
	}
}

/// On-disk comment record. Comments have no id of their own and live in
/// exactly one list.
#[derive(Debug, Clone, Copy)]
struct CommentRecord {
	created_at: u64,
	user: OptimizedString<UserCap>,
	content: HeapRef,
}

impl ListItem for CommentRecord {
	fn encoded_size() -> usize {
		8 + OptimizedString::<UserCap>::encoded_size() + HeapRef::SIZE
	}

	fn encode(&self, buf: &mut [u8]) {
		let user_size = OptimizedString::<UserCap>::encoded_size();

		let mut off = 0;
		LittleEndian::write_u64(&mut buf[off..off + 8], self.created_at);
		off += 8;
		self.user.encode(&mut buf[off..off + user_size]);
		off += user_size;
		self.content.write_to(&mut buf[off..off + HeapRef::SIZE]);
	}

	fn decode(buf: &[u8]) -> Self {
		let user_size = OptimizedString::<UserCap>::encoded_size();

		let mut off = 0;
		let created_at = LittleEndian::read_u64(&buf[off..off + 8]);
		off += 8;
		let user = OptimizedString::decode(&buf[off..off + user_size]);
		off += user_size;
		let content = HeapRef::read_from(&buf[off..off + HeapRef::SIZE]);

		CommentRecord { created_at, user, content }
	}
}

/// A decoded comment, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
	pub created_at: u64,
	pub user: String,
	pub content: String,
}

/// A post's headline fields, as returned by `fetch_frontpage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
	pub id: u64,
	pub created_at: u64,
	pub user: String,
	pub title: String,
}

/// A post's full contents plus its newest-first comments, as returned by
/// `fetch_post`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
	pub id: u64,
	pub created_at: u64,
	pub user: String,
	pub title: String,
	pub content: String,
	pub comments: Vec<CommentView>,
}

/// A live view of the domain schema over a given anchor, mutating it in
/// place. The owner (`driver.rs`) is responsible for writing the mutated
/// anchor back to the master block.
pub struct Store<'a> {
	anchor: &'a mut StoreAnchor,
}

impl<'a> Store<'a> {
	pub fn open(anchor: &'a mut StoreAnchor) -> Self {
		Store { anchor }
	}

	/// Creates a post, returning its freshly assigned id.
	pub fn create_post(
		&mut self,
		engine: &mut Engine,
		alloc: &mut Allocator,
		user: &str,
		title: &str,
		content: &str,
		created_at: u64,
	) -> Result<u64> {
		let id = self.anchor.next_post_id;
		if id == 0 {
			return Err(ErrorKind::IdSpaceExhausted.into());
		}

		let user = OptimizedString::<UserCap>::store(engine, alloc, user)?;
		let title = OptimizedString::<TitleCap>::store(engine, alloc, title)?;
		let content = Heap::store(engine, alloc, content.as_bytes())?;

		let post = PostRecord {
			id,
			created_at,
			user,
			title,
			content,
			comments: ListAnchor::empty(),
		};

		let mut tree = BTree::open(&mut self.anchor.posts);
		tree.insert(engine, alloc, post)?;

		self.anchor.next_post_id = id.checked_add(1).ok_or(ErrorKind::IdSpaceExhausted)?;

		Ok(id)
	}

	/// Appends a comment to `post_id`'s comment list. Fails with `NotFound`
	/// if no such post exists.
	pub fn create_comment(
		&mut self,
		engine: &mut Engine,
		alloc: &mut Allocator,
		post_id: u64,
		user: &str,
		content: &str,
		created_at: u64,
	) -> Result<()> {
		let mut tree: BTree<PostRecord> = BTree::open(&mut self.anchor.posts);
		let cursor = tree.find(engine, post_id)?.ok_or(ErrorKind::NotFound)?;
		let mut post = cursor.get(engine)?.expect("cursor returned by find() is always positioned on an item; qed");

		let user = OptimizedString::<UserCap>::store(engine, alloc, user)?;
		let content = Heap::store(engine, alloc, content.as_bytes())?;
		let comment = CommentRecord { created_at, user, content };

		let mut comments = Tracked::new(post.comments);
		{
			let mut list: List<CommentRecord> = List::open(comments.get_mut());
			list.push_back(engine, alloc, comment)?;
		}

		if comments.changed() {
			post.comments = comments.into_inner();
			cursor.set(engine, post)?;
		}

		Ok(())
	}

	/// Returns up to `max_posts` posts, newest id first.
	pub fn fetch_frontpage(&mut self, engine: &mut Engine, max_posts: usize) -> Result<Vec<PostSummary>> {
		let mut tree: BTree<PostRecord> = BTree::open(&mut self.anchor.posts);
		let mut out = Vec::new();

		let mut cursor = match tree.create_cursor(engine, BTreeSeek::Max)? {
			Some(c) => c,
			None => return Ok(out),
		};

		while out.len() < max_posts {
			let post = cursor.get(engine)?.expect("positioned cursor always yields an item; qed");
			out.push(PostSummary {
				id: post.id,
				created_at: post.created_at,
				user: post.user.load(engine)?,
				title: post.title.load(engine)?,
			});

			if !cursor.move_prev(engine)? {
				break;
			}
		}

		Ok(out)
	}

	/// Fetches a post's full contents and up to `max_comments` of its most
	/// recent comments. Fails with `NotFound` if `post_id` does not exist.
	pub fn fetch_post(&mut self, engine: &mut Engine, post_id: u64, max_comments: usize) -> Result<PostDetail> {
		let mut tree: BTree<PostRecord> = BTree::open(&mut self.anchor.posts);
		let cursor = tree.find(engine, post_id)?.ok_or(ErrorKind::NotFound)?;
		let post = cursor.get(engine)?.expect("cursor returned by find() is always positioned on an item; qed");

		let original_comments = post.comments;
		let mut comments = Vec::new();
		{
			let mut anchor_copy = post.comments;
			let list: List<CommentRecord> = List::open(&mut anchor_copy);
			if let Some(mut c) = list.create_cursor(ListSeek::Back) {
				loop {
					if comments.len() >= max_comments {
						break;
					}
					let item = c.get(engine)?.expect("positioned cursor always yields an item; qed");
					let content_bytes = Heap::load(engine, item.content)?;
					let content = String::from_utf8(content_bytes).map_err(|_| {
						ErrorKind::InternalInvariant("comment content is not valid UTF-8".into())
					})?;
					comments.push(CommentView {
						created_at: item.created_at,
						user: item.user.load(engine)?,
						content,
					});
					if !c.move_prev(engine)? {
						break;
					}
				}
			}
			if anchor_copy != original_comments {
				return Err(ErrorKind::InternalInvariant(
					"fetch_post mutated the comment list anchor on a read-only path".into()).into());
			}
		}

		let content_bytes = Heap::load(engine, post.content)?;
		let content = String::from_utf8(content_bytes)
			.map_err(|_| ErrorKind::InternalInvariant("post content is not valid UTF-8".into()))?;

		Ok(PostDetail {
			id: post.id,
			created_at: post.created_at,
			user: post.user.load(engine)?,
			title: post.title.load(engine)?,
			content,
			comments,
		})
	}

	/// Writes a human-readable snapshot of the store: one line per post
	/// (id, created_at, user, title, comment count).
	pub fn dump<W: Write>(&mut self, engine: &mut Engine, w: &mut W) -> Result<()> {
		writeln!(w, "next_post_id={}", self.anchor.next_post_id)?;

		let mut tree: BTree<PostRecord> = BTree::open(&mut self.anchor.posts);
		let mut cursor = match tree.create_cursor(engine, BTreeSeek::Min)? {
			Some(c) => c,
			None => return Ok(()),
		};

		loop {
			let post = cursor.get(engine)?.expect("positioned cursor always yields an item; qed");
			let user = post.user.load(engine)?;
			let title = post.title.load(engine)?;
			writeln!(
				w,
				"post id={} created_at={} user={:?} title={:?} comments={}",
				post.id, post.created_at, user, title, post.comments.len()
			)?;

			if !cursor.move_next(engine)? {
				break;
			}
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
	use error::ErrorKind;
	use super::{Store, StoreAnchor};

	fn setup() -> (TempDir, Engine) {
		let temp = TempDir::new("test_store").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 64, true).unwrap();
		engine.grow(1).unwrap();
		(temp, engine)
	}

	#[test]
	fn test_create_post_assigns_increasing_ids() {
		let (_temp, mut engine) = setup();
		let mut alloc_anchor = AllocatorAnchor::new(1);
		let mut store_anchor = StoreAnchor::empty();

		let mut ids = Vec::new();
		for i in 0..3u64 {
			let mut alloc = Allocator::open(&mut alloc_anchor);
			let mut store = Store::open(&mut store_anchor);
			let id = store.create_post(&mut engine, &mut alloc, "u", "t", "c", 1000 + i).unwrap();
			ids.push(id);
		}

		assert_eq!(ids, vec![1, 2, 3]);
	}

	#[test]
	fn test_fetch_post_roundtrips_fields() {
		let (_temp, mut engine) = setup();
		let mut alloc_anchor = AllocatorAnchor::new(1);
		let mut store_anchor = StoreAnchor::empty();

		let id = {
			let mut alloc = Allocator::open(&mut alloc_anchor);
			let mut store = Store::open(&mut store_anchor);
			store.create_post(&mut engine, &mut alloc, "alice", "hi", "hello world", 42).unwrap()
		};

		let mut store = Store::open(&mut store_anchor);
		let detail = store.fetch_post(&mut engine, id, 10).unwrap();
		assert_eq!(detail.id, 1);
		assert_eq!(detail.user, "alice");
		assert_eq!(detail.title, "hi");
		assert_eq!(detail.content, "hello world");
		assert_eq!(detail.created_at, 42);
		assert!(detail.comments.is_empty());
	}

	#[test]
	fn test_fetch_post_missing_is_not_found() {
		let (_temp, mut engine) = setup();
		let mut store_anchor = StoreAnchor::empty();
		let mut store = Store::open(&mut store_anchor);

		match store.fetch_post(&mut engine, 999, 10).unwrap_err().kind() {
			&ErrorKind::NotFound => (),
			other => panic!("expected NotFound, got {:?}", other),
		}
	}

	#[test]
	fn test_comments_are_newest_first() {
		let (_temp, mut engine) = setup();
		let mut alloc_anchor = AllocatorAnchor::new(1);
		let mut store_anchor = StoreAnchor::empty();

		let id = {
			let mut alloc = Allocator::open(&mut alloc_anchor);
			let mut store = Store::open(&mut store_anchor);
			store.create_post(&mut engine, &mut alloc, "u", "t", "c", 1).unwrap()
		};

		for (user, content) in &[("carol", "nice"), ("dave", "+1")] {
			let mut alloc = Allocator::open(&mut alloc_anchor);
			let mut store = Store::open(&mut store_anchor);
			store.create_comment(&mut engine, &mut alloc, id, user, content, 2).unwrap();
		}

		let mut store = Store::open(&mut store_anchor);
		let detail = store.fetch_post(&mut engine, id, 10).unwrap();
		let users: Vec<&str> = detail.comments.iter().map(|c| c.user.as_str()).collect();
		assert_eq!(users, vec!["dave", "carol"]);
	}

	#[test]
	fn test_create_comment_on_missing_post_is_not_found() {
		let (_temp, mut engine) = setup();
		let mut alloc_anchor = AllocatorAnchor::new(1);
		let mut store_anchor = StoreAnchor::empty();

		let mut alloc = Allocator::open(&mut alloc_anchor);
		let mut store = Store::open(&mut store_anchor);

		match store.create_comment(&mut engine, &mut alloc, 999, "x", "y", 1).unwrap_err().kind() {
			&ErrorKind::NotFound => (),
			other => panic!("expected NotFound, got {:?}", other),
		}
	}

	#[test]
	fn test_fetch_frontpage_orders_newest_first_and_respects_limit() {
		let (_temp, mut engine) = setup();
		let mut alloc_anchor = AllocatorAnchor::new(1);
		let mut store_anchor = StoreAnchor::empty();

		for i in 0..5u64 {
			let mut alloc = Allocator::open(&mut alloc_anchor);
			let mut store = Store::open(&mut store_anchor);
			store.create_post(&mut engine, &mut alloc, "u", "t", "c", i).unwrap();
		}

		let mut store = Store::open(&mut store_anchor);
		let page = store.fetch_frontpage(&mut engine, 3).unwrap();
		let ids: Vec<u64> = page.iter().map(|p| p.id).collect();
		assert_eq!(ids, vec![5, 4, 3]);
	}
}
