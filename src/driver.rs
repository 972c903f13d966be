//! The public API: `Database`, `Options`, and the transaction driver that
//! wraps every domain operation with begin/commit/rollback and the
//! master-block re-serialization dance.

use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use alloc::Allocator;
use engine::Engine;
use error::{ErrorKind, Result};
use master::{self, MasterBlock};
use store::{PostDetail, PostSummary, Store};
use tracked::Tracked;

/// Knobs accepted by `Database::open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
	/// Number of blocks pinned in the engine's cache. Larger means more
	/// RAM, fewer reads.
	pub cache_blocks: u32,
	/// Whether `commit()` fsyncs the journal before returning. `false`
	/// trades durability for speed.
	pub sync_on_commit: bool,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			cache_blocks: 256,
			sync_on_commit: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InternalOptions {
	pub external: Options,
}

impl InternalOptions {
	pub fn from_external(external: Options) -> Result<Self> {
		if external.cache_blocks == 0 {
			return Err(ErrorKind::InvalidOptions("cache_blocks", "must be greater than 0".into()).into());
		}

		Ok(InternalOptions { external })
	}
}

fn now_unix_seconds() -> Result<u64> {
	let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| ErrorKind::ClockError)?;
	Ok(since_epoch.as_secs())
}

/// A handle to an open database. Copy-construction and assignment are
/// forbidden (there is no `Clone`/`Copy` impl).
pub struct Database {
	options: InternalOptions,
	writer: Mutex<()>,
	engine: Option<Engine>,
}

impl Database {
	/// Opens the database file at `path`, creating and initializing it if
	/// it doesn't exist yet.
	pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
		let options = InternalOptions::from_external(options)?;

		let exists = path.as_ref().exists();
		let mut engine = if exists {
			Engine::open(&path, options.external.cache_blocks, options.external.sync_on_commit)?
		} else {
			Engine::create(&path, options.external.cache_blocks, options.external.sync_on_commit)?
		};

		if engine.size() == 0 {
			master::init(&mut engine)?;
			engine.checkpoint()?;
		} else {
			master::verify(&mut engine)?;
		}

		Ok(Database {
			options,
			writer: Mutex::new(()),
			engine: Some(engine),
		})
	}

	/// Creates a post, returning its freshly assigned id.
	pub fn create_post(&mut self, user: &str, title: &str, content: &str) -> Result<u64> {
		let created_at = now_unix_seconds()?;
		self.run_in_transaction(|engine, alloc, store| {
			store.create_post(engine, alloc, user, title, content, created_at)
		})
	}

	/// Appends a comment to `post_id`'s comment list.
	pub fn create_comment(&mut self, post_id: u64, user: &str, content: &str) -> Result<()> {
		let created_at = now_unix_seconds()?;
		self.run_in_transaction(|engine, alloc, store| {
			store.create_comment(engine, alloc, post_id, user, content, created_at)
		})
	}

	/// Returns up to `max_posts` posts, newest id first.
	pub fn fetch_frontpage(&mut self, max_posts: usize) -> Result<Vec<PostSummary>> {
		self.run_in_transaction(|engine, _alloc, store| store.fetch_frontpage(engine, max_posts))
	}

	/// Fetches a post's full contents and up to `max_comments` of its most
	/// recent comments.
	pub fn fetch_post(&mut self, post_id: u64, max_comments: usize) -> Result<PostDetail> {
		self.run_in_transaction(|engine, _alloc, store| store.fetch_post(engine, post_id, max_comments))
	}

	/// Writes a human-readable snapshot of the allocator and store state.
	pub fn dump<W: Write>(&mut self, w: &mut W) -> Result<()> {
		self.run_in_transaction(|engine, alloc, store| {
			writeln!(w, "high_water_mark={} free_count={}", alloc.high_water_mark(), alloc.free_count())?;
			for block in alloc.free_blocks(engine)? {
				writeln!(w, "free block={}", block)?;
			}
			store.dump(engine, w)
		})
	}

	/// Runs a final checkpoint (if needed) and removes the journal file.
	/// After this, every other method fails with `ShutDown`. Calling this
	/// twice fails with `AlreadyClosed`.
	pub fn finish(&mut self) -> Result<()> {
		let _guard = self.writer.lock();
		match self.engine.take() {
			Some(engine) => engine.close(),
			None => Err(ErrorKind::AlreadyClosed.into()),
		}
	}

	/// Wraps a domain operation in a transaction: acquires the single
	/// writer lock, begins a transaction, materializes the master block,
	/// opens the allocator and store on its anchors, runs `f`, writes the
	/// master block back if its anchors changed, and commits or rolls
	/// back. Nested handles are all dropped before `commit`/`rollback` is
	/// called, per invariant I7.
	fn run_in_transaction<R, F>(&mut self, f: F) -> Result<R>
	where
		F: FnOnce(&mut Engine, &mut Allocator, &mut Store) -> Result<R>,
	{
		let _guard = self.writer.lock();
		let engine = match self.engine.as_mut() {
			Some(engine) => engine,
			None => return Err(ErrorKind::ShutDown.into()),
		};

		engine.begin()?;

		let result = run_body(engine, f);

		match result {
			Ok(value) => {
				engine.commit()?;
				engine.checkpoint_if_needed()?;
				Ok(value)
			}
			Err(err) => {
				engine.rollback()?;
				Err(err)
			}
		}
	}
}

/// Free function (rather than a method) so the nested `master`/`alloc`/
/// `store` views — all borrowing `engine` — are dropped before
/// `run_in_transaction` touches `engine` again for `commit`/`rollback`.
fn run_body<R, F>(engine: &mut Engine, f: F) -> Result<R>
where
	F: FnOnce(&mut Engine, &mut Allocator, &mut Store) -> Result<R>,
{
	let master = MasterBlock::read(engine)?;
	let mut tracked = Tracked::new(master);

	let result = {
		let master = tracked.get_mut();
		let mut alloc = Allocator::open(&mut master.allocator);
		let mut store = Store::open(&mut master.store);
		f(engine, &mut alloc, &mut store)
	};

	if tracked.changed() {
		tracked.into_inner().write(engine)?;
	}

	result
}

impl Drop for Database {
	fn drop(&mut self) {
		if let Some(engine) = self.engine.take() {
			let _ = engine.close();
		}
	}
}
