//! The well-known block 0: magic header, format version, allocator anchor
//! and store anchor. All persistent state is reachable transitively from
//! here, so opening the database is just "read block 0, construct live
//! views over the anchors it holds".

use alloc::AllocatorAnchor;
use block::BlockId;
use engine::Engine;
use error::{ErrorKind, Result};
use store::StoreAnchor;

/// Identifies the file format. Written at byte offset 0 of block 0.
pub const MAGIC: &'static [u8; 10] = b"BLABBER_DB";

/// Current on-disk format version.
pub const VERSION: u32 = 1;

const MASTER_BLOCK: BlockId = 0;

/// In-memory master block: the two anchors everything else hangs off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterBlock {
	pub allocator: AllocatorAnchor,
	pub store: StoreAnchor,
}

impl MasterBlock {
	/// A fresh master block for a database that has just been initialized.
	/// Block 0 itself counts as reserved, so the allocator starts handing
	/// out block 1.
	fn fresh() -> Self {
		MasterBlock {
			allocator: AllocatorAnchor::new(1),
			store: StoreAnchor::empty(),
		}
	}

	pub fn read(engine: &mut Engine) -> Result<Self> {
		let r = engine.read(MASTER_BLOCK)?;
		bytes::read(&r.data())
	}

	pub fn write(&self, engine: &mut Engine) -> Result<()> {
		let mut b = engine.read_mut(MASTER_BLOCK)?;
		let mut data = b.data_mut();
		bytes::write(&mut data, self);
		Ok(())
	}
}

/// Initializes a virgin (zero-block) database file: grows it by one block,
/// writes a fresh master block inside its own transaction (so it is
/// actually journaled rather than just sitting dirty in the cache), and
/// returns it. The caller is still responsible for checkpointing
/// afterwards so the file is self-sufficient even if the journal is
/// discarded before anything else commits.
pub fn init(engine: &mut Engine) -> Result<MasterBlock> {
	debug_assert_eq!(engine.size(), 0, "init() called on a non-empty database file");
	engine.grow(1)?;
	let master = MasterBlock::fresh();

	engine.begin()?;
	master.write(engine)?;
	engine.commit()?;

	Ok(master)
}

/// Reads block 0 of an existing database and checks its header, failing if
/// the magic or version don't match.
pub fn verify(engine: &mut Engine) -> Result<MasterBlock> {
	let r = engine.read(MASTER_BLOCK)?;
	let data = r.data();

	let found_magic = &data[bytes::MAGIC_OFFSET..bytes::MAGIC_OFFSET + MAGIC.len()];
	if found_magic != &MAGIC[..] {
		return Err(ErrorKind::InvalidFormat(found_magic.to_vec()).into());
	}

	let found_version = bytes::read_version(&data);
	if found_version != VERSION {
		return Err(ErrorKind::UnsupportedVersion(VERSION, found_version).into());
	}

	drop(data);
	drop(r);
	MasterBlock::read(engine)
}

/// Master block byte layout manipulation, kept separate from the logical
/// `MasterBlock` struct above it.
mod bytes {
	use byteorder::{LittleEndian, ByteOrder};

	use alloc::AllocatorAnchor;
	use store::StoreAnchor;
	use super::{MasterBlock, MAGIC, VERSION};

	pub const MAGIC_OFFSET: usize = 0;
	pub const VERSION_OFFSET: usize = MAGIC_OFFSET + 10;
	pub const ALLOCATOR_OFFSET: usize = VERSION_OFFSET + 4;
	pub const STORE_OFFSET: usize = ALLOCATOR_OFFSET + AllocatorAnchor::SIZE;
	pub const TOTAL_SIZE: usize = STORE_OFFSET + StoreAnchor::SIZE;

	// The master block's magic must live at the very front of block 0; this
	// is asserted statically rather than just documented.
	#[allow(dead_code)]
	const _ASSERT_MAGIC_AT_BLOCK_START: [(); 1] = [(); 1 - (MAGIC_OFFSET != 0) as usize];

	pub fn read_version(buf: &[u8]) -> u32 {
		LittleEndian::read_u32(&buf[VERSION_OFFSET..VERSION_OFFSET + 4])
	}

	pub fn read(buf: &[u8]) -> super::Result<MasterBlock> {
		debug_assert!(buf.len() >= TOTAL_SIZE);
		let allocator = AllocatorAnchor::read_from(&buf[ALLOCATOR_OFFSET..STORE_OFFSET]);
		let store = StoreAnchor::read_from(&buf[STORE_OFFSET..TOTAL_SIZE]);
		Ok(MasterBlock { allocator, store })
	}

	pub fn write(buf: &mut [u8], master: &MasterBlock) {
		debug_assert!(buf.len() >= TOTAL_SIZE);
		buf[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()].copy_from_slice(&MAGIC[..]);
		LittleEndian::write_u32(&mut buf[VERSION_OFFSET..VERSION_OFFSET + 4], VERSION);
		master.allocator.write_to(&mut buf[ALLOCATOR_OFFSET..STORE_OFFSET]);
		master.store.write_to(&mut buf[STORE_OFFSET..TOTAL_SIZE]);
	}
}

#[cfg(test)]
mod tests {
	extern crate tempdir;

	use self::tempdir::TempDir;
	use engine::Engine;
	use error::ErrorKind;
	use super::{init, verify, MAGIC};

	#[test]
	fn test_init_then_verify_roundtrips() {
		let temp = TempDir::new("test_master_init").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();

		let master = init(&mut engine).unwrap();
		assert_eq!(master.store.next_post_id(), 1);

		let verified = verify(&mut engine).unwrap();
		assert_eq!(verified, master);
	}

	#[test]
	fn test_init_is_durable_even_without_a_later_commit() {
		// init() must journal its write itself: a caller that checkpoints
		// right after init() and never performs another transaction must
		// still see a valid master block after a crash/drop and reopen.
		let temp = TempDir::new("test_master_init_durable").unwrap();
		let path = temp.path().join("db");

		{
			let mut engine = Engine::create(&path, 16, true).unwrap();
			init(&mut engine).unwrap();
			engine.checkpoint().unwrap();
			// No further transaction runs before the engine is dropped.
		}

		let mut reopened = Engine::open(&path, 16, true).unwrap();
		verify(&mut reopened).unwrap();
	}

	#[test]
	fn test_verify_rejects_bad_magic() {
		let temp = TempDir::new("test_master_bad_magic").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();
		init(&mut engine).unwrap();

		{
			let mut b = engine.read_mut(0).unwrap();
			let mut data = b.data_mut();
			data[0..MAGIC.len()].copy_from_slice(b"NOT_A_DB\0\0");
		}

		match verify(&mut engine).unwrap_err().kind() {
			&ErrorKind::InvalidFormat(_) => (),
			other => panic!("expected InvalidFormat, got {:?}", other),
		}
	}

	#[test]
	fn test_verify_rejects_bad_version() {
		use byteorder::{LittleEndian, ByteOrder};

		let temp = TempDir::new("test_master_bad_version").unwrap();
		let path = temp.path().join("db");
		let mut engine = Engine::create(&path, 16, true).unwrap();
		init(&mut engine).unwrap();

		{
			let mut b = engine.read_mut(0).unwrap();
			let mut data = b.data_mut();
			LittleEndian::write_u32(&mut data[10..14], 99);
		}

		match verify(&mut engine).unwrap_err().kind() {
			&ErrorKind::UnsupportedVersion(1, 99) => (),
			other => panic!("expected UnsupportedVersion, got {:?}", other),
		}
	}
}
