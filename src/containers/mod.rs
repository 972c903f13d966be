//! On-disk container types layered on top of the space allocator: an
//! ordered index (`btree`), an append/iterate sequence (`list`), and an
//! unordered blob store (`heap`). The domain schema in `store.rs` composes
//! these rather than encoding records ad hoc.

pub mod btree;
pub mod heap;
pub mod list;

pub use self::btree::{BTree, BTreeAnchor, Record as BTreeRecord, Seek as BTreeSeek};
pub use self::heap::{Heap, HeapRef};
pub use self::list::{List, ListAnchor, ListItem, Seek as ListSeek};
