//! Block-oriented, write-ahead-journaled transactional object store backing
//! a small microblogging demo ("posts with comments").
//!
//! The hard engineering here is not the demo's data model: it's the
//! persistence substrate underneath it — a cached, journaled, transactional
//! block store with a B-tree index, a blob heap, and per-record linked
//! lists, all rooted at a single master anchor block.
//!
//! ```text
//!  block 0           posts B-tree              strings heap
//!   /                  /                         /
//! |magic|ver|alloc|store| -> |post 1|post 2|...| -> |blob|blob|...|
//! ```
//!
//! Every post owns a doubly linked list of comments; the list's anchor
//! lives inline in the post record, so appending a comment also rewrites
//! the owning post.
//!
//! `Database::open` is the only entry point; a single writer mutex
//! serializes every operation (see `driver::Database`).

#![warn(missing_docs)]

extern crate byteorder;
#[macro_use]
extern crate error_chain;
extern crate fs2;
extern crate hex_slice;
#[macro_use]
extern crate log;
extern crate parking_lot;
extern crate tiny_keccak;
#[cfg(test)]
#[macro_use]
extern crate matches;
#[cfg(test)]
#[macro_use]
extern crate quickcheck;

mod alloc;
mod block;
mod cache;
mod containers;
mod driver;
mod engine;
mod error;
mod journal;
mod master;
mod store;
mod string;
mod tracked;

pub use driver::{Database, Options};
pub use error::{Error, ErrorKind, Result};
pub use store::{CommentView, PostDetail, PostSummary};
