//! gerview-core — the local review store.
//!
//! A WAL-mode SQLite replica of one review server's data: revisions, file
//! listings, raw diff payloads, published comments, and locally-created
//! drafts. The engine crate consumes this as its only server boundary; how
//! the replica is synchronized with the actual server is out of scope here.

pub mod db;
pub mod schema;
pub mod types;
