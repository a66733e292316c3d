//! Memo collection.
//!
//! Documents are kept in memory, partitioned by owner and ordered by
//! creation time so owner snapshots come out sorted without a scan.

mod index;

pub use index::MemoCollection;
