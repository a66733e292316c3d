//! Owner-partitioned memo index ordered newest first.

use crate::error::{Result, StoreError};
use crate::types::{Memo, MemoId, OwnerId, Timestamp};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Sort key inside an owner partition: newest `created_at` first, later
/// insertion first on ties.
type OrderKey = (Reverse<Timestamp>, Reverse<u64>);

struct Entry {
    memo: Memo,
    /// Insertion order (assigned by collection).
    seq: u64,
}

/// In-memory memo collection.
///
/// Not synchronized; the store guards it with its own lock.
#[derive(Default)]
pub struct MemoCollection {
    /// Memo ID to document.
    docs: HashMap<MemoId, Entry>,

    /// Owner to ordered memo IDs.
    by_owner: HashMap<OwnerId, BTreeMap<OrderKey, MemoId>>,

    /// Next insertion sequence.
    next_seq: u64,

    /// Largest `created_at` ever inserted (survives deletes).
    last_created: Timestamp,
}

impl MemoCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new memo. Fails if the id is already present.
    pub fn insert(&mut self, memo: Memo) -> Result<()> {
        if self.docs.contains_key(&memo.id) {
            return Err(StoreError::Corruption(format!(
                "duplicate memo id {}",
                memo.id
            )));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.last_created = self.last_created.max(memo.created_at);

        self.by_owner
            .entry(memo.owner_id.clone())
            .or_default()
            .insert((Reverse(memo.created_at), Reverse(seq)), memo.id.clone());
        self.docs.insert(memo.id.clone(), Entry { memo, seq });

        Ok(())
    }

    /// Replace title and content of an existing memo.
    pub fn patch(&mut self, id: &MemoId, title: &str, content: &str) -> Result<Memo> {
        let entry = self
            .docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        entry.memo.title = title.to_string();
        entry.memo.content = content.to_string();

        Ok(entry.memo.clone())
    }

    /// Remove a memo, returning it.
    pub fn remove(&mut self, id: &MemoId) -> Result<Memo> {
        let entry = self
            .docs
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let owner = &entry.memo.owner_id;
        if let Some(partition) = self.by_owner.get_mut(owner) {
            partition.remove(&(Reverse(entry.memo.created_at), Reverse(entry.seq)));
            if partition.is_empty() {
                self.by_owner.remove(owner);
            }
        }

        Ok(entry.memo)
    }

    pub fn get(&self, id: &MemoId) -> Option<&Memo> {
        self.docs.get(id).map(|e| &e.memo)
    }

    pub fn contains(&self, id: &MemoId) -> bool {
        self.docs.contains_key(id)
    }

    /// All memos of `owner`, newest first.
    pub fn snapshot(&self, owner: &OwnerId) -> Vec<Memo> {
        self.by_owner
            .get(owner)
            .map(|partition| {
                partition
                    .values()
                    .filter_map(|id| self.docs.get(id))
                    .map(|e| e.memo.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All memos in insertion order (for journal rewrites).
    pub fn ordered(&self) -> Vec<&Memo> {
        let mut entries: Vec<&Entry> = self.docs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.memo).collect()
    }

    /// Largest creation timestamp seen so far.
    pub fn last_created(&self) -> Timestamp {
        self.last_created
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn owner_count(&self) -> usize {
        self.by_owner.len()
    }
}
