//! Main MemoStore tying collection, journal and subscriptions together.

use crate::collection::MemoCollection;
use crate::error::{Result, StoreError};
use crate::journal::{Journal, JournalEntry, JournalOp};
use crate::subscriptions::{
    DropReason, Snapshot, SubscriptionConfig, SubscriptionHandle, SubscriptionManager, Watch,
};
use crate::types::{Memo, MemoColor, MemoId, OwnerId, StoreStats};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base path for the store (ignored by in-memory stores).
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Per-subscription snapshot buffer.
    pub subscription_buffer: usize,

    /// fsync the journal after every write.
    pub sync_writes: bool,

    /// Rewrite the journal once it holds this many entries (0 = never).
    pub compact_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./memos"),
            create_if_missing: true,
            subscription_buffer: 1000,
            sync_writes: true,
            compact_threshold: 10_000,
        }
    }
}

impl StoreConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: StoreConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription_buffer == 0 {
            return Err(StoreError::Config(
                "subscription_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            buffer_size: self.subscription_buffer,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"MEM\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const JOURNAL_FILE: &str = "memos.journal";

/// The memo document store.
///
/// Provides:
/// - Owner-filtered, newest-first live subscriptions delivering full snapshots
/// - Create, update and delete acknowledged once durable
/// - Optional on-disk persistence through an append-only journal
///
/// All mutations and subscription setups are serialized by one write lock,
/// so each subscriber sees snapshots in mutation order.
pub struct MemoStore {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access (persistent stores only).
    _lock_file: Option<File>,

    /// Mutation journal (persistent stores only).
    journal: Option<Journal>,

    /// Current documents.
    memos: RwLock<MemoCollection>,

    /// Live subscriptions.
    subscriptions: Arc<SubscriptionManager>,

    /// Mutations applied by this instance.
    revision: AtomicU64,

    closed: AtomicBool,

    /// Lock for write operations to ensure atomicity.
    write_lock: Mutex<()>,
}

impl MemoStore {
    /// A store with no disk backing and default settings.
    pub fn in_memory() -> Self {
        Self::in_memory_with(StoreConfig::default())
    }

    /// A store with no disk backing; `config.path` is ignored.
    pub fn in_memory_with(config: StoreConfig) -> Self {
        Self::from_parts(config, None, None, MemoCollection::new())
    }

    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        let (journal, entries) = Journal::open(config.path.join(JOURNAL_FILE), config.sync_writes)?;
        let memos = Self::replay(entries)?;

        info!(path = %config.path.display(), "created memo store");
        Ok(Self::from_parts(config, Some(lock_file), Some(journal), memos))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let (journal, entries) = Journal::open(config.path.join(JOURNAL_FILE), config.sync_writes)?;
        let replayed = entries.len();
        let memos = Self::replay(entries)?;

        info!(
            path = %config.path.display(),
            entries = replayed,
            memos = memos.len(),
            "opened memo store"
        );
        Ok(Self::from_parts(config, Some(lock_file), Some(journal), memos))
    }

    fn from_parts(
        config: StoreConfig,
        lock_file: Option<File>,
        journal: Option<Journal>,
        memos: MemoCollection,
    ) -> Self {
        Self {
            config,
            _lock_file: lock_file,
            journal,
            memos: RwLock::new(memos),
            subscriptions: Arc::new(SubscriptionManager::new()),
            revision: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Rebuild the collection from journal entries.
    fn replay(entries: Vec<JournalEntry>) -> Result<MemoCollection> {
        let mut memos = MemoCollection::new();
        for entry in entries {
            let applied = match entry.op {
                JournalOp::Insert(memo) => memos.insert(memo),
                JournalOp::Patch { id, title, content } => {
                    memos.patch(&id, &title, &content).map(|_| ())
                }
                JournalOp::Remove { id } => memos.remove(&id).map(|_| ()),
            };
            applied.map_err(|e| {
                StoreError::Corruption(format!("journal entry {} does not apply: {}", entry.seq, e))
            })?;
        }
        Ok(memos)
    }

    // --- Subscriptions ---

    /// Open a snapshot stream for `owner`. The current snapshot is queued
    /// before this returns.
    pub fn subscribe(&self, owner: &OwnerId) -> Result<SubscriptionHandle> {
        self.subscribe_with(owner, self.config.subscription_config())
    }

    /// Open a snapshot stream with explicit settings.
    pub fn subscribe_with(
        &self,
        owner: &OwnerId,
        config: SubscriptionConfig,
    ) -> Result<SubscriptionHandle> {
        let _lock = self.write_lock.lock();
        self.ensure_open()?;
        Self::check_owner(owner)?;

        let initial = self.snapshot_unlocked(owner);
        Ok(self.subscriptions.subscribe(owner.clone(), config, initial))
    }

    /// Push every snapshot for `owner` to `on_change`.
    pub fn watch<F>(&self, owner: &OwnerId, on_change: F) -> Result<Watch>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        self.watch_with(owner, on_change, |_| {})
    }

    /// Like [`MemoStore::watch`], also reporting when the store terminates
    /// the watch.
    pub fn watch_with<F, D>(&self, owner: &OwnerId, on_change: F, on_drop: D) -> Result<Watch>
    where
        F: FnMut(Snapshot) + Send + 'static,
        D: FnMut(DropReason) + Send + 'static,
    {
        let handle = self.subscribe(owner)?;
        Watch::spawn(handle, on_change, on_drop)
    }

    // --- Memo Operations ---

    /// Create a memo for `owner`.
    pub fn create(
        &self,
        owner: &OwnerId,
        title: &str,
        content: &str,
        color: MemoColor,
    ) -> Result<Memo> {
        let _lock = self.write_lock.lock();
        self.ensure_open()?;
        Self::check_owner(owner)?;

        let memo = {
            let memos = self.memos.read();
            let mut id = MemoId::generate();
            while memos.contains(&id) {
                id = MemoId::generate();
            }
            Memo {
                id,
                title: title.to_string(),
                content: content.to_string(),
                color,
                owner_id: owner.clone(),
                created_at: memos.last_created().next_after(),
            }
        };

        self.journal_append(JournalOp::Insert(memo.clone()))?;
        self.memos.write().insert(memo.clone())?;
        debug!(id = %memo.id, owner = %owner, "memo created");

        self.publish(owner);
        self.compact_if_needed();
        Ok(memo)
    }

    /// Replace title and content of memo `id`.
    pub fn update(&self, id: &MemoId, title: &str, content: &str) -> Result<Memo> {
        let _lock = self.write_lock.lock();
        self.ensure_open()?;

        if !self.memos.read().contains(id) {
            return Err(StoreError::NotFound(id.clone()));
        }

        self.journal_append(JournalOp::Patch {
            id: id.clone(),
            title: title.to_string(),
            content: content.to_string(),
        })?;
        let memo = self.memos.write().patch(id, title, content)?;
        debug!(id = %id, owner = %memo.owner_id, "memo updated");

        self.publish(&memo.owner_id);
        self.compact_if_needed();
        Ok(memo)
    }

    /// Delete memo `id` permanently.
    pub fn delete(&self, id: &MemoId) -> Result<()> {
        let _lock = self.write_lock.lock();
        self.ensure_open()?;

        if !self.memos.read().contains(id) {
            return Err(StoreError::NotFound(id.clone()));
        }

        self.journal_append(JournalOp::Remove { id: id.clone() })?;
        let memo = self.memos.write().remove(id)?;
        debug!(id = %id, owner = %memo.owner_id, "memo deleted");

        self.publish(&memo.owner_id);
        self.compact_if_needed();
        Ok(())
    }

    /// Get a memo by ID.
    pub fn get(&self, id: &MemoId) -> Option<Memo> {
        self.memos.read().get(id).cloned()
    }

    /// Current snapshot for `owner` without subscribing.
    pub fn snapshot(&self, owner: &OwnerId) -> Result<Snapshot> {
        Self::check_owner(owner)?;
        let _lock = self.write_lock.lock();
        Ok(self.snapshot_unlocked(owner))
    }

    /// Mutations applied by this instance so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    // --- Store Operations ---

    /// Rewrite the journal to one entry per live memo.
    pub fn compact(&self) -> Result<()> {
        let _lock = self.write_lock.lock();
        self.compact_unlocked()
    }

    /// Reject further work and drop all subscriptions. Idempotent.
    pub fn close(&self) {
        let _lock = self.write_lock.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.subscriptions.close_all(DropReason::StoreClosed);
        if let Err(e) = self.sync() {
            warn!(error = %e, "sync on close failed");
        }
        info!(subscriptions = dropped, "memo store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let memos = self.memos.read();
        StoreStats {
            memo_count: memos.len() as u64,
            owner_count: memos.owner_count() as u64,
            subscription_count: self.subscriptions.subscription_count() as u64,
            journal_entries: self.journal.as_ref().map_or(0, Journal::entry_count),
            journal_size_bytes: self.journal.as_ref().map_or(0, Journal::size),
            revision: self.revision(),
        }
    }

    /// Sync journal to disk.
    pub fn sync(&self) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.sync(),
            None => Ok(()),
        }
    }

    /// Get the store path (persistent stores only).
    pub fn path(&self) -> Option<&Path> {
        self.journal.as_ref().map(|_| self.config.path.as_path())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Private Helpers ---

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Unavailable("store is closed".into()));
        }
        Ok(())
    }

    fn check_owner(owner: &OwnerId) -> Result<()> {
        if !owner.is_valid() {
            return Err(StoreError::InvalidOwner(owner.0.clone()));
        }
        Ok(())
    }

    fn journal_append(&self, op: JournalOp) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.append(op)?;
        }
        Ok(())
    }

    fn snapshot_unlocked(&self, owner: &OwnerId) -> Snapshot {
        Snapshot {
            owner: owner.clone(),
            revision: self.revision(),
            memos: self.memos.read().snapshot(owner),
        }
    }

    /// Bump the revision and push the owner's new snapshot. Caller holds
    /// the write lock.
    fn publish(&self, owner: &OwnerId) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        if self.subscriptions.subscribers_for(owner) == 0 {
            return;
        }
        let snapshot = self.snapshot_unlocked(owner);
        self.subscriptions.broadcast_snapshot(&snapshot);
    }

    fn compact_unlocked(&self) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let memos = self.memos.read();
        journal.rewrite(memos.ordered())
    }

    /// The mutation is already durable, so a failed rewrite is only logged.
    fn compact_if_needed(&self) {
        let Some(journal) = &self.journal else {
            return;
        };
        let threshold = self.config.compact_threshold;
        let entries = journal.entry_count();
        let live = self.memos.read().len() as u64;
        if threshold == 0 || entries < threshold || entries <= live.saturating_mul(2) {
            return;
        }
        if let Err(e) = self.compact_unlocked() {
            warn!(error = %e, entries, "journal compaction failed");
        }
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for MemoStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
