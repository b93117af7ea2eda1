//! Client-local record of `(address, poll) -> chosen option`.
//!
//! The ledger is the only thing standing between a client and a second vote on
//! the same poll, so an entry once written is never changed or removed.

use crate::identity::Address;
use crate::poll::PollId;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub type LedgerEntries = BTreeMap<PollId, usize>;

/// Durable storage for one address's entries.
pub trait LedgerStore: Send + Sync + 'static {
    fn load(&self, address: &Address) -> Result<LedgerEntries, LedgerError>;

    fn save(&self, address: &Address, entries: &LedgerEntries) -> Result<(), LedgerError>;
}

pub struct VoteLedger<S> {
    store: S,
    cache: Mutex<HashMap<Address, LedgerEntries>>,
}

impl<S: LedgerStore> VoteLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry(&self, address: &Address, poll_id: &PollId) -> Result<Option<usize>, LedgerError> {
        self.with_entries(address, |entries| entries.get(poll_id).copied())
    }

    /// Writes the entry through to the store. The cache only changes once the
    /// store has accepted the write.
    pub fn record(
        &self,
        address: &Address,
        poll_id: &PollId,
        option_index: usize,
    ) -> Result<(), LedgerError> {
        let mut cache = self.cache.lock().expect("poisoned lock");
        let entries = Self::load_into(&self.store, &mut cache, address)?;

        if let Some(existing) = entries.get(poll_id) {
            return Err(LedgerError::Occupied {
                poll_id: *poll_id,
                existing: *existing,
            });
        }

        let mut next = entries.clone();
        next.insert(*poll_id, option_index);
        self.store.save(address, &next)?;
        cache.insert(address.clone(), next);

        Ok(())
    }

    pub fn votes_cast(&self, address: &Address) -> Result<usize, LedgerError> {
        self.with_entries(address, |entries| entries.len())
    }

    /// Drops the cached view so the next read goes back to the store.
    pub fn reload(&self, address: &Address) {
        self.cache.lock().expect("poisoned lock").remove(address);
    }

    fn with_entries<R>(
        &self,
        address: &Address,
        f: impl FnOnce(&LedgerEntries) -> R,
    ) -> Result<R, LedgerError> {
        let mut cache = self.cache.lock().expect("poisoned lock");
        let entries = Self::load_into(&self.store, &mut cache, address)?;
        Ok(f(entries))
    }

    fn load_into<'a>(
        store: &S,
        cache: &'a mut HashMap<Address, LedgerEntries>,
        address: &Address,
    ) -> Result<&'a LedgerEntries, LedgerError> {
        if !cache.contains_key(address) {
            let entries = store.load(address)?;
            cache.insert(address.clone(), entries);
        }
        Ok(&cache[address])
    }
}

/// Keeps entries in process memory. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<MemoryLedgerInner>>,
}

#[derive(Debug, Default)]
struct MemoryLedgerInner {
    entries: HashMap<Address, LedgerEntries>,
    fail_writes: bool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `save` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().expect("poisoned lock").fail_writes = fail;
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self, address: &Address) -> Result<LedgerEntries, LedgerError> {
        let inner = self.inner.lock().expect("poisoned lock");
        Ok(inner.entries.get(address).cloned().unwrap_or_default())
    }

    fn save(&self, address: &Address, entries: &LedgerEntries) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        if inner.fail_writes {
            return Err(LedgerError::Unavailable("writes disabled".to_string()));
        }
        inner.entries.insert(address.clone(), entries.clone());
        Ok(())
    }
}

/// One JSON file per address under `dir`.
#[derive(Clone, Debug)]
pub struct FileLedgerStore {
    dir: PathBuf,
}

impl FileLedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Only plain alphanumeric addresses name a file, so none can leave `dir`.
    fn path(&self, address: &Address) -> Result<PathBuf, LedgerError> {
        let raw = address.as_str();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LedgerError::InvalidAddress(address.clone()));
        }
        Ok(self.dir.join(format!("voted_polls_{raw}.json")))
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self, address: &Address) -> Result<LedgerEntries, LedgerError> {
        let path = self.path(address)?;
        if !path.exists() {
            return Ok(LedgerEntries::new());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, address: &Address, entries: &LedgerEntries) -> Result<(), LedgerError> {
        let path = self.path(address)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Already voted on {poll_id} (option {existing})")]
    Occupied { poll_id: PollId, existing: usize },

    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("Address {0} cannot name a ledger file")]
    InvalidAddress(Address),

    #[error("StdIO error: {0}")]
    StdIo(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
