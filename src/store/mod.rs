//! Stores: named table sets behind a reader/writer lock.
//!
//! Readers take a shared guard and may run concurrently. Writers go
//! through a `Transaction`, which holds the exclusive lock and changes the
//! tables in place while each table journals how to undo its changes.
//! `commit` discards the journals; dropping an uncommitted transaction
//! replays them, so a partially applied write is never observable. A
//! write costs what its own changes cost, not the size of the store.

pub mod overlay;
pub mod resolver;
pub mod tables;

pub use overlay::OverlayStore;
pub use resolver::{referenced_addrs, FunctionView, Resolver};
pub use tables::{MainTables, OverlayTables};

use crate::core::table::Table;
use crate::error::{RangeDbError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// A set of tables that can be changed, rolled back and persisted as one unit.
pub trait TableSet: Default + Serialize + DeserializeOwned + Send + Sync {
    /// Short label used in logs.
    const KIND: &'static str;

    /// Every table in the set.
    fn tables_mut(&mut self) -> Vec<&mut Table>;
}

/// A table set guarded for concurrent reads and transactional writes.
#[derive(Debug, Default)]
pub struct Store<T: TableSet> {
    tables: RwLock<T>,
    path: Option<PathBuf>,
}

impl<T: TableSet> Store<T> {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(T::default()),
            path: None,
        }
    }

    /// Open a file-backed store, loading its snapshot when the file exists.
    ///
    /// Every committed transaction rewrites the snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let tables = load_snapshot(&path)?;
            info!(kind = T::KIND, path = %path.display(), "Loaded store snapshot");
            tables
        } else {
            debug!(kind = T::KIND, path = %path.display(), "No snapshot yet, starting empty");
            T::default()
        };
        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
        })
    }

    /// Snapshot location of a file-backed store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Shared read access; any number of readers may hold a guard at once.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a transaction. Blocks until no reader or writer holds the store.
    pub fn begin(&self) -> Transaction<'_, T> {
        let mut guard = self
            .tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for table in guard.tables_mut() {
            table.begin_journal();
        }
        Transaction {
            guard,
            path: self.path.as_deref(),
            committed: false,
        }
    }

    /// Run `f` in its own transaction, committing when it returns `Ok`.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut txn = self.begin();
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// Consume the store, returning its tables.
    pub fn into_inner(self) -> T {
        self.tables
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive, journaled access to a store's tables.
///
/// Readers are locked out until the transaction ends, so its changes are
/// only ever seen committed. Dropping it without `commit` rolls back.
pub struct Transaction<'a, T: TableSet> {
    guard: RwLockWriteGuard<'a, T>,
    path: Option<&'a Path>,
    committed: bool,
}

impl<T: TableSet> Transaction<'_, T> {
    /// Keep the changes, persisting them first for file-backed stores.
    ///
    /// If persisting fails the changes are rolled back.
    pub fn commit(mut self) -> Result<()> {
        if let Some(path) = self.path {
            save_snapshot(path, &*self.guard)?;
        }
        for table in self.guard.tables_mut() {
            table.commit_journal();
        }
        self.committed = true;
        debug!(kind = T::KIND, "Transaction committed");
        Ok(())
    }

    /// Undo the changes explicitly.
    pub fn rollback(self) {}
}

impl<T: TableSet> Deref for Transaction<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: TableSet> DerefMut for Transaction<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: TableSet> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            for table in self.guard.tables_mut() {
                table.rollback_journal();
            }
            warn!(kind = T::KIND, "Transaction rolled back");
        }
    }
}

fn load_snapshot<T: TableSet>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    let (tables, _): (T, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| {
            RangeDbError::Persistence(format!("decoding {}: {}", path.display(), e))
        })?;
    Ok(tables)
}

/// Write the snapshot next to its final location, then rename over it.
fn save_snapshot<T: TableSet>(path: &Path, tables: &T) -> Result<()> {
    let bytes = bincode::serde::encode_to_vec(tables, bincode::config::standard())
        .map_err(|e| RangeDbError::Persistence(format!("encoding {}: {}", T::KIND, e)))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, &bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!(path = %path.display(), size = bytes.len(), "Snapshot written");
    Ok(())
}
