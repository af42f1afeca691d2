//! Table: an address-indexed collection of ranges.
//!
//! A table supports point lookups, overlap queries, exact-name lookups and
//! batched lookups by address. Ranges are kept in an augmented interval
//! tree keyed by `(start, insertion sequence)`; names are kept unique in a
//! sorted side index.
//!
//! Point lookups on overlapping ranges resolve deterministically: the range
//! with the smallest start wins, and among equal starts the one inserted
//! first.
//!
//! While a journal is open every change records how to undo itself, so a
//! store can roll a table back without ever copying it.

use crate::core::attr::{AttrValue, Attrs};
use crate::core::interval::{IntervalTree, Key};
use crate::core::range::{Extent, Range};
use crate::error::{RangeDbError, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, trace};

/// What `insert` does when another range already holds the new range's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Fail with `DuplicateName` unless the holder covers the same interval,
    /// in which case its attributes are updated in place.
    Fail,
    /// Remove the stale holder and insert the new range.
    Replace,
    /// Insert the new range and move the name to it; the old holder stays
    /// in the address index without a name.
    TakeName,
}

/// A partial update applied by `upsert`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub name: Option<String>,
    pub attrs: Attrs,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Mutable, indexed collection of ranges.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "TableImage")]
pub struct Table {
    name: String,
    index: IntervalTree<Range>,
    by_name: BTreeMap<String, Key>,
    next_seq: u64,
    journal: Option<Journal>,
}

/// Undo steps recorded since `begin_journal`, replayed newest first.
#[derive(Debug, Clone)]
struct Journal {
    next_seq: u64,
    steps: Vec<Undo>,
}

#[derive(Debug, Clone)]
enum Undo {
    /// The range stored under a key before a change, if any.
    Range(Key, Option<Range>),
    /// The holder of a name before a change, if any.
    Name(String, Option<Key>),
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: IntervalTree::new(),
            by_name: BTreeMap::new(),
            next_seq: 0,
            journal: None,
        }
    }

    /// Table name, used in error messages and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Construct and insert a range `[start, start + len)`.
    ///
    /// # Errors
    /// `InvalidRange` for a negative or overflowing extent, `DuplicateName`
    /// if another range with a different interval holds `name`.
    pub fn add(
        &mut self,
        start: u64,
        extent: impl Into<Extent>,
        name: Option<&str>,
        attrs: Attrs,
    ) -> Result<&Range> {
        let mut range = Range::new(start, extent)?.with_attrs(attrs);
        if let Some(name) = name {
            range = range.with_name(name);
        }
        self.insert(range, OnConflict::Fail)
    }

    /// Insert a pre-built range without overwriting a differently placed name holder.
    pub fn add_obj(&mut self, range: Range) -> Result<()> {
        self.insert(range, OnConflict::Fail).map(|_| ())
    }

    /// Insert a pre-built range with an explicit name-conflict policy.
    pub fn insert(&mut self, range: Range, on_conflict: OnConflict) -> Result<&Range> {
        if let Some(name) = range.name() {
            if let Some(&held) = self.by_name.get(name) {
                let same_extent = self
                    .index
                    .get(held)
                    .is_some_and(|r| r.start() == range.start() && r.end() == range.end());

                if same_extent {
                    if let Some(existing) = self.range_mut(held) {
                        existing.merge_attrs(range.attrs().clone());
                    }
                    return self.resolve(held);
                }

                match on_conflict {
                    OnConflict::Fail => {
                        return Err(RangeDbError::DuplicateName {
                            table: self.name.clone(),
                            name: name.to_string(),
                        })
                    }
                    OnConflict::Replace => {
                        debug!(table = %self.name, name, "replacing stale range");
                        self.remove_key(held);
                    }
                    OnConflict::TakeName => self.strip_name(name),
                }
            }
        }

        let key = self.insert_new(range);
        self.resolve(key)
    }

    /// The range containing `addr`, smallest start first.
    pub fn get_at(&self, addr: u64) -> Option<&Range> {
        let end = addr.checked_add(1)?;
        self.index.overlapping(addr, end).next().map(|(_, _, r)| r)
    }

    /// Batched `get_at`, address-ascending, skipping misses.
    ///
    /// A range hit by several addresses is returned once, at its first hit.
    pub fn get_at_many(&self, addrs: impl IntoIterator<Item = u64>) -> Vec<&Range> {
        let addrs: BTreeSet<u64> = addrs.into_iter().collect();
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for addr in addrs {
            let Some(end) = addr.checked_add(1) else {
                continue;
            };
            if let Some((key, _, range)) = self.index.overlapping(addr, end).next() {
                if seen.insert(key) {
                    hits.push(range);
                }
            }
        }
        hits
    }

    /// Ranges `r` with `r.start < end && r.end > start`, ordered by start.
    pub fn iter_where_overlaps(&self, start: u64, end: u64) -> impl Iterator<Item = &Range> + '_ {
        self.index.overlapping(start, end).map(|(_, _, r)| r)
    }

    /// The first range starting exactly at `addr`.
    pub fn get_at_start(&self, addr: u64) -> Option<&Range> {
        self.key_at_start(addr).and_then(|key| self.index.get(key))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Range> {
        self.by_name.get(name).and_then(|&key| self.index.get(key))
    }

    /// Named ranges ordered by name.
    pub fn iter_by_name(&self) -> impl Iterator<Item = &Range> + '_ {
        self.by_name.values().filter_map(|&key| self.index.get(key))
    }

    /// All ranges ordered by start.
    pub fn iter(&self) -> impl Iterator<Item = &Range> + '_ {
        self.index.iter().map(|(_, _, r)| r)
    }

    /// Merge `patch` into the range starting at `addr`, or create a one-byte range there.
    ///
    /// A name already held by another range is taken from it; upsert never
    /// reports `DuplicateName`.
    pub fn upsert(&mut self, addr: u64, patch: Patch) -> Result<&Range> {
        match self.key_at_start(addr) {
            Some(key) => {
                self.apply_patch(key, patch);
                self.resolve(key)
            }
            None => {
                let mut range = Range::new(addr, 0u64)?.with_attrs(patch.attrs);
                if let Some(name) = patch.name {
                    self.strip_name(&name);
                    range = range.with_name(name);
                }
                let key = self.insert_new(range);
                self.resolve(key)
            }
        }
    }

    /// Idempotent whole-range write for derived data.
    ///
    /// Writing the same range twice leaves one copy; attributes merge
    /// last-write-wins.
    pub fn put(&mut self, range: Range) -> Result<&Range> {
        let same = self
            .index
            .overlapping(range.start(), range.end())
            .find(|(key, end, _)| key.0 == range.start() && *end == range.end())
            .map(|(key, _, _)| key);

        match same {
            Some(key) => {
                let mut range = range;
                let patch = Patch {
                    name: range.take_name(),
                    attrs: range.attrs().clone(),
                };
                self.apply_patch(key, patch);
                self.resolve(key)
            }
            None => self.insert(range, OnConflict::Replace),
        }
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Range> {
        let key = *self.by_name.get(name)?;
        self.remove_key(key)
    }

    pub fn remove_at_start(&mut self, addr: u64) -> Option<Range> {
        let key = self.key_at_start(addr)?;
        self.remove_key(key)
    }

    /// Start recording undo steps. An open journal is restarted.
    pub(crate) fn begin_journal(&mut self) {
        self.journal = Some(Journal {
            next_seq: self.next_seq,
            steps: Vec::new(),
        });
    }

    /// Keep every change since `begin_journal`.
    pub(crate) fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Undo every change since `begin_journal`.
    pub(crate) fn rollback_journal(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        let undone = journal.steps.len();
        for step in journal.steps.into_iter().rev() {
            match step {
                Undo::Range(key, old) => {
                    self.index.remove(key);
                    if let Some(range) = old {
                        self.index.insert(key, range.end(), range);
                    }
                }
                Undo::Name(name, Some(key)) => {
                    self.by_name.insert(name, key);
                }
                Undo::Name(name, None) => {
                    self.by_name.remove(&name);
                }
            }
        }
        self.next_seq = journal.next_seq;
        trace!(table = %self.name, undone, "table rolled back");
    }

    fn save_range(&mut self, key: Key) {
        if let Some(journal) = &mut self.journal {
            journal.steps.push(Undo::Range(key, self.index.get(key).cloned()));
        }
    }

    /// Point `name` at `key`, or drop it from the name index.
    fn set_holder(&mut self, name: String, key: Option<Key>) {
        if let Some(journal) = &mut self.journal {
            journal
                .steps
                .push(Undo::Name(name.clone(), self.by_name.get(&name).copied()));
        }
        match key {
            Some(key) => {
                self.by_name.insert(name, key);
            }
            None => {
                self.by_name.remove(&name);
            }
        }
    }

    fn range_mut(&mut self, key: Key) -> Option<&mut Range> {
        self.save_range(key);
        self.index.get_mut(key)
    }

    fn key_at_start(&self, addr: u64) -> Option<Key> {
        let end = addr.checked_add(1)?;
        self.index
            .overlapping(addr, end)
            .map(|(key, _, _)| key)
            .find(|key| key.0 == addr)
    }

    fn insert_new(&mut self, range: Range) -> Key {
        let key = (range.start(), self.next_seq);
        self.next_seq += 1;
        if let Some(name) = range.name() {
            self.set_holder(name.to_string(), Some(key));
        }
        self.save_range(key);
        self.index.insert(key, range.end(), range);
        key
    }

    fn remove_key(&mut self, key: Key) -> Option<Range> {
        self.index.get(key)?;
        self.save_range(key);
        let range = self.index.remove(key)?;
        if let Some(name) = range.name() {
            if self.by_name.get(name) == Some(&key) {
                self.set_holder(name.to_string(), None);
            }
        }
        Some(range)
    }

    /// Take `name` away from whichever range holds it.
    fn strip_name(&mut self, name: &str) {
        if let Some(&held) = self.by_name.get(name) {
            debug!(table = %self.name, name, "moving name to another range");
            self.set_holder(name.to_string(), None);
            if let Some(range) = self.range_mut(held) {
                range.set_name(None);
            }
        }
    }

    fn apply_patch(&mut self, key: Key, patch: Patch) {
        if let Some(name) = patch.name {
            let already_ours = self.by_name.get(&name) == Some(&key);
            if !already_ours {
                self.strip_name(&name);
                let old = self.range_mut(key).and_then(|range| {
                    let old = range.take_name();
                    range.set_name(Some(name.clone()));
                    old
                });
                if let Some(old) = old {
                    self.set_holder(old, None);
                }
                self.set_holder(name, Some(key));
            }
        }
        if let Some(range) = self.range_mut(key) {
            range.merge_attrs(patch.attrs);
        }
    }

    fn resolve(&self, key: Key) -> Result<&Range> {
        self.index.get(key).ok_or_else(|| {
            RangeDbError::NotFound(format!("range {:#x} in table {}", key.0, self.name))
        })
    }
}

/// Serialized form of a table: its ranges in start order.
#[derive(Deserialize)]
struct TableImage {
    name: String,
    ranges: Vec<Range>,
}

/// Borrowed `TableImage`, so writing a snapshot never copies ranges.
#[derive(Serialize)]
struct TableImageRef<'a> {
    name: &'a str,
    ranges: Vec<&'a Range>,
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        TableImageRef {
            name: &self.name,
            ranges: self.iter().collect(),
        }
        .serialize(serializer)
    }
}

impl TryFrom<TableImage> for Table {
    type Error = RangeDbError;

    fn try_from(image: TableImage) -> Result<Self> {
        let mut table = Table::new(image.name);
        for range in image.ranges {
            if range.end() <= range.start() {
                return Err(RangeDbError::InvalidRange {
                    start: range.start(),
                    len: range.end() as i128 - range.start() as i128,
                });
            }
            table.add_obj(range)?;
        }
        Ok(table)
    }
}
