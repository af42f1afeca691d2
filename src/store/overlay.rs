//! Overlay store: user annotations, persisted separately from the image model.
//!
//! Each mutation runs in its own transaction, so a single call either lands
//! completely (and is written to disk for file-backed overlays) or not at all.

use crate::config::OverlayConfig;
use crate::core::range::Range;
use crate::core::table::Patch;
use crate::error::Result;
use crate::store::{OverlayTables, Store};
use std::ops::Deref;
use std::path::PathBuf;
use tracing::info;

/// Attribute key holding a user comment.
pub const COMMENT_ATTR: &str = "comment";

#[derive(Debug, Default)]
pub struct OverlayStore {
    store: Store<OverlayTables>,
}

impl OverlayStore {
    /// In-memory overlay, never persisted.
    pub fn new() -> Self {
        Self::default()
    }

    /// File-backed overlay, loading any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: Store::open(path)?,
        })
    }

    /// Overlay as configured: file-backed when a path is set.
    pub fn from_config(config: &OverlayConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open(path.clone()),
            None => Ok(Self::new()),
        }
    }

    /// Merge `patch` into the user line at `addr`.
    pub fn upsert(&self, addr: u64, patch: Patch) -> Result<Range> {
        self.store
            .write(|tables| tables.user_lines.upsert(addr, patch).cloned())
    }

    /// Name the line at `addr`, taking the name from any other line holding it.
    pub fn set_line_name(&self, addr: u64, name: &str) -> Result<Range> {
        info!(addr = format_args!("{:#x}", addr), name, "Setting line name");
        self.upsert(addr, Patch::new().name(name))
    }

    pub fn set_line_comment(&self, addr: u64, comment: &str) -> Result<Range> {
        info!(addr = format_args!("{:#x}", addr), "Setting line comment");
        self.upsert(addr, Patch::new().attr(COMMENT_ATTR, comment))
    }

    /// Drop the user line starting at `addr`, returning it if there was one.
    pub fn remove_line(&self, addr: u64) -> Result<Option<Range>> {
        self.store
            .write(|tables| Ok(tables.user_lines.remove_at_start(addr)))
    }

    /// Drop the user line holding `name`.
    pub fn remove_name(&self, name: &str) -> Result<Option<Range>> {
        self.store
            .write(|tables| Ok(tables.user_lines.remove_by_name(name)))
    }
}

impl Deref for OverlayStore {
    type Target = Store<OverlayTables>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
