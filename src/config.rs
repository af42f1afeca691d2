//! Configuration for ingestion and the overlay store.
//!
//! Every section has sensible defaults; a JSON file may override any subset
//! of fields.

use crate::error::{RangeDbError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extension appended to an image path to locate its overlay.
pub const OVERLAY_EXTENSION: &str = "userdb";

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeDbConfig {
    /// Image ingestion configuration.
    pub ingest: IngestConfig,
    /// Overlay store configuration.
    pub overlay: OverlayConfig,
}

impl RangeDbConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RangeDbError::Config(format!("invalid config: {}", e)))
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RangeDbError::Config(format!("config encoding: {}", e)))
    }
}

/// Which parts of the image become `sections` ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// PT_LOAD segments, falling back to allocated sections when there are none.
    #[default]
    Segments,
    /// Allocated sections only.
    Sections,
}

/// Image ingestion configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Segment- or section-based loading (default: segments).
    pub load_policy: LoadPolicy,
    /// Also read `.dynsym` (default: true).
    pub include_dynamic_symbols: bool,
    /// Largest image `ingest_path` will map (default: 512MB).
    pub max_image_size: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            load_policy: LoadPolicy::Segments,
            include_dynamic_symbols: true,
            max_image_size: 512 * 1024 * 1024,
        }
    }
}

/// Overlay store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Snapshot file; `None` keeps the overlay in memory.
    pub path: Option<PathBuf>,
}

impl OverlayConfig {
    /// The conventional overlay beside an image: `<image>.userdb`.
    pub fn for_image(image: impl AsRef<Path>) -> Self {
        let mut path = image.as_ref().as_os_str().to_owned();
        path.push(".");
        path.push(OVERLAY_EXTENSION);
        Self {
            path: Some(PathBuf::from(path)),
        }
    }
}
