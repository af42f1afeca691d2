//! Address-range database for binary analysis.
//!
//! A main store holds the machine-derived model of an executable image
//! (sections, symbols, functions and cached analysis results); an overlay
//! store holds user annotations and always takes precedence when reads go
//! through the [`store::Resolver`]. Images are loaded with
//! [`ingest::ingest_path`] or one of its siblings.

/// Configuration for ingestion and overlays
pub mod config;
/// Core data types: ranges and tables
pub mod core;
/// Error types
pub mod error;
/// Binary format parsers
pub mod formats;
/// Image ingestion pipeline
pub mod ingest;
/// Logging and tracing infrastructure
pub mod logging;
/// Stores, transactions and overlay resolution
pub mod store;

pub use crate::config::RangeDbConfig;
pub use crate::core::{AttrValue, Attrs, Extent, OnConflict, Patch, Range, Table};
pub use crate::error::{IngestError, RangeDbError, Result};
pub use crate::ingest::{ingest, ingest_bytes, ingest_path, IngestReport};
pub use crate::store::{MainTables, OverlayStore, OverlayTables, Resolver, Store};
