//! Error types for the range database.
//!
//! Structured error types built with thiserror. Range and table errors are
//! local to the caller of a table operation; ingestion errors are fatal for
//! the whole ingestion transaction.

use crate::formats::elf::ElfError;
use thiserror::Error;

/// Main error type for range database operations.
#[derive(Debug, Error)]
pub enum RangeDbError {
    /// A constructed interval is malformed after length coercion
    #[error("Invalid range at {start:#x}: length {len}")]
    InvalidRange { start: u64, len: i128 },

    /// A non-upsert insert collided with a different range holding the same name
    #[error("Duplicate name {name:?} in table {table}")]
    DuplicateName { table: String, name: String },

    /// Ingestion failed and was rolled back
    #[error("Ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    /// Overlay snapshot could not be encoded, decoded or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration could not be parsed or encoded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A name or address lookup found nothing where something was required
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort an ingestion. None of them leave a partial store behind.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The image could not be parsed
    #[error("ELF parse error: {0}")]
    Elf(#[from] ElfError),

    /// The image parsed but is of a kind ingestion does not model
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    /// A loadable segment or section is malformed or lies outside the image
    #[error("Corrupt segment {index}: {reason}")]
    CorruptSegment { index: usize, reason: String },

    /// A symbol table entry could not be decoded
    #[error("Corrupt symbol {index}: {reason}")]
    CorruptSymbol { index: usize, reason: String },

    /// The image exceeds the configured size limit
    #[error("Image too large: {found} bytes (limit {limit})")]
    ImageTooLarge { limit: u64, found: u64 },

    /// The image file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for range database operations
pub type Result<T> = std::result::Result<T, RangeDbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RangeDbError::InvalidRange {
            start: 0x1000,
            len: -4,
        };
        assert_eq!(err.to_string(), "Invalid range at 0x1000: length -4");

        let err = RangeDbError::DuplicateName {
            table: "symbols".to_string(),
            name: "main".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate name \"main\" in table symbols");
    }

    #[test]
    fn test_ingest_error_wraps_elf_error() {
        let err: RangeDbError = IngestError::from(ElfError::InvalidMagic).into();
        assert_eq!(
            err.to_string(),
            "Ingestion failed: ELF parse error: Invalid ELF magic"
        );
    }
}
