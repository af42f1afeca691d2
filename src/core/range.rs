//! Range: a named, attributed half-open address interval.
//!
//! Every range covers at least one byte. A declared length of zero is
//! coerced to one so that point and overlap queries stay meaningful;
//! negative lengths and intervals running past the end of the 64-bit
//! address space are rejected.

use crate::core::attr::{AttrValue, Attrs};
use crate::error::{RangeDbError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the length of a new range is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extent {
    /// A declared length, which may be zero (coerced to 1) but not negative.
    Size(i128),
    /// Raw contents; the range spans the bytes and carries them as the `data` attribute.
    Data(Bytes),
}

impl From<u64> for Extent {
    fn from(size: u64) -> Self {
        Extent::Size(size as i128)
    }
}

impl From<i64> for Extent {
    fn from(size: i64) -> Self {
        Extent::Size(size as i128)
    }
}

impl From<Bytes> for Extent {
    fn from(data: Bytes) -> Self {
        Extent::Data(data)
    }
}

impl From<Vec<u8>> for Extent {
    fn from(data: Vec<u8>) -> Self {
        Extent::Data(Bytes::from(data))
    }
}

/// Attribute key under which `Extent::Data` contents are stored.
pub const DATA_ATTR: &str = "data";

/// A half-open interval `[start, end)` with an optional name and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    start: u64,
    end: u64,
    name: Option<String>,
    attrs: Attrs,
}

impl Range {
    /// Create a range starting at `start` with the given extent.
    ///
    /// # Errors
    /// `InvalidRange` if the declared size is negative or the end would overflow.
    pub fn new(start: u64, extent: impl Into<Extent>) -> Result<Self> {
        let mut attrs = Attrs::new();
        let declared = match extent.into() {
            Extent::Size(size) => size,
            Extent::Data(data) => {
                let len = data.len() as i128;
                attrs.insert(DATA_ATTR.to_string(), AttrValue::Bytes(data));
                len
            }
        };

        if declared < 0 {
            return Err(RangeDbError::InvalidRange {
                start,
                len: declared,
            });
        }
        let len = declared.max(1);
        let end = u64::try_from(start as i128 + len).map_err(|_| RangeDbError::InvalidRange {
            start,
            len: declared,
        })?;

        Ok(Range {
            start,
            end,
            name: None,
            attrs,
        })
    }

    /// Builder: set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set one attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Builder: merge a set of attributes, later keys winning.
    pub fn with_attrs(mut self, attrs: impl IntoIterator<Item = (String, AttrValue)>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Length in bytes, always at least 1.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// Raw contents carried by a range built from `Extent::Data`.
    pub fn data(&self) -> Option<&Bytes> {
        self.attr(DATA_ATTR).and_then(AttrValue::as_bytes)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Standard half-open overlap test against `[start, end)`.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && self.end > start
    }

    /// Move the range to a new start address, keeping its length.
    pub fn rebase(&mut self, start: u64) -> Result<()> {
        let len = self.len();
        let end = start.checked_add(len).ok_or(RangeDbError::InvalidRange {
            start,
            len: len as i128,
        })?;
        self.start = start;
        self.end = end;
        Ok(())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub(crate) fn take_name(&mut self) -> Option<String> {
        self.name.take()
    }

    pub(crate) fn merge_attrs(&mut self, attrs: Attrs) {
        self.attrs.extend(attrs);
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}@[{:#x}, {:#x})", name, self.start, self.end),
            None => write!(f, "[{:#x}, {:#x})", self.start, self.end),
        }
    }
}
