//! Core data types for the range database.
//!
//! `Range` is the unit of storage; `Table` indexes ranges by address and
//! by name on top of an augmented interval tree.

pub mod attr;
pub mod interval;
pub mod range;
pub mod table;

pub use attr::{AttrValue, Attrs};
pub use range::{Extent, Range};
pub use table::{OnConflict, Patch, Table};
