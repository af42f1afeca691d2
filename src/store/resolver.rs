//! Overlay resolution: every address- or name-keyed read that must respect
//! user overrides goes through `Resolver`.
//!
//! The overlay's `user_lines` always take precedence over the main store's
//! `names`. Neither store is mutated by resolution; results are owned
//! copies so no lock outlives a call.

use crate::core::attr::AttrValue;
use crate::core::range::Range;
use crate::error::{RangeDbError, Result};
use crate::store::{MainTables, OverlayTables, Store};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Attribute key of a disassembled line's operand list.
pub const OPERANDS_ATTR: &str = "operands";

/// Read-side view joining a main store with its overlay.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    main: &'a Store<MainTables>,
    overlay: &'a Store<OverlayTables>,
}

/// A function with every annotation relevant to displaying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionView {
    pub function: Range,
    /// Main-store labels inside the function, then at referenced addresses.
    pub names: Vec<Range>,
    /// Disassembled lines inside the function, then at referenced addresses.
    pub asm_lines: Vec<Range>,
    /// User lines inside the function, then at referenced addresses.
    pub user_lines: Vec<Range>,
}

impl<'a> Resolver<'a> {
    pub fn new(main: &'a Store<MainTables>, overlay: &'a Store<OverlayTables>) -> Self {
        Self { main, overlay }
    }

    /// Look a name up in the overlay first, then in the main `names` table.
    pub fn resolve_name(&self, name: &str) -> Option<Range> {
        if let Some(line) = self.overlay.read().user_lines.get_by_name(name) {
            return Some(line.clone());
        }
        self.main.read().names.get_by_name(name).cloned()
    }

    /// Union of overlay and main names, sorted by name.
    ///
    /// A named overlay line hides any main entry starting at the same address.
    pub fn resolve_names_merged(&self) -> Vec<Range> {
        let overlay = self.overlay.read();
        let main = self.main.read();

        let mut merged: Vec<Range> = overlay.user_lines.iter_by_name().cloned().collect();
        let shadowed: HashSet<u64> = merged.iter().map(Range::start).collect();
        merged.extend(
            main.names
                .iter_by_name()
                .filter(|r| !shadowed.contains(&r.start()))
                .cloned(),
        );
        merged.sort_by(|a, b| a.name().cmp(&b.name()).then(a.start().cmp(&b.start())));
        merged
    }

    /// The annotation starting at `addr`, with overlay name and attributes
    /// layered over the main entry.
    pub fn line_at(&self, addr: u64) -> Option<Range> {
        let overlay = self.overlay.read();
        let main = self.main.read();

        let user = overlay.user_lines.get_at_start(addr);
        let base = main.names.get_at_start(addr);

        match (base, user) {
            (None, None) => None,
            (None, Some(user)) => Some(user.clone()),
            (Some(base), None) => Some(base.clone()),
            (Some(base), Some(user)) => {
                let mut line = base.clone();
                if let Some(name) = user.name() {
                    line.set_name(Some(name.to_string()));
                }
                line.merge_attrs(user.attrs().clone());
                Some(line)
            }
        }
    }

    /// Gather a function and the annotations needed to display it.
    ///
    /// The name is resolved through the overlay, then `names`, then
    /// `symbols`; the function is the one containing the resolved address.
    pub fn function_view(&self, name: &str) -> Result<FunctionView> {
        let addr = match self.resolve_name(name) {
            Some(r) => r.start(),
            None => self
                .main
                .read()
                .symbols
                .get_by_name(name)
                .map(Range::start)
                .ok_or_else(|| RangeDbError::NotFound(format!("function {:?}", name)))?,
        };

        let overlay = self.overlay.read();
        let main = self.main.read();

        let function = main.functions.get_at(addr).cloned().ok_or_else(|| {
            RangeDbError::NotFound(format!("{:?}={:#x} but no function at {:#x}", name, addr, addr))
        })?;
        let (start, end) = (function.start(), function.end());

        let mut names: Vec<Range> = main.names.iter_where_overlaps(start, end).cloned().collect();
        let mut asm_lines: Vec<Range> =
            main.asm_lines.iter_where_overlaps(start, end).cloned().collect();
        let mut user_lines: Vec<Range> =
            overlay.user_lines.iter_where_overlaps(start, end).cloned().collect();

        let reffed = referenced_addrs(&asm_lines);
        debug!(function = %function, refs = reffed.len(), "Building function view");

        names.extend(main.names.get_at_many(reffed.iter().copied()).into_iter().cloned());
        asm_lines.extend(main.asm_lines.get_at_many(reffed.iter().copied()).into_iter().cloned());
        user_lines.extend(
            overlay
                .user_lines
                .get_at_many(reffed.iter().copied())
                .into_iter()
                .cloned(),
        );

        Ok(FunctionView {
            function,
            names,
            asm_lines,
            user_lines,
        })
    }
}

/// Addresses referenced by the operands of disassembled lines.
///
/// An operand is a map attribute; it counts as a reference when it has a
/// `ref` key, and its target is `value`, or `imm` when `value` is absent.
pub fn referenced_addrs<'r>(lines: impl IntoIterator<Item = &'r Range>) -> BTreeSet<u64> {
    let mut out = BTreeSet::new();
    for line in lines {
        let Some(operands) = line.attr(OPERANDS_ATTR).and_then(AttrValue::as_list) else {
            continue;
        };
        for op in operands.iter().filter_map(AttrValue::as_map) {
            if !op.contains_key("ref") {
                continue;
            }
            if let Some(target) = op.get("value").or_else(|| op.get("imm")).and_then(AttrValue::as_u64) {
                out.insert(target);
            }
        }
    }
    out
}
