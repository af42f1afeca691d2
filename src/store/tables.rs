//! The two table sets: machine-derived main tables and user overlay tables.

use crate::core::table::Table;
use crate::store::TableSet;
use serde::{Deserialize, Serialize};

/// Machine-derived model of one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainTables {
    /// Loaded segments (or allocated sections) with their raw bytes.
    pub sections: Table,
    /// Every named symbol, functions included.
    pub symbols: Table,
    /// Non-overlapping function extents.
    pub functions: Table,
    /// Derived labels cached by analysis.
    pub names: Table,
    /// Disassembled lines cached by analysis.
    pub asm_lines: Table,
}

impl Default for MainTables {
    fn default() -> Self {
        Self {
            sections: Table::new("sections"),
            symbols: Table::new("symbols"),
            functions: Table::new("functions"),
            names: Table::new("names"),
            asm_lines: Table::new("asm_lines"),
        }
    }
}

impl TableSet for MainTables {
    const KIND: &'static str = "main";

    fn tables_mut(&mut self) -> Vec<&mut Table> {
        vec![
            &mut self.sections,
            &mut self.symbols,
            &mut self.functions,
            &mut self.names,
            &mut self.asm_lines,
        ]
    }
}

/// User annotations layered over the main tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayTables {
    pub user_lines: Table,
}

impl Default for OverlayTables {
    fn default() -> Self {
        Self {
            user_lines: Table::new("user_lines"),
        }
    }
}

impl TableSet for OverlayTables {
    const KIND: &'static str = "overlay";

    fn tables_mut(&mut self) -> Vec<&mut Table> {
        vec![&mut self.user_lines]
    }
}
