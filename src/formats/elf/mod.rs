//! ELF (Executable and Linkable Format) parser
//!
//! A zero-copy reader covering what range ingestion needs: the header,
//! section and program header tables, and symbol tables.

pub mod headers;
pub mod sections;
pub mod segments;
pub mod symbols;
pub mod types;
pub mod utils;

use headers::parse_header;
use sections::SectionTable;
use segments::SegmentTable;
use symbols::SymbolTable;
pub use types::*;

/// Main ELF parser
pub struct ElfParser<'data> {
    data: &'data [u8],
    header: ElfHeader,
}

impl<'data> ElfParser<'data> {
    /// Parse ELF from raw data
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let header = parse_header(data)?;
        Ok(Self { data, header })
    }

    /// Get ELF header
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Get raw data
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// Get sections
    pub fn sections(&self) -> Result<SectionTable<'data>> {
        SectionTable::parse(self.data, &self.header)
    }

    /// Get segments
    pub fn segments(&self) -> Result<SegmentTable<'data>> {
        SegmentTable::parse(self.data, &self.header)
    }

    /// All symbol tables in section header order.
    ///
    /// `.dynsym`-typed tables are included only when `include_dynamic` is set.
    pub fn symbol_tables(&self, include_dynamic: bool) -> Result<Vec<SymbolTable<'data>>> {
        let sections = self.sections()?;
        let mut tables = Vec::new();

        for section in sections.sections() {
            let section = section?;
            let wanted = match section.header.sh_type {
                SHT_SYMTAB => true,
                SHT_DYNSYM => include_dynamic,
                _ => false,
            };
            if !wanted {
                continue;
            }

            let strings = match sections.by_index(section.header.sh_link as usize) {
                Some(strtab) => strtab?.data,
                None => {
                    return Err(ElfError::MalformedHeader(format!(
                        "symbol table {} links to missing string table {}",
                        section.name, section.header.sh_link
                    )))
                }
            };

            tables.push(SymbolTable::new(
                section.data,
                strings,
                self.header.ident.class,
                self.header.ident.data,
            ));
        }

        Ok(tables)
    }
}
