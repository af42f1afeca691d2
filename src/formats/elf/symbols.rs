//! Symbol table parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{read_cstring_lossy, EndianRead};
use std::borrow::Cow;

/// A symbol table section (`SHT_SYMTAB` or `SHT_DYNSYM`) with its linked string table.
///
/// Entries are decoded lazily, in table order, so a corrupt entry surfaces
/// only when iteration reaches it.
pub struct SymbolTable<'a> {
    symbol_data: &'a [u8],
    strings: &'a [u8],
    class: ElfClass,
    endian: ElfData,
}

impl<'a> SymbolTable<'a> {
    pub fn new(symbol_data: &'a [u8], strings: &'a [u8], class: ElfClass, endian: ElfData) -> Self {
        Self {
            symbol_data,
            strings,
            class,
            endian,
        }
    }

    /// Number of entries, counting a trailing partial entry
    pub fn count(&self) -> usize {
        self.symbol_data.len().div_ceil(self.class.symbol_entry_size())
    }

    /// Iterate entries in table order
    pub fn iter(&self) -> impl Iterator<Item = Result<SymbolInfo<'a>>> + '_ {
        let entry_size = self.class.symbol_entry_size();
        self.symbol_data
            .chunks(entry_size)
            .enumerate()
            .map(move |(index, chunk)| {
                if chunk.len() < entry_size {
                    return Err(ElfError::Truncated {
                        offset: index * entry_size,
                        needed: entry_size,
                    });
                }
                let symbol = parse_symbol(chunk, self.class, self.endian)?;
                // Names are decoded lossily; a stray byte must not lose the symbol
                let name = if symbol.st_name == 0 {
                    Cow::Borrowed("")
                } else {
                    read_cstring_lossy(self.strings, symbol.st_name as usize)?
                };
                Ok(SymbolInfo {
                    index,
                    symbol,
                    name,
                })
            })
    }
}

/// Symbol information with name
#[derive(Debug, Clone)]
pub struct SymbolInfo<'a> {
    pub index: usize,
    pub symbol: Symbol,
    pub name: Cow<'a, str>,
}

impl<'a> SymbolInfo<'a> {
    pub fn value(&self) -> u64 {
        self.symbol.st_value
    }

    pub fn size(&self) -> u64 {
        self.symbol.st_size
    }

    pub fn is_function(&self) -> bool {
        self.symbol.is_function()
    }
}

/// Parse a single symbol entry
fn parse_symbol(data: &[u8], class: ElfClass, endian: ElfData) -> Result<Symbol> {
    match class {
        ElfClass::Elf32 => Ok(Symbol {
            st_name: data.read_u32(0, endian)?,
            st_value: data.read_u32(4, endian)? as u64,
            st_size: data.read_u32(8, endian)? as u64,
            st_info: data[12],
            st_other: data[13],
            st_shndx: data.read_u16(14, endian)?,
        }),
        ElfClass::Elf64 => Ok(Symbol {
            st_name: data.read_u32(0, endian)?,
            st_info: data[4],
            st_other: data[5],
            st_shndx: data.read_u16(6, endian)?,
            st_value: data.read_u64(8, endian)?,
            st_size: data.read_u64(16, endian)?,
        }),
    }
}
