//! Section table management

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{file_slice, read_cstring, EndianRead};

/// Section header table with the section-name string table resolved
pub struct SectionTable<'a> {
    headers: Vec<SectionHeader>,
    strings: &'a [u8],
    data: &'a [u8],
}

impl<'a> SectionTable<'a> {
    /// Parse section table from ELF data
    pub fn parse(data: &'a [u8], header: &ElfHeader) -> Result<Self> {
        let sh_offset = header.e_shoff as usize;
        let sh_entsize = header.e_shentsize as usize;
        let sh_num = header.e_shnum as usize;

        if sh_num == 0 || sh_offset == 0 {
            return Ok(Self {
                headers: Vec::new(),
                strings: &[],
                data,
            });
        }

        let total_size = sh_num * sh_entsize;
        if sh_offset.saturating_add(total_size) > data.len() {
            return Err(ElfError::Truncated {
                offset: sh_offset,
                needed: total_size,
            });
        }

        let mut headers = Vec::with_capacity(sh_num);
        for i in 0..sh_num {
            let offset = sh_offset + i * sh_entsize;
            headers.push(parse_section_header(
                data,
                offset,
                header.ident.class,
                header.ident.data,
            )?);
        }

        // A missing or out-of-bounds name table only costs us the names
        let strings = headers
            .get(header.e_shstrndx as usize)
            .and_then(|sh| file_slice(data, sh.sh_offset, sh.sh_size).ok())
            .unwrap_or(&[]);

        Ok(Self {
            headers,
            strings,
            data,
        })
    }

    /// Get section by index; fails when its file-backed contents lie outside the image.
    pub fn by_index(&self, index: usize) -> Option<Result<Section<'a>>> {
        let header = *self.headers.get(index)?;
        let name = read_cstring(self.strings, header.sh_name as usize).unwrap_or("");
        let data = if header.sh_type == SHT_NOBITS || header.sh_type == SHT_NULL {
            Ok(&[][..])
        } else {
            file_slice(self.data, header.sh_offset, header.sh_size)
        };
        Some(data.map(|data| Section {
            index,
            header,
            name,
            data,
        }))
    }

    /// Iterate all sections in header order
    pub fn sections(&self) -> impl Iterator<Item = Result<Section<'a>>> + '_ {
        (0..self.headers.len()).filter_map(move |i| self.by_index(i))
    }

    /// Count sections
    pub fn count(&self) -> usize {
        self.headers.len()
    }
}

/// Parse a single section header
fn parse_section_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: ElfData,
) -> Result<SectionHeader> {
    match class {
        ElfClass::Elf32 => Ok(SectionHeader {
            sh_name: data.read_u32(offset, endian)?,
            sh_type: data.read_u32(offset + 4, endian)?,
            sh_flags: data.read_u32(offset + 8, endian)? as u64,
            sh_addr: data.read_u32(offset + 12, endian)? as u64,
            sh_offset: data.read_u32(offset + 16, endian)? as u64,
            sh_size: data.read_u32(offset + 20, endian)? as u64,
            sh_link: data.read_u32(offset + 24, endian)?,
            sh_entsize: data.read_u32(offset + 36, endian)? as u64,
        }),
        ElfClass::Elf64 => Ok(SectionHeader {
            sh_name: data.read_u32(offset, endian)?,
            sh_type: data.read_u32(offset + 4, endian)?,
            sh_flags: data.read_u64(offset + 8, endian)?,
            sh_addr: data.read_u64(offset + 16, endian)?,
            sh_offset: data.read_u64(offset + 24, endian)?,
            sh_size: data.read_u64(offset + 32, endian)?,
            sh_link: data.read_u32(offset + 40, endian)?,
            sh_entsize: data.read_u64(offset + 56, endian)?,
        }),
    }
}
