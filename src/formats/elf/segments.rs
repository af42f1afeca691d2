//! Program header table management

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{file_slice, EndianRead};

/// Segment table for program header management
pub struct SegmentTable<'a> {
    headers: Vec<ProgramHeader>,
    data: &'a [u8],
}

impl<'a> SegmentTable<'a> {
    /// Parse segment table from ELF data, keeping header order
    pub fn parse(data: &'a [u8], header: &ElfHeader) -> Result<Self> {
        let ph_offset = header.e_phoff as usize;
        let ph_entsize = header.e_phentsize as usize;
        let ph_num = header.e_phnum as usize;

        if ph_num == 0 || ph_offset == 0 {
            return Ok(Self {
                headers: Vec::new(),
                data,
            });
        }

        let total_size = ph_num * ph_entsize;
        if ph_offset.saturating_add(total_size) > data.len() {
            return Err(ElfError::Truncated {
                offset: ph_offset,
                needed: total_size,
            });
        }

        let mut headers = Vec::with_capacity(ph_num);
        for i in 0..ph_num {
            let offset = ph_offset + i * ph_entsize;
            headers.push(parse_program_header(
                data,
                offset,
                header.ident.class,
                header.ident.data,
            )?);
        }

        Ok(Self { headers, data })
    }

    /// Get all PT_LOAD segments; a segment whose file range lies outside the image is an error.
    pub fn load_segments(&self) -> impl Iterator<Item = Result<Segment<'a>>> + '_ {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, ph)| ph.p_type == PT_LOAD)
            .map(move |(index, header)| self.create_segment(index, header))
    }

    /// Whether any PT_LOAD segment exists
    pub fn has_load_segments(&self) -> bool {
        self.headers.iter().any(|ph| ph.p_type == PT_LOAD)
    }

    /// Count segments
    pub fn count(&self) -> usize {
        self.headers.len()
    }

    fn create_segment(&self, index: usize, header: &ProgramHeader) -> Result<Segment<'a>> {
        if header.p_filesz > header.p_memsz {
            return Err(ElfError::MalformedHeader(format!(
                "segment {} file size {:#x} exceeds memory size {:#x}",
                index, header.p_filesz, header.p_memsz
            )));
        }
        let data = file_slice(self.data, header.p_offset, header.p_filesz)?;
        Ok(Segment {
            index,
            header: *header,
            data,
        })
    }
}

/// Parse a single program header
fn parse_program_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: ElfData,
) -> Result<ProgramHeader> {
    match class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_offset: data.read_u32(offset + 4, endian)? as u64,
            p_vaddr: data.read_u32(offset + 8, endian)? as u64,
            p_filesz: data.read_u32(offset + 16, endian)? as u64,
            p_memsz: data.read_u32(offset + 20, endian)? as u64,
            p_flags: data.read_u32(offset + 24, endian)?,
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_flags: data.read_u32(offset + 4, endian)?,
            p_offset: data.read_u64(offset + 8, endian)?,
            p_vaddr: data.read_u64(offset + 16, endian)?,
            p_filesz: data.read_u64(offset + 32, endian)?,
            p_memsz: data.read_u64(offset + 40, endian)?,
        }),
    }
}
