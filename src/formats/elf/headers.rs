//! ELF header parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    if data.len() < 16 {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: 16,
        });
    }

    if &data[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }

    Ok(ElfIdent {
        class: ElfClass::from_u8(data[4])?,
        data: ElfData::from_u8(data[5])?,
        version: data[6],
        osabi: data[7],
    })
}

/// Parse ELF header
pub fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    let ident = parse_ident(data)?;

    let (header_size, phentsize, shentsize) = match ident.class {
        ElfClass::Elf32 => (52usize, 32usize, 40usize),
        ElfClass::Elf64 => (64, 56, 64),
    };

    if data.len() < header_size {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: header_size,
        });
    }

    let endian = ident.data;
    let e_type = data.read_u16(16, endian)?;
    let e_machine = data.read_u16(18, endian)?;

    // Offsets of the class-dependent fields: entry, phoff, shoff, then the 16-bit tail
    let (e_entry, e_phoff, e_shoff, tail) = match ident.class {
        ElfClass::Elf32 => (
            data.read_u32(24, endian)? as u64,
            data.read_u32(28, endian)? as u64,
            data.read_u32(32, endian)? as u64,
            36,
        ),
        ElfClass::Elf64 => (
            data.read_u64(24, endian)?,
            data.read_u64(32, endian)?,
            data.read_u64(40, endian)?,
            48,
        ),
    };

    let e_flags = data.read_u32(tail, endian)?;
    let e_ehsize = data.read_u16(tail + 4, endian)?;
    let e_phentsize = data.read_u16(tail + 6, endian)?;
    let e_phnum = data.read_u16(tail + 8, endian)?;
    let e_shentsize = data.read_u16(tail + 10, endian)?;
    let e_shnum = data.read_u16(tail + 12, endian)?;
    let e_shstrndx = data.read_u16(tail + 14, endian)?;

    if e_ehsize as usize != header_size {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_ehsize: expected {}, got {}",
            header_size, e_ehsize
        )));
    }
    if e_phnum > 0 && e_phentsize as usize != phentsize {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_phentsize: expected {}, got {}",
            phentsize, e_phentsize
        )));
    }
    if e_shnum > 0 && e_shentsize as usize != shentsize {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_shentsize: expected {}, got {}",
            shentsize, e_shentsize
        )));
    }

    Ok(ElfHeader {
        ident,
        e_type,
        e_machine,
        e_entry,
        e_phoff,
        e_shoff,
        e_flags,
        e_phentsize,
        e_phnum,
        e_shentsize,
        e_shnum,
        e_shstrndx,
    })
}
