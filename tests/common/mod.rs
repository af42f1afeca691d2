//! Common test utilities and helpers.
//!
//! `ElfBuilder` assembles small little-endian ELF64 images in memory so
//! ingestion tests do not depend on sample binaries.

#![allow(dead_code)]

pub const EM_X86_64: u16 = 62;
pub const EM_ARM: u16 = 40;
pub const EM_MIPS: u16 = 8;

pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_DYNSYM: u32 = 11;
const SHF_WRITE: u64 = 1;
const SHF_ALLOC: u64 = 2;
const SHF_EXECINSTR: u64 = 4;

/// A loadable region: one PT_LOAD segment plus a matching allocated section.
#[derive(Debug, Clone)]
pub struct RegionSpec {
    pub name: String,
    pub vaddr: u64,
    pub data: Vec<u8>,
    pub flags: u32,
}

/// A symbol table entry.
#[derive(Debug, Clone)]
pub struct SymSpec {
    /// Raw name bytes, so tests can store names that are not UTF-8.
    pub name: Vec<u8>,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
}

impl SymSpec {
    pub fn new(name: &str, value: u64, size: u64, st_type: u8) -> Self {
        Self::raw(name.as_bytes(), value, size, st_type)
    }

    pub fn raw(name: &[u8], value: u64, size: u64, st_type: u8) -> Self {
        Self {
            name: name.to_vec(),
            value,
            size,
            info: (STB_GLOBAL << 4) | st_type,
            other: 0,
            shndx: 1,
        }
    }

    pub fn shndx(mut self, shndx: u16) -> Self {
        self.shndx = shndx;
        self
    }

    pub fn other(mut self, other: u8) -> Self {
        self.other = other;
        self
    }
}

/// Builder for in-memory ELF64 little-endian images.
#[derive(Debug, Clone)]
pub struct ElfBuilder {
    e_type: u16,
    machine: u16,
    regions: Vec<RegionSpec>,
    symbols: Vec<SymSpec>,
    dynsyms: Vec<SymSpec>,
    program_headers: bool,
    symtab_garbage: usize,
}

impl ElfBuilder {
    pub fn new(machine: u16) -> Self {
        Self {
            e_type: ET_EXEC,
            machine,
            regions: Vec::new(),
            symbols: Vec::new(),
            dynsyms: Vec::new(),
            program_headers: true,
            symtab_garbage: 0,
        }
    }

    pub fn x86_64() -> Self {
        Self::new(EM_X86_64)
    }

    pub fn file_type(mut self, e_type: u16) -> Self {
        self.e_type = e_type;
        self
    }

    pub fn region(mut self, name: &str, vaddr: u64, data: &[u8], flags: u32) -> Self {
        self.regions.push(RegionSpec {
            name: name.to_string(),
            vaddr,
            data: data.to_vec(),
            flags,
        });
        self
    }

    pub fn symbol(mut self, sym: SymSpec) -> Self {
        self.symbols.push(sym);
        self
    }

    pub fn func(self, name: &str, value: u64, size: u64) -> Self {
        self.symbol(SymSpec::new(name, value, size, STT_FUNC))
    }

    pub fn object(self, name: &str, value: u64, size: u64) -> Self {
        self.symbol(SymSpec::new(name, value, size, STT_OBJECT))
    }

    pub fn dynamic(mut self, sym: SymSpec) -> Self {
        self.dynsyms.push(sym);
        self
    }

    /// Omit the program header table so loading falls back to sections.
    pub fn without_program_headers(mut self) -> Self {
        self.program_headers = false;
        self
    }

    /// Append a partial entry to `.symtab`, making the table corrupt after
    /// its complete entries.
    pub fn truncated_symtab(mut self, extra: usize) -> Self {
        self.symtab_garbage = extra;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = if self.program_headers {
            self.regions.len()
        } else {
            0
        };
        let phoff = 64usize;
        let mut out = vec![0u8; phoff + 56 * phnum];

        let mut region_offsets = Vec::new();
        for region in &self.regions {
            align(&mut out, 16);
            region_offsets.push(out.len());
            out.extend_from_slice(&region.data);
        }

        // Section layout: null, one per region, .symtab, .strtab, [.dynsym, .dynstr], .shstrtab
        let first_region = 1usize;
        let symtab_index = first_region + self.regions.len();
        let strtab_index = symtab_index + 1;
        let has_dyn = !self.dynsyms.is_empty();
        let dynsym_index = strtab_index + 1;
        let dynstr_index = dynsym_index + 1;
        let shstrtab_index = if has_dyn { dynstr_index + 1 } else { strtab_index + 1 };

        let (strtab, sym_names) = string_table(self.symbols.iter().map(|s| s.name.as_slice()));
        let mut symtab = symbol_entries(&self.symbols, &sym_names);
        symtab.extend(std::iter::repeat(0xAB).take(self.symtab_garbage));

        align(&mut out, 8);
        let symtab_off = out.len();
        out.extend_from_slice(&symtab);
        let strtab_off = out.len();
        out.extend_from_slice(&strtab);

        let (dynstr, dyn_names) = string_table(self.dynsyms.iter().map(|s| s.name.as_slice()));
        let dynsym = symbol_entries(&self.dynsyms, &dyn_names);
        align(&mut out, 8);
        let dynsym_off = out.len();
        if has_dyn {
            out.extend_from_slice(&dynsym);
        }
        let dynstr_off = out.len();
        if has_dyn {
            out.extend_from_slice(&dynstr);
        }

        let mut section_names: Vec<&str> = vec![""];
        section_names.extend(self.regions.iter().map(|r| r.name.as_str()));
        section_names.extend([".symtab", ".strtab"]);
        if has_dyn {
            section_names.extend([".dynsym", ".dynstr"]);
        }
        section_names.push(".shstrtab");
        let (shstrtab, sh_names) = string_table(section_names.iter().map(|n| n.as_bytes()));
        let shstrtab_off = out.len();
        out.extend_from_slice(&shstrtab);

        align(&mut out, 8);
        let shoff = out.len();
        let mut headers = Vec::new();
        headers.push(section_header(0, 0, 0, 0, 0, 0, 0, 0));
        for (i, region) in self.regions.iter().enumerate() {
            let mut flags = SHF_ALLOC;
            if region.flags & PF_W != 0 {
                flags |= SHF_WRITE;
            }
            if region.flags & PF_X != 0 {
                flags |= SHF_EXECINSTR;
            }
            headers.push(section_header(
                sh_names[first_region + i],
                SHT_PROGBITS,
                flags,
                region.vaddr,
                region_offsets[i] as u64,
                region.data.len() as u64,
                0,
                0,
            ));
        }
        headers.push(section_header(
            sh_names[symtab_index],
            SHT_SYMTAB,
            0,
            0,
            symtab_off as u64,
            symtab.len() as u64,
            strtab_index as u32,
            24,
        ));
        headers.push(section_header(
            sh_names[strtab_index],
            SHT_STRTAB,
            0,
            0,
            strtab_off as u64,
            strtab.len() as u64,
            0,
            0,
        ));
        if has_dyn {
            headers.push(section_header(
                sh_names[dynsym_index],
                SHT_DYNSYM,
                SHF_ALLOC,
                0,
                dynsym_off as u64,
                dynsym.len() as u64,
                dynstr_index as u32,
                24,
            ));
            headers.push(section_header(
                sh_names[dynstr_index],
                SHT_STRTAB,
                SHF_ALLOC,
                0,
                dynstr_off as u64,
                dynstr.len() as u64,
                0,
                0,
            ));
        }
        headers.push(section_header(
            sh_names[shstrtab_index],
            SHT_STRTAB,
            0,
            0,
            shstrtab_off as u64,
            shstrtab.len() as u64,
            0,
            0,
        ));
        let shnum = headers.len();
        for h in headers {
            out.extend_from_slice(&h);
        }

        if self.program_headers {
            for (i, region) in self.regions.iter().enumerate() {
                let mut ph = Vec::with_capacity(56);
                ph.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
                ph.extend_from_slice(&region.flags.to_le_bytes());
                ph.extend_from_slice(&(region_offsets[i] as u64).to_le_bytes());
                ph.extend_from_slice(&region.vaddr.to_le_bytes());
                ph.extend_from_slice(&region.vaddr.to_le_bytes());
                ph.extend_from_slice(&(region.data.len() as u64).to_le_bytes());
                ph.extend_from_slice(&(region.data.len() as u64).to_le_bytes());
                ph.extend_from_slice(&0x1000u64.to_le_bytes());
                let at = phoff + i * 56;
                out[at..at + 56].copy_from_slice(&ph);
            }
        }

        // ELF header
        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // little-endian
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        out[18..20].copy_from_slice(&self.machine.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        let entry = self.regions.first().map_or(0, |r| r.vaddr);
        out[24..32].copy_from_slice(&entry.to_le_bytes());
        let phoff_field = if phnum > 0 { phoff as u64 } else { 0 };
        out[32..40].copy_from_slice(&phoff_field.to_le_bytes());
        out[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        out[52..54].copy_from_slice(&64u16.to_le_bytes());
        out[54..56].copy_from_slice(&56u16.to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());
        out[58..60].copy_from_slice(&64u16.to_le_bytes());
        out[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        out[62..64].copy_from_slice(&(shstrtab_index as u16).to_le_bytes());

        out
    }
}

fn align(out: &mut Vec<u8>, to: usize) {
    while out.len() % to != 0 {
        out.push(0);
    }
}

fn string_table<'a>(names: impl Iterator<Item = &'a [u8]>) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::new();
    for name in names {
        if name.is_empty() {
            offsets.push(0);
            continue;
        }
        offsets.push(table.len() as u32);
        table.extend_from_slice(name);
        table.push(0);
    }
    (table, offsets)
}

fn symbol_entries(symbols: &[SymSpec], names: &[u32]) -> Vec<u8> {
    // Entry 0 is the reserved null symbol
    let mut out = vec![0u8; 24];
    for (sym, &name) in symbols.iter().zip(names) {
        out.extend_from_slice(&name.to_le_bytes());
        out.push(sym.info);
        out.push(sym.other);
        out.extend_from_slice(&sym.shndx.to_le_bytes());
        out.extend_from_slice(&sym.value.to_le_bytes());
        out.extend_from_slice(&sym.size.to_le_bytes());
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn section_header(
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
) -> Vec<u8> {
    let mut h = Vec::with_capacity(64);
    h.extend_from_slice(&name.to_le_bytes());
    h.extend_from_slice(&sh_type.to_le_bytes());
    h.extend_from_slice(&flags.to_le_bytes());
    h.extend_from_slice(&addr.to_le_bytes());
    h.extend_from_slice(&offset.to_le_bytes());
    h.extend_from_slice(&size.to_le_bytes());
    h.extend_from_slice(&link.to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes()); // sh_info
    h.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
    h.extend_from_slice(&entsize.to_le_bytes());
    h
}
