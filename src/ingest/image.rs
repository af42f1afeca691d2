//! Binary image readers.
//!
//! Ingestion only needs an architecture tag, the loadable regions and the
//! symbol entries of an image. `ImageReader` captures that shape; `ElfImage`
//! provides it for ELF files.

use crate::config::{IngestConfig, LoadPolicy};
use crate::error::IngestError;
use crate::formats::elf::sections::SectionTable;
use crate::formats::elf::segments::SegmentTable;
use crate::formats::elf::symbols::SymbolTable;
use crate::formats::elf::{
    ElfHeader, ElfParser, ElfType, SHN_LORESERVE, SHN_UNDEF, STB_GLOBAL, STB_LOCAL, STB_WEAK,
    STT_COMMON, STT_FILE, STT_FUNC, STT_NOTYPE, STT_OBJECT, STT_SECTION, STT_TLS,
};
use crate::ingest::arch::Arch;
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

/// Access permissions of a loadable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.exec { 'x' } else { '-' }
        )
    }
}

/// One loadable region: a segment, or a section when there are no segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord<'a> {
    /// Position in the image's header table.
    pub index: usize,
    pub name: String,
    pub addr: u64,
    /// In-memory size, at least `data.len()`.
    pub mem_size: u64,
    pub file_offset: u64,
    /// File-backed contents.
    pub data: &'a [u8],
    pub perms: Perms,
}

/// Symbol type, as stored in the `kind` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    Other(u8),
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::NoType => "notype",
            SymbolKind::Object => "object",
            SymbolKind::Func => "func",
            SymbolKind::Section => "section",
            SymbolKind::File => "file",
            SymbolKind::Common => "common",
            SymbolKind::Tls => "tls",
            SymbolKind::Other(_) => "other",
        }
    }
}

impl From<u8> for SymbolKind {
    fn from(st_type: u8) -> Self {
        match st_type {
            STT_NOTYPE => SymbolKind::NoType,
            STT_OBJECT => SymbolKind::Object,
            STT_FUNC => SymbolKind::Func,
            STT_SECTION => SymbolKind::Section,
            STT_FILE => SymbolKind::File,
            STT_COMMON => SymbolKind::Common,
            STT_TLS => SymbolKind::Tls,
            other => SymbolKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl SymbolBinding {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolBinding::Local => "local",
            SymbolBinding::Global => "global",
            SymbolBinding::Weak => "weak",
            SymbolBinding::Other(_) => "other",
        }
    }
}

impl From<u8> for SymbolBinding {
    fn from(st_bind: u8) -> Self {
        match st_bind {
            STB_LOCAL => SymbolBinding::Local,
            STB_GLOBAL => SymbolBinding::Global,
            STB_WEAK => SymbolBinding::Weak,
            other => SymbolBinding::Other(other),
        }
    }
}

/// One symbol table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord<'a> {
    /// Symbol name; bytes that are not UTF-8 are replaced with U+FFFD.
    pub name: Cow<'a, str>,
    pub value: u64,
    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
    pub shndx: u16,
    /// Raw `st_other` byte.
    pub other: u8,
}

impl SymbolRecord<'_> {
    /// Defined in a real section (not undefined, absolute or common).
    pub fn has_section(&self) -> bool {
        self.shndx != SHN_UNDEF && self.shndx < SHN_LORESERVE
    }
}

/// What ingestion reads from a binary image.
///
/// Both iterators yield entries in image order and stop being useful after
/// their first error.
pub trait ImageReader {
    fn arch(&self) -> Arch;

    fn segments(&self) -> Box<dyn Iterator<Item = Result<SegmentRecord<'_>, IngestError>> + '_>;

    fn symbols(&self) -> Box<dyn Iterator<Item = Result<SymbolRecord<'_>, IngestError>> + '_>;
}

/// An ELF image prepared for ingestion.
pub struct ElfImage<'data> {
    header: ElfHeader,
    sections: SectionTable<'data>,
    segments: SegmentTable<'data>,
    symbol_tables: Vec<SymbolTable<'data>>,
    use_segments: bool,
}

impl<'data> ElfImage<'data> {
    /// Parse the header and tables of `data`.
    ///
    /// # Errors
    /// `Elf` for malformed images, `UnsupportedImage` for relocatable objects
    /// and images of unknown type.
    pub fn parse(data: &'data [u8], config: &IngestConfig) -> Result<Self, IngestError> {
        let parser = ElfParser::parse(data)?;
        let header = *parser.header();

        match header.file_type() {
            ElfType::Relocatable => {
                return Err(IngestError::UnsupportedImage(
                    "relocatable object; symbol values are section-relative".to_string(),
                ))
            }
            ElfType::None => {
                return Err(IngestError::UnsupportedImage(format!(
                    "unknown ELF type {}",
                    header.e_type
                )))
            }
            ElfType::Executable | ElfType::SharedObject | ElfType::Core => {}
        }

        let sections = parser.sections()?;
        let segments = parser.segments()?;
        let symbol_tables = parser.symbol_tables(config.include_dynamic_symbols)?;
        let use_segments =
            config.load_policy == LoadPolicy::Segments && segments.has_load_segments();

        debug!(
            machine = ?header.machine(),
            sections = sections.count(),
            segments = segments.count(),
            symbol_tables = symbol_tables.len(),
            use_segments,
            "Parsed ELF image"
        );

        Ok(Self {
            header,
            sections,
            segments,
            symbol_tables,
            use_segments,
        })
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    fn load_segments(&self) -> impl Iterator<Item = Result<SegmentRecord<'_>, IngestError>> + '_ {
        self.segments
            .load_segments()
            .enumerate()
            .map(|(ordinal, segment)| {
                segment
                    .map(|segment| SegmentRecord {
                        index: segment.index,
                        name: format!("seg{}", segment.index),
                        addr: segment.header.p_vaddr,
                        mem_size: segment.header.p_memsz,
                        file_offset: segment.header.p_offset,
                        data: segment.data,
                        perms: Perms {
                            read: segment.is_readable(),
                            write: segment.is_writable(),
                            exec: segment.is_executable(),
                        },
                    })
                    .map_err(|e| IngestError::CorruptSegment {
                        index: ordinal,
                        reason: e.to_string(),
                    })
            })
    }

    fn alloc_sections(&self) -> impl Iterator<Item = Result<SegmentRecord<'_>, IngestError>> + '_ {
        self.sections
            .sections()
            .enumerate()
            .filter_map(|(index, section)| match section {
                Ok(section) if !section.is_allocated() => None,
                Ok(section) => Some(Ok(SegmentRecord {
                    index: section.index,
                    name: if section.name.is_empty() {
                        format!("section{}", section.index)
                    } else {
                        section.name.to_string()
                    },
                    addr: section.addr(),
                    mem_size: section.size(),
                    file_offset: section.header.sh_offset,
                    data: section.data,
                    perms: Perms {
                        read: true,
                        write: section.is_writable(),
                        exec: section.is_executable(),
                    },
                })),
                Err(e) => Some(Err(IngestError::CorruptSegment {
                    index,
                    reason: e.to_string(),
                })),
            })
    }
}

impl ImageReader for ElfImage<'_> {
    fn arch(&self) -> Arch {
        Arch::from(self.header.machine())
    }

    fn segments(&self) -> Box<dyn Iterator<Item = Result<SegmentRecord<'_>, IngestError>> + '_> {
        if self.use_segments {
            Box::new(self.load_segments())
        } else {
            Box::new(self.alloc_sections())
        }
    }

    fn symbols(&self) -> Box<dyn Iterator<Item = Result<SymbolRecord<'_>, IngestError>> + '_> {
        Box::new(
            self.symbol_tables
                .iter()
                .flat_map(|table| table.iter())
                .enumerate()
                .map(|(index, entry)| {
                    entry
                        .map(|info| SymbolRecord {
                            value: info.value(),
                            size: info.size(),
                            kind: SymbolKind::from(info.symbol.st_type()),
                            binding: SymbolBinding::from(info.symbol.st_bind()),
                            shndx: info.symbol.st_shndx,
                            other: info.symbol.st_other,
                            name: info.name,
                        })
                        .map_err(|e| IngestError::CorruptSymbol {
                            index,
                            reason: e.to_string(),
                        })
                }),
        )
    }
}
