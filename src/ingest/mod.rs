//! Ingestion: populate a main store from a binary image.
//!
//! Loadable regions become `sections`, named symbol entries become
//! `symbols`, and function symbols that do not overlap an earlier function
//! become `functions`. Everything happens in one transaction; an error at
//! any point leaves the store exactly as it was.
//!
//! Function overlaps are resolved first-inserted-wins in symbol table
//! order. Rejected functions and skipped symbols are reported to a
//! `DiagnosticSink` once the transaction has committed.
//!
//! Names never make an image fail to load: when a region, symbol or
//! function name is already held by a different range, the new range takes
//! the name and the earlier one stays indexed by address only.

pub mod arch;
pub mod diagnostics;
pub mod image;

pub use arch::{normalizer_for, Arch, ArmNormalizer, DefaultNormalizer, MipsNormalizer, SymbolNormalizer};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, TracingSink};
pub use image::{ElfImage, ImageReader, Perms, SegmentRecord, SymbolBinding, SymbolKind, SymbolRecord};

use crate::config::IngestConfig;
use crate::core::attr::{AttrValue, Attrs};
use crate::core::range::{Range, DATA_ATTR};
use crate::core::table::OnConflict;
use crate::error::{IngestError, RangeDbError, Result};
use crate::store::{MainTables, Store};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, error, info, info_span, trace};

/// Counts of what an ingestion stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub arch: Arch,
    /// Ranges added to `sections`.
    pub sections: usize,
    /// Distinct symbols added to `symbols`.
    pub symbols: usize,
    /// Ranges added to `functions`.
    pub functions: usize,
    /// Function symbols rejected for overlapping an earlier function.
    pub conflicts: usize,
    /// Symbols that could not be stored.
    pub skipped: usize,
}

impl IngestReport {
    fn new(arch: Arch) -> Self {
        Self {
            arch,
            sections: 0,
            symbols: 0,
            functions: 0,
            conflicts: 0,
            skipped: 0,
        }
    }
}

/// Ingest `image` with the normalizer for its architecture.
pub fn ingest<R: ImageReader + ?Sized>(
    image: &R,
    store: &Store<MainTables>,
    sink: &dyn DiagnosticSink,
) -> Result<IngestReport> {
    ingest_with(image, normalizer_for(image.arch()), store, sink)
}

/// Ingest `image` with an explicit normalizer.
pub fn ingest_with<R: ImageReader + ?Sized>(
    image: &R,
    normalizer: &dyn SymbolNormalizer,
    store: &Store<MainTables>,
    sink: &dyn DiagnosticSink,
) -> Result<IngestReport> {
    let arch = image.arch();
    let span = info_span!("ingest", arch = %arch);
    let _enter = span.enter();

    let mut txn = store.begin();
    let mut pending = Vec::new();

    let report = match populate(image, normalizer, &mut txn, &mut pending) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Ingestion aborted, store left unchanged");
            return Err(e);
        }
    };
    txn.commit()?;

    for diagnostic in pending {
        sink.report(diagnostic);
    }
    info!(
        sections = report.sections,
        symbols = report.symbols,
        functions = report.functions,
        conflicts = report.conflicts,
        skipped = report.skipped,
        "Ingestion committed"
    );
    Ok(report)
}

/// Parse `data` as an ELF image and ingest it.
pub fn ingest_bytes(
    data: &[u8],
    store: &Store<MainTables>,
    config: &IngestConfig,
    sink: &dyn DiagnosticSink,
) -> Result<IngestReport> {
    let image = ElfImage::parse(data, config)?;
    ingest(&image, store, sink)
}

/// Memory-map the ELF file at `path` and ingest it.
///
/// # Errors
/// `ImageTooLarge` when the file exceeds `config.max_image_size`.
pub fn ingest_path(
    path: impl AsRef<Path>,
    store: &Store<MainTables>,
    config: &IngestConfig,
    sink: &dyn DiagnosticSink,
) -> Result<IngestReport> {
    let path = path.as_ref();
    let file = File::open(path).map_err(IngestError::from)?;
    let size = file.metadata().map_err(IngestError::from)?.len();

    debug!(path = %path.display(), size, limit = config.max_image_size, "Opening image");
    if size > config.max_image_size {
        return Err(IngestError::ImageTooLarge {
            limit: config.max_image_size,
            found: size,
        }
        .into());
    }
    if size == 0 {
        // memmap cannot map empty files
        return ingest_bytes(&[], store, config, sink);
    }

    // Safety: The file is backed by a real file on disk and we only request a read-only map.
    let mmap = unsafe { Mmap::map(&file) }.map_err(IngestError::from)?;
    ingest_bytes(&mmap, store, config, sink)
}

fn populate<R: ImageReader + ?Sized>(
    image: &R,
    normalizer: &dyn SymbolNormalizer,
    tables: &mut MainTables,
    pending: &mut Vec<Diagnostic>,
) -> Result<IngestReport> {
    let mut report = IngestReport::new(image.arch());
    load_regions(image, tables, &mut report)?;
    load_symbols(image, normalizer, tables, &mut report, pending)?;
    Ok(report)
}

fn load_regions<R: ImageReader + ?Sized>(
    image: &R,
    tables: &mut MainTables,
    report: &mut IngestReport,
) -> Result<()> {
    for region in image.segments() {
        let region = region?;
        let corrupt = |e: RangeDbError| IngestError::CorruptSegment {
            index: region.index,
            reason: e.to_string(),
        };

        let size = region.mem_size.max(region.data.len() as u64);
        let range = Range::new(region.addr, size)
            .map_err(corrupt)?
            .with_name(region.name.clone())
            .with_attr(DATA_ATTR, Bytes::copy_from_slice(region.data))
            .with_attr("perms", region.perms.to_string())
            .with_attr("offset", region.file_offset)
            .with_attr("file_size", region.data.len() as u64);

        debug!(
            name = %region.name,
            addr = format_args!("{:#x}", region.addr),
            size,
            perms = %region.perms,
            "Loading region"
        );
        tables
            .sections
            .insert(range, OnConflict::TakeName)
            .map_err(corrupt)?;
        report.sections += 1;
    }
    Ok(())
}

fn symbol_attrs(sym: &SymbolRecord<'_>) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("kind".to_string(), AttrValue::from(sym.kind.as_str()));
    attrs.insert("binding".to_string(), AttrValue::from(sym.binding.as_str()));
    attrs.insert("shndx".to_string(), AttrValue::from(u64::from(sym.shndx)));
    attrs.insert("size".to_string(), AttrValue::from(sym.size));
    if sym.other != 0 {
        attrs.insert("other".to_string(), AttrValue::from(u64::from(sym.other)));
    }
    attrs
}

fn skip(report: &mut IngestReport, pending: &mut Vec<Diagnostic>, sym: &SymbolRecord<'_>, reason: String) {
    report.skipped += 1;
    pending.push(Diagnostic::SymbolSkipped {
        name: sym.name.to_string(),
        addr: sym.value,
        reason,
    });
}

fn load_symbols<R: ImageReader + ?Sized>(
    image: &R,
    normalizer: &dyn SymbolNormalizer,
    tables: &mut MainTables,
    report: &mut IngestReport,
    pending: &mut Vec<Diagnostic>,
) -> Result<()> {
    for entry in image.symbols() {
        let sym = entry?;
        if sym.name.is_empty() {
            continue;
        }
        if !sym.has_section() {
            trace!(symbol = %sym.name, shndx = sym.shndx, "Symbol has no section");
            continue;
        }

        let mut range = match Range::new(sym.value, sym.size) {
            Ok(range) => range.with_name(&*sym.name).with_attrs(symbol_attrs(&sym)),
            Err(e) => {
                skip(report, pending, &sym, e.to_string());
                continue;
            }
        };
        if let Err(e) = normalizer.normalize_symbol(&mut range) {
            skip(report, pending, &sym, e.to_string());
            continue;
        }

        // The same symbol often appears in both .symtab and .dynsym
        let holder = tables
            .symbols
            .get_by_name(&sym.name)
            .map(|held| (held.start(), held.end()));
        if holder == Some((range.start(), range.end())) {
            tables.symbols.insert(range, OnConflict::Fail)?;
            trace!(symbol = %sym.name, "Merged duplicate symbol entry");
            continue;
        }
        if let Some((start, _)) = holder {
            debug!(
                symbol = %sym.name,
                from = format_args!("{:#x}", start),
                to = format_args!("{:#x}", range.start()),
                "Symbol name moved to later entry"
            );
        }
        tables.symbols.insert(range.clone(), OnConflict::TakeName)?;
        report.symbols += 1;

        if sym.kind != SymbolKind::Func {
            continue;
        }
        let incumbents: Vec<String> = tables
            .functions
            .iter_where_overlaps(range.start(), range.end())
            .map(|f| f.name().map_or_else(|| f.to_string(), str::to_string))
            .collect();

        if incumbents.is_empty() {
            tables.functions.insert(range, OnConflict::TakeName)?;
            report.functions += 1;
        } else {
            report.conflicts += 1;
            pending.push(Diagnostic::FunctionConflict {
                rejected: sym.name.to_string(),
                start: range.start(),
                end: range.end(),
                incumbents,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attr::AttrValue;

    /// In-memory image for driving the pipeline without an ELF file.
    struct FakeImage {
        arch: Arch,
        regions: Vec<(u64, Vec<u8>)>,
        symbols: Vec<(&'static str, u64, u64, SymbolKind)>,
        /// Yield a corrupt entry after this many symbols.
        fail_after: Option<usize>,
    }

    impl FakeImage {
        fn new(symbols: Vec<(&'static str, u64, u64, SymbolKind)>) -> Self {
            Self {
                arch: Arch::X86_64,
                regions: vec![(0, vec![0xcc; 0x40])],
                symbols,
                fail_after: None,
            }
        }
    }

    impl ImageReader for FakeImage {
        fn arch(&self) -> Arch {
            self.arch
        }

        fn segments(&self) -> Box<dyn Iterator<Item = std::result::Result<SegmentRecord<'_>, IngestError>> + '_> {
            Box::new(self.regions.iter().enumerate().map(|(index, (addr, data))| {
                Ok::<_, IngestError>(SegmentRecord {
                    index,
                    name: format!("seg{}", index),
                    addr: *addr,
                    mem_size: data.len() as u64,
                    file_offset: 0,
                    data,
                    perms: Perms {
                        read: true,
                        write: false,
                        exec: true,
                    },
                })
            }))
        }

        fn symbols(&self) -> Box<dyn Iterator<Item = std::result::Result<SymbolRecord<'_>, IngestError>> + '_> {
            let good = self.symbols.iter().map(|&(name, value, size, kind)| {
                Ok::<_, IngestError>(SymbolRecord {
                    name: name.into(),
                    value,
                    size,
                    kind,
                    binding: SymbolBinding::Global,
                    shndx: 1,
                    other: 0,
                })
            });
            match self.fail_after {
                Some(n) => Box::new(good.take(n).chain(std::iter::once(Err(
                    IngestError::CorruptSymbol {
                        index: n,
                        reason: "truncated".to_string(),
                    },
                )))),
                None => Box::new(good),
            }
        }
    }

    #[test]
    fn test_function_conflict_first_inserted_wins() {
        let image = FakeImage::new(vec![
            ("f1", 10, 10, SymbolKind::Func),
            ("f2", 15, 10, SymbolKind::Func),
        ]);
        let store = Store::new();
        let sink = CollectingSink::new();
        let report = ingest(&image, &store, &sink).unwrap();

        assert_eq!(report.functions, 1);
        assert_eq!(report.symbols, 2);
        assert_eq!(report.conflicts, 1);

        let tables = store.read();
        assert!(tables.functions.get_by_name("f1").is_some());
        assert!(tables.functions.get_by_name("f2").is_none());
        assert!(tables.symbols.get_by_name("f2").is_some());
        assert_eq!(
            sink.diagnostics(),
            vec![Diagnostic::FunctionConflict {
                rejected: "f2".to_string(),
                start: 15,
                end: 25,
                incumbents: vec!["f1".to_string()],
            }]
        );
    }

    #[test]
    fn test_corrupt_symbol_rolls_back_everything() {
        let mut image = FakeImage::new(vec![
            ("a", 0x10, 4, SymbolKind::Func),
            ("b", 0x20, 4, SymbolKind::Object),
            ("c", 0x30, 4, SymbolKind::Func),
        ]);
        image.fail_after = Some(2);
        let store = Store::new();
        let sink = CollectingSink::new();

        let err = ingest(&image, &store, &sink).unwrap_err();
        assert!(matches!(
            err,
            RangeDbError::Ingest(IngestError::CorruptSymbol { index: 2, .. })
        ));

        let tables = store.read();
        assert!(tables.sections.is_empty());
        assert!(tables.symbols.is_empty());
        assert!(tables.functions.is_empty());
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_symbol_attrs_and_minimum_length() {
        let image = FakeImage::new(vec![("label", 0x30, 0, SymbolKind::NoType)]);
        let store = Store::new();
        ingest(&image, &store, &TracingSink).unwrap();

        let tables = store.read();
        let label = tables.symbols.get_at(0x30).unwrap();
        assert_eq!(label.len(), 1);
        assert_eq!(label.attr("kind").and_then(AttrValue::as_str), Some("notype"));
        assert_eq!(label.attr("binding").and_then(AttrValue::as_str), Some("global"));
        assert_eq!(label.attr("size").and_then(AttrValue::as_u64), Some(0));
        assert!(tables.functions.is_empty());
    }

    #[test]
    fn test_region_carries_bytes() {
        let image = FakeImage::new(Vec::new());
        let store = Store::new();
        let report = ingest(&image, &store, &TracingSink).unwrap();
        assert_eq!(report.sections, 1);

        let tables = store.read();
        let seg = tables.sections.get_by_name("seg0").unwrap();
        assert_eq!((seg.start(), seg.end()), (0, 0x40));
        assert_eq!(seg.data().map(|d| d.len()), Some(0x40));
        assert_eq!(seg.attr("perms").and_then(AttrValue::as_str), Some("r-x"));
    }

    #[test]
    fn test_overflowing_symbol_is_skipped() {
        let image = FakeImage::new(vec![
            ("edge", u64::MAX - 1, 8, SymbolKind::Object),
            ("ok", 0x10, 4, SymbolKind::Object),
        ]);
        let store = Store::new();
        let sink = CollectingSink::new();
        let report = ingest(&image, &store, &sink).unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.symbols, 1);
        assert!(matches!(
            sink.diagnostics().as_slice(),
            [Diagnostic::SymbolSkipped { name, .. }] if name == "edge"
        ));
    }

    #[test]
    fn test_duplicate_symbol_entries() {
        let image = FakeImage::new(vec![
            ("main", 0x10, 8, SymbolKind::Func),
            ("main", 0x10, 8, SymbolKind::Func),
            ("main", 0x20, 8, SymbolKind::Func),
        ]);
        let store = Store::new();
        let sink = CollectingSink::new();
        let report = ingest(&image, &store, &sink).unwrap();

        // The exact repeat merges; the entry elsewhere takes the name
        assert_eq!(report.symbols, 2);
        assert_eq!(report.functions, 2);
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.skipped, 0);
        assert!(sink.diagnostics().is_empty());

        let tables = store.read();
        assert_eq!(tables.symbols.len(), 2);
        assert_eq!(tables.symbols.get_by_name("main").map(|r| r.start()), Some(0x20));
        assert_eq!(tables.symbols.get_at(0x10).map(|r| r.name()), Some(None));
        assert_eq!(tables.functions.get_by_name("main").map(|r| r.start()), Some(0x20));
        assert!(tables.functions.get_at(0x10).is_some());
    }

    #[test]
    fn test_second_image_into_same_store() {
        let store = Store::new();
        ingest(&FakeImage::new(vec![("a", 0x10, 4, SymbolKind::Func)]), &store, &TracingSink).unwrap();

        let mut second = FakeImage::new(vec![("b", 0x1010, 4, SymbolKind::Func)]);
        second.regions = vec![(0x1000, vec![0x90; 0x80])];
        let report = ingest(&second, &store, &TracingSink).unwrap();
        assert_eq!(report.sections, 1);

        let tables = store.read();
        assert_eq!(tables.sections.len(), 2);
        assert_eq!(tables.sections.get_by_name("seg0").map(|r| r.start()), Some(0x1000));
        assert_eq!(tables.sections.get_at(0x20).map(|r| r.len()), Some(0x40));
        assert_eq!(tables.functions.len(), 2);
    }

    #[test]
    fn test_arm_image_uses_thumb_normalizer() {
        let mut image = FakeImage::new(vec![("thumb_fn", 0x8001, 0x10, SymbolKind::Func)]);
        image.arch = Arch::Arm;
        let store = Store::new();
        ingest(&image, &store, &TracingSink).unwrap();

        let tables = store.read();
        let f = tables.functions.get_by_name("thumb_fn").unwrap();
        assert_eq!(f.start(), 0x8000);
        assert_eq!(f.attr("thumb").and_then(AttrValue::as_bool), Some(true));
    }
}
