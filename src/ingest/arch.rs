//! Architecture identification and per-architecture symbol normalization.
//!
//! Some architectures encode an execution mode in the low bit of function
//! symbol addresses (ARM Thumb, MIPS16 and microMIPS). A `SymbolNormalizer`
//! removes such quirks so that symbol ranges cover the real code bytes.

use crate::core::attr::AttrValue;
use crate::core::range::Range;
use crate::error::Result;
use crate::formats::elf::ElfMachine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute set on ranges whose address carried the Thumb bit.
pub const THUMB_ATTR: &str = "thumb";
/// Attribute naming the compressed MIPS ISA of a function.
pub const MIPS_ISA_ATTR: &str = "isa";

/// Target architecture of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    AArch64,
    Mips,
    PowerPC,
    PowerPC64,
    RiscV,
    Unknown,
}

impl From<ElfMachine> for Arch {
    fn from(machine: ElfMachine) -> Self {
        match machine {
            ElfMachine::X86 => Arch::X86,
            ElfMachine::X86_64 => Arch::X86_64,
            ElfMachine::ARM => Arch::Arm,
            ElfMachine::AArch64 => Arch::AArch64,
            ElfMachine::Mips => Arch::Mips,
            ElfMachine::PowerPC => Arch::PowerPC,
            ElfMachine::PowerPC64 => Arch::PowerPC64,
            ElfMachine::RiscV => Arch::RiscV,
            ElfMachine::None | ElfMachine::Other(_) => Arch::Unknown,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm => "arm",
            Arch::AArch64 => "aarch64",
            Arch::Mips => "mips",
            Arch::PowerPC => "powerpc",
            Arch::PowerPC64 => "powerpc64",
            Arch::RiscV => "riscv",
            Arch::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Canonicalizes a freshly built symbol range before it is stored.
///
/// The range already carries the symbol's `kind` attribute (and `other`
/// when the entry's `st_other` byte is non-zero).
pub trait SymbolNormalizer: Send + Sync {
    fn normalize_symbol(&self, range: &mut Range) -> Result<()>;
}

/// Leaves every range untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNormalizer;

impl SymbolNormalizer for DefaultNormalizer {
    fn normalize_symbol(&self, _range: &mut Range) -> Result<()> {
        Ok(())
    }
}

/// Clears the Thumb bit of ARM function addresses and tags the range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmNormalizer;

impl SymbolNormalizer for ArmNormalizer {
    fn normalize_symbol(&self, range: &mut Range) -> Result<()> {
        if is_function(range) && range.start() & 1 == 1 {
            range.rebase(range.start() & !1)?;
            range.set_attr(THUMB_ATTR, true);
        }
        Ok(())
    }
}

/// Clears the ISA bit of MIPS16 and microMIPS function addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct MipsNormalizer;

const STO_MIPS_ISA: u64 = 0xc0;
const STO_MICROMIPS: u64 = 0x80;
const STO_MIPS16: u64 = 0xf0;

impl SymbolNormalizer for MipsNormalizer {
    fn normalize_symbol(&self, range: &mut Range) -> Result<()> {
        if !is_function(range) {
            return Ok(());
        }
        let other = range.attr("other").and_then(AttrValue::as_u64).unwrap_or(0);
        let isa = if other & STO_MIPS16 == STO_MIPS16 {
            "mips16"
        } else if other & STO_MIPS_ISA == STO_MICROMIPS {
            "micromips"
        } else {
            return Ok(());
        };
        if range.start() & 1 == 1 {
            range.rebase(range.start() & !1)?;
        }
        range.set_attr(MIPS_ISA_ATTR, isa);
        Ok(())
    }
}

fn is_function(range: &Range) -> bool {
    range.attr("kind").and_then(AttrValue::as_str) == Some("func")
}

/// The normalizer for `arch`; unrecognized architectures get the no-op one.
pub fn normalizer_for(arch: Arch) -> &'static dyn SymbolNormalizer {
    match arch {
        Arch::Arm => &ArmNormalizer,
        Arch::Mips => &MipsNormalizer,
        _ => &DefaultNormalizer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(start: u64, size: u64) -> Range {
        Range::new(start, size).unwrap().with_attr("kind", "func")
    }

    #[test]
    fn test_arch_from_machine() {
        assert_eq!(Arch::from(ElfMachine::ARM), Arch::Arm);
        assert_eq!(Arch::from(ElfMachine::from(62)), Arch::X86_64);
        assert_eq!(Arch::from(ElfMachine::Other(0x1234)), Arch::Unknown);
        assert_eq!(Arch::AArch64.to_string(), "aarch64");
    }

    #[test]
    fn test_default_is_noop() {
        let mut r = func(0x8001, 4);
        let before = r.clone();
        DefaultNormalizer.normalize_symbol(&mut r).unwrap();
        assert_eq!(r, before);
    }

    #[test]
    fn test_arm_clears_thumb_bit() {
        let mut r = func(0x8001, 0x20);
        ArmNormalizer.normalize_symbol(&mut r).unwrap();
        assert_eq!((r.start(), r.end()), (0x8000, 0x8020));
        assert_eq!(r.attr(THUMB_ATTR).and_then(AttrValue::as_bool), Some(true));

        // ARM-mode functions and data are left alone
        let mut arm = func(0x9000, 8);
        ArmNormalizer.normalize_symbol(&mut arm).unwrap();
        assert_eq!(arm.start(), 0x9000);
        assert!(arm.attr(THUMB_ATTR).is_none());

        let mut data = Range::new(0xa001, 1u64).unwrap().with_attr("kind", "object");
        ArmNormalizer.normalize_symbol(&mut data).unwrap();
        assert_eq!(data.start(), 0xa001);
    }

    #[test]
    fn test_mips_compressed_isa() {
        let mut micro = func(0x400101, 0x10).with_attr("other", 0x80u64);
        MipsNormalizer.normalize_symbol(&mut micro).unwrap();
        assert_eq!(micro.start(), 0x400100);
        assert_eq!(micro.attr(MIPS_ISA_ATTR).and_then(AttrValue::as_str), Some("micromips"));

        let mut m16 = func(0x400201, 0x10).with_attr("other", 0xf0u64);
        MipsNormalizer.normalize_symbol(&mut m16).unwrap();
        assert_eq!(m16.start(), 0x400200);
        assert_eq!(m16.attr(MIPS_ISA_ATTR).and_then(AttrValue::as_str), Some("mips16"));

        let mut plain = func(0x400300, 0x10);
        MipsNormalizer.normalize_symbol(&mut plain).unwrap();
        assert!(plain.attr(MIPS_ISA_ATTR).is_none());
    }

    #[test]
    fn test_normalizer_selection() {
        let mut r = func(0x8001, 2);
        normalizer_for(Arch::Arm).normalize_symbol(&mut r).unwrap();
        assert_eq!(r.start(), 0x8000);

        let mut r = func(0x8001, 2);
        normalizer_for(Arch::X86_64).normalize_symbol(&mut r).unwrap();
        assert_eq!(r.start(), 0x8001);
    }
}
