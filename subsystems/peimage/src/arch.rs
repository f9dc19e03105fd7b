//! Machine types and the native-machine selection.
//!
//! Exactly one PE machine is accepted per build target. The relocation
//! engine additionally needs to know which instruction-patching family the
//! image belongs to, and the fat-binary selector needs the matching Mach-O
//! CPU type.

use crate::header::machine;
use core::fmt;

/// PE/COFF machine supported by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Machine {
    /// x86 (PE32)
    I386,
    /// x86_64
    Amd64,
    /// ARM Thumb-2 (mixed ARM/Thumb)
    ArmThumbMixed,
    /// AArch64
    Arm64,
    /// RISC-V 32-bit
    RiscV32,
    /// RISC-V 64-bit
    RiscV64,
}

impl Machine {
    /// Decode a COFF machine field
    pub const fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            machine::I386 => Self::I386,
            machine::AMD64 => Self::Amd64,
            machine::ARMTHUMB_MIXED => Self::ArmThumbMixed,
            machine::ARM64 => Self::Arm64,
            machine::RISCV32 => Self::RiscV32,
            machine::RISCV64 => Self::RiscV64,
            _ => return None,
        })
    }

    /// COFF machine field value
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::I386 => machine::I386,
            Self::Amd64 => machine::AMD64,
            Self::ArmThumbMixed => machine::ARMTHUMB_MIXED,
            Self::Arm64 => machine::ARM64,
            Self::RiscV32 => machine::RISCV32,
            Self::RiscV64 => machine::RISCV64,
        }
    }

    /// The machine this loader was built for
    pub const fn native() -> Self {
        NATIVE
    }

    /// Relocation dialect for images of this machine
    pub const fn reloc_arch(self) -> RelocArch {
        match self {
            Self::ArmThumbMixed => RelocArch::ArmThumb,
            Self::RiscV32 | Self::RiscV64 => RelocArch::RiscV,
            Self::I386 | Self::Amd64 | Self::Arm64 => RelocArch::Generic,
        }
    }

    /// Mach-O CPU type used in fat binaries, if the machine has one
    pub const fn fat_cpu_type(self) -> Option<u32> {
        match self {
            Self::I386 => Some(cpu_type::X86),
            Self::Amd64 => Some(cpu_type::X86_64),
            Self::ArmThumbMixed => Some(cpu_type::ARM),
            Self::Arm64 => Some(cpu_type::ARM64),
            Self::RiscV32 | Self::RiscV64 => None,
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I386 => "i386",
            Self::Amd64 => "x86_64",
            Self::ArmThumbMixed => "arm",
            Self::Arm64 => "aarch64",
            Self::RiscV32 => "riscv32",
            Self::RiscV64 => "riscv64",
        })
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        const NATIVE: Machine = Machine::Amd64;
    } else if #[cfg(target_arch = "x86")] {
        const NATIVE: Machine = Machine::I386;
    } else if #[cfg(target_arch = "aarch64")] {
        const NATIVE: Machine = Machine::Arm64;
    } else if #[cfg(target_arch = "arm")] {
        const NATIVE: Machine = Machine::ArmThumbMixed;
    } else if #[cfg(target_arch = "riscv64")] {
        const NATIVE: Machine = Machine::RiscV64;
    } else if #[cfg(target_arch = "riscv32")] {
        const NATIVE: Machine = Machine::RiscV32;
    } else {
        // host builds on other architectures load x86_64 images
        const NATIVE: Machine = Machine::Amd64;
    }
}

/// Mach-O CPU types
pub mod cpu_type {
    /// 64-bit ABI flag
    pub const ABI64: u32 = 0x0100_0000;
    /// 32-bit x86
    pub const X86: u32 = 7;
    /// x86_64
    pub const X86_64: u32 = X86 | ABI64;
    /// 32-bit ARM
    pub const ARM: u32 = 12;
    /// AArch64
    pub const ARM64: u32 = ARM | ABI64;
}

/// Instruction-patching family used by the relocation engine
///
/// Relocation type 7 means `ARM_MOV32T` for Thumb images and
/// `RISCV_LOW12I` for RISC-V images; types 5 and 8 only exist for RISC-V.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocArch {
    /// Only the width-based fixups (x86, x86_64, AArch64)
    Generic,
    /// Adds MOVW/MOVT pair patching
    ArmThumb,
    /// Adds HI20/LOW12 instruction pair patching
    RiscV,
}
