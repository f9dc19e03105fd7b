//! # Relocation Engine
//!
//! Applies the base relocation table of a mapped image for the difference
//! between its actual and preferred base. Blocks are walked in order; each
//! 16-bit entry carries a type in the high 4 bits and a page offset in the
//! low 12 bits.
//!
//! Every block and every fixup site is bounds checked against the image
//! before it is read or written. Additions wrap at the width of the patched
//! field, as PE/COFF defines them.
//!
//! Instruction-pair fixups are architecture specific; [`RelocArch`] selects
//! which of them are legal, and the bit manipulation itself lives in the
//! pure [`thumb`] and [`riscv`] helpers.

use crate::header::{ImageHeader, RelocationDirectory};
use crate::mapper::MappedImage;
use crate::{Error, RelocArch, Result};

/// Base relocation types
pub mod reloc_type {
    /// Padding, skipped
    pub const ABSOLUTE: u8 = 0;
    /// High 16 bits of the delta added to a 16-bit field
    pub const HIGH: u8 = 1;
    /// Low 16 bits of the delta added to a 16-bit field
    pub const LOW: u8 = 2;
    /// 32-bit field
    pub const HIGHLOW: u8 = 3;
    /// RISC-V `lui`/`auipc` upper 20 bits
    pub const RISCV_HI20: u8 = 5;
    /// `ARM_MOV32T` on Thumb, `RISCV_LOW12I` on RISC-V
    pub const ARM_MOV32T: u8 = 7;
    /// RISC-V I-type lower 12 bits
    pub const RISCV_LOW12I: u8 = 7;
    /// RISC-V S-type lower 12 bits
    pub const RISCV_LOW12S: u8 = 8;
    /// 64-bit field
    pub const DIR64: u8 = 10;
}

/// Size of a relocation block header (page RVA + block size)
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Base relocation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRelocationEntry {
    /// Relocation type
    pub kind: u8,
    /// Offset within the block's page
    pub offset: u16,
}

impl BaseRelocationEntry {
    /// Parse from u16
    pub fn from_u16(value: u16) -> Self {
        Self {
            kind: (value >> 12) as u8,
            offset: value & 0x0FFF,
        }
    }
}

/// Difference between the actual and the preferred base
pub fn load_delta(image: &MappedImage<'_>, header: &ImageHeader) -> u64 {
    image.base().as_u64().wrapping_sub(header.image_base)
}

/// Relocate a mapped image by `delta`
pub fn relocate(image: &mut MappedImage<'_>, header: &ImageHeader, delta: u64) -> Result<()> {
    let directory = match header.reloc {
        Some(directory) => directory,
        None => {
            log::debug!("no relocations");
            return Ok(());
        }
    };

    let image_size = header.image_size as usize;
    let memory = image.bytes_mut();
    let memory = memory.get_mut(..image_size).ok_or(Error::SectionOutsideImage)?;
    apply_relocations(memory, directory, delta, header.machine.reloc_arch())?;

    log::debug!("image relocated by {:#x}", delta);
    Ok(())
}

/// Apply the relocation table described by `directory` to `image`
///
/// `image` is the image in memory, exactly `image_size` bytes long.
pub fn apply_relocations(
    image: &mut [u8],
    directory: RelocationDirectory,
    delta: u64,
    arch: RelocArch,
) -> Result<()> {
    if directory.size == 0 {
        return Ok(());
    }

    let start = directory.rva as usize;
    let end = start
        .checked_add(directory.size as usize)
        .filter(|&end| end <= image.len())
        .ok_or(Error::RelocationOutOfBounds { offset: directory.rva })?;

    let mut block = start;
    while block < end {
        if end - block < BLOCK_HEADER_SIZE {
            return Err(Error::RelocationOutOfBounds { offset: block as u32 });
        }
        let page_rva = read_u32(image, block);
        let block_size = read_u32(image, block + 4) as usize;
        if block_size < BLOCK_HEADER_SIZE {
            log::debug!("relocation block at {:#x} declares size {}", block, block_size);
            return Err(Error::BadRelocation);
        }
        let block_end = block
            .checked_add(block_size)
            .filter(|&block_end| block_end <= end)
            .ok_or(Error::RelocationOutOfBounds { offset: block as u32 })?;

        apply_block(image, block, block_end, page_rva, delta, arch)?;
        block = block_end;
    }

    Ok(())
}

/// Apply the entries of one block; a RISC-V high fixup must be paired
/// with the low fixup directly after it, inside the same block
fn apply_block(
    image: &mut [u8],
    block: usize,
    block_end: usize,
    page_rva: u32,
    delta: u64,
    arch: RelocArch,
) -> Result<()> {
    let mut pending_hi20: Option<usize> = None;

    let mut cursor = block + BLOCK_HEADER_SIZE;
    while cursor + 2 <= block_end {
        let entry = BaseRelocationEntry::from_u16(read_u16(image, cursor));
        let entry_offset = cursor as u32;
        cursor += 2;

        let site = fixup_site(page_rva, entry.offset)
            .ok_or(Error::RelocationOutOfBounds { offset: entry_offset })?;
        let unsupported = Error::UnsupportedRelocationType { kind: entry.kind, offset: entry_offset };

        if pending_hi20.is_some()
            && !(arch == RelocArch::RiscV
                && matches!(entry.kind, reloc_type::RISCV_LOW12I | reloc_type::RISCV_LOW12S))
        {
            log::debug!("RISC-V HI20 at {:#x} not followed by a LOW12 fixup", entry_offset);
            return Err(Error::BadRelocation);
        }

        match (entry.kind, arch) {
            (reloc_type::ABSOLUTE, _) => {}
            (reloc_type::HIGH, _) => {
                let field = field_mut::<2>(image, site)?;
                let value = u16::from_le_bytes(*field).wrapping_add((delta >> 16) as u16);
                *field = value.to_le_bytes();
            }
            (reloc_type::LOW, _) => {
                let field = field_mut::<2>(image, site)?;
                let value = u16::from_le_bytes(*field).wrapping_add(delta as u16);
                *field = value.to_le_bytes();
            }
            (reloc_type::HIGHLOW, _) => {
                let field = field_mut::<4>(image, site)?;
                let value = u32::from_le_bytes(*field).wrapping_add(delta as u32);
                *field = value.to_le_bytes();
            }
            (reloc_type::DIR64, _) => {
                let field = field_mut::<8>(image, site)?;
                let value = u64::from_le_bytes(*field).wrapping_add(delta);
                *field = value.to_le_bytes();
            }
            (reloc_type::ARM_MOV32T, RelocArch::ArmThumb) => {
                let field = field_mut::<8>(image, site)?;
                *field = thumb::relocate_mov32t(*field, delta as u32);
            }
            (reloc_type::RISCV_HI20, RelocArch::RiscV) => {
                field_mut::<4>(image, site)?;
                pending_hi20 = Some(site);
            }
            (reloc_type::RISCV_LOW12I | reloc_type::RISCV_LOW12S, RelocArch::RiscV) => {
                let hi_site = pending_hi20.take().ok_or_else(|| {
                    log::debug!("RISC-V LOW12 at {:#x} without HI20", entry_offset);
                    Error::BadRelocation
                })?;
                let format = if entry.kind == reloc_type::RISCV_LOW12I {
                    riscv::Low12::IType
                } else {
                    riscv::Low12::SType
                };

                let hi = u32::from_le_bytes(*field_mut::<4>(image, hi_site)?);
                let lo = u32::from_le_bytes(*field_mut::<4>(image, site)?);
                let (hi, lo) = riscv::relocate_pair(hi, lo, format, delta as u32);
                *field_mut::<4>(image, hi_site)? = hi.to_le_bytes();
                *field_mut::<4>(image, site)? = lo.to_le_bytes();
            }
            _ => {
                log::warn!("unsupported relocation type {} at {:#x}", entry.kind, entry_offset);
                return Err(unsupported);
            }
        }
    }

    if pending_hi20.is_some() {
        log::debug!("RISC-V HI20 left unpaired at end of block {:#x}", block);
        return Err(Error::BadRelocation);
    }
    Ok(())
}

/// Bounds-checked fixed-width view of the image at `site`
#[inline]
/// Image offset of a fixup; `None` when it does not fit a 32-bit RVA
#[inline]
fn fixup_site(page_rva: u32, offset: u16) -> Option<usize> {
    page_rva.checked_add(u32::from(offset)).map(|site| site as usize)
}

fn field_mut<const N: usize>(image: &mut [u8], site: usize) -> Result<&mut [u8; N]> {
    site.checked_add(N)
        .and_then(|end| image.get_mut(site..end))
        .and_then(|field| <&mut [u8; N]>::try_from(field).ok())
        .ok_or(Error::RelocationOutOfBounds { offset: site as u32 })
}

#[inline]
fn read_u16(image: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([image[offset], image[offset + 1]])
}

#[inline]
fn read_u32(image: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([image[offset], image[offset + 1], image[offset + 2], image[offset + 3]])
}

// =============================================================================
// ARM THUMB-2 MOVW/MOVT
// =============================================================================

/// Thumb-2 `MOVW`/`MOVT` immediate patching
///
/// Both instructions encode a 16-bit immediate as `imm4:i:imm3:imm8`:
///
/// ```text
///  first halfword                    second halfword
///  1 1 1 1 0 i 1 0 x 1 0 0 imm4      0 imm3 Rd imm8
/// ```
pub mod thumb {
    /// Extract the 16-bit immediate of a MOVW/MOVT instruction
    pub fn movw_imm(hw0: u16, hw1: u16) -> u16 {
        (hw1 & 0x00ff)
            | ((hw1 >> 12) & 0x7) << 8
            | ((hw0 >> 10) & 0x1) << 11
            | (hw0 & 0x000f) << 12
    }

    /// Replace the 16-bit immediate of a MOVW/MOVT instruction
    pub fn set_movw_imm(hw0: u16, hw1: u16, imm: u16) -> (u16, u16) {
        let hw0 = (hw0 & !0x040f) | ((imm >> 12) & 0xf) | ((imm >> 11) & 0x1) << 10;
        let hw1 = (hw1 & !0x70ff) | (imm & 0xff) | ((imm >> 8) & 0x7) << 12;
        (hw0, hw1)
    }

    /// Add `delta` to the 32-bit value loaded by a MOVW/MOVT pair
    pub fn relocate_mov32t(bytes: [u8; 8], delta: u32) -> [u8; 8] {
        let hw = |i: usize| u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        let (w0, w1, t0, t1) = (hw(0), hw(1), hw(2), hw(3));

        let value = (u32::from(movw_imm(t0, t1)) << 16 | u32::from(movw_imm(w0, w1)))
            .wrapping_add(delta);

        let (w0, w1) = set_movw_imm(w0, w1, value as u16);
        let (t0, t1) = set_movw_imm(t0, t1, (value >> 16) as u16);

        let mut out = [0u8; 8];
        for (i, half) in [w0, w1, t0, t1].into_iter().enumerate() {
            out[2 * i..2 * i + 2].copy_from_slice(&half.to_le_bytes());
        }
        out
    }
}

// =============================================================================
// RISC-V HI20/LOW12
// =============================================================================

/// RISC-V `AUIPC`/`LUI` + I-type/S-type immediate patching
///
/// ```text
///  U-type  imm[31:12]                   rd    opcode
///  I-type  imm[11:0]    rs1  funct3     rd    opcode
///  S-type  imm[11:5] rs2 rs1 funct3  imm[4:0] opcode
/// ```
///
/// The low immediate is sign extended by the hardware, so the high part is
/// rounded by `0x800` when the pair is split again.
pub mod riscv {
    /// Instruction format of the low half of a pair
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Low12 {
        /// Loads and arithmetic (`LOW12I`)
        IType,
        /// Stores (`LOW12S`)
        SType,
    }

    /// Upper 20 bits of a U-type instruction, in place
    pub fn hi20(instr: u32) -> u32 {
        instr & 0xffff_f000
    }

    /// Replace the upper 20 bits of a U-type instruction
    pub fn set_hi20(instr: u32, value: u32) -> u32 {
        (instr & 0x0000_0fff) | (value & 0xffff_f000)
    }

    /// 12-bit immediate of an I-type instruction
    pub fn lo12i(instr: u32) -> u32 {
        instr >> 20
    }

    /// Replace the 12-bit immediate of an I-type instruction
    pub fn set_lo12i(instr: u32, imm: u32) -> u32 {
        (instr & 0x000f_ffff) | (imm & 0xfff) << 20
    }

    /// 12-bit immediate of an S-type instruction
    pub fn lo12s(instr: u32) -> u32 {
        (instr >> 25) << 5 | (instr >> 7) & 0x1f
    }

    /// Replace the 12-bit immediate of an S-type instruction
    pub fn set_lo12s(instr: u32, imm: u32) -> u32 {
        (instr & 0x01ff_f07f) | ((imm >> 5) & 0x7f) << 25 | (imm & 0x1f) << 7
    }

    #[inline]
    fn sign_extend12(imm: u32) -> u32 {
        (((imm << 20) as i32) >> 20) as u32
    }

    /// Add `delta` to the address formed by a high/low instruction pair
    pub fn relocate_pair(hi: u32, lo: u32, format: Low12, delta: u32) -> (u32, u32) {
        let low = match format {
            Low12::IType => lo12i(lo),
            Low12::SType => lo12s(lo),
        };
        let value = hi20(hi).wrapping_add(sign_extend12(low)).wrapping_add(delta);

        let hi = set_hi20(hi, value.wrapping_add(0x800));
        let lo = match format {
            Low12::IType => set_lo12i(lo, value),
            Low12::SType => set_lo12s(lo, value),
        };
        (hi, lo)
    }
}
