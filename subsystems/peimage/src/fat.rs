//! # Fat Binary Selector
//!
//! Some boot servers hand out universal images: a small header followed by
//! an array of (CPU type, offset, size) entries, each pointing at a complete
//! PE/COFF image. The selector picks the sub-image for the native CPU; any
//! other buffer passes through unchanged.

use crate::{Error, Machine, Result};
use core::mem::size_of;
use core::ops::Range;
use static_assertions::const_assert_eq;

/// Fat EFI header magic, little endian on disk
pub const FAT_EFI_MAGIC: u32 = 0x0ef1_fab9;

/// Fat binary header
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FatHeader {
    /// Magic
    pub magic: u32,
    /// Number of architecture entries that follow
    pub nfat_arch: u32,
}

const_assert_eq!(size_of::<FatHeader>(), FatHeader::SIZE);

impl FatHeader {
    /// Size
    pub const SIZE: usize = 8;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            magic: le32(bytes, 0)?,
            nfat_arch: le32(bytes, 4)?,
        })
    }
}

/// Fat binary architecture entry
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FatArch {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the sub-image
    pub offset: u32,
    /// Size of the sub-image
    pub size: u32,
    /// Alignment as a power of two
    pub align: u32,
}

const_assert_eq!(size_of::<FatArch>(), FatArch::SIZE);

impl FatArch {
    /// Size
    pub const SIZE: usize = 20;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            cputype: le32(bytes, 0)?,
            cpusubtype: le32(bytes, 4)?,
            offset: le32(bytes, 8)?,
            size: le32(bytes, 12)?,
            align: le32(bytes, 16)?,
        })
    }
}

/// What the loader should treat as the PE/COFF image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Not a fat binary, use the whole buffer
    PassThrough,
    /// Use this byte range of the buffer
    SubImage(Range<usize>),
}

impl Selection {
    /// The selected bytes of `raw`
    pub fn apply<'a>(&self, raw: &'a [u8]) -> &'a [u8] {
        match self {
            Self::PassThrough => raw,
            Self::SubImage(range) => &raw[range.clone()],
        }
    }
}

/// Select the native sub-image of a fat binary
pub fn select_arch_image(raw: &[u8]) -> Result<Selection> {
    select_arch_image_for(raw, Machine::native())
}

/// Select the sub-image for `machine` of a fat binary
pub fn select_arch_image_for(raw: &[u8], machine: Machine) -> Result<Selection> {
    let header = match FatHeader::from_bytes(raw) {
        Some(header) if header.magic == FAT_EFI_MAGIC => header,
        _ => return Ok(Selection::PassThrough),
    };

    let wanted = machine.fat_cpu_type().ok_or(Error::NoCompatibleArch)?;

    // entries past the end of the buffer end the scan
    let arch = raw[FatHeader::SIZE..]
        .chunks_exact(FatArch::SIZE)
        .take(header.nfat_arch as usize)
        .filter_map(FatArch::from_bytes)
        .find(|arch| arch.cputype == wanted)
        .ok_or_else(|| {
            log::debug!("fat binary has no {} image", machine);
            Error::NoCompatibleArch
        })?;

    let start = arch.offset as usize;
    let end = arch
        .offset
        .checked_add(arch.size)
        .map(|end| end as usize)
        .filter(|&end| end <= raw.len())
        .ok_or(Error::TruncatedImage)?;

    log::debug!("fat binary: {} image at {:#x}, {:#x} bytes", machine, start, arch.size);
    Ok(Selection::SubImage(start..end))
}

#[inline]
fn le32(bytes: &[u8], offset: usize) -> Option<u32> {
    let field = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(field.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::cpu_type;
    use crate::testimage::fat_binary;

    #[test]
    fn test_passthrough_for_plain_image() {
        assert_eq!(select_arch_image(b"MZ\x90\x00....").unwrap(), Selection::PassThrough);
        assert_eq!(select_arch_image(&[0xb9, 0xfa]).unwrap(), Selection::PassThrough);
    }

    #[test]
    fn test_selects_aarch64_range() {
        let raw = fat_binary(&[(cpu_type::X86_64, &b"x86-image"[..]), (cpu_type::ARM64, &b"arm-image!"[..])]);
        let selection = select_arch_image_for(&raw, Machine::Arm64).unwrap();
        assert_eq!(selection.apply(&raw), b"arm-image!");

        let selection = select_arch_image_for(&raw, Machine::Amd64).unwrap();
        assert_eq!(selection.apply(&raw), b"x86-image");
    }

    #[test]
    fn test_native_selection() {
        let native = Machine::native();
        if let Some(cpu) = native.fat_cpu_type() {
            let raw = fat_binary(&[(0x1234, &b"other"[..]), (cpu, &b"native"[..])]);
            assert_eq!(select_arch_image(&raw).unwrap().apply(&raw), b"native");
        }
    }

    #[test]
    fn test_no_compatible_arch() {
        let raw = fat_binary(&[(cpu_type::X86, &b"i386"[..])]);
        assert_eq!(select_arch_image_for(&raw, Machine::Arm64), Err(Error::NoCompatibleArch));
        assert_eq!(select_arch_image_for(&raw, Machine::RiscV64), Err(Error::NoCompatibleArch));
    }

    #[test]
    fn test_entry_past_buffer() {
        let mut raw = fat_binary(&[(cpu_type::ARM64, &b"arm"[..])]);
        raw.truncate(raw.len() - 1);
        assert_eq!(select_arch_image_for(&raw, Machine::Arm64), Err(Error::TruncatedImage));
    }

    #[test]
    fn test_entry_offset_overflow() {
        let mut raw = fat_binary(&[(cpu_type::ARM64, &b"arm"[..])]);
        // offset field of the first entry
        raw[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(select_arch_image_for(&raw, Machine::Arm64), Err(Error::TruncatedImage));
    }
}
