//! # PE/COFF Header Parser
//!
//! Validates the DOS stub, PE signature, COFF header, optional header and
//! section table of a raw image and extracts the fields the mapper and the
//! relocation engine need. Parsing is a pure function over the buffer:
//! nothing is allocated in firmware memory and every field read is bounds
//! checked against the buffer first.

use crate::{Error, LoaderConfig, Machine, Result};
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::mem::size_of;
use static_assertions::const_assert_eq;

// =============================================================================
// BYTE READERS
// =============================================================================

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let field = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([field[0], field[1]]))
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let field = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(field.try_into().ok()?))
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let field = bytes.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(field.try_into().ok()?))
}

// =============================================================================
// DOS STUB AND PE SIGNATURE
// =============================================================================

/// DOS magic bytes
pub const DOS_MAGIC: u16 = 0x5A4D; // "MZ"

/// PE signature
pub const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"

/// Minimum DOS stub size (up to and including `e_lfanew`)
pub const DOS_STUB_SIZE: usize = 64;

/// Offset of `e_lfanew` in the DOS stub
const E_LFANEW_OFFSET: usize = 60;

// =============================================================================
// COFF HEADER
// =============================================================================

/// COFF file header
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CoffHeader {
    /// Machine type
    pub machine: u16,
    /// Number of sections
    pub number_of_sections: u16,
    /// Time date stamp
    pub time_date_stamp: u32,
    /// Pointer to symbol table
    pub pointer_to_symbol_table: u32,
    /// Number of symbols
    pub number_of_symbols: u32,
    /// Size of optional header
    pub size_of_optional_header: u16,
    /// Characteristics
    pub characteristics: u16,
}

const_assert_eq!(size_of::<CoffHeader>(), CoffHeader::SIZE);

impl CoffHeader {
    /// Size
    pub const SIZE: usize = 20;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            machine: read_u16(bytes, 0)?,
            number_of_sections: read_u16(bytes, 2)?,
            time_date_stamp: read_u32(bytes, 4)?,
            pointer_to_symbol_table: read_u32(bytes, 8)?,
            number_of_symbols: read_u32(bytes, 12)?,
            size_of_optional_header: read_u16(bytes, 16)?,
            characteristics: read_u16(bytes, 18)?,
        })
    }
}

/// Machine types
pub mod machine {
    /// Intel 386
    pub const I386: u16 = 0x14c;
    /// x86_64
    pub const AMD64: u16 = 0x8664;
    /// ARM Thumb-2, little endian
    pub const ARMTHUMB_MIXED: u16 = 0x1c2;
    /// AArch64, little endian
    pub const ARM64: u16 = 0xaa64;
    /// RISC-V 32-bit
    pub const RISCV32: u16 = 0x5032;
    /// RISC-V 64-bit
    pub const RISCV64: u16 = 0x5064;
}

// =============================================================================
// OPTIONAL HEADER
// =============================================================================

/// Optional header magic
pub mod optional_magic {
    /// 32-bit optional header
    pub const PE32: u16 = 0x10b;
    /// 64-bit optional header
    pub const PE32_PLUS: u16 = 0x20b;
}

/// Subsystem
pub mod subsystem {
    /// EFI application
    pub const EFI_APPLICATION: u16 = 10;
    /// EFI boot service driver
    pub const EFI_BOOT_SERVICE_DRIVER: u16 = 11;
    /// EFI runtime driver
    pub const EFI_RUNTIME_DRIVER: u16 = 12;
}

/// Index of the base relocation table in the data directories
pub const BASE_RELOCATION_DIRECTORY: usize = 5;

/// Fields shared by the PE32 and PE32+ optional headers
///
/// The two layouts differ in the width of `image_base` (and PE32 has an
/// extra `base_of_data`), which shifts every later field; both are read
/// into this common form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalHeader {
    /// Magic
    pub magic: u16,
    /// Address of entry point
    pub address_of_entry_point: u32,
    /// Preferred image base
    pub image_base: u64,
    /// Section alignment
    pub section_alignment: u32,
    /// Size of image
    pub size_of_image: u32,
    /// Size of headers
    pub size_of_headers: u32,
    /// Subsystem
    pub subsystem: u16,
    /// Number of data directories
    pub number_of_rva_and_sizes: u32,
    /// Size of the fixed part, where the data directories begin
    pub directories_offset: usize,
}

impl OptionalHeader {
    /// Fixed part of the PE32 optional header
    pub const PE32_SIZE: usize = 96;
    /// Fixed part of the PE32+ optional header
    pub const PE32_PLUS_SIZE: usize = 112;

    /// Parse either layout from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let magic = read_u16(bytes, 0)?;
        let (image_base, tail, directories_offset) = match magic {
            optional_magic::PE32 => (u64::from(read_u32(bytes, 28)?), 0, Self::PE32_SIZE),
            optional_magic::PE32_PLUS => (read_u64(bytes, 24)?, 16, Self::PE32_PLUS_SIZE),
            _ => return None,
        };

        Some(Self {
            magic,
            address_of_entry_point: read_u32(bytes, 16)?,
            image_base,
            section_alignment: read_u32(bytes, 32)?,
            size_of_image: read_u32(bytes, 56)?,
            size_of_headers: read_u32(bytes, 60)?,
            subsystem: read_u16(bytes, 68)?,
            number_of_rva_and_sizes: read_u32(bytes, 92 + tail)?,
            directories_offset,
        })
    }

    /// Is PE32+
    pub fn is_pe32_plus(&self) -> bool {
        self.magic == optional_magic::PE32_PLUS
    }

    /// Is EFI application
    pub fn is_efi_application(&self) -> bool {
        self.subsystem == subsystem::EFI_APPLICATION
    }
}

// =============================================================================
// DATA DIRECTORIES
// =============================================================================

/// Data directory entry
#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct DataDirectory {
    /// Virtual address
    pub virtual_address: u32,
    /// Size
    pub size: u32,
}

const_assert_eq!(size_of::<DataDirectory>(), DataDirectory::SIZE);

impl DataDirectory {
    /// Size
    pub const SIZE: usize = 8;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            virtual_address: read_u32(bytes, 0)?,
            size: read_u32(bytes, 4)?,
        })
    }
}

/// Location of the base relocation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationDirectory {
    /// RVA of the first block
    pub rva: u32,
    /// Total size of all blocks
    pub size: u32,
}

// =============================================================================
// SECTION TABLE
// =============================================================================

bitflags! {
    /// Section characteristics
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u32 {
        /// Executable code
        const CODE = 0x0000_0020;
        /// Initialized data
        const INITIALIZED_DATA = 0x0000_0040;
        /// Uninitialized data
        const UNINITIALIZED_DATA = 0x0000_0080;
        /// Can be discarded
        const DISCARDABLE = 0x0200_0000;
        /// Executable
        const EXECUTE = 0x2000_0000;
        /// Readable
        const READ = 0x4000_0000;
        /// Writable
        const WRITE = 0x8000_0000;
    }
}

/// Section header as stored in the image
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SectionHeader {
    /// Name
    pub name: [u8; 8],
    /// Virtual size
    pub virtual_size: u32,
    /// Virtual address
    pub virtual_address: u32,
    /// Size of raw data
    pub size_of_raw_data: u32,
    /// Pointer to raw data
    pub pointer_to_raw_data: u32,
    /// Pointer to relocations
    pub pointer_to_relocations: u32,
    /// Pointer to line numbers
    pub pointer_to_linenumbers: u32,
    /// Number of relocations
    pub number_of_relocations: u16,
    /// Number of line numbers
    pub number_of_linenumbers: u16,
    /// Characteristics
    pub characteristics: u32,
}

const_assert_eq!(size_of::<SectionHeader>(), SectionHeader::SIZE);

impl SectionHeader {
    /// Size
    pub const SIZE: usize = 40;

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut name = [0u8; 8];
        name.copy_from_slice(bytes.get(0..8)?);

        Some(Self {
            name,
            virtual_size: read_u32(bytes, 8)?,
            virtual_address: read_u32(bytes, 12)?,
            size_of_raw_data: read_u32(bytes, 16)?,
            pointer_to_raw_data: read_u32(bytes, 20)?,
            pointer_to_relocations: read_u32(bytes, 24)?,
            pointer_to_linenumbers: read_u32(bytes, 28)?,
            number_of_relocations: read_u16(bytes, 32)?,
            number_of_linenumbers: read_u16(bytes, 34)?,
            characteristics: read_u32(bytes, 36)?,
        })
    }
}

/// The parts of a section header the mapper uses
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SectionDescriptor {
    /// Section name, NUL padded
    pub name: [u8; 8],
    /// RVA of the section
    pub virtual_address: u32,
    /// Size in memory
    pub virtual_size: u32,
    /// File offset of the section data
    pub raw_data_offset: u32,
    /// Size of the section data in the file
    pub raw_data_size: u32,
    /// Characteristics
    pub flags: SectionFlags,
}

impl SectionDescriptor {
    /// Get section name as string
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(8);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

impl From<&SectionHeader> for SectionDescriptor {
    fn from(header: &SectionHeader) -> Self {
        Self {
            name: header.name,
            virtual_address: header.virtual_address,
            virtual_size: header.virtual_size,
            raw_data_offset: header.pointer_to_raw_data,
            raw_data_size: header.size_of_raw_data,
            flags: SectionFlags::from_bits_retain(header.characteristics),
        }
    }
}

impl fmt::Debug for SectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionDescriptor")
            .field("name", &self.name_str())
            .field("virtual_address", &format_args!("{:#x}", self.virtual_address))
            .field("virtual_size", &format_args!("{:#x}", self.virtual_size))
            .field("raw_data_offset", &format_args!("{:#x}", self.raw_data_offset))
            .field("raw_data_size", &format_args!("{:#x}", self.raw_data_size))
            .finish()
    }
}

// =============================================================================
// IMAGE HEADER
// =============================================================================

/// Validated view of a PE/COFF image's headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Machine the image was built for
    pub machine: Machine,
    /// Optional header subsystem
    pub subsystem: u16,
    /// PE32+ (64-bit) optional header
    pub is_pe32_plus: bool,
    /// Entry point RVA
    pub entry_rva: u32,
    /// Preferred load address
    pub image_base: u64,
    /// Section alignment in memory
    pub section_alignment: u32,
    /// Size of the image in memory
    pub image_size: u32,
    /// Size of all headers, copied verbatim to the mapped base
    pub header_size: u32,
    /// File offset of the section table
    pub section_table_offset: usize,
    /// Section table entries in file order
    pub sections: Vec<SectionDescriptor>,
    /// Base relocation table, if the image carries one
    pub reloc: Option<RelocationDirectory>,
}

impl ImageHeader {
    /// Number of sections
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

/// Parse and validate the headers of `raw` for the native machine
pub fn parse_header(raw: &[u8]) -> Result<ImageHeader> {
    parse_header_with(raw, &LoaderConfig::default())
}

/// Parse and validate the headers of `raw` under `config`
pub fn parse_header_with(raw: &[u8], config: &LoaderConfig) -> Result<ImageHeader> {
    if raw.len() < DOS_STUB_SIZE {
        return Err(Error::TruncatedImage);
    }
    if read_u16(raw, 0) != Some(DOS_MAGIC) {
        return Err(Error::NotPeCoff);
    }

    let pe_offset = read_u32(raw, E_LFANEW_OFFSET).ok_or(Error::TruncatedImage)? as usize;
    let coff_offset = pe_offset.checked_add(4).ok_or(Error::TruncatedImage)?;
    let optional_offset = coff_offset.checked_add(CoffHeader::SIZE).ok_or(Error::TruncatedImage)?;
    if raw.len() < optional_offset {
        return Err(Error::TruncatedImage);
    }
    if read_u32(raw, pe_offset) != Some(PE_SIGNATURE) {
        return Err(Error::NotPeCoff);
    }

    let coff = CoffHeader::from_bytes(&raw[coff_offset..]).ok_or(Error::TruncatedImage)?;
    let optional_size = coff.size_of_optional_header as usize;
    let section_table_offset = optional_offset + optional_size;
    if raw.len() < section_table_offset {
        return Err(Error::TruncatedImage);
    }

    let machine_code = coff.machine;
    if machine_code != config.machine.as_u16() {
        log::debug!("image machine {:#06x}, native {:#06x}", machine_code, config.machine.as_u16());
        return Err(Error::UnsupportedMachine(machine_code));
    }

    let optional_bytes = &raw[optional_offset..section_table_offset];
    let optional = match read_u16(optional_bytes, 0) {
        Some(optional_magic::PE32) | Some(optional_magic::PE32_PLUS) => {
            OptionalHeader::from_bytes(optional_bytes).ok_or(Error::TruncatedImage)?
        }
        Some(_) => return Err(Error::NotPeCoff),
        None => return Err(Error::TruncatedImage),
    };

    if config.require_efi_application && !optional.is_efi_application() {
        return Err(Error::NotEfiApplication);
    }

    let reloc = read_reloc_directory(optional_bytes, &optional)?;

    let header_size = optional.size_of_headers;
    if header_size as usize > raw.len() {
        return Err(Error::TruncatedImage);
    }
    if header_size > optional.size_of_image {
        return Err(Error::SectionOutsideImage);
    }
    if optional.address_of_entry_point >= optional.size_of_image {
        return Err(Error::SectionOutsideImage);
    }

    let section_count = coff.number_of_sections as usize;
    let table_end = section_count
        .checked_mul(SectionHeader::SIZE)
        .and_then(|len| len.checked_add(section_table_offset))
        .ok_or(Error::TruncatedImage)?;
    if table_end > raw.len() {
        return Err(Error::TruncatedImage);
    }

    let sections = raw[section_table_offset..table_end]
        .chunks_exact(SectionHeader::SIZE)
        .map(|chunk| SectionHeader::from_bytes(chunk).map(|h| SectionDescriptor::from(&h)))
        .collect::<Option<Vec<_>>>()
        .ok_or(Error::TruncatedImage)?;

    log::trace!(
        "pe header: entry {:#x}, base {:#x}, size {:#x}, {} sections",
        optional.address_of_entry_point,
        optional.image_base,
        optional.size_of_image,
        sections.len()
    );

    Ok(ImageHeader {
        machine: config.machine,
        subsystem: optional.subsystem,
        is_pe32_plus: optional.is_pe32_plus(),
        entry_rva: optional.address_of_entry_point,
        image_base: optional.image_base,
        section_alignment: optional.section_alignment,
        image_size: optional.size_of_image,
        header_size,
        section_table_offset,
        sections,
        reloc,
    })
}

/// The base relocation directory, present iff the directory count reaches
/// it and its size is non-zero
fn read_reloc_directory(
    optional_bytes: &[u8],
    optional: &OptionalHeader,
) -> Result<Option<RelocationDirectory>> {
    if (optional.number_of_rva_and_sizes as usize) <= BASE_RELOCATION_DIRECTORY {
        return Ok(None);
    }

    let offset = optional.directories_offset + BASE_RELOCATION_DIRECTORY * DataDirectory::SIZE;
    let directory = optional_bytes
        .get(offset..)
        .and_then(DataDirectory::from_bytes)
        .ok_or(Error::TruncatedImage)?;

    let size = directory.size;
    if size == 0 {
        return Ok(None);
    }
    Ok(Some(RelocationDirectory { rva: directory.virtual_address, size }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimage::{foreign_machine, TestImage};

    #[test]
    fn test_parse_valid_image() {
        let raw = TestImage::new().entry(0x1010).section(".text", 0x1000, &[0xc3; 16]).build();
        let header = parse_header(&raw).unwrap();

        assert_eq!(header.machine, Machine::native());
        assert!(header.is_pe32_plus);
        assert_eq!(header.entry_rva, 0x1010);
        assert_eq!(header.image_base, TestImage::DEFAULT_BASE);
        assert_eq!(header.section_count(), 1);
        assert_eq!(header.sections[0].name_str(), ".text");
        assert_eq!(header.reloc, None);
    }

    #[test]
    fn test_parse_pe32_layout() {
        let raw = TestImage::new().pe32().image_base(0x40_0000).build();
        let header = parse_header(&raw).unwrap();
        assert!(!header.is_pe32_plus);
        assert_eq!(header.image_base, 0x40_0000);
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert_eq!(parse_header(&[0x4d, 0x5a]), Err(Error::TruncatedImage));
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut raw = TestImage::new().build();
        raw[0] = b'X';
        assert_eq!(parse_header(&raw), Err(Error::NotPeCoff));

        let mut raw = TestImage::new().build();
        raw[TestImage::PE_OFFSET] = b'Q';
        assert_eq!(parse_header(&raw), Err(Error::NotPeCoff));
    }

    #[test]
    fn test_parse_rejects_foreign_machine() {
        let foreign = foreign_machine();
        let raw = TestImage::new().machine(foreign.as_u16()).build();
        assert_eq!(parse_header(&raw), Err(Error::UnsupportedMachine(foreign.as_u16())));
    }

    #[test]
    fn test_parse_subsystem_check() {
        let raw = TestImage::new().subsystem(subsystem::EFI_BOOT_SERVICE_DRIVER).build();
        assert_eq!(parse_header(&raw), Err(Error::NotEfiApplication));

        let config = LoaderConfig { require_efi_application: false, ..LoaderConfig::default() };
        assert!(parse_header_with(&raw, &config).is_ok());
    }

    #[test]
    fn test_parse_header_size_past_buffer() {
        let raw = TestImage::new().header_size(0x10_0000).image_size(0x20_0000).build();
        assert_eq!(parse_header(&raw), Err(Error::TruncatedImage));
    }

    #[test]
    fn test_parse_section_table_past_buffer() {
        let mut raw = TestImage::new().build();
        // 30 section headers cannot fit in front of the section data
        let count = TestImage::PE_OFFSET + 6;
        raw[count..count + 2].copy_from_slice(&30u16.to_le_bytes());
        assert_eq!(parse_header(&raw), Err(Error::TruncatedImage));
    }

    #[test]
    fn test_parse_entry_outside_image() {
        let raw = TestImage::new().image_size(0x3000).entry(0x3000).build();
        assert_eq!(parse_header(&raw), Err(Error::SectionOutsideImage));
    }

    #[test]
    fn test_parse_reloc_directory() {
        let raw = TestImage::new().dir64_fixup(0x2000, 0x1234).build();
        let header = parse_header(&raw).unwrap();
        let reloc = header.reloc.unwrap();
        assert!(reloc.size >= 10);

        // a directory count of 5 hides the relocation table
        let raw = TestImage::new().dir64_fixup(0x2000, 0x1234).directory_count(5).build();
        assert_eq!(parse_header(&raw).unwrap().reloc, None);
    }
}
