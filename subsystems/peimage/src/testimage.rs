//! In-memory PE/COFF image builder for tests.
//!
//! Also built with the `testimage` feature so dependent crates can feed
//! real images through the loader in their own tests.

use crate::fat::{FatArch, FatHeader, FAT_EFI_MAGIC};
use crate::header::{optional_magic, subsystem, BASE_RELOCATION_DIRECTORY};
use crate::Machine;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

/// Relocation type codes used by the builder
pub mod kind {
    /// Padding
    pub const ABSOLUTE: u8 = 0;
    /// 16-bit high half
    pub const HIGH: u8 = 1;
    /// 16-bit low half
    pub const LOW: u8 = 2;
    /// 32-bit field
    pub const HIGHLOW: u8 = 3;
    /// RISC-V upper immediate
    pub const RISCV_HI20: u8 = 5;
    /// Thumb MOVW/MOVT pair or RISC-V I-type low immediate
    pub const MOV32T_OR_LOW12I: u8 = 7;
    /// RISC-V S-type low immediate
    pub const RISCV_LOW12S: u8 = 8;
    /// 64-bit field
    pub const DIR64: u8 = 10;
}

struct Section {
    name: String,
    rva: u32,
    virtual_size: u32,
    data: Vec<u8>,
}

/// Builder for synthetic PE32/PE32+ images
pub struct TestImage {
    machine: u16,
    pe32: bool,
    subsystem: u16,
    entry: u32,
    image_base: u64,
    section_alignment: u32,
    image_size: Option<u32>,
    header_size: u32,
    directory_count: u32,
    sections: Vec<Section>,
    fixups: Vec<(u8, u32)>,
    reloc_table: Option<Vec<u8>>,
}

impl Default for TestImage {
    fn default() -> Self {
        Self::new()
    }
}

impl TestImage {
    /// File offset of the PE signature
    pub const PE_OFFSET: usize = 0x40;
    /// File offset of the optional header
    pub const OPTIONAL_OFFSET: usize = Self::PE_OFFSET + 4 + 20;
    /// File offset of the section table (PE32+ layout)
    pub const SECTION_TABLE_OFFSET: usize = Self::OPTIONAL_OFFSET + 112 + 16 * 8;
    /// File offset where section data starts
    pub const DATA_START: usize = 0x400;
    /// Default preferred base
    pub const DEFAULT_BASE: u64 = 0x1_4000_0000;

    const FILE_ALIGNMENT: usize = 0x200;

    pub fn new() -> Self {
        Self {
            machine: Machine::native().as_u16(),
            pe32: false,
            subsystem: subsystem::EFI_APPLICATION,
            entry: 0x1000,
            image_base: Self::DEFAULT_BASE,
            section_alignment: 0x1000,
            image_size: None,
            header_size: Self::DATA_START as u32,
            directory_count: 16,
            sections: Vec::new(),
            fixups: Vec::new(),
            reloc_table: None,
        }
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub fn pe32(mut self) -> Self {
        self.pe32 = true;
        self
    }

    pub fn subsystem(mut self, subsystem: u16) -> Self {
        self.subsystem = subsystem;
        self
    }

    pub fn entry(mut self, rva: u32) -> Self {
        self.entry = rva;
        self
    }

    pub fn image_base(mut self, base: u64) -> Self {
        self.image_base = base;
        self
    }

    pub fn section_alignment(mut self, alignment: u32) -> Self {
        self.section_alignment = alignment;
        self
    }

    pub fn image_size(mut self, size: u32) -> Self {
        self.image_size = Some(size);
        self
    }

    pub fn header_size(mut self, size: u32) -> Self {
        self.header_size = size;
        self
    }

    pub fn directory_count(mut self, count: u32) -> Self {
        self.directory_count = count;
        self
    }

    /// Section whose memory size equals its data
    pub fn section(self, name: &str, rva: u32, data: &[u8]) -> Self {
        self.section_sized(name, rva, data.len() as u32, data)
    }

    /// Section with an explicit memory size (larger sizes are zero filled)
    pub fn section_sized(mut self, name: &str, rva: u32, virtual_size: u32, data: &[u8]) -> Self {
        self.sections.push(Section {
            name: String::from(name),
            rva,
            virtual_size,
            data: data.to_vec(),
        });
        self
    }

    /// Relocation entry of `kind` at `rva`
    pub fn fixup(mut self, kind: u8, rva: u32) -> Self {
        self.fixups.push((kind, rva));
        self
    }

    /// Store `value` at `rva` and add a HIGHLOW fixup for it
    pub fn highlow_fixup(self, rva: u32, value: u32) -> Self {
        self.poke(rva, &value.to_le_bytes()).fixup(kind::HIGHLOW, rva)
    }

    /// Store `value` at `rva` and add a DIR64 fixup for it
    pub fn dir64_fixup(self, rva: u32, value: u64) -> Self {
        self.poke(rva, &value.to_le_bytes()).fixup(kind::DIR64, rva)
    }

    /// Replace the generated relocation table with raw bytes
    pub fn reloc_table(mut self, table: &[u8]) -> Self {
        self.reloc_table = Some(table.to_vec());
        self
    }

    /// Write bytes at `rva`, adding a `.data` page if no section covers it
    pub fn poke(mut self, rva: u32, bytes: &[u8]) -> Self {
        let end = rva + bytes.len() as u32;
        let index = match self
            .sections
            .iter()
            .position(|s| s.rva <= rva && end <= s.rva + s.data.len() as u32)
        {
            Some(index) => index,
            None => {
                let page = rva & !0xfff;
                self = self.section(".data", page, &[0u8; 0x1000]);
                self.sections.len() - 1
            }
        };
        let section = &mut self.sections[index];
        let offset = (rva - section.rva) as usize;
        section.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let table = match self.reloc_table.take() {
            Some(table) => Some(table),
            None if !self.fixups.is_empty() => Some(encode_blocks(&self.fixups)),
            None => None,
        };

        let mut reloc = None;
        if let Some(table) = table {
            let rva = align(self.memory_end().max(0x1000), 0x1000);
            reloc = Some((rva, table.len() as u32));
            self = self.section(".reloc", rva, &table);
        }

        let image_size = self
            .image_size
            .unwrap_or_else(|| align(self.memory_end().max(0x2000), self.section_alignment.max(1)));

        let fixed = if self.pe32 { 96 } else { 112 };
        let optional_size = fixed + 16 * 8;
        let table_offset = Self::OPTIONAL_OFFSET + optional_size;

        let mut raw = vec![0u8; Self::DATA_START];
        raw[0..2].copy_from_slice(b"MZ");
        put32(&mut raw, 60, Self::PE_OFFSET as u32);
        raw[Self::PE_OFFSET..Self::PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = Self::PE_OFFSET + 4;
        put16(&mut raw, coff, self.machine);
        put16(&mut raw, coff + 2, self.sections.len() as u16);
        put16(&mut raw, coff + 16, optional_size as u16);
        put16(&mut raw, coff + 18, 0x0022);

        let opt = Self::OPTIONAL_OFFSET;
        if self.pe32 {
            put16(&mut raw, opt, optional_magic::PE32);
            put32(&mut raw, opt + 28, self.image_base as u32);
        } else {
            put16(&mut raw, opt, optional_magic::PE32_PLUS);
            raw[opt + 24..opt + 32].copy_from_slice(&self.image_base.to_le_bytes());
        }
        put32(&mut raw, opt + 16, self.entry);
        put32(&mut raw, opt + 32, self.section_alignment);
        put32(&mut raw, opt + 36, Self::FILE_ALIGNMENT as u32);
        put32(&mut raw, opt + 56, image_size);
        put32(&mut raw, opt + 60, self.header_size);
        put16(&mut raw, opt + 68, self.subsystem);
        put32(&mut raw, opt + fixed - 4, self.directory_count);
        if let Some((rva, size)) = reloc {
            let dir = opt + fixed + BASE_RELOCATION_DIRECTORY * 8;
            put32(&mut raw, dir, rva);
            put32(&mut raw, dir + 4, size);
        }

        for (index, section) in self.sections.iter().enumerate() {
            let entry = table_offset + index * 40;
            let file_offset = raw.len();
            let name = section.name.as_bytes();
            raw[entry..entry + name.len().min(8)].copy_from_slice(&name[..name.len().min(8)]);
            put32(&mut raw, entry + 8, section.virtual_size);
            put32(&mut raw, entry + 12, section.rva);
            put32(&mut raw, entry + 16, section.data.len() as u32);
            put32(&mut raw, entry + 20, if section.data.is_empty() { 0 } else { file_offset as u32 });
            put32(&mut raw, entry + 36, 0x6000_0020);

            raw.extend_from_slice(&section.data);
            raw.resize(align(raw.len() as u32, Self::FILE_ALIGNMENT as u32) as usize, 0);
        }

        raw
    }

    fn memory_end(&self) -> u32 {
        self.sections
            .iter()
            .map(|s| s.rva + s.virtual_size.max(s.data.len() as u32))
            .max()
            .unwrap_or(0)
    }
}

/// Encode `(kind, rva)` entries as base relocation blocks, one per page in
/// ascending page order, each padded to four bytes with an ABSOLUTE entry
pub fn encode_blocks(fixups: &[(u8, u32)]) -> Vec<u8> {
    let mut pages: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    for &(kind, rva) in fixups {
        pages
            .entry(rva & !0xfff)
            .or_default()
            .push((u16::from(kind) << 12) | (rva & 0xfff) as u16);
    }

    let mut table = Vec::new();
    for (page, mut entries) in pages {
        if entries.len() % 2 == 1 {
            entries.push(u16::from(kind::ABSOLUTE) << 12);
        }
        table.extend_from_slice(&page.to_le_bytes());
        table.extend_from_slice(&(8 + 2 * entries.len() as u32).to_le_bytes());
        for entry in entries {
            table.extend_from_slice(&entry.to_le_bytes());
        }
    }
    table
}

/// A machine the loader does not accept on this build
pub fn foreign_machine() -> Machine {
    if Machine::native() == Machine::Arm64 {
        Machine::Amd64
    } else {
        Machine::Arm64
    }
}

fn align(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

fn put16(raw: &mut [u8], offset: usize, value: u16) {
    raw[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(raw: &mut [u8], offset: usize, value: u32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Wrap `(cpu_type, image)` pairs in a fat binary container
pub fn fat_binary(entries: &[(u32, &[u8])]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&FAT_EFI_MAGIC.to_le_bytes());
    raw.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    let mut offset = (FatHeader::SIZE + entries.len() * FatArch::SIZE) as u32;
    for (cputype, image) in entries {
        for field in [*cputype, 0, offset, image.len() as u32, 0] {
            raw.extend_from_slice(&field.to_le_bytes());
        }
        offset += image.len() as u32;
    }
    for (_, image) in entries {
        raw.extend_from_slice(image);
    }
    raw
}
