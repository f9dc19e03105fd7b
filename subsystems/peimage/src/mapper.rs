//! # Section Mapper
//!
//! Copies a validated image into freshly allocated, suitably aligned pages:
//! the headers verbatim to the base, every section to its RVA, with the
//! tail of sections that are larger in memory than on disk zero filled.
//!
//! The allocation is owned by [`MappedImage`] and released when it drops,
//! so every early return after allocation unwinds cleanly.

use crate::header::{ImageHeader, SectionDescriptor};
use crate::{Error, LoaderConfig, Result};
use core::fmt;
use netchain_hal::{bytes_to_pages, Firmware, PhysAddr};

/// An image copied into loader-owned pages
pub struct MappedImage<'fw> {
    firmware: &'fw dyn Firmware,
    allocation: PhysAddr,
    pages: usize,
    base: PhysAddr,
    size: usize,
    image_size: u32,
    entry: PhysAddr,
}

impl<'fw> MappedImage<'fw> {
    /// Base address the image was mapped at
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// Size of the image in memory
    pub fn size(&self) -> usize {
        self.size
    }

    /// `SizeOfImage` from the optional header, before alignment
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Absolute entry point
    pub fn entry(&self) -> PhysAddr {
        self.entry
    }

    /// Pages backing the image, including alignment slack
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Mapped image contents
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: `base..base + size` lies inside the allocation this value
        // owns exclusively until drop
        unsafe { core::slice::from_raw_parts(self.base.as_u64() as usize as *const u8, self.size) }
    }

    /// Mapped image contents, mutable
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`; `&mut self` guarantees the only borrow
        unsafe { core::slice::from_raw_parts_mut(self.base.as_u64() as usize as *mut u8, self.size) }
    }
}

impl Drop for MappedImage<'_> {
    fn drop(&mut self) {
        log::trace!("releasing {} pages at {:#x}", self.pages, self.allocation);
        self.firmware.free_pages(self.allocation, self.pages);
    }
}

impl fmt::Debug for MappedImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedImage")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("entry", &format_args!("{:#x}", self.entry))
            .field("pages", &self.pages)
            .finish()
    }
}

/// Map `raw` as described by `header` with default loader settings
pub fn map_sections<'fw>(
    firmware: &'fw dyn Firmware,
    raw: &[u8],
    header: &ImageHeader,
) -> Result<MappedImage<'fw>> {
    map_sections_with(firmware, raw, header, &LoaderConfig::default())
}

/// Map `raw` as described by `header`
pub fn map_sections_with<'fw>(
    firmware: &'fw dyn Firmware,
    raw: &[u8],
    header: &ImageHeader,
    config: &LoaderConfig,
) -> Result<MappedImage<'fw>> {
    let alignment = header.section_alignment as usize;
    if !alignment.is_power_of_two() {
        return Err(Error::InvalidAlignment);
    }

    for section in &header.sections {
        check_section(section, header, raw.len())?;
    }

    let header_size = header.header_size as usize;
    let image_size = header.image_size as usize;
    if header_size > raw.len() {
        return Err(Error::TruncatedImage);
    }

    let page_size = config.page_size;
    let alignment = alignment.max(page_size);
    let slack = if alignment > page_size { alignment - page_size } else { 0 };
    let size = align_up(image_size, alignment).ok_or(Error::SectionOutsideImage)?;
    let pages = size.checked_add(slack).map(bytes_to_pages).ok_or(Error::SectionOutsideImage)?;
    if header_size > size {
        return Err(Error::SectionOutsideImage);
    }

    let allocation = firmware.allocate_pages(pages).map_err(|_| Error::OutOfMemory)?;
    let base = allocation.align_up(alignment as u64);

    let mut image = MappedImage {
        firmware,
        allocation,
        pages,
        base,
        size,
        image_size: header.image_size,
        entry: base.add(u64::from(header.entry_rva)),
    };

    let memory = image.bytes_mut();
    memory.fill(0);
    memory[..header_size].copy_from_slice(&raw[..header_size]);

    for section in &header.sections {
        let start = section.virtual_address as usize;
        let virtual_size = section.virtual_size as usize;
        let copy = virtual_size.min(section.raw_data_size as usize);
        let source = section.raw_data_offset as usize;

        let target = &mut memory[start..start + virtual_size];
        target[..copy].copy_from_slice(&raw[source..source + copy]);
        target[copy..].fill(0);

        log::trace!(
            "section {:8} rva {:#x} size {:#x} (raw {:#x})",
            section.name_str(),
            start,
            virtual_size,
            section.raw_data_size
        );
    }

    log::debug!("image mapped at {:#x}, entry {:#x}", image.base, image.entry);
    Ok(image)
}

fn check_section(section: &SectionDescriptor, header: &ImageHeader, raw_len: usize) -> Result<()> {
    let header_size = header.header_size;
    if section.virtual_address < header_size
        || (section.raw_data_size != 0 && section.raw_data_offset < header_size)
    {
        log::debug!("section {} overlaps the headers", section.name_str());
        return Err(Error::SectionInsideHeader);
    }

    let raw_end = u64::from(section.raw_data_offset) + u64::from(section.raw_data_size);
    if raw_end > raw_len as u64 {
        return Err(Error::TruncatedImage);
    }

    let memory_end = u64::from(section.virtual_address) + u64::from(section.virtual_size);
    if memory_end > u64::from(header.image_size) {
        return Err(Error::SectionOutsideImage);
    }

    Ok(())
}

/// Round `value` up to a power-of-two `alignment`; `None` on overflow
#[inline]
fn align_up(value: usize, alignment: usize) -> Option<usize> {
    value.checked_add(alignment - 1).map(|value| value & !(alignment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_header;
    use crate::testimage::TestImage;
    use netchain_hal::mock::MockPlatform;

    fn patch_u32(raw: &mut [u8], offset: usize, value: u32) {
        raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_map_copies_sections_and_zero_fills() {
        let platform = MockPlatform::new();
        let raw = TestImage::new()
            .section_sized(".text", 0x1000, 0x20, &[0xaa; 0x10])
            .section_sized(".bss", 0x2000, 0x100, &[])
            .build();
        let header = parse_header(&raw).unwrap();
        let image = map_sections(&platform, &raw, &header).unwrap();

        let bytes = image.bytes();
        assert_eq!(&bytes[..2], b"MZ");
        assert_eq!(&bytes[0x1000..0x1010], &[0xaa; 0x10]);
        assert!(bytes[0x1010..0x1020].iter().all(|&b| b == 0));
        assert!(bytes[0x2000..0x2100].iter().all(|&b| b == 0));
        assert_eq!(image.entry(), image.base().add(0x1000));
    }

    #[test]
    fn test_map_truncates_to_virtual_size() {
        let platform = MockPlatform::new();
        let mut data = [0x11u8; 0x40];
        data[0x20..].fill(0x22);
        let raw = TestImage::new().section_sized(".text", 0x1000, 0x20, &data).build();
        let header = parse_header(&raw).unwrap();
        let image = map_sections(&platform, &raw, &header).unwrap();
        assert_eq!(&image.bytes()[0x1000..0x1020], &[0x11; 0x20]);
        assert_eq!(image.bytes()[0x1020], 0);
    }

    #[test]
    fn test_entry_point_within_image() {
        let platform = MockPlatform::new();
        for (entry, image_size) in [(0x1000, 0x2000), (0x1fff, 0x2000), (0x2345, 0x5000), (0x400, 0x2000)] {
            let raw = TestImage::new()
                .entry(entry)
                .image_size(image_size)
                .section(".text", 0x1000, &[0x90; 0x10])
                .build();
            let header = parse_header(&raw).unwrap();
            let image = map_sections(&platform, &raw, &header).unwrap();
            let entry = image.entry();
            assert!(entry >= image.base());
            assert!(entry < image.base().add(u64::from(header.image_size)));
        }
    }

    #[test]
    fn test_map_rejects_bad_alignment() {
        let platform = MockPlatform::new();
        let raw = TestImage::new().section_alignment(0x1800).image_size(0x3000).build();
        let header = parse_header(&raw).unwrap();
        assert_eq!(map_sections(&platform, &raw, &header).unwrap_err(), Error::InvalidAlignment);
        assert_eq!(platform.state().allocation_count, 0);
    }

    #[test]
    fn test_map_large_alignment() {
        let platform = MockPlatform::new();
        let raw = TestImage::new()
            .section_alignment(0x1_0000)
            .section(".text", 0x1_0000, &[0xcc; 4])
            .build();
        let header = parse_header(&raw).unwrap();
        let image = map_sections(&platform, &raw, &header).unwrap();
        assert!(image.base().is_aligned(0x1_0000));
        assert_eq!(&image.bytes()[0x1_0000..0x1_0004], &[0xcc; 4]);
    }

    #[test]
    fn test_map_section_inside_header() {
        let platform = MockPlatform::new();
        let raw = TestImage::new().section(".text", 0x200, &[1; 8]).build();
        let header = parse_header(&raw).unwrap();
        assert_eq!(map_sections(&platform, &raw, &header).unwrap_err(), Error::SectionInsideHeader);

        // raw data pointing into the headers
        let mut raw = TestImage::new().section(".text", 0x1000, &[1; 8]).build();
        patch_u32(&mut raw, TestImage::SECTION_TABLE_OFFSET + 20, 0x100);
        let header = parse_header(&raw).unwrap();
        assert_eq!(map_sections(&platform, &raw, &header).unwrap_err(), Error::SectionInsideHeader);
        assert_eq!(platform.live_allocations(), 0);
    }

    #[test]
    fn test_map_section_raw_data_past_end() {
        let platform = MockPlatform::new();
        let mut raw = TestImage::new().section(".text", 0x1000, &[1; 8]).build();
        patch_u32(&mut raw, TestImage::SECTION_TABLE_OFFSET + 16, 0x10_0000);
        let header = parse_header(&raw).unwrap();
        assert_eq!(map_sections(&platform, &raw, &header).unwrap_err(), Error::TruncatedImage);
    }

    #[test]
    fn test_map_section_outside_image() {
        let platform = MockPlatform::new();
        let raw = TestImage::new()
            .image_size(0x2000)
            .section_sized(".bss", 0x1000, 0x1001, &[])
            .build();
        let header = parse_header(&raw).unwrap();
        assert_eq!(map_sections(&platform, &raw, &header).unwrap_err(), Error::SectionOutsideImage);
        assert_eq!(platform.live_allocations(), 0);
    }

    #[test]
    fn test_align_up_near_usize_max() {
        assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
        assert_eq!(align_up(usize::MAX - 0xfff, 0x1000), Some(usize::MAX - 0xfff));
        assert_eq!(align_up(usize::MAX - 0xffe, 0x1000), None);
        assert_eq!(align_up(usize::MAX, 1), Some(usize::MAX));
    }

    #[test]
    fn test_map_out_of_memory() {
        let platform = MockPlatform::new();
        platform.state().fail_allocations = true;
        let raw = TestImage::new().section(".text", 0x1000, &[1; 8]).build();
        let header = parse_header(&raw).unwrap();
        assert_eq!(map_sections(&platform, &raw, &header).unwrap_err(), Error::OutOfMemory);
    }

    #[test]
    fn test_mapped_image_releases_pages_on_drop() {
        let platform = MockPlatform::new();
        let raw = TestImage::new().section(".text", 0x1000, &[1; 8]).build();
        let header = parse_header(&raw).unwrap();
        let image = map_sections(&platform, &raw, &header).unwrap();
        assert_eq!(platform.live_allocations(), 1);
        drop(image);
        assert_eq!(platform.live_allocations(), 0);
    }
}
