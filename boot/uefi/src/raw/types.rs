//! Raw UEFI type definitions
//!
//! Binary-compatible forms of the basic UEFI types. [`Guid`] and [`Status`]
//! are shared with the HAL; their layouts already match the ABI.

use core::ffi::c_void;

pub use netchain_hal::{Guid, Status};

// =============================================================================
// BASIC TYPES
// =============================================================================

/// UEFI Boolean type (1 byte)
pub type Boolean = u8;

/// UEFI CHAR8 type (ASCII character)
pub type Char8 = u8;

/// UEFI CHAR16 type (UCS-2 character)
pub type Char16 = u16;

/// Raw handle as passed across the firmware boundary
pub type EfiHandle = *mut c_void;

/// Raw event
pub type Event = *mut c_void;

/// Physical address
pub type PhysicalAddress = u64;

/// Task Priority Level
pub type Tpl = usize;

/// Boolean true
pub const TRUE: Boolean = 1;
/// Boolean false
pub const FALSE: Boolean = 0;

/// Convert a raw handle to the HAL form
#[inline]
pub fn handle_from_raw(raw: EfiHandle) -> netchain_hal::Handle {
    netchain_hal::Handle(raw as usize)
}

/// Convert a HAL handle back to the raw form
#[inline]
pub fn handle_to_raw(handle: netchain_hal::Handle) -> EfiHandle {
    handle.0 as EfiHandle
}

// =============================================================================
// STATUS CODES
// =============================================================================

/// Status codes the HAL does not name
pub mod status {
    use super::Status;

    const ERROR_BIT: u64 = 1u64 << 63;

    /// No mapping: the network stack has no address configured yet
    pub const NO_MAPPING: Status = Status::new(ERROR_BIT | 17);
}

// =============================================================================
// TABLE HEADER
// =============================================================================

/// UEFI Table Header
///
/// Common header for all UEFI tables
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TableHeader {
    /// Signature identifying the table
    pub signature: u64,
    /// Revision of the table
    pub revision: u32,
    /// Size of the entire table including header
    pub header_size: u32,
    /// CRC32 of the entire table
    pub crc32: u32,
    /// Reserved (must be zero)
    pub reserved: u32,
}

impl TableHeader {
    /// EFI_SYSTEM_TABLE_SIGNATURE
    pub const SYSTEM_TABLE_SIGNATURE: u64 = 0x5453595320494249; // "IBI SYST"

    /// EFI_BOOT_SERVICES_SIGNATURE
    pub const BOOT_SERVICES_SIGNATURE: u64 = 0x56524553544F4F42; // "BOOTSERV"

    /// Validate the table header
    pub fn validate(&self, expected_signature: u64) -> bool {
        self.signature == expected_signature && self.reserved == 0
    }
}

// =============================================================================
// CONFIGURATION TABLE
// =============================================================================

/// UEFI Configuration Table Entry
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ConfigurationTable {
    /// GUID identifying the table type
    pub vendor_guid: Guid,
    /// Pointer to the table data
    pub vendor_table: *mut c_void,
}

// =============================================================================
// MEMORY
// =============================================================================

/// Allocation strategy of `AllocatePages`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AllocateType {
    /// Any available range
    AnyPages = 0,
    /// Any range below the given address
    MaxAddress = 1,
    /// Exactly the given address
    Address = 2,
}

/// Memory types used by the chainloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryType {
    /// Code of a loaded application
    LoaderCode = 1,
    /// Data of a loaded application
    LoaderData = 2,
}

// =============================================================================
// PROTOCOL ACCESS
// =============================================================================

/// Search type of `LocateHandle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LocateSearchType {
    /// Every handle
    AllHandles = 0,
    /// Handles registered for a notify
    ByRegisterNotify = 1,
    /// Handles supporting a protocol
    ByProtocol = 2,
}

/// Interface type of `InstallProtocolInterface`
pub type InterfaceType = u32;

/// Timer type of `SetTimer`
pub type TimerDelay = u32;

// =============================================================================
// INPUT KEY
// =============================================================================

/// Input key structure
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct InputKey {
    /// Scan code
    pub scan_code: u16,
    /// Unicode character
    pub unicode_char: Char16,
}

// =============================================================================
// IP ADDRESS
// =============================================================================

/// `EFI_IP_ADDRESS`: IPv4 in the first four bytes, IPv6 in all sixteen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, align(4))]
pub struct IpAddress {
    /// Address bytes, network order
    pub addr: [u8; 16],
}

impl IpAddress {
    /// IPv4 address padded with zeros
    pub const fn v4(octets: [u8; 4]) -> Self {
        let mut addr = [0u8; 16];
        addr[0] = octets[0];
        addr[1] = octets[1];
        addr[2] = octets[2];
        addr[3] = octets[3];
        Self { addr }
    }
}

/// `EFI_MAC_ADDRESS`
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MacAddress {
    /// Address bytes; Ethernet uses the first six
    pub addr: [u8; 32],
}

// =============================================================================
// GUIDS
// =============================================================================

/// Protocol and table GUIDs used by the chainloader
pub mod guids {
    use super::Guid;

    /// EFI_LOADED_IMAGE_PROTOCOL_GUID
    pub const LOADED_IMAGE_PROTOCOL: Guid = Guid::new(
        0x5b1b31a1, 0x9562, 0x11d2,
        [0x8e, 0x3f, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
    );

    /// EFI_DEVICE_PATH_PROTOCOL_GUID
    pub const DEVICE_PATH_PROTOCOL: Guid = Guid::new(
        0x09576e91, 0x6d3f, 0x11d2,
        [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
    );

    /// EFI_PXE_BASE_CODE_PROTOCOL_GUID
    pub const PXE_BASE_CODE_PROTOCOL: Guid = Guid::new(
        0x03c4e603, 0xac28, 0x11d3,
        [0x9a, 0x2d, 0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d],
    );

    /// EFI_SIMPLE_NETWORK_PROTOCOL_GUID
    pub const SIMPLE_NETWORK_PROTOCOL: Guid = Guid::new(
        0xa19832b9, 0xac25, 0x11d3,
        [0x9a, 0x2d, 0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d],
    );

    /// EFI_DNS4_SERVICE_BINDING_PROTOCOL_GUID
    pub const DNS4_SERVICE_BINDING_PROTOCOL: Guid = Guid::new(
        0xb625b186, 0xe063, 0x44f7,
        [0x89, 0x05, 0x6a, 0x74, 0xdc, 0x6f, 0x52, 0xb4],
    );

    /// EFI_DNS4_PROTOCOL_GUID
    pub const DNS4_PROTOCOL: Guid = Guid::new(
        0xae3d28cc, 0xe05b, 0x4fa1,
        [0xa0, 0x11, 0x7e, 0xb5, 0x5a, 0x3f, 0x14, 0x01],
    );

    /// SMBIOS 2.x entry point
    pub const SMBIOS_TABLE: Guid = Guid::new(
        0xeb9d2d31, 0x2d88, 0x11d3,
        [0x9a, 0x16, 0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d],
    );

    /// SMBIOS 3.x entry point
    pub const SMBIOS3_TABLE: Guid = Guid::new(
        0xf2fd1544, 0x9794, 0x4a2c,
        [0x99, 0x2e, 0xe5, 0xbb, 0xcf, 0x20, 0xe3, 0x94],
    );
}
