//! Raw UEFI System Table Definition
//!
//! The System Table is handed to every UEFI application on entry. It
//! carries the console protocols, both service tables and the
//! configuration tables.

use super::boot_services::{EfiBootServices, Unused};
use super::types::*;
use core::ffi::c_void;
use static_assertions::const_assert_eq;

// =============================================================================
// SYSTEM TABLE
// =============================================================================

/// EFI System Table
#[repr(C)]
pub struct EfiSystemTable {
    /// Table header
    pub hdr: TableHeader,
    /// Pointer to null-terminated firmware vendor string (UCS-2)
    pub firmware_vendor: *const Char16,
    /// Firmware revision number
    pub firmware_revision: u32,
    /// Handle for console input device
    pub console_in_handle: EfiHandle,
    /// Pointer to Simple Text Input protocol
    pub con_in: *mut EfiSimpleTextInputProtocol,
    /// Handle for console output device
    pub console_out_handle: EfiHandle,
    /// Pointer to Simple Text Output protocol
    pub con_out: *mut EfiSimpleTextOutputProtocol,
    /// Handle for standard error device
    pub standard_error_handle: EfiHandle,
    /// Pointer to Simple Text Output protocol for standard error
    pub std_err: *mut EfiSimpleTextOutputProtocol,
    /// Pointer to Runtime Services table
    pub runtime_services: *mut EfiRuntimeServices,
    /// Pointer to Boot Services table
    pub boot_services: *mut EfiBootServices,
    /// Number of entries in configuration table
    pub number_of_table_entries: usize,
    /// Pointer to array of configuration tables
    pub configuration_table: *mut ConfigurationTable,
}

impl EfiSystemTable {
    /// System Table signature: "IBI SYST"
    pub const SIGNATURE: u64 = TableHeader::SYSTEM_TABLE_SIGNATURE;

    /// Validate the system table
    pub fn validate(&self) -> bool {
        self.hdr.validate(Self::SIGNATURE)
    }

    /// Configuration table installed under `guid`
    ///
    /// # Safety
    /// The configuration table array must be valid.
    pub unsafe fn find_config_table(&self, guid: &Guid) -> Option<*const c_void> {
        if self.configuration_table.is_null() {
            return None;
        }
        // SAFETY: the firmware reports the array length.
        let tables = unsafe {
            core::slice::from_raw_parts(self.configuration_table, self.number_of_table_entries)
        };
        tables
            .iter()
            .find(|table| table.vendor_guid == *guid)
            .map(|table| table.vendor_table.cast_const())
    }
}

// =============================================================================
// RUNTIME SERVICES
// =============================================================================

/// EFI Runtime Services Table
#[repr(C)]
pub struct EfiRuntimeServices {
    /// Table header
    pub hdr: TableHeader,
    /// Get the current time
    pub get_time: Unused,
    /// Set the current time
    pub set_time: Unused,
    /// Get the wakeup alarm time
    pub get_wakeup_time: Unused,
    /// Set the wakeup alarm time
    pub set_wakeup_time: Unused,
    /// Set virtual address map
    pub set_virtual_address_map: Unused,
    /// Convert pointer to virtual address
    pub convert_pointer: Unused,

    /// Get a variable
    pub get_variable: unsafe extern "efiapi" fn(
        variable_name: *const Char16,
        vendor_guid: *const Guid,
        attributes: *mut u32,
        data_size: *mut usize,
        data: *mut c_void,
    ) -> Status,
}

// =============================================================================
// SIMPLE TEXT INPUT
// =============================================================================

/// Simple Text Input Protocol
#[repr(C)]
pub struct EfiSimpleTextInputProtocol {
    /// Reset the input device
    pub reset: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextInputProtocol,
        extended_verification: Boolean,
    ) -> Status,

    /// Read a keystroke; `NOT_READY` when none is pending
    pub read_key_stroke: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextInputProtocol,
        key: *mut InputKey,
    ) -> Status,

    /// Event signaled when a key is available
    pub wait_for_key: Event,
}

// =============================================================================
// SIMPLE TEXT OUTPUT
// =============================================================================

/// Simple Text Output Protocol
#[repr(C)]
pub struct EfiSimpleTextOutputProtocol {
    /// Reset the output device
    pub reset: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextOutputProtocol,
        extended_verification: Boolean,
    ) -> Status,

    /// Write a null-terminated UCS-2 string
    pub output_string: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextOutputProtocol,
        string: *const Char16,
    ) -> Status,

    /// Test whether a string can be displayed
    pub test_string: Unused,
    /// Query a text mode
    pub query_mode: Unused,
    /// Set a text mode
    pub set_mode: Unused,

    /// Set foreground and background colors
    pub set_attribute: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextOutputProtocol,
        attribute: usize,
    ) -> Status,

    /// Clear the screen
    pub clear_screen: unsafe extern "efiapi" fn(this: *mut EfiSimpleTextOutputProtocol) -> Status,

    /// Move the cursor
    pub set_cursor_position: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextOutputProtocol,
        column: usize,
        row: usize,
    ) -> Status,

    /// Show or hide the cursor
    pub enable_cursor: unsafe extern "efiapi" fn(
        this: *mut EfiSimpleTextOutputProtocol,
        visible: Boolean,
    ) -> Status,

    /// Current mode
    pub mode: *mut SimpleTextOutputMode,
}

/// Simple Text Output mode
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SimpleTextOutputMode {
    /// Number of modes
    pub max_mode: i32,
    /// Current mode
    pub mode: i32,
    /// Current attribute
    pub attribute: i32,
    /// Cursor column
    pub cursor_column: i32,
    /// Cursor row
    pub cursor_row: i32,
    /// Cursor visible
    pub cursor_visible: Boolean,
}

/// Text attributes
pub mod attr {
    /// Black
    pub const BLACK: usize = 0x00;
    /// Light gray
    pub const LIGHTGRAY: usize = 0x07;
    /// Background: light gray
    pub const BACKGROUND_LIGHTGRAY: usize = 0x70;

    /// Normal text
    pub const NORMAL: usize = LIGHTGRAY;
    /// Selected menu entry: black on light gray
    pub const HIGHLIGHT: usize = BLACK | BACKGROUND_LIGHTGRAY;
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(core::mem::size_of::<EfiSystemTable>(), 120);
#[cfg(target_pointer_width = "64")]
const_assert_eq!(core::mem::size_of::<EfiSimpleTextOutputProtocol>(), 80);
