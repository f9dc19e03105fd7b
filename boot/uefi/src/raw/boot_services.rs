//! Raw UEFI Boot Services
//!
//! The table layout is fixed by the firmware ABI. Services the chainloader
//! never calls keep their slot as an untyped pointer.

use super::types::*;
use core::ffi::c_void;

/// Untyped table slot
pub type Unused = *const c_void;

/// `Exit` service signature
pub type ExitFn = unsafe extern "efiapi" fn(
    image_handle: EfiHandle,
    exit_status: Status,
    exit_data_size: usize,
    exit_data: *mut Char16,
) -> Status;

/// `UnloadImage` service signature
pub type UnloadImageFn = unsafe extern "efiapi" fn(image_handle: EfiHandle) -> Status;

// =============================================================================
// BOOT SERVICES TABLE
// =============================================================================

/// EFI Boot Services Table
#[repr(C)]
pub struct EfiBootServices {
    /// Table header
    pub hdr: TableHeader,

    // =========================================================================
    // Task Priority Services
    // =========================================================================

    /// Raise the task priority level
    pub raise_tpl: Unused,
    /// Restore the task priority level
    pub restore_tpl: Unused,

    // =========================================================================
    // Memory Services
    // =========================================================================

    /// Allocate pages of memory
    pub allocate_pages: unsafe extern "efiapi" fn(
        alloc_type: AllocateType,
        memory_type: MemoryType,
        pages: usize,
        memory: *mut PhysicalAddress,
    ) -> Status,

    /// Free pages of memory
    pub free_pages: unsafe extern "efiapi" fn(memory: PhysicalAddress, pages: usize) -> Status,

    /// Get the memory map
    pub get_memory_map: Unused,

    /// Allocate pool memory
    pub allocate_pool: unsafe extern "efiapi" fn(
        pool_type: MemoryType,
        size: usize,
        buffer: *mut *mut u8,
    ) -> Status,

    /// Free pool memory
    pub free_pool: unsafe extern "efiapi" fn(buffer: *mut c_void) -> Status,

    // =========================================================================
    // Event & Timer Services
    // =========================================================================

    /// Create an event
    pub create_event: unsafe extern "efiapi" fn(
        event_type: u32,
        notify_tpl: Tpl,
        notify_function: Option<unsafe extern "efiapi" fn(event: Event, context: *mut c_void)>,
        notify_context: *mut c_void,
        event: *mut Event,
    ) -> Status,

    /// Set a timer
    pub set_timer: Unused,
    /// Wait for events
    pub wait_for_event: Unused,
    /// Signal an event
    pub signal_event: Unused,

    /// Close an event
    pub close_event: unsafe extern "efiapi" fn(event: Event) -> Status,

    /// Check an event
    pub check_event: unsafe extern "efiapi" fn(event: Event) -> Status,

    // =========================================================================
    // Protocol Handler Services
    // =========================================================================

    /// Install protocol interface
    pub install_protocol_interface: Unused,
    /// Reinstall protocol interface
    pub reinstall_protocol_interface: Unused,
    /// Uninstall protocol interface
    pub uninstall_protocol_interface: Unused,

    /// Handle protocol
    pub handle_protocol: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const Guid,
        interface: *mut *mut c_void,
    ) -> Status,

    /// Reserved (must be NULL)
    pub reserved: *mut c_void,
    /// Register protocol notify
    pub register_protocol_notify: Unused,
    /// Locate handle
    pub locate_handle: Unused,
    /// Locate device path
    pub locate_device_path: Unused,
    /// Install configuration table
    pub install_configuration_table: Unused,

    // =========================================================================
    // Image Services
    // =========================================================================

    /// Load an image
    pub load_image: unsafe extern "efiapi" fn(
        boot_policy: Boolean,
        parent_image_handle: EfiHandle,
        device_path: *const u8,
        source_buffer: *const u8,
        source_size: usize,
        image_handle: *mut EfiHandle,
    ) -> Status,

    /// Start an image
    pub start_image: unsafe extern "efiapi" fn(
        image_handle: EfiHandle,
        exit_data_size: *mut usize,
        exit_data: *mut *mut Char16,
    ) -> Status,

    /// Exit from an image
    pub exit: ExitFn,

    /// Unload an image
    pub unload_image: UnloadImageFn,

    /// Exit boot services
    pub exit_boot_services: Unused,

    // =========================================================================
    // Miscellaneous Services
    // =========================================================================

    /// Get next monotonic count
    pub get_next_monotonic_count: Unused,

    /// Stall execution
    pub stall: unsafe extern "efiapi" fn(microseconds: usize) -> Status,

    /// Set watchdog timer
    pub set_watchdog_timer: unsafe extern "efiapi" fn(
        timeout: usize,
        watchdog_code: u64,
        data_size: usize,
        watchdog_data: *const Char16,
    ) -> Status,

    // =========================================================================
    // DriverSupport Services
    // =========================================================================

    /// Connect controller
    pub connect_controller: Unused,
    /// Disconnect controller
    pub disconnect_controller: Unused,

    // =========================================================================
    // Open and Close Protocol Services
    // =========================================================================

    /// Open protocol
    pub open_protocol: Unused,
    /// Close protocol
    pub close_protocol: Unused,
    /// Open protocol information
    pub open_protocol_information: Unused,

    // =========================================================================
    // Library Services
    // =========================================================================

    /// Protocols per handle
    pub protocols_per_handle: Unused,
    /// Locate handle buffer
    pub locate_handle_buffer: Unused,

    /// Locate protocol
    pub locate_protocol: unsafe extern "efiapi" fn(
        protocol: *const Guid,
        registration: *mut c_void,
        interface: *mut *mut c_void,
    ) -> Status,

    /// Install multiple protocol interfaces
    pub install_multiple_protocol_interfaces: Unused,
    /// Uninstall multiple protocol interfaces
    pub uninstall_multiple_protocol_interfaces: Unused,

    // =========================================================================
    // 32-bit CRC Services
    // =========================================================================

    /// Calculate CRC32
    pub calculate_crc32: unsafe extern "efiapi" fn(
        data: *const c_void,
        data_size: usize,
        crc32: *mut u32,
    ) -> Status,

    // =========================================================================
    // Miscellaneous Services (continued)
    // =========================================================================

    /// Copy memory
    pub copy_mem: Unused,
    /// Set memory
    pub set_mem: Unused,
    /// Create event (extended)
    pub create_event_ex: Unused,
}

impl EfiBootServices {
    /// Boot Services signature: "BOOTSERV"
    pub const SIGNATURE: u64 = TableHeader::BOOT_SERVICES_SIGNATURE;

    /// Validate the boot services table
    pub fn validate(&self) -> bool {
        self.hdr.validate(Self::SIGNATURE)
    }

    /// Look up a protocol interface on a handle
    ///
    /// # Safety
    /// Boot services must be available and `T` must match the protocol.
    pub unsafe fn handle_protocol<T>(&self, handle: EfiHandle, guid: &Guid) -> Result<*mut T, Status> {
        let mut interface = core::ptr::null_mut();
        // SAFETY: out-pointer is valid; caller guarantees boot services.
        let status = unsafe { (self.handle_protocol)(handle, guid, &mut interface) };
        status.to_result()?;
        if interface.is_null() {
            return Err(Status::NOT_FOUND);
        }
        Ok(interface.cast())
    }

    /// First instance of a protocol in the system
    ///
    /// # Safety
    /// Boot services must be available and `T` must match the protocol.
    pub unsafe fn locate_protocol<T>(&self, guid: &Guid) -> Result<*mut T, Status> {
        let mut interface = core::ptr::null_mut();
        // SAFETY: out-pointer is valid; caller guarantees boot services.
        let status = unsafe { (self.locate_protocol)(guid, core::ptr::null_mut(), &mut interface) };
        status.to_result()?;
        if interface.is_null() {
            return Err(Status::NOT_FOUND);
        }
        Ok(interface.cast())
    }

    /// Recompute the header CRC after a service pointer was replaced
    ///
    /// # Safety
    /// Boot services must be available and nothing else may be reading the
    /// table concurrently.
    pub unsafe fn update_crc32(&mut self) {
        self.hdr.crc32 = 0;
        let mut crc = 0u32;
        let size = self.hdr.header_size as usize;
        let table = (self as *const Self).cast::<c_void>();
        // SAFETY: the table spans `header_size` bytes.
        if unsafe { (self.calculate_crc32)(table, size, &mut crc) }.is_success() {
            self.hdr.crc32 = crc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn test_table_slot_offsets() {
        // 64-bit layout from the UEFI specification
        assert_eq!(offset_of!(EfiBootServices, allocate_pages), 0x28);
        assert_eq!(offset_of!(EfiBootServices, handle_protocol), 0x98);
        assert_eq!(offset_of!(EfiBootServices, load_image), 0xc8);
        assert_eq!(offset_of!(EfiBootServices, exit), 0xd8);
        assert_eq!(offset_of!(EfiBootServices, unload_image), 0xe0);
        assert_eq!(offset_of!(EfiBootServices, stall), 0xf8);
        assert_eq!(offset_of!(EfiBootServices, locate_protocol), 0x140);
        assert_eq!(offset_of!(EfiBootServices, calculate_crc32), 0x158);
        assert_eq!(size_of::<EfiBootServices>(), 0x178);
    }
}
