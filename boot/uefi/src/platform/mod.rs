//! # UEFI Platform
//!
//! [`UefiPlatform`] implements the HAL traits on top of the system table
//! handed to the chainloader:
//!
//! - [`Firmware`](netchain_hal::Firmware): boot services, loaded-image
//!   protocol, runtime variables, shim lock, entry-point calls
//! - [`Network`](netchain_hal::Network): PXE base code of the boot device,
//!   simple network MAC, DNSv4, SMBIOS UUID
//! - [`Console`](netchain_hal::Console): simple text in/out and `Stall`

mod cache;
mod console;
mod devpath;
mod firmware;
mod network;

use crate::raw::protocols::loaded_image::EfiLoadedImageProtocol;
use crate::raw::protocols::pxe::EfiPxeBaseCodeProtocol;
use crate::raw::protocols::shim_lock::ShimLockProtocol;
use crate::raw::protocols::simple_network::EfiSimpleNetworkProtocol;
use crate::raw::{guids, EfiBootServices, EfiHandle, EfiSystemTable, Guid, Status};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::AtomicU64;
use netchain_hal::Handle;
use spin::Mutex;

pub use firmware::ShimLock;

/// Owned copies of the pointers written into a loaded-image record
#[derive(Debug, Default)]
struct RecordStorage {
    file_path: Vec<u8>,
    load_options: Vec<u16>,
}

/// The firmware platform of a running UEFI application
pub struct UefiPlatform {
    image_handle: EfiHandle,
    system_table: *mut EfiSystemTable,
    boot_services: *mut EfiBootServices,
    device_handle: EfiHandle,
    pxe: *mut EfiPxeBaseCodeProtocol,
    snp: *mut EfiSimpleNetworkProtocol,
    shim: Option<ShimLock>,
    records: Mutex<BTreeMap<Handle, RecordStorage>>,
    ticks: AtomicU64,
}

// SAFETY: boot services are single threaded; the platform is only used on
// the bootstrap processor before ExitBootServices
unsafe impl Send for UefiPlatform {}
// SAFETY: see above
unsafe impl Sync for UefiPlatform {}

impl UefiPlatform {
    /// Wrap the arguments of the application entry point
    ///
    /// Looks up the PXE base code and simple network protocols on the
    /// device the chainloader was loaded from, and the shim lock protocol.
    /// Missing network protocols are not an error here; the boot client
    /// reports them as "not a network boot".
    ///
    /// # Safety
    /// `system_table` must be the table passed to the entry point, and boot
    /// services must stay available for the lifetime of the platform.
    pub unsafe fn new(image_handle: EfiHandle, system_table: *mut EfiSystemTable) -> Result<Self, Status> {
        // SAFETY: caller guarantees a live system table
        let st = unsafe { system_table.as_ref() }.ok_or(Status::INVALID_PARAMETER)?;
        if !st.validate() {
            return Err(Status::INVALID_PARAMETER);
        }
        // SAFETY: boot services are available per caller contract
        let bs = unsafe { st.boot_services.as_ref() }.ok_or(Status::UNSUPPORTED)?;
        if !bs.validate() {
            return Err(Status::UNSUPPORTED);
        }

        let mut platform = Self {
            image_handle,
            system_table,
            boot_services: st.boot_services,
            device_handle: ptr::null_mut(),
            pxe: ptr::null_mut(),
            snp: ptr::null_mut(),
            shim: None,
            records: Mutex::new(BTreeMap::new()),
            ticks: AtomicU64::new(0),
        };

        // SAFETY: boot services are live
        match unsafe { bs.handle_protocol::<EfiLoadedImageProtocol>(image_handle, &guids::LOADED_IMAGE_PROTOCOL) } {
            Ok(li) => {
                // SAFETY: firmware-owned protocol instance
                platform.device_handle = unsafe { (*li).device_handle };
            }
            Err(status) => log::warn!("no loaded-image protocol on own handle: {}", status),
        }

        if !platform.device_handle.is_null() {
            let device = platform.device_handle;
            // SAFETY: boot services are live
            platform.pxe = unsafe { bs.handle_protocol(device, &guids::PXE_BASE_CODE_PROTOCOL) }
                .unwrap_or(ptr::null_mut());
            // SAFETY: boot services are live
            platform.snp = unsafe { bs.handle_protocol(device, &guids::SIMPLE_NETWORK_PROTOCOL) }
                .unwrap_or(ptr::null_mut());
        }
        // SAFETY: boot services are live
        platform.shim = unsafe { bs.locate_protocol::<ShimLockProtocol>(&Guid::SHIM_LOCK) }
            .ok()
            .map(ShimLock::new);

        log::debug!(
            "platform: pxe={} snp={} shim={}",
            !platform.pxe.is_null(),
            !platform.snp.is_null(),
            platform.shim.is_some()
        );
        Ok(platform)
    }

    /// Boot services table
    pub fn boot_services_ptr(&self) -> *mut EfiBootServices {
        self.boot_services
    }

    fn bs(&self) -> &EfiBootServices {
        // SAFETY: validated in `new`; live for the platform lifetime
        unsafe { &*self.boot_services }
    }

    fn st(&self) -> &EfiSystemTable {
        // SAFETY: validated in `new`; live for the platform lifetime
        unsafe { &*self.system_table }
    }

    /// Disable the firmware watchdog
    ///
    /// The boot menu may wait on the user for longer than the five minutes
    /// the firmware arms before starting a boot option.
    pub fn disable_watchdog(&self) {
        // SAFETY: boot services are live
        let status = unsafe { (self.bs().set_watchdog_timer)(0, 0, 0, ptr::null()) };
        if status.is_error() {
            log::debug!("cannot disable watchdog: {}", status);
        }
    }

    fn free_pool(&self, buffer: *mut core::ffi::c_void) {
        if buffer.is_null() {
            return;
        }
        // SAFETY: buffer came from the pool
        let status = unsafe { (self.bs().free_pool)(buffer) };
        if status.is_error() {
            log::debug!("FreePool failed: {}", status);
        }
    }
}

impl core::fmt::Debug for UefiPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UefiPlatform")
            .field("image_handle", &self.image_handle)
            .field("device_handle", &self.device_handle)
            .field("pxe", &!self.pxe.is_null())
            .field("snp", &!self.snp.is_null())
            .field("shim", &self.shim.is_some())
            .finish()
    }
}
