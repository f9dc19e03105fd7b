//! Loaded Image Protocol
//!
//! Installed by the firmware on every image handle.

use crate::raw::types::*;
use core::ffi::c_void;
use static_assertions::const_assert_eq;

/// Loaded Image Protocol
#[repr(C)]
pub struct EfiLoadedImageProtocol {
    /// Revision
    pub revision: u32,
    /// Parent handle
    pub parent_handle: EfiHandle,
    /// System table
    pub system_table: *mut c_void,

    // Device location
    /// Device handle
    pub device_handle: EfiHandle,
    /// File path
    pub file_path: *const u8,
    /// Reserved
    pub reserved: *mut c_void,

    // Load options
    /// Load options size in bytes
    pub load_options_size: u32,
    /// Load options
    pub load_options: *mut c_void,

    // Image location
    /// Image base
    pub image_base: *mut c_void,
    /// Image size
    pub image_size: u64,
    /// Image code type
    pub image_code_type: u32,
    /// Image data type
    pub image_data_type: u32,

    /// Unload function
    pub unload: Option<unsafe extern "efiapi" fn(image_handle: EfiHandle) -> Status>,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(core::mem::size_of::<EfiLoadedImageProtocol>(), 96);
