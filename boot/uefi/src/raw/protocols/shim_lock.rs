//! Shim lock protocol
//!
//! Installed by shim when it runs under Secure Boot; verifies images
//! against the firmware and MOK databases.

use crate::raw::boot_services::Unused;
use crate::raw::types::*;
use core::ffi::c_void;

/// SHIM_LOCK protocol
#[repr(C)]
pub struct ShimLockProtocol {
    /// Verify a complete image buffer
    pub verify: unsafe extern "efiapi" fn(buffer: *const c_void, size: u32) -> Status,
    /// Hash an image
    pub hash: Unused,
    /// Read PE context
    pub context: Unused,
}
