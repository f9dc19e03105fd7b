//! # netchain HAL - Platform Abstraction Layer
//!
//! This crate defines the traits and value types through which the loader
//! and the boot orchestrator talk to the platform. The `netchain-uefi`
//! crate implements them on UEFI boot services and the PXE base code
//! protocol (`UefiPlatform`); the [`mock`] module provides a recording
//! in-memory platform for tests.
//!
//! ## Design Philosophy
//!
//! The HAL is designed to be:
//! - **Narrow**: Only the calls the chainloader actually makes
//! - **Safe**: Raw firmware pointers never cross this boundary, except for
//!   the one `unsafe` entry-point call
//! - **Replaceable**: Every capability is a trait object the caller injects

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod console;
pub mod firmware;
pub mod network;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use console::{Console, Key};
pub use firmware::{DevicePath, Firmware, ImageVerifier, LoadedImageRecord, StartOutcome};
pub use network::{Ipv4Addr, MacAddr, Network, PxeModeFlags};
pub use types::{Guid, Handle, Status};

use core::fmt;

/// Size of a firmware page
pub const PAGE_SIZE: usize = 4096;

/// Number of pages needed to hold `bytes`
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The operation is not supported on this platform
    NotSupported,
    /// Invalid parameter provided
    InvalidParameter,
    /// The requested object does not exist
    NotFound,
    /// The device is not ready yet, retrying may help
    NotReady,
    /// Operation timed out
    Timeout,
    /// Memory allocation failed
    OutOfMemory,
    /// Firmware returned an error status
    Firmware(Status),
}

impl HalError {
    /// Map a firmware status to a HAL error
    pub fn from_status(status: Status) -> Self {
        match status {
            Status::NOT_FOUND => Self::NotFound,
            Status::NOT_READY => Self::NotReady,
            Status::TIMEOUT => Self::Timeout,
            Status::OUT_OF_RESOURCES => Self::OutOfMemory,
            Status::UNSUPPORTED => Self::NotSupported,
            Status::INVALID_PARAMETER => Self::InvalidParameter,
            other => Self::Firmware(other),
        }
    }

    /// Firmware status equivalent of this error
    pub fn status(self) -> Status {
        match self {
            Self::NotSupported => Status::UNSUPPORTED,
            Self::InvalidParameter => Status::INVALID_PARAMETER,
            Self::NotFound => Status::NOT_FOUND,
            Self::NotReady => Status::NOT_READY,
            Self::Timeout => Status::TIMEOUT,
            Self::OutOfMemory => Status::OUT_OF_RESOURCES,
            Self::Firmware(status) => status,
        }
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firmware(status) => write!(f, "firmware error {}", status),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Physical address type
///
/// Boot services run identity mapped, so a physical address is also the
/// address the loader dereferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Align the address up to the given power-of-two alignment
    #[inline]
    pub const fn align_up(self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Distance from `base` to this address
    #[inline]
    pub const fn offset_from(self, base: PhysAddr) -> u64 {
        self.0 - base.0
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_pages() {
        assert_eq!(bytes_to_pages(0), 0);
        assert_eq!(bytes_to_pages(1), 1);
        assert_eq!(bytes_to_pages(PAGE_SIZE), 1);
        assert_eq!(bytes_to_pages(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn test_phys_addr_alignment() {
        let addr = PhysAddr::new(0x1001);
        assert!(!addr.is_aligned(0x1000));
        assert_eq!(addr.align_up(0x1000), PhysAddr::new(0x2000));
        assert_eq!(PhysAddr::new(0x2000).offset_from(PhysAddr::new(0x1000)), 0x1000);
    }

    #[test]
    fn test_hal_error_status_mapping() {
        assert_eq!(HalError::from_status(Status::NOT_READY), HalError::NotReady);
        assert_eq!(HalError::NotFound.status(), Status::NOT_FOUND);
        let other = HalError::from_status(Status::TFTP_ERROR);
        assert_eq!(other, HalError::Firmware(Status::TFTP_ERROR));
        assert_eq!(other.status(), Status::TFTP_ERROR);
    }
}
