//! # Firmware Interface Abstraction
//!
//! Boot-services calls used by the loader: page allocation, the
//! loaded-image bookkeeping record, variables, image load/start and the
//! raw entry-point transfer.

use crate::{Guid, HalResult, Handle, PhysAddr, Status};
use alloc::string::String;
use alloc::vec::Vec;

/// Boot-services capability used by the loader and the orchestrator
pub trait Firmware {
    /// Allocate `pages` contiguous pages of loader code memory
    fn allocate_pages(&self, pages: usize) -> HalResult<PhysAddr>;

    /// Release pages obtained from [`Firmware::allocate_pages`]
    fn free_pages(&self, base: PhysAddr, pages: usize);

    /// Handle of the running chainloader
    fn image_handle(&self) -> Handle;

    /// Read the loaded-image record installed on `handle`
    fn loaded_image(&self, handle: Handle) -> HalResult<LoadedImageRecord>;

    /// Overwrite the loaded-image record installed on `handle`
    fn set_loaded_image(&self, handle: Handle, record: LoadedImageRecord) -> HalResult<()>;

    /// Read a firmware variable; `None` if it does not exist
    fn get_variable(&self, name: &str, vendor: &Guid) -> Option<Vec<u8>>;

    /// Locate the platform image verifier (shim lock protocol)
    fn image_verifier(&self) -> Option<&dyn ImageVerifier>;

    /// Device path installed on `handle`
    fn device_path(&self, handle: Handle) -> Option<DevicePath>;

    /// Firmware `LoadImage` from a memory buffer
    fn load_image(
        &self,
        parent: Handle,
        path: Option<&DevicePath>,
        source: &[u8],
    ) -> Result<Handle, Status>;

    /// Firmware `StartImage`
    fn start_image(&self, handle: Handle) -> StartOutcome;

    /// Firmware `UnloadImage`
    fn unload_image(&self, handle: Handle) -> Status;

    /// Make freshly written code visible to instruction fetch
    fn sync_caches(&self, _base: PhysAddr, _len: usize) {}

    /// Transfer control to an application entry point
    ///
    /// The callee receives `handle` and the system table, following the
    /// platform application calling convention.
    ///
    /// # Safety
    ///
    /// `entry` must point into a fully mapped and relocated image whose
    /// memory stays allocated for the duration of the call.
    unsafe fn call_entry(&self, entry: PhysAddr, handle: Handle) -> Status;
}

/// Signature verification capability supplied by the platform
pub trait ImageVerifier {
    /// Verify the signature of a complete, unmapped image
    fn verify(&self, image: &[u8]) -> Status;
}

/// Outcome of firmware `StartImage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    /// Exit status reported by the started image
    pub status: Status,
    /// Exit data string, if the image supplied one
    pub exit_data: Option<String>,
}

impl StartOutcome {
    /// Successful start without exit data
    pub const fn success() -> Self {
        Self { status: Status::SUCCESS, exit_data: None }
    }
}

// =============================================================================
// LOADED IMAGE RECORD
// =============================================================================

/// The loaded-image bookkeeping record of one execution context
///
/// Mirrors the fields of `EFI_LOADED_IMAGE_PROTOCOL` the loader touches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadedImageRecord {
    /// Image that loaded this one
    pub parent_handle: Handle,
    /// Device the image was loaded from
    pub device_handle: Handle,
    /// File path of the image on that device
    pub file_path: Option<DevicePath>,
    /// Load options (UCS-2 command line)
    pub load_options: Vec<u16>,
    /// Base address of the image in memory
    pub image_base: PhysAddr,
    /// Size of the image in memory
    pub image_size: u64,
}

// =============================================================================
// DEVICE PATH
// =============================================================================

/// Serialized device path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DevicePath(Vec<u8>);

impl DevicePath {
    /// Media device path type
    pub const MEDIA_TYPE: u8 = 0x04;
    /// File path subtype of the media type
    pub const FILE_PATH_SUBTYPE: u8 = 0x04;
    /// End of hardware device path type
    pub const END_TYPE: u8 = 0x7f;
    /// End entire device path subtype
    pub const END_ENTIRE_SUBTYPE: u8 = 0xff;

    const END_NODE: [u8; 4] = [Self::END_TYPE, Self::END_ENTIRE_SUBTYPE, 4, 0];

    /// Wrap serialized device path bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serialized bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copy of this path with a file path node appended before the end node
    ///
    /// Returns `None` when the file name does not fit a node (the node
    /// length field is 16 bits).
    pub fn with_file(&self, filename: &str) -> Option<Self> {
        let mut bytes = Vec::with_capacity(self.0.len() + filename.len() * 2 + 10);
        bytes.extend_from_slice(self.without_end());

        let name: Vec<u16> = filename.encode_utf16().chain(core::iter::once(0)).collect();
        let node_len = u16::try_from(4 + name.len() * 2).ok()?;
        bytes.push(Self::MEDIA_TYPE);
        bytes.push(Self::FILE_PATH_SUBTYPE);
        bytes.extend_from_slice(&node_len.to_le_bytes());
        for unit in name {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }

        bytes.extend_from_slice(&Self::END_NODE);
        Some(Self(bytes))
    }

    /// Node bytes up to (not including) the first end-entire node
    fn without_end(&self) -> &[u8] {
        let mut offset = 0;
        while offset + 4 <= self.0.len() {
            let node_type = self.0[offset];
            let subtype = self.0[offset + 1];
            let len = u16::from_le_bytes([self.0[offset + 2], self.0[offset + 3]]) as usize;
            if node_type == Self::END_TYPE && subtype == Self::END_ENTIRE_SUBTYPE {
                break;
            }
            if len < 4 {
                break;
            }
            offset += len;
        }
        &self.0[..offset.min(self.0.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_device_path_with_file() {
        let device = DevicePath::from_bytes(vec![0x03, 0x0b, 8, 0, 1, 2, 3, 4, 0x7f, 0xff, 4, 0]);
        let path = device.with_file("/a").unwrap();
        let bytes = path.as_bytes();

        assert_eq!(&bytes[..8], &[0x03, 0x0b, 8, 0, 1, 2, 3, 4]);
        // file node: header + "/a\0" in UCS-2
        assert_eq!(&bytes[8..12], &[0x04, 0x04, 10, 0]);
        assert_eq!(&bytes[12..18], &[b'/', 0, b'a', 0, 0, 0]);
        assert_eq!(&bytes[18..], &[0x7f, 0xff, 4, 0]);
    }

    #[test]
    fn test_device_path_empty_base() {
        let path = DevicePath::default().with_file("x").unwrap();
        assert_eq!(path.as_bytes(), &[0x04, 0x04, 8, 0, b'x', 0, 0, 0, 0x7f, 0xff, 4, 0]);
    }

    #[test]
    fn test_start_outcome_success() {
        let outcome = StartOutcome::success();
        assert!(outcome.status.is_success());
        assert!(outcome.exit_data.is_none());
    }
}
