//! Copying firmware device paths

use alloc::vec::Vec;
use netchain_hal::DevicePath;

/// Upper bound on a device path the chainloader copies
const MAX_PATH_LEN: usize = 64 * 1024;

/// Length of the device path at `path`, end node included
///
/// `None` when a node is shorter than its header or the path does not end
/// within [`MAX_PATH_LEN`] bytes.
///
/// # Safety
/// `path` must point to a device path readable up to its end node.
pub(super) unsafe fn path_len(path: *const u8) -> Option<usize> {
    let mut offset = 0usize;
    while offset + 4 <= MAX_PATH_LEN {
        // SAFETY: every node has at least a 4-byte header
        let header = unsafe { path.add(offset).cast::<[u8; 4]>().read_unaligned() };
        let len = usize::from(u16::from_le_bytes([header[2], header[3]]));
        if len < 4 {
            return None;
        }
        offset += len;
        if header[0] == DevicePath::END_TYPE && header[1] == DevicePath::END_ENTIRE_SUBTYPE {
            return (offset <= MAX_PATH_LEN).then_some(offset);
        }
    }
    None
}

/// Owned copy of the device path at `path`
///
/// # Safety
/// `path` must be null or point to a device path readable up to its end
/// node.
pub(super) unsafe fn copy_path(path: *const u8) -> Option<DevicePath> {
    if path.is_null() {
        return None;
    }
    // SAFETY: forwarded caller contract
    let len = unsafe { path_len(path) }?;
    // SAFETY: `len` bytes were just walked
    let bytes = unsafe { core::slice::from_raw_parts(path, len) };
    Some(DevicePath::from_bytes(Vec::from(bytes)))
}
