//! `Firmware` on boot services

use super::{cache, devpath, RecordStorage, UefiPlatform};
use crate::hooks;
use crate::raw::protocols::loaded_image::EfiLoadedImageProtocol;
use crate::raw::protocols::shim_lock::ShimLockProtocol;
use crate::raw::{guids, handle_from_raw, handle_to_raw, AllocateType, MemoryType, Status, FALSE};
use crate::trampoline::{self, ResumeFrame};
use crate::ucs2;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr;
use netchain_hal::{
    DevicePath, Firmware, Guid, HalError, HalResult, Handle, ImageVerifier, LoadedImageRecord,
    PhysAddr, StartOutcome,
};

// =============================================================================
// SHIM LOCK
// =============================================================================

/// Image verifier backed by the shim lock protocol
#[derive(Debug)]
pub struct ShimLock {
    protocol: *mut ShimLockProtocol,
}

impl ShimLock {
    pub(super) fn new(protocol: *mut ShimLockProtocol) -> Self {
        Self { protocol }
    }
}

impl ImageVerifier for ShimLock {
    fn verify(&self, image: &[u8]) -> Status {
        let Ok(size) = u32::try_from(image.len()) else {
            return Status::BUFFER_TOO_SMALL;
        };
        // SAFETY: located at platform creation, owned by shim
        unsafe { ((*self.protocol).verify)(image.as_ptr().cast(), size) }
    }
}

// =============================================================================
// FIRMWARE
// =============================================================================

impl UefiPlatform {
    fn loaded_image_protocol(&self, handle: Handle) -> HalResult<*mut EfiLoadedImageProtocol> {
        // SAFETY: boot services are live
        unsafe { self.bs().handle_protocol(handle_to_raw(handle), &guids::LOADED_IMAGE_PROTOCOL) }
            .map_err(HalError::from_status)
    }
}

impl Firmware for UefiPlatform {
    fn allocate_pages(&self, pages: usize) -> HalResult<PhysAddr> {
        let mut address = 0;
        // SAFETY: out-pointer is valid
        let status = unsafe {
            (self.bs().allocate_pages)(AllocateType::AnyPages, MemoryType::LoaderCode, pages, &mut address)
        };
        status.to_result().map_err(HalError::from_status)?;
        Ok(PhysAddr::new(address))
    }

    fn free_pages(&self, base: PhysAddr, pages: usize) {
        // SAFETY: pages came from `allocate_pages`
        let status = unsafe { (self.bs().free_pages)(base.as_u64(), pages) };
        if status.is_error() {
            log::warn!("FreePages({:#x}, {}) failed: {}", base, pages, status);
        }
    }

    fn image_handle(&self) -> Handle {
        handle_from_raw(self.image_handle)
    }

    fn loaded_image(&self, handle: Handle) -> HalResult<LoadedImageRecord> {
        let li = self.loaded_image_protocol(handle)?;
        // SAFETY: firmware-owned protocol instance
        let li = unsafe { &*li };

        let load_options = if li.load_options.is_null() || li.load_options_size < 2 {
            Vec::new()
        } else {
            let units = li.load_options_size as usize / 2;
            // SAFETY: the record describes its own buffer
            unsafe { core::slice::from_raw_parts(li.load_options.cast::<u16>(), units) }.to_vec()
        };

        Ok(LoadedImageRecord {
            parent_handle: handle_from_raw(li.parent_handle),
            device_handle: handle_from_raw(li.device_handle),
            // SAFETY: the record points at a terminated path or null
            file_path: unsafe { devpath::copy_path(li.file_path) },
            load_options,
            image_base: PhysAddr::new(li.image_base as u64),
            image_size: li.image_size,
        })
    }

    fn set_loaded_image(&self, handle: Handle, record: LoadedImageRecord) -> HalResult<()> {
        let li = self.loaded_image_protocol(handle)?;
        let options_size = u32::try_from(record.load_options.len() * 2)
            .map_err(|_| HalError::InvalidParameter)?;
        let storage = RecordStorage {
            file_path: record.file_path.map(|path| path.as_bytes().to_vec()).unwrap_or_default(),
            load_options: record.load_options,
        };

        // SAFETY: firmware-owned protocol instance
        let li = unsafe { &mut *li };
        li.parent_handle = handle_to_raw(record.parent_handle);
        li.device_handle = handle_to_raw(record.device_handle);
        li.file_path = if storage.file_path.is_empty() { ptr::null() } else { storage.file_path.as_ptr() };
        li.load_options = if storage.load_options.is_empty() {
            ptr::null_mut()
        } else {
            storage.load_options.as_ptr().cast_mut().cast()
        };
        li.load_options_size = options_size;
        li.image_base = record.image_base.as_u64() as *mut core::ffi::c_void;
        li.image_size = record.image_size;

        // the record now points into `storage`; the previous copies go
        self.records.lock().insert(handle, storage);
        Ok(())
    }

    fn get_variable(&self, name: &str, vendor: &Guid) -> Option<Vec<u8>> {
        // SAFETY: runtime services outlive boot services
        let rt = unsafe { self.st().runtime_services.as_ref() }?;
        let name = ucs2::encode(name);

        let mut size = 0usize;
        // SAFETY: a zero-sized query only writes `size`
        let status = unsafe { (rt.get_variable)(name.as_ptr(), vendor, ptr::null_mut(), &mut size, ptr::null_mut()) };
        if status.is_success() {
            return Some(Vec::new());
        }
        if status != Status::BUFFER_TOO_SMALL {
            if status != Status::NOT_FOUND {
                log::debug!("GetVariable size query failed: {}", status);
            }
            return None;
        }

        let mut data = vec![0u8; size];
        // SAFETY: `data` holds `size` bytes
        let status = unsafe {
            (rt.get_variable)(name.as_ptr(), vendor, ptr::null_mut(), &mut size, data.as_mut_ptr().cast())
        };
        if status.is_error() {
            log::debug!("GetVariable failed: {}", status);
            return None;
        }
        data.truncate(size);
        Some(data)
    }

    fn image_verifier(&self) -> Option<&dyn ImageVerifier> {
        self.shim.as_ref().map(|shim| shim as &dyn ImageVerifier)
    }

    fn device_path(&self, handle: Handle) -> Option<DevicePath> {
        // SAFETY: boot services are live
        let path = unsafe { self.bs().handle_protocol::<u8>(handle_to_raw(handle), &guids::DEVICE_PATH_PROTOCOL) }.ok()?;
        // SAFETY: installed device paths are terminated
        unsafe { devpath::copy_path(path) }
    }

    fn load_image(&self, parent: Handle, path: Option<&DevicePath>, source: &[u8]) -> Result<Handle, Status> {
        let mut child = ptr::null_mut();
        let path = path.map_or(ptr::null(), |path| path.as_bytes().as_ptr());
        // SAFETY: all pointers are valid for the call
        let status = unsafe {
            (self.bs().load_image)(FALSE, handle_to_raw(parent), path, source.as_ptr(), source.len(), &mut child)
        };
        status.to_result()?;
        Ok(handle_from_raw(child))
    }

    fn start_image(&self, handle: Handle) -> StartOutcome {
        let mut size = 0usize;
        let mut data = ptr::null_mut();
        // SAFETY: out-pointers are valid
        let status = unsafe { (self.bs().start_image)(handle_to_raw(handle), &mut size, &mut data) };
        // SAFETY: StartImage returns `size` bytes of exit data or null
        let exit_data = unsafe { ucs2::decode_raw(data, size) };
        self.free_pool(data.cast());
        StartOutcome { status, exit_data }
    }

    fn unload_image(&self, handle: Handle) -> Status {
        // SAFETY: boot services are live
        unsafe { (self.bs().unload_image)(handle_to_raw(handle)) }
    }

    fn sync_caches(&self, base: PhysAddr, len: usize) {
        cache::sync_icache(base.as_u64(), len);
    }

    unsafe fn call_entry(&self, entry: PhysAddr, handle: Handle) -> Status {
        let mut frame = ResumeFrame::new();
        hooks::register_frame(handle, &frame);
        // SAFETY: caller guarantees a mapped, relocated image; `frame`
        // lives until `enter` returns
        let status = unsafe {
            trampoline::enter(entry.as_u64() as usize, handle_to_raw(handle), self.system_table, &mut frame)
        };
        hooks::unregister_frame(handle);
        status
    }
}
