//! Exit and UnloadImage hooks
//!
//! While the chainloader runs, the `Exit` and `UnloadImage` slots of the
//! boot services table point here. Calls on handles with an installed exit
//! trap are answered by the trap registry; everything else goes to the
//! saved firmware services. The saved services are put back when the
//! [`ServiceHooks`] guard is dropped.

use crate::raw::boot_services::{ExitFn, UnloadImageFn};
use crate::raw::{handle_from_raw, Char16, EfiBootServices, EfiHandle, Status};
use crate::trampoline::{self, ResumeFrame};
use crate::ucs2;
use alloc::collections::BTreeMap;
use netchain_hal::Handle;
use netchain_peimage::{ExitDisposition, ExitTraps};
use spin::Mutex;

/// Firmware services replaced by the hooks
#[derive(Clone, Copy)]
struct SavedServices {
    boot_services: *mut EfiBootServices,
    exit: ExitFn,
    unload_image: UnloadImageFn,
}

// SAFETY: boot services run on the bootstrap processor only
unsafe impl Send for SavedServices {}

struct HookState {
    saved: Option<SavedServices>,
    traps: Option<&'static ExitTraps>,
    frames: BTreeMap<Handle, usize>,
}

static STATE: Mutex<HookState> = Mutex::new(HookState {
    saved: None,
    traps: None,
    frames: BTreeMap::new(),
});

/// Errors installing the hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookError {
    /// Hooks are already installed
    AlreadyInstalled,
    /// The boot services table is missing or damaged
    InvalidTable,
}

impl core::fmt::Display for HookError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyInstalled => write!(f, "exit hooks already installed"),
            Self::InvalidTable => write!(f, "invalid boot services table"),
        }
    }
}

/// Guard holding the boot services hooks in place
#[derive(Debug)]
pub struct ServiceHooks {
    _private: (),
}

impl ServiceHooks {
    /// Replace `Exit` and `UnloadImage` in `boot_services`
    ///
    /// # Safety
    /// `boot_services` must be the live boot services table and stay valid
    /// until the guard is dropped.
    pub unsafe fn install(
        boot_services: *mut EfiBootServices,
        traps: &'static ExitTraps,
    ) -> Result<Self, HookError> {
        let mut state = STATE.lock();
        if state.saved.is_some() {
            return Err(HookError::AlreadyInstalled);
        }
        // SAFETY: caller guarantees a live table
        let bs = unsafe { boot_services.as_mut() }.ok_or(HookError::InvalidTable)?;
        if !bs.validate() {
            return Err(HookError::InvalidTable);
        }

        state.saved = Some(SavedServices {
            boot_services,
            exit: bs.exit,
            unload_image: bs.unload_image,
        });
        state.traps = Some(traps);
        bs.exit = exit_hook;
        bs.unload_image = unload_image_hook;
        // SAFETY: single-threaded boot services
        unsafe { bs.update_crc32() };
        log::debug!("Exit and UnloadImage hooked");
        Ok(Self { _private: () })
    }
}

impl Drop for ServiceHooks {
    fn drop(&mut self) {
        let mut state = STATE.lock();
        if let Some(saved) = state.saved.take() {
            // SAFETY: the table outlives the guard per `install`
            if let Some(bs) = unsafe { saved.boot_services.as_mut() } {
                bs.exit = saved.exit;
                bs.unload_image = saved.unload_image;
                // SAFETY: single-threaded boot services
                unsafe { bs.update_crc32() };
            }
        }
        state.traps = None;
        state.frames.clear();
        log::debug!("Exit and UnloadImage restored");
    }
}

/// Record where a trapped `Exit` on `handle` resumes
pub(crate) fn register_frame(handle: Handle, frame: &ResumeFrame) {
    STATE.lock().frames.insert(handle, frame as *const ResumeFrame as usize);
}

/// Forget the resume point of `handle`
pub(crate) fn unregister_frame(handle: Handle) {
    STATE.lock().frames.remove(&handle);
}

/// Resume point and trap registry for an `Exit` on `handle`
fn trap_route(handle: Handle) -> Option<(&'static ExitTraps, usize)> {
    let state = STATE.lock();
    let traps = state.traps?;
    if !traps.is_installed(handle) {
        return None;
    }
    let frame = state.frames.get(&handle).copied()?;
    Some((traps, frame))
}

unsafe extern "efiapi" fn exit_hook(
    image_handle: EfiHandle,
    exit_status: Status,
    exit_data_size: usize,
    exit_data: *mut Char16,
) -> Status {
    let handle = handle_from_raw(image_handle);

    if let Some((traps, frame)) = trap_route(handle) {
        // SAFETY: the firmware contract makes exit data a pool buffer of
        // `exit_data_size` bytes
        let data = unsafe { ucs2::decode_raw(exit_data, exit_data_size) };
        if !exit_data.is_null() {
            free_pool(exit_data.cast());
        }
        if traps.on_exit(handle, exit_status, data) == ExitDisposition::Trapped {
            // SAFETY: the frame belongs to the running `call_entry` of
            // this handle; the image frames above it are abandoned
            unsafe { trampoline::resume(frame as *const ResumeFrame, exit_status) }
        }
        return Status::INVALID_PARAMETER;
    }

    match STATE.lock().saved {
        // SAFETY: the saved firmware service
        Some(saved) => unsafe { (saved.exit)(image_handle, exit_status, exit_data_size, exit_data) },
        None => Status::UNSUPPORTED,
    }
}

unsafe extern "efiapi" fn unload_image_hook(image_handle: EfiHandle) -> Status {
    let handle = handle_from_raw(image_handle);
    let (traps, saved) = {
        let state = STATE.lock();
        (state.traps, state.saved)
    };
    if let Some(status) = traps.and_then(|traps| traps.on_unload(handle)) {
        log::debug!("unload of {:?} refused: {}", handle, status);
        return status;
    }
    match saved {
        // SAFETY: the saved firmware service
        Some(saved) => unsafe { (saved.unload_image)(image_handle) },
        None => Status::UNSUPPORTED,
    }
}

fn free_pool(buffer: *mut core::ffi::c_void) {
    let saved = STATE.lock().saved;
    if let Some(saved) = saved {
        // SAFETY: hooks are only installed while the table is live
        if let Some(bs) = unsafe { saved.boot_services.as_ref() } {
            // SAFETY: buffer came from the pool
            let _ = unsafe { (bs.free_pool)(buffer) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{EfiSystemTable, TableHeader};
    use alloc::vec;
    use alloc::vec::Vec;
    use core::ffi::c_void;
    use core::mem::size_of;
    use core::ptr;
    use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

    static TABLE: AtomicPtr<EfiBootServices> = AtomicPtr::new(ptr::null_mut());
    static FIRMWARE_EXIT: AtomicUsize = AtomicUsize::new(0);
    static FIRMWARE_UNLOAD: AtomicUsize = AtomicUsize::new(0);
    static TRAPS: ExitTraps = ExitTraps::new();

    extern "efiapi" fn unused_slot() {}

    unsafe extern "efiapi" fn firmware_exit(
        handle: EfiHandle,
        _status: Status,
        _size: usize,
        _data: *mut Char16,
    ) -> Status {
        FIRMWARE_EXIT.store(handle as usize, Ordering::SeqCst);
        Status::SUCCESS
    }

    unsafe extern "efiapi" fn firmware_unload(handle: EfiHandle) -> Status {
        FIRMWARE_UNLOAD.store(handle as usize, Ordering::SeqCst);
        Status::SUCCESS
    }

    unsafe extern "efiapi" fn firmware_free_pool(_buffer: *mut c_void) -> Status {
        Status::SUCCESS
    }

    unsafe extern "efiapi" fn firmware_crc32(_data: *const c_void, size: usize, crc: *mut u32) -> Status {
        // SAFETY: out-pointer from `update_crc32`
        unsafe { *crc = size as u32 ^ 0xc0de };
        Status::SUCCESS
    }

    /// Boot services table whose unused slots all point at one dummy
    fn fake_table() -> Vec<usize> {
        let words = size_of::<EfiBootServices>() / size_of::<usize>();
        let mut table = vec![unused_slot as usize; words];
        let bs = table.as_mut_ptr().cast::<EfiBootServices>();
        // SAFETY: `table` spans the whole struct and every slot is non-null
        unsafe {
            (*bs).hdr = TableHeader {
                signature: EfiBootServices::SIGNATURE,
                revision: 0x0002_0046,
                header_size: size_of::<EfiBootServices>() as u32,
                crc32: 0,
                reserved: 0,
            };
            (*bs).exit = firmware_exit;
            (*bs).unload_image = firmware_unload;
            (*bs).free_pool = firmware_free_pool;
            (*bs).calculate_crc32 = firmware_crc32;
        }
        table
    }

    extern "efiapi" fn exits_through_table(handle: EfiHandle, _st: *mut EfiSystemTable) -> Status {
        let bs = TABLE.load(Ordering::SeqCst);
        // SAFETY: the test installed the hooks on this table
        let _ = unsafe { ((*bs).exit)(handle, Status::ABORTED, 0, ptr::null_mut()) };
        Status::SUCCESS
    }

    #[test]
    fn test_hook_error_display() {
        assert_eq!(HookError::AlreadyInstalled.to_string(), "exit hooks already installed");
        assert_eq!(HookError::InvalidTable.to_string(), "invalid boot services table");
    }

    // One test drives the global hook state end to end.
    #[test]
    fn test_hooks_route_exit_and_unload() {
        let mut table = fake_table();
        let bs = table.as_mut_ptr().cast::<EfiBootServices>();
        TABLE.store(bs, Ordering::SeqCst);

        // SAFETY: null is rejected before any access
        assert_eq!(
            unsafe { ServiceHooks::install(ptr::null_mut(), &TRAPS) }.unwrap_err(),
            HookError::InvalidTable
        );
        // SAFETY: `table` outlives the guard
        let hooks = unsafe { ServiceHooks::install(bs, &TRAPS) }.unwrap();
        // SAFETY: test-owned table
        unsafe {
            assert_eq!((*bs).exit as usize, exit_hook as usize);
            assert_eq!((*bs).hdr.crc32, size_of::<EfiBootServices>() as u32 ^ 0xc0de);
            assert_eq!(ServiceHooks::install(bs, &TRAPS).unwrap_err(), HookError::AlreadyInstalled);
        }

        // no trap: forwarded to the firmware
        // SAFETY: hooked slot of the test table
        let status = unsafe { ((*bs).exit)(0x31 as EfiHandle, Status::ABORTED, 0, ptr::null_mut()) };
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(FIRMWARE_EXIT.load(Ordering::SeqCst), 0x31);

        // trapped: unload refused, exit resumes the entry call
        let handle = Handle(0x42);
        let token = TRAPS.install(handle);
        // SAFETY: hooked slot of the test table
        assert_eq!(unsafe { ((*bs).unload_image)(0x42 as EfiHandle) }, Status::UNSUPPORTED);
        assert_eq!(FIRMWARE_UNLOAD.load(Ordering::SeqCst), 0);

        let mut frame = ResumeFrame::new();
        register_frame(handle, &frame);
        // SAFETY: the entry exits through the hooked table
        let status = unsafe {
            trampoline::enter(exits_through_table as usize, 0x42 as EfiHandle, ptr::null_mut(), &mut frame)
        };
        unregister_frame(handle);
        assert_eq!(status, Status::ABORTED);
        assert_eq!(FIRMWARE_EXIT.load(Ordering::SeqCst), 0x31);
        assert_eq!(TRAPS.take(token).map(|exit| exit.status), Some(Status::ABORTED));

        drop(hooks);
        // SAFETY: restored slots of the test table
        unsafe {
            assert_eq!((*bs).exit as usize, firmware_exit as usize);
            assert_eq!(((*bs).unload_image)(0x42 as EfiHandle), Status::SUCCESS);
        }
        assert_eq!(FIRMWARE_UNLOAD.load(Ordering::SeqCst), 0x42);
    }
}
