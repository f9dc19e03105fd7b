//! netchain UEFI entry point
//!
//! Network booted by the firmware PXE client. Runs the boot client and
//! returns to the boot manager when it is done.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;
use netchain_pxe::chainload::EXIT_TRAPS;
use netchain_pxe::{logger, BootAction, BootClient, Platform};
use netchain_uefi::allocator::PoolAllocator;
use netchain_uefi::hooks::ServiceHooks;
use netchain_uefi::raw::{EfiHandle, EfiSystemTable, Status};
use netchain_uefi::{exit_status, UefiPlatform};
use netchain_hal::Console;
use spin::Once;

// =============================================================================
// GLOBAL STATE
// =============================================================================

#[global_allocator]
static ALLOCATOR: PoolAllocator = PoolAllocator;

/// Platform shared with the logger
static PLATFORM: Once<UefiPlatform> = Once::new();

// =============================================================================
// ENTRY POINT
// =============================================================================

/// UEFI entry point
#[no_mangle]
pub extern "efiapi" fn efi_main(image_handle: EfiHandle, system_table: *mut EfiSystemTable) -> Status {
    // SAFETY: the firmware passes a valid table or null
    let Some(st) = (unsafe { system_table.as_ref() }) else {
        return Status::INVALID_PARAMETER;
    };
    // SAFETY: boot services stay up until this function returns
    unsafe { PoolAllocator::init(st.boot_services) };

    // SAFETY: arguments of the firmware entry call
    let platform = match PLATFORM.try_call_once(|| unsafe { UefiPlatform::new(image_handle, system_table) }) {
        Ok(platform) => platform,
        Err(status) => return status,
    };

    let status = boot_main(platform);
    PoolAllocator::shutdown();
    status
}

/// Main boot logic
fn boot_main(platform: &'static UefiPlatform) -> Status {
    if logger::init(platform).is_err() {
        platform.print("netchain: logger already installed\n");
    }
    platform.disable_watchdog();

    // SAFETY: the table was validated by the platform and outlives the guard
    let hooks = match unsafe { ServiceHooks::install(platform.boot_services_ptr(), &EXIT_TRAPS) } {
        Ok(hooks) => Some(hooks),
        Err(err) => {
            log::error!("{}; images cannot return through Exit", err);
            None
        }
    };

    let action = BootClient::new(Platform::new(platform)).run();
    drop(hooks);

    log::info!("boot client finished: {:?}", action);
    if action == BootAction::LocalBoot {
        platform.clear();
    }
    exit_status(&action)
}

// =============================================================================
// PANIC
// =============================================================================

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    if let Some(platform) = PLATFORM.get() {
        platform.print("PANIC!\n");
    }
    log::error!("{}", info);

    loop {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                // SAFETY: halting with interrupts off
                unsafe { core::arch::asm!("cli; hlt", options(nomem, nostack)) };
            } else if #[cfg(target_arch = "aarch64")] {
                // SAFETY: wait for interrupt
                unsafe { core::arch::asm!("wfi", options(nomem, nostack)) };
            } else {
                core::hint::spin_loop();
            }
        }
    }
}
