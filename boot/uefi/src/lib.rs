//! # netchain UEFI Platform
//!
//! The firmware side of the chainloader: raw UEFI bindings, the
//! [`UefiPlatform`] implementation of the HAL traits, the pool allocator
//! and the `Exit`/`UnloadImage` hooks that route exits of directly
//! launched images back to the loader. The `netchain` binary wires these
//! to the boot client.
//!
//! ## Modules
//!
//! - [`raw`]: ABI definitions of tables and protocols
//! - [`platform`]: `Firmware`, `Network` and `Console` on UEFI
//! - [`hooks`]: boot services hooks feeding the exit trap registry
//! - [`trampoline`]: entry-point call with a resume point
//! - [`allocator`]: global allocator on the boot services pool
//! - [`smbios`]: system UUID lookup
//! - [`ucs2`]: firmware string conversion

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod allocator;
pub mod hooks;
pub mod platform;
pub mod raw;
pub mod smbios;
pub mod trampoline;
pub mod ucs2;

pub use platform::UefiPlatform;

use netchain_pxe::BootAction;
use raw::Status;

/// Status `efi_main` returns for the outcome of the boot client
///
/// A local boot fails with `NOT_STARTED` so the boot manager moves on to the
/// next boot option. Success hands control back to the boot manager, which
/// then shows its menu. A chainloaded program's own status is passed on.
pub fn exit_status(action: &BootAction) -> Status {
    match action {
        BootAction::LocalBoot => Status::NOT_STARTED,
        BootAction::Prompt => Status::SUCCESS,
        BootAction::Chainloaded(exit) => exit.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netchain_peimage::ExitStatus;

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(exit_status(&BootAction::LocalBoot), Status::NOT_STARTED);
        assert!(exit_status(&BootAction::LocalBoot).is_error());
        assert_eq!(exit_status(&BootAction::Prompt), Status::SUCCESS);

        let exit = ExitStatus { status: Status::ABORTED, exit_data: Some("bye".into()) };
        assert_eq!(exit_status(&BootAction::Chainloaded(exit)), Status::ABORTED);
    }
}
