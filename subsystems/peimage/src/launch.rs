//! # Launch Controller
//!
//! Transfers control to a mapped and relocated image and brings the
//! chainloader back into a consistent state once the image exits.
//!
//! ## Bookkeeping record
//!
//! The firmware keeps one loaded-image record per execution context, not
//! per image. A launched image runs on the chainloader's handle, so the
//! record installed there is swapped for the image's values for the
//! duration of the call and restored afterwards.
//!
//! ## Exit traps
//!
//! A launched image may leave through the firmware `Exit` service instead
//! of returning from its entry point. The platform layer routes such calls
//! through [`ExitTraps::on_exit`]: while a trap is installed for the
//! handle, the exit is recorded and control resumes after the entry call,
//! where [`launch`] collects it with the one-shot [`ExitToken`] it was
//! given at installation. Exits on handles without a trap go to the
//! original firmware service.

use crate::mapper::MappedImage;
use crate::{Error, Result};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use netchain_hal::{DevicePath, Firmware, Handle, LoadedImageRecord, Status};
use spin::Mutex;

// =============================================================================
// EXIT STATUS
// =============================================================================

/// How a launched image finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Status returned from the entry point or passed to `Exit`
    pub status: Status,
    /// Exit data string passed to `Exit`
    pub exit_data: Option<String>,
}

impl ExitStatus {
    /// Did the image report success
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

// =============================================================================
// EXIT TRAPS
// =============================================================================

/// What the platform should do with an `Exit` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Recorded; resume after the entry-point call of the trapping launch
    Trapped,
    /// No trap for this handle, call the firmware service
    Delegate,
}

/// One-shot claim on the exit trap of a launch
///
/// Not `Clone`: [`ExitTraps::take`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct ExitToken {
    handle: Handle,
    generation: u64,
}

impl ExitToken {
    /// Handle the trap is installed on
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

#[derive(Debug)]
struct TrapSlot {
    generation: u64,
    exit: Option<ExitStatus>,
}

#[derive(Debug)]
struct TrapTable {
    slots: BTreeMap<Handle, TrapSlot>,
    generation: u64,
}

/// Registry of exit traps, keyed by image handle
///
/// Nested launches on different handles each own their slot. Installing a
/// trap on a handle that already has one replaces it; the older token then
/// no longer matches and collects nothing.
#[derive(Debug)]
pub struct ExitTraps {
    table: Mutex<TrapTable>,
}

impl ExitTraps {
    /// Empty registry
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(TrapTable { slots: BTreeMap::new(), generation: 0 }),
        }
    }

    /// Install a trap for `handle`
    pub fn install(&self, handle: Handle) -> ExitToken {
        let mut table = self.table.lock();
        table.generation += 1;
        let generation = table.generation;
        if table.slots.insert(handle, TrapSlot { generation, exit: None }).is_some() {
            log::warn!("exit trap on handle {:?} replaced", handle);
        }
        ExitToken { handle, generation }
    }

    /// Is a trap installed for `handle`
    pub fn is_installed(&self, handle: Handle) -> bool {
        self.table.lock().slots.contains_key(&handle)
    }

    /// Route a firmware `Exit` call
    ///
    /// Only the first exit of a launch is recorded.
    pub fn on_exit(&self, handle: Handle, status: Status, exit_data: Option<String>) -> ExitDisposition {
        let mut table = self.table.lock();
        match table.slots.get_mut(&handle) {
            Some(slot) => {
                if slot.exit.is_none() {
                    log::debug!("image {:?} exited with {}", handle, status);
                    slot.exit = Some(ExitStatus { status, exit_data });
                }
                ExitDisposition::Trapped
            }
            None => ExitDisposition::Delegate,
        }
    }

    /// Route a firmware `UnloadImage` call
    ///
    /// Images running under a trap were not loaded by the firmware and
    /// cannot be unloaded through it: `Some(UNSUPPORTED)`. `None` means the
    /// call goes to the firmware service.
    pub fn on_unload(&self, handle: Handle) -> Option<Status> {
        self.is_installed(handle).then_some(Status::UNSUPPORTED)
    }

    /// Remove the trap and collect the recorded exit, if any
    pub fn take(&self, token: ExitToken) -> Option<ExitStatus> {
        let mut table = self.table.lock();
        match table.slots.get(&token.handle) {
            Some(slot) if slot.generation == token.generation => {
                table.slots.remove(&token.handle).and_then(|slot| slot.exit)
            }
            _ => None,
        }
    }
}

impl Default for ExitTraps {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// LAUNCH
// =============================================================================

/// What the launched image sees in its loaded-image record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchContext {
    /// Execution context handle passed to the entry point
    pub handle: Handle,
    /// Device the image came from; `None` keeps the current one
    pub device_handle: Option<Handle>,
    /// File path of the image on that device
    pub file_path: Option<DevicePath>,
    /// Command line (UCS-2, NUL terminated)
    pub load_options: Vec<u16>,
}

impl LaunchContext {
    /// Context running on `handle` with no further overrides
    pub fn new(handle: Handle) -> Self {
        Self { handle, ..Self::default() }
    }

    /// Set the command line
    pub fn with_command_line(mut self, command_line: &str) -> Self {
        self.load_options = command_line.encode_utf16().chain(core::iter::once(0)).collect();
        self
    }
}

/// Run a mapped image until it exits
///
/// The image memory is released when this returns, whatever the outcome.
pub fn launch(
    firmware: &dyn Firmware,
    traps: &ExitTraps,
    image: MappedImage<'_>,
    context: LaunchContext,
) -> Result<ExitStatus> {
    let handle = context.handle;
    let saved = firmware.loaded_image(handle).map_err(|err| {
        log::error!("no loaded-image record on {:?}: {}", handle, err);
        Error::LaunchFailed(err.status())
    })?;

    let record = LoadedImageRecord {
        device_handle: context.device_handle.unwrap_or(saved.device_handle),
        file_path: context.file_path,
        load_options: context.load_options,
        image_base: image.base(),
        image_size: u64::from(image.image_size()),
        ..saved.clone()
    };
    firmware.set_loaded_image(handle, record).map_err(|err| {
        log::error!("cannot update loaded-image record on {:?}: {}", handle, err);
        Error::LaunchFailed(err.status())
    })?;

    let token = traps.install(handle);
    firmware.sync_caches(image.base(), image.size());

    log::info!("starting image at {:#x}, entry {:#x}", image.base(), image.entry());
    // SAFETY: `image` is mapped and relocated, and stays alive until after
    // the call returns
    let returned = unsafe { firmware.call_entry(image.entry(), handle) };

    let exit = traps.take(token).unwrap_or(ExitStatus { status: returned, exit_data: None });
    log::info!("image returned {}", exit.status);

    if let Err(err) = firmware.set_loaded_image(handle, saved) {
        log::error!("cannot restore loaded-image record on {:?}: {}", handle, err);
    }
    drop(image);

    Ok(exit)
}
