//! # Image Loader
//!
//! Drives one load attempt through its stages:
//!
//! ```text
//! Unloaded -> HeaderParsed -> Mapped -> Relocated -> Launched -> Unloaded
//!                                                 \
//!                                                  -> ValidatedPassthrough -> Unloaded
//! ```
//!
//! Any failure returns straight to `Unloaded`; the mapped image owns its
//! pages, so unwinding releases them. When Secure Boot is enforced (or
//! forced by configuration) the image is not mapped here: its signature is
//! checked and the firmware loads it.

use crate::arch::Machine;
use crate::fat::select_arch_image_for;
use crate::header::{parse_header_with, ImageHeader};
use crate::launch::{launch, ExitStatus, ExitTraps, LaunchContext};
use crate::mapper::{map_sections_with, MappedImage};
use crate::relocate::{load_delta, relocate};
use crate::secure;
use crate::{Error, Result};
use alloc::vec::Vec;
use core::fmt;
use netchain_hal::{Firmware, PAGE_SIZE};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Loader settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Granularity of firmware page allocations
    pub page_size: usize,
    /// Machine images must be built for
    pub machine: Machine,
    /// Validate signatures even when the platform does not enforce it
    pub force_secure_validation: bool,
    /// Reject images whose subsystem is not an EFI application
    pub require_efi_application: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            machine: Machine::native(),
            force_secure_validation: false,
            require_efi_application: true,
        }
    }
}

// =============================================================================
// LOAD STATE
// =============================================================================

/// Stage of a load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing held
    Unloaded,
    /// Headers validated
    HeaderParsed,
    /// Sections copied into loader pages
    Mapped,
    /// Base relocations applied
    Relocated,
    /// Control transferred to the entry point
    Launched,
    /// Signature checked, image handed to the firmware loader
    ValidatedPassthrough,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::HeaderParsed => "header parsed",
            Self::Mapped => "mapped",
            Self::Relocated => "relocated",
            Self::Launched => "launched",
            Self::ValidatedPassthrough => "validated passthrough",
        };
        f.write_str(name)
    }
}

// =============================================================================
// LOADER
// =============================================================================

/// Loads and runs PE/COFF images on behalf of the chainloader
pub struct Loader<'fw> {
    firmware: &'fw dyn Firmware,
    traps: &'fw ExitTraps,
    config: LoaderConfig,
    history: Vec<LoadState>,
}

impl<'fw> Loader<'fw> {
    /// Loader with default settings
    pub fn new(firmware: &'fw dyn Firmware, traps: &'fw ExitTraps) -> Self {
        Self::with_config(firmware, traps, LoaderConfig::default())
    }

    /// Loader with explicit settings
    pub fn with_config(firmware: &'fw dyn Firmware, traps: &'fw ExitTraps, config: LoaderConfig) -> Self {
        Self {
            firmware,
            traps,
            config,
            history: alloc::vec![LoadState::Unloaded],
        }
    }

    /// Loader settings
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Current stage
    pub fn state(&self) -> LoadState {
        self.history.last().copied().unwrap_or(LoadState::Unloaded)
    }

    /// Every stage entered since the loader was created
    pub fn history(&self) -> &[LoadState] {
        &self.history
    }

    fn enter(&mut self, state: LoadState) {
        log::trace!("load state: {} -> {}", self.state(), state);
        self.history.push(state);
    }

    fn unwind<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            log::debug!("load failed in state {}: {}", self.state(), err);
            self.enter(LoadState::Unloaded);
        }
        result
    }

    /// Parse, map and relocate `raw` without running it
    ///
    /// `raw` may be a fat binary; only the native sub-image is loaded.
    pub fn load(&mut self, raw: &[u8]) -> Result<(ImageHeader, MappedImage<'fw>)> {
        let result = self.load_stages(raw);
        self.unwind(result)
    }

    fn load_stages(&mut self, raw: &[u8]) -> Result<(ImageHeader, MappedImage<'fw>)> {
        let raw = select_arch_image_for(raw, self.config.machine)?.apply(raw);

        let header = parse_header_with(raw, &self.config)?;
        self.enter(LoadState::HeaderParsed);

        let mut image = map_sections_with(self.firmware, raw, &header, &self.config)?;
        self.enter(LoadState::Mapped);

        let delta = load_delta(&image, &header);
        relocate(&mut image, &header, delta)?;
        self.enter(LoadState::Relocated);

        Ok((header, image))
    }

    /// Load `raw` and run it until it exits
    ///
    /// Takes the Secure Boot path when [`Loader::must_validate`] says so.
    pub fn load_and_launch(&mut self, raw: &[u8], context: LaunchContext) -> Result<ExitStatus> {
        if self.must_validate() {
            return self.launch_validated(raw, context);
        }

        let (_, image) = self.load(raw)?;
        self.enter(LoadState::Launched);
        let result = launch(self.firmware, self.traps, image, context);
        let result = self.unwind(result);
        if result.is_ok() {
            self.enter(LoadState::Unloaded);
        }
        result
    }

    /// Whether images must go through signature validation
    pub fn must_validate(&self) -> bool {
        self.config.force_secure_validation || secure::secure_mode(self.firmware)
    }

    /// Validate `raw` and let the firmware load and start it
    ///
    /// `context.handle` becomes the parent of the new image. The signature
    /// covers the selected sub-image of a fat binary, which is also what the
    /// firmware receives.
    pub fn launch_validated(&mut self, raw: &[u8], context: LaunchContext) -> Result<ExitStatus> {
        let result = self.validated_stages(raw, context);
        let result = self.unwind(result);
        if result.is_ok() {
            self.enter(LoadState::Unloaded);
        }
        result
    }

    fn validated_stages(&mut self, raw: &[u8], context: LaunchContext) -> Result<ExitStatus> {
        let raw = select_arch_image_for(raw, self.config.machine)?.apply(raw);
        secure::validate(self.firmware, raw)?;
        self.enter(LoadState::ValidatedPassthrough);

        let handle = self
            .firmware
            .load_image(context.handle, context.file_path.as_ref(), raw)
            .map_err(|status| {
                log::error!("firmware LoadImage failed: {}", status);
                Error::LaunchFailed(status)
            })?;

        if let Ok(mut record) = self.firmware.loaded_image(handle) {
            if let Some(device) = context.device_handle {
                record.device_handle = device;
            }
            if !context.load_options.is_empty() {
                record.load_options = context.load_options;
            }
            if let Err(err) = self.firmware.set_loaded_image(handle, record) {
                log::warn!("cannot set load options of {:?}: {}", handle, err);
            }
        }

        let outcome = self.firmware.start_image(handle);
        log::info!("firmware-loaded image returned {}", outcome.status);
        Ok(ExitStatus { status: outcome.status, exit_data: outcome.exit_data })
    }
}

impl fmt::Debug for Loader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Load and run `raw` with a one-off loader
pub fn load_and_launch(
    firmware: &dyn Firmware,
    traps: &ExitTraps,
    raw: &[u8],
    context: LaunchContext,
    config: LoaderConfig,
) -> Result<ExitStatus> {
    Loader::with_config(firmware, traps, config).load_and_launch(raw, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::cpu_type;
    use crate::secure::var_name;
    use crate::testimage::{fat_binary, foreign_machine, TestImage};
    use alloc::string::ToString;
    use alloc::vec;
    use netchain_hal::mock::{MockPlatform, MockVerifier, LOADER_HANDLE};
    use netchain_hal::{Handle, Status};
    use LoadState::*;

    #[test]
    fn test_scenario_a_launch_without_relocations() {
        let platform = MockPlatform::new();
        let traps = ExitTraps::new();
        let raw = TestImage::new().entry(0x1010).section(".text", 0x1000, &[0xc3; 0x20]).build();

        let mut loader = Loader::new(&platform, &traps);
        let exit = loader.load_and_launch(&raw, LaunchContext::new(LOADER_HANDLE)).unwrap();
        assert!(exit.is_success());
        assert_eq!(loader.history(), &[Unloaded, HeaderParsed, Mapped, Relocated, Launched, Unloaded]);

        let state = platform.state();
        let (entry, handle) = state.entry_calls[0];
        let base = state.records_at_entry[0].image_base;
        assert_eq!(handle, LOADER_HANDLE);
        assert_eq!(entry, base.add(0x1010));
        assert!(state.allocations.is_empty());
    }

    #[test]
    fn test_scenario_b_foreign_machine_allocates_nothing() {
        let platform = MockPlatform::new();
        let traps = ExitTraps::new();
        let foreign = foreign_machine();
        let raw = TestImage::new().machine(foreign.as_u16()).section(".text", 0x1000, &[0xc3; 4]).build();

        let mut loader = Loader::new(&platform, &traps);
        let err = loader.load_and_launch(&raw, LaunchContext::new(LOADER_HANDLE)).unwrap_err();
        assert_eq!(err, Error::UnsupportedMachine(foreign.as_u16()));
        assert_eq!(loader.state(), Unloaded);
        assert_eq!(platform.state().allocation_count, 0);
        assert!(platform.state().entry_calls.is_empty());
    }

    #[test]
    fn test_truncated_header_allocates_nothing() {
        let platform = MockPlatform::new();
        let traps = ExitTraps::new();
        let mut raw = TestImage::new().section(".text", 0x1000, &[0xc3; 4]).build();
        raw.truncate(0x200);

        let err = Loader::new(&platform, &traps).load(&raw).unwrap_err();
        assert_eq!(err, Error::TruncatedImage);
        assert_eq!(platform.state().allocation_count, 0);
    }

    #[test]
    fn test_scenario_c_fat_binary_loads_selected_range() {
        let platform = MockPlatform::new();
        let traps = ExitTraps::new();
        let arm = TestImage::new()
            .machine(Machine::Arm64.as_u16())
            .entry(0x1004)
            .section(".text", 0x1000, &[0xd6; 8])
            .build();
        let x86 = TestImage::new().machine(Machine::Amd64.as_u16()).build();
        let raw = fat_binary(&[(cpu_type::X86_64, &x86), (cpu_type::ARM64, &arm)]);

        let config = LoaderConfig { machine: Machine::Arm64, ..LoaderConfig::default() };
        let mut loader = Loader::with_config(&platform, &traps, config);
        let (header, image) = loader.load(&raw).unwrap();
        assert_eq!(header.machine, Machine::Arm64);
        assert_eq!(header.entry_rva, 0x1004);
        assert_eq!(&image.bytes()[0x1000..0x1008], &[0xd6; 8]);
        assert_eq!(loader.state(), Relocated);
    }

    #[test]
    fn test_scenario_d_relocated_on_load() {
        let platform = MockPlatform::new();
        let traps = ExitTraps::new();
        let raw = TestImage::new().image_base(0x1_0000).highlow_fixup(0x1000, 0x1_1000).build();

        let (header, image) = Loader::new(&platform, &traps).load(&raw).unwrap();
        let delta = image.base().as_u64().wrapping_sub(header.image_base) as u32;
        let field = u32::from_le_bytes(image.bytes()[0x1000..0x1004].try_into().unwrap());
        assert_eq!(field, 0x1_1000u32.wrapping_add(delta));
    }

    #[test]
    fn test_relocation_failure_releases_pages() {
        let platform = MockPlatform::new();
        let traps = ExitTraps::new();
        // type 9 is not defined for the native machine
        let raw = TestImage::new().fixup(9, 0x1000).build();

        let mut loader = Loader::new(&platform, &traps);
        let err = loader.load(&raw).unwrap_err();
        assert!(err.is_relocation_error());
        assert_eq!(loader.history(), &[Unloaded, HeaderParsed, Mapped, Unloaded]);
        assert_eq!(platform.state().allocation_count, 1);
        assert_eq!(platform.live_allocations(), 0);
    }

    #[test]
    fn test_secure_mode_takes_firmware_path() {
        let platform = MockPlatform::new().with_verifier(MockVerifier::new(true));
        platform.state().variables.insert(var_name::SECURE_BOOT.to_string(), vec![1]);
        let traps = ExitTraps::new();
        let raw = TestImage::new().section(".text", 0x1000, &[0xc3; 4]).build();

        let mut loader = Loader::new(&platform, &traps);
        let context = LaunchContext::new(LOADER_HANDLE).with_command_line("x");
        let exit = loader.load_and_launch(&raw, context).unwrap();
        assert!(exit.is_success());
        assert_eq!(loader.history(), &[Unloaded, ValidatedPassthrough, Unloaded]);

        let state = platform.state();
        assert_eq!(state.allocation_count, 0);
        assert_eq!(state.loaded_sources, vec![raw.clone()]);
        assert_eq!(state.started.len(), 1);
        let started: Handle = state.started[0];
        assert_eq!(state.loaded_images[&started].parent_handle, LOADER_HANDLE);
        assert_eq!(state.loaded_images[&started].load_options, vec![u16::from(b'x'), 0]);
    }

    #[test]
    fn test_forced_validation_rejects_unsigned() {
        let platform = MockPlatform::new().with_verifier(MockVerifier::new(false));
        let traps = ExitTraps::new();
        let config = LoaderConfig { force_secure_validation: true, ..LoaderConfig::default() };
        let raw = TestImage::new().build();

        let err = load_and_launch(&platform, &traps, &raw, LaunchContext::new(LOADER_HANDLE), config).unwrap_err();
        assert_eq!(err, Error::SignatureInvalid);
        assert!(platform.state().loaded_sources.is_empty());
    }

    #[test]
    fn test_validated_load_image_failure() {
        let platform = MockPlatform::new().with_verifier(MockVerifier::new(true));
        platform.state().load_image_error = Some(Status::SECURITY_VIOLATION);
        let traps = ExitTraps::new();
        let config = LoaderConfig { force_secure_validation: true, ..LoaderConfig::default() };

        let mut loader = Loader::with_config(&platform, &traps, config);
        let err = loader.load_and_launch(&TestImage::new().build(), LaunchContext::new(LOADER_HANDLE)).unwrap_err();
        assert_eq!(err, Error::LaunchFailed(Status::SECURITY_VIOLATION));
        assert_eq!(loader.state(), Unloaded);
    }
}
