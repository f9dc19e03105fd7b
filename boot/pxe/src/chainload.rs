//! # Chainload
//!
//! Fetches the network boot program named by a menu entry and runs it in
//! place of this loader. The DHCP ACK cached by the PXE base code is
//! rewritten first so the started program sees the boot server and file
//! it was actually loaded from.

use crate::bms::truncate_to;
use crate::{tftp, BootError, Platform, Result};
use alloc::format;
use alloc::string::String;
use netchain_hal::{Handle, Ipv4Addr, Status};
use netchain_peimage::{select_arch_image, ExitStatus, ExitTraps, LaunchContext, Loader, LoaderConfig};

/// Maximum length of a boot file path
pub const MAX_BOOT_FILE_LENGTH: usize = 128;

/// Exit traps of images launched by this loader
///
/// The platform layer routes boot-services `Exit` and `UnloadImage` calls
/// for the loader's own handle here.
pub static EXIT_TRAPS: ExitTraps = ExitTraps::new();

/// Absolute TFTP path for a boot file name from a menu entry
///
/// `/x` stays, `(pxe)/x` becomes `/x`, anything else gets a leading `/`.
pub fn normalize_boot_file(filename: &str) -> String {
    let mut path = if filename.starts_with('/') {
        String::from(filename)
    } else if let Some(rest) = filename.strip_prefix("(pxe)") {
        String::from(rest)
    } else {
        format!("/{}", filename)
    };
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    truncate_to(&mut path, MAX_BOOT_FILE_LENGTH);
    path
}

/// How a fetched image is started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainloadStrategy {
    /// Map, relocate and call the image with the built-in loader
    Core,
    /// Hand the image to firmware `LoadImage`/`StartImage`
    Firmware,
}

impl Default for ChainloadStrategy {
    fn default() -> Self {
        if cfg!(feature = "firmware-loader") {
            Self::Firmware
        } else {
            Self::Core
        }
    }
}

/// Runs boot programs fetched over TFTP
#[derive(Debug, Clone, Copy)]
pub struct Chainloader<'a> {
    platform: Platform<'a>,
    traps: &'a ExitTraps,
    strategy: ChainloadStrategy,
    always_validate: bool,
}

impl<'a> Chainloader<'a> {
    /// Chainloader using the global [`EXIT_TRAPS`]
    pub fn new(platform: Platform<'a>) -> Self {
        Self::with_traps(platform, &EXIT_TRAPS)
    }

    /// Chainloader using its own trap table
    pub fn with_traps(platform: Platform<'a>, traps: &'a ExitTraps) -> Self {
        Self {
            platform,
            traps,
            strategy: ChainloadStrategy::default(),
            always_validate: false,
        }
    }

    /// Select the start strategy
    pub fn strategy(mut self, strategy: ChainloadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Validate signatures even when Secure Boot is off
    pub fn always_validate(mut self, always: bool) -> Self {
        self.always_validate = always;
        self
    }

    /// Fetch `filename` from `server` and run it
    ///
    /// Returns once the program exits successfully; any other exit status
    /// is [`BootError::StartImage`].
    pub fn chainload(&self, filename: &str, server: Ipv4Addr) -> Result<ExitStatus> {
        let network = self.platform.network;
        if !network.pxe_mode().is_netboot() {
            log::error!("only PXE boot is supported");
            return Err(BootError::NotNetBoot);
        }
        if server.is_unspecified() {
            return Err(BootError::InvalidArgument);
        }

        network.rewrite_boot_parameters(filename, server)?;
        self.platform.debug_print(format_args!(
            "BootFileName changed to: {}\nBootServer-IP changed to: {}\n",
            filename, server
        ));
        self.platform.debug_delay(5);

        let path = normalize_boot_file(filename);
        let result = self.fetch_and_start(&path, server);
        if let Err(err) = &result {
            self.platform.print(format_args!("\nWindows PE network boot [{}] failed: {}\n", path, err));
            self.platform.debug_delay(5);
        }
        result
    }

    fn fetch_and_start(&self, path: &str, server: Ipv4Addr) -> Result<ExitStatus> {
        let raw = tftp::fetch(self.platform.network, server, path)?;
        let firmware = self.platform.firmware;

        let handle = firmware.image_handle();
        let record = firmware.loaded_image(handle).map_err(|err| BootError::LoadImage(err.status()))?;
        let file_path = firmware
            .device_path(record.device_handle)
            .and_then(|device| device.with_file(path))
            .or(record.file_path);
        let context = LaunchContext {
            handle,
            device_handle: Some(record.device_handle),
            file_path,
            ..LaunchContext::default()
        };

        let config = LoaderConfig { force_secure_validation: self.always_validate, ..LoaderConfig::default() };
        let mut loader = Loader::with_config(firmware, self.traps, config);

        let exit = match self.strategy {
            ChainloadStrategy::Core => loader.load_and_launch(&raw, context)?,
            ChainloadStrategy::Firmware if loader.must_validate() => loader.launch_validated(&raw, context)?,
            ChainloadStrategy::Firmware => self.firmware_start(&raw, context)?,
        };

        if exit.is_success() {
            Ok(exit)
        } else {
            log::error!(
                "{} exited with {}: {}",
                path,
                exit.status,
                exit.exit_data.as_deref().unwrap_or("unknown error")
            );
            Err(BootError::StartImage(exit.status))
        }
    }

    /// Firmware `LoadImage` of the native sub-image, then `StartImage`
    fn firmware_start(&self, raw: &[u8], context: LaunchContext) -> Result<ExitStatus> {
        let firmware = self.platform.firmware;
        let raw = select_arch_image(raw)?.apply(raw);

        let image = firmware
            .load_image(context.handle, context.file_path.as_ref(), raw)
            .map_err(|status| {
                if status == Status::OUT_OF_RESOURCES {
                    log::error!("out of resources");
                } else {
                    log::error!("cannot load image: {}", status);
                }
                BootError::LoadImage(status)
            })?;

        // LoadImage from memory leaves the device handle unset
        let mut record = firmware.loaded_image(image).map_err(|err| BootError::LoadImage(err.status()))?;
        if let Some(device) = context.device_handle {
            record.device_handle = device;
        }
        if !context.load_options.is_empty() {
            record.load_options = context.load_options;
        }
        self.platform.debug_print(format_args!(
            "image begin: {:#x}\nimage size: {:#x}\n",
            record.image_base, record.image_size
        ));
        firmware
            .set_loaded_image(image, record)
            .map_err(|err| BootError::LoadImage(err.status()))?;

        let outcome = firmware.start_image(image);
        self.unload(image);
        Ok(ExitStatus { status: outcome.status, exit_data: outcome.exit_data })
    }

    fn unload(&self, image: Handle) {
        let status = self.platform.firmware.unload_image(image);
        if status.is_error() {
            log::debug!("UnloadImage({:?}): {}", image, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use netchain_hal::mock::{MockPlatform, MockVerifier, BOOT_DEVICE_HANDLE, LOADER_HANDLE};
    use netchain_hal::{HalError, PxeModeFlags, StartOutcome};
    use netchain_peimage::secure::var_name;
    use netchain_peimage::testimage::TestImage;
    use netchain_peimage::Error as ImageError;

    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn platform_with_image(name: &str) -> MockPlatform {
        let mock = MockPlatform::new();
        let image = TestImage::new().section(".text", 0x1000, &[0xc3; 16]).build();
        mock.add_file(SERVER, name, &image);
        mock
    }

    fn enable_secure_boot(mock: &MockPlatform) {
        let mut state = mock.state();
        state.variables.insert(var_name::SECURE_BOOT.to_string(), alloc::vec![1]);
        state.variables.insert(var_name::SETUP_MODE.to_string(), alloc::vec![0]);
    }

    #[test]
    fn test_normalize_boot_file() {
        assert_eq!(normalize_boot_file("/boot/x.efi"), "/boot/x.efi");
        assert_eq!(normalize_boot_file("(pxe)/boot/x.efi"), "/boot/x.efi");
        assert_eq!(normalize_boot_file("boot\\x64\\wdsmgfw.efi"), "/boot\\x64\\wdsmgfw.efi");
        assert_eq!(normalize_boot_file("(pxe)x.efi"), "/x.efi");
        assert_eq!(normalize_boot_file(&"a".repeat(300)).len(), MAX_BOOT_FILE_LENGTH);
    }

    #[test]
    fn test_core_chainload() {
        let mock = platform_with_image("/boot/pe.efi");
        let traps = ExitTraps::new();
        let chainloader = Chainloader::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Core);

        let exit = chainloader.chainload("boot/pe.efi", SERVER).unwrap();
        assert!(exit.is_success());

        let state = mock.state();
        assert_eq!(state.rewrites, alloc::vec![("boot/pe.efi".to_string(), SERVER)]);
        assert_eq!(state.tftp_reads, alloc::vec![(SERVER, "/boot/pe.efi".to_string())]);
        assert_eq!(state.entry_calls.len(), 1);
        assert_eq!(state.entry_calls[0].1, LOADER_HANDLE);
        assert!(state.allocations.is_empty());
        assert!(state.started.is_empty());

        // the image saw its own file path; the loader's record is restored afterwards
        let seen = &state.records_at_entry[0];
        let expected = state.device_paths[&BOOT_DEVICE_HANDLE].with_file("/boot/pe.efi");
        assert_eq!(seen.file_path, expected);
        assert_eq!(state.loaded_images[&LOADER_HANDLE].image_base.as_u64(), 0x10_0000);
    }

    #[test]
    fn test_core_chainload_exit_error() {
        let mock = platform_with_image("/pe.efi");
        mock.state().entry_status = Status::ABORTED;
        let traps = ExitTraps::new();
        let chainloader = Chainloader::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Core);

        assert_eq!(chainloader.chainload("/pe.efi", SERVER), Err(BootError::StartImage(Status::ABORTED)));
        assert!(mock.state().output.contains("Windows PE network boot [/pe.efi] failed"));
    }

    #[test]
    fn test_secure_boot_takes_firmware_path() {
        let mock = platform_with_image("/pe.efi").with_verifier(MockVerifier::new(true));
        enable_secure_boot(&mock);
        let traps = ExitTraps::new();
        let chainloader = Chainloader::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Core);

        assert!(chainloader.chainload("/pe.efi", SERVER).is_ok());
        let state = mock.state();
        assert!(state.entry_calls.is_empty());
        assert_eq!(state.started.len(), 1);
        assert_eq!(state.loaded_sources.len(), 1);
    }

    #[test]
    fn test_always_validate_rejects_bad_signature() {
        let mock = platform_with_image("/pe.efi").with_verifier(MockVerifier::new(false));
        let traps = ExitTraps::new();
        let chainloader = Chainloader::with_traps(Platform::new(&mock), &traps)
            .strategy(ChainloadStrategy::Core)
            .always_validate(true);

        let err = chainloader.chainload("/pe.efi", SERVER).unwrap_err();
        assert_eq!(err, BootError::Image(ImageError::SignatureInvalid));
        assert!(err.is_signature_error());
        assert!(mock.state().loaded_sources.is_empty());
    }

    #[test]
    fn test_firmware_strategy() {
        let mock = platform_with_image("/pe.efi");
        let traps = ExitTraps::new();
        let chainloader =
            Chainloader::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Firmware);

        assert!(chainloader.chainload("/pe.efi", SERVER).is_ok());
        let state = mock.state();
        assert_eq!(state.started.len(), 1);
        assert_eq!(state.unloaded, state.started);
        assert!(state.entry_calls.is_empty());
        assert_eq!(
            state.load_paths[0],
            state.device_paths[&BOOT_DEVICE_HANDLE].with_file("/pe.efi")
        );
    }

    #[test]
    fn test_firmware_strategy_errors() {
        let mock = platform_with_image("/pe.efi");
        mock.state().load_image_error = Some(Status::OUT_OF_RESOURCES);
        let traps = ExitTraps::new();
        let chainloader =
            Chainloader::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Firmware);
        assert_eq!(
            chainloader.chainload("/pe.efi", SERVER),
            Err(BootError::LoadImage(Status::OUT_OF_RESOURCES))
        );

        mock.state().load_image_error = None;
        mock.state().start_outcome = Some(StartOutcome {
            status: Status::LOAD_ERROR,
            exit_data: Some("boot configuration missing".to_string()),
        });
        assert_eq!(
            chainloader.chainload("/pe.efi", SERVER),
            Err(BootError::StartImage(Status::LOAD_ERROR))
        );
    }

    #[test]
    fn test_requires_netboot() {
        let mock = platform_with_image("/pe.efi");
        mock.state().pxe_mode = PxeModeFlags::STARTED;
        let traps = ExitTraps::new();
        let chainloader = Chainloader::with_traps(Platform::new(&mock), &traps);

        assert_eq!(chainloader.chainload("/pe.efi", SERVER), Err(BootError::NotNetBoot));
        assert!(mock.state().rewrites.is_empty());
    }

    #[test]
    fn test_missing_boot_file() {
        let mock = MockPlatform::new();
        let traps = ExitTraps::new();
        let chainloader = Chainloader::with_traps(Platform::new(&mock), &traps);

        assert_eq!(
            chainloader.chainload("/missing.efi", SERVER),
            Err(BootError::Network(HalError::Firmware(Status::TFTP_ERROR)))
        );
        assert_eq!(
            chainloader.chainload("/x.efi", Ipv4Addr::UNSPECIFIED),
            Err(BootError::InvalidArgument)
        );
    }
}
