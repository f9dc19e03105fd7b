//! # netchain PXE Boot Orchestrator
//!
//! Runs after the firmware has network booted the chainloader:
//!
//! 1. reads `/bblefi.cfg` from the DHCP server
//! 2. asks each configured boot management server (BMS) for a boot menu
//! 3. shows the menu (or a short prompt) and takes the chosen action
//! 4. chainloads the chosen network boot program through the image loader
//!
//! Anything that goes wrong ends with a local disk boot.
//!
//! ## Modules
//!
//! - [`config`]: `name=value` configuration file
//! - [`dhcp`]: DHCP option parsing
//! - [`bms`]: request filenames and server commands
//! - [`menufile`]: menu file records
//! - [`retry`]: randomized retry of the menu request
//! - [`menu`]: menu model, prompt and interactive menu
//! - [`chainload`]: fetch and run the boot program
//! - [`start`]: the boot sequence
//! - [`logger`]: `log` records on the console

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod bms;
pub mod chainload;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod logger;
pub mod menu;
pub mod menufile;
pub mod retry;
pub mod start;
pub mod tftp;

pub use chainload::{ChainloadStrategy, Chainloader};
pub use config::{BootSettings, PropertyList};
pub use error::{BootError, Result};
pub use start::{BootAction, BootClient};

use core::fmt::{self, Write};
use netchain_hal::console::ConsoleWriter;
use netchain_hal::{Console, Firmware, Network};

/// Name shown in the screen header
pub const APP_NAME: &str = "netchain UEFI PXE Boot Loader";

/// Version shown in the screen header
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// PLATFORM
// =============================================================================

/// The platform capabilities the orchestrator works with
#[derive(Clone, Copy)]
pub struct Platform<'a> {
    /// Boot services
    pub firmware: &'a dyn Firmware,
    /// PXE base code and DNS
    pub network: &'a dyn Network,
    /// Text console and timers
    pub console: &'a dyn Console,
    /// `debug` configuration value
    pub debug: bool,
}

impl<'a> Platform<'a> {
    /// Use one object for every capability
    pub fn new<P: Firmware + Network + Console>(platform: &'a P) -> Self {
        Self {
            firmware: platform,
            network: platform,
            console: platform,
            debug: false,
        }
    }

    /// Print formatted text on the console
    pub fn print(&self, args: fmt::Arguments<'_>) {
        let _ = ConsoleWriter(self.console).write_fmt(args);
    }

    /// Print only in debug mode
    pub fn debug_print(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            self.print(args);
        }
    }

    /// Pause so the operator can read diagnostics, in debug mode only
    pub fn debug_delay(&self, seconds: u32) {
        if self.debug {
            self.print(format_args!("{} seconds debug delay...\n", seconds));
            self.console.sleep_ms(seconds * 1000);
        }
    }
}

impl fmt::Debug for Platform<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").field("debug", &self.debug).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netchain_hal::mock::MockPlatform;

    #[test]
    fn test_debug_delay_only_in_debug_mode() {
        let mock = MockPlatform::new();
        let mut platform = Platform::new(&mock);

        platform.debug_delay(5);
        assert!(mock.state().sleeps.is_empty());

        platform.debug = true;
        platform.debug_delay(5);
        let state = mock.state();
        assert_eq!(state.sleeps, alloc::vec![5000]);
        assert!(state.output.contains("5 seconds debug delay"));
    }
}
