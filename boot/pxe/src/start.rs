//! # Boot Sequence
//!
//! ```text
//! DHCP server -> /bblefi.cfg -> MAC + arch -> menu servers -> selection
//!             -> BMS commands -> local boot | boot prompt | chainload
//! ```
//!
//! [`BootClient::run`] never fails: every error ends in a local disk boot.

use crate::bms::BmsClient;
use crate::chainload::{ChainloadStrategy, Chainloader, EXIT_TRAPS};
use crate::config::{read_config, BootSettings, MAX_SERVERS};
use crate::dhcp::discover_architecture;
use crate::menu::{load_menu, Selection};
use crate::menufile::{EntryFlags, EntryType};
use crate::retry::RetryPolicy;
use crate::{logger, BootError, Platform, Result};
use alloc::string::{String, ToString};
use netchain_hal::{HalError, Ipv4Addr, MacAddr};
use netchain_peimage::{ExitStatus, ExitTraps};

/// DNS lookups repeated while the network stack is not ready
pub const DNS_RETRIES: u32 = 10;

/// Delay between DNS retries
pub const DNS_RETRY_DELAY_MS: u32 = 1000;

/// How long a signature error stays on screen
pub const SIGNATURE_ERROR_WAIT_MS: u32 = 30_000;

/// What the firmware should do after the boot client returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootAction {
    /// Exit to the next boot option (local disk)
    LocalBoot,
    /// Hand over to the firmware boot prompt
    Prompt,
    /// A chainloaded program ran and returned
    Chainloaded(ExitStatus),
}

/// Identity of this client towards the boot servers
#[derive(Debug, Clone)]
struct ClientIdentity {
    mac: MacAddr,
    uuid: Option<String>,
    arch: u16,
}

/// The PXE boot client
#[derive(Debug)]
pub struct BootClient<'a> {
    platform: Platform<'a>,
    traps: &'a ExitTraps,
    strategy: ChainloadStrategy,
    settings: BootSettings,
}

impl<'a> BootClient<'a> {
    /// Boot client using the global exit traps
    pub fn new(platform: Platform<'a>) -> Self {
        Self::with_traps(platform, &EXIT_TRAPS)
    }

    /// Boot client using its own trap table
    pub fn with_traps(platform: Platform<'a>, traps: &'a ExitTraps) -> Self {
        Self {
            platform,
            traps,
            strategy: ChainloadStrategy::default(),
            settings: BootSettings::default(),
        }
    }

    /// Select how boot programs are started
    pub fn strategy(mut self, strategy: ChainloadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Settings read by the last [`BootClient::start`]
    pub fn settings(&self) -> &BootSettings {
        &self.settings
    }

    /// Run the boot sequence and report errors
    pub fn run(&mut self) -> BootAction {
        match self.start() {
            Ok(action) => action,
            Err(err) => {
                log::error!("network boot failed: {}", err);
                self.platform.print(format_args!("error: {}\n", err));
                if err.is_signature_error() {
                    let _ = self.platform.console.read_key(SIGNATURE_ERROR_WAIT_MS);
                } else {
                    self.platform.debug_delay(10);
                }
                BootAction::LocalBoot
            }
        }
    }

    /// Run the boot sequence
    pub fn start(&mut self) -> Result<BootAction> {
        let network = self.platform.network;
        if !network.pxe_mode().is_netboot() {
            return Err(BootError::NotNetBoot);
        }

        let dhcp_server = match network.dhcp_server() {
            Ok(server) => server,
            Err(err) => {
                self.platform.print(format_args!("cannot get DHCP server address: {}\n", err));
                self.platform.console.sleep_ms(5000);
                return Err(err.into());
            }
        };

        let properties = match read_config(network, dhcp_server) {
            Ok(properties) => properties,
            Err(err) => {
                self.platform.print(format_args!("cannot read configuration: {}\n", err));
                self.platform.console.sleep_ms(5000);
                return Err(err);
            }
        };
        self.settings = BootSettings::from_properties(&properties);
        self.platform.debug = self.settings.is_debug();
        logger::set_debug(self.platform.debug);
        self.platform.debug_print(format_args!("DHCP packet server IP: {}\n", dhcp_server));

        let identity = self.identify()?;
        self.platform.debug_delay(5);

        let (menu_server, selection) = self.select_entry(dhcp_server, &identity)?;
        let boot_server = if self.settings.boot_from_menu_server { menu_server } else { dhcp_server };
        self.process_entry(boot_server, &identity, &selection)
    }

    fn identify(&self) -> Result<ClientIdentity> {
        let network = self.platform.network;

        let mac = network.client_mac()?;
        self.platform.debug_print(format_args!("MAC address of client: {}\n", mac));

        let arch = discover_architecture(network)?;
        self.platform.debug_print(format_args!("Processor architecture type of client: {}\n", arch));

        Ok(ClientIdentity { mac, uuid: network.system_uuid(), arch })
    }

    // =========================================================================
    // Menu servers
    // =========================================================================

    /// Address of a configured server; empty means the DHCP server
    fn resolve_server(&self, name: &str, dhcp_server: Ipv4Addr) -> Result<Ipv4Addr> {
        if name.is_empty() {
            return Ok(dhcp_server);
        }
        if let Some(address) = Ipv4Addr::parse(name) {
            return Ok(address);
        }

        let network = self.platform.network;
        let mut result = network.resolve_host(name);
        let mut retries = DNS_RETRIES;
        while retries > 0 && result == Err(HalError::NotReady) {
            self.platform.console.sleep_ms(DNS_RETRY_DELAY_MS);
            result = network.resolve_host(name);
            retries -= 1;
        }

        result.map_err(|err| {
            log::warn!("server [{}] could not be resolved: {}", name, err);
            BootError::DnsFailure
        })
    }

    /// Ask each server in turn until one offers a choice
    fn select_entry(&self, dhcp_server: Ipv4Addr, identity: &ClientIdentity) -> Result<(Ipv4Addr, Selection)> {
        let policy = RetryPolicy::new(self.settings.menu_retries);

        for (number, name) in self.settings.servers.iter().take(MAX_SERVERS).enumerate() {
            let server = match self.resolve_server(name, dhcp_server) {
                Ok(server) if !server.is_unspecified() => server,
                Ok(server) => {
                    self.platform
                        .debug_print(format_args!("server ip [server number {}]: {} is not valid\n", number, server));
                    continue;
                }
                Err(err) => {
                    self.platform.debug_print(format_args!("{}: {}\n", name, err));
                    continue;
                }
            };
            self.platform.print(format_args!("server ip [server number {}]: {}\n", number, server));

            let client = BmsClient::new(self.platform.network, server, identity.mac, identity.uuid.as_deref());
            match load_menu(&self.platform, &client, identity.arch, policy, &server.to_string()) {
                Ok(menu) => {
                    if let Some(selection) = menu.select(&self.platform) {
                        return Ok((server, selection));
                    }
                }
                Err(err) => self.platform.debug_print(format_args!("menu from {}: {}\n", server, err)),
            }
        }

        self.platform.print(format_args!("No boot server offered a boot menu, booting local disk\n"));
        Err(BootError::NoMenuOffered)
    }

    // =========================================================================
    // Chosen entry
    // =========================================================================

    fn process_entry(&self, boot_server: Ipv4Addr, identity: &ClientIdentity, selection: &Selection) -> Result<BootAction> {
        let entry = &selection.entry;
        let client = BmsClient::new(self.platform.network, boot_server, identity.mac, identity.uuid.as_deref());
        self.platform.print(format_args!("\n\n{}\n\n", entry.text));

        if entry.flags.contains(EntryFlags::UPDATE_BOOT_ENV) && !selection.default_chosen {
            self.platform.print(format_args!("Updating client boot environment...\n"));
            if let Err(err) = client.update_client_boot_env(&entry.boot_env_guid) {
                self.platform.print(format_args!("error: {}\n", err));
            }
        }

        let local = matches!(entry.entry_type, EntryType::SyslinuxLocalHdd | EntryType::BootPrompt);
        if !local && !self.settings.dont_set_path_prefix {
            self.platform
                .print(format_args!("Setting TFTP path prefix to \"{}\"...\n", entry.tftp_path_prefix));
            if let Err(err) = client.set_path_prefix(&entry.boot_env_guid, &entry.tftp_path_prefix) {
                self.platform.print(format_args!("error: {}\n", err));
            }
        } else {
            self.platform.print(format_args!("Skipped setting the TFTP path prefix due to configuration\n"));
        }

        self.platform.debug_delay(5);

        match entry.entry_type {
            EntryType::WinPeChainload => {
                self.platform.print(format_args!("PXE chainloading {}\n", entry.command));
                let exit = Chainloader::with_traps(self.platform, self.traps)
                    .strategy(self.strategy)
                    .always_validate(self.settings.always_secure_boot_chain)
                    .chainload(&entry.command, boot_server)?;
                Ok(BootAction::Chainloaded(exit))
            }
            EntryType::BootPrompt => {
                self.platform.print(format_args!("Executing boot prompt\n"));
                Ok(BootAction::Prompt)
            }
            _ => {
                self.platform.print(format_args!("Executing local boot\n"));
                Ok(BootAction::LocalBoot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bms::{request_filename, Action};
    use crate::config::CONFIG_FILE;
    use crate::dhcp::tests::packet_with;
    use crate::menu::MENU_KEY;
    use crate::menufile::tests::record;
    use alloc::format;
    use alloc::vec;
    use netchain_hal::mock::{MockPlatform, MockVerifier};
    use netchain_hal::{Key, PxeModeFlags, Status};
    use netchain_peimage::secure::var_name;
    use netchain_peimage::testimage::TestImage;

    const DHCP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const BMS: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    fn netbooted() -> MockPlatform {
        let mock = MockPlatform::new();
        mock.state().discover_packet = packet_with(&[93, 2, 0, 7, 255]);
        mock
    }

    fn request(mock: &MockPlatform, action: &Action<'_>) -> String {
        request_filename(mock.state().mac, None, action)
    }

    fn serve_menu(mock: &MockPlatform, server: Ipv4Addr, records: &[String]) {
        let name = request(mock, &Action::Menu { arch: 7 });
        mock.add_file(server, &name, records.concat().as_bytes());
    }

    fn run(mock: &MockPlatform) -> (Result<BootAction>, BootSettings) {
        let traps = ExitTraps::new();
        let mut client = BootClient::with_traps(Platform::new(mock), &traps).strategy(ChainloadStrategy::Core);
        let result = client.start();
        (result, client.settings().clone())
    }

    #[test]
    fn test_not_netbooted() {
        let mock = netbooted();
        mock.state().pxe_mode = PxeModeFlags::empty();
        assert_eq!(run(&mock).0, Err(BootError::NotNetBoot));

        let traps = ExitTraps::new();
        let action = BootClient::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Core).run();
        assert_eq!(action, BootAction::LocalBoot);
    }

    #[test]
    fn test_no_dhcp_server() {
        let mock = netbooted();
        mock.state().dhcp_server = None;
        assert_eq!(run(&mock).0, Err(BootError::Network(HalError::NotFound)));
        assert_eq!(mock.state().sleeps, vec![5000]);
    }

    #[test]
    fn test_no_architecture_option() {
        let mock = netbooted();
        mock.state().discover_packet = packet_with(&[53, 1, 1, 255]);
        assert_eq!(run(&mock).0, Err(BootError::NoArchitectureType));
    }

    #[test]
    fn test_default_local_boot_from_dhcp_server() {
        let mock = netbooted();
        serve_menu(&mock, DHCP, &[record(4, 1, "Local disk", "", "", "")]);

        let (result, settings) = run(&mock);
        assert_eq!(result, Ok(BootAction::LocalBoot));
        assert_eq!(settings.servers, vec![String::new()]);

        let state = mock.state();
        assert!(state.output.contains("server ip [server number 0]: 10.0.0.1"));
        assert!(state.output.contains("Skipped setting the TFTP path prefix"));
        assert!(state.output.contains("Executing local boot"));
        assert!(state.rewrites.is_empty());
    }

    #[test]
    fn test_chainload_from_menu_server() {
        let mock = netbooted();
        mock.add_file(DHCP, CONFIG_FILE, b"server=bms.example\nbootfrommenuserver=1\n");
        {
            let mut state = mock.state();
            state.hosts.insert("bms.example".to_string(), BMS);
            state.dns_not_ready = 2;
        }
        serve_menu(
            &mock,
            BMS,
            &[
                record(2, 0, "", "Lab", "", ""),
                record(8, 1 | 4, "Windows PE", "boot/pe.efi", "guid-7", "/pe"),
            ],
        );
        let prefix = request(&mock, &Action::SetPathPrefix { guid: "guid-7", prefix: "/pe" });
        mock.add_file(BMS, &prefix, b"ok");
        let image = TestImage::new().section(".text", 0x1000, &[0xc3; 16]).build();
        mock.add_file(BMS, "/boot/pe.efi", &image);

        let (result, _) = run(&mock);
        assert!(matches!(result, Ok(BootAction::Chainloaded(ref exit)) if exit.is_success()));

        let state = mock.state();
        assert_eq!(state.dns_queries.len(), 3);
        assert_eq!(&state.sleeps[..2], &[DNS_RETRY_DELAY_MS, DNS_RETRY_DELAY_MS]);
        assert!(state.tftp_reads.contains(&(BMS, prefix.clone())));
        // chosen by default: no boot environment update
        assert!(!state.tftp_reads.iter().any(|(_, name)| name.contains("updateclientbootenv")));
        assert_eq!(state.rewrites, vec![("boot/pe.efi".to_string(), BMS)]);
        assert_eq!(state.entry_calls.len(), 1);
        assert!(state.output.contains("PXE chainloading boot/pe.efi"));
    }

    #[test]
    fn test_user_choice_updates_boot_env() {
        let mock = netbooted();
        mock.push_keys(&[Some(MENU_KEY), Some(Key::Char('2'))]);
        serve_menu(
            &mock,
            DHCP,
            &[
                record(4, 1, "Local disk", "", "", ""),
                record(9, 4, "Prompt", "", "guid-9", ""),
            ],
        );
        let env = request(&mock, &Action::UpdateClientBootEnv { guid: "guid-9" });
        mock.add_file(DHCP, &env, b"OK\n");

        assert_eq!(run(&mock).0, Ok(BootAction::Prompt));
        let state = mock.state();
        assert!(state.tftp_reads.contains(&(DHCP, env.clone())));
        assert!(state.output.contains("Updating client boot environment..."));
        assert!(state.output.contains("Executing boot prompt"));
    }

    #[test]
    fn test_next_server_after_empty_menu() {
        let mock = netbooted();
        mock.add_file(DHCP, CONFIG_FILE, b"server=10.0.0.5\nserver=unknown.host\nserver=10.0.0.1\n");
        serve_menu(&mock, BMS, &[record(3, 0, "nothing for you", "", "", "")]);
        serve_menu(&mock, DHCP, &[record(4, 1, "Local disk", "", "", "")]);

        assert_eq!(run(&mock).0, Ok(BootAction::LocalBoot));
        let state = mock.state();
        assert!(state.output.contains("10.0.0.5 doesn't care about us."));
        assert!(state.output.contains("server ip [server number 2]: 10.0.0.1"));
        assert_eq!(state.dns_queries, vec!["unknown.host".to_string()]);
    }

    #[test]
    fn test_no_menu_offered() {
        let mock = netbooted();
        mock.add_file(DHCP, CONFIG_FILE, b"server=10.0.0.5\nmenuretries=1\n");

        assert_eq!(run(&mock).0, Err(BootError::NoMenuOffered));
        let state = mock.state();
        assert!(state.output.contains("No boot server offered a boot menu"));
        assert_eq!(state.output.matches("Did not get menu").count(), 1);
    }

    #[test]
    fn test_dont_set_path_prefix() {
        let mock = netbooted();
        mock.add_file(DHCP, CONFIG_FILE, b"dontsetpathprefix=1\n");
        serve_menu(&mock, DHCP, &[record(8, 1, "PE", "/missing.efi", "g", "/p")]);

        let (result, settings) = run(&mock);
        assert!(settings.dont_set_path_prefix);
        assert_eq!(result, Err(BootError::Network(HalError::Firmware(Status::TFTP_ERROR))));
        let state = mock.state();
        assert!(!state.tftp_reads.iter().any(|(_, name)| name.contains("setpathprefix")));
        assert!(state.output.contains("Skipped setting"));
    }

    #[test]
    fn test_run_waits_on_signature_error() {
        let mock = netbooted().with_verifier(MockVerifier::new(false));
        {
            let mut state = mock.state();
            state.variables.insert(var_name::SECURE_BOOT.to_string(), vec![1]);
            state.variables.insert(var_name::SETUP_MODE.to_string(), vec![0]);
        }
        mock.add_file(DHCP, CONFIG_FILE, b"dontsetpathprefix=1\n");
        serve_menu(&mock, DHCP, &[record(8, 1, "PE", "/pe.efi", "", "")]);
        let image = TestImage::new().section(".text", 0x1000, &[0xc3; 16]).build();
        mock.add_file(DHCP, "/pe.efi", &image);

        let traps = ExitTraps::new();
        let action = BootClient::with_traps(Platform::new(&mock), &traps).strategy(ChainloadStrategy::Core).run();
        assert_eq!(action, BootAction::LocalBoot);

        let state = mock.state();
        assert_eq!(state.key_timeouts.last(), Some(&SIGNATURE_ERROR_WAIT_MS));
        assert!(state.output.contains(&format!("error: {}", BootError::Image(netchain_peimage::Error::SignatureInvalid))));
    }

    #[test]
    fn test_debug_setting() {
        let mock = netbooted();
        mock.add_file(DHCP, CONFIG_FILE, b"debug=1\n");
        serve_menu(&mock, DHCP, &[record(4, 1, "Local disk", "", "", "")]);

        let (result, settings) = run(&mock);
        assert_eq!(result, Ok(BootAction::LocalBoot));
        assert!(settings.is_debug());
        let state = mock.state();
        assert!(state.output.contains("MAC address of client: 00:1a:2b:3c:4d:5e"));
        assert!(state.output.contains("Processor architecture type of client: 7"));
        assert!(state.sleeps.contains(&5000));
    }
}
