//! # Boot Management Server Requests
//!
//! The boot management server (BMS) has no protocol of its own: each
//! request is a TFTP read of a synthesized file name that encodes the
//! client and the action,
//!
//! ```text
//! /bbl/{mac}/{uuid}/{action}
//! ```
//!
//! The server answers with the menu file for `menu#{arch}`, and with the
//! body `ok` for commands it accepted.

use crate::{tftp, BootError, Result};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use netchain_hal::{Ipv4Addr, MacAddr, Network};

/// Maximum length of a request file name
pub const MAX_FILENAME_LENGTH: usize = 128;

/// UUID sent when the system has none
pub const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Server action encoded in the request file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// Fetch the boot menu for a client architecture
    Menu {
        /// DHCP option 93 architecture type
        arch: u16,
    },
    /// Tell the server the client is about to start a boot environment
    UpdateClientBootEnv {
        /// Boot environment GUID from the menu entry
        guid: &'a str,
    },
    /// Set the TFTP path prefix the server uses for this client
    SetPathPrefix {
        /// Boot environment GUID from the menu entry
        guid: &'a str,
        /// New prefix
        prefix: &'a str,
    },
}

impl fmt::Display for Action<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Menu { arch } => write!(f, "menu#{}", arch),
            Self::UpdateClientBootEnv { guid } => write!(f, "updateclientbootenv#{}", guid),
            Self::SetPathPrefix { guid, prefix } => write!(f, "setpathprefix#{}#{}", guid, prefix),
        }
    }
}

/// Cut `text` to at most `max` bytes without splitting a character
pub(crate) fn truncate_to(text: &mut String, max: usize) {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
}

/// File name of a request
pub fn request_filename(mac: MacAddr, uuid: Option<&str>, action: &Action<'_>) -> String {
    let mut filename = format!("/bbl/{:x}/{}/{}", mac, uuid.unwrap_or(NIL_UUID), action);
    truncate_to(&mut filename, MAX_FILENAME_LENGTH);
    filename
}

/// Does a command response mean success
///
/// `ok` in any case; trailing NULs and whitespace are ignored.
pub fn is_ok_response(body: &[u8]) -> bool {
    let end = body
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |last| last + 1);
    body[..end].eq_ignore_ascii_case(b"ok")
}

// =============================================================================
// CLIENT
// =============================================================================

/// Requests to one boot management server on behalf of this client
#[derive(Clone, Copy)]
pub struct BmsClient<'a> {
    network: &'a dyn Network,
    server: Ipv4Addr,
    mac: MacAddr,
    uuid: Option<&'a str>,
}

impl<'a> BmsClient<'a> {
    /// Client for `server`
    pub fn new(network: &'a dyn Network, server: Ipv4Addr, mac: MacAddr, uuid: Option<&'a str>) -> Self {
        Self { network, server, mac, uuid }
    }

    /// Server address
    pub fn server(&self) -> Ipv4Addr {
        self.server
    }

    /// Client hardware address
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Fetch the response file for `action`
    pub fn fetch(&self, action: &Action<'_>) -> Result<Vec<u8>> {
        let filename = request_filename(self.mac, self.uuid, action);
        log::debug!("file request: {}", filename);
        tftp::fetch(self.network, self.server, &filename)
    }

    /// Send a command; the server must answer `ok`
    pub fn command(&self, action: &Action<'_>) -> Result<()> {
        let body = self.fetch(action)?;
        if is_ok_response(&body) {
            Ok(())
        } else {
            log::warn!(
                "{} rejected {}: {}",
                self.server,
                action,
                String::from_utf8_lossy(&body).trim_end_matches('\0').trim_end()
            );
            Err(BootError::ServerRejected)
        }
    }

    /// Raw menu file for a client architecture
    pub fn load_menu(&self, arch: u16) -> Result<Vec<u8>> {
        self.fetch(&Action::Menu { arch })
    }

    /// Report the boot environment about to start
    pub fn update_client_boot_env(&self, guid: &str) -> Result<()> {
        self.command(&Action::UpdateClientBootEnv { guid })
    }

    /// Set the TFTP path prefix for this client
    pub fn set_path_prefix(&self, guid: &str, prefix: &str) -> Result<()> {
        self.command(&Action::SetPathPrefix { guid, prefix })
    }
}

impl fmt::Debug for BmsClient<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmsClient")
            .field("server", &self.server)
            .field("mac", &self.mac)
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use netchain_hal::mock::MockPlatform;
    use netchain_hal::{HalError, Status};

    const MAC: MacAddr = MacAddr::new(0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e);
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    #[test]
    fn test_action_names() {
        assert_eq!(Action::Menu { arch: 7 }.to_string(), "menu#7");
        assert_eq!(
            Action::UpdateClientBootEnv { guid: "g-1" }.to_string(),
            "updateclientbootenv#g-1"
        );
        assert_eq!(
            Action::SetPathPrefix { guid: "g-1", prefix: "/win" }.to_string(),
            "setpathprefix#g-1#/win"
        );
    }

    #[test]
    fn test_request_filename() {
        assert_eq!(
            request_filename(MAC, None, &Action::Menu { arch: 7 }),
            "/bbl/001a2b3c4d5e/00000000-0000-0000-0000-000000000000/menu#7"
        );
        assert_eq!(
            request_filename(MAC, Some("4c4c4544-0042"), &Action::Menu { arch: 11 }),
            "/bbl/001a2b3c4d5e/4c4c4544-0042/menu#11"
        );
    }

    #[test]
    fn test_request_filename_truncated() {
        let prefix = "p".repeat(200);
        let filename = request_filename(MAC, None, &Action::SetPathPrefix { guid: "g", prefix: &prefix });
        assert_eq!(filename.len(), MAX_FILENAME_LENGTH);
        assert!(filename.starts_with("/bbl/001a2b3c4d5e/"));
    }

    #[test]
    fn test_ok_response() {
        assert!(is_ok_response(b"ok"));
        assert!(is_ok_response(b"OK\r\n"));
        assert!(is_ok_response(b"Ok\0\0"));
        assert!(!is_ok_response(b"okay"));
        assert!(!is_ok_response(b" ok"));
        assert!(!is_ok_response(b""));
        assert!(!is_ok_response(b"error: unknown client"));
    }

    #[test]
    fn test_commands() {
        let platform = MockPlatform::new();
        let client = BmsClient::new(&platform, SERVER, MAC, None);
        let env = request_filename(MAC, None, &Action::UpdateClientBootEnv { guid: "g" });
        let prefix = request_filename(MAC, None, &Action::SetPathPrefix { guid: "g", prefix: "/x" });
        platform.add_file(SERVER, &env, b"ok");
        platform.add_file(SERVER, &prefix, b"denied");

        assert_eq!(client.update_client_boot_env("g"), Ok(()));
        assert_eq!(client.set_path_prefix("g", "/x"), Err(BootError::ServerRejected));
        assert_eq!(
            client.update_client_boot_env("other"),
            Err(BootError::Network(HalError::Firmware(Status::TFTP_ERROR)))
        );
    }

    #[test]
    fn test_load_menu() {
        let platform = MockPlatform::new();
        platform.state().uuid = Some("u".to_string());
        let client = BmsClient::new(&platform, SERVER, MAC, Some("u"));
        platform.add_file(SERVER, "/bbl/001a2b3c4d5e/u/menu#7", b"menu data");

        assert_eq!(client.load_menu(7).unwrap(), b"menu data");
        assert!(client.load_menu(6).is_err());
    }
}
