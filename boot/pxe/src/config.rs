//! # Configuration File
//!
//! `/bblefi.cfg` is fetched from the DHCP server. It is a list of
//! `name=value` lines; `#` starts a comment line. Names are compared
//! without regard to case and the first occurrence of a name wins.
//!
//! ```text
//! # boot management servers, tried in order
//! server=bms1.example.com
//! server=10.0.0.20
//! menuretries=3
//! debug=1
//! ```
//!
//! A missing file is not an error: every setting keeps its default and
//! the DHCP server is the only boot server.

use crate::{tftp, BootError, Result};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use netchain_hal::{Ipv4Addr, Network};

/// Name of the configuration file on the DHCP server
pub const CONFIG_FILE: &str = "/bblefi.cfg";

/// Maximum number of `server=` entries
pub const MAX_SERVERS: usize = 8;

/// Maximum number of properties kept
pub const MAX_PROPERTIES: usize = 32;

/// Maximum length of a property name
pub const MAX_NAME_LENGTH: usize = 20;

/// Maximum length of a property value
pub const MAX_VALUE_LENGTH: usize = 512;

/// Recognised property names
pub mod key {
    /// Debug output level; non-zero enables diagnostics and debug delays
    pub const DEBUG: &str = "debug";
    /// Number of retries of the menu request
    pub const MENU_RETRIES: &str = "menuretries";
    /// Load boot files from the menu server instead of the DHCP server
    pub const BOOT_FROM_MENU_SERVER: &str = "bootfrommenuserver";
    /// Do not send the TFTP path prefix request
    pub const DONT_SET_PATH_PREFIX: &str = "dontsetpathprefix";
    /// Always validate chainloaded images
    pub const ALWAYS_SECURE_BOOT_CHAIN: &str = "alwayssecbootchain";
    /// Boot management server (name or address)
    pub const SERVER: &str = "server";
}

// =============================================================================
// LINE PARSER
// =============================================================================

/// Why a configuration line was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// No `=` on the line
    MissingSeparator,
    /// Name longer than [`MAX_NAME_LENGTH`]
    NameTooLong,
    /// Value longer than [`MAX_VALUE_LENGTH`]
    ValueTooLong,
}

/// Split one line into name and value
///
/// Comment and blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> core::result::Result<Option<(&str, &str)>, LineError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (name, value) = line.split_once('=').ok_or(LineError::MissingSeparator)?;
    let name = name.trim();
    if name.len() > MAX_NAME_LENGTH {
        return Err(LineError::NameTooLong);
    }
    let value = value.trim();
    if value.len() > MAX_VALUE_LENGTH {
        return Err(LineError::ValueTooLong);
    }
    Ok(Some((name, value)))
}

/// Leading decimal digits of `text` as a number; 0 when there are none
pub(crate) fn parse_decimal(text: &str) -> u32 {
    text.trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, digit| acc.saturating_mul(10).saturating_add(u32::from(digit - b'0')))
}

// =============================================================================
// PROPERTY LIST
// =============================================================================

/// One `name=value` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Name as written
    pub name: String,
    /// Value
    pub value: String,
}

/// Parsed configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
    properties: Vec<Property>,
    servers: Vec<String>,
}

impl PropertyList {
    /// Parse configuration text
    ///
    /// Bad lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut list = Self::default();

        for (number, line) in text.lines().enumerate() {
            let (name, value) = match parse_line(line) {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("{} line {}: {:?}", CONFIG_FILE, number + 1, err);
                    continue;
                }
            };
            if name.is_empty() || value.is_empty() {
                continue;
            }

            if name.eq_ignore_ascii_case(key::SERVER) && list.servers.len() < MAX_SERVERS {
                list.servers.push(value.to_string());
            }
            if list.properties.len() < MAX_PROPERTIES {
                list.properties.push(Property { name: name.to_string(), value: value.to_string() });
            }
        }

        list
    }

    /// Value of the first property called `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|property| property.name.eq_ignore_ascii_case(name))
            .map(|property| property.value.as_str())
    }

    /// Is `name` set to exactly `1`
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name) == Some("1")
    }

    /// All properties in file order
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// `server=` values in file order
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// No properties at all
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Fetch and parse the configuration file
pub fn read_config(network: &dyn Network, server: Ipv4Addr) -> Result<PropertyList> {
    let size = match network.tftp_file_size(server, CONFIG_FILE) {
        Ok(size) => size,
        Err(err) => {
            log::debug!("no {} on {}: {}", CONFIG_FILE, server, err);
            return Ok(PropertyList::default());
        }
    };

    let bytes = tftp::read(network, server, CONFIG_FILE, size).map_err(|_| BootError::ConfigRead)?;
    let properties = PropertyList::parse(&String::from_utf8_lossy(&bytes));

    for property in properties.properties() {
        log::debug!("  {}={}", property.name, property.value);
    }
    Ok(properties)
}

// =============================================================================
// BOOT SETTINGS
// =============================================================================

/// Typed view of the configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSettings {
    /// Debug level; non-zero enables diagnostics
    pub debug: u32,
    /// Retries of the menu request
    pub menu_retries: u32,
    /// Boot files come from the menu server instead of the DHCP server
    pub boot_from_menu_server: bool,
    /// Skip the TFTP path prefix request
    pub dont_set_path_prefix: bool,
    /// Validate chainloaded images even without Secure Boot
    pub always_secure_boot_chain: bool,
    /// Boot management servers; an empty entry means the DHCP server
    pub servers: Vec<String>,
}

impl BootSettings {
    /// Settings from a parsed configuration file
    pub fn from_properties(properties: &PropertyList) -> Self {
        let mut servers = properties.servers().to_vec();
        if servers.is_empty() {
            servers.push(String::new());
        }

        Self {
            debug: properties.get(key::DEBUG).map_or(0, parse_decimal),
            menu_retries: properties.get(key::MENU_RETRIES).map_or(0, parse_decimal),
            boot_from_menu_server: properties.is_enabled(key::BOOT_FROM_MENU_SERVER),
            dont_set_path_prefix: properties.is_enabled(key::DONT_SET_PATH_PREFIX),
            always_secure_boot_chain: properties.is_enabled(key::ALWAYS_SECURE_BOOT_CHAIN),
            servers,
        }
    }

    /// Debug output enabled
    pub fn is_debug(&self) -> bool {
        self.debug != 0
    }
}

impl Default for BootSettings {
    fn default() -> Self {
        Self::from_properties(&PropertyList::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec;
    use netchain_hal::mock::MockPlatform;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  name = value  "), Ok(Some(("name", "value"))));
        assert_eq!(parse_line("# comment"), Ok(None));
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("novalue"), Err(LineError::MissingSeparator));
        assert_eq!(parse_line("a=b=c"), Ok(Some(("a", "b=c"))));
    }

    #[test]
    fn test_parse_line_limits() {
        let name = "n".repeat(MAX_NAME_LENGTH);
        assert!(parse_line(&format!("{}=v", name)).is_ok());
        assert_eq!(parse_line(&format!("{}x=v", name)), Err(LineError::NameTooLong));

        let value = "v".repeat(MAX_VALUE_LENGTH);
        assert!(parse_line(&format!("n={}", value)).is_ok());
        assert_eq!(parse_line(&format!("n={}x", value)), Err(LineError::ValueTooLong));
    }

    #[test]
    fn test_property_lookup() {
        let list = PropertyList::parse("Debug=2\nmenuRetries = 3\ndebug=7\n=x\ny=\nbroken\n");
        assert_eq!(list.len(), 3);
        assert_eq!(list.get("DEBUG"), Some("2"));
        assert_eq!(list.get("menuretries"), Some("3"));
        assert_eq!(list.get("y"), None);
        assert_eq!(list.get("missing"), None);
    }

    #[test]
    fn test_server_collection() {
        let text: String = (0..10).map(|i| format!("SERVER=s{}\n", i)).collect();
        let list = PropertyList::parse(&text);
        assert_eq!(list.servers().len(), MAX_SERVERS);
        assert_eq!(list.servers()[0], "s0");
        assert_eq!(list.len(), 10);
    }

    #[test]
    fn test_property_limit() {
        let text: String = (0..40).map(|i| format!("p{}=v\n", i)).collect();
        assert_eq!(PropertyList::parse(&text).len(), MAX_PROPERTIES);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("12"), 12);
        assert_eq!(parse_decimal("3x"), 3);
        assert_eq!(parse_decimal("x3"), 0);
        assert_eq!(parse_decimal(""), 0);
        assert_eq!(parse_decimal("99999999999"), u32::MAX);
    }

    #[test]
    fn test_boot_settings() {
        let list = PropertyList::parse(
            "debug=1\nmenuretries=4\nbootfrommenuserver=1\ndontsetpathprefix=yes\nalwayssecbootchain=1\nserver=bms\n",
        );
        let settings = BootSettings::from_properties(&list);
        assert!(settings.is_debug());
        assert_eq!(settings.menu_retries, 4);
        assert!(settings.boot_from_menu_server);
        assert!(!settings.dont_set_path_prefix);
        assert!(settings.always_secure_boot_chain);
        assert_eq!(settings.servers, vec!["bms".to_string()]);
    }

    #[test]
    fn test_default_settings_use_dhcp_server() {
        let settings = BootSettings::default();
        assert!(!settings.is_debug());
        assert_eq!(settings.servers, vec![String::new()]);
    }

    #[test]
    fn test_read_config() {
        let platform = MockPlatform::new();
        let server = Ipv4Addr::new(10, 0, 0, 1);

        let list = read_config(&platform, server).unwrap();
        assert!(list.is_empty());

        platform.add_file(server, CONFIG_FILE, b"server=10.0.0.9\r\nmenuretries=2\r\n");
        let list = read_config(&platform, server).unwrap();
        assert_eq!(list.servers(), &["10.0.0.9".to_string()]);
        assert_eq!(list.get(key::MENU_RETRIES), Some("2"));
    }
}
