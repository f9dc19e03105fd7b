//! # Menu File
//!
//! The menu file served for `menu#{arch}` is a sequence of fixed-layout
//! text records, one per line:
//!
//! ```text
//! TT FFFFFFFF LLLL text LLLL command LLLL guid LLLL prefix \n
//! ```
//!
//! without the spaces. `TT` is the entry type and `FFFFFFFF` the flags,
//! both hex; each string is preceded by its length as 4 hex digits.
//! The file ends when fewer than two bytes are left at a record start.

use crate::{BootError, Result};
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

/// Maximum number of menu entries
pub const MAX_ENTRIES: usize = 20;

/// Maximum kept length of the display text
pub const MAX_TEXT_LENGTH: usize = 80;

/// Maximum kept length of the command
pub const MAX_COMMAND_LENGTH: usize = 512;

/// Maximum kept length of the boot environment GUID
pub const MAX_GUID_LENGTH: usize = 40;

/// Maximum kept length of the TFTP path prefix
pub const MAX_PATH_PREFIX_LENGTH: usize = 80;

// =============================================================================
// ENTRY TYPES
// =============================================================================

/// Kind of a menu entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EntryType {
    /// Unknown or unusable entry
    #[default]
    Invalid = 0,
    /// Prompt countdown in seconds (decimal in the command)
    Timeout = 1,
    /// Server display name (in the command)
    ServerName = 2,
    /// Display-only line
    Text = 3,
    /// Boot from the local disk
    SyslinuxLocalHdd = 4,
    /// Syslinux prompt
    SyslinuxPrompt = 5,
    /// Syslinux command line
    SyslinuxCommand = 6,
    /// Syslinux chainload
    SyslinuxChainload = 7,
    /// Chainload the network boot program named in the command
    WinPeChainload = 8,
    /// Hand over to the firmware boot prompt
    BootPrompt = 9,
}

impl EntryType {
    /// Decode a type value; unknown values are [`EntryType::Invalid`]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Timeout,
            2 => Self::ServerName,
            3 => Self::Text,
            4 => Self::SyslinuxLocalHdd,
            5 => Self::SyslinuxPrompt,
            6 => Self::SyslinuxCommand,
            7 => Self::SyslinuxChainload,
            8 => Self::WinPeChainload,
            9 => Self::BootPrompt,
            _ => Self::Invalid,
        }
    }

    /// Can the user choose this entry
    pub const fn is_selectable(self) -> bool {
        matches!(self, Self::SyslinuxLocalHdd | Self::WinPeChainload | Self::BootPrompt)
    }
}

bitflags! {
    /// Menu entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u32 {
        /// Chosen when the user does not pick an entry
        const DEFAULT = 1 << 0;
        /// Server registers unknown clients
        const AUTO_REGISTER_CLIENT = 1 << 1;
        /// Send `updateclientbootenv` when chosen by the user
        const UPDATE_BOOT_ENV = 1 << 2;
        /// Send `setpathprefix` before booting
        const SET_TFTP_PATH_PREFIX = 1 << 3;
    }
}

/// One menu file record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuEntry {
    /// Entry kind
    pub entry_type: EntryType,
    /// Entry flags; unknown bits are kept
    pub flags: EntryFlags,
    /// Display text
    pub text: String,
    /// Type specific command (boot file name, timeout)
    pub command: String,
    /// Boot environment GUID
    pub boot_env_guid: String,
    /// TFTP path prefix
    pub tftp_path_prefix: String,
}

impl MenuEntry {
    /// Is this the server's default entry
    pub fn is_default(&self) -> bool {
        self.flags.contains(EntryFlags::DEFAULT)
    }
}

impl fmt::Display for MenuEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type:{} flags:{} text:{} command:{} bootenv:{} TftpPathPrefix:{}",
            self.entry_type as u8,
            self.flags.bits(),
            self.text,
            self.command,
            self.boot_env_guid,
            self.tftp_path_prefix
        )
    }
}

// =============================================================================
// PARSER
// =============================================================================

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + len).ok_or(BootError::MenuParse)?;
        self.pos += len;
        Ok(bytes)
    }

    fn hex(&mut self, digits: usize) -> Result<u32> {
        self.take(digits)?.iter().try_fold(0u32, |value, &digit| -> Result<u32> {
            let nibble = char::from(digit).to_digit(16).ok_or(BootError::MenuParse)?;
            Ok((value << 4) | nibble)
        })
    }

    /// Length-prefixed string, cut to `max` bytes
    fn string(&mut self, max: usize) -> Result<String> {
        let len = self.hex(4)? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(&bytes[..len.min(max)]).into_owned())
    }

    fn entry(&mut self) -> Result<MenuEntry> {
        let entry_type = EntryType::from_u8(self.hex(2)? as u8);
        let flags = EntryFlags::from_bits_retain(self.hex(8)?);
        let text = self.string(MAX_TEXT_LENGTH)?;
        let command = self.string(MAX_COMMAND_LENGTH)?;
        let boot_env_guid = self.string(MAX_GUID_LENGTH)?;
        let tftp_path_prefix = self.string(MAX_PATH_PREFIX_LENGTH)?;
        self.take(1)?;

        Ok(MenuEntry { entry_type, flags, text, command, boot_env_guid, tftp_path_prefix })
    }
}

/// Parse a menu file
///
/// The data ends at the first NUL byte, if any.
pub fn parse_menu(data: &[u8]) -> Result<Vec<MenuEntry>> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let mut reader = Reader { data: &data[..end], pos: 0 };
    let mut entries = Vec::new();

    while reader.remaining() >= 2 {
        if entries.len() == MAX_ENTRIES {
            log::error!("more than the allowed {} menu entries received", MAX_ENTRIES);
            return Err(BootError::TooManyMenuEntries);
        }
        let entry = reader.entry().map_err(|err| {
            log::error!("menu file record {} is malformed", entries.len() + 1);
            err
        })?;
        log::debug!("{}", entry);
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::ToString;

    /// Encode one record
    pub(crate) fn record(entry_type: u8, flags: u32, text: &str, command: &str, guid: &str, prefix: &str) -> String {
        let mut line = format!("{:02x}{:08x}", entry_type, flags);
        for field in [text, command, guid, prefix] {
            line.push_str(&format!("{:04x}{}", field.len(), field));
        }
        line.push('\n');
        line
    }

    #[test]
    fn test_parse_entries() {
        let data = [
            record(2, 0, "Main Server", "", "", ""),
            record(8, 5, "Windows PE", "\\boot\\x64\\wdsmgfw.efi", "guid-1", "/pe"),
            record(4, 0, "Local disk", "", "", ""),
        ]
        .concat();

        let entries = parse_menu(data.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_type, EntryType::ServerName);
        assert_eq!(entries[1].entry_type, EntryType::WinPeChainload);
        assert_eq!(entries[1].flags, EntryFlags::DEFAULT | EntryFlags::UPDATE_BOOT_ENV);
        assert_eq!(entries[1].command, "\\boot\\x64\\wdsmgfw.efi");
        assert_eq!(entries[1].boot_env_guid, "guid-1");
        assert_eq!(entries[1].tftp_path_prefix, "/pe");
        assert!(entries[1].is_default());
    }

    #[test]
    fn test_empty_and_trailing_byte() {
        assert!(parse_menu(b"").unwrap().is_empty());
        assert!(parse_menu(b"\n").unwrap().is_empty());

        let data = record(3, 0, "hello", "", "", "") + "\n";
        assert_eq!(parse_menu(data.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn test_stops_at_nul() {
        let mut data = record(3, 0, "a", "", "", "").into_bytes();
        data.push(0);
        data.extend_from_slice(b"garbage that is not a record");
        assert_eq!(parse_menu(&data).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_type_and_flags() {
        let entries = parse_menu(record(0x42, 0x8000_0001, "x", "", "", "").as_bytes()).unwrap();
        assert_eq!(entries[0].entry_type, EntryType::Invalid);
        assert!(entries[0].is_default());
        assert_eq!(entries[0].flags.bits(), 0x8000_0001);
    }

    #[test]
    fn test_long_string_truncated() {
        let text = "t".repeat(100);
        let data = record(3, 0, &text, "cmd", "", "");
        let entries = parse_menu(data.as_bytes()).unwrap();
        assert_eq!(entries[0].text.len(), MAX_TEXT_LENGTH);
        assert_eq!(entries[0].command, "cmd");
    }

    #[test]
    fn test_malformed_records() {
        assert_eq!(parse_menu(b"0z00000000"), Err(BootError::MenuParse));
        assert_eq!(parse_menu(b"0300000000000Ahello"), Err(BootError::MenuParse));

        let mut data = record(3, 0, "a", "b", "c", "d");
        data.pop();
        assert_eq!(parse_menu(data.as_bytes()), Err(BootError::MenuParse));
    }

    #[test]
    fn test_entry_limit() {
        let twenty: String = (0..MAX_ENTRIES).map(|i| record(3, 0, &i.to_string(), "", "", "")).collect();
        assert_eq!(parse_menu(twenty.as_bytes()).unwrap().len(), MAX_ENTRIES);

        let more = twenty + &record(3, 0, "21", "", "", "");
        assert_eq!(parse_menu(more.as_bytes()), Err(BootError::TooManyMenuEntries));
    }

    #[test]
    fn test_selectable_types() {
        assert!(EntryType::WinPeChainload.is_selectable());
        assert!(EntryType::SyslinuxLocalHdd.is_selectable());
        assert!(EntryType::BootPrompt.is_selectable());
        assert!(!EntryType::Text.is_selectable());
        assert!(!EntryType::SyslinuxChainload.is_selectable());
        assert_eq!(EntryType::from_u8(10), EntryType::Invalid);
    }
}
