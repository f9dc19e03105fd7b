//! DHCP packet options
//!
//! Only the option area of a BOOTP/DHCP packet is interpreted: it starts
//! after the fixed header and the magic cookie and is a sequence of
//! `code, length, value` triples. Code 0 is a single pad byte and code 255
//! ends the list.

use crate::{BootError, Result};
use netchain_hal::Network;

/// Offset of the first option (fixed header + magic cookie)
pub const OPTIONS_OFFSET: usize = 240;

/// Pad option
pub const OPTION_PAD: u8 = 0;

/// End option
pub const OPTION_END: u8 = 255;

/// Client system architecture type (RFC 4578)
pub const OPTION_CLIENT_ARCH: u8 = 93;

/// Client architecture values (option 93)
pub mod arch_type {
    /// EFI IA32
    pub const EFI_IA32: u16 = 6;
    /// EFI x86-64
    pub const EFI_X64: u16 = 7;
    /// EFI byte code
    pub const EFI_BC: u16 = 9;
    /// ARM 32-bit UEFI
    pub const EFI_ARM32: u16 = 10;
    /// ARM 64-bit UEFI
    pub const EFI_ARM64: u16 = 11;
    /// RISC-V 64-bit UEFI
    pub const EFI_RISCV64: u16 = 27;
}

/// One option from the option area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpOption<'a> {
    /// Option code
    pub code: u8,
    /// Option value
    pub value: &'a [u8],
}

/// Iterator over the options of a packet
///
/// Stops at the end option or at the first option that runs past the
/// packet.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Options<'a> {
    /// Options of a whole packet
    pub fn new(packet: &'a [u8]) -> Self {
        Self { data: packet, offset: OPTIONS_OFFSET }
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = DhcpOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let code = *self.data.get(self.offset)?;
            match code {
                OPTION_END => {
                    self.offset = self.data.len();
                    return None;
                }
                OPTION_PAD => self.offset += 1,
                _ => {
                    let len = usize::from(*self.data.get(self.offset + 1)?);
                    let start = self.offset + 2;
                    let value = self.data.get(start..start + len)?;
                    self.offset = start + len;
                    return Some(DhcpOption { code, value });
                }
            }
        }
    }
}

/// First option with `code`
pub fn find_option(packet: &[u8], code: u8) -> Option<&[u8]> {
    Options::new(packet).find(|option| option.code == code).map(|option| option.value)
}

/// Client architecture type from option 93
///
/// The value is a big-endian 16-bit number; other lengths are ignored.
pub fn client_architecture(packet: &[u8]) -> Option<u16> {
    match find_option(packet, OPTION_CLIENT_ARCH)? {
        &[high, low] => Some(u16::from_be_bytes([high, low])),
        _ => None,
    }
}

/// Client architecture the firmware announced in its DHCP discover
pub fn discover_architecture(network: &dyn Network) -> Result<u16> {
    let packet = network.dhcp_discover_packet().map_err(|err| {
        log::error!("no DHCP discover packet: {}", err);
        BootError::NoArchitectureType
    })?;
    client_architecture(&packet).ok_or(BootError::NoArchitectureType)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use netchain_hal::mock::MockPlatform;

    /// Packet with an empty fixed header followed by `options`
    pub(crate) fn packet_with(options: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; OPTIONS_OFFSET];
        packet[236..240].copy_from_slice(&[99, 130, 83, 99]);
        packet.extend_from_slice(options);
        packet
    }

    #[test]
    fn test_options_iteration() {
        let packet = packet_with(&[53, 1, 1, 0, 0, 93, 2, 0, 7, 255, 12, 1, 0]);
        let codes: Vec<u8> = Options::new(&packet).map(|option| option.code).collect();
        assert_eq!(codes, vec![53, 93]);
    }

    #[test]
    fn test_client_architecture() {
        assert_eq!(client_architecture(&packet_with(&[93, 2, 0, 7, 255])), Some(arch_type::EFI_X64));
        assert_eq!(client_architecture(&packet_with(&[93, 2, 0x01, 0x02])), Some(0x0102));
        assert_eq!(client_architecture(&packet_with(&[93, 1, 7, 255])), None);
        assert_eq!(client_architecture(&packet_with(&[255, 93, 2, 0, 7])), None);
    }

    #[test]
    fn test_truncated_option() {
        assert_eq!(find_option(&packet_with(&[93, 4, 0, 7]), 93), None);
        assert_eq!(find_option(&[0u8; 10], 93), None);
    }

    #[test]
    fn test_discover_architecture() {
        let platform = MockPlatform::new();
        assert_eq!(discover_architecture(&platform), Err(BootError::NoArchitectureType));

        platform.state().discover_packet = packet_with(&[60, 3, b'P', b'X', b'E', 93, 2, 0, 11, 255]);
        assert_eq!(discover_architecture(&platform), Ok(arch_type::EFI_ARM64));
    }
}
