//! # Network Boot Interface
//!
//! PXE base code access: DHCP state, TFTP transfers and name resolution.

use crate::HalResult;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

// =============================================================================
// ADDRESSES
// =============================================================================

/// IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Addr {
    /// Address octets, network order
    pub octets: [u8; 4],
}

impl Ipv4Addr {
    /// Any address (0.0.0.0)
    pub const UNSPECIFIED: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

    /// Create from octets
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self { octets: [a, b, c, d] }
    }

    /// Is 0.0.0.0
    pub const fn is_unspecified(&self) -> bool {
        self.octets[0] == 0 && self.octets[1] == 0 && self.octets[2] == 0 && self.octets[3] == 0
    }

    /// Parse a dotted quad such as `10.0.0.1`
    ///
    /// Every part must be decimal digits with a value below 256.
    pub fn parse(text: &str) -> Option<Self> {
        let mut octets = [0u8; 4];
        let mut parts = text.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next()?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            *octet = part.parse().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self { octets })
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}",
            self.octets[0], self.octets[1], self.octets[2], self.octets[3])
    }
}

/// MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddr {
    /// Address bytes
    pub bytes: [u8; 6],
}

impl MacAddr {
    /// Create from bytes
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self { bytes: [a, b, c, d, e, f] }
    }
}

/// `aa:bb:cc:dd:ee:ff`; use `{:x}` for the compact `aabbccddeeff` form
impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.bytes[0], self.bytes[1], self.bytes[2],
            self.bytes[3], self.bytes[4], self.bytes[5])
    }
}

impl fmt::LowerHex for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bytes {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

bitflags! {
    /// State bits of the PXE base code mode structure
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PxeModeFlags: u8 {
        /// Base code protocol started
        const STARTED = 1 << 0;
        /// DHCP ACK packet is valid
        const DHCP_ACK_RECEIVED = 1 << 1;
        /// Proxy DHCP offer is valid
        const PROXY_OFFER_RECEIVED = 1 << 2;
        /// PXE boot server reply is valid
        const PXE_REPLY_RECEIVED = 1 << 3;
    }
}

impl PxeModeFlags {
    /// The image was booted over the network and DHCP completed
    pub const fn is_netboot(self) -> bool {
        self.contains(Self::STARTED.union(Self::DHCP_ACK_RECEIVED))
    }
}

// =============================================================================
// NETWORK INTERFACE
// =============================================================================

/// PXE network capability
pub trait Network {
    /// State of the PXE base code on the boot device
    fn pxe_mode(&self) -> PxeModeFlags;

    /// Server address from the DHCP ACK
    fn dhcp_server(&self) -> HalResult<Ipv4Addr>;

    /// Hardware address of the boot interface
    fn client_mac(&self) -> HalResult<MacAddr>;

    /// Raw DHCP discover packet sent by the firmware
    fn dhcp_discover_packet(&self) -> HalResult<Vec<u8>>;

    /// SMBIOS system UUID in textual form
    fn system_uuid(&self) -> Option<String>;

    /// TFTP file size query
    fn tftp_file_size(&self, server: Ipv4Addr, filename: &str) -> HalResult<u64>;

    /// TFTP read of a whole file into `buffer`; returns the bytes read
    fn tftp_read_file(&self, server: Ipv4Addr, filename: &str, buffer: &mut [u8]) -> HalResult<usize>;

    /// DNS lookup; `HalError::NotReady` while the stack is still coming up
    fn resolve_host(&self, name: &str) -> HalResult<Ipv4Addr>;

    /// Replace boot file name and server address in the cached DHCP ACK
    ///
    /// Also invalidates cached proxy offer and PXE reply packets so the next
    /// stage only sees the new values.
    fn rewrite_boot_parameters(&self, boot_file: &str, server: Ipv4Addr) -> HalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_ipv4_parse() {
        assert_eq!(Ipv4Addr::parse("10.0.0.1"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(Ipv4Addr::parse("255.255.255.255"), Some(Ipv4Addr::new(255, 255, 255, 255)));
        assert_eq!(Ipv4Addr::parse("256.0.0.1"), None);
        assert_eq!(Ipv4Addr::parse("10.0.0"), None);
        assert_eq!(Ipv4Addr::parse("10.0.0.1.2"), None);
        assert_eq!(Ipv4Addr::parse("bootserver.local"), None);
        assert_eq!(Ipv4Addr::parse("10..0.1"), None);
    }

    #[test]
    fn test_ipv4_display() {
        assert_eq!(format!("{}", Ipv4Addr::new(192, 168, 1, 20)), "192.168.1.20");
        assert!(Ipv4Addr::UNSPECIFIED.is_unspecified());
    }

    #[test]
    fn test_mac_formats() {
        let mac = MacAddr::new(0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e);
        assert_eq!(format!("{}", mac), "00:1a:2b:3c:4d:5e");
        assert_eq!(format!("{:x}", mac), "001a2b3c4d5e");
    }

    #[test]
    fn test_pxe_mode_netboot() {
        assert!(PxeModeFlags::all().is_netboot());
        assert!(!PxeModeFlags::STARTED.is_netboot());
        assert!(!PxeModeFlags::empty().is_netboot());
    }
}
