//! PXE Base Code Protocol
//!
//! The firmware network boot stack: cached DHCP packets and TFTP.

use crate::raw::boot_services::Unused;
use crate::raw::types::*;
use core::ffi::c_void;
use static_assertions::const_assert_eq;

// =============================================================================
// PACKETS
// =============================================================================

/// `EFI_PXE_BASE_CODE_PACKET`: a DHCPv4 packet as cached by the base code
#[derive(Clone, Copy)]
#[repr(C, align(4))]
pub struct PxePacket {
    /// Raw BOOTP/DHCP bytes
    pub raw: [u8; PxePacket::SIZE],
}

impl PxePacket {
    /// Size of the packet buffer
    pub const SIZE: usize = 1472;

    /// Offset of the client hardware address
    pub const CHADDR_OFFSET: usize = 28;
    /// Offset of the boot server address (`siaddr`)
    pub const SIADDR_OFFSET: usize = 20;
    /// Offset of the boot file name
    pub const FILE_OFFSET: usize = 108;
    /// Length of the boot file name field
    pub const FILE_LEN: usize = 128;

    /// Boot server address
    pub fn server_ip(&self) -> [u8; 4] {
        let mut ip = [0u8; 4];
        ip.copy_from_slice(&self.raw[Self::SIADDR_OFFSET..Self::SIADDR_OFFSET + 4]);
        ip
    }

    /// Replace the boot server address
    pub fn set_server_ip(&mut self, ip: [u8; 4]) {
        self.raw[Self::SIADDR_OFFSET..Self::SIADDR_OFFSET + 4].copy_from_slice(&ip);
    }

    /// Boot file name bytes up to the first NUL
    pub fn boot_file(&self) -> &[u8] {
        let field = &self.raw[Self::FILE_OFFSET..Self::FILE_OFFSET + Self::FILE_LEN];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        &field[..end]
    }

    /// Replace the boot file name, truncated to the field
    pub fn set_boot_file(&mut self, name: &[u8]) {
        let field = &mut self.raw[Self::FILE_OFFSET..Self::FILE_OFFSET + Self::FILE_LEN];
        field.fill(0);
        let len = name.len().min(Self::FILE_LEN);
        field[..len].copy_from_slice(&name[..len]);
    }

    /// Clear boot file and server address
    pub fn clear_boot_parameters(&mut self) {
        self.set_boot_file(&[]);
        self.set_server_ip([0; 4]);
    }
}

impl core::fmt::Debug for PxePacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PxePacket")
            .field("server_ip", &self.server_ip())
            .field("boot_file_len", &self.boot_file().len())
            .finish()
    }
}

// =============================================================================
// MODE
// =============================================================================

/// `EFI_PXE_BASE_CODE_MODE`, up to the last packet the chainloader reads
#[repr(C)]
pub struct PxeBaseCodeMode {
    /// Base code started
    pub started: Boolean,
    /// IPv6 available
    pub ipv6_available: Boolean,
    /// IPv6 supported
    pub ipv6_supported: Boolean,
    /// IPv6 in use
    pub using_ipv6: Boolean,
    /// BIS supported
    pub bis_supported: Boolean,
    /// BIS detected
    pub bis_detected: Boolean,
    /// Automatic ARP
    pub auto_arp: Boolean,
    /// Send the system GUID in DHCP
    pub send_guid: Boolean,
    /// `dhcp_discover` is valid
    pub dhcp_discover_valid: Boolean,
    /// `dhcp_ack` is valid
    pub dhcp_ack_received: Boolean,
    /// `proxy_offer` is valid
    pub proxy_offer_received: Boolean,
    /// `pxe_discover` is valid
    pub pxe_discover_valid: Boolean,
    /// `pxe_reply` is valid
    pub pxe_reply_received: Boolean,
    /// `pxe_bis_reply` is valid
    pub pxe_bis_reply_received: Boolean,
    /// ICMP error received
    pub icmp_error_received: Boolean,
    /// TFTP error received
    pub tftp_error_received: Boolean,
    /// Callbacks enabled
    pub make_callbacks: Boolean,
    /// Time to live
    pub ttl: u8,
    /// Type of service
    pub tos: u8,
    /// Station address
    pub station_ip: IpAddress,
    /// Subnet mask
    pub subnet_mask: IpAddress,
    /// DHCP discover sent
    pub dhcp_discover: PxePacket,
    /// DHCP acknowledgement received
    pub dhcp_ack: PxePacket,
    /// Proxy DHCP offer
    pub proxy_offer: PxePacket,
    /// PXE discover sent
    pub pxe_discover: PxePacket,
    /// PXE boot server reply
    pub pxe_reply: PxePacket,
    /// PXE BIS reply
    pub pxe_bis_reply: PxePacket,
}

// =============================================================================
// PROTOCOL
// =============================================================================

/// TFTP operations of `Mtftp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TftpOpcode {
    /// Query the size of a file
    GetFileSize = 1,
    /// Read a whole file
    ReadFile = 2,
}

/// Block size requested for TFTP transfers
pub const TFTP_BLOCK_SIZE: usize = 1456;

/// EFI_PXE_BASE_CODE_PROTOCOL
#[repr(C)]
pub struct EfiPxeBaseCodeProtocol {
    /// Revision
    pub revision: u64,
    /// Start
    pub start: Unused,
    /// Stop
    pub stop: Unused,
    /// Dhcp
    pub dhcp: Unused,
    /// Discover
    pub discover: Unused,

    /// TFTP and MTFTP transfers
    pub mtftp: unsafe extern "efiapi" fn(
        this: *mut EfiPxeBaseCodeProtocol,
        operation: TftpOpcode,
        buffer: *mut c_void,
        overwrite: Boolean,
        buffer_size: *mut u64,
        block_size: *const usize,
        server_ip: *const IpAddress,
        filename: *const Char8,
        info: *const c_void,
        dont_use_buffer: Boolean,
    ) -> Status,

    /// UdpWrite
    pub udp_write: Unused,
    /// UdpRead
    pub udp_read: Unused,
    /// SetIpFilter
    pub set_ip_filter: Unused,
    /// Arp
    pub arp: Unused,
    /// SetParameters
    pub set_parameters: Unused,
    /// SetStationIp
    pub set_station_ip: Unused,
    /// SetPackets
    pub set_packets: Unused,
    /// Mode data
    pub mode: *mut PxeBaseCodeMode,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(core::mem::size_of::<EfiPxeBaseCodeProtocol>(), 112);
