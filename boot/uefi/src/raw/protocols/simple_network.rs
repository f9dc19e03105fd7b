//! Simple Network Protocol
//!
//! Only the mode data is read: it holds the station MAC address.

use crate::raw::boot_services::Unused;
use crate::raw::types::*;

/// Maximum multicast filter entries in the mode structure
const MAX_MCAST_FILTER_CNT: usize = 16;

/// EFI_SIMPLE_NETWORK_PROTOCOL
#[repr(C)]
pub struct EfiSimpleNetworkProtocol {
    /// Revision
    pub revision: u64,
    /// Start, Stop, Initialize, Reset, Shutdown, ReceiveFilters,
    /// StationAddress, Statistics, MCastIpToMac, NvData, GetStatus,
    /// Transmit, Receive
    pub services: [Unused; 13],
    /// WaitForPacket event
    pub wait_for_packet: Event,
    /// Mode data
    pub mode: *mut SimpleNetworkMode,
}

/// EFI_SIMPLE_NETWORK_MODE, up to the current station address
#[repr(C)]
pub struct SimpleNetworkMode {
    /// Interface state
    pub state: u32,
    /// Size of a hardware address
    pub hw_address_size: u32,
    /// Size of the media header
    pub media_header_size: u32,
    /// Largest packet
    pub max_packet_size: u32,
    /// NVRAM size
    pub nv_ram_size: u32,
    /// NVRAM access granularity
    pub nv_ram_access_size: u32,
    /// Supported receive filters
    pub receive_filter_mask: u32,
    /// Enabled receive filters
    pub receive_filter_setting: u32,
    /// Capacity of the multicast filter
    pub max_mcast_filter_count: u32,
    /// Entries in the multicast filter
    pub mcast_filter_count: u32,
    /// Multicast filter
    pub mcast_filter: [MacAddress; MAX_MCAST_FILTER_CNT],
    /// Current station address
    pub current_address: MacAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn test_mode_layout() {
        assert_eq!(offset_of!(SimpleNetworkMode, mcast_filter), 40);
        assert_eq!(offset_of!(SimpleNetworkMode, current_address), 552);
        assert_eq!(offset_of!(EfiSimpleNetworkProtocol, mode), 120);
    }
}
