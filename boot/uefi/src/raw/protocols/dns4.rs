//! DNSv4 protocol and its service binding

use crate::raw::boot_services::Unused;
use crate::raw::types::*;

/// EFI_SERVICE_BINDING_PROTOCOL
#[repr(C)]
pub struct EfiServiceBindingProtocol {
    /// Create a child handle carrying the bound protocol
    pub create_child: unsafe extern "efiapi" fn(
        this: *mut EfiServiceBindingProtocol,
        child_handle: *mut EfiHandle,
    ) -> Status,

    /// Destroy a child created by `create_child`
    pub destroy_child: unsafe extern "efiapi" fn(
        this: *mut EfiServiceBindingProtocol,
        child_handle: EfiHandle,
    ) -> Status,
}

/// EFI_DNS4_CONFIG_DATA
#[derive(Debug)]
#[repr(C)]
pub struct Dns4ConfigData {
    /// Number of entries in `dns_server_list`
    pub dns_server_list_count: usize,
    /// DNS servers; empty takes the DHCP supplied ones
    pub dns_server_list: *const [u8; 4],
    /// Take station address from the default settings
    pub use_default_setting: Boolean,
    /// Cache answers
    pub enable_dns_cache: Boolean,
    /// UDP (17) or TCP (6)
    pub protocol: u8,
    /// Station address when not using defaults
    pub station_ip: [u8; 4],
    /// Subnet mask when not using defaults
    pub subnet_mask: [u8; 4],
    /// Local port, 0 picks one
    pub local_port: u16,
    /// Retransmissions
    pub retry_count: u32,
    /// Seconds between retransmissions
    pub retry_interval: u32,
}

/// DNS_HOST_TO_ADDR_DATA
#[repr(C)]
pub struct DnsHostToAddrData {
    /// Number of addresses
    pub ip_count: u32,
    /// Addresses, freed by the caller
    pub ip_list: *mut [u8; 4],
}

/// EFI_DNS4_COMPLETION_TOKEN
#[repr(C)]
pub struct Dns4CompletionToken {
    /// Signaled when the request completes
    pub event: Event,
    /// Result of the request
    pub status: Status,
    /// Retransmissions
    pub retry_count: u32,
    /// Seconds between retransmissions
    pub retry_interval: u32,
    /// Answer; host-to-address data for `host_name_to_ip`
    pub rsp_data: *mut DnsHostToAddrData,
}

/// EFI_DNS4_PROTOCOL
#[repr(C)]
pub struct EfiDns4Protocol {
    /// GetModeData
    pub get_mode_data: Unused,

    /// Configure the instance
    pub configure: unsafe extern "efiapi" fn(
        this: *mut EfiDns4Protocol,
        config: *const Dns4ConfigData,
    ) -> Status,

    /// Start a name lookup
    pub host_name_to_ip: unsafe extern "efiapi" fn(
        this: *mut EfiDns4Protocol,
        host_name: *const Char16,
        token: *mut Dns4CompletionToken,
    ) -> Status,

    /// IpToHostName
    pub ip_to_host_name: Unused,
    /// GeneralLookUp
    pub general_look_up: Unused,
    /// UpdateDnsCache
    pub update_dns_cache: Unused,

    /// Drive the network stack
    pub poll: unsafe extern "efiapi" fn(this: *mut EfiDns4Protocol) -> Status,

    /// Abort a pending request
    pub cancel: unsafe extern "efiapi" fn(
        this: *mut EfiDns4Protocol,
        token: *mut Dns4CompletionToken,
    ) -> Status,
}

/// UDP transport for DNS
pub const DNS_PROTOCOL_UDP: u8 = 17;
