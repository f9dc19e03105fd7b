//! `Network` on the PXE base code, simple network and DNSv4 protocols

use super::UefiPlatform;
use crate::raw::protocols::dns4::{
    Dns4CompletionToken, Dns4ConfigData, EfiDns4Protocol, EfiServiceBindingProtocol, DNS_PROTOCOL_UDP,
};
use crate::raw::protocols::pxe::{EfiPxeBaseCodeProtocol, PxeBaseCodeMode, TftpOpcode, TFTP_BLOCK_SIZE};
use crate::raw::status::NO_MAPPING;
use crate::raw::{guids, EfiHandle, IpAddress, Status, FALSE, TRUE};
use crate::{smbios, ucs2};
use alloc::string::String;
use alloc::vec::Vec;
use core::ptr;
use netchain_hal::{HalError, HalResult, Ipv4Addr, MacAddr, Network, PxeModeFlags};

/// Poll interval while a DNS request is pending
const DNS_POLL_MS: u32 = 10;
/// Give up on a single DNS request after this long
const DNS_TIMEOUT_MS: u32 = 5000;

/// Boot server address from the cached packets
///
/// A PXE boot server reply wins over a proxy DHCP offer, which wins over the
/// DHCP ACK.
pub(crate) fn select_server(mode: &PxeBaseCodeMode) -> Option<[u8; 4]> {
    if mode.pxe_reply_received != 0 {
        Some(mode.pxe_reply.server_ip())
    } else if mode.proxy_offer_received != 0 {
        Some(mode.proxy_offer.server_ip())
    } else if mode.dhcp_ack_received != 0 {
        Some(mode.dhcp_ack.server_ip())
    } else {
        None
    }
}

/// Point the cached DHCP ACK at a new boot file and server
///
/// The proxy offer and PXE reply are invalidated so a later stage reading
/// the mode data only finds the new values.
pub(crate) fn rewrite_mode(mode: &mut PxeBaseCodeMode, boot_file: &str, server: Ipv4Addr) -> HalResult<()> {
    if mode.pxe_reply_received != 0 {
        mode.pxe_reply_received = FALSE;
        mode.pxe_reply.clear_boot_parameters();
    }
    if mode.proxy_offer_received != 0 {
        mode.proxy_offer_received = FALSE;
        mode.proxy_offer.clear_boot_parameters();
    }
    if mode.dhcp_ack_received == 0 {
        return Err(HalError::NotFound);
    }

    mode.dhcp_ack.set_boot_file(boot_file.as_bytes());
    log::debug!("boot file changed to {}", boot_file);
    if server.is_unspecified() {
        return Err(HalError::InvalidParameter);
    }
    mode.dhcp_ack.set_server_ip(server.octets);
    log::debug!("boot server changed to {}", server);
    Ok(())
}

fn mode_flags(mode: &PxeBaseCodeMode) -> PxeModeFlags {
    let mut flags = PxeModeFlags::empty();
    flags.set(PxeModeFlags::STARTED, mode.started != 0);
    flags.set(PxeModeFlags::DHCP_ACK_RECEIVED, mode.dhcp_ack_received != 0);
    flags.set(PxeModeFlags::PROXY_OFFER_RECEIVED, mode.proxy_offer_received != 0);
    flags.set(PxeModeFlags::PXE_REPLY_RECEIVED, mode.pxe_reply_received != 0);
    flags
}

/// NUL-terminated ASCII file name for `Mtftp`
fn tftp_name(filename: &str) -> HalResult<Vec<u8>> {
    if !filename.is_ascii() || filename.bytes().any(|b| b == 0) {
        return Err(HalError::InvalidParameter);
    }
    let mut name = Vec::with_capacity(filename.len() + 1);
    name.extend_from_slice(filename.as_bytes());
    name.push(0);
    Ok(name)
}

impl UefiPlatform {
    fn pxe(&self) -> HalResult<&mut EfiPxeBaseCodeProtocol> {
        // SAFETY: located on the boot device at platform creation
        unsafe { self.pxe.as_mut() }.ok_or(HalError::NotSupported)
    }

    fn pxe_mode_data(&self) -> HalResult<&mut PxeBaseCodeMode> {
        let pxe = self.pxe()?;
        // SAFETY: the mode structure is owned by the protocol instance
        unsafe { pxe.mode.as_mut() }.ok_or(HalError::NotReady)
    }

    fn mtftp(&self, op: TftpOpcode, server: Ipv4Addr, filename: &str, buffer: *mut u8, size: &mut u64) -> HalResult<()> {
        let pxe = self.pxe()?;
        let name = tftp_name(filename)?;
        let ip = IpAddress::v4(server.octets);
        let block_size = TFTP_BLOCK_SIZE;
        let mtftp = pxe.mtftp;
        let this: *mut EfiPxeBaseCodeProtocol = pxe;
        // SAFETY: `buffer` holds `size` bytes or is null for a size query
        let status = unsafe {
            mtftp(
                this,
                op,
                buffer.cast(),
                FALSE,
                size,
                &block_size,
                &ip,
                name.as_ptr(),
                ptr::null(),
                FALSE,
            )
        };
        status.to_result().map_err(HalError::from_status)
    }

    /// One DNSv4 lookup on a fresh child of the service binding
    fn dns_lookup(&self, binding: *mut EfiServiceBindingProtocol, name: &str) -> HalResult<Ipv4Addr> {
        let mut child: EfiHandle = ptr::null_mut();
        // SAFETY: binding located on the boot device
        unsafe { ((*binding).create_child)(binding, &mut child) }
            .to_result()
            .map_err(HalError::from_status)?;

        let result = self.dns_on_child(child, name);

        // SAFETY: child created above
        let status = unsafe { ((*binding).destroy_child)(binding, child) };
        if status.is_error() {
            log::debug!("DNS DestroyChild failed: {}", status);
        }
        result
    }

    fn dns_on_child(&self, child: EfiHandle, name: &str) -> HalResult<Ipv4Addr> {
        let bs = self.bs();
        // SAFETY: boot services are live
        let dns = unsafe { bs.handle_protocol::<EfiDns4Protocol>(child, &guids::DNS4_PROTOCOL) }
            .map_err(HalError::from_status)?;

        let config = Dns4ConfigData {
            dns_server_list_count: 0,
            dns_server_list: ptr::null(),
            use_default_setting: TRUE,
            enable_dns_cache: TRUE,
            protocol: DNS_PROTOCOL_UDP,
            station_ip: [0; 4],
            subnet_mask: [0; 4],
            local_port: 0,
            retry_count: 0,
            retry_interval: 0,
        };
        // SAFETY: protocol instance of the child
        let status = unsafe { ((*dns).configure)(dns, &config) };
        if status == NO_MAPPING {
            return Err(HalError::NotReady);
        }
        status.to_result().map_err(HalError::from_status)?;

        let mut event = ptr::null_mut();
        // SAFETY: plain event without notification
        unsafe { (bs.create_event)(0, 0, None, ptr::null_mut(), &mut event) }
            .to_result()
            .map_err(HalError::from_status)?;

        let mut token = Dns4CompletionToken {
            event,
            status: Status::NOT_READY,
            retry_count: 0,
            retry_interval: 0,
            rsp_data: ptr::null_mut(),
        };
        let host = ucs2::encode(name);
        let result = self.dns_wait(dns, &host, &mut token);

        // SAFETY: event created above
        let _ = unsafe { (bs.close_event)(event) };
        result
    }

    fn dns_wait(&self, dns: *mut EfiDns4Protocol, host: &[u16], token: &mut Dns4CompletionToken) -> HalResult<Ipv4Addr> {
        let bs = self.bs();
        // SAFETY: `host` and `token` outlive the request; it is cancelled
        // below if it does not complete
        let status = unsafe { ((*dns).host_name_to_ip)(dns, host.as_ptr(), token) };
        if status == NO_MAPPING {
            return Err(HalError::NotReady);
        }
        status.to_result().map_err(HalError::from_status)?;

        let mut waited = 0;
        // SAFETY: event of the pending token
        while unsafe { (bs.check_event)(token.event) } == Status::NOT_READY {
            if waited >= DNS_TIMEOUT_MS {
                // SAFETY: token is pending on this instance
                let _ = unsafe { ((*dns).cancel)(dns, token) };
                return Err(HalError::Timeout);
            }
            // SAFETY: protocol instance of the child
            let _ = unsafe { ((*dns).poll)(dns) };
            self.stall_ms(DNS_POLL_MS);
            waited += DNS_POLL_MS;
        }
        if token.status == NO_MAPPING {
            return Err(HalError::NotReady);
        }
        token.status.to_result().map_err(HalError::from_status)?;

        // SAFETY: a completed host-to-address request carries its answer,
        // which the caller frees
        let answer = unsafe { token.rsp_data.as_ref() }.ok_or(HalError::NotFound)?;
        let first = if answer.ip_count > 0 && !answer.ip_list.is_null() {
            // SAFETY: `ip_count` entries
            Some(unsafe { *answer.ip_list })
        } else {
            None
        };
        self.free_pool(answer.ip_list.cast());
        self.free_pool(token.rsp_data.cast());
        token.rsp_data = ptr::null_mut();

        let [a, b, c, d] = first.ok_or(HalError::NotFound)?;
        Ok(Ipv4Addr::new(a, b, c, d))
    }

    fn dns_binding(&self) -> HalResult<*mut EfiServiceBindingProtocol> {
        let bs = self.bs();
        if !self.device_handle.is_null() {
            // SAFETY: boot services are live
            if let Ok(binding) = unsafe { bs.handle_protocol(self.device_handle, &guids::DNS4_SERVICE_BINDING_PROTOCOL) } {
                return Ok(binding);
            }
        }
        // SAFETY: boot services are live
        unsafe { bs.locate_protocol(&guids::DNS4_SERVICE_BINDING_PROTOCOL) }.map_err(|_| HalError::NotSupported)
    }

    fn smbios_table(&self) -> Option<&[u8]> {
        let st = self.st();
        // SAFETY: configuration tables are firmware owned and live
        let table = unsafe {
            if let Some(entry) = st.find_config_table(&guids::SMBIOS3_TABLE) {
                smbios::parse_entry_point3(core::slice::from_raw_parts(entry.cast::<u8>(), 0x18))
            } else if let Some(entry) = st.find_config_table(&guids::SMBIOS_TABLE) {
                smbios::parse_entry_point(core::slice::from_raw_parts(entry.cast::<u8>(), 0x1f))
            } else {
                None
            }
        }?;
        if table.address == 0 || table.length == 0 {
            return None;
        }
        // SAFETY: the entry point describes the structure table
        Some(unsafe { core::slice::from_raw_parts(table.address as usize as *const u8, table.length) })
    }
}

impl Network for UefiPlatform {
    fn pxe_mode(&self) -> PxeModeFlags {
        self.pxe_mode_data().map(|mode| mode_flags(mode)).unwrap_or_default()
    }

    fn dhcp_server(&self) -> HalResult<Ipv4Addr> {
        let mode = self.pxe_mode_data()?;
        let [a, b, c, d] = select_server(mode).ok_or(HalError::NotFound)?;
        Ok(Ipv4Addr::new(a, b, c, d))
    }

    fn client_mac(&self) -> HalResult<MacAddr> {
        // SAFETY: located on the boot device at platform creation
        let snp = unsafe { self.snp.as_ref() }.ok_or(HalError::NotSupported)?;
        // SAFETY: the mode structure is owned by the protocol instance
        let mode = unsafe { snp.mode.as_ref() }.ok_or(HalError::NotReady)?;
        let addr = &mode.current_address.addr;
        Ok(MacAddr::new(addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]))
    }

    fn dhcp_discover_packet(&self) -> HalResult<Vec<u8>> {
        let mode = self.pxe_mode_data()?;
        if mode.dhcp_discover_valid == 0 {
            return Err(HalError::NotFound);
        }
        Ok(mode.dhcp_discover.raw.to_vec())
    }

    fn system_uuid(&self) -> Option<String> {
        let table = self.smbios_table()?;
        smbios::find_system_uuid(table).map(|uuid| smbios::format_uuid(&uuid))
    }

    fn tftp_file_size(&self, server: Ipv4Addr, filename: &str) -> HalResult<u64> {
        let mut size = 0u64;
        self.mtftp(TftpOpcode::GetFileSize, server, filename, ptr::null_mut(), &mut size)?;
        Ok(size)
    }

    fn tftp_read_file(&self, server: Ipv4Addr, filename: &str, buffer: &mut [u8]) -> HalResult<usize> {
        let mut size = buffer.len() as u64;
        self.mtftp(TftpOpcode::ReadFile, server, filename, buffer.as_mut_ptr(), &mut size)?;
        Ok(usize::try_from(size).map_or(buffer.len(), |size| size.min(buffer.len())))
    }

    fn resolve_host(&self, name: &str) -> HalResult<Ipv4Addr> {
        let binding = self.dns_binding()?;
        self.dns_lookup(binding, name)
    }

    fn rewrite_boot_parameters(&self, boot_file: &str, server: Ipv4Addr) -> HalResult<()> {
        let mode = self.pxe_mode_data()?;
        rewrite_mode(mode, boot_file, server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use core::mem::MaybeUninit;

    fn zeroed_mode() -> Box<PxeBaseCodeMode> {
        // SAFETY: all-zero bytes are a valid mode (booleans false, packets empty)
        unsafe { Box::new(MaybeUninit::<PxeBaseCodeMode>::zeroed().assume_init()) }
    }

    #[test]
    fn test_server_priority() {
        let mut mode = zeroed_mode();
        assert_eq!(select_server(&mode), None);

        mode.dhcp_ack_received = TRUE;
        mode.dhcp_ack.set_server_ip([10, 0, 0, 1]);
        assert_eq!(select_server(&mode), Some([10, 0, 0, 1]));

        mode.proxy_offer_received = TRUE;
        mode.proxy_offer.set_server_ip([10, 0, 0, 2]);
        assert_eq!(select_server(&mode), Some([10, 0, 0, 2]));

        mode.pxe_reply_received = TRUE;
        mode.pxe_reply.set_server_ip([10, 0, 0, 3]);
        assert_eq!(select_server(&mode), Some([10, 0, 0, 3]));
    }

    #[test]
    fn test_rewrite_invalidates_offers() {
        let mut mode = zeroed_mode();
        mode.dhcp_ack_received = TRUE;
        mode.proxy_offer_received = TRUE;
        mode.proxy_offer.set_server_ip([10, 0, 0, 2]);
        mode.proxy_offer.set_boot_file(b"netchain.efi");
        mode.pxe_reply_received = TRUE;
        mode.pxe_reply.set_server_ip([10, 0, 0, 3]);

        rewrite_mode(&mut mode, "/bbl/pe.efi", Ipv4Addr::new(192, 168, 1, 20)).unwrap();

        assert_eq!(mode.proxy_offer_received, FALSE);
        assert_eq!(mode.pxe_reply_received, FALSE);
        assert_eq!(mode.proxy_offer.boot_file(), b"");
        assert_eq!(mode.pxe_reply.server_ip(), [0; 4]);
        assert_eq!(mode.dhcp_ack.boot_file(), b"/bbl/pe.efi");
        assert_eq!(select_server(&mode), Some([192, 168, 1, 20]));
    }

    #[test]
    fn test_rewrite_needs_ack_and_server() {
        let mut mode = zeroed_mode();
        assert_eq!(rewrite_mode(&mut mode, "x", Ipv4Addr::new(1, 2, 3, 4)), Err(HalError::NotFound));

        mode.dhcp_ack_received = TRUE;
        assert_eq!(rewrite_mode(&mut mode, "x", Ipv4Addr::UNSPECIFIED), Err(HalError::InvalidParameter));
        assert_eq!(mode.dhcp_ack.boot_file(), b"x");
    }

    #[test]
    fn test_mode_flags() {
        let mut mode = zeroed_mode();
        assert!(!mode_flags(&mode).is_netboot());
        mode.started = TRUE;
        mode.dhcp_ack_received = TRUE;
        assert!(mode_flags(&mode).is_netboot());
        mode.proxy_offer_received = TRUE;
        assert!(mode_flags(&mode).contains(PxeModeFlags::PROXY_OFFER_RECEIVED));
    }

    #[test]
    fn test_tftp_name() {
        assert_eq!(tftp_name("/bblefi.cfg").unwrap(), b"/bblefi.cfg\0");
        assert_eq!(tftp_name("/b\u{e4}d"), Err(HalError::InvalidParameter));
        assert_eq!(tftp_name("a\0b"), Err(HalError::InvalidParameter));
    }
}
