//! Whole-file TFTP transfers.

use crate::{BootError, Result};
use alloc::vec::Vec;
use netchain_hal::{HalError, Ipv4Addr, Network};

/// Fetch `filename` from `server`
pub fn fetch(network: &dyn Network, server: Ipv4Addr, filename: &str) -> Result<Vec<u8>> {
    let size = network.tftp_file_size(server, filename).map_err(|err| {
        log::debug!("cannot get size of {} from {}: {}", filename, server, err);
        BootError::Network(err)
    })?;
    read(network, server, filename, size)
}

/// Read `filename` from `server` whose size is already known
pub fn read(network: &dyn Network, server: Ipv4Addr, filename: &str, size: u64) -> Result<Vec<u8>> {
    let size = usize::try_from(size).map_err(|_| BootError::Network(HalError::OutOfMemory))?;

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| BootError::Network(HalError::OutOfMemory))?;
    buffer.resize(size, 0);

    let read = network.tftp_read_file(server, filename, &mut buffer).map_err(|err| {
        log::error!("cannot read {} from {}: {}", filename, server, err);
        BootError::Network(err)
    })?;
    buffer.truncate(read);

    log::debug!("read {} ({} bytes) from {}", filename, read, server);
    Ok(buffer)
}
