//! SMBIOS system UUID
//!
//! Reads the UUID of the type 1 (System Information) structure. The entry
//! point comes from the firmware configuration tables; SMBIOS 3 is
//! preferred over the 32-bit entry point.

use alloc::format;
use alloc::string::String;

/// Structure type of System Information
const SYSTEM_INFORMATION: u8 = 1;
/// Structure type marking the end of the table
const END_OF_TABLE: u8 = 127;
/// Offset of the UUID in the System Information structure
const UUID_OFFSET: usize = 8;
/// Smallest System Information structure carrying a UUID
const UUID_MIN_LEN: usize = 0x19;

/// Location of the structure table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureTable {
    /// Physical address of the first structure
    pub address: u64,
    /// Length of the table in bytes (maximum for SMBIOS 3)
    pub length: usize,
}

/// Decode a 32-bit (`_SM_`) entry point
pub fn parse_entry_point(entry: &[u8]) -> Option<StructureTable> {
    if entry.len() < 0x1f || &entry[..4] != b"_SM_" || &entry[0x10..0x15] != b"_DMI_" {
        return None;
    }
    let length = u16::from_le_bytes([entry[0x16], entry[0x17]]) as usize;
    let address = u32::from_le_bytes([entry[0x18], entry[0x19], entry[0x1a], entry[0x1b]]);
    Some(StructureTable { address: u64::from(address), length })
}

/// Decode a 64-bit (`_SM3_`) entry point
pub fn parse_entry_point3(entry: &[u8]) -> Option<StructureTable> {
    if entry.len() < 0x18 || &entry[..5] != b"_SM3_" {
        return None;
    }
    let length = u32::from_le_bytes([entry[0x0c], entry[0x0d], entry[0x0e], entry[0x0f]]) as usize;
    let mut address = [0u8; 8];
    address.copy_from_slice(&entry[0x10..0x18]);
    Some(StructureTable { address: u64::from_le_bytes(address), length })
}

/// UUID bytes of the System Information structure
///
/// `None` when the structure is missing, too short, or the UUID is marked
/// as not present (all zero) or not set (all ones).
pub fn find_system_uuid(table: &[u8]) -> Option<[u8; 16]> {
    let mut offset = 0;
    while offset + 4 <= table.len() {
        let kind = table[offset];
        let len = table[offset + 1] as usize;
        if len < 4 || offset + len > table.len() {
            return None;
        }
        if kind == SYSTEM_INFORMATION {
            if len < UUID_MIN_LEN {
                return None;
            }
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&table[offset + UUID_OFFSET..offset + UUID_OFFSET + 16]);
            if uuid.iter().all(|&b| b == 0) || uuid.iter().all(|&b| b == 0xff) {
                return None;
            }
            return Some(uuid);
        }
        if kind == END_OF_TABLE {
            return None;
        }
        // the string set ends with a double NUL
        let strings = &table[offset + len..];
        let end = strings.windows(2).position(|w| w == [0, 0])?;
        offset += len + end + 2;
    }
    None
}

/// Textual UUID, lowercase
///
/// The first three fields are stored little-endian.
pub fn format_uuid(uuid: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        uuid[3], uuid[2], uuid[1], uuid[0],
        uuid[5], uuid[4],
        uuid[7], uuid[6],
        uuid[8], uuid[9],
        uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    const UUID: [u8; 16] = [
        0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66,
        0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
    ];

    fn bios_info() -> Vec<u8> {
        let mut s = alloc::vec![0u8, 0x12, 0x00, 0x00];
        s.resize(0x12, 0);
        s.extend_from_slice(b"Vendor\0Version\0\0");
        s
    }

    fn system_info(uuid: [u8; 16]) -> Vec<u8> {
        let mut s = alloc::vec![SYSTEM_INFORMATION, 0x1b, 0x01, 0x00];
        s.resize(UUID_OFFSET, 0);
        s.extend_from_slice(&uuid);
        s.resize(0x1b, 0);
        s.extend_from_slice(b"\0\0");
        s
    }

    fn end() -> Vec<u8> {
        alloc::vec![END_OF_TABLE, 4, 0xff, 0xff, 0, 0]
    }

    #[test]
    fn test_uuid_after_other_structures() {
        let table = [bios_info(), system_info(UUID), end()].concat();
        assert_eq!(find_system_uuid(&table), Some(UUID));
    }

    #[test]
    fn test_uuid_not_set() {
        let table = [system_info([0xff; 16]), end()].concat();
        assert_eq!(find_system_uuid(&table), None);
        let table = [system_info([0; 16]), end()].concat();
        assert_eq!(find_system_uuid(&table), None);
    }

    #[test]
    fn test_missing_or_truncated() {
        let table = [bios_info(), end()].concat();
        assert_eq!(find_system_uuid(&table), None);
        let mut truncated = bios_info();
        truncated.truncate(0x14);
        assert_eq!(find_system_uuid(&truncated), None);
    }

    #[test]
    fn test_format_swaps_leading_fields() {
        assert_eq!(format_uuid(&UUID), "00112233-4455-6677-8899-aabbccddeeff");
    }

    #[test]
    fn test_entry_points() {
        let mut ep = alloc::vec![0u8; 0x1f];
        ep[..4].copy_from_slice(b"_SM_");
        ep[0x10..0x15].copy_from_slice(b"_DMI_");
        ep[0x16..0x18].copy_from_slice(&0x0123u16.to_le_bytes());
        ep[0x18..0x1c].copy_from_slice(&0x000f_0000u32.to_le_bytes());
        assert_eq!(parse_entry_point(&ep), Some(StructureTable { address: 0xf0000, length: 0x123 }));
        assert_eq!(parse_entry_point3(&ep), None);

        let mut ep3 = alloc::vec![0u8; 0x18];
        ep3[..5].copy_from_slice(b"_SM3_");
        ep3[0x0c..0x10].copy_from_slice(&0x2000u32.to_le_bytes());
        ep3[0x10..0x18].copy_from_slice(&0x7f00_0000u64.to_le_bytes());
        assert_eq!(parse_entry_point3(&ep3), Some(StructureTable { address: 0x7f00_0000, length: 0x2000 }));
    }
}
