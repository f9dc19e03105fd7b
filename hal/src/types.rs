//! Firmware value types: handles, status codes and GUIDs.

use core::fmt;

// =============================================================================
// HANDLE
// =============================================================================

/// Opaque firmware handle
///
/// The firmware glue converts its pointer handles into this integer form so
/// handles can be compared, stored in maps and passed between crates
/// without raw pointers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Handle(pub usize);

impl Handle {
    /// Null handle
    pub const NULL: Self = Self(0);

    /// Check if this is a null handle
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Firmware status code
///
/// The high bit indicates an error (1) vs warning/success (0).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub u64);

impl Status {
    const ERROR_BIT: u64 = 1u64 << 63;

    /// Success
    pub const SUCCESS: Self = Self(0);

    pub const LOAD_ERROR: Self = Self(Self::ERROR_BIT | 1);
    pub const INVALID_PARAMETER: Self = Self(Self::ERROR_BIT | 2);
    pub const UNSUPPORTED: Self = Self(Self::ERROR_BIT | 3);
    pub const BUFFER_TOO_SMALL: Self = Self(Self::ERROR_BIT | 5);
    pub const NOT_READY: Self = Self(Self::ERROR_BIT | 6);
    pub const DEVICE_ERROR: Self = Self(Self::ERROR_BIT | 7);
    pub const OUT_OF_RESOURCES: Self = Self(Self::ERROR_BIT | 9);
    pub const NOT_FOUND: Self = Self(Self::ERROR_BIT | 14);
    pub const ACCESS_DENIED: Self = Self(Self::ERROR_BIT | 15);
    pub const TIMEOUT: Self = Self(Self::ERROR_BIT | 18);
    pub const NOT_STARTED: Self = Self(Self::ERROR_BIT | 19);
    pub const ABORTED: Self = Self(Self::ERROR_BIT | 21);
    pub const TFTP_ERROR: Self = Self(Self::ERROR_BIT | 23);
    pub const SECURITY_VIOLATION: Self = Self(Self::ERROR_BIT | 26);

    /// Create a status from a raw code
    pub const fn new(code: u64) -> Self {
        Self(code)
    }

    /// Is success
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Is error
    pub const fn is_error(self) -> bool {
        (self.0 & Self::ERROR_BIT) != 0
    }

    /// Code without the error bit
    pub const fn code(self) -> u64 {
        self.0 & !Self::ERROR_BIT
    }

    /// Convert to a `Result`, keeping the status as the error
    pub fn to_result(self) -> Result<(), Self> {
        if self.is_error() {
            Err(self)
        } else {
            Ok(())
        }
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::LOAD_ERROR => "LOAD_ERROR",
            Self::INVALID_PARAMETER => "INVALID_PARAMETER",
            Self::UNSUPPORTED => "UNSUPPORTED",
            Self::BUFFER_TOO_SMALL => "BUFFER_TOO_SMALL",
            Self::NOT_READY => "NOT_READY",
            Self::DEVICE_ERROR => "DEVICE_ERROR",
            Self::OUT_OF_RESOURCES => "OUT_OF_RESOURCES",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::ACCESS_DENIED => "ACCESS_DENIED",
            Self::TIMEOUT => "TIMEOUT",
            Self::NOT_STARTED => "NOT_STARTED",
            Self::ABORTED => "ABORTED",
            Self::TFTP_ERROR => "TFTP_ERROR",
            Self::SECURITY_VIOLATION => "SECURITY_VIOLATION",
            _ => return None,
        })
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({})", self)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None if self.is_error() => write!(f, "ERROR({})", self.code()),
            None => write!(f, "WARNING({})", self.code()),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

// =============================================================================
// GUID
// =============================================================================

/// Globally Unique Identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Guid {
    /// First component (big-endian in textual representation)
    pub data1: u32,
    /// Second component
    pub data2: u16,
    /// Third component
    pub data3: u16,
    /// Fourth component (array of 8 bytes)
    pub data4: [u8; 8],
}

impl Guid {
    /// Create a GUID from its components
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self { data1, data2, data3, data4 }
    }

    /// `EFI_GLOBAL_VARIABLE`, vendor of `SecureBoot` and `SetupMode`
    pub const GLOBAL_VARIABLE: Self = Self::new(
        0x8be4_df61, 0x93ca, 0x11d2,
        [0xaa, 0x0d, 0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c],
    );

    /// Shim lock protocol, the image verifier installed by shim
    pub const SHIM_LOCK: Self = Self::new(
        0x605d_ab50, 0xe046, 0x4300,
        [0xab, 0xb6, 0x3d, 0xd8, 0x10, 0xdd, 0x8b, 0x23],
    );
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3,
            self.data4[0], self.data4[1],
            self.data4[2], self.data4[3], self.data4[4],
            self.data4[5], self.data4[6], self.data4[7])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_status_classification() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status::SUCCESS.is_error());
        assert!(Status::LOAD_ERROR.is_error());
        assert_eq!(Status::LOAD_ERROR.code(), 1);
        assert_eq!(Status::SECURITY_VIOLATION.to_result(), Err(Status::SECURITY_VIOLATION));
        assert_eq!(Status::SUCCESS.to_result(), Ok(()));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", Status::TFTP_ERROR), "TFTP_ERROR");
        assert_eq!(format!("{}", Status::new((1u64 << 63) | 99)), "ERROR(99)");
        assert_eq!(format!("{}", Status::new(4)), "WARNING(4)");
    }

    #[test]
    fn test_guid_display() {
        assert_eq!(
            format!("{}", Guid::SHIM_LOCK),
            "605dab50-e046-4300-abb6-3dd810dd8b23"
        );
    }
}
