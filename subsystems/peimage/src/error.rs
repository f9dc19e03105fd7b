//! Error types for the image loader
//!
//! Every stage of a load attempt (fat selection, header parse, mapping,
//! relocation, validation, launch) fails with one of these kinds. A failure
//! is terminal for the attempt; the caller decides what to boot next.

use core::fmt;
use netchain_hal::Status;

/// Result type for loader operations
pub type Result<T> = core::result::Result<T, Error>;

/// Loader error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Format Errors
    // =========================================================================

    /// Buffer ends before a structure the headers declare
    TruncatedImage,

    /// DOS stub magic or PE signature mismatch
    NotPeCoff,

    /// COFF machine field is not the native machine
    UnsupportedMachine(u16),

    /// Optional header subsystem is not an EFI application
    NotEfiApplication,

    /// Section alignment is not a power of two
    InvalidAlignment,

    /// A section aliases the header region
    SectionInsideHeader,

    /// A section (or the entry point) lies beyond the declared image size
    SectionOutsideImage,

    // =========================================================================
    // Resource Errors
    // =========================================================================

    /// Page allocation failed
    OutOfMemory,

    // =========================================================================
    // Relocation Errors
    // =========================================================================

    /// Relocation directory, block or fixup site outside the image
    RelocationOutOfBounds {
        /// Image offset of the offending block or fixup
        offset: u32,
    },

    /// Relocation type not valid for the image machine
    UnsupportedRelocationType {
        /// Relocation type (high 4 bits of the entry)
        kind: u8,
        /// Image offset of the relocation entry
        offset: u32,
    },

    /// Corrupt relocation stream (unpaired RISC-V high/low fixups)
    BadRelocation,

    // =========================================================================
    // Selection, Validation and Launch Errors
    // =========================================================================

    /// Fat binary has no sub-image for the native CPU
    NoCompatibleArch,

    /// Platform verifier rejected the image
    SignatureInvalid,

    /// Platform verifier could not be located
    ValidatorUnavailable,

    /// Control could not be transferred to the image
    LaunchFailed(Status),
}

impl Error {
    /// Check if this is an image format error
    pub fn is_format_error(&self) -> bool {
        matches!(self,
            Self::TruncatedImage |
            Self::NotPeCoff |
            Self::UnsupportedMachine(_) |
            Self::NotEfiApplication |
            Self::InvalidAlignment |
            Self::SectionInsideHeader |
            Self::SectionOutsideImage |
            Self::NoCompatibleArch
        )
    }

    /// Check if this is a relocation error
    pub fn is_relocation_error(&self) -> bool {
        matches!(self,
            Self::RelocationOutOfBounds { .. } |
            Self::UnsupportedRelocationType { .. } |
            Self::BadRelocation
        )
    }

    /// Check if this is a security error
    pub fn is_security_error(&self) -> bool {
        matches!(self, Self::SignatureInvalid | Self::ValidatorUnavailable)
    }

    /// Get error name as string
    pub fn name(&self) -> &'static str {
        match self {
            Self::TruncatedImage => "TRUNCATED_IMAGE",
            Self::NotPeCoff => "NOT_PE_COFF",
            Self::UnsupportedMachine(_) => "UNSUPPORTED_MACHINE",
            Self::NotEfiApplication => "NOT_EFI_APPLICATION",
            Self::InvalidAlignment => "INVALID_ALIGNMENT",
            Self::SectionInsideHeader => "SECTION_INSIDE_HEADER",
            Self::SectionOutsideImage => "SECTION_OUTSIDE_IMAGE",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::RelocationOutOfBounds { .. } => "RELOCATION_OUT_OF_BOUNDS",
            Self::UnsupportedRelocationType { .. } => "UNSUPPORTED_RELOCATION_TYPE",
            Self::BadRelocation => "BAD_RELOCATION",
            Self::NoCompatibleArch => "NO_COMPATIBLE_ARCH",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::ValidatorUnavailable => "VALIDATOR_UNAVAILABLE",
            Self::LaunchFailed(_) => "LAUNCH_FAILED",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMachine(machine) => {
                write!(f, "{}: machine {:#06x}", self.name(), machine)
            }
            Self::RelocationOutOfBounds { offset } => {
                write!(f, "{}: offset {:#010x}", self.name(), offset)
            }
            Self::UnsupportedRelocationType { kind, offset } => {
                write!(f, "{}: type {}, rva {:#010x}", self.name(), kind, offset)
            }
            Self::LaunchFailed(status) => write!(f, "{}: {}", self.name(), status),
            _ => f.write_str(self.name()),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::OutOfMemory => Status::OUT_OF_RESOURCES,
            Error::UnsupportedMachine(_) | Error::NotEfiApplication | Error::NoCompatibleArch => {
                Status::UNSUPPORTED
            }
            Error::SignatureInvalid => Status::SECURITY_VIOLATION,
            Error::ValidatorUnavailable => Status::NOT_FOUND,
            Error::LaunchFailed(status) => status,
            _ => Status::LOAD_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_error_display() {
        let err = Error::UnsupportedRelocationType { kind: 9, offset: 0x2004 };
        assert_eq!(format!("{}", err), "UNSUPPORTED_RELOCATION_TYPE: type 9, rva 0x00002004");
        assert_eq!(format!("{}", Error::UnsupportedMachine(0x1c4)), "UNSUPPORTED_MACHINE: machine 0x01c4");
        assert_eq!(format!("{}", Error::BadRelocation), "BAD_RELOCATION");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::TruncatedImage.is_format_error());
        assert!(Error::BadRelocation.is_relocation_error());
        assert!(Error::SignatureInvalid.is_security_error());
        assert!(!Error::OutOfMemory.is_format_error());
    }

    #[test]
    fn test_error_to_status() {
        assert_eq!(Status::from(Error::OutOfMemory), Status::OUT_OF_RESOURCES);
        assert_eq!(Status::from(Error::SignatureInvalid), Status::SECURITY_VIOLATION);
        assert_eq!(Status::from(Error::LaunchFailed(Status::NOT_STARTED)), Status::NOT_STARTED);
        assert_eq!(Status::from(Error::NotPeCoff), Status::LOAD_ERROR);
    }
}
