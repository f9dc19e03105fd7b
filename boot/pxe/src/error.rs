//! Error types for the boot orchestrator
//!
//! Every failure ends the network boot attempt; [`crate::start::BootClient::run`]
//! reports it and falls back to the local disk.

use core::fmt;
use netchain_hal::{HalError, Status};
use netchain_peimage::Error as ImageError;

/// Result type for orchestrator operations
pub type Result<T> = core::result::Result<T, BootError>;

/// Orchestrator error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    // =========================================================================
    // Environment
    // =========================================================================

    /// Not started from the network: PXE base code not started or no DHCP ACK
    NotNetBoot,

    /// Firmware network call failed
    Network(HalError),

    /// The DHCP discover packet carries no client architecture option
    NoArchitectureType,

    /// A server name could not be resolved
    DnsFailure,

    /// A caller-supplied value is unusable (empty name, no server address)
    InvalidArgument,

    // =========================================================================
    // Server Files
    // =========================================================================

    /// The configuration file exists but could not be read
    ConfigRead,

    /// Malformed menu file
    MenuParse,

    /// The menu file has more records than the menu can hold
    TooManyMenuEntries,

    /// A server request was answered with something other than `ok`
    ServerRejected,

    /// None of the configured servers offered a menu
    NoMenuOffered,

    // =========================================================================
    // Chainload
    // =========================================================================

    /// The image loader failed
    Image(ImageError),

    /// Firmware `LoadImage` failed
    LoadImage(Status),

    /// The started image reported an error
    StartImage(Status),
}

impl BootError {
    /// Is this a rejected image signature
    pub fn is_signature_error(&self) -> bool {
        matches!(self, Self::Image(ImageError::SignatureInvalid))
    }

    /// Is this a problem with a file served by the boot server
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead
                | Self::MenuParse
                | Self::TooManyMenuEntries
                | Self::ServerRejected
                | Self::NoMenuOffered
        )
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotNetBoot => "NOT_NET_BOOT",
            Self::Network(_) => "NETWORK",
            Self::NoArchitectureType => "NO_ARCHITECTURE_TYPE",
            Self::DnsFailure => "DNS_FAILURE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ConfigRead => "CONFIG_READ",
            Self::MenuParse => "MENU_PARSE",
            Self::TooManyMenuEntries => "TOO_MANY_MENU_ENTRIES",
            Self::ServerRejected => "SERVER_REJECTED",
            Self::NoMenuOffered => "NO_MENU_OFFERED",
            Self::Image(err) => err.name(),
            Self::LoadImage(_) => "LOAD_IMAGE",
            Self::StartImage(_) => "START_IMAGE",
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(err) => write!(f, "{}: {}", self.name(), err),
            Self::Image(err) => write!(f, "image: {}", err),
            Self::LoadImage(status) | Self::StartImage(status) => {
                write!(f, "{}: {}", self.name(), status)
            }
            _ => f.write_str(self.name()),
        }
    }
}

impl From<ImageError> for BootError {
    fn from(err: ImageError) -> Self {
        Self::Image(err)
    }
}

impl From<HalError> for BootError {
    fn from(err: HalError) -> Self {
        Self::Network(err)
    }
}

impl From<BootError> for Status {
    fn from(err: BootError) -> Self {
        match err {
            BootError::NotNetBoot => Status::NOT_STARTED,
            BootError::Network(err) => err.status(),
            BootError::DnsFailure => Status::NOT_FOUND,
            BootError::InvalidArgument => Status::INVALID_PARAMETER,
            BootError::ServerRejected => Status::ACCESS_DENIED,
            BootError::NoMenuOffered => Status::NOT_FOUND,
            BootError::Image(err) => err.into(),
            BootError::LoadImage(status) | BootError::StartImage(status) => status,
            _ => Status::LOAD_ERROR,
        }
    }
}
