//! # Secure Boot Validation
//!
//! When the platform enforces Secure Boot, images are not mapped by this
//! crate at all: their signature is checked by the platform verifier (the
//! shim lock protocol) and, once accepted, the untouched bytes go to the
//! firmware's own loader.

use crate::{Error, Result};
use netchain_hal::{Firmware, Guid};

/// Secure Boot variable names
pub mod var_name {
    /// Secure Boot Enable
    pub const SECURE_BOOT: &str = "SecureBoot";
    /// Setup Mode
    pub const SETUP_MODE: &str = "SetupMode";
}

/// Is the platform in enforcing Secure Boot mode
///
/// `SecureBoot` must be a single byte equal to 1, and `SetupMode` must not
/// be a single byte equal to 1.
pub fn secure_mode(firmware: &dyn Firmware) -> bool {
    let is_one = |name: &str| {
        matches!(firmware.get_variable(name, &Guid::GLOBAL_VARIABLE).as_deref(), Some([1]))
    };

    let secure_boot = is_one(var_name::SECURE_BOOT);
    let setup_mode = is_one(var_name::SETUP_MODE);
    log::debug!("secure boot: {}, setup mode: {}", secure_boot, setup_mode);

    secure_boot && !setup_mode
}

/// Verify the signature of `raw` with the platform verifier
pub fn validate(firmware: &dyn Firmware, raw: &[u8]) -> Result<()> {
    let verifier = firmware.image_verifier().ok_or_else(|| {
        log::error!("image verifier {} not available", Guid::SHIM_LOCK);
        Error::ValidatorUnavailable
    })?;

    let status = verifier.verify(raw);
    if status.is_success() {
        log::info!("image signature verified ({} bytes)", raw.len());
        Ok(())
    } else {
        log::error!("image signature rejected: {}", status);
        Err(Error::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;
    use netchain_hal::mock::{MockPlatform, MockVerifier};

    fn platform_with(secure_boot: Option<&[u8]>, setup_mode: Option<&[u8]>) -> MockPlatform {
        let platform = MockPlatform::new();
        {
            let mut state = platform.state();
            if let Some(value) = secure_boot {
                state.variables.insert(var_name::SECURE_BOOT.to_string(), value.to_vec());
            }
            if let Some(value) = setup_mode {
                state.variables.insert(var_name::SETUP_MODE.to_string(), value.to_vec());
            }
        }
        platform
    }

    #[test]
    fn test_secure_mode_variables() {
        assert!(secure_mode(&platform_with(Some(&[1]), None)));
        assert!(secure_mode(&platform_with(Some(&[1]), Some(&[0]))));
        assert!(!secure_mode(&platform_with(Some(&[1]), Some(&[1]))));
        assert!(!secure_mode(&platform_with(Some(&[0]), None)));
        assert!(!secure_mode(&platform_with(None, None)));
        // wrong size does not count
        assert!(!secure_mode(&platform_with(Some(&[1, 0]), None)));
        assert!(secure_mode(&platform_with(Some(&[1]), Some(&[1, 0]))));
    }

    #[test]
    fn test_validate_accepts() {
        let platform = MockPlatform::new().with_verifier(MockVerifier::new(true));
        assert_eq!(validate(&platform, b"image"), Ok(()));
        assert_eq!(platform.verifier().unwrap().verified(), vec![b"image".to_vec()]);
    }

    #[test]
    fn test_validate_rejects() {
        let platform = MockPlatform::new().with_verifier(MockVerifier::new(false));
        assert_eq!(validate(&platform, b"image"), Err(Error::SignatureInvalid));
    }

    #[test]
    fn test_validate_without_verifier() {
        let platform = MockPlatform::new();
        assert_eq!(validate(&platform, b"image"), Err(Error::ValidatorUnavailable));
    }
}
