//! # Menu Request Retry
//!
//! A missing menu usually means the server is overloaded, so the request
//! is repeated after a pseudo-random delay. The generator is seeded from
//! the client MAC address so that clients booting at the same moment
//! spread their retries.

use crate::bms::BmsClient;
use crate::{Platform, Result};
use alloc::vec::Vec;
use netchain_hal::{Console, Key, MacAddr};

/// Upper bound of the retry delay in seconds
pub const MAX_DELAY_SECS: u32 = 20;

/// Delay used when no random delay can be drawn
pub const FALLBACK_DELAY_MS: u32 = 10_000;

const LCG_MODULUS: i64 = 2_147_483_563;

/// L'Ecuyer linear congruential generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRng {
    seed: i32,
    state: i64,
}

impl RetryRng {
    /// Generator with an explicit seed
    pub const fn new(seed: i32) -> Self {
        Self { seed, state: seed as i64 }
    }

    /// Generator seeded with the first four MAC bytes, little-endian
    pub const fn from_mac(mac: MacAddr) -> Self {
        let b = mac.bytes;
        Self::new(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// The seed
    pub const fn seed(&self) -> i32 {
        self.seed
    }

    /// Next value in `0..2147483563`
    pub fn next_value(&mut self) -> i64 {
        let q = self.state / 53_668;
        self.state = 40_014 * (self.state - 53_668 * q) - 12_211 * q;
        if self.state < 0 {
            self.state += LCG_MODULUS;
        }
        self.state
    }

    /// Next retry delay in milliseconds
    ///
    /// In `1000..=max_delay_secs * 1000`; [`FALLBACK_DELAY_MS`] when the
    /// seed or the maximum is zero.
    pub fn next_delay_ms(&mut self, max_delay_secs: u32) -> u32 {
        if self.seed == 0 || max_delay_secs == 0 {
            return FALLBACK_DELAY_MS;
        }
        let max_ms = i64::from(max_delay_secs) * 1000;
        let delay = (1 + self.next_value().rem_euclid(max_ms)).clamp(1000, max_ms);
        u32::try_from(delay).unwrap_or(FALLBACK_DELAY_MS)
    }
}

/// Wait up to `delay_ms` for `key`
///
/// Other keys are ignored. Returns `true` if `key` was pressed.
pub fn wait_for_key(console: &dyn Console, key: Key, delay_ms: u32) -> bool {
    let start = console.ticks_ms();
    let deadline = start + u64::from(delay_ms);

    loop {
        let now = console.ticks_ms();
        if now >= deadline {
            return false;
        }
        let remaining = u32::try_from(deadline - now).unwrap_or(u32::MAX);
        match console.read_key(remaining) {
            Some(pressed) if pressed == key => return true,
            _ => {}
        }
    }
}

/// How often and how long to retry the menu request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    /// Upper bound of the delay between attempts in seconds
    pub max_delay_secs: u32,
}

impl RetryPolicy {
    /// `retries` extra attempts with the default maximum delay
    pub const fn new(retries: u32) -> Self {
        Self { retries, max_delay_secs: MAX_DELAY_SECS }
    }
}

/// Fetch the menu file, retrying according to `policy`
///
/// ESC during a wait gives up and returns the last error.
pub fn load_with_retry(
    platform: &Platform<'_>,
    client: &BmsClient<'_>,
    arch: u16,
    policy: RetryPolicy,
) -> Result<Vec<u8>> {
    let mut rng = RetryRng::from_mac(client.mac());

    if policy.retries > 0 {
        platform.print(format_args!(
            "Retries: {}, Max delay between retries: {} seconds\n",
            policy.retries, policy.max_delay_secs
        ));
        platform.debug_print(format_args!("Random seed: {:08x}\n", rng.seed()));
    }

    let mut result = client.load_menu(arch);
    let mut remaining = policy.retries;

    while remaining > 0 {
        let err = match result {
            Ok(_) => break,
            Err(err) => err,
        };
        log::debug!("menu request to {} failed: {}", client.server(), err);

        let delay = rng.next_delay_ms(policy.max_delay_secs);
        platform.print(format_args!(
            "Did not get menu, retrying in {}.{:03} seconds (Press ESC to abort)...\n",
            delay / 1000,
            delay % 1000
        ));
        if wait_for_key(platform.console, Key::Escape, delay) {
            platform.print(format_args!("\nEsc Pressed. Aborting retry...\n"));
            break;
        }

        result = client.load_menu(arch);
        remaining -= 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bms::{request_filename, Action};
    use crate::BootError;
    use netchain_hal::mock::MockPlatform;
    use netchain_hal::Ipv4Addr;

    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn menu_name(platform: &MockPlatform) -> alloc::string::String {
        request_filename(platform.state().mac, None, &Action::Menu { arch: 7 })
    }

    #[test]
    fn test_lcg_sequence() {
        let mut rng = RetryRng::new(1);
        assert_eq!(rng.next_value(), 40_014);
        assert_eq!(rng.next_value(), 1_601_120_196);

        let mut rng = RetryRng::new(53_668);
        assert_eq!(rng.next_value(), LCG_MODULUS - 12_211);
    }

    #[test]
    fn test_seed_from_mac() {
        let rng = RetryRng::from_mac(MacAddr::new(0x01, 0x02, 0x03, 0x04, 0xff, 0xff));
        assert_eq!(rng.seed(), 0x0403_0201);
    }

    #[test]
    fn test_delay_bounds() {
        let mut rng = RetryRng::new(0x0403_0201);
        for _ in 0..1000 {
            let delay = rng.next_delay_ms(MAX_DELAY_SECS);
            assert!((1000..=20_000).contains(&delay));
        }
        // 1 + 40014 % 20000 = 15
        assert_eq!(RetryRng::new(1).next_delay_ms(MAX_DELAY_SECS), 1000);
    }

    #[test]
    fn test_fallback_delay() {
        assert_eq!(RetryRng::new(0).next_delay_ms(MAX_DELAY_SECS), FALLBACK_DELAY_MS);
        assert_eq!(RetryRng::new(5).next_delay_ms(0), FALLBACK_DELAY_MS);
    }

    #[test]
    fn test_wait_for_key() {
        let platform = MockPlatform::new();
        platform.push_keys(&[Some(Key::Char('a')), Some(Key::Escape)]);
        assert!(wait_for_key(&platform, Key::Escape, 5000));

        assert!(!wait_for_key(&platform, Key::Escape, 3000));
        assert_eq!(platform.state().clock_ms, 3000);
        assert!(!wait_for_key(&platform, Key::Escape, 0));
    }

    #[test]
    fn test_first_attempt_succeeds() {
        let mock = MockPlatform::new();
        mock.add_file(SERVER, &menu_name(&mock), b"menu");
        let platform = Platform::new(&mock);
        let client = BmsClient::new(&mock, SERVER, mock.state().mac, None);

        assert_eq!(load_with_retry(&platform, &client, 7, RetryPolicy::new(3)).unwrap(), b"menu");
        assert!(mock.state().key_timeouts.is_empty());
    }

    #[test]
    fn test_retry_until_served() {
        let mock = MockPlatform::new();
        let name = menu_name(&mock);
        mock.add_file(SERVER, &name, b"menu");
        mock.state().file_failures.insert(name, 2);
        let platform = Platform::new(&mock);
        let client = BmsClient::new(&mock, SERVER, mock.state().mac, None);

        assert_eq!(load_with_retry(&platform, &client, 7, RetryPolicy::new(3)).unwrap(), b"menu");
        let state = mock.state();
        assert_eq!(state.output.matches("Did not get menu, retrying in").count(), 2);
        assert!(state.output.contains("Retries: 3, Max delay between retries: 20 seconds"));
    }

    #[test]
    fn test_retries_exhausted() {
        let mock = MockPlatform::new();
        let platform = Platform::new(&mock);
        let client = BmsClient::new(&mock, SERVER, mock.state().mac, None);

        assert!(matches!(
            load_with_retry(&platform, &client, 7, RetryPolicy::new(2)),
            Err(BootError::Network(_))
        ));
        assert_eq!(mock.state().output.matches("retrying").count(), 2);
    }

    #[test]
    fn test_no_retries_configured() {
        let mock = MockPlatform::new();
        let platform = Platform::new(&mock);
        let client = BmsClient::new(&mock, SERVER, mock.state().mac, None);

        assert!(load_with_retry(&platform, &client, 7, RetryPolicy::new(0)).is_err());
        assert!(!mock.state().output.contains("Retries"));
    }

    #[test]
    fn test_escape_aborts_retry() {
        let mock = MockPlatform::new();
        mock.push_keys(&[Some(Key::Escape)]);
        let platform = Platform::new(&mock);
        let client = BmsClient::new(&mock, SERVER, mock.state().mac, None);

        assert!(load_with_retry(&platform, &client, 7, RetryPolicy::new(5)).is_err());
        let state = mock.state();
        assert!(state.output.contains("Esc Pressed"));
        assert_eq!(state.output.matches("retrying").count(), 1);
        assert!(state.tftp_reads.is_empty());
    }
}
