//! `Console` on simple text in/out and `Stall`
//!
//! Boot services have no monotonic millisecond clock; the platform counts
//! the time it spends stalled, which is every wait the chainloader does.

use super::UefiPlatform;
use crate::raw::system_table::attr;
use crate::raw::{InputKey, Status};
use crate::ucs2;
use core::sync::atomic::Ordering;
use netchain_hal::{Console, Key};

/// Keyboard poll interval
const KEY_POLL_MS: u32 = 10;

impl UefiPlatform {
    /// Stall for `ms` milliseconds and advance the tick counter
    pub(super) fn stall_ms(&self, ms: u32) {
        if ms == 0 {
            return;
        }
        // SAFETY: boot services are live
        let _ = unsafe { (self.bs().stall)(ms as usize * 1000) };
        self.ticks.fetch_add(u64::from(ms), Ordering::Relaxed);
    }

    fn poll_key(&self) -> Option<Key> {
        // SAFETY: console input of the live system table
        let con_in = unsafe { self.st().con_in.as_mut() }?;
        let mut key = InputKey::default();
        // SAFETY: out-pointer is valid
        let status = unsafe { (con_in.read_key_stroke)(con_in, &mut key) };
        (status == Status::SUCCESS).then(|| Key::from_input_key(key.scan_code, key.unicode_char))
    }

    fn with_con_out(&self, f: impl FnOnce(&mut crate::raw::system_table::EfiSimpleTextOutputProtocol)) {
        // SAFETY: console output of the live system table
        if let Some(con_out) = unsafe { self.st().con_out.as_mut() } {
            f(con_out);
        }
    }
}

impl Console for UefiPlatform {
    fn print(&self, text: &str) {
        let units = ucs2::encode_console(text);
        self.with_con_out(|out| {
            // SAFETY: NUL-terminated string
            let _ = unsafe { (out.output_string)(out, units.as_ptr()) };
        });
    }

    fn clear(&self) {
        self.with_con_out(|out| {
            // SAFETY: protocol of the live system table
            let _ = unsafe { (out.clear_screen)(out) };
        });
    }

    fn cursor(&self) -> (usize, usize) {
        let mut position = (0, 0);
        self.with_con_out(|out| {
            // SAFETY: mode data owned by the protocol
            if let Some(mode) = unsafe { out.mode.as_ref() } {
                position = (
                    usize::try_from(mode.cursor_column).unwrap_or(0),
                    usize::try_from(mode.cursor_row).unwrap_or(0),
                );
            }
        });
        position
    }

    fn set_cursor(&self, column: usize, row: usize) {
        self.with_con_out(|out| {
            // SAFETY: protocol of the live system table
            let _ = unsafe { (out.set_cursor_position)(out, column, row) };
        });
    }

    fn set_highlight(&self, highlight: bool) {
        let attribute = if highlight { attr::HIGHLIGHT } else { attr::NORMAL };
        self.with_con_out(|out| {
            // SAFETY: protocol of the live system table
            let _ = unsafe { (out.set_attribute)(out, attribute) };
        });
    }

    fn read_key(&self, timeout_ms: u32) -> Option<Key> {
        let mut waited = 0u32;
        loop {
            if let Some(key) = self.poll_key() {
                return Some(key);
            }
            if timeout_ms != 0 && waited >= timeout_ms {
                return None;
            }
            self.stall_ms(KEY_POLL_MS);
            waited = waited.saturating_add(KEY_POLL_MS);
        }
    }

    fn sleep_ms(&self, ms: u32) {
        self.stall_ms(ms);
    }

    fn ticks_ms(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
