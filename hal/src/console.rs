//! # Console Interface
//!
//! Text output, keyboard polling and delays.

use core::fmt;

/// Key press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Character key
    Char(char),
    /// Enter key
    Enter,
    /// Escape key
    Escape,
    /// Backspace key
    Backspace,
    /// Up arrow
    Up,
    /// Down arrow
    Down,
    /// Function key (F1-F12)
    Function(u8),
    /// Unknown key
    Unknown(u16),
}

impl Key {
    /// Decode a firmware input key (scan code, UCS-2 character)
    pub fn from_input_key(scan_code: u16, unicode_char: u16) -> Self {
        match scan_code {
            0x01 => Self::Up,
            0x02 => Self::Down,
            0x0B..=0x16 => Self::Function((scan_code - 0x0A) as u8),
            0x17 => Self::Escape,
            0x00 => match unicode_char {
                0x0008 => Self::Backspace,
                0x000D => Self::Enter,
                0x001B => Self::Escape,
                c if (0x20..0x7F).contains(&c) => Self::Char(c as u8 as char),
                _ => Self::Unknown(unicode_char),
            },
            s => Self::Unknown(s),
        }
    }

    /// Get the digit value if this is a decimal digit key
    pub fn as_digit(&self) -> Option<u32> {
        match self {
            Self::Char(c) => c.to_digit(10),
            _ => None,
        }
    }
}

/// Text console capability
pub trait Console {
    /// Write text at the cursor
    fn print(&self, text: &str);

    /// Clear the screen and home the cursor
    fn clear(&self);

    /// Current cursor position (column, row)
    fn cursor(&self) -> (usize, usize);

    /// Move the cursor
    fn set_cursor(&self, column: usize, row: usize);

    /// Switch between normal and highlighted text attributes
    fn set_highlight(&self, highlight: bool);

    /// Wait up to `timeout_ms` for a key; `0` waits forever
    fn read_key(&self, timeout_ms: u32) -> Option<Key>;

    /// Busy-wait for `ms` milliseconds
    fn sleep_ms(&self, ms: u32);

    /// Monotonic millisecond counter
    fn ticks_ms(&self) -> u64;
}

/// `fmt::Write` adapter so `write!` can target a [`Console`]
pub struct ConsoleWriter<'a, C: Console + ?Sized>(pub &'a C);

impl<C: Console + ?Sized> fmt::Write for ConsoleWriter<'_, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.print(s);
        Ok(())
    }
}

impl<C: Console + ?Sized> fmt::Debug for ConsoleWriter<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsoleWriter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_input() {
        assert_eq!(Key::from_input_key(0x01, 0), Key::Up);
        assert_eq!(Key::from_input_key(0x12, 0), Key::Function(8));
        assert_eq!(Key::from_input_key(0x17, 0), Key::Escape);
        assert_eq!(Key::from_input_key(0, 0x0D), Key::Enter);
        assert_eq!(Key::from_input_key(0, u16::from(b'3')), Key::Char('3'));
        assert_eq!(Key::from_input_key(0, 0x7F), Key::Unknown(0x7F));
    }

    #[test]
    fn test_key_digit() {
        assert_eq!(Key::Char('7').as_digit(), Some(7));
        assert_eq!(Key::Char('x').as_digit(), None);
        assert_eq!(Key::Enter.as_digit(), None);
    }
}
