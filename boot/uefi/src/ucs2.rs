//! UCS-2 string conversion
//!
//! Firmware strings are NUL-terminated UCS-2. Characters outside the basic
//! multilingual plane have no UCS-2 form and are replaced.

use alloc::string::String;
use alloc::vec::Vec;

/// Stand-in for characters UCS-2 cannot carry
const REPLACEMENT: u16 = b'?' as u16;

fn push_char(out: &mut Vec<u16>, c: char) {
    let mut units = [0u16; 2];
    match c.encode_utf16(&mut units) {
        [unit] => out.push(*unit),
        _ => out.push(REPLACEMENT),
    }
}

/// NUL-terminated UCS-2 copy of `text`
pub fn encode(text: &str) -> Vec<u16> {
    let mut out = Vec::with_capacity(text.len() + 1);
    for c in text.chars() {
        push_char(&mut out, c);
    }
    out.push(0);
    out
}

/// NUL-terminated UCS-2 copy of `text` for the text console
///
/// Line feeds become CR LF.
pub fn encode_console(text: &str) -> Vec<u16> {
    let mut out = Vec::with_capacity(text.len() + 8);
    for c in text.chars() {
        if c == '\n' {
            out.push(u16::from(b'\r'));
        }
        push_char(&mut out, c);
    }
    out.push(0);
    out
}

/// Decode UCS-2 units up to the first NUL
pub fn decode(units: &[u16]) -> String {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    char::decode_utf16(units[..end].iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Decode a firmware string of at most `size` bytes
///
/// # Safety
/// `ptr` must be null or valid for `size` bytes.
pub unsafe fn decode_raw(ptr: *const u16, size: usize) -> Option<String> {
    if ptr.is_null() || size < 2 {
        return None;
    }
    // SAFETY: caller guarantees `size` readable bytes.
    let units = unsafe { core::slice::from_raw_parts(ptr, size / 2) };
    Some(decode(units))
}
