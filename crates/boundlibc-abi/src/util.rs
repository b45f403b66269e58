//! Shared internal utilities for ABI adapters.
//!
//! Everything here is usable from inside `memcpy`: no allocation, no
//! `std::fmt`, no stdio locks.

use std::ffi::c_void;

/// Write all of `bytes` to stderr with raw `write(2)` calls. Errors are
/// dropped; this only runs on the way to `abort`.
pub(crate) fn write_stderr(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is a valid readable slice for its length.
        let written =
            unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast::<c_void>(), bytes.len()) };
        if written <= 0 {
            return;
        }
        bytes = &bytes[written as usize..];
    }
}

/// Longest output of [`format_hex`]: `0x` plus 16 digits.
pub(crate) const HEX_BUF_LEN: usize = 18;

/// Format `value` as `0x`-prefixed lowercase hex into `buf`.
pub(crate) fn format_hex(value: usize, buf: &mut [u8; HEX_BUF_LEN]) -> &[u8] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut digits = [0_u8; 16];
    let mut count = 0;
    let mut rest = value;
    loop {
        digits[count] = DIGITS[rest & 0xf];
        count += 1;
        rest >>= 4;
        if rest == 0 {
            break;
        }
    }
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..count {
        buf[2 + i] = digits[count - 1 - i];
    }
    &buf[..2 + count]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formatting() {
        let mut buf = [0_u8; HEX_BUF_LEN];
        assert_eq!(format_hex(0, &mut buf), b"0x0");
        assert_eq!(format_hex(0x1f, &mut buf), b"0x1f");
        assert_eq!(format_hex(0xdead_beef, &mut buf), b"0xdeadbeef");
        let max = format!("{:#x}", usize::MAX);
        assert_eq!(format_hex(usize::MAX, &mut buf), max.as_bytes());
    }
}
