//! Thin stdout helpers for the primitives compiled code can print. Strings
//! are written length-bounded; the runtime never assumes NUL termination.

use std::io::{self, Write};
use std::slice;

use crate::string::Str;

pub fn print_i32(value: i32) {
    let _ = write!(io::stdout(), "{}", value);
}

pub fn println_i32(value: i32) {
    let _ = writeln!(io::stdout(), "{}", value);
}

pub fn print_bool(value: bool) {
    let _ = write!(io::stdout(), "{}", value);
}

pub fn println_bool(value: bool) {
    let _ = writeln!(io::stdout(), "{}", value);
}

/// # Safety
/// `s` must be a live string.
pub unsafe fn print_str(s: *const Str) {
    if (*s).len != 0 {
        let bytes = slice::from_raw_parts((*s).data as *const u8, (*s).len);
        let _ = io::stdout().write_all(bytes);
    }
}

/// # Safety
/// `s` must be a live string.
pub unsafe fn println_str(s: *const Str) {
    print_str(s);
    let _ = io::stdout().write_all(b"\n");
}

pub fn flush() {
    let _ = io::stdout().flush();
}
