//! Console I/O (`Viper.Console.*`)
//!
//! All numeric output uses the C locale and the canonical float formatter.
//! Output is flushed per call so interleaving with a host process stays
//! deterministic for the behavior tests.

use crate::error::{TrapKind, set_trap};
use crate::strings::{format_f64_user, new_str, str_slice};
use std::io::{BufRead, Write};

fn write_out(text: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if out.write_all(text.as_bytes()).and_then(|_| out.flush()).is_err() {
        set_trap(TrapKind::Io, "stdout write failed");
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_print_i64(v: i64) {
    write_out(&v.to_string());
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_print_f64(v: f64) {
    write_out(&format_f64_user(v));
}

/// # Safety
/// `s` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_print_str(s: *const u8) {
    if s.is_null() {
        set_trap(TrapKind::NullObject, "print of null string");
        return;
    }
    write_out(unsafe { str_slice(s) });
}

/// # Safety
/// `s` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_print_ln(s: *const u8) {
    if s.is_null() {
        set_trap(TrapKind::NullObject, "print of null string");
        return;
    }
    let mut text = unsafe { str_slice(s) }.to_string();
    text.push('\n');
    write_out(&text);
}

/// Read one line from stdin, without the trailing newline. EOF yields the
/// empty string.
#[unsafe(no_mangle)]
pub extern "C" fn rt_input_line() -> *mut u8 {
    let stdin = std::io::stdin();
    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            new_str(&line)
        }
        Err(e) => {
            set_trap(TrapKind::Io, format!("stdin read failed: {}", e));
            new_str("")
        }
    }
}
