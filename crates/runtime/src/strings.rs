//! String operations (`Viper.Strings.*`)
//!
//! Payloads are UTF-8 bytes, not null-terminated; the header length is
//! authoritative. Index arguments are byte offsets. All returned handles
//! arrive retained (refcount 1 owned by the caller).

use crate::error::{TrapKind, set_trap};
use crate::heap::{KIND_STR, alloc_payload, header};

/// Borrow a handle's payload as `&str`.
///
/// # Safety
/// `payload` must be a live `KIND_STR` handle.
pub unsafe fn str_slice<'a>(payload: *const u8) -> &'a str {
    unsafe {
        let len = header(payload).length as usize;
        std::str::from_utf8_unchecked(std::slice::from_raw_parts(payload, len))
    }
}

/// Allocate a fresh string handle from a Rust string.
pub fn new_str(s: &str) -> *mut u8 {
    let p = alloc_payload(KIND_STR, s.len() as u64, s.len() as u64);
    unsafe {
        std::ptr::copy_nonoverlapping(s.as_ptr(), p, s.len());
    }
    p
}

fn guard_null(payload: *const u8, what: &str) -> bool {
    if payload.is_null() {
        set_trap(TrapKind::NullObject, format!("{} on null string", what));
        return false;
    }
    true
}

/// Build a string handle from raw bytes (string-pool literals).
///
/// # Safety
/// `bytes..bytes+len` must be valid UTF-8 owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_new(bytes: *const u8, len: u64) -> *mut u8 {
    let p = alloc_payload(KIND_STR, len, len);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes, p, len as usize);
    }
    p
}

/// # Safety
/// Both operands must be live string handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_concat(a: *const u8, b: *const u8) -> *mut u8 {
    if !guard_null(a, "concat") || !guard_null(b, "concat") {
        return std::ptr::null_mut();
    }
    unsafe {
        let (sa, sb) = (str_slice(a), str_slice(b));
        let out = alloc_payload(KIND_STR, (sa.len() + sb.len()) as u64, (sa.len() + sb.len()) as u64);
        std::ptr::copy_nonoverlapping(sa.as_ptr(), out, sa.len());
        std::ptr::copy_nonoverlapping(sb.as_ptr(), out.add(sa.len()), sb.len());
        out
    }
}

/// # Safety
/// `s` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_len(s: *const u8) -> i64 {
    if !guard_null(s, "len") {
        return 0;
    }
    unsafe { header(s).length as i64 }
}

/// # Safety
/// Both operands must be live string handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_eq(a: *const u8, b: *const u8) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    unsafe { str_slice(a) == str_slice(b) }
}

/// Byte-range substring. Traps on out-of-range indices.
///
/// # Safety
/// `s` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_substr(s: *const u8, start: i64, len: i64) -> *mut u8 {
    if !guard_null(s, "substr") {
        return std::ptr::null_mut();
    }
    let text = unsafe { str_slice(s) };
    if start < 0 || len < 0 || (start as usize).saturating_add(len as usize) > text.len() {
        set_trap(
            TrapKind::Bounds,
            format!("substr {}..+{} of string length {}", start, len, text.len()),
        );
        return std::ptr::null_mut();
    }
    let (start, len) = (start as usize, len as usize);
    if !text.is_char_boundary(start) || !text.is_char_boundary(start + len) {
        set_trap(TrapKind::Bounds, "substr splits a UTF-8 sequence");
        return std::ptr::null_mut();
    }
    new_str(&text[start..start + len])
}

/// Byte value at index. Traps on out-of-range.
///
/// # Safety
/// `s` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_char_at(s: *const u8, idx: i64) -> i64 {
    if !guard_null(s, "char-at") {
        return 0;
    }
    unsafe {
        let len = header(s).length as i64;
        if idx < 0 || idx >= len {
            set_trap(TrapKind::Bounds, format!("index {} of string length {}", idx, len));
            return 0;
        }
        *s.add(idx as usize) as i64
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_str_from_i64(v: i64) -> *mut u8 {
    new_str(&v.to_string())
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_str_from_f64(v: f64) -> *mut u8 {
    new_str(&format_f64_user(v))
}

/// Parse a decimal integer; leading/trailing whitespace allowed.
///
/// # Safety
/// `s` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_to_i64(s: *const u8) -> i64 {
    if !guard_null(s, "to-i64") {
        return 0;
    }
    let text = unsafe { str_slice(s) };
    match text.trim().parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            set_trap(
                TrapKind::InvalidConversion,
                format!("'{}' is not an integer", text),
            );
            0
        }
    }
}

/// Canonical user-visible float text: `%.15g` semantics in the C locale,
/// with `NaN`, `Inf` and `-Inf` for the non-finite values.
pub fn format_f64_user(x: f64) -> String {
    format_g(x, 15)
}

fn format_g(x: f64, sig: usize) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if x == 0.0 {
        return "0".to_string();
    }
    // Decimal exponent of the value after rounding to `sig` digits.
    let sci = format!("{:.*e}", sig - 1, x);
    let (mantissa, exp) = sci.split_once('e').expect("exponential format");
    let exp: i32 = exp.parse().expect("exponent digits");
    if exp < -4 || exp >= sig as i32 {
        let mantissa = trim_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (sig as i32 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, x)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{clear_trap, has_trap, take_trap};
    use crate::heap::rt_release;

    #[test]
    fn test_concat_and_len() {
        unsafe {
            let a = new_str("foo");
            let b = new_str("bar");
            let c = rt_concat(a, b);
            assert_eq!(str_slice(c), "foobar");
            assert_eq!(rt_len(c), 6);
            rt_release(a);
            rt_release(b);
            rt_release(c);
        }
    }

    #[test]
    fn test_substr_bounds_trap() {
        clear_trap();
        unsafe {
            let s = new_str("hello");
            let out = rt_substr(s, 2, 10);
            assert!(out.is_null());
            assert!(has_trap());
            take_trap();
            rt_release(s);
        }
    }

    #[test]
    fn test_eq_ignores_identity() {
        unsafe {
            let a = new_str("same");
            let b = new_str("same");
            assert!(rt_str_eq(a, b));
            rt_release(a);
            rt_release(b);
        }
    }

    #[test]
    fn test_to_i64_trap_on_junk() {
        clear_trap();
        unsafe {
            let s = new_str("12x");
            assert_eq!(rt_str_to_i64(s), 0);
            assert!(has_trap());
            take_trap();
            rt_release(s);
        }
    }

    #[test]
    fn test_format_user_basics() {
        assert_eq!(format_f64_user(0.0), "0");
        assert_eq!(format_f64_user(42.0), "42");
        assert_eq!(format_f64_user(-1.5), "-1.5");
        assert_eq!(format_f64_user(0.1 + 0.2), "0.3");
        assert_eq!(format_f64_user(f64::NAN), "NaN");
        assert_eq!(format_f64_user(f64::INFINITY), "Inf");
        assert_eq!(format_f64_user(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_format_user_exponent_form() {
        assert_eq!(format_f64_user(1e300), "1e+300");
        assert_eq!(format_f64_user(1e-5), "1e-05");
        assert_eq!(format_f64_user(2.5e16), "2.5e+16");
        // 15 significant digits stay positional below the threshold
        assert_eq!(format_f64_user(123456789012345.0), "123456789012345");
    }
}
