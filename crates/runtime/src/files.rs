//! File operations (`Viper.Files.*`)

use crate::error::{TrapKind, set_trap};
use crate::strings::{new_str, str_slice};

/// Read an entire file as a string. Traps on I/O failure.
///
/// # Safety
/// `path` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_file_slurp(path: *const u8) -> *mut u8 {
    if path.is_null() {
        set_trap(TrapKind::NullObject, "slurp of null path");
        return std::ptr::null_mut();
    }
    let path = unsafe { str_slice(path) };
    match std::fs::read_to_string(path) {
        Ok(text) => new_str(&text),
        Err(e) => {
            set_trap(TrapKind::Io, format!("cannot read '{}': {}", path, e));
            std::ptr::null_mut()
        }
    }
}

/// Write (create or truncate) a file. Traps on I/O failure.
///
/// # Safety
/// Both arguments must be live string handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_file_spit(path: *const u8, contents: *const u8) {
    if path.is_null() || contents.is_null() {
        set_trap(TrapKind::NullObject, "spit with null argument");
        return;
    }
    let (path, contents) = unsafe { (str_slice(path), str_slice(contents)) };
    if let Err(e) = std::fs::write(path, contents) {
        set_trap(TrapKind::Io, format!("cannot write '{}': {}", path, e));
    }
}

/// # Safety
/// `path` must be a live string handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_file_exists(path: *const u8) -> bool {
    if path.is_null() {
        return false;
    }
    std::path::Path::new(unsafe { str_slice(path) }).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{clear_trap, has_trap, take_trap};
    use crate::heap::rt_release;

    #[test]
    fn test_spit_slurp_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        unsafe {
            let p = new_str(path.to_str().unwrap());
            let body = new_str("line one\nline two\n");
            rt_file_spit(p, body);
            assert!(rt_file_exists(p));
            let back = rt_file_slurp(p);
            assert_eq!(str_slice(back), "line one\nline two\n");
            rt_release(p);
            rt_release(body);
            rt_release(back);
        }
    }

    #[test]
    fn test_slurp_missing_traps() {
        clear_trap();
        unsafe {
            let p = new_str("/definitely/not/here.vil");
            let out = rt_file_slurp(p);
            assert!(out.is_null());
            assert!(has_trap());
            take_trap();
            rt_release(p);
        }
    }
}
