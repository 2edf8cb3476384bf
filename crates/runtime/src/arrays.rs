//! Array operations (`Viper.Arrays.*`, i64 element family)
//!
//! Arrays are refcounted handles like strings; `length`/`capacity` count
//! elements. Mutating operations are copy-on-write: with a shared handle
//! (refcount > 1) they clone the payload, apply the write to the clone,
//! release the original reference and return the clone. Callers must
//! always adopt the returned handle.

use crate::error::{TrapKind, set_trap};
use crate::heap::{KIND_ARR_I64, alloc_payload, header, header_mut, rt_release, rt_retain};

unsafe fn elems<'a>(payload: *const u8) -> &'a [i64] {
    unsafe {
        let len = header(payload).length as usize;
        std::slice::from_raw_parts(payload as *const i64, len)
    }
}

unsafe fn elems_mut<'a>(payload: *mut u8) -> &'a mut [i64] {
    unsafe {
        let len = header(payload).length as usize;
        std::slice::from_raw_parts_mut(payload as *mut i64, len)
    }
}

fn guard_null(payload: *const u8, what: &str) -> bool {
    if payload.is_null() {
        set_trap(TrapKind::NullObject, format!("{} on null array", what));
        return false;
    }
    true
}

/// Clone payload into a fresh handle with the given capacity.
unsafe fn clone_with_capacity(payload: *const u8, capacity: u64) -> *mut u8 {
    unsafe {
        let h = header(payload);
        let out = alloc_payload(KIND_ARR_I64, h.length, capacity);
        std::ptr::copy_nonoverlapping(
            payload as *const i64,
            out as *mut i64,
            h.length as usize,
        );
        out
    }
}

/// Allocate a zero-filled array. Traps on negative length.
#[unsafe(no_mangle)]
pub extern "C" fn rt_arr_i64_new(len: i64) -> *mut u8 {
    if len < 0 {
        set_trap(TrapKind::Bounds, format!("array length {}", len));
        return std::ptr::null_mut();
    }
    alloc_payload(KIND_ARR_I64, len as u64, len.max(1) as u64)
}

/// # Safety
/// `a` must be a live i64-array handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_arr_i64_len(a: *const u8) -> i64 {
    if !guard_null(a, "len") {
        return 0;
    }
    unsafe { header(a).length as i64 }
}

/// # Safety
/// `a` must be a live i64-array handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_arr_i64_get(a: *const u8, idx: i64) -> i64 {
    if !guard_null(a, "get") {
        return 0;
    }
    unsafe {
        let len = header(a).length as i64;
        if idx < 0 || idx >= len {
            set_trap(TrapKind::Bounds, format!("index {} of array length {}", idx, len));
            return 0;
        }
        elems(a)[idx as usize]
    }
}

/// Store an element, copy-on-write under sharing. Returns the handle that
/// now holds the write.
///
/// # Safety
/// `a` must be a live i64-array handle; the caller's reference is consumed
/// and replaced by the returned one.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_arr_i64_set(a: *mut u8, idx: i64, value: i64) -> *mut u8 {
    if !guard_null(a, "set") {
        return std::ptr::null_mut();
    }
    unsafe {
        let h = header(a);
        if idx < 0 || idx >= h.length as i64 {
            set_trap(
                TrapKind::Bounds,
                format!("index {} of array length {}", idx, h.length),
            );
            return a;
        }
        let target = if h.refcount > 1 {
            let copy = clone_with_capacity(a, h.capacity);
            rt_release(a);
            copy
        } else {
            a
        };
        elems_mut(target)[idx as usize] = value;
        target
    }
}

/// Append an element, growing geometrically. Copy-on-write under sharing;
/// returns the surviving handle.
///
/// # Safety
/// `a` must be a live i64-array handle; the caller's reference is consumed
/// and replaced by the returned one.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_arr_i64_push(a: *mut u8, value: i64) -> *mut u8 {
    if !guard_null(a, "push") {
        return std::ptr::null_mut();
    }
    unsafe {
        let h = header(a);
        let needs_copy = h.refcount > 1 || h.length == h.capacity;
        let target = if needs_copy {
            let capacity = if h.length == h.capacity {
                (h.capacity * 2).max(1)
            } else {
                h.capacity
            };
            let copy = clone_with_capacity(a, capacity);
            rt_release(a);
            copy
        } else {
            a
        };
        let th = header_mut(target);
        let at = th.length as usize;
        th.length += 1;
        std::ptr::write((target as *mut i64).add(at), value);
        target
    }
}

/// Retain-for-copy entry used by the VM when an array value is duplicated.
///
/// # Safety
/// `a` must be a live i64-array handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_arr_i64_share(a: *mut u8) -> *mut u8 {
    unsafe {
        rt_retain(a);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{clear_trap, has_trap, take_trap};
    use crate::heap::rt_refcount;

    #[test]
    fn test_new_get_set_in_place() {
        unsafe {
            let a = rt_arr_i64_new(3);
            let a = rt_arr_i64_set(a, 1, 42);
            assert_eq!(rt_arr_i64_get(a, 1), 42);
            assert_eq!(rt_arr_i64_get(a, 0), 0);
            assert_eq!(rt_arr_i64_len(a), 3);
            rt_release(a);
        }
    }

    #[test]
    fn test_set_copies_when_shared() {
        unsafe {
            let a = rt_arr_i64_new(2);
            let a = rt_arr_i64_set(a, 0, 7);
            rt_retain(a); // second owner
            let b = rt_arr_i64_set(a, 0, 9);
            assert_ne!(a, b, "shared mutation must copy");
            assert_eq!(rt_arr_i64_get(a, 0), 7);
            assert_eq!(rt_arr_i64_get(b, 0), 9);
            assert_eq!(rt_refcount(a), 1);
            assert_eq!(rt_refcount(b), 1);
            rt_release(a);
            rt_release(b);
        }
    }

    #[test]
    fn test_push_grows() {
        unsafe {
            let mut a = rt_arr_i64_new(0);
            for i in 0..100 {
                a = rt_arr_i64_push(a, i);
            }
            assert_eq!(rt_arr_i64_len(a), 100);
            assert_eq!(rt_arr_i64_get(a, 99), 99);
            rt_release(a);
        }
    }

    #[test]
    fn test_bounds_trap() {
        clear_trap();
        unsafe {
            let a = rt_arr_i64_new(1);
            rt_arr_i64_get(a, 5);
            assert!(has_trap());
            take_trap();
            rt_release(a);
        }
    }
}
