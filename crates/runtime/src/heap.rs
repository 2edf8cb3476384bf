//! Refcounted heap handles
//!
//! Every `str`, array and object payload is preceded by a 32-byte header:
//!
//! ```text
//! offset 0   magic:    u32   0x56495052 ("VIPR")
//! offset 4   kind:     u8
//! offset 5   pad:      u8
//! offset 8   refcount: u32
//! offset 16  length:   u64   (bytes for str/objects, elements for arrays)
//! offset 24  capacity: u64   (same unit as length)
//! ```
//!
//! Handles passed over the C ABI point at the payload, not the header.
//! Refcounts are not atomic: a handle belongs to one VM instance at a
//! time, and cross-thread transfer goes through a deep copy.
//!
//! # Safety
//!
//! Every function here trusts that incoming payload pointers were produced
//! by [`alloc_payload`]. Magic validation (the `VIPER_RC_DEBUG` knob,
//! installed via [`set_rc_debug`]) exists to catch violations of that
//! contract in debug runs.

use crate::error::{TrapKind, set_trap};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::atomic::{AtomicBool, Ordering};

pub const HEAP_MAGIC: u32 = 0x5649_5052;
pub const HEADER_SIZE: usize = 32;

pub const KIND_STR: u8 = 1;
pub const KIND_ARR_I64: u8 = 2;
pub const KIND_ARR_F64: u8 = 3;
pub const KIND_OBJ: u8 = 4;

/// Element size in bytes for a heap kind.
pub fn elem_size(kind: u8) -> usize {
    match kind {
        KIND_ARR_I64 | KIND_ARR_F64 => 8,
        _ => 1,
    }
}

#[repr(C)]
pub struct HeapHeader {
    pub magic: u32,
    pub kind: u8,
    pub pad: u8,
    pub refcount: u32,
    pub length: u64,
    pub capacity: u64,
}

/// Magic validation on retain/release. Off by default; the VM installs the
/// `VIPER_RC_DEBUG` knob at construction.
static RC_DEBUG: AtomicBool = AtomicBool::new(false);

pub fn set_rc_debug(enabled: bool) {
    RC_DEBUG.store(enabled, Ordering::Relaxed);
}

fn layout_for(kind: u8, capacity: u64) -> Layout {
    let bytes = HEADER_SIZE + capacity as usize * elem_size(kind);
    // Header alignment dominates; payload elements are at most 8 bytes.
    Layout::from_size_align(bytes, 8).expect("heap layout")
}

/// Allocate a zeroed payload with refcount 1. Returns the payload pointer.
pub fn alloc_payload(kind: u8, length: u64, capacity: u64) -> *mut u8 {
    debug_assert!(length <= capacity);
    let layout = layout_for(kind, capacity);
    unsafe {
        let base = alloc_zeroed(layout);
        if base.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        let header = base as *mut HeapHeader;
        (*header).magic = HEAP_MAGIC;
        (*header).kind = kind;
        (*header).pad = 0;
        (*header).refcount = 1;
        (*header).length = length;
        (*header).capacity = capacity;
        base.add(HEADER_SIZE)
    }
}

/// # Safety
/// `payload` must come from [`alloc_payload`].
pub unsafe fn header<'a>(payload: *const u8) -> &'a HeapHeader {
    unsafe { &*(payload.sub(HEADER_SIZE) as *const HeapHeader) }
}

/// # Safety
/// `payload` must come from [`alloc_payload`] and be uniquely reachable
/// for the duration of the mutation.
pub unsafe fn header_mut<'a>(payload: *mut u8) -> &'a mut HeapHeader {
    unsafe { &mut *(payload.sub(HEADER_SIZE) as *mut HeapHeader) }
}

fn check_magic(payload: *const u8) -> bool {
    if payload.is_null() {
        set_trap(TrapKind::NullObject, "retain/release of null handle");
        return false;
    }
    if RC_DEBUG.load(Ordering::Relaxed) {
        let h = unsafe { header(payload) };
        if h.magic != HEAP_MAGIC {
            set_trap(
                TrapKind::RcMagicMismatch,
                format!("heap magic {:#010x} at {:p}", h.magic, payload),
            );
            return false;
        }
    }
    true
}

/// Bump the refcount.
///
/// # Safety
/// `payload` must be a live handle from [`alloc_payload`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_retain(payload: *mut u8) {
    if !check_magic(payload) {
        return;
    }
    unsafe {
        let h = header_mut(payload);
        h.refcount += 1;
    }
}

/// Drop one reference; frees the allocation at zero.
///
/// # Safety
/// `payload` must be a live handle from [`alloc_payload`]; the caller's
/// reference dies with this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_release(payload: *mut u8) {
    if !check_magic(payload) {
        return;
    }
    unsafe {
        let h = header_mut(payload);
        debug_assert!(h.refcount > 0, "release of dead handle");
        h.refcount -= 1;
        if h.refcount == 0 {
            let layout = layout_for(h.kind, h.capacity);
            dealloc(payload.sub(HEADER_SIZE), layout);
        }
    }
}

/// Current refcount, for assertions and the leak checker.
///
/// # Safety
/// `payload` must be a live handle from [`alloc_payload`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_refcount(payload: *const u8) -> u32 {
    unsafe { header(payload).refcount }
}

/// Length field (bytes or elements, by kind).
///
/// # Safety
/// `payload` must be a live handle from [`alloc_payload`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_handle_len(payload: *const u8) -> u64 {
    unsafe { header(payload).length }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_32_bytes() {
        assert_eq!(std::mem::size_of::<HeapHeader>(), 32);
        assert_eq!(std::mem::offset_of!(HeapHeader, magic), 0);
        assert_eq!(std::mem::offset_of!(HeapHeader, kind), 4);
        assert_eq!(std::mem::offset_of!(HeapHeader, pad), 5);
        assert_eq!(std::mem::offset_of!(HeapHeader, refcount), 8);
        assert_eq!(std::mem::offset_of!(HeapHeader, length), 16);
        assert_eq!(std::mem::offset_of!(HeapHeader, capacity), 24);
    }

    #[test]
    fn test_retain_release_balance() {
        unsafe {
            let p = alloc_payload(KIND_STR, 3, 3);
            assert_eq!(rt_refcount(p), 1);
            rt_retain(p);
            assert_eq!(rt_refcount(p), 2);
            rt_release(p);
            assert_eq!(rt_refcount(p), 1);
            rt_release(p); // frees
        }
    }

    #[test]
    fn test_zeroed_payload() {
        unsafe {
            let p = alloc_payload(KIND_ARR_I64, 4, 4);
            let elems = std::slice::from_raw_parts(p as *const i64, 4);
            assert_eq!(elems, &[0, 0, 0, 0]);
            rt_release(p);
        }
    }
}
