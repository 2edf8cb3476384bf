//! Object system: class registry, vtables, itables, RTTI
//!
//! The registry is process-global and grows monotonically as modules load;
//! type ids are never reused. Vtable slot values are opaque words: machine
//! code stores function pointers, the VM stores function indices. Either
//! way dispatch is `vptr[slot]`.
//!
//! Each vtable allocation carries a two-word hidden prefix
//! `[type_id, slot_count]`; the vptr published to instances points just
//! past it, so the instance ABI stays "first 8 bytes are a pointer to the
//! function-pointer array" while RTTI can walk back.

use crate::error::{TrapKind, set_trap};
use crate::heap::{KIND_OBJ, alloc_payload};
use std::sync::Mutex;

struct ClassInfo {
    #[allow(dead_code)]
    name: String,
    base: Option<i64>,
    /// `[type_id, slot_count, slot0, slot1, ...]`
    vtable: Box<[usize]>,
}

struct Registry {
    classes: Vec<ClassInfo>,
    /// `(type_id, iface_id)` to itable; the table stays small enough that
    /// a scan beats hashing
    itables: Vec<((i64, i64), Box<[usize]>)>,
}

impl Registry {
    fn itable(&self, type_id: i64, iface_id: i64) -> Option<&[usize]> {
        self.itables
            .iter()
            .find(|(key, _)| *key == (type_id, iface_id))
            .map(|(_, t)| &**t)
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    classes: Vec::new(),
    itables: Vec::new(),
});

/// Hidden prefix length before the published vptr.
const VTBL_PREFIX: usize = 2;

/// Register a class and its vtable; returns the fresh type id.
///
/// # Safety
/// `name..name+name_len` must be valid UTF-8; `slots..slots+slot_count`
/// must be readable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_class_register(
    name: *const u8,
    name_len: u64,
    base_id: i64,
    slots: *const usize,
    slot_count: u64,
) -> i64 {
    let name = unsafe {
        std::str::from_utf8_unchecked(std::slice::from_raw_parts(name, name_len as usize))
    }
    .to_string();
    let slot_vec: Vec<usize> = unsafe {
        std::slice::from_raw_parts(slots, slot_count as usize).to_vec()
    };
    let mut reg = REGISTRY.lock().expect("class registry lock");
    let type_id = reg.classes.len() as i64;
    let mut vtable = Vec::with_capacity(VTBL_PREFIX + slot_vec.len());
    vtable.push(type_id as usize);
    vtable.push(slot_vec.len());
    vtable.extend(slot_vec);
    reg.classes.push(ClassInfo {
        name,
        base: if base_id < 0 { None } else { Some(base_id) },
        vtable: vtable.into_boxed_slice(),
    });
    type_id
}

/// The published vptr for a class: points at slot 0 of its vtable.
#[unsafe(no_mangle)]
pub extern "C" fn rt_class_vptr(type_id: i64) -> *const usize {
    let reg = REGISTRY.lock().expect("class registry lock");
    match reg.classes.get(type_id as usize) {
        Some(c) => unsafe { c.vtable.as_ptr().add(VTBL_PREFIX) },
        None => {
            set_trap(TrapKind::InvalidCast, format!("unknown type id {}", type_id));
            std::ptr::null()
        }
    }
}

/// Allocate an instance: refcounted payload with the vptr in the first
/// 8 bytes, remaining payload zeroed.
#[unsafe(no_mangle)]
pub extern "C" fn rt_obj_new(type_id: i64, payload_size: i64) -> *mut u8 {
    if payload_size < 8 {
        set_trap(
            TrapKind::Bounds,
            format!("object payload {} smaller than the vptr", payload_size),
        );
        return std::ptr::null_mut();
    }
    let vptr = rt_class_vptr(type_id);
    if vptr.is_null() {
        return std::ptr::null_mut();
    }
    let obj = alloc_payload(KIND_OBJ, payload_size as u64, payload_size as u64);
    unsafe {
        (obj as *mut *const usize).write(vptr);
    }
    obj
}

/// # Safety
/// `obj` must be null or a live instance from [`rt_obj_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_typeid_of(obj: *const u8) -> i64 {
    if obj.is_null() {
        set_trap(TrapKind::NullObject, "typeid of null object");
        return -1;
    }
    unsafe {
        let vptr = (obj as *const *const usize).read();
        *vptr.sub(VTBL_PREFIX) as i64
    }
}

/// Virtual dispatch: slot value of the instance's class.
///
/// # Safety
/// `obj` must be a live instance; `slot` must be within its vtable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_method_slot(obj: *const u8, slot: u64) -> usize {
    if obj.is_null() {
        set_trap(TrapKind::NullObject, "method dispatch on null object");
        return 0;
    }
    unsafe {
        let vptr = (obj as *const *const usize).read();
        let count = *vptr.sub(1);
        if slot as usize >= count {
            set_trap(
                TrapKind::Bounds,
                format!("vtable slot {} of {} slots", slot, count),
            );
            return 0;
        }
        *vptr.add(slot as usize)
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_type_is_a(type_id: i64, base_id: i64) -> bool {
    let reg = REGISTRY.lock().expect("class registry lock");
    let mut cur = Some(type_id);
    while let Some(id) = cur {
        if id == base_id {
            return true;
        }
        cur = reg.classes.get(id as usize).and_then(|c| c.base);
    }
    false
}

/// Bind an interface table for `(type_id, iface_id)`.
///
/// # Safety
/// `slots..slots+slot_count` must be readable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_bind_interface(
    type_id: i64,
    iface_id: i64,
    slots: *const usize,
    slot_count: u64,
) {
    let itable: Box<[usize]> = unsafe {
        std::slice::from_raw_parts(slots, slot_count as usize).into()
    };
    let mut reg = REGISTRY.lock().expect("class registry lock");
    if let Some(entry) = reg.itables.iter_mut().find(|(k, _)| *k == (type_id, iface_id)) {
        entry.1 = itable;
    } else {
        reg.itables.push(((type_id, iface_id), itable));
    }
}

/// A class implements an interface bound to it or to any base class.
#[unsafe(no_mangle)]
pub extern "C" fn rt_type_implements(type_id: i64, iface_id: i64) -> bool {
    let reg = REGISTRY.lock().expect("class registry lock");
    let mut cur = Some(type_id);
    while let Some(id) = cur {
        if reg.itable(id, iface_id).is_some() {
            return true;
        }
        cur = reg.classes.get(id as usize).and_then(|c| c.base);
    }
    false
}

/// Interface dispatch: slot value from the nearest bound itable.
#[unsafe(no_mangle)]
pub extern "C" fn rt_iface_slot(type_id: i64, iface_id: i64, slot: u64) -> usize {
    let reg = REGISTRY.lock().expect("class registry lock");
    let mut cur = Some(type_id);
    while let Some(id) = cur {
        if let Some(itable) = reg.itable(id, iface_id) {
            match itable.get(slot as usize) {
                Some(v) => return *v,
                None => {
                    set_trap(
                        TrapKind::Bounds,
                        format!("interface slot {} of {}", slot, itable.len()),
                    );
                    return 0;
                }
            }
        }
        cur = reg.classes.get(id as usize).and_then(|c| c.base);
    }
    set_trap(
        TrapKind::InvalidCast,
        format!("type {} does not implement interface {}", type_id, iface_id),
    );
    0
}

/// Checked downcast: the object when its dynamic type is `type_id` or a
/// subclass of it, null otherwise.
///
/// # Safety
/// `obj` must be null or a live instance from [`rt_obj_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_cast_as(obj: *mut u8, type_id: i64) -> *mut u8 {
    if obj.is_null() {
        return std::ptr::null_mut();
    }
    let dynamic = unsafe { rt_typeid_of(obj) };
    if rt_type_is_a(dynamic, type_id) {
        obj
    } else {
        std::ptr::null_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::rt_release;
    use serial_test::serial;

    unsafe fn register(name: &str, base: i64, slots: &[usize]) -> i64 {
        unsafe {
            rt_class_register(
                name.as_ptr(),
                name.len() as u64,
                base,
                slots.as_ptr(),
                slots.len() as u64,
            )
        }
    }

    #[test]
    #[serial]
    fn test_class_hierarchy_and_dispatch() {
        unsafe {
            let base = register("T.Base", -1, &[11, 12]);
            // override slot 1, append slot 2 (base-first, append-only)
            let derived = register("T.Derived", base, &[11, 99, 33]);

            let obj = rt_obj_new(derived, 16);
            assert_eq!(rt_typeid_of(obj), derived);
            assert_eq!(rt_method_slot(obj, 0), 11);
            assert_eq!(rt_method_slot(obj, 1), 99);
            assert_eq!(rt_method_slot(obj, 2), 33);

            assert!(rt_type_is_a(derived, base));
            assert!(!rt_type_is_a(base, derived));

            let cast = rt_cast_as(obj, base);
            assert_eq!(cast, obj);
            let bad = rt_cast_as(rt_obj_new(base, 8), derived);
            assert!(bad.is_null());
            rt_release(obj);
        }
    }

    #[test]
    #[serial]
    fn test_interfaces_inherit() {
        unsafe {
            let base = register("T.IBase", -1, &[1]);
            let derived = register("T.IDerived", base, &[1]);
            let iface = 4242;
            rt_bind_interface(base, iface, [7usize, 8usize].as_ptr(), 2);
            assert!(rt_type_implements(base, iface));
            assert!(rt_type_implements(derived, iface));
            assert_eq!(rt_iface_slot(derived, iface, 1), 8);
            assert!(!rt_type_implements(derived, iface + 1));
        }
    }
}
