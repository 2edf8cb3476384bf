//! Runtime FFI bridge
//!
//! Resolves canonical extern names (or their `rt_*` aliases) to runtime
//! entry points and marshals register values across the C ABI: `i64`
//! stays a 64-bit integer, `f64` a double, `ptr` an opaque address, and
//! `str`/`[T]` handles travel as payload pointers.
//!
//! Ownership follows the signature-table effect annotations: for entries
//! that *take* handles the bridge retains the argument first so the
//! caller's register stays valid, and results marked *retained* arrive
//! owned by the calling frame. After every call the bridge converts a
//! pending runtime trap into a VM trap.

use crate::rtval::RtValue;
use std::collections::HashMap;
use viper_il::Module;
use viper_runtime::error::{Trap, TrapKind, take_trap};
use viper_runtime::{arrays, console, files, heap, math, object, strings, threads};

/// One known runtime entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    PrintI64,
    PrintF64,
    PrintStr,
    PrintLn,
    InputLine,
    StrConcat,
    StrLen,
    StrSubstr,
    StrEq,
    StrCharAt,
    StrFromI64,
    StrFromF64,
    StrToI64,
    ArrNewI64,
    ArrLenI64,
    ArrGetI64,
    ArrSetI64,
    ArrPushI64,
    MathSqrt,
    MathPow,
    MathSin,
    MathCos,
    MathFloor,
    MathCeil,
    MathAbsI64,
    MathRnd,
    MathRandomize,
    FileSlurp,
    FileSpit,
    FileExists,
    ThreadSpawn,
    ThreadJoin,
    ObjNew,
    ObjTypeIdOf,
    ObjTypeIsA,
    ObjImplements,
    ObjCastAs,
    ObjBindInterface,
    HeapRetain,
    HeapRelease,
}

impl Binding {
    pub fn resolve(name: &str) -> Option<Binding> {
        use Binding::*;
        Some(match name {
            "Viper.Console.PrintI64" | "rt_print_i64" => PrintI64,
            "Viper.Console.PrintF64" | "rt_print_f64" => PrintF64,
            "Viper.Console.PrintStr" | "rt_print_str" => PrintStr,
            "Viper.Console.PrintLn" | "rt_print_ln" => PrintLn,
            "Viper.Console.InputLine" | "rt_input_line" => InputLine,
            "Viper.Strings.Concat" | "rt_concat" => StrConcat,
            "Viper.Strings.Len" | "rt_len" => StrLen,
            "Viper.Strings.Substr" | "rt_substr" => StrSubstr,
            "Viper.Strings.Eq" | "rt_str_eq" => StrEq,
            "Viper.Strings.CharAt" | "rt_char_at" => StrCharAt,
            "Viper.Strings.FromI64" | "rt_str_from_i64" => StrFromI64,
            "Viper.Strings.FromF64" | "rt_str_from_f64" => StrFromF64,
            "Viper.Strings.ToI64" | "rt_str_to_i64" => StrToI64,
            "Viper.Arrays.NewI64" | "rt_arr_i64_new" => ArrNewI64,
            "Viper.Arrays.LenI64" | "rt_arr_i64_len" => ArrLenI64,
            "Viper.Arrays.GetI64" | "rt_arr_i64_get" => ArrGetI64,
            "Viper.Arrays.SetI64" | "rt_arr_i64_set" => ArrSetI64,
            "Viper.Arrays.PushI64" | "rt_arr_i64_push" => ArrPushI64,
            "Viper.Math.Sqrt" | "rt_sqrt" => MathSqrt,
            "Viper.Math.Pow" | "rt_pow" => MathPow,
            "Viper.Math.Sin" | "rt_sin" => MathSin,
            "Viper.Math.Cos" | "rt_cos" => MathCos,
            "Viper.Math.Floor" | "rt_floor" => MathFloor,
            "Viper.Math.Ceil" | "rt_ceil" => MathCeil,
            "Viper.Math.AbsI64" | "rt_abs_i64" => MathAbsI64,
            "Viper.Math.Rnd" | "rt_rnd" => MathRnd,
            "Viper.Math.RandomizeI64" | "rt_randomize" => MathRandomize,
            "Viper.Files.Slurp" | "rt_file_slurp" => FileSlurp,
            "Viper.Files.Spit" | "rt_file_spit" => FileSpit,
            "Viper.Files.Exists" | "rt_file_exists" => FileExists,
            "Viper.Threads.Spawn" | "rt_thread_spawn" => ThreadSpawn,
            "Viper.Threads.Join" | "rt_thread_join" => ThreadJoin,
            "Viper.Object.New" | "rt_obj_new" => ObjNew,
            "Viper.Object.TypeIdOf" | "rt_typeid_of" => ObjTypeIdOf,
            "Viper.Object.TypeIsA" | "rt_type_is_a" => ObjTypeIsA,
            "Viper.Object.Implements" | "rt_type_implements" => ObjImplements,
            "Viper.Object.CastAs" | "rt_cast_as" => ObjCastAs,
            "Viper.Object.BindInterface" | "rt_bind_interface" => ObjBindInterface,
            "Viper.Heap.Retain" | "rt_retain" => HeapRetain,
            "Viper.Heap.Release" | "rt_release" => HeapRelease,
            _ => return None,
        })
    }
}

/// Per-module binding map, built once when the VM adopts a module.
pub fn bind_module(module: &Module) -> HashMap<String, Binding> {
    let mut map = HashMap::new();
    for e in &module.externs {
        if let Some(b) = Binding::resolve(&e.name) {
            map.insert(e.name.clone(), b);
        } else {
            tracing::debug!(name = %e.name, "extern has no runtime binding");
        }
    }
    map
}

fn trap(kind: TrapKind, msg: impl Into<String>) -> Trap {
    Trap {
        kind,
        message: msg.into(),
    }
}

fn want_i64(args: &[RtValue], i: usize) -> Result<i64, Trap> {
    args.get(i)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| trap(TrapKind::InvalidConversion, format!("argument {} must be an integer", i)))
}

fn want_f64(args: &[RtValue], i: usize) -> Result<f64, Trap> {
    args.get(i)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| trap(TrapKind::InvalidConversion, format!("argument {} must be a float", i)))
}

/// Handle-or-null payload pointer.
fn want_handle(args: &[RtValue], i: usize) -> Result<*mut u8, Trap> {
    match args.get(i) {
        Some(RtValue::Str(p)) | Some(RtValue::Arr(p)) => Ok(*p),
        Some(RtValue::Null) => Ok(std::ptr::null_mut()),
        _ => Err(trap(TrapKind::InvalidConversion, format!("argument {} must be a handle", i))),
    }
}

fn want_ptr(args: &[RtValue], i: usize) -> Result<usize, Trap> {
    match args.get(i) {
        Some(RtValue::Ptr(p)) => Ok(*p),
        Some(RtValue::Null) => Ok(0),
        _ => Err(trap(TrapKind::InvalidConversion, format!("argument {} must be a pointer", i))),
    }
}

fn finish(result: RtValue) -> Result<RtValue, Trap> {
    match take_trap() {
        Some(t) => Err(t),
        None => Ok(result),
    }
}

/// Dispatch one extern call. Returned handles are owned by the caller.
pub fn call_extern(binding: Binding, args: &[RtValue]) -> Result<RtValue, Trap> {
    use Binding::*;
    viper_runtime::clear_trap();
    unsafe {
        match binding {
            PrintI64 => {
                console::rt_print_i64(want_i64(args, 0)?);
                finish(RtValue::Unit)
            }
            PrintF64 => {
                console::rt_print_f64(want_f64(args, 0)?);
                finish(RtValue::Unit)
            }
            PrintStr => {
                console::rt_print_str(want_handle(args, 0)?);
                finish(RtValue::Unit)
            }
            PrintLn => {
                console::rt_print_ln(want_handle(args, 0)?);
                finish(RtValue::Unit)
            }
            InputLine => {
                let s = console::rt_input_line();
                finish(RtValue::Str(s))
            }
            StrConcat => {
                let s = strings::rt_concat(want_handle(args, 0)?, want_handle(args, 1)?);
                finish(RtValue::Str(s))
            }
            StrLen => finish(RtValue::I64(strings::rt_len(want_handle(args, 0)?))),
            StrSubstr => {
                let s = strings::rt_substr(
                    want_handle(args, 0)?,
                    want_i64(args, 1)?,
                    want_i64(args, 2)?,
                );
                finish(RtValue::Str(s))
            }
            StrEq => finish(RtValue::I64(
                strings::rt_str_eq(want_handle(args, 0)?, want_handle(args, 1)?) as i64,
            )),
            StrCharAt => finish(RtValue::I64(strings::rt_char_at(
                want_handle(args, 0)?,
                want_i64(args, 1)?,
            ))),
            StrFromI64 => finish(RtValue::Str(strings::rt_str_from_i64(want_i64(args, 0)?))),
            StrFromF64 => finish(RtValue::Str(strings::rt_str_from_f64(want_f64(args, 0)?))),
            StrToI64 => finish(RtValue::I64(strings::rt_str_to_i64(want_handle(args, 0)?))),
            ArrNewI64 => finish(RtValue::Arr(arrays::rt_arr_i64_new(want_i64(args, 0)?))),
            ArrLenI64 => finish(RtValue::I64(arrays::rt_arr_i64_len(want_handle(args, 0)?))),
            ArrGetI64 => finish(RtValue::I64(arrays::rt_arr_i64_get(
                want_handle(args, 0)?,
                want_i64(args, 1)?,
            ))),
            ArrSetI64 => {
                // The runtime consumes one reference; keep the caller's
                // register alive by retaining first.
                let a = want_handle(args, 0)?;
                heap::rt_retain(a);
                let out = arrays::rt_arr_i64_set(a, want_i64(args, 1)?, want_i64(args, 2)?);
                finish(RtValue::Arr(out))
            }
            ArrPushI64 => {
                let a = want_handle(args, 0)?;
                heap::rt_retain(a);
                let out = arrays::rt_arr_i64_push(a, want_i64(args, 1)?);
                finish(RtValue::Arr(out))
            }
            MathSqrt => finish(RtValue::F64(math::rt_sqrt(want_f64(args, 0)?))),
            MathPow => finish(RtValue::F64(math::rt_pow(want_f64(args, 0)?, want_f64(args, 1)?))),
            MathSin => finish(RtValue::F64(math::rt_sin(want_f64(args, 0)?))),
            MathCos => finish(RtValue::F64(math::rt_cos(want_f64(args, 0)?))),
            MathFloor => finish(RtValue::F64(math::rt_floor(want_f64(args, 0)?))),
            MathCeil => finish(RtValue::F64(math::rt_ceil(want_f64(args, 0)?))),
            MathAbsI64 => finish(RtValue::I64(math::rt_abs_i64(want_i64(args, 0)?))),
            MathRnd => finish(RtValue::F64(math::rt_rnd())),
            MathRandomize => {
                math::rt_randomize(want_i64(args, 0)?);
                finish(RtValue::Unit)
            }
            FileSlurp => finish(RtValue::Str(files::rt_file_slurp(want_handle(args, 0)?))),
            FileSpit => {
                files::rt_file_spit(want_handle(args, 0)?, want_handle(args, 1)?);
                finish(RtValue::Unit)
            }
            FileExists => finish(RtValue::I64(
                files::rt_file_exists(want_handle(args, 0)?) as i64,
            )),
            ThreadSpawn => {
                let r = threads::rt_thread_spawn(want_ptr(args, 0)? as *const u8);
                finish(RtValue::I64(r))
            }
            ThreadJoin => {
                threads::rt_thread_join(want_i64(args, 0)?);
                finish(RtValue::Unit)
            }
            ObjNew => {
                let p = object::rt_obj_new(want_i64(args, 0)?, want_i64(args, 1)?);
                finish(RtValue::Ptr(p as usize))
            }
            ObjTypeIdOf => finish(RtValue::I64(object::rt_typeid_of(
                want_ptr(args, 0)? as *const u8,
            ))),
            ObjTypeIsA => finish(RtValue::I64(
                object::rt_type_is_a(want_i64(args, 0)?, want_i64(args, 1)?) as i64,
            )),
            ObjImplements => finish(RtValue::I64(
                object::rt_type_implements(want_i64(args, 0)?, want_i64(args, 1)?) as i64,
            )),
            ObjCastAs => {
                let p = object::rt_cast_as(want_ptr(args, 0)? as *mut u8, want_i64(args, 1)?);
                finish(RtValue::Ptr(p as usize))
            }
            ObjBindInterface => {
                object::rt_bind_interface(
                    want_i64(args, 0)?,
                    want_i64(args, 1)?,
                    want_ptr(args, 2)? as *const usize,
                    want_i64(args, 3)? as u64,
                );
                finish(RtValue::Unit)
            }
            HeapRetain => {
                heap::rt_retain(want_ptr_or_handle(args, 0)?);
                finish(RtValue::Unit)
            }
            HeapRelease => {
                heap::rt_release(want_ptr_or_handle(args, 0)?);
                finish(RtValue::Unit)
            }
        }
    }
}

fn want_ptr_or_handle(args: &[RtValue], i: usize) -> Result<*mut u8, Trap> {
    match args.get(i) {
        Some(RtValue::Ptr(p)) => Ok(*p as *mut u8),
        Some(RtValue::Str(p)) | Some(RtValue::Arr(p)) => Ok(*p),
        Some(RtValue::Null) => Ok(std::ptr::null_mut()),
        _ => Err(trap(
            TrapKind::InvalidConversion,
            format!("argument {} must be a pointer or handle", i),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_canonical_and_alias() {
        assert_eq!(Binding::resolve("Viper.Math.Sqrt"), Some(Binding::MathSqrt));
        assert_eq!(Binding::resolve("rt_sqrt"), Some(Binding::MathSqrt));
        assert_eq!(Binding::resolve("no.such.name"), None);
    }

    #[test]
    fn test_every_sigtable_entry_has_a_binding() {
        for (name, entry) in viper_il::sigtable::table() {
            assert!(
                Binding::resolve(name).is_some(),
                "missing binding for {}",
                name
            );
            if let Some(alias) = entry.alias {
                assert_eq!(
                    Binding::resolve(alias),
                    Binding::resolve(name),
                    "alias {} disagrees",
                    alias
                );
            }
        }
    }

    #[test]
    fn test_string_round_trip_through_bridge() {
        let a = RtValue::Str(viper_runtime::strings::new_str("ab"));
        let b = RtValue::Str(viper_runtime::strings::new_str("cd"));
        let out = call_extern(Binding::StrConcat, &[a, b]).unwrap();
        match out {
            RtValue::Str(p) => unsafe {
                assert_eq!(viper_runtime::strings::str_slice(p), "abcd");
                assert_eq!(viper_runtime::heap::rt_refcount(p), 1);
                viper_runtime::heap::rt_release(p);
            },
            other => panic!("expected string, got {:?}", other),
        }
        unsafe {
            viper_runtime::heap::rt_release(a.handle().unwrap());
            viper_runtime::heap::rt_release(b.handle().unwrap());
        }
    }

    #[test]
    fn test_trap_surfaces_as_err() {
        let a = RtValue::Arr(arrays::rt_arr_i64_new(1));
        let err = call_extern(Binding::ArrGetI64, &[a, RtValue::I64(99)]).unwrap_err();
        assert_eq!(err.kind, TrapKind::Bounds);
        unsafe {
            viper_runtime::heap::rt_release(a.handle().unwrap());
        }
    }

    #[test]
    fn test_cow_set_keeps_caller_reference_valid() {
        unsafe {
            let arr = arrays::rt_arr_i64_new(2);
            let v = RtValue::Arr(arr);
            let out = call_extern(Binding::ArrSetI64, &[v, RtValue::I64(0), RtValue::I64(5)])
                .unwrap();
            let out_ptr = out.handle().unwrap();
            // The caller's handle is still alive regardless of whether the
            // runtime copied.
            assert!(viper_runtime::heap::rt_refcount(arr) >= 1);
            assert_eq!(arrays::rt_arr_i64_get(out_ptr, 0), 5);
            viper_runtime::heap::rt_release(arr);
            if out_ptr != arr {
                viper_runtime::heap::rt_release(out_ptr);
            }
        }
    }
}
