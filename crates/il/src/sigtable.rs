//! Runtime extern signature table
//!
//! Declarative catalog mapping canonical dotted names (`Viper.*`) to their
//! IL signatures, mod/ref effect summaries, and legacy `rt_*` aliases.
//!
//! This is the single source of truth consulted by the verifier (extern
//! type checks), BasicAA (effects of unknown callees), the VM FFI bridge
//! (marshalling and retain/release), and native backends (symbol
//! rewriting). The VM builds the table once at construction; there is no
//! hidden lazy initialization.

use crate::types::{Signature, Type};
use std::collections::HashMap;

/// Mod/ref and ownership summary for one extern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effects {
    pub reads_globals: bool,
    pub writes_globals: bool,
    pub may_trap: bool,
    /// Returned `str`/`[T]` handles arrive retained: ownership transfers
    /// to IL and the caller is responsible for the release.
    pub retains_result: bool,
    /// The callee may keep handle arguments beyond the call, so the bridge
    /// retains them before dispatch.
    pub takes_handles: bool,
}

impl Effects {
    const PURE: Effects = Effects {
        reads_globals: false,
        writes_globals: false,
        may_trap: false,
        retains_result: true,
        takes_handles: false,
    };

    const fn trapping(self) -> Effects {
        Effects {
            may_trap: true,
            ..self
        }
    }

    const fn reads(self) -> Effects {
        Effects {
            reads_globals: true,
            ..self
        }
    }

    const fn writes(self) -> Effects {
        Effects {
            writes_globals: true,
            ..self
        }
    }

    const fn takes(self) -> Effects {
        Effects {
            takes_handles: true,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtSig {
    pub name: &'static str,
    pub sig: Signature,
    pub effects: Effects,
    /// Legacy alias accepted in IL and rewritten by native backends
    pub alias: Option<&'static str>,
}

/// Build the full signature table, keyed by canonical name.
pub fn table() -> HashMap<&'static str, RtSig> {
    let mut t = HashMap::new();
    let mut put = |name: &'static str,
                   params: Vec<Type>,
                   ret: Type,
                   effects: Effects,
                   alias: Option<&'static str>| {
        t.insert(
            name,
            RtSig {
                name,
                sig: Signature::new(params, ret),
                effects,
                alias,
            },
        );
    };

    use Type::*;
    let arr_i64 = || Array(Box::new(I64));

    // Console I/O. Writing the output stream counts as a global effect.
    put("Viper.Console.PrintI64", vec![I64], Void, Effects::PURE.writes(), Some("rt_print_i64"));
    put("Viper.Console.PrintF64", vec![F64], Void, Effects::PURE.writes(), Some("rt_print_f64"));
    put("Viper.Console.PrintStr", vec![Str], Void, Effects::PURE.writes(), Some("rt_print_str"));
    put("Viper.Console.PrintLn", vec![Str], Void, Effects::PURE.writes(), Some("rt_print_ln"));
    put(
        "Viper.Console.InputLine",
        vec![],
        Str,
        Effects::PURE.reads().writes(),
        Some("rt_input_line"),
    );

    // Strings. Handles come back retained.
    put("Viper.Strings.Concat", vec![Str, Str], Str, Effects::PURE, Some("rt_concat"));
    put("Viper.Strings.Len", vec![Str], I64, Effects::PURE, Some("rt_len"));
    put(
        "Viper.Strings.Substr",
        vec![Str, I64, I64],
        Str,
        Effects::PURE.trapping(),
        Some("rt_substr"),
    );
    put("Viper.Strings.Eq", vec![Str, Str], I1, Effects::PURE, Some("rt_str_eq"));
    put("Viper.Strings.CharAt", vec![Str, I64], I64, Effects::PURE.trapping(), Some("rt_char_at"));
    put("Viper.Strings.FromI64", vec![I64], Str, Effects::PURE, Some("rt_str_from_i64"));
    put("Viper.Strings.FromF64", vec![F64], Str, Effects::PURE, Some("rt_str_from_f64"));
    put(
        "Viper.Strings.ToI64",
        vec![Str],
        I64,
        Effects::PURE.trapping(),
        Some("rt_str_to_i64"),
    );

    // Arrays (i64 element family). Mutators are copy-on-write and return
    // the surviving handle.
    put("Viper.Arrays.NewI64", vec![I64], arr_i64(), Effects::PURE.trapping(), Some("rt_arr_i64_new"));
    put("Viper.Arrays.LenI64", vec![arr_i64()], I64, Effects::PURE, Some("rt_arr_i64_len"));
    put(
        "Viper.Arrays.GetI64",
        vec![arr_i64(), I64],
        I64,
        Effects::PURE.trapping(),
        Some("rt_arr_i64_get"),
    );
    put(
        "Viper.Arrays.SetI64",
        vec![arr_i64(), I64, I64],
        arr_i64(),
        Effects::PURE.trapping().takes(),
        Some("rt_arr_i64_set"),
    );
    put(
        "Viper.Arrays.PushI64",
        vec![arr_i64(), I64],
        arr_i64(),
        Effects::PURE.takes(),
        Some("rt_arr_i64_push"),
    );

    // Math. The RNG owns process-wide state.
    put("Viper.Math.Sqrt", vec![F64], F64, Effects::PURE, Some("rt_sqrt"));
    put("Viper.Math.Pow", vec![F64, F64], F64, Effects::PURE, Some("rt_pow"));
    put("Viper.Math.Sin", vec![F64], F64, Effects::PURE, Some("rt_sin"));
    put("Viper.Math.Cos", vec![F64], F64, Effects::PURE, Some("rt_cos"));
    put("Viper.Math.Floor", vec![F64], F64, Effects::PURE, Some("rt_floor"));
    put("Viper.Math.Ceil", vec![F64], F64, Effects::PURE, Some("rt_ceil"));
    put("Viper.Math.AbsI64", vec![I64], I64, Effects::PURE, Some("rt_abs_i64"));
    put("Viper.Math.Rnd", vec![], F64, Effects::PURE.reads().writes(), Some("rt_rnd"));
    put(
        "Viper.Math.RandomizeI64",
        vec![I64],
        Void,
        Effects::PURE.writes(),
        Some("rt_randomize"),
    );

    // Files.
    put(
        "Viper.Files.Slurp",
        vec![Str],
        Str,
        Effects::PURE.reads().trapping(),
        Some("rt_file_slurp"),
    );
    put(
        "Viper.Files.Spit",
        vec![Str, Str],
        Void,
        Effects::PURE.writes().trapping(),
        Some("rt_file_spit"),
    );
    put("Viper.Files.Exists", vec![Str], I1, Effects::PURE.reads(), Some("rt_file_exists"));

    // Threads. Each spawned thread runs an independent VM frame stack.
    put(
        "Viper.Threads.Spawn",
        vec![Ptr],
        I64,
        Effects::PURE.reads().writes().trapping(),
        Some("rt_thread_spawn"),
    );
    put(
        "Viper.Threads.Join",
        vec![I64],
        Void,
        Effects::PURE.reads().writes().trapping(),
        Some("rt_thread_join"),
    );

    // Object system and RTTI.
    put("Viper.Object.New", vec![I64, I64], Ptr, Effects::PURE.reads().trapping(), Some("rt_obj_new"));
    put("Viper.Object.TypeIdOf", vec![Ptr], I64, Effects::PURE.trapping(), Some("rt_typeid_of"));
    put("Viper.Object.TypeIsA", vec![I64, I64], I1, Effects::PURE.reads(), Some("rt_type_is_a"));
    put(
        "Viper.Object.Implements",
        vec![I64, I64],
        I1,
        Effects::PURE.reads(),
        Some("rt_type_implements"),
    );
    put("Viper.Object.CastAs", vec![Ptr, I64], Ptr, Effects::PURE.reads(), Some("rt_cast_as"));
    put(
        "Viper.Object.BindInterface",
        vec![I64, I64, Ptr, I64],
        Void,
        Effects::PURE.writes(),
        Some("rt_bind_interface"),
    );

    // Heap handle lifetimes.
    put("Viper.Heap.Retain", vec![Ptr], Void, Effects::PURE.trapping(), Some("rt_retain"));
    put("Viper.Heap.Release", vec![Ptr], Void, Effects::PURE.trapping(), Some("rt_release"));

    t
}

/// Look up a canonical name or a legacy `rt_*` alias.
///
/// Builds the table on each call; long-lived consumers (the VM) hold the
/// result of [`table`] instead.
pub fn lookup(name: &str) -> Option<RtSig> {
    let t = table();
    if let Some(entry) = t.get(name) {
        return Some(entry.clone());
    }
    t.values().find(|e| e.alias == Some(name)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_lookup() {
        let e = lookup("Viper.Strings.Concat").unwrap();
        assert_eq!(e.sig.params, vec![Type::Str, Type::Str]);
        assert_eq!(e.sig.ret, Type::Str);
        assert!(e.effects.retains_result);
    }

    #[test]
    fn test_alias_lookup() {
        let e = lookup("rt_sqrt").unwrap();
        assert_eq!(e.name, "Viper.Math.Sqrt");
    }

    #[test]
    fn test_unknown_name() {
        assert!(lookup("Viper.Nope").is_none());
    }

    #[test]
    fn test_aliases_are_unique() {
        let t = table();
        let mut seen = std::collections::HashSet::new();
        for e in t.values() {
            if let Some(a) = e.alias {
                assert!(seen.insert(a), "duplicate alias {}", a);
            }
        }
    }

    #[test]
    fn test_trapping_entries_marked() {
        assert!(lookup("Viper.Arrays.GetI64").unwrap().effects.may_trap);
        assert!(!lookup("Viper.Math.Sqrt").unwrap().effects.may_trap);
    }
}
