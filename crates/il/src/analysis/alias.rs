//! Basic alias analysis
//!
//! Classifies pointer pairs by walking `gep`/`alloca`/`addrof` def chains
//! to a base (bounded depth). Distinct stack slots and distinct globals
//! never alias; offsets from one base compare by byte distance against the
//! largest scalar access width.

use crate::instr::{EffectClass, Opcode, schema};
use crate::module::{Function, Module};
use crate::sigtable;
use crate::value::{SsaId, Value};
use std::collections::HashMap;

const MAX_CHAIN_DEPTH: usize = 8;
/// Widest scalar load/store the IL can issue.
const MAX_ACCESS_BYTES: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    MustAlias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModRef {
    NoModRef,
    Ref,
    Mod,
    ModRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Base {
    /// `alloca` result, identified by its SSA id
    Alloca(SsaId),
    /// `addrof` of a module-level symbol
    Global(String),
    Unknown,
}

/// Map every SSA id to its defining instruction site.
fn def_sites(func: &Function) -> HashMap<SsaId, (usize, usize)> {
    let mut map = HashMap::new();
    for (bid, block) in func.blocks.iter().enumerate() {
        for (iid, instr) in block.instrs.iter().enumerate() {
            if let Some(r) = instr.result {
                map.insert(r, (bid, iid));
            }
        }
    }
    map
}

/// Walk a pointer value to (base, byte offset). Offset is `None` when any
/// step is non-constant.
fn walk_base(
    func: &Function,
    defs: &HashMap<SsaId, (usize, usize)>,
    value: &Value,
) -> (Base, Option<i64>) {
    let mut cur = value.clone();
    let mut offset: Option<i64> = Some(0);
    for _ in 0..MAX_CHAIN_DEPTH {
        match cur {
            Value::Global(name) => return (Base::Global(name), offset),
            Value::Temp(id) => {
                let Some(&(bid, iid)) = defs.get(&id) else {
                    return (Base::Unknown, None);
                };
                let instr = &func.blocks[bid].instrs[iid];
                match instr.op {
                    Opcode::Alloca => return (Base::Alloca(id), offset),
                    Opcode::AddrOf => {
                        cur = instr.operands[0].clone();
                    }
                    Opcode::Gep => {
                        offset = match (&instr.operands[1], offset) {
                            (Value::ConstInt(k), Some(acc)) => Some(acc.wrapping_add(*k)),
                            _ => None,
                        };
                        cur = instr.operands[0].clone();
                    }
                    _ => return (Base::Unknown, None),
                }
            }
            _ => return (Base::Unknown, None),
        }
    }
    (Base::Unknown, None)
}

/// Classify two pointer-typed SSA values.
pub fn basic_alias(func: &Function, a: &Value, b: &Value) -> AliasResult {
    let defs = def_sites(func);
    let (base_a, off_a) = walk_base(func, &defs, a);
    let (base_b, off_b) = walk_base(func, &defs, b);
    if base_a == Base::Unknown || base_b == Base::Unknown {
        return AliasResult::MayAlias;
    }
    if base_a != base_b {
        return AliasResult::NoAlias;
    }
    match (off_a, off_b) {
        (Some(x), Some(y)) if x == y => AliasResult::MustAlias,
        (Some(x), Some(y)) if (x - y).abs() >= MAX_ACCESS_BYTES => AliasResult::NoAlias,
        _ => AliasResult::MayAlias,
    }
}

/// ModRef summary of a direct call. Answered from the callee body when the
/// module has one, falling back to the runtime signature table.
pub fn call_mod_ref(module: &Module, callee: &str) -> ModRef {
    if let Some(func) = module.func(callee) {
        let mut reads = false;
        let mut writes = false;
        for block in &func.blocks {
            for instr in &block.instrs {
                match schema(instr.op).effect {
                    EffectClass::ReadMem => reads = true,
                    EffectClass::WriteMem => writes = true,
                    EffectClass::CallEffect => {
                        // Nested calls: recurse one level through the table
                        // only; a call into module code is conservative.
                        match instr.callee.as_deref() {
                            Some(inner) if module.func(inner).is_none() => {
                                match sig_effects(inner) {
                                    ModRef::NoModRef => {}
                                    ModRef::Ref => reads = true,
                                    ModRef::Mod => writes = true,
                                    ModRef::ModRef => {
                                        reads = true;
                                        writes = true;
                                    }
                                }
                            }
                            _ => {
                                reads = true;
                                writes = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        return match (reads, writes) {
            (false, false) => ModRef::NoModRef,
            (true, false) => ModRef::Ref,
            (false, true) => ModRef::Mod,
            (true, true) => ModRef::ModRef,
        };
    }
    sig_effects(callee)
}

fn sig_effects(name: &str) -> ModRef {
    match sigtable::lookup(name) {
        Some(entry) => match (entry.effects.reads_globals, entry.effects.writes_globals) {
            (false, false) => ModRef::NoModRef,
            (true, false) => ModRef::Ref,
            (false, true) => ModRef::Mod,
            (true, true) => ModRef::ModRef,
        },
        None => ModRef::ModRef,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    #[test]
    fn test_distinct_allocas_no_alias() {
        let m = parse_module(
            r#"
module "a"
fn @f() -> void {
entry:
  %p = alloca i64, 1
  %q = alloca i64, 1
  ret
}
"#,
            "t.vil",
        )
        .unwrap();
        let f = &m.funcs[0];
        assert_eq!(
            basic_alias(f, &Value::Temp(0), &Value::Temp(1)),
            AliasResult::NoAlias
        );
    }

    #[test]
    fn test_gep_offsets() {
        let m = parse_module(
            r#"
module "g"
fn @f() -> void {
entry:
  %p = alloca i64, 4
  %a = gep %p, 0
  %b = gep %p, 8
  %c = gep %p, 0
  ret
}
"#,
            "t.vil",
        )
        .unwrap();
        let f = &m.funcs[0];
        let (p, a, b, c) = (Value::Temp(0), Value::Temp(1), Value::Temp(2), Value::Temp(3));
        assert_eq!(basic_alias(f, &a, &b), AliasResult::NoAlias);
        assert_eq!(basic_alias(f, &a, &c), AliasResult::MustAlias);
        assert_eq!(basic_alias(f, &p, &a), AliasResult::MustAlias);
    }

    #[test]
    fn test_unknown_pointer_may_alias() {
        let m = parse_module(
            r#"
module "u"
fn @f(%p: ptr) -> void {
entry:
  %q = alloca i64, 1
  ret
}
"#,
            "t.vil",
        )
        .unwrap();
        let f = &m.funcs[0];
        assert_eq!(
            basic_alias(f, &Value::Temp(0), &Value::Temp(1)),
            AliasResult::MayAlias
        );
    }

    #[test]
    fn test_extern_modref_from_table() {
        let m = parse_module("module \"x\"", "t.vil").unwrap();
        // Console printing writes the output stream but not IL-visible heap;
        // the table still marks it as writing globals.
        assert_eq!(call_mod_ref(&m, "Viper.Console.PrintI64"), ModRef::Mod);
        assert_eq!(call_mod_ref(&m, "Viper.Math.Sqrt"), ModRef::NoModRef);
        assert_eq!(call_mod_ref(&m, "totally.unknown"), ModRef::ModRef);
    }
}
