//! Local algebraic simplifications
//!
//! Identity and annihilator rewrites on single instructions plus two-step
//! patterns through the def chain (redundant cast pairs, double negation).
//! Matched instructions are pure, so they are deleted outright and their
//! uses redirected.

use crate::diag::Diag;
use crate::fold;
use crate::instr::{Instr, Opcode};
use crate::module::{Function, Module};
use crate::value::{SsaId, Value};
use std::collections::HashMap;

use super::{Pass, substitute_uses};

pub struct Peephole;

impl Pass for Peephole {
    fn name(&self) -> &'static str {
        "peephole"
    }

    fn run(&self, m: &mut Module) -> Result<bool, Diag> {
        let mut changed = false;
        for func in &mut m.funcs {
            changed |= run_on_function(func);
        }
        Ok(changed)
    }
}

/// Defining instruction of each temp, as (block, index).
fn def_map(func: &Function) -> HashMap<SsaId, (usize, usize)> {
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

fn def_of<'f>(
    func: &'f Function,
    defs: &HashMap<SsaId, (usize, usize)>,
    v: &Value,
) -> Option<&'f Instr> {
    let Value::Temp(id) = v else { return None };
    defs.get(id).map(|&(b, i)| &func.blocks[b].instrs[i])
}

fn run_on_function(func: &mut Function) -> bool {
    let defs = def_map(func);
    let mut subst: HashMap<SsaId, Value> = HashMap::new();
    let mut doomed: Vec<(usize, usize)> = Vec::new();

    for (bid, block) in func.blocks.iter().enumerate() {
        for (iid, instr) in block.instrs.iter().enumerate() {
            let Some(result) = instr.result else { continue };
            let Some(repl) = simplify(func, &defs, instr) else {
                continue;
            };
            subst.insert(result, repl);
            doomed.push((bid, iid));
        }
    }

    if subst.is_empty() {
        return false;
    }
    // Chase chains so a->b->c collapses in one application.
    let keys: Vec<SsaId> = subst.keys().copied().collect();
    for k in keys {
        let mut v = subst[&k].clone();
        while let Value::Temp(id) = v {
            match subst.get(&id) {
                Some(next) => v = next.clone(),
                None => break,
            }
        }
        subst.insert(k, v);
    }
    for &(bid, iid) in doomed.iter().rev() {
        func.blocks[bid].instrs.remove(iid);
    }
    substitute_uses(func, &subst);
    true
}

fn is_zero(v: &Value) -> bool {
    matches!(v, Value::ConstInt(0))
}

fn is_one(v: &Value) -> bool {
    matches!(v, Value::ConstInt(1))
}

/// A replacement value for the instruction, or None when nothing applies.
fn simplify(
    func: &Function,
    defs: &HashMap<SsaId, (usize, usize)>,
    instr: &Instr,
) -> Option<Value> {
    let (a, b) = match instr.operands.as_slice() {
        [a, b] => (a, Some(b)),
        [a] => (a, None),
        _ => return None,
    };
    match instr.op {
        Opcode::Add => {
            if is_zero(b?) {
                return Some(a.clone());
            }
            if is_zero(a) {
                return Some(b?.clone());
            }
            fold_both(instr, a, b?)
        }
        Opcode::Sub => {
            if is_zero(b?) {
                return Some(a.clone());
            }
            // --x => x
            if is_zero(a) {
                if let Some(inner) = def_of(func, defs, b?) {
                    if inner.op == Opcode::Sub
                        && is_zero(&inner.operands[0])
                        && inner.ty == instr.ty
                    {
                        return Some(inner.operands[1].clone());
                    }
                }
            }
            fold_both(instr, a, b?)
        }
        Opcode::Mul => {
            if is_one(b?) {
                return Some(a.clone());
            }
            if is_one(a) {
                return Some(b?.clone());
            }
            if is_zero(a) || is_zero(b?) {
                return Some(Value::ConstInt(0));
            }
            fold_both(instr, a, b?)
        }
        Opcode::Sdiv | Opcode::Udiv => {
            if is_one(b?) {
                return Some(a.clone());
            }
            None
        }
        Opcode::And | Opcode::Or => {
            if a == b? {
                return Some(a.clone());
            }
            fold_both(instr, a, b?)
        }
        Opcode::Xor => {
            if a == b? {
                return Some(Value::ConstInt(0));
            }
            fold_both(instr, a, b?)
        }
        Opcode::ICmp(pred) => {
            let (Value::ConstInt(x), Value::ConstInt(y)) = (a, b?) else {
                return None;
            };
            Some(Value::ConstBool(fold::int_cmp(
                pred,
                instr.ty.int_bits(),
                *x,
                *y,
            )))
        }
        Opcode::FCmp(pred) => {
            let (Value::ConstFloat(x), Value::ConstFloat(y)) = (a, b?) else {
                return None;
            };
            Some(Value::ConstBool(fold::float_cmp(pred, *x, *y)))
        }
        Opcode::Trunc => {
            // trunc(zext/sext x) back to the original width is x itself.
            let inner = def_of(func, defs, a)?;
            if matches!(inner.op, Opcode::Zext | Opcode::Sext)
                && inner.ty == instr.result_ty
                && inner.result_ty == instr.ty
            {
                return Some(inner.operands[0].clone());
            }
            None
        }
        _ => None,
    }
}

/// Shared constant-pair folding for the remaining integer binops.
fn fold_both(instr: &Instr, a: &Value, b: &Value) -> Option<Value> {
    let (Value::ConstInt(x), Value::ConstInt(y)) = (a, b) else {
        return None;
    };
    fold::int_binop(instr.op, instr.ty.int_bits(), *x, *y)
        .ok()
        .map(Value::ConstInt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;
    use crate::verify::verify;

    fn run(src: &str) -> Module {
        let mut m = parse_module(src, "t.vil").unwrap();
        assert!(verify(&m).is_ok());
        Peephole.run(&mut m).unwrap();
        assert!(verify(&m).is_ok(), "peephole must preserve verification");
        m
    }

    #[test]
    fn test_add_zero_identity() {
        let m = run(
            r#"
module "p"
fn @f(%x: i64) -> i64 {
entry:
  %y = add i64 %x, 0
  ret %y
}
"#,
        );
        let entry = &m.funcs[0].blocks[0];
        assert_eq!(entry.instrs.len(), 1);
        assert_eq!(entry.terminator().unwrap().operands[0], Value::Temp(0));
    }

    #[test]
    fn test_mul_zero_annihilates() {
        let m = run(
            r#"
module "p"
fn @f(%x: i64) -> i64 {
entry:
  %y = mul i64 %x, 0
  ret %y
}
"#,
        );
        assert_eq!(
            m.funcs[0].blocks[0].terminator().unwrap().operands[0],
            Value::ConstInt(0)
        );
    }

    #[test]
    fn test_chain_collapses_in_one_run() {
        let m = run(
            r#"
module "p"
fn @f(%x: i64) -> i64 {
entry:
  %a = add i64 %x, 0
  %b = mul i64 %a, 1
  ret %b
}
"#,
        );
        let entry = &m.funcs[0].blocks[0];
        assert_eq!(entry.instrs.len(), 1);
        assert_eq!(entry.terminator().unwrap().operands[0], Value::Temp(0));
    }

    #[test]
    fn test_redundant_cast_pair() {
        let m = run(
            r#"
module "p"
fn @f(%x: i32) -> i32 {
entry:
  %w = zext i32 %x to i64
  %n = trunc i64 %w to i32
  ret %n
}
"#,
        );
        // %n collapses to %x; %w stays for DCE to sweep.
        assert_eq!(
            m.funcs[0].blocks[0].terminator().unwrap().operands[0],
            Value::Temp(0)
        );
    }

    #[test]
    fn test_double_negation() {
        let m = run(
            r#"
module "p"
fn @f(%x: i64) -> i64 {
entry:
  %n = sub i64 0, %x
  %nn = sub i64 0, %n
  ret %nn
}
"#,
        );
        assert_eq!(
            m.funcs[0].blocks[0].terminator().unwrap().operands[0],
            Value::Temp(0)
        );
    }

    #[test]
    fn test_cmp_of_constants_folds() {
        let m = run(
            r#"
module "p"
fn @f() -> i1 {
entry:
  %c = icmp.ult i64 -1, 1
  ret %c
}
"#,
        );
        assert_eq!(
            m.funcs[0].blocks[0].terminator().unwrap().operands[0],
            Value::ConstBool(false)
        );
    }
}
