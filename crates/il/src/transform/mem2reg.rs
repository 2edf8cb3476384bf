//! Promote single-slot allocas to block parameters
//!
//! Restricted to acyclic control flow: blocks are walked in topological
//! order, the reaching value of each promoted slot is tracked per block,
//! and reconvergent joins get a fresh block parameter fed by every
//! predecessor edge. Loads become uses of the reaching value; stores and
//! the alloca itself disappear.
//!
//! A slot is promotable when its address never escapes: every use is the
//! direct address of a same-typed `load` or `store`, and the allocation is
//! a single element. Any path that can reach a load before a store keeps
//! the slot in memory.

use crate::analysis::cfg::CfgContext;
use crate::analysis::order::{is_acyclic, topo_order};
use crate::diag::Diag;
use crate::instr::Opcode;
use crate::module::{Function, Module, Param};
use crate::types::Type;
use crate::value::{SsaId, Value};
use std::collections::HashMap;

use super::{Pass, substitute_uses};

pub struct Mem2Reg;

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn run(&self, m: &mut Module) -> Result<bool, Diag> {
        let mut changed = false;
        for func in &mut m.funcs {
            changed |= run_on_function(func);
        }
        Ok(changed)
    }
}

fn run_on_function(func: &mut Function) -> bool {
    if func.blocks.is_empty() {
        return false;
    }
    {
        let cfg = CfgContext::new(func);
        if !is_acyclic(&cfg) {
            return false;
        }
    }
    let mut changed = false;
    // Promote one slot at a time; instruction indices shift after each
    // rewrite, so candidates are re-discovered per round. Slots that fail
    // (e.g. a read-before-write path) are remembered and skipped.
    let mut rejected: std::collections::HashSet<SsaId> = std::collections::HashSet::new();
    loop {
        let Some((site, var, ty)) = next_candidate(func, &rejected) else {
            break;
        };
        if promote(func, site, var, ty) {
            changed = true;
        } else {
            rejected.insert(var);
        }
    }
    changed
}

/// First alloca whose address is used only as a direct, same-typed
/// load/store address.
fn next_candidate(
    func: &Function,
    rejected: &std::collections::HashSet<SsaId>,
) -> Option<((usize, usize), SsaId, Type)> {
    for (bid, block) in func.blocks.iter().enumerate() {
        'candidate: for (iid, instr) in block.instrs.iter().enumerate() {
            if instr.op != Opcode::Alloca {
                continue;
            }
            let Some(var) = instr.result else { continue };
            if rejected.contains(&var) {
                continue;
            }
            if instr.operands[0] != Value::ConstInt(1) {
                continue;
            }
            let ty = instr.ty.clone();
            // Validate every use.
            for b in &func.blocks {
                for i in &b.instrs {
                    for (oi, v) in i.operands.iter().enumerate() {
                        if *v != Value::Temp(var) {
                            continue;
                        }
                        let address_use = oi == 0
                            && matches!(i.op, Opcode::Load | Opcode::Store)
                            && i.ty == ty;
                        if !address_use {
                            continue 'candidate;
                        }
                    }
                    for t in &i.targets {
                        if t.args.contains(&Value::Temp(var)) {
                            continue 'candidate;
                        }
                    }
                }
            }
            return Some(((bid, iid), var, ty));
        }
    }
    None
}

fn promote(func: &mut Function, site: (usize, usize), var: SsaId, ty: Type) -> bool {
    let cfg = CfgContext::new(func);
    let Some(order) = topo_order(&cfg) else {
        return false;
    };
    // Uses in unreachable blocks would be left dangling; bail.
    let reachable: Vec<bool> = {
        let mut r = vec![false; func.blocks.len()];
        for &b in &order {
            r[b] = true;
        }
        r
    };
    for (bid, block) in func.blocks.iter().enumerate() {
        if reachable[bid] {
            continue;
        }
        for i in &block.instrs {
            if i.operands.contains(&Value::Temp(var)) {
                return false;
            }
        }
    }

    let mut subst: HashMap<SsaId, Value> = HashMap::new();
    let resolve = |subst: &HashMap<SsaId, Value>, mut v: Value| -> Value {
        while let Value::Temp(id) = v {
            match subst.get(&id) {
                Some(next) => v = next.clone(),
                None => break,
            }
        }
        v
    };

    let mut out_val: HashMap<usize, Value> = HashMap::new();
    let mut new_params: Vec<(usize, SsaId)> = Vec::new();
    // (pred block, target slot) -> value to append as a branch argument
    let mut edge_args: Vec<(usize, usize, Value)> = Vec::new();
    let mut doomed: Vec<(usize, usize)> = vec![site];

    for &bid in &order {
        let mut cur: Option<Value> = if bid == 0 {
            None
        } else {
            let preds = cfg.predecessors(bid);
            let incoming: Vec<Option<&Value>> =
                preds.iter().map(|p| out_val.get(p)).collect();
            if incoming.iter().any(|v| v.is_none()) {
                None
            } else {
                let first = incoming[0].cloned();
                if incoming.iter().all(|v| v.cloned() == first) {
                    first
                } else {
                    // Reconvergent join: materialize a block parameter.
                    let id = func.reserve_temp();
                    new_params.push((bid, id));
                    for &p in preds {
                        let arg = out_val[&p].clone();
                        let Some(term) = func.blocks[p].terminator() else {
                            return false;
                        };
                        for (slot, t) in term.targets.iter().enumerate() {
                            if t.block == bid {
                                edge_args.push((p, slot, arg.clone()));
                            }
                        }
                    }
                    Some(Value::Temp(id))
                }
            }
        };
        for (iid, instr) in func.blocks[bid].instrs.iter().enumerate() {
            if instr.op == Opcode::Load && instr.operands[0] == Value::Temp(var) {
                let Some(result) = instr.result else {
                    doomed.push((bid, iid));
                    continue;
                };
                match &cur {
                    Some(v) => {
                        subst.insert(result, resolve(&subst, v.clone()));
                        doomed.push((bid, iid));
                    }
                    // A path reads the slot before any store; keep it in
                    // memory.
                    None => return false,
                }
            } else if instr.op == Opcode::Store && instr.operands[0] == Value::Temp(var) {
                cur = Some(resolve(&subst, instr.operands[1].clone()));
                doomed.push((bid, iid));
            }
        }
        if let Some(v) = cur {
            out_val.insert(bid, v);
        }
    }

    // Apply: params, edge arguments, deletions, substitutions.
    for (bid, id) in new_params {
        let name = format!("v{}", id);
        func.blocks[bid].params.push(Param { name, ty: ty.clone(), id });
    }
    for (pred, slot, arg) in edge_args {
        let arg = resolve(&subst, arg);
        let term = func.blocks[pred]
            .instrs
            .last_mut()
            .expect("terminated block");
        term.targets[slot].args.push(arg);
    }
    doomed.sort();
    for &(bid, iid) in doomed.iter().rev() {
        func.blocks[bid].instrs.remove(iid);
    }
    substitute_uses(func, &subst);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;
    use crate::verify::verify;

    fn run(src: &str) -> Module {
        let mut m = parse_module(src, "t.vil").unwrap();
        assert!(verify(&m).is_ok());
        Mem2Reg.run(&mut m).unwrap();
        assert!(verify(&m).is_ok(), "mem2reg must preserve verification");
        m
    }

    fn count_op(m: &Module, op: Opcode) -> usize {
        m.funcs[0]
            .blocks
            .iter()
            .flat_map(|b| &b.instrs)
            .filter(|i| i.op == op)
            .count()
    }

    #[test]
    fn test_straightline_promotion() {
        let m = run(
            r#"
module "m"
fn @f() -> i64 {
entry:
  %p = alloca i64, 1
  store i64, %p, 10
  %v = load i64, %p
  %w = add i64 %v, 1
  ret %w
}
"#,
        );
        assert_eq!(count_op(&m, Opcode::Alloca), 0);
        assert_eq!(count_op(&m, Opcode::Load), 0);
        assert_eq!(count_op(&m, Opcode::Store), 0);
        // %w = add 10, 1
        assert_eq!(
            m.funcs[0].blocks[0].instrs[0].operands[0],
            Value::ConstInt(10)
        );
    }

    #[test]
    fn test_reconvergent_join_gets_param() {
        let m = run(
            r#"
module "m"
fn @f(%c: i1) -> i64 {
entry:
  %p = alloca i64, 1
  store i64, %p, 0
  cbr %c, a, b
a:
  store i64, %p, 1
  br join
b:
  store i64, %p, 2
  br join
join:
  %v = load i64, %p
  ret %v
}
"#,
        );
        assert_eq!(count_op(&m, Opcode::Alloca), 0);
        let join = m.funcs[0].blocks.last().unwrap();
        assert_eq!(join.params.len(), 1);
        let a_term = m.funcs[0].blocks[1].terminator().unwrap();
        assert_eq!(a_term.targets[0].args, vec![Value::ConstInt(1)]);
    }

    #[test]
    fn test_escaping_address_not_promoted() {
        let m = run(
            r#"
module "m"
fn @f() -> i64 {
entry:
  %p = alloca i64, 1
  store i64, %p, 3
  %q = gep %p, 0
  %v = load i64, %q
  ret %v
}
"#,
        );
        assert_eq!(count_op(&m, Opcode::Alloca), 1);
    }

    #[test]
    fn test_cyclic_cfg_skipped() {
        let m = run(
            r#"
module "m"
fn @f() -> i64 {
entry:
  %p = alloca i64, 1
  store i64, %p, 0
  br head
head:
  %v = load i64, %p
  %c = icmp.slt i64 %v, 10
  cbr %c, body, out
body:
  %n = add i64 %v, 1
  store i64, %p, %n
  br head
out:
  ret %v
}
"#,
        );
        assert_eq!(count_op(&m, Opcode::Alloca), 1);
    }

    #[test]
    fn test_read_before_write_not_promoted() {
        let m = run(
            r#"
module "m"
fn @f() -> i64 {
entry:
  %p = alloca i64, 1
  %v = load i64, %p
  ret %v
}
"#,
        );
        assert_eq!(count_op(&m, Opcode::Alloca), 1);
    }
}
