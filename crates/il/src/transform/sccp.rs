//! Sparse conditional constant propagation
//!
//! Classic three-point lattice (unknown / constant / overdefined) driven
//! over SSA edges and executable CFG edges together, so constants feeding
//! a conditional branch prune the branch's dead edge before the dead side
//! can pollute the join. After the fixed point: constant uses are
//! substituted, decided branches are rewritten to plain `br`, and
//! unreachable blocks are dropped.

use crate::diag::Diag;
use crate::fold;
use crate::instr::{BranchTarget, Instr, OpKind, Opcode, schema};
use crate::module::{Function, Module};
use crate::types::Type;
use crate::value::{SsaId, Value};
use std::collections::{HashMap, HashSet, VecDeque};

use super::{Pass, remove_unreachable_blocks, substitute_uses};

pub struct Sccp;

#[derive(Debug, Clone, PartialEq)]
enum Lat {
    Top,
    Const(Value),
    Bottom,
}

impl Lat {
    fn meet(&self, other: &Lat) -> Lat {
        match (self, other) {
            (Lat::Top, x) | (x, Lat::Top) => x.clone(),
            (Lat::Const(a), Lat::Const(b)) if a == b => Lat::Const(a.clone()),
            _ => Lat::Bottom,
        }
    }
}

struct Solver<'a> {
    func: &'a Function,
    lattice: Vec<Lat>,
    block_exec: Vec<bool>,
    /// (block, target slot) edges proven executable
    edge_exec: HashSet<(usize, usize)>,
    ssa_work: VecDeque<SsaId>,
    cfg_work: VecDeque<(usize, usize)>,
    /// uses of each SSA id: (block, instr) sites to re-evaluate
    use_sites: HashMap<SsaId, Vec<(usize, usize)>>,
    /// param id -> (block, param position)
    param_pos: HashMap<SsaId, (usize, usize)>,
}

impl<'a> Solver<'a> {
    fn new(func: &'a Function) -> Self {
        let mut max_id = func.ssa_count() as usize;
        let mut use_sites: HashMap<SsaId, Vec<(usize, usize)>> = HashMap::new();
        let mut param_pos = HashMap::new();
        for (bid, block) in func.blocks.iter().enumerate() {
            for (pi, p) in block.params.iter().enumerate() {
                param_pos.insert(p.id, (bid, pi));
                max_id = max_id.max(p.id as usize + 1);
            }
            for (iid, instr) in block.instrs.iter().enumerate() {
                if let Some(r) = instr.result {
                    max_id = max_id.max(r as usize + 1);
                }
                for v in instr.uses() {
                    if let Value::Temp(id) = v {
                        use_sites.entry(*id).or_default().push((bid, iid));
                    }
                }
            }
        }
        Solver {
            func,
            lattice: vec![Lat::Top; max_id],
            block_exec: vec![false; func.blocks.len()],
            edge_exec: HashSet::new(),
            ssa_work: VecDeque::new(),
            cfg_work: VecDeque::new(),
            use_sites,
            param_pos,
        }
    }

    fn value_lat(&self, v: &Value) -> Lat {
        match v {
            Value::Temp(id) => self.lattice[*id as usize].clone(),
            Value::Global(_) => Lat::Bottom,
            konst => Lat::Const(konst.clone()),
        }
    }

    fn raise(&mut self, id: SsaId, to: Lat) {
        let slot = id as usize;
        let merged = self.lattice[slot].meet(&to);
        if merged != self.lattice[slot] {
            self.lattice[slot] = merged;
            self.ssa_work.push_back(id);
        }
    }

    fn solve(&mut self) {
        // Entry parameters are runtime inputs.
        for p in &self.func.blocks[0].params {
            self.lattice[p.id as usize] = Lat::Bottom;
        }
        self.mark_block(0);
        while !self.cfg_work.is_empty() || !self.ssa_work.is_empty() {
            while let Some((b, slot)) = self.cfg_work.pop_front() {
                self.flow_edge(b, slot);
            }
            while let Some(id) = self.ssa_work.pop_front() {
                if let Some(sites) = self.use_sites.get(&id).cloned() {
                    for (bid, iid) in sites {
                        if self.block_exec[bid] {
                            self.visit_instr(bid, iid);
                        }
                    }
                }
            }
        }
    }

    fn mark_block(&mut self, bid: usize) {
        if self.block_exec[bid] {
            return;
        }
        self.block_exec[bid] = true;
        for iid in 0..self.func.blocks[bid].instrs.len() {
            self.visit_instr(bid, iid);
        }
    }

    fn flow_edge(&mut self, bid: usize, slot: usize) {
        let first_time = self.edge_exec.insert((bid, slot));
        let term = match self.func.blocks[bid].terminator() {
            Some(t) => t,
            None => return,
        };
        let target = &term.targets[slot];
        let dest = target.block;
        // Feed destination parameters. Re-fed on every visit so argument
        // lattice updates propagate into already-executable edges.
        let args: Vec<Lat> = target.args.iter().map(|a| self.value_lat(a)).collect();
        let params: Vec<SsaId> = self.func.blocks[dest].params.iter().map(|p| p.id).collect();
        for (pid, lat) in params.into_iter().zip(args) {
            self.raise(pid, lat);
        }
        if first_time {
            self.mark_block(dest);
        }
    }

    fn visit_instr(&mut self, bid: usize, iid: usize) {
        let instr = &self.func.blocks[bid].instrs[iid];
        if instr.is_terminator() {
            self.visit_terminator(bid, instr.clone());
            return;
        }
        let Some(result) = instr.result else { return };
        let lat = self.eval(instr);
        self.raise(result, lat);
    }

    fn visit_terminator(&mut self, bid: usize, term: Instr) {
        match term.op {
            Opcode::Br => self.cfg_work.push_back((bid, 0)),
            Opcode::CBr => match self.value_lat(&term.operands[0]) {
                Lat::Const(Value::ConstBool(c)) => {
                    self.cfg_work.push_back((bid, if c { 0 } else { 1 }));
                }
                Lat::Const(_) | Lat::Bottom => {
                    self.cfg_work.push_back((bid, 0));
                    self.cfg_work.push_back((bid, 1));
                }
                Lat::Top => {}
            },
            Opcode::Switch => match self.value_lat(&term.operands[0]) {
                Lat::Const(Value::ConstInt(k)) => {
                    let slot = decide_switch(&term, k);
                    self.cfg_work.push_back((bid, slot));
                }
                Lat::Const(_) | Lat::Bottom => {
                    for slot in 0..term.targets.len() {
                        self.cfg_work.push_back((bid, slot));
                    }
                }
                Lat::Top => {}
            },
            Opcode::Invoke => {
                // Both continuations are reachable; the callee is opaque.
                if let Some(r) = term.result {
                    self.raise(r, Lat::Bottom);
                }
                self.cfg_work.push_back((bid, 0));
                self.cfg_work.push_back((bid, 1));
            }
            _ => {}
        }
    }

    fn eval(&self, instr: &Instr) -> Lat {
        let sch = schema(instr.op);
        // Calls, loads, landingpads, allocas: never constant.
        if matches!(
            sch.kind,
            OpKind::Call
                | OpKind::ICall
                | OpKind::Load
                | OpKind::Alloca
                | OpKind::Gep
                | OpKind::AddrOf
                | OpKind::Landingpad
        ) {
            return Lat::Bottom;
        }
        let mut consts = Vec::with_capacity(instr.operands.len());
        let mut any_bottom = false;
        for v in &instr.operands {
            match self.value_lat(v) {
                Lat::Top => return Lat::Top,
                Lat::Bottom => any_bottom = true,
                Lat::Const(c) => consts.push(c),
            }
        }
        if any_bottom {
            return Lat::Bottom;
        }
        match fold_instr(instr, &consts) {
            Some(v) => Lat::Const(v),
            None => Lat::Bottom,
        }
    }
}

/// Which target slot a constant scrutinee selects (first matching case
/// wins; duplicates are ignored).
fn decide_switch(term: &Instr, k: i64) -> usize {
    for (n, key) in term.case_keys.iter().enumerate() {
        if *key as i64 == fold::sign_extend(k, 32) {
            return n + 1;
        }
    }
    0
}

/// Fold a non-terminator instruction over constant operands. `None` when
/// the operation does not fold (would trap, unsupported kinds).
fn fold_instr(instr: &Instr, consts: &[Value]) -> Option<Value> {
    let bits = instr.ty.int_bits();
    match schema(instr.op).kind {
        OpKind::IntBin => {
            let (a, b) = (as_int(&consts[0])?, as_int(&consts[1])?);
            fold::int_binop(instr.op, bits, a, b).ok().map(Value::ConstInt)
        }
        OpKind::FloatBin => {
            let (a, b) = (as_float(&consts[0])?, as_float(&consts[1])?);
            Some(Value::ConstFloat(fold::float_binop(instr.op, a, b)))
        }
        OpKind::NumUnary => {
            if instr.ty.is_float() {
                Some(Value::ConstFloat(as_float(&consts[0])?.abs()))
            } else {
                Some(Value::ConstInt(fold::int_abs(bits, as_int(&consts[0])?)))
            }
        }
        OpKind::IntCmp => {
            let (a, b) = (as_int(&consts[0])?, as_int(&consts[1])?);
            let Opcode::ICmp(pred) = instr.op else { return None };
            Some(Value::ConstBool(fold::int_cmp(pred, bits, a, b)))
        }
        OpKind::FloatCmp => {
            let (a, b) = (as_float(&consts[0])?, as_float(&consts[1])?);
            let Opcode::FCmp(pred) = instr.op else { return None };
            Some(Value::ConstBool(fold::float_cmp(pred, a, b)))
        }
        OpKind::Convert => fold_convert(instr, &consts[0]),
        _ => None,
    }
}

fn fold_convert(instr: &Instr, v: &Value) -> Option<Value> {
    let from_bits = instr.ty.int_bits();
    let to_bits = instr.result_ty.int_bits();
    match instr.op {
        Opcode::Sext | Opcode::Zext | Opcode::Trunc => Some(Value::ConstInt(fold::convert_int(
            instr.op,
            from_bits,
            to_bits,
            as_int(v)?,
        ))),
        Opcode::SiToFp | Opcode::UiToFp => Some(Value::ConstFloat(fold::int_to_float(
            instr.op, from_bits, as_int(v)?,
        ))),
        Opcode::FpToSi | Opcode::FpToUi => fold::float_to_int(instr.op, to_bits, as_float(v)?)
            .ok()
            .map(Value::ConstInt),
        Opcode::Bitcast => match (instr.ty.is_float(), instr.result_ty.is_float()) {
            (true, false) => {
                let (raw, _) = fold::bitcast(true, to_bits, 0, as_float(v)?);
                Some(Value::ConstInt(raw))
            }
            (false, true) => {
                let w = if instr.result_ty == Type::F32 { 32 } else { 64 };
                let (_, f) = fold::bitcast(false, w, as_int(v)?, 0.0);
                Some(Value::ConstFloat(f))
            }
            _ => None,
        },
        // Pointer/integer casts fold only through real addresses.
        _ => None,
    }
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::ConstInt(n) => Some(*n),
        Value::ConstBool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::ConstFloat(x) => Some(*x),
        _ => None,
    }
}

fn run_on_function(func: &mut Function) -> bool {
    if func.blocks.is_empty() {
        return false;
    }
    let mut solver = Solver::new(func);
    solver.solve();
    let lattice = solver.lattice;

    // 1. Substitute constant results for their uses.
    let mut map: HashMap<SsaId, Value> = HashMap::new();
    for (id, lat) in lattice.iter().enumerate() {
        if let Lat::Const(c) = lat {
            map.insert(id as SsaId, c.clone());
        }
    }
    let mut changed = !map.is_empty();
    substitute_uses(func, &map);

    // 2. Rewrite decided conditional branches to plain `br`.
    for block in &mut func.blocks {
        let Some(term) = block.instrs.last_mut() else { continue };
        let decided: Option<BranchTarget> = match term.op {
            Opcode::CBr => match &term.operands[0] {
                Value::ConstBool(c) => {
                    Some(term.targets[if *c { 0 } else { 1 }].clone())
                }
                _ => None,
            },
            Opcode::Switch => match &term.operands[0] {
                Value::ConstInt(k) => {
                    let slot = decide_switch(term, *k);
                    Some(term.targets[slot].clone())
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(target) = decided {
            let mut br = Instr::new(Opcode::Br);
            br.loc = term.loc;
            br.targets.push(target);
            *term = br;
            changed = true;
        }
    }

    // 3. Unreachable blocks (never marked executable) fall away once the
    //    decided branches stop referencing them.
    changed |= remove_unreachable_blocks(func);
    changed
}

impl Pass for Sccp {
    fn name(&self) -> &'static str {
        "sccp"
    }

    fn run(&self, m: &mut Module) -> Result<bool, Diag> {
        let mut changed = false;
        for func in &mut m.funcs {
            changed |= run_on_function(func);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;
    use crate::verify::verify;

    fn run(src: &str) -> Module {
        let mut m = parse_module(src, "t.vil").unwrap();
        assert!(verify(&m).is_ok());
        Sccp.run(&mut m).unwrap();
        assert!(verify(&m).is_ok(), "sccp must preserve verification");
        m
    }

    #[test]
    fn test_folds_constant_arithmetic() {
        let m = run(
            r#"
module "s"
fn @main() -> i64 {
entry:
  %a = add i64 40, 2
  ret %a
}
"#,
        );
        let term = m.funcs[0].blocks[0].terminator().unwrap();
        assert_eq!(term.operands[0], Value::ConstInt(42));
    }

    #[test]
    fn test_prunes_dead_branch() {
        let m = run(
            r#"
module "s"
fn @f() -> i64 {
entry:
  %c = icmp.slt i64 1, 2
  cbr %c, yes, no
yes:
  ret 1
no:
  ret 0
}
"#,
        );
        let f = &m.funcs[0];
        assert_eq!(f.blocks.len(), 2);
        assert_eq!(f.blocks[0].terminator().unwrap().op, Opcode::Br);
    }

    #[test]
    fn test_propagates_through_block_params() {
        let m = run(
            r#"
module "s"
fn @f(%c: i1) -> i64 {
entry:
  cbr %c, a, b
a:
  br join(5)
b:
  br join(5)
join(%v: i64):
  %r = add i64 %v, 1
  ret %r
}
"#,
        );
        // both edges feed 5, so %v is constant and %r folds to 6
        let last = m.funcs[0].blocks.last().unwrap();
        assert_eq!(last.terminator().unwrap().operands[0], Value::ConstInt(6));
    }

    #[test]
    fn test_divergent_params_stay() {
        let m = run(
            r#"
module "s"
fn @f(%c: i1) -> i64 {
entry:
  cbr %c, a, b
a:
  br join(5)
b:
  br join(6)
join(%v: i64):
  ret %v
}
"#,
        );
        let last = m.funcs[0].blocks.last().unwrap();
        assert!(matches!(last.terminator().unwrap().operands[0], Value::Temp(_)));
    }

    #[test]
    fn test_does_not_fold_trap() {
        let m = run(
            r#"
module "s"
fn @f() -> i64 {
entry:
  %q = sdiv i64 1, 0
  ret %q
}
"#,
        );
        assert_eq!(m.funcs[0].blocks[0].instrs[0].op, Opcode::Sdiv);
    }

    #[test]
    fn test_switch_decided() {
        let m = run(
            r#"
module "s"
fn @f() -> i64 {
entry:
  switch.i32 2, def [1 -> one, 2 -> two]
one:
  ret 1
two:
  ret 2
def:
  ret 0
}
"#,
        );
        let f = &m.funcs[0];
        assert_eq!(f.blocks[0].terminator().unwrap().op, Opcode::Br);
        assert_eq!(f.blocks.len(), 2);
        assert_eq!(
            f.blocks[f.blocks[0].terminator().unwrap().targets[0].block]
                .terminator()
                .unwrap()
                .operands[0],
            Value::ConstInt(2)
        );
    }
}
