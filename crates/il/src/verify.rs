//! IL verifier
//!
//! A pure checker: takes a module, returns a certification token or the
//! full list of structured diagnostics. Nothing here mutates the module.
//!
//! Check order follows the pipeline the rest of the system assumes:
//! structure, typing, SSA + dominance, branch edges, terminator placement,
//! exception-handler scope, extern signatures. Diagnostic codes are stable
//! (`IL-SSA-001` is SSA redefinition everywhere, forever) so tests and
//! tooling can match on them.

use crate::analysis::cfg::CfgContext;
use crate::analysis::dom::DomTree;
use crate::diag::Diag;
use crate::instr::{BlockId, Instr, OpKind, Opcode, SourceLoc, schema};
use crate::module::{Function, Module};
use crate::sigtable;
use crate::types::Type;
use crate::value::{SsaId, Value};

/// Proof that a module passed verification. Only this crate can mint one.
#[derive(Debug, Clone, Copy)]
pub struct Certified(());

/// Verify a module. Returns every diagnostic found, not just the first.
pub fn verify(m: &Module) -> Result<Certified, Vec<Diag>> {
    let mut v = Verifier {
        m,
        diags: Vec::new(),
    };
    v.run();
    if v.diags.is_empty() {
        Ok(Certified(()))
    } else {
        Err(v.diags)
    }
}

struct Verifier<'a> {
    m: &'a Module,
    diags: Vec<Diag>,
}

/// Where an SSA id is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefSite {
    /// Block parameter: defined at block entry
    Param(BlockId),
    /// Instruction result at (block, index)
    Instr(BlockId, usize),
    /// `invoke` result: visible only along the normal edge, so treated as
    /// defined at the normal destination's entry
    InvokeResult(BlockId),
}

struct FnIndex {
    /// SSA id -> type of the defining occurrence
    types: Vec<Option<Type>>,
    sites: Vec<Option<DefSite>>,
}

impl Verifier<'_> {
    fn diag(&mut self, code: &'static str, msg: String, loc: SourceLoc) {
        let mut d = Diag::error(code, msg);
        if let Some(file) = self.m.file_name(loc) {
            d = d.with_loc(file, loc.line, loc.col);
        }
        self.diags.push(d);
    }

    fn run(&mut self) {
        let m = self.m;
        let mut names = std::collections::HashSet::new();
        for f in &m.funcs {
            if !names.insert(f.name.as_str()) {
                self.diags.push(Diag::error(
                    "IL-STRUCT-005",
                    format!("duplicate function name @{}", f.name),
                ));
            }
        }
        for f in &m.funcs {
            self.check_function(f);
        }
        self.check_externs();
    }

    // ---- 1. structure ----

    fn check_structure(&mut self, f: &Function) -> bool {
        let mut ok = true;
        if f.blocks.is_empty() {
            self.diags.push(Diag::error(
                "IL-STRUCT-001",
                format!("function @{} has no blocks", f.name),
            ));
            return false;
        }
        let mut names = std::collections::HashSet::new();
        for b in &f.blocks {
            if !names.insert(b.name.as_str()) {
                self.diags.push(Diag::error(
                    "IL-STRUCT-004",
                    format!("duplicate block name '{}' in @{}", b.name, f.name),
                ));
                ok = false;
            }
        }
        for b in &f.blocks {
            match b.instrs.last() {
                Some(last) if last.is_terminator() => {}
                _ => {
                    self.diags.push(Diag::error(
                        "IL-STRUCT-002",
                        format!("block '{}' in @{} does not end in a terminator", b.name, f.name),
                    ));
                    ok = false;
                }
            }
            for i in b.instrs.iter().take(b.instrs.len().saturating_sub(1)) {
                if i.is_terminator() {
                    self.diag(
                        "IL-TERM-001",
                        format!(
                            "terminator {} in non-terminal position in block '{}' of @{}",
                            i.op, b.name, f.name
                        ),
                        i.loc,
                    );
                    ok = false;
                }
            }
            // Branch targets must be resolved and in range.
            for i in &b.instrs {
                for t in &i.targets {
                    if t.block >= f.blocks.len() {
                        self.diag(
                            "IL-EDGE-001",
                            format!("branch to unknown block in '{}' of @{}", b.name, f.name),
                            i.loc,
                        );
                        ok = false;
                    }
                    if t.block == 0 {
                        self.diag(
                            "IL-STRUCT-006",
                            format!("entry block of @{} may not have predecessors", f.name),
                            i.loc,
                        );
                        ok = false;
                    }
                }
            }
        }
        // Entry parameters are exactly the declared function parameters.
        let entry = &f.blocks[0];
        let entry_types: Vec<&Type> = entry.params.iter().map(|p| &p.ty).collect();
        let sig_types: Vec<&Type> = f.sig.params.iter().collect();
        if entry_types != sig_types {
            self.diags.push(Diag::error(
                "IL-STRUCT-007",
                format!(
                    "entry block parameters of @{} do not match the function signature",
                    f.name
                ),
            ));
            ok = false;
        }
        ok
    }

    // ---- 3. SSA defs ----

    fn build_index(&mut self, f: &Function) -> FnIndex {
        let mut max_id: usize = f.ssa_count() as usize;
        for b in &f.blocks {
            for p in &b.params {
                max_id = max_id.max(p.id as usize + 1);
            }
            for i in &b.instrs {
                if let Some(r) = i.result {
                    max_id = max_id.max(r as usize + 1);
                }
            }
        }
        let mut idx = FnIndex {
            types: vec![None; max_id],
            sites: vec![None; max_id],
        };
        let mut define = |verifier: &mut Self, id: SsaId, ty: Type, site: DefSite, loc: SourceLoc| {
            let slot = id as usize;
            if idx.sites[slot].is_some() {
                verifier.diag(
                    "IL-SSA-001",
                    format!("SSA id %{} defined more than once in @{}", id, f.name),
                    loc,
                );
            } else {
                idx.sites[slot] = Some(site);
                idx.types[slot] = Some(ty);
            }
        };
        for (bid, b) in f.blocks.iter().enumerate() {
            for p in &b.params {
                define(self, p.id, p.ty.clone(), DefSite::Param(bid), SourceLoc::NONE);
            }
            for (iid, i) in b.instrs.iter().enumerate() {
                if let Some(r) = i.result {
                    let site = if i.op == Opcode::Invoke {
                        DefSite::InvokeResult(i.targets[0].block)
                    } else {
                        DefSite::Instr(bid, iid)
                    };
                    define(self, r, i.result_ty.clone(), site, i.loc);
                }
            }
        }
        idx
    }

    // ---- value typing ----

    /// The statically-known type of a value, if it has one. Literal ints,
    /// floats and null are polymorphic and check against context instead.
    fn value_type(&self, idx: &FnIndex, v: &Value) -> Option<Type> {
        match v {
            Value::Temp(id) => idx.types.get(*id as usize).cloned().flatten(),
            Value::ConstBool(_) => Some(Type::I1),
            Value::ConstStr(_) => Some(Type::Str),
            Value::ConstInt(_) | Value::ConstFloat(_) | Value::Null => None,
            Value::Global(name) => {
                if let Some(g) = self.m.global(name) {
                    Some(g.ty.clone())
                } else if let Some(f) = self.m.func(name) {
                    Some(Type::Func(Box::new(f.sig.clone())))
                } else {
                    self.m
                        .extern_sig(name)
                        .map(|sig| Type::Func(Box::new(sig.clone())))
                }
            }
        }
    }

    fn literal_fits(v: &Value, expected: &Type) -> bool {
        match v {
            Value::ConstInt(_) => expected.is_int(),
            Value::ConstFloat(_) => expected.is_float(),
            Value::Null => matches!(
                expected,
                Type::Ptr | Type::Str | Type::Array(_) | Type::Func(_)
            ),
            _ => true,
        }
    }

    fn check_value(
        &mut self,
        code: &'static str,
        idx: &FnIndex,
        f: &Function,
        v: &Value,
        expected: &Type,
        what: &str,
        loc: SourceLoc,
    ) {
        match self.value_type(idx, v) {
            Some(actual) => {
                if &actual != expected {
                    self.diag(
                        code,
                        format!(
                            "{} in @{}: expected {}, found {} ({})",
                            what, f.name, expected, actual, v
                        ),
                        loc,
                    );
                }
            }
            None => {
                if let Value::Temp(id) = v {
                    self.diag(
                        "IL-SSA-003",
                        format!("use of undefined temp %{} in @{}", id, f.name),
                        loc,
                    );
                } else if let Value::Global(name) = v {
                    self.diag(
                        code,
                        format!("unknown symbol @{} in @{}", name, f.name),
                        loc,
                    );
                } else if !Self::literal_fits(v, expected) {
                    self.diag(
                        code,
                        format!(
                            "{} in @{}: literal {} does not fit type {}",
                            what, f.name, v, expected
                        ),
                        loc,
                    );
                }
            }
        }
    }

    // ---- 2. per-instruction typing + 4. edges ----

    fn check_instr_types(&mut self, f: &Function, idx: &FnIndex, b: BlockId, instr: &Instr) {
        let i = instr;
        let loc = i.loc;
        let sch = schema(i.op);
        match sch.kind {
            OpKind::IntBin => {
                if !i.ty.is_int() {
                    self.diag(
                        "IL-TYPE-001",
                        format!("{} requires an integer type, got {} in @{}", i.op, i.ty, f.name),
                        loc,
                    );
                }
                for v in &i.operands {
                    self.check_value("IL-TYPE-002", idx, f, v, &i.ty, "operand", loc);
                }
                self.expect_result_ty(f, i, &i.ty.clone());
            }
            OpKind::FloatBin => {
                if !i.ty.is_float() {
                    self.diag(
                        "IL-TYPE-001",
                        format!("{} requires a float type, got {} in @{}", i.op, i.ty, f.name),
                        loc,
                    );
                }
                for v in &i.operands {
                    self.check_value("IL-TYPE-002", idx, f, v, &i.ty, "operand", loc);
                }
                self.expect_result_ty(f, i, &i.ty.clone());
            }
            OpKind::NumUnary => {
                if !i.ty.is_int() && !i.ty.is_float() {
                    self.diag(
                        "IL-TYPE-001",
                        format!("{} requires a numeric type, got {} in @{}", i.op, i.ty, f.name),
                        loc,
                    );
                }
                self.check_value("IL-TYPE-002", idx, f, &i.operands[0], &i.ty, "operand", loc);
                self.expect_result_ty(f, i, &i.ty.clone());
            }
            OpKind::IntCmp | OpKind::FloatCmp => {
                let want_float = sch.kind == OpKind::FloatCmp;
                if want_float != i.ty.is_float() || (!want_float && !i.ty.is_int()) {
                    self.diag(
                        "IL-TYPE-001",
                        format!("{} on unsupported type {} in @{}", i.op, i.ty, f.name),
                        loc,
                    );
                }
                for v in &i.operands {
                    self.check_value("IL-TYPE-002", idx, f, v, &i.ty, "operand", loc);
                }
                self.expect_result_ty(f, i, &Type::I1);
            }
            OpKind::Convert => self.check_convert(f, idx, i),
            OpKind::Alloca => {
                self.check_value("IL-TYPE-002", idx, f, &i.operands[0], &Type::I64, "count", loc);
                self.expect_result_ty(f, i, &Type::Ptr);
                if i.ty.store_size() == 0 {
                    self.diag(
                        "IL-TYPE-003",
                        format!("alloca of unsized type {} in @{}", i.ty, f.name),
                        loc,
                    );
                }
            }
            OpKind::Load => {
                self.check_value("IL-TYPE-004", idx, f, &i.operands[0], &Type::Ptr, "address", loc);
                self.expect_result_ty(f, i, &i.ty.clone());
                if i.ty.store_size() == 0 {
                    self.diag(
                        "IL-TYPE-003",
                        format!("load of unsized type {} in @{}", i.ty, f.name),
                        loc,
                    );
                }
            }
            OpKind::Store => {
                self.check_value("IL-TYPE-004", idx, f, &i.operands[0], &Type::Ptr, "address", loc);
                self.check_value("IL-TYPE-002", idx, f, &i.operands[1], &i.ty.clone(), "value", loc);
                if i.ty.store_size() == 0 {
                    self.diag(
                        "IL-TYPE-003",
                        format!("store of unsized type {} in @{}", i.ty, f.name),
                        loc,
                    );
                }
            }
            OpKind::Gep => {
                self.check_value("IL-TYPE-004", idx, f, &i.operands[0], &Type::Ptr, "base", loc);
                self.check_value("IL-TYPE-002", idx, f, &i.operands[1], &Type::I64, "offset", loc);
                self.expect_result_ty(f, i, &Type::Ptr);
            }
            OpKind::AddrOf => {
                match &i.operands[0] {
                    Value::Global(name) => {
                        if self.m.global(name).is_none()
                            && self.m.func(name).is_none()
                            && self.m.extern_sig(name).is_none()
                        {
                            self.diag(
                                "IL-TYPE-005",
                                format!("addrof of unknown symbol @{} in @{}", name, f.name),
                                loc,
                            );
                        }
                    }
                    other => self.diag(
                        "IL-TYPE-005",
                        format!("addrof requires a global symbol, found {} in @{}", other, f.name),
                        loc,
                    ),
                }
                self.expect_result_ty(f, i, &Type::Ptr);
            }
            OpKind::Ret => {
                if f.sig.ret == Type::Void {
                    if !i.operands.is_empty() {
                        self.diag(
                            "IL-TYPE-006",
                            format!("ret with a value in void function @{}", f.name),
                            loc,
                        );
                    }
                } else if i.operands.is_empty() {
                    self.diag(
                        "IL-TYPE-006",
                        format!("ret without a value in @{} returning {}", f.name, f.sig.ret),
                        loc,
                    );
                } else {
                    let ret = f.sig.ret.clone();
                    self.check_value("IL-TYPE-006", idx, f, &i.operands[0], &ret, "return value", loc);
                }
            }
            OpKind::Br => self.check_edges(f, idx, i),
            OpKind::CBr => {
                self.check_value("IL-TYPE-007", idx, f, &i.operands[0], &Type::I1, "condition", loc);
                self.check_edges(f, idx, i);
            }
            OpKind::Switch => {
                self.check_value("IL-TYPE-007", idx, f, &i.operands[0], &Type::I32, "scrutinee", loc);
                self.check_edges(f, idx, i);
            }
            OpKind::Unreachable => {}
            OpKind::Resume => {} // scope checked in the EH pass
            OpKind::Call | OpKind::Invoke => {
                self.check_call(f, idx, b, i);
                if sch.kind == OpKind::Invoke {
                    self.check_edges(f, idx, i);
                }
            }
            OpKind::ICall => {
                match self.value_type(idx, &i.operands[0]) {
                    Some(Type::Ptr) | None => {}
                    Some(Type::Func(sig)) => {
                        if sig.params != i.sig_params || sig.ret != i.result_ty {
                            self.diag(
                                "IL-TYPE-008",
                                format!(
                                    "icall signature mismatch in @{}: pointer is {}, call says fn({}) -> {}",
                                    f.name,
                                    Type::Func(sig),
                                    i.sig_params
                                        .iter()
                                        .map(|t| t.to_string())
                                        .collect::<Vec<_>>()
                                        .join(", "),
                                    i.result_ty
                                ),
                                loc,
                            );
                        }
                    }
                    Some(other) => self.diag(
                        "IL-TYPE-008",
                        format!("icall through non-pointer {} in @{}", other, f.name),
                        loc,
                    ),
                }
                let args = &i.operands[1..];
                if args.len() != i.sig_params.len() {
                    self.diag(
                        "IL-TYPE-008",
                        format!(
                            "icall in @{} passes {} args, signature has {}",
                            f.name,
                            args.len(),
                            i.sig_params.len()
                        ),
                        loc,
                    );
                } else {
                    for (arg, ty) in args.iter().zip(i.sig_params.clone()) {
                        self.check_value("IL-TYPE-008", idx, f, arg, &ty, "argument", loc);
                    }
                }
                self.check_tail_position(f, b, i);
            }
            OpKind::Landingpad => {
                self.expect_result_ty(f, i, &Type::Ptr);
            }
        }
    }

    fn expect_result_ty(&mut self, f: &Function, i: &Instr, want: &Type) {
        if i.result.is_some() && &i.result_ty != want {
            self.diag(
                "IL-TYPE-009",
                format!(
                    "{} result must have type {}, found {} in @{}",
                    i.op, want, i.result_ty, f.name
                ),
                i.loc,
            );
        }
    }

    fn check_convert(&mut self, f: &Function, idx: &FnIndex, i: &Instr) {
        let loc = i.loc;
        let from = &i.ty;
        let to = &i.result_ty;
        let ok = match i.op {
            Opcode::Sext | Opcode::Zext => {
                from.is_int() && to.is_int() && from.int_bits() < to.int_bits()
            }
            Opcode::Trunc => from.is_int() && to.is_int() && from.int_bits() > to.int_bits(),
            Opcode::SiToFp | Opcode::UiToFp => from.is_int() && to.is_float(),
            Opcode::FpToSi | Opcode::FpToUi => from.is_float() && to.is_int(),
            Opcode::Bitcast => {
                let width = |t: &Type| match t {
                    Type::F32 => 32,
                    Type::F64 => 64,
                    other => other.int_bits(),
                };
                width(from) != 0 && width(from) == width(to) && from != to
            }
            Opcode::PtrToInt => *from == Type::Ptr && *to == Type::I64,
            Opcode::IntToPtr => *from == Type::I64 && *to == Type::Ptr,
            _ => true,
        };
        if !ok {
            self.diag(
                "IL-TYPE-010",
                format!("invalid conversion {} {} to {} in @{}", i.op, from, to, f.name),
                loc,
            );
        }
        self.check_value("IL-TYPE-002", idx, f, &i.operands[0], from, "operand", loc);
    }

    fn check_call(&mut self, f: &Function, idx: &FnIndex, b: BlockId, i: &Instr) {
        let loc = i.loc;
        let Some(callee) = i.callee.as_deref() else {
            self.diag("IL-TYPE-011", format!("call without callee in @{}", f.name), loc);
            return;
        };
        let sig = if let Some(callee_fn) = self.m.func(callee) {
            Some(callee_fn.sig.clone())
        } else {
            self.m.extern_sig(callee).cloned()
        };
        let Some(sig) = sig else {
            self.diag(
                "IL-TYPE-011",
                format!("call to unknown callee @{} in @{}", callee, f.name),
                loc,
            );
            return;
        };
        if i.operands.len() != sig.params.len() {
            self.diag(
                "IL-TYPE-011",
                format!(
                    "call to @{} in @{} passes {} args, signature has {}",
                    callee,
                    f.name,
                    i.operands.len(),
                    sig.params.len()
                ),
                loc,
            );
        } else {
            for (arg, ty) in i.operands.iter().zip(sig.params.iter()) {
                self.check_value("IL-TYPE-011", idx, f, arg, ty, "argument", loc);
            }
        }
        if i.result_ty != sig.ret {
            self.diag(
                "IL-TYPE-011",
                format!(
                    "call to @{} in @{} declares return {}, signature returns {}",
                    callee, f.name, i.result_ty, sig.ret
                ),
                loc,
            );
        }
        if i.op == Opcode::Call {
            self.check_tail_position(f, b, i);
        }
    }

    /// The tail hint requires the call to be immediately followed by a
    /// `ret` of the call's result (or a bare `ret` for void).
    fn check_tail_position(&mut self, f: &Function, b: BlockId, i: &Instr) {
        if !i.tail {
            return;
        }
        let block = &f.blocks[b];
        let pos = block
            .instrs
            .iter()
            .position(|x| std::ptr::eq(x, i))
            .unwrap_or(usize::MAX);
        let ok = match block.instrs.get(pos.wrapping_add(1)) {
            Some(next) if next.op == Opcode::Ret => match (&i.result, next.operands.first()) {
                (Some(r), Some(Value::Temp(used))) => r == used,
                (None, None) => true,
                _ => i.result_ty == Type::Void && next.operands.is_empty(),
            },
            _ => false,
        };
        if !ok {
            self.diag(
                "IL-TYPE-012",
                format!("tail call not in tail position in @{}", f.name),
                i.loc,
            );
        }
    }

    fn check_edges(&mut self, f: &Function, idx: &FnIndex, i: &Instr) {
        for t in &i.targets {
            let Some(dest) = f.blocks.get(t.block) else {
                continue; // already reported by the structural pass
            };
            if t.args.len() != dest.params.len() {
                self.diag(
                    "IL-EDGE-002",
                    format!(
                        "branch to '{}' in @{} passes {} args, block expects {}",
                        dest.name,
                        f.name,
                        t.args.len(),
                        dest.params.len()
                    ),
                    i.loc,
                );
                continue;
            }
            for (arg, param) in t.args.iter().zip(dest.params.clone()) {
                self.check_value("IL-EDGE-003", idx, f, arg, &param.ty, "branch argument", i.loc);
            }
        }
    }

    // ---- 3b. dominance ----

    fn check_dominance(&mut self, f: &Function, idx: &FnIndex) {
        let cfg = CfgContext::new(f);
        let dom = DomTree::new(f, &cfg);
        for (bid, block) in f.blocks.iter().enumerate() {
            if bid != 0 && !dom.is_reachable(bid) {
                // Dominance is defined over reachable code only.
                continue;
            }
            for (iid, instr) in block.instrs.iter().enumerate() {
                for v in instr.uses() {
                    let Value::Temp(id) = v else { continue };
                    let Some(Some(site)) = idx.sites.get(*id as usize) else {
                        continue; // undefined temp reported by typing pass
                    };
                    let dominated = match *site {
                        DefSite::Param(db) => db == bid || dom.dominates(db, bid),
                        DefSite::Instr(db, di) => {
                            if db == bid {
                                di < iid
                            } else {
                                dom.dominates(db, bid)
                            }
                        }
                        DefSite::InvokeResult(normal) => {
                            normal == bid || dom.dominates(normal, bid)
                        }
                    };
                    if !dominated {
                        self.diag(
                            "IL-SSA-002",
                            format!(
                                "use of %{} in block '{}' of @{} is not dominated by its definition",
                                id, block.name, f.name
                            ),
                            instr.loc,
                        );
                    }
                }
            }
        }
    }

    // ---- 6. exception-handler scope ----

    fn check_eh(&mut self, f: &Function) {
        let cfg = CfgContext::new(f);
        let dom = DomTree::new(f, &cfg);
        let n = f.blocks.len();

        // Handler blocks: unwind targets of invokes.
        let mut is_handler = vec![false; n];
        for block in &f.blocks {
            for i in &block.instrs {
                if i.op == Opcode::Invoke {
                    if let Some(t) = i.targets.get(1) {
                        if t.block < n {
                            is_handler[t.block] = true;
                        }
                    }
                }
            }
        }

        for (bid, block) in f.blocks.iter().enumerate() {
            let starts_with_lp = block.instrs.first().is_some_and(|i| i.op == Opcode::Landingpad);
            if is_handler[bid] {
                if !starts_with_lp {
                    self.diags.push(Diag::error(
                        "IL-EH-001",
                        format!(
                            "handler block '{}' in @{} must begin with landingpad",
                            block.name, f.name
                        ),
                    ));
                }
                // Reachable exclusively via unwind edges.
                for &p in cfg.predecessors(bid) {
                    let pred_term = f.blocks[p].terminator();
                    let via_unwind = pred_term.is_some_and(|t| {
                        t.op == Opcode::Invoke && t.targets.get(1).is_some_and(|u| u.block == bid)
                    });
                    if !via_unwind {
                        self.diags.push(Diag::error(
                            "IL-EH-002",
                            format!(
                                "handler block '{}' in @{} is reachable from '{}' by a non-unwind edge",
                                block.name, f.name, f.blocks[p].name
                            ),
                        ));
                    }
                }
                if !block.params.is_empty() {
                    self.diags.push(Diag::error(
                        "IL-EH-004",
                        format!(
                            "handler block '{}' in @{} may not declare parameters",
                            block.name, f.name
                        ),
                    ));
                }
            }
            for (iid, i) in block.instrs.iter().enumerate() {
                if i.op == Opcode::Landingpad && (iid != 0 || !is_handler[bid]) {
                    self.diag(
                        "IL-EH-001",
                        format!(
                            "landingpad outside a handler block head in '{}' of @{}",
                            block.name, f.name
                        ),
                        i.loc,
                    );
                }
                if i.op == Opcode::Resume {
                    // Must sit inside some handler scope: dominated by a
                    // handler block. Scopes nest by dominance, so the
                    // nearest dominating handler is the resume's scope.
                    let in_scope = (0..n).any(|h| is_handler[h] && dom.dominates(h, bid));
                    if !in_scope {
                        self.diag(
                            "IL-EH-003",
                            format!(
                                "resume outside any handler scope in '{}' of @{}",
                                block.name, f.name
                            ),
                            i.loc,
                        );
                    }
                }
            }
        }
    }

    // ---- 7. externs vs the signature table ----

    fn check_externs(&mut self) {
        let m = self.m;
        for e in &m.externs {
            if let Some(entry) = sigtable::lookup(&e.name) {
                if entry.sig != e.sig {
                    self.diags.push(Diag::error(
                        "IL-EXT-001",
                        format!(
                            "extern @{} declared as {} but the runtime signature is {}",
                            e.name,
                            Type::Func(Box::new(e.sig.clone())),
                            Type::Func(Box::new(entry.sig.clone())),
                        ),
                    ));
                }
            }
        }
    }

    fn check_function(&mut self, f: &Function) {
        if !self.check_structure(f) {
            // Typing and dominance assume structural sanity.
            return;
        }
        let idx = self.build_index(f);
        for (bid, block) in f.blocks.iter().enumerate() {
            for instr in &block.instrs {
                self.check_instr_types(f, &idx, bid, instr);
            }
        }
        self.check_dominance(f, &idx);
        self.check_eh(f);
    }
}
