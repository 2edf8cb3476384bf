//! Instruction execution
//!
//! The execution state owns the frame stack, the switch-backend cache, the
//! interned string pool, global cells, and the active-handler stack. All
//! per-execution state lives here, so the interpreter is reentrant: one
//! `ExecState` per running activation, nothing hidden in globals.
//!
//! # Handle ownership
//!
//! Register slots own one refcount per held handle. [`ExecState::eval`]
//! returns borrowed copies; any value moving into an owning slot (register,
//! branch scratch, callee argument, return value) is retained first via
//! [`ExecState::retained`]. Raw memory (`alloca` cells, global cells) holds
//! borrowed handle words and never adjusts refcounts; `load` of a handle
//! type retains into the destination register.
//!
//! # Dispatch
//!
//! `VIPER_DISPATCH` picks the loop at VM construction: `table` drives a
//! function-pointer table indexed by opcode rule class, `switch` (and
//! `threaded`, which stable Rust cannot express as computed goto) drives a
//! `match`. Both call the same handler functions.

use crate::config::{DispatchMode, VmConfig};
use crate::ffi::{self, Binding};
use crate::frame::Frame;
use crate::rtval::RtValue;
use crate::switch_cache::SwitchBackend;
use std::collections::HashMap;
use viper_il::instr::{Instr, OpKind, Opcode, schema};
use viper_il::module::{Function, GlobalInit, Module};
use viper_il::types::Type;
use viper_il::value::Value;
use viper_il::{Certified, fold};
use viper_runtime::error::{Trap, TrapKind};
use viper_runtime::{heap, strings};

/// Function "addresses" handed out by `addrof`: module functions are
/// `index + 1`, externs live above `EXTERN_BASE`. Both are opaque to IL.
const EXTERN_BASE: usize = 1 << 48;

/// Control-flow outcome of one executed instruction.
#[derive(Debug)]
pub enum Flow {
    /// Fall through to the next instruction
    Next,
    /// Block/frame pointer already updated
    Jumped,
    /// Outermost frame returned
    Halted(RtValue),
    /// Unhandled trap
    Fatal(Trap),
}

struct HandlerEntry {
    /// Frame that owns the unwind destination
    frame_index: usize,
    block: usize,
}

pub struct ExecState<'m> {
    module: &'m Module,
    pub config: VmConfig,
    frames: Vec<Frame>,
    handler_stack: Vec<HandlerEntry>,
    bindings: HashMap<String, Binding>,
    func_index: HashMap<&'m str, usize>,
    reg_counts: Vec<usize>,
    /// Interned handles for the module string pool, owned by the state
    string_pool: Vec<*mut u8>,
    /// Global constant cells (8-byte words; handle words are borrowed)
    globals: HashMap<&'m str, Box<[u8; 8]>>,
    /// Extra owned handles backing `str` globals
    global_handles: Vec<*mut u8>,
    switch_caches: HashMap<(usize, usize, usize), SwitchBackend>,
    pub steps_retired: u64,
    /// Optional per-instruction trace sink (also receives tailcall lines)
    pub trace: Option<crate::trace::TraceSink>,
}

impl<'m> ExecState<'m> {
    /// Build an execution state for a verified module. The certification
    /// token is the admission ticket: unverified IL never reaches here.
    pub fn new(module: &'m Module, _cert: Certified, config: VmConfig) -> Self {
        viper_runtime::heap::set_rc_debug(config.rc_debug);
        let string_pool: Vec<*mut u8> = module
            .strings
            .iter()
            .map(|s| strings::new_str(s))
            .collect();
        let mut func_index = HashMap::new();
        let mut reg_counts = Vec::with_capacity(module.funcs.len());
        for (i, f) in module.funcs.iter().enumerate() {
            func_index.insert(f.name.as_str(), i);
            reg_counts.push(Self::reg_count_of(f));
        }
        let mut globals: HashMap<&str, Box<[u8; 8]>> = HashMap::new();
        let mut global_handles = Vec::new();
        for g in &module.globals {
            let mut cell = Box::new([0u8; 8]);
            match &g.init {
                GlobalInit::Int(v) => cell.copy_from_slice(&v.to_le_bytes()),
                GlobalInit::Float(x) => cell.copy_from_slice(&x.to_le_bytes()),
                GlobalInit::Str(s) => {
                    let h = strings::new_str(s);
                    global_handles.push(h);
                    cell.copy_from_slice(&(h as usize).to_le_bytes());
                }
            }
            globals.insert(g.name.as_str(), cell);
        }
        ExecState {
            module,
            config,
            frames: Vec::new(),
            handler_stack: Vec::new(),
            bindings: ffi::bind_module(module),
            func_index,
            reg_counts,
            string_pool,
            globals,
            global_handles,
            switch_caches: HashMap::new(),
            steps_retired: 0,
            trace: None,
        }
    }

    pub fn emit_trace(&mut self, line: &str) {
        if let Some(sink) = self.trace.as_mut() {
            sink.emit(line);
        }
    }

    /// Introspection for tests and tooling: the backend kinds memoized in
    /// the switch cache so far.
    pub fn switch_backends(&self) -> Vec<&'static str> {
        self.switch_caches.values().map(|b| b.kind_name()).collect()
    }

    fn reg_count_of(f: &Function) -> usize {
        let mut n = f.ssa_count() as usize;
        for b in &f.blocks {
            for p in &b.params {
                n = n.max(p.id as usize + 1);
            }
            for i in &b.instrs {
                if let Some(r) = i.result {
                    n = n.max(r as usize + 1);
                }
            }
        }
        n
    }

    /// Arm the entry function with the given arguments. Arguments are
    /// adopted (handles transfer ownership to the frame).
    pub fn arm(&mut self, func_name: &str, args: Vec<RtValue>) -> Result<(), Trap> {
        let Some(&fi) = self.func_index.get(func_name) else {
            return Err(Trap {
                kind: TrapKind::Unsupported,
                message: format!("no function @{}", func_name),
            });
        };
        let mut frame = Frame::new(fi, self.reg_counts[fi]);
        let params = &self.module.funcs[fi].blocks[0].params;
        for (p, v) in params.iter().zip(args) {
            frame.store(p.id, v);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn done(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self) -> &Frame {
        self.frames.last().expect("armed execution state")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("armed execution state")
    }

    pub fn cur_func(&self) -> &'m Function {
        &self.module.funcs[self.frame().func]
    }

    /// (function index, block index) of the next instruction to execute.
    pub fn cur_site(&self) -> (usize, usize) {
        let f = self.frame();
        (f.func, f.block)
    }

    pub fn cur_instr(&self) -> &'m Instr {
        let f = self.frame();
        &self.module.funcs[f.func].blocks[f.block].instrs[f.ip]
    }

    /// Format one trace line: `(function, block, ip, opcode, operands,
    /// result)` in deterministic C-locale text.
    pub fn trace_line(&self) -> String {
        use std::fmt::Write;
        let f = self.frame();
        let func = &self.module.funcs[f.func];
        let instr = self.cur_instr();
        let mut line = format!("@{} {}+{}: {}", func.name, func.blocks[f.block].name, f.ip, instr.op);
        for (i, v) in instr.operands.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            let _ = write!(line, "{}{}", sep, self.operand_text(f, v));
        }
        if let Some(r) = instr.result {
            let _ = write!(line, " -> %{}", r);
        }
        line
    }

    fn operand_text(&self, frame: &Frame, v: &Value) -> String {
        match v {
            Value::Temp(id) => frame.get(*id).to_string(),
            other => other.to_string(),
        }
    }

    // ---- value plumbing ----

    /// Borrowed evaluation: handles are NOT retained.
    fn eval(&self, v: &Value) -> Result<RtValue, Trap> {
        let frame = self.frame();
        Ok(match v {
            Value::Temp(id) => frame.get(*id),
            Value::ConstInt(n) => RtValue::I64(*n),
            Value::ConstFloat(x) => RtValue::F64(*x),
            Value::ConstBool(b) => RtValue::I64(*b as i64),
            Value::Null => RtValue::Null,
            Value::ConstStr(idx) => RtValue::Str(self.string_pool[*idx as usize]),
            Value::Global(name) => self.eval_global(name)?,
        })
    }

    fn eval_global(&self, name: &str) -> Result<RtValue, Trap> {
        if let Some(&fi) = self.func_index.get(name) {
            return Ok(RtValue::Ptr(fi + 1));
        }
        if let Some(ei) = self.module.externs.iter().position(|e| e.name == name) {
            return Ok(RtValue::Ptr(EXTERN_BASE + ei));
        }
        if let Some(cell) = self.globals.get(name) {
            let g = self
                .module
                .global(name)
                .expect("cell implies declaration");
            let word = u64::from_le_bytes(**cell);
            return Ok(match &g.ty {
                Type::F32 | Type::F64 => RtValue::F64(f64::from_le_bytes(**cell)),
                Type::Str => RtValue::Str(word as usize as *mut u8),
                Type::Ptr => RtValue::Ptr(word as usize),
                _ => RtValue::I64(word as i64),
            });
        }
        Err(Trap {
            kind: TrapKind::Unsupported,
            message: format!("unknown symbol @{}", name),
        })
    }

    /// Turn a borrowed value into an owned one.
    fn retained(&self, v: RtValue) -> RtValue {
        if let Some(p) = v.handle() {
            unsafe { heap::rt_retain(p) };
        }
        v
    }

    fn store_result(&mut self, instr: &Instr, owned: RtValue) {
        match instr.result {
            Some(r) => self.frame_mut().store(r, owned),
            None => {
                if let Some(p) = owned.handle() {
                    unsafe { heap::rt_release(p) };
                }
            }
        }
    }

    // ---- control flow ----

    /// Transfer along `targets[slot]` of the current instruction: evaluate
    /// branch arguments into scratch first (safe for self-branches), then
    /// admit them into the destination's parameter registers.
    fn do_branch(&mut self, slot: usize) -> Result<Flow, Trap> {
        let instr = self.cur_instr();
        let target = &instr.targets[slot];
        let mut scratch = Vec::with_capacity(target.args.len());
        for a in &target.args {
            let v = self.eval(a)?;
            scratch.push(self.retained(v));
        }
        let dest = target.block;
        let params = &self.module.funcs[self.frame().func].blocks[dest].params;
        let ids: Vec<_> = params.iter().map(|p| p.id).collect();
        let frame = self.frame_mut();
        for (pid, v) in ids.into_iter().zip(scratch) {
            frame.store(pid, v);
        }
        frame.block = dest;
        frame.ip = 0;
        Ok(Flow::Jumped)
    }

    /// Unwind a trap to the innermost active handler; `Fatal` when none.
    pub fn unwind(&mut self, trap: Trap) -> Flow {
        match self.handler_stack.pop() {
            Some(h) => {
                while self.frames.len() > h.frame_index + 1 {
                    self.frames.pop();
                }
                let frame = self.frame_mut();
                frame.block = h.block;
                frame.ip = 0;
                frame.handler_trap = Some(trap);
                Flow::Jumped
            }
            None => Flow::Fatal(trap),
        }
    }

    /// Execute the current instruction.
    pub fn execute_one(&mut self) -> Flow {
        let kind = schema(self.cur_instr().op).kind;
        let result = match self.config.dispatch {
            DispatchMode::Table => HANDLERS[kind_index(kind)](self),
            DispatchMode::Switch | DispatchMode::Threaded => dispatch_match(self, kind),
        };
        let flow = match result {
            Ok(flow) => flow,
            Err(trap) => self.unwind(trap),
        };
        self.steps_retired += 1;
        if let Flow::Next = flow {
            self.frame_mut().ip += 1;
        }
        flow
    }
}

impl Drop for ExecState<'_> {
    fn drop(&mut self) {
        self.frames.clear();
        for &p in &self.string_pool {
            unsafe { heap::rt_release(p) };
        }
        for &p in &self.global_handles {
            unsafe { heap::rt_release(p) };
        }
    }
}

fn trap(kind: TrapKind, msg: impl Into<String>) -> Trap {
    Trap {
        kind,
        message: msg.into(),
    }
}

fn type_error(what: &str) -> Trap {
    trap(TrapKind::InvalidConversion, format!("operand is not {}", what))
}

// ---- opcode rule-class handlers ----
//
// Each handler reads the current instruction itself, so the same function
// works from the fn-pointer table and from the match loop.

type Handler = for<'a, 'm> fn(&'a mut ExecState<'m>) -> Result<Flow, Trap>;

fn kind_index(kind: OpKind) -> usize {
    match kind {
        OpKind::IntBin => 0,
        OpKind::FloatBin => 1,
        OpKind::NumUnary => 2,
        OpKind::IntCmp => 3,
        OpKind::FloatCmp => 4,
        OpKind::Convert => 5,
        OpKind::Alloca => 6,
        OpKind::Load => 7,
        OpKind::Store => 8,
        OpKind::Gep => 9,
        OpKind::AddrOf => 10,
        OpKind::Ret => 11,
        OpKind::Br => 12,
        OpKind::CBr => 13,
        OpKind::Switch => 14,
        OpKind::Unreachable => 15,
        OpKind::Resume => 16,
        OpKind::Call => 17,
        OpKind::ICall => 18,
        OpKind::Invoke => 19,
        OpKind::Landingpad => 20,
    }
}

static HANDLERS: [Handler; 21] = [
    h_int_bin,
    h_float_bin,
    h_num_unary,
    h_int_cmp,
    h_float_cmp,
    h_convert,
    h_alloca,
    h_load,
    h_store,
    h_gep,
    h_addrof,
    h_ret,
    h_br,
    h_cbr,
    h_switch,
    h_unreachable,
    h_resume,
    h_call,
    h_icall,
    h_invoke,
    h_landingpad,
];

fn dispatch_match(st: &mut ExecState<'_>, kind: OpKind) -> Result<Flow, Trap> {
    match kind {
        OpKind::IntBin => h_int_bin(st),
        OpKind::FloatBin => h_float_bin(st),
        OpKind::NumUnary => h_num_unary(st),
        OpKind::IntCmp => h_int_cmp(st),
        OpKind::FloatCmp => h_float_cmp(st),
        OpKind::Convert => h_convert(st),
        OpKind::Alloca => h_alloca(st),
        OpKind::Load => h_load(st),
        OpKind::Store => h_store(st),
        OpKind::Gep => h_gep(st),
        OpKind::AddrOf => h_addrof(st),
        OpKind::Ret => h_ret(st),
        OpKind::Br => h_br(st),
        OpKind::CBr => h_cbr(st),
        OpKind::Switch => h_switch(st),
        OpKind::Unreachable => h_unreachable(st),
        OpKind::Resume => h_resume(st),
        OpKind::Call => h_call(st),
        OpKind::ICall => h_icall(st),
        OpKind::Invoke => h_invoke(st),
        OpKind::Landingpad => h_landingpad(st),
    }
}

fn fold_trap(e: fold::FoldError) -> Trap {
    match e {
        fold::FoldError::DivByZero => trap(TrapKind::DivideByZero, "integer division by zero"),
        fold::FoldError::Overflow => trap(TrapKind::Overflow, "integer overflow"),
        fold::FoldError::InvalidConversion => {
            trap(TrapKind::InvalidConversion, "value out of target range")
        }
    }
}

fn h_int_bin(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let a = st.eval(&i.operands[0])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    let b = st.eval(&i.operands[1])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    let r = fold::int_binop(i.op, i.ty.int_bits(), a, b).map_err(fold_trap)?;
    st.store_result(i, RtValue::I64(r));
    Ok(Flow::Next)
}

fn h_float_bin(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let a = st.eval(&i.operands[0])?.as_f64().ok_or_else(|| type_error("a float"))?;
    let b = st.eval(&i.operands[1])?.as_f64().ok_or_else(|| type_error("a float"))?;
    st.store_result(i, RtValue::F64(fold::float_binop(i.op, a, b)));
    Ok(Flow::Next)
}

fn h_num_unary(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let v = st.eval(&i.operands[0])?;
    let out = if i.ty.is_float() {
        RtValue::F64(v.as_f64().ok_or_else(|| type_error("a float"))?.abs())
    } else {
        RtValue::I64(fold::int_abs(
            i.ty.int_bits(),
            v.as_i64().ok_or_else(|| type_error("an integer"))?,
        ))
    };
    st.store_result(i, out);
    Ok(Flow::Next)
}

fn h_int_cmp(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let Opcode::ICmp(pred) = i.op else {
        return Err(trap(TrapKind::Unsupported, "malformed icmp"));
    };
    let a = st.eval(&i.operands[0])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    let b = st.eval(&i.operands[1])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    let r = fold::int_cmp(pred, i.ty.int_bits(), a, b);
    st.store_result(i, RtValue::I64(r as i64));
    Ok(Flow::Next)
}

fn h_float_cmp(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let Opcode::FCmp(pred) = i.op else {
        return Err(trap(TrapKind::Unsupported, "malformed fcmp"));
    };
    let a = st.eval(&i.operands[0])?.as_f64().ok_or_else(|| type_error("a float"))?;
    let b = st.eval(&i.operands[1])?.as_f64().ok_or_else(|| type_error("a float"))?;
    st.store_result(i, RtValue::I64(fold::float_cmp(pred, a, b) as i64));
    Ok(Flow::Next)
}

fn h_convert(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let v = st.eval(&i.operands[0])?;
    let from_bits = i.ty.int_bits();
    let to_bits = i.result_ty.int_bits();
    let out = match i.op {
        Opcode::Sext | Opcode::Zext | Opcode::Trunc => RtValue::I64(fold::convert_int(
            i.op,
            from_bits,
            to_bits,
            v.as_i64().ok_or_else(|| type_error("an integer"))?,
        )),
        Opcode::SiToFp | Opcode::UiToFp => RtValue::F64(fold::int_to_float(
            i.op,
            from_bits,
            v.as_i64().ok_or_else(|| type_error("an integer"))?,
        )),
        Opcode::FpToSi | Opcode::FpToUi => RtValue::I64(
            fold::float_to_int(i.op, to_bits, v.as_f64().ok_or_else(|| type_error("a float"))?)
                .map_err(fold_trap)?,
        ),
        Opcode::Bitcast => match (i.ty.is_float(), i.result_ty.is_float()) {
            (true, false) => {
                let (raw, _) = fold::bitcast(true, to_bits, 0, v.as_f64().ok_or_else(|| type_error("a float"))?);
                RtValue::I64(raw)
            }
            (false, true) => {
                let w = if i.result_ty == Type::F32 { 32 } else { 64 };
                let (_, f) = fold::bitcast(false, w, v.as_i64().ok_or_else(|| type_error("an integer"))?, 0.0);
                RtValue::F64(f)
            }
            _ => return Err(trap(TrapKind::InvalidConversion, "bitcast width mismatch")),
        },
        Opcode::PtrToInt => match v {
            RtValue::Ptr(p) => RtValue::I64(p as i64),
            RtValue::Null => RtValue::I64(0),
            _ => return Err(type_error("a pointer")),
        },
        Opcode::IntToPtr => {
            let raw = v.as_i64().ok_or_else(|| type_error("an integer"))?;
            if raw == 0 {
                RtValue::Null
            } else {
                RtValue::Ptr(raw as usize)
            }
        }
        _ => return Err(trap(TrapKind::Unsupported, "malformed conversion")),
    };
    st.store_result(i, out);
    Ok(Flow::Next)
}

fn h_alloca(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let count = st.eval(&i.operands[0])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    if count < 0 {
        return Err(trap(TrapKind::Bounds, format!("alloca count {}", count)));
    }
    let bytes = (count as u64).saturating_mul(i.ty.store_size()).max(1) as usize;
    let buf: Box<[u8]> = vec![0u8; bytes].into_boxed_slice();
    let addr = buf.as_ptr() as usize;
    st.frame_mut().allocas.push(buf);
    st.store_result(i, RtValue::Ptr(addr));
    Ok(Flow::Next)
}

fn h_load(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let addr = match st.eval(&i.operands[0])? {
        RtValue::Ptr(p) => p,
        RtValue::Null => return Err(trap(TrapKind::NullObject, "load from null")),
        _ => return Err(type_error("a pointer")),
    };
    let out = unsafe { read_typed(addr, &i.ty) };
    let out = st.retained(out);
    st.store_result(i, out);
    Ok(Flow::Next)
}

fn h_store(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let addr = match st.eval(&i.operands[0])? {
        RtValue::Ptr(p) => p,
        RtValue::Null => return Err(trap(TrapKind::NullObject, "store to null")),
        _ => return Err(type_error("a pointer")),
    };
    let v = st.eval(&i.operands[1])?;
    unsafe { write_typed(addr, &i.ty, v)? };
    Ok(Flow::Next)
}

/// # Safety
/// `addr` must reference live storage for the given type (alloca cells and
/// global cells only; anything else is the program's contract).
unsafe fn read_typed(addr: usize, ty: &Type) -> RtValue {
    unsafe {
        match ty {
            Type::I1 | Type::I8 => RtValue::I64(fold::sign_extend((addr as *const u8).read() as i64, 8)),
            Type::I16 => RtValue::I64((addr as *const i16).read() as i64),
            Type::I32 => RtValue::I64((addr as *const i32).read() as i64),
            Type::I64 => RtValue::I64((addr as *const i64).read()),
            Type::F32 => RtValue::F64((addr as *const f32).read() as f64),
            Type::F64 => RtValue::F64((addr as *const f64).read()),
            Type::Ptr | Type::Func(_) => {
                let w = (addr as *const usize).read();
                if w == 0 { RtValue::Null } else { RtValue::Ptr(w) }
            }
            Type::Str => {
                let w = (addr as *const usize).read();
                if w == 0 { RtValue::Null } else { RtValue::Str(w as *mut u8) }
            }
            Type::Array(_) => {
                let w = (addr as *const usize).read();
                if w == 0 { RtValue::Null } else { RtValue::Arr(w as *mut u8) }
            }
            Type::Void | Type::Struct(_) => RtValue::Unit,
        }
    }
}

/// # Safety
/// As [`read_typed`]. Handle words are stored borrowed.
unsafe fn write_typed(addr: usize, ty: &Type, v: RtValue) -> Result<(), Trap> {
    unsafe {
        match ty {
            Type::I1 | Type::I8 => {
                (addr as *mut u8).write(v.as_i64().ok_or_else(|| type_error("an integer"))? as u8)
            }
            Type::I16 => (addr as *mut i16)
                .write(v.as_i64().ok_or_else(|| type_error("an integer"))? as i16),
            Type::I32 => (addr as *mut i32)
                .write(v.as_i64().ok_or_else(|| type_error("an integer"))? as i32),
            Type::I64 => {
                (addr as *mut i64).write(v.as_i64().ok_or_else(|| type_error("an integer"))?)
            }
            Type::F32 => (addr as *mut f32)
                .write(v.as_f64().ok_or_else(|| type_error("a float"))? as f32),
            Type::F64 => (addr as *mut f64).write(v.as_f64().ok_or_else(|| type_error("a float"))?),
            Type::Ptr | Type::Str | Type::Array(_) | Type::Func(_) => {
                let w = match v {
                    RtValue::Ptr(p) => p,
                    RtValue::Str(p) | RtValue::Arr(p) => p as usize,
                    RtValue::Null => 0,
                    _ => return Err(type_error("a pointer or handle")),
                };
                (addr as *mut usize).write(w)
            }
            Type::Void | Type::Struct(_) => {
                return Err(trap(TrapKind::Unsupported, "store of unsized type"));
            }
        }
    }
    Ok(())
}

fn h_gep(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let base = match st.eval(&i.operands[0])? {
        RtValue::Ptr(p) => p,
        RtValue::Null => return Err(trap(TrapKind::NullObject, "gep on null")),
        _ => return Err(type_error("a pointer")),
    };
    let off = st.eval(&i.operands[1])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    st.store_result(i, RtValue::Ptr((base as i64).wrapping_add(off) as usize));
    Ok(Flow::Next)
}

fn h_addrof(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let Value::Global(name) = &i.operands[0] else {
        return Err(trap(TrapKind::Unsupported, "addrof of non-symbol"));
    };
    if let Some(cell) = st.globals.get(name.as_str()) {
        let addr = cell.as_ptr() as usize;
        st.store_result(i, RtValue::Ptr(addr));
        return Ok(Flow::Next);
    }
    // Function and extern symbols yield their opaque call addresses.
    let v = st.eval(&i.operands[0])?;
    st.store_result(i, v);
    Ok(Flow::Next)
}

fn h_ret(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let retval = match i.operands.first() {
        Some(v) => {
            let v = st.eval(v)?;
            st.retained(v)
        }
        None => RtValue::Unit,
    };
    st.frames.pop();
    if st.frames.is_empty() {
        return Ok(Flow::Halted(retval));
    }
    // Deliver to the call site the caller is parked on.
    let call = st.cur_instr();
    match call.op {
        Opcode::Call | Opcode::ICall => {
            st.store_result(call, retval);
            st.frame_mut().ip += 1;
            Ok(Flow::Jumped)
        }
        Opcode::Invoke => {
            let entry = st.handler_stack.pop();
            debug_assert!(
                entry.is_some_and(|e| e.frame_index == st.frames.len() - 1),
                "invoke handler entry out of sync"
            );
            st.store_result(call, retval);
            st.do_branch(0)
        }
        _ => Err(trap(TrapKind::Unsupported, "return into non-call site")),
    }
}

fn h_br(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    st.do_branch(0)
}

fn h_cbr(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let c = st.eval(&i.operands[0])?;
    st.do_branch(if c.is_truthy_i1() { 0 } else { 1 })
}

fn h_switch(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    let raw = st.eval(&i.operands[0])?.as_i64().ok_or_else(|| type_error("an integer"))?;
    let k = fold::sign_extend(raw, 32) as i32;
    let f = st.frame();
    let site = (f.func, f.block, f.ip);
    let mode = st.config.switch_mode;
    let backend = st
        .switch_caches
        .entry(site)
        .or_insert_with(|| SwitchBackend::build(&i.case_keys, mode));
    let slot = backend.lookup(k) as usize;
    st.do_branch(slot)
}

fn h_unreachable(_st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    Err(trap(TrapKind::Unsupported, "executed unreachable"))
}

fn h_resume(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let pending = st.frame_mut().handler_trap.take();
    let t = pending.unwrap_or_else(|| trap(TrapKind::Unsupported, "resume outside handler"));
    Ok(st.unwind(t))
}

fn h_landingpad(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let i = st.cur_instr();
    // The token is opaque; the trap payload stays in the frame for resume.
    st.store_result(i, RtValue::Ptr(1));
    Ok(Flow::Next)
}

/// Shared call machinery for `call`, `icall` and the function-call part of
/// `invoke`.
fn enter_function(st: &mut ExecState<'_>, fi: usize, instr: &Instr) -> Result<Flow, Trap> {
    let mut args = Vec::with_capacity(instr.operands.len());
    let arg_ops = if instr.op == Opcode::ICall {
        &instr.operands[1..]
    } else {
        &instr.operands[..]
    };
    for a in arg_ops {
        let v = st.eval(a)?;
        args.push(st.retained(v));
    }

    let tco_allowed = instr.tail
        && st.config.tailcall
        && instr.op != Opcode::Invoke
        && !st
            .handler_stack
            .last()
            .is_some_and(|h| h.frame_index == st.frames.len() - 1);
    let params: Vec<_> = st.module.funcs[fi].blocks[0].params.iter().map(|p| p.id).collect();
    if tco_allowed {
        let from = st.cur_func().name.clone();
        let to = st.module.funcs[fi].name.clone();
        st.emit_trace(&format!("tailcall @{} -> @{}", from, to));
        let reg_count = st.reg_counts[fi];
        let frame = st.frame_mut();
        frame.rebind(fi, reg_count);
        for (pid, v) in params.into_iter().zip(args) {
            frame.store(pid, v);
        }
        return Ok(Flow::Jumped);
    }

    if st.frames.len() >= st.config.max_frames {
        // Drop the retained args before unwinding.
        for v in args {
            if let Some(p) = v.handle() {
                unsafe { heap::rt_release(p) };
            }
        }
        return Err(trap(
            TrapKind::StackOverflow,
            format!("frame depth limit {} exceeded", st.config.max_frames),
        ));
    }
    let mut frame = Frame::new(fi, st.reg_counts[fi]);
    for (pid, v) in params.into_iter().zip(args) {
        frame.store(pid, v);
    }
    st.frames.push(frame);
    Ok(Flow::Jumped)
}

fn call_extern_instr(st: &mut ExecState<'_>, name: &str, instr: &Instr) -> Result<Flow, Trap> {
    let Some(&binding) = st.bindings.get(name) else {
        return Err(trap(
            TrapKind::Unsupported,
            format!("extern @{} has no runtime binding", name),
        ));
    };
    let mut args = Vec::with_capacity(instr.operands.len());
    for a in &instr.operands {
        args.push(st.eval(a)?);
    }
    let result = ffi::call_extern(binding, &args)?;
    st.store_result(instr, result);
    match instr.op {
        Opcode::Invoke => {
            // Extern completed normally; take the normal edge (no handler
            // entry was pushed for extern invokes).
            st.do_branch(0)
        }
        _ => Ok(Flow::Next),
    }
}

fn h_call(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let instr = st.cur_instr();
    let callee = instr.callee.as_deref().unwrap_or_default();
    if let Some(&fi) = st.func_index.get(callee) {
        enter_function(st, fi, instr)
    } else {
        call_extern_instr(st, callee, instr)
    }
}

fn h_icall(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let instr = st.cur_instr();
    let addr = match st.eval(&instr.operands[0])? {
        RtValue::Ptr(p) => p,
        RtValue::Null => return Err(trap(TrapKind::NullObject, "icall through null")),
        _ => return Err(type_error("a function pointer")),
    };
    if addr >= EXTERN_BASE {
        let ei = addr - EXTERN_BASE;
        let name = st
            .module
            .externs
            .get(ei)
            .map(|e| e.name.as_str())
            .ok_or_else(|| trap(TrapKind::InvalidCast, "bad extern address"))?;
        let Some(&binding) = st.bindings.get(name) else {
            return Err(trap(
                TrapKind::Unsupported,
                format!("extern @{} has no runtime binding", name),
            ));
        };
        let mut args = Vec::with_capacity(instr.operands.len() - 1);
        for a in &instr.operands[1..] {
            args.push(st.eval(a)?);
        }
        let result = ffi::call_extern(binding, &args)?;
        st.store_result(instr, result);
        return Ok(Flow::Next);
    }
    let fi = addr
        .checked_sub(1)
        .filter(|&i| i < st.module.funcs.len())
        .ok_or_else(|| trap(TrapKind::InvalidCast, "bad function address"))?;
    enter_function(st, fi, instr)
}

fn h_invoke(st: &mut ExecState<'_>) -> Result<Flow, Trap> {
    let instr = st.cur_instr();
    let callee = instr.callee.as_deref().unwrap_or_default();
    if let Some(&fi) = st.func_index.get(callee) {
        let unwind_block = instr.targets[1].block;
        st.handler_stack.push(HandlerEntry {
            frame_index: st.frames.len() - 1,
            block: unwind_block,
        });
        match enter_function(st, fi, instr) {
            Ok(flow) => Ok(flow),
            Err(t) => {
                // Argument evaluation failed; the handler entry must not
                // leak.
                st.handler_stack.pop();
                Err(t)
            }
        }
    } else {
        // Extern invoke: a trap from the callee unwinds to our own edge.
        match call_extern_instr(st, callee, instr) {
            Ok(flow) => Ok(flow),
            Err(t) => {
                let frame = st.frame_mut();
                frame.block = instr.targets[1].block;
                frame.ip = 0;
                frame.handler_trap = Some(t);
                Ok(Flow::Jumped)
            }
        }
    }
}
