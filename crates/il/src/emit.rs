//! Canonical IL text emission
//!
//! The emitter produces the round-trippable canonical form:
//! `parse(module_text(m))` reconstructs `m` up to SSA id renumbering.
//! Output is deterministic and C-locale ("." decimal point, exponent
//! notation outside [1e-5, 1e17)).

use crate::instr::{Instr, OpKind, schema};
use crate::module::{Block, Function, GlobalInit, Module};
use crate::types::Type;
use crate::value::Value;
use std::fmt::{self, Write};

/// Round-trippable float literal text. `NaN`/`Inf`/`-Inf` for the
/// non-finite values, shortest decimal otherwise, always with a `.` or an
/// exponent so the token parses back as a float.
pub fn float_text(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    let a = x.abs();
    let mut s = if a != 0.0 && !(1e-5..1e17).contains(&a) {
        format!("{:e}", x)
    } else {
        format!("{}", x)
    };
    if !s.contains('.') && !s.contains('e') && !s.contains('E') {
        s.push_str(".0");
    }
    s
}

/// Escape a string literal body: `\n \t \\ \" \xHH`. Control characters
/// get `\xHH`; everything else (including non-ASCII text) passes through
/// as UTF-8.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Render a module as canonical text.
pub fn module_text(m: &Module) -> String {
    ModuleText(m).to_string()
}

struct ModuleText<'a>(&'a Module);

impl fmt::Display for ModuleText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        writeln!(f, "module \"{}\"", escape_string(&m.name))?;
        for s in &m.structs {
            write!(f, "\nstruct %{} = {{ ", s.name)?;
            write_types(f, &s.fields)?;
            writeln!(f, " }}")?;
        }
        for e in &m.externs {
            write!(f, "\nextern @{}(", e.name)?;
            write_types(f, &e.sig.params)?;
            writeln!(f, ") -> {}", e.sig.ret)?;
        }
        for g in &m.globals {
            write!(f, "\nglobal @{}: {} = ", g.name, g.ty)?;
            match &g.init {
                GlobalInit::Int(n) => writeln!(f, "{}", n)?,
                GlobalInit::Float(x) => writeln!(f, "{}", float_text(*x))?,
                GlobalInit::Str(s) => writeln!(f, "\"{}\"", escape_string(s))?,
            }
        }
        for c in &m.classes {
            write!(f, "\nclass @{}", c.name)?;
            if let Some(base) = &c.base {
                write!(f, " base @{}", base)?;
            }
            writeln!(f, " {{")?;
            write!(f, "  fields {{ ")?;
            write_types(f, &c.fields)?;
            writeln!(f, " }}")?;
            write!(f, "  vtable {{ ")?;
            for (i, slot) in c.vtable.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "@{}", slot)?;
            }
            writeln!(f, " }}")?;
            for imp in &c.interfaces {
                write!(f, "  impl @{} {{ ", imp.iface)?;
                for (i, slot) in imp.slots.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "@{}", slot)?;
                }
                writeln!(f, " }}")?;
            }
            writeln!(f, "}}")?;
        }
        for func in &m.funcs {
            write_function(f, m, func)?;
        }
        Ok(())
    }
}

fn write_types(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (i, t) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", t)?;
    }
    Ok(())
}

fn write_function(f: &mut fmt::Formatter<'_>, m: &Module, func: &Function) -> fmt::Result {
    write!(f, "\nfn @{}(", func.name)?;
    if let Some(entry) = func.blocks.first() {
        for (i, p) in entry.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{}: {}", p.id, p.ty)?;
        }
    }
    write!(f, ") -> {}", func.sig.ret)?;
    if let Some(oop) = &func.oop {
        if oop.ctor {
            write!(f, " ctor @{}", oop.class)?;
        } else {
            write!(f, " method @{}", oop.class)?;
        }
        if let Some(slot) = oop.slot {
            write!(f, " slot {}", slot)?;
        }
    }
    writeln!(f, " {{")?;
    for (bid, block) in func.blocks.iter().enumerate() {
        write_block(f, m, func, block, bid == 0)?;
    }
    writeln!(f, "}}")
}

fn write_block(
    f: &mut fmt::Formatter<'_>,
    m: &Module,
    func: &Function,
    block: &Block,
    is_entry: bool,
) -> fmt::Result {
    // Entry parameters already appear in the function header.
    if is_entry {
        writeln!(f, "{}:", block.name)?;
    } else if block.params.is_empty() {
        writeln!(f, "{}:", block.name)?;
    } else {
        write!(f, "{}(", block.name)?;
        for (i, p) in block.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{}: {}", p.id, p.ty)?;
        }
        writeln!(f, "):")?;
    }
    for instr in &block.instrs {
        write!(f, "  ")?;
        write_instr(f, m, func, instr)?;
        writeln!(f)?;
    }
    Ok(())
}

fn write_value(f: &mut fmt::Formatter<'_>, m: &Module, v: &Value) -> fmt::Result {
    match v {
        Value::ConstStr(idx) => {
            let body = m
                .strings
                .get(*idx as usize)
                .map(|s| s.as_str())
                .unwrap_or("");
            write!(f, "\"{}\"", escape_string(body))
        }
        other => write!(f, "{}", other),
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, m: &Module, args: &[Value]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_value(f, m, a)?;
    }
    Ok(())
}

fn write_target(
    f: &mut fmt::Formatter<'_>,
    m: &Module,
    func: &Function,
    target: &crate::instr::BranchTarget,
) -> fmt::Result {
    let name = func
        .blocks
        .get(target.block)
        .map(|b| b.name.as_str())
        .unwrap_or("?");
    write!(f, "{}", name)?;
    if !target.args.is_empty() {
        write!(f, "(")?;
        write_args(f, m, &target.args)?;
        write!(f, ")")?;
    }
    Ok(())
}

fn write_instr(f: &mut fmt::Formatter<'_>, m: &Module, func: &Function, i: &Instr) -> fmt::Result {
    if let Some(r) = i.result {
        write!(f, "%{} = ", r)?;
    }
    if i.tail {
        write!(f, "tail ")?;
    }
    let sch = schema(i.op);
    match sch.kind {
        OpKind::IntBin | OpKind::FloatBin | OpKind::IntCmp | OpKind::FloatCmp => {
            write!(f, "{} {} ", i.op, i.ty)?;
            write_args(f, m, &i.operands)?;
        }
        OpKind::NumUnary => {
            write!(f, "{} {} ", i.op, i.ty)?;
            write_value(f, m, &i.operands[0])?;
        }
        OpKind::Convert => {
            write!(f, "{} {} ", i.op, i.ty)?;
            write_value(f, m, &i.operands[0])?;
            write!(f, " to {}", i.result_ty)?;
        }
        OpKind::Alloca => {
            write!(f, "alloca {}, ", i.ty)?;
            write_value(f, m, &i.operands[0])?;
        }
        OpKind::Load => {
            write!(f, "load {}, ", i.ty)?;
            write_value(f, m, &i.operands[0])?;
        }
        OpKind::Store => {
            write!(f, "store {}, ", i.ty)?;
            write_args(f, m, &i.operands)?;
        }
        OpKind::Gep => {
            write!(f, "gep ")?;
            write_args(f, m, &i.operands)?;
        }
        OpKind::AddrOf => {
            write!(f, "addrof ")?;
            write_value(f, m, &i.operands[0])?;
        }
        OpKind::Ret => {
            write!(f, "ret")?;
            if let Some(v) = i.operands.first() {
                write!(f, " ")?;
                write_value(f, m, v)?;
            }
        }
        OpKind::Br => {
            write!(f, "br ")?;
            write_target(f, m, func, &i.targets[0])?;
        }
        OpKind::CBr => {
            write!(f, "cbr ")?;
            write_value(f, m, &i.operands[0])?;
            write!(f, ", ")?;
            write_target(f, m, func, &i.targets[0])?;
            write!(f, ", ")?;
            write_target(f, m, func, &i.targets[1])?;
        }
        OpKind::Switch => {
            write!(f, "switch.i32 ")?;
            write_value(f, m, &i.operands[0])?;
            write!(f, ", ")?;
            write_target(f, m, func, &i.targets[0])?;
            write!(f, " [")?;
            for (n, key) in i.case_keys.iter().enumerate() {
                if n > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} -> ", key)?;
                write_target(f, m, func, &i.targets[n + 1])?;
            }
            write!(f, "]")?;
        }
        OpKind::Unreachable => write!(f, "unreachable")?,
        OpKind::Resume => write!(f, "resume")?,
        OpKind::Call => {
            write!(f, "call @{}(", i.callee.as_deref().unwrap_or("?"))?;
            write_args(f, m, &i.operands)?;
            write!(f, ") -> {}", i.result_ty)?;
        }
        OpKind::ICall => {
            write!(f, "icall ")?;
            write_value(f, m, &i.operands[0])?;
            write!(f, "(")?;
            write_args(f, m, &i.operands[1..])?;
            write!(f, ") : fn(")?;
            write_types(f, &i.sig_params)?;
            write!(f, ") -> {}", i.result_ty)?;
        }
        OpKind::Invoke => {
            write!(f, "invoke @{}(", i.callee.as_deref().unwrap_or("?"))?;
            write_args(f, m, &i.operands)?;
            write!(f, ") -> {} normal ", i.result_ty)?;
            write_target(f, m, func, &i.targets[0])?;
            write!(f, " unwind ")?;
            write_target(f, m, func, &i.targets[1])?;
        }
        OpKind::Landingpad => write!(f, "landingpad")?,
    }
    if let Some(scope) = i.eh_scope {
        write!(f, " !eh {}", scope)?;
    }
    if !i.loc.is_none() {
        let file = m.file_name(i.loc).unwrap_or("?");
        write!(f, " @\"{}\":{}:{}", escape_string(file), i.loc.line, i.loc.col)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_text_finite() {
        assert_eq!(float_text(1.5), "1.5");
        assert_eq!(float_text(42.0), "42.0");
        assert_eq!(float_text(-0.25), "-0.25");
        assert_eq!(float_text(1e300), "1e300");
    }

    #[test]
    fn test_float_text_special() {
        assert_eq!(float_text(f64::NAN), "NaN");
        assert_eq!(float_text(f64::INFINITY), "Inf");
        assert_eq!(float_text(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_float_text_round_trips() {
        for x in [0.1, 1.0 / 3.0, 1e-7, 123456789.123456789, f64::MIN_POSITIVE] {
            let parsed: f64 = float_text(x).parse().unwrap();
            assert_eq!(parsed.to_bits(), x.to_bits());
        }
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("a\nb\"c\\"), "a\\nb\\\"c\\\\");
        assert_eq!(escape_string("\x01"), "\\x01");
    }
}
