//! Dead code elimination
//!
//! Removes instructions whose results are unused and whose execution has no
//! observable effect. Effects come from the opcode schema; calls consult
//! the runtime signature table. Trapping instructions are observable and
//! stay. Iterates to a fixpoint so chains of dead definitions unwind.

use crate::diag::Diag;
use crate::instr::{EffectClass, Instr, Opcode, schema};
use crate::module::Module;
use crate::sigtable;

use super::{Pass, use_counts};

pub struct Dce;

fn is_removable(m: &Module, i: &Instr) -> bool {
    match schema(i.op).effect {
        EffectClass::Pure => true,
        EffectClass::CallEffect => {
            if i.op != Opcode::Call {
                return false;
            }
            let Some(callee) = i.callee.as_deref() else {
                return false;
            };
            if m.func(callee).is_some() {
                // Calls into module code are kept; summarizing them is
                // SCCP/inliner territory.
                return false;
            }
            match sigtable::lookup(callee) {
                Some(e) => {
                    !e.effects.reads_globals
                        && !e.effects.writes_globals
                        && !e.effects.may_trap
                }
                None => false,
            }
        }
        _ => false,
    }
}

impl Pass for Dce {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, m: &mut Module) -> Result<bool, Diag> {
        let mut changed = false;
        for fi in 0..m.funcs.len() {
            loop {
                let counts = use_counts(&m.funcs[fi]);
                let mut removed = false;
                // Collect removal sites first; Module is needed immutably
                // for the signature checks.
                let mut doomed: Vec<(usize, usize)> = Vec::new();
                for (bid, block) in m.funcs[fi].blocks.iter().enumerate() {
                    for (iid, instr) in block.instrs.iter().enumerate() {
                        if instr.is_terminator() {
                            continue;
                        }
                        let unused = match instr.result {
                            Some(r) => counts.get(&r).copied().unwrap_or(0) == 0,
                            None => true,
                        };
                        if unused && is_removable(m, instr) {
                            doomed.push((bid, iid));
                        }
                    }
                }
                for &(bid, iid) in doomed.iter().rev() {
                    m.funcs[fi].blocks[bid].instrs.remove(iid);
                    removed = true;
                }
                if !removed {
                    break;
                }
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    fn run_dce(src: &str) -> Module {
        let mut m = parse_module(src, "t.vil").unwrap();
        Dce.run(&mut m).unwrap();
        m
    }

    #[test]
    fn test_removes_dead_chain() {
        let m = run_dce(
            r#"
module "d"
fn @f() -> i64 {
entry:
  %a = add i64 1, 2
  %b = mul i64 %a, 3
  %c = add i64 5, 5
  ret %c
}
"#,
        );
        // %b dies first, then %a becomes dead on the next iteration.
        assert_eq!(m.funcs[0].blocks[0].instrs.len(), 2);
    }

    #[test]
    fn test_keeps_trapping_instr() {
        let m = run_dce(
            r#"
module "d"
fn @f(%x: i64) -> i64 {
entry:
  %q = sdiv i64 1, %x
  ret 0
}
"#,
        );
        assert_eq!(m.funcs[0].blocks[0].instrs.len(), 2);
    }

    #[test]
    fn test_keeps_effectful_call_drops_pure_call() {
        let m = run_dce(
            r#"
module "d"
extern @Viper.Console.PrintI64(i64) -> void
extern @Viper.Math.Sqrt(f64) -> f64
fn @f() -> void {
entry:
  %s = call @Viper.Math.Sqrt(4.0) -> f64
  call @Viper.Console.PrintI64(1) -> void
  ret
}
"#,
        );
        let instrs = &m.funcs[0].blocks[0].instrs;
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].callee.as_deref(), Some("Viper.Console.PrintI64"));
    }

    #[test]
    fn test_idempotent() {
        let src = r#"
module "d"
fn @f() -> i64 {
entry:
  %a = add i64 1, 2
  %b = mul i64 %a, 3
  ret %b
}
"#;
        let mut m = parse_module(src, "t.vil").unwrap();
        let first = Dce.run(&mut m).unwrap();
        let snapshot = m.clone();
        let second = Dce.run(&mut m).unwrap();
        assert!(!first);
        assert!(!second);
        assert_eq!(m, snapshot);
    }
}
