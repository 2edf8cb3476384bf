//! Transform pipeline
//!
//! A pass rewrites a module in place and reports whether anything changed;
//! every pass must leave the module verifiable. The driver runs the
//! declared order and iterates the cheap local passes to a small fixpoint
//! limit; in debug builds the verifier re-runs after every pass.

pub mod dce;
pub mod mem2reg;
pub mod peephole;
pub mod sccp;

use crate::diag::Diag;
use crate::module::{Function, Module};
use crate::value::{SsaId, Value};
use std::collections::HashMap;

pub use dce::Dce;
pub use mem2reg::Mem2Reg;
pub use peephole::Peephole;
pub use sccp::Sccp;

pub trait Pass {
    fn name(&self) -> &'static str;
    /// Returns true when the module was changed.
    fn run(&self, m: &mut Module) -> Result<bool, Diag>;
}

/// Upper bound on pass re-iteration; local passes converge quickly and a
/// bound keeps a misbehaving pass from looping the driver.
const FIXPOINT_LIMIT: usize = 4;

pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new(passes: Vec<Box<dyn Pass>>) -> Self {
        Pipeline { passes }
    }

    /// The standard order: SCCP first (exposes dead code), then promotion,
    /// then the cheap cleanups.
    pub fn standard() -> Self {
        Pipeline::new(vec![
            Box::new(Sccp),
            Box::new(Mem2Reg),
            Box::new(Peephole),
            Box::new(Dce),
        ])
    }

    pub fn run(&self, m: &mut Module) -> Result<bool, Vec<Diag>> {
        let mut changed_any = false;
        for round in 0..FIXPOINT_LIMIT {
            let mut changed_round = false;
            for pass in &self.passes {
                let changed = pass.run(m).map_err(|d| vec![d])?;
                tracing::debug!(pass = pass.name(), round, changed, "pass finished");
                changed_round |= changed;
                if cfg!(debug_assertions) && changed {
                    crate::verify::verify(m)?;
                }
            }
            changed_any |= changed_round;
            if !changed_round {
                break;
            }
        }
        Ok(changed_any)
    }
}

/// Replace every use (operands and branch arguments) of the mapped SSA ids.
pub(crate) fn substitute_uses(func: &mut Function, map: &HashMap<SsaId, Value>) {
    if map.is_empty() {
        return;
    }
    let subst = |v: &mut Value| {
        if let Value::Temp(id) = v {
            if let Some(repl) = map.get(id) {
                *v = repl.clone();
            }
        }
    };
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            for v in &mut instr.operands {
                subst(v);
            }
            for t in &mut instr.targets {
                for v in &mut t.args {
                    subst(v);
                }
            }
        }
    }
}

/// Count uses of every SSA id across the function.
pub(crate) fn use_counts(func: &Function) -> HashMap<SsaId, usize> {
    let mut counts = HashMap::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            for v in instr.uses() {
                if let Value::Temp(id) = v {
                    *counts.entry(*id).or_insert(0) += 1;
                }
            }
        }
    }
    counts
}

/// Drop blocks unreachable from the entry and remap branch targets.
/// Returns true when anything was removed.
pub(crate) fn remove_unreachable_blocks(func: &mut Function) -> bool {
    let n = func.blocks.len();
    if n == 0 {
        return false;
    }
    let mut reachable = vec![false; n];
    let mut stack = vec![0usize];
    reachable[0] = true;
    while let Some(b) = stack.pop() {
        if let Some(term) = func.blocks[b].terminator() {
            for t in &term.targets {
                if t.block < n && !reachable[t.block] {
                    reachable[t.block] = true;
                    stack.push(t.block);
                }
            }
        }
    }
    if reachable.iter().all(|&r| r) {
        return false;
    }
    let mut remap = vec![usize::MAX; n];
    let mut next = 0usize;
    for (old, &r) in reachable.iter().enumerate() {
        if r {
            remap[old] = next;
            next += 1;
        }
    }
    let mut old_blocks = std::mem::take(&mut func.blocks);
    for (old, block) in old_blocks.drain(..).enumerate() {
        if reachable[old] {
            func.blocks.push(block);
        }
    }
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            for t in &mut instr.targets {
                t.block = remap[t.block];
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;
    use crate::verify::verify;

    #[test]
    fn test_standard_pipeline_preserves_verification() {
        let mut m = parse_module(
            r#"
module "p"
fn @main() -> i64 {
entry:
  %a = add i64 40, 2
  %dead = mul i64 %a, 100
  ret %a
}
"#,
            "t.vil",
        )
        .unwrap();
        assert!(verify(&m).is_ok());
        let changed = Pipeline::standard().run(&mut m).unwrap();
        assert!(changed);
        assert!(verify(&m).is_ok());
    }

    #[test]
    fn test_remove_unreachable_blocks_remaps_targets() {
        let mut m = parse_module(
            r#"
module "u"
fn @f() -> i64 {
entry:
  br keep(7)
island:
  br keep(9)
keep(%v: i64):
  ret %v
}
"#,
            "t.vil",
        )
        .unwrap();
        let f = &mut m.funcs[0];
        assert!(remove_unreachable_blocks(f));
        assert_eq!(f.blocks.len(), 2);
        assert_eq!(f.blocks[0].terminator().unwrap().targets[0].block, 1);
        assert!(verify(&m).is_ok());
    }
}
