//! Control-flow graph queries
//!
//! Successor/predecessor lists are computed once per function into a cached
//! context; no explicit graph object is materialized beyond these index
//! vectors. The context is invalidated by dropping it.

use crate::instr::BlockId;
use crate::module::Function;

pub struct CfgContext {
    succs: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
}

impl CfgContext {
    pub fn new(func: &Function) -> Self {
        let n = func.blocks.len();
        let mut succs: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for (bid, block) in func.blocks.iter().enumerate() {
            if let Some(term) = block.terminator() {
                for t in &term.targets {
                    if t.block < n {
                        succs[bid].push(t.block);
                        preds[t.block].push(bid);
                    }
                }
            }
        }
        CfgContext { succs, preds }
    }

    pub fn successors(&self, b: BlockId) -> &[BlockId] {
        &self.succs[b]
    }

    pub fn predecessors(&self, b: BlockId) -> &[BlockId] {
        &self.preds[b]
    }

    pub fn block_count(&self) -> usize {
        self.succs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    #[test]
    fn test_succ_pred() {
        let src = r#"
module "cfg"
fn @f(%x: i1) -> i64 {
entry:
  cbr %x, a, b
a:
  br join(1)
b:
  br join(2)
join(%v: i64):
  ret %v
}
"#;
        let m = parse_module(src, "t.vil").unwrap();
        let cfg = CfgContext::new(&m.funcs[0]);
        assert_eq!(cfg.successors(0), &[1, 2]);
        assert_eq!(cfg.predecessors(3), &[1, 2]);
        assert_eq!(cfg.predecessors(0), &[] as &[usize]);
    }
}
