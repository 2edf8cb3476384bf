//! Dominator tree (Cooper-Harvey-Kennedy)
//!
//! Iterates the "engineered" idom dataflow over reverse post-order until a
//! fixed point, then builds a children index. Unreachable blocks have no
//! idom and dominate nothing.

use crate::instr::BlockId;
use crate::module::Function;

use super::cfg::CfgContext;
use super::order::reverse_post_order;

pub struct DomTree {
    /// idom[b] = immediate dominator; idom[entry] = entry; None = unreachable
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    /// Position of each block in reverse post-order (for intersect walks)
    rpo_index: Vec<usize>,
}

impl DomTree {
    pub fn new(func: &Function, cfg: &CfgContext) -> Self {
        let n = func.blocks.len();
        let rpo = reverse_post_order(cfg);
        let mut rpo_index = vec![usize::MAX; n];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index[b] = i;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if n == 0 {
            return DomTree {
                idom,
                children: Vec::new(),
                rpo_index,
            };
        }
        idom[0] = Some(0);

        let intersect = |idom: &[Option<BlockId>], rpo_index: &[usize], mut a: BlockId, mut b: BlockId| {
            while a != b {
                while rpo_index[a] > rpo_index[b] {
                    a = idom[a].expect("processed block has idom");
                }
                while rpo_index[b] > rpo_index[a] {
                    b = idom[b].expect("processed block has idom");
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in cfg.predecessors(b) {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_index, cur, p),
                    });
                }
                if new_idom.is_some() && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for b in 1..n {
            if let Some(d) = idom[b] {
                children[d].push(b);
            }
        }
        DomTree {
            idom,
            children,
            rpo_index,
        }
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        if b == 0 { None } else { self.idom.get(b).copied().flatten() }
    }

    pub fn children(&self, b: BlockId) -> &[BlockId] {
        &self.children[b]
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.idom.get(b).copied().flatten().is_some()
    }

    /// Does `a` dominate `b`? Reflexive. False if either is unreachable.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == 0 {
                return false;
            }
            match self.idom[cur] {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }

    pub fn rpo_index(&self, b: BlockId) -> usize {
        self.rpo_index[b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    fn tree(src: &str) -> (crate::module::Module, Vec<Option<usize>>) {
        let m = parse_module(src, "t.vil").unwrap();
        let cfg = CfgContext::new(&m.funcs[0]);
        let dt = DomTree::new(&m.funcs[0], &cfg);
        let idoms = (0..m.funcs[0].blocks.len()).map(|b| dt.idom(b)).collect();
        (m, idoms)
    }

    #[test]
    fn test_diamond_idoms() {
        let (_, idoms) = tree(
            r#"
module "d"
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
"#,
        );
        assert_eq!(idoms[1], Some(0));
        assert_eq!(idoms[2], Some(0));
        // join is dominated by entry, not by either arm
        assert_eq!(idoms[3], Some(0));
    }

    #[test]
    fn test_dominates_in_loop() {
        let m = parse_module(
            r#"
module "l"
fn @f() -> i64 {
entry:
  br head(0)
head(%i: i64):
  %c = icmp.slt i64 %i, 10
  cbr %c, body, out
body:
  %n = add i64 %i, 1
  br head(%n)
out:
  ret %i
}
"#,
            "t.vil",
        )
        .unwrap();
        let cfg = CfgContext::new(&m.funcs[0]);
        let dt = DomTree::new(&m.funcs[0], &cfg);
        assert!(dt.dominates(0, 3));
        assert!(dt.dominates(1, 2));
        assert!(dt.dominates(1, 3));
        assert!(!dt.dominates(2, 3));
        assert!(dt.dominates(1, 1));
    }

    #[test]
    fn test_unreachable_has_no_idom() {
        let (_, idoms) = tree(
            r#"
module "u"
fn @f() -> void {
entry:
  ret
island:
  ret
}
"#,
        );
        assert_eq!(idoms[1], None);
    }
}
