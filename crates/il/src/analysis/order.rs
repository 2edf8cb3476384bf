//! Block orderings: post-order, reverse post-order, topological order
//!
//! Only blocks reachable from the entry appear in these orders.

use crate::instr::BlockId;

use super::cfg::CfgContext;

/// Post-order over reachable blocks, entry last.
pub fn post_order(cfg: &CfgContext) -> Vec<BlockId> {
    let n = cfg.block_count();
    let mut out = Vec::with_capacity(n);
    if n == 0 {
        return out;
    }
    let mut visited = vec![false; n];
    // Iterative DFS with an explicit child cursor per frame.
    let mut stack: Vec<(BlockId, usize)> = vec![(0, 0)];
    visited[0] = true;
    while let Some(top) = stack.last_mut() {
        let block = top.0;
        let succs = cfg.successors(block);
        if top.1 < succs.len() {
            let next = succs[top.1];
            top.1 += 1;
            if !visited[next] {
                visited[next] = true;
                stack.push((next, 0));
            }
        } else {
            out.push(block);
            stack.pop();
        }
    }
    out
}

/// Reverse post-order: entry first, every block before its (non-back-edge)
/// successors.
pub fn reverse_post_order(cfg: &CfgContext) -> Vec<BlockId> {
    let mut po = post_order(cfg);
    po.reverse();
    po
}

/// True when the reachable CFG has no cycle.
pub fn is_acyclic(cfg: &CfgContext) -> bool {
    // A back edge in DFS terms is an edge to a block still on the stack.
    let n = cfg.block_count();
    if n == 0 {
        return true;
    }
    let mut state = vec![0u8; n]; // 0 = unseen, 1 = on stack, 2 = done
    let mut stack: Vec<(BlockId, usize)> = vec![(0, 0)];
    state[0] = 1;
    while let Some(top) = stack.last_mut() {
        let block = top.0;
        let succs = cfg.successors(block);
        if top.1 < succs.len() {
            let next = succs[top.1];
            top.1 += 1;
            match state[next] {
                0 => {
                    state[next] = 1;
                    stack.push((next, 0));
                }
                1 => return false,
                _ => {}
            }
        } else {
            state[block] = 2;
            stack.pop();
        }
    }
    true
}

/// Topological order of an acyclic CFG (None when cyclic).
pub fn topo_order(cfg: &CfgContext) -> Option<Vec<BlockId>> {
    if !is_acyclic(cfg) {
        return None;
    }
    Some(reverse_post_order(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::CfgContext;
    use crate::parse::parse_module;

    fn diamond() -> crate::module::Module {
        parse_module(
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
            "t.vil",
        )
        .unwrap()
    }

    #[test]
    fn test_rpo_entry_first() {
        let m = diamond();
        let cfg = CfgContext::new(&m.funcs[0]);
        let rpo = reverse_post_order(&cfg);
        assert_eq!(rpo[0], 0);
        assert_eq!(rpo.len(), 4);
        assert_eq!(*rpo.last().unwrap(), 3);
    }

    #[test]
    fn test_acyclic_diamond() {
        let m = diamond();
        let cfg = CfgContext::new(&m.funcs[0]);
        assert!(is_acyclic(&cfg));
        assert!(topo_order(&cfg).is_some());
    }

    #[test]
    fn test_loop_detected() {
        let m = parse_module(
            r#"
module "l"
fn @f() -> void {
entry:
  br head
head:
  br head
}
"#,
            "t.vil",
        )
        .unwrap();
        let cfg = CfgContext::new(&m.funcs[0]);
        assert!(!is_acyclic(&cfg));
        assert!(topo_order(&cfg).is_none());
    }

    #[test]
    fn test_unreachable_blocks_skipped() {
        let m = parse_module(
            r#"
module "u"
fn @f() -> void {
entry:
  ret
island:
  ret
}
"#,
            "t.vil",
        )
        .unwrap();
        let cfg = CfgContext::new(&m.funcs[0]);
        assert_eq!(post_order(&cfg), vec![0]);
    }
}
