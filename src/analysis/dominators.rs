//! Dominator tree and dominance frontier, computed with the iterative
//! Cooper/Harvey/Kennedy algorithm over the reverse-postorder numbering
//! from [`crate::analysis::cfg`]. `O(1)` dominance queries are served via
//! a DFS-assigned `(tin, tout)` interval on the tree, not by walking idom
//! chains on every query — Mem2Reg's rename pass and the verifier both
//! call `dominates` inside tight loops.

use crate::analysis::cfg::reverse_postorder;
use crate::ir::{BlockId, Function};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator of every block, indexed by `BlockId`. The
    /// entry block is its own idom (a sentinel, never consulted as a
    /// "real" parent edge).
    idom: Vec<BlockId>,
    rpo: Vec<BlockId>,
    rpo_index: FxHashMap<BlockId, usize>,
    children: Vec<Vec<BlockId>>,
    tin: Vec<u32>,
    tout: Vec<u32>,
    dom_frontier: Vec<Vec<BlockId>>,
    entry: BlockId,
}

impl DominatorTree {
    pub fn compute(f: &Function) -> Self {
        let entry = f.entry.expect("dominator tree requires a defined function");
        let rpo = reverse_postorder(f, entry);
        let rpo_index: FxHashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let n = f.blocks.len();
        let mut idom = vec![BlockId(u32::MAX); n];
        idom[entry.index()] = entry;

        let mut changed = true;
        while changed {
            changed = false;
            for &bb in rpo.iter().skip(1) {
                let preds: Vec<BlockId> = f
                    .block(bb)
                    .preds
                    .iter()
                    .copied()
                    .filter(|p| idom[p.index()] != BlockId(u32::MAX))
                    .collect();
                let Some((&first, rest)) = preds.split_first() else { continue };
                let mut new_idom = first;
                for &p in rest {
                    new_idom = intersect(&idom, &rpo_index, new_idom, p);
                }
                if idom[bb.index()] != new_idom {
                    idom[bb.index()] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for &bb in &rpo {
            if bb != entry {
                children[idom[bb.index()].index()].push(bb);
            }
        }

        let mut tin = vec![0u32; n];
        let mut tout = vec![0u32; n];
        let mut clock = 0u32;
        let mut stack = vec![(entry, false)];
        while let Some((bb, leaving)) = stack.pop() {
            if leaving {
                tout[bb.index()] = clock;
                clock += 1;
                continue;
            }
            tin[bb.index()] = clock;
            clock += 1;
            stack.push((bb, true));
            for &c in children[bb.index()].iter().rev() {
                stack.push((c, false));
            }
        }

        let mut dom_frontier = vec![Vec::new(); n];
        for &bb in &rpo {
            let preds = f.block(bb).preds.clone();
            if preds.len() < 2 {
                continue;
            }
            for p in preds {
                if idom[p.index()] == BlockId(u32::MAX) {
                    continue;
                }
                let mut runner = p;
                while runner != idom[bb.index()] {
                    if !dom_frontier[runner.index()].contains(&bb) {
                        dom_frontier[runner.index()].push(bb);
                    }
                    runner = idom[runner.index()];
                }
            }
        }

        DominatorTree { idom, rpo, rpo_index, children, tin, tout, dom_frontier, entry }
    }

    pub fn idom(&self, bb: BlockId) -> Option<BlockId> {
        if bb == self.entry {
            None
        } else {
            Some(self.idom[bb.index()])
        }
    }

    pub fn children(&self, bb: BlockId) -> &[BlockId] {
        &self.children[bb.index()]
    }

    pub fn dominance_frontier(&self, bb: BlockId) -> &[BlockId] {
        &self.dom_frontier[bb.index()]
    }

    /// `a` dominates `b` iff `a`'s tree interval contains `b`'s — every
    /// block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tin[a.index()] <= self.tin[b.index()] && self.tout[b.index()] <= self.tout[a.index()]
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Blocks in dominator-tree preorder, i.e. a parent is always visited
    /// before its children — the order Mem2Reg's rename pass, CSE's
    /// scoped hash table, and SCCP's propagation all require.
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.children.len());
        let mut stack = vec![self.entry];
        while let Some(bb) = stack.pop() {
            order.push(bb);
            for &c in self.children[bb.index()].iter().rev() {
                stack.push(c);
            }
        }
        order
    }

    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.rpo
    }
}

/// Finds the nearest common ancestor of `a` and `b` in the dominator tree
/// under construction, walking by reverse-postorder number as Cooper et
/// al. describe ("intersect").
fn intersect(idom: &[BlockId], rpo_index: &FxHashMap<BlockId, usize>, mut a: BlockId, mut b: BlockId) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[a.index()];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[b.index()];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function, IrBuilder, Module};
    use crate::types::Type;

    /// entry -> {then, else} -> join, a classic diamond.
    fn build_diamond() -> (Module, crate::ir::FuncId, BlockId, BlockId, BlockId, BlockId) {
        let mut m = Module::new("t");
        let fid = m.add_function(Function::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let then_bb = m.function_mut(fid).add_block(BasicBlock::with_label("then"));
        let else_bb = m.function_mut(fid).add_block(BasicBlock::with_label("else"));
        let join = m.function_mut(fid).add_block(BasicBlock::with_label("join"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let c = b.const_bool(true);
        b.build_cond_br(c, then_bb, else_bb);
        let mut b = IrBuilder::at_end(&mut m, fid, then_bb);
        b.build_br(join);
        let mut b = IrBuilder::at_end(&mut m, fid, else_bb);
        b.build_br(join);
        let mut b = IrBuilder::at_end(&mut m, fid, join);
        b.build_ret(None);

        (m, fid, entry, then_bb, else_bb, join)
    }

    #[test]
    fn join_is_dominated_only_by_entry() {
        let (m, fid, entry, then_bb, else_bb, join) = build_diamond();
        let dt = DominatorTree::compute(m.function(fid));
        assert_eq!(dt.idom(join), Some(entry));
        assert!(dt.dominates(entry, join));
        assert!(!dt.dominates(then_bb, join));
        assert!(!dt.dominates(else_bb, join));
    }

    #[test]
    fn dominance_frontier_of_branches_is_join() {
        let (m, fid, _entry, then_bb, else_bb, join) = build_diamond();
        let dt = DominatorTree::compute(m.function(fid));
        assert_eq!(dt.dominance_frontier(then_bb), &[join]);
        assert_eq!(dt.dominance_frontier(else_bb), &[join]);
    }

    #[test]
    fn preorder_visits_parent_before_children() {
        let (m, fid, entry, ..) = build_diamond();
        let dt = DominatorTree::compute(m.function(fid));
        let order = dt.preorder();
        assert_eq!(order[0], entry);
    }
}
