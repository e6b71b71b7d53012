//! Natural loop detection and loop-nest construction over a computed
//! [`DominatorTree`]: back-edge detection, loop body discovery by reverse
//! CFG walk, nesting by body-set containment, and preheader
//! insertion/creation for LICM and IndVarSimplify.

use crate::analysis::dominators::DominatorTree;
use crate::ir::{BasicBlock, BlockId, Function, FuncId, Instruction, PhiIncoming};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// Every block in the loop body, including the header. Does not
    /// include blocks of nested loops' own exclusive bodies — those are
    /// reachable through `children` instead.
    pub blocks: FxHashSet<BlockId>,
    pub back_edge_sources: Vec<BlockId>,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
}

impl Loop {
    pub fn contains(&self, bb: BlockId) -> bool {
        self.blocks.contains(&bb)
    }

    /// Blocks with a successor outside the loop — where control leaves.
    pub fn exiting_blocks(&self, f: &Function) -> Vec<BlockId> {
        self.blocks
            .iter()
            .copied()
            .filter(|&bb| f.block(bb).succs.iter().any(|s| !self.contains(*s)))
            .collect()
    }

    pub fn depth(&self, loops: &[Loop]) -> usize {
        match self.parent {
            Some(p) => 1 + loops[p].depth(loops),
            None => 1,
        }
    }
}

/// All natural loops in `f`, innermost loops first within each nesting
/// chain is not guaranteed — callers that need outside-in order should
/// sort by `depth`.
pub struct LoopForest {
    pub loops: Vec<Loop>,
}

impl LoopForest {
    pub fn analyze(f: &Function, dt: &DominatorTree) -> Self {
        let mut loops = Vec::new();
        for &bb in dt.reverse_postorder() {
            let mut back_edge_sources = Vec::new();
            for &pred in &f.block(bb).preds {
                if dt.dominates(bb, pred) {
                    back_edge_sources.push(pred);
                }
            }
            if back_edge_sources.is_empty() {
                continue;
            }
            let blocks = natural_loop_body(f, bb, &back_edge_sources);
            loops.push(Loop { header: bb, blocks, back_edge_sources, children: Vec::new(), parent: None });
        }

        // Nest by body-set containment: a loop with the smaller body is a
        // child of the smallest strictly-larger body that contains it.
        let n = loops.len();
        for i in 0..n {
            let mut best: Option<usize> = None;
            for j in 0..n {
                if i == j {
                    continue;
                }
                if loops[j].blocks.len() > loops[i].blocks.len() && loops[j].blocks.contains(&loops[i].header) {
                    if best.map_or(true, |b| loops[j].blocks.len() < loops[b].blocks.len()) {
                        best = Some(j);
                    }
                }
            }
            if let Some(parent) = best {
                loops[i].parent = Some(parent);
            }
        }
        for i in 0..n {
            if let Some(p) = loops[i].parent {
                loops[p].children.push(i);
            }
        }

        LoopForest { loops }
    }

    pub fn loop_for_block(&self, bb: BlockId) -> Option<&Loop> {
        self.loops
            .iter()
            .filter(|l| l.contains(bb))
            .min_by_key(|l| l.blocks.len())
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Loop> {
        self.loops.iter().filter(|l| l.parent.is_none())
    }
}

/// Walks the CFG backward from each back-edge source up to (and
/// including) `header`, collecting every block reachable — the standard
/// natural-loop-body construction.
fn natural_loop_body(f: &Function, header: BlockId, back_edge_sources: &[BlockId]) -> FxHashSet<BlockId> {
    let mut body = FxHashSet::default();
    body.insert(header);
    let mut worklist: VecDeque<BlockId> = back_edge_sources.iter().copied().collect();
    while let Some(bb) = worklist.pop_front() {
        if !body.insert(bb) {
            continue;
        }
        for &pred in &f.block(bb).preds {
            if !body.contains(&pred) {
                worklist.push_back(pred);
            }
        }
    }
    body
}

/// Ensures `loop_` has a single preheader: a block outside the loop whose
/// only successor is the header, with every non-back-edge predecessor of
/// the header redirected through it. Returns the existing preheader if
/// one already satisfies this, otherwise synthesizes one and rewrites the
/// header's phis to take their non-loop incoming values from it.
pub fn get_or_insert_preheader(f: &mut Function, func_id: FuncId, loop_: &Loop) -> BlockId {
    let header = loop_.header;
    let outside_preds: Vec<BlockId> = f
        .block(header)
        .preds
        .iter()
        .copied()
        .filter(|p| !loop_.contains(*p))
        .collect();

    if outside_preds.len() == 1 {
        let candidate = outside_preds[0];
        if f.block(candidate).succs == [header] {
            return candidate;
        }
    }

    let preheader = f.add_block(BasicBlock::with_label(format!("{header}.preheader")));
    let _ = func_id;

    for &pred in &outside_preds {
        let succs = &mut f.block_mut(pred).succs;
        for s in succs.iter_mut() {
            if *s == header {
                *s = preheader;
            }
        }
    }
    f.block_mut(preheader).preds = outside_preds.clone();
    f.block_mut(preheader).succs = vec![header];
    f.push_inst(preheader, Instruction::Br { target: header });

    for &pred in &outside_preds {
        retarget_terminator(f, pred, header, preheader);
    }

    f.block_mut(header).preds.retain(|p| loop_.contains(*p));
    f.block_mut(header).preds.push(preheader);

    for &inst_id in f.block(header).insts.clone().iter() {
        if let Instruction::Phi { incoming, .. } = f.inst_mut(inst_id) {
            let mut from_outside: Option<PhiIncoming> = None;
            incoming.retain(|inc| {
                if outside_preds.contains(&inc.pred) {
                    if from_outside.is_none() {
                        from_outside = Some(*inc);
                    }
                    false
                } else {
                    true
                }
            });
            if let Some(mut inc) = from_outside {
                inc.pred = preheader;
                incoming.push(inc);
            }
        }
    }

    preheader
}

fn retarget_terminator(f: &mut Function, block: BlockId, old_target: BlockId, new_target: BlockId) {
    let Some(term) = f.block(block).terminator() else { return };
    match f.inst_mut(term) {
        Instruction::Br { target } if *target == old_target => *target = new_target,
        Instruction::CondBr { then_bb, else_bb, .. } => {
            if *then_bb == old_target {
                *then_bb = new_target;
            }
            if *else_bb == old_target {
                *else_bb = new_target;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, IrBuilder, Module};
    use crate::types::Type;

    /// entry -> header -> {body -> header (back edge), exit}
    fn build_single_loop() -> (Module, FuncId, BlockId, BlockId, BlockId, BlockId) {
        let mut m = Module::new("t");
        let fid = m.add_function(Function::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let body = m.function_mut(fid).add_block(BasicBlock::with_label("body"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        b.build_br(header);
        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let c = b.const_bool(true);
        b.build_cond_br(c, body, exit);
        let mut b = IrBuilder::at_end(&mut m, fid, body);
        b.build_br(header);
        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(None);

        (m, fid, entry, header, body, exit)
    }

    #[test]
    fn finds_one_loop_with_correct_header_and_body() {
        let (m, fid, _entry, header, body, exit) = build_single_loop();
        let dt = DominatorTree::compute(m.function(fid));
        let forest = LoopForest::analyze(m.function(fid), &dt);
        assert_eq!(forest.loops.len(), 1);
        let l = &forest.loops[0];
        assert_eq!(l.header, header);
        assert!(l.contains(header) && l.contains(body));
        assert!(!l.contains(exit));
        assert_eq!(l.back_edge_sources, vec![body]);
    }

    #[test]
    fn preheader_is_synthesized_when_single_outside_pred_is_not_exclusive() {
        let (mut m, fid, entry, header, ..) = build_single_loop();
        let dt = DominatorTree::compute(m.function(fid));
        let forest = LoopForest::analyze(m.function(fid), &dt);
        let l = forest.loops[0].clone();
        let preheader = get_or_insert_preheader(m.function_mut(fid), fid, &l);
        // entry's only successor was already just `header`, so entry itself
        // qualifies and no new block should have been synthesized.
        assert_eq!(preheader, entry);
        assert_eq!(header, l.header);
    }
}
