//! Control-flow graph construction: derive every block's predecessor and
//! successor sets from its terminator, and compute a reverse-postorder
//! numbering that dominator computation and SCCP's block worklist both
//! build on.

use crate::ir::{BlockId, Function, Instruction};
use rustc_hash::FxHashSet;

/// Rebuilds `preds`/`succs` for every block in `f` from scratch. The
/// builder keeps these incrementally up to date as it emits branches, but
/// any pass that deletes or retargets a terminator directly (SimplifyCFG,
/// jump threading) must call this afterward rather than patch edges by
/// hand — recomputing is `O(blocks)` and never drifts from ground truth.
pub fn compute_cfg(f: &mut Function) {
    for b in f.blocks.iter_mut() {
        b.preds.clear();
        b.succs.clear();
    }
    let edges: Vec<(BlockId, BlockId)> = f
        .block_ids()
        .flat_map(|bb| successors_of(f, bb).into_iter().map(move |succ| (bb, succ)))
        .collect();
    for (from, to) in edges {
        f.block_mut(from).succs.push(to);
        f.block_mut(to).preds.push(from);
    }
}

/// The successor set implied by a block's terminator, independent of
/// whatever is currently cached in `succs` — used both by
/// [`compute_cfg`] and by passes that need a block's "true" successors
/// before the cached edges have been refreshed.
pub fn successors_of(f: &Function, bb: BlockId) -> Vec<BlockId> {
    match f.block(bb).terminator().map(|t| f.inst(t)) {
        Some(Instruction::Br { target }) => vec![*target],
        Some(Instruction::CondBr { then_bb, else_bb, .. }) => {
            if then_bb == else_bb {
                vec![*then_bb]
            } else {
                vec![*then_bb, *else_bb]
            }
        }
        Some(Instruction::Ret { .. }) | None => vec![],
        Some(_) => panic!("block {bb} does not end in a terminator"),
    }
}

/// Reverse postorder over the blocks reachable from `entry`. Every
/// dataflow analysis in this crate (dominators, SCCP's block worklist)
/// visits blocks in this order since it guarantees a block is visited
/// only after at least one predecessor has been, for any reducible CFG.
pub fn reverse_postorder(f: &Function, entry: BlockId) -> Vec<BlockId> {
    let mut visited = FxHashSet::default();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((bb, expanded)) = stack.pop() {
        if expanded {
            postorder.push(bb);
            continue;
        }
        if !visited.insert(bb) {
            continue;
        }
        stack.push((bb, true));
        for succ in f.block(bb).succs.iter().rev() {
            if !visited.contains(succ) {
                stack.push((*succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

/// Blocks unreachable from `entry` per the current `succs` edges — input
/// to `SimplifyCFG`'s unreachable-block removal.
pub fn unreachable_blocks(f: &Function, entry: BlockId) -> Vec<BlockId> {
    let reachable: FxHashSet<BlockId> = reverse_postorder(f, entry).into_iter().collect();
    f.block_ids().filter(|bb| !reachable.contains(bb)).collect()
}
