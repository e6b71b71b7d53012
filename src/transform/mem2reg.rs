//! Mem2Reg: promotes `alloca`/`load`/`store` traffic on scalar, never
//! address-escaped allocas into SSA registers with phi nodes, the
//! standard Cytron et al. iterated-dominance-frontier construction.
//!
//! Array allocas are left alone — [`crate::transform::sroa`] decomposes
//! those into per-element scalar allocas first, so by the time this pass
//! runs on a function SROA has already converted, every promotable
//! alloca this pass sees is scalar.

use crate::analysis::compute_cfg;
use crate::analysis::dominators::DominatorTree;
use crate::ir::{BlockId, FuncId, Function, InstId, Instruction, Module, ValueId};
use rustc_hash::{FxHashMap, FxHashSet};

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= promote_function(module, fid);
    }
    tracing::debug!(changed, "mem2reg finished");
    changed
}

fn is_promotable(f: &Function, alloca_dest: ValueId, alloca_ty: &crate::types::Type) -> bool {
    if alloca_ty.is_array() {
        return false;
    }
    f.value(alloca_dest).use_list.iter().all(|u| match f.inst(u.user) {
        Instruction::Load { ptr, .. } => *ptr == alloca_dest,
        Instruction::Store { ptr, value } => *ptr == alloca_dest && *value != alloca_dest,
        _ => false,
    })
}

fn find_promotable_allocas(f: &Function) -> Vec<(InstId, ValueId, crate::types::Type)> {
    let mut out = Vec::new();
    for bb in f.block_ids() {
        for (inst_id, inst) in f.block_insts(bb) {
            if let Instruction::Alloca { dest, ty, .. } = inst {
                if is_promotable(f, *dest, ty) {
                    out.push((inst_id, *dest, ty.clone()));
                }
            }
        }
    }
    out
}

fn store_blocks(f: &Function, alloca_dest: ValueId) -> FxHashSet<BlockId> {
    f.value(alloca_dest)
        .use_list
        .iter()
        .filter(|u| matches!(f.inst(u.user), Instruction::Store { .. }))
        .map(|u| f.block_ids().find(|&b| f.block(b).insts.contains(&u.user)).unwrap())
        .collect()
}

fn iterated_dominance_frontier(dt: &DominatorTree, def_blocks: &FxHashSet<BlockId>) -> FxHashSet<BlockId> {
    let mut result = FxHashSet::default();
    let mut in_worklist: FxHashSet<BlockId> = def_blocks.clone();
    let mut worklist: Vec<BlockId> = def_blocks.iter().copied().collect();
    while let Some(bb) = worklist.pop() {
        for &df in dt.dominance_frontier(bb) {
            if result.insert(df) && in_worklist.insert(df) {
                worklist.push(df);
            }
        }
    }
    result
}

fn promote_function(module: &mut Module, fid: FuncId) -> bool {
    compute_cfg(module.function_mut(fid));
    let candidates = find_promotable_allocas(module.function(fid));
    if candidates.is_empty() {
        return false;
    }

    let dt = DominatorTree::compute(module.function(fid));

    // Phase 1: insert empty phis at the iterated dominance frontier of each
    // alloca's store set.
    let mut phi_for_alloca: FxHashMap<(BlockId, ValueId), InstId> = FxHashMap::default();
    for &(_, alloca, ref ty) in &candidates {
        let def_blocks = store_blocks(module.function(fid), alloca);
        for bb in iterated_dominance_frontier(&dt, &def_blocks) {
            let (phi_id, _) = module.function_mut(fid).prepend_phi(bb, ty.clone());
            phi_for_alloca.insert((bb, alloca), phi_id);
        }
    }

    // Phase 2: dominator-tree-preorder rename walk (true tree recursion, so
    // stack pops happen exactly when a subtree is done — see
    // `rename_subtree`). A stack per alloca tracks "what value would a load
    // see right now"; phis push their own destination, stores push the
    // stored value, loads are retired by RAUW-ing their result with the
    // current top of stack.
    let promotable: FxHashSet<ValueId> = candidates.iter().map(|&(_, a, _)| a).collect();
    let mut stacks: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
    let mut to_erase: Vec<(BlockId, InstId)> = Vec::new();
    for &(_, alloca, _) in &candidates {
        stacks.insert(alloca, Vec::new());
    }
    let entry = module.function(fid).entry.unwrap();
    rename_subtree(module, fid, &dt, entry, &candidates, &phi_for_alloca, &promotable, &mut stacks, &mut to_erase);

    for (bb, inst_id) in to_erase {
        module.function_mut(fid).erase_inst(bb, inst_id);
    }
    // Erase the now-unused allocas themselves.
    for (alloca_inst, dest, _) in candidates {
        if module.function(fid).value(dest).use_list.is_empty() {
            let bb = module.function(fid).block_ids().find(|&b| module.function(fid).block(b).insts.contains(&alloca_inst)).unwrap();
            module.function_mut(fid).erase_inst(bb, alloca_inst);
        }
    }

    true
}

#[allow(clippy::too_many_arguments)]
fn rename_subtree(
    module: &mut Module,
    fid: FuncId,
    dt: &DominatorTree,
    bb: BlockId,
    candidates: &[(InstId, ValueId, crate::types::Type)],
    phi_for_alloca: &FxHashMap<(BlockId, ValueId), InstId>,
    promotable: &FxHashSet<ValueId>,
    stacks: &mut FxHashMap<ValueId, Vec<ValueId>>,
    to_erase: &mut Vec<(BlockId, InstId)>,
) {
    let mut pushed_count: FxHashMap<ValueId, usize> = FxHashMap::default();

    for &(_, alloca, _) in candidates {
        if let Some(&phi_id) = phi_for_alloca.get(&(bb, alloca)) {
            let dest = module.function(fid).inst(phi_id).dest().unwrap();
            stacks.entry(alloca).or_default().push(dest);
            *pushed_count.entry(alloca).or_insert(0) += 1;
        }
    }

    let inst_ids: Vec<InstId> = module.function(fid).block(bb).insts.clone();
    for inst_id in inst_ids {
        match module.function(fid).inst(inst_id).clone() {
            Instruction::Store { value, ptr } if promotable.contains(&ptr) => {
                stacks.entry(ptr).or_default().push(value);
                *pushed_count.entry(ptr).or_insert(0) += 1;
                to_erase.push((bb, inst_id));
            }
            Instruction::Load { dest, ptr, ty } if promotable.contains(&ptr) => {
                let current = stacks.get(&ptr).and_then(|s| s.last()).copied();
                let current = current.unwrap_or_else(|| module.function_mut(fid).alloc_undef(ty));
                module.function_mut(fid).replace_all_uses_with(dest, current);
                to_erase.push((bb, inst_id));
            }
            _ => {}
        }
    }

    for succ in module.function(fid).block(bb).succs.clone() {
        for &(_, alloca, _) in candidates {
            if let Some(&phi_id) = phi_for_alloca.get(&(succ, alloca)) {
                let current = stacks.get(&alloca).and_then(|s| s.last()).copied().unwrap_or_else(|| {
                    let ty = module.function(fid).inst(phi_id).dest().map(|d| module.function(fid).value(d).ty.clone()).unwrap();
                    module.function_mut(fid).alloc_undef(ty)
                });
                module.function_mut(fid).add_phi_incoming(phi_id, current, bb);
            }
        }
    }

    for &child in dt.children(bb) {
        rename_subtree(module, fid, dt, child, candidates, phi_for_alloca, promotable, stacks, to_erase);
    }

    for (alloca, n) in pushed_count {
        let stack = stacks.get_mut(&alloca).unwrap();
        for _ in 0..n {
            stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, BinOpKind, Function, IrBuilder};
    use crate::types::Type;

    /// `int x = 0; if (c) x = 1; return x;` — a single promotable alloca
    /// with a phi needed at the join block.
    #[test]
    fn promotes_straight_line_and_diamond_joins() {
        let mut m = crate::ir::Module::new("t");
        let fid = m.add_function(Function::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let then_bb = m.function_mut(fid).add_block(BasicBlock::with_label("then"));
        let join = m.function_mut(fid).add_block(BasicBlock::with_label("join"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let slot = b.build_alloca(Type::i32(), 4);
        let zero = b.const_i32(0);
        b.build_store(zero, slot);
        let cond = b.const_bool(true);
        b.build_cond_br(cond, then_bb, join);

        let mut b = IrBuilder::at_end(&mut m, fid, then_bb);
        let one = b.const_i32(1);
        b.build_store(one, slot);
        b.build_br(join);

        let mut b = IrBuilder::at_end(&mut m, fid, join);
        let loaded = b.build_load(slot, Type::i32());
        b.build_ret(Some(loaded));

        let changed = run(&mut m);
        assert!(changed);

        let f = m.function(fid);
        assert!(f.block(join).insts.iter().any(|&i| f.inst(i).is_phi()), "expected a phi at the join block");
        assert!(
            !f.block(entry).insts.iter().any(|&i| matches!(f.inst(i), Instruction::Alloca { .. })),
            "alloca should have been erased"
        );
    }

    #[test]
    fn non_promotable_alloca_is_left_alone() {
        // An alloca whose address is passed to a call is not promotable.
        let mut m = crate::ir::Module::new("t");
        let callee = m.add_function(Function::declaration("takes_ptr", Type::Void, vec![Type::ptr(Type::i32())], false));
        let fid = m.add_function(Function::declaration("f", Type::Void, vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let slot = b.build_alloca(Type::i32(), 4);
        b.build_call(callee, vec![slot], Type::Void);
        b.build_ret(None);

        let changed = run(&mut m);
        assert!(!changed);
        let f = m.function(fid);
        assert!(f.block(entry).insts.iter().any(|&i| matches!(f.inst(i), Instruction::Alloca { .. })));
    }

    #[test]
    fn two_independent_allocas_promote_without_cross_talk() {
        let mut m = crate::ir::Module::new("t");
        let fid = m.add_function(Function::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.build_alloca(Type::i32(), 4);
        let bb_slot = b.build_alloca(Type::i32(), 4);
        let c1 = b.const_i32(1);
        let c2 = b.const_i32(2);
        b.build_store(c1, a);
        b.build_store(c2, bb_slot);
        let la = b.build_load(a, Type::i32());
        let lb = b.build_load(bb_slot, Type::i32());
        let sum = b.build_binop(BinOpKind::Add, la, lb, Type::i32());
        b.build_ret(Some(sum));

        assert!(run(&mut m));
        let f = m.function(fid);
        assert!(!f.block(entry).insts.iter().any(|&i| matches!(f.inst(i), Instruction::Alloca { .. })));
    }
}
