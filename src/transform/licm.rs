//! LICM: loop-invariant code motion, per spec.md §4.7. Every loop gets a
//! preheader; speculatable instructions whose operands are all defined
//! outside the loop (or are themselves already hoisted) move there,
//! innermost loop first so an outer loop can, in turn, hoist what an
//! inner loop's hoisting left invariant at its own level.

use crate::analysis::dominators::DominatorTree;
use crate::analysis::loops::{get_or_insert_preheader, Loop, LoopForest};
use crate::ir::{BlockId, FuncId, InstId, Module};
use rustc_hash::FxHashSet;

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= licm_function(module, fid);
    }
    tracing::debug!(changed, "licm finished");
    changed
}

fn licm_function(module: &mut Module, fid: FuncId) -> bool {
    crate::analysis::compute_cfg(module.function_mut(fid));
    let dt = DominatorTree::compute(module.function(fid));
    let forest = LoopForest::analyze(module.function(fid), &dt);
    if forest.loops.is_empty() {
        return false;
    }

    let mut order: Vec<usize> = (0..forest.loops.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(forest.loops[i].depth(&forest.loops)));

    let mut changed = false;
    for idx in order {
        changed |= hoist_loop(module, fid, &forest.loops[idx]);
    }
    changed
}

fn hoist_loop(module: &mut Module, fid: FuncId, loop_: &Loop) -> bool {
    let preheader = get_or_insert_preheader(module.function_mut(fid), fid, loop_);

    let mut invariant: FxHashSet<InstId> = FxHashSet::default();
    let body_blocks: Vec<BlockId> = {
        let f = module.function(fid);
        let mut blocks: Vec<BlockId> = loop_.blocks.iter().copied().filter(|&b| b != preheader).collect();
        blocks.sort_by_key(|b| b.index());
        blocks
    };

    loop {
        let mut grew = false;
        let f = module.function(fid);
        for &bb in &body_blocks {
            for (inst_id, inst) in f.block_insts(bb) {
                if invariant.contains(&inst_id) || !inst.is_speculatable() {
                    continue;
                }
                let all_outside = inst.operand_slots().into_iter().all(|op| match f.value(op).def_inst {
                    None => true,
                    Some(def) => !loop_.contains(f.block_of(def)) || invariant.contains(&def),
                });
                if all_outside && invariant.insert(inst_id) {
                    grew = true;
                }
            }
        }
        if !grew {
            break;
        }
    }

    if invariant.is_empty() {
        return false;
    }

    // Move in original per-block program order, which is already
    // def-before-use for an SSA program, so hoisting one invariant
    // instruction never strands a use of another ahead of its definition.
    let mut to_move: Vec<(BlockId, InstId)> = Vec::new();
    {
        let f = module.function(fid);
        for &bb in &body_blocks {
            for &inst_id in &f.block(bb).insts {
                if invariant.contains(&inst_id) {
                    to_move.push((bb, inst_id));
                }
            }
        }
    }

    let f = module.function_mut(fid);
    let term = f.block(preheader).terminator();
    for (bb, inst_id) in to_move {
        f.block_mut(bb).remove(inst_id);
        match term {
            Some(t) => f.block_mut(preheader).insert_before(t, inst_id),
            None => f.block_mut(preheader).push(inst_id),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, BinOpKind, Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    /// `header` computes `%inv = add %a, %b` from two pre-loop constants
    /// every iteration; it should move to the preheader.
    #[test]
    fn hoists_loop_invariant_computation_to_preheader() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let body = m.function_mut(fid).add_block(BasicBlock::with_label("body"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.const_i32(1);
        let bb_ = b.const_i32(2);
        b.build_br(header);

        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let inv = b.build_binop(BinOpKind::Add, a, bb_, Type::i32());
        let c = b.const_bool(true);
        b.build_cond_br(c, body, exit);

        let mut b = IrBuilder::at_end(&mut m, fid, body);
        b.build_br(header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(Some(inv));

        assert!(run(&mut m));
        let f = m.function(fid);
        let inv_inst = f.value(inv).def_inst.unwrap();
        let home = f.block_of(inv_inst);
        assert_ne!(home, header, "invariant add should have left the header");
        assert_ne!(home, body);
    }

    #[test]
    fn leaves_loop_variant_computation_in_place() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let body = m.function_mut(fid).add_block(BasicBlock::with_label("body"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        b.build_br(header);

        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let phi_ty = Type::i32();
        let (phi_inst, phi_val) = m.function_mut(fid).prepend_phi(header, phi_ty.clone());
        let _ = phi_inst;
        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let one = b.const_i32(1);
        let next = b.build_binop(BinOpKind::Add, phi_val, one, Type::i32());
        let c = b.const_bool(true);
        b.build_cond_br(c, body, exit);

        m.function_mut(fid).add_phi_incoming(phi_inst, next, header);
        let zero = {
            let mut b2 = IrBuilder::at_end(&mut m, fid, entry);
            b2.const_i32(0)
        };
        m.function_mut(fid).add_phi_incoming(phi_inst, zero, entry);

        let mut b = IrBuilder::at_end(&mut m, fid, body);
        b.build_br(header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(Some(next));

        assert!(!run(&mut m));
        let f = m.function(fid);
        assert_eq!(f.block_of(f.value(next).def_inst.unwrap()), header);
    }

    /// `header` computes a loop-invariant `%q = sdiv %a, %b` every
    /// iteration. Even though its operands are both defined in the
    /// preheader, it must stay put: hoisting it would run the division on
    /// every entry to the loop, including a zero-trip one the original
    /// program would never have executed it on.
    #[test]
    fn never_hoists_a_loop_invariant_divide() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let body = m.function_mut(fid).add_block(BasicBlock::with_label("body"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.const_i32(10);
        let divisor = b.const_i32(0);
        b.build_br(header);

        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let q = b.build_binop(BinOpKind::SDiv, a, divisor, Type::i32());
        let c = b.const_bool(true);
        b.build_cond_br(c, body, exit);

        let mut b = IrBuilder::at_end(&mut m, fid, body);
        b.build_br(header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(Some(q));

        assert!(!run(&mut m), "sdiv is loop-invariant but never speculatable, so LICM should make no change");
        let f = m.function(fid);
        assert_eq!(f.block_of(f.value(q).def_inst.unwrap()), header, "divide must stay in the header, not move to the preheader");
    }
}
