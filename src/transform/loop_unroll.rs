//! LoopUnroll: full unroll of single-block counted loops with a
//! compile-time-constant trip count, per spec.md §4.7. Disabled by
//! default — [`crate::pass_manager::PassManagerConfig::enable_loop_unroll`]
//! gates whether the pass manager ever calls [`run`]. Only loops whose
//! header holds exactly one phi (the induction variable itself — no
//! carried accumulator) are unrolled, since that's the shape a clone of
//! the body without per-iteration phi-chaining can reproduce exactly.

use crate::analysis::dominators::DominatorTree;
use crate::analysis::loops::{get_or_insert_preheader, Loop, LoopForest};
use crate::ir::{
    BasicBlock, BinOpKind, BlockId, Constant, FuncId, IcmpCond, InstId, Instruction, Module, ValueData, ValueId,
};
use crate::types::Type;
use rustc_hash::FxHashMap;

const DEFAULT_MAX_TRIP_COUNT: i64 = 4096;

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module, factor: usize) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= unroll_function(module, fid, factor);
    }
    tracing::debug!(changed, factor, "loop_unroll finished");
    changed
}

fn unroll_function(module: &mut Module, fid: FuncId, factor: usize) -> bool {
    if factor < 2 {
        return false;
    }
    crate::analysis::compute_cfg(module.function_mut(fid));
    let dt = DominatorTree::compute(module.function(fid));
    let forest = LoopForest::analyze(module.function(fid), &dt);

    let mut changed = false;
    for loop_ in &forest.loops {
        if loop_.back_edge_sources.len() != 1 || loop_.back_edge_sources[0] != loop_.header {
            // Only the single-block self-loop shape is supported.
            continue;
        }
        if loop_.blocks.len() != 1 {
            continue;
        }
        if try_unroll_loop(module, fid, loop_, factor) {
            changed = true;
        }
    }
    changed
}

struct CountedLoop {
    header: BlockId,
    preheader: BlockId,
    exit: BlockId,
    phi: InstId,
    phi_val: ValueId,
    start: i64,
    step: i64,
    ty: Type,
    trip_count: i64,
}

fn try_unroll_loop(module: &mut Module, fid: FuncId, loop_: &Loop, factor: usize) -> bool {
    let preheader = get_or_insert_preheader(module.function_mut(fid), fid, loop_);
    let Some(cl) = analyze_countable(module, fid, loop_, preheader) else { return false };
    if cl.trip_count <= 0 || cl.trip_count % factor as i64 != 0 {
        return false;
    }
    if cl.trip_count > DEFAULT_MAX_TRIP_COUNT {
        tracing::debug!(trip_count = cl.trip_count, "loop_unroll: trip count exceeds cap, skipping");
        return false;
    }

    unroll_body(module, fid, &cl);
    true
}

fn analyze_countable(module: &Module, fid: FuncId, loop_: &Loop, preheader: BlockId) -> Option<CountedLoop> {
    let f = module.function(fid);
    let header = loop_.header;

    let phi_id = f.block(header).insts.iter().copied().find(|&i| f.inst(i).is_phi())?;
    // Reject carried accumulators: a second phi would need per-iteration
    // value chaining this pass doesn't implement.
    if f.block(header).insts.iter().filter(|&&i| f.inst(i).is_phi()).count() != 1 {
        return None;
    }
    let Instruction::Phi { dest, ty, incoming } = f.inst(phi_id) else { return None };
    if incoming.len() != 2 {
        return None;
    }
    let start = incoming.iter().find(|inc| inc.pred == preheader).map(|inc| inc.value)?;
    let from_latch = incoming.iter().find(|inc| inc.pred == header).map(|inc| inc.value)?;
    let start_const = f.value(start).as_constant()?.as_i64()?;

    let Instruction::BinOp { op: BinOpKind::Add, lhs, rhs, .. } = f.defining_inst(from_latch)? else { return None };
    let step_val = if *lhs == *dest {
        *rhs
    } else if *rhs == *dest {
        *lhs
    } else {
        return None;
    };
    let step = f.value(step_val).as_constant()?.as_i64()?;
    if step == 0 {
        return None;
    }

    let term = f.block(header).terminator()?;
    let Instruction::CondBr { cond, then_bb, else_bb } = f.inst(term) else { return None };
    let Instruction::Icmp { cond: icmp_cond, lhs: clhs, rhs: crhs, .. } = f.defining_inst(*cond)? else { return None };
    let (iv_side_is_lhs, bound_operand) = if *clhs == *dest {
        (true, *crhs)
    } else if *crhs == *dest {
        (false, *clhs)
    } else {
        return None;
    };
    let bound = f.value(bound_operand).as_constant()?.as_i64()?;

    let exit = if *then_bb == header { *else_bb } else { *then_bb };

    let trip_count = simulate_trip_count(*icmp_cond, iv_side_is_lhs, start_const, step, bound)?;

    Some(CountedLoop {
        header,
        preheader,
        exit,
        phi: phi_id,
        phi_val: *dest,
        start: start_const,
        step,
        ty: ty.clone(),
        trip_count,
    })
}

/// Runs the loop condition forward in plain `i64` arithmetic up to a
/// generous cap, rather than deriving a closed form per comparison kind —
/// correct for every `IcmpCond` and either sign of `step` with one
/// implementation.
fn simulate_trip_count(cond: IcmpCond, iv_is_lhs: bool, start: i64, step: i64, bound: i64) -> Option<i64> {
    let mut i = start;
    let mut count = 0i64;
    while count <= DEFAULT_MAX_TRIP_COUNT {
        let keep_going = if iv_is_lhs { cond.evaluate(i, bound) } else { cond.evaluate(bound, i) };
        if !keep_going {
            return Some(count);
        }
        i = i.checked_add(step)?;
        count += 1;
    }
    None
}

fn unroll_body(module: &mut Module, fid: FuncId, cl: &CountedLoop) {
    let body_insts: Vec<InstId> = {
        let f = module.function(fid);
        f.block(cl.header).insts.iter().copied().filter(|&i| i != cl.phi && Some(i) != f.block(cl.header).terminator()).collect()
    };

    let unrolled = module.function_mut(fid).add_block(BasicBlock::with_label(format!("{}.unrolled", cl.header)));

    for k in 0..cl.trip_count {
        let iv_k = cl.start + k * cl.step;
        let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        let f = module.function_mut(fid);
        let iv_const = f.alloc_constant(cl.ty.clone(), int_constant(&cl.ty, iv_k));
        value_map.insert(cl.phi_val, iv_const);

        for &old_inst in &body_insts {
            let old = module.function(fid).inst(old_inst).clone();
            let new_dest = old.dest().map(|_| {
                let f = module.function_mut(fid);
                let ty = f.value(old.dest().unwrap()).ty.clone();
                let id = f.next_value_id();
                let inst_id = f.next_inst_id();
                f.values.push(ValueData::new_register(ty, inst_id));
                id
            });
            let remapped = remap_inst(&old, new_dest, &value_map);
            let f = module.function_mut(fid);
            let new_inst_id = f.push_inst(unrolled, remapped);
            if let Some(nd) = new_dest {
                f.value_mut(nd).def_inst = Some(new_inst_id);
                value_map.insert(old.dest().unwrap(), nd);
            }
        }
    }

    let f = module.function_mut(fid);
    f.push_inst(unrolled, Instruction::Br { target: cl.exit });
    f.block_mut(unrolled).succs = vec![cl.exit];
    f.block_mut(unrolled).preds = vec![cl.preheader];

    retarget_terminator(f, cl.preheader, cl.header, unrolled);
    f.block_mut(cl.preheader).succs = vec![unrolled];

    f.block_mut(cl.exit).preds.retain(|&p| p != cl.header);
    f.block_mut(cl.exit).preds.push(unrolled);
    retarget_phi_pred(f, cl.exit, cl.header, unrolled);

    for &inst_id in &f.block(cl.header).insts.clone() {
        retract_own_uses(f, inst_id);
    }
    f.block_mut(cl.header).insts.clear();
    f.block_mut(cl.header).preds.clear();
    f.block_mut(cl.header).succs.clear();
}

fn retract_own_uses(f: &mut crate::ir::Function, inst_id: InstId) {
    for (slot, operand) in f.inst(inst_id).operand_slots().into_iter().enumerate() {
        if f.value(operand).tracks_uses() {
            f.value_mut(operand).use_list.retain(|u| !(u.user == inst_id && u.slot as usize == slot));
        }
    }
}

fn remap_inst(inst: &Instruction, new_dest: Option<ValueId>, vmap: &FxHashMap<ValueId, ValueId>) -> Instruction {
    let v = |id: ValueId| vmap.get(&id).copied().unwrap_or(id);
    let d = || new_dest.expect("remap_inst: missing predeclared dest");
    match inst {
        Instruction::BinOp { op, lhs, rhs, ty, .. } => Instruction::BinOp { dest: d(), op: *op, lhs: v(*lhs), rhs: v(*rhs), ty: ty.clone() },
        Instruction::Alloca { ty, align, .. } => Instruction::Alloca { dest: d(), ty: ty.clone(), align: *align },
        Instruction::Load { ptr, ty, .. } => Instruction::Load { dest: d(), ptr: v(*ptr), ty: ty.clone() },
        Instruction::Store { value, ptr } => Instruction::Store { value: v(*value), ptr: v(*ptr) },
        Instruction::Gep { base, indices, result_ty, inbounds, .. } => Instruction::Gep {
            dest: d(),
            base: v(*base),
            indices: indices.iter().map(|&i| v(i)).collect(),
            result_ty: result_ty.clone(),
            inbounds: *inbounds,
        },
        Instruction::Icmp { cond, lhs, rhs, .. } => Instruction::Icmp { dest: d(), cond: *cond, lhs: v(*lhs), rhs: v(*rhs) },
        Instruction::Fcmp { cond, lhs, rhs, .. } => Instruction::Fcmp { dest: d(), cond: *cond, lhs: v(*lhs), rhs: v(*rhs) },
        Instruction::Call { callee, args, ty, .. } => {
            Instruction::Call { dest: new_dest, callee: *callee, args: args.iter().map(|&a| v(a)).collect(), ty: ty.clone() }
        }
        Instruction::Convert { kind, operand, dest_ty, .. } => {
            Instruction::Convert { dest: d(), kind: *kind, operand: v(*operand), dest_ty: dest_ty.clone() }
        }
        other => panic!("loop_unroll: unexpected instruction in a countable single-block body: {other:?}"),
    }
}

fn int_constant(ty: &Type, v: i64) -> Constant {
    match ty {
        Type::Basic { kind: crate::types::BasicKind::I64, .. } => Constant::I64(v),
        Type::Basic { kind: crate::types::BasicKind::I1, .. } => Constant::I1(v != 0),
        Type::Basic { kind: crate::types::BasicKind::I8, .. } => Constant::I8(v as i8),
        _ => Constant::I32(v as i32),
    }
}

fn retarget_terminator(f: &mut crate::ir::Function, block: BlockId, old_target: BlockId, new_target: BlockId) {
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

fn retarget_phi_pred(f: &mut crate::ir::Function, block: BlockId, old_pred: BlockId, new_pred: BlockId) {
    for &inst_id in f.block(block).insts.clone().iter() {
        if let Instruction::Phi { incoming, .. } = f.inst_mut(inst_id) {
            for inc in incoming.iter_mut() {
                if inc.pred == old_pred {
                    inc.pred = new_pred;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    /// `for (i = 0; i < 8; i += 1) { store i, ptr }` with a factor of 4
    /// divides the trip count evenly and should fully unroll into 8
    /// straight-line stores.
    #[test]
    fn fully_unrolls_counted_loop_with_no_carried_accumulator() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::Void, vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let zero = b.const_i32(0);
        let slot = b.build_alloca(Type::i32(), 4);
        b.build_br(header);

        let (phi_inst, phi_val) = m.function_mut(fid).prepend_phi(header, Type::i32());
        let mut b = IrBuilder::at_end(&mut m, fid, header);
        b.build_store(phi_val, slot);
        let one = b.const_i32(1);
        let next = b.build_binop(BinOpKind::Add, phi_val, one, Type::i32());
        let eight = b.const_i32(8);
        let cmp = b.build_icmp(IcmpCond::Slt, phi_val, eight);
        b.build_cond_br(cmp, header, exit);

        m.function_mut(fid).add_phi_incoming(phi_inst, zero, entry);
        m.function_mut(fid).add_phi_incoming(phi_inst, next, header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(None);

        assert!(run(&mut m, 4));
        let f = m.function(fid);
        let store_count = f.blocks.iter().flat_map(|bb| bb.insts.iter()).filter(|&&i| matches!(f.inst(i), Instruction::Store { .. })).count();
        assert_eq!(store_count, 8);
        assert!(f.block(header).insts.is_empty());
    }

    #[test]
    fn leaves_non_multiple_trip_count_alone() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::Void, vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let zero = b.const_i32(0);
        let slot = b.build_alloca(Type::i32(), 4);
        b.build_br(header);

        let (phi_inst, phi_val) = m.function_mut(fid).prepend_phi(header, Type::i32());
        let mut b = IrBuilder::at_end(&mut m, fid, header);
        b.build_store(phi_val, slot);
        let one = b.const_i32(1);
        let next = b.build_binop(BinOpKind::Add, phi_val, one, Type::i32());
        let six = b.const_i32(6);
        let cmp = b.build_icmp(IcmpCond::Slt, phi_val, six);
        b.build_cond_br(cmp, header, exit);

        m.function_mut(fid).add_phi_incoming(phi_inst, zero, entry);
        m.function_mut(fid).add_phi_incoming(phi_inst, next, header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(None);

        // Trip count is 6, not a multiple of the default factor of 4.
        assert!(!run(&mut m, 4));
    }
}
