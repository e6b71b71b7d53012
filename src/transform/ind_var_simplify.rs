//! IndVarSimplify: basic induction variable recognition and strength
//! reduction, per spec.md §4.7. A basic IV is a header phi with exactly
//! two incoming pairs — a loop-invariant start from the preheader and a
//! `phi + step` update from the latch, `step` itself loop-invariant.
//! A derived IV of the form `iv * c` (`c` a loop-invariant constant) is
//! rewritten into its own accumulator phi stepped by `step * c`, trading
//! a per-iteration multiply for a per-iteration add.

use crate::analysis::dominators::DominatorTree;
use crate::analysis::loops::{get_or_insert_preheader, Loop, LoopForest};
use crate::ir::{BinOpKind, BlockId, Constant, FuncId, InstId, Instruction, Module, ValueId};
use crate::types::Type;

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= ind_var_simplify_function(module, fid);
    }
    tracing::debug!(changed, "ind_var_simplify finished");
    changed
}

struct BasicIv {
    phi: InstId,
    phi_val: ValueId,
    preheader: BlockId,
    latch: BlockId,
    start: ValueId,
    step: ValueId,
    ty: Type,
}

fn ind_var_simplify_function(module: &mut Module, fid: FuncId) -> bool {
    crate::analysis::compute_cfg(module.function_mut(fid));
    let dt = DominatorTree::compute(module.function(fid));
    let forest = LoopForest::analyze(module.function(fid), &dt);

    let mut changed = false;
    for loop_ in &forest.loops {
        if loop_.back_edge_sources.len() != 1 {
            continue;
        }
        let preheader = get_or_insert_preheader(module.function_mut(fid), fid, loop_);
        let Some(iv) = find_basic_iv(module, fid, loop_, preheader) else { continue };
        changed |= strength_reduce_derived(module, fid, loop_, &iv);
    }
    changed
}

fn find_basic_iv(module: &Module, fid: FuncId, loop_: &Loop, preheader: BlockId) -> Option<BasicIv> {
    let f = module.function(fid);
    let latch = loop_.back_edge_sources[0];
    let header = loop_.header;

    for &inst_id in &f.block(header).insts {
        let Instruction::Phi { dest, ty, incoming } = f.inst(inst_id) else { continue };
        if incoming.len() != 2 {
            continue;
        }
        let Some(from_preheader) = incoming.iter().find(|inc| inc.pred == preheader).map(|inc| inc.value) else {
            continue;
        };
        let Some(from_latch) = incoming.iter().find(|inc| inc.pred == latch).map(|inc| inc.value) else {
            continue;
        };

        let Some(Instruction::BinOp { op: BinOpKind::Add, lhs, rhs, .. }) = f.defining_inst(from_latch) else {
            continue;
        };
        let step = if *lhs == *dest {
            *rhs
        } else if *rhs == *dest {
            *lhs
        } else {
            continue;
        };
        if !is_loop_invariant(f, loop_, step) {
            continue;
        }
        if !is_loop_invariant(f, loop_, from_preheader) {
            continue;
        }
        return Some(BasicIv {
            phi: inst_id,
            phi_val: *dest,
            preheader,
            latch,
            start: from_preheader,
            step,
            ty: ty.clone(),
        });
    }
    None
}

fn is_loop_invariant(f: &crate::ir::Function, loop_: &Loop, v: ValueId) -> bool {
    match f.value(v).def_inst {
        None => true,
        Some(def) => !loop_.contains(f.block_of(def)),
    }
}

/// Finds every `%j = mul %iv, C` (C a compile-time integer constant) in
/// the loop body and replaces `%j` with a new accumulator phi stepped by
/// `C * step` each iteration, seeded by `C * start`.
fn strength_reduce_derived(module: &mut Module, fid: FuncId, loop_: &Loop, iv: &BasicIv) -> bool {
    let mut candidates: Vec<(InstId, i64)> = Vec::new();
    {
        let f = module.function(fid);
        for &bb in loop_.blocks.iter() {
            for (inst_id, inst) in f.block_insts(bb) {
                let Instruction::BinOp { op: BinOpKind::Mul, lhs, rhs, .. } = inst else { continue };
                let other = if *lhs == iv.phi_val {
                    *rhs
                } else if *rhs == iv.phi_val {
                    *lhs
                } else {
                    continue;
                };
                let Some(c) = f.value(other).as_constant().and_then(|c| c.as_i64()) else { continue };
                candidates.push((inst_id, c));
            }
        }
    }
    if candidates.is_empty() {
        return false;
    }

    let mut changed = false;
    for (inst_id, c) in candidates {
        changed |= reduce_one(module, fid, loop_, iv, inst_id, c);
    }
    changed
}

fn reduce_one(module: &mut Module, fid: FuncId, loop_: &Loop, iv: &BasicIv, mul_inst: InstId, c: i64) -> bool {
    let dest = match module.function(fid).inst(mul_inst).dest() {
        Some(d) => d,
        None => return false,
    };

    let start_const = match module.function(fid).value(iv.start).as_constant().and_then(|k| k.as_i64()) {
        Some(v) => v,
        None => return false,
    };
    let step_const = match module.function(fid).value(iv.step).as_constant().and_then(|k| k.as_i64()) {
        Some(v) => v,
        None => return false,
    };

    let f = module.function_mut(fid);
    let scaled_start = f.alloc_constant(iv.ty.clone(), int_constant(&iv.ty, start_const.wrapping_mul(c)));
    let scaled_step = f.alloc_constant(iv.ty.clone(), int_constant(&iv.ty, step_const.wrapping_mul(c)));

    let (new_phi_inst, new_phi_val) = f.prepend_phi(loop_.header, iv.ty.clone());

    let step_val = f.next_value_id();
    let step_inst_id = f.next_inst_id();
    f.values.push(crate::ir::ValueData::new_register(iv.ty.clone(), step_inst_id));
    let add_inst = Instruction::BinOp { op: BinOpKind::Add, dest: step_val, lhs: new_phi_val, rhs: scaled_step, ty: iv.ty.clone() };
    let latch_term = f.block(iv.latch).terminator();
    for (slot, operand) in add_inst.operand_slots().into_iter().enumerate() {
        if f.value(operand).tracks_uses() {
            f.value_mut(operand).use_list.push(crate::ir::Use { user: step_inst_id, slot: slot as u8 });
        }
    }
    f.insts.push(add_inst);
    match latch_term {
        Some(term) => f.block_mut(iv.latch).insert_before(term, step_inst_id),
        None => f.block_mut(iv.latch).push(step_inst_id),
    }

    f.add_phi_incoming(new_phi_inst, scaled_start, iv.preheader);
    f.add_phi_incoming(new_phi_inst, step_val, iv.latch);

    f.replace_all_uses_with(dest, new_phi_val);
    let bb = f.block_of(mul_inst);
    f.erase_inst(bb, mul_inst);
    true
}

fn int_constant(ty: &Type, v: i64) -> Constant {
    match ty {
        Type::Basic { kind: crate::types::BasicKind::I64, .. } => Constant::I64(v),
        Type::Basic { kind: crate::types::BasicKind::I1, .. } => Constant::I1(v != 0),
        Type::Basic { kind: crate::types::BasicKind::I8, .. } => Constant::I8(v as i8),
        _ => Constant::I32(v as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    /// `i` runs 0, 1, 2, ... via a header phi; `j = i * 4` is recomputed
    /// each iteration and should be strength-reduced to its own
    /// accumulator stepped by 4.
    #[test]
    fn strength_reduces_multiply_by_constant_derived_iv() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let zero = b.const_i32(0);
        b.build_br(header);

        let (phi_inst, phi_val) = m.function_mut(fid).prepend_phi(header, Type::i32());
        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let four = b.const_i32(4);
        let j = b.build_binop(BinOpKind::Mul, phi_val, four, Type::i32());
        let one = b.const_i32(1);
        let next = b.build_binop(BinOpKind::Add, phi_val, one, Type::i32());
        let c = b.const_bool(true);
        b.build_cond_br(c, header, exit);

        m.function_mut(fid).add_phi_incoming(phi_inst, zero, entry);
        m.function_mut(fid).add_phi_incoming(phi_inst, next, header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(Some(j));

        assert!(run(&mut m));
        let f = m.function(fid);
        let ret_inst = *f.block(exit).insts.last().unwrap();
        let Instruction::Ret { value: Some(rv) } = f.inst(ret_inst) else { panic!() };
        let Instruction::Phi { incoming, .. } = f.defining_inst(*rv).expect("j now comes from a phi") else {
            panic!("expected strength-reduced value to be a phi")
        };
        assert_eq!(incoming.len(), 2);
    }

    #[test]
    fn leaves_non_affine_multiply_alone() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
        let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let zero = b.const_i32(0);
        let other = b.build_alloca(Type::i32(), 4);
        let other_load = b.build_load(other, Type::i32());
        b.build_br(header);

        let (phi_inst, phi_val) = m.function_mut(fid).prepend_phi(header, Type::i32());
        let mut b = IrBuilder::at_end(&mut m, fid, header);
        let j = b.build_binop(BinOpKind::Mul, phi_val, other_load, Type::i32());
        let one = b.const_i32(1);
        let next = b.build_binop(BinOpKind::Add, phi_val, one, Type::i32());
        let c = b.const_bool(true);
        b.build_cond_br(c, header, exit);

        m.function_mut(fid).add_phi_incoming(phi_inst, zero, entry);
        m.function_mut(fid).add_phi_incoming(phi_inst, next, header);

        let mut b = IrBuilder::at_end(&mut m, fid, exit);
        b.build_ret(Some(j));

        assert!(!run(&mut m));
    }
}
