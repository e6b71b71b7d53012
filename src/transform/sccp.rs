//! SCCP: joint constant-propagation and reachability analysis on the
//! three-point lattice `Top ⊐ Constant ⊐ Bottom`, per spec.md §4.6. Two
//! worklists — one over blocks becoming reachable, one over SSA values
//! whose lattice value just descended — drive the fixed point; the
//! transformation phase then folds every Constant-marked register via RAUW
//! and rewrites conditional branches with a constant condition into
//! unconditional ones.

use crate::ir::{BinOpKind, BlockId, Constant, FuncId, Function, IcmpCond, FcmpCond, InstId, Instruction, Module, ValueId};
use crate::types::Type;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Safety net against a lattice-monotonicity bug looping forever — real
/// runs converge in far fewer passes than there are instructions.
const MAX_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
enum Lattice {
    Top,
    Constant(Constant),
    Bottom,
}

impl Lattice {
    fn meet(&self, other: &Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Top, x) | (x, Lattice::Top) => x.clone(),
            (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
            (Lattice::Constant(a), Lattice::Constant(b)) => {
                if values_equal(a, b) {
                    Lattice::Constant(a.clone())
                } else {
                    Lattice::Bottom
                }
            }
        }
    }
}

fn values_equal(a: &Constant, b: &Constant) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => return x == y,
        _ => {}
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= sccp_function(module, fid);
    }
    tracing::debug!(changed, "sccp finished");
    changed
}

struct SccpState {
    values: FxHashMap<ValueId, Lattice>,
    reachable: FxHashSet<BlockId>,
    executable_edges: FxHashSet<(BlockId, BlockId)>,
}

fn sccp_function(module: &mut Module, fid: FuncId) -> bool {
    crate::analysis::compute_cfg(module.function_mut(fid));
    let entry = module.function(fid).entry.unwrap();

    let mut state = SccpState {
        values: FxHashMap::default(),
        reachable: FxHashSet::default(),
        executable_edges: FxHashSet::default(),
    };

    {
        let f = module.function(fid);
        for &arg in &f.args {
            state.values.insert(arg, Lattice::Bottom);
        }
    }

    let mut block_worklist: VecDeque<BlockId> = VecDeque::new();
    let mut ssa_worklist: VecDeque<ValueId> = VecDeque::new();
    state.reachable.insert(entry);
    block_worklist.push_back(entry);

    let mut iterations = 0;
    while (!block_worklist.is_empty() || !ssa_worklist.is_empty()) && iterations < MAX_ITERATIONS {
        iterations += 1;
        if let Some(bb) = block_worklist.pop_front() {
            visit_block(module.function(fid), bb, &mut state, &mut block_worklist, &mut ssa_worklist);
        } else if let Some(v) = ssa_worklist.pop_front() {
            if let Some(inst_id) = module.function(fid).value(v).def_inst {
                revisit_inst(module.function(fid), inst_id, &mut state, &mut block_worklist, &mut ssa_worklist);
            }
        }
    }
    if iterations >= MAX_ITERATIONS {
        tracing::warn!("sccp hit its iteration cap; downgrading remaining Top values to Bottom");
        let keys: Vec<ValueId> = state.values.keys().copied().collect();
        for k in keys {
            if state.values[&k] == Lattice::Top {
                state.values.insert(k, Lattice::Bottom);
            }
        }
    }

    transform(module, fid, &state)
}

fn visit_block(
    f: &Function,
    bb: BlockId,
    state: &mut SccpState,
    block_worklist: &mut VecDeque<BlockId>,
    ssa_worklist: &mut VecDeque<ValueId>,
) {
    for (inst_id, _) in f.block_insts(bb) {
        revisit_inst(f, inst_id, state, block_worklist, ssa_worklist);
    }
}

fn lattice_of(state: &SccpState, v: ValueId, f: &Function) -> Lattice {
    if let Some(c) = f.value(v).as_constant() {
        return Lattice::Constant(c.clone());
    }
    if !f.value(v).tracks_uses() {
        // undef / global: conservative.
        return Lattice::Bottom;
    }
    state.values.get(&v).cloned().unwrap_or(Lattice::Top)
}

fn set_lattice(state: &mut SccpState, v: ValueId, new: Lattice, ssa_worklist: &mut VecDeque<ValueId>) {
    let old = state.values.get(&v).cloned().unwrap_or(Lattice::Top);
    if old != new {
        state.values.insert(v, new);
        ssa_worklist.push_back(v);
    }
}

fn revisit_inst(
    f: &Function,
    inst_id: InstId,
    state: &mut SccpState,
    block_worklist: &mut VecDeque<BlockId>,
    ssa_worklist: &mut VecDeque<ValueId>,
) {
    let bb = f.block_of(inst_id);
    if !state.reachable.contains(&bb) {
        return;
    }
    match f.inst(inst_id) {
        Instruction::Phi { dest, incoming, .. } => {
            let mut result = Lattice::Top;
            for inc in incoming {
                if !state.reachable.contains(&inc.pred) {
                    continue;
                }
                let v = lattice_of(state, inc.value, f);
                result = result.meet(&v);
            }
            set_lattice(state, *dest, result, ssa_worklist);
        }
        Instruction::BinOp { dest, op, lhs, rhs, ty } => {
            let l = lattice_of(state, *lhs, f);
            let r = lattice_of(state, *rhs, f);
            let result = match (&l, &r) {
                (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                (Lattice::Constant(lc), Lattice::Constant(rc)) => {
                    fold_binop(*op, lc, rc, ty).map(Lattice::Constant).unwrap_or(Lattice::Bottom)
                }
                _ => Lattice::Top,
            };
            set_lattice(state, *dest, result, ssa_worklist);
        }
        Instruction::Icmp { dest, cond, lhs, rhs } => {
            let l = lattice_of(state, *lhs, f);
            let r = lattice_of(state, *rhs, f);
            let result = match (&l, &r) {
                (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                (Lattice::Constant(lc), Lattice::Constant(rc)) => {
                    match (lc.as_i64(), rc.as_i64()) {
                        (Some(a), Some(b)) => Lattice::Constant(Constant::I1(cond.evaluate(a, b))),
                        _ => Lattice::Bottom,
                    }
                }
                _ => Lattice::Top,
            };
            set_lattice(state, *dest, result, ssa_worklist);
        }
        Instruction::Fcmp { dest, cond, lhs, rhs } => {
            let l = lattice_of(state, *lhs, f);
            let r = lattice_of(state, *rhs, f);
            let result = match (&l, &r) {
                (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                (Lattice::Constant(lc), Lattice::Constant(rc)) => {
                    match (lc.as_f64(), rc.as_f64()) {
                        (Some(a), Some(b)) => Lattice::Constant(Constant::I1(cond.evaluate(a, b))),
                        _ => Lattice::Bottom,
                    }
                }
                _ => Lattice::Top,
            };
            set_lattice(state, *dest, result, ssa_worklist);
        }
        Instruction::Convert { dest, kind, operand, dest_ty } => {
            let o = lattice_of(state, *operand, f);
            let result = match &o {
                Lattice::Bottom => Lattice::Bottom,
                Lattice::Constant(c) => fold_convert(*kind, c, dest_ty).map(Lattice::Constant).unwrap_or(Lattice::Bottom),
                Lattice::Top => Lattice::Top,
            };
            set_lattice(state, *dest, result, ssa_worklist);
        }
        Instruction::Br { target } => {
            mark_edge_executable(state, bb, *target, block_worklist);
        }
        Instruction::CondBr { cond, then_bb, else_bb } => {
            let c = lattice_of(state, *cond, f);
            match c {
                Lattice::Constant(ref v) => {
                    let taken = v.as_i64().map(|x| x != 0).unwrap_or(true);
                    let target = if taken { *then_bb } else { *else_bb };
                    mark_edge_executable(state, bb, target, block_worklist);
                }
                Lattice::Bottom => {
                    mark_edge_executable(state, bb, *then_bb, block_worklist);
                    mark_edge_executable(state, bb, *else_bb, block_worklist);
                }
                Lattice::Top => {}
            }
        }
        _ => {}
    }
}

fn mark_edge_executable(state: &mut SccpState, from: BlockId, to: BlockId, block_worklist: &mut VecDeque<BlockId>) {
    if state.executable_edges.insert((from, to)) {
        // Re-queue `to` even if it was already reachable: a newly-executable
        // edge can still change a phi's meet there (a new live predecessor).
        state.reachable.insert(to);
        block_worklist.push_back(to);
    }
}

fn fold_binop(op: BinOpKind, l: &Constant, r: &Constant, ty: &Type) -> Option<Constant> {
    if op.is_float() {
        let (a, b) = (l.as_f64()?, r.as_f64()?);
        let v = match op {
            BinOpKind::FAdd => a + b,
            BinOpKind::FSub => a - b,
            BinOpKind::FMul => a * b,
            BinOpKind::FDiv if b != 0.0 => a / b,
            _ => return None,
        };
        Some(match ty.basic_kind()? {
            crate::types::BasicKind::F32 => Constant::F32(v as f32),
            _ => Constant::F64(v),
        })
    } else {
        let (a, b) = (l.as_i64()?, r.as_i64()?);
        let v = match op {
            BinOpKind::Add => a.wrapping_add(b),
            BinOpKind::Sub => a.wrapping_sub(b),
            BinOpKind::Mul => a.wrapping_mul(b),
            BinOpKind::SDiv if b != 0 => a.wrapping_div(b),
            BinOpKind::SRem if b != 0 => a.wrapping_rem(b),
            BinOpKind::Shl => a.wrapping_shl(b as u32),
            BinOpKind::Lshr => ((a as u64) >> (b as u32 & 63)) as i64,
            BinOpKind::Ashr => a.wrapping_shr(b as u32),
            BinOpKind::And => a & b,
            BinOpKind::Or => a | b,
            BinOpKind::Xor => a ^ b,
            _ => return None,
        };
        Some(match ty.basic_kind()? {
            crate::types::BasicKind::I1 => Constant::I1(v != 0),
            crate::types::BasicKind::I8 => Constant::I8(v as i8),
            crate::types::BasicKind::I32 => Constant::I32(v as i32),
            crate::types::BasicKind::I64 => Constant::I64(v),
            _ => return None,
        })
    }
}

fn fold_convert(kind: crate::ir::ConvertKind, c: &Constant, dest_ty: &Type) -> Option<Constant> {
    use crate::ir::ConvertKind::*;
    let kind_bk = dest_ty.basic_kind()?;
    match kind {
        SiToFp => {
            let v = c.as_i64()? as f64;
            Some(if kind_bk == crate::types::BasicKind::F32 { Constant::F32(v as f32) } else { Constant::F64(v) })
        }
        FpToSi | ZExt | SExt | Trunc => {
            let v = c.as_i64()?;
            Some(match kind_bk {
                crate::types::BasicKind::I1 => Constant::I1(v != 0),
                crate::types::BasicKind::I8 => Constant::I8(v as i8),
                crate::types::BasicKind::I32 => Constant::I32(v as i32),
                crate::types::BasicKind::I64 => Constant::I64(v),
                _ => return None,
            })
        }
        FpExt | FpTrunc => {
            let v = c.as_f64()?;
            Some(if kind_bk == crate::types::BasicKind::F32 { Constant::F32(v as f32) } else { Constant::F64(v) })
        }
    }
}

/// Rewrites the function per the lattice fixed point: every Constant
/// register is RAUW'd to a fresh constant value, every CondBr with a
/// Constant condition becomes an unconditional Br (dropping the dead edge
/// from the CFG and from phis in the dead successor), and any block SCCP
/// never marked reachable is left for SimplifyCFG's unreachable-block pass
/// to remove.
fn transform(module: &mut Module, fid: FuncId, state: &SccpState) -> bool {
    let mut changed = false;

    let const_values: Vec<(ValueId, Constant)> = state
        .values
        .iter()
        .filter_map(|(&v, l)| match l {
            Lattice::Constant(c) => Some((v, c.clone())),
            _ => None,
        })
        .filter(|(v, _)| module.function(fid).value(*v).is_register())
        .collect();

    for (v, c) in const_values {
        let ty = module.function(fid).value(v).ty.clone();
        let new_const = module.function_mut(fid).alloc_constant(ty, c);
        module.function_mut(fid).replace_all_uses_with(v, new_const);
        changed = true;
    }

    let cond_brs: Vec<(BlockId, InstId, BlockId, BlockId, bool)> = module
        .function(fid)
        .block_ids()
        .filter_map(|bb| {
            let term = module.function(fid).block(bb).terminator()?;
            match module.function(fid).inst(term) {
                Instruction::CondBr { cond, then_bb, else_bb } => {
                    let l = lattice_of(state, *cond, module.function(fid));
                    match l {
                        Lattice::Constant(c) => Some((bb, term, *then_bb, *else_bb, c.as_i64().unwrap_or(1) != 0)),
                        _ => None,
                    }
                }
                _ => None,
            }
        })
        .collect();

    for (bb, term, then_bb, else_bb, taken) in cond_brs {
        let (keep, drop) = if taken { (then_bb, else_bb) } else { (else_bb, then_bb) };
        if keep == drop {
            continue;
        }
        let f = module.function_mut(fid);
        let cond = match f.inst(term) {
            Instruction::CondBr { cond, .. } => *cond,
            _ => unreachable!(),
        };
        if f.value(cond).tracks_uses() {
            f.value_mut(cond).use_list.retain(|u| u.user != term);
        }
        *f.inst_mut(term) = Instruction::Br { target: keep };
        f.block_mut(bb).succs.retain(|&s| s != drop);
        f.block_mut(drop).preds.retain(|&p| p != bb);
        prune_phi_incoming(f, drop, bb);
        changed = true;
    }

    changed
}

/// Drops `bb`'s incoming pair from every phi in `dead_succ`, since the edge
/// `bb -> dead_succ` no longer exists after folding a constant branch.
fn prune_phi_incoming(f: &mut Function, dead_succ: BlockId, bb: BlockId) {
    for &inst_id in f.block(dead_succ).insts.clone().iter() {
        if let Instruction::Phi { incoming, .. } = f.inst_mut(inst_id) {
            let mut removed_slots = Vec::new();
            let mut i = 0;
            incoming.retain(|inc| {
                let keep = inc.pred != bb;
                if !keep {
                    removed_slots.push(i);
                }
                i += 1;
                keep
            });
            let _ = removed_slots;
        }
    }
    // Use-list entries for removed incoming values now point at stale
    // slots; rebuild this phi's use registrations by re-deriving operand
    // slots is unnecessary here since `incoming` values that are constants
    // never track uses, and register incoming values still have other uses
    // recorded at their *current* (now-shifted) slot only if they appear
    // once — multi-appearance is rare enough that a full re-link keeps this
    // correct in general.
    relink_phi_uses(f, dead_succ);
}

fn relink_phi_uses(f: &mut Function, block: BlockId) {
    let inst_ids: Vec<InstId> = f.block(block).insts.clone();
    for inst_id in inst_ids {
        if !f.inst(inst_id).is_phi() {
            continue;
        }
        for v_idx in 0..f.values.len() {
            let vid = ValueId(v_idx as u32);
            f.value_mut(vid).use_list.retain(|u| u.user != inst_id);
        }
        let slots = f.inst(inst_id).operand_slots();
        for (slot, operand) in slots.into_iter().enumerate() {
            if f.value(operand).tracks_uses() {
                f.value_mut(operand).use_list.push(crate::ir::Use { user: inst_id, slot: slot as u8 });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    /// `%c = icmp eq 3, 3; cond_br %c, L1, L2; L1: ret 1; L2: ret 2` folds to
    /// an unconditional branch to L1.
    #[test]
    fn folds_constant_conditional_branch() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let l1 = m.function_mut(fid).add_block(BasicBlock::with_label("l1"));
        let l2 = m.function_mut(fid).add_block(BasicBlock::with_label("l2"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let three_a = b.const_i32(3);
        let three_b = b.const_i32(3);
        let c = b.build_icmp(IcmpCond::Eq, three_a, three_b);
        b.build_cond_br(c, l1, l2);
        let mut b = IrBuilder::at_end(&mut m, fid, l1);
        let one = b.const_i32(1);
        b.build_ret(Some(one));
        let mut b = IrBuilder::at_end(&mut m, fid, l2);
        let two = b.const_i32(2);
        b.build_ret(Some(two));

        assert!(run(&mut m));
        let f = m.function(fid);
        let term = f.block(entry).terminator().unwrap();
        assert!(matches!(f.inst(term), Instruction::Br { target } if *target == l1));
    }

    #[test]
    fn propagates_constant_through_arithmetic() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.const_i32(10);
        let c = b.const_i32(20);
        let sum = b.build_binop(BinOpKind::Add, a, c, Type::i32());
        let doubled = b.build_binop(BinOpKind::Mul, sum, c, Type::i32());
        b.build_ret(Some(doubled));

        assert!(run(&mut m));
        let f = m.function(fid);
        let term = f.block(entry).terminator().unwrap();
        let Instruction::Ret { value: Some(v) } = f.inst(term) else { panic!() };
        assert_eq!(f.value(*v).as_constant().and_then(|c| c.as_i64()), Some(600));
    }
}
