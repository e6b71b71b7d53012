//! InstCombine: a worklist-driven peephole visitor — one handler per
//! opcode family — doing constant folding, algebraic simplification,
//! canonicalization, and integer strength reduction, per spec.md §4.6.
//! Never introduces a side effect and never changes observable behavior.

use crate::ir::{BinOpKind, ConvertKind, FuncId, Function, InstId, Instruction, Module, ValueId};
use crate::ir::Constant;
use crate::types::{BasicKind, Type};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= run_function(module, fid);
    }
    tracing::debug!(changed, "inst_combine finished");
    changed
}

fn run_function(module: &mut Module, fid: FuncId) -> bool {
    let mut changed = false;
    let mut erased: FxHashSet<InstId> = FxHashSet::default();
    let mut worklist: VecDeque<InstId> = module.function(fid).inst_ids().collect();
    let mut queued: FxHashSet<InstId> = worklist.iter().copied().collect();

    // A hard cap keeps a buggy simplification rule (one that kept toggling
    // two canonical forms back and forth) from looping forever instead of
    // silently hanging a release build.
    let mut budget = worklist.len() * 8 + 64;

    while let Some(inst_id) = worklist.pop_front() {
        queued.remove(&inst_id);
        if erased.contains(&inst_id) || budget == 0 {
            continue;
        }
        budget -= 1;
        if !is_live(module.function(fid), inst_id) {
            continue;
        }
        if let Some(action) = visit(module.function(fid), inst_id) {
            changed = true;
            apply(module, fid, inst_id, action, &mut worklist, &mut queued, &mut erased);
        }
    }
    changed
}

fn is_live(f: &Function, inst: InstId) -> bool {
    f.block_ids().any(|b| f.block(b).insts.contains(&inst))
}

/// Either an operand that already exists, or a constant that still needs
/// allocating in the function's value table. `visit_*` only ever holds
/// `&Function`, so it can't allocate; `apply` resolves every `NewConst`
/// into a real `ValueId` once it has `&mut Module`.
enum Operand {
    Existing(ValueId),
    NewConst(Constant),
}

impl From<ValueId> for Operand {
    fn from(v: ValueId) -> Self {
        Operand::Existing(v)
    }
}

enum Action {
    ReplaceWith(Operand),
    Rewrite(RewriteOp),
}

enum RewriteOp {
    BinOp { op: BinOpKind, lhs: Operand, rhs: Operand, ty: Type },
}

fn resolve(module: &mut Module, fid: FuncId, operand_ty: &Type, op: Operand) -> ValueId {
    match op {
        Operand::Existing(v) => v,
        Operand::NewConst(c) => module.function_mut(fid).alloc_constant(operand_ty.clone(), c),
    }
}

fn apply(
    module: &mut Module,
    fid: FuncId,
    inst_id: InstId,
    action: Action,
    worklist: &mut VecDeque<InstId>,
    queued: &mut FxHashSet<InstId>,
    erased: &mut FxHashSet<InstId>,
) {
    match action {
        Action::Rewrite(RewriteOp::BinOp { op, lhs, rhs, ty }) => {
            let lhs = resolve(module, fid, &ty, lhs);
            let rhs = resolve(module, fid, &ty, rhs);
            let dest = module.function(fid).inst(inst_id).dest().expect("rewrite target must define a register");
            retarget_operands(module, fid, inst_id);
            *module.function_mut(fid).inst_mut(inst_id) = Instruction::BinOp { dest, op, lhs, rhs, ty };
            rewire_uses(module, fid, inst_id, &[lhs, rhs]);
            requeue_with_users(module.function(fid), inst_id, worklist, queued);
        }
        Action::ReplaceWith(operand) => {
            let dest = module.function(fid).inst(inst_id).dest().expect("ReplaceWith requires a result-bearing instruction");
            let ty = module.function(fid).value(dest).ty.clone();
            let new_value = resolve(module, fid, &ty, operand);
            let users: Vec<InstId> = module.function(fid).value(dest).use_list.iter().map(|u| u.user).collect();
            retarget_operands(module, fid, inst_id);
            module.function_mut(fid).replace_all_uses_with(dest, new_value);
            let bb = module.function(fid).block_of(inst_id);
            module.function_mut(fid).erase_inst(bb, inst_id);
            erased.insert(inst_id);
            for u in users {
                if !erased.contains(&u) && queued.insert(u) {
                    worklist.push_back(u);
                }
            }
        }
    }
}

/// Drops `inst_id`'s own uses of its current operands ahead of an in-place
/// rewrite, so the old operand's use-list doesn't accumulate a stale entry
/// once the instruction's payload is overwritten.
fn retarget_operands(module: &mut Module, fid: FuncId, inst_id: InstId) {
    let f = module.function_mut(fid);
    for (slot, operand) in f.inst(inst_id).operand_slots().into_iter().enumerate() {
        if f.value(operand).tracks_uses() {
            f.value_mut(operand).use_list.retain(|u| !(u.user == inst_id && u.slot as usize == slot));
        }
    }
}

fn rewire_uses(module: &mut Module, fid: FuncId, inst_id: InstId, operands: &[ValueId]) {
    let f = module.function_mut(fid);
    for (slot, &operand) in operands.iter().enumerate() {
        if f.value(operand).tracks_uses() {
            f.value_mut(operand).use_list.push(crate::ir::Use { user: inst_id, slot: slot as u8 });
        }
    }
}

fn requeue_with_users(f: &Function, inst_id: InstId, worklist: &mut VecDeque<InstId>, queued: &mut FxHashSet<InstId>) {
    if queued.insert(inst_id) {
        worklist.push_back(inst_id);
    }
    if let Some(dest) = f.inst(inst_id).dest() {
        for u in &f.value(dest).use_list {
            if queued.insert(u.user) {
                worklist.push_back(u.user);
            }
        }
    }
}

fn visit(f: &Function, inst_id: InstId) -> Option<Action> {
    match f.inst(inst_id) {
        Instruction::BinOp { dest, op, lhs, rhs, ty } => visit_binop(f, *dest, *op, *lhs, *rhs, ty),
        Instruction::Convert { kind, operand, dest_ty, .. } => visit_convert(f, *kind, *operand, dest_ty),
        Instruction::Phi { dest, incoming, .. } => visit_phi(f, *dest, incoming),
        _ => None,
    }
}

fn as_const(f: &Function, v: ValueId) -> Option<Constant> {
    f.value(v).as_constant().cloned()
}

fn make_int_const(ty: &Type, v: i64) -> Constant {
    match ty.basic_kind().expect("integer binop on non-basic type") {
        BasicKind::I1 => Constant::I1(v != 0),
        BasicKind::I8 => Constant::I8(v as i8),
        BasicKind::I32 => Constant::I32(v as i32),
        BasicKind::I64 => Constant::I64(v),
        _ => unreachable!("float kind reached make_int_const"),
    }
}

fn make_float_const(ty: &Type, v: f64) -> Constant {
    match ty.basic_kind().expect("float binop on non-basic type") {
        BasicKind::F32 => Constant::F32(v as f32),
        BasicKind::F64 => Constant::F64(v),
        _ => unreachable!("integer kind reached make_float_const"),
    }
}

fn fold_binop_const(op: BinOpKind, l: &Constant, r: &Constant, ty: &Type) -> Option<Constant> {
    if op.is_float() {
        let (a, b) = (l.as_f64()?, r.as_f64()?);
        let v = match op {
            BinOpKind::FAdd => a + b,
            BinOpKind::FSub => a - b,
            BinOpKind::FMul => a * b,
            BinOpKind::FDiv if b != 0.0 => a / b,
            _ => return None,
        };
        Some(make_float_const(ty, v))
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
        Some(make_int_const(ty, v))
    }
}

fn is_pow2(n: i64) -> Option<u32> {
    if n > 0 && (n & (n - 1)) == 0 {
        Some(n.trailing_zeros())
    } else {
        None
    }
}

fn visit_binop(f: &Function, dest: ValueId, op: BinOpKind, lhs: ValueId, rhs: ValueId, ty: &Type) -> Option<Action> {
    let _ = dest;
    let lc = as_const(f, lhs);
    let rc = as_const(f, rhs);

    if let (Some(l), Some(r)) = (&lc, &rc) {
        if let Some(folded) = fold_binop_const(op, l, r, ty) {
            return Some(Action::ReplaceWith(Operand::NewConst(folded)));
        }
    }

    if lhs == rhs {
        match op {
            BinOpKind::Sub | BinOpKind::Xor => return Some(Action::ReplaceWith(Operand::NewConst(make_int_const(ty, 0)))),
            _ => {}
        }
    }

    // x + 0, x - 0, x * 1, x / 1, fadd x,0.0, fmul x,1.0
    if let Some(r) = &rc {
        match op {
            BinOpKind::Add if r.is_zero() => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::Sub if r.is_zero() => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::Mul if matches!(r.as_i64(), Some(1)) => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::Mul if r.is_zero() => return Some(Action::ReplaceWith(rhs.into())),
            BinOpKind::SDiv if matches!(r.as_i64(), Some(1)) => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::FAdd if r.is_zero() => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::FMul if matches!(r.as_f64(), Some(v) if v == 1.0) => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::FMul if r.is_zero() => return Some(Action::ReplaceWith(rhs.into())),
            BinOpKind::FMul if matches!(r.as_f64(), Some(v) if v == 2.0) => {
                return Some(Action::Rewrite(RewriteOp::BinOp {
                    op: BinOpKind::FAdd,
                    lhs: lhs.into(),
                    rhs: lhs.into(),
                    ty: ty.clone(),
                }));
            }
            BinOpKind::Mul => {
                if let Some(shift) = r.as_i64().and_then(is_pow2) {
                    return Some(Action::Rewrite(RewriteOp::BinOp {
                        op: BinOpKind::Shl,
                        lhs: lhs.into(),
                        rhs: Operand::NewConst(make_int_const(ty, shift as i64)),
                        ty: ty.clone(),
                    }));
                }
            }
            BinOpKind::Sub => {
                // Canonicalize x - C into x + (-C); re-queued, Add's x+0 rule
                // or the commuted-constant rule then takes over.
                if let Some(c) = r.as_i64() {
                    return Some(Action::Rewrite(RewriteOp::BinOp {
                        op: BinOpKind::Add,
                        lhs: lhs.into(),
                        rhs: Operand::NewConst(make_int_const(ty, c.wrapping_neg())),
                        ty: ty.clone(),
                    }));
                }
            }
            _ => {}
        }
    }
    if let Some(l) = &lc {
        match op {
            BinOpKind::Add if l.is_zero() => return Some(Action::ReplaceWith(rhs.into())),
            BinOpKind::Mul if matches!(l.as_i64(), Some(1)) => return Some(Action::ReplaceWith(rhs.into())),
            BinOpKind::Mul if l.is_zero() => return Some(Action::ReplaceWith(lhs.into())),
            BinOpKind::FAdd if l.is_zero() => return Some(Action::ReplaceWith(rhs.into())),
            BinOpKind::FMul if matches!(l.as_f64(), Some(v) if v == 1.0) => return Some(Action::ReplaceWith(rhs.into())),
            _ => {}
        }
    }

    // (x - y) + y -> x, and commuted: y + (x - y) -> x.
    if op == BinOpKind::Add {
        if let Some(Instruction::BinOp { op: BinOpKind::Sub, lhs: x, rhs: y, .. }) = f.defining_inst(lhs) {
            if *y == rhs {
                return Some(Action::ReplaceWith((*x).into()));
            }
        }
        if let Some(Instruction::BinOp { op: BinOpKind::Sub, lhs: x, rhs: y, .. }) = f.defining_inst(rhs) {
            if *y == lhs {
                return Some(Action::ReplaceWith((*x).into()));
            }
        }
    }

    // x * -1 -> 0 - x
    if op == BinOpKind::Mul {
        if let Some(r) = &rc {
            if matches!(r.as_i64(), Some(-1)) {
                return Some(Action::Rewrite(RewriteOp::BinOp {
                    op: BinOpKind::Sub,
                    lhs: Operand::NewConst(make_int_const(ty, 0)),
                    rhs: lhs.into(),
                    ty: ty.clone(),
                }));
            }
        }
    }

    // fdiv x,x -> 1.0, restricted to a provably-nonzero constant operand so
    // this never silently changes behavior for x == 0.0 at runtime.
    if op == BinOpKind::FDiv && lhs == rhs {
        if let Some(l) = &lc {
            if l.as_f64().map_or(false, |v| v != 0.0) {
                return Some(Action::ReplaceWith(Operand::NewConst(make_float_const(ty, 1.0))));
            }
        }
    }

    // Canonicalize commutative ops: constant on the left moves to the right.
    if op.is_commutative() && lc.is_some() && rc.is_none() {
        return Some(Action::Rewrite(RewriteOp::BinOp { op, lhs: rhs.into(), rhs: lhs.into(), ty: ty.clone() }));
    }

    None
}

fn visit_convert(f: &Function, kind: ConvertKind, operand: ValueId, dest_ty: &Type) -> Option<Action> {
    let c = as_const(f, operand)?;
    let folded = match kind {
        ConvertKind::SiToFp => make_float_const(dest_ty, c.as_i64()? as f64),
        ConvertKind::FpToSi => make_int_const(dest_ty, c.as_f64()? as i64),
        ConvertKind::ZExt => make_int_const(dest_ty, c.as_i64()?),
        ConvertKind::SExt => make_int_const(dest_ty, c.as_i64()?),
        ConvertKind::Trunc => make_int_const(dest_ty, c.as_i64()?),
        ConvertKind::FpExt => make_float_const(dest_ty, c.as_f64()?),
        ConvertKind::FpTrunc => make_float_const(dest_ty, c.as_f64()?),
    };
    Some(Action::ReplaceWith(Operand::NewConst(folded)))
}

/// PHI simplification: all incoming values equal (ignoring the phi
/// referring to itself on a back edge) collapses to that value; a
/// single-predecessor block's phi collapses to its one incoming value.
fn visit_phi(f: &Function, dest: ValueId, incoming: &[crate::ir::PhiIncoming]) -> Option<Action> {
    let mut unique: Option<ValueId> = None;
    for inc in incoming {
        if inc.value == dest {
            continue;
        }
        match unique {
            None => unique = Some(inc.value),
            Some(u) if u == inc.value => {}
            Some(_) => return None,
        }
    }
    let _ = f;
    unique.map(|v| Action::ReplaceWith(v.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    fn single_block_fn() -> (Module, crate::ir::FuncId, crate::ir::BlockId) {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);
        (m, fid, entry)
    }

    #[test]
    fn folds_constant_addition() {
        let (mut m, fid, entry) = single_block_fn();
        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let a = b.const_i32(2);
        let c = b.const_i32(3);
        let sum = b.build_binop(BinOpKind::Add, a, c, Type::i32());
        b.build_ret(Some(sum));

        assert!(run(&mut m));
        let f = m.function(fid);
        let Instruction::Ret { value: Some(v) } = f.inst(*f.block(entry).insts.last().unwrap()) else { panic!() };
        assert_eq!(f.value(*v).as_constant().and_then(|c| c.as_i64()), Some(5));
    }

    #[test]
    fn x_plus_zero_simplifies_to_x() {
        let (mut m, fid, entry) = single_block_fn();
        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let x = b.build_alloca(Type::i32(), 4);
        let loaded = b.build_load(x, Type::i32());
        let zero = b.const_i32(0);
        let sum = b.build_binop(BinOpKind::Add, loaded, zero, Type::i32());
        b.build_ret(Some(sum));

        assert!(run(&mut m));
        let f = m.function(fid);
        let Instruction::Ret { value: Some(v) } = f.inst(*f.block(entry).insts.last().unwrap()) else { panic!() };
        assert_eq!(*v, loaded);
    }

    #[test]
    fn sub_then_add_same_operand_cancels() {
        // (x - y) + y -> x
        let (mut m, fid, entry) = single_block_fn();
        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let x = b.build_alloca(Type::i32(), 4);
        let lx = b.build_load(x, Type::i32());
        let y = b.build_alloca(Type::i32(), 4);
        let ly = b.build_load(y, Type::i32());
        let sub = b.build_binop(BinOpKind::Sub, lx, ly, Type::i32());
        let add = b.build_binop(BinOpKind::Add, sub, ly, Type::i32());
        b.build_ret(Some(add));

        assert!(run(&mut m));
        let f = m.function(fid);
        let Instruction::Ret { value: Some(v) } = f.inst(*f.block(entry).insts.last().unwrap()) else { panic!() };
        assert_eq!(*v, lx);
    }

    #[test]
    fn multiply_by_power_of_two_becomes_shift() {
        let (mut m, fid, entry) = single_block_fn();
        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let x = b.build_alloca(Type::i32(), 4);
        let lx = b.build_load(x, Type::i32());
        let eight = b.const_i32(8);
        let prod = b.build_binop(BinOpKind::Mul, lx, eight, Type::i32());
        b.build_ret(Some(prod));

        assert!(run(&mut m));
        let f = m.function(fid);
        let ret_inst = *f.block(entry).insts.last().unwrap();
        let Instruction::Ret { value: Some(v) } = f.inst(ret_inst) else { panic!() };
        match f.defining_inst(*v) {
            Some(Instruction::BinOp { op: BinOpKind::Shl, rhs, .. }) => {
                assert_eq!(f.value(*rhs).as_constant().and_then(|c| c.as_i64()), Some(3));
            }
            other => panic!("expected a shl, got {other:?}"),
        }
    }

    #[test]
    fn phi_with_identical_incoming_values_collapses() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        let then_bb = m.function_mut(fid).add_block(BasicBlock::with_label("then"));
        let join = m.function_mut(fid).add_block(BasicBlock::with_label("join"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let x = b.build_alloca(Type::i32(), 4);
        let lx = b.build_load(x, Type::i32());
        let c = b.const_bool(true);
        b.build_cond_br(c, then_bb, join);
        let mut b = IrBuilder::at_end(&mut m, fid, then_bb);
        b.build_br(join);
        let mut b = IrBuilder::at_end(&mut m, fid, join);
        let phi = b.build_phi(
            Type::i32(),
            vec![
                crate::ir::PhiIncoming { value: lx, pred: entry },
                crate::ir::PhiIncoming { value: lx, pred: then_bb },
            ],
        );
        b.build_ret(Some(phi));

        assert!(run(&mut m));
        let f = m.function(fid);
        assert!(!f.block(join).insts.iter().any(|&i| f.inst(i).is_phi()));
    }
}
