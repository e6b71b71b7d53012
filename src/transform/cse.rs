//! CSE: dominator-tree-ordered common-subexpression elimination over a
//! scoped hash table, per spec.md §4.6. Only pure, side-effect-free
//! instructions are candidates; a later instruction equivalent to one that
//! dominates it is replaced by the earlier one rather than recomputed.

use crate::analysis::dominators::DominatorTree;
use crate::ir::{BinOpKind, FcmpCond, FuncId, Function, IcmpCond, InstId, Instruction, Module, ValueId};
use crate::types::Type;
use rustc_hash::FxHashMap;

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= cse_function(module, fid);
    }
    tracing::debug!(changed, "cse finished");
    changed
}

/// A structural key identifying "the same computation" independent of
/// which instruction produced it: opcode family, condition code where
/// relevant, the operand ids (sorted for commutative ops so `x+y` and
/// `y+x` hash identically), and result type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueNumberKey {
    BinOp(BinOpKind, ValueId, ValueId, TypeKey),
    Icmp(IcmpCond, ValueId, ValueId),
    Fcmp(FcmpCond, ValueId, ValueId),
    Gep(Vec<ValueId>, TypeKey),
    Convert(u8, ValueId, TypeKey),
}

/// `Type` has no `Hash`-friendly newtype handy for a map key beyond its own
/// derived `Hash`/`Eq` — wrapping it makes the key's derivation above read
/// as "value-number on structure", matching CSE's contract, rather than
/// leaning on `Type`'s incidental derive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TypeKey(Type);

fn convert_tag(kind: crate::ir::ConvertKind) -> u8 {
    use crate::ir::ConvertKind::*;
    match kind {
        SiToFp => 0,
        FpToSi => 1,
        ZExt => 2,
        SExt => 3,
        FpExt => 4,
        Trunc => 5,
        FpTrunc => 6,
    }
}

fn value_number_key(inst: &Instruction) -> Option<ValueNumberKey> {
    match inst {
        Instruction::BinOp { op, lhs, rhs, ty, .. } => {
            let (a, b) = if op.is_commutative() && rhs < lhs { (*rhs, *lhs) } else { (*lhs, *rhs) };
            Some(ValueNumberKey::BinOp(*op, a, b, TypeKey(ty.clone())))
        }
        Instruction::Icmp { cond, lhs, rhs, .. } => Some(ValueNumberKey::Icmp(*cond, *lhs, *rhs)),
        Instruction::Fcmp { cond, lhs, rhs, .. } => Some(ValueNumberKey::Fcmp(*cond, *lhs, *rhs)),
        Instruction::Gep { base, indices, result_ty, .. } => {
            let mut ops = vec![*base];
            ops.extend(indices.iter().copied());
            Some(ValueNumberKey::Gep(ops, TypeKey(result_ty.clone())))
        }
        Instruction::Convert { kind, operand, dest_ty, .. } => {
            Some(ValueNumberKey::Convert(convert_tag(*kind), *operand, TypeKey(dest_ty.clone())))
        }
        _ => None,
    }
}

fn cse_function(module: &mut Module, fid: FuncId) -> bool {
    crate::analysis::compute_cfg(module.function_mut(fid));
    let dt = DominatorTree::compute(module.function(fid));
    let entry = module.function(fid).entry.unwrap();

    let mut table: FxHashMap<ValueNumberKey, ValueId> = FxHashMap::default();
    let mut to_erase: Vec<InstId> = Vec::new();
    let mut changed = false;

    cse_subtree(module, fid, &dt, entry, &mut table, &mut to_erase, &mut changed);

    for inst_id in to_erase {
        let bb = module.function(fid).block_of(inst_id);
        module.function_mut(fid).erase_inst(bb, inst_id);
    }
    changed
}

/// Descends the dominator tree depth-first, mutating a single shared
/// `table`; on return from a child subtree every insertion that child made
/// is undone, so a sibling subtree never sees a definition that doesn't
/// dominate it. This is spec.md §4.6's "stack of overwritten hash buckets",
/// realized as a literal save/restore list rather than a generic undo log.
fn cse_subtree(
    module: &mut Module,
    fid: FuncId,
    dt: &DominatorTree,
    bb: crate::ir::BlockId,
    table: &mut FxHashMap<ValueNumberKey, ValueId>,
    to_erase: &mut Vec<InstId>,
    changed: &mut bool,
) {
    let mut inserted_keys: Vec<(ValueNumberKey, Option<ValueId>)> = Vec::new();

    let inst_ids: Vec<InstId> = module.function(fid).block(bb).insts.clone();
    for inst_id in inst_ids {
        if to_erase.contains(&inst_id) {
            continue;
        }
        let f = module.function(fid);
        let inst = f.inst(inst_id);
        if !inst.is_speculatable() {
            continue;
        }
        let Some(key) = value_number_key(inst) else { continue };
        let Some(dest) = inst.dest() else { continue };

        if let Some(&existing) = table.get(&key) {
            module.function_mut(fid).replace_all_uses_with(dest, existing);
            to_erase.push(inst_id);
            *changed = true;
        } else {
            let previous = table.insert(key.clone(), dest);
            inserted_keys.push((key, previous));
        }
    }

    for &child in dt.children(bb) {
        cse_subtree(module, fid, dt, child, table, to_erase, changed);
    }

    for (key, previous) in inserted_keys.into_iter().rev() {
        match previous {
            Some(v) => {
                table.insert(key, v);
            }
            None => {
                table.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function as IrFunction, IrBuilder, Module};
    use crate::types::Type;

    /// Block A computes `%a = add %x, %y`; dominated block B recomputes
    /// `%b = add %x, %y; %r = mul %b, 2` — `%b` should be replaced by `%a`.
    #[test]
    fn eliminates_redundant_add_across_dominated_block() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let a_block = m.function_mut(fid).add_block(BasicBlock::with_label("a"));
        let b_block = m.function_mut(fid).add_block(BasicBlock::with_label("b"));
        m.function_mut(fid).entry = Some(a_block);

        let mut b = IrBuilder::at_end(&mut m, fid, a_block);
        let x = b.build_alloca(Type::i32(), 4);
        let lx = b.build_load(x, Type::i32());
        let y = b.build_alloca(Type::i32(), 4);
        let ly = b.build_load(y, Type::i32());
        let a_add = b.build_binop(BinOpKind::Add, lx, ly, Type::i32());
        b.build_br(b_block);

        let mut b = IrBuilder::at_end(&mut m, fid, b_block);
        let b_add = b.build_binop(BinOpKind::Add, lx, ly, Type::i32());
        let two = b.const_i32(2);
        let r = b.build_binop(BinOpKind::Mul, b_add, two, Type::i32());
        b.build_ret(Some(r));

        assert!(run(&mut m));
        let f = m.function(fid);
        let ret_inst = *f.block(b_block).insts.last().unwrap();
        let Instruction::Ret { value: Some(rv) } = f.inst(ret_inst) else { panic!() };
        let Instruction::BinOp { lhs, .. } = f.defining_inst(*rv).unwrap() else { panic!() };
        assert_eq!(*lhs, a_add);
    }

    #[test]
    fn commutative_operands_in_either_order_value_number_equal() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let x = b.build_alloca(Type::i32(), 4);
        let lx = b.build_load(x, Type::i32());
        let y = b.build_alloca(Type::i32(), 4);
        let ly = b.build_load(y, Type::i32());
        let first = b.build_binop(BinOpKind::Add, lx, ly, Type::i32());
        let second = b.build_binop(BinOpKind::Add, ly, lx, Type::i32());
        b.build_ret(Some(second));

        assert!(run(&mut m));
        let f = m.function(fid);
        let ret_inst = *f.block(entry).insts.last().unwrap();
        let Instruction::Ret { value: Some(rv) } = f.inst(ret_inst) else { panic!() };
        assert_eq!(*rv, first);
    }
}
