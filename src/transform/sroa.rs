//! SROA (Scalar Replacement of Aggregates): splits an entry-block array
//! alloca into one alloca per element when every use is a `gep` with a
//! constant first-non-zero index, per spec.md §4.5. Its usual partner pass
//! is [`crate::transform::mem2reg`], run afterward on the scalar allocas
//! this pass produces.

use crate::ir::{BasicBlock, BlockId, FuncId, Function, InstId, Instruction, IrBuilder, Module, ValueId};
use crate::types::{Dim, Type};

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= sroa_function(module, fid);
    }
    tracing::debug!(changed, "sroa finished");
    changed
}

fn sroa_function(module: &mut Module, fid: FuncId) -> bool {
    let mut changed = false;
    let mut worklist: Vec<(InstId, ValueId, Type)> = entry_array_allocas(module.function(fid));

    while let Some((alloca_inst, alloca_dest, ty)) = worklist.pop() {
        let Type::Array { elem, dims } = &ty else { continue };
        if !every_use_is_const_indexed_gep(module.function(fid), alloca_dest) {
            continue;
        }
        let new_allocas = decompose_one_level(module, fid, alloca_inst, alloca_dest, elem, dims);
        changed = true;
        for (inst, dest, elem_ty) in new_allocas {
            if elem_ty.is_array() {
                worklist.push((inst, dest, elem_ty));
            }
        }
    }

    changed
}

fn entry_array_allocas(f: &Function) -> Vec<(InstId, ValueId, Type)> {
    let Some(entry) = f.entry else { return Vec::new() };
    f.block_insts(entry)
        .filter_map(|(id, inst)| match inst {
            Instruction::Alloca { dest, ty, .. } if ty.is_array() => Some((id, *dest, ty.clone())),
            _ => None,
        })
        .collect()
}

/// True when every use of `alloca_dest` is a `gep` whose second index (the
/// first array-dimension step, after the mandatory leading pointer-step
/// index) is a compile-time constant — the shape SROA knows how to peel one
/// level off of.
fn every_use_is_const_indexed_gep(f: &Function, alloca_dest: ValueId) -> bool {
    f.value(alloca_dest).use_list.iter().all(|u| match f.inst(u.user) {
        Instruction::Gep { base, indices, .. } => {
            *base == alloca_dest && indices.len() >= 2 && const_index(f, indices[1]).is_some()
        }
        _ => false,
    })
}

fn const_index(f: &Function, v: ValueId) -> Option<i64> {
    f.value(v).as_constant().and_then(|c| c.as_i64())
}

/// Peels the first dimension off `ty = Array{elem, dims}`: allocates one
/// fresh alloca per element of `dims[0]`, rewrites every indexing `gep` to
/// either the element alloca directly (when the `gep` ended at this level)
/// or a new `gep` into it with the remaining indices, and erases the
/// original alloca and its now-dead `gep`s. Returns the new allocas so the
/// caller can recurse into any that are themselves still arrays.
fn decompose_one_level(
    module: &mut Module,
    fid: FuncId,
    alloca_inst: InstId,
    alloca_dest: ValueId,
    elem: &Type,
    dims: &[Dim],
) -> Vec<(InstId, ValueId, Type)> {
    let count = match dims[0] {
        Dim::Static(n) => n as usize,
        Dim::Dynamic => unreachable!("a local array alloca never has a dynamic leading dimension"),
    };
    let elem_ty = if dims.len() == 1 { elem.clone() } else { Type::array(elem.clone(), dims[1..].to_vec()) };

    let entry = module.function(fid).entry.unwrap();
    let mut new_allocas = Vec::with_capacity(count);
    for _ in 0..count {
        let mut b = IrBuilder::before(module, fid, entry, alloca_inst);
        let dest = b.build_alloca(elem_ty.clone(), 4);
        let inst = module.function(fid).value(dest).def_inst.unwrap();
        new_allocas.push((inst, dest, elem_ty.clone()));
    }

    let uses: Vec<InstId> = module.function(fid).value(alloca_dest).use_list.iter().map(|u| u.user).collect();
    for gep_inst in uses {
        rewrite_gep(module, fid, gep_inst, &new_allocas);
    }

    let bb = find_block_of(module.function(fid), alloca_inst);
    module.function_mut(fid).erase_inst(bb, alloca_inst);

    new_allocas
}

fn rewrite_gep(module: &mut Module, fid: FuncId, gep_inst: InstId, new_allocas: &[(InstId, ValueId, Type)]) {
    let (gep_dest, indices, result_ty) = match module.function(fid).inst(gep_inst) {
        Instruction::Gep { dest, indices, result_ty, .. } => (*dest, indices.clone(), result_ty.clone()),
        other => unreachable!("SROA candidate use was not a gep: {other:?}"),
    };
    let idx = const_index(module.function(fid), indices[1]).unwrap() as usize;
    let (_, element_alloca, _) = new_allocas[idx];
    let bb = find_block_of(module.function(fid), gep_inst);

    if indices.len() == 2 {
        module.function_mut(fid).replace_all_uses_with(gep_dest, element_alloca);
    } else {
        let mut b = IrBuilder::before(module, fid, bb, gep_inst);
        let zero = b.const_i32(0);
        let mut new_indices = vec![zero];
        new_indices.extend(indices[2..].iter().copied());
        let new_dest = b.build_gep(element_alloca, new_indices, result_ty.pointee().clone());
        module.function_mut(fid).replace_all_uses_with(gep_dest, new_dest);
    }

    module.function_mut(fid).erase_inst(bb, gep_inst);
}

fn find_block_of(f: &Function, inst: InstId) -> BlockId {
    f.block_ids().find(|&b| f.block(b).insts.contains(&inst)).expect("instruction must live in some block")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpKind, Function as IrFunction, Module};
    use crate::types::Dim;

    /// `int a[4]; a[2] = 7; return a[2];` — every use is a const-indexed
    /// gep, so SROA should split `a` into four scalar allocas.
    #[test]
    fn splits_array_alloca_with_constant_indices() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let arr = b.build_alloca(Type::array(Type::i32(), vec![Dim::Static(4)]), 4);
        let zero = b.const_i32(0);
        let two = b.const_i32(2);
        let seven = b.const_i32(7);
        let slot = b.build_gep(arr, vec![zero, two], Type::i32());
        b.build_store(seven, slot);
        let slot2 = b.build_gep(arr, vec![zero, two], Type::i32());
        let loaded = b.build_load(slot2, Type::i32());
        b.build_ret(Some(loaded));

        let changed = run(&mut m);
        assert!(changed);

        let f = m.function(fid);
        assert!(
            !f.block(entry).insts.iter().any(|&i| matches!(f.inst(i), Instruction::Alloca { ty, .. } if ty.is_array())),
            "the array alloca should have been decomposed"
        );
        let scalar_allocas = f.block(entry).insts.iter().filter(|&&i| matches!(f.inst(i), Instruction::Alloca { .. })).count();
        assert_eq!(scalar_allocas, 4);
    }

    #[test]
    fn leaves_alloca_alone_when_a_use_has_non_constant_index() {
        let mut m = Module::new("t");
        let fid = m.add_function(IrFunction::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
        m.function_mut(fid).entry = Some(entry);

        let mut b = IrBuilder::at_end(&mut m, fid, entry);
        let arr = b.build_alloca(Type::array(Type::i32(), vec![Dim::Static(4)]), 4);
        let zero = b.const_i32(0);
        let one = b.const_i32(1);
        let idx_dyn = b.build_binop(BinOpKind::Add, one, one, Type::i32());
        let slot = b.build_gep(arr, vec![zero, idx_dyn], Type::i32());
        let loaded = b.build_load(slot, Type::i32());
        b.build_ret(Some(loaded));

        let changed = run(&mut m);
        assert!(!changed);
        let f = m.function(fid);
        assert!(f.block(entry).insts.iter().any(|&i| matches!(f.inst(i), Instruction::Alloca { ty, .. } if ty.is_array())));
    }
}
