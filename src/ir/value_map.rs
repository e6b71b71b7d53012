//! [`ValueMap`]: the old-value/old-block → new-value/new-block table every
//! cloning transform (Inliner splicing a callee's body into a caller,
//! LoopUnroll duplicating a loop body) needs while copying instructions
//! across a function boundary or across loop iterations.
//!
//! Not part of spec.md's distilled interface, but both transforms it names
//! require *something* like this structurally — see SPEC_FULL.md §6.

use crate::ir::block::BasicBlock;
use crate::ir::function::Function;
use crate::ir::ids::{BlockId, InstId, ValueId};
use crate::ir::instruction::{Instruction, PhiIncoming};
use crate::ir::value::ValueData;
use rustc_hash::FxHashMap;

/// Maps old ids to their freshly-allocated counterparts in the destination
/// function. Values with no entry (most commonly constants, globals, and
/// undefs, which are never cloned — they're shared as-is) pass through
/// [`ValueMap::value`] unchanged.
#[derive(Debug, Default)]
pub struct ValueMap {
    values: FxHashMap<ValueId, ValueId>,
    blocks: FxHashMap<BlockId, BlockId>,
}

impl ValueMap {
    pub fn new() -> Self {
        ValueMap::default()
    }

    pub fn insert_value(&mut self, old: ValueId, new: ValueId) {
        self.values.insert(old, new);
    }

    pub fn insert_block(&mut self, old: BlockId, new: BlockId) {
        self.blocks.insert(old, new);
    }

    /// The remapped id for `old`, or `old` itself if this map never saw it
    /// (constants/globals/undefs, and any value defined outside the cloned
    /// region that the clone still legitimately references).
    pub fn value(&self, old: ValueId) -> ValueId {
        self.values.get(&old).copied().unwrap_or(old)
    }

    pub fn block(&self, old: BlockId) -> BlockId {
        self.blocks.get(&old).copied().unwrap_or(old)
    }

    /// Convenience for call sites that already hold a `ValueId` operand and
    /// want the remapped id in one expression.
    pub fn remap_operand(&self, old: ValueId) -> ValueId {
        self.value(old)
    }
}

/// Builds the instruction `inst` would become if every value/block operand
/// were passed through `vmap`, with its result (if any) renamed to
/// `new_dest`. `new_dest` must already be `Some` for every opcode that
/// defines a register — callers predeclare it via
/// [`Function::predeclare_clone_dest`] before calling this.
pub fn clone_instruction_with_remap(inst: &Instruction, new_dest: Option<ValueId>, vmap: &ValueMap) -> Instruction {
    let v = |id: ValueId| vmap.value(id);
    let b = |id: BlockId| vmap.block(id);
    let d = || new_dest.expect("clone_instruction_with_remap: missing predeclared dest");
    match inst {
        Instruction::Ret { value } => Instruction::Ret { value: value.map(v) },
        Instruction::Br { target } => Instruction::Br { target: b(*target) },
        Instruction::CondBr { cond, then_bb, else_bb } => {
            Instruction::CondBr { cond: v(*cond), then_bb: b(*then_bb), else_bb: b(*else_bb) }
        }
        Instruction::BinOp { op, lhs, rhs, ty, .. } => {
            Instruction::BinOp { dest: d(), op: *op, lhs: v(*lhs), rhs: v(*rhs), ty: ty.clone() }
        }
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
        Instruction::Phi { ty, incoming, .. } => Instruction::Phi {
            dest: d(),
            ty: ty.clone(),
            incoming: incoming.iter().map(|inc| PhiIncoming { value: v(inc.value), pred: b(inc.pred) }).collect(),
        },
        Instruction::Call { callee, args, ty, .. } => {
            Instruction::Call { dest: new_dest, callee: *callee, args: args.iter().map(|&a| v(a)).collect(), ty: ty.clone() }
        }
        Instruction::Convert { kind, operand, dest_ty, .. } => {
            Instruction::Convert { dest: d(), kind: *kind, operand: v(*operand), dest_ty: dest_ty.clone() }
        }
    }
}

impl Function {
    /// Phase 1 of a block-region clone: allocates an empty block in `dest`
    /// mirroring `self.block(old)` and records the id mapping. Call this for
    /// every block in the region *before* predeclaring any instruction dest
    /// or cloning any instruction body, so branch/phi targets always have a
    /// mapping by the time they're remapped.
    pub fn map_new_block(&self, old: BlockId, dest: &mut Function, vmap: &mut ValueMap) -> BlockId {
        let new_block = dest.add_block(BasicBlock::new());
        vmap.insert_block(old, new_block);
        new_block
    }

    /// Phase 2: allocates the register `old_dest` will become in `dest`,
    /// with a placeholder `def_inst` fixed up once the real instruction is
    /// pushed in phase 3 — this lets phase-3 clones reference forward (or
    /// back-edge) definitions anywhere in the region, not just ones already
    /// cloned.
    pub fn predeclare_clone_dest(&self, old_dest: ValueId, dest: &mut Function, vmap: &mut ValueMap) {
        let ty = self.value(old_dest).ty.clone();
        let new_id = dest.next_value_id();
        dest.values.push(ValueData::new_register(ty, InstId(u32::MAX)));
        vmap.insert_value(old_dest, new_id);
    }

    /// Phase 3: clones every instruction of `old` into `new_block`,
    /// remapping operands through `vmap` (already fully populated by phases
    /// 1 and 2 for the whole region).
    pub fn clone_block_into(&self, old: BlockId, dest: &mut Function, new_block: BlockId, vmap: &ValueMap) {
        for &inst_id in &self.block(old).insts {
            let inst = self.inst(inst_id);
            let new_dest = inst.dest().map(|d| vmap.value(d));
            let cloned = clone_instruction_with_remap(inst, new_dest, vmap);
            let new_inst_id = dest.push_inst(new_block, cloned);
            if let Some(nd) = new_dest {
                dest.value_mut(nd).def_inst = Some(new_inst_id);
            }
        }
    }
}
