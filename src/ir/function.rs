//! [`Function`]: a signature plus (for a definition) its basic blocks,
//! instructions, and locally-scoped values — everything a per-function
//! analysis or transform pass needs, without reaching back into the
//! [`crate::ir::module::Module`] that owns it except for cross-function
//! lookups (calls, globals).

use crate::ir::block::BasicBlock;
use crate::ir::ids::{BlockId, FuncId, InstId, ValueId};
use crate::ir::instruction::Instruction;
use crate::ir::value::{Constant, Use, ValueData};
use crate::types::Type;

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Box<str>,
    pub ret_ty: Type,
    pub param_types: Vec<Type>,
    pub variadic: bool,
    /// `None` for an external declaration (no body available to optimize).
    pub entry: Option<BlockId>,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Instruction>,
    pub values: Vec<ValueData>,
    /// One `Argument` value per parameter, in declaration order.
    pub args: Vec<ValueId>,
}

impl Function {
    pub fn declaration(name: impl Into<Box<str>>, ret_ty: Type, param_types: Vec<Type>, variadic: bool) -> Self {
        Function {
            name: name.into(),
            ret_ty,
            param_types,
            variadic,
            entry: None,
            blocks: Vec::new(),
            insts: Vec::new(),
            values: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.entry.is_none()
    }

    pub fn sig(&self) -> Type {
        Type::Function(Box::new(crate::types::FunctionSig {
            ret: Box::new(self.ret_ty.clone()),
            params: self.param_types.clone(),
            variadic: self.variadic,
        }))
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    /// The instruction that defines `id`, if any — `None` for constants,
    /// globals, arguments, and `undef`. A thin convenience over
    /// `value(id).def_inst` used by every pass that pattern-matches on a
    /// value's producer (InstCombine's `(x - y) + y` rule, CSE's operand
    /// value-numbering).
    pub fn defining_inst(&self, id: ValueId) -> Option<&Instruction> {
        self.value(id).def_inst.map(|i| self.inst(i))
    }

    /// The block containing `inst`, found by linear scan. Used by passes
    /// that don't already have the block id in hand (InstCombine, ADCE);
    /// `O(blocks)` per call, acceptable since these are diagnostic/rewrite
    /// paths, not the dataflow hot loop.
    pub fn block_of(&self, inst: InstId) -> BlockId {
        self.block_ids().find(|&b| self.block(b).insts.contains(&inst)).expect("instruction must live in some block")
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        &mut self.values[id.index()]
    }

    /// Blocks in id order. Block ids are assigned at creation time and are
    /// stable under every transform in this crate (blocks are removed by
    /// clearing their contents and pruning dead edges, never by shifting
    /// later ids down — see `SimplifyCFG::remove_unreachable_blocks`).
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(|i| BlockId(i as u32))
    }

    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> {
        (0..self.insts.len()).map(|i| InstId(i as u32))
    }

    /// All instructions in a block, already resolved to `&Instruction`, in
    /// program order. A thin convenience over `block(id).insts` + `inst`.
    pub fn block_insts(&self, id: BlockId) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.block(id).insts.iter().map(move |&i| (i, self.inst(i)))
    }

    pub fn add_block(&mut self, block: BasicBlock) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn alloc_constant(&mut self, ty: Type, c: Constant) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData::new_constant(ty, c));
        id
    }

    pub fn alloc_undef(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData::new_undef(ty));
        id
    }

    pub fn alloc_global_ref(&mut self, ty: Type, global: crate::ir::ids::GlobalId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData::new_global(ty, global));
        id
    }

    pub fn alloc_argument(&mut self, ty: Type, index: u32) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData::new_argument(ty, index));
        id
    }

    /// Reserves the `ValueId` a not-yet-built instruction's result will
    /// receive. Builder call sites use this to thread `dest` into an
    /// `Instruction` payload before the instruction itself — and hence its
    /// `InstId` — exists, since `Vec::push` fixes the id as a side effect.
    pub fn next_value_id(&self) -> ValueId {
        ValueId(self.values.len() as u32)
    }

    pub fn next_inst_id(&self) -> InstId {
        InstId(self.insts.len() as u32)
    }

    /// Appends `inst` to `block`, registering a `Use` for every value
    /// operand it reads and defining its `dest` value's `def_inst` if it
    /// produces one. `dest`, if the instruction defines a register, must
    /// already exist via [`Function::next_value_id`] + a pushed
    /// `ValueData::new_register` — see `IrBuilder` for the call convention.
    pub fn push_inst(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let id = self.next_inst_id();
        for (slot, operand) in inst.operand_slots().into_iter().enumerate() {
            if self.value(operand).tracks_uses() {
                self.value_mut(operand).use_list.push(Use { user: id, slot: slot as u8 });
            }
        }
        self.insts.push(inst);
        self.block_mut(block).push(id);
        id
    }

    /// Redirects every recorded use of `old` to `new`, moving the use-list
    /// entries across (not copying — `old`'s list is empty afterward,
    /// matching RAUW's "old has no remaining uses" postcondition).
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.value_mut(old).use_list);
        for u in &uses {
            self.inst_mut(u.user).set_operand_slot(u.slot, new);
        }
        if self.value(new).tracks_uses() {
            self.value_mut(new).use_list.extend(uses);
        }
    }

    /// Removes `inst` from `block`'s instruction list and retracts its
    /// uses of its own operands. The slot in `self.insts` is left in
    /// place (ids never shift); `block_insts`/`block(id).insts` — not
    /// `inst_ids()` — are the authoritative "is this instruction live"
    /// view after erasure.
    pub fn erase_inst(&mut self, block: BlockId, inst: InstId) {
        debug_assert!(
            self.value_uses_of(inst).next().is_none(),
            "erasing an instruction whose result still has uses"
        );
        for (slot, operand) in self.inst(inst).operand_slots().into_iter().enumerate() {
            self.value_mut(operand).use_list.retain(|u| !(u.user == inst && u.slot as usize == slot));
        }
        self.block_mut(block).remove(inst);
    }

    fn value_uses_of(&self, inst: InstId) -> impl Iterator<Item = &Use> {
        self.inst(inst)
            .dest()
            .into_iter()
            .flat_map(move |dest| self.value(dest).use_list.iter())
    }

    /// Creates an empty `phi %dest : ty` with no incoming pairs yet and
    /// splices it at the head of `block`, ahead of any instruction already
    /// there (including other phis inserted this same pass — callers that
    /// need phis in a specific relative order insert in that order).
    /// Mem2Reg/SROA fill in incoming pairs afterward via
    /// [`Function::add_phi_incoming`] once the dominator-tree rename walk
    /// knows what reaches each predecessor.
    pub fn prepend_phi(&mut self, block: BlockId, ty: Type) -> (InstId, ValueId) {
        let dest = self.next_value_id();
        let id = self.next_inst_id();
        self.values.push(ValueData::new_register(ty.clone(), id));
        self.insts.push(Instruction::Phi { dest, ty, incoming: Vec::new() });
        self.blocks[block.index()].insts.insert(0, id);
        (id, dest)
    }

    /// Appends one `(value, pred)` incoming pair to an existing phi and
    /// registers the corresponding use, at the slot the new pair lands on.
    pub fn add_phi_incoming(&mut self, phi: InstId, value: ValueId, pred: BlockId) {
        let slot = match self.inst_mut(phi) {
            Instruction::Phi { incoming, .. } => {
                incoming.push(crate::ir::instruction::PhiIncoming { value, pred });
                incoming.len() - 1
            }
            other => panic!("add_phi_incoming called on non-phi {other:?}"),
        };
        if self.value(value).tracks_uses() {
            self.value_mut(value).use_list.push(Use { user: phi, slot: slot as u8 });
        }
    }
}

/// Identifies a function purely by id; kept distinct from `Function` itself
/// so that pass signatures that only need "which function" (e.g. a call
/// graph edge) don't have to borrow the function's full body.
pub type FunctionRef = FuncId;
