//! [`IrBuilder`]: a cursor-based instruction factory, the same insertion
//! model `ccc::ir::lowering` drove its own (now-superseded) `IrBuilder`
//! with — pick a block, append/insert instructions into it, read back the
//! `ValueId` of whatever you just built.

use crate::ir::block::BasicBlock;
use crate::ir::function::Function;
use crate::ir::ids::{BlockId, FuncId, GlobalId, InstId, ValueId};
use crate::ir::instruction::{BinOpKind, ConvertKind, FcmpCond, IcmpCond, Instruction, PhiIncoming};
use crate::ir::module::Module;
use crate::ir::value::{Constant, ValueData};
use crate::types::Type;

/// Where the next `build_*` call inserts. `append` is the common case;
/// `before` supports the "splice ahead of this instruction" pattern
/// Mem2Reg (new phis) and LICM (hoisted instructions) both need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    Append,
    Before(InstId),
}

pub struct IrBuilder<'m> {
    module: &'m mut Module,
    func: FuncId,
    block: BlockId,
    mode: InsertMode,
}

impl<'m> IrBuilder<'m> {
    pub fn at_end(module: &'m mut Module, func: FuncId, block: BlockId) -> Self {
        IrBuilder { module, func, block, mode: InsertMode::Append }
    }

    pub fn before(module: &'m mut Module, func: FuncId, block: BlockId, inst: InstId) -> Self {
        IrBuilder { module, func, block, mode: InsertMode::Before(inst) }
    }

    pub fn create_block(module: &mut Module, func: FuncId, label: impl Into<Box<str>>) -> BlockId {
        module.function_mut(func).add_block(BasicBlock::with_label(label))
    }

    fn func_mut(&mut self) -> &mut Function {
        self.module.function_mut(self.func)
    }

    fn emit(&mut self, inst: Instruction) -> InstId {
        match self.mode {
            InsertMode::Append => {
                let block = self.block;
                self.func_mut().push_inst(block, inst)
            }
            InsertMode::Before(before) => {
                let id = self.func_mut().next_inst_id();
                let f = self.func_mut();
                for (slot, operand) in inst.operand_slots().into_iter().enumerate() {
                    if f.value(operand).tracks_uses() {
                        f.value_mut(operand).use_list.push(crate::ir::value::Use { user: id, slot: slot as u8 });
                    }
                }
                f.insts.push(inst);
                let block = self.block;
                f.block_mut(block).insert_before(before, id);
                id
            }
        }
    }

    // --- constants / misc values -------------------------------------------------

    pub fn const_i32(&mut self, v: i32) -> ValueId {
        self.func_mut().alloc_constant(Type::i32(), Constant::I32(v))
    }

    pub fn const_i64(&mut self, v: i64) -> ValueId {
        self.func_mut().alloc_constant(Type::i64(), Constant::I64(v))
    }

    pub fn const_f32(&mut self, v: f32) -> ValueId {
        self.func_mut().alloc_constant(Type::f32(), Constant::F32(v))
    }

    pub fn const_f64(&mut self, v: f64) -> ValueId {
        self.func_mut().alloc_constant(Type::f64(), Constant::F64(v))
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.func_mut().alloc_constant(Type::i1(), Constant::I1(v))
    }

    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.func_mut().alloc_undef(ty)
    }

    pub fn global_ref(&mut self, ty: Type, global: GlobalId) -> ValueId {
        self.func_mut().alloc_global_ref(ty, global)
    }

    // --- terminators -------------------------------------------------------------

    pub fn build_ret(&mut self, value: Option<ValueId>) -> InstId {
        self.emit(Instruction::Ret { value })
    }

    pub fn build_br(&mut self, target: BlockId) -> InstId {
        self.record_edge(target);
        self.emit(Instruction::Br { target })
    }

    pub fn build_cond_br(&mut self, cond: ValueId, then_bb: BlockId, else_bb: BlockId) -> InstId {
        self.record_edge(then_bb);
        self.record_edge(else_bb);
        self.emit(Instruction::CondBr { cond, then_bb, else_bb })
    }

    fn record_edge(&mut self, target: BlockId) {
        let from = self.block;
        let f = self.func_mut();
        f.block_mut(target).preds.push(from);
        f.block_mut(from).succs.push(target);
    }

    // --- arithmetic ----------------------------------------------------------------

    pub fn build_binop(&mut self, op: BinOpKind, lhs: ValueId, rhs: ValueId, ty: Type) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(ty.clone(), inst_id));
        self.emit(Instruction::BinOp { dest, op, lhs, rhs, ty });
        dest
    }

    pub fn build_icmp(&mut self, cond: IcmpCond, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(Type::i1(), inst_id));
        self.emit(Instruction::Icmp { dest, cond, lhs, rhs });
        dest
    }

    pub fn build_fcmp(&mut self, cond: FcmpCond, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(Type::i1(), inst_id));
        self.emit(Instruction::Fcmp { dest, cond, lhs, rhs });
        dest
    }

    pub fn build_convert(&mut self, kind: ConvertKind, operand: ValueId, dest_ty: Type) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(dest_ty.clone(), inst_id));
        self.emit(Instruction::Convert { dest, kind, operand, dest_ty });
        dest
    }

    // --- memory ----------------------------------------------------------------

    pub fn build_alloca(&mut self, ty: Type, align: u32) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(Type::ptr(ty.clone()), inst_id));
        self.emit(Instruction::Alloca { dest, ty, align });
        dest
    }

    pub fn build_load(&mut self, ptr: ValueId, ty: Type) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(ty.clone(), inst_id));
        self.emit(Instruction::Load { dest, ptr, ty });
        dest
    }

    pub fn build_store(&mut self, value: ValueId, ptr: ValueId) -> InstId {
        self.emit(Instruction::Store { value, ptr })
    }

    pub fn build_gep(&mut self, base: ValueId, indices: Vec<ValueId>, result_ty: Type) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(Type::ptr(result_ty.clone()), inst_id));
        self.emit(Instruction::Gep { dest, base, indices, result_ty, inbounds: true });
        dest
    }

    // --- phi / call --------------------------------------------------------------

    pub fn build_phi(&mut self, ty: Type, incoming: Vec<PhiIncoming>) -> ValueId {
        let dest = self.func_mut().next_value_id();
        let inst_id = self.func_mut().next_inst_id();
        self.func_mut().values.push(ValueData::new_register(ty.clone(), inst_id));
        self.emit(Instruction::Phi { dest, ty, incoming });
        dest
    }

    pub fn build_call(&mut self, callee: FuncId, args: Vec<ValueId>, ty: Type) -> Option<ValueId> {
        if ty.is_void() {
            self.emit(Instruction::Call { dest: None, callee, args, ty });
            None
        } else {
            let dest = self.func_mut().next_value_id();
            let inst_id = self.func_mut().next_inst_id();
            self.func_mut().values.push(ValueData::new_register(ty.clone(), inst_id));
            self.emit(Instruction::Call { dest: Some(dest), callee, args, ty });
            Some(dest)
        }
    }
}
