//! [`Value`]: anything that can be used as an instruction operand —
//! constants, SSA registers, globals, arguments, and `undef`.

use crate::ir::ids::{GlobalId, InstId};
use crate::types::Type;

/// An immediate constant. Constants are immutable, may be freely shared
/// across operand uses (no uniquing is required), and — per spec.md §3 —
/// never appear in any value's use list: folding a constant into an
/// operand position does not register a use, since there is nothing a
/// later RAUW could usefully retarget.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    I1(bool),
    I8(i8),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A nested aggregate constant for an array global's initializer.
    /// Entries the source initializer omitted are represented by an
    /// explicit `Zero` leaf rather than by a short `Vec`, so indexing
    /// an aggregate never requires knowing the declared length out of band.
    Array(Vec<Constant>),
    Zero(Type),
}

impl Constant {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::I1(b) => Some(*b as i64),
            Constant::I8(v) => Some(*v as i64),
            Constant::I32(v) => Some(*v as i64),
            Constant::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::F32(v) => Some(*v as f64),
            Constant::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Constant::I1(b) => !*b,
            Constant::I8(v) => *v == 0,
            Constant::I32(v) => *v == 0,
            Constant::I64(v) => *v == 0,
            Constant::F32(v) => *v == 0.0,
            Constant::F64(v) => *v == 0.0,
            Constant::Zero(_) => true,
            Constant::Array(_) => false,
        }
    }
}

/// The discriminant of a [`Value`]: what kind of thing it is, independent
/// of its type.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Constant(Constant),
    /// The result of some instruction. `def_inst` on the owning `Value`
    /// points back at the defining instruction.
    Register,
    Global(GlobalId),
    /// The `index`-th formal parameter of its function.
    Argument(u32),
    Undef,
}

/// A single use of a value: which instruction uses it, and at which
/// canonical operand position (see [`crate::ir::instruction::Instruction`]
/// for the per-opcode slot numbering). Tracking the slot, not just the
/// instruction, keeps `no duplicates` meaningful even when one instruction
/// uses the same value in two distinct operand positions (`add %x, %x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: InstId,
    pub slot: u8,
}

/// A value: anything usable as an instruction operand.
#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub kind: ValueKind,
    pub def_inst: Option<InstId>,
    pub use_list: Vec<Use>,
}

impl ValueData {
    pub fn new_register(ty: Type, def_inst: InstId) -> Self {
        ValueData { ty, kind: ValueKind::Register, def_inst: Some(def_inst), use_list: Vec::new() }
    }

    pub fn new_constant(ty: Type, c: Constant) -> Self {
        ValueData { ty, kind: ValueKind::Constant(c), def_inst: None, use_list: Vec::new() }
    }

    pub fn new_global(ty: Type, id: GlobalId) -> Self {
        ValueData { ty, kind: ValueKind::Global(id), def_inst: None, use_list: Vec::new() }
    }

    pub fn new_argument(ty: Type, index: u32) -> Self {
        ValueData { ty, kind: ValueKind::Argument(index), def_inst: None, use_list: Vec::new() }
    }

    pub fn new_undef(ty: Type) -> Self {
        ValueData { ty, kind: ValueKind::Undef, def_inst: None, use_list: Vec::new() }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_))
    }

    pub fn is_register(&self) -> bool {
        matches!(self.kind, ValueKind::Register)
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, ValueKind::Global(_))
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.kind, ValueKind::Undef)
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Values that never need a use-list entry: constants (per spec.md
    /// §3) and `undef` (nothing meaningful to RAUW it against).
    pub fn tracks_uses(&self) -> bool {
        !matches!(self.kind, ValueKind::Constant(_) | ValueKind::Undef)
    }
}
