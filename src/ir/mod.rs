//! The IR core: module/function/block/instruction/value data model, the
//! builder that constructs it, and the verifier that checks it.

pub mod block;
pub mod builder;
pub mod function;
pub mod ids;
pub mod instruction;
pub mod module;
pub mod value;
pub mod value_map;
pub mod verify;

pub use block::BasicBlock;
pub use builder::IrBuilder;
pub use function::Function;
pub use ids::{BlockId, FuncId, GlobalId, InstId, OperandRef, ValueId};
pub use instruction::{BinOpKind, ConvertKind, FcmpCond, IcmpCond, Instruction, PhiIncoming};
pub use module::{Global, Module};
pub use value::{Constant, Use, ValueData, ValueKind};
pub use value_map::{clone_instruction_with_remap, ValueMap};
pub use verify::{verify, VerifyReport};
