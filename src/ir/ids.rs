//! Dense, `Copy` handles into a [`Module`](crate::ir::Module)'s object
//! stores.
//!
//! The data model's "every allocation lives for the module's lifetime,
//! destroying the module drops everything at once" story is realized here
//! as dense `Vec`-backed stores indexed by these newtypes, rather than as
//! raw pointers into a bump-allocated arena — per spec.md's own note that
//! indices are an equally valid encoding, and the one that keeps the rest
//! of this crate in safe, borrow-checkable Rust. Identity is index
//! identity and is stable for the module's lifetime, exactly as
//! arena-pointer identity would be.

use std::fmt;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(ValueId, "%");
define_id!(InstId, "inst");
define_id!(BlockId, "bb");
define_id!(FuncId, "fn");
define_id!(GlobalId, "@");
define_id!(OperandId, "op");

/// Any of the two referent kinds an [`Operand`](crate::ir::Operand) can
/// point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRef {
    Value(ValueId),
    Block(BlockId),
}
