//! Structural IR types: void, the fixed-width scalars, pointers, arrays
//! with SysY's mixed static/dynamic dimensions, and function types.
//!
//! Mirrors the flat `IrType` enum `ccc::common::types` uses for its own
//! (much simpler) alloca/load/store typing, generalized to the full
//! structural model spec.md §3 requires: pointers carry an element type,
//! arrays carry dimensions, and function types carry a signature — none of
//! which a bare `{I8, I32, ..., Ptr, Void}` enum can express.

use std::fmt;

/// The scalar kinds. `bool`-sized `I1` is the result type of every
/// comparison and the operand type of every branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicKind {
    I1,
    I8,
    I32,
    I64,
    F32,
    F64,
}

impl BasicKind {
    pub fn size(self) -> usize {
        match self {
            BasicKind::I1 | BasicKind::I8 => 1,
            BasicKind::I32 | BasicKind::F32 => 4,
            BasicKind::I64 | BasicKind::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, BasicKind::F32 | BasicKind::F64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }
}

/// One array dimension. SysY allows the leading dimension of a function
/// parameter's array type to be omitted (`int a[][4]`); all other
/// dimensions, and every dimension of a local/global array, are static.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    Dynamic,
    /// `n` is always `> 0` — a zero-length static dimension is rejected by
    /// the external semantic analyzer before it ever reaches this crate.
    Static(u32),
}

/// A function's signature: return type, parameter types, and variadic-ness.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSig {
    pub ret: Box<Type>,
    pub params: Vec<Type>,
    pub variadic: bool,
}

/// A tagged union over every IR type shape, per spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Basic { kind: BasicKind, is_const: bool },
    Pointer(Box<Type>),
    Array { elem: Box<Type>, dims: Vec<Dim> },
    Function(Box<FunctionSig>),
}

impl Type {
    pub fn i1() -> Type {
        Type::Basic { kind: BasicKind::I1, is_const: false }
    }
    pub fn i32() -> Type {
        Type::Basic { kind: BasicKind::I32, is_const: false }
    }
    pub fn i64() -> Type {
        Type::Basic { kind: BasicKind::I64, is_const: false }
    }
    pub fn f32() -> Type {
        Type::Basic { kind: BasicKind::F32, is_const: false }
    }
    pub fn f64() -> Type {
        Type::Basic { kind: BasicKind::F64, is_const: false }
    }
    pub fn ptr(elem: Type) -> Type {
        Type::Pointer(Box::new(elem))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Basic { kind, .. } if kind.is_integer())
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Basic { kind, .. } if kind.is_float())
    }

    pub fn basic_kind(&self) -> Option<BasicKind> {
        match self {
            Type::Basic { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Strips the element type out of a pointer, panicking otherwise — used
    /// by `load`/`gep` builder contracts where the operand is already known
    /// to be well-typed.
    pub fn pointee(&self) -> &Type {
        match self {
            Type::Pointer(t) => t,
            other => panic!("pointee() called on non-pointer type {other:?}"),
        }
    }

    /// Structural equality ignoring the top-level `is_const` flag, as
    /// spec.md §3 requires for assignment compatibility. Nested array
    /// element types also ignore `is_const` at their own top level, since
    /// the same assignment-compatibility rule applies recursively to a
    /// single level of dereference.
    pub fn compatible(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Void, Type::Void) => true,
            (
                Type::Basic { kind: k1, .. },
                Type::Basic { kind: k2, .. },
            ) => k1 == k2,
            (Type::Pointer(a), Type::Pointer(b)) => a.compatible(b),
            (
                Type::Array { elem: e1, dims: d1 },
                Type::Array { elem: e2, dims: d2 },
            ) => e1.compatible(e2) && d1 == d2,
            (Type::Function(a), Type::Function(b)) => {
                a.ret.compatible(&b.ret)
                    && a.variadic == b.variadic
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.compatible(y))
            }
            _ => false,
        }
    }

    /// SysY's array-parameter convention: a 1-D array parameter accepts an
    /// argument array of any dimensionality whose base element type
    /// matches. `self` is the parameter type, `arg` the argument's type.
    pub fn accepts_array_argument(&self, arg: &Type) -> bool {
        match (self, arg) {
            (
                Type::Array { elem: pe, dims: pd },
                Type::Array { elem: ae, .. },
            ) if pd.len() == 1 => pe.compatible(ae),
            _ => self.compatible(arg),
        }
    }

    pub fn array(elem: Type, dims: Vec<Dim>) -> Type {
        Type::Array { elem: Box::new(elem), dims }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Basic { kind, .. } => write!(
                f,
                "{}",
                match kind {
                    BasicKind::I1 => "i1",
                    BasicKind::I8 => "i8",
                    BasicKind::I32 => "i32",
                    BasicKind::I64 => "i64",
                    BasicKind::F32 => "f32",
                    BasicKind::F64 => "f64",
                }
            ),
            Type::Pointer(t) => write!(f, "{t}*"),
            Type::Array { elem, dims } => {
                write!(f, "{elem}")?;
                for d in dims {
                    match d {
                        Dim::Dynamic => write!(f, "[]")?,
                        Dim::Static(n) => write!(f, "[{n}]")?,
                    }
                }
                Ok(())
            }
            Type::Function(sig) => {
                write!(f, "{}(", sig.ret)?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                if sig.variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_ignores_const() {
        let a = Type::Basic { kind: BasicKind::I32, is_const: true };
        let b = Type::Basic { kind: BasicKind::I32, is_const: false };
        assert!(a.compatible(&b));
    }

    #[test]
    fn array_param_accepts_any_dimensionality() {
        let param = Type::array(Type::i32(), vec![Dim::Dynamic]);
        let arg = Type::array(Type::i32(), vec![Dim::Static(3), Dim::Static(4)]);
        assert!(param.accepts_array_argument(&arg));
    }

    #[test]
    fn pointer_equality_is_structural() {
        let a = Type::ptr(Type::i32());
        let b = Type::ptr(Type::i32());
        assert!(a.compatible(&b));
        assert!(!a.compatible(&Type::ptr(Type::i64())));
    }
}
