//! Middle-end IR for a SysY compiler: the data model (module → function →
//! block → instruction, with explicit use-def chains), the builder that
//! constructs it, the analyses that populate dominance/loop side-tables,
//! and the transform passes that drive it toward an optimized SSA form a
//! backend can lower. See `DESIGN.md` for what each module is grounded on.

pub mod analysis;
pub mod common;
pub mod error;
pub mod ir;
pub mod pass_manager;
pub mod transform;
pub mod types;

pub use error::{VerifyError, VerifyReport};
pub use ir::{Function, Module};
pub use pass_manager::{PassManager, PassManagerConfig};
