//! Per-function static analyses: control flow, dominance, and natural
//! loops. Every transform pass in [`crate::transform`] consumes these
//! rather than recomputing CFG/dominance facts itself.

pub mod cfg;
pub mod dominators;
pub mod loops;

pub use cfg::{compute_cfg, reverse_postorder, successors_of, unreachable_blocks};
pub use dominators::DominatorTree;
pub use loops::{get_or_insert_preheader, Loop, LoopForest};
