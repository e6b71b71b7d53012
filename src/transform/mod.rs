//! The optimization pipeline: SSA construction (Mem2Reg, SROA), scalar
//! transforms (InstCombine, SCCP, CSE, ADCE, SimplifyCFG), loop transforms
//! (LICM, IndVarSimplify, LoopUnroll), and interprocedural transforms
//! (Inliner, TailCallElim) — per spec.md §4.5 through §4.8. Each pass is a
//! free `run(module: &mut Module, ..) -> bool` function; [`crate::pass_manager`]
//! owns the schedule that drives them to a fixed point.

pub mod adce;
pub mod cse;
pub mod ind_var_simplify;
pub mod inliner;
pub mod inst_combine;
pub mod licm;
pub mod loop_unroll;
pub mod mem2reg;
pub mod sccp;
pub mod simplify_cfg;
pub mod sroa;
pub mod tail_call_elim;

pub use inliner::RUNTIME_FUNCTIONS;
