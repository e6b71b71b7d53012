//! [`PassManager`]: the schedule from spec.md §4.9 — normalize to SSA,
//! iterate the scalar pipeline to a fixed point, run the loop pipeline
//! once per loop nest plus a cleanup sweep, then the two interprocedural
//! transforms. [`PassManagerConfig`] selects which passes run and tunes
//! their knobs, per spec.md §6's configuration table.

use crate::ir::Module;
use crate::transform::{
    adce, cse, ind_var_simplify, inliner, inst_combine, licm, loop_unroll, mem2reg, sccp, simplify_cfg, sroa, tail_call_elim,
};

/// Which passes run and how aggressively, per spec.md §6. `Default`
/// matches the documented defaults exactly — every pass enabled except
/// `enable_loop_unroll`, which the spec calls out as off by default.
#[derive(Debug, Clone)]
pub struct PassManagerConfig {
    pub enable_mem2reg: bool,
    pub enable_sroa: bool,
    pub enable_cse: bool,
    pub enable_adce: bool,
    pub enable_sccp: bool,
    pub enable_inst_combine: bool,
    pub enable_simplify_cfg: bool,
    pub enable_licm: bool,
    pub enable_ind_var_simplify: bool,
    pub enable_loop_unroll: bool,
    pub enable_tail_call_elim: bool,
    pub enable_inliner: bool,
    pub max_iterations: usize,
    pub max_loop_unroll_count: usize,
    pub inliner_threshold: usize,
}

impl Default for PassManagerConfig {
    fn default() -> Self {
        PassManagerConfig {
            enable_mem2reg: true,
            enable_sroa: true,
            enable_cse: true,
            enable_adce: true,
            enable_sccp: true,
            enable_inst_combine: true,
            enable_simplify_cfg: true,
            enable_licm: true,
            enable_ind_var_simplify: true,
            enable_loop_unroll: false,
            enable_tail_call_elim: true,
            enable_inliner: true,
            max_iterations: 10,
            max_loop_unroll_count: 4,
            inliner_threshold: 80,
        }
    }
}

/// Per-pass invocation counters, gated behind the `stats` feature — per
/// spec.md §9's note that stat counters belong on the pass manager value
/// rather than in a global. Every field counts how many times that pass's
/// `run` reported `changed = true`, not how many individual rewrites it
/// made (passes don't expose that granularity uniformly).
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub sroa_changed: usize,
    pub mem2reg_changed: usize,
    pub inst_combine_changed: usize,
    pub sccp_changed: usize,
    pub cse_changed: usize,
    pub adce_changed: usize,
    pub simplify_cfg_changed: usize,
    pub licm_changed: usize,
    pub ind_var_simplify_changed: usize,
    pub loop_unroll_changed: usize,
    pub inliner_changed: usize,
    pub tail_call_elim_changed: usize,
    pub scalar_fixed_point_iterations: usize,
}

pub struct PassManager {
    pub config: PassManagerConfig,
    #[cfg(feature = "stats")]
    pub stats: Statistics,
}

/// Runs `$call`, and — only when the `stats` feature is enabled — bumps
/// `$field` on `self.stats` if it reported `changed = true`. Expands to
/// a bare `$call` otherwise, so the counter fields never need to exist
/// (or be referenced) in a build without the feature.
macro_rules! track {
    ($self:ident, $field:ident, $call:expr) => {{
        let changed = $call;
        #[cfg(feature = "stats")]
        if changed {
            $self.stats.$field += 1;
        }
        changed
    }};
}

impl PassManager {
    pub fn new(config: PassManagerConfig) -> Self {
        PassManager {
            config,
            #[cfg(feature = "stats")]
            stats: Statistics::default(),
        }
    }

    /// Runs the full pipeline over `module` per spec.md §4.9. Returns
    /// whether anything changed across the whole run.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&mut self, module: &mut Module) -> bool {
        let mut changed = false;

        if self.config.enable_sroa {
            changed |= track!(self, sroa_changed, sroa::run(module));
        }
        if self.config.enable_mem2reg {
            changed |= track!(self, mem2reg_changed, mem2reg::run(module));
        }

        changed |= self.scalar_fixed_point(module);
        changed |= self.loop_pipeline(module);

        if self.config.enable_inliner {
            let inlined = track!(self, inliner_changed, inliner::run(module, self.config.inliner_threshold));
            if inlined {
                changed = true;
                // A newly-inlined callee body needs the same scalar
                // cleanup its own compilation would have received.
                self.scalar_fixed_point(module);
            }
        }
        if self.config.enable_tail_call_elim {
            changed |= track!(self, tail_call_elim_changed, tail_call_elim::run(module));
        }

        tracing::debug!(changed, "pass manager finished");
        changed
    }

    /// `InstCombine, SCCP, CSE, ADCE, SimplifyCFG` repeated until none of
    /// them makes further progress or `max_iterations` rounds have run.
    /// Each of these passes already rebuilds whatever CFG/dominator state
    /// it needs internally, so no explicit rebuild step is needed between
    /// them — only the iteration cap itself is this loop's job.
    fn scalar_fixed_point(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for _ in 0..self.config.max_iterations {
            #[cfg(feature = "stats")]
            {
                self.stats.scalar_fixed_point_iterations += 1;
            }
            let mut round = false;
            if self.config.enable_inst_combine {
                round |= track!(self, inst_combine_changed, inst_combine::run(module));
            }
            if self.config.enable_sccp {
                round |= track!(self, sccp_changed, sccp::run(module));
            }
            if self.config.enable_cse {
                round |= track!(self, cse_changed, cse::run(module));
            }
            if self.config.enable_adce {
                round |= track!(self, adce_changed, adce::run(module));
            }
            if self.config.enable_simplify_cfg {
                round |= track!(self, simplify_cfg_changed, simplify_cfg::run(module));
            }
            if !round {
                break;
            }
            changed = true;
        }
        changed
    }

    /// `LICM`, `IndVarSimplify`, `LoopUnroll` (gated), then a single
    /// cleanup sweep of `InstCombine + ADCE + SimplifyCFG` — each loop
    /// transform already iterates every loop nest in every function
    /// internally, so this runs each of the three exactly once per
    /// overall pipeline invocation, per spec.md §4.9 step 4.
    fn loop_pipeline(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        if self.config.enable_licm {
            changed |= track!(self, licm_changed, licm::run(module));
        }
        if self.config.enable_ind_var_simplify {
            changed |= track!(self, ind_var_simplify_changed, ind_var_simplify::run(module));
        }
        if self.config.enable_loop_unroll {
            changed |= track!(self, loop_unroll_changed, loop_unroll::run(module, self.config.max_loop_unroll_count));
        }

        if self.config.enable_inst_combine {
            changed |= track!(self, inst_combine_changed, inst_combine::run(module));
        }
        if self.config.enable_adce {
            changed |= track!(self, adce_changed, adce::run(module));
        }
        if self.config.enable_simplify_cfg {
            changed |= track!(self, simplify_cfg_changed, simplify_cfg::run(module));
        }
        changed
    }
}
