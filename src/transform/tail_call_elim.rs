//! TailCallElim: direct recursive tail calls rewritten into a loop back
//! edge, per spec.md §4.8. A `call` to the enclosing function immediately
//! followed by a `ret` that either discards the result (void) or returns
//! exactly the call's own value is a tail call. The original entry block
//! becomes a loop header: a synthesized prologue takes over as the
//! function's real entry and falls straight through to it, and one phi
//! per parameter merges the prologue's value with every tail-site's
//! argument, so every in-body use of a parameter sees the current
//! iteration's value instead of the first call's.

use crate::ir::{BasicBlock, BlockId, FuncId, Function, InstId, Instruction, Module, ValueId};

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= tce_function(module, fid);
    }
    tracing::debug!(changed, "tail call elimination finished");
    changed
}

fn tce_function(module: &mut Module, fid: FuncId) -> bool {
    crate::analysis::compute_cfg(module.function_mut(fid));
    let f = module.function_mut(fid);
    let old_entry = f.entry.unwrap();

    let sites = find_tail_call_sites(f, fid);
    if sites.is_empty() {
        return false;
    }

    let prologue = f.add_block(BasicBlock::with_label(format!("{old_entry}.tce_entry")));
    f.push_inst(prologue, Instruction::Br { target: old_entry });
    f.entry = Some(prologue);

    let params = f.args.clone();
    let phis: Vec<(InstId, ValueId)> = params
        .iter()
        .map(|&p| {
            let ty = f.value(p).ty.clone();
            f.prepend_phi(old_entry, ty)
        })
        .collect();

    // Redirect every existing in-body use of a parameter to its phi
    // *before* reading any tail-site's argument list below — a tail call
    // that just threads a parameter through unchanged must see its own
    // phi as the argument, not the original (first-call-only) parameter.
    for (&param, &(_, phi_dest)) in params.iter().zip(&phis) {
        f.replace_all_uses_with(param, phi_dest);
    }

    for &(call_block, call_inst, ret_inst) in &sites {
        let args = match f.inst(call_inst) {
            Instruction::Call { args, .. } => args.clone(),
            _ => unreachable!("tail call site must hold a Call"),
        };
        for (&(phi_id, _), &arg) in phis.iter().zip(&args) {
            f.add_phi_incoming(phi_id, arg, call_block);
        }
        f.erase_inst(call_block, ret_inst);
        f.erase_inst(call_block, call_inst);
        f.push_inst(call_block, Instruction::Br { target: old_entry });
    }

    for (&param, &(phi_id, _)) in params.iter().zip(&phis) {
        f.add_phi_incoming(phi_id, param, prologue);
    }

    crate::analysis::compute_cfg(f);
    true
}

/// Finds every `(block, call, ret)` in `f` where `call` is a direct,
/// positionally-final-before-`ret` recursive call to `fid`, and `ret`
/// returns exactly (or, for a void call, nothing but) the call's result.
/// A call whose result escapes anywhere besides that immediate `ret` is
/// not a tail call by this definition and is left alone.
fn find_tail_call_sites(f: &Function, fid: FuncId) -> Vec<(BlockId, InstId, InstId)> {
    let mut sites = Vec::new();
    for bb in f.block_ids() {
        let insts = &f.block(bb).insts;
        if insts.len() < 2 {
            continue;
        }
        let ret_inst = insts[insts.len() - 1];
        let call_inst = insts[insts.len() - 2];
        let Instruction::Call { callee, dest, .. } = f.inst(call_inst) else { continue };
        if *callee != fid {
            continue;
        }
        if let Some(d) = dest {
            if f.value(*d).use_list.len() != 1 {
                continue;
            }
        }
        let Instruction::Ret { value } = f.inst(ret_inst) else { continue };
        let matches = match (*dest, *value) {
            (None, None) => true,
            (Some(d), Some(v)) => d == v,
            _ => false,
        };
        if matches {
            sites.push((bb, call_inst, ret_inst));
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpKind, IcmpCond, IrBuilder, Module};
    use crate::types::Type;

    /// `fn f(n, acc): if n == 0 return acc; else return f(n - 1, n * acc)`.
    /// Expected: the recursive call and its `ret` become a branch back to
    /// the (now loop-header) entry block, which gains two phis.
    #[test]
    fn rewrites_factorial_style_tail_call_into_a_loop() {
        let mut m = Module::new("t");
        let f_id = m.add_function(Function::declaration("f", Type::i32(), vec![Type::i32(), Type::i32()], false));
        let entry;
        let then_bb;
        let else_bb;
        {
            let func = m.function_mut(f_id);
            entry = func.add_block(BasicBlock::with_label("entry"));
            then_bb = func.add_block(BasicBlock::with_label("then"));
            else_bb = func.add_block(BasicBlock::with_label("else"));
            func.entry = Some(entry);
            let n = func.alloc_argument(Type::i32(), 0);
            let acc = func.alloc_argument(Type::i32(), 1);
            func.args.push(n);
            func.args.push(acc);
        }

        let n = m.function(f_id).args[0];
        let acc = m.function(f_id).args[1];

        let mut b = IrBuilder::at_end(&mut m, f_id, entry);
        let zero = b.const_i32(0);
        let is_zero = b.build_icmp(IcmpCond::Eq, n, zero);
        b.build_cond_br(is_zero, then_bb, else_bb);

        let mut b = IrBuilder::at_end(&mut m, f_id, then_bb);
        b.build_ret(Some(acc));

        let mut b = IrBuilder::at_end(&mut m, f_id, else_bb);
        let one = b.const_i32(1);
        let n_minus_1 = b.build_binop(BinOpKind::Sub, n, one, Type::i32());
        let n_times_acc = b.build_binop(BinOpKind::Mul, n, acc, Type::i32());
        let r = b.build_call(f_id, vec![n_minus_1, n_times_acc], Type::i32()).unwrap();
        b.build_ret(Some(r));

        assert!(run(&mut m));

        let f = m.function(f_id);
        let call_remains =
            f.blocks.iter().any(|bb| bb.insts.iter().any(|&i| matches!(f.inst(i), Instruction::Call { .. })));
        assert!(!call_remains, "the recursive call should have been erased");

        let phi_count: usize = f
            .blocks
            .iter()
            .flat_map(|bb| bb.insts.iter())
            .filter(|&&i| matches!(f.inst(i), Instruction::Phi { .. }))
            .count();
        assert_eq!(phi_count, 2, "one phi per parameter");

        // entry (now the loop header) must be reachable from the new real
        // entry, and must have the else-block as a second predecessor
        // (the tail-call-turned-back-edge).
        assert_ne!(f.entry, Some(entry), "a fresh prologue block must become the real entry");
        assert!(f.block(entry).preds.len() == 2);
        assert!(f.block(entry).preds.contains(&else_bb));
    }

    #[test]
    fn leaves_non_tail_recursive_call_untouched() {
        let mut m = Module::new("t");
        let f_id = m.add_function(Function::declaration("f", Type::i32(), vec![Type::i32()], false));
        let entry = m.function_mut(f_id).add_block(BasicBlock::with_label("entry"));
        m.function_mut(f_id).entry = Some(entry);
        let n = m.function_mut(f_id).alloc_argument(Type::i32(), 0);
        m.function_mut(f_id).args.push(n);

        let mut b = IrBuilder::at_end(&mut m, f_id, entry);
        let r = b.build_call(f_id, vec![n], Type::i32()).unwrap();
        let one = b.const_i32(1);
        // Not a tail call: the result is combined with something else
        // before the `ret`, so it is not "immediately followed by ret".
        let sum = b.build_binop(BinOpKind::Add, r, one, Type::i32());
        b.build_ret(Some(sum));

        assert!(!run(&mut m));
    }

    #[test]
    fn no_recursive_call_means_no_change() {
        let mut m = Module::new("t");
        let f_id = m.add_function(Function::declaration("f", Type::i32(), vec![], false));
        let entry = m.function_mut(f_id).add_block(BasicBlock::with_label("entry"));
        m.function_mut(f_id).entry = Some(entry);
        let mut b = IrBuilder::at_end(&mut m, f_id, entry);
        let v = b.const_i32(42);
        b.build_ret(Some(v));

        assert!(!run(&mut m));
    }
}
