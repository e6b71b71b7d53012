//! `verify(module)`: the external diagnostic entry point. Read-only,
//! never panics, collects every violation it finds instead of stopping
//! at the first one.

use crate::analysis::dominators::DominatorTree;
use crate::error::{VerifyError, VerifyReport};
use crate::ir::{FuncId, Instruction, Module};

pub fn verify(module: &Module) -> VerifyReport {
    let mut errors = Vec::new();
    for fid in module.function_ids() {
        let f = module.function(fid);
        if f.is_declaration() {
            continue;
        }
        verify_function(module, fid, &mut errors);
    }
    VerifyReport { errors }
}

fn verify_function(module: &Module, fid: FuncId, errors: &mut Vec<VerifyError>) {
    let f = module.function(fid);

    for bb in f.block_ids() {
        let block = f.block(bb);
        match block.terminator() {
            None => {
                errors.push(VerifyError::MissingTerminator(fid, bb));
                continue;
            }
            Some(term) => {
                if block.insts.iter().any(|&i| i != term && f.inst(i).is_terminator()) {
                    errors.push(VerifyError::InstructionAfterTerminator(fid, bb));
                }
            }
        }

        let phi_prefix_len = block.phi_count(|i| f.inst(i).is_phi());
        for (idx, &inst_id) in block.insts.iter().enumerate() {
            let inst = f.inst(inst_id);
            if inst.is_phi() && idx >= phi_prefix_len {
                errors.push(VerifyError::PhiNotInPrefix(fid, inst_id, bb));
            }
            if let Instruction::Phi { incoming, .. } = inst {
                let mut pred_set: Vec<_> = block.preds.clone();
                pred_set.sort_by_key(|p| p.index());
                let mut incoming_preds: Vec<_> = incoming.iter().map(|i| i.pred).collect();
                incoming_preds.sort_by_key(|p| p.index());
                if pred_set != incoming_preds {
                    errors.push(VerifyError::PhiIncomingMismatch(fid, inst_id, bb));
                }
            }
        }

        for &pred in &block.preds {
            if !f.block(pred).succs.contains(&bb) {
                errors.push(VerifyError::InconsistentCfgEdge(fid, bb, pred));
            }
        }
    }

    let dt = DominatorTree::compute(f);
    for bb in f.block_ids() {
        for (inst_id, inst) in f.block_insts(bb) {
            // A phi's `i`-th operand must be dominance-checked against the
            // block it arrives from, not the block the phi itself sits in
            // (that block may not even be reachable from that predecessor
            // along every path, but the incoming edge still requires the
            // definition to dominate the predecessor it's read at).
            if let Instruction::Phi { incoming, .. } = inst {
                for inc in incoming {
                    check_operand_dominance(f, &dt, fid, inst_id, inc.value, inc.pred, errors);
                }
                continue;
            }
            for operand in inst.operand_slots() {
                check_operand_dominance(f, &dt, fid, inst_id, operand, bb, errors);
            }
        }
    }

    check_use_list_consistency(f, fid, errors);
}

/// Checks that `operand`'s definition dominates `use_point` — the block an
/// ordinary instruction sits in, or the predecessor edge a phi incoming
/// value arrives along.
fn check_operand_dominance(
    f: &crate::ir::Function,
    dt: &DominatorTree,
    fid: FuncId,
    inst_id: crate::ir::InstId,
    operand: crate::ir::ValueId,
    use_point: crate::ir::BlockId,
    errors: &mut Vec<VerifyError>,
) {
    let v = f.value(operand);
    if !v.tracks_uses() {
        return;
    }
    let Some(def_inst) = v.def_inst else {
        if !matches!(v.kind, crate::ir::ValueKind::Argument(_) | crate::ir::ValueKind::Global(_)) {
            errors.push(VerifyError::UseOfUndefinedValue(fid, inst_id, operand));
        }
        return;
    };
    let def_block = f.block_ids().find(|&b| f.block(b).insts.contains(&def_inst));
    let Some(def_block) = def_block else {
        errors.push(VerifyError::UseOfUndefinedValue(fid, inst_id, operand));
        return;
    };
    let dominates = if def_block == use_point {
        f.block(use_point).insts.iter().position(|&i| i == def_inst)
            < f.block(use_point).insts.iter().position(|&i| i == inst_id).or(Some(usize::MAX))
    } else {
        dt.dominates(def_block, use_point)
    };
    if !dominates {
        errors.push(VerifyError::UseNotDominatedByDef(fid, inst_id, operand));
    }
}

fn check_use_list_consistency(f: &crate::ir::Function, fid: FuncId, errors: &mut Vec<VerifyError>) {
    for v_idx in 0..f.values.len() {
        let v = &f.values[v_idx];
        for u in &v.use_list {
            let user_inst = f.inst(u.user);
            let slots = user_inst.operand_slots();
            let matches = slots.get(u.slot as usize).map_or(false, |&s| s == crate::ir::ValueId(v_idx as u32));
            if !matches {
                errors.push(VerifyError::DanglingUseEntry(fid, crate::ir::ValueId(v_idx as u32), u.user, u.slot));
            }
        }
    }
}
