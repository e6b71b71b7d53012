//! SimplifyCFG: the iterated fixed point of four CFG cleanup sub-passes
//! from spec.md §4.6 — constant branch folding, unreachable-block removal,
//! sequential-block merging, and jump threading.

use crate::analysis::{compute_cfg, unreachable_blocks};
use crate::ir::{BlockId, FuncId, Function, InstId, Instruction, Module, PhiIncoming};

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for fid in module.function_ids() {
        if module.function(fid).is_declaration() {
            continue;
        }
        changed |= simplify_function(module, fid);
    }
    tracing::debug!(changed, "simplify_cfg finished");
    changed
}

fn simplify_function(module: &mut Module, fid: FuncId) -> bool {
    let mut overall = false;
    loop {
        compute_cfg(module.function_mut(fid));
        let mut round = false;
        round |= fold_constant_branches(module, fid);
        compute_cfg(module.function_mut(fid));
        round |= remove_unreachable_blocks(module, fid);
        compute_cfg(module.function_mut(fid));
        round |= merge_sequential_blocks(module, fid);
        compute_cfg(module.function_mut(fid));
        round |= thread_jumps(module, fid);
        if !round {
            break;
        }
        overall = true;
    }
    overall
}

/// `cond_br c?,A,B` where `c` is a compile-time constant becomes `br A` (or
/// `br B`), dropping the dead edge from the CFG and from phis in the dead
/// target.
fn fold_constant_branches(module: &mut Module, fid: FuncId) -> bool {
    let mut changed = false;
    let blocks: Vec<BlockId> = module.function(fid).block_ids().collect();
    for bb in blocks {
        let Some(term) = module.function(fid).block(bb).terminator() else { continue };
        let Instruction::CondBr { cond, then_bb, else_bb } = *module.function(fid).inst(term) else { continue };
        let Some(c) = module.function(fid).value(cond).as_constant().cloned() else { continue };
        let taken = c.as_i64().map(|v| v != 0).unwrap_or(true);
        let (keep, drop) = if taken { (then_bb, else_bb) } else { (else_bb, then_bb) };

        let f = module.function_mut(fid);
        if f.value(cond).tracks_uses() {
            f.value_mut(cond).use_list.retain(|u| u.user != term);
        }
        *f.inst_mut(term) = Instruction::Br { target: keep };
        if keep != drop {
            f.block_mut(bb).succs.retain(|&s| s != drop);
            f.block_mut(drop).preds.retain(|&p| p != bb);
            remove_phi_incoming(f, drop, bb);
        }
        changed = true;
    }
    changed
}

/// Forward reachability DFS from entry; any block not reached is deleted
/// (the entry block itself is never a candidate).
fn remove_unreachable_blocks(module: &mut Module, fid: FuncId) -> bool {
    let entry = module.function(fid).entry.unwrap();
    let dead = unreachable_blocks(module.function(fid), entry);
    if dead.is_empty() {
        return false;
    }
    for &bb in &dead {
        let f = module.function(fid);
        let succs = f.block(bb).succs.clone();
        for s in succs {
            if !dead.contains(&s) {
                let f = module.function_mut(fid);
                f.block_mut(s).preds.retain(|&p| p != bb);
                remove_phi_incoming(f, s, bb);
            }
        }
    }
    for &bb in &dead {
        let insts: Vec<InstId> = module.function(fid).block(bb).insts.clone();
        for inst_id in insts {
            retract_own_operand_uses(module.function_mut(fid), inst_id);
        }
        module.function_mut(fid).block_mut(bb).insts.clear();
    }
    true
}

fn retract_own_operand_uses(f: &mut Function, inst_id: InstId) {
    for (slot, operand) in f.inst(inst_id).operand_slots().into_iter().enumerate() {
        if f.value(operand).tracks_uses() {
            f.value_mut(operand).use_list.retain(|u| !(u.user == inst_id && u.slot as usize == slot));
        }
    }
}

/// If `a` ends with an unconditional `br b`, `a` is `b`'s only predecessor,
/// and `b` has no phis, splice `b`'s instructions into `a` and redirect
/// every reference to `b` onto `a`.
fn merge_sequential_blocks(module: &mut Module, fid: FuncId) -> bool {
    let mut changed = false;
    loop {
        let candidate = module.function(fid).block_ids().find(|&a| {
            let f = module.function(fid);
            let Some(term) = f.block(a).terminator() else { return false };
            let Instruction::Br { target: b } = f.inst(term) else { return false };
            let b = *b;
            if b == a {
                return false;
            }
            f.block(b).preds == [a] && !f.block(b).insts.iter().any(|&i| f.inst(i).is_phi())
        });
        let Some(a) = candidate else { break };
        let f = module.function(fid);
        let term = f.block(a).terminator().unwrap();
        let Instruction::Br { target: b } = *f.inst(term) else { unreachable!() };

        let f = module.function_mut(fid);
        retract_own_operand_uses(f, term);
        f.block_mut(a).insts.pop();
        let b_insts = f.block(b).insts.clone();
        for inst_id in &b_insts {
            f.block_mut(a).insts.push(*inst_id);
        }
        let b_succs = f.block(b).succs.clone();
        for &s in &b_succs {
            f.block_mut(s).preds.iter_mut().for_each(|p| {
                if *p == b {
                    *p = a;
                }
            });
            retarget_phi_pred(f, s, b, a);
        }
        f.block_mut(a).succs = b_succs;
        f.block_mut(b).insts.clear();
        f.block_mut(b).succs.clear();
        f.block_mut(b).preds.clear();
        changed = true;
    }
    changed
}

/// If `b` contains only an unconditional `br c`, redirect every predecessor
/// `p` of `b` straight to `c`, reusing `b`'s incoming value for `p` as `c`'s
/// new incoming for that edge.
fn thread_jumps(module: &mut Module, fid: FuncId) -> bool {
    let mut changed = false;
    let blocks: Vec<BlockId> = module.function(fid).block_ids().collect();
    for b in blocks {
        let f = module.function(fid);
        if Some(b) == f.entry {
            continue;
        }
        let non_phi: Vec<InstId> = f.block(b).insts.iter().copied().filter(|&i| !f.inst(i).is_phi()).collect();
        if non_phi.len() != 1 {
            continue;
        }
        let Instruction::Br { target: c } = f.inst(non_phi[0]) else { continue };
        let c = *c;
        if c == b {
            continue;
        }
        let b_phi_values: Vec<(crate::ir::ValueId, BlockId)> = f
            .block(b)
            .insts
            .iter()
            .filter_map(|&i| match f.inst(i) {
                Instruction::Phi { incoming, .. } => incoming.first().map(|inc| (inc.value, inc.pred)),
                _ => None,
            })
            .collect();
        let _ = b_phi_values;
        if f.block(b).insts.iter().any(|&i| f.inst(i).is_phi()) {
            // A block with both phis and a trailing jump is the preheader
            // shape LICM/loop-rotation produce; threading through it would
            // need per-predecessor phi resolution this pass doesn't attempt.
            continue;
        }

        let preds = f.block(b).preds.clone();
        for &p in &preds {
            let f = module.function_mut(fid);
            retarget_terminator(f, p, b, c);
            f.block_mut(c).preds.push(p);
            duplicate_phi_incoming_for(f, c, b, p);
        }
        let f = module.function_mut(fid);
        f.block_mut(c).preds.retain(|&pr| pr != b);
        f.block_mut(b).preds.clear();
        changed = true;
    }
    changed
}

/// `c` gains an incoming `(value, p)` pair for every phi that previously had
/// an incoming `(value, b)` pair, now that `p` branches directly to `c`.
fn duplicate_phi_incoming_for(f: &mut Function, c: BlockId, b: BlockId, p: BlockId) {
    let insts: Vec<InstId> = f.block(c).insts.clone();
    for inst_id in insts {
        if !f.inst(inst_id).is_phi() {
            continue;
        }
        let existing = match f.inst(inst_id) {
            Instruction::Phi { incoming, .. } => incoming.iter().find(|inc| inc.pred == b).map(|inc| inc.value),
            _ => None,
        };
        if let Some(value) = existing {
            f.add_phi_incoming(inst_id, value, p);
        }
    }
}

fn retarget_terminator(f: &mut Function, block: BlockId, old_target: BlockId, new_target: BlockId) {
    let Some(term) = f.block(block).terminator() else { return };
    match f.inst_mut(term) {
        Instruction::Br { target } if *target == old_target => *target = new_target,
        Instruction::CondBr { then_bb, else_bb, .. } => {
            if *then_bb == old_target {
                *then_bb = new_target;
            }
            if *else_bb == old_target {
                *else_bb = new_target;
            }
        }
        _ => {}
    }
}

fn retarget_phi_pred(f: &mut Function, block: BlockId, old_pred: BlockId, new_pred: BlockId) {
    for &inst_id in f.block(block).insts.clone().iter() {
        if let Instruction::Phi { incoming, .. } = f.inst_mut(inst_id) {
            for inc in incoming.iter_mut() {
                if inc.pred == old_pred {
                    inc.pred = new_pred;
                }
            }
        }
    }
}

fn remove_phi_incoming(f: &mut Function, block: BlockId, pred: BlockId) {
    let insts: Vec<InstId> = f.block(block).insts.clone();
    for inst_id in insts {
        if !f.inst(inst_id).is_phi() {
            continue;
        }
        let Instruction::Phi { incoming, .. } = f.inst(inst_id) else { continue };
        if !incoming.iter().any(|inc| inc.pred == pred) {
            continue;
        }
        let new_incoming: Vec<PhiIncoming> = incoming.iter().copied().filter(|inc| inc.pred != pred).collect();
        // Rebuild via remove+re-add so use-list bookkeeping for the dropped
        // incoming value stays correct even if that value appears more than
        // once across the remaining pairs.
        for v_idx in 0..f.values.len() {
            let vid = crate::ir::ValueId(v_idx as u32);
            f.value_mut(vid).use_list.retain(|u| u.user != inst_id);
        }
        if let Instruction::Phi { incoming, .. } = f.inst_mut(inst_id) {
            *incoming = Vec::new();
        }
        for inc in new_incoming {
            f.add_phi_incoming(inst_id, inc.value, inc.pred);
        }
    }
}
