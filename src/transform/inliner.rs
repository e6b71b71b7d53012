//! Inliner: module-scope call-site inlining, per spec.md §4.8. Enumerates
//! `call` instructions whose callee is a statically-known, defined,
//! non-recursive-on-the-current-stack function under the instruction-count
//! threshold, and splices the callee's body into the caller at each
//! qualifying site. Iterates at module level until no further call
//! qualifies (a newly-inlined callee may itself contain now-inlinable
//! calls).

use crate::ir::{BlockId, FuncId, Function, InstId, Instruction, Module, PhiIncoming, ValueMap};
use crate::types::Type;

/// SysY runtime functions the Inliner must never touch: they have no body
/// in this module (they're external declarations by construction), but
/// this list also documents the contract for callers assembling a
/// [`Module`] from an AST walk — see spec.md §6.
pub const RUNTIME_FUNCTIONS: &[&str] = &[
    "getint", "getch", "getfloat", "getarray", "getfarray", "putint", "putch", "putfloat", "putarray", "putfarray",
    "putf", "starttime", "stoptime",
];

#[tracing::instrument(level = "debug", skip_all)]
pub fn run(module: &mut Module, threshold: usize) -> bool {
    let mut changed = false;
    loop {
        let mut round = false;
        for fid in module.function_ids() {
            if module.function(fid).is_declaration() {
                continue;
            }
            if inline_into(module, fid, threshold) {
                round = true;
            }
        }
        if !round {
            break;
        }
        changed = true;
    }
    tracing::debug!(changed, "inliner finished");
    changed
}

fn instruction_count(f: &Function) -> usize {
    f.block_ids().map(|bb| f.block(bb).insts.len()).sum()
}

/// Finds the next qualifying call site in `fid` and inlines it in place.
/// Repeats on the same function until no call site qualifies, since each
/// inline can expose further nested calls or changes the instruction
/// stream a second pass over the same function needs to re-scan from
/// scratch (block ids shift/append, but never reorder).
fn inline_into(module: &mut Module, fid: FuncId, threshold: usize) -> bool {
    let mut changed = false;
    loop {
        let Some((bb, inst_id, callee)) = find_next_call_site(module, fid, threshold) else { break };
        inline_call_site(module, fid, bb, inst_id, callee);
        changed = true;
    }
    changed
}

fn find_next_call_site(module: &Module, fid: FuncId, threshold: usize) -> Option<(BlockId, InstId, FuncId)> {
    let f = module.function(fid);
    for bb in f.block_ids() {
        for (inst_id, inst) in f.block_insts(bb) {
            let Instruction::Call { callee, .. } = inst else { continue };
            if *callee == fid {
                // Never inline a direct recursive call into itself — that's
                // TailCallElim's job when the call sits right before a ret,
                // and an unbounded body-growing inline otherwise.
                continue;
            }
            let callee_fn = module.function(*callee);
            if callee_fn.is_declaration() {
                continue;
            }
            if RUNTIME_FUNCTIONS.contains(&&*callee_fn.name) {
                continue;
            }
            if instruction_count(callee_fn) >= threshold {
                continue;
            }
            return Some((bb, inst_id, *callee));
        }
    }
    None
}

/// Splices `callee`'s body into `fid` at `call_inst`, per spec.md §4.8:
/// split the caller's block after the call, clone the callee's blocks into
/// the caller, redirect the split's `before` half into the clone's entry
/// and every cloned `ret` into the split's `after` half (merging return
/// values with a phi when the callee is non-void), then erase the
/// original call. `SimplifyCFG` is expected to run afterward to clean up
/// the extra blocks this always introduces.
fn inline_call_site(module: &mut Module, fid: FuncId, call_block: BlockId, call_inst: InstId, callee: FuncId) {
    let (args, call_dest, call_ty) = {
        let f = module.function(fid);
        let Instruction::Call { args, dest, ty, .. } = f.inst(call_inst) else { unreachable!() };
        (args.clone(), *dest, ty.clone())
    };

    let after = split_block_after(module, fid, call_block, call_inst);

    // Cloned independently of `module` so every clone step below can hold
    // an exclusive borrow of the caller's `Function` without also holding
    // a borrow of the callee's — the callee and caller may be the same
    // `Vec<Function>` slot-adjacent entries, and `Module` doesn't expose a
    // split-borrow accessor for "two distinct functions at once".
    let callee_fn = module.function(callee).clone();
    let callee_blocks: Vec<BlockId> = callee_fn.block_ids().collect();

    let mut vmap = ValueMap::new();
    for &old_bb in &callee_blocks {
        callee_fn.map_new_block(old_bb, module.function_mut(fid), &mut vmap);
    }
    for (param, &arg) in callee_fn.args.iter().zip(&args) {
        vmap.insert_value(*param, arg);
    }
    for &old_bb in &callee_blocks {
        for &inst_id in &callee_fn.block(old_bb).insts {
            if let Some(old_dest) = callee_fn.inst(inst_id).dest() {
                callee_fn.predeclare_clone_dest(old_dest, module.function_mut(fid), &mut vmap);
            }
        }
    }
    for &old_bb in &callee_blocks {
        let new_bb = vmap.block(old_bb);
        callee_fn.clone_block_into(old_bb, module.function_mut(fid), new_bb, &vmap);
    }

    let cloned_entry = vmap.block(callee_fn.entry.unwrap());
    // `call_block` lost its terminator to `after` during the split (the
    // call itself is not one); give it a fresh jump straight into the
    // cloned callee body. The call instruction, still the last thing in
    // `call_block` at this point, is erased further down.
    let f = module.function_mut(fid);
    f.push_inst(call_block, Instruction::Br { target: cloned_entry });
    f.block_mut(call_block).succs = vec![cloned_entry];
    f.block_mut(cloned_entry).preds.push(call_block);

    // Every cloned `ret` becomes an unconditional jump to `after`; if the
    // callee returns a value, collect each one as an incoming pair of a
    // fresh phi at the head of `after`.
    let mut return_pairs: Vec<(BlockId, Option<crate::ir::ValueId>)> = Vec::new();
    for &old_bb in &callee_blocks {
        let new_bb = vmap.block(old_bb);
        let f = module.function(fid);
        let Some(term) = f.block(new_bb).terminator() else { continue };
        let Instruction::Ret { value } = f.inst(term) else { continue };
        let ret_value = *value;
        let f = module.function_mut(fid);
        retract_own_uses(f, term);
        f.block_mut(new_bb).insts.pop();
        f.push_inst(new_bb, Instruction::Br { target: after });
        f.block_mut(new_bb).succs = vec![after];
        f.block_mut(after).preds.push(new_bb);
        return_pairs.push((new_bb, ret_value));
    }

    if let Some(dest) = call_dest {
        if return_pairs.len() == 1 && return_pairs[0].1.is_some() {
            // A single return path: no phi needed, RAUW straight to the
            // returned value.
            let value = return_pairs[0].1.unwrap();
            module.function_mut(fid).replace_all_uses_with(dest, value);
        } else {
            let incoming: Vec<PhiIncoming> = return_pairs
                .iter()
                .map(|&(bb, v)| PhiIncoming { value: v.expect("non-void callee must return a value on every path"), pred: bb })
                .collect();
            let phi_dest = prepend_phi_at(module.function_mut(fid), after, call_ty, incoming);
            module.function_mut(fid).replace_all_uses_with(dest, phi_dest);
        }
    }

    let f = module.function_mut(fid);
    f.erase_inst(call_block, call_inst);
    crate::analysis::compute_cfg(f);
}

/// Splits `block` into `block | after`, moving every instruction from
/// (and including) `after_inst`'s successor onward into the new block.
/// `after_inst` (the call) stays in `block` for now; the caller erases it
/// once the call's result has been replaced.
fn split_block_after(module: &mut Module, fid: FuncId, block: BlockId, after_inst: InstId) -> BlockId {
    let new_block = module.function_mut(fid).add_block(crate::ir::BasicBlock::with_label(format!("{block}.cont")));
    let f = module.function_mut(fid);
    let pos = f.block(block).insts.iter().position(|&i| i == after_inst).expect("call instruction must be in its block");
    let tail: Vec<InstId> = f.block_mut(block).insts.split_off(pos + 1);
    for inst_id in tail {
        f.block_mut(new_block).insts.push(inst_id);
    }
    let succs = f.block(block).succs.clone();
    f.block_mut(new_block).succs = succs.clone();
    for s in succs {
        f.block_mut(s).preds.retain(|&p| p != block);
        f.block_mut(s).preds.push(new_block);
        retarget_phi_pred(f, s, block, new_block);
    }
    f.block_mut(block).succs.clear();
    new_block
}

fn prepend_phi_at(f: &mut Function, block: BlockId, ty: Type, incoming: Vec<PhiIncoming>) -> crate::ir::ValueId {
    let (phi_id, dest) = f.prepend_phi(block, ty);
    for inc in incoming {
        f.add_phi_incoming(phi_id, inc.value, inc.pred);
    }
    dest
}

fn retract_own_uses(f: &mut Function, inst_id: InstId) {
    for (slot, operand) in f.inst(inst_id).operand_slots().into_iter().enumerate() {
        if f.value(operand).tracks_uses() {
            f.value_mut(operand).use_list.retain(|u| !(u.user == inst_id && u.slot as usize == slot));
        }
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
