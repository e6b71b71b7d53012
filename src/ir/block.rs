//! [`BasicBlock`]: an ordered list of instructions ending in a terminator,
//! plus the predecessor/successor edges analyses key off of.

use crate::ir::ids::{BlockId, InstId};

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Instructions in program order. Every non-`Phi` block's `Phi`
    /// instructions (if any) are a prefix of this list, per spec.md §4.1's
    /// "phis come first" well-formedness rule.
    pub insts: Vec<InstId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Debug label only; never consulted for identity or equality.
    pub label: Option<Box<str>>,
}

impl BasicBlock {
    pub fn new() -> Self {
        BasicBlock::default()
    }

    pub fn with_label(label: impl Into<Box<str>>) -> Self {
        BasicBlock { label: Some(label.into()), ..BasicBlock::default() }
    }

    pub fn terminator(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    pub fn push(&mut self, inst: InstId) {
        self.insts.push(inst);
    }

    /// Inserts `inst` immediately before `before`, or at the end if
    /// `before` is not present. Used by Mem2Reg/SROA to splice a fresh
    /// `Phi` at the block head, and by LICM to splice a hoisted
    /// instruction ahead of an existing one in the preheader.
    pub fn insert_before(&mut self, before: InstId, inst: InstId) {
        match self.insts.iter().position(|&i| i == before) {
            Some(pos) => self.insts.insert(pos, inst),
            None => self.insts.push(inst),
        }
    }

    pub fn remove(&mut self, inst: InstId) {
        self.insts.retain(|&i| i != inst);
    }

    /// The prefix of leading `Phi` instructions, given a lookup closure
    /// (callers already own the `Module`'s instruction store, so this
    /// stays storage-agnostic rather than borrowing a `Module` directly).
    pub fn phi_count(&self, is_phi: impl Fn(InstId) -> bool) -> usize {
        self.insts.iter().take_while(|&&i| is_phi(i)).count()
    }
}
