//! The one `Result`-returning public surface: [`VerifyError`], reported by
//! [`crate::ir::verify`] for external tooling. Everything else in this
//! crate either panics on an internal invariant violation or returns
//! `changed: bool` from a transform that found nothing to do — see
//! DESIGN.md for the rationale.

use crate::ir::{BlockId, FuncId, InstId, ValueId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("function {0}: block {1} has no terminator")]
    MissingTerminator(FuncId, BlockId),

    #[error("function {0}: block {1} has an instruction after its terminator")]
    InstructionAfterTerminator(FuncId, BlockId),

    #[error("function {0}: phi {1} in block {2} does not have exactly one incoming value per predecessor")]
    PhiIncomingMismatch(FuncId, InstId, BlockId),

    #[error("function {0}: phi {1} is not in the leading-phis prefix of block {2}")]
    PhiNotInPrefix(FuncId, InstId, BlockId),

    #[error("function {0}: instruction {1} uses value {2} which is not defined anywhere")]
    UseOfUndefinedValue(FuncId, InstId, ValueId),

    #[error("function {0}: instruction {1} uses value {2} defined in a block that does not dominate it")]
    UseNotDominatedByDef(FuncId, InstId, ValueId),

    #[error("function {0}: value {1} records a use at instruction {2} slot {3} that does not reference it")]
    DanglingUseEntry(FuncId, ValueId, InstId, u8),

    #[error("function {0}: block {1} claims predecessor {2} which does not branch to it")]
    InconsistentCfgEdge(FuncId, BlockId, BlockId),
}

/// The full set of violations `verify` found. Empty means the module is
/// well-formed; callers that want fail-fast behavior can call
/// `report.into_result()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub errors: Vec<VerifyError>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), VerifyReport> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for e in &self.errors {
            writeln!(f, "{e}")?;
        }
        Ok(())
    }
}
