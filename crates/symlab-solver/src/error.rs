use thiserror::Error;

use symlab_ir::IrError;

/// Errors surfaced by the solver façade.
///
/// `UnknownSolution` and `Backtrack` are meant to be handled by the search
/// driver; the remaining variants indicate a coverage gap, a corrupted
/// operation stream, or bad setup and should terminate the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("Satisfiability unknown: {0}")]
    UnknownSolution(String),
    #[error("Unsupported construct: {0}")]
    Unsupported(String),
    #[error("Labeling impossible: {0}")]
    LabelingImpossible(String),
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Cannot backtrack {requested} level(s) from level {level}")]
    Backtrack { requested: usize, level: usize },
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<IrError> for SolverError {
    fn from(e: IrError) -> Self {
        SolverError::InvalidOperation(e.to_string())
    }
}

pub type SolverResult<T> = Result<T, SolverError>;
