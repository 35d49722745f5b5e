use symlab_ir::{Constraint, NumExpr};

use crate::error::SolverError;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

/// What a backend can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Native push/pop of assertion scopes.
    pub native_scopes: bool,
    /// Native array/record theory.
    pub native_arrays: bool,
}

/// Translator from the constraint AST to one native solver.
///
/// Translation is memoized per node: translating a structurally equal node
/// twice returns the identical native handle. Shapes the backend cannot
/// express fail with an error that converts into
/// [`SolverError::Unsupported`] instead of being approximated.
pub trait Backend {
    type Bool: Clone;
    type Num: Clone;
    type Model;
    type Error: std::error::Error + Into<SolverError>;

    fn capabilities(&self) -> BackendCapabilities;

    fn translate_constraint(&mut self, c: &Constraint) -> Result<Self::Bool, Self::Error>;

    fn translate_expression(&mut self, e: &NumExpr) -> Result<Self::Num, Self::Error>;

    /// Assert into the innermost native scope.
    fn assert(&mut self, term: &Self::Bool) -> Result<(), Self::Error>;

    /// Open a native scope. Only called when `capabilities().native_scopes`.
    fn push_scope(&mut self) -> Result<(), Self::Error>;

    /// Close `n` native scopes.
    fn pop_scopes(&mut self, n: usize) -> Result<(), Self::Error>;

    /// Check satisfiability of everything asserted plus `assumptions`.
    fn check(&mut self, assumptions: &[Self::Bool]) -> Result<SatResult, Self::Error>;

    /// Model of the last `Sat` check.
    fn model(&mut self) -> Result<Option<Self::Model>, Self::Error>;

    /// Value of a numeric term under `model`; unconstrained leaves complete
    /// to a value inside their domain.
    fn eval_num(&mut self, model: &Self::Model, term: &Self::Num) -> Result<i64, Self::Error>;

    fn eval_bool(&mut self, model: &Self::Model, term: &Self::Bool) -> Result<bool, Self::Error>;

    /// Drop every assertion, scope, and memoized translation.
    fn reset(&mut self) -> Result<(), Self::Error>;
}
