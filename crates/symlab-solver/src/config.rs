use serde::{Deserialize, Serialize};
use tracing::warn;

use symlab_ir::ScalarKind;

use crate::error::{SolverError, SolverResult};
use crate::solver::BackendCapabilities;

/// How backtracking points reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScopeMode {
    /// Native push/pop per level.
    #[default]
    Incremental,
    /// One enforcement literal per level, passed as assumptions. Nothing is
    /// ever popped natively, so learned lemmas survive backtracking.
    GlobalLearning,
}

/// Inclusive `(lo, hi)` domain per scalar kind, applied whenever a fresh
/// backend variable is spawned. Booleans are always `(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainBounds {
    pub byte: (i64, i64),
    pub short: (i64, i64),
    pub char: (i64, i64),
    pub int: (i64, i64),
    pub long: (i64, i64),
}

impl Default for DomainBounds {
    fn default() -> Self {
        Self {
            byte: ScalarKind::Byte.natural_bounds(),
            short: ScalarKind::Short.natural_bounds(),
            char: ScalarKind::Char.natural_bounds(),
            int: ScalarKind::Int.natural_bounds(),
            long: ScalarKind::Long.natural_bounds(),
        }
    }
}

impl DomainBounds {
    pub fn for_kind(&self, kind: ScalarKind) -> (i64, i64) {
        match kind {
            ScalarKind::Bool => (0, 1),
            ScalarKind::Byte => self.byte,
            ScalarKind::Short => self.short,
            ScalarKind::Char => self.char,
            ScalarKind::Int => self.int,
            ScalarKind::Long => self.long,
        }
    }

    pub fn with(mut self, kind: ScalarKind, lo: i64, hi: i64) -> Self {
        match kind {
            ScalarKind::Bool => warn!("boolean domain is fixed to (0, 1); ignoring override"),
            ScalarKind::Byte => self.byte = (lo, hi),
            ScalarKind::Short => self.short = (lo, hi),
            ScalarKind::Char => self.char = (lo, hi),
            ScalarKind::Int => self.int = (lo, hi),
            ScalarKind::Long => self.long = (lo, hi),
        }
        self
    }
}

/// Options for one solver manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub scope_mode: ScopeMode,
    /// Model arrays and objects through the high-level object theory.
    pub object_theory: bool,
    pub domain: DomainBounds,
    /// Native solver timeout per check; 0 disables it.
    pub timeout_ms: u64,
    /// Search-node budget for the finite-domain backend.
    pub search_node_budget: u64,
    /// Keep the original constraints per level for `dump_smtlib`.
    pub keep_original_constraints: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            scope_mode: ScopeMode::Incremental,
            object_theory: true,
            domain: DomainBounds::default(),
            timeout_ms: 0,
            search_node_budget: 1_000_000,
            keep_original_constraints: false,
        }
    }
}

impl SolverOptions {
    /// Reject option combinations the given backend cannot honor.
    pub fn validate(&self, caps: BackendCapabilities) -> SolverResult<()> {
        if !self.object_theory && !caps.native_arrays {
            return Err(SolverError::Misconfiguration(
                "the high-level object theory is disabled but the backend has no native array/record support"
                    .into(),
            ));
        }
        if self.scope_mode == ScopeMode::Incremental && !caps.native_scopes {
            return Err(SolverError::Misconfiguration(
                "incremental scope mode requires a backend with native push/pop".into(),
            ));
        }
        for kind in ScalarKind::ALL {
            let (lo, hi) = self.domain.for_kind(kind);
            if lo > hi {
                return Err(SolverError::Misconfiguration(format!(
                    "empty domain ({lo}, {hi}) for {kind}"
                )));
            }
        }
        Ok(())
    }
}
