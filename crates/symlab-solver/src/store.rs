//! Leveled constraint and entity-representation store.
//!
//! Level `0` is the root scope; every backtracking point opens one scope on
//! top. A scope owns the constraints committed at its level, the entity
//! representations first copied to its level, and the operation-log length
//! at the time it was opened. Popping a scope discards all three, so the
//! next-older representation of every entity becomes current again.
//!
//! In [`ScopeMode::GlobalLearning`] no native scope is ever opened: each
//! level gets an enforcement literal, constraints above the root are
//! asserted as `guard => c`, and checks assume the guards of the open
//! levels. Popped guards are retired by asserting their negation.

use std::collections::HashMap;

use tracing::debug;

use symlab_ir::{Constraint, EntityId, ObjectOp, SymVar};

use crate::config::{ScopeMode, SolverOptions};
use crate::error::{SolverError, SolverResult};
use crate::oplog::OpLog;
use crate::solver::{Backend, SatResult};
use crate::theory::Representation;

#[derive(Debug, Default)]
struct Scope {
    guard: Option<SymVar>,
    /// Original constraints, only kept for debug dumps.
    constraints: Vec<Constraint>,
    created: Vec<EntityId>,
    ops_start: usize,
}

pub struct ScopedStore<B: Backend> {
    backend: B,
    mode: ScopeMode,
    keep_original: bool,
    scopes: Vec<Scope>,
    /// Representation stack per entity as `(level, repr)`, newest last.
    reprs: HashMap<EntityId, Vec<(usize, Representation)>>,
    ops: OpLog,
    next_guard: u32,
}

impl<B: Backend> ScopedStore<B> {
    pub fn new(backend: B, options: &SolverOptions) -> Self {
        Self {
            backend,
            mode: options.scope_mode,
            keep_original: options.keep_original_constraints,
            scopes: vec![Scope::default()],
            reprs: HashMap::new(),
            ops: OpLog::new(),
            next_guard: 0,
        }
    }

    pub fn level(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn ops(&self) -> &OpLog {
        &self.ops
    }

    pub fn log_op(&mut self, op: ObjectOp) {
        self.ops.push(op);
    }

    /// Translate `c` without asserting it, so unsupported shapes surface
    /// before anything else changes.
    pub fn validate(&mut self, c: &Constraint) -> SolverResult<()> {
        self.backend
            .translate_constraint(c)
            .map(drop)
            .map_err(Into::into)
    }

    fn fresh_guard(&mut self) -> SymVar {
        let guard = SymVar::guard(self.next_guard);
        self.next_guard += 1;
        guard
    }

    fn assert_constraint(&mut self, c: &Constraint) -> SolverResult<()> {
        let term = self.backend.translate_constraint(c).map_err(Into::into)?;
        self.backend.assert(&term).map_err(Into::into)
    }

    /// Open a new level and commit `c` to it.
    pub fn push_level(&mut self, c: Constraint) -> SolverResult<()> {
        let guard = match self.mode {
            ScopeMode::Incremental => {
                self.backend.push_scope().map_err(Into::into)?;
                None
            }
            ScopeMode::GlobalLearning => Some(self.fresh_guard()),
        };
        self.scopes.push(Scope {
            guard,
            ops_start: self.ops.len(),
            ..Scope::default()
        });
        debug!(level = self.level(), "pushed backtracking point");
        self.add_constraint(c)
    }

    /// Conjoin `c` into the current level.
    pub fn add_constraint(&mut self, c: Constraint) -> SolverResult<()> {
        if c.is_true() {
            return Ok(());
        }
        let guard = self.scopes.last().and_then(|s| s.guard);
        match guard {
            Some(g) => self.assert_constraint(&Constraint::var(g).implies(c.clone()))?,
            None => self.assert_constraint(&c)?,
        }
        if self.keep_original {
            if let Some(scope) = self.scopes.last_mut() {
                scope.constraints.push(c);
            }
        }
        Ok(())
    }

    /// Drop the `n` newest levels with their constraints, representations,
    /// and logged operations.
    pub fn pop_levels(&mut self, n: usize) -> SolverResult<()> {
        let level = self.level();
        if n > level {
            return Err(SolverError::Backtrack {
                requested: n,
                level,
            });
        }
        if n == 0 {
            return Ok(());
        }
        if self.mode == ScopeMode::Incremental {
            self.backend.pop_scopes(n).map_err(Into::into)?;
        }
        let popped = self.scopes.split_off(self.scopes.len() - n);
        for scope in popped.iter().rev() {
            for id in &scope.created {
                if let Some(stack) = self.reprs.get_mut(id) {
                    stack.pop();
                    if stack.is_empty() {
                        self.reprs.remove(id);
                    }
                }
            }
            if let Some(g) = scope.guard {
                self.assert_constraint(&Constraint::var(g).not())?;
            }
        }
        if let Some(oldest) = popped.first() {
            self.ops.truncate(oldest.ops_start);
        }
        debug!(level = self.level(), popped = n, "backtracked");
        Ok(())
    }

    /// Newest representation of `id` visible at the current level.
    pub fn current_representation(&self, id: EntityId) -> Option<&Representation> {
        self.reprs
            .get(&id)
            .and_then(|stack| stack.last())
            .map(|(_, repr)| repr)
    }

    /// Representation of `id` owned by the current level, copying the newest
    /// older one forward first. `None` if the entity was never represented.
    pub fn representation_for_update(&mut self, id: EntityId) -> Option<&mut Representation> {
        let level = self.level();
        let stack = self.reprs.get_mut(&id)?;
        let (top_level, top) = stack.last()?;
        if *top_level != level {
            let copy = top.clone();
            stack.push((level, copy));
            if let Some(scope) = self.scopes.last_mut() {
                scope.created.push(id);
            }
        }
        stack.last_mut().map(|(_, repr)| repr)
    }

    /// Install `repr` as the current level's representation of `id`,
    /// replacing one created at this level.
    pub fn insert_representation(&mut self, id: EntityId, repr: Representation) {
        let level = self.level();
        let stack = self.reprs.entry(id).or_default();
        let owned_here = matches!(stack.last(), Some((top_level, _)) if *top_level == level);
        if owned_here {
            if let Some(top) = stack.last_mut() {
                top.1 = repr;
            }
        } else {
            stack.push((level, repr));
            if let Some(scope) = self.scopes.last_mut() {
                scope.created.push(id);
            }
        }
    }

    fn guard_assumptions(&mut self, extra: &[B::Bool]) -> SolverResult<Vec<B::Bool>> {
        let guards: Vec<SymVar> = self.scopes.iter().filter_map(|s| s.guard).collect();
        let mut assumptions = Vec::with_capacity(guards.len() + extra.len());
        for g in guards {
            assumptions.push(
                self.backend
                    .translate_constraint(&Constraint::var(g))
                    .map_err(Into::into)?,
            );
        }
        assumptions.extend(extra.iter().cloned());
        Ok(assumptions)
    }

    /// Check everything committed so far.
    pub fn check(&mut self) -> SolverResult<SatResult> {
        let assumptions = self.guard_assumptions(&[])?;
        let result = self.backend.check(&assumptions).map_err(Into::into)?;
        debug!(level = self.level(), ?result, "checked satisfiability");
        Ok(result)
    }

    /// Check everything committed so far together with `c`, leaving no trace
    /// of `c` behind.
    pub fn probe(&mut self, c: &Constraint) -> SolverResult<SatResult> {
        match self.mode {
            ScopeMode::Incremental => {
                self.backend.push_scope().map_err(Into::into)?;
                let checked = self
                    .assert_constraint(c)
                    .and_then(|()| self.check());
                self.backend.pop_scopes(1).map_err(Into::into)?;
                checked
            }
            ScopeMode::GlobalLearning => {
                let probe = self.fresh_guard();
                self.assert_constraint(&Constraint::var(probe).implies(c.clone()))?;
                let literal = self
                    .backend
                    .translate_constraint(&Constraint::var(probe))
                    .map_err(Into::into)?;
                let checked = self.guard_assumptions(&[literal]).and_then(|assumptions| {
                    self.backend.check(&assumptions).map_err(Into::into)
                });
                self.assert_constraint(&Constraint::var(probe).not())?;
                checked
            }
        }
    }

    /// Original constraints per level, root first. Empty unless original
    /// constraint bookkeeping is enabled.
    pub fn original_constraints(&self) -> Vec<Vec<Constraint>> {
        self.scopes.iter().map(|s| s.constraints.clone()).collect()
    }

    pub fn keeps_original_constraints(&self) -> bool {
        self.keep_original
    }

    /// Back to an empty root scope; the backend drops all native state.
    pub fn reset(&mut self) -> SolverResult<()> {
        self.backend.reset().map_err(Into::into)?;
        self.scopes = vec![Scope::default()];
        self.reprs.clear();
        self.ops.clear();
        self.next_guard = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::finite_domain::FiniteDomainBackend;
    use crate::config::DomainBounds;
    use crate::theory::ObjectRepr;
    use symlab_ir::{ClassInfo, NumExpr, ScalarKind, ValueType};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn store(mode: ScopeMode) -> ScopedStore<FiniteDomainBackend> {
        let options = SolverOptions {
            scope_mode: mode,
            keep_original_constraints: true,
            ..SolverOptions::default()
        };
        ScopedStore::new(FiniteDomainBackend::new(DomainBounds::default()), &options)
    }

    fn x() -> NumExpr {
        NumExpr::var(SymVar::new(0, ScalarKind::Int))
    }

    fn object_repr() -> Representation {
        let class = ClassInfo::builder("Cell").field("v", ValueType::int()).build();
        Representation::Object(ObjectRepr::new(class, false))
    }

    #[test]
    fn levels_follow_push_and_pop() -> TestResult {
        for mode in [ScopeMode::Incremental, ScopeMode::GlobalLearning] {
            let mut s = store(mode);
            assert_eq!(s.level(), 0);
            s.push_level(x().gt(NumExpr::int(0)))?;
            s.push_level(Constraint::TRUE)?;
            assert_eq!(s.level(), 2);
            s.pop_levels(2)?;
            assert_eq!(s.level(), 0);
            assert_eq!(
                s.pop_levels(1),
                Err(SolverError::Backtrack {
                    requested: 1,
                    level: 0
                })
            );
        }
        Ok(())
    }

    #[test]
    fn popped_constraints_stop_applying() -> TestResult {
        for mode in [ScopeMode::Incremental, ScopeMode::GlobalLearning] {
            let mut s = store(mode);
            s.add_constraint(x().gt(NumExpr::int(0)))?;
            s.push_level(x().lt(NumExpr::int(0)))?;
            assert_eq!(s.check()?, SatResult::Unsat);
            s.pop_levels(1)?;
            assert_eq!(s.check()?, SatResult::Sat);
        }
        Ok(())
    }

    #[test]
    fn probe_leaves_no_trace() -> TestResult {
        for mode in [ScopeMode::Incremental, ScopeMode::GlobalLearning] {
            let mut s = store(mode);
            s.add_constraint(x().ge(NumExpr::int(3)))?;
            assert_eq!(s.probe(&x().lt(NumExpr::int(3)))?, SatResult::Unsat);
            assert_eq!(s.probe(&x().eq(NumExpr::int(4)))?, SatResult::Sat);
            assert_eq!(s.check()?, SatResult::Sat);
            assert_eq!(s.level(), 0);
        }
        Ok(())
    }

    #[test]
    fn representations_copy_forward_and_pop_back() -> TestResult {
        let mut s = store(ScopeMode::Incremental);
        let id = EntityId(0);
        assert!(s.current_representation(id).is_none());
        s.insert_representation(id, object_repr());

        s.push_level(Constraint::TRUE)?;
        if let Some(Representation::Object(o)) = s.representation_for_update(id) {
            o.fields.insert("v".into(), symlab_ir::SymValue::int(9));
        }
        let updated = s.current_representation(id).cloned();
        assert_ne!(updated, Some(object_repr()));

        s.pop_levels(1)?;
        assert_eq!(s.current_representation(id), Some(&object_repr()));
        Ok(())
    }

    #[test]
    fn original_constraints_are_kept_per_level() -> TestResult {
        let mut s = store(ScopeMode::Incremental);
        s.add_constraint(x().gt(NumExpr::int(0)))?;
        s.push_level(x().lt(NumExpr::int(10)))?;
        s.add_constraint(Constraint::TRUE)?;
        let levels = s.original_constraints();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[1], vec![x().lt(NumExpr::int(10))]);
        Ok(())
    }
}
