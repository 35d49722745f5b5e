//! Enumeration of distinct solutions by negating the latest labeling.

use std::collections::HashSet;

use tracing::{debug, info};

use symlab_ir::{Constraint, EntityId, EntityShape, NumExpr, ObjectOp, SlotKey, SymValue};

use crate::error::SolverResult;
use crate::labels::{Label, Solution};
use crate::manager::IncrementalSolver;
use crate::solver::Backend;

impl<B: Backend> IncrementalSolver<B> {
    /// "`e` takes a value other than its current label", or `None` if `e` is
    /// concrete.
    fn num_differs(&mut self, e: &NumExpr) -> SolverResult<Option<Constraint>> {
        if e.is_concrete() {
            return Ok(None);
        }
        let value = self.eval_num(e)?;
        Ok(Some(e.clone().ne(NumExpr::lit(e.kind(), value))))
    }

    fn value_differs(
        &mut self,
        value: &SymValue,
        snapshot: Option<usize>,
        visited: &mut HashSet<(Option<usize>, EntityId)>,
    ) -> SolverResult<Option<Constraint>> {
        match value {
            SymValue::Null => Ok(None),
            SymValue::Num(e) => self.num_differs(e),
            SymValue::Bool(c) if c.is_concrete() => Ok(None),
            SymValue::Bool(c) => {
                let current = match self.label_value(value, None, snapshot)? {
                    Label::Bool(b) => b,
                    _ => false,
                };
                Ok(Some(c.clone().xor(Constraint::Lit(current))))
            }
            SymValue::Entity(id) => self.entity_differs(*id, snapshot, visited),
        }
    }

    fn entity_differs(
        &mut self,
        id: EntityId,
        snapshot: Option<usize>,
        visited: &mut HashSet<(Option<usize>, EntityId)>,
    ) -> SolverResult<Option<Constraint>> {
        if !visited.insert((snapshot, id)) {
            return Ok(None);
        }
        let entity = self.entities.get(id)?.clone();
        let ident = self.label_ident(&entity)?;
        let mut parts = Vec::new();
        if !entity.ident.is_concrete() {
            // identities are only observable through null-ness and sharing
            let null = NumExpr::lit(entity.ident.kind(), 0);
            parts.push(if ident == 0 {
                entity.ident.clone().ne(null)
            } else {
                entity.ident.clone().eq(null)
            });
        }
        if ident == 0 {
            return Ok(any_differs(parts));
        }
        if let EntityShape::Array { length, .. } = &entity.shape {
            if let Some(c) = self.num_differs(length)? {
                parts.push(c);
            }
        }

        let group = self.alias_group(&entity, ident)?;
        for member in &group {
            visited.insert((snapshot, member.id));
        }
        let ops = self.effective_ops(&group, snapshot)?;
        let mut touched: Vec<(Option<NumExpr>, SymValue)> = Vec::new();
        for member in &group {
            let initialized = ops
                .iter()
                .any(|op| op.is_init() && op.target() == Some(member.id));
            if initialized {
                continue;
            }
            for (slot, value) in &member.cached {
                let index = match slot {
                    SlotKey::Index(i) => Some(NumExpr::int(*i)),
                    SlotKey::Field(_) => None,
                };
                touched.push((index, value.clone()));
            }
        }
        for op in ops {
            match op {
                ObjectOp::InitArray {
                    length, initial, ..
                } => {
                    if let Some(c) = self.num_differs(&length)? {
                        parts.push(c);
                    }
                    touched.extend(initial.into_iter().map(|(i, v)| (Some(i), v)));
                }
                ObjectOp::InitObject { initial, .. } => {
                    touched.extend(initial.into_iter().map(|(_, v)| (None, v)));
                }
                ObjectOp::Select { index, value, .. } | ObjectOp::Store { index, value, .. } => {
                    touched.push((Some(index), value))
                }
                ObjectOp::GetField { value, .. } | ObjectOp::PutField { value, .. } => {
                    touched.push((None, value))
                }
                ObjectOp::Remember { .. } => {}
            }
        }
        for (index, value) in touched {
            if let Some(index) = index {
                if let Some(c) = self.num_differs(&index)? {
                    parts.push(c);
                }
            }
            if let Some(c) = self.value_differs(&value, snapshot, visited)? {
                parts.push(c);
            }
        }
        Ok(any_differs(parts))
    }

    /// Disjunction over every named and remembered value of `solution`.
    /// `None` when nothing in it can take another value.
    fn solution_differs(&mut self, solution: &Solution) -> SolverResult<Option<Constraint>> {
        let mut visited = HashSet::new();
        let mut parts = Vec::new();
        for (_, lv) in solution.labels.iter() {
            if let Some(c) = self.value_differs(&lv.value, lv.snapshot, &mut visited)? {
                parts.push(c);
            }
        }
        Ok(any_differs(parts))
    }

    /// Up to `n` distinct solutions, `initial` first. `initial` must label
    /// the current state. Every backtracking point opened here is closed
    /// again before returning, also on error.
    pub fn up_to_n_solutions(&mut self, initial: &Solution, n: usize) -> SolverResult<Vec<Solution>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let start_level = self.level();
        let mut found = vec![initial.clone()];
        let outcome = self.enumerate_into(initial, n, &mut found);
        let opened = self.level().saturating_sub(start_level);
        let restored = self.backtrack(opened);
        outcome?;
        restored?;
        info!(
            requested = n,
            found = found.len(),
            "solution enumeration finished"
        );
        Ok(found)
    }

    fn enumerate_into(
        &mut self,
        initial: &Solution,
        n: usize,
        found: &mut Vec<Solution>,
    ) -> SolverResult<()> {
        let returned = initial.returned.value.clone();
        let named: Vec<(String, SymValue)> = initial
            .labels
            .iter()
            .filter(|(_, lv)| lv.snapshot.is_none())
            .map(|(name, lv)| (name.to_string(), lv.value.clone()))
            .collect();
        let mut seen = HashSet::from([initial.labels.fingerprint()]);
        let mut latest = initial.clone();
        // Rounds that only revisit a known labeling still exclude a model,
        // so they make progress; the cap bounds pathological cases.
        let max_rounds = n.saturating_mul(4).saturating_add(16);
        for _ in 0..max_rounds {
            if found.len() >= n {
                break;
            }
            self.require_model()?;
            let Some(differs) = self.solution_differs(&latest)? else {
                debug!("no named value can change");
                break;
            };
            self.add_constraint_after_new_backtracking_point(differs)?;
            self.stats.enumeration_rounds += 1;
            if !self.is_satisfiable()? {
                break;
            }
            let next = self.label_solution(&returned, &named)?;
            if seen.insert(next.labels.fingerprint()) {
                found.push(next.clone());
            }
            latest = next;
        }
        Ok(())
    }
}

/// `None` for an empty disjunction: nothing can differ.
fn any_differs(parts: Vec<Constraint>) -> Option<Constraint> {
    match Constraint::any(parts) {
        Constraint::Lit(false) => None,
        c => Some(c),
    }
}
