use std::collections::HashMap;

use thiserror::Error;
use z3::ast::{Bool, Int};
use z3::SatResult as Z3SatResult;

use symlab_ir::{Constraint, NumExpr, SymVar};

use crate::config::{DomainBounds, SolverOptions};
use crate::error::SolverError;
use crate::solver::{Backend, BackendCapabilities, SatResult};

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Sort mismatch for variable {0}")]
    SortMismatch(String),
}

impl From<Z3Error> for SolverError {
    fn from(e: Z3Error) -> Self {
        match e {
            Z3Error::SortMismatch(_) => SolverError::Unsupported(e.to_string()),
            Z3Error::Internal(msg) => SolverError::Backend(msg),
        }
    }
}

/// Z3 over unbounded integers. Every program variable carries its domain
/// bounds; those are asserted in a scratch scope around each check so they
/// never interfere with the caller's scopes.
pub struct Z3Backend {
    solver: z3::Solver,
    domain: DomainBounds,
    int_vars: HashMap<SymVar, Int>,
    bool_vars: HashMap<SymVar, Bool>,
    bool_memo: HashMap<Constraint, Bool>,
    num_memo: HashMap<NumExpr, Int>,
    domain_axioms: Vec<Bool>,
    last_model: Option<z3::Model>,
    params: Option<z3::Params>,
}

impl Z3Backend {
    pub fn new(domain: DomainBounds) -> Self {
        Self {
            solver: z3::Solver::new(),
            domain,
            int_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            bool_memo: HashMap::new(),
            num_memo: HashMap::new(),
            domain_axioms: Vec::new(),
            last_model: None,
            params: None,
        }
    }

    pub fn from_options(options: &SolverOptions) -> Self {
        let mut backend = Self::new(options.domain);
        if options.timeout_ms > 0 {
            let mut params = z3::Params::new();
            let timeout_ms = u32::try_from(options.timeout_ms).unwrap_or(u32::MAX);
            params.set_u32("timeout", timeout_ms);
            backend.solver.set_params(&params);
            backend.params = Some(params);
        }
        backend
    }

    fn int_var(&mut self, v: SymVar) -> Result<Int, Z3Error> {
        if v.kind.is_bool() {
            return Err(Z3Error::SortMismatch(v.name()));
        }
        if let Some(existing) = self.int_vars.get(&v) {
            return Ok(existing.clone());
        }
        let var = Int::new_const(v.name());
        let (lo, hi) = self.domain.for_kind(v.kind);
        self.domain_axioms.push(Int::from_i64(lo).le(&var));
        self.domain_axioms.push(var.le(&Int::from_i64(hi)));
        self.int_vars.insert(v, var.clone());
        Ok(var)
    }

    fn bool_var(&mut self, v: SymVar) -> Result<Bool, Z3Error> {
        if !v.kind.is_bool() {
            return Err(Z3Error::SortMismatch(v.name()));
        }
        Ok(self
            .bool_vars
            .entry(v)
            .or_insert_with(|| Bool::new_const(v.name()))
            .clone())
    }

    /// Java-style quotient: truncation toward zero, built from Z3's
    /// Euclidean `div`.
    fn trunc_div(a: &Int, b: &Int) -> Int {
        let zero = Int::from_i64(0);
        let neg_a = a.unary_minus();
        let neg_b = b.unary_minus();
        let a_pos = a.ge(&zero);
        let b_pos = b.ge(&zero);
        a_pos.ite(
            &b_pos.ite(&(a / b), &(a / &neg_b).unary_minus()),
            &b_pos.ite(&(&neg_a / b).unary_minus(), &(&neg_a / &neg_b)),
        )
    }

    fn num(&mut self, e: &NumExpr) -> Result<Int, Z3Error> {
        if let Some(t) = self.num_memo.get(e) {
            return Ok(t.clone());
        }
        let term = match e {
            NumExpr::Lit { value, .. } => Int::from_i64(*value),
            NumExpr::Var(v) => self.int_var(*v)?,
            NumExpr::Sum(l, r) => &self.num(l)? + &self.num(r)?,
            NumExpr::Sub(l, r) => &self.num(l)? - &self.num(r)?,
            NumExpr::Mul(l, r) => &self.num(l)? * &self.num(r)?,
            NumExpr::Div(l, r) => Self::trunc_div(&self.num(l)?, &self.num(r)?),
            NumExpr::Mod(l, r) => {
                let (a, b) = (self.num(l)?, self.num(r)?);
                let q = Self::trunc_div(&a, &b);
                &a - &(&b * &q)
            }
            NumExpr::Neg(inner) => self.num(inner)?.unary_minus(),
            NumExpr::Ite(c, t, el) => {
                let cond = self.bool(c)?;
                cond.ite(&self.num(t)?, &self.num(el)?)
            }
        };
        self.num_memo.insert(e.clone(), term.clone());
        Ok(term)
    }

    fn bool(&mut self, c: &Constraint) -> Result<Bool, Z3Error> {
        if let Some(t) = self.bool_memo.get(c) {
            return Ok(t.clone());
        }
        let term = match c {
            Constraint::Lit(b) => Bool::from_bool(*b),
            Constraint::Var(v) => self.bool_var(*v)?,
            Constraint::Not(inner) => self.bool(inner)?.not(),
            Constraint::And(ts) => {
                let parts = ts.iter().map(|t| self.bool(t)).collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&Bool> = parts.iter().collect();
                Bool::and(&refs)
            }
            Constraint::Or(ts) => {
                let parts = ts.iter().map(|t| self.bool(t)).collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&Bool> = parts.iter().collect();
                Bool::or(&refs)
            }
            Constraint::Xor(l, r) => self.bool(l)?.xor(&self.bool(r)?),
            Constraint::Implies(l, r) => self.bool(l)?.implies(&self.bool(r)?),
            Constraint::Eq(l, r) => self.num(l)?.eq(&self.num(r)?),
            Constraint::Lt(l, r) => self.num(l)?.lt(&self.num(r)?),
            Constraint::Lte(l, r) => self.num(l)?.le(&self.num(r)?),
        };
        self.bool_memo.insert(c.clone(), term.clone());
        Ok(term)
    }
}

impl Backend for Z3Backend {
    type Bool = Bool;
    type Num = Int;
    type Model = z3::Model;
    type Error = Z3Error;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            native_scopes: true,
            native_arrays: false,
        }
    }

    fn translate_constraint(&mut self, c: &Constraint) -> Result<Bool, Z3Error> {
        self.bool(c)
    }

    fn translate_expression(&mut self, e: &NumExpr) -> Result<Int, Z3Error> {
        self.num(e)
    }

    fn assert(&mut self, term: &Bool) -> Result<(), Z3Error> {
        self.solver.assert(term);
        Ok(())
    }

    fn push_scope(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop_scopes(&mut self, n: usize) -> Result<(), Z3Error> {
        let n = u32::try_from(n).map_err(|_| Z3Error::Internal(format!("cannot pop {n} scopes")))?;
        self.solver.pop(n);
        Ok(())
    }

    fn check(&mut self, assumptions: &[Bool]) -> Result<SatResult, Z3Error> {
        self.last_model = None;
        self.solver.push();
        for axiom in &self.domain_axioms {
            self.solver.assert(axiom);
        }
        let result = match self.solver.check_assumptions(assumptions) {
            Z3SatResult::Sat => {
                self.last_model = Some(
                    self.solver
                        .get_model()
                        .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?,
                );
                SatResult::Sat
            }
            Z3SatResult::Unsat => SatResult::Unsat,
            Z3SatResult::Unknown => SatResult::Unknown(
                self.solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "Z3 returned unknown".into()),
            ),
        };
        self.solver.pop(1);
        Ok(result)
    }

    fn model(&mut self) -> Result<Option<z3::Model>, Z3Error> {
        Ok(self.last_model.clone())
    }

    fn eval_num(&mut self, model: &z3::Model, term: &Int) -> Result<i64, Z3Error> {
        model
            .eval(term, true)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Z3Error::Internal(format!("no integer value for {term}")))
    }

    fn eval_bool(&mut self, model: &z3::Model, term: &Bool) -> Result<bool, Z3Error> {
        model
            .eval(term, true)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Z3Error::Internal(format!("no boolean value for {term}")))
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset.
        if let Some(params) = &self.params {
            self.solver.set_params(params);
        }
        self.int_vars.clear();
        self.bool_vars.clear();
        self.bool_memo.clear();
        self.num_memo.clear();
        self.domain_axioms.clear();
        self.last_model = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symlab_ir::ScalarKind;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn x() -> NumExpr {
        NumExpr::var(SymVar::new(0, ScalarKind::Int))
    }

    fn assert_c(b: &mut Z3Backend, c: &Constraint) -> TestResult {
        let t = b.translate_constraint(c)?;
        b.assert(&t)?;
        Ok(())
    }

    #[test]
    fn z3_model_extraction() -> TestResult {
        let mut b = Z3Backend::new(DomainBounds::default());
        assert_c(&mut b, &x().eq(NumExpr::int(42)))?;
        assert_eq!(b.check(&[])?, SatResult::Sat);
        let model = b.model()?.ok_or("expected model")?;
        let term = b.translate_expression(&x())?;
        assert_eq!(b.eval_num(&model, &term)?, 42);
        Ok(())
    }

    #[test]
    fn z3_timeout_survives_reset() -> TestResult {
        let options = SolverOptions {
            timeout_ms: 5_000,
            ..SolverOptions::default()
        };
        let mut b = Z3Backend::from_options(&options);
        assert!(b.params.is_some());
        b.reset()?;
        assert!(b.params.is_some());
        assert_c(&mut b, &x().eq(NumExpr::int(3)))?;
        assert_eq!(b.check(&[])?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn z3_domain_bounds_apply() -> TestResult {
        let byte = NumExpr::var(SymVar::new(1, ScalarKind::Byte));
        let mut b = Z3Backend::new(DomainBounds::default());
        assert_c(&mut b, &byte.gt(NumExpr::int(127)))?;
        assert_eq!(b.check(&[])?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn z3_division_truncates() -> TestResult {
        let mut b = Z3Backend::new(DomainBounds::default());
        assert_c(&mut b, &x().eq(NumExpr::int(-7).div(NumExpr::int(2))))?;
        assert_eq!(b.check(&[])?, SatResult::Sat);
        let model = b.model()?.ok_or("expected model")?;
        let term = b.translate_expression(&x())?;
        assert_eq!(b.eval_num(&model, &term)?, -3);
        Ok(())
    }

    #[test]
    fn z3_guards_as_assumptions() -> TestResult {
        let mut b = Z3Backend::new(DomainBounds::default());
        let g = Constraint::var(SymVar::guard(0));
        assert_c(&mut b, &g.clone().implies(x().lt(NumExpr::int(0))))?;
        assert_c(&mut b, &x().gt(NumExpr::int(0)))?;
        let guard = b.translate_constraint(&g)?;
        assert_eq!(b.check(&[guard])?, SatResult::Unsat);
        assert_eq!(b.check(&[])?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn z3_sort_mismatch_is_unsupported() {
        let mut b = Z3Backend::new(DomainBounds::default());
        let err = match b.translate_constraint(&Constraint::var(SymVar::new(0, ScalarKind::Int))) {
            Err(e) => SolverError::from(e),
            Ok(_) => panic!("int variable accepted as boolean"),
        };
        assert!(matches!(err, SolverError::Unsupported(_)));
    }
}
