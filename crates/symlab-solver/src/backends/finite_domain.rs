//! Pure-Rust constraint-programming backend over bounded integer domains.
//!
//! Native terms are interned AST nodes. A check narrows variable domains from
//! top-level unary atoms, then runs a depth-first search that prefers
//! variables fixed by an equality, then the smallest domain, and tries values
//! outward from zero. Constraints are evaluated three-valued on the partial
//! assignment so dead branches are cut as soon as a watched constraint turns
//! false. Arithmetic is checked `i64` with truncating division; division by
//! zero or overflow makes the enclosing atom false.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use symlab_ir::{Constraint, NumExpr, SymVar};

use crate::config::{DomainBounds, SolverOptions};
use crate::error::SolverError;
use crate::solver::{Backend, BackendCapabilities, SatResult};

#[derive(Debug, Error)]
pub enum FiniteDomainError {
    #[error("Sort mismatch: {0}")]
    SortMismatch(String),
    #[error("Cannot pop {requested} scope(s), only {open} open")]
    ScopeUnderflow { requested: usize, open: usize },
    #[error("Term has no value under the model: {0}")]
    Undefined(String),
}

impl From<FiniteDomainError> for SolverError {
    fn from(e: FiniteDomainError) -> Self {
        match e {
            FiniteDomainError::SortMismatch(_) => SolverError::Unsupported(e.to_string()),
            _ => SolverError::Backend(e.to_string()),
        }
    }
}

/// Total assignment found by the last successful search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdModel {
    values: BTreeMap<SymVar, i64>,
    domain: DomainBounds,
}

impl FdModel {
    pub fn get(&self, var: SymVar) -> Option<i64> {
        self.values.get(&var).copied()
    }
}

trait Valuation {
    fn value(&self, var: SymVar) -> Option<i64>;
}

impl Valuation for HashMap<SymVar, i64> {
    fn value(&self, var: SymVar) -> Option<i64> {
        self.get(&var).copied()
    }
}

impl Valuation for FdModel {
    fn value(&self, var: SymVar) -> Option<i64> {
        Some(
            self.values
                .get(&var)
                .copied()
                .unwrap_or_else(|| closest_to_zero(self.domain.for_kind(var.kind))),
        )
    }
}

fn closest_to_zero((lo, hi): (i64, i64)) -> i64 {
    0.clamp(lo, hi)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Num3 {
    Val(i64),
    Pending,
    Undefined,
}

fn num_binop(l: Num3, r: Num3, op: impl Fn(i64, i64) -> Option<i64>) -> Num3 {
    match (l, r) {
        (Num3::Undefined, _) | (_, Num3::Undefined) => Num3::Undefined,
        (Num3::Val(a), Num3::Val(b)) => op(a, b).map_or(Num3::Undefined, Num3::Val),
        _ => Num3::Pending,
    }
}

fn eval_num3(e: &NumExpr, a: &impl Valuation) -> Num3 {
    match e {
        NumExpr::Lit { value, .. } => Num3::Val(*value),
        NumExpr::Var(v) => a.value(*v).map_or(Num3::Pending, Num3::Val),
        NumExpr::Sum(l, r) => num_binop(eval_num3(l, a), eval_num3(r, a), i64::checked_add),
        NumExpr::Sub(l, r) => num_binop(eval_num3(l, a), eval_num3(r, a), i64::checked_sub),
        NumExpr::Mul(l, r) => num_binop(eval_num3(l, a), eval_num3(r, a), i64::checked_mul),
        NumExpr::Div(l, r) => num_binop(eval_num3(l, a), eval_num3(r, a), i64::checked_div),
        NumExpr::Mod(l, r) => num_binop(eval_num3(l, a), eval_num3(r, a), i64::checked_rem),
        NumExpr::Neg(inner) => match eval_num3(inner, a) {
            Num3::Val(v) => v.checked_neg().map_or(Num3::Undefined, Num3::Val),
            other => other,
        },
        NumExpr::Ite(c, t, el) => match eval_bool3(c, a) {
            Some(true) => eval_num3(t, a),
            Some(false) => eval_num3(el, a),
            None => Num3::Pending,
        },
    }
}

fn compare(l: Num3, r: Num3, op: impl Fn(i64, i64) -> bool) -> Option<bool> {
    match (l, r) {
        (Num3::Undefined, _) | (_, Num3::Undefined) => Some(false),
        (Num3::Val(a), Num3::Val(b)) => Some(op(a, b)),
        _ => None,
    }
}

/// `None` while the value still depends on unassigned variables.
fn eval_bool3(c: &Constraint, a: &impl Valuation) -> Option<bool> {
    match c {
        Constraint::Lit(b) => Some(*b),
        Constraint::Var(v) => a.value(*v).map(|x| x != 0),
        Constraint::Not(inner) => eval_bool3(inner, a).map(|b| !b),
        Constraint::And(ts) => {
            let mut pending = false;
            for t in ts {
                match eval_bool3(t, a) {
                    Some(false) => return Some(false),
                    None => pending = true,
                    Some(true) => {}
                }
            }
            if pending {
                None
            } else {
                Some(true)
            }
        }
        Constraint::Or(ts) => {
            let mut pending = false;
            for t in ts {
                match eval_bool3(t, a) {
                    Some(true) => return Some(true),
                    None => pending = true,
                    Some(false) => {}
                }
            }
            if pending {
                None
            } else {
                Some(false)
            }
        }
        Constraint::Xor(l, r) => match (eval_bool3(l, a), eval_bool3(r, a)) {
            (Some(x), Some(y)) => Some(x != y),
            _ => None,
        },
        Constraint::Implies(l, r) => match (eval_bool3(l, a), eval_bool3(r, a)) {
            (Some(false), _) | (_, Some(true)) => Some(true),
            (Some(true), Some(false)) => Some(false),
            _ => None,
        },
        Constraint::Eq(l, r) => compare(eval_num3(l, a), eval_num3(r, a), |x, y| x == y),
        Constraint::Lt(l, r) => compare(eval_num3(l, a), eval_num3(r, a), |x, y| x < y),
        Constraint::Lte(l, r) => compare(eval_num3(l, a), eval_num3(r, a), |x, y| x <= y),
    }
}

fn const_value(e: &NumExpr) -> Option<i64> {
    match eval_num3(e, &HashMap::<SymVar, i64>::new()) {
        Num3::Val(v) => Some(v),
        _ => None,
    }
}

/// Top-level conjuncts of `c`. Implications whose premise is an assumed
/// literal contribute their conclusion as well.
fn flatten_conjuncts<'a>(
    c: &'a Constraint,
    assumed: &BTreeSet<SymVar>,
    out: &mut Vec<&'a Constraint>,
) {
    match c {
        Constraint::And(ts) => {
            for t in ts {
                flatten_conjuncts(t, assumed, out);
            }
        }
        Constraint::Implies(premise, conclusion)
            if matches!(premise.as_ref(), Constraint::Var(g) if assumed.contains(g)) =>
        {
            out.push(c);
            flatten_conjuncts(conclusion, assumed, out);
        }
        other => out.push(other),
    }
}

/// Narrow `domains` using unary atoms. Returns false if a domain empties.
fn narrow(atoms: &[&Constraint], domains: &mut BTreeMap<SymVar, (i64, i64)>) -> bool {
    fn tighten(domains: &mut BTreeMap<SymVar, (i64, i64)>, v: SymVar, lo: i64, hi: i64) -> bool {
        match domains.get_mut(&v) {
            Some(d) => {
                let before = *d;
                d.0 = d.0.max(lo);
                d.1 = d.1.min(hi);
                *d != before
            }
            None => false,
        }
    }

    for _ in 0..64 {
        let mut changed = false;
        for atom in atoms {
            let (negated, inner) = match atom {
                Constraint::Not(inner) => (true, inner.as_ref()),
                other => (false, *other),
            };
            match inner {
                Constraint::Var(v) => {
                    let b = i64::from(!negated);
                    changed |= tighten(domains, *v, b, b);
                }
                Constraint::Eq(l, r) => {
                    let (v, k) = match (l.as_var(), const_value(r), r.as_var(), const_value(l)) {
                        (Some(v), Some(k), _, _) | (_, _, Some(v), Some(k)) => (v, k),
                        _ => continue,
                    };
                    if !negated {
                        changed |= tighten(domains, v, k, k);
                    } else if let Some(&(lo, hi)) = domains.get(&v) {
                        if k == lo {
                            changed |= tighten(domains, v, lo.saturating_add(1), hi);
                        } else if k == hi {
                            changed |= tighten(domains, v, lo, hi.saturating_sub(1));
                        }
                    }
                }
                Constraint::Lt(l, r) | Constraint::Lte(l, r) => {
                    let strict = matches!(inner, Constraint::Lt(..));
                    // not(l < r) is r <= l, not(l <= r) is r < l
                    let (l, r, strict) = if negated {
                        (r, l, !strict)
                    } else {
                        (l, r, strict)
                    };
                    let slack = i64::from(strict);
                    if let (Some(v), Some(k)) = (l.as_var(), const_value(r)) {
                        changed |= tighten(domains, v, i64::MIN, k.saturating_sub(slack));
                    } else if let (Some(k), Some(v)) = (const_value(l), r.as_var()) {
                        changed |= tighten(domains, v, k.saturating_add(slack), i64::MAX);
                    }
                }
                _ => {}
            }
            if domains.values().any(|(lo, hi)| lo > hi) {
                return false;
            }
        }
        if !changed {
            break;
        }
    }
    true
}

/// Values of `(lo, hi)` in order of distance from zero.
struct ValueOrder {
    lo: i128,
    hi: i128,
    start: i128,
    step: i128,
}

impl ValueOrder {
    fn new((lo, hi): (i64, i64)) -> Self {
        let start = i128::from(closest_to_zero((lo, hi)));
        Self {
            lo: i128::from(lo),
            hi: i128::from(hi),
            start,
            step: 0,
        }
    }
}

impl Iterator for ValueOrder {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            let offset = (self.step + 1) / 2;
            let candidate = if self.step % 2 == 1 {
                self.start + offset
            } else {
                self.start - offset
            };
            if self.start - offset < self.lo && self.start + offset > self.hi {
                return None;
            }
            self.step += 1;
            if candidate >= self.lo && candidate <= self.hi {
                return i64::try_from(candidate).ok();
            }
        }
    }
}

enum Outcome {
    Found,
    Exhausted,
    OutOfBudget,
}

struct Search<'a> {
    constraints: &'a [Arc<Constraint>],
    domains: BTreeMap<SymVar, (i64, i64)>,
    /// Constraint indices per variable.
    watches: HashMap<SymVar, Vec<usize>>,
    /// `v == e` conjuncts, usable once `e` is fully assigned.
    definitions: HashMap<SymVar, Vec<Arc<NumExpr>>>,
    assignment: HashMap<SymVar, i64>,
    nodes: u64,
    budget: u64,
    deadline: Option<Instant>,
}

impl Search<'_> {
    fn out_of_budget(&self) -> bool {
        if self.nodes > self.budget {
            return true;
        }
        match self.deadline {
            Some(deadline) if self.nodes % 1024 == 0 => Instant::now() >= deadline,
            _ => false,
        }
    }

    fn forced_value(&self, var: SymVar) -> Option<i64> {
        self.definitions.get(&var)?.iter().find_map(|e| {
            match eval_num3(e, &self.assignment) {
                Num3::Val(v) => Some(v),
                _ => None,
            }
        })
    }

    fn pick_var(&self) -> Option<(SymVar, Option<i64>)> {
        let mut best: Option<(SymVar, i128)> = None;
        for (var, (lo, hi)) in &self.domains {
            if self.assignment.contains_key(var) {
                continue;
            }
            if let Some(value) = self.forced_value(*var) {
                return Some((*var, Some(value)));
            }
            let size = i128::from(*hi) - i128::from(*lo);
            if !matches!(best, Some((_, s)) if s <= size) {
                best = Some((*var, size));
            }
        }
        best.map(|(var, _)| (var, None))
    }

    fn consistent(&self, var: SymVar) -> bool {
        let Some(idxs) = self.watches.get(&var) else {
            return true;
        };
        idxs.iter()
            .all(|&i| eval_bool3(&self.constraints[i], &self.assignment) != Some(false))
    }

    fn run(&mut self) -> Outcome {
        let Some((var, forced)) = self.pick_var() else {
            let all_hold = self
                .constraints
                .iter()
                .all(|c| eval_bool3(c, &self.assignment) == Some(true));
            return if all_hold {
                Outcome::Found
            } else {
                Outcome::Exhausted
            };
        };
        let domain = self.domains[&var];
        let candidates: Box<dyn Iterator<Item = i64>> = match forced {
            Some(v) if v >= domain.0 && v <= domain.1 => Box::new(std::iter::once(v)),
            Some(_) => return Outcome::Exhausted,
            None => Box::new(ValueOrder::new(domain)),
        };
        for value in candidates {
            self.nodes += 1;
            if self.out_of_budget() {
                return Outcome::OutOfBudget;
            }
            self.assignment.insert(var, value);
            if self.consistent(var) {
                match self.run() {
                    Outcome::Exhausted => {}
                    other => return other,
                }
            }
            self.assignment.remove(&var);
        }
        Outcome::Exhausted
    }
}

/// Constraint-programming backend; see the module docs.
pub struct FiniteDomainBackend {
    domain: DomainBounds,
    node_budget: u64,
    timeout: Option<Duration>,
    scopes: Vec<Vec<Arc<Constraint>>>,
    bools: HashMap<Constraint, Arc<Constraint>>,
    nums: HashMap<NumExpr, Arc<NumExpr>>,
    last_model: Option<FdModel>,
    last_nodes: u64,
}

impl FiniteDomainBackend {
    pub fn new(domain: DomainBounds) -> Self {
        Self {
            domain,
            node_budget: SolverOptions::default().search_node_budget,
            timeout: None,
            scopes: vec![Vec::new()],
            bools: HashMap::new(),
            nums: HashMap::new(),
            last_model: None,
            last_nodes: 0,
        }
    }

    pub fn from_options(options: &SolverOptions) -> Self {
        let mut backend = Self::new(options.domain);
        backend.node_budget = options.search_node_budget;
        if options.timeout_ms > 0 {
            backend.timeout = Some(Duration::from_millis(options.timeout_ms));
        }
        backend
    }

    pub fn with_node_budget(mut self, budget: u64) -> Self {
        self.node_budget = budget;
        self
    }

    /// Search nodes visited by the last check.
    pub fn last_search_nodes(&self) -> u64 {
        self.last_nodes
    }

    fn check_num_sorts(e: &NumExpr) -> Result<(), FiniteDomainError> {
        match e {
            NumExpr::Lit { .. } => Ok(()),
            NumExpr::Var(v) if v.kind.is_bool() => Err(FiniteDomainError::SortMismatch(format!(
                "boolean variable {v} used as a number"
            ))),
            NumExpr::Var(_) => Ok(()),
            NumExpr::Sum(l, r)
            | NumExpr::Sub(l, r)
            | NumExpr::Mul(l, r)
            | NumExpr::Div(l, r)
            | NumExpr::Mod(l, r) => {
                Self::check_num_sorts(l)?;
                Self::check_num_sorts(r)
            }
            NumExpr::Neg(inner) => Self::check_num_sorts(inner),
            NumExpr::Ite(c, t, el) => {
                Self::check_bool_sorts(c)?;
                Self::check_num_sorts(t)?;
                Self::check_num_sorts(el)
            }
        }
    }

    fn check_bool_sorts(c: &Constraint) -> Result<(), FiniteDomainError> {
        match c {
            Constraint::Lit(_) => Ok(()),
            Constraint::Var(v) if !v.kind.is_bool() => Err(FiniteDomainError::SortMismatch(
                format!("{} variable {v} used as a boolean", v.kind),
            )),
            Constraint::Var(_) => Ok(()),
            Constraint::Not(inner) => Self::check_bool_sorts(inner),
            Constraint::And(ts) | Constraint::Or(ts) => ts.iter().try_for_each(Self::check_bool_sorts),
            Constraint::Xor(l, r) | Constraint::Implies(l, r) => {
                Self::check_bool_sorts(l)?;
                Self::check_bool_sorts(r)
            }
            Constraint::Eq(l, r) | Constraint::Lt(l, r) | Constraint::Lte(l, r) => {
                Self::check_num_sorts(l)?;
                Self::check_num_sorts(r)
            }
        }
    }

    fn solve(&mut self, assumptions: &[Arc<Constraint>]) -> SatResult {
        let constraints: Vec<Arc<Constraint>> = self
            .scopes
            .iter()
            .flatten()
            .chain(assumptions.iter())
            .cloned()
            .collect();

        let mut vars = BTreeSet::new();
        for c in &constraints {
            c.collect_vars(&mut vars);
        }
        let mut domains: BTreeMap<SymVar, (i64, i64)> = vars
            .iter()
            .map(|v| (*v, self.domain.for_kind(v.kind)))
            .collect();

        let assumed: BTreeSet<SymVar> = assumptions
            .iter()
            .filter_map(|a| match a.as_ref() {
                Constraint::Var(g) => Some(*g),
                _ => None,
            })
            .collect();
        let mut conjuncts = Vec::new();
        for c in &constraints {
            flatten_conjuncts(c, &assumed, &mut conjuncts);
        }
        if conjuncts
            .iter()
            .any(|c| c.is_concrete() && eval_bool3(c, &HashMap::<SymVar, i64>::new()) != Some(true))
        {
            return SatResult::Unsat;
        }
        if !narrow(&conjuncts, &mut domains) {
            return SatResult::Unsat;
        }

        let mut definitions: HashMap<SymVar, Vec<Arc<NumExpr>>> = HashMap::new();
        for c in &conjuncts {
            if let Constraint::Eq(l, r) = c {
                if let Some(v) = l.as_var() {
                    definitions.entry(v).or_default().push(r.clone());
                }
                if let Some(v) = r.as_var() {
                    definitions.entry(v).or_default().push(l.clone());
                }
            }
        }
        let mut watches: HashMap<SymVar, Vec<usize>> = HashMap::new();
        for (i, c) in constraints.iter().enumerate() {
            for v in c.vars() {
                watches.entry(v).or_default().push(i);
            }
        }

        let mut search = Search {
            constraints: &constraints,
            domains,
            watches,
            definitions,
            assignment: HashMap::new(),
            nodes: 0,
            budget: self.node_budget,
            deadline: self.timeout.map(|t| Instant::now() + t),
        };
        let outcome = search.run();
        self.last_nodes = search.nodes;
        debug!(
            vars = vars.len(),
            constraints = constraints.len(),
            nodes = search.nodes,
            "finite-domain search finished"
        );
        match outcome {
            Outcome::Found => {
                self.last_model = Some(FdModel {
                    values: search.assignment.into_iter().collect(),
                    domain: self.domain,
                });
                SatResult::Sat
            }
            Outcome::Exhausted => SatResult::Unsat,
            Outcome::OutOfBudget => SatResult::Unknown(format!(
                "search budget exhausted after {} nodes",
                search.nodes
            )),
        }
    }
}

impl Backend for FiniteDomainBackend {
    type Bool = Arc<Constraint>;
    type Num = Arc<NumExpr>;
    type Model = FdModel;
    type Error = FiniteDomainError;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            native_scopes: true,
            native_arrays: false,
        }
    }

    fn translate_constraint(&mut self, c: &Constraint) -> Result<Arc<Constraint>, FiniteDomainError> {
        if let Some(interned) = self.bools.get(c) {
            return Ok(interned.clone());
        }
        Self::check_bool_sorts(c)?;
        let interned = Arc::new(c.clone());
        self.bools.insert(c.clone(), interned.clone());
        Ok(interned)
    }

    fn translate_expression(&mut self, e: &NumExpr) -> Result<Arc<NumExpr>, FiniteDomainError> {
        if let Some(interned) = self.nums.get(e) {
            return Ok(interned.clone());
        }
        Self::check_num_sorts(e)?;
        let interned = Arc::new(e.clone());
        self.nums.insert(e.clone(), interned.clone());
        Ok(interned)
    }

    fn assert(&mut self, term: &Arc<Constraint>) -> Result<(), FiniteDomainError> {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(term.clone());
        }
        Ok(())
    }

    fn push_scope(&mut self) -> Result<(), FiniteDomainError> {
        self.scopes.push(Vec::new());
        Ok(())
    }

    fn pop_scopes(&mut self, n: usize) -> Result<(), FiniteDomainError> {
        let open = self.scopes.len() - 1;
        if n > open {
            return Err(FiniteDomainError::ScopeUnderflow { requested: n, open });
        }
        self.scopes.truncate(self.scopes.len() - n);
        Ok(())
    }

    fn check(&mut self, assumptions: &[Arc<Constraint>]) -> Result<SatResult, FiniteDomainError> {
        self.last_model = None;
        Ok(self.solve(assumptions))
    }

    fn model(&mut self) -> Result<Option<FdModel>, FiniteDomainError> {
        Ok(self.last_model.clone())
    }

    fn eval_num(&mut self, model: &FdModel, term: &Arc<NumExpr>) -> Result<i64, FiniteDomainError> {
        match eval_num3(term, model) {
            Num3::Val(v) => Ok(v),
            _ => Err(FiniteDomainError::Undefined(format!("{term:?}"))),
        }
    }

    fn eval_bool(&mut self, model: &FdModel, term: &Arc<Constraint>) -> Result<bool, FiniteDomainError> {
        eval_bool3(term, model).ok_or_else(|| FiniteDomainError::Undefined(format!("{term:?}")))
    }

    fn reset(&mut self) -> Result<(), FiniteDomainError> {
        self.scopes = vec![Vec::new()];
        self.bools.clear();
        self.nums.clear();
        self.last_model = None;
        Ok(())
    }
}
