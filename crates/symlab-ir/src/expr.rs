//! Immutable boolean and arithmetic expression trees.
//!
//! Trees are produced upstream by instrumentation and consumed read-only.
//! Equality and hashing are structural: two concrete leaves with the same
//! kind and value are equal, two symbolic leaves are equal iff their
//! [`SymVar`] identifiers are. Backends rely on this to memoize translations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::kinds::{ScalarKind, SymVar};

/// Arithmetic expression over width-unaware integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumExpr {
    Lit { kind: ScalarKind, value: i64 },
    Var(SymVar),
    Sum(Arc<NumExpr>, Arc<NumExpr>),
    Sub(Arc<NumExpr>, Arc<NumExpr>),
    Mul(Arc<NumExpr>, Arc<NumExpr>),
    Div(Arc<NumExpr>, Arc<NumExpr>),
    Mod(Arc<NumExpr>, Arc<NumExpr>),
    Neg(Arc<NumExpr>),
    Ite(Arc<Constraint>, Arc<NumExpr>, Arc<NumExpr>),
}

/// Boolean constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    Lit(bool),
    Var(SymVar),
    Not(Arc<Constraint>),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Xor(Arc<Constraint>, Arc<Constraint>),
    Implies(Arc<Constraint>, Arc<Constraint>),
    Eq(Arc<NumExpr>, Arc<NumExpr>),
    Lt(Arc<NumExpr>, Arc<NumExpr>),
    Lte(Arc<NumExpr>, Arc<NumExpr>),
}

#[allow(clippy::should_implement_trait)]
impl NumExpr {
    pub fn lit(kind: ScalarKind, value: i64) -> Self {
        NumExpr::Lit { kind, value }
    }

    pub fn int(value: i64) -> Self {
        NumExpr::lit(ScalarKind::Int, value)
    }

    pub fn long(value: i64) -> Self {
        NumExpr::lit(ScalarKind::Long, value)
    }

    pub fn var(var: SymVar) -> Self {
        NumExpr::Var(var)
    }

    pub fn add(self, other: NumExpr) -> Self {
        NumExpr::Sum(Arc::new(self), Arc::new(other))
    }

    pub fn sub(self, other: NumExpr) -> Self {
        NumExpr::Sub(Arc::new(self), Arc::new(other))
    }

    pub fn mul(self, other: NumExpr) -> Self {
        NumExpr::Mul(Arc::new(self), Arc::new(other))
    }

    pub fn div(self, other: NumExpr) -> Self {
        NumExpr::Div(Arc::new(self), Arc::new(other))
    }

    pub fn rem(self, other: NumExpr) -> Self {
        NumExpr::Mod(Arc::new(self), Arc::new(other))
    }

    pub fn neg(self) -> Self {
        NumExpr::Neg(Arc::new(self))
    }

    pub fn ite(cond: Constraint, then: NumExpr, els: NumExpr) -> Self {
        NumExpr::Ite(Arc::new(cond), Arc::new(then), Arc::new(els))
    }

    pub fn eq(self, other: NumExpr) -> Constraint {
        Constraint::Eq(Arc::new(self), Arc::new(other))
    }

    pub fn ne(self, other: NumExpr) -> Constraint {
        self.eq(other).not()
    }

    pub fn lt(self, other: NumExpr) -> Constraint {
        Constraint::Lt(Arc::new(self), Arc::new(other))
    }

    pub fn le(self, other: NumExpr) -> Constraint {
        Constraint::Lte(Arc::new(self), Arc::new(other))
    }

    pub fn gt(self, other: NumExpr) -> Constraint {
        other.lt(self)
    }

    pub fn ge(self, other: NumExpr) -> Constraint {
        other.le(self)
    }

    /// Literal value, if this is a concrete leaf.
    pub fn as_lit(&self) -> Option<i64> {
        match self {
            NumExpr::Lit { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The symbolic variable, if this is a symbolic leaf.
    pub fn as_var(&self) -> Option<SymVar> {
        match self {
            NumExpr::Var(v) => Some(*v),
            _ => None,
        }
    }

    /// Kind of the expression's value after numeric promotion: leaves keep
    /// their own kind, arithmetic widens to `Int`, or `Long` when either
    /// operand is a `Long`.
    pub fn kind(&self) -> ScalarKind {
        fn promote(l: ScalarKind, r: ScalarKind) -> ScalarKind {
            if l == ScalarKind::Long || r == ScalarKind::Long {
                ScalarKind::Long
            } else {
                ScalarKind::Int
            }
        }
        match self {
            NumExpr::Lit { kind, .. } => *kind,
            NumExpr::Var(v) => v.kind,
            NumExpr::Sum(l, r)
            | NumExpr::Sub(l, r)
            | NumExpr::Mul(l, r)
            | NumExpr::Div(l, r)
            | NumExpr::Mod(l, r) => promote(l.kind(), r.kind()),
            NumExpr::Neg(inner) => promote(inner.kind(), ScalarKind::Int),
            NumExpr::Ite(_, t, e) => promote(t.kind(), e.kind()),
        }
    }

    /// True when the tree contains no symbolic leaf.
    pub fn is_concrete(&self) -> bool {
        match self {
            NumExpr::Lit { .. } => true,
            NumExpr::Var(_) => false,
            NumExpr::Sum(l, r)
            | NumExpr::Sub(l, r)
            | NumExpr::Mul(l, r)
            | NumExpr::Div(l, r)
            | NumExpr::Mod(l, r) => l.is_concrete() && r.is_concrete(),
            NumExpr::Neg(inner) => inner.is_concrete(),
            NumExpr::Ite(c, t, e) => c.is_concrete() && t.is_concrete() && e.is_concrete(),
        }
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<SymVar>) {
        match self {
            NumExpr::Lit { .. } => {}
            NumExpr::Var(v) => {
                out.insert(*v);
            }
            NumExpr::Sum(l, r)
            | NumExpr::Sub(l, r)
            | NumExpr::Mul(l, r)
            | NumExpr::Div(l, r)
            | NumExpr::Mod(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            NumExpr::Neg(inner) => inner.collect_vars(out),
            NumExpr::Ite(c, t, e) => {
                c.collect_vars(out);
                t.collect_vars(out);
                e.collect_vars(out);
            }
        }
    }
}

#[allow(clippy::should_implement_trait)]
impl Constraint {
    pub const TRUE: Constraint = Constraint::Lit(true);
    pub const FALSE: Constraint = Constraint::Lit(false);

    pub fn var(var: SymVar) -> Self {
        Constraint::Var(var)
    }

    pub fn and(terms: Vec<Constraint>) -> Self {
        Constraint::And(terms)
    }

    pub fn or(terms: Vec<Constraint>) -> Self {
        Constraint::Or(terms)
    }

    pub fn not(self) -> Self {
        Constraint::Not(Arc::new(self))
    }

    pub fn xor(self, other: Constraint) -> Self {
        Constraint::Xor(Arc::new(self), Arc::new(other))
    }

    pub fn implies(self, other: Constraint) -> Self {
        Constraint::Implies(Arc::new(self), Arc::new(other))
    }

    /// Boolean equivalence, encoded as a negated exclusive-or.
    pub fn iff(self, other: Constraint) -> Self {
        self.xor(other).not()
    }

    /// Conjoin two constraints, folding literal `true` away.
    pub fn conjoin(self, other: Constraint) -> Self {
        match (self, other) {
            (Constraint::Lit(true), c) | (c, Constraint::Lit(true)) => c,
            (Constraint::And(mut lhs), Constraint::And(rhs)) => {
                lhs.extend(rhs);
                Constraint::And(lhs)
            }
            (Constraint::And(mut lhs), c) => {
                lhs.push(c);
                Constraint::And(lhs)
            }
            (c, Constraint::And(mut rhs)) => {
                rhs.insert(0, c);
                Constraint::And(rhs)
            }
            (a, b) => Constraint::And(vec![a, b]),
        }
    }

    /// Disjunction that collapses the trivial cases.
    pub fn any(mut terms: Vec<Constraint>) -> Self {
        match terms.len() {
            0 => Constraint::FALSE,
            1 => terms.remove(0),
            _ => Constraint::Or(terms),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Constraint::Lit(true))
    }

    pub fn is_concrete(&self) -> bool {
        match self {
            Constraint::Lit(_) => true,
            Constraint::Var(_) => false,
            Constraint::Not(inner) => inner.is_concrete(),
            Constraint::And(ts) | Constraint::Or(ts) => ts.iter().all(Constraint::is_concrete),
            Constraint::Xor(l, r) | Constraint::Implies(l, r) => l.is_concrete() && r.is_concrete(),
            Constraint::Eq(l, r) | Constraint::Lt(l, r) | Constraint::Lte(l, r) => {
                l.is_concrete() && r.is_concrete()
            }
        }
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<SymVar>) {
        match self {
            Constraint::Lit(_) => {}
            Constraint::Var(v) => {
                out.insert(*v);
            }
            Constraint::Not(inner) => inner.collect_vars(out),
            Constraint::And(ts) | Constraint::Or(ts) => {
                for t in ts {
                    t.collect_vars(out);
                }
            }
            Constraint::Xor(l, r) | Constraint::Implies(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Constraint::Eq(l, r) | Constraint::Lt(l, r) | Constraint::Lte(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<SymVar> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }
}

impl From<bool> for Constraint {
    fn from(b: bool) -> Self {
        Constraint::Lit(b)
    }
}

impl From<SymVar> for NumExpr {
    fn from(v: SymVar) -> Self {
        NumExpr::Var(v)
    }
}
