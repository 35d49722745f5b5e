//! Proptest strategies for small, well-sorted constraint trees.

use proptest::prelude::*;

use crate::expr::{Constraint, NumExpr};
use crate::kinds::{ScalarKind, SymVar};

/// `count` integer program variables with ids `0..count`.
pub fn int_vars(count: u32) -> Vec<SymVar> {
    (0..count).map(|id| SymVar::new(id, ScalarKind::Int)).collect()
}

/// Leaf: a small literal or one of `vars`.
pub fn arb_num_leaf(vars: Vec<SymVar>) -> BoxedStrategy<NumExpr> {
    let n = vars.len().max(1);
    prop_oneof![
        (-8i64..=8).prop_map(NumExpr::int),
        (0..n).prop_map(move |i| match vars.get(i) {
            Some(v) => NumExpr::var(*v),
            None => NumExpr::int(0),
        }),
    ]
    .boxed()
}

/// Linear-ish arithmetic over `vars` (sums, differences, negation, and
/// multiplication by small constants).
pub fn arb_num_expr(vars: Vec<SymVar>) -> BoxedStrategy<NumExpr> {
    arb_num_leaf(vars).prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| l.add(r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| l.sub(r)),
            inner.clone().prop_map(NumExpr::neg),
            (inner, -3i64..=3).prop_map(|(l, k)| l.mul(NumExpr::int(k))),
        ]
    })
    .boxed()
}

/// Comparison atoms and their boolean combinations over `vars`.
pub fn arb_constraint(vars: Vec<SymVar>) -> BoxedStrategy<Constraint> {
    let num = arb_num_expr(vars);
    let atom = prop_oneof![
        (num.clone(), num.clone()).prop_map(|(l, r)| l.eq(r)),
        (num.clone(), num.clone()).prop_map(|(l, r)| l.lt(r)),
        (num.clone(), num).prop_map(|(l, r)| l.le(r)),
    ];
    atom.prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(Constraint::not),
            proptest::collection::vec(inner.clone(), 1..3).prop_map(Constraint::and),
            proptest::collection::vec(inner.clone(), 1..3).prop_map(Constraint::or),
            (inner.clone(), inner).prop_map(|(l, r)| l.implies(r)),
        ]
    })
    .boxed()
}
