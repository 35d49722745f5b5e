use std::collections::BTreeSet;

use symlab_ir::{Constraint, NumExpr, SymVar};

fn int_lit(n: i64) -> String {
    if n < 0 {
        format!("(- {})", n.unsigned_abs())
    } else {
        n.to_string()
    }
}

/// Truncating quotient expressed with SMT-LIB's Euclidean `div`.
fn trunc_div(a: &str, b: &str) -> String {
    format!(
        "(ite (>= {a} 0) (ite (>= {b} 0) (div {a} {b}) (- (div {a} (- {b})))) \
         (ite (>= {b} 0) (- (div (- {a}) {b})) (div (- {a}) (- {b}))))"
    )
}

/// Print a numeric expression as SMT-LIB2.
pub fn num_to_smtlib(e: &NumExpr) -> String {
    match e {
        NumExpr::Lit { value, .. } => int_lit(*value),
        NumExpr::Var(v) => v.name(),
        NumExpr::Sum(l, r) => format!("(+ {} {})", num_to_smtlib(l), num_to_smtlib(r)),
        NumExpr::Sub(l, r) => format!("(- {} {})", num_to_smtlib(l), num_to_smtlib(r)),
        NumExpr::Mul(l, r) => format!("(* {} {})", num_to_smtlib(l), num_to_smtlib(r)),
        NumExpr::Div(l, r) => trunc_div(&num_to_smtlib(l), &num_to_smtlib(r)),
        NumExpr::Mod(l, r) => {
            let (a, b) = (num_to_smtlib(l), num_to_smtlib(r));
            format!("(- {a} (* {b} {}))", trunc_div(&a, &b))
        }
        NumExpr::Neg(inner) => format!("(- {})", num_to_smtlib(inner)),
        NumExpr::Ite(c, t, el) => format!(
            "(ite {} {} {})",
            to_smtlib(c),
            num_to_smtlib(t),
            num_to_smtlib(el)
        ),
    }
}

/// Print a constraint as SMT-LIB2.
pub fn to_smtlib(c: &Constraint) -> String {
    match c {
        Constraint::Lit(true) => "true".to_string(),
        Constraint::Lit(false) => "false".to_string(),
        Constraint::Var(v) => v.name(),
        Constraint::Not(inner) => format!("(not {})", to_smtlib(inner)),
        Constraint::And(terms) => nary("and", "true", terms),
        Constraint::Or(terms) => nary("or", "false", terms),
        Constraint::Xor(l, r) => format!("(xor {} {})", to_smtlib(l), to_smtlib(r)),
        Constraint::Implies(l, r) => format!("(=> {} {})", to_smtlib(l), to_smtlib(r)),
        Constraint::Eq(l, r) => format!("(= {} {})", num_to_smtlib(l), num_to_smtlib(r)),
        Constraint::Lt(l, r) => format!("(< {} {})", num_to_smtlib(l), num_to_smtlib(r)),
        Constraint::Lte(l, r) => format!("(<= {} {})", num_to_smtlib(l), num_to_smtlib(r)),
    }
}

fn nary(op: &str, empty: &str, terms: &[Constraint]) -> String {
    match terms {
        [] => empty.to_string(),
        [single] => to_smtlib(single),
        _ => {
            let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
            format!("({op} {})", inner.join(" "))
        }
    }
}

/// Sort name for a variable.
pub fn sort_to_smtlib(var: SymVar) -> &'static str {
    if var.kind.is_bool() {
        "Bool"
    } else {
        "Int"
    }
}

/// Full script: declarations, then one `(push 1)` block per level above the
/// root, then `(check-sat)`.
pub fn script(levels: &[Vec<Constraint>]) -> String {
    let mut vars = BTreeSet::new();
    for c in levels.iter().flatten() {
        c.collect_vars(&mut vars);
    }
    let mut out = String::from("(set-logic ALL)\n");
    for v in &vars {
        out.push_str(&format!("(declare-const {} {})\n", v.name(), sort_to_smtlib(*v)));
    }
    for (depth, level) in levels.iter().enumerate() {
        if depth > 0 {
            out.push_str("(push 1)\n");
        }
        for c in level {
            out.push_str(&format!("(assert {})\n", to_smtlib(c)));
        }
    }
    out.push_str("(check-sat)\n");
    out
}
