//! End-to-end scenarios over the finite-domain backend: scoped constraints,
//! object-theory round trips, snapshots and solution enumeration.

use std::collections::HashSet;

use symlab_ir::{ClassInfo, NumExpr, ObjectOp, ScalarKind, SymValue, SymVar, ValueType};
use symlab_solver::{
    DomainBounds, FiniteDomainBackend, IncrementalSolver, Label, ScopeMode, SolverError,
    SolverOptions,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn int_var(id: u32) -> SymVar {
    SymVar::new(id, ScalarKind::Int)
}

/// `RUST_LOG=symlab_solver=debug` shows level and check traffic.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn solver(mode: ScopeMode) -> Result<IncrementalSolver<FiniteDomainBackend>, SolverError> {
    init_tracing();
    IncrementalSolver::finite_domain(SolverOptions {
        scope_mode: mode,
        ..SolverOptions::default()
    })
}

/// Domains small enough for the finite-domain search to refute quickly.
fn small_solver() -> Result<IncrementalSolver<FiniteDomainBackend>, SolverError> {
    init_tracing();
    IncrementalSolver::finite_domain(SolverOptions {
        domain: DomainBounds::default()
            .with(ScalarKind::Int, -12, 12)
            .with(ScalarKind::Long, -4, 4),
        ..SolverOptions::default()
    })
}

fn long_var(id: u32) -> NumExpr {
    NumExpr::var(SymVar::new(id, ScalarKind::Long))
}

fn node_class() -> std::sync::Arc<ClassInfo> {
    ClassInfo::builder("Node")
        .field("v", ValueType::int())
        .field("next", ValueType::Object("Node".into()))
        .build()
}

fn bounded_x_then_backtrack(mode: ScopeMode) -> TestResult {
    let x = NumExpr::var(int_var(0));
    let mut s = solver(mode)?;
    s.add_constraint_after_new_backtracking_point(x.clone().gt(NumExpr::int(0)))?;
    s.add_constraint(x.clone().lt(NumExpr::int(10)))?;
    assert_eq!(s.level(), 1);
    assert!(s.is_satisfiable()?);
    let value = s
        .label(&SymValue::Num(x.clone()))?
        .as_int()
        .ok_or("x should label as an integer")?;
    assert!(0 < value && value < 10, "label {value} outside (0, 10)");

    s.backtrack_once()?;
    assert_eq!(s.level(), 0);
    assert!(s.is_satisfiable()?);
    Ok(())
}

#[test]
fn bounded_variable_labels_inside_its_range() -> TestResult {
    bounded_x_then_backtrack(ScopeMode::Incremental)
}

#[test]
fn bounded_variable_labels_inside_its_range_with_global_learning() -> TestResult {
    bounded_x_then_backtrack(ScopeMode::GlobalLearning)
}

#[test]
fn fixed_value_labels_exactly() -> TestResult {
    let x = SymValue::var(int_var(0));
    let mut s = solver(ScopeMode::Incremental)?;
    s.add_constraint(NumExpr::var(int_var(0)).eq(NumExpr::int(5)))?;
    assert!(s.is_satisfiable()?);
    assert_eq!(s.label(&x)?, Label::int(5));
    Ok(())
}

#[test]
fn backtracked_constraints_stop_applying() -> TestResult {
    let x = NumExpr::var(int_var(0));
    let mut s = solver(ScopeMode::GlobalLearning)?;
    s.add_constraint(x.clone().ge(NumExpr::int(0)))?;
    s.add_constraint_after_new_backtracking_point(x.clone().lt(NumExpr::int(0)))?;
    assert!(!s.is_satisfiable()?);
    s.backtrack_all()?;
    assert!(s.is_satisfiable()?);
    assert!(matches!(
        s.backtrack(1),
        Err(SolverError::Backtrack {
            requested: 1,
            level: 0
        })
    ));
    Ok(())
}

#[test]
fn array_store_and_constrained_select_label_together() -> TestResult {
    let y = int_var(1);
    let mut s = solver(ScopeMode::Incremental)?;
    let arr = s
        .entities_mut()
        .new_array(ValueType::int(), NumExpr::int(3));
    s.apply(ObjectOp::InitArray {
        array: arr,
        length: NumExpr::int(3),
        elem: ValueType::int(),
        initial: vec![],
        lazy_contents: true,
    })?;
    s.apply(ObjectOp::Store {
        array: arr,
        index: NumExpr::int(0),
        value: SymValue::int(7),
    })?;
    s.apply(ObjectOp::Select {
        array: arr,
        index: NumExpr::int(1),
        value: SymValue::var(y),
    })?;
    s.add_constraint(NumExpr::var(y).eq(NumExpr::int(9)))?;
    assert!(s.is_satisfiable()?);
    let label = s.label(&SymValue::Entity(arr))?;
    assert_eq!(s.render_label(&label), "[7, 9, 0]");
    Ok(())
}

#[test]
fn object_fields_combine_init_and_put() -> TestResult {
    let class = ClassInfo::builder("Pair")
        .field("a", ValueType::int())
        .field("b", ValueType::int())
        .build();
    let a = int_var(0);
    let mut s = solver(ScopeMode::Incremental)?;
    let obj = s.entities_mut().new_object(class.clone());
    s.apply(ObjectOp::InitObject {
        object: obj,
        class,
        initial: vec![("b".into(), SymValue::int(-4))],
        lazy_fields: false,
    })?;
    s.apply(ObjectOp::PutField {
        object: obj,
        field: "a".into(),
        value: SymValue::var(a),
    })?;
    s.add_constraint(NumExpr::var(a).eq(NumExpr::int(3)))?;
    let label = s.label(&SymValue::Entity(obj))?;
    assert_eq!(s.render_label(&label), "Pair{a: 3, b: -4}");
    Ok(())
}

#[test]
fn remembered_snapshots_keep_their_contents() -> TestResult {
    let x = int_var(0);
    let mut s = solver(ScopeMode::Incremental)?;
    let arr = s
        .entities_mut()
        .new_array(ValueType::int(), NumExpr::int(2));
    s.apply(ObjectOp::InitArray {
        array: arr,
        length: NumExpr::int(2),
        elem: ValueType::int(),
        initial: vec![],
        lazy_contents: false,
    })?;
    s.apply(ObjectOp::Store {
        array: arr,
        index: NumExpr::int(0),
        value: SymValue::var(x),
    })?;
    s.apply(ObjectOp::Remember {
        name: "before".into(),
        value: SymValue::Entity(arr),
    })?;
    s.apply(ObjectOp::Store {
        array: arr,
        index: NumExpr::int(0),
        value: SymValue::int(5),
    })?;
    s.add_constraint(NumExpr::var(x).eq(NumExpr::int(3)))?;

    let solution = s.label_solution(
        &SymValue::Entity(arr),
        &[("arr".to_string(), SymValue::Entity(arr))],
    )?;
    assert_eq!(solution.labels.render("arr").as_deref(), Some("[5, 0]"));
    assert_eq!(solution.labels.render("before").as_deref(), Some("[3, 0]"));
    assert_eq!(solution.render_returned(), "[5, 0]");
    assert!(solution.labels.get("before").is_some_and(|lv| lv.snapshot.is_some()));
    Ok(())
}

#[test]
fn enumeration_is_bounded_distinct_and_level_neutral() -> TestResult {
    let x = int_var(0);
    let mut s = solver(ScopeMode::Incremental)?;
    s.add_constraint_after_new_backtracking_point(NumExpr::var(x).ge(NumExpr::int(1)))?;
    s.add_constraint(NumExpr::var(x).le(NumExpr::int(5)))?;
    let named = [("x".to_string(), SymValue::var(x))];
    let first = s.label_solution(&SymValue::Null, &named)?;

    let level = s.level();
    let three = s.up_to_n_solutions(&first, 3)?;
    assert_eq!(s.level(), level);
    assert_eq!(three.len(), 3);
    let distinct: HashSet<i64> = three
        .iter()
        .filter_map(|sol| sol.labels.label("x").and_then(Label::as_int))
        .collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(three[0], first);

    let all = s.up_to_n_solutions(&first, 50)?;
    assert_eq!(all.len(), 5);
    assert_eq!(s.level(), level);
    Ok(())
}

#[test]
fn enumeration_covers_array_contents() -> TestResult {
    let v = SymVar::new(3, ScalarKind::Byte);
    let mut s = solver(ScopeMode::GlobalLearning)?;
    let arr = s
        .entities_mut()
        .new_array(ValueType::Scalar(ScalarKind::Byte), NumExpr::int(1));
    s.apply(ObjectOp::InitArray {
        array: arr,
        length: NumExpr::int(1),
        elem: ValueType::Scalar(ScalarKind::Byte),
        initial: vec![(NumExpr::int(0), SymValue::var(v))],
        lazy_contents: false,
    })?;
    s.add_constraint(NumExpr::var(v).ge(NumExpr::int(10)))?;
    s.add_constraint(NumExpr::var(v).le(NumExpr::int(11)))?;
    let first = s.label_solution(&SymValue::Null, &[("arr".to_string(), SymValue::Entity(arr))])?;
    let all = s.up_to_n_solutions(&first, 4)?;
    let rendered: HashSet<String> = all
        .iter()
        .filter_map(|sol| sol.labels.render("arr"))
        .collect();
    assert_eq!(rendered, HashSet::from(["[10]".to_string(), "[11]".to_string()]));
    Ok(())
}

#[test]
fn shutdown_clears_state() -> TestResult {
    let mut s = solver(ScopeMode::Incremental)?;
    s.add_constraint_after_new_backtracking_point(NumExpr::var(int_var(0)).lt(NumExpr::int(0)))?;
    assert!(s.is_satisfiable()?);
    s.shutdown()?;
    s.shutdown()?;
    assert_eq!(s.level(), 0);
    assert_eq!(s.stats().sat_checks, 0);
    assert!(s.entities().is_empty());
    Ok(())
}

#[test]
fn lazy_snapshots_keep_the_first_read_after_the_marker() -> TestResult {
    let (y, z) = (int_var(0), int_var(1));
    let mut s = small_solver()?;
    let arr = s
        .entities_mut()
        .new_lazy_array(ValueType::int(), NumExpr::int(2), long_var(20));
    s.apply(ObjectOp::Remember {
        name: "input".into(),
        value: SymValue::Entity(arr),
    })?;
    s.apply(ObjectOp::Select {
        array: arr,
        index: NumExpr::int(0),
        value: SymValue::var(y),
    })?;
    s.apply(ObjectOp::Store {
        array: arr,
        index: NumExpr::int(0),
        value: SymValue::int(5),
    })?;
    s.apply(ObjectOp::Store {
        array: arr,
        index: NumExpr::int(1),
        value: SymValue::int(6),
    })?;
    s.apply(ObjectOp::Select {
        array: arr,
        index: NumExpr::int(1),
        value: SymValue::var(z),
    })?;
    s.add_constraint(NumExpr::var(y).eq(NumExpr::int(3)))?;

    let solution = s.label_solution(&SymValue::Null, &[("arr".to_string(), SymValue::Entity(arr))])?;
    assert_eq!(solution.labels.render("arr").as_deref(), Some("[5, 6]"));
    // slot 1 was written before it was ever read, so its input value is unknown
    assert_eq!(solution.labels.render("input").as_deref(), Some("[3, 0]"));
    Ok(())
}

#[test]
fn lazy_object_snapshots_ignore_later_writes() -> TestResult {
    let x = int_var(0);
    let class = ClassInfo::builder("Cell").field("v", ValueType::int()).build();
    let mut s = small_solver()?;
    let cell = s.entities_mut().new_lazy_object(class, long_var(20));
    s.apply(ObjectOp::Remember {
        name: "input".into(),
        value: SymValue::Entity(cell),
    })?;
    s.apply(ObjectOp::GetField {
        object: cell,
        field: "v".into(),
        value: SymValue::var(x),
    })?;
    s.apply(ObjectOp::PutField {
        object: cell,
        field: "v".into(),
        value: SymValue::int(-2),
    })?;
    s.add_constraint(NumExpr::var(x).eq(NumExpr::int(7)))?;

    let solution = s.label_solution(&SymValue::Entity(cell), &[])?;
    assert_eq!(solution.labels.render("input").as_deref(), Some("Cell{v: 7}"));
    assert_eq!(solution.render_returned(), "Cell{v: -2}");
    Ok(())
}

#[test]
fn self_referencing_nodes_label_and_enumerate() -> TestResult {
    let x = int_var(0);
    let mut s = small_solver()?;
    let node = s.entities_mut().new_object(node_class());
    s.apply(ObjectOp::InitObject {
        object: node,
        class: node_class(),
        initial: vec![
            ("v".into(), SymValue::var(x)),
            ("next".into(), SymValue::Entity(node)),
        ],
        lazy_fields: false,
    })?;
    s.add_constraint(NumExpr::var(x).ge(NumExpr::int(4)))?;
    s.add_constraint(NumExpr::var(x).le(NumExpr::int(5)))?;

    let named = [("node".to_string(), SymValue::Entity(node))];
    let first = s.label_solution(&SymValue::Entity(node), &named)?;
    assert_eq!(first.labels.render("node").as_deref(), Some("Node{v: 4, next: @0}"));
    assert_eq!(first.render_returned(), "Node{v: 4, next: @0}");

    let all = s.up_to_n_solutions(&first, 10)?;
    let rendered: HashSet<String> = all
        .iter()
        .filter_map(|sol| sol.labels.render("node"))
        .collect();
    assert_eq!(
        rendered,
        HashSet::from([
            "Node{v: 4, next: @0}".to_string(),
            "Node{v: 5, next: @0}".to_string(),
        ])
    );
    assert_eq!(s.level(), 0);
    Ok(())
}

#[test]
fn input_cycles_label_as_one_cell() -> TestResult {
    let x = int_var(0);
    let mut s = small_solver()?;
    let arg = s.entities_mut().new_lazy_object(node_class(), long_var(20));
    let next = s.entities_mut().new_lazy_object(node_class(), long_var(21));
    s.apply(ObjectOp::GetField {
        object: arg,
        field: "v".into(),
        value: SymValue::var(x),
    })?;
    s.apply(ObjectOp::GetField {
        object: arg,
        field: "next".into(),
        value: SymValue::Entity(next),
    })?;
    s.add_constraint(long_var(20).eq(long_var(21)))?;
    s.add_constraint(NumExpr::var(x).ge(NumExpr::int(4)))?;
    s.add_constraint(NumExpr::var(x).le(NumExpr::int(6)))?;

    let named = [("arg0".to_string(), SymValue::Entity(arg))];
    let first = s.label_solution(&SymValue::Entity(next), &named)?;
    assert_eq!(first.labels.render("arg0").as_deref(), Some("Node{v: 4, next: @0}"));
    assert_eq!(first.render_returned(), "Node{v: 4, next: @0}");

    let all = s.up_to_n_solutions(&first, 10)?;
    let values: HashSet<String> = all
        .iter()
        .filter_map(|sol| sol.labels.render("arg0"))
        .collect();
    assert_eq!(values.len(), 3);
    assert!(values.iter().all(|v| v.ends_with("next: @0}")));
    Ok(())
}

#[test]
fn aliased_inputs_agree_on_their_fields() -> TestResult {
    let (x, y) = (int_var(0), int_var(1));
    let class = ClassInfo::builder("Cell").field("v", ValueType::int()).build();
    let mut s = small_solver()?;
    let a = s.entities_mut().new_lazy_object(class.clone(), long_var(10));
    let b = s.entities_mut().new_lazy_object(class, long_var(11));
    s.apply(ObjectOp::GetField {
        object: a,
        field: "v".into(),
        value: SymValue::var(x),
    })?;
    s.apply(ObjectOp::GetField {
        object: b,
        field: "v".into(),
        value: SymValue::var(y),
    })?;
    s.add_constraint_after_new_backtracking_point(NumExpr::var(x).ne(NumExpr::var(y)))?;
    assert!(s.is_satisfiable()?);
    assert!(!s.check_with_new_constraint(&long_var(10).eq(long_var(11)))?);

    s.backtrack_all()?;
    s.add_constraint_after_new_backtracking_point(long_var(10).eq(long_var(11)))?;
    s.add_constraint(NumExpr::var(x).eq(NumExpr::int(2)))?;
    let solution = s.label_solution(
        &SymValue::Null,
        &[
            ("a".to_string(), SymValue::Entity(a)),
            ("b".to_string(), SymValue::Entity(b)),
        ],
    )?;
    assert_eq!(solution.labels.label("a"), solution.labels.label("b"));
    assert_eq!(solution.labels.render("b").as_deref(), Some("Cell{v: 2}"));
    Ok(())
}

#[test]
fn allocations_never_equal_inputs() -> TestResult {
    let x = int_var(0);
    let class = ClassInfo::builder("Cell").field("v", ValueType::int()).build();
    let mut s = small_solver()?;
    let fresh = s.entities_mut().new_object(class.clone());
    s.apply(ObjectOp::InitObject {
        object: fresh,
        class: class.clone(),
        initial: vec![("v".into(), SymValue::int(5))],
        lazy_fields: false,
    })?;
    let input = s.entities_mut().new_lazy_object(class, long_var(10));
    s.apply(ObjectOp::GetField {
        object: input,
        field: "v".into(),
        value: SymValue::var(x),
    })?;
    s.add_constraint(NumExpr::var(x).eq(NumExpr::int(7)))?;
    assert!(s.is_satisfiable()?);
    let fresh_ident = s.entities().get(fresh)?.ident.clone();
    assert!(!s.check_with_new_constraint(&long_var(10).eq(fresh_ident))?);
    assert!(!s.check_with_new_constraint(&long_var(10).eq(NumExpr::lit(ScalarKind::Long, 0)))?);
    Ok(())
}
