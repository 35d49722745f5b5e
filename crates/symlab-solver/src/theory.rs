//! High-level object theory.
//!
//! Arrays and objects are modeled without any native array or record
//! theory. Each entity has a representation per level (see
//! [`ScopedStore`]); every operation first copies the newest
//! representation forward to the current level and then reads or updates
//! that copy only. Reads become plain constraints over the values involved.
//!
//! Inputs with symbolic identities may alias each other. A read of such an
//! entity is resolved against the operation log of every compatible entity
//! it may alias: the newest write or read of the same slot on an entity
//! with an equal identity decides the value.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use symlab_ir::{
    ClassInfo, Constraint, Entity, EntityArena, EntityId, EntityShape, NumExpr, ObjectOp, SlotKey,
    SymValue, ValueType,
};

use crate::error::{SolverError, SolverResult};
use crate::solver::Backend;
use crate::store::ScopedStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRepr {
    pub length: NumExpr,
    pub elem: ValueType,
    /// Slots never written are unknown until first read.
    pub lazy: bool,
    /// Known `(index, value)` pairs, newest first.
    pub slots: Vec<(NumExpr, SymValue)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRepr {
    pub class: Arc<ClassInfo>,
    pub lazy: bool,
    pub fields: IndexMap<String, SymValue>,
}

impl ObjectRepr {
    pub fn new(class: Arc<ClassInfo>, lazy: bool) -> Self {
        Self {
            class,
            lazy,
            fields: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    Array(ArrayRepr),
    Object(ObjectRepr),
}

impl Representation {
    /// Representation of an entity first met through an operation other
    /// than its initialization, seeded with its cache-backed contents.
    pub fn discovered(entity: &Entity) -> Self {
        match &entity.shape {
            EntityShape::Array { elem, length } => {
                let mut slots: Vec<(NumExpr, SymValue)> = entity
                    .cached
                    .iter()
                    .filter_map(|(slot, value)| match slot {
                        SlotKey::Index(i) => Some((NumExpr::int(*i), value.clone())),
                        SlotKey::Field(_) => None,
                    })
                    .collect();
                slots.reverse();
                Representation::Array(ArrayRepr {
                    length: length.clone(),
                    elem: elem.clone(),
                    lazy: entity.lazy,
                    slots,
                })
            }
            EntityShape::Object { class } => {
                let mut repr = ObjectRepr::new(class.clone(), entity.lazy);
                for (slot, value) in &entity.cached {
                    if let SlotKey::Field(name) = slot {
                        repr.fields.insert(name.clone(), value.clone());
                    }
                }
                Representation::Object(repr)
            }
        }
    }
}

/// `a == b` for values of the same sort. Containers compare by identity,
/// booleans through equivalence. A fresh allocation never equals an input.
pub fn value_eq(arena: &EntityArena, a: &SymValue, b: &SymValue) -> SolverResult<Constraint> {
    if a == b {
        return Ok(Constraint::TRUE);
    }
    match (a, b) {
        (SymValue::Num(x), SymValue::Num(y)) => Ok(x.clone().eq(y.clone())),
        (SymValue::Bool(x), SymValue::Bool(y)) => Ok(x.clone().iff(y.clone())),
        (SymValue::Entity(x), SymValue::Entity(y)) => {
            let (x, y) = (arena.get(*x)?, arena.get(*y)?);
            Ok(if may_alias(x, y) {
                same_object(x, y)
            } else {
                Constraint::FALSE
            })
        }
        (SymValue::Entity(x), SymValue::Null) | (SymValue::Null, SymValue::Entity(x)) => {
            let ident = &arena.get(*x)?.ident;
            Ok(match ident.as_lit() {
                Some(i) => Constraint::Lit(i == 0),
                None => ident.clone().eq(NumExpr::lit(ident.kind(), 0)),
            })
        }
        _ => Err(SolverError::InvalidOperation(format!(
            "cannot equate {a:?} with {b:?}"
        ))),
    }
}

fn in_bounds(index: &NumExpr, length: &NumExpr) -> Constraint {
    if let (Some(i), Some(len)) = (index.as_lit(), length.as_lit()) {
        return Constraint::Lit(0 <= i && i < len);
    }
    NumExpr::int(0)
        .le(index.clone())
        .conjoin(index.clone().lt(length.clone()))
}

/// Constraint equating `value` with the content of `slots` at `index`, or
/// `None` when no known slot can match and the base content is unknown.
fn select_from(
    arena: &EntityArena,
    slots: &[(NumExpr, SymValue)],
    index: &NumExpr,
    value: &SymValue,
    base: Option<&SymValue>,
) -> SolverResult<Option<Constraint>> {
    let Some(((slot_index, slot_value), older)) = slots.split_first() else {
        return base.map(|b| value_eq(arena, value, b)).transpose();
    };
    if slot_index == index {
        return value_eq(arena, value, slot_value).map(Some);
    }
    if index.is_concrete() && slot_index.is_concrete() {
        // distinct concrete indices
        return select_from(arena, older, index, value, base);
    }
    let here = index
        .clone()
        .eq(slot_index.clone())
        .conjoin(value_eq(arena, value, slot_value)?);
    let elsewhere = select_from(arena, older, index, value, base)?;
    let not_here = index.clone().ne(slot_index.clone());
    Ok(Some(match elsewhere {
        Some(rest) => Constraint::any(vec![here, not_here.conjoin(rest)]),
        // unknown base: any index other than this slot is unconstrained
        None => Constraint::any(vec![here, not_here]),
    }))
}

/// Whether `a` and `b` can denote the same program object. Fresh
/// allocations only alias themselves; inputs may alias each other.
pub fn may_alias(a: &Entity, b: &Entity) -> bool {
    if a.id == b.id {
        return true;
    }
    match (a.ident.as_lit(), b.ident.as_lit()) {
        (Some(x), Some(y)) => x == y,
        _ => !a.is_fresh() && !b.is_fresh(),
    }
}

/// `a` and `b` are the same program object.
fn same_object(a: &Entity, b: &Entity) -> Constraint {
    if a.id == b.id {
        return Constraint::TRUE;
    }
    match (a.ident.as_lit(), b.ident.as_lit()) {
        (Some(x), Some(y)) => Constraint::Lit(x == y),
        _ => a.ident.clone().eq(b.ident.clone()),
    }
}

fn same_index(i: &NumExpr, j: &NumExpr) -> Constraint {
    if i == j {
        return Constraint::TRUE;
    }
    match (i.as_lit(), j.as_lit()) {
        (Some(x), Some(y)) => Constraint::Lit(x == y),
        _ => i.clone().eq(j.clone()),
    }
}

/// Accessing `entity` requires it to be non-null. Input identities are
/// positive once dereferenced, which keeps them apart from fresh ones.
fn dereference(entity: &Entity) -> Constraint {
    if entity.ident.is_concrete() {
        Constraint::TRUE
    } else {
        NumExpr::lit(entity.ident.kind(), 0).lt(entity.ident.clone())
    }
}

/// The newest representation of `entity`, or the one it would get on
/// discovery.
fn view<'a, B: Backend>(store: &'a ScopedStore<B>, entity: &Entity) -> Cow<'a, Representation> {
    match store.current_representation(entity.id) {
        Some(repr) => Cow::Borrowed(repr),
        None => Cow::Owned(Representation::discovered(entity)),
    }
}

fn array_view<'a, B: Backend>(
    store: &'a ScopedStore<B>,
    entity: &Entity,
) -> SolverResult<Cow<'a, ArrayRepr>> {
    match view(store, entity) {
        Cow::Borrowed(Representation::Array(a)) => Ok(Cow::Borrowed(a)),
        Cow::Owned(Representation::Array(a)) => Ok(Cow::Owned(a)),
        _ => Err(SolverError::InvalidOperation(format!(
            "{} is not an array",
            entity.id
        ))),
    }
}

fn object_view<'a, B: Backend>(
    store: &'a ScopedStore<B>,
    entity: &Entity,
) -> SolverResult<Cow<'a, ObjectRepr>> {
    match view(store, entity) {
        Cow::Borrowed(Representation::Object(o)) => Ok(Cow::Borrowed(o)),
        Cow::Owned(Representation::Object(o)) => Ok(Cow::Owned(o)),
        _ => Err(SolverError::InvalidOperation(format!(
            "{} is not an object",
            entity.id
        ))),
    }
}

/// Entities other than `entity` with logged or cached contents that may
/// alias it, split by whether their shape is compatible.
struct Partners<'a> {
    compatible: Vec<&'a Entity>,
    incompatible: Vec<&'a Entity>,
}

fn find_partners<'a, B: Backend>(
    store: &ScopedStore<B>,
    arena: &'a EntityArena,
    entity: &Entity,
) -> Partners<'a> {
    let mut found = Partners {
        compatible: Vec::new(),
        incompatible: Vec::new(),
    };
    if entity.is_fresh() {
        return found;
    }
    let touched: HashSet<EntityId> = store.ops().iter().filter_map(ObjectOp::target).collect();
    for other in arena.iter() {
        if other.id == entity.id || !may_alias(entity, other) {
            continue;
        }
        if !touched.contains(&other.id) && other.cached.is_empty() {
            continue;
        }
        if other.shape.compatible_with(&entity.shape) {
            found.compatible.push(other);
        } else {
            found.incompatible.push(other);
        }
    }
    found
}

/// Identity facts every access to `entity` carries: it is distinct from
/// every incompatible partner, and shares its length with every aliased
/// array.
fn identity_constraints<B: Backend>(
    store: &ScopedStore<B>,
    entity: &Entity,
    partners: &Partners<'_>,
) -> SolverResult<Constraint> {
    let mut c = Constraint::TRUE;
    for other in &partners.incompatible {
        c = c.conjoin(same_object(entity, other).not());
    }
    if let EntityShape::Array { .. } = entity.shape {
        let length = array_view(store, entity)?.length.clone();
        for other in &partners.compatible {
            let other_length = array_view(store, other)?.length.clone();
            if other_length != length {
                c = c.conjoin(same_object(entity, other).implies(length.clone().eq(other_length)));
            }
        }
    }
    Ok(c)
}

enum Slot<'a> {
    Index(&'a NumExpr),
    Field(&'a str),
}

/// "The slot holds `value`" whenever `cond` holds and no newer fact applies.
struct Fact {
    cond: Constraint,
    value: SymValue,
}

fn default_of(entity: &Entity, slot: &Slot<'_>) -> Option<SymValue> {
    match (&entity.shape, slot) {
        (EntityShape::Array { elem, .. }, Slot::Index(_)) => Some(elem.default_value()),
        (EntityShape::Object { class }, Slot::Field(name)) => {
            class.field(name).map(|f| f.ty.default_value())
        }
        _ => None,
    }
}

/// Content facts about `slot` of every member of `members`, newest first:
/// the logged operations, then cache-backed contents and eager defaults of
/// members never initialized through the log.
fn slot_facts<B: Backend>(
    store: &ScopedStore<B>,
    reader: &Entity,
    members: &[&Entity],
    slot: &Slot<'_>,
) -> Vec<Fact> {
    let mut facts = Vec::new();
    let mut initialized: HashSet<EntityId> = HashSet::new();
    for op in store.ops().iter().rev() {
        let Some(owner) = op.target().and_then(|t| members.iter().find(|m| m.id == t)) else {
            continue;
        };
        let same = same_object(reader, owner);
        match (op, slot) {
            (
                ObjectOp::Select { index, value, .. } | ObjectOp::Store { index, value, .. },
                Slot::Index(i),
            ) => facts.push(Fact {
                cond: same.conjoin(same_index(i, index)),
                value: value.clone(),
            }),
            (
                ObjectOp::GetField { field, value, .. } | ObjectOp::PutField { field, value, .. },
                Slot::Field(name),
            ) if field == name => facts.push(Fact {
                cond: same,
                value: value.clone(),
            }),
            (
                ObjectOp::InitArray {
                    elem,
                    initial,
                    lazy_contents,
                    ..
                },
                Slot::Index(i),
            ) => {
                initialized.insert(owner.id);
                for (index, value) in initial.iter().rev() {
                    facts.push(Fact {
                        cond: same.clone().conjoin(same_index(i, index)),
                        value: value.clone(),
                    });
                }
                if !lazy_contents {
                    facts.push(Fact {
                        cond: same,
                        value: elem.default_value(),
                    });
                }
            }
            (
                ObjectOp::InitObject {
                    class,
                    initial,
                    lazy_fields,
                    ..
                },
                Slot::Field(name),
            ) => {
                initialized.insert(owner.id);
                for (field, value) in initial.iter().rev() {
                    if field == name {
                        facts.push(Fact {
                            cond: same.clone(),
                            value: value.clone(),
                        });
                    }
                }
                if let (false, Some(f)) = (*lazy_fields, class.field(name)) {
                    facts.push(Fact {
                        cond: same,
                        value: f.ty.default_value(),
                    });
                }
            }
            _ => {}
        }
    }
    for member in members {
        if initialized.contains(&member.id) {
            continue;
        }
        let same = same_object(reader, member);
        for (key, value) in &member.cached {
            let cond = match (key, slot) {
                (SlotKey::Index(k), Slot::Index(i)) => same_index(i, &NumExpr::int(*k)),
                (SlotKey::Field(f), Slot::Field(name)) if f == name => Constraint::TRUE,
                _ => continue,
            };
            facts.push(Fact {
                cond: same.clone().conjoin(cond),
                value: value.clone(),
            });
        }
        if !member.lazy {
            if let Some(default) = default_of(member, slot) {
                facts.push(Fact {
                    cond: same,
                    value: default,
                });
            }
        }
    }
    facts
}

/// `value` equals the newest applicable fact; `None` when no fact exists.
fn read_from_facts(
    arena: &EntityArena,
    facts: &[Fact],
    value: &SymValue,
) -> SolverResult<Option<Constraint>> {
    let mut read: Option<Constraint> = None;
    for fact in facts.iter().rev() {
        if fact.cond == Constraint::FALSE {
            continue;
        }
        let here = value_eq(arena, value, &fact.value)?;
        read = Some(if fact.cond.is_true() {
            here
        } else {
            let miss = fact.cond.clone().not();
            Constraint::any(vec![
                fact.cond.clone().conjoin(here),
                match read {
                    Some(older) => miss.conjoin(older),
                    None => miss,
                },
            ])
        });
    }
    Ok(read)
}

/// Read constraint for `slot` of `entity` when other entities may alias
/// it; `None` when `entity` has no compatible partner.
fn aliased_read<B: Backend>(
    store: &ScopedStore<B>,
    arena: &EntityArena,
    entity: &Entity,
    partners: &Partners<'_>,
    slot: &Slot<'_>,
    value: &SymValue,
) -> SolverResult<Option<Constraint>> {
    if partners.compatible.is_empty() {
        return Ok(None);
    }
    let mut members = vec![entity];
    members.extend(partners.compatible.iter().copied());
    let facts = slot_facts(store, entity, &members, slot);
    Ok(Some(read_from_facts(arena, &facts, value)?.unwrap_or(Constraint::TRUE)))
}

fn array_mut<'a, B: Backend>(
    store: &'a mut ScopedStore<B>,
    arena: &EntityArena,
    id: EntityId,
) -> SolverResult<&'a mut ArrayRepr> {
    let entity = arena.get(id)?;
    if store.current_representation(id).is_none() {
        store.insert_representation(id, Representation::discovered(entity));
    }
    match store.representation_for_update(id) {
        Some(Representation::Array(a)) => Ok(a),
        _ => Err(SolverError::InvalidOperation(format!("{id} is not an array"))),
    }
}

fn object_mut<'a, B: Backend>(
    store: &'a mut ScopedStore<B>,
    arena: &EntityArena,
    id: EntityId,
) -> SolverResult<&'a mut ObjectRepr> {
    let entity = arena.get(id)?;
    if store.current_representation(id).is_none() {
        store.insert_representation(id, Representation::discovered(entity));
    }
    match store.representation_for_update(id) {
        Some(Representation::Object(o)) => Ok(o),
        _ => Err(SolverError::InvalidOperation(format!("{id} is not an object"))),
    }
}

fn field_type(class: &ClassInfo, field: &str) -> SolverResult<ValueType> {
    class.field(field).map(|f| f.ty.clone()).ok_or_else(|| {
        SolverError::InvalidOperation(format!("class {} has no field `{field}`", class.name))
    })
}

/// Constraint `op` contributes under the current representations. Nothing
/// is changed; [`record`] performs the matching update.
pub fn constraint_for<B: Backend>(
    store: &ScopedStore<B>,
    arena: &EntityArena,
    op: &ObjectOp,
) -> SolverResult<Constraint> {
    match op {
        ObjectOp::InitArray {
            array,
            length,
            initial,
            ..
        } => {
            arena.get(*array)?;
            let mut c = if length.is_concrete() {
                Constraint::TRUE
            } else {
                NumExpr::int(0).le(length.clone())
            };
            for (index, _) in initial {
                c = c.conjoin(in_bounds(index, length));
            }
            Ok(c)
        }
        ObjectOp::Select {
            array,
            index,
            value,
        } => {
            let entity = arena.get(*array)?;
            let repr = array_view(store, entity)?;
            let partners = find_partners(store, arena, entity);
            let read = match aliased_read(store, arena, entity, &partners, &Slot::Index(index), value)? {
                Some(c) => c,
                None => {
                    let base = (!repr.lazy).then(|| repr.elem.default_value());
                    select_from(arena, &repr.slots, index, value, base.as_ref())?
                        .unwrap_or(Constraint::TRUE)
                }
            };
            Ok(dereference(entity)
                .conjoin(identity_constraints(store, entity, &partners)?)
                .conjoin(in_bounds(index, &repr.length))
                .conjoin(read))
        }
        ObjectOp::Store { array, index, .. } => {
            let entity = arena.get(*array)?;
            let repr = array_view(store, entity)?;
            let partners = find_partners(store, arena, entity);
            Ok(dereference(entity)
                .conjoin(identity_constraints(store, entity, &partners)?)
                .conjoin(in_bounds(index, &repr.length)))
        }
        ObjectOp::InitObject {
            object,
            class,
            initial,
            ..
        } => {
            arena.get(*object)?;
            for (name, _) in initial {
                field_type(class, name)?;
            }
            Ok(Constraint::TRUE)
        }
        ObjectOp::GetField {
            object,
            field,
            value,
        } => {
            let entity = arena.get(*object)?;
            let repr = object_view(store, entity)?;
            let ty = field_type(&repr.class, field)?;
            let partners = find_partners(store, arena, entity);
            let read = match aliased_read(store, arena, entity, &partners, &Slot::Field(field), value)? {
                Some(c) => c,
                None => match repr.fields.get(field) {
                    Some(known) => value_eq(arena, value, known)?,
                    None if repr.lazy => Constraint::TRUE,
                    None => value_eq(arena, value, &ty.default_value())?,
                },
            };
            Ok(dereference(entity)
                .conjoin(identity_constraints(store, entity, &partners)?)
                .conjoin(read))
        }
        ObjectOp::PutField { object, field, .. } => {
            let entity = arena.get(*object)?;
            field_type(&object_view(store, entity)?.class, field)?;
            let partners = find_partners(store, arena, entity);
            Ok(dereference(entity).conjoin(identity_constraints(store, entity, &partners)?))
        }
        ObjectOp::Remember { .. } => Ok(Constraint::TRUE),
    }
}

/// Update the current level's representations for `op`, copying them
/// forward first.
pub fn record<B: Backend>(
    store: &mut ScopedStore<B>,
    arena: &EntityArena,
    op: &ObjectOp,
) -> SolverResult<()> {
    match op {
        ObjectOp::InitArray {
            array,
            length,
            elem,
            initial,
            lazy_contents,
        } => {
            store.insert_representation(
                *array,
                Representation::Array(ArrayRepr {
                    length: length.clone(),
                    elem: elem.clone(),
                    lazy: *lazy_contents,
                    slots: initial.iter().rev().cloned().collect(),
                }),
            );
        }
        ObjectOp::Select { array, index, value } => {
            let repr = array_mut(store, arena, *array)?;
            if repr.lazy && !repr.slots.iter().any(|(i, _)| i == index) {
                // first observation of this slot's initial content
                repr.slots.push((index.clone(), value.clone()));
            }
        }
        ObjectOp::Store { array, index, value } => {
            let repr = array_mut(store, arena, *array)?;
            if index.is_concrete() {
                repr.slots.retain(|(i, _)| i != index);
            }
            repr.slots.insert(0, (index.clone(), value.clone()));
        }
        ObjectOp::InitObject {
            object,
            class,
            initial,
            lazy_fields,
        } => {
            let mut repr = ObjectRepr::new(class.clone(), *lazy_fields);
            repr.fields.extend(initial.iter().cloned());
            store.insert_representation(*object, Representation::Object(repr));
        }
        ObjectOp::GetField { object, field, value } => {
            let repr = object_mut(store, arena, *object)?;
            if !repr.fields.contains_key(field) {
                let seen = if repr.lazy {
                    value.clone()
                } else {
                    field_type(&repr.class, field)?.default_value()
                };
                repr.fields.insert(field.clone(), seen);
            }
        }
        ObjectOp::PutField { object, field, value } => {
            let repr = object_mut(store, arena, *object)?;
            repr.fields.insert(field.clone(), value.clone());
        }
        ObjectOp::Remember { .. } => {}
    }
    Ok(())
}

/// [`constraint_for`] followed by [`record`].
pub fn apply<B: Backend>(
    store: &mut ScopedStore<B>,
    arena: &EntityArena,
    op: &ObjectOp,
) -> SolverResult<Constraint> {
    let c = constraint_for(store, arena, op)?;
    record(store, arena, op)?;
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::finite_domain::FiniteDomainBackend;
    use crate::config::{DomainBounds, SolverOptions};
    use crate::solver::SatResult;
    use symlab_ir::{ScalarKind, SymVar};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn setup() -> (ScopedStore<FiniteDomainBackend>, EntityArena) {
        let store = ScopedStore::new(
            FiniteDomainBackend::new(DomainBounds::default()),
            &SolverOptions::default(),
        );
        (store, EntityArena::new())
    }

    fn var(id: u32) -> NumExpr {
        NumExpr::var(SymVar::new(id, ScalarKind::Int))
    }

    fn run(
        store: &mut ScopedStore<FiniteDomainBackend>,
        arena: &EntityArena,
        op: ObjectOp,
    ) -> TestResult {
        let c = apply(store, arena, &op)?;
        store.add_constraint(c)?;
        store.log_op(op);
        Ok(())
    }

    #[test]
    fn store_then_select_reads_back() -> TestResult {
        let (mut store, mut arena) = setup();
        let arr = arena.new_array(ValueType::int(), NumExpr::int(3));
        run(&mut store, &arena, ObjectOp::InitArray {
            array: arr,
            length: NumExpr::int(3),
            elem: ValueType::int(),
            initial: vec![],
            lazy_contents: false,
        })?;
        run(&mut store, &arena, ObjectOp::Store {
            array: arr,
            index: var(0),
            value: SymValue::int(7),
        })?;
        let c = apply(&mut store, &arena, &ObjectOp::Select {
            array: arr,
            index: var(0),
            value: SymValue::Num(var(1)),
        })?;
        assert_eq!(store.probe(&c.clone().conjoin(var(1).ne(NumExpr::int(7))))?, SatResult::Unsat);
        assert_eq!(store.probe(&c)?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn eager_arrays_read_defaults() -> TestResult {
        let (mut store, mut arena) = setup();
        let arr = arena.new_array(ValueType::int(), NumExpr::int(2));
        run(&mut store, &arena, ObjectOp::InitArray {
            array: arr,
            length: NumExpr::int(2),
            elem: ValueType::int(),
            initial: vec![(NumExpr::int(0), SymValue::int(4))],
            lazy_contents: false,
        })?;
        let c = apply(&mut store, &arena, &ObjectOp::Select {
            array: arr,
            index: NumExpr::int(1),
            value: SymValue::Num(var(0)),
        })?;
        assert_eq!(c, var(0).eq(NumExpr::int(0)));
        Ok(())
    }

    #[test]
    fn out_of_bounds_concrete_select_is_false() -> TestResult {
        let (mut store, mut arena) = setup();
        let arr = arena.new_array(ValueType::int(), NumExpr::int(1));
        let c = apply(&mut store, &arena, &ObjectOp::Select {
            array: arr,
            index: NumExpr::int(1),
            value: SymValue::int(0),
        })?;
        store.add_constraint(c)?;
        assert_eq!(store.check()?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn lazy_reads_are_remembered() -> TestResult {
        let (mut store, mut arena) = setup();
        let class = ClassInfo::builder("Node").field("val", ValueType::int()).build();
        let obj = arena.new_lazy_object(class, var(9));
        let first = apply(&mut store, &arena, &ObjectOp::GetField {
            object: obj,
            field: "val".into(),
            value: SymValue::Num(var(1)),
        })?;
        assert_eq!(first, NumExpr::int(0).lt(var(9)));
        let second = apply(&mut store, &arena, &ObjectOp::GetField {
            object: obj,
            field: "val".into(),
            value: SymValue::Num(var(2)),
        })?;
        assert_eq!(second, NumExpr::int(0).lt(var(9)).conjoin(var(2).eq(var(1))));
        Ok(())
    }

    #[test]
    fn writes_stay_in_their_level() -> TestResult {
        let (mut store, mut arena) = setup();
        let class = ClassInfo::builder("Box").field("v", ValueType::int()).build();
        let obj = arena.new_object(class.clone());
        run(&mut store, &arena, ObjectOp::InitObject {
            object: obj,
            class,
            initial: vec![("v".into(), SymValue::int(1))],
            lazy_fields: false,
        })?;
        store.push_level(Constraint::TRUE)?;
        run(&mut store, &arena, ObjectOp::PutField {
            object: obj,
            field: "v".into(),
            value: SymValue::int(2),
        })?;
        store.pop_levels(1)?;
        match store.current_representation(obj) {
            Some(Representation::Object(o)) => assert_eq!(o.fields.get("v"), Some(&SymValue::int(1))),
            other => panic!("unexpected representation {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_fields_and_shapes_are_invalid() {
        let (mut store, mut arena) = setup();
        let class = ClassInfo::builder("Box").field("v", ValueType::int()).build();
        let obj = arena.new_object(class);
        let bad_field = apply(&mut store, &arena, &ObjectOp::PutField {
            object: obj,
            field: "w".into(),
            value: SymValue::int(0),
        });
        assert!(matches!(bad_field, Err(SolverError::InvalidOperation(_))));
        let bad_shape = apply(&mut store, &arena, &ObjectOp::Store {
            array: obj,
            index: NumExpr::int(0),
            value: SymValue::int(0),
        });
        assert!(matches!(bad_shape, Err(SolverError::InvalidOperation(_))));
        let missing = apply(&mut store, &arena, &ObjectOp::GetField {
            object: EntityId(42),
            field: "v".into(),
            value: SymValue::int(0),
        });
        assert!(matches!(missing, Err(SolverError::InvalidOperation(_))));
    }

    #[test]
    fn entity_equality_is_identity_equality() -> TestResult {
        let mut arena = EntityArena::new();
        let a = arena.new_array(ValueType::int(), NumExpr::int(1));
        let b = arena.new_array(ValueType::int(), NumExpr::int(1));
        let input = arena.new_lazy_array(ValueType::int(), NumExpr::int(1), long(4));
        let other = arena.new_lazy_array(ValueType::int(), NumExpr::int(1), long(5));
        let eq = |x, y| value_eq(&arena, &SymValue::Entity(x), &SymValue::Entity(y));
        assert_eq!(eq(a, b)?, Constraint::FALSE);
        assert_eq!(eq(a, a)?, Constraint::TRUE);
        assert_eq!(eq(input, a)?, Constraint::FALSE);
        assert_eq!(eq(input, other)?, long(4).eq(long(5)));
        let null = |x| value_eq(&arena, &SymValue::Entity(x), &SymValue::Null);
        assert_eq!(null(a)?, Constraint::FALSE);
        assert_eq!(null(input)?, long(4).eq(NumExpr::long(0)));
        assert!(value_eq(&arena, &SymValue::int(1), &SymValue::Null).is_err());
        Ok(())
    }

    fn long(id: u32) -> NumExpr {
        NumExpr::var(SymVar::new(id, ScalarKind::Long))
    }

    /// Small domains so the finite-domain search can refute.
    fn small_setup() -> (ScopedStore<FiniteDomainBackend>, EntityArena) {
        let domain = DomainBounds::default()
            .with(ScalarKind::Int, -4, 4)
            .with(ScalarKind::Long, -4, 4);
        let store = ScopedStore::new(FiniteDomainBackend::new(domain), &SolverOptions::default());
        (store, EntityArena::new())
    }

    fn cell_class() -> Arc<ClassInfo> {
        ClassInfo::builder("Cell").field("v", ValueType::int()).build()
    }

    fn get(object: EntityId, value: NumExpr) -> ObjectOp {
        ObjectOp::GetField {
            object,
            field: "v".into(),
            value: SymValue::Num(value),
        }
    }

    #[test]
    fn aliased_inputs_read_the_same_field_value() -> TestResult {
        let (mut store, mut arena) = small_setup();
        let a = arena.new_lazy_object(cell_class(), long(10));
        let b = arena.new_lazy_object(cell_class(), long(11));
        run(&mut store, &arena, get(a, var(0)))?;
        run(&mut store, &arena, get(b, var(1)))?;
        store.add_constraint(var(0).ne(var(1)))?;
        assert_eq!(store.check()?, SatResult::Sat);
        assert_eq!(store.probe(&long(10).eq(long(11)))?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn writes_are_visible_through_an_alias() -> TestResult {
        let (mut store, mut arena) = small_setup();
        let a = arena.new_lazy_object(cell_class(), long(10));
        let b = arena.new_lazy_object(cell_class(), long(11));
        run(&mut store, &arena, get(b, var(0)))?;
        run(&mut store, &arena, ObjectOp::PutField {
            object: a,
            field: "v".into(),
            value: SymValue::int(3),
        })?;
        run(&mut store, &arena, get(b, var(1)))?;
        store.add_constraint(long(10).eq(long(11)))?;
        assert_eq!(store.probe(&var(1).ne(NumExpr::int(3)))?, SatResult::Unsat);
        // the value read before the write is unaffected
        assert_eq!(store.probe(&var(0).ne(NumExpr::int(3)))?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn aliased_arrays_share_contents_and_length() -> TestResult {
        let (mut store, mut arena) = small_setup();
        let a = arena.new_lazy_array(ValueType::int(), var(5), long(10));
        let b = arena.new_lazy_array(ValueType::int(), var(6), long(11));
        run(&mut store, &arena, ObjectOp::Store {
            array: a,
            index: var(2),
            value: SymValue::int(1),
        })?;
        run(&mut store, &arena, ObjectOp::Select {
            array: b,
            index: NumExpr::int(0),
            value: SymValue::Num(var(3)),
        })?;
        store.add_constraint(long(10).eq(long(11)))?;
        store.add_constraint(var(2).eq(NumExpr::int(0)))?;
        assert_eq!(store.probe(&var(3).ne(NumExpr::int(1)))?, SatResult::Unsat);
        assert_eq!(store.probe(&var(5).ne(var(6)))?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn incompatible_inputs_never_alias() -> TestResult {
        let (mut store, mut arena) = small_setup();
        let obj = arena.new_lazy_object(cell_class(), long(10));
        let arr = arena.new_lazy_array(ValueType::int(), NumExpr::int(1), long(11));
        run(&mut store, &arena, get(obj, var(0)))?;
        run(&mut store, &arena, ObjectOp::Select {
            array: arr,
            index: NumExpr::int(0),
            value: SymValue::Num(var(1)),
        })?;
        assert_eq!(store.check()?, SatResult::Sat);
        assert_eq!(store.probe(&long(10).eq(long(11)))?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn inputs_cannot_be_fresh_allocations() -> TestResult {
        let (mut store, mut arena) = small_setup();
        let fresh = arena.new_object(cell_class());
        run(&mut store, &arena, ObjectOp::InitObject {
            object: fresh,
            class: cell_class(),
            initial: vec![("v".into(), SymValue::int(5))],
            lazy_fields: false,
        })?;
        let input = arena.new_lazy_object(cell_class(), long(10));
        run(&mut store, &arena, get(input, var(0)))?;
        let fresh_ident = arena.get(fresh)?.ident.clone();
        assert_eq!(store.check()?, SatResult::Sat);
        assert_eq!(store.probe(&long(10).eq(fresh_ident))?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn constraints_are_computed_without_side_effects() -> TestResult {
        let (store, mut arena) = small_setup();
        let obj = arena.new_lazy_object(cell_class(), long(10));
        let c = constraint_for(&store, &arena, &get(obj, var(0)))?;
        assert_eq!(c, NumExpr::long(0).lt(long(10)));
        assert!(store.current_representation(obj).is_none());
        Ok(())
    }
}
