//! Label extraction: from search-space values to concrete values under the
//! current model.
//!
//! Scalars are evaluated by the backend and truncated to their declared
//! width. Containers without logged operations are materialized from their
//! cache-backed contents. Containers with logged operations are rebuilt by
//! replaying those operations onto a fresh instance, in log order, labeling
//! every value written. Snapshot labels (named by a `Remember` marker) replay
//! only what was visible at the marker: every operation before it, and after
//! it only the initializations plus, for lazily initialized contents, the
//! first read of each slot not touched before, since that read reveals the
//! content the slot already had.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use symlab_ir::{
    ClassInfo, Constraint, Entity, EntityId, EntityShape, NumExpr, ObjectOp, ScalarKind, SlotKey,
    SymValue, ValueType,
};

use crate::error::{SolverError, SolverResult};
use crate::labels::{HeapCell, HeapRef, Label, LabeledValue, Labels, Solution};
use crate::manager::{CacheKey, IncrementalSolver};
use crate::solver::Backend;
use crate::theory;

/// Longest array a label may materialize.
const MAX_LABELED_LENGTH: i64 = 1 << 20;

impl<B: Backend> IncrementalSolver<B> {
    /// Make sure a model of the current constraints is at hand.
    pub(crate) fn require_model(&mut self) -> SolverResult<()> {
        if !self.is_satisfiable()? {
            return Err(SolverError::LabelingImpossible(
                "the current constraints are unsatisfiable".into(),
            ));
        }
        if self.model.is_none() {
            return Err(SolverError::LabelingImpossible(
                "the backend produced no model".into(),
            ));
        }
        Ok(())
    }

    /// Concrete value of `value` under the current model.
    pub fn label(&mut self, value: &SymValue) -> SolverResult<Label> {
        self.require_model()?;
        self.label_value(value, None, None)
    }

    /// Render a label produced by [`Self::label`].
    pub fn render_label(&self, label: &Label) -> String {
        self.heap.render(label)
    }

    /// Label the returned value and every named value. Values named by a
    /// `Remember` marker are included as well, labeled as of their marker;
    /// caller-supplied names take precedence.
    pub fn label_solution(
        &mut self,
        returned: &SymValue,
        named: &[(String, SymValue)],
    ) -> SolverResult<Solution> {
        self.require_model()?;
        let mut entries = IndexMap::new();
        for (name, value) in named {
            let label = self.label_value(value, None, None)?;
            entries.insert(
                name.clone(),
                LabeledValue {
                    value: value.clone(),
                    label,
                    snapshot: None,
                },
            );
        }
        let markers: Vec<(usize, String, SymValue)> = self
            .store
            .ops()
            .markers()
            .map(|(pos, name, value)| (pos, name.to_string(), value.clone()))
            .collect();
        for (pos, name, value) in markers {
            if named.iter().any(|(n, _)| *n == name) {
                continue;
            }
            let label = self.label_value(&value, None, Some(pos))?;
            entries.insert(
                name,
                LabeledValue {
                    value,
                    label,
                    snapshot: Some(pos),
                },
            );
        }
        let label = self.label_value(returned, None, None)?;
        Ok(Solution {
            returned: LabeledValue {
                value: returned.clone(),
                label,
                snapshot: None,
            },
            labels: Labels::new(entries, self.heap.clone()),
        })
    }

    fn cached_label(&mut self, key: &CacheKey) -> Option<Label> {
        let hit = self.label_cache.get(key).cloned();
        if hit.is_some() {
            self.stats.label_cache_hits += 1;
        }
        hit
    }

    pub(crate) fn eval_num(&mut self, e: &NumExpr) -> SolverResult<i64> {
        if let Some(v) = e.as_lit() {
            return Ok(v);
        }
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| SolverError::LabelingImpossible("no model".into()))?;
        let backend = self.store.backend_mut();
        let term = backend.translate_expression(e).map_err(Into::into)?;
        backend.eval_num(model, &term).map_err(Into::into)
    }

    fn eval_bool(&mut self, c: &Constraint) -> SolverResult<bool> {
        if let Constraint::Lit(b) = c {
            return Ok(*b);
        }
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| SolverError::LabelingImpossible("no model".into()))?;
        let backend = self.store.backend_mut();
        let term = backend.translate_constraint(c).map_err(Into::into)?;
        backend.eval_bool(model, &term).map_err(Into::into)
    }

    /// Label of a numeric value, truncated to `declared` when given.
    pub(crate) fn label_num(&mut self, e: &NumExpr, declared: Option<ScalarKind>) -> SolverResult<Label> {
        let kind = match declared {
            Some(k) if !k.is_bool() => k,
            _ => e.kind(),
        };
        if let Some(v) = e.as_lit() {
            return Ok(Label::Int {
                kind,
                value: kind.truncate(v),
            });
        }
        let key = CacheKey::Num(e.clone());
        let raw = match self.cached_label(&key) {
            Some(Label::Int { value, .. }) => value,
            Some(other) => return Ok(other),
            None => {
                let value = self.eval_num(e)?;
                self.label_cache.insert(
                    key,
                    Label::Int {
                        kind: e.kind(),
                        value,
                    },
                );
                self.stats.labels_computed += 1;
                value
            }
        };
        Ok(Label::Int {
            kind,
            value: kind.truncate(raw),
        })
    }

    fn label_bool(&mut self, c: &Constraint) -> SolverResult<Label> {
        if let Constraint::Lit(b) = c {
            return Ok(Label::Bool(*b));
        }
        let key = CacheKey::Bool(c.clone());
        if let Some(hit) = self.cached_label(&key) {
            return Ok(hit);
        }
        let label = Label::Bool(self.eval_bool(c)?);
        self.label_cache.insert(key, label.clone());
        self.stats.labels_computed += 1;
        Ok(label)
    }

    pub(crate) fn label_value(
        &mut self,
        value: &SymValue,
        declared: Option<&ValueType>,
        snapshot: Option<usize>,
    ) -> SolverResult<Label> {
        match value {
            SymValue::Null => Ok(Label::Null),
            SymValue::Num(e) => {
                let kind = match declared {
                    Some(ValueType::Scalar(k)) => Some(*k),
                    _ => None,
                };
                self.label_num(e, kind)
            }
            SymValue::Bool(c) => self.label_bool(c),
            SymValue::Entity(id) => self.label_entity(*id, snapshot),
        }
    }

    /// Labeled program identity of an entity; `0` is `null`.
    pub(crate) fn label_ident(&mut self, entity: &Entity) -> SolverResult<i64> {
        Ok(self.label_num(&entity.ident, Some(ScalarKind::Long))?.as_int().unwrap_or(0))
    }

    fn slot_of(&mut self, op: &ObjectOp) -> SolverResult<Option<SlotKey>> {
        Ok(match op {
            ObjectOp::Select { index, .. } | ObjectOp::Store { index, .. } => {
                Some(SlotKey::Index(self.eval_num(index)?))
            }
            ObjectOp::GetField { field, .. } | ObjectOp::PutField { field, .. } => {
                Some(SlotKey::Field(field.clone()))
            }
            _ => None,
        })
    }

    /// Entities the model maps to the same program object as `entity`,
    /// `entity` first.
    pub(crate) fn alias_group(&mut self, entity: &Entity, ident: i64) -> SolverResult<Vec<Entity>> {
        let mut group = vec![entity.clone()];
        if entity.is_fresh() {
            return Ok(group);
        }
        let candidates: Vec<Entity> = self
            .entities
            .iter()
            .filter(|other| {
                other.id != entity.id
                    && theory::may_alias(entity, other)
                    && other.shape.compatible_with(&entity.shape)
            })
            .cloned()
            .collect();
        for other in candidates {
            if self.label_ident(&other)? == ident {
                group.push(other);
            }
        }
        Ok(group)
    }

    /// Operations on any of `group` that shape its label, in log order.
    pub(crate) fn effective_ops(
        &mut self,
        group: &[Entity],
        snapshot: Option<usize>,
    ) -> SolverResult<Vec<ObjectOp>> {
        let ids: HashSet<EntityId> = group.iter().map(|e| e.id).collect();
        let logged: Vec<(usize, ObjectOp)> = self
            .store
            .ops()
            .ops_for_any(&ids)
            .map(|(pos, op)| (pos, op.clone()))
            .collect();
        let Some(marker) = snapshot else {
            return Ok(logged.into_iter().map(|(_, op)| op).collect());
        };
        let mut lazy = group.iter().any(|e| e.lazy);
        let mut touched: HashSet<SlotKey> = HashSet::new();
        let mut effective = Vec::new();
        for (pos, op) in logged {
            let keep = match &op {
                ObjectOp::InitArray {
                    initial,
                    lazy_contents,
                    ..
                } => {
                    lazy = *lazy_contents;
                    for (index, _) in initial {
                        let slot = SlotKey::Index(self.eval_num(index)?);
                        touched.insert(slot);
                    }
                    true
                }
                ObjectOp::InitObject {
                    initial,
                    lazy_fields,
                    ..
                } => {
                    lazy = *lazy_fields;
                    touched.extend(initial.iter().map(|(f, _)| SlotKey::Field(f.clone())));
                    true
                }
                _ if pos < marker => {
                    if let Some(slot) = self.slot_of(&op)? {
                        touched.insert(slot);
                    }
                    true
                }
                _ => match self.slot_of(&op)? {
                    Some(slot) => {
                        let first_touch = touched.insert(slot);
                        lazy && first_touch && op.is_read()
                    }
                    None => false,
                },
            };
            if keep {
                effective.push(op);
            }
        }
        Ok(effective)
    }

    fn label_entity(&mut self, id: EntityId, snapshot: Option<usize>) -> SolverResult<Label> {
        let key = match snapshot {
            None => CacheKey::Entity(id),
            Some(pos) => CacheKey::Snapshot(pos, id),
        };
        if let Some(hit) = self.cached_label(&key) {
            return Ok(hit);
        }
        let entity = self.entities.get(id)?.clone();
        let ident = self.label_ident(&entity)?;
        if ident == 0 {
            self.label_cache.insert(key, Label::Null);
            return Ok(Label::Null);
        }
        let shared = snapshot.is_none() && !entity.is_fresh();
        if shared {
            if let Some(alias) = self.cached_label(&CacheKey::Identity(ident)) {
                if self.fits(&alias, &entity.shape) {
                    self.label_cache.insert(key, alias.clone());
                    return Ok(alias);
                }
            }
        }
        let group = self.alias_group(&entity, ident)?;
        let ops = self.effective_ops(&group, snapshot)?;

        // Allocate before filling so cycles resolve to this cell.
        let placeholder = match &entity.shape {
            EntityShape::Array { elem, .. } => HeapCell::Array {
                ident,
                elem: elem.clone(),
                items: Vec::new(),
            },
            EntityShape::Object { class } => HeapCell::Object {
                ident,
                class: class.name.clone(),
                fields: IndexMap::new(),
            },
        };
        let cell = self.heap.alloc(placeholder);
        let label = Label::Ref(cell);
        for member in &group {
            let member_key = match snapshot {
                None => CacheKey::Entity(member.id),
                Some(pos) => CacheKey::Snapshot(pos, member.id),
            };
            self.label_cache.insert(member_key, label.clone());
        }
        if shared {
            self.label_cache.insert(CacheKey::Identity(ident), label.clone());
        }
        self.stats.labels_computed += 1;

        match &entity.shape {
            EntityShape::Array { elem, length } => {
                self.fill_array(cell, &group, elem, length, &ops, snapshot)?
            }
            EntityShape::Object { class } => {
                let class = class.clone();
                self.fill_object(cell, &group, &class, &ops, snapshot)?
            }
        }
        Ok(label)
    }

    /// Whether `label` can stand for an entity of `shape`.
    fn fits(&self, label: &Label, shape: &EntityShape) -> bool {
        let Label::Ref(cell) = label else {
            return false;
        };
        match (self.heap.get(*cell), shape) {
            (Some(HeapCell::Array { elem, .. }), EntityShape::Array { elem: want, .. }) => elem == want,
            (Some(HeapCell::Object { class, .. }), EntityShape::Object { class: want }) => {
                *class == want.name
            }
            _ => false,
        }
    }

    /// Cache-backed contents of the members never initialized through the
    /// log.
    fn group_cached(group: &[Entity], ops: &[ObjectOp]) -> Vec<(SlotKey, SymValue)> {
        group
            .iter()
            .filter(|member| {
                !ops.iter()
                    .any(|op| op.is_init() && op.target() == Some(member.id))
            })
            .flat_map(|member| member.cached.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    fn fill_array(
        &mut self,
        cell: HeapRef,
        group: &[Entity],
        shape_elem: &ValueType,
        shape_length: &NumExpr,
        ops: &[ObjectOp],
        snapshot: Option<usize>,
    ) -> SolverResult<()> {
        let id = group.first().map(|e| e.id.to_string()).unwrap_or_default();
        let (length, elem) = ops
            .iter()
            .find_map(|op| match op {
                ObjectOp::InitArray { length, elem, .. } => Some((length.clone(), elem.clone())),
                _ => None,
            })
            .unwrap_or_else(|| (shape_length.clone(), shape_elem.clone()));
        let len = self.eval_num(&length)?;
        if !(0..=MAX_LABELED_LENGTH).contains(&len) {
            return Err(SolverError::LabelingImpossible(format!(
                "{id} has length {len}"
            )));
        }
        let mut items = vec![Label::default_for(&elem); len as usize];
        let mut writes: Vec<(NumExpr, SymValue)> = Vec::new();
        for (slot, value) in Self::group_cached(group, ops) {
            if let SlotKey::Index(i) = slot {
                writes.push((NumExpr::int(i), value));
            }
        }
        for op in ops {
            match op {
                ObjectOp::InitArray { initial, .. } => writes.extend(initial.iter().cloned()),
                ObjectOp::Select { index, value, .. } | ObjectOp::Store { index, value, .. } => {
                    writes.push((index.clone(), value.clone()))
                }
                _ => {}
            }
        }
        for (index, value) in writes {
            let i = self.eval_num(&index)?;
            let label = self.label_value(&value, Some(&elem), snapshot)?;
            let slot = usize::try_from(i)
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| {
                    SolverError::LabelingImpossible(format!(
                        "index {i} outside {id} of length {len}"
                    ))
                })?;
            *slot = label;
        }
        if let Some(HeapCell::Array {
            items: target,
            elem: target_elem,
            ..
        }) = self.heap.get_mut(cell)
        {
            *target = items;
            *target_elem = elem;
        }
        Ok(())
    }

    fn fill_object(
        &mut self,
        cell: HeapRef,
        group: &[Entity],
        shape_class: &Arc<ClassInfo>,
        ops: &[ObjectOp],
        snapshot: Option<usize>,
    ) -> SolverResult<()> {
        let class = ops
            .iter()
            .find_map(|op| match op {
                ObjectOp::InitObject { class, .. } => Some(class.clone()),
                _ => None,
            })
            .unwrap_or_else(|| shape_class.clone());
        let mut fields: IndexMap<String, Label> = IndexMap::new();
        for f in &class.fields {
            fields.insert(f.name.clone(), Label::default_for(&f.ty));
        }
        let mut writes: Vec<(String, SymValue)> = Vec::new();
        for (slot, value) in Self::group_cached(group, ops) {
            if let SlotKey::Field(name) = slot {
                writes.push((name, value));
            }
        }
        for op in ops {
            match op {
                ObjectOp::InitObject { initial, .. } => writes.extend(initial.iter().cloned()),
                ObjectOp::GetField { field, value, .. } | ObjectOp::PutField { field, value, .. } => {
                    writes.push((field.clone(), value.clone()))
                }
                _ => {}
            }
        }
        for (name, value) in writes {
            let ty = class.field(&name).map(|f| f.ty.clone()).ok_or_else(|| {
                SolverError::LabelingImpossible(format!(
                    "class {} has no field `{name}`",
                    class.name
                ))
            })?;
            let label = self.label_value(&value, Some(&ty), snapshot)?;
            fields.insert(name, label);
        }
        if let Some(HeapCell::Object {
            fields: target,
            class: target_class,
            ..
        }) = self.heap.get_mut(cell)
        {
            *target = fields;
            *target_class = class.name.clone();
        }
        Ok(())
    }
}
