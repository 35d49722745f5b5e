//! Arena of arrays and objects addressed by stable integer ids.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::IrError;
use crate::expr::NumExpr;
use crate::value::{ClassInfo, SlotKey, SymValue, ValueType};

/// Stable handle of an array or object in an [`EntityArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityShape {
    Array { elem: ValueType, length: NumExpr },
    Object { class: Arc<ClassInfo> },
}

impl EntityShape {
    /// Whether an entity of this shape and one of `other` can denote the same
    /// program object: arrays of the same element type, or objects of the
    /// same class.
    pub fn compatible_with(&self, other: &EntityShape) -> bool {
        match (self, other) {
            (EntityShape::Array { elem: a, .. }, EntityShape::Array { elem: b, .. }) => a == b,
            (EntityShape::Object { class: a }, EntityShape::Object { class: b }) => a.name == b.name,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub shape: EntityShape,
    /// Program-level identity. Fresh allocations get distinct negative
    /// literals; inputs carry a symbolic identity that is `0` (`null`) or
    /// positive once dereferenced, so they may alias each other but never a
    /// fresh allocation.
    pub ident: NumExpr,
    /// Contents are unknown until read (lazily initialized input).
    pub lazy: bool,
    /// Contents known without asking the solver, used while the entity has
    /// no solver-side representation.
    pub cached: IndexMap<SlotKey, SymValue>,
}

impl Entity {
    /// Allocated by the program under test rather than received as input.
    pub fn is_fresh(&self) -> bool {
        matches!(self.ident.as_lit(), Some(i) if i < 0)
    }

    /// Declared type of the given slot.
    pub fn slot_type(&self, slot: &SlotKey) -> Result<ValueType, IrError> {
        match (&self.shape, slot) {
            (EntityShape::Array { elem, .. }, SlotKey::Index(_)) => Ok(elem.clone()),
            (EntityShape::Object { class }, SlotKey::Field(name)) => class
                .field(name)
                .map(|f| f.ty.clone())
                .ok_or_else(|| IrError::NoSuchField {
                    class: class.name.clone(),
                    field: name.clone(),
                }),
            (EntityShape::Array { .. }, SlotKey::Field(_)) => Err(IrError::NotAnObject(self.id)),
            (EntityShape::Object { .. }, SlotKey::Index(_)) => Err(IrError::NotAnArray(self.id)),
        }
    }
}

/// Owner of every entity a search worker has seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityArena {
    entities: Vec<Entity>,
    next_ident: i64,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, shape: EntityShape, ident: Option<NumExpr>, lazy: bool) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        let ident = ident.unwrap_or_else(|| {
            self.next_ident -= 1;
            NumExpr::long(self.next_ident)
        });
        self.entities.push(Entity {
            id,
            shape,
            ident,
            lazy,
            cached: IndexMap::new(),
        });
        id
    }

    /// A freshly allocated array with a unique concrete identity.
    pub fn new_array(&mut self, elem: ValueType, length: NumExpr) -> EntityId {
        self.push(EntityShape::Array { elem, length }, None, false)
    }

    /// A freshly allocated object with a unique concrete identity.
    pub fn new_object(&mut self, class: Arc<ClassInfo>) -> EntityId {
        self.push(EntityShape::Object { class }, None, false)
    }

    /// An input array whose identity and contents are symbolic.
    pub fn new_lazy_array(&mut self, elem: ValueType, length: NumExpr, ident: NumExpr) -> EntityId {
        self.push(EntityShape::Array { elem, length }, Some(ident), true)
    }

    /// An input object whose identity and fields are symbolic.
    pub fn new_lazy_object(&mut self, class: Arc<ClassInfo>, ident: NumExpr) -> EntityId {
        self.push(EntityShape::Object { class }, Some(ident), true)
    }

    pub fn get(&self, id: EntityId) -> Result<&Entity, IrError> {
        self.entities
            .get(id.0 as usize)
            .ok_or(IrError::UnknownEntity(id))
    }

    /// Record a slot value known without the solver.
    pub fn set_cached(&mut self, id: EntityId, slot: SlotKey, value: SymValue) -> Result<(), IrError> {
        let entity = self
            .entities
            .get_mut(id.0 as usize)
            .ok_or(IrError::UnknownEntity(id))?;
        entity.slot_type(&slot)?;
        if let (EntityShape::Array { length, .. }, SlotKey::Index(i)) = (&entity.shape, &slot) {
            if let Some(len) = length.as_lit() {
                if *i < 0 || *i >= len {
                    return Err(IrError::IndexOutOfBounds {
                        entity: id,
                        index: *i,
                        length: len,
                    });
                }
            }
        }
        entity.cached.insert(slot, value);
        Ok(())
    }

    pub fn cached(&self, id: EntityId, slot: &SlotKey) -> Option<&SymValue> {
        self.get(id).ok().and_then(|e| e.cached.get(slot))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.next_ident = 0;
    }
}
