use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::expr::{Constraint, NumExpr};
use crate::kinds::{ScalarKind, SymVar};

/// A value as the search sees it: a scalar expression, a container handle,
/// or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymValue {
    Num(NumExpr),
    Bool(Constraint),
    Entity(EntityId),
    Null,
}

impl SymValue {
    pub fn int(value: i64) -> Self {
        SymValue::Num(NumExpr::int(value))
    }

    pub fn var(var: SymVar) -> Self {
        if var.kind.is_bool() {
            SymValue::Bool(Constraint::Var(var))
        } else {
            SymValue::Num(NumExpr::Var(var))
        }
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            SymValue::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// True for scalar values without symbolic leaves, and for `null`.
    pub fn is_concrete(&self) -> bool {
        match self {
            SymValue::Num(e) => e.is_concrete(),
            SymValue::Bool(c) => c.is_concrete(),
            SymValue::Entity(_) => false,
            SymValue::Null => true,
        }
    }
}

impl From<NumExpr> for SymValue {
    fn from(e: NumExpr) -> Self {
        SymValue::Num(e)
    }
}

impl From<Constraint> for SymValue {
    fn from(c: Constraint) -> Self {
        SymValue::Bool(c)
    }
}

impl From<EntityId> for SymValue {
    fn from(id: EntityId) -> Self {
        SymValue::Entity(id)
    }
}

/// Declared type of an array element or object field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Scalar(ScalarKind),
    Array(Box<ValueType>),
    /// Object of the named class; the concrete class of a stored object is
    /// taken from its own entity.
    Object(String),
}

impl ValueType {
    pub fn int() -> Self {
        ValueType::Scalar(ScalarKind::Int)
    }

    pub fn array_of(elem: ValueType) -> Self {
        ValueType::Array(Box::new(elem))
    }

    /// The value an uninitialized slot of this type holds.
    pub fn default_value(&self) -> SymValue {
        match self {
            ValueType::Scalar(ScalarKind::Bool) => SymValue::Bool(Constraint::FALSE),
            ValueType::Scalar(kind) => SymValue::Num(NumExpr::lit(*kind, 0)),
            ValueType::Array(_) | ValueType::Object(_) => SymValue::Null,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ValueType::Array(_) | ValueType::Object(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar(kind) => write!(f, "{kind}"),
            ValueType::Array(elem) => write!(f, "{elem}[]"),
            ValueType::Object(class) => f.write_str(class),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub ty: ValueType,
}

/// Field layout of a labelable class.
///
/// This is the explicit empty-instance contract: a labeled object of this
/// class starts with exactly these fields, in declaration order, each holding
/// its type's default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
}

impl ClassInfo {
    pub fn builder(name: impl Into<String>) -> ClassInfoBuilder {
        ClassInfoBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field values of a fresh instance: every declared field at its
    /// type's default, in declaration order.
    pub fn empty_instance(&self) -> IndexMap<String, SymValue> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.ty.default_value()))
            .collect()
    }
}

pub struct ClassInfoBuilder {
    name: String,
    fields: Vec<FieldInfo>,
}

impl ClassInfoBuilder {
    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldInfo {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn build(self) -> Arc<ClassInfo> {
        Arc::new(ClassInfo {
            name: self.name,
            fields: self.fields,
        })
    }
}

/// Address of one element of a container: an array index or a field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotKey {
    Index(i64),
    Field(String),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Index(i) => write!(f, "[{i}]"),
            SlotKey::Field(name) => write!(f, ".{name}"),
        }
    }
}
