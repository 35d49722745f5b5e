//! High-level array and object events, in the order the program performs them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::entity::EntityId;
use crate::expr::NumExpr;
use crate::value::{ClassInfo, SymValue, ValueType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectOp {
    /// Start tracking an array. With `lazy_contents` the slots not listed in
    /// `initial` are unknown until first read; otherwise they hold the
    /// element type's default.
    InitArray {
        array: EntityId,
        length: NumExpr,
        elem: ValueType,
        initial: Vec<(NumExpr, SymValue)>,
        lazy_contents: bool,
    },
    /// `value` is what the program observed at `array[index]`.
    Select {
        array: EntityId,
        index: NumExpr,
        value: SymValue,
    },
    Store {
        array: EntityId,
        index: NumExpr,
        value: SymValue,
    },
    /// Start tracking an object. Same `lazy_fields` rule as arrays.
    InitObject {
        object: EntityId,
        class: Arc<ClassInfo>,
        initial: Vec<(String, SymValue)>,
        lazy_fields: bool,
    },
    GetField {
        object: EntityId,
        field: String,
        value: SymValue,
    },
    PutField {
        object: EntityId,
        field: String,
        value: SymValue,
    },
    /// Name a snapshot of `value` as it is at this point of the stream.
    Remember { name: String, value: SymValue },
}

impl ObjectOp {
    /// The container this operation acts on, if any.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            ObjectOp::InitArray { array, .. }
            | ObjectOp::Select { array, .. }
            | ObjectOp::Store { array, .. } => Some(*array),
            ObjectOp::InitObject { object, .. }
            | ObjectOp::GetField { object, .. }
            | ObjectOp::PutField { object, .. } => Some(*object),
            ObjectOp::Remember { .. } => None,
        }
    }

    pub fn is_init(&self) -> bool {
        matches!(self, ObjectOp::InitArray { .. } | ObjectOp::InitObject { .. })
    }

    pub fn is_read(&self) -> bool {
        matches!(self, ObjectOp::Select { .. } | ObjectOp::GetField { .. })
    }
}
