use thiserror::Error;

use crate::entity::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("Entity {0} is not an array")]
    NotAnArray(EntityId),
    #[error("Entity {0} is not an object")]
    NotAnObject(EntityId),
    #[error("Class {class} has no field `{field}`")]
    NoSuchField { class: String, field: String },
    #[error("Index {index} out of bounds for {entity} of length {length}")]
    IndexOutOfBounds {
        entity: EntityId,
        index: i64,
        length: i64,
    },
}
