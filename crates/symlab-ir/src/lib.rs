#![doc = include_str!("../README.md")]

//! Search-space vocabulary for symbolic execution.
//!
//! This crate defines the immutable constraint and expression trees the
//! instrumentation produces, search-space values, the entity arena that
//! replaces reference identity for arrays and objects, and the high-level
//! object operation stream.

pub mod entity;
pub mod error;
pub mod expr;
pub mod kinds;
pub mod ops;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod value;

pub use entity::{Entity, EntityArena, EntityId, EntityShape};
pub use error::IrError;
pub use expr::{Constraint, NumExpr};
pub use kinds::{ScalarKind, SymVar, VarRole};
pub use ops::ObjectOp;
pub use value::{ClassInfo, FieldInfo, SlotKey, SymValue, ValueType};
