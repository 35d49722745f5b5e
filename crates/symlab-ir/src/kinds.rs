use serde::{Deserialize, Serialize};
use std::fmt;

/// Program-level scalar kinds a symbolic leaf can stand for.
///
/// Solver variables are width-unaware integers; the kind decides the default
/// domain a fresh variable is spawned with and how a model value is narrowed
/// back to the program's width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 6] = [
        ScalarKind::Bool,
        ScalarKind::Byte,
        ScalarKind::Short,
        ScalarKind::Char,
        ScalarKind::Int,
        ScalarKind::Long,
    ];

    pub fn is_bool(self) -> bool {
        matches!(self, ScalarKind::Bool)
    }

    /// Full value range of the kind.
    pub fn natural_bounds(self) -> (i64, i64) {
        match self {
            ScalarKind::Bool => (0, 1),
            ScalarKind::Byte => (i8::MIN as i64, i8::MAX as i64),
            ScalarKind::Short => (i16::MIN as i64, i16::MAX as i64),
            ScalarKind::Char => (0, u16::MAX as i64),
            ScalarKind::Int => (i32::MIN as i64, i32::MAX as i64),
            ScalarKind::Long => (i64::MIN, i64::MAX),
        }
    }

    /// Narrow a solver integer to this kind's width (two's complement wrap).
    pub fn truncate(self, value: i64) -> i64 {
        match self {
            ScalarKind::Bool => i64::from(value != 0),
            ScalarKind::Byte => value as i8 as i64,
            ScalarKind::Short => value as i16 as i64,
            ScalarKind::Char => value as u16 as i64,
            ScalarKind::Int => value as i32 as i64,
            ScalarKind::Long => value,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Byte => "byte",
            ScalarKind::Short => "short",
            ScalarKind::Char => "char",
            ScalarKind::Int => "int",
            ScalarKind::Long => "long",
        };
        f.write_str(name)
    }
}

/// Who owns a symbolic variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VarRole {
    /// Produced by the instrumented program.
    Program,
    /// Enforcement literal introduced by the solver layer.
    Guard,
}

/// A symbolic scalar leaf. Compared and hashed by identifier, never by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymVar {
    pub id: u32,
    pub kind: ScalarKind,
    pub role: VarRole,
}

impl SymVar {
    pub fn new(id: u32, kind: ScalarKind) -> Self {
        Self {
            id,
            kind,
            role: VarRole::Program,
        }
    }

    pub fn guard(id: u32) -> Self {
        Self {
            id,
            kind: ScalarKind::Bool,
            role: VarRole::Guard,
        }
    }

    /// Backend-level name: `v{id}` for program variables, `g{id}` for guards.
    pub fn name(&self) -> String {
        match self.role {
            VarRole::Program => format!("v{}", self.id),
            VarRole::Guard => format!("g{}", self.id),
        }
    }
}

impl fmt::Display for SymVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
