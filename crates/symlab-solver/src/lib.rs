#![doc = include_str!("../README.md")]

//! Incremental constraint management for dynamic symbolic execution.
//!
//! The crate keeps a level-structured store of path constraints and
//! high-level array/object facts on top of a pluggable [`Backend`], answers
//! memoized satisfiability queries, extracts concrete labels for
//! search-space values from models, and enumerates distinct solutions.

pub mod backends;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod labeling;
pub mod labels;
pub mod manager;
pub mod oplog;
pub mod solver;
pub mod store;
pub mod theory;

pub use backends::finite_domain::FiniteDomainBackend;
#[cfg(feature = "z3")]
pub use backends::z3_backend::Z3Backend;
pub use backends::serialize_construction;
pub use config::{DomainBounds, ScopeMode, SolverOptions};
pub use error::{SolverError, SolverResult};
pub use labels::{HeapCell, HeapRef, Label, LabelHeap, LabeledValue, Labels, Solution};
pub use manager::{IncrementalSolver, SolverStats};
pub use oplog::OpLog;
pub use solver::{Backend, BackendCapabilities, SatResult};
pub use store::ScopedStore;
pub use theory::Representation;
