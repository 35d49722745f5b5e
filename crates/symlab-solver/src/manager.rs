//! The incremental solver manager: the façade a search worker drives.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use symlab_ir::{Constraint, EntityArena, EntityId, NumExpr, ObjectOp, SymValue};

use crate::backends::finite_domain::FiniteDomainBackend;
use crate::backends::{serialize_construction, smtlib_printer};
use crate::config::SolverOptions;
use crate::error::{SolverError, SolverResult};
use crate::labels::{HeapCell, HeapRef, Label, LabelHeap};
use crate::solver::{Backend, SatResult};
use crate::store::ScopedStore;
use crate::theory;

/// Counters for one manager, reset by [`IncrementalSolver::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    /// Backend satisfiability checks issued for `is_satisfiable`.
    pub sat_checks: u64,
    /// `is_satisfiable` calls answered from the memo.
    pub memo_hits: u64,
    /// Side-effect-free probes.
    pub probes: u64,
    pub labels_computed: u64,
    pub label_cache_hits: u64,
    pub enumeration_rounds: u64,
}

/// Label cache key. Scalars are keyed structurally, containers by entity id
/// (current state), by marker position and id (snapshot state), or by
/// labeled program identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CacheKey {
    Num(NumExpr),
    Bool(Constraint),
    Entity(EntityId),
    Snapshot(usize, EntityId),
    Identity(i64),
}

pub struct IncrementalSolver<B: Backend> {
    pub(crate) store: ScopedStore<B>,
    pub(crate) entities: EntityArena,
    options: SolverOptions,
    sat: Option<bool>,
    pub(crate) model: Option<B::Model>,
    pub(crate) label_cache: HashMap<CacheKey, Label>,
    pub(crate) heap: LabelHeap,
    pub(crate) stats: SolverStats,
}

impl IncrementalSolver<FiniteDomainBackend> {
    /// Manager over the built-in finite-domain backend.
    pub fn finite_domain(options: SolverOptions) -> SolverResult<Self> {
        let backend = serialize_construction(|| FiniteDomainBackend::from_options(&options));
        Self::new(backend, options)
    }
}

#[cfg(feature = "z3")]
impl IncrementalSolver<crate::backends::z3_backend::Z3Backend> {
    /// Manager over Z3.
    pub fn z3(options: SolverOptions) -> SolverResult<Self> {
        let backend = serialize_construction(|| {
            crate::backends::z3_backend::Z3Backend::from_options(&options)
        });
        Self::new(backend, options)
    }
}

impl<B: Backend> IncrementalSolver<B> {
    /// Fails with `Misconfiguration` if `options` ask for something the
    /// backend cannot do.
    pub fn new(backend: B, options: SolverOptions) -> SolverResult<Self> {
        options.validate(backend.capabilities())?;
        Ok(Self {
            store: ScopedStore::new(backend, &options),
            entities: EntityArena::new(),
            options,
            sat: None,
            model: None,
            label_cache: HashMap::new(),
            heap: LabelHeap::new(),
            stats: SolverStats::default(),
        })
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn level(&self) -> usize {
        self.store.level()
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        self.store.backend()
    }

    pub fn entities(&self) -> &EntityArena {
        &self.entities
    }

    /// Entities are registered here before operations mention them.
    pub fn entities_mut(&mut self) -> &mut EntityArena {
        &mut self.entities
    }

    fn invalidate(&mut self) {
        self.sat = None;
        self.model = None;
        self.invalidate_labels();
    }

    fn invalidate_labels(&mut self) {
        self.label_cache.clear();
        self.heap = LabelHeap::new();
    }

    /// Commit `c` at the current level. Concrete `true` is ignored.
    pub fn add_constraint(&mut self, c: Constraint) -> SolverResult<()> {
        if c.is_true() {
            return Ok(());
        }
        self.store.add_constraint(c)?;
        self.invalidate();
        Ok(())
    }

    /// Open a backtracking point and commit `c` to it.
    pub fn add_constraint_after_new_backtracking_point(&mut self, c: Constraint) -> SolverResult<()> {
        self.store.push_level(c)?;
        self.invalidate();
        Ok(())
    }

    /// Whether everything so far together with `c` is satisfiable, without
    /// committing `c`.
    pub fn check_with_new_constraint(&mut self, c: &Constraint) -> SolverResult<bool> {
        match c {
            Constraint::Lit(true) => return self.is_satisfiable(),
            Constraint::Lit(false) => return Ok(false),
            _ => {}
        }
        self.stats.probes += 1;
        match self.store.probe(c)? {
            SatResult::Sat => Ok(true),
            SatResult::Unsat => Ok(false),
            SatResult::Unknown(reason) => {
                warn!(%reason, "probe returned unknown");
                Err(SolverError::UnknownSolution(reason))
            }
        }
    }

    /// Memoized satisfiability of everything committed so far.
    pub fn is_satisfiable(&mut self) -> SolverResult<bool> {
        if let Some(sat) = self.sat {
            self.stats.memo_hits += 1;
            return Ok(sat);
        }
        self.stats.sat_checks += 1;
        let sat = match self.store.check()? {
            SatResult::Sat => {
                self.model = self.store.backend_mut().model().map_err(Into::into)?;
                true
            }
            SatResult::Unsat => false,
            SatResult::Unknown(reason) => {
                warn!(level = self.level(), %reason, "satisfiability unknown");
                return Err(SolverError::UnknownSolution(reason));
            }
        };
        self.sat = Some(sat);
        Ok(sat)
    }

    pub fn backtrack_once(&mut self) -> SolverResult<()> {
        self.backtrack(1)
    }

    /// Discard the `n` newest backtracking points.
    pub fn backtrack(&mut self, n: usize) -> SolverResult<()> {
        if n == 0 {
            return Ok(());
        }
        self.store.pop_levels(n)?;
        self.invalidate();
        Ok(())
    }

    pub fn backtrack_all(&mut self) -> SolverResult<()> {
        self.backtrack(self.level())
    }

    /// Ingest one object operation: update the object theory, commit the
    /// constraint it yields, and log it for labeling.
    pub fn apply(&mut self, op: ObjectOp) -> SolverResult<()> {
        if !self.options.object_theory {
            return Err(SolverError::Unsupported(
                "object operations need the high-level object theory".into(),
            ));
        }
        let c = theory::constraint_for(&self.store, &self.entities, &op)?;
        self.store.validate(&c)?;
        theory::record(&mut self.store, &self.entities, &op)?;
        debug!(?op, "applied object operation");
        self.store.log_op(op);
        if c.is_true() {
            // labels are derived from the log
            self.invalidate_labels();
        } else {
            self.store.add_constraint(c)?;
            self.invalidate();
        }
        Ok(())
    }

    /// Pre-seed the label of `value`. Entries live until the next mutation.
    pub fn register_label_pair(&mut self, value: &SymValue, label: Label) -> SolverResult<()> {
        let key = match value {
            SymValue::Num(e) if !e.is_concrete() => CacheKey::Num(e.clone()),
            SymValue::Bool(c) if !c.is_concrete() => CacheKey::Bool(c.clone()),
            SymValue::Entity(id) => CacheKey::Entity(*id),
            other => {
                return Err(SolverError::InvalidOperation(format!(
                    "{other:?} is concrete and needs no label"
                )))
            }
        };
        self.label_cache.insert(key, label);
        Ok(())
    }

    /// Allocate a heap cell for labels passed to `register_label_pair`.
    pub fn alloc_label_cell(&mut self, cell: HeapCell) -> HeapRef {
        self.heap.alloc(cell)
    }

    /// SMT-LIB2 script of the original constraints per level.
    pub fn dump_smtlib(&self) -> SolverResult<String> {
        if !self.store.keeps_original_constraints() {
            return Err(SolverError::Misconfiguration(
                "original constraint bookkeeping is disabled".into(),
            ));
        }
        Ok(smtlib_printer::script(&self.store.original_constraints()))
    }

    /// Release native state and clear every cache. Safe to call repeatedly.
    pub fn shutdown(&mut self) -> SolverResult<()> {
        self.store.reset()?;
        self.entities.clear();
        self.invalidate();
        self.stats = SolverStats::default();
        Ok(())
    }
}
