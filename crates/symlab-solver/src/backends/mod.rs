pub mod finite_domain;
pub mod smtlib_printer;
#[cfg(feature = "z3")]
pub mod z3_backend;

use std::sync::Mutex;

static CONSTRUCTION_LOCK: Mutex<()> = Mutex::new(());

/// Run `build` while holding the process-wide construction lock. Native
/// solver libraries are not guaranteed to create contexts thread-safely;
/// everything after construction runs unlocked.
pub fn serialize_construction<T>(build: impl FnOnce() -> T) -> T {
    // A panic inside another constructor leaves no state behind the lock.
    let _guard = CONSTRUCTION_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    build()
}
