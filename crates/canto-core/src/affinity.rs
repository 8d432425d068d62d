//! Affinity-thread marker.
//!
//! Exactly one thread per session owns the derived (Level 2) cache and issues
//! repaints. That thread calls [`enter`] once at startup; Level 1 mutators use
//! [`is_affinity_thread`] to refuse to run there.

use std::cell::Cell;

thread_local! {
    static AFFINITY: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as the affinity thread.
pub fn enter() {
    AFFINITY.with(|flag| flag.set(true));
}

/// Clear the marker on the current thread.
pub fn leave() {
    AFFINITY.with(|flag| flag.set(false));
}

pub fn is_affinity_thread() -> bool {
    AFFINITY.with(|flag| flag.get())
}
