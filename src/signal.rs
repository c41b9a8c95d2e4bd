//! One-shot flags shared between the turn loop and its helpers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that goes from not-set to set once and stays set
///
/// Clones share the same flag. Writers use release ordering and readers
/// acquire, so anything written before [`Signal::set`] is visible to a reader
/// that observes the flag as set.
#[derive(Debug, Clone, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag, returning `true` if this call performed the transition
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
