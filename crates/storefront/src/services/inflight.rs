//! Registry of order operations currently in progress.
//!
//! A confirm or cancel for an order holds a guard for the duration of the
//! backend call. A second request for the same order while the guard is
//! alive is turned away instead of reaching the backend twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared set of busy keys.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` if it is already claimed.
    #[must_use]
    pub fn try_begin(&self, key: impl Into<String>) -> Option<InFlightGuard> {
        let key = key.into();
        let inserted = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| InFlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    #[must_use]
    pub fn is_busy(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
