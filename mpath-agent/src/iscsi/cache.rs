//! Target scope cache.
//!
//! Scope lookups can be expensive (they go to the array), so resolved scopes
//! are kept for the lifetime of the process. Target-name cardinality is
//! bounded by the active sessions, so entries are never evicted.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::debug;

use super::types::Portal;

/// Per-call portal cache: target name to its IPv4 portals.
///
/// Lives for a single enumeration pass so LUNs behind one group-scoped
/// target only query portals once.
pub type PortalCache = HashMap<String, Vec<Portal>>;

/// Backing storage for a [`TargetScopeCache`].
pub trait ScopeStore: Send {
    fn get(&self, target_name: &str) -> Option<String>;
    fn insert(&mut self, target_name: String, scope: String);
}

impl ScopeStore for HashMap<String, String> {
    fn get(&self, target_name: &str) -> Option<String> {
        HashMap::get(self, target_name).cloned()
    }

    fn insert(&mut self, target_name: String, scope: String) {
        HashMap::insert(self, target_name, scope);
    }
}

/// Mutex-guarded mapping from target name to scope.
///
/// Only the map access is under the lock; callers resolve scopes outside it.
pub struct TargetScopeCache<S: ScopeStore = HashMap<String, String>> {
    store: Mutex<S>,
}

impl TargetScopeCache<HashMap<String, String>> {
    pub fn new() -> Self {
        Self::with_store(HashMap::new())
    }
}

impl Default for TargetScopeCache<HashMap<String, String>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ScopeStore> TargetScopeCache<S> {
    /// Create a cache over a caller-supplied (possibly pre-seeded) store.
    pub fn with_store(store: S) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Cached scope for `target_name`, or `None` on a miss.
    pub fn scope(&self, target_name: &str) -> Option<String> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target_name)
    }

    /// Record the scope for `target_name`. Empty scopes are not cached.
    pub fn set_scope(&self, target_name: &str, scope: &str) {
        if scope.is_empty() {
            debug!(target_name = %target_name, "Ignoring empty target scope");
            return;
        }
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target_name.to_string(), scope.to_string());
    }
}

/// The process-wide cache, created on first use.
pub fn global() -> &'static TargetScopeCache {
    static CACHE: OnceLock<TargetScopeCache> = OnceLock::new();
    CACHE.get_or_init(TargetScopeCache::new)
}
