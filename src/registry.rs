use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// SessionId identifies one client connection for the lifetime of the
/// process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// SessionRegistry is the set of sessions that have reached the request
/// stage and not yet terminated. Bookkeeping only.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<SessionId>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// register adds `id` and returns a guard that removes it again when
    /// dropped, whichever way the session ends
    pub fn register(&self, id: SessionId) -> Registration {
        self.lock().insert(id);
        Registration {
            registry: self.clone(),
            id,
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// active returns a snapshot of the live session ids
    pub fn active(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.lock().iter().copied().collect();
        ids.sort();
        ids
    }

    fn deregister(&self, id: SessionId) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<SessionId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration keeps a session listed in its registry
#[derive(Debug)]
pub struct Registration {
    registry: SessionRegistry,
    id: SessionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let registry = SessionRegistry::new();
        let first = SessionId::next();
        let second = SessionId::next();

        let guard = registry.register(first);
        let other = registry.register(second);
        assert!(registry.contains(first));
        assert_eq!(registry.active(), vec![first, second]);

        drop(guard);
        assert!(!registry.contains(first));
        assert_eq!(registry.len(), 1);

        drop(other);
        assert!(registry.is_empty());
    }
}
