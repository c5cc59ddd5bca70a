//! Locking: the exclusive per-session writer lock and advisory element
//! locks.
//!
//! The session lock makes one process the single writer for a session;
//! it is held for the session's whole run and released when the guard
//! drops, including on process death in implementations backed by an
//! external store with expiry.
//!
//! Element locks are something else entirely: soft, TTL-bounded UI
//! hints ("someone is holding this piece") that are never consulted
//! for gameplay legality.

use crate::core::{SessionId, UserId};
use crate::error::SessionError;
use crate::protocol::LockInfo;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Holds the exclusive session lock; released on drop.
pub struct SessionLockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SessionLockGuard {
    #[must_use]
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for SessionLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionLockGuard")
    }
}

/// Storage seam for the cluster-wide session writer lock.
pub trait SessionLockProvider: Send + Sync {
    /// `Ok(None)` means another holder has it; callers retry.
    fn try_acquire(&self, session: SessionId) -> Result<Option<SessionLockGuard>, SessionError>;
}

/// In-process lock table for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemorySessionLocks {
    held: Arc<Mutex<HashSet<SessionId>>>,
}

impl MemorySessionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionLockProvider for MemorySessionLocks {
    fn try_acquire(&self, session: SessionId) -> Result<Option<SessionLockGuard>, SessionError> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(session) {
            return Ok(None);
        }
        let table = Arc::clone(&self.held);
        Ok(Some(SessionLockGuard::new(move || {
            table.lock().unwrap().remove(&session);
        })))
    }
}

const ELEMENT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Advisory element locks, unique per (session, element), expiring
/// after a soft TTL.
#[derive(Debug)]
pub struct ElementLockManager {
    ttl: Duration,
    locks: Mutex<HashMap<(SessionId, String), (UserId, Instant)>>,
}

impl Default for ElementLockManager {
    fn default() -> Self {
        Self::new(ELEMENT_LOCK_TTL)
    }
}

impl ElementLockManager {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Take or refresh the lock on an element.
    ///
    /// Succeeds when the element is unlocked, already held by this
    /// user, or held by a lock past its TTL. Fails against a live lock
    /// held by someone else.
    pub fn acquire(&self, session: SessionId, user: UserId, element: &str) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        match locks.entry((session, element.to_string())) {
            std::collections::hash_map::Entry::Occupied(mut held) => {
                let (owner, taken_at) = *held.get();
                if owner == user || now.duration_since(taken_at) >= self.ttl {
                    held.insert((user, now));
                    true
                } else {
                    false
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert((user, now));
                true
            }
        }
    }

    /// Release a lock. Only the owner may release; anyone else's
    /// request is ignored.
    pub fn release(&self, session: SessionId, user: UserId, element: &str) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let key = (session, element.to_string());
        match locks.get(&key) {
            Some((owner, _)) if *owner == user => {
                locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Drop every lock a user holds in a session, e.g. on disconnect.
    pub fn release_all(&self, session: SessionId, user: UserId) {
        self.locks
            .lock()
            .unwrap()
            .retain(|(s, _), (owner, _)| *s != session || *owner != user);
    }

    /// Live locks for a session, pruning expired ones as a side effect.
    pub fn list(&self, session: SessionId) -> Vec<LockInfo> {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        let ttl = self.ttl;
        locks.retain(|_, (_, taken_at)| now.duration_since(*taken_at) < ttl);
        let mut out: Vec<LockInfo> = locks
            .iter()
            .filter(|((s, _), _)| *s == session)
            .map(|((_, element), (owner, _))| LockInfo {
                user: *owner,
                key: element.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
