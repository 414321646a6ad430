//! # Advisory Locks
//!
//! Non-blocking leases that serialize maintenance work such as scratch
//! eviction. A caller that cannot take the lock skips its pass instead of
//! waiting; the next pass picks the work up.
//!
//! ## Semantics
//!
//! - `try_acquire` either returns a guard immediately or `None`.
//! - Dropping the guard releases the lease.
//! - Leases carry a TTL. An expired lease no longer blocks acquisition,
//!   and dropping its stale guard must not release the lease that
//!   replaced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Grants exclusive access to a named scope until dropped.
pub struct LockGuard {
    scope: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// The scope this guard holds.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("scope", &self.scope).finish()
    }
}

/// Hands out scoped leases.
pub trait LockManager: Send + Sync {
    /// Attempts to take the lease for `scope`. Returns `None` when another
    /// holder has a live lease.
    fn try_acquire(&self, scope: &str, ttl: Duration) -> Option<LockGuard>;
}

#[derive(Clone, Copy)]
struct Lease {
    token: u64,
    expires_at: Instant,
}

/// In-process lease table.
///
/// Every lease gets a unique token; release removes the entry only when
/// the token still matches, so a guard that outlived its TTL cannot
/// unlock a successor's lease.
#[derive(Clone, Default)]
pub struct LeaseLocks {
    inner: Arc<LeaseLocksInner>,
}

#[derive(Default)]
struct LeaseLocksInner {
    leases: DashMap<String, Lease>,
    next_token: AtomicU64,
}

impl LeaseLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for LeaseLocks {
    fn try_acquire(&self, scope: &str, ttl: Duration) -> Option<LockGuard> {
        let now = Instant::now();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let lease = Lease { token, expires_at: now + ttl };

        match self.inner.leases.entry(scope.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    return None;
                }
                held.insert(lease);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(lease);
            }
        }

        let leases = Arc::clone(&self.inner);
        let scope_key = scope.to_string();
        Some(LockGuard {
            scope: scope.to_string(),
            release: Some(Box::new(move || {
                leases
                    .leases
                    .remove_if(&scope_key, |_, lease| lease.token == token);
            })),
        })
    }
}

impl std::fmt::Debug for LeaseLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLocks")
            .field("held", &self.inner.leases.len())
            .finish()
    }
}
