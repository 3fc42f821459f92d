//! Policy snapshots and atomic publication
//!
//! Readers grab an `Arc` to the current snapshot and evaluate against it for
//! the whole request. A reload builds a complete new snapshot and swaps the
//! pointer, so no request ever sees a half-applied configuration.

use std::sync::{Arc, RwLock};

use crate::access::AccessPolicy;
use crate::error::Rejection;
use crate::gate::{self, Authorized, GateRequest};
use crate::policy::SecurityPolicy;

/// Access and security policy that belong together
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub access: AccessPolicy,
    pub security: SecurityPolicy,
}

impl PolicySnapshot {
    pub fn new(access: AccessPolicy, security: SecurityPolicy) -> Self {
        Self { access, security }
    }

    pub fn authorize(&self, request: &GateRequest<'_>) -> Result<Authorized, Rejection> {
        gate::authorize(request, &self.security, &self.access)
    }
}

/// Holder of the current snapshot. Servers may store their own bundle
/// (for example a config with the snapshot built from it) so that both are
/// swapped in one step.
#[derive(Debug)]
pub struct PolicyStore<T = PolicySnapshot> {
    current: RwLock<Arc<T>>,
}

impl<T> PolicyStore<T> {
    pub fn new(snapshot: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot in effect right now
    pub fn load(&self) -> Arc<T> {
        // The lock only guards a pointer swap, so a poisoned lock still holds
        // a complete snapshot
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the current snapshot, returning the previous one
    pub fn publish(&self, snapshot: T) -> Arc<T> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }
}
