// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Dislock.
//
// Dislock is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Dislock is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Dislock. If not, see <https://www.gnu.org/licenses/>.

//! Scoped lock acquisition with guaranteed release.

use crate::error::{LockError, LockResult};
use crate::lock::{DistributedLock, Grant};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A held lock: ties the resource, the issuing backend, and the proof of
/// ownership together, and owns the obligation to release exactly once.
///
/// ## Release semantics
/// - [`release`](Self::release) is idempotent: the first call performs the
///   release, every later call is a no-op returning `Ok(false)`. Concurrent
///   calls from multiple threads are safe; exactly one performs the release.
/// - Dropping an unreleased guard spawns a best-effort release on the current
///   tokio runtime. Failures are logged, never raised: a release that does
///   not land still leaves the lock safe, because the substrate reclaims it
///   (ephemeral-node cleanup or lease expiry).
///
/// Re-entrant acquisition is not supported: a second `acquire` for a resource
/// this process already holds queues behind the first acquisition (queue
/// backend) or is denied (lease backend). This is a designed limitation.
#[must_use]
pub struct LockGuard {
    backend: Arc<dyn DistributedLock>,
    grant: Grant,
    released: AtomicBool,
}

impl LockGuard {
    pub(crate) fn new(backend: Arc<dyn DistributedLock>, grant: Grant) -> Self {
        Self {
            backend,
            grant,
            released: AtomicBool::new(false),
        }
    }

    /// The grant issued for this acquisition.
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// The resource this guard protects.
    pub fn resource(&self) -> &str {
        self.grant.resource()
    }

    /// Release the lock.
    ///
    /// Returns `Ok(true)` when the substrate entry was removed by this call,
    /// `Ok(false)` when there was nothing left to remove: either the guard
    /// was already released, or the lease had expired and possibly been
    /// reacquired by another holder (whose lease is left untouched).
    ///
    /// A failed release is not retried by later calls; the substrate's own
    /// cleanup (session expiry, TTL) is the fallback.
    pub async fn release(&self) -> LockResult<bool> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.backend.release(&self.grant).await
    }

    /// Extend the lease TTL (lease backend only).
    ///
    /// Returns `Ok(true)` when the lease still carried this guard's token and
    /// its TTL was reset, `Ok(false)` when the lease already expired.
    pub async fn renew(&self, ttl: Duration) -> LockResult<bool> {
        if self.released.load(Ordering::SeqCst) {
            return Err(LockError::ProtocolViolation(format!(
                "renew on released grant for '{}'",
                self.grant.resource()
            )));
        }
        self.backend.renew(&self.grant, ttl).await
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("grant", &self.grant)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let grant = self.grant.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = backend.release(&grant).await {
                        warn!(resource = %grant.resource(), %error, "failed to release lock on drop");
                    }
                });
            }
            Err(_) => {
                warn!(
                    resource = %self.grant.resource(),
                    "lock guard dropped outside a runtime; relying on substrate cleanup"
                );
            }
        }
    }
}
