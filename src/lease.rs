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

//! Best-effort lease lock over an expiring key-value store.
//!
//! ## Purpose
//! Single-round-trip mutual exclusion: acquisition is one conditional
//! set-with-expiry, and a contended resource is denied immediately; this
//! backend never queues and offers no fairness. Callers needing blocking or
//! FIFO semantics poll, or use the queue lock instead.
//!
//! ## Token guard
//! Every attempt generates a fresh fencing token stored as the key's value.
//! Release and renewal are atomic server-side compare operations against that
//! token, so a holder whose lease expired can never delete or extend a lease
//! a later holder has since acquired.

use crate::error::{LockError, LockResult};
use crate::guard::LockGuard;
use crate::keyvalue::LeaseStore;
use crate::lock::{validate_resource, DistributedLock, Grant, Proof};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use ulid::Ulid;

/// Best-effort distributed lock with automatic expiry.
///
/// Expiry is enforced entirely server-side; no heartbeat task runs. A caller
/// that needs a longer hold renews explicitly through
/// [`LockGuard::renew`] before the TTL lapses.
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn LeaseStore>,
}

impl LeaseLock {
    /// Create a lease lock over the given store.
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DistributedLock for LeaseLock {
    #[instrument(skip(self), fields(resource = %resource, backend = "lease"))]
    async fn acquire(&self, resource: &str, timeout_or_ttl: Duration) -> LockResult<LockGuard> {
        validate_resource(resource)?;
        let started = std::time::Instant::now();

        let token = Ulid::new().to_string();
        let taken = self
            .store
            .put_if_absent(resource, &token, timeout_or_ttl)
            .await?;

        if !taken {
            metrics::counter!("dislock_acquire_total", "backend" => "lease", "result" => "denied")
                .increment(1);
            return Err(LockError::Denied {
                resource: resource.to_string(),
            });
        }

        metrics::counter!("dislock_acquire_total", "backend" => "lease", "result" => "acquired")
            .increment(1);
        metrics::histogram!("dislock_acquire_duration_seconds", "backend" => "lease")
            .record(started.elapsed().as_secs_f64());
        debug!(ttl_ms = timeout_or_ttl.as_millis() as u64, "lease acquired");
        Ok(LockGuard::new(
            Arc::new(self.clone()),
            Grant::lease(resource, resource, token),
        ))
    }

    #[instrument(skip(self, grant), fields(resource = %grant.resource(), backend = "lease"))]
    async fn release(&self, grant: &Grant) -> LockResult<bool> {
        let Proof::Lease { key, token } = grant.proof() else {
            return Err(LockError::ProtocolViolation(format!(
                "lease backend asked to release a queue grant for '{}'",
                grant.resource()
            )));
        };

        let deleted = self.store.compare_and_delete(key, token).await?;
        if !deleted {
            // The lease expired and may belong to a newer holder now; their
            // entry is left untouched.
            debug!("lease already expired or reacquired at release");
        }
        let result = if deleted { "released" } else { "already_gone" };
        metrics::counter!("dislock_release_total", "backend" => "lease", "result" => result)
            .increment(1);
        Ok(deleted)
    }

    #[instrument(skip(self, grant), fields(resource = %grant.resource(), backend = "lease"))]
    async fn renew(&self, grant: &Grant, ttl: Duration) -> LockResult<bool> {
        let Proof::Lease { key, token } = grant.proof() else {
            return Err(LockError::ProtocolViolation(format!(
                "lease backend asked to renew a queue grant for '{}'",
                grant.resource()
            )));
        };
        self.store.compare_and_expire(key, token, ttl).await
    }
}

#[cfg(all(test, feature = "memory-backend"))]
mod tests {
    use super::*;
    use crate::memory::MemoryLeaseStore;
    use tokio::time::sleep;

    fn lease_lock() -> (Arc<MemoryLeaseStore>, LeaseLock) {
        let store = Arc::new(MemoryLeaseStore::new());
        let lock = LeaseLock::new(Arc::clone(&store) as Arc<dyn LeaseStore>);
        (store, lock)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (store, lock) = lease_lock();

        let guard = lock
            .acquire("order", Duration::from_secs(30))
            .await
            .unwrap();
        let token = guard.grant().fencing_token().unwrap().to_string();
        assert_eq!(store.get("order").await.unwrap(), Some(token));

        assert!(guard.release().await.unwrap());
        assert_eq!(store.get("order").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_acquire_is_denied() {
        let (_store, lock) = lease_lock();

        let guard = lock
            .acquire("order", Duration::from_secs(30))
            .await
            .unwrap();
        let result = lock.acquire("order", Duration::from_secs(30)).await;
        assert!(matches!(result, Err(LockError::Denied { .. })));

        guard.release().await.unwrap();
        let regained = lock.acquire("order", Duration::from_secs(30)).await;
        assert!(regained.is_ok());
    }

    #[tokio::test]
    async fn test_tokens_are_unique_per_attempt() {
        let (_store, lock) = lease_lock();

        let first = lock.acquire("order", Duration::from_secs(30)).await.unwrap();
        let first_token = first.grant().fencing_token().unwrap().to_string();
        first.release().await.unwrap();

        let second = lock.acquire("order", Duration::from_secs(30)).await.unwrap();
        assert_ne!(second.grant().fencing_token().unwrap(), first_token);
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_is_reacquirable() {
        let (_store, lock) = lease_lock();

        let _stale = lock
            .acquire("order", Duration::from_millis(30))
            .await
            .unwrap();
        sleep(Duration::from_millis(80)).await;

        let fresh = lock.acquire("order", Duration::from_secs(30)).await;
        assert!(fresh.is_ok());
    }

    #[tokio::test]
    async fn test_token_isolation_after_expiry() {
        let (store, lock) = lease_lock();

        // A's lease expires while it still believes it holds the lock.
        let stale = lock
            .acquire("order", Duration::from_millis(30))
            .await
            .unwrap();
        sleep(Duration::from_millis(80)).await;

        let fresh = lock
            .acquire("order", Duration::from_secs(30))
            .await
            .unwrap();
        let fresh_token = fresh.grant().fencing_token().unwrap().to_string();

        // A's release must not delete B's lease.
        assert!(!stale.release().await.unwrap());
        assert_eq!(store.get("order").await.unwrap(), Some(fresh_token));

        // B's release is a true delete.
        assert!(fresh.release().await.unwrap());
        assert_eq!(store.get("order").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_renew_extends_a_live_lease() {
        let (_store, lock) = lease_lock();

        let guard = lock
            .acquire("order", Duration::from_millis(60))
            .await
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert!(guard.renew(Duration::from_millis(200)).await.unwrap());

        // Past the original TTL but inside the renewed one.
        sleep(Duration::from_millis(60)).await;
        let contender = lock.acquire("order", Duration::from_secs(1)).await;
        assert!(matches!(contender, Err(LockError::Denied { .. })));

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_after_expiry_reports_false() {
        let (_store, lock) = lease_lock();

        let guard = lock
            .acquire("order", Duration::from_millis(30))
            .await
            .unwrap();
        sleep(Duration::from_millis(80)).await;

        assert!(!guard.renew(Duration::from_secs(1)).await.unwrap());
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_with_queue_grant_is_rejected() {
        let (_store, lock) = lease_lock();

        let foreign = Grant::queue("order", "/order/order-0000000001");
        let result = lock.release(&foreign).await;
        assert!(matches!(result, Err(LockError::ProtocolViolation(_))));
    }
}
