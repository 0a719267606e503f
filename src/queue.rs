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

//! Fair queue lock over a hierarchical coordination service.
//!
//! ## Purpose
//! FIFO mutual exclusion across processes: each acquisition attempt creates
//! an ephemeral sequential node under a per-resource root, and the attempt
//! holding the lowest sequence number holds the lock.
//!
//! ## Design
//! - **Herd avoidance**: a waiter watches only its immediate predecessor, so
//!   each release wakes at most one waiter instead of the whole queue.
//! - **Re-verification**: a watch firing is a hint, not a grant. The waiter
//!   re-lists the children after every wakeup, because a predecessor may
//!   vanish out of order when some other session expires, which does not make
//!   this attempt the head of the queue.
//! - **Crash safety**: the owned node is ephemeral; if the holder's session
//!   dies, the substrate removes the node and the successor's watch fires.
//!   No external timeout is involved in crash recovery.
//! - **Timeout cleanup**: an attempt that gives up always deletes its own
//!   node first, so a dead queue entry never blocks the waiters behind it.

use crate::coordination::{CoordinationClient, NodeMode};
use crate::error::{LockError, LockResult};
use crate::guard::LockGuard;
use crate::lock::{validate_resource, DistributedLock, Grant, Proof};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Fair, crash-tolerant distributed lock.
///
/// The per-resource root node (`/{resource}`) is created on first use and
/// never deleted: other attempts may reference it at any time, and leaving it
/// in place avoids delete/create races entirely.
#[derive(Clone)]
pub struct QueueLock {
    client: Arc<dyn CoordinationClient>,
}

impl QueueLock {
    /// Create a queue lock over the given coordination session.
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self { client }
    }

    fn root_path(resource: &str) -> String {
        format!("/{resource}")
    }

    /// Best-effort removal of this attempt's own node on early exit.
    async fn abandon(&self, node: &str) {
        if let Err(error) = self.client.delete_node(node).await {
            warn!(%node, %error, "failed to remove abandoned queue node");
        }
    }
}

/// Numeric suffix assigned by the substrate, e.g. `order-0000000007` -> 7.
fn sequence_of(name: &str) -> Option<u64> {
    name.rsplit('-').next()?.parse().ok()
}

#[async_trait]
impl DistributedLock for QueueLock {
    #[instrument(skip(self), fields(resource = %resource, backend = "queue"))]
    async fn acquire(&self, resource: &str, timeout_or_ttl: Duration) -> LockResult<LockGuard> {
        validate_resource(resource)?;
        let started = Instant::now();
        let deadline = started + timeout_or_ttl;

        let root = Self::root_path(resource);
        if !self.client.node_exists(&root).await? {
            // Idempotent: a concurrent creator winning the race is fine.
            self.client.create_node(&root, NodeMode::Persistent).await?;
        }

        let node = self
            .client
            .create_node(
                &format!("{root}/{resource}-"),
                NodeMode::EphemeralSequential,
            )
            .await?;
        let own_name = node.rsplit('/').next().unwrap_or(&node).to_string();
        let own_seq = sequence_of(&own_name).ok_or_else(|| {
            LockError::ProtocolViolation(format!("queue node without sequence suffix: {node}"))
        })?;

        loop {
            let children = match self.client.list_children(&root).await {
                Ok(children) => children,
                Err(error) => {
                    self.abandon(&node).await;
                    return Err(error);
                }
            };

            let mut queue: Vec<(u64, String)> = children
                .into_iter()
                .filter_map(|name| sequence_of(&name).map(|seq| (seq, name)))
                .collect();
            queue.sort();

            if !queue.iter().any(|(seq, _)| *seq == own_seq) {
                // Our ephemeral node vanished underneath us: the session is
                // gone and any grant would be unprotected.
                return Err(LockError::SubstrateUnavailable(format!(
                    "own queue node disappeared while waiting for '{resource}'"
                )));
            }

            let predecessor = queue
                .iter()
                .rev()
                .find(|(seq, _)| *seq < own_seq)
                .map(|(_, name)| name.clone());

            let Some(predecessor) = predecessor else {
                // Lowest sequence number in the queue: the lock is ours.
                metrics::counter!("dislock_acquire_total", "backend" => "queue", "result" => "acquired")
                    .increment(1);
                metrics::histogram!("dislock_acquire_duration_seconds", "backend" => "queue")
                    .record(started.elapsed().as_secs_f64());
                debug!(node = %node, waited_ms = started.elapsed().as_millis() as u64, "queue lock acquired");
                return Ok(LockGuard::new(
                    Arc::new(self.clone()),
                    Grant::queue(resource, node),
                ));
            };

            let watch = match self.client.watch_once(&format!("{root}/{predecessor}")).await {
                Ok(watch) => watch,
                Err(error) => {
                    self.abandon(&node).await;
                    return Err(error);
                }
            };
            let Some(watch) = watch else {
                // Predecessor vanished between the listing and the watch.
                continue;
            };

            // Either outcome of the watch (fired or channel closed) only
            // means "look again"; the head check above is the real gate.
            if tokio::time::timeout_at(deadline, watch).await.is_err() {
                self.abandon(&node).await;
                metrics::counter!("dislock_acquire_total", "backend" => "queue", "result" => "timed_out")
                    .increment(1);
                return Err(LockError::TimedOut {
                    resource: resource.to_string(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    #[instrument(skip(self, grant), fields(resource = %grant.resource(), backend = "queue"))]
    async fn release(&self, grant: &Grant) -> LockResult<bool> {
        let Proof::QueueNode { path } = grant.proof() else {
            return Err(LockError::ProtocolViolation(format!(
                "queue backend asked to release a lease grant for '{}'",
                grant.resource()
            )));
        };

        let deleted = self.client.delete_node(path).await?;
        if !deleted {
            // Session cleanup beat us to it; the successor was woken either way.
            warn!(node = %path, "queue node already gone at release");
        }
        let result = if deleted { "released" } else { "already_gone" };
        metrics::counter!("dislock_release_total", "backend" => "queue", "result" => result)
            .increment(1);
        Ok(deleted)
    }

    async fn renew(&self, grant: &Grant, _ttl: Duration) -> LockResult<bool> {
        Err(LockError::NotSupported(format!(
            "queue lock on '{}' is session-bound and has no lease to renew",
            grant.resource()
        )))
    }
}

#[cfg(all(test, feature = "memory-backend"))]
mod tests {
    use super::*;
    use crate::memory::MemoryCoordination;
    use std::sync::Mutex;
    use tokio::time::sleep;

    fn lock_for(coordination: &MemoryCoordination) -> QueueLock {
        QueueLock::new(Arc::new(coordination.session()))
    }

    #[tokio::test]
    async fn test_acquire_uncontended() {
        let coordination = MemoryCoordination::new();
        let lock = lock_for(&coordination);

        let guard = lock
            .acquire("order", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(guard.resource(), "order");
        assert!(guard.grant().queue_node().unwrap().starts_with("/order/order-"));

        assert!(guard.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_wakes_next_waiter() {
        let coordination = MemoryCoordination::new();
        let holder = lock_for(&coordination);
        let waiter = lock_for(&coordination);

        let guard = holder
            .acquire("order", Duration::from_secs(5))
            .await
            .unwrap();

        let pending = tokio::spawn(async move {
            waiter.acquire("order", Duration::from_secs(5)).await
        });

        sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        guard.release().await.unwrap();
        let second = pending.await.unwrap().unwrap();
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let coordination = MemoryCoordination::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = lock_for(&coordination);
        let guard = first.acquire("order", Duration::from_secs(5)).await.unwrap();

        let mut waiters = Vec::new();
        for i in 0..3 {
            let lock = lock_for(&coordination);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                let guard = lock.acquire("order", Duration::from_secs(5)).await.unwrap();
                order.lock().unwrap().push(i);
                sleep(Duration::from_millis(10)).await;
                guard.release().await.unwrap();
            }));
            // Queue positions are assigned at node creation; stagger them.
            sleep(Duration::from_millis(20)).await;
        }

        guard.release().await.unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_timeout_cleans_up_own_node() {
        let coordination = MemoryCoordination::new();
        let holder = lock_for(&coordination);
        let impatient = lock_for(&coordination);

        let _guard = holder
            .acquire("order", Duration::from_secs(5))
            .await
            .unwrap();

        let result = impatient
            .acquire("order", Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(LockError::TimedOut { .. })));

        // Only the holder's node may remain behind.
        let observer = coordination.session();
        let children = observer.list_children("/order").await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_holder_crash_frees_waiter() {
        let coordination = MemoryCoordination::new();
        let crashing_session = coordination.session();
        let holder = QueueLock::new(Arc::new(crashing_session.clone()));
        let waiter = lock_for(&coordination);

        let guard = holder
            .acquire("order", Duration::from_secs(5))
            .await
            .unwrap();

        let pending = tokio::spawn(async move {
            waiter.acquire("order", Duration::from_secs(5)).await
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        // Session death removes the ephemeral node without a release call.
        crashing_session.expire().await;
        let second = pending.await.unwrap().unwrap();
        second.release().await.unwrap();

        // The crashed holder's guard finds nothing left to delete.
        assert!(!guard.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_mid_queue_crash_does_not_skip_the_head() {
        let coordination = MemoryCoordination::new();
        let holder = lock_for(&coordination);
        let crashing_session = coordination.session();
        let middle = QueueLock::new(Arc::new(crashing_session.clone()));
        let tail = lock_for(&coordination);

        let guard = holder
            .acquire("order", Duration::from_secs(5))
            .await
            .unwrap();

        let middle_pending =
            tokio::spawn(async move { middle.acquire("order", Duration::from_secs(5)).await });
        sleep(Duration::from_millis(20)).await;
        let tail_pending =
            tokio::spawn(async move { tail.acquire("order", Duration::from_secs(5)).await });
        sleep(Duration::from_millis(20)).await;

        // The middle waiter's session dies; its node disappears out of order.
        // The tail's watch fires, but the holder still owns the lock, so the
        // tail must re-chain onto the holder instead of acquiring.
        crashing_session.expire().await;
        sleep(Duration::from_millis(50)).await;
        assert!(!tail_pending.is_finished());

        guard.release().await.unwrap();
        // The middle waiter wakes with its own node gone: no grant for it.
        assert!(matches!(
            middle_pending.await.unwrap(),
            Err(LockError::SubstrateUnavailable(_))
        ));
        let tail_guard = tail_pending.await.unwrap().unwrap();
        tail_guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_releases() {
        let coordination = MemoryCoordination::new();
        let first = lock_for(&coordination);
        let second = lock_for(&coordination);

        {
            let _guard = first
                .acquire("order", Duration::from_secs(5))
                .await
                .unwrap();
        }

        // The drop-spawned release needs a moment to land.
        sleep(Duration::from_millis(50)).await;
        let guard = second
            .acquire("order", Duration::from_millis(500))
            .await
            .unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_with_lease_grant_is_rejected() {
        let coordination = MemoryCoordination::new();
        let lock = lock_for(&coordination);

        let foreign = Grant::lease("order", "order", "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        let result = lock.release(&foreign).await;
        assert!(matches!(result, Err(LockError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_invalid_resource_names() {
        let coordination = MemoryCoordination::new();
        let lock = lock_for(&coordination);

        assert!(matches!(
            lock.acquire("", Duration::from_secs(1)).await,
            Err(LockError::InvalidResource(_))
        ));
        assert!(matches!(
            lock.acquire("a/b", Duration::from_secs(1)).await,
            Err(LockError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_sequence_parsing() {
        assert_eq!(sequence_of("order-0000000042"), Some(42));
        assert_eq!(sequence_of("order-stock-0000000007"), Some(7));
        assert_eq!(sequence_of("order"), None);
        assert_eq!(sequence_of("order-"), None);
    }
}
