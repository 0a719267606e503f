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

//! The common lock contract shared by both backends.

use crate::error::{LockError, LockResult};
use crate::guard::LockGuard;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for distributed mutual-exclusion locks.
///
/// ## Purpose
/// Both backends (the fair queue lock over a hierarchical coordination
/// service, and the best-effort lease lock over an expiring key-value store)
/// expose this identical two-call contract, so callers can be written against
/// `Arc<dyn DistributedLock>` without caring which substrate coordinates them.
///
/// ## Behavior
/// - **Queue backend**: `acquire` waits in FIFO order up to `timeout_or_ttl`,
///   then fails with [`LockError::TimedOut`].
/// - **Lease backend**: `acquire` is a single round trip; `timeout_or_ttl` is
///   the lease TTL stamped onto the key, and a contended resource fails
///   immediately with [`LockError::Denied`]; this backend never queues.
///
/// Acquisition failures are returned to the caller, never retried internally:
/// retry semantics depend on business context and belong to the caller.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire exclusive access to `resource`.
    ///
    /// `timeout_or_ttl` is the maximum wait for the queue backend and the
    /// lease TTL for the lease backend. Returns a [`LockGuard`] that owns the
    /// obligation to release exactly once.
    async fn acquire(&self, resource: &str, timeout_or_ttl: Duration) -> LockResult<LockGuard>;

    /// Release a previously issued grant.
    ///
    /// Normally invoked through [`LockGuard::release`]. Returns `Ok(false)`
    /// when the substrate no longer held the grant's entry: the lease had
    /// already expired and possibly been reacquired by someone else, or the
    /// queue node was already removed by session cleanup. That outcome is
    /// reported, not treated as fatal, since mutual exclusion was never at
    /// risk.
    async fn release(&self, grant: &Grant) -> LockResult<bool>;

    /// Extend a lease grant's TTL (single atomic compare-and-expire).
    ///
    /// Renewal is caller-driven; the library never spawns a heartbeat task.
    /// The queue backend returns [`LockError::NotSupported`]: its queue node
    /// stays alive with the session and has no TTL to extend.
    async fn renew(&self, grant: &Grant, ttl: Duration) -> LockResult<bool>;
}

/// Proof of ownership carried by a grant.
#[derive(Debug, Clone)]
pub enum Proof {
    /// The ephemeral sequential node owned by a queue-lock acquisition.
    QueueNode {
        /// Full substrate path of the owned node, including its sequence
        path: String,
    },
    /// The key and fencing token of a lease-lock acquisition.
    Lease {
        /// Store-level key the lease was written under
        key: String,
        /// Token written as the key's value; generated fresh per attempt
        token: String,
    },
}

/// A single acquisition's identity: the resource name plus the backend's
/// proof of ownership.
///
/// Grants are issued by backends and travel inside a [`LockGuard`]. Handing
/// a grant to a backend that never issued it (queue grant to the lease
/// backend, or vice versa) is a [`LockError::ProtocolViolation`].
#[derive(Debug, Clone)]
pub struct Grant {
    resource: String,
    proof: Proof,
}

impl Grant {
    pub(crate) fn queue(resource: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            proof: Proof::QueueNode { path: path.into() },
        }
    }

    pub(crate) fn lease(
        resource: impl Into<String>,
        key: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            proof: Proof::Lease {
                key: key.into(),
                token: token.into(),
            },
        }
    }

    /// The caller-chosen resource name this grant protects.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The backend-specific proof of ownership.
    pub fn proof(&self) -> &Proof {
        &self.proof
    }

    /// Full path of the owned queue node, if this is a queue grant.
    pub fn queue_node(&self) -> Option<&str> {
        match &self.proof {
            Proof::QueueNode { path } => Some(path),
            Proof::Lease { .. } => None,
        }
    }

    /// Fencing token of the owned lease, if this is a lease grant.
    pub fn fencing_token(&self) -> Option<&str> {
        match &self.proof {
            Proof::Lease { token, .. } => Some(token),
            Proof::QueueNode { .. } => None,
        }
    }
}

/// Resource names become path segments (queue) and key suffixes (lease), so
/// they must be non-empty and free of path separators.
pub(crate) fn validate_resource(resource: &str) -> LockResult<()> {
    if resource.is_empty() {
        return Err(LockError::InvalidResource(
            "resource name is empty".to_string(),
        ));
    }
    if resource.contains('/') {
        return Err(LockError::InvalidResource(format!(
            "resource name may not contain '/': {resource}"
        )));
    }
    Ok(())
}
