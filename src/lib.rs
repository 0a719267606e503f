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

//! # Dislock: Distributed Mutual-Exclusion Locks
//!
//! ## Purpose
//! Guarantees mutual exclusion across independent processes despite network
//! partitions, crashed holders, and clock drift, without running a lock
//! manager process of its own: correctness is entirely a property of the
//! protocol each client runs against a shared substrate.
//!
//! ## Architecture Context
//! Two interchangeable backends implement one contract:
//! - **[`QueueLock`]**: fair FIFO mutual exclusion over a hierarchical
//!   coordination service (ZooKeeper), using ephemeral sequential nodes and
//!   predecessor watch-chaining. Blocks up to a caller-chosen timeout; crash
//!   recovery rides on the substrate's ephemeral-node cleanup.
//! - **[`LeaseLock`]**: best-effort mutual exclusion over an expiring
//!   key-value store (Redis), using a token-guarded `SET NX PX` lease. Never
//!   blocks (a contended resource is denied immediately) and a crashed
//!   holder's lease heals itself at TTL.
//!
//! Both return a [`LockGuard`] that releases exactly once: explicitly, or
//! best-effort on drop.
//!
//! ## Design Decisions
//! - **Herd avoidance**: queue waiters watch only their immediate
//!   predecessor, so one release wakes at most one waiter.
//! - **Fencing tokens**: every lease acquisition writes a fresh ULID; release
//!   and renewal are atomic server-side compares against it, so a stale
//!   holder can never clobber a successor's lease.
//! - **No internal retries, no heartbeats**: denied/timed-out acquisitions
//!   are returned to the caller, and lease renewal is an explicit call;
//!   retry and renewal policy depend on business context.
//! - **A lock acquired on one substrate is never compared with one on
//!   another.**
//!
//! ## Backend Support
//! - **InMemory** (feature: `memory-backend`, default): both substrates,
//!   in-process, with session expiry for crash simulation
//! - **ZooKeeper** (feature: `zookeeper-backend`): queue lock substrate
//! - **Redis** (feature: `redis-backend`): lease lock substrate
//!
//! ## Examples
//!
//! ### Fair queue lock
//! ```rust,no_run
//! use dislock::{DistributedLock, MemoryCoordination, QueueLock};
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordination = MemoryCoordination::new();
//! let lock = QueueLock::new(Arc::new(coordination.session()));
//!
//! let guard = lock.acquire("order-stock", Duration::from_secs(30)).await?;
//! // ... protected work ...
//! guard.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Best-effort lease lock
//! ```rust,no_run
//! use dislock::{DistributedLock, LeaseLock, LockError, RedisLeaseStore};
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisLeaseStore::new("redis://localhost:6379", "myapp").await?;
//! let lock = LeaseLock::new(Arc::new(store));
//!
//! match lock.acquire("order-stock", Duration::from_secs(30)).await {
//!     Ok(guard) => {
//!         // ... protected work ...
//!         guard.release().await?;
//!     }
//!     Err(LockError::Denied { .. }) => {
//!         // another holder is active; caller decides whether to retry
//!     }
//!     Err(other) => return Err(other.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordination;
pub mod error;
pub mod guard;
pub mod keyvalue;
pub mod lease;
pub mod lock;
pub mod queue;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

#[cfg(feature = "zookeeper-backend")]
pub mod zookeeper;

pub use config::{create_lock_from_config, create_lock_from_env, BackendType, LockConfig};
pub use coordination::{CoordinationClient, DeletionWatch, NodeMode};
pub use error::{LockError, LockResult};
pub use guard::LockGuard;
pub use keyvalue::LeaseStore;
pub use lease::LeaseLock;
pub use lock::{DistributedLock, Grant, Proof};
pub use queue::QueueLock;

#[cfg(feature = "memory-backend")]
pub use memory::{MemoryCoordination, MemoryLeaseStore, MemorySession};

#[cfg(feature = "redis-backend")]
pub use crate::redis::RedisLeaseStore;

#[cfg(feature = "zookeeper-backend")]
pub use crate::zookeeper::ZooKeeperCoordination;
