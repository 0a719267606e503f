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

//! Error types for distributed lock operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock operations.
///
/// `Denied` and `TimedOut` are expected outcomes of contended acquisition,
/// not faults; callers match on them to drive retry or fallback policy.
/// A connectivity failure is always surfaced as `SubstrateUnavailable` and
/// never interpreted as "lock free" or "lock held".
#[derive(Error, Debug)]
pub enum LockError {
    /// Coordination service / key-value store unreachable
    #[error("substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    /// Lease is held by another client (lease backend only)
    #[error("lock on '{resource}' is held by another client")]
    Denied {
        /// Resource whose lease was already taken
        resource: String,
    },

    /// Waited past the deadline for a spot in the queue (queue backend only)
    #[error("timed out after {waited:?} waiting for lock on '{resource}'")]
    TimedOut {
        /// Resource that stayed contended
        resource: String,
        /// How long the attempt waited before giving up
        waited: Duration,
    },

    /// A grant was presented to a backend that never issued it, or substrate
    /// state contradicts the protocol (e.g. an unparseable queue sequence)
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Resource name is empty or contains a path separator
    #[error("invalid resource name: {0}")]
    InvalidResource(String),

    /// Operation does not apply to this backend
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Substrate error that is neither connectivity nor protocol
    #[error("backend error: {0}")]
    BackendError(String),
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
            || err.is_timeout()
        {
            LockError::SubstrateUnavailable(format!("redis: {err}"))
        } else {
            LockError::BackendError(format!("redis: {err}"))
        }
    }
}

#[cfg(feature = "zookeeper-backend")]
impl From<zookeeper::ZkError> for LockError {
    fn from(err: zookeeper::ZkError) -> Self {
        use zookeeper::ZkError;
        match err {
            ZkError::ConnectionLoss
            | ZkError::OperationTimeout
            | ZkError::SessionExpired
            | ZkError::SessionMoved => {
                LockError::SubstrateUnavailable(format!("zookeeper: {err:?}"))
            }
            other => LockError::BackendError(format!("zookeeper: {other:?}")),
        }
    }
}
