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

//! Expiring key-value substrate trait.
//!
//! Adapter surface over a key-value store with server-enforced expiry (Redis
//! or the in-memory stand-in). The lease lock is written against this trait.
//! Every compare-* operation must execute as a single atomic server-side
//! step: a non-atomic read-then-write admits the race where the lease expires
//! between the check and the write and a third party's new lease is clobbered.

use crate::error::LockResult;
use async_trait::async_trait;
use std::time::Duration;

/// Client adapter for an expiring key-value store.
///
/// Key addressing (prefixes, namespaces) is the implementor's concern; the
/// stored value is the caller's raw token string, encoded independently of
/// how keys are addressed.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Set `key` to `value` with the given TTL, only if the key is absent.
    /// Returns whether the write happened.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool>;

    /// Atomically delete `key` if its current value equals `expected`.
    /// Returns whether the delete happened (`false`: the key was absent or
    /// held a different value, and was left untouched).
    async fn compare_and_delete(&self, key: &str, expected: &str) -> LockResult<bool>;

    /// Atomically reset `key`'s TTL if its current value equals `expected`.
    /// Returns whether the extension happened.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration)
        -> LockResult<bool>;

    /// Current value of `key`, if any. Inspection only, never part of a
    /// check-then-act sequence.
    async fn get(&self, key: &str) -> LockResult<Option<String>>;
}
