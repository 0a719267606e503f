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

//! Redis-backed lease store.
//!
//! ## Purpose
//! Implements [`LeaseStore`] over the `redis` crate with an async
//! `ConnectionManager` (pooled, auto-reconnecting).
//!
//! ## Design Decisions
//! - **`SET key value NX PX ttl`**: acquisition is a single conditional
//!   write; the server answers `OK` or nil, never leaving a window between
//!   "check" and "set".
//! - **Server-evaluated Lua for compare-and-delete / compare-and-expire**: a
//!   client-side read-then-delete admits the race where the lease expires
//!   between the two steps and a newer holder's lease is deleted instead.
//! - **Namespace prefix**: keys are addressed as `{namespace}:{key}` so
//!   multiple applications can share one Redis instance. The prefix is a key
//!   addressing concern only; values are stored as the caller's raw token
//!   string.

use crate::error::LockResult;
use crate::keyvalue::LeaseStore;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::time::Duration;

/// Delete the key only while it still carries the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Reset the TTL only while the key still carries the caller's token.
const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Lease store over a live Redis instance.
#[derive(Clone)]
pub struct RedisLeaseStore {
    manager: ConnectionManager,
    namespace: String,
}

impl RedisLeaseStore {
    /// Connect to Redis.
    ///
    /// `url` is a connection URL such as `redis://localhost:6379`;
    /// `namespace` prefixes every key written by this store.
    pub async fn new(url: &str, namespace: &str) -> LockResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self {
            manager,
            namespace: namespace.trim_end_matches(':').to_string(),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.prefixed_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        // `OK` when the key was written, nil when it already existed.
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> LockResult<bool> {
        let mut conn = self.manager.clone();
        let deleted: i64 = Script::new(COMPARE_AND_DELETE)
            .key(self.prefixed_key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> LockResult<bool> {
        let mut conn = self.manager.clone();
        let extended: i64 = Script::new(COMPARE_AND_EXPIRE)
            .key(self.prefixed_key(key))
            .arg(expected)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        Ok(extended == 1)
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(self.prefixed_key(key)).await?;
        Ok(value)
    }
}
