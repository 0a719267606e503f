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

//! Configuration support for lock backends.
//!
//! ## Purpose
//! Environment-based selection and construction of a lock backend, so
//! deployments switch substrates without code changes.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `DISLOCK_BACKEND`: Backend type (default: "memory")
//!   - "memory" | "in-memory" → queue lock over the in-memory substrate
//!   - "zookeeper" | "zk" → queue lock over a ZooKeeper ensemble
//!   - "redis" → lease lock over a Redis instance
//!
//! ### ZooKeeper Configuration
//! - `DISLOCK_ZK_CONNECT`: Connect string (default: "127.0.0.1:2181")
//! - `DISLOCK_ZK_SESSION_TIMEOUT_MS`: Session timeout (default: 60000)
//!
//! ### Redis Configuration
//! - `DISLOCK_REDIS_URL`: Redis server URL (default: "redis://localhost:6379")
//! - `DISLOCK_REDIS_NAMESPACE`: Key prefix for isolation (default: "dislock")

use crate::error::{LockError, LockResult};
use crate::lock::DistributedLock;
use std::sync::Arc;

/// Backend type configuration.
#[derive(Clone, Debug)]
pub enum BackendType {
    /// In-memory queue lock (single process; coordinates only callers sharing
    /// the constructed instance)
    Memory,
    /// Fair queue lock over a ZooKeeper ensemble (requires the
    /// `zookeeper-backend` feature)
    ZooKeeper {
        /// Comma-separated `host:port` connect string
        connect_string: String,
        /// Session timeout in milliseconds
        session_timeout_ms: u64,
    },
    /// Best-effort lease lock over Redis (requires the `redis-backend`
    /// feature)
    Redis {
        /// Redis server URL
        url: String,
        /// Key namespace prefix
        namespace: String,
    },
}

impl Default for BackendType {
    fn default() -> Self {
        Self::Memory
    }
}

/// Lock backend configuration.
#[derive(Clone, Debug, Default)]
pub struct LockConfig {
    /// Backend type
    pub backend: BackendType,
}

impl LockConfig {
    /// Create configuration from environment variables.
    ///
    /// See the module documentation for the complete variable list.
    pub fn from_env() -> LockResult<Self> {
        let backend_str = std::env::var("DISLOCK_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "memory" | "in-memory" => BackendType::Memory,

            "zookeeper" | "zk" => {
                let connect_string = std::env::var("DISLOCK_ZK_CONNECT")
                    .unwrap_or_else(|_| "127.0.0.1:2181".to_string());
                let session_timeout_ms = std::env::var("DISLOCK_ZK_SESSION_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60_000);
                BackendType::ZooKeeper {
                    connect_string,
                    session_timeout_ms,
                }
            }

            "redis" => {
                let url = std::env::var("DISLOCK_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string());
                let namespace = std::env::var("DISLOCK_REDIS_NAMESPACE")
                    .unwrap_or_else(|_| "dislock".to_string());
                BackendType::Redis { url, namespace }
            }

            other => {
                return Err(LockError::ConfigError(format!(
                    "Unknown backend type: {}. Valid options: memory, zookeeper, redis",
                    other
                )));
            }
        };

        Ok(Self { backend })
    }

    /// Create configuration with an explicit backend.
    pub fn new(backend: BackendType) -> Self {
        Self { backend }
    }
}

/// Create a lock backend from environment configuration.
pub async fn create_lock_from_env() -> LockResult<Arc<dyn DistributedLock>> {
    let config = LockConfig::from_env()?;
    create_lock_from_config(config).await
}

/// Create a lock backend from explicit configuration.
pub async fn create_lock_from_config(config: LockConfig) -> LockResult<Arc<dyn DistributedLock>> {
    match config.backend {
        #[cfg(feature = "memory-backend")]
        BackendType::Memory => {
            use crate::memory::MemoryCoordination;
            use crate::queue::QueueLock;
            let coordination = MemoryCoordination::new();
            Ok(Arc::new(QueueLock::new(Arc::new(coordination.session()))))
        }

        #[cfg(not(feature = "memory-backend"))]
        BackendType::Memory => Err(LockError::ConfigError(
            "Memory backend requires the 'memory-backend' feature".to_string(),
        )),

        #[cfg(feature = "zookeeper-backend")]
        BackendType::ZooKeeper {
            connect_string,
            session_timeout_ms,
        } => {
            use crate::queue::QueueLock;
            use crate::zookeeper::ZooKeeperCoordination;
            let coordination = ZooKeeperCoordination::connect(
                &connect_string,
                std::time::Duration::from_millis(session_timeout_ms),
            )
            .await?;
            Ok(Arc::new(QueueLock::new(Arc::new(coordination))))
        }

        #[cfg(not(feature = "zookeeper-backend"))]
        BackendType::ZooKeeper { .. } => Err(LockError::ConfigError(
            "ZooKeeper backend requires the 'zookeeper-backend' feature".to_string(),
        )),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url, namespace } => {
            use crate::lease::LeaseLock;
            use crate::redis::RedisLeaseStore;
            let store = RedisLeaseStore::new(&url, &namespace).await?;
            Ok(Arc::new(LeaseLock::new(Arc::new(store))))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(LockError::ConfigError(
            "Redis backend requires the 'redis-backend' feature".to_string(),
        )),
    }
}
