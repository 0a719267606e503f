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

//! ZooKeeper-backed coordination client.
//!
//! ## Purpose
//! Implements [`CoordinationClient`] over the `zookeeper` crate. The client
//! library is synchronous, so every call runs on the blocking thread pool via
//! `tokio::task::spawn_blocking`; watch callbacks, which ZooKeeper delivers
//! on its event thread, are forwarded into oneshot channels so waiters simply
//! await them.
//!
//! One [`ZooKeeperCoordination`] owns one ZooKeeper session. Ephemeral nodes
//! created through it are removed by the server when the session dies, which
//! is the queue lock's crash-recovery mechanism.

use crate::coordination::{CoordinationClient, DeletionWatch, NodeMode};
use crate::error::{LockError, LockResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZkError, ZkResult, ZooKeeper};

/// Logs session-level events (connect, disconnect, expiry).
struct SessionWatcher;

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        debug!(state = ?event.keeper_state, "zookeeper session event");
    }
}

/// Forwards the one-shot node watch into a channel. Any event on the watched
/// node wakes the waiter; the waiter re-verifies substrate state itself, so
/// a non-delete event consuming the watch cannot strand it.
struct NodeEventForwarder {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Watcher for NodeEventForwarder {
    fn handle(&self, event: WatchedEvent) {
        debug!(event = ?event.event_type, path = ?event.path, "zookeeper node event");
        if let Ok(mut slot) = self.tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn create_mode(mode: NodeMode) -> CreateMode {
    match mode {
        NodeMode::Persistent => CreateMode::Persistent,
        NodeMode::Ephemeral => CreateMode::Ephemeral,
        NodeMode::PersistentSequential => CreateMode::PersistentSequential,
        NodeMode::EphemeralSequential => CreateMode::EphemeralSequential,
    }
}

/// Coordination client over a live ZooKeeper ensemble.
#[derive(Clone)]
pub struct ZooKeeperCoordination {
    client: Arc<ZooKeeper>,
}

impl ZooKeeperCoordination {
    /// Connect to a ZooKeeper ensemble.
    ///
    /// `connect_string` is the usual comma-separated `host:port` list;
    /// `session_timeout` bounds how long the server keeps this session's
    /// ephemeral nodes alive after the last heartbeat.
    pub async fn connect(connect_string: &str, session_timeout: Duration) -> LockResult<Self> {
        let connect_string = connect_string.to_string();
        let client = tokio::task::spawn_blocking(move || {
            ZooKeeper::connect(&connect_string, session_timeout, SessionWatcher)
        })
        .await
        .map_err(|e| LockError::BackendError(format!("zookeeper worker failed: {e}")))??;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Close the session explicitly; the server then removes this session's
    /// ephemeral nodes at once instead of waiting out the session timeout.
    pub async fn close(&self) -> LockResult<()> {
        self.run(|zk| zk.close()).await
    }

    async fn run<T, F>(&self, op: F) -> LockResult<T>
    where
        F: FnOnce(&ZooKeeper) -> ZkResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| LockError::BackendError(format!("zookeeper worker failed: {e}")))?
            .map_err(LockError::from)
    }
}

#[async_trait]
impl CoordinationClient for ZooKeeperCoordination {
    async fn create_node(&self, path: &str, mode: NodeMode) -> LockResult<String> {
        let client = Arc::clone(&self.client);
        let requested = path.to_string();
        let zk_mode = create_mode(mode);
        let result = tokio::task::spawn_blocking(move || {
            client.create(&requested, Vec::new(), Acl::open_unsafe().clone(), zk_mode)
        })
        .await
        .map_err(|e| LockError::BackendError(format!("zookeeper worker failed: {e}")))?;

        match result {
            Ok(full_path) => Ok(full_path),
            // A concurrent creator winning the race leaves the node we wanted.
            Err(ZkError::NodeExists) if mode == NodeMode::Persistent => Ok(path.to_string()),
            Err(err) => Err(err.into()),
        }
    }

    async fn node_exists(&self, path: &str) -> LockResult<bool> {
        let path = path.to_string();
        let stat = self.run(move |zk| zk.exists(&path, false)).await?;
        Ok(stat.is_some())
    }

    async fn list_children(&self, path: &str) -> LockResult<Vec<String>> {
        let path = path.to_string();
        self.run(move |zk| zk.get_children(&path, false)).await
    }

    async fn delete_node(&self, path: &str) -> LockResult<bool> {
        let client = Arc::clone(&self.client);
        let path = path.to_string();
        let result = tokio::task::spawn_blocking(move || client.delete(&path, None))
            .await
            .map_err(|e| LockError::BackendError(format!("zookeeper worker failed: {e}")))?;

        match result {
            Ok(()) => Ok(true),
            Err(ZkError::NoNode) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn watch_once(&self, path: &str) -> LockResult<Option<DeletionWatch>> {
        let client = Arc::clone(&self.client);
        let watched = path.to_string();
        let (tx, rx) = oneshot::channel();
        let forwarder = NodeEventForwarder {
            tx: Mutex::new(Some(tx)),
        };

        let result = tokio::task::spawn_blocking(move || client.exists_w(&watched, forwarder))
            .await
            .map_err(|e| LockError::BackendError(format!("zookeeper worker failed: {e}")))?;

        match result {
            Ok(Some(_stat)) => Ok(Some(rx)),
            // The node is already gone; nothing to wait for.
            Ok(None) => Ok(None),
            Err(ZkError::NoNode) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
