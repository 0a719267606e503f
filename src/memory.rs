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

//! In-memory substrate implementations (for testing and single-process use).
//!
//! ## Purpose
//! Single-process stand-ins for both substrates: [`MemoryCoordination`]
//! models a hierarchical service with sessions, ephemeral/sequential nodes
//! and deletion watches; [`MemoryLeaseStore`] models an expiring key-value
//! store. Every protocol property, crash recovery included (via
//! [`MemorySession::expire`]), is exercisable without live infrastructure.
//!
//! ## Limitations
//! - Not persistent (state lost on drop)
//! - Not distributed (single process only)
//! - Lease expiry is evaluated lazily on access, not by a reaper task

use crate::coordination::{CoordinationClient, DeletionWatch, NodeMode};
use crate::error::{LockError, LockResult};
use crate::keyvalue::LeaseStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

struct NodeEntry {
    /// Session that owns this node, when ephemeral
    owner: Option<u64>,
    /// Counter handed to sequential children of this node
    next_child_seq: u64,
}

#[derive(Default)]
struct EnsembleState {
    nodes: BTreeMap<String, NodeEntry>,
    watches: HashMap<String, Vec<oneshot::Sender<()>>>,
}

fn fire_watches(state: &mut EnsembleState, path: &str) {
    if let Some(waiters) = state.watches.remove(path) {
        for tx in waiters {
            let _ = tx.send(());
        }
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// In-memory hierarchical coordination substrate.
///
/// The substrate itself is shared; clients connect to it through
/// [`session`](Self::session), and each session owns its ephemeral nodes the
/// way a real coordination session would.
#[derive(Default)]
pub struct MemoryCoordination {
    state: Arc<Mutex<EnsembleState>>,
    next_session: AtomicU64,
}

impl MemoryCoordination {
    /// Create an empty substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this substrate.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            state: Arc::clone(&self.state),
            session_id: self.next_session.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// One client session against a [`MemoryCoordination`] substrate.
#[derive(Clone)]
pub struct MemorySession {
    state: Arc<Mutex<EnsembleState>>,
    session_id: u64,
}

impl MemorySession {
    /// Simulate session loss: every ephemeral node owned by this session is
    /// removed and its watches fire, exactly as a real substrate reacts to a
    /// crashed or partitioned client.
    pub async fn expire(&self) {
        let mut state = self.state.lock().await;
        let doomed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            state.nodes.remove(&path);
            fire_watches(&mut state, &path);
        }
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn create_node(&self, path: &str, mode: NodeMode) -> LockResult<String> {
        let mut state = self.state.lock().await;
        let owner = mode.is_ephemeral().then_some(self.session_id);
        let parent = parent_of(path);

        if mode.is_sequential() {
            let seq = match state.nodes.get_mut(parent) {
                Some(entry) => {
                    let seq = entry.next_child_seq;
                    entry.next_child_seq += 1;
                    seq
                }
                None => {
                    return Err(LockError::BackendError(format!(
                        "parent node missing: {parent}"
                    )))
                }
            };
            let full = format!("{path}{seq:010}");
            state.nodes.insert(
                full.clone(),
                NodeEntry {
                    owner,
                    next_child_seq: 0,
                },
            );
            Ok(full)
        } else {
            if !parent.is_empty() && !state.nodes.contains_key(parent) {
                return Err(LockError::BackendError(format!(
                    "parent node missing: {parent}"
                )));
            }
            if state.nodes.contains_key(path) {
                return if mode == NodeMode::Persistent {
                    Ok(path.to_string())
                } else {
                    Err(LockError::BackendError(format!(
                        "node already exists: {path}"
                    )))
                };
            }
            state.nodes.insert(
                path.to_string(),
                NodeEntry {
                    owner,
                    next_child_seq: 0,
                },
            );
            Ok(path.to_string())
        }
    }

    async fn node_exists(&self, path: &str) -> LockResult<bool> {
        let state = self.state.lock().await;
        Ok(state.nodes.contains_key(path))
    }

    async fn list_children(&self, path: &str) -> LockResult<Vec<String>> {
        let state = self.state.lock().await;
        let prefix = format!("{path}/");
        Ok(state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }

    async fn delete_node(&self, path: &str) -> LockResult<bool> {
        let mut state = self.state.lock().await;
        if state.nodes.remove(path).is_some() {
            fire_watches(&mut state, path);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn watch_once(&self, path: &str) -> LockResult<Option<DeletionWatch>> {
        let mut state = self.state.lock().await;
        if !state.nodes.contains_key(path) {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        state.watches.entry(path.to_string()).or_default().push(tx);
        Ok(Some(rx))
    }
}

struct LeaseEntry {
    value: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// In-memory expiring key-value store.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    entries: Arc<Mutex<HashMap<String, LeaseEntry>>>,
}

impl MemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(LeaseEntry::is_live) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            LeaseEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> LockResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() && entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            Some(entry) if !entry.is_live() => {
                entries.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> LockResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live() && entry.value == expected => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            Some(entry) if !entry.is_live() => {
                entries.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_sequential_nodes_are_ordered_and_unique() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        session.create_node("/order", NodeMode::Persistent).await.unwrap();
        let first = session
            .create_node("/order/order-", NodeMode::EphemeralSequential)
            .await
            .unwrap();
        let second = session
            .create_node("/order/order-", NodeMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(first, "/order/order-0000000000");
        assert_eq!(second, "/order/order-0000000001");
        assert_eq!(
            session.list_children("/order").await.unwrap(),
            vec!["order-0000000000".to_string(), "order-0000000001".to_string()]
        );
    }

    #[tokio::test]
    async fn test_persistent_create_is_idempotent() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        session.create_node("/order", NodeMode::Persistent).await.unwrap();
        let again = session.create_node("/order", NodeMode::Persistent).await;
        assert_eq!(again.unwrap(), "/order");
    }

    #[tokio::test]
    async fn test_ephemeral_create_conflict_is_an_error() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        session.create_node("/busy", NodeMode::Ephemeral).await.unwrap();
        let conflict = session.create_node("/busy", NodeMode::Ephemeral).await;
        assert!(matches!(conflict, Err(LockError::BackendError(_))));
    }

    #[tokio::test]
    async fn test_sequential_create_requires_parent() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        let orphan = session
            .create_node("/missing/child-", NodeMode::EphemeralSequential)
            .await;
        assert!(matches!(orphan, Err(LockError::BackendError(_))));
    }

    #[tokio::test]
    async fn test_watch_fires_on_delete() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        session.create_node("/order", NodeMode::Persistent).await.unwrap();
        let node = session
            .create_node("/order/order-", NodeMode::EphemeralSequential)
            .await
            .unwrap();

        let watch = session.watch_once(&node).await.unwrap().unwrap();
        assert!(session.delete_node(&node).await.unwrap());
        watch.await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_on_missing_node_is_none() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        assert!(session.watch_once("/nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_expiry_removes_only_its_ephemerals() {
        let coordination = MemoryCoordination::new();
        let dying = coordination.session();
        let surviving = coordination.session();

        dying.create_node("/order", NodeMode::Persistent).await.unwrap();
        let dying_node = dying
            .create_node("/order/order-", NodeMode::EphemeralSequential)
            .await
            .unwrap();
        let surviving_node = surviving
            .create_node("/order/order-", NodeMode::EphemeralSequential)
            .await
            .unwrap();

        let watch = surviving.watch_once(&dying_node).await.unwrap().unwrap();
        dying.expire().await;
        watch.await.unwrap();

        assert!(!surviving.node_exists(&dying_node).await.unwrap());
        assert!(surviving.node_exists(&surviving_node).await.unwrap());
        // The persistent root survives its creator.
        assert!(surviving.node_exists("/order").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_children_skips_grandchildren() {
        let coordination = MemoryCoordination::new();
        let session = coordination.session();

        session.create_node("/a", NodeMode::Persistent).await.unwrap();
        session.create_node("/a/b", NodeMode::Persistent).await.unwrap();
        session.create_node("/a/b/c", NodeMode::Persistent).await.unwrap();

        assert_eq!(session.list_children("/a").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_lease_entries_expire_lazily() {
        let store = MemoryLeaseStore::new();

        assert!(store
            .put_if_absent("order", "token-1", Duration::from_millis(30))
            .await
            .unwrap());
        assert!(!store
            .put_if_absent("order", "token-2", Duration::from_secs(1))
            .await
            .unwrap());

        sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get("order").await.unwrap(), None);
        assert!(store
            .put_if_absent("order", "token-2", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete_checks_the_value() {
        let store = MemoryLeaseStore::new();

        store
            .put_if_absent("order", "token-1", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!store.compare_and_delete("order", "other").await.unwrap());
        assert!(store.compare_and_delete("order", "token-1").await.unwrap());
        assert!(!store.compare_and_delete("order", "token-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_expire_extends_live_entries_only() {
        let store = MemoryLeaseStore::new();

        store
            .put_if_absent("order", "token-1", Duration::from_millis(40))
            .await
            .unwrap();
        assert!(store
            .compare_and_expire("order", "token-1", Duration::from_secs(1))
            .await
            .unwrap());

        sleep(Duration::from_millis(80)).await;
        // Still present thanks to the extension.
        assert_eq!(store.get("order").await.unwrap(), Some("token-1".to_string()));

        assert!(!store
            .compare_and_expire("order", "wrong", Duration::from_secs(1))
            .await
            .unwrap());
    }
}
