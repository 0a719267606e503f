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

//! Hierarchical coordination substrate trait.
//!
//! ## Purpose
//! Thin adapter surface over a remote coordination service (ZooKeeper or the
//! in-memory stand-in) exposing node create/exists/children/delete plus
//! one-shot deletion watches. The queue lock is written against this trait
//! and never touches a client library directly.
//!
//! ## Watch delivery
//! A substrate delivers watch callbacks on its own notification thread. The
//! adapter bridges that callback into a [`tokio::sync::oneshot`] channel, so
//! a blocked `acquire` simply awaits the receiver: single-wakeup delivery
//! without ad hoc monitor patterns.

use crate::error::LockResult;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// One-shot watch on a node; resolves when the node changes (deletion being
/// the interesting case). A closed channel also wakes the waiter: watchers
/// re-verify substrate state after every wakeup rather than trusting the
/// notification itself.
pub type DeletionWatch = oneshot::Receiver<()>;

/// Creation mode for coordination nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Plain node that outlives the creating session
    Persistent,
    /// Node removed automatically when the creating session terminates
    Ephemeral,
    /// Persistent node with a server-assigned, strictly increasing suffix
    PersistentSequential,
    /// Ephemeral node with a server-assigned, strictly increasing suffix
    EphemeralSequential,
}

impl NodeMode {
    /// Whether the substrate appends a sequence suffix to the node name.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            NodeMode::PersistentSequential | NodeMode::EphemeralSequential
        )
    }

    /// Whether the node dies with the creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, NodeMode::Ephemeral | NodeMode::EphemeralSequential)
    }
}

/// Client adapter for a hierarchical coordination service.
///
/// One implementor instance corresponds to one substrate session; ephemeral
/// nodes created through it disappear when that session dies.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create a node and return its full path (for sequential modes the path
    /// includes the server-assigned suffix).
    ///
    /// Creating a plain [`NodeMode::Persistent`] node that already exists is
    /// not an error: the existing node is kept and its path returned. This
    /// makes root creation idempotent under the create-if-absent race.
    async fn create_node(&self, path: &str, mode: NodeMode) -> LockResult<String>;

    /// Whether a node currently exists.
    async fn node_exists(&self, path: &str) -> LockResult<bool>;

    /// Names (not full paths) of a node's direct children, in no particular
    /// order.
    async fn list_children(&self, path: &str) -> LockResult<Vec<String>>;

    /// Delete a node. Returns `false` when the node was already gone.
    async fn delete_node(&self, path: &str) -> LockResult<bool>;

    /// Arm a one-shot watch on `path`, atomically with an existence check.
    ///
    /// Returns `None` when the node does not exist; there is nothing to wait
    /// for and the caller re-examines the children instead.
    async fn watch_once(&self, path: &str) -> LockResult<Option<DeletionWatch>>;
}
