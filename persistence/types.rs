/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Serializable mirror types for the persisted tree aggregate.
//!
//! The whole tree state is read and written as one object; there are no
//! partial-field updates at the storage layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Node kind for persistence (mirrors `NodeKind` in the tree model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistedNodeKind {
    #[default]
    Tab,
    Group,
}

/// Persisted view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedView {
    pub view_id: String,
    pub name: String,
    pub color: String,
}

/// Persisted node. Sibling order is the order of appearance in
/// `PersistedTreeState::nodes`; depth is never persisted, it is recomputed
/// from `parent_id` on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedNode {
    /// Stable node identity.
    pub node_id: String,
    pub tab_id: u32,
    pub parent_id: Option<String>,
    pub view_id: String,
    pub group_id: Option<String>,
    #[serde(default)]
    pub kind: PersistedNodeKind,
    pub url: String,
    pub title: String,
    pub window_id: u32,
    pub is_expanded: bool,
}

/// Full tree aggregate, stored whole under a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistedTreeState {
    /// Views in display order.
    pub views: Vec<PersistedView>,
    pub active_view_id: String,
    /// Nodes in per-view pre-order.
    pub nodes: Vec<PersistedNode>,
    /// Tab id → node id. Advisory: nodes are authoritative on load.
    #[serde(default)]
    pub tab_index: BTreeMap<u32, String>,
}
