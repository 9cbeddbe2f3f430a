/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The reconciliation engine: tree, store, and live browser state.
//!
//! `TreeManager` owns the in-memory tree and the store handle. Every public
//! mutator follows the same discipline: reload the persisted aggregate,
//! apply the change, persist the whole aggregate back. The store is the
//! coordination point when several surfaces hold their own manager.
//!
//! Persistence failures are logged and swallowed; the in-memory tree stays
//! ahead of the store rather than blocking tab handling.

use std::collections::HashSet;
use std::sync::Arc;

use log::{info, warn};
use uuid::Uuid;

use serde::Serialize;

use crate::model::tree::{
    Node, NodeKind, RemovePolicy, TabId, TabRef, TabTree, TreeError, WindowId,
};
use crate::persistence::types::PersistedNodeKind;
use crate::persistence::{StoreError, TREE_STATE_KEY, TreeStore};
use crate::placement::Placement;

/// Errors from engine operations.
#[derive(Debug)]
pub enum EngineError {
    Tree(TreeError),
    Store(StoreError),
    /// Group creation was requested with an empty member list.
    NoTabsSpecified,
    /// The first group member is not tracked, so there is no anchor position.
    FirstTabNotFound,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Tree(e) => write!(f, "Tree error: {e}"),
            EngineError::Store(e) => write!(f, "Store error: {e}"),
            EngineError::NoTabsSpecified => write!(f, "No tabs specified"),
            EngineError::FirstTabNotFound => write!(f, "First tab is not tracked"),
        }
    }
}

impl From<TreeError> for EngineError {
    fn from(e: TreeError) -> Self {
        EngineError::Tree(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

/// A rendered subtree for UI surfaces: one node with nested children, in
/// display order.
#[derive(Debug, Clone, Serialize)]
pub struct TreeBranch {
    pub node_id: String,
    pub tab_id: TabId,
    pub title: String,
    pub url: String,
    pub depth: u32,
    pub is_expanded: bool,
    pub group_id: Option<String>,
    pub kind: PersistedNodeKind,
    pub children: Vec<TreeBranch>,
}

/// A group container and its membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub group_node: Uuid,
    /// The real tab backing the container.
    pub group_tab: TabId,
    pub name: String,
    /// Member tabs in pre-order of the container's subtree.
    pub members: Vec<TabId>,
}

/// Owns the tab tree and keeps it consistent with the store and the browser.
pub struct TreeManager {
    store: Arc<TreeStore>,
    tree: TabTree,
}

impl TreeManager {
    /// Create a manager over a store, loading persisted state if present.
    pub fn new(store: Arc<TreeStore>) -> Self {
        let mut manager = Self {
            store,
            tree: TabTree::new(),
        };
        manager.load_state();
        manager
    }

    pub fn tree(&self) -> &TabTree {
        &self.tree
    }

    pub fn store(&self) -> &Arc<TreeStore> {
        &self.store
    }

    /// Replace the in-memory tree with the persisted aggregate. Loading
    /// normalizes: depths recomputed, orphans promoted, cycles broken.
    pub fn load_state(&mut self) {
        if let Some(snapshot) = self.store.get_json(TREE_STATE_KEY) {
            self.tree = TabTree::from_snapshot(&snapshot);
        }
    }

    /// Write the whole aggregate back. Failures are logged, never raised.
    pub fn persist_state(&self) {
        if let Err(e) = self.store.set_json(TREE_STATE_KEY, &self.tree.to_snapshot()) {
            warn!("Failed to persist tree state: {e}");
        }
    }

    // --- tab lifecycle ---

    /// Track a new tab at a resolved placement and persist. The caller is
    /// expected to have reloaded state before resolving the placement.
    pub fn insert_tab(
        &mut self,
        tab: &TabRef,
        placement: &Placement,
    ) -> Result<Uuid, EngineError> {
        let id = self
            .tree
            .add_node(tab, placement.parent, placement.view, placement.insert_after)?;
        self.tree.expand_ancestors(id);
        self.persist_state();
        Ok(id)
    }

    /// A tracked tab closed. Returns the tab ids removed from the tree;
    /// with `CloseAll` the caller closes every id after the first in the
    /// browser too.
    pub fn remove_tab(&mut self, tab: TabId, policy: RemovePolicy) -> Vec<TabId> {
        self.load_state();
        let Some(id) = self.tree.node_id_by_tab(tab) else {
            return Vec::new();
        };
        let removed = self.tree.remove_node(id, policy);
        self.persist_state();
        removed
    }

    /// A whole window closed. Drops every node in the window, deepest
    /// first, so descendants living in other windows are promoted rather
    /// than closed with it.
    pub fn remove_window(&mut self, window: WindowId) -> usize {
        self.load_state();
        let mut doomed: Vec<(u32, Uuid)> = self
            .tree
            .nodes()
            .filter(|n| n.window == window)
            .map(|n| (n.depth, n.id))
            .collect();
        doomed.sort_by(|a, b| b.0.cmp(&a.0));
        let count = doomed.len();
        for (_, id) in doomed {
            self.tree.remove_node(id, RemovePolicy::Promote);
        }
        if count > 0 {
            self.persist_state();
        }
        count
    }

    /// Record a URL/title change on a tracked tab.
    pub fn update_tab(&mut self, tab: TabId, url: &str, title: &str) {
        self.load_state();
        if self.tree.update_tab_info(tab, url, title) {
            self.persist_state();
        }
    }

    /// Record a tab landing in a different window (detach/attach).
    pub fn set_tab_window(&mut self, tab: TabId, window: WindowId) {
        self.load_state();
        if self.tree.set_window(tab, window) {
            self.persist_state();
        }
    }

    // --- structure edits ---

    pub fn move_node(
        &mut self,
        id: Uuid,
        new_parent: Option<Uuid>,
        index: usize,
    ) -> Result<(), EngineError> {
        self.load_state();
        self.tree.move_node(id, new_parent, index)?;
        self.persist_state();
        Ok(())
    }

    pub fn toggle_expanded(&mut self, id: Uuid) -> Option<bool> {
        self.load_state();
        let state = self.tree.toggle_expanded(id)?;
        self.persist_state();
        Some(state)
    }

    pub fn set_expanded(&mut self, id: Uuid, expanded: bool) -> bool {
        self.load_state();
        if self.tree.set_expanded(id, expanded) {
            self.persist_state();
            return true;
        }
        false
    }

    /// Make a node visible: expand it and its whole ancestor chain.
    pub fn expand_node(&mut self, id: Uuid) -> bool {
        self.load_state();
        if !self.tree.set_expanded(id, true) {
            return false;
        }
        self.tree.expand_ancestors(id);
        self.persist_state();
        true
    }

    // --- views ---

    pub fn create_view(&mut self, name: &str, color: &str) -> Uuid {
        self.load_state();
        let id = self.tree.add_view(name, color);
        self.persist_state();
        id
    }

    /// Remove a view. Returns the tab ids to close in the browser.
    pub fn remove_view(&mut self, id: Uuid) -> Result<Vec<TabId>, EngineError> {
        self.load_state();
        let closed = self.tree.remove_view(id)?;
        self.persist_state();
        Ok(closed)
    }

    pub fn set_active_view(&mut self, id: Uuid) -> Result<(), EngineError> {
        self.load_state();
        self.tree.set_active_view(id)?;
        self.persist_state();
        Ok(())
    }

    // --- reconciliation ---

    /// Full reconciliation against the browser's live tab set: rematch and
    /// adopt live tabs first, then drop whatever is still stale. Sync must
    /// run first; after a restart every persisted tab id is stale until the
    /// URL rematch rebinds it, and cleaning up before that would delete the
    /// whole tree. One persist at the end. Idempotent.
    pub fn reconcile(&mut self, tabs: &[TabRef]) {
        self.load_state();
        let live: HashSet<TabId> = tabs.iter().map(|t| t.tab).collect();
        let adopted = self.sync_with_browser(tabs);
        let removed = self.cleanup_stale_nodes(&live);
        if removed > 0 || adopted > 0 {
            info!("Reconciled with browser: {adopted} tabs adopted, {removed} stale nodes removed");
        }
        self.persist_state();
    }

    /// Remove every node whose tab id is not in the live set, promoting
    /// children. Returns the number of nodes removed. Does not persist.
    pub fn cleanup_stale_nodes(&mut self, live: &HashSet<TabId>) -> usize {
        let stale: Vec<Uuid> = self
            .tree
            .nodes()
            .filter(|n| !live.contains(&n.tab))
            .map(|n| n.id)
            .collect();
        let count = stale.len();
        for id in stale {
            self.tree.remove_node(id, RemovePolicy::Promote);
        }
        count
    }

    /// Make every live tab tracked. A tab unknown by id is first rematched
    /// by URL against nodes whose own tab id is not live (restart recovery);
    /// failing that it is appended at the active view's root. Candidates are
    /// scanned in per-view pre-order so ties between nodes sharing a URL
    /// resolve the same way every run. Returns the number of newly adopted
    /// tabs. Does not persist.
    pub fn sync_with_browser(&mut self, tabs: &[TabRef]) -> usize {
        let live: HashSet<TabId> = tabs.iter().map(|t| t.tab).collect();
        let mut scan_order = Vec::with_capacity(self.tree.node_count());
        let view_ids: Vec<Uuid> = self.tree.views().iter().map(|v| v.id).collect();
        for view in view_ids {
            for root in self.tree.roots(view).to_vec() {
                scan_order.extend(self.tree.subtree(root).iter().map(|n| n.id));
            }
        }
        let mut adopted = 0;
        for tab in tabs {
            if self.tree.contains_tab(tab.tab) {
                self.tree.set_window(tab.tab, tab.window);
                continue;
            }
            // Rebinding makes a node's tab id live, so a candidate is
            // consumed the moment it matches.
            let rematch = scan_order.iter().copied().find(|id| {
                self.tree
                    .node(*id)
                    .is_some_and(|n| !live.contains(&n.tab) && n.url == tab.url)
            });
            match rematch {
                Some(id) => {
                    self.tree.rebind_tab(id, tab.tab, tab.window);
                },
                None => {
                    let view = self.tree.active_view();
                    if self.tree.add_node(tab, None, view, None).is_ok() {
                        adopted += 1;
                    }
                },
            }
        }
        adopted
    }

    /// Reload and rewrite the aggregate. Loading normalizes structure, so
    /// this repairs damage left by an out-of-band writer.
    pub fn refresh_tree_structure(&mut self) {
        self.load_state();
        self.persist_state();
    }

    // --- groups ---

    /// Turn an already opened group-page tab into a group container holding
    /// the given members. The container takes the first member's place:
    /// under the common parent when all members share one, otherwise at the
    /// first member's view root.
    pub fn create_group_with_real_tab(
        &mut self,
        group_tab: &TabRef,
        members: &[TabId],
        name: &str,
    ) -> Result<Uuid, EngineError> {
        if members.is_empty() {
            return Err(EngineError::NoTabsSpecified);
        }
        self.load_state();
        let first = self
            .tree
            .node_by_tab(members[0])
            .ok_or(EngineError::FirstTabNotFound)?;
        let view = first.view;
        let anchor = first.id;
        let common_parent = first.parent.filter(|pid| {
            members.iter().all(|m| {
                self.tree
                    .node_by_tab(*m)
                    .is_some_and(|n| n.parent == Some(*pid))
            })
        });

        // Inserted right after the anchor; once the anchor moves into the
        // container, the container sits in its former slot.
        let group =
            self.tree
                .add_group_node(group_tab, name, common_parent, view, Some(anchor))?;
        for (index, member) in members.iter().enumerate() {
            let Some(id) = self.tree.node_id_by_tab(*member) else {
                warn!("Skipping untracked tab {member} during group creation");
                continue;
            };
            if let Err(e) = self.tree.move_node(id, Some(group), index) {
                warn!("Could not move tab {member} into group: {e}");
            }
        }
        self.tree.set_expanded(group, true);
        self.persist_state();
        Ok(group)
    }

    /// Dissolve the group containing the given tab (or backed by it).
    /// Members are promoted into the container's place; returns the backing
    /// tab id for the caller to close in the browser.
    pub fn dissolve_group(&mut self, tab: TabId) -> Option<TabId> {
        self.load_state();
        let node = self.tree.node_by_tab(tab)?;
        let container = match node.kind {
            NodeKind::Group => node.id,
            NodeKind::Tab => node.group?,
        };
        let group_tab = self.tree.node(container)?.tab;
        self.tree.remove_node(container, RemovePolicy::Promote);
        self.persist_state();
        Some(group_tab)
    }

    /// Group membership info for a tab, if it belongs to (or backs) a group.
    pub fn get_group_info(&self, tab: TabId) -> Option<GroupInfo> {
        let node = self.tree.node_by_tab(tab)?;
        let container = match node.kind {
            NodeKind::Group => node.id,
            NodeKind::Tab => node.group?,
        };
        let group = self.tree.node(container)?;
        let members = self
            .tree
            .subtree(container)
            .iter()
            .filter(|n| n.group == Some(container))
            .map(|n| n.tab)
            .collect();
        Some(GroupInfo {
            group_node: container,
            group_tab: group.tab,
            name: group.title.clone(),
            members,
        })
    }

    // --- rendering ---

    /// The forest of one view as nested branches, in display order.
    pub fn get_tree(&self, view: Uuid) -> Vec<TreeBranch> {
        self.tree
            .roots(view)
            .iter()
            .filter_map(|id| self.tree.node(*id))
            .map(|n| self.branch(n))
            .collect()
    }

    /// One node and its descendants as nested branches.
    pub fn get_subtree(&self, id: Uuid) -> Option<TreeBranch> {
        self.tree.node(id).map(|n| self.branch(n))
    }

    fn branch(&self, node: &Node) -> TreeBranch {
        TreeBranch {
            node_id: node.id.to_string(),
            tab_id: node.tab,
            title: node.title.clone(),
            url: node.url.clone(),
            depth: node.depth,
            is_expanded: node.is_expanded,
            group_id: node.group.map(|g| g.to_string()),
            kind: match node.kind {
                NodeKind::Tab => PersistedNodeKind::Tab,
                NodeKind::Group => PersistedNodeKind::Group,
            },
            children: node
                .children
                .iter()
                .filter_map(|c| self.tree.node(*c))
                .map(|c| self.branch(c))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_manager() -> (TreeManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TreeStore::open(dir.path().to_path_buf()).unwrap());
        (TreeManager::new(store), dir)
    }

    fn tab(id: TabId) -> TabRef {
        TabRef::new(id, 1, &format!("https://example.com/{id}"))
    }

    fn root_placement(manager: &TreeManager) -> Placement {
        Placement {
            parent: None,
            insert_after: None,
            view: manager.tree().active_view(),
        }
    }

    fn child_placement(parent: Uuid, view: Uuid) -> Placement {
        Placement {
            parent: Some(parent),
            insert_after: None,
            view,
        }
    }

    #[test]
    fn test_insert_persists_and_survives_reload() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let _b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();

        let mut second = TreeManager::new(manager.store().clone());
        second.load_state();
        assert_eq!(second.tree().node_count(), 2);
        assert_eq!(second.tree().node_by_tab(2).unwrap().parent, Some(a));
        second.tree().validate().unwrap();
    }

    #[test]
    fn test_insert_expands_collapsed_ancestors() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        assert!(manager.set_expanded(a, false));

        manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();
        assert!(manager.tree().node(a).unwrap().is_expanded);
    }

    #[test]
    fn test_expand_node_opens_ancestor_chain() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();
        let c = manager.insert_tab(&tab(3), &child_placement(b, view)).unwrap();
        manager.set_expanded(a, false);
        manager.set_expanded(b, false);
        manager.set_expanded(c, false);

        assert!(manager.expand_node(c));
        assert!(manager.tree().node(a).unwrap().is_expanded);
        assert!(manager.tree().node(b).unwrap().is_expanded);
        assert!(manager.tree().node(c).unwrap().is_expanded);
        assert!(!manager.expand_node(Uuid::new_v4()));
    }

    #[test]
    fn test_remove_tab_promote_and_close_all() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();
        let _c = manager.insert_tab(&tab(3), &child_placement(b, view)).unwrap();

        assert_eq!(manager.remove_tab(2, RemovePolicy::Promote), vec![2]);
        assert_eq!(manager.tree().node_by_tab(3).unwrap().parent, Some(a));

        let removed = manager.remove_tab(1, RemovePolicy::CloseAll);
        assert_eq!(removed, vec![1, 3]);
        assert_eq!(manager.tree().node_count(), 0);
        assert!(manager.remove_tab(99, RemovePolicy::Promote).is_empty());
    }

    #[test]
    fn test_remove_window_drops_only_that_window() {
        let (mut manager, _dir) = create_test_manager();
        let _a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let placement = root_placement(&manager);
        manager
            .insert_tab(&TabRef::new(2, 2, "https://other.example"), &placement)
            .unwrap();

        assert_eq!(manager.remove_window(2), 1);
        assert!(manager.tree().contains_tab(1));
        assert!(!manager.tree().contains_tab(2));
        assert_eq!(manager.remove_window(7), 0);
    }

    #[test]
    fn test_cleanup_stale_nodes_promotes_orphans() {
        // 1 -> 2 -> 3; tab 2 vanished while the engine was not running.
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();
        let _c = manager.insert_tab(&tab(3), &child_placement(b, view)).unwrap();

        let live: HashSet<TabId> = [1, 3].into_iter().collect();
        assert_eq!(manager.cleanup_stale_nodes(&live), 1);
        let c = manager.tree().node_by_tab(3).unwrap();
        assert_eq!(c.parent, Some(a));
        assert_eq!(c.depth, 1);
        manager.tree().validate().unwrap();
    }

    #[test]
    fn test_sync_rematches_by_url_after_restart() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();

        // Browser restart: same URLs, fresh tab ids.
        let live = vec![
            TabRef::new(101, 1, "https://example.com/1"),
            TabRef::new(102, 1, "https://example.com/2"),
        ];
        manager.reconcile(&live);

        let tree = manager.tree();
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.node_by_tab(101).unwrap().id, a);
        let rb = tree.node_by_tab(102).unwrap();
        assert_eq!(rb.id, b);
        assert_eq!(rb.parent, Some(a));
        tree.validate().unwrap();
    }

    #[test]
    fn test_sync_rematch_ties_resolve_in_preorder() {
        let (mut manager, _dir) = create_test_manager();
        let placement = root_placement(&manager);
        // Two roots with the same URL; only one survives the restart.
        let first = manager
            .insert_tab(&TabRef::new(1, 1, "https://same.example"), &placement)
            .unwrap();
        let second = manager
            .insert_tab(&TabRef::new(2, 1, "https://same.example"), &placement)
            .unwrap();

        manager.sync_with_browser(&[TabRef::new(50, 1, "https://same.example")]);
        // The earlier node in display order takes the binding.
        assert_eq!(manager.tree().node_by_tab(50).unwrap().id, first);
        assert_eq!(manager.tree().node(second).unwrap().tab, 2);
    }

    #[test]
    fn test_sync_adopts_unknown_tabs_at_root() {
        let (mut manager, _dir) = create_test_manager();
        let live = vec![tab(1), tab(2)];
        assert_eq!(manager.sync_with_browser(&live), 2);
        let view = manager.tree().active_view();
        assert_eq!(manager.tree().roots(view).len(), 2);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let _b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();

        let live = vec![tab(1), tab(2), tab(5)];
        manager.reconcile(&live);
        let first: Vec<(TabId, Option<Uuid>)> = {
            let mut v: Vec<_> = manager.tree().nodes().map(|n| (n.tab, n.parent)).collect();
            v.sort();
            v
        };
        manager.reconcile(&live);
        let second: Vec<(TabId, Option<Uuid>)> = {
            let mut v: Vec<_> = manager.tree().nodes().map(|n| (n.tab, n.parent)).collect();
            v.sort();
            v
        };
        assert_eq!(first, second);
        assert_eq!(manager.tree().node_count(), 3);
    }

    #[test]
    fn test_group_takes_first_member_slot_under_common_parent() {
        let (mut manager, _dir) = create_test_manager();
        let p = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let m1 = manager.insert_tab(&tab(2), &child_placement(p, view)).unwrap();
        let m2 = manager.insert_tab(&tab(3), &child_placement(p, view)).unwrap();
        let other = manager.insert_tab(&tab(4), &child_placement(p, view)).unwrap();

        let group_tab = TabRef::new(50, 1, "tabgrove:group");
        let group = manager
            .create_group_with_real_tab(&group_tab, &[2, 3], "work")
            .unwrap();

        let tree = manager.tree();
        // Container replaces the first member's slot under the shared parent.
        assert_eq!(tree.node(p).unwrap().children, vec![group, other]);
        assert_eq!(tree.node(group).unwrap().children, vec![m1, m2]);
        assert_eq!(tree.node(m1).unwrap().group, Some(group));
        assert_eq!(tree.node(m2).unwrap().group, Some(group));
        assert_eq!(tree.node(group).unwrap().title, "work");
        tree.validate().unwrap();
    }

    #[test]
    fn test_group_without_common_parent_anchors_at_first_member() {
        let (mut manager, _dir) = create_test_manager();
        let p = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let _m1 = manager.insert_tab(&tab(2), &child_placement(p, view)).unwrap();
        let _m2 = manager.insert_tab(&tab(3), &root_placement(&manager)).unwrap();

        let group_tab = TabRef::new(50, 1, "tabgrove:group");
        let group = manager
            .create_group_with_real_tab(&group_tab, &[3, 2], "mixed")
            .unwrap();

        let tree = manager.tree();
        // Mixed parents: the container lands at the first member's root level.
        assert!(tree.node(group).unwrap().is_root());
        assert_eq!(tree.node(group).unwrap().children.len(), 2);
        tree.validate().unwrap();
    }

    #[test]
    fn test_group_creation_errors() {
        let (mut manager, _dir) = create_test_manager();
        let group_tab = TabRef::new(50, 1, "tabgrove:group");
        assert!(matches!(
            manager.create_group_with_real_tab(&group_tab, &[], "x"),
            Err(EngineError::NoTabsSpecified)
        ));
        assert!(matches!(
            manager.create_group_with_real_tab(&group_tab, &[99], "x"),
            Err(EngineError::FirstTabNotFound)
        ));
    }

    #[test]
    fn test_dissolve_group_promotes_members_and_returns_backing_tab() {
        let (mut manager, _dir) = create_test_manager();
        let _m1 = manager.insert_tab(&tab(2), &root_placement(&manager)).unwrap();
        let _m2 = manager.insert_tab(&tab(3), &root_placement(&manager)).unwrap();
        let group_tab = TabRef::new(50, 1, "tabgrove:group");
        manager
            .create_group_with_real_tab(&group_tab, &[2, 3], "work")
            .unwrap();

        // Dissolving via a member finds the enclosing container.
        assert_eq!(manager.dissolve_group(3), Some(50));
        assert!(!manager.tree().contains_tab(50));
        assert_eq!(manager.tree().node_by_tab(2).unwrap().group, None);
        assert!(manager.tree().node_by_tab(2).unwrap().is_root());
        assert_eq!(manager.dissolve_group(2), None);
        manager.tree().validate().unwrap();
    }

    #[test]
    fn test_group_info() {
        let (mut manager, _dir) = create_test_manager();
        let _m1 = manager.insert_tab(&tab(2), &root_placement(&manager)).unwrap();
        let _m2 = manager.insert_tab(&tab(3), &root_placement(&manager)).unwrap();
        let group_tab = TabRef::new(50, 1, "tabgrove:group");
        let group = manager
            .create_group_with_real_tab(&group_tab, &[2, 3], "work")
            .unwrap();

        let info = manager.get_group_info(2).unwrap();
        assert_eq!(info.group_node, group);
        assert_eq!(info.group_tab, 50);
        assert_eq!(info.name, "work");
        assert_eq!(info.members, vec![2, 3]);
        // Querying through the backing tab itself works too.
        assert_eq!(manager.get_group_info(50), Some(info));
        assert!(manager.get_group_info(2).unwrap().members.contains(&3));
        assert!(manager.get_group_info(99).is_none());
    }

    #[test]
    fn test_get_tree_renders_nested_branches() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let view = manager.tree().active_view();
        let _b = manager.insert_tab(&tab(2), &child_placement(a, view)).unwrap();
        let _c = manager.insert_tab(&tab(3), &root_placement(&manager)).unwrap();

        let branches = manager.get_tree(view);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].tab_id, 1);
        assert_eq!(branches[0].children.len(), 1);
        assert_eq!(branches[0].children[0].tab_id, 2);
        assert_eq!(branches[0].children[0].depth, 1);
        assert_eq!(branches[1].tab_id, 3);
        assert!(manager.get_tree(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_view_operations_persist() {
        let (mut manager, _dir) = create_test_manager();
        let v2 = manager.create_view("research", "#ff9e64");
        manager.set_active_view(v2).unwrap();
        let _a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();

        let mut second = TreeManager::new(manager.store().clone());
        assert_eq!(second.tree().views().len(), 2);
        assert_eq!(second.tree().active_view(), v2);

        let closed = second.remove_view(v2).unwrap();
        assert_eq!(closed, vec![1]);
        assert!(matches!(
            second.remove_view(Uuid::new_v4()),
            Err(EngineError::Tree(TreeError::ViewNotFound(_)))
        ));
    }

    #[test]
    fn test_refresh_repairs_out_of_band_damage() {
        let (mut manager, _dir) = create_test_manager();
        let a = manager.insert_tab(&tab(1), &root_placement(&manager)).unwrap();
        let _b = manager.insert_tab(&tab(2), &root_placement(&manager)).unwrap();

        // Another writer reparents by editing parent_id only.
        let mut snapshot = manager.tree().to_snapshot();
        for node in &mut snapshot.nodes {
            if node.tab_id == 2 {
                node.parent_id = Some(a.to_string());
            }
        }
        manager
            .store()
            .set_json(TREE_STATE_KEY, &snapshot)
            .unwrap();

        manager.refresh_tree_structure();
        let rb = manager.tree().node_by_tab(2).unwrap();
        assert_eq!(rb.parent, Some(a));
        assert_eq!(rb.depth, 1);
        manager.tree().validate().unwrap();
    }
}
