/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Tab tree data structures.
//!
//! Core structures:
//! - `TabTree`: arena container mapping node id to record, children as ordered id lists
//! - `Node`: one tracked tab (or group container tab) with parent/children ids
//! - `View`: an independent partition of the root-level forest
//!
//! Structural invariants held after every committed mutation: parent/children
//! symmetry, exact depths, acyclicity, one node per open tab id, views never
//! interleaving inside one tree, and no nested group containers.

use std::collections::{HashMap, HashSet};

use log::warn;
use uuid::Uuid;

use crate::persistence::types::{
    PersistedNode, PersistedNodeKind, PersistedTreeState, PersistedView,
};

/// Browser-assigned tab identifier. Unstable across restarts.
pub type TabId = u32;

/// Browser-assigned window identifier.
pub type WindowId = u32;

pub const DEFAULT_VIEW_NAME: &str = "Main";
pub const DEFAULT_VIEW_COLOR: &str = "#7aa2f7";

/// The observed identity of a live browser tab, as reported by tab events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRef {
    pub tab: TabId,
    pub window: WindowId,
    pub url: String,
    pub title: String,
    /// The tab the browser reports as the creator. Unreliable.
    pub opener: Option<TabId>,
}

impl TabRef {
    pub fn new(tab: TabId, window: WindowId, url: &str) -> Self {
        Self {
            tab,
            window,
            url: url.to_string(),
            title: url.to_string(),
            opener: None,
        }
    }

    pub fn with_opener(mut self, opener: TabId) -> Self {
        self.opener = Some(opener);
        self
    }
}

/// What a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An ordinary tracked tab.
    Tab,

    /// A group container backed by a real "group page" tab.
    Group,
}

/// One entry in the tab tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable synthetic identity. Survives tab-id churn across restarts.
    pub id: Uuid,

    /// Current browser tab id. May go temporarily stale when the browser
    /// reassigns ids; re-bound by the reconciliation pass.
    pub tab: TabId,

    /// Containing node, or `None` for a view root.
    pub parent: Option<Uuid>,

    /// Ordered children; sibling order is display order.
    pub children: Vec<Uuid>,

    /// Exact path length to the view root.
    pub depth: u32,

    /// UI collapse state. No structural meaning.
    pub is_expanded: bool,

    /// The view this node belongs to. Always equals the parent's view.
    pub view: Uuid,

    /// Group container this node is a member of, if any.
    pub group: Option<Uuid>,

    pub kind: NodeKind,

    /// Last known URL; the persisted tab reference used for restart rematching.
    pub url: String,

    /// Last known title. For group containers this is the group name.
    pub title: String,

    pub window: WindowId,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A named partition of the root-level forest (a tab workspace).
#[derive(Debug, Clone)]
pub struct View {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

/// Removal policy for `TabTree::remove_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovePolicy {
    /// Delete the node; direct children rise to its former parent, at the
    /// position the node occupied, preserving relative order.
    Promote,

    /// Delete the node and its entire subtree.
    CloseAll,
}

/// Structural errors. Not-found lookups return `Option`/empty instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    ParentNotFound(Uuid),
    ViewNotFound(Uuid),
    InvalidMove(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::ParentNotFound(id) => write!(f, "Parent node not found: {id}"),
            TreeError::ViewNotFound(id) => write!(f, "View not found: {id}"),
            TreeError::InvalidMove(reason) => write!(f, "Invalid move: {reason}"),
        }
    }
}

/// Arena tab tree: nodes keyed by stable id, per-view ordered root lists,
/// and a tab-id index kept bijective for currently tracked tabs.
#[derive(Debug, Clone)]
pub struct TabTree {
    nodes: HashMap<Uuid, Node>,
    tab_to_node: HashMap<TabId, Uuid>,
    /// View id → ordered root node ids.
    roots: HashMap<Uuid, Vec<Uuid>>,
    /// Views in display order. Never empty.
    views: Vec<View>,
    active_view: Uuid,
}

impl TabTree {
    /// Create a tree with a single default view.
    pub fn new() -> Self {
        let view = View {
            id: Uuid::new_v4(),
            name: DEFAULT_VIEW_NAME.to_string(),
            color: DEFAULT_VIEW_COLOR.to_string(),
        };
        let mut roots = HashMap::new();
        roots.insert(view.id, Vec::new());
        Self {
            nodes: HashMap::new(),
            tab_to_node: HashMap::new(),
            roots,
            active_view: view.id,
            views: vec![view],
        }
    }

    // --- views ---

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn view(&self, id: Uuid) -> Option<&View> {
        self.views.iter().find(|v| v.id == id)
    }

    pub fn active_view(&self) -> Uuid {
        self.active_view
    }

    pub fn add_view(&mut self, name: &str, color: &str) -> Uuid {
        let view = View {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: color.to_string(),
        };
        let id = view.id;
        self.roots.insert(id, Vec::new());
        self.views.push(view);
        id
    }

    pub fn set_active_view(&mut self, id: Uuid) -> Result<(), TreeError> {
        if self.view(id).is_none() {
            return Err(TreeError::ViewNotFound(id));
        }
        self.active_view = id;
        Ok(())
    }

    /// Remove a view, closing every tree rooted in it. The last remaining
    /// view cannot be removed. Returns the closed tab ids.
    pub fn remove_view(&mut self, id: Uuid) -> Result<Vec<TabId>, TreeError> {
        if self.view(id).is_none() {
            return Err(TreeError::ViewNotFound(id));
        }
        if self.views.len() == 1 {
            return Err(TreeError::InvalidMove(
                "cannot remove the last view".to_string(),
            ));
        }
        let mut closed = Vec::new();
        for root in self.roots.get(&id).cloned().unwrap_or_default() {
            closed.extend(self.remove_node(root, RemovePolicy::CloseAll));
        }
        self.roots.remove(&id);
        self.views.retain(|v| v.id != id);
        if self.active_view == id {
            self.active_view = self.views[0].id;
        }
        Ok(closed)
    }

    // --- lookups ---

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: Uuid) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn node_by_tab(&self, tab: TabId) -> Option<&Node> {
        self.nodes.get(self.tab_to_node.get(&tab)?)
    }

    pub fn node_id_by_tab(&self, tab: TabId) -> Option<Uuid> {
        self.tab_to_node.get(&tab).copied()
    }

    pub fn contains_tab(&self, tab: TabId) -> bool {
        self.tab_to_node.contains_key(&tab)
    }

    pub fn roots(&self, view: Uuid) -> &[Uuid] {
        self.roots.get(&view).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tracked_tabs(&self) -> impl Iterator<Item = TabId> + '_ {
        self.tab_to_node.keys().copied()
    }

    /// Whether `maybe_desc` sits somewhere below `ancestor`.
    pub fn is_descendant(&self, maybe_desc: Uuid, ancestor: Uuid) -> bool {
        let mut cursor = self.nodes.get(&maybe_desc).and_then(|n| n.parent);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Pre-order traversal of a node and all descendants. Empty if unknown.
    pub fn subtree(&self, id: Uuid) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            out.push(node);
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub fn subtree_by_tab(&self, tab: TabId) -> Vec<&Node> {
        match self.node_id_by_tab(tab) {
            Some(id) => self.subtree(id),
            None => Vec::new(),
        }
    }

    // --- mutations ---

    /// Track a new tab. `parent = None` inserts a view root. `insert_after`
    /// names a sibling to insert immediately after; otherwise the node is
    /// appended. Re-observing an already tracked tab id is a no-op returning
    /// the existing node.
    pub fn add_node(
        &mut self,
        tab: &TabRef,
        parent: Option<Uuid>,
        view: Uuid,
        insert_after: Option<Uuid>,
    ) -> Result<Uuid, TreeError> {
        self.insert_node(tab, NodeKind::Tab, &tab.title, parent, view, insert_after)
    }

    /// Track a group container node backed by a real group-page tab.
    pub fn add_group_node(
        &mut self,
        tab: &TabRef,
        name: &str,
        parent: Option<Uuid>,
        view: Uuid,
        insert_after: Option<Uuid>,
    ) -> Result<Uuid, TreeError> {
        self.insert_node(tab, NodeKind::Group, name, parent, view, insert_after)
    }

    fn insert_node(
        &mut self,
        tab: &TabRef,
        kind: NodeKind,
        title: &str,
        parent: Option<Uuid>,
        view: Uuid,
        insert_after: Option<Uuid>,
    ) -> Result<Uuid, TreeError> {
        if let Some(existing) = self.tab_to_node.get(&tab.tab) {
            return Ok(*existing);
        }

        let id = Uuid::new_v4();
        let (depth, node_view, group) = match parent {
            Some(pid) => {
                let p = self
                    .nodes
                    .get(&pid)
                    .ok_or(TreeError::ParentNotFound(pid))?;
                (p.depth + 1, p.view, Self::group_under(p))
            },
            None => {
                if self.view(view).is_none() {
                    return Err(TreeError::ViewNotFound(view));
                }
                (0, view, None)
            },
        };

        self.nodes.insert(
            id,
            Node {
                id,
                tab: tab.tab,
                parent,
                children: Vec::new(),
                depth,
                is_expanded: true,
                view: node_view,
                group,
                kind,
                url: tab.url.clone(),
                title: title.to_string(),
                window: tab.window,
            },
        );
        self.tab_to_node.insert(tab.tab, id);

        match parent {
            Some(pid) => {
                if let Some(p) = self.nodes.get_mut(&pid) {
                    Self::insert_into(&mut p.children, id, insert_after);
                }
            },
            None => {
                let list = self.roots.entry(node_view).or_default();
                Self::insert_into(list, id, insert_after);
            },
        }
        Ok(id)
    }

    /// Group membership for a node placed under `parent`.
    fn group_under(parent: &Node) -> Option<Uuid> {
        if parent.kind == NodeKind::Group {
            Some(parent.id)
        } else {
            parent.group
        }
    }

    fn insert_into(list: &mut Vec<Uuid>, id: Uuid, insert_after: Option<Uuid>) {
        match insert_after.and_then(|after| list.iter().position(|c| *c == after)) {
            Some(pos) => list.insert(pos + 1, id),
            None => list.push(id),
        }
    }

    /// Remove a node. `Promote` lifts direct children into the vacated slot;
    /// `CloseAll` deletes the whole subtree. Returns the tab ids of every
    /// removed node (pre-order for `CloseAll`), empty if the node is unknown.
    pub fn remove_node(&mut self, id: Uuid, policy: RemovePolicy) -> Vec<TabId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        match policy {
            RemovePolicy::Promote => {
                let children = node.children.clone();
                let parent = node.parent;
                let tab = node.tab;

                let slot = self.detach(id);
                // Children rise exactly one level, into the vacated position.
                for (offset, child) in children.iter().enumerate() {
                    if let Some(c) = self.nodes.get_mut(child) {
                        c.parent = parent;
                    }
                    match parent {
                        Some(pid) => {
                            if let Some(p) = self.nodes.get_mut(&pid) {
                                p.children.insert(slot + offset, *child);
                            }
                        },
                        None => {
                            let view = self.nodes.get(child).map(|c| c.view);
                            if let Some(view) = view {
                                self.roots.entry(view).or_default().insert(slot + offset, *child);
                            }
                        },
                    }
                    self.reflow_subtree(*child);
                }

                self.nodes.remove(&id);
                self.tab_to_node.remove(&tab);
                self.clear_group_refs(id);
                vec![tab]
            },
            RemovePolicy::CloseAll => {
                let removed: Vec<(Uuid, TabId)> =
                    self.subtree(id).iter().map(|n| (n.id, n.tab)).collect();
                self.detach(id);
                for (node_id, tab) in &removed {
                    self.nodes.remove(node_id);
                    self.tab_to_node.remove(tab);
                }
                self.clear_group_refs(id);
                removed.into_iter().map(|(_, tab)| tab).collect()
            },
        }
    }

    /// Detach a node from its parent's child list (or root list), returning
    /// the index it occupied.
    fn detach(&mut self, id: Uuid) -> usize {
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        let parent = node.parent;
        let view = node.view;
        let list = match parent {
            Some(pid) => match self.nodes.get_mut(&pid) {
                Some(p) => &mut p.children,
                None => return 0,
            },
            None => self.roots.entry(view).or_default(),
        };
        match list.iter().position(|c| *c == id) {
            Some(pos) => {
                list.remove(pos);
                pos
            },
            None => list.len(),
        }
    }

    /// Drop dangling group references after a group container disappears.
    fn clear_group_refs(&mut self, group: Uuid) {
        for node in self.nodes.values_mut() {
            if node.group == Some(group) {
                node.group = None;
            }
        }
    }

    /// Reparent a node. Rejects cyclic moves (`new_parent` equal to or below
    /// the moved node) without touching the tree. `index` is clamped to the
    /// destination list length.
    pub fn move_node(
        &mut self,
        id: Uuid,
        new_parent: Option<Uuid>,
        index: usize,
    ) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::InvalidMove(format!("node not found: {id}")));
        }
        if let Some(pid) = new_parent {
            if pid == id {
                return Err(TreeError::InvalidMove(
                    "cannot move a node under itself".to_string(),
                ));
            }
            if !self.nodes.contains_key(&pid) {
                return Err(TreeError::ParentNotFound(pid));
            }
            if self.is_descendant(pid, id) {
                return Err(TreeError::InvalidMove(
                    "cannot move a node under its own descendant".to_string(),
                ));
            }
        }

        self.detach(id);
        match new_parent {
            Some(pid) => {
                let mut placement = None;
                if let Some(p) = self.nodes.get_mut(&pid) {
                    let at = index.min(p.children.len());
                    p.children.insert(at, id);
                    placement = Some((p.view, Self::group_under(p)));
                }
                if let (Some((view, group)), Some(node)) = (placement, self.nodes.get_mut(&id)) {
                    node.parent = Some(pid);
                    node.view = view;
                    node.group = group;
                }
            },
            None => {
                let view = self.nodes.get(&id).map(|n| n.view).unwrap_or(self.active_view);
                let list = self.roots.entry(view).or_default();
                let at = index.min(list.len());
                list.insert(at, id);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.parent = None;
                    node.group = None;
                }
            },
        }
        self.reflow_subtree(id);
        Ok(())
    }

    /// Recompute depth/view for a node and all descendants from its parent,
    /// and drop group references whose container is no longer an ancestor.
    fn reflow_subtree(&mut self, id: Uuid) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (depth, view) = match node.parent.and_then(|pid| self.nodes.get(&pid)) {
            Some(p) => (p.depth + 1, p.view),
            None => (0, node.view),
        };
        let mut stack = vec![(id, depth, view)];
        while let Some((current, depth, view)) = stack.pop() {
            let children = {
                let Some(n) = self.nodes.get_mut(&current) else {
                    continue;
                };
                n.depth = depth;
                n.view = view;
                n.children.clone()
            };
            if let Some(group) = self.nodes.get(&current).and_then(|n| n.group)
                && !self.is_descendant(current, group)
            {
                if let Some(n) = self.nodes.get_mut(&current) {
                    n.group = None;
                }
            }
            for child in children {
                stack.push((child, depth + 1, view));
            }
        }
    }

    // --- expand state ---

    pub fn toggle_expanded(&mut self, id: Uuid) -> Option<bool> {
        let node = self.nodes.get_mut(&id)?;
        node.is_expanded = !node.is_expanded;
        Some(node.is_expanded)
    }

    pub fn set_expanded(&mut self, id: Uuid, expanded: bool) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.is_expanded = expanded;
                true
            },
            None => false,
        }
    }

    /// Expand every ancestor of a node so it is visible in a collapsed tree.
    pub fn expand_ancestors(&mut self, id: Uuid) {
        let mut cursor = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(pid) = cursor {
            cursor = match self.nodes.get_mut(&pid) {
                Some(p) => {
                    p.is_expanded = true;
                    p.parent
                },
                None => None,
            };
        }
    }

    // --- tab identity ---

    /// Point a node at a new browser tab id (restart recovery).
    pub fn rebind_tab(&mut self, id: Uuid, tab: TabId, window: WindowId) -> bool {
        if self.tab_to_node.contains_key(&tab) {
            return false;
        }
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        let old = node.tab;
        node.tab = tab;
        node.window = window;
        self.tab_to_node.remove(&old);
        self.tab_to_node.insert(tab, id);
        true
    }

    pub fn update_tab_info(&mut self, tab: TabId, url: &str, title: &str) -> bool {
        let Some(id) = self.tab_to_node.get(&tab) else {
            return false;
        };
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.url = url.to_string();
        if node.kind == NodeKind::Tab && !title.is_empty() {
            node.title = title.to_string();
        }
        true
    }

    pub fn set_window(&mut self, tab: TabId, window: WindowId) -> bool {
        let Some(id) = self.tab_to_node.get(&tab) else {
            return false;
        };
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.window = window;
                true
            },
            None => false,
        }
    }

    // --- persistence ---

    /// Serialize to the persisted aggregate: views in display order, nodes in
    /// per-view pre-order (sibling order = list order), and the tab index.
    pub fn to_snapshot(&self) -> PersistedTreeState {
        let views = self
            .views
            .iter()
            .map(|v| PersistedView {
                view_id: v.id.to_string(),
                name: v.name.clone(),
                color: v.color.clone(),
            })
            .collect();

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for view in &self.views {
            for root in self.roots(view.id) {
                for node in self.subtree(*root) {
                    nodes.push(PersistedNode {
                        node_id: node.id.to_string(),
                        tab_id: node.tab,
                        parent_id: node.parent.map(|p| p.to_string()),
                        view_id: node.view.to_string(),
                        group_id: node.group.map(|g| g.to_string()),
                        kind: match node.kind {
                            NodeKind::Tab => PersistedNodeKind::Tab,
                            NodeKind::Group => PersistedNodeKind::Group,
                        },
                        url: node.url.clone(),
                        title: node.title.clone(),
                        window_id: node.window,
                        is_expanded: node.is_expanded,
                    });
                }
            }
        }

        let tab_index = self
            .tab_to_node
            .iter()
            .map(|(tab, id)| (*tab, id.to_string()))
            .collect();

        PersistedTreeState {
            views,
            active_view_id: self.active_view.to_string(),
            nodes,
            tab_index,
        }
    }

    /// Rebuild a tree from a persisted aggregate. Normalizes as it goes:
    /// child order comes from list order, depths and views are recomputed
    /// from `parent_id`, unresolvable parents fall back to roots, and cycles
    /// introduced by an out-of-band writer are broken at the root list.
    pub fn from_snapshot(snapshot: &PersistedTreeState) -> Self {
        let mut tree = Self::new();
        tree.views.clear();
        tree.roots.clear();

        for pview in &snapshot.views {
            let Ok(id) = Uuid::parse_str(&pview.view_id) else {
                warn!("Dropping persisted view with invalid id: {}", pview.view_id);
                continue;
            };
            tree.roots.insert(id, Vec::new());
            tree.views.push(View {
                id,
                name: pview.name.clone(),
                color: pview.color.clone(),
            });
        }
        if tree.views.is_empty() {
            let view = View {
                id: Uuid::new_v4(),
                name: DEFAULT_VIEW_NAME.to_string(),
                color: DEFAULT_VIEW_COLOR.to_string(),
            };
            tree.roots.insert(view.id, Vec::new());
            tree.views.push(view);
        }
        tree.active_view = Uuid::parse_str(&snapshot.active_view_id)
            .ok()
            .filter(|id| tree.view(*id).is_some())
            .unwrap_or(tree.views[0].id);

        // Record pass. Duplicate tab ids violate the index bijection; the
        // first occurrence wins and later ones are dropped.
        let mut order = Vec::with_capacity(snapshot.nodes.len());
        for pnode in &snapshot.nodes {
            let Ok(id) = Uuid::parse_str(&pnode.node_id) else {
                warn!("Dropping persisted node with invalid id: {}", pnode.node_id);
                continue;
            };
            if tree.tab_to_node.contains_key(&pnode.tab_id) {
                warn!("Dropping persisted node with duplicate tab id {}", pnode.tab_id);
                continue;
            }
            let view = Uuid::parse_str(&pnode.view_id)
                .ok()
                .filter(|v| tree.view(*v).is_some())
                .unwrap_or(tree.views[0].id);
            tree.nodes.insert(
                id,
                Node {
                    id,
                    tab: pnode.tab_id,
                    parent: pnode.parent_id.as_deref().and_then(|p| Uuid::parse_str(p).ok()),
                    children: Vec::new(),
                    depth: 0,
                    is_expanded: pnode.is_expanded,
                    view,
                    group: pnode.group_id.as_deref().and_then(|g| Uuid::parse_str(g).ok()),
                    kind: match pnode.kind {
                        PersistedNodeKind::Tab => NodeKind::Tab,
                        PersistedNodeKind::Group => NodeKind::Group,
                    },
                    url: pnode.url.clone(),
                    title: pnode.title.clone(),
                    window: pnode.window_id,
                },
            );
            tree.tab_to_node.insert(pnode.tab_id, id);
            order.push(id);
        }

        // Wiring pass, in list order: attach to the declared parent when it
        // resolves, otherwise fall back to a view root.
        for id in &order {
            let parent = tree.nodes.get(id).and_then(|n| n.parent);
            match parent.filter(|pid| *pid != *id && tree.nodes.contains_key(pid)) {
                Some(pid) => {
                    if let Some(p) = tree.nodes.get_mut(&pid) {
                        p.children.push(*id);
                    }
                },
                None => {
                    let view = tree.nodes.get(id).map(|n| n.view).unwrap_or(tree.views[0].id);
                    if let Some(node) = tree.nodes.get_mut(id) {
                        node.parent = None;
                    }
                    tree.roots.entry(view).or_default().push(*id);
                },
            }
        }

        // Parent cycles written out-of-band leave nodes unreachable from any
        // root; break those cycles by promoting the members to roots.
        let mut reachable = HashSet::new();
        let root_ids: Vec<Uuid> = tree.roots.values().flatten().copied().collect();
        for root in root_ids {
            for node in tree.subtree(root) {
                reachable.insert(node.id);
            }
        }
        for id in &order {
            if reachable.contains(id) {
                continue;
            }
            let view = tree.nodes.get(id).map(|n| n.view).unwrap_or(tree.views[0].id);
            let parent = tree.nodes.get(id).and_then(|n| n.parent);
            if let Some(pid) = parent
                && let Some(p) = tree.nodes.get_mut(&pid)
            {
                p.children.retain(|c| *c != *id);
            }
            if let Some(node) = tree.nodes.get_mut(id) {
                node.parent = None;
            }
            tree.roots.entry(view).or_default().push(*id);
            for node in tree.subtree(*id) {
                reachable.insert(node.id);
            }
        }

        // Normalization pass: exact depths and view propagation from roots,
        // and dropping group references that no longer resolve to a group
        // container ancestor.
        let root_ids: Vec<Uuid> = tree
            .views
            .iter()
            .flat_map(|v| tree.roots(v.id).to_vec())
            .collect();
        for root in root_ids {
            tree.reflow_subtree(root);
        }
        let bad_groups: Vec<Uuid> = tree
            .nodes
            .values()
            .filter(|n| {
                n.group.is_some_and(|g| {
                    tree.nodes.get(&g).is_none_or(|gn| gn.kind != NodeKind::Group)
                })
            })
            .map(|n| n.id)
            .collect();
        for id in bad_groups {
            if let Some(node) = tree.nodes.get_mut(&id) {
                node.group = None;
            }
        }

        // Nodes are authoritative; a divergent persisted tab index only
        // warrants a warning, the rebuilt one is already in place.
        if snapshot.tab_index.len() != tree.tab_to_node.len() {
            warn!(
                "Persisted tab index diverged ({} entries vs {} tracked tabs); rebuilt from nodes",
                snapshot.tab_index.len(),
                tree.tab_to_node.len()
            );
        }

        tree
    }

    /// Check every structural invariant. Test support.
    pub fn validate(&self) -> Result<(), String> {
        for node in self.nodes.values() {
            match node.parent {
                Some(pid) => {
                    let parent = self
                        .nodes
                        .get(&pid)
                        .ok_or_else(|| format!("node {} has missing parent {pid}", node.id))?;
                    if !parent.children.contains(&node.id) {
                        return Err(format!(
                            "node {} not present in parent {pid} child list",
                            node.id
                        ));
                    }
                    if node.depth != parent.depth + 1 {
                        return Err(format!(
                            "node {} depth {} != parent depth {} + 1",
                            node.id, node.depth, parent.depth
                        ));
                    }
                    if node.view != parent.view {
                        return Err(format!("node {} crosses a view boundary", node.id));
                    }
                },
                None => {
                    if node.depth != 0 {
                        return Err(format!("root node {} has depth {}", node.id, node.depth));
                    }
                    if !self.roots(node.view).contains(&node.id) {
                        return Err(format!("root node {} missing from root list", node.id));
                    }
                },
            }
            for child in &node.children {
                let c = self
                    .nodes
                    .get(child)
                    .ok_or_else(|| format!("node {} lists missing child {child}", node.id))?;
                if c.parent != Some(node.id) {
                    return Err(format!("child {child} does not point back at {}", node.id));
                }
            }
            if let Some(group) = node.group {
                let container = self
                    .nodes
                    .get(&group)
                    .ok_or_else(|| format!("node {} references missing group {group}", node.id))?;
                if container.kind != NodeKind::Group {
                    return Err(format!("group target {group} is not a group container"));
                }
                if container.group.is_some() {
                    return Err(format!("group container {group} is itself grouped"));
                }
            }
        }

        let mut seen_tabs = HashSet::new();
        for node in self.nodes.values() {
            if !seen_tabs.insert(node.tab) {
                return Err(format!("tab id {} tracked by more than one node", node.tab));
            }
            if self.tab_to_node.get(&node.tab) != Some(&node.id) {
                return Err(format!("tab index entry missing or wrong for tab {}", node.tab));
            }
        }
        if self.tab_to_node.len() != self.nodes.len() {
            return Err("tab index size does not match node count".to_string());
        }

        // Acyclicity: every node must reach a root by following parents.
        for node in self.nodes.values() {
            let mut hops = 0usize;
            let mut cursor = node.parent;
            while let Some(pid) = cursor {
                hops += 1;
                if hops > self.nodes.len() {
                    return Err(format!("parent chain from {} does not terminate", node.id));
                }
                cursor = self.nodes.get(&pid).and_then(|n| n.parent);
            }
        }
        Ok(())
    }
}

impl Default for TabTree {
    fn default() -> Self {
        Self::new()
    }
}
