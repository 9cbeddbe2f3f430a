/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The event adapter: browser events and UI messages in, engine calls out.
//!
//! `EventAdapter` owns the engine, the pending registries, and a host
//! handle, and is driven from a single task. Browser events arrive on an
//! mpsc channel (`run`); UI messages are handled on demand
//! (`handle_raw_message`). Single ownership keeps signal consumption and
//! placement atomic with respect to each other.

pub mod pending;

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{Settings, TabPosition};
use crate::engine::{GroupInfo, TreeBranch, TreeManager};
use crate::model::tree::{RemovePolicy, TabId, TabRef, WindowId};
use crate::placement::{PlacementInput, is_group_page_url, resolve_placement};
use pending::PendingRegistries;

/// How often unconsumed pending signals are swept.
const SIGNAL_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Everything the browser tells us. Producers normalize their native event
/// shapes into this enum before sending.
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    TabCreated(TabRef),
    TabRemoved {
        tab: TabId,
        window: WindowId,
        /// Set when the removal is part of the whole window going away.
        is_window_closing: bool,
    },
    /// Within-window index change. No tree meaning; ignored.
    TabMoved {
        tab: TabId,
    },
    TabUpdated {
        tab: TabId,
        url: String,
        title: String,
    },
    TabActivated {
        tab: TabId,
        window: WindowId,
    },
    TabDetached {
        tab: TabId,
        window: WindowId,
    },
    TabAttached {
        tab: TabId,
        window: WindowId,
    },
    WindowCreated {
        window: WindowId,
    },
    WindowRemoved {
        window: WindowId,
    },
    /// A link click in `source_tab` opened `new_tab`. May arrive before or
    /// after the matching `TabCreated`.
    LinkNavigation {
        new_tab: TabId,
        source_tab: TabId,
    },
}

/// UI surface requests, decoded from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    GetTree {
        view_id: Option<String>,
    },
    GetSubtree {
        node_id: String,
    },
    MoveNode {
        node_id: String,
        parent_id: Option<String>,
        index: usize,
    },
    ToggleExpanded {
        node_id: String,
    },
    RemoveTab {
        tab_id: TabId,
        #[serde(default)]
        close_subtree: bool,
    },
    CreateGroup {
        tab_ids: Vec<TabId>,
        name: String,
    },
    DissolveGroup {
        tab_id: TabId,
    },
    GroupInfo {
        tab_id: TabId,
    },
    CreateView {
        name: String,
        color: String,
    },
    RemoveView {
        view_id: String,
    },
    SetActiveView {
        view_id: String,
    },
    RefreshTree,
    RegisterDuplicate {
        tab_id: TabId,
    },
    DeclareParent {
        tab_id: TabId,
        parent_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum MessageResponse {
    Ok,
    Tree(Vec<TreeBranch>),
    Branch(TreeBranch),
    Expanded(bool),
    Group(GroupInfo),
    ViewCreated(String),
    Error(String),
}

/// The browser side the adapter talks back to.
///
/// Implemented per embedding; the adapter never assumes which browser sits
/// behind it.
#[allow(async_fn_in_trait)]
pub trait BrowserHost {
    /// Every open tab across all windows.
    async fn query_tabs(&self) -> Vec<TabRef>;

    /// Open a group-page tab for a new container. `None` when the browser
    /// refuses.
    async fn open_group_page(&self, name: &str) -> Option<TabRef>;

    /// Close tabs in the browser.
    async fn close_tabs(&self, tabs: &[TabId]);
}

/// Drives the engine from browser events and UI messages.
pub struct EventAdapter<H: BrowserHost> {
    host: H,
    manager: TreeManager,
    settings: Settings,
    pending: PendingRegistries,
}

impl<H: BrowserHost> EventAdapter<H> {
    pub fn new(host: H, manager: TreeManager, settings: Settings) -> Self {
        let ttl = Duration::from_millis(settings.pending_signal_ttl_ms);
        Self {
            host,
            manager,
            settings,
            pending: PendingRegistries::new(ttl),
        }
    }

    pub fn manager(&self) -> &TreeManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TreeManager {
        &mut self.manager
    }

    /// Consume browser events until the channel closes. Pending signals are
    /// swept on an interval so stale entries cannot pile up between events.
    pub async fn run(mut self, mut events: mpsc::Receiver<BrowserEvent>) {
        let mut sweep = tokio::time::interval(SIGNAL_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = sweep.tick() => self.pending.expire(),
            }
        }
    }

    pub async fn handle_event(&mut self, event: BrowserEvent) {
        match event {
            BrowserEvent::TabCreated(tab) => self.on_tab_created(tab),
            BrowserEvent::TabRemoved {
                tab,
                is_window_closing,
                ..
            } => {
                self.pending.forget_tab(tab);
                // During window teardown the per-tab events are skipped;
                // WindowRemoved drops the whole batch in one pass.
                if !is_window_closing {
                    self.manager.remove_tab(tab, RemovePolicy::Promote);
                }
            },
            BrowserEvent::TabMoved { .. } => {},
            BrowserEvent::TabUpdated { tab, url, title } => {
                self.manager.update_tab(tab, &url, &title);
            },
            BrowserEvent::TabActivated { tab, window } => {
                self.pending.note_active(window, tab);
            },
            BrowserEvent::TabDetached { .. } => {},
            BrowserEvent::TabAttached { tab, window } => {
                self.manager.set_tab_window(tab, window);
            },
            BrowserEvent::WindowCreated { .. } => {
                let tabs = self.host.query_tabs().await;
                self.manager.reconcile(&tabs);
            },
            BrowserEvent::WindowRemoved { window } => {
                self.manager.remove_window(window);
                self.pending.forget_window(window);
            },
            BrowserEvent::LinkNavigation {
                new_tab,
                source_tab,
            } => {
                self.manager.load_state();
                if self.manager.tree().contains_tab(new_tab) {
                    // The creation event won the race; correct the placement.
                    self.reparent_late_link(new_tab, source_tab);
                } else {
                    self.pending.note_link(new_tab, source_tab);
                }
            },
        }
    }

    fn on_tab_created(&mut self, tab: TabRef) {
        if self.pending.take_group_tab(tab.tab)
            || (self.pending.group_creation_in_flight() && is_group_page_url(&tab.url))
        {
            return;
        }

        self.pending.expire();
        self.manager.load_state();
        let input = PlacementInput {
            duplicate_source: self.pending.take_duplicate(&tab),
            pending_parent: self.pending.take_parent(tab.tab),
            link_source: self.pending.take_link(tab.tab),
            last_active: self.pending.last_active(tab.window),
        };
        let placement = resolve_placement(self.manager.tree(), &tab, &input, &self.settings);
        if let Err(e) = self.manager.insert_tab(&tab, &placement) {
            warn!("Could not track new tab {}: {e}", tab.tab);
        }
    }

    /// A link signal arrived after its tab was already placed by fallback.
    fn reparent_late_link(&mut self, new_tab: TabId, source_tab: TabId) {
        let tree = self.manager.tree();
        let Some(node) = tree.node_id_by_tab(new_tab) else {
            return;
        };
        let Some(source) = tree.node_by_tab(source_tab) else {
            return;
        };
        let (parent, index) = match self.settings.link_position() {
            TabPosition::Child => (Some(source.id), usize::MAX),
            TabPosition::Sibling => {
                let siblings = match source.parent {
                    Some(p) => tree.node(p).map(|n| n.children.clone()).unwrap_or_default(),
                    None => tree.roots(source.view).to_vec(),
                };
                let at = siblings
                    .iter()
                    .position(|c| *c == source.id)
                    .map(|i| i + 1)
                    .unwrap_or(siblings.len());
                (source.parent, at)
            },
            TabPosition::End => return,
        };
        if let Err(e) = self.manager.move_node(node, parent, index) {
            warn!("Could not apply late link signal for tab {new_tab}: {e}");
        }
    }

    /// Decode and handle a JSON message from a UI surface.
    pub async fn handle_raw_message(&mut self, json: &str) -> MessageResponse {
        match serde_json::from_str::<Message>(json) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => MessageResponse::Error(format!("Unrecognized message: {e}")),
        }
    }

    pub async fn handle_message(&mut self, message: Message) -> MessageResponse {
        match message {
            Message::GetTree { view_id } => {
                self.manager.load_state();
                let view = match view_id {
                    Some(raw) => match parse_id(&raw) {
                        Ok(id) => id,
                        Err(response) => return response,
                    },
                    None => self.manager.tree().active_view(),
                };
                MessageResponse::Tree(self.manager.get_tree(view))
            },
            Message::GetSubtree { node_id } => {
                self.manager.load_state();
                match parse_id(&node_id).map(|id| self.manager.get_subtree(id)) {
                    Ok(Some(branch)) => MessageResponse::Branch(branch),
                    Ok(None) => MessageResponse::Error(format!("No such node: {node_id}")),
                    Err(response) => response,
                }
            },
            Message::MoveNode {
                node_id,
                parent_id,
                index,
            } => {
                let node = match parse_id(&node_id) {
                    Ok(id) => id,
                    Err(response) => return response,
                };
                let parent = match parent_id.as_deref().map(parse_id).transpose() {
                    Ok(parent) => parent,
                    Err(response) => return response,
                };
                match self.manager.move_node(node, parent, index) {
                    Ok(()) => MessageResponse::Ok,
                    Err(e) => MessageResponse::Error(format!("{e}")),
                }
            },
            Message::ToggleExpanded { node_id } => {
                match parse_id(&node_id).map(|id| self.manager.toggle_expanded(id)) {
                    Ok(Some(state)) => MessageResponse::Expanded(state),
                    Ok(None) => MessageResponse::Error(format!("No such node: {node_id}")),
                    Err(response) => response,
                }
            },
            Message::RemoveTab {
                tab_id,
                close_subtree,
            } => {
                let policy = if close_subtree {
                    RemovePolicy::CloseAll
                } else {
                    RemovePolicy::Promote
                };
                let removed = self.manager.remove_tab(tab_id, policy);
                if removed.is_empty() {
                    return MessageResponse::Error(format!("Tab not tracked: {tab_id}"));
                }
                self.host.close_tabs(&removed).await;
                MessageResponse::Ok
            },
            Message::CreateGroup { tab_ids, name } => self.create_group(&tab_ids, &name).await,
            Message::DissolveGroup { tab_id } => {
                match self.manager.dissolve_group(tab_id) {
                    Some(group_tab) => {
                        self.host.close_tabs(&[group_tab]).await;
                        MessageResponse::Ok
                    },
                    None => MessageResponse::Error(format!("Tab {tab_id} is not in a group")),
                }
            },
            Message::GroupInfo { tab_id } => {
                self.manager.load_state();
                match self.manager.get_group_info(tab_id) {
                    Some(info) => MessageResponse::Group(info),
                    None => MessageResponse::Error(format!("Tab {tab_id} is not in a group")),
                }
            },
            Message::CreateView { name, color } => {
                let id = self.manager.create_view(&name, &color);
                MessageResponse::ViewCreated(id.to_string())
            },
            Message::RemoveView { view_id } => {
                let view = match parse_id(&view_id) {
                    Ok(id) => id,
                    Err(response) => return response,
                };
                match self.manager.remove_view(view) {
                    Ok(closed) => {
                        if !closed.is_empty() {
                            self.host.close_tabs(&closed).await;
                        }
                        MessageResponse::Ok
                    },
                    Err(e) => MessageResponse::Error(format!("{e}")),
                }
            },
            Message::SetActiveView { view_id } => {
                match parse_id(&view_id).map(|id| self.manager.set_active_view(id)) {
                    Ok(Ok(())) => MessageResponse::Ok,
                    Ok(Err(e)) => MessageResponse::Error(format!("{e}")),
                    Err(response) => response,
                }
            },
            Message::RefreshTree => {
                self.manager.refresh_tree_structure();
                MessageResponse::Ok
            },
            Message::RegisterDuplicate { tab_id } => {
                self.manager.load_state();
                match self.manager.tree().node_by_tab(tab_id) {
                    Some(node) => {
                        let (url, window) = (node.url.clone(), node.window);
                        self.pending.register_duplicate(tab_id, &url, window);
                        MessageResponse::Ok
                    },
                    None => MessageResponse::Error(format!("Tab not tracked: {tab_id}")),
                }
            },
            Message::DeclareParent { tab_id, parent_id } => match parse_id(&parent_id) {
                Ok(parent) => {
                    self.pending.declare_parent(tab_id, parent);
                    MessageResponse::Ok
                },
                Err(response) => response,
            },
        }
    }

    /// Open a real group-page tab, wait out the creation race, then build
    /// the container around it. The suppression window keeps the group tab's
    /// own `TabCreated` out of the placement path.
    async fn create_group(&mut self, members: &[TabId], name: &str) -> MessageResponse {
        if members.is_empty() {
            return MessageResponse::Error("No tabs specified".to_string());
        }
        self.pending.begin_group_creation();
        let response = match self.host.open_group_page(name).await {
            Some(group_tab) => {
                self.pending.mark_group_tab(group_tab.tab);
                tokio::time::sleep(Duration::from_millis(self.settings.group_creation_delay_ms))
                    .await;
                match self
                    .manager
                    .create_group_with_real_tab(&group_tab, members, name)
                {
                    Ok(_) => MessageResponse::Ok,
                    Err(e) => MessageResponse::Error(format!("{e}")),
                }
            },
            None => MessageResponse::Error("Could not open group page".to_string()),
        };
        self.pending.end_group_creation();
        response
    }
}

fn parse_id(raw: &str) -> Result<Uuid, MessageResponse> {
    Uuid::parse_str(raw).map_err(|_| MessageResponse::Error(format!("Invalid id: {raw}")))
}
