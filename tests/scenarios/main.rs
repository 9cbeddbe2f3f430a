/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end scenarios: browser sessions replayed against the full stack,
//! adapter through engine through store, with a mock browser host.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tempfile::TempDir;

use tabgrove::events::pending::PendingRegistries;
use tabgrove::{
    BrowserEvent, BrowserHost, EventAdapter, Message, MessageResponse, NodeKind, Settings, TabId,
    TabPosition, TabRef, TreeManager, TreeStore, VERSION,
};

#[derive(Default)]
struct HostState {
    tabs: Mutex<Vec<TabRef>>,
    closed: Mutex<Vec<TabId>>,
    next_group_tab: AtomicU32,
}

#[derive(Clone, Default)]
struct ScriptedHost {
    state: Arc<HostState>,
}

impl BrowserHost for ScriptedHost {
    async fn query_tabs(&self) -> Vec<TabRef> {
        self.state.tabs.lock().clone()
    }

    async fn open_group_page(&self, _name: &str) -> Option<TabRef> {
        let tab = 9000 + self.state.next_group_tab.fetch_add(1, Ordering::SeqCst);
        Some(TabRef::new(tab, 1, "tabgrove:group"))
    }

    async fn close_tabs(&self, tabs: &[TabId]) {
        self.state.closed.lock().extend_from_slice(tabs);
        self.state.tabs.lock().retain(|t| !tabs.contains(&t.tab));
    }
}

struct Session {
    adapter: EventAdapter<ScriptedHost>,
    host: ScriptedHost,
    dir: TempDir,
}

impl Session {
    fn new() -> Self {
        Self::with_settings(Settings {
            group_creation_delay_ms: 0,
            ..Default::default()
        })
    }

    fn with_settings(settings: Settings) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TreeStore::open(dir.path().to_path_buf()).unwrap());
        let host = ScriptedHost::default();
        let adapter = EventAdapter::new(host.clone(), TreeManager::new(store), settings);
        Self { adapter, host, dir }
    }

    /// Simulate an engine restart: drop the running adapter (releasing the
    /// store's file lock) and bring up a fresh one over the same directory.
    fn reopen(self) -> Self {
        let Session { adapter, host, dir } = self;
        drop(adapter);
        let store = Arc::new(TreeStore::open(dir.path().to_path_buf()).unwrap());
        let adapter = EventAdapter::new(
            host.clone(),
            TreeManager::new(store),
            Settings {
                group_creation_delay_ms: 0,
                ..Default::default()
            },
        );
        Session { adapter, host, dir }
    }

    async fn open(&mut self, tab: TabId, url: &str) {
        self.open_in(tab, 1, url).await;
    }

    async fn open_in(&mut self, tab: TabId, window: u32, url: &str) {
        self.host.state.tabs.lock().push(TabRef::new(tab, window, url));
        self.adapter
            .handle_event(BrowserEvent::TabCreated(TabRef::new(tab, window, url)))
            .await;
    }

    async fn open_from_link(&mut self, tab: TabId, source: TabId, url: &str) {
        self.adapter
            .handle_event(BrowserEvent::LinkNavigation {
                new_tab: tab,
                source_tab: source,
            })
            .await;
        self.open(tab, url).await;
    }

    async fn close(&mut self, tab: TabId) {
        self.host.state.tabs.lock().retain(|t| t.tab != tab);
        self.adapter
            .handle_event(BrowserEvent::TabRemoved {
                tab,
                window: 1,
                is_window_closing: false,
            })
            .await;
    }

    fn tabs_at_depth(&self, depth: u32) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .adapter
            .manager()
            .tree()
            .nodes()
            .filter(|n| n.depth == depth)
            .map(|n| n.tab)
            .collect();
        tabs.sort();
        tabs
    }
}

#[test]
fn version_is_populated() {
    assert!(!VERSION.is_empty());
}

#[tokio::test]
async fn browsing_session_builds_provenance_tree() {
    let mut session = Session::new();
    session.open(1, "https://news.example").await;
    session.open_from_link(2, 1, "https://news.example/story").await;
    session.open_from_link(3, 2, "https://cited.example").await;
    session.open(4, "https://unrelated.example").await;

    let tree = session.adapter.manager().tree();
    tree.validate().unwrap();
    assert_eq!(session.tabs_at_depth(0), vec![1, 4]);
    assert_eq!(session.tabs_at_depth(1), vec![2]);
    assert_eq!(session.tabs_at_depth(2), vec![3]);
}

#[tokio::test]
async fn closing_middle_tab_promotes_descendants() {
    let mut session = Session::new();
    session.open(1, "https://a.example").await;
    session.open_from_link(2, 1, "https://b.example").await;
    session.open_from_link(3, 2, "https://c.example").await;

    session.close(2).await;

    let tree = session.adapter.manager().tree();
    tree.validate().unwrap();
    let grandchild = tree.node_by_tab(3).unwrap();
    assert_eq!(grandchild.depth, 1);
    assert_eq!(grandchild.parent, Some(tree.node_by_tab(1).unwrap().id));
}

#[tokio::test]
async fn restart_rebinds_tabs_by_url() {
    let mut session = Session::new();
    session.open(1, "https://a.example").await;
    session.open_from_link(2, 1, "https://b.example").await;

    // Restart: the browser hands out fresh tab ids for the same pages.
    let mut session = session.reopen();
    *session.host.state.tabs.lock() = vec![
        TabRef::new(11, 1, "https://a.example"),
        TabRef::new(12, 1, "https://b.example"),
    ];
    session
        .adapter
        .handle_event(BrowserEvent::WindowCreated { window: 1 })
        .await;

    let tree = session.adapter.manager().tree();
    tree.validate().unwrap();
    assert_eq!(tree.node_count(), 2);
    let child = tree.node_by_tab(12).unwrap();
    assert_eq!(child.parent, Some(tree.node_by_tab(11).unwrap().id));
}

#[tokio::test]
async fn reconcile_drops_tabs_closed_while_stopped() {
    let mut session = Session::new();
    session.open(1, "https://a.example").await;
    session.open_from_link(2, 1, "https://b.example").await;
    session.open_from_link(3, 2, "https://c.example").await;

    // Tab 2 was closed while the engine was not running.
    let mut session = session.reopen();
    *session.host.state.tabs.lock() = vec![
        TabRef::new(1, 1, "https://a.example"),
        TabRef::new(3, 1, "https://c.example"),
    ];
    session
        .adapter
        .handle_event(BrowserEvent::WindowCreated { window: 1 })
        .await;

    let tree = session.adapter.manager().tree();
    tree.validate().unwrap();
    assert!(!tree.contains_tab(2));
    let c = tree.node_by_tab(3).unwrap();
    assert_eq!(c.parent, Some(tree.node_by_tab(1).unwrap().id));

    // Running the same reconcile again changes nothing.
    session
        .adapter
        .handle_event(BrowserEvent::WindowCreated { window: 1 })
        .await;
    assert_eq!(session.adapter.manager().tree().node_count(), 2);
}

#[tokio::test]
async fn group_scenario_container_holds_members() {
    let mut session = Session::new();
    session.open(1, "https://p.example").await;
    session.open_from_link(2, 1, "https://p.example/a").await;
    session.open_from_link(3, 1, "https://p.example/b").await;

    let response = session
        .adapter
        .handle_message(Message::CreateGroup {
            tab_ids: vec![2, 3],
            name: "reading".to_string(),
        })
        .await;
    assert!(matches!(response, MessageResponse::Ok));
    // The group page's own creation event is suppressed.
    session.open(9000, "tabgrove:group").await;

    let tree = session.adapter.manager().tree();
    tree.validate().unwrap();
    let group = tree.node_by_tab(9000).unwrap();
    assert_eq!(group.kind, NodeKind::Group);
    // Members shared parent 1, so the container hangs under it.
    assert_eq!(group.parent, Some(tree.node_by_tab(1).unwrap().id));
    let members: Vec<TabId> = group
        .children
        .iter()
        .filter_map(|c| tree.node(*c))
        .map(|n| n.tab)
        .collect();
    assert_eq!(members, vec![2, 3]);
}

#[tokio::test]
async fn group_survives_restart_and_dissolves() {
    let mut session = Session::new();
    session.open(1, "https://a.example").await;
    session.open(2, "https://b.example").await;
    session
        .adapter
        .handle_message(Message::CreateGroup {
            tab_ids: vec![1, 2],
            name: "work".to_string(),
        })
        .await;

    let mut session = session.reopen();
    let info = session.adapter.manager().get_group_info(1).unwrap();
    assert_eq!(info.name, "work");
    assert_eq!(info.members, vec![1, 2]);

    let response = session
        .adapter
        .handle_message(Message::DissolveGroup { tab_id: 2 })
        .await;
    assert!(matches!(response, MessageResponse::Ok));
    assert_eq!(session.host.state.closed.lock().clone(), vec![9000]);
    let tree = session.adapter.manager().tree();
    assert!(tree.node_by_tab(1).unwrap().is_root());
    assert!(tree.node_by_tab(2).unwrap().is_root());
    tree.validate().unwrap();
}

#[tokio::test]
async fn sibling_link_mode_places_next_to_source() {
    let mut session = Session::with_settings(Settings {
        new_tab_position_from_link: Some(TabPosition::Sibling),
        group_creation_delay_ms: 0,
        ..Default::default()
    });
    session.open(1, "https://a.example").await;
    session.open_from_link(2, 1, "https://a.example/next").await;

    let tree = session.adapter.manager().tree();
    let opened = tree.node_by_tab(2).unwrap();
    assert!(opened.is_root());
    let roots = tree.roots(tree.active_view());
    assert_eq!(roots[0], tree.node_by_tab(1).unwrap().id);
    assert_eq!(roots[1], opened.id);
}

#[tokio::test]
async fn multi_window_session_closes_one_window() {
    let mut session = Session::new();
    session.open_in(1, 1, "https://a.example").await;
    session.open_in(2, 2, "https://b.example").await;
    session.open_in(3, 2, "https://c.example").await;

    session
        .adapter
        .handle_event(BrowserEvent::WindowRemoved { window: 2 })
        .await;

    let tree = session.adapter.manager().tree();
    tree.validate().unwrap();
    assert!(tree.contains_tab(1));
    assert!(!tree.contains_tab(2));
    assert!(!tree.contains_tab(3));
}

#[tokio::test]
async fn ui_tree_rendering_tracks_structure() {
    let mut session = Session::new();
    session.open(1, "https://a.example").await;
    session.open_from_link(2, 1, "https://a.example/x").await;

    let response = session
        .adapter
        .handle_raw_message(r#"{"kind":"get_tree"}"#)
        .await;
    let branches = match response {
        MessageResponse::Tree(branches) => branches,
        other => panic!("unexpected response: {other:?}"),
    };
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].tab_id, 1);
    assert_eq!(branches[0].children[0].tab_id, 2);

    let json = serde_json::to_string(&MessageResponse::Tree(branches)).unwrap();
    assert!(json.contains("\"status\":\"tree\""));
}

#[test]
fn pending_registry_is_reexported_for_embedders() {
    use std::time::Duration;
    let mut pending = PendingRegistries::new(Duration::from_secs(1));
    pending.note_link(2, 1);
    assert_eq!(pending.take_link(2), Some(1));
}
