/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Short-lived signal registries bridging event races.
//!
//! Placement signals (a detected link click, a duplicate command, an
//! explicitly declared parent) arrive on different channels than the
//! `TabCreated` event they describe, in either order. Entries wait here
//! until the tab shows up or the TTL sweeps them out.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::model::tree::{TabId, TabRef, WindowId};

#[derive(Debug, Clone)]
struct DuplicateSource {
    source: TabId,
    url: String,
    window: WindowId,
    registered_at: Instant,
}

/// All pending signal state. Single-owner, mutated only on the event loop.
#[derive(Debug)]
pub struct PendingRegistries {
    /// New tab id → node to attach under, declared before creation.
    pending_parents: HashMap<TabId, (Uuid, Instant)>,
    /// Announced duplications, matched to new tabs by URL and window.
    duplicate_sources: Vec<DuplicateSource>,
    /// New tab id → source tab of a detected link navigation.
    link_sources: HashMap<TabId, (TabId, Instant)>,
    /// Tabs known to back a group container; their creation events are
    /// handled by the grouping flow, not the placement path.
    group_tabs: HashSet<TabId>,
    group_creation_in_flight: bool,
    /// Window → tab that was active there most recently.
    last_active: HashMap<WindowId, TabId>,
    ttl: Duration,
}

impl PendingRegistries {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending_parents: HashMap::new(),
            duplicate_sources: Vec::new(),
            link_sources: HashMap::new(),
            group_tabs: HashSet::new(),
            group_creation_in_flight: false,
            last_active: HashMap::new(),
            ttl,
        }
    }

    // --- explicit parents ---

    pub fn declare_parent(&mut self, tab: TabId, parent: Uuid) {
        self.pending_parents.insert(tab, (parent, Instant::now()));
    }

    pub fn take_parent(&mut self, tab: TabId) -> Option<Uuid> {
        self.pending_parents.remove(&tab).map(|(parent, _)| parent)
    }

    // --- duplicates ---

    /// Announce that `source` is about to be duplicated. The clone carries
    /// no id yet; it is recognized later by URL and window.
    pub fn register_duplicate(&mut self, source: TabId, url: &str, window: WindowId) {
        self.duplicate_sources.push(DuplicateSource {
            source,
            url: url.to_string(),
            window,
            registered_at: Instant::now(),
        });
    }

    /// Match a newly created tab against announced duplications. The clone
    /// shares the source's URL and window; a match consumes the entry.
    pub fn take_duplicate(&mut self, tab: &TabRef) -> Option<TabId> {
        let pos = self
            .duplicate_sources
            .iter()
            .position(|d| d.url == tab.url && d.window == tab.window && d.source != tab.tab)?;
        Some(self.duplicate_sources.remove(pos).source)
    }

    // --- link navigations ---

    pub fn note_link(&mut self, new_tab: TabId, source: TabId) {
        self.link_sources.insert(new_tab, (source, Instant::now()));
    }

    pub fn take_link(&mut self, tab: TabId) -> Option<TabId> {
        self.link_sources.remove(&tab).map(|(source, _)| source)
    }

    // --- group-tab suppression ---

    pub fn begin_group_creation(&mut self) {
        self.group_creation_in_flight = true;
    }

    pub fn end_group_creation(&mut self) {
        self.group_creation_in_flight = false;
    }

    pub fn group_creation_in_flight(&self) -> bool {
        self.group_creation_in_flight
    }

    pub fn mark_group_tab(&mut self, tab: TabId) {
        self.group_tabs.insert(tab);
    }

    /// Whether a created tab belongs to the grouping flow and must not go
    /// through placement.
    pub fn take_group_tab(&mut self, tab: TabId) -> bool {
        self.group_tabs.remove(&tab)
    }

    // --- activation tracking ---

    pub fn note_active(&mut self, window: WindowId, tab: TabId) {
        self.last_active.insert(window, tab);
    }

    pub fn last_active(&self, window: WindowId) -> Option<TabId> {
        self.last_active.get(&window).copied()
    }

    pub fn forget_window(&mut self, window: WindowId) {
        self.last_active.remove(&window);
    }

    /// Drop every signal referring to a closed tab.
    pub fn forget_tab(&mut self, tab: TabId) {
        self.pending_parents.remove(&tab);
        self.link_sources.remove(&tab);
        self.link_sources.retain(|_, (source, _)| *source != tab);
        self.duplicate_sources.retain(|d| d.source != tab);
        self.group_tabs.remove(&tab);
        self.last_active.retain(|_, active| *active != tab);
    }

    // --- expiry ---

    /// Drop entries older than the TTL.
    pub fn expire(&mut self) {
        self.expire_at(Instant::now());
    }

    pub fn expire_at(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.pending_parents
            .retain(|_, (_, at)| now.duration_since(*at) <= ttl);
        self.link_sources
            .retain(|_, (_, at)| now.duration_since(*at) <= ttl);
        self.duplicate_sources
            .retain(|d| now.duration_since(d.registered_at) <= ttl);
    }
}
