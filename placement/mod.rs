/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Placement resolution for newly observed tabs.
//!
//! Pure decision logic: given a tree, the new tab, and the ambient signals
//! the event adapter collected, compute the parent and insertion point.
//! Precedence, highest first:
//!
//! 1. duplicate-source match
//! 2. explicitly pre-declared parent
//! 3. detected link navigation (authoritative over the reported opener)
//! 4. manual open (last-active / reported opener / root append)
//!
//! The browser-reported opener is unreliable and only consulted in the
//! manual-sibling case. System pages never become implicit sources.

use uuid::Uuid;

use crate::config::{Settings, TabPosition};
use crate::model::tree::{TabId, TabRef, TabTree};

/// URL of the extension-internal group page backing a group container tab.
/// Tabs with this URL never reach the resolver; the event adapter suppresses
/// them while group creation is in flight.
pub const GROUP_PAGE_URL: &str = "tabgrove:group";

/// Whether a URL is the internal group page.
pub fn is_group_page_url(url: &str) -> bool {
    url == GROUP_PAGE_URL || url.starts_with("tabgrove:group?")
}

/// Whether a URL is an internal/system page (new-tab page, browser settings,
/// extension pages). Such pages are placed at root when opened manually.
pub fn is_system_page(url: &str) -> bool {
    let scheme = match url::Url::parse(url) {
        Ok(parsed) => parsed.scheme().to_ascii_lowercase(),
        Err(_) => return url.is_empty(),
    };
    matches!(
        scheme.as_str(),
        "about" | "chrome" | "chrome-extension" | "edge" | "moz-extension" | "devtools"
            | "view-source" | "tabgrove"
    )
}

/// Signals collected by the event adapter before resolution. Consuming the
/// underlying registry entries is the adapter's job; the resolver only reads.
#[derive(Debug, Clone, Default)]
pub struct PlacementInput {
    /// Source tab of a matched pending duplicate, if any.
    pub duplicate_source: Option<TabId>,
    /// Explicitly pre-declared parent node, if any.
    pub pending_parent: Option<Uuid>,
    /// Source tab of a detected link navigation naming this tab, if any.
    pub link_source: Option<TabId>,
    /// Last-active tab in the new tab's window, captured before any await.
    pub last_active: Option<TabId>,
}

/// Where a new tab goes: parent node (or root), the sibling to insert after
/// (or append), and the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub parent: Option<Uuid>,
    pub insert_after: Option<Uuid>,
    pub view: Uuid,
}

impl Placement {
    fn root_end(tree: &TabTree) -> Self {
        Self {
            parent: None,
            insert_after: None,
            view: tree.active_view(),
        }
    }
}

/// Decide where a newly observed tab belongs.
pub fn resolve_placement(
    tree: &TabTree,
    tab: &TabRef,
    input: &PlacementInput,
    settings: &Settings,
) -> Placement {
    if let Some(source) = input.duplicate_source
        && let Some(placement) = relative_to_source(tree, source, settings.duplicate_position())
    {
        return placement;
    }

    if let Some(parent) = input.pending_parent
        && let Some(node) = tree.node(parent)
    {
        return Placement {
            parent: Some(parent),
            insert_after: None,
            view: node.view,
        };
    }

    if let Some(source) = input.link_source
        && let Some(placement) = relative_to_source(tree, source, settings.link_position())
    {
        return placement;
    }

    // Manual fallback. A system page with no signal attaches to nothing.
    if is_system_page(&tab.url) {
        return Placement::root_end(tree);
    }
    match settings.manual_position() {
        TabPosition::Child => match input.last_active.and_then(|t| tree.node_by_tab(t)) {
            Some(active) => Placement {
                parent: Some(active.id),
                insert_after: None,
                view: active.view,
            },
            None => Placement::root_end(tree),
        },
        TabPosition::Sibling => {
            match tab.opener.and_then(|t| tree.node_by_tab(t)) {
                Some(opener) => Placement {
                    parent: opener.parent,
                    insert_after: Some(opener.id),
                    view: opener.view,
                },
                None => Placement::root_end(tree),
            }
        },
        TabPosition::End => Placement::root_end(tree),
    }
}

/// Placement relative to a source node, or `None` when the source tab is no
/// longer tracked (closed mid-race) so the caller falls through.
fn relative_to_source(tree: &TabTree, source: TabId, mode: TabPosition) -> Option<Placement> {
    let node = tree.node_by_tab(source)?;
    Some(match mode {
        TabPosition::Child => Placement {
            parent: Some(node.id),
            insert_after: None,
            view: node.view,
        },
        TabPosition::Sibling => Placement {
            parent: node.parent,
            insert_after: Some(node.id),
            view: node.view,
        },
        TabPosition::End => Placement {
            parent: None,
            insert_after: None,
            view: node.view,
        },
    })
}
