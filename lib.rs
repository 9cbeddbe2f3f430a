/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! tabgrove: a persistent hierarchical model of open browser tabs.
//!
//! The crate keeps a tree of nodes, with parent/child edges reflecting
//! navigation provenance, consistent with the live, asynchronous, multi-window
//! state of a browser the engine does not control.
//!
//! Layers, leaves first:
//! - `model::tree`: the arena tab tree and its invariant-preserving mutations
//! - `persistence`: whole-object key-value store (redb) with change callbacks
//! - `placement`: pure decision logic for where a new tab belongs
//! - `engine`: the reconciliation engine bridging tree, store, and live tabs
//! - `events`: browser-event and UI-message adapter with pending registries
//! - `config`: user settings (placement modes, registry expiry)

pub mod config;
pub mod engine;
pub mod events;
pub mod model;
pub mod persistence;
pub mod placement;

pub use config::{Settings, TabPosition};
pub use engine::{EngineError, GroupInfo, TreeBranch, TreeManager};
pub use events::{BrowserEvent, BrowserHost, EventAdapter, Message, MessageResponse};
pub use model::tree::{
    Node, NodeKind, RemovePolicy, TabId, TabRef, TabTree, TreeError, View, WindowId,
};
pub use persistence::{StoreError, TreeStore};
pub use placement::{Placement, PlacementInput, resolve_placement};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
