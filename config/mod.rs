/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! User settings: placement modes for new tabs, registry expiry knobs.
//!
//! Settings load from a TOML file or from the tree store (`SETTINGS_KEY`).
//! Older installs carried a single `new_tab_position`; the split
//! link/manual/duplicate settings fall back to it when absent.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::persistence::{SETTINGS_KEY, StoreError, TreeStore};

/// Where a new tab is placed relative to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabPosition {
    /// Child of the source tab.
    Child,
    /// Same parent as the source, inserted immediately after it.
    Sibling,
    /// Root level, appended after all existing roots.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Placement for tabs opened by a detected link click.
    pub new_tab_position_from_link: Option<TabPosition>,
    /// Placement for manually opened tabs with no signal.
    pub new_tab_position_manual: Option<TabPosition>,
    /// Placement for duplicated tabs.
    pub duplicate_tab_position: Option<TabPosition>,
    /// Legacy single setting, consulted when the split settings are absent.
    pub new_tab_position: Option<TabPosition>,
    /// Lifetime of a pending link-navigation or duplicate-source entry.
    pub pending_signal_ttl_ms: u64,
    /// Suppression window bridging group-page tab creation and its event.
    pub group_creation_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            new_tab_position_from_link: None,
            new_tab_position_manual: None,
            duplicate_tab_position: None,
            new_tab_position: None,
            pending_signal_ttl_ms: 10_000,
            group_creation_delay_ms: 150,
        }
    }
}

impl Settings {
    /// Effective placement for link-opened tabs. Defaults to `Child`, the
    /// whole point of a provenance tree.
    pub fn link_position(&self) -> TabPosition {
        self.new_tab_position_from_link
            .or(self.new_tab_position)
            .unwrap_or(TabPosition::Child)
    }

    /// Effective placement for manual opens. Defaults to `End`.
    pub fn manual_position(&self) -> TabPosition {
        self.new_tab_position_manual
            .or(self.new_tab_position)
            .unwrap_or(TabPosition::End)
    }

    /// Effective placement for duplicated tabs. Defaults to `Sibling`.
    pub fn duplicate_position(&self) -> TabPosition {
        self.duplicate_tab_position
            .or(self.new_tab_position)
            .unwrap_or(TabPosition::Sibling)
    }

    /// Load settings from a TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::Io(format!("Failed to read {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| SettingsError::Parse(format!("{e}")))
    }

    /// Load settings from the store, falling back to defaults when absent.
    pub fn load(store: &TreeStore) -> Self {
        store.get_json(SETTINGS_KEY).unwrap_or_default()
    }

    /// Persist settings to the store.
    pub fn save(&self, store: &TreeStore) -> Result<(), StoreError> {
        store.set_json(SETTINGS_KEY, self)
    }
}

/// Errors from settings loading.
#[derive(Debug)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {e}"),
            SettingsError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}
