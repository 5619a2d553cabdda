// Copyright (C) 2025 Tessera Contributors. This program is free software: you
// can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use serde_derive::{Deserialize, Serialize};

/// Descriptive server metadata returned by the `_.meta` system method. The
/// broadcast-event list lets clients skip `_.sub` for events that are pushed
/// to everyone anyway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_versions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for ServerMetadata {
    fn default() -> Self {
        Self {
            name: "Tessera Server".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            accepted_versions: None,
            broadcast_events: None,
            extra: None,
        }
    }
}
