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

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsHostConfig {
    pub listen_address: String,
    /// Route the upgrade endpoint is mounted on.
    pub route: String,
    pub session_cookie: String,
    /// Upper bound on a single text frame, in bytes.
    pub max_message_length: usize,
    /// Cadence of the open-connections status log.
    pub status_interval_ms: u64,
}

impl Default for WsHostConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8081".into(),
            route: "/ws".into(),
            session_cookie: "tessera.sid".into(),
            max_message_length: 256 * 1024,
            status_interval_ms: 30_000,
        }
    }
}

impl WsHostConfig {
    /// Defaults overlaid with an optional Yaml file.
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Yaml::file(path));
        }
        figment.extract()
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_load_without_a_file() {
        let config = WsHostConfig::load(None).unwrap();
        assert_eq!(config, WsHostConfig::default());
    }
}
