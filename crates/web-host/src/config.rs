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

/// Long-poll host configuration. Defaults are tuned for browsers behind
/// ordinary proxies: the poll wait stays under common 30s proxy timeouts,
/// and a connection outlives two missed polls before it is reaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebHostConfig {
    pub listen_address: String,
    /// Route the single batch endpoint is mounted on.
    pub route: String,
    pub session_cookie: String,
    pub connection_cookie: String,
    /// Upper bound on a request body, in bytes.
    pub max_message_length: usize,
    /// How long a `_.polling` request is held open waiting for events.
    pub polling_wait_ms: u64,
    /// Idle time after which a connection without a held poll is dropped.
    pub connection_lifetime_ms: u64,
    /// Reaper tick.
    pub check_connections_interval_ms: u64,
}

impl Default for WebHostConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".into(),
            route: "/api".into(),
            session_cookie: "tessera.sid".into(),
            connection_cookie: "tessera.cid".into(),
            max_message_length: 256 * 1024,
            polling_wait_ms: 15_000,
            connection_lifetime_ms: 30_000,
            check_connections_interval_ms: 5_000,
        }
    }
}

impl WebHostConfig {
    /// Defaults overlaid with an optional Yaml file.
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Yaml::file(path));
        }
        figment.extract()
    }

    pub fn polling_wait(&self) -> Duration {
        Duration::from_millis(self.polling_wait_ms)
    }

    pub fn connection_lifetime(&self) -> Duration {
        Duration::from_millis(self.connection_lifetime_ms)
    }

    pub fn check_connections_interval(&self) -> Duration {
        Duration::from_millis(self.check_connections_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_load_without_a_file() {
        let config = WebHostConfig::load(None).unwrap();
        assert_eq!(config, WebHostConfig::default());
        assert_eq!(config.polling_wait(), Duration::from_secs(15));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("web-host-{}.yaml", std::process::id()));
        std::fs::write(&path, "route: /rpc\npolling_wait_ms: 5000\n").unwrap();
        let config = WebHostConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.route, "/rpc");
        assert_eq!(config.polling_wait_ms, 5000);
        assert_eq!(config.session_cookie, "tessera.sid");
    }
}
