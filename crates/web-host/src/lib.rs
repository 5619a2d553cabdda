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

//! HTTP long-poll transport host.
//!
//! Emulates a persistent connection over stateless HTTP: the client POSTs
//! message batches to one endpoint, identity rides on cookies, and a
//! `_.polling` request is held open until an event arrives. Built for
//! browsers that cannot hold a socket (restrictive proxies, old runtimes);
//! for everything else prefer `tessera-ws-host`.

mod config;
mod connections;
mod host;

pub use config::WebHostConfig;
pub use host::WebHost;
