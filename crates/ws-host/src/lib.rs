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

//! WebSocket transport host.
//!
//! One axum upgrade endpoint; each accepted socket gets its own task that
//! selects between inbound envelopes and the connection's event mailbox.
//! The preferred transport where sockets are available; `tessera-web-host`
//! covers the rest.

mod config;
mod connection;
mod host;

pub use config::WsHostConfig;
pub use host::WsHost;
