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

//! Tracing setup for applications embedding a tessera host.
//!
//! Method calls, event fan-out, and connection lifecycle are all logged
//! through `tracing`; an embedding application that installs its own
//! subscriber can skip this entirely.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Install a compact stdout subscriber filtered by `RUST_LOG`, or by
/// `debug`/`info` (per `debug_fallback`) when the variable is unset.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(debug_fallback: bool) -> Result<(), eyre::Report> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug_fallback { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| eyre::eyre!(e))?;

    Ok(())
}
