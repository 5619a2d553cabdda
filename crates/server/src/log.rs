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

//! Structured call and lifecycle logging.
//!
//! Every method call is logged once, after the handler returns, with the
//! elapsed time. What of the payload gets logged is a per-method policy so
//! that credential-carrying methods can suppress their arguments without
//! losing the call record.

use serde_derive::{Deserialize, Serialize};
use std::time::Duration;
use tessera_common::ApiError;

/// How much of a method's payload appears in the call log. Inherited down
/// the api tree; `All` at the root unless overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogPolicy {
    #[default]
    All,
    NoData,
    InputOnly,
    OutputOnly,
    None,
}

impl LogPolicy {
    fn logs_input(self) -> bool {
        matches!(self, LogPolicy::All | LogPolicy::InputOnly)
    }

    fn logs_output(self) -> bool {
        matches!(self, LogPolicy::All | LogPolicy::OutputOnly)
    }
}

/// One completed method call.
pub(crate) fn method_call(
    method: &str,
    user_id: Option<&str>,
    policy: LogPolicy,
    input: Option<&serde_json::Value>,
    output: Option<&serde_json::Value>,
    elapsed: Duration,
) {
    if policy == LogPolicy::None {
        return;
    }
    let user = user_id.unwrap_or("-");
    let ms = elapsed.as_millis();
    match (policy.logs_input(), policy.logs_output()) {
        (true, true) => tracing::info!(method, user, ms, ?input, ?output, "call"),
        (true, false) => tracing::info!(method, user, ms, ?input, "call"),
        (false, true) => tracing::info!(method, user, ms, ?output, "call"),
        (false, false) => tracing::info!(method, user, ms, "call"),
    }
}

/// A call rejected for a caller-side reason. These are expected traffic
/// and logged at warn, with the code but never the payload.
pub(crate) fn client_error(method: &str, user_id: Option<&str>, error: &ApiError) {
    tracing::warn!(
        method,
        user = user_id.unwrap_or("-"),
        code = error.code(),
        "client error: {error}"
    );
}

/// A handler failure. Logged in full here; the wire gets an opaque error.
pub(crate) fn server_error(method: &str, user_id: Option<&str>, error: &ApiError) {
    tracing::error!(
        method,
        user = user_id.unwrap_or("-"),
        code = error.code(),
        "server error: {error}"
    );
}

pub(crate) fn event_fired(event: &str, subscribers: usize) {
    tracing::debug!(event, subscribers, "event");
}

pub fn log_online(connection_id: &str, ip: &str) {
    tracing::info!(connection_id, ip, "online");
}

pub fn log_offline(connection_id: &str) {
    tracing::info!(connection_id, "offline");
}

pub fn log_login(connection_id: &str, user_id: &str) {
    tracing::info!(connection_id, user_id, "login");
}

pub fn log_logout(connection_id: &str, user_id: &str) {
    tracing::info!(connection_id, user_id, "logout");
}
