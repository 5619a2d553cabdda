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

//! The error-code registry: the allowlist of error codes that may cross the
//! wire with their data intact. A handler throwing a custom code the host
//! never registered gets the same opaque treatment as an internal failure,
//! so a typo cannot leak internals to a client.

use crate::log;
use std::collections::HashSet;
use tessera_common::{ApiError, ServerMessage};

const BUILTIN_CODES: [&str; 4] = [
    "RequestError",
    "NotAuthorizedError",
    "AccessDeniedError",
    "ServerError",
];

#[derive(Debug, Clone)]
pub struct ErrorRegistry {
    codes: HashSet<String>,
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self {
            codes: BUILTIN_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code: impl Into<String>) -> &mut Self {
        self.codes.insert(code.into());
        self
    }

    pub fn is_registered(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Turn a dispatch failure into the wire error reply, logging it at the
    /// severity it deserves.
    pub fn response_from_error(
        &self,
        method: &str,
        user_id: Option<&str>,
        request_id: i64,
        error: &ApiError,
    ) -> ServerMessage {
        let sanitized = match error {
            ApiError::Server(_) => {
                log::server_error(method, user_id, error);
                ApiError::server("")
            }
            ApiError::Custom { code, .. } if !self.is_registered(code) => {
                log::server_error(method, user_id, error);
                ApiError::server("")
            }
            other => {
                log::client_error(method, user_id, other);
                other.clone()
            }
        };
        ServerMessage::Error {
            request_id,
            code: sanitized.code().to_string(),
            data: sanitized.wire_data(),
        }
    }
}
