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

//! Client-visible error taxonomy.
//!
//! Anything a method handler throws that is not one of these (or a `Custom`
//! code the host registered) collapses to an opaque `Server` error on the
//! wire; the detail goes only to the log.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    /// Malformed or unauthorized-shape request (validation failures, unknown
    /// methods, failed subscription checks).
    #[error("{0}")]
    Request(String),
    /// Identity required but absent.
    #[error("{0}")]
    NotAuthorized(String),
    /// Identity present but lacks a required group.
    #[error("{0}")]
    AccessDenied(String),
    /// Internal failure; never carries detail to the wire.
    #[error("{0}")]
    Server(String),
    /// Host-registered application error carrying structured data. Only
    /// codes known to the host's error registry cross the wire as-is.
    #[error("{message}")]
    Custom {
        code: String,
        message: String,
        data: serde_json::Value,
    },
}

impl ApiError {
    pub fn request(message: impl Into<String>) -> Self {
        ApiError::Request(message.into())
    }

    pub fn not_authorized() -> Self {
        ApiError::NotAuthorized("Not authorized.".into())
    }

    pub fn access_denied() -> Self {
        ApiError::AccessDenied("Access denied.".into())
    }

    pub fn server(message: impl Into<String>) -> Self {
        ApiError::Server(message.into())
    }

    pub fn custom(
        code: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        ApiError::Custom {
            code: code.into(),
            message: message.into(),
            data,
        }
    }

    /// Wire error code for this error.
    pub fn code(&self) -> &str {
        match self {
            ApiError::Request(_) => "RequestError",
            ApiError::NotAuthorized(_) => "NotAuthorizedError",
            ApiError::AccessDenied(_) => "AccessDeniedError",
            ApiError::Server(_) => "ServerError",
            ApiError::Custom { code, .. } => code,
        }
    }

    /// Serialized error data for the wire. Server errors leak nothing.
    pub fn wire_data(&self) -> serde_json::Value {
        match self {
            ApiError::Server(_) => serde_json::json!({}),
            ApiError::Custom { data, .. } => data.clone(),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_wire_data() {
        assert_eq!(ApiError::request("bad").code(), "RequestError");
        assert_eq!(ApiError::not_authorized().code(), "NotAuthorizedError");
        assert_eq!(ApiError::access_denied().code(), "AccessDeniedError");
        assert_eq!(
            ApiError::server("secret detail").wire_data(),
            serde_json::json!({})
        );
        let custom = ApiError::custom("QuotaError", "over quota", serde_json::json!({"left": 0}));
        assert_eq!(custom.code(), "QuotaError");
        assert_eq!(custom.wire_data(), serde_json::json!({"left": 0}));
    }
}
