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
use tessera_common::{ApiError, Value};

/// A caller's authentication record: an opaque id plus flat group tags.
/// Stored in the session provider and mutated only by the
/// authentication-response interception in the dispatcher.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl AuthData {
    pub fn for_user(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Everything known about one logical connection. The session id persists
/// across reconnects (cookie-carried); the connection id is per logical
/// connection and is the addressing unit for directed fan-out and for
/// subscription-set membership.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionData {
    pub auth: AuthData,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl ConnectionData {
    /// Runtime value form, for `apiConnectionData` injection slots.
    pub fn to_value(&self) -> Value {
        Value::from_json(&serde_json::to_value(self).expect("connection data is always JSON"))
    }
}

impl AuthData {
    /// Runtime value form, for `apiAuthData` injection slots.
    pub fn to_value(&self) -> Value {
        Value::from_json(&serde_json::to_value(self).expect("auth data is always JSON"))
    }

    /// Parse an auth record out of a handler-returned value (the
    /// `newAuthData` half of an authentication response).
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.to_json())
    }
}

/// The group gate shared by method dispatch and event subscription.
/// `None` is open to everyone, `Some([])` requires authentication only,
/// a non-empty list requires membership in at least one named group.
pub(crate) fn check_access(groups: Option<&[String]>, auth: &AuthData) -> Result<(), ApiError> {
    let Some(groups) = groups else {
        return Ok(());
    };
    if !auth.is_authenticated() {
        return Err(ApiError::not_authorized());
    }
    if groups.is_empty() || groups.iter().any(|g| auth.in_group(g)) {
        return Ok(());
    }
    Err(ApiError::access_denied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_gate() {
        let anon = AuthData::default();
        let user = AuthData::for_user("u1");
        let admin = AuthData::for_user("u2").with_groups(["admin"]);

        assert!(check_access(None, &anon).is_ok());
        assert_eq!(
            check_access(Some(&[]), &anon),
            Err(ApiError::not_authorized())
        );
        assert!(check_access(Some(&[]), &user).is_ok());
        assert_eq!(
            check_access(Some(&["admin".to_string()]), &user),
            Err(ApiError::access_denied())
        );
        assert!(check_access(Some(&["admin".to_string()]), &admin).is_ok());
    }
}
