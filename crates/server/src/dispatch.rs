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

//! Method dispatch: the fixed pipeline every api call runs through.
//!
//! Lookup, access check, argument validation, argument filtering,
//! injection splicing, handler invocation, result filtering. Any failure
//! short-circuits into an error reply through the error registry; the
//! pipeline itself never panics on caller input.
//!
//! Authentication responses are intercepted here rather than in each host:
//! a method whose return reflection is the auth-response injection has its
//! result split into the new auth record (handed back to the host to
//! persist) and the payload actually sent to the client.

use crate::api::{ApiMap, FilterPolicy, MethodEntry};
use crate::auth::{AuthData, ConnectionData, check_access};
use crate::filter::{filter_method_args, filter_out};
use crate::log;
use crate::registry::ErrorRegistry;
use crate::validate::validate_method;
use std::time::Instant;
use tessera_common::{ApiError, ClientMessage, InjectionKind, ServerMessage, TypeReflection, Value};

/// What one dispatched call produced. `new_auth` is set only by the
/// auth-response interception; the host must persist it to the session and
/// the fan-out registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub message: ServerMessage,
    pub new_auth: Option<AuthData>,
}

impl DispatchOutcome {
    fn reply(message: ServerMessage) -> Self {
        Self {
            message,
            new_auth: None,
        }
    }
}

pub struct Dispatcher {
    api: ApiMap,
    registry: ErrorRegistry,
}

impl Dispatcher {
    pub fn new(api: ApiMap, registry: ErrorRegistry) -> Self {
        Self { api, registry }
    }

    pub fn api(&self) -> &ApiMap {
        &self.api
    }

    /// Run one client message through the pipeline. Never returns an error;
    /// failures become error replies.
    pub async fn dispatch(
        &self,
        connection: &ConnectionData,
        message: &ClientMessage,
    ) -> DispatchOutcome {
        let user_id = connection.auth.id.clone();
        match self.call(connection, message).await {
            Ok(outcome) => outcome,
            Err(error) => DispatchOutcome::reply(self.registry.response_from_error(
                &message.method,
                user_id.as_deref(),
                message.request_id,
                &error,
            )),
        }
    }

    async fn call(
        &self,
        connection: &ConnectionData,
        message: &ClientMessage,
    ) -> Result<DispatchOutcome, ApiError> {
        let entry = self
            .api
            .method(&message.method)
            .ok_or_else(|| ApiError::request(format!("Method {} not found", message.method)))?;

        check_access(entry.metadata.groups.as_deref(), &connection.auth)?;

        validate_method(&entry.reflection, message.data.as_ref(), &message.method)
            .map_err(ApiError::request)?;

        let args = splice_args(entry, connection, message.data.as_ref())?;

        let started = Instant::now();
        let result = (entry.handler)(args).await?;
        let elapsed = started.elapsed();

        let policy = entry.metadata.effective_filter_policy();
        let (reply, new_auth) = match entry.reflection.ret.as_ref() {
            Some(TypeReflection::Injection { kind, .. })
                if *kind == InjectionKind::AuthDataResponse =>
            {
                split_auth_response(result.as_ref())?
            }
            Some(ret) => {
                let result = match result {
                    Some(value) if policy == FilterPolicy::None => Some(value.to_json()),
                    Some(value) => Some(
                        filter_out(&value, ret, policy)
                            .map_err(|e| ApiError::server(format!("bad result: {e}")))?,
                    ),
                    None if ret.is_optional() => None,
                    None => return Err(ApiError::server("handler returned no result")),
                };
                (result, None)
            }
            None => (None, None),
        };

        log::method_call(
            &message.method,
            connection.auth.id.as_deref(),
            entry.metadata.effective_log_policy(),
            message.data.as_ref(),
            reply.as_ref(),
            elapsed,
        );

        Ok(DispatchOutcome {
            message: ServerMessage::response(message.request_id, reply),
            new_auth,
        })
    }
}

/// Interleave caller arguments with server-side injections, in parameter
/// declaration order.
fn splice_args(
    entry: &MethodEntry,
    connection: &ConnectionData,
    data: Option<&serde_json::Value>,
) -> Result<Vec<Value>, ApiError> {
    let mut wire = filter_method_args(data, &entry.reflection).into_iter();
    let mut args = Vec::with_capacity(entry.reflection.params.len());
    for param in &entry.reflection.params {
        let Some(kind) = param.injection_kind() else {
            args.push(wire.next().unwrap_or(Value::Null));
            continue;
        };
        let value = match kind {
            InjectionKind::ApiUserId => match connection.auth.id.as_deref() {
                Some(id) if !id.is_empty() => Value::String(id.to_string()),
                _ if param.is_optional() => Value::Null,
                _ => return Err(ApiError::not_authorized()),
            },
            InjectionKind::ApiAuthData => connection.auth.to_value(),
            InjectionKind::ApiConnectionData => connection.to_value(),
            InjectionKind::AuthDataResponse | InjectionKind::Other(_) => Value::Null,
        };
        args.push(value);
    }
    Ok(args)
}

/// An auth-response result is an object with an optional `newAuthData`
/// record and an optional `response` payload for the client.
fn split_auth_response(
    result: Option<&Value>,
) -> Result<(Option<serde_json::Value>, Option<AuthData>), ApiError> {
    let Some(Value::Object(fields)) = result else {
        return Err(ApiError::server("auth method returned no auth response"));
    };
    let new_auth = match fields.get("newAuthData") {
        Some(value) => Some(
            AuthData::from_value(value)
                .map_err(|e| ApiError::server(format!("bad auth data in response: {e}")))?,
        ),
        None => None,
    };
    let reply = fields.get("response").map(Value::to_json);
    Ok((reply, new_auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiBuilder, ItemMetadata};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tessera_common::MethodReflection;

    fn connection_for(auth: AuthData) -> ConnectionData {
        ConnectionData {
            auth,
            ip: "127.0.0.1".into(),
            session_id: Some("sess".into()),
            connection_id: Some("conn".into()),
        }
    }

    fn dispatcher(builder: ApiBuilder) -> Dispatcher {
        Dispatcher::new(builder.build(), ErrorRegistry::new())
    }

    #[tokio::test]
    async fn happy_path_validates_filters_and_responds() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "math.double",
            MethodReflection::new(
                vec![TypeReflection::number()],
                Some(TypeReflection::number()),
            ),
            ItemMetadata::default(),
            |args| async move {
                let n = args[0].as_f64().unwrap_or(0.0);
                Ok(Some(Value::Number(n * 2.0)))
            },
        );
        let d = dispatcher(builder);

        let outcome = d
            .dispatch(
                &connection_for(AuthData::default()),
                &ClientMessage::new(1, "math.double", Some(json!([21]))),
            )
            .await;
        assert_eq!(
            outcome.message,
            ServerMessage::response(1, Some(json!(42.0)))
        );
        assert_eq!(outcome.new_auth, None);
    }

    #[tokio::test]
    async fn unknown_method_and_bad_args_are_request_errors() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "greet",
            MethodReflection::new(vec![TypeReflection::string()], None),
            ItemMetadata::default(),
            |_| async { Ok(None) },
        );
        let d = dispatcher(builder);
        let conn = connection_for(AuthData::default());

        let outcome = d
            .dispatch(&conn, &ClientMessage::new(1, "nope", None))
            .await;
        assert_eq!(
            outcome.message,
            ServerMessage::Error {
                request_id: 1,
                code: "RequestError".into(),
                data: json!("Method nope not found"),
            }
        );

        let outcome = d
            .dispatch(&conn, &ClientMessage::new(2, "greet", Some(json!([42]))))
            .await;
        assert!(matches!(
            outcome.message,
            ServerMessage::Error { ref code, .. } if code == "RequestError"
        ));
    }

    #[tokio::test]
    async fn user_id_injection_requires_authentication() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "whoami",
            MethodReflection::new(
                vec![TypeReflection::injection(InjectionKind::ApiUserId)],
                Some(TypeReflection::string()),
            ),
            ItemMetadata::default(),
            |args| async move { Ok(Some(args[0].clone())) },
        );
        let d = dispatcher(builder);

        let outcome = d
            .dispatch(
                &connection_for(AuthData::default()),
                &ClientMessage::new(1, "whoami", None),
            )
            .await;
        assert!(matches!(
            outcome.message,
            ServerMessage::Error { ref code, .. } if code == "NotAuthorizedError"
        ));

        let outcome = d
            .dispatch(
                &connection_for(AuthData::for_user("u7")),
                &ClientMessage::new(2, "whoami", None),
            )
            .await;
        assert_eq!(
            outcome.message,
            ServerMessage::response(2, Some(json!("u7")))
        );
    }

    #[tokio::test]
    async fn injections_splice_between_wire_arguments() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "tag",
            MethodReflection::new(
                vec![
                    TypeReflection::string(),
                    TypeReflection::injection(InjectionKind::ApiUserId),
                    TypeReflection::string(),
                ],
                Some(TypeReflection::string()),
            ),
            ItemMetadata::default(),
            |args| async move {
                let joined = args
                    .iter()
                    .map(|a| a.as_str().unwrap_or("?").to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                Ok(Some(Value::String(joined)))
            },
        );
        let d = dispatcher(builder);

        let outcome = d
            .dispatch(
                &connection_for(AuthData::for_user("u1")),
                &ClientMessage::new(1, "tag", Some(json!(["a", "b"]))),
            )
            .await;
        assert_eq!(
            outcome.message,
            ServerMessage::response(1, Some(json!("a/u1/b")))
        );
    }

    #[tokio::test]
    async fn group_gate_applies_before_the_handler() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "admin.purge",
            MethodReflection::default(),
            ItemMetadata::default().with_groups(["admin"]),
            |_| async { panic!("handler must not run") },
        );
        let d = dispatcher(builder);

        let outcome = d
            .dispatch(
                &connection_for(AuthData::for_user("u1")),
                &ClientMessage::new(1, "admin.purge", None),
            )
            .await;
        assert!(matches!(
            outcome.message,
            ServerMessage::Error { ref code, .. } if code == "AccessDeniedError"
        ));
    }

    #[tokio::test]
    async fn auth_response_is_intercepted() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "login",
            MethodReflection::new(
                vec![TypeReflection::string()],
                Some(TypeReflection::injection(InjectionKind::AuthDataResponse)),
            ),
            ItemMetadata::default(),
            |args| async move {
                let user = args[0].as_str().unwrap_or_default().to_string();
                Ok(Some(Value::Object(
                    [
                        (
                            "newAuthData".to_string(),
                            AuthData::for_user(&user).to_value(),
                        ),
                        ("response".to_string(), Value::Bool(true)),
                    ]
                    .into(),
                )))
            },
        );
        let d = dispatcher(builder);

        let outcome = d
            .dispatch(
                &connection_for(AuthData::default()),
                &ClientMessage::new(9, "login", Some(json!(["alice"]))),
            )
            .await;
        assert_eq!(
            outcome.message,
            ServerMessage::response(9, Some(json!(true)))
        );
        assert_eq!(outcome.new_auth, Some(AuthData::for_user("alice")));
    }

    #[tokio::test]
    async fn handler_failures_are_sanitized() {
        let mut builder = ApiBuilder::new();
        builder.method(
            "boom",
            MethodReflection::default(),
            ItemMetadata::default(),
            |_| async { Err(ApiError::server("connection string leaked")) },
        );
        let d = dispatcher(builder);

        let outcome = d
            .dispatch(
                &connection_for(AuthData::default()),
                &ClientMessage::new(3, "boom", None),
            )
            .await;
        assert_eq!(
            outcome.message,
            ServerMessage::Error {
                request_id: 3,
                code: "ServerError".into(),
                data: json!({}),
            }
        );
    }
}
