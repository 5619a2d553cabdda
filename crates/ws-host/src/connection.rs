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

//! Per-socket task: selects between inbound frames and the connection's
//! event mailbox until either side closes.
//!
//! The socket protocol is one envelope per text frame. A frame that is
//! oversized, not JSON, or not a `[requestId, method, data?]` tuple is a
//! protocol violation and closes the connection; per-message errors exist
//! only for well-formed envelopes.

use crate::host::WsHost;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tessera_common::{ClientMessage, ServerMessage, SystemPayload};
use tessera_server::{ConnectionData, DispatchOutcome, log_offline, log_online};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub(crate) enum FrameError {
    #[error("frame exceeds size limit ({size} > {limit})")]
    Oversized { size: usize, limit: usize },
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("binary frames are not part of the protocol")]
    Binary,
}

pub(crate) struct WsConnection {
    host: WsHost,
    pub(crate) data: ConnectionData,
}

impl WsConnection {
    pub(crate) fn new(host: WsHost, data: ConnectionData) -> Self {
        Self { host, data }
    }

    fn connection_id(&self) -> String {
        self.data.connection_id.clone().unwrap_or_default()
    }

    /// Handle one inbound text frame; the reply is always a single message.
    pub(crate) async fn process_text(&mut self, text: &str) -> Result<ServerMessage, FrameError> {
        let limit = self.host.inner.config.max_message_length;
        if text.len() > limit {
            return Err(FrameError::Oversized {
                size: text.len(),
                limit,
            });
        }
        let message: ClientMessage =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

        if message.is_system() {
            return Ok(self
                .host
                .inner
                .system
                .handle(&self.connection_id(), &message)
                .await);
        }

        let DispatchOutcome { message, new_auth } = self
            .host
            .inner
            .dispatcher
            .dispatch(&self.data, &message)
            .await;
        if let Some(auth) = new_auth {
            self.host.apply_auth_change(&mut self.data, auth).await;
        }
        Ok(message)
    }
}

pub(crate) async fn run(
    host: WsHost,
    socket: WebSocket,
    data: ConnectionData,
    fresh_session: bool,
) {
    let connection_id = data.connection_id.clone().unwrap_or_default();
    info!("New connection from {}, {}", data.ip, connection_id);

    let mut mailbox = host
        .inner
        .mailboxes
        .insert(&connection_id, data.session_id.clone());
    host.inner.fanout.register_connection(&connection_id, data.clone());
    log_online(&connection_id, &data.ip);

    let (mut sender, mut receiver) = socket.split();
    let mut connection = WsConnection::new(host.clone(), data);

    let mut greeting = Vec::new();
    if fresh_session
        && let Some(session_id) = connection.data.session_id.clone()
    {
        greeting.push(ServerMessage::System(SystemPayload::set_session_id(
            session_id,
        )));
    }
    greeting.push(ServerMessage::System(SystemPayload::set_connection_id(
        &connection_id,
    )));

    'conn: {
        for message in greeting {
            if send_frame(&mut sender, &message).await.is_err() {
                break 'conn;
            }
        }

        loop {
            tokio::select! {
                frame = receiver.next() => {
                    let reply = match frame {
                        Some(Ok(Message::Text(text))) => {
                            match connection.process_text(text.as_str()).await {
                                Ok(reply) => reply,
                                Err(e) => {
                                    debug!(%connection_id, "closing socket: {e}");
                                    break 'conn;
                                }
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            debug!(%connection_id, "closing socket: {}", FrameError::Binary);
                            break 'conn;
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            info!(%connection_id, "connection closed");
                            break 'conn;
                        }
                    };
                    if send_frame(&mut sender, &reply).await.is_err() {
                        break 'conn;
                    }
                }
                delivery = mailbox.recv() => {
                    let Some(message) = delivery else {
                        break 'conn;
                    };
                    if send_frame(&mut sender, &message).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }

    host.inner.mailboxes.remove(&connection_id);
    host.inner.fanout.drop_connection(&connection_id);
    log_offline(&connection_id);
}

async fn send_frame(
    sender: &mut (impl Sink<Message> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(message) else {
        return Err(());
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WsHostConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tessera_common::{
        InjectionKind, MethodReflection, ServerMetadata, TypeReflection, Value,
    };
    use tessera_server::{
        ApiBuilder, AuthData, ErrorRegistry, ItemMetadata, MemorySessionProvider,
    };

    fn test_connection(config: WsHostConfig) -> WsConnection {
        let mut builder = ApiBuilder::new();
        builder.method(
            "echo",
            MethodReflection::new(
                vec![TypeReflection::string()],
                Some(TypeReflection::string()),
            ),
            ItemMetadata::default(),
            |args| async move { Ok(Some(args[0].clone())) },
        );
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
                        ("newAuthData".to_string(), AuthData::for_user(user).to_value()),
                        ("response".to_string(), Value::Bool(true)),
                    ]
                    .into(),
                )))
            },
        );
        let sessions = Arc::new(MemorySessionProvider::default());
        let host = WsHost::new(
            builder.build(),
            ServerMetadata::default(),
            ErrorRegistry::new(),
            sessions,
            config,
        );
        let data = ConnectionData {
            auth: AuthData::default(),
            ip: "127.0.0.1".into(),
            session_id: None,
            connection_id: Some("ws-1".into()),
        };
        host.inner.fanout.register_connection("ws-1", data.clone());
        WsConnection::new(host, data)
    }

    #[tokio::test]
    async fn frames_round_trip_system_and_api_methods() {
        let mut connection = test_connection(WsHostConfig::default());

        let reply = connection.process_text(r#"[1, "_.ping"]"#).await.unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!(["r", 1, "pong"])
        );

        let reply = connection
            .process_text(r#"[2, "echo", ["hello"]]"#)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!(["r", 2, "hello"])
        );
    }

    #[tokio::test]
    async fn protocol_violations_close_instead_of_replying() {
        let mut connection = test_connection(WsHostConfig {
            max_message_length: 16,
            ..Default::default()
        });

        assert!(matches!(
            connection.process_text("not json").await,
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            connection.process_text(r#"{"an": "object"}"#).await,
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            connection
                .process_text(r#"[1, "echo", ["aaaaaaaaaaaaaaaa"]]"#)
                .await,
            Err(FrameError::Oversized { .. })
        ));
    }

    #[tokio::test]
    async fn auth_responses_update_the_live_connection() {
        let mut connection = test_connection(WsHostConfig::default());

        let reply = connection
            .process_text(r#"[3, "login", ["alice"]]"#)
            .await
            .unwrap();
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!(["r", 3, true]));
        assert_eq!(connection.data.auth.id.as_deref(), Some("alice"));
        assert_eq!(
            connection
                .host
                .inner
                .fanout
                .connection("ws-1")
                .unwrap()
                .auth
                .id
                .as_deref(),
            Some("alice")
        );
    }
}
