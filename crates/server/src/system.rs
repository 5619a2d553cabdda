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

//! The `_.` system method namespace, shared by every transport host.
//!
//! `_.ping` liveness, `_.v` and `_.meta` handshake, `_.sub` and `_.unsub`
//! subscription management. `_.polling` is transport-specific and handled
//! by the long-poll host before messages reach here.

use crate::fanout::EventFanout;
use crate::registry::ErrorRegistry;
use tessera_common::{ApiError, ClientMessage, ServerMessage, ServerMetadata};

pub struct SystemHandler {
    fanout: EventFanout,
    metadata: ServerMetadata,
    registry: ErrorRegistry,
}

impl SystemHandler {
    pub fn new(fanout: EventFanout, metadata: ServerMetadata, registry: ErrorRegistry) -> Self {
        Self {
            fanout,
            metadata,
            registry,
        }
    }

    /// Handle one `_.` message. Always produces a reply.
    pub async fn handle(&self, connection_id: &str, message: &ClientMessage) -> ServerMessage {
        match self.run(connection_id, message).await {
            Ok(result) => ServerMessage::response(message.request_id, result),
            Err(error) => self.registry.response_from_error(
                &message.method,
                None,
                message.request_id,
                &error,
            ),
        }
    }

    async fn run(
        &self,
        connection_id: &str,
        message: &ClientMessage,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        match message.method.as_str() {
            "_.ping" => Ok(Some(serde_json::Value::String("pong".into()))),
            "_.v" => Ok(Some(serde_json::Value::String(
                self.metadata.version.clone(),
            ))),
            "_.meta" => Ok(Some(self.meta())),
            "_.sub" => {
                let target = SubscriptionTarget::parse(message.data.as_ref())?;
                if self.fanout.api().has_event(&target.event) {
                    self.fanout.subscribe(connection_id, &target.event)?;
                    Ok(None)
                } else {
                    let id = self
                        .fanout
                        .subscribe_parametric(
                            connection_id,
                            &target.event,
                            target.parameters.as_ref(),
                        )
                        .await?;
                    Ok(Some(serde_json::Value::from(id)))
                }
            }
            "_.unsub" => {
                let target = SubscriptionTarget::parse(message.data.as_ref())?;
                if self.fanout.api().has_parametric_event(&target.event) {
                    let id = target
                        .subscription_id
                        .ok_or_else(|| ApiError::request("Bad unsubscription data"))?;
                    self.fanout
                        .unsubscribe_parametric(connection_id, &target.event, id);
                } else {
                    self.fanout.unsubscribe(connection_id, &target.event);
                }
                Ok(None)
            }
            other => Err(ApiError::request(format!("Method {other} not found"))),
        }
    }

    fn meta(&self) -> serde_json::Value {
        let mut metadata = self.metadata.clone();
        metadata.broadcast_events = Some(self.fanout.api().broadcast_events());
        let mut json = serde_json::to_value(&metadata).unwrap_or_default();
        if let (serde_json::Value::Object(map), Ok(api)) =
            (&mut json, serde_json::to_value(self.fanout.api().reflection()))
        {
            map.insert("api".into(), api);
        }
        json
    }
}

/// The payload of `_.sub` and `_.unsub`: a bare `{event, parameters?}` or
/// `{event, subscriptionId?}` object. A single-element array wrapping the
/// object is tolerated for clients that batch it like method arguments.
struct SubscriptionTarget {
    event: String,
    parameters: Option<serde_json::Value>,
    subscription_id: Option<i64>,
}

impl SubscriptionTarget {
    fn parse(data: Option<&serde_json::Value>) -> Result<Self, ApiError> {
        let bad = || ApiError::request("Bad subscription data");
        let entry = match data.ok_or_else(bad)? {
            serde_json::Value::Object(entry) => entry,
            serde_json::Value::Array(items) if items.len() == 1 => {
                items[0].as_object().ok_or_else(bad)?
            }
            _ => return Err(bad()),
        };
        let event = entry
            .get("event")
            .and_then(|e| e.as_str())
            .ok_or_else(bad)?
            .to_string();
        Ok(Self {
            event,
            parameters: entry.get("parameters").cloned(),
            subscription_id: entry.get("subscriptionId").and_then(|v| v.as_i64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiBuilder, ItemMetadata};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tessera_common::{EventReflection, ParametricEventReflection, TypeReflection};

    fn handler() -> SystemHandler {
        let mut builder = ApiBuilder::new();
        builder.event(
            "chat.message",
            EventReflection::default(),
            ItemMetadata::default(),
        );
        builder.event(
            "announce",
            EventReflection::default(),
            ItemMetadata::default().broadcast(),
        );
        builder.parametric_event(
            "ticker",
            ParametricEventReflection {
                data: None,
                subscription: TypeReflection::string(),
                parameters: None,
            },
            ItemMetadata::default(),
            Arc::new(|_, _, _| true),
            None,
        );
        let (fanout, _queue) = EventFanout::new(builder.build());
        fanout.register_connection("c1", Default::default());
        SystemHandler::new(fanout, ServerMetadata::default(), ErrorRegistry::new())
    }

    #[tokio::test]
    async fn ping_pongs() {
        let h = handler();
        let reply = h.handle("c1", &ClientMessage::new(1, "_.ping", None)).await;
        assert_eq!(reply, ServerMessage::response(1, Some(json!("pong"))));
    }

    #[tokio::test]
    async fn meta_lists_broadcast_events_and_reflection() {
        let h = handler();
        let reply = h.handle("c1", &ClientMessage::new(1, "_.meta", None)).await;
        let ServerMessage::Response {
            result: Some(meta), ..
        } = reply
        else {
            panic!("expected response");
        };
        assert_eq!(meta["broadcastEvents"], json!(["announce"]));
        assert!(meta["api"]["events"].get("chat.message").is_none());
        assert!(meta["api"]["children"]["chat"]["events"].get("message").is_some());
    }

    #[tokio::test]
    async fn sub_routes_plain_and_parametric() {
        let h = handler();
        let reply = h
            .handle(
                "c1",
                &ClientMessage::new(1, "_.sub", Some(json!({"event": "chat.message"}))),
            )
            .await;
        assert_eq!(reply, ServerMessage::response(1, None));

        let reply = h
            .handle(
                "c1",
                &ClientMessage::new(
                    2,
                    "_.sub",
                    Some(json!({"event": "ticker", "parameters": "AAA"})),
                ),
            )
            .await;
        assert_eq!(reply, ServerMessage::response(2, Some(json!(1))));

        let reply = h
            .handle(
                "c1",
                &ClientMessage::new(
                    3,
                    "_.unsub",
                    Some(json!({"event": "ticker", "subscriptionId": 1})),
                ),
            )
            .await;
        assert_eq!(reply, ServerMessage::response(3, None));
    }

    #[tokio::test]
    async fn sub_tolerates_an_array_wrapped_target() {
        let h = handler();
        let reply = h
            .handle(
                "c1",
                &ClientMessage::new(1, "_.sub", Some(json!([{"event": "chat.message"}]))),
            )
            .await;
        assert_eq!(reply, ServerMessage::response(1, None));
    }

    #[tokio::test]
    async fn parametric_unsub_without_an_id_is_rejected() {
        let h = handler();
        h.handle(
            "c1",
            &ClientMessage::new(
                1,
                "_.sub",
                Some(json!({"event": "ticker", "parameters": "AAA"})),
            ),
        )
        .await;

        let reply = h
            .handle(
                "c1",
                &ClientMessage::new(2, "_.unsub", Some(json!({"event": "ticker"}))),
            )
            .await;
        assert_eq!(
            reply,
            ServerMessage::Error {
                request_id: 2,
                code: "RequestError".into(),
                data: json!("Bad unsubscription data"),
            }
        );
    }

    #[tokio::test]
    async fn unknown_events_and_methods_are_request_errors() {
        let h = handler();
        let reply = h
            .handle(
                "c1",
                &ClientMessage::new(1, "_.sub", Some(json!({"event": "nope"}))),
            )
            .await;
        assert_eq!(
            reply,
            ServerMessage::Error {
                request_id: 1,
                code: "RequestError".into(),
                data: json!("Event nope not found"),
            }
        );

        let reply = h.handle("c1", &ClientMessage::new(2, "_.zap", None)).await;
        assert!(matches!(
            reply,
            ServerMessage::Error { ref code, .. } if code == "RequestError"
        ));
    }
}
