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

//! The wire envelope: positional JSON arrays exchanged between client and
//! server.
//!
//! A client sends one or more `[requestId, method, data?]` tuples per
//! request; the server replies with an array of server messages, one per
//! input message plus optional `sys` messages:
//!
//! - `["r", requestId, result?]` — method response
//! - `["er", requestId, errorCode, errorData]` — error response
//! - `["ev", eventName, data?, subscriptionId?]` — event delivery
//! - `["sys", {setSessionId?, setConnectionId?}]` — session negotiation

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// A single request tuple from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub request_id: i64,
    pub method: String,
    pub data: Option<serde_json::Value>,
}

impl ClientMessage {
    pub fn new(request_id: i64, method: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            request_id,
            method: method.into(),
            data,
        }
    }

    /// System methods are namespaced with the `_.` prefix and never reach
    /// the api map.
    pub fn is_system(&self) -> bool {
        self.method.starts_with(crate::SYSTEM_PREFIX)
    }
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.data.is_some() { 3 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.request_id)?;
        seq.serialize_element(&self.method)?;
        if let Some(data) = &self.data {
            seq.serialize_element(data)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ClientMessageVisitor;

        impl<'de> Visitor<'de> for ClientMessageVisitor {
            type Value = ClientMessage;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [requestId, method, data?] tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let request_id: i64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let method: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let data: Option<serde_json::Value> = seq.next_element()?;
                if seq.next_element::<serde_json::Value>()?.is_some() {
                    return Err(de::Error::custom("client message tuple too long"));
                }
                Ok(ClientMessage {
                    request_id,
                    method,
                    data,
                })
            }
        }

        deserializer.deserialize_seq(ClientMessageVisitor)
    }
}

/// Payload of a `sys` message. Extra keys are passed through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_connection_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SystemPayload {
    pub fn set_session_id(id: impl Into<String>) -> Self {
        Self {
            set_session_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn set_connection_id(id: impl Into<String>) -> Self {
        Self {
            set_connection_id: Some(id.into()),
            ..Default::default()
        }
    }
}

/// A single reply tuple from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `["r", requestId, result?]`
    Response {
        request_id: i64,
        result: Option<serde_json::Value>,
    },
    /// `["er", requestId, errorCode, errorData]`
    Error {
        request_id: i64,
        code: String,
        data: serde_json::Value,
    },
    /// `["ev", eventName, data?, subscriptionId?]`
    Event {
        event: String,
        data: Option<serde_json::Value>,
        subscription_id: Option<i64>,
    },
    /// `["sys", {...}]`
    System(SystemPayload),
}

impl ServerMessage {
    pub fn response(request_id: i64, result: Option<serde_json::Value>) -> Self {
        ServerMessage::Response { request_id, result }
    }

    pub fn event(event: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        ServerMessage::Event {
            event: event.into(),
            data,
            subscription_id: None,
        }
    }
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerMessage::Response { request_id, result } => {
                let len = if result.is_some() { 3 } else { 2 };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element("r")?;
                seq.serialize_element(request_id)?;
                if let Some(result) = result {
                    seq.serialize_element(result)?;
                }
                seq.end()
            }
            ServerMessage::Error {
                request_id,
                code,
                data,
            } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("er")?;
                seq.serialize_element(request_id)?;
                seq.serialize_element(code)?;
                seq.serialize_element(data)?;
                seq.end()
            }
            ServerMessage::Event {
                event,
                data,
                subscription_id,
            } => {
                // A subscription id forces the data slot to be present.
                let len = match (data, subscription_id) {
                    (_, Some(_)) => 4,
                    (Some(_), None) => 3,
                    (None, None) => 2,
                };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element("ev")?;
                seq.serialize_element(event)?;
                if len > 2 {
                    seq.serialize_element(data.as_ref().unwrap_or(&serde_json::Value::Null))?;
                }
                if let Some(id) = subscription_id {
                    seq.serialize_element(id)?;
                }
                seq.end()
            }
            ServerMessage::System(payload) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("sys")?;
                seq.serialize_element(payload)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ServerMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
        let tag = raw
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| de::Error::custom("server message missing tag"))?;
        let get = |i: usize| raw.get(i).cloned();
        match tag {
            "r" => {
                let request_id = get(1)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| de::Error::custom("response missing request id"))?;
                Ok(ServerMessage::Response {
                    request_id,
                    result: get(2),
                })
            }
            "er" => {
                let request_id = get(1)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| de::Error::custom("error missing request id"))?;
                let code = get(2)
                    .and_then(|v| v.as_str().map(String::from))
                    .ok_or_else(|| de::Error::custom("error missing code"))?;
                Ok(ServerMessage::Error {
                    request_id,
                    code,
                    data: get(3).unwrap_or(serde_json::Value::Null),
                })
            }
            "ev" => {
                let event = get(1)
                    .and_then(|v| v.as_str().map(String::from))
                    .ok_or_else(|| de::Error::custom("event missing name"))?;
                Ok(ServerMessage::Event {
                    event,
                    data: get(2),
                    subscription_id: get(3).and_then(|v| v.as_i64()),
                })
            }
            "sys" => {
                let payload = get(1).ok_or_else(|| de::Error::custom("sys missing payload"))?;
                let payload = SystemPayload::deserialize(payload).map_err(de::Error::custom)?;
                Ok(ServerMessage::System(payload))
            }
            other => Err(de::Error::custom(format!("unknown message tag: {other}"))),
        }
    }
}

/// Transport-fatal envelope failures. These terminate the connection or
/// request instead of producing per-message error replies.
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("empty message batch")]
    Empty,
    #[error("message exceeds size limit ({size} > {limit})")]
    Oversized { size: usize, limit: usize },
}

/// Parse a request body into client messages, enforcing the size limit and
/// the envelope shape.
pub fn parse_client_batch(body: &str, max_len: usize) -> Result<Vec<ClientMessage>, EnvelopeError> {
    if body.len() > max_len {
        return Err(EnvelopeError::Oversized {
            size: body.len(),
            limit: max_len,
        });
    }
    let batch: Vec<ClientMessage> =
        serde_json::from_str(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
    if batch.is_empty() {
        return Err(EnvelopeError::Empty);
    }
    Ok(batch)
}
