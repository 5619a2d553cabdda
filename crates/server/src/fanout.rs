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

//! The event fan-out engine.
//!
//! Owns the subscription tables and the connection registry, installs
//! listeners on every event handle in the api map, and resolves each fire
//! into concrete delivery targets. Resolved deliveries are pushed into an
//! unbounded channel; the transport host drains it and moves each message
//! onto the right connection.
//!
//! Plain subscriptions are a set of connection ids per event. Parametric
//! subscriptions are per-connection maps of subscription id to the
//! parameters the client subscribed with; each fire is compared against
//! every recorded parameter set through the event's comparer.

use crate::api::{ApiMap, FilterPolicy};
use crate::auth::{AuthData, ConnectionData, check_access};
use crate::events::Direction;
use crate::filter::{filter_in, filter_out};
use crate::log;
use crate::validate::validate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tessera_common::{ApiError, MAX_SAFE_INTEGER, ServerMessage, Value};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// One resolved delivery. `broadcast` means every live connection; the
/// host owns that list, so the target vector is empty in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEvent {
    pub connection_ids: Vec<String>,
    pub broadcast: bool,
    pub message: ServerMessage,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<String, ConnectionData>,
    plain: HashMap<String, HashSet<String>>,
    parametric: HashMap<String, HashMap<String, BTreeMap<i64, Value>>>,
    next_subscription_id: i64,
}

impl Tables {
    fn auth_of(&self, connection_id: &str) -> AuthData {
        self.connections
            .get(connection_id)
            .map(|c| c.auth.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct EventFanout {
    api: ApiMap,
    tables: Arc<Mutex<Tables>>,
    sink: UnboundedSender<OutgoingEvent>,
}

impl EventFanout {
    /// Wire up listeners on every event in the map. The receiver is the
    /// host's delivery queue.
    pub fn new(api: ApiMap) -> (Self, UnboundedReceiver<OutgoingEvent>) {
        let (sink, queue) = unbounded_channel();
        let tables = Arc::new(Mutex::new(Tables {
            next_subscription_id: 1,
            ..Default::default()
        }));

        for (name, entry) in api.events() {
            let name = name.to_string();
            let reflection = entry.reflection.clone();
            let broadcast = entry.metadata.broadcast;
            let policy = entry.metadata.effective_filter_policy();
            let tables = tables.clone();
            let sink = sink.clone();
            entry.handle.listen(move |data, direction| {
                let payload = match (&reflection.data, data) {
                    (Some(refl), Some(value)) => match outgoing_payload(value, refl, policy) {
                        Ok(json) => Some(json),
                        Err(e) => {
                            tracing::error!(event = %name, "dropping event, bad payload: {e}");
                            return;
                        }
                    },
                    _ => None,
                };

                let tables = tables.lock().unwrap();
                let (connection_ids, all) = match direction {
                    // Direction bypasses the subscription set: it matches
                    // live connection attributes, subscribed or not. A
                    // nonexistent target delivers to nobody.
                    Some(dir) => {
                        let targets = directed(tables.connections.iter(), dir);
                        if targets.is_empty() {
                            return;
                        }
                        (targets, false)
                    }
                    None if broadcast => (Vec::new(), true),
                    None => {
                        let Some(subscribed) = tables.plain.get(&name) else {
                            return;
                        };
                        if subscribed.is_empty() {
                            return;
                        }
                        (subscribed.iter().cloned().collect(), false)
                    }
                };

                log::event_fired(&name, connection_ids.len());
                let _ = sink.send(OutgoingEvent {
                    connection_ids,
                    broadcast: all,
                    message: ServerMessage::event(name.clone(), payload),
                });
            });
        }

        for (name, entry) in api.parametric_events() {
            let name = name.to_string();
            let reflection = entry.reflection.clone();
            let policy = entry.metadata.effective_filter_policy();
            let handle = entry.handle.clone();
            let tables = tables.clone();
            let sink = sink.clone();
            entry.handle.listen(move |fired, event_params| {
                let payload = match &reflection.data {
                    Some(refl) => match outgoing_payload(fired, refl, policy) {
                        Ok(json) => Some(json),
                        Err(e) => {
                            tracing::error!(event = %name, "dropping event, bad payload: {e}");
                            return;
                        }
                    },
                    None => None,
                };

                let tables = tables.lock().unwrap();
                let Some(subscribed) = tables.parametric.get(&name) else {
                    return;
                };
                let mut delivered = 0;
                for (connection_id, subscriptions) in subscribed {
                    for (subscription_id, params) in subscriptions {
                        if !handle.matches(params, fired, event_params) {
                            continue;
                        }
                        delivered += 1;
                        let _ = sink.send(OutgoingEvent {
                            connection_ids: vec![connection_id.clone()],
                            broadcast: false,
                            message: ServerMessage::Event {
                                event: name.clone(),
                                data: payload.clone(),
                                subscription_id: Some(*subscription_id),
                            },
                        });
                    }
                }
                log::event_fired(&name, delivered);
            });
        }

        (Self { api, tables, sink }, queue)
    }

    pub fn api(&self) -> &ApiMap {
        &self.api
    }

    /// Announce a connection. Replaces any previous registration under the
    /// same id.
    pub fn register_connection(&self, connection_id: &str, data: ConnectionData) {
        self.tables
            .lock()
            .unwrap()
            .connections
            .insert(connection_id.to_string(), data);
    }

    /// Swap the auth record after a login or logout on this connection.
    pub fn update_auth(&self, connection_id: &str, auth: AuthData) {
        if let Some(conn) = self
            .tables
            .lock()
            .unwrap()
            .connections
            .get_mut(connection_id)
        {
            conn.auth = auth;
        }
    }

    pub fn connection(&self, connection_id: &str) -> Option<ConnectionData> {
        self.tables
            .lock()
            .unwrap()
            .connections
            .get(connection_id)
            .cloned()
    }

    /// Forget a connection and every subscription it holds.
    pub fn drop_connection(&self, connection_id: &str) {
        let mut tables = self.tables.lock().unwrap();
        tables.connections.remove(connection_id);
        for subscribed in tables.plain.values_mut() {
            subscribed.remove(connection_id);
        }
        for subscribed in tables.parametric.values_mut() {
            subscribed.remove(connection_id);
        }
    }

    pub fn subscribe(&self, connection_id: &str, event: &str) -> Result<(), ApiError> {
        let entry = self
            .api
            .event(event)
            .ok_or_else(|| ApiError::request(format!("Event {event} not found")))?;
        let mut tables = self.tables.lock().unwrap();
        check_access(entry.metadata.groups.as_deref(), &tables.auth_of(connection_id))?;
        tables
            .plain
            .entry(event.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    /// Record a parametric subscription and return its id. Parameters are
    /// validated against the subscription reflection and then handed to the
    /// event's validator, if any.
    pub async fn subscribe_parametric(
        &self,
        connection_id: &str,
        event: &str,
        parameters: Option<&serde_json::Value>,
    ) -> Result<i64, ApiError> {
        let entry = self
            .api
            .parametric_event(event)
            .ok_or_else(|| ApiError::request(format!("Event {event} not found")))?;

        let connection = {
            let tables = self.tables.lock().unwrap();
            check_access(entry.metadata.groups.as_deref(), &tables.auth_of(connection_id))?;
            tables
                .connections
                .get(connection_id)
                .cloned()
                .unwrap_or_default()
        };

        validate(&entry.reflection.subscription, parameters, event, false)
            .map_err(ApiError::request)?;
        let params = filter_in(parameters, &entry.reflection.subscription);
        entry
            .handle
            .validate_subscription(params.clone(), connection)
            .await?;

        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_subscription_id;
        tables.next_subscription_id = if id >= MAX_SAFE_INTEGER {
            1
        } else {
            id + 1
        };
        tables
            .parametric
            .entry(event.to_string())
            .or_default()
            .entry(connection_id.to_string())
            .or_default()
            .insert(id, params);
        Ok(id)
    }

    /// Unsubscribing from something never subscribed to is not an error.
    pub fn unsubscribe(&self, connection_id: &str, event: &str) {
        if let Some(subscribed) = self.tables.lock().unwrap().plain.get_mut(event) {
            subscribed.remove(connection_id);
        }
    }

    /// Removes one recorded subscription. Unknown ids are not an error.
    pub fn unsubscribe_parametric(&self, connection_id: &str, event: &str, subscription_id: i64) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(subscriptions) = tables
            .parametric
            .get_mut(event)
            .and_then(|subscribed| subscribed.get_mut(connection_id))
        {
            subscriptions.remove(&subscription_id);
        }
    }

    #[cfg(test)]
    fn plain_subscribers(&self, event: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .plain
            .get(event)
            .map_or(0, |s| s.len())
    }
}

fn outgoing_payload(
    value: &Value,
    reflection: &tessera_common::TypeReflection,
    policy: FilterPolicy,
) -> Result<serde_json::Value, String> {
    match policy {
        FilterPolicy::None => Ok(value.to_json()),
        _ => filter_out(value, reflection, policy),
    }
}

fn directed<'a, I>(connections: I, direction: &Direction) -> Vec<String>
where
    I: Iterator<Item = (&'a String, &'a ConnectionData)>,
{
    connections
        .filter(|(_, conn)| match direction {
            Direction::User(user_id) => conn.auth.id.as_deref() == Some(user_id),
            Direction::Group(group) => conn.auth.in_group(group),
            Direction::Session(session_id) => conn.session_id.as_deref() == Some(session_id),
            Direction::Connection(connection_id) => {
                conn.connection_id.as_deref() == Some(connection_id)
            }
        })
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiBuilder, ItemMetadata};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tessera_common::{EventReflection, ParametricEventReflection, TypeReflection};

    fn connection(id: &str, user: Option<&str>) -> ConnectionData {
        ConnectionData {
            auth: user.map(AuthData::for_user).unwrap_or_default(),
            ip: "127.0.0.1".into(),
            session_id: Some(format!("sess-{id}")),
            connection_id: Some(id.to_string()),
        }
    }

    fn chat_api() -> (ApiMap, crate::events::Event) {
        let mut builder = ApiBuilder::new();
        let message = builder.event(
            "chat.message",
            EventReflection {
                data: Some(TypeReflection::string()),
            },
            ItemMetadata::default(),
        );
        (builder.build(), message)
    }

    #[tokio::test]
    async fn fired_events_reach_only_subscribers() {
        let (api, message) = chat_api();
        let (fanout, mut queue) = EventFanout::new(api);
        fanout.register_connection("c1", connection("c1", Some("u1")));
        fanout.register_connection("c2", connection("c2", None));
        fanout.subscribe("c1", "chat.message").unwrap();

        message.fire(Some(Value::String("hi".into())));

        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.connection_ids, vec!["c1".to_string()]);
        assert!(!delivery.broadcast);
        assert_eq!(
            delivery.message,
            ServerMessage::event("chat.message", Some(json!("hi")))
        );
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn directed_fire_matches_connection_attributes() {
        let (api, message) = chat_api();
        let (fanout, mut queue) = EventFanout::new(api);
        fanout.register_connection("c1", connection("c1", Some("u1")));
        fanout.register_connection("c2", connection("c2", Some("u2")));
        fanout.subscribe("c1", "chat.message").unwrap();
        fanout.subscribe("c2", "chat.message").unwrap();

        message.fire_for_user("u2", Some(Value::String("psst".into())));

        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.connection_ids, vec!["c2".to_string()]);
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn directed_fire_bypasses_the_subscription_set() {
        let (api, message) = chat_api();
        let (fanout, mut queue) = EventFanout::new(api);
        fanout.register_connection("c1", connection("c1", Some("u1")));

        // u1 never subscribed; the direction targets it anyway.
        message.fire_for_user("u1", Some(Value::String("direct".into())));

        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.connection_ids, vec!["c1".to_string()]);
        assert_eq!(
            delivery.message,
            ServerMessage::event("chat.message", Some(json!("direct")))
        );

        message.fire_for_session("sess-c1", Some(Value::String("by session".into())));
        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.connection_ids, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn directed_fire_at_a_nonexistent_target_is_a_silent_noop() {
        let (api, message) = chat_api();
        let (fanout, mut queue) = EventFanout::new(api);
        fanout.register_connection("c1", connection("c1", Some("u1")));
        fanout.subscribe("c1", "chat.message").unwrap();

        message.fire_for_user("nobody", Some(Value::String("lost".into())));
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_events_need_no_subscription() {
        let mut builder = ApiBuilder::new();
        let announce = builder.event(
            "announce",
            EventReflection::default(),
            ItemMetadata::default().broadcast(),
        );
        let (fanout, mut queue) = EventFanout::new(builder.build());
        fanout.register_connection("c1", connection("c1", None));

        announce.fire(None);

        let delivery = queue.recv().await.unwrap();
        assert!(delivery.broadcast);
        assert!(delivery.connection_ids.is_empty());
        assert_eq!(delivery.message, ServerMessage::event("announce", None));
    }

    #[tokio::test]
    async fn parametric_delivery_is_per_matching_subscription() {
        let mut builder = ApiBuilder::new();
        let ticker = builder.parametric_event(
            "ticker",
            ParametricEventReflection {
                data: Some(TypeReflection::string()),
                subscription: TypeReflection::string(),
                parameters: None,
            },
            ItemMetadata::default(),
            Arc::new(|params, fired, _| params.as_str() == fired.as_str()),
            None,
        );
        let (fanout, mut queue) = EventFanout::new(builder.build());
        fanout.register_connection("c1", connection("c1", Some("u1")));
        fanout.register_connection("c2", connection("c2", Some("u2")));

        let sub_a = fanout
            .subscribe_parametric("c1", "ticker", Some(&json!("AAA")))
            .await
            .unwrap();
        fanout
            .subscribe_parametric("c2", "ticker", Some(&json!("BBB")))
            .await
            .unwrap();

        ticker.fire(Value::String("AAA".into()));

        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.connection_ids, vec!["c1".to_string()]);
        assert_eq!(
            delivery.message,
            ServerMessage::Event {
                event: "ticker".into(),
                data: Some(json!("AAA")),
                subscription_id: Some(sub_a),
            }
        );
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_subscription_parameters_are_rejected() {
        let mut builder = ApiBuilder::new();
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
        fanout.register_connection("c1", connection("c1", None));

        let err = fanout
            .subscribe_parametric("c1", "ticker", Some(&json!(42)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RequestError");
    }

    #[tokio::test]
    async fn dropping_a_connection_clears_its_subscriptions() {
        let (api, message) = chat_api();
        let (fanout, mut queue) = EventFanout::new(api);
        fanout.register_connection("c1", connection("c1", None));
        fanout.subscribe("c1", "chat.message").unwrap();
        assert_eq!(fanout.plain_subscribers("chat.message"), 1);

        fanout.drop_connection("c1");
        assert_eq!(fanout.plain_subscribers("chat.message"), 0);
        message.fire(Some(Value::String("gone".into())));
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_gated_events_refuse_outsiders() {
        let mut builder = ApiBuilder::new();
        builder.event(
            "admin.alert",
            EventReflection::default(),
            ItemMetadata::default().with_groups(["admin"]),
        );
        let (fanout, _queue) = EventFanout::new(builder.build());
        fanout.register_connection("c1", connection("c1", Some("u1")));

        let err = fanout.subscribe("c1", "admin.alert").unwrap_err();
        assert_eq!(err.code(), "AccessDeniedError");
    }
}
