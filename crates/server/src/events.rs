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

//! Event handles the application fires on.
//!
//! An [`Event`] is a cheap clonable handle the api builder returns to the
//! application; firing it notifies whatever listeners the fan-out engine
//! installed. The handle knows nothing about connections or transports,
//! only about data and an optional delivery direction.

use crate::auth::ConnectionData;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tessera_common::{ApiError, Value};

/// Narrows delivery of a fired event to a slice of the connected population.
/// Absent a direction, the event goes to every subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Every connection whose auth record carries this user id.
    User(String),
    /// Every connection whose auth record carries this group.
    Group(String),
    /// Every connection sharing this session id.
    Session(String),
    /// Exactly this connection.
    Connection(String),
}

type Listener = Arc<dyn Fn(Option<&Value>, Option<&Direction>) + Send + Sync>;

/// A plain (or broadcast) event handle.
#[derive(Clone, Default)]
pub struct Event {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire toward every subscriber.
    pub fn fire(&self, data: Option<Value>) {
        self.dispatch(data.as_ref(), None);
    }

    pub fn fire_for_user(&self, user_id: impl Into<String>, data: Option<Value>) {
        self.dispatch(data.as_ref(), Some(&Direction::User(user_id.into())));
    }

    pub fn fire_for_group(&self, group: impl Into<String>, data: Option<Value>) {
        self.dispatch(data.as_ref(), Some(&Direction::Group(group.into())));
    }

    pub fn fire_for_session(&self, session_id: impl Into<String>, data: Option<Value>) {
        self.dispatch(data.as_ref(), Some(&Direction::Session(session_id.into())));
    }

    pub fn fire_for_connection(&self, connection_id: impl Into<String>, data: Option<Value>) {
        self.dispatch(data.as_ref(), Some(&Direction::Connection(connection_id.into())));
    }

    fn dispatch(&self, data: Option<&Value>, direction: Option<&Direction>) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(data, direction);
        }
    }

    pub(crate) fn listen<F>(&self, listener: F)
    where
        F: Fn(Option<&Value>, Option<&Direction>) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.listeners.lock().unwrap().len())
            .finish()
    }
}

/// Decides whether a subscription's parameters match a fired payload.
/// Arguments: the parameters the client subscribed with, the data the event
/// fired with, and the fire-time event parameters (if any). Event parameters
/// are seen only by the comparer, never by the client.
pub type ParametricComparer = Arc<dyn Fn(&Value, &Value, Option<&Value>) -> bool + Send + Sync>;

/// Optional application hook run at subscription time. Rejecting returns
/// the error to the subscribing client and records nothing.
pub type SubscriptionValidator =
    Arc<dyn Fn(Value, ConnectionData) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

type ParametricListener = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;

/// A parametric event handle. Delivery is per subscription, not per
/// connection: each fire is compared against every recorded parameter set.
#[derive(Clone)]
pub struct ParametricEvent {
    comparer: ParametricComparer,
    validator: Option<SubscriptionValidator>,
    listeners: Arc<Mutex<Vec<ParametricListener>>>,
}

impl ParametricEvent {
    pub fn new(comparer: ParametricComparer, validator: Option<SubscriptionValidator>) -> Self {
        Self {
            comparer,
            validator,
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fire with a payload; the fan-out engine matches it against recorded
    /// subscription parameters via the comparer.
    pub fn fire(&self, data: Value) {
        self.dispatch(&data, None);
    }

    /// Fire with separate event parameters for the comparer. The parameters
    /// are not delivered to clients.
    pub fn fire_with_params(&self, data: Value, event_params: Value) {
        self.dispatch(&data, Some(&event_params));
    }

    fn dispatch(&self, data: &Value, event_params: Option<&Value>) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(data, event_params);
        }
    }

    pub(crate) fn matches(
        &self,
        subscription_params: &Value,
        fired: &Value,
        event_params: Option<&Value>,
    ) -> bool {
        (self.comparer)(subscription_params, fired, event_params)
    }

    pub(crate) async fn validate_subscription(
        &self,
        params: Value,
        connection: ConnectionData,
    ) -> Result<(), ApiError> {
        match &self.validator {
            Some(validator) => validator(params, connection).await,
            None => Ok(()),
        }
    }

    pub(crate) fn listen<F>(&self, listener: F)
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }
}

impl std::fmt::Debug for ParametricEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParametricEvent")
            .field("listeners", &self.listeners.lock().unwrap().len())
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fire_reaches_every_listener_with_direction() {
        let event = Event::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            event.listen(move |data, direction| {
                seen.lock()
                    .unwrap()
                    .push((data.cloned(), direction.cloned()));
            });
        }
        event.fire_for_user("u1", Some(Value::Number(5.0)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            (
                Some(Value::Number(5.0)),
                Some(Direction::User("u1".into()))
            )
        );
    }

    #[test]
    fn comparer_gates_parametric_matches() {
        let event = ParametricEvent::new(
            Arc::new(|params, fired, _| params.as_str() == fired.as_str()),
            None,
        );
        assert!(event.matches(&Value::String("a".into()), &Value::String("a".into()), None));
        assert!(!event.matches(&Value::String("a".into()), &Value::String("b".into()), None));
    }

    #[test]
    fn event_params_reach_only_the_comparer() {
        let event = ParametricEvent::new(
            Arc::new(|params, _fired, event_params| {
                event_params.and_then(Value::as_str) == params.as_str()
            }),
            None,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            event.listen(move |data, event_params| {
                seen.lock()
                    .unwrap()
                    .push((data.clone(), event_params.cloned()));
            });
        }
        event.fire_with_params(Value::Number(1.0), Value::String("room-7".into()));

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (Value::Number(1.0), Some(Value::String("room-7".into())))
        );
        assert!(event.matches(
            &Value::String("room-7".into()),
            &Value::Number(1.0),
            seen[0].1.as_ref()
        ));
    }

    #[tokio::test]
    async fn validator_can_reject_a_subscription() {
        let event = ParametricEvent::new(
            Arc::new(|_, _, _| true),
            Some(Arc::new(|params, _conn| {
                Box::pin(async move {
                    if params.as_str() == Some("secret") {
                        Err(ApiError::access_denied())
                    } else {
                        Ok(())
                    }
                })
            })),
        );
        let conn = ConnectionData::default();
        assert!(
            event
                .validate_subscription(Value::String("open".into()), conn.clone())
                .await
                .is_ok()
        );
        assert!(
            event
                .validate_subscription(Value::String("secret".into()), conn)
                .await
                .is_err()
        );
    }
}
