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

//! Per-connection state for the long-poll transport: the pending message
//! queue and the held poll, if any.
//!
//! Pending queues are unbounded. A client that subscribes and then stops
//! polling accumulates messages until the reaper drops the connection at
//! the end of its lifetime; that window is capped by `connection_lifetime`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tessera_common::{MAX_SAFE_INTEGER, ServerMessage};
use tessera_server::ConnectionData;
use tokio::sync::oneshot;

struct ConnectionState {
    data: ConnectionData,
    pending: Vec<ServerMessage>,
    waiter: Option<oneshot::Sender<Vec<ServerMessage>>>,
    last_seen: Instant,
}

/// Outcome of a poll request: either messages ready right now, or a
/// receiver the event router will complete.
pub enum Poll {
    Ready(Vec<ServerMessage>),
    Wait(oneshot::Receiver<Vec<ServerMessage>>),
}

#[derive(Clone, Default)]
pub struct Connections {
    inner: Arc<Mutex<HashMap<String, ConnectionState>>>,
    next_id: Arc<AtomicI64>,
}

impl Connections {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Mint a connection id and record the connection.
    pub fn create(&self, mut data: ConnectionData) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id >= MAX_SAFE_INTEGER {
            self.next_id.store(1, Ordering::Relaxed);
        }
        let id = id.to_string();
        data.connection_id = Some(id.clone());
        self.inner.lock().unwrap().insert(
            id.clone(),
            ConnectionState {
                data,
                pending: Vec::new(),
                waiter: None,
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Refresh the idle clock; `None` when the connection is unknown
    /// (reaped, or the cookie is stale).
    pub fn touch(&self, id: &str) -> Option<ConnectionData> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.get_mut(id)?;
        state.last_seen = Instant::now();
        Some(state.data.clone())
    }

    /// Ids of every connection belonging to a session.
    pub fn session_connections(&self, session_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.data.session_id.as_deref() == Some(session_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn update_auth(&self, id: &str, auth: tessera_server::AuthData) {
        if let Some(state) = self.inner.lock().unwrap().get_mut(id) {
            state.data.auth = auth;
        }
    }

    /// Queue a message; a held poll is completed immediately with
    /// everything pending.
    pub fn push(&self, id: &str, message: ServerMessage) {
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.get_mut(id) else {
            return;
        };
        state.pending.push(message);
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(std::mem::take(&mut state.pending));
        }
    }

    pub fn push_all(&self, message: &ServerMessage) {
        let mut inner = self.inner.lock().unwrap();
        for state in inner.values_mut() {
            state.pending.push(message.clone());
            if let Some(waiter) = state.waiter.take() {
                let _ = waiter.send(std::mem::take(&mut state.pending));
            }
        }
    }

    /// Begin a poll. An already-held poll is displaced and answered empty;
    /// only the newest poll per connection stays open.
    pub fn poll(&self, id: &str) -> Option<Poll> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.get_mut(id)?;
        state.last_seen = Instant::now();
        if let Some(stale) = state.waiter.take() {
            let _ = stale.send(Vec::new());
        }
        if !state.pending.is_empty() {
            return Some(Poll::Ready(std::mem::take(&mut state.pending)));
        }
        let (tx, rx) = oneshot::channel();
        state.waiter = Some(tx);
        Some(Poll::Wait(rx))
    }

    /// Drop the held poll without answering it, after a request-side
    /// timeout. Any messages that raced in are returned.
    pub fn end_poll(&self, id: &str) -> Vec<ServerMessage> {
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.get_mut(id) else {
            return Vec::new();
        };
        state.waiter = None;
        std::mem::take(&mut state.pending)
    }

    /// Remove connections idle past their allowance and return them.
    /// A held poll keeps a connection alive only for the poll window.
    pub fn reap(&self, lifetime: Duration, polling_wait: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let dead: Vec<String> = inner
            .iter()
            .filter(|(_, s)| {
                let allowance = if s.waiter.is_some() {
                    polling_wait
                } else {
                    lifetime
                };
                now.duration_since(s.last_seen) > allowance
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            if let Some(mut state) = inner.remove(id)
                && let Some(waiter) = state.waiter.take()
            {
                let _ = waiter.send(Vec::new());
            }
        }
        dead
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connection(session: &str) -> ConnectionData {
        ConnectionData {
            session_id: Some(session.to_string()),
            ip: "127.0.0.1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn push_before_poll_is_returned_immediately() {
        let connections = Connections::new();
        let id = connections.create(connection("s1"));
        connections.push(&id, ServerMessage::event("tick", None));

        match connections.poll(&id).unwrap() {
            Poll::Ready(messages) => {
                assert_eq!(messages, vec![ServerMessage::event("tick", None)]);
            }
            Poll::Wait(_) => panic!("expected pending messages"),
        }
    }

    #[tokio::test]
    async fn push_completes_a_held_poll() {
        let connections = Connections::new();
        let id = connections.create(connection("s1"));
        let Some(Poll::Wait(rx)) = connections.poll(&id) else {
            panic!("expected a held poll");
        };
        connections.push(&id, ServerMessage::event("tick", None));
        assert_eq!(rx.await.unwrap(), vec![ServerMessage::event("tick", None)]);
    }

    #[tokio::test]
    async fn a_new_poll_displaces_the_old_one() {
        let connections = Connections::new();
        let id = connections.create(connection("s1"));
        let Some(Poll::Wait(old)) = connections.poll(&id) else {
            panic!("expected a held poll");
        };
        let Some(Poll::Wait(_new)) = connections.poll(&id) else {
            panic!("expected a held poll");
        };
        assert_eq!(old.await.unwrap(), Vec::new());
    }

    #[test]
    fn reaper_distinguishes_polling_from_idle() {
        let connections = Connections::new();
        let idle = connections.create(connection("s1"));
        let polling = connections.create(connection("s2"));
        let _held = connections.poll(&polling);

        // Nothing has aged past a generous allowance.
        assert_eq!(
            connections.reap(Duration::from_secs(60), Duration::from_secs(60)),
            Vec::<String>::new()
        );

        // With zero allowances both go, the held poll answered empty.
        let mut dead = connections.reap(Duration::ZERO, Duration::ZERO);
        dead.sort();
        let mut expected = vec![idle, polling];
        expected.sort();
        assert_eq!(dead, expected);
        assert!(connections.is_empty());
    }

    #[test]
    fn session_connections_finds_siblings() {
        let connections = Connections::new();
        let a = connections.create(connection("shared"));
        let b = connections.create(connection("shared"));
        let _other = connections.create(connection("lone"));

        let mut found = connections.session_connections("shared");
        found.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(found, expected);
    }
}
