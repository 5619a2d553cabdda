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

//! The WebSocket host: one upgrade endpoint, one task per socket.
//!
//! Unlike the long-poll host there is no connection table to reap; the
//! socket is the connection, and its close drops the subscriptions
//! immediately. Sessions still ride on a cookie so a reconnecting browser
//! keeps its identity.

use crate::config::WsHostConfig;
use crate::connection;
use axum::{
    Router,
    extract::{ConnectInfo, State, WebSocketUpgrade, rejection::ExtensionRejection},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tessera_common::{ServerMessage, ServerMetadata};
use tessera_server::{
    ApiMap, AuthData, ConnectionData, Dispatcher, ErrorRegistry, EventFanout, OutgoingEvent,
    Session, SessionProvider, SystemHandler, log_login, log_logout,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};
use uuid::Uuid;

struct MailboxEntry {
    sender: UnboundedSender<ServerMessage>,
    session_id: Option<String>,
}

/// Live sockets, addressable by connection id for directed fan-out.
#[derive(Clone, Default)]
pub(crate) struct Mailboxes {
    inner: Arc<Mutex<HashMap<String, MailboxEntry>>>,
}

impl Mailboxes {
    pub(crate) fn insert(
        &self,
        connection_id: &str,
        session_id: Option<String>,
    ) -> UnboundedReceiver<ServerMessage> {
        let (sender, receiver) = unbounded_channel();
        self.inner.lock().unwrap().insert(
            connection_id.to_string(),
            MailboxEntry { sender, session_id },
        );
        receiver
    }

    pub(crate) fn remove(&self, connection_id: &str) {
        self.inner.lock().unwrap().remove(connection_id);
    }

    pub(crate) fn send(&self, connection_id: &str, message: ServerMessage) {
        if let Some(entry) = self.inner.lock().unwrap().get(connection_id) {
            let _ = entry.sender.send(message);
        }
    }

    pub(crate) fn send_all(&self, message: &ServerMessage) {
        for entry in self.inner.lock().unwrap().values() {
            let _ = entry.sender.send(message.clone());
        }
    }

    pub(crate) fn session_connections(&self, session_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.session_id.as_deref() == Some(session_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

pub(crate) struct Inner {
    pub(crate) config: WsHostConfig,
    pub(crate) fanout: EventFanout,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) system: SystemHandler,
    pub(crate) sessions: Arc<dyn SessionProvider>,
    pub(crate) mailboxes: Mailboxes,
}

#[derive(Clone)]
pub struct WsHost {
    pub(crate) inner: Arc<Inner>,
}

impl WsHost {
    /// Build the host and start its event-router and status tasks. Must be
    /// called within a tokio runtime.
    pub fn new(
        api: ApiMap,
        metadata: ServerMetadata,
        registry: ErrorRegistry,
        sessions: Arc<dyn SessionProvider>,
        config: WsHostConfig,
    ) -> Self {
        let (fanout, events) = EventFanout::new(api.clone());
        let host = Self {
            inner: Arc::new(Inner {
                config,
                fanout: fanout.clone(),
                dispatcher: Dispatcher::new(api, registry.clone()),
                system: SystemHandler::new(fanout, metadata, registry),
                sessions,
                mailboxes: Mailboxes::default(),
            }),
        };
        tokio::spawn(route_events(host.clone(), events));
        tokio::spawn(status_log(host.clone()));
        host
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.inner.config.route, get(upgrade_handler))
            .with_state(self.clone())
    }

    pub async fn serve(&self) -> eyre::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.inner.config.listen_address).await?;
        info!("Listening on {:?}", listener.local_addr()?);
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    pub fn fanout(&self) -> &EventFanout {
        &self.inner.fanout
    }

    pub fn open_connections(&self) -> usize {
        self.inner.mailboxes.len()
    }

    /// Persist an auth change to the session and every socket sharing it.
    pub(crate) async fn apply_auth_change(&self, data: &mut ConnectionData, auth: AuthData) {
        let connection_id = data.connection_id.clone().unwrap_or_default();
        let previous = data.auth.clone();
        data.auth = auth.clone();

        if let Some(session_id) = data.session_id.as_deref() {
            if let Err(e) = self.inner.sessions.update(session_id, auth.clone()).await {
                warn!("session auth update failed: {e}");
            }
            for sibling in self.inner.mailboxes.session_connections(session_id) {
                self.inner.fanout.update_auth(&sibling, auth.clone());
            }
        } else {
            self.inner.fanout.update_auth(&connection_id, auth.clone());
        }

        match (&previous.id, &auth.id) {
            (None, Some(user)) => log_login(&connection_id, user),
            (Some(user), None) => log_logout(&connection_id, user),
            _ => {}
        }
    }
}

async fn upgrade_handler(
    State(host): State<WsHost>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let (session, fresh_session) = match resolve_session(&host, &headers).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("session resolution failed: {e}");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let data = ConnectionData {
        auth: session.auth.clone(),
        ip: connect_info
            .ok()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default(),
        session_id: Some(session.id.clone()),
        connection_id: Some(Uuid::new_v4().to_string()),
    };

    let upgrade_host = host.clone();
    let mut response = ws
        .on_upgrade(move |socket| connection::run(upgrade_host, socket, data, fresh_session))
        .into_response();
    if fresh_session {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            host.inner.config.session_cookie, session.id
        );
        if let Ok(value) = cookie.parse() {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

async fn resolve_session(host: &WsHost, headers: &HeaderMap) -> eyre::Result<(Session, bool)> {
    if let Some(sid) = cookie_value(headers, &host.inner.config.session_cookie)
        && let Some(session) = host
            .inner
            .sessions
            .continue_session(&sid)
            .await
            .map_err(|e| eyre::eyre!("{e}"))?
    {
        return Ok((session, false));
    }
    let session = host
        .inner
        .sessions
        .create(AuthData::default())
        .await
        .map_err(|e| eyre::eyre!("{e}"))?;
    Ok((session, true))
}

async fn route_events(host: WsHost, mut events: UnboundedReceiver<OutgoingEvent>) {
    while let Some(event) = events.recv().await {
        if event.broadcast {
            host.inner.mailboxes.send_all(&event.message);
            continue;
        }
        for connection_id in &event.connection_ids {
            host.inner
                .mailboxes
                .send(connection_id, event.message.clone());
        }
    }
}

async fn status_log(host: WsHost) {
    let mut interval = tokio::time::interval(host.inner.config.status_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        info!(open = host.open_connections(), "websocket connections");
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
