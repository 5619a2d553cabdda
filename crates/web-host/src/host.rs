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

//! The long-poll host: one POST endpoint emulating a persistent connection
//! over plain HTTP.
//!
//! Each request carries a batch of client messages and is answered with a
//! batch of server messages. Identity rides on two cookies, the session id
//! (stable across reconnects) and the connection id (the fan-out address).
//! A `_.polling` message holds the request open until an event arrives or
//! the poll window closes; everything else is answered inline.

use crate::config::WebHostConfig;
use crate::connections::{Connections, Poll};
use axum::{
    Router,
    extract::{ConnectInfo, State, rejection::ExtensionRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_common::{
    ClientMessage, ServerMessage, ServerMetadata, SystemPayload, parse_client_batch,
};
use tessera_server::{
    ApiMap, AuthData, ConnectionData, DispatchOutcome, Dispatcher, ErrorRegistry, EventFanout,
    OutgoingEvent, Session, SessionProvider, SystemHandler, log_login, log_logout, log_offline,
    log_online,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

const POLLING_METHOD: &str = "_.polling";

struct Inner {
    config: WebHostConfig,
    fanout: EventFanout,
    dispatcher: Dispatcher,
    system: SystemHandler,
    sessions: Arc<dyn SessionProvider>,
    connections: Connections,
}

/// The long-poll host. Cheap to clone; all clones share the connection
/// table and the background tasks started at construction.
#[derive(Clone)]
pub struct WebHost {
    inner: Arc<Inner>,
}

impl WebHost {
    /// Build the host and start its event-router and reaper tasks. Must be
    /// called within a tokio runtime.
    pub fn new(
        api: ApiMap,
        metadata: ServerMetadata,
        registry: ErrorRegistry,
        sessions: Arc<dyn SessionProvider>,
        config: WebHostConfig,
    ) -> Self {
        let (fanout, events) = EventFanout::new(api.clone());
        let host = Self {
            inner: Arc::new(Inner {
                config,
                fanout: fanout.clone(),
                dispatcher: Dispatcher::new(api, registry.clone()),
                system: SystemHandler::new(fanout, metadata, registry),
                sessions,
                connections: Connections::new(),
            }),
        };
        tokio::spawn(route_events(host.clone(), events));
        tokio::spawn(reap_connections(host.clone()));
        host
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.inner.config.route, post(batch_handler))
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
        self.inner.connections.len()
    }

    async fn resolve_session(&self, headers: &HeaderMap, replies: &mut Batch) -> Option<Session> {
        let sessions = &self.inner.sessions;
        if let Some(sid) = cookie_value(headers, &self.inner.config.session_cookie) {
            match sessions.continue_session(&sid).await {
                Ok(Some(session)) => return Some(session),
                Ok(None) => {}
                Err(e) => {
                    warn!("session lookup failed: {e}");
                    return None;
                }
            }
        }
        match sessions.create(AuthData::default()).await {
            Ok(session) => {
                replies.set_cookie(&self.inner.config.session_cookie, &session.id);
                replies.push(ServerMessage::System(SystemPayload::set_session_id(
                    &session.id,
                )));
                Some(session)
            }
            Err(e) => {
                warn!("session creation failed: {e}");
                None
            }
        }
    }

    fn resolve_connection(
        &self,
        headers: &HeaderMap,
        session: &Session,
        ip: String,
        replies: &mut Batch,
    ) -> ConnectionData {
        let connections = &self.inner.connections;
        if let Some(cid) = cookie_value(headers, &self.inner.config.connection_cookie)
            && let Some(mut data) = connections.touch(&cid)
            && data.session_id.as_deref() == Some(&session.id)
        {
            // The session record is authoritative for auth.
            if data.auth != session.auth {
                data.auth = session.auth.clone();
                connections.update_auth(&cid, session.auth.clone());
                self.inner.fanout.update_auth(&cid, session.auth.clone());
            }
            return data;
        }

        let mut data = ConnectionData {
            auth: session.auth.clone(),
            ip,
            session_id: Some(session.id.clone()),
            connection_id: None,
        };
        let id = connections.create(data.clone());
        data.connection_id = Some(id.clone());
        self.inner.fanout.register_connection(&id, data.clone());
        log_online(&id, &data.ip);
        replies.set_cookie(&self.inner.config.connection_cookie, &id);
        replies.push(ServerMessage::System(SystemPayload::set_connection_id(&id)));
        data
    }

    async fn handle_message(
        &self,
        connection: &mut ConnectionData,
        message: &ClientMessage,
        replies: &mut Batch,
    ) {
        if message.method == POLLING_METHOD {
            self.handle_poll(connection, message, replies).await;
            return;
        }
        let connection_id = connection.connection_id.clone().unwrap_or_default();
        if message.is_system() {
            replies.push(self.inner.system.handle(&connection_id, message).await);
            return;
        }
        let DispatchOutcome { message, new_auth } =
            self.inner.dispatcher.dispatch(connection, message).await;
        replies.push(message);
        if let Some(auth) = new_auth {
            self.apply_auth_change(connection, auth).await;
        }
    }

    async fn handle_poll(
        &self,
        connection: &ConnectionData,
        message: &ClientMessage,
        replies: &mut Batch,
    ) {
        let connection_id = connection.connection_id.clone().unwrap_or_default();
        match self.inner.connections.poll(&connection_id) {
            Some(Poll::Ready(messages)) => replies.extend(messages),
            Some(Poll::Wait(rx)) => {
                match tokio::time::timeout(self.inner.config.polling_wait(), rx).await {
                    Ok(Ok(messages)) => replies.extend(messages),
                    // Window closed empty; collect anything that raced in.
                    _ => replies.extend(self.inner.connections.end_poll(&connection_id)),
                }
            }
            None => {
                debug!(%connection_id, "poll on dropped connection");
            }
        }
        replies.push(ServerMessage::response(message.request_id, None));
    }

    /// Persist an auth change everywhere the session is visible.
    async fn apply_auth_change(&self, connection: &mut ConnectionData, auth: AuthData) {
        let connection_id = connection.connection_id.clone().unwrap_or_default();
        let previous = connection.auth.clone();
        connection.auth = auth.clone();

        if let Some(session_id) = connection.session_id.as_deref() {
            if let Err(e) = self.inner.sessions.update(session_id, auth.clone()).await {
                warn!("session auth update failed: {e}");
            }
            for sibling in self.inner.connections.session_connections(session_id) {
                self.inner.connections.update_auth(&sibling, auth.clone());
                self.inner.fanout.update_auth(&sibling, auth.clone());
            }
        }

        match (&previous.id, &auth.id) {
            (None, Some(user)) => log_login(&connection_id, user),
            (Some(user), None) => log_logout(&connection_id, user),
            _ => {}
        }
    }
}

/// The reply batch under construction, plus the cookies to set on it.
#[derive(Default)]
struct Batch {
    messages: Vec<ServerMessage>,
    cookies: Vec<String>,
}

impl Batch {
    fn push(&mut self, message: ServerMessage) {
        self.messages.push(message);
    }

    fn extend(&mut self, messages: Vec<ServerMessage>) {
        self.messages.extend(messages);
    }

    fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies
            .push(format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax"));
    }

    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.messages).unwrap_or_else(|_| "[]".to_string());
        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response();
        for cookie in self.cookies {
            if let Ok(value) = cookie.parse() {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

async fn batch_handler(
    State(host): State<WebHost>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let batch = match parse_client_batch(&body, host.inner.config.max_message_length) {
        Ok(batch) => batch,
        Err(e) => {
            debug!("rejecting batch: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let mut replies = Batch::default();
    let Some(session) = host.resolve_session(&headers, &mut replies).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let ip = connect_info
        .ok()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();
    let mut connection = host.resolve_connection(&headers, &session, ip, &mut replies);

    for message in &batch {
        host.handle_message(&mut connection, message, &mut replies)
            .await;
    }
    replies.into_response()
}

async fn route_events(host: WebHost, mut events: UnboundedReceiver<OutgoingEvent>) {
    while let Some(event) = events.recv().await {
        if event.broadcast {
            host.inner.connections.push_all(&event.message);
            continue;
        }
        for connection_id in &event.connection_ids {
            host.inner
                .connections
                .push(connection_id, event.message.clone());
        }
    }
}

async fn reap_connections(host: WebHost) {
    let mut interval = tokio::time::interval(host.inner.config.check_connections_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let dead = host.inner.connections.reap(
            host.inner.config.connection_lifetime(),
            host.inner.config.polling_wait(),
        );
        for connection_id in dead {
            host.inner.fanout.drop_connection(&connection_id);
            log_offline(&connection_id);
        }
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
