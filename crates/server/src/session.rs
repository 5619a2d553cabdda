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

//! Session persistence behind a provider trait, so hosts can keep sessions
//! in memory, a database, or a shared cache without the runtime caring.

use crate::auth::AuthData;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::HashMap;
use std::sync::Mutex;
use tessera_common::ApiError;

pub const SESSION_ID_LENGTH: usize = 20;

/// Default session lifetime: 31 days without being touched.
pub const DEFAULT_SESSION_LIFETIME_DAYS: i64 = 31;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub auth: AuthData,
    pub last_seen: DateTime<Utc>,
}

/// Storage interface for sessions. All hosts sharing a provider share the
/// sessions, which is what lets a browser reconnect on a fresh transport
/// and keep its identity.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Mint a fresh session with a new unguessable id.
    async fn create(&self, auth: AuthData) -> Result<Session, ApiError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, ApiError>;

    /// Fetch and touch: refreshes the expiry clock on hit.
    async fn continue_session(&self, id: &str) -> Result<Option<Session>, ApiError>;

    /// Replace the auth record (login, logout, group change).
    async fn update(&self, id: &str, auth: AuthData) -> Result<(), ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

pub fn random_session_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// In-process provider. Suitable for a single host; anything multi-process
/// wants a real store behind the same trait.
pub struct MemorySessionProvider {
    sessions: Mutex<HashMap<String, Session>>,
    lifetime: Duration,
}

impl Default for MemorySessionProvider {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_SESSION_LIFETIME_DAYS))
    }
}

impl MemorySessionProvider {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Drop every session past its lifetime. Hosts call this from their
    /// housekeeping tick.
    pub fn clear_outdated(&self) {
        let cutoff = Utc::now() - self.lifetime;
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, session| session.last_seen >= cutoff);
    }

    fn live(&self, session: Session) -> Option<Session> {
        (session.last_seen >= Utc::now() - self.lifetime).then_some(session)
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn create(&self, auth: AuthData) -> Result<Session, ApiError> {
        let session = Session {
            id: random_session_id(),
            auth,
            last_seen: Utc::now(),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, ApiError> {
        let session = self.sessions.lock().unwrap().get(id).cloned();
        Ok(session.and_then(|s| self.live(s)))
    }

    async fn continue_session(&self, id: &str) -> Result<Option<Session>, ApiError> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(id) else {
            return Ok(None);
        };
        if session.last_seen < Utc::now() - self.lifetime {
            sessions.remove(id);
            return Ok(None);
        }
        session.last_seen = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn update(&self, id: &str, auth: AuthData) -> Result<(), ApiError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.auth = auth;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }
}
