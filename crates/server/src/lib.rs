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

//! Server-side engines of the tessera runtime.
//!
//! Three tightly coupled pieces, used by every transport host:
//!
//! - the structural validator and the in/out filters, walking reflection
//!   trees against wire values;
//! - the api map (flat dotted-path index of methods and events) and the
//!   method dispatcher (lookup, access check, validation, parameter
//!   injection, invocation, result filtering);
//! - the event fan-out engine (subscription bookkeeping, parametric
//!   delivery predicates, direction metadata) feeding a delivery sink the
//!   hosts drain.
//!
//! Plus the session-provider interface, the error-code registry, and
//! structured call logging.

mod api;
mod auth;
mod dispatch;
mod events;
mod fanout;
mod filter;
mod log;
mod registry;
mod session;
mod system;
mod validate;

pub use api::{
    ApiBuilder, ApiMap, ApiScope, EventEntry, FilterPolicy, ItemMetadata, MethodEntry,
    MethodHandler, ParametricEventEntry,
};
pub use auth::{AuthData, ConnectionData};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use events::{Direction, Event, ParametricComparer, ParametricEvent, SubscriptionValidator};
pub use fanout::{EventFanout, OutgoingEvent};
pub use filter::{filter_in, filter_method_args, filter_out};
pub use log::{LogPolicy, log_login, log_logout, log_offline, log_online};
pub use registry::ErrorRegistry;
pub use session::{MemorySessionProvider, Session, SessionProvider, random_session_id};
pub use system::SystemHandler;
pub use validate::{validate, validate_method};
