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

//! Shared vocabulary for the tessera runtime: the structural type-reflection
//! model, the runtime value representation, the wire message envelope, the
//! client-visible error taxonomy, and server metadata.
//!
//! Everything in this crate is plain data, shared read-only between the server
//! engines and the transport hosts.

mod errors;
mod messages;
mod metadata;
mod reflection;
pub mod tracing;
mod value;

pub use errors::ApiError;
pub use messages::{ClientMessage, EnvelopeError, ServerMessage, SystemPayload, parse_client_batch};
pub use metadata::ServerMetadata;
pub use reflection::{
    ApiReflection, EventReflection, InjectionKind, KeyKind, LiteralValue, MethodReflection,
    ParametricEventReflection, ScalarKind, TypeReflection,
};
pub use value::Value;

/// Prefix reserved for system methods (`_.ping`, `_.polling`, `_.sub`, ...).
pub const SYSTEM_PREFIX: &str = "_.";

/// Largest integer exactly representable in an f64 wire number. Subscription
/// and connection counters wrap before reaching it.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
