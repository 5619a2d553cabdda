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

//! The api map: a flat index of every method and event under its dotted
//! path ("users.profile.get"), each entry carrying its reflection, its
//! resolved metadata, and (for methods) the handler.
//!
//! Built once at startup through [`ApiBuilder`] and shared read-only
//! afterwards. Metadata (access groups, log policy, filter policy) is
//! declared per scope or per item and inherited down the tree; the map
//! stores only the resolved result, so dispatch never walks parents.

use crate::events::{Event, ParametricComparer, ParametricEvent, SubscriptionValidator};
use crate::log::LogPolicy;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_common::{
    ApiError, ApiReflection, EventReflection, MethodReflection, ParametricEventReflection, Value,
};

/// How method results and event payloads are filtered on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPolicy {
    /// Structural walk with type assertions and coercions.
    #[default]
    Full,
    /// Structural walk without assertions. Still strips undeclared keys.
    Fast,
    /// Raw passthrough. Opt-in per item for trusted hot paths.
    None,
}

/// Declared metadata for one api item or scope. `None` fields inherit from
/// the enclosing scope; `broadcast` never inherits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    /// Groups allowed to call or subscribe. `None` means open to everyone,
    /// an empty list means any authenticated user.
    pub groups: Option<Vec<String>>,
    pub log_policy: Option<LogPolicy>,
    pub filter_policy: Option<FilterPolicy>,
    /// Broadcast events reach every connection without a subscription.
    pub broadcast: bool,
}

impl ItemMetadata {
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_log_policy(mut self, policy: LogPolicy) -> Self {
        self.log_policy = Some(policy);
        self
    }

    pub fn with_filter_policy(mut self, policy: FilterPolicy) -> Self {
        self.filter_policy = Some(policy);
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    pub fn effective_log_policy(&self) -> LogPolicy {
        self.log_policy.unwrap_or_default()
    }

    pub fn effective_filter_policy(&self) -> FilterPolicy {
        self.filter_policy.unwrap_or_default()
    }

    fn inherit(mut self, parent: &ItemMetadata) -> Self {
        if self.groups.is_none() {
            self.groups = parent.groups.clone();
        }
        if self.log_policy.is_none() {
            self.log_policy = parent.log_policy;
        }
        if self.filter_policy.is_none() {
            self.filter_policy = parent.filter_policy;
        }
        self
    }
}

/// The uniform shape of every registered method: runtime arguments in
/// declaration order (injections already spliced), optional runtime result.
pub type MethodHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<Value>, ApiError>> + Send + Sync>;

#[derive(Clone)]
pub struct MethodEntry {
    pub reflection: MethodReflection,
    pub metadata: ItemMetadata,
    pub handler: MethodHandler,
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("reflection", &self.reflection)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct EventEntry {
    pub reflection: EventReflection,
    pub metadata: ItemMetadata,
    pub handle: Event,
}

#[derive(Clone)]
pub struct ParametricEventEntry {
    pub reflection: ParametricEventReflection,
    pub metadata: ItemMetadata,
    pub handle: ParametricEvent,
}

impl std::fmt::Debug for ParametricEventEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParametricEventEntry")
            .field("reflection", &self.reflection)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The finished, immutable api index.
#[derive(Debug, Clone, Default)]
pub struct ApiMap {
    methods: BTreeMap<String, MethodEntry>,
    events: BTreeMap<String, EventEntry>,
    parametric_events: BTreeMap<String, ParametricEventEntry>,
}

impl ApiMap {
    pub fn method(&self, path: &str) -> Option<&MethodEntry> {
        self.methods.get(path)
    }

    pub fn event(&self, path: &str) -> Option<&EventEntry> {
        self.events.get(path)
    }

    pub fn parametric_event(&self, path: &str) -> Option<&ParametricEventEntry> {
        self.parametric_events.get(path)
    }

    pub fn has_event(&self, path: &str) -> bool {
        self.events.contains_key(path)
    }

    pub fn has_parametric_event(&self, path: &str) -> bool {
        self.parametric_events.contains_key(path)
    }

    pub fn events(&self) -> impl Iterator<Item = (&str, &EventEntry)> {
        self.events.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn parametric_events(&self) -> impl Iterator<Item = (&str, &ParametricEventEntry)> {
        self.parametric_events.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Dotted paths of every broadcast event, for the metadata handshake.
    pub fn broadcast_events(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|(_, e)| e.metadata.broadcast)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Rebuild the nested reflection tree from the flat index, for the
    /// metadata handshake.
    pub fn reflection(&self) -> ApiReflection {
        let mut root = ApiReflection::default();
        for (path, entry) in &self.methods {
            let (scope, name) = descend(&mut root, path);
            scope.methods.insert(name, entry.reflection.clone());
        }
        for (path, entry) in &self.events {
            let (scope, name) = descend(&mut root, path);
            scope.events.insert(name, entry.reflection.clone());
        }
        for (path, entry) in &self.parametric_events {
            let (scope, name) = descend(&mut root, path);
            scope.parametric_events.insert(name, entry.reflection.clone());
        }
        root
    }
}

fn descend<'a>(root: &'a mut ApiReflection, path: &str) -> (&'a mut ApiReflection, String) {
    let mut scope = root;
    let mut parts = path.split('.').peekable();
    let mut name = String::new();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            name = part.to_string();
        } else {
            scope = scope.children.entry(part.to_string()).or_default();
        }
    }
    (scope, name)
}

/// Registration surface handed to the application at startup. Scopes nest
/// through closures and carry their metadata down to the items they hold.
pub struct ApiBuilder {
    map: ApiMap,
    metadata: ItemMetadata,
}

impl Default for ApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiBuilder {
    pub fn new() -> Self {
        Self {
            map: ApiMap::default(),
            metadata: ItemMetadata::default(),
        }
    }

    pub fn with_metadata(metadata: ItemMetadata) -> Self {
        Self {
            map: ApiMap::default(),
            metadata,
        }
    }

    fn scope_mut(&mut self) -> ApiScope<'_> {
        ApiScope {
            map: &mut self.map,
            prefix: String::new(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn scope(&mut self, name: &str, metadata: ItemMetadata, f: impl FnOnce(&mut ApiScope)) -> &mut Self {
        self.scope_mut().scope(name, metadata, f);
        self
    }

    pub fn method<F, Fut>(
        &mut self,
        name: &str,
        reflection: MethodReflection,
        metadata: ItemMetadata,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Value>, ApiError>> + Send + 'static,
    {
        self.scope_mut().method(name, reflection, metadata, handler);
        self
    }

    pub fn event(
        &mut self,
        name: &str,
        reflection: EventReflection,
        metadata: ItemMetadata,
    ) -> Event {
        self.scope_mut().event(name, reflection, metadata)
    }

    pub fn parametric_event(
        &mut self,
        name: &str,
        reflection: ParametricEventReflection,
        metadata: ItemMetadata,
        comparer: ParametricComparer,
        validator: Option<SubscriptionValidator>,
    ) -> ParametricEvent {
        self.scope_mut()
            .parametric_event(name, reflection, metadata, comparer, validator)
    }

    pub fn build(self) -> ApiMap {
        self.map
    }
}

/// One level of the api tree during registration.
pub struct ApiScope<'a> {
    map: &'a mut ApiMap,
    prefix: String,
    metadata: ItemMetadata,
}

impl ApiScope<'_> {
    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.prefix)
        }
    }

    pub fn scope(&mut self, name: &str, metadata: ItemMetadata, f: impl FnOnce(&mut ApiScope)) {
        let mut child = ApiScope {
            prefix: self.path(name),
            metadata: metadata.inherit(&self.metadata),
            map: &mut *self.map,
        };
        f(&mut child);
    }

    pub fn method<F, Fut>(
        &mut self,
        name: &str,
        reflection: MethodReflection,
        metadata: ItemMetadata,
        handler: F,
    ) where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Value>, ApiError>> + Send + 'static,
    {
        let path = self.path(name);
        let previous = self.map.methods.insert(
            path.clone(),
            MethodEntry {
                reflection,
                metadata: metadata.inherit(&self.metadata),
                handler: Arc::new(move |args| Box::pin(handler(args))),
            },
        );
        assert!(previous.is_none(), "duplicate method registration: {path}");
    }

    pub fn event(
        &mut self,
        name: &str,
        reflection: EventReflection,
        metadata: ItemMetadata,
    ) -> Event {
        let path = self.path(name);
        let handle = Event::new();
        let previous = self.map.events.insert(
            path.clone(),
            EventEntry {
                reflection,
                metadata: metadata.inherit(&self.metadata),
                handle: handle.clone(),
            },
        );
        assert!(previous.is_none(), "duplicate event registration: {path}");
        handle
    }

    pub fn parametric_event(
        &mut self,
        name: &str,
        reflection: ParametricEventReflection,
        metadata: ItemMetadata,
        comparer: ParametricComparer,
        validator: Option<SubscriptionValidator>,
    ) -> ParametricEvent {
        let path = self.path(name);
        let handle = ParametricEvent::new(comparer, validator);
        let previous = self.map.parametric_events.insert(
            path.clone(),
            ParametricEventEntry {
                reflection,
                metadata: metadata.inherit(&self.metadata),
                handle: handle.clone(),
            },
        );
        assert!(
            previous.is_none(),
            "duplicate parametric event registration: {path}"
        );
        handle
    }
}
