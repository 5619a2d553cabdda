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

//! The structural type-reflection model: a closed, recursive tagged union
//! describing every value shape that can cross the wire.
//!
//! Reflection trees are produced once (by a build-time generator, or by hand
//! for small apis), are acyclic, and are shared read-only across all requests.
//! The validator and the filters in `tessera-server` are structural recursions
//! over this type; nothing here has behavior of its own.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar kinds a `TypeReflection::Scalar` can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarKind {
    Number,
    String,
    Boolean,
    Date,
    Null,
    Undefined,
}

impl ScalarKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarKind::Number => "number",
            ScalarKind::String => "string",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Date => "Date",
            ScalarKind::Null => "null",
            ScalarKind::Undefined => "undefined",
        }
    }
}

/// Key kinds for indexed maps. Number keys are carried as decimal strings on
/// the wire (JSON object keys are always strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyKind {
    String,
    Number,
}

/// Kinds of server-side injections. An injection parameter is never supplied
/// by the caller; the dispatcher splices the value in. `AuthDataResponse` is
/// only meaningful in return position and triggers the authentication-response
/// interception path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionKind {
    ApiUserId,
    ApiAuthData,
    ApiConnectionData,
    AuthDataResponse,
    Other(String),
}

/// Literal values for the `Literal` reflection variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl std::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralValue::Bool(b) => write!(f, "{b}"),
            LiteralValue::Number(n) => write!(f, "{n}"),
            LiteralValue::String(s) => write!(f, "{s}"),
        }
    }
}

/// Structural description of a value shape. One variant per shape; every
/// variant carries an `optional` flag meaning "absent or null is accepted".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TypeReflection {
    Scalar {
        kind: ScalarKind,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    Object {
        children: BTreeMap<String, TypeReflection>,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    Array {
        element: Box<TypeReflection>,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Fixed-shape array. A trailing run of optional elements lowers the
    /// minimum accepted length.
    Tuple {
        elements: Vec<TypeReflection>,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Homogeneous map with free-form keys.
    IndexedMap {
        key_kind: KeyKind,
        value: Box<TypeReflection>,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Ordered alternatives; validation accepts the first that matches.
    Union {
        alternatives: Vec<TypeReflection>,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Exactly one permitted value.
    Literal {
        value: LiteralValue,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Safe integer in `0..=max_index`.
    EnumIndex {
        max_index: u32,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Slot filled server-side, not by the wire value.
    Injection {
        kind: InjectionKind,
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
    /// Deliberately untyped. Rejected by validation unless the caller
    /// explicitly allows it (used only for the outer envelope shape).
    Unknown {
        #[serde(default, skip_serializing_if = "is_false")]
        optional: bool,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TypeReflection {
    pub fn number() -> Self {
        TypeReflection::Scalar {
            kind: ScalarKind::Number,
            optional: false,
        }
    }

    pub fn string() -> Self {
        TypeReflection::Scalar {
            kind: ScalarKind::String,
            optional: false,
        }
    }

    pub fn boolean() -> Self {
        TypeReflection::Scalar {
            kind: ScalarKind::Boolean,
            optional: false,
        }
    }

    pub fn date() -> Self {
        TypeReflection::Scalar {
            kind: ScalarKind::Date,
            optional: false,
        }
    }

    pub fn null() -> Self {
        TypeReflection::Scalar {
            kind: ScalarKind::Null,
            optional: false,
        }
    }

    pub fn undefined() -> Self {
        TypeReflection::Scalar {
            kind: ScalarKind::Undefined,
            optional: false,
        }
    }

    pub fn unknown() -> Self {
        TypeReflection::Unknown { optional: false }
    }

    pub fn object<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, TypeReflection)>,
        S: Into<String>,
    {
        TypeReflection::Object {
            children: children.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            optional: false,
        }
    }

    pub fn array(element: TypeReflection) -> Self {
        TypeReflection::Array {
            element: Box::new(element),
            optional: false,
        }
    }

    pub fn tuple<I: IntoIterator<Item = TypeReflection>>(elements: I) -> Self {
        TypeReflection::Tuple {
            elements: elements.into_iter().collect(),
            optional: false,
        }
    }

    pub fn indexed_map(key_kind: KeyKind, value: TypeReflection) -> Self {
        TypeReflection::IndexedMap {
            key_kind,
            value: Box::new(value),
            optional: false,
        }
    }

    pub fn union<I: IntoIterator<Item = TypeReflection>>(alternatives: I) -> Self {
        TypeReflection::Union {
            alternatives: alternatives.into_iter().collect(),
            optional: false,
        }
    }

    pub fn literal(value: impl Into<LiteralValue>) -> Self {
        TypeReflection::Literal {
            value: value.into(),
            optional: false,
        }
    }

    pub fn enum_index(max_index: u32) -> Self {
        TypeReflection::EnumIndex {
            max_index,
            optional: false,
        }
    }

    pub fn injection(kind: InjectionKind) -> Self {
        TypeReflection::Injection {
            kind,
            optional: false,
        }
    }

    /// Same reflection with the optional flag set.
    pub fn optional(mut self) -> Self {
        *self.optional_mut() = true;
        self
    }

    pub fn is_optional(&self) -> bool {
        match self {
            TypeReflection::Scalar { optional, .. }
            | TypeReflection::Object { optional, .. }
            | TypeReflection::Array { optional, .. }
            | TypeReflection::Tuple { optional, .. }
            | TypeReflection::IndexedMap { optional, .. }
            | TypeReflection::Union { optional, .. }
            | TypeReflection::Literal { optional, .. }
            | TypeReflection::EnumIndex { optional, .. }
            | TypeReflection::Injection { optional, .. }
            | TypeReflection::Unknown { optional } => *optional,
        }
    }

    pub fn is_injection(&self) -> bool {
        matches!(self, TypeReflection::Injection { .. })
    }

    pub fn injection_kind(&self) -> Option<&InjectionKind> {
        match self {
            TypeReflection::Injection { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Human-readable shape name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            TypeReflection::Scalar { kind, .. } => kind.type_name(),
            TypeReflection::Object { .. } => "object",
            TypeReflection::Array { .. } => "Array",
            TypeReflection::Tuple { .. } => "Tuple",
            TypeReflection::IndexedMap { .. } => "indexed map",
            TypeReflection::Union { .. } => "union",
            TypeReflection::Literal { .. } => "value",
            TypeReflection::EnumIndex { .. } => "Enum",
            TypeReflection::Injection { .. } => "injection",
            TypeReflection::Unknown { .. } => "unknown",
        }
    }

    fn optional_mut(&mut self) -> &mut bool {
        match self {
            TypeReflection::Scalar { optional, .. }
            | TypeReflection::Object { optional, .. }
            | TypeReflection::Array { optional, .. }
            | TypeReflection::Tuple { optional, .. }
            | TypeReflection::IndexedMap { optional, .. }
            | TypeReflection::Union { optional, .. }
            | TypeReflection::Literal { optional, .. }
            | TypeReflection::EnumIndex { optional, .. }
            | TypeReflection::Injection { optional, .. }
            | TypeReflection::Unknown { optional } => optional,
        }
    }
}

impl From<bool> for LiteralValue {
    fn from(v: bool) -> Self {
        LiteralValue::Bool(v)
    }
}

impl From<f64> for LiteralValue {
    fn from(v: f64) -> Self {
        LiteralValue::Number(v)
    }
}

impl From<i32> for LiteralValue {
    fn from(v: i32) -> Self {
        LiteralValue::Number(v as f64)
    }
}

impl From<&str> for LiteralValue {
    fn from(v: &str) -> Self {
        LiteralValue::String(v.to_string())
    }
}

/// Reflection of a single method: ordered parameter reflections (any subset
/// of which may be injections) and an optional return reflection. A return
/// reflection of injection kind signals the special response-handling path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodReflection {
    #[serde(default)]
    pub params: Vec<TypeReflection>,
    #[serde(default, rename = "return")]
    pub ret: Option<TypeReflection>,
}

impl MethodReflection {
    pub fn new(params: Vec<TypeReflection>, ret: Option<TypeReflection>) -> Self {
        Self { params, ret }
    }

    /// Number of caller-supplied (non-injection) parameters.
    pub fn wire_param_count(&self) -> usize {
        self.params.iter().filter(|p| !p.is_injection()).count()
    }
}

/// Reflection of a plain event's payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventReflection {
    #[serde(default)]
    pub data: Option<TypeReflection>,
}

/// Reflection of a parametric event: the payload, the caller-supplied
/// subscription parameters, and the fire-time event parameters. Event
/// parameters are only seen by the comparer, never sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametricEventReflection {
    #[serde(default)]
    pub data: Option<TypeReflection>,
    pub subscription: TypeReflection,
    #[serde(default)]
    pub parameters: Option<TypeReflection>,
}

/// Reflection of a whole api subtree, as emitted by the generator. Flattened
/// into the api map at startup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReflection {
    #[serde(default)]
    pub children: BTreeMap<String, ApiReflection>,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodReflection>,
    #[serde(default)]
    pub events: BTreeMap<String, EventReflection>,
    #[serde(default)]
    pub parametric_events: BTreeMap<String, ParametricEventReflection>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reflection_json_round_trip() {
        let refl = TypeReflection::object([
            ("id", TypeReflection::number()),
            ("name", TypeReflection::string().optional()),
            (
                "tags",
                TypeReflection::array(TypeReflection::union([
                    TypeReflection::string(),
                    TypeReflection::number(),
                ])),
            ),
        ]);
        let json = serde_json::to_string(&refl).unwrap();
        let back: TypeReflection = serde_json::from_str(&json).unwrap();
        assert_eq!(refl, back);
    }

    #[test]
    fn optional_flag_is_omitted_when_unset() {
        let json = serde_json::to_value(TypeReflection::string()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "scalar", "kind": "string"}));
    }

    #[test]
    fn wire_param_count_skips_injections() {
        let m = MethodReflection::new(
            vec![
                TypeReflection::injection(InjectionKind::ApiUserId),
                TypeReflection::string(),
                TypeReflection::number().optional(),
            ],
            None,
        );
        assert_eq!(m.wire_param_count(), 2);
    }
}
