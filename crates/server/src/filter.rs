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

//! Conversion filters between wire JSON and runtime values.
//!
//! Filter-in runs after validation: it promotes ISO date strings to native
//! dates and rebuilds composite values, silently dropping anything the
//! reflection does not describe (defense in depth beyond validation).
//! Filter-out mirrors this outward under a per-method policy: `Full`
//! type-checks and coerces, `Fast` does the same structural walk without
//! assertions, `None` passes the value through untouched.
//!
//! Both directions allocate fresh values; neither mutates its input or the
//! reflection tree.

use crate::api::FilterPolicy;
use crate::validate::{tuple_min_length, validate};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tessera_common::{MethodReflection, ScalarKind, TypeReflection, Value};

/// Convert a validated wire value into its runtime form.
pub fn filter_in(data: Option<&serde_json::Value>, reflection: &TypeReflection) -> Value {
    if reflection.is_optional() && matches!(data, None | Some(serde_json::Value::Null)) {
        return Value::Null;
    }

    match (reflection, data) {
        (TypeReflection::Scalar { kind: ScalarKind::Date, .. }, Some(serde_json::Value::String(s))) => {
            DateTime::parse_from_rfc3339(s)
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                // Dates without an offset passed validation; retry as UTC.
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|n| Value::Date(n.and_utc()))
                })
                .unwrap_or(Value::Null)
        }

        (TypeReflection::Object { children, .. }, Some(serde_json::Value::Object(map))) => {
            let mut filtered = BTreeMap::new();
            for (key, child) in children {
                let item = map.get(key);
                if child.is_optional() && matches!(item, None | Some(serde_json::Value::Null)) {
                    continue;
                }
                filtered.insert(key.clone(), filter_in(item, child));
            }
            Value::Object(filtered)
        }

        (TypeReflection::Array { element, .. }, Some(serde_json::Value::Array(items))) => {
            Value::Array(items.iter().map(|item| filter_in(Some(item), element)).collect())
        }

        (TypeReflection::Tuple { elements, .. }, Some(serde_json::Value::Array(items))) => {
            let mut filtered = Vec::new();
            for (i, element) in elements.iter().enumerate() {
                match items.get(i) {
                    Some(item) => filtered.push(filter_in(Some(item), element)),
                    None => break,
                }
            }
            Value::Array(filtered)
        }

        (TypeReflection::IndexedMap { value, .. }, Some(serde_json::Value::Object(map))) => {
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), filter_in(Some(v), value)))
                    .collect(),
            )
        }

        (TypeReflection::Union { alternatives, .. }, _) => {
            for alternative in alternatives {
                if validate(alternative, data, "filterin", false).is_ok() {
                    return filter_in(data, alternative);
                }
            }
            data.map(Value::from_json).unwrap_or(Value::Null)
        }

        (_, Some(data)) => Value::from_json(data),
        (_, None) => Value::Null,
    }
}

/// Convert a runtime result into wire JSON under the given policy. `None`
/// policy is handled by the caller (it never enters this walk).
pub fn filter_out(
    data: &Value,
    reflection: &TypeReflection,
    policy: FilterPolicy,
) -> Result<serde_json::Value, String> {
    let strict = policy == FilterPolicy::Full;

    match reflection {
        TypeReflection::Scalar { kind, .. } => filter_out_scalar(data, *kind, strict),

        TypeReflection::Object { children, .. } => {
            let map = match data {
                Value::Object(map) => map,
                _ if strict => return Err(format!("Bad object: {}", data.type_of())),
                _ => return Ok(data.to_json()),
            };
            let mut out = serde_json::Map::new();
            for (key, child) in children {
                match map.get(key) {
                    Some(item) if !(child.is_optional() && item.is_null()) => {
                        out.insert(key.clone(), filter_out(item, child, policy)?);
                    }
                    Some(_) => {}
                    None if child.is_optional() => {}
                    None if strict => {
                        return Err(format!("Bad {}: undefined", child.type_name()));
                    }
                    None => {}
                }
            }
            Ok(serde_json::Value::Object(out))
        }

        TypeReflection::Array { element, .. } => {
            let items = match data {
                Value::Array(items) => items,
                _ if strict => return Err(format!("Bad Array: {}", data.type_of())),
                _ => return Ok(data.to_json()),
            };
            let out = items
                .iter()
                .map(|item| filter_out(item, element, policy))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::Value::Array(out))
        }

        TypeReflection::Tuple { elements, .. } => {
            let items = match data {
                Value::Array(items) => items,
                _ if strict => return Err(format!("Bad Tuple: {}", data.type_of())),
                _ => return Ok(data.to_json()),
            };
            if strict && (items.len() < tuple_min_length(elements) || items.len() > elements.len())
            {
                return Err(format!("Bad tuple length: {}", items.len()));
            }
            let out = items
                .iter()
                .zip(elements)
                .map(|(item, element)| filter_out(item, element, policy))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::Value::Array(out))
        }

        TypeReflection::IndexedMap { value, .. } => {
            let map = match data {
                Value::Object(map) => map,
                _ if strict => return Err(format!("Bad object: {}", data.type_of())),
                _ => return Ok(data.to_json()),
            };
            let out = map
                .iter()
                .map(|(k, v)| Ok((k.clone(), filter_out(v, value, policy)?)))
                .collect::<Result<serde_json::Map<_, _>, String>>()?;
            Ok(serde_json::Value::Object(out))
        }

        TypeReflection::Union { alternatives, .. } => {
            let json = data.to_json();
            let mut last_error = "no union items".to_string();
            for alternative in alternatives {
                match validate(alternative, Some(&json), "filterout", false) {
                    Ok(()) => return filter_out(data, alternative, policy),
                    Err(e) => last_error = e,
                }
            }
            Err(last_error)
        }

        TypeReflection::EnumIndex { max_index, .. } => {
            let Value::Number(n) = data else {
                if strict {
                    return Err(format!("Bad number: {}", data.type_of()));
                }
                return Ok(data.to_json());
            };
            if strict {
                if n.is_nan() {
                    return Err("Bad number: NaN".into());
                }
                if *n > *max_index as f64 {
                    return Err(format!("Max index error: {n} > {max_index}"));
                }
            }
            Ok(data.to_json())
        }

        TypeReflection::Literal { .. } | TypeReflection::Unknown { .. } => Ok(data.to_json()),

        TypeReflection::Injection { .. } => {
            Err(format!("Bad reflection type: {}", reflection.type_name()))
        }
    }
}

fn filter_out_scalar(
    data: &Value,
    kind: ScalarKind,
    strict: bool,
) -> Result<serde_json::Value, String> {
    match kind {
        ScalarKind::Date => match data {
            Value::Date(_) => Ok(data.to_json()),
            Value::String(s) if !strict => Ok(serde_json::Value::String(s.clone())),
            _ => Err(format!("Bad date: {}", data.type_of())),
        },
        ScalarKind::Number => {
            if strict {
                match data {
                    Value::Number(n) if !n.is_nan() => Ok(data.to_json()),
                    Value::Number(_) => Err("Bad number: NaN".into()),
                    _ => Err(format!("Bad number: {}", data.type_of())),
                }
            } else {
                Ok(data.to_json())
            }
        }
        ScalarKind::String => {
            if strict {
                match data {
                    Value::String(_) => Ok(data.to_json()),
                    // Loose numeric results are stringified rather than rejected.
                    Value::Number(n) => Ok(serde_json::Value::String(format_number(*n))),
                    _ => Err(format!("Bad string: {}", data.type_of())),
                }
            } else {
                Ok(data.to_json())
            }
        }
        ScalarKind::Boolean => {
            if strict {
                match data {
                    Value::Bool(_) => Ok(data.to_json()),
                    other => Ok(serde_json::Value::Bool(is_truthy_marker(other))),
                }
            } else {
                Ok(data.to_json())
            }
        }
        ScalarKind::Undefined | ScalarKind::Null => Ok(serde_json::Value::Null),
    }
}

/// The loose-boolean coercion set: 1, "1", "true", "y", "yes".
fn is_truthy_marker(value: &Value) -> bool {
    match value {
        Value::Number(n) => *n == 1.0,
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "y" | "yes"),
        _ => false,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Filter the caller-supplied arguments of a method call. Returns one
/// runtime value per non-injection parameter, in declaration order; the
/// dispatcher splices injected values in afterwards.
pub fn filter_method_args(
    data: Option<&serde_json::Value>,
    reflection: &MethodReflection,
) -> Vec<Value> {
    let items = match data {
        Some(serde_json::Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
    reflection
        .params
        .iter()
        .filter(|p| !p.is_injection())
        .enumerate()
        .map(|(i, param)| filter_in(items.get(i), param))
        .collect()
}
