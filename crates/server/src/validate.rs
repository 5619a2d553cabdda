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

//! Structural validation of wire values against reflection trees.
//!
//! The validator never mutates data; it walks the reflection and the
//! candidate value together and reports the first mismatch as a dotted-path
//! diagnostic string. `None` stands for an absent (undefined) value.

use regex::Regex;
use std::sync::LazyLock;
use tessera_common::{
    LiteralValue, MethodReflection, ScalarKind, TypeReflection, KeyKind, MAX_SAFE_INTEGER,
};

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(-?(?:[1-9][0-9]*)?[0-9]{4})-(1[0-2]|0[1-9])-(3[01]|0[1-9]|[12][0-9])T(2[0-3]|[01][0-9]):([0-5][0-9]):([0-5][0-9])(\.[0-9]+)?(Z)?$",
    )
    .expect("date regex is valid")
});

static NUMBER_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0|[1-9][0-9]*)$").expect("number key regex is valid"));

/// JavaScript-style type name of a wire value, for diagnostics.
fn type_of(data: Option<&serde_json::Value>) -> &'static str {
    match data {
        None => "undefined",
        Some(serde_json::Value::Null) => "object",
        Some(serde_json::Value::Bool(_)) => "boolean",
        Some(serde_json::Value::Number(_)) => "number",
        Some(serde_json::Value::String(_)) => "string",
        Some(serde_json::Value::Array(_)) => "object",
        Some(serde_json::Value::Object(_)) => "object",
    }
}

fn bad_parameter(key: &str, expected: &str, data: Option<&serde_json::Value>) -> String {
    format!("Parameter {key} should be {expected}, {} given", type_of(data))
}

fn display(data: Option<&serde_json::Value>) -> String {
    match data {
        None => "undefined".into(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn is_safe_integer(n: f64) -> bool {
    n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64
}

/// Minimum accepted length of a tuple: the declared length minus the
/// trailing run of optional elements.
pub(crate) fn tuple_min_length(elements: &[TypeReflection]) -> usize {
    let mut min = elements.len();
    for element in elements.iter().rev() {
        if !element.is_optional() {
            break;
        }
        min -= 1;
    }
    min
}

/// Validate `data` against `reflection`, reporting the first failure as a
/// diagnostic string rooted at `key`. `allow_unknown` admits `Unknown`
/// reflection nodes and is only used for the outer envelope shapes.
pub fn validate(
    reflection: &TypeReflection,
    data: Option<&serde_json::Value>,
    key: &str,
    allow_unknown: bool,
) -> Result<(), String> {
    if reflection.is_optional() && matches!(data, None | Some(serde_json::Value::Null)) {
        return Ok(());
    }

    match reflection {
        TypeReflection::Scalar { kind, .. } => validate_scalar(*kind, data, key),

        TypeReflection::Object { children, .. } => {
            let Some(serde_json::Value::Object(map)) = data else {
                return Err(bad_parameter(key, "object", data));
            };
            for data_key in map.keys() {
                if !children.contains_key(data_key) {
                    let allowed = children.keys().cloned().collect::<Vec<_>>().join(", ");
                    return Err(format!(
                        "Property {key}.{data_key} not in interface with keys [{allowed}]"
                    ));
                }
            }
            for (child_key, child) in children {
                if !map.contains_key(child_key) && !child.is_optional() {
                    let allowed = children.keys().cloned().collect::<Vec<_>>().join(", ");
                    let present = map.keys().cloned().collect::<Vec<_>>().join(", ");
                    return Err(format!(
                        "Property {key}.{child_key} of interface [{allowed}] not in data with keys [{present}]"
                    ));
                }
                validate(
                    child,
                    map.get(child_key),
                    &format!("{key}{child_key}."),
                    allow_unknown,
                )?;
            }
            Ok(())
        }

        TypeReflection::Array { element, .. } => {
            let Some(serde_json::Value::Array(items)) = data else {
                return Err(bad_parameter(key, "Array", data));
            };
            for (i, item) in items.iter().enumerate() {
                validate(element, Some(item), &format!("{key}[{i}]."), allow_unknown)?;
            }
            Ok(())
        }

        TypeReflection::Tuple { elements, .. } => {
            let Some(serde_json::Value::Array(items)) = data else {
                return Err(bad_parameter(key, "Tuple", data));
            };
            let min = tuple_min_length(elements);
            if items.len() < min || items.len() > elements.len() {
                return Err(format!("'{key}': bad tuple length {}", elements.len()));
            }
            for (i, item) in items.iter().enumerate() {
                validate(
                    &elements[i],
                    Some(item),
                    &format!("{key}[{i}]."),
                    allow_unknown,
                )?;
            }
            Ok(())
        }

        TypeReflection::IndexedMap { key_kind, value, .. } => {
            let Some(serde_json::Value::Object(map)) = data else {
                return Err(bad_parameter(key, "object", data));
            };
            for (map_key, map_value) in map {
                if *key_kind == KeyKind::Number && !NUMBER_KEY_RE.is_match(map_key) {
                    return Err(format!("Bad number key in {key}: {map_key}"));
                }
                validate(
                    value,
                    Some(map_value),
                    &format!("{key}{map_key}."),
                    allow_unknown,
                )?;
            }
            Ok(())
        }

        TypeReflection::Union { alternatives, .. } => {
            let mut errors = Vec::new();
            for (i, alternative) in alternatives.iter().enumerate() {
                match validate(alternative, data, &format!("{key}[{i}]."), allow_unknown) {
                    Ok(()) => return Ok(()),
                    Err(e) => errors.push(e),
                }
            }
            Err(format!(
                "'{key}': bad value for union\n{}",
                if errors.is_empty() {
                    "no union items".into()
                } else {
                    errors.join("\n")
                }
            ))
        }

        TypeReflection::Literal { value, .. } => {
            let matches = match (value, data) {
                (LiteralValue::Bool(b), Some(serde_json::Value::Bool(d))) => b == d,
                (LiteralValue::Number(n), Some(serde_json::Value::Number(d))) => {
                    d.as_f64() == Some(*n)
                }
                (LiteralValue::String(s), Some(serde_json::Value::String(d))) => s == d,
                _ => false,
            };
            if matches {
                Ok(())
            } else {
                Err(format!(
                    "'{key}': '{}' should be equal to '{value}'",
                    display(data)
                ))
            }
        }

        TypeReflection::EnumIndex { max_index, .. } => {
            let Some(serde_json::Value::Number(n)) = data else {
                return Err(bad_parameter(key, "Enum", data));
            };
            let n = n.as_f64().unwrap_or(f64::NAN);
            if !is_safe_integer(n) {
                return Err(format!("{key}: {n} should be integer"));
            }
            if n > *max_index as f64 {
                return Err(format!("{key}: {n} should be < {max_index}"));
            }
            Ok(())
        }

        TypeReflection::Injection { .. } => Err(format!("{key}: unexpected injection")),

        TypeReflection::Unknown { .. } => {
            if allow_unknown {
                Ok(())
            } else {
                Err(format!("{key}: unknown not allowed"))
            }
        }
    }
}

fn validate_scalar(
    kind: ScalarKind,
    data: Option<&serde_json::Value>,
    key: &str,
) -> Result<(), String> {
    match kind {
        ScalarKind::Number => match data {
            Some(serde_json::Value::Number(_)) => Ok(()),
            _ => Err(bad_parameter(key, "number", data)),
        },
        ScalarKind::String => match data {
            Some(serde_json::Value::String(_)) => Ok(()),
            _ => Err(bad_parameter(key, "string", data)),
        },
        ScalarKind::Boolean => match data {
            Some(serde_json::Value::Bool(_)) => Ok(()),
            _ => Err(bad_parameter(key, "boolean", data)),
        },
        ScalarKind::Date => {
            let Some(serde_json::Value::String(s)) = data else {
                return Err(bad_parameter(key, "Date", data));
            };
            if DATE_RE.is_match(s) {
                Ok(())
            } else {
                Err(format!("Parameter {key} bad ISO date: {s}"))
            }
        }
        ScalarKind::Null => match data {
            Some(serde_json::Value::Null) => Ok(()),
            _ => Err(format!("Null expected, {} passed", display(data))),
        },
        ScalarKind::Undefined => match data {
            None => Ok(()),
            _ => Err(format!("Undefined expected, {} passed", display(data))),
        },
    }
}

/// Validate positional method arguments. Injection slots are skipped (they
/// are not caller-supplied); each wire argument is validated against the
/// corresponding non-injection parameter, and missing trailing arguments
/// must be optional.
pub fn validate_method(
    reflection: &MethodReflection,
    data: Option<&serde_json::Value>,
    method_name: &str,
) -> Result<(), String> {
    let wire_params: Vec<&TypeReflection> = reflection
        .params
        .iter()
        .filter(|p| !p.is_injection())
        .collect();

    if wire_params.is_empty() {
        return match data {
            None => Ok(()),
            Some(serde_json::Value::Array(items)) if items.is_empty() => Ok(()),
            Some(other) => Err(format!(
                "Method {method_name} has no parameters, {other} passed"
            )),
        };
    }

    let items = match data {
        None => &[][..],
        Some(serde_json::Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(format!("Method data for {method_name} should be Array")),
    };

    if items.len() > wire_params.len() {
        return Err(format!(
            "Method {method_name} has {} parameters, {} passed",
            wire_params.len(),
            items.len()
        ));
    }

    for (i, param) in wire_params.iter().enumerate() {
        validate(param, items.get(i), &format!("{method_name}[{i}]."), false)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tessera_common::InjectionKind;
    use test_case::test_case;

    fn ok(reflection: &TypeReflection, data: serde_json::Value) {
        assert_eq!(validate(reflection, Some(&data), "", false), Ok(()));
    }

    fn fails(reflection: &TypeReflection, data: serde_json::Value) -> String {
        validate(reflection, Some(&data), "", false).unwrap_err()
    }

    #[test]
    fn scalars() {
        ok(&TypeReflection::number(), json!(12.5));
        ok(&TypeReflection::string(), json!("hello"));
        ok(&TypeReflection::boolean(), json!(false));
        ok(&TypeReflection::null(), json!(null));
        assert_eq!(
            fails(&TypeReflection::number(), json!("12")),
            "Parameter  should be number, string given"
        );
        assert_eq!(
            fails(&TypeReflection::boolean(), json!(null)),
            "Parameter  should be boolean, object given"
        );
    }

    #[test_case("2021-03-14T09:26:53.000Z", true; "millis utc")]
    #[test_case("2021-03-14T09:26:53", true; "no zone")]
    #[test_case("2021-13-14T09:26:53Z", false; "bad month")]
    #[test_case("yesterday", false; "not a date")]
    fn date_strings(s: &str, expected: bool) {
        let result = validate(&TypeReflection::date(), Some(&json!(s)), "d", false);
        assert_eq!(result.is_ok(), expected, "{s}: {result:?}");
    }

    #[test]
    fn optional_accepts_absent_and_null() {
        let refl = TypeReflection::string().optional();
        assert_eq!(validate(&refl, None, "", false), Ok(()));
        ok(&refl, json!(null));
        assert!(validate(&TypeReflection::string(), None, "", false).is_err());
    }

    #[test]
    fn object_rejects_unknown_keys_with_path() {
        let refl = TypeReflection::object([
            ("id", TypeReflection::number()),
            ("name", TypeReflection::string().optional()),
        ]);
        ok(&refl, json!({"id": 1}));
        ok(&refl, json!({"id": 1, "name": "n"}));
        assert_eq!(
            fails(&refl, json!({"id": 1, "bogus": 2})),
            "Property .bogus not in interface with keys [id, name]"
        );
        assert_eq!(
            fails(&refl, json!({"name": "n"})),
            "Property .id of interface [id, name] not in data with keys [name]"
        );
    }

    #[test]
    fn nested_paths_name_the_offender() {
        let refl = TypeReflection::object([(
            "user",
            TypeReflection::object([("age", TypeReflection::number())]),
        )]);
        assert_eq!(
            fails(&refl, json!({"user": {"age": "old"}})),
            "Parameter user.age. should be number, string given"
        );
    }

    #[test]
    fn arrays_and_indexed_maps() {
        let refl = TypeReflection::array(TypeReflection::number());
        ok(&refl, json!([1, 2, 3]));
        assert_eq!(
            fails(&refl, json!([1, "two"])),
            "Parameter [1]. should be number, string given"
        );

        let map = TypeReflection::indexed_map(KeyKind::Number, TypeReflection::string());
        ok(&map, json!({"0": "a", "12": "b"}));
        assert_eq!(
            fails(&map, json!({"01": "a"})),
            "Bad number key in : 01"
        );
    }

    #[test]
    fn tuple_trailing_optionals_bound_the_length() {
        let refl = TypeReflection::tuple([
            TypeReflection::string(),
            TypeReflection::number().optional(),
            TypeReflection::boolean().optional(),
        ]);
        assert!(validate(&refl, Some(&json!([])), "t", false).is_err());
        ok(&refl, json!(["a"]));
        ok(&refl, json!(["a", 1]));
        ok(&refl, json!(["a", 1, true]));
        assert_eq!(
            fails(&refl, json!(["a", 1, true, "extra"])),
            "'': bad tuple length 3"
        );
    }

    #[test]
    fn union_takes_first_success_and_reports_all_failures() {
        let refl = TypeReflection::union([TypeReflection::number(), TypeReflection::string()]);
        ok(&refl, json!(5));
        ok(&refl, json!("five"));
        let err = fails(&refl, json!(true));
        assert!(err.starts_with("'': bad value for union\n"));
        assert!(err.contains("[0]. should be number"));
        assert!(err.contains("[1]. should be string"));
    }

    #[test]
    fn enum_index_requires_safe_integer_in_range() {
        let refl = TypeReflection::enum_index(2);
        ok(&refl, json!(0));
        ok(&refl, json!(2));
        assert_eq!(fails(&refl, json!(1.5)), ": 1.5 should be integer");
        assert_eq!(fails(&refl, json!(3)), ": 3 should be < 2");
    }

    #[test]
    fn literal_values() {
        ok(&TypeReflection::literal("on"), json!("on"));
        assert_eq!(
            fails(&TypeReflection::literal("on"), json!("off")),
            "'': 'off' should be equal to 'on'"
        );
    }

    #[test]
    fn unknown_requires_explicit_permission() {
        let refl = TypeReflection::unknown();
        assert!(validate(&refl, Some(&json!(42)), "k", false).is_err());
        assert_eq!(validate(&refl, Some(&json!(42)), "k", true), Ok(()));
    }

    #[test]
    fn method_validation_skips_injection_slots() {
        let refl = MethodReflection::new(
            vec![
                TypeReflection::injection(InjectionKind::ApiUserId),
                TypeReflection::string(),
            ],
            None,
        );
        assert_eq!(
            validate_method(&refl, Some(&json!(["hello"])), "m"),
            Ok(())
        );
        assert_eq!(
            validate_method(&refl, Some(&json!(["a", "b"])), "m"),
            Err("Method m has 1 parameters, 2 passed".into())
        );
        assert_eq!(
            validate_method(&refl, Some(&json!([42])), "m"),
            Err("Parameter m[0]. should be string, number given".into())
        );
    }

    #[test]
    fn method_without_parameters_rejects_data() {
        let refl = MethodReflection::default();
        assert_eq!(validate_method(&refl, None, "m"), Ok(()));
        assert_eq!(validate_method(&refl, Some(&json!([])), "m"), Ok(()));
        assert!(validate_method(&refl, Some(&json!([1])), "m").is_err());
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let refl = MethodReflection::new(
            vec![TypeReflection::string(), TypeReflection::number().optional()],
            None,
        );
        assert_eq!(validate_method(&refl, Some(&json!(["x"])), "m"), Ok(()));
        assert!(validate_method(&refl, Some(&json!([])), "m").is_err());
    }
}
