use serde_json::{Number, Value};

/// Tolerant equality used for change detection.
///
/// Besides deep equality this treats `null`/missing as equal to `""` and to
/// `false`, and two scalars as equal when their string forms match
/// (`5 == "5"`). `0` and `false` are never equal.
#[must_use]
pub fn is_value_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }

    if null_matches_blank(left, right) || null_matches_blank(right, left) {
        return true;
    }

    match (scalar_string(left), scalar_string(right)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[must_use]
pub fn is_value_equal_opt(left: Option<&Value>, right: Option<&Value>) -> bool {
    is_value_equal(left.unwrap_or(&Value::Null), right.unwrap_or(&Value::Null))
}

/// Key-wise tolerant comparison of two objects; anything else falls back to
/// [`is_value_equal`].
#[must_use]
pub fn is_object_equal(left: &Value, right: &Value) -> bool {
    let (Value::Object(left_map), Value::Object(right_map)) = (left, right) else {
        return is_value_equal(left, right);
    };

    left_map
        .keys()
        .chain(right_map.keys())
        .all(|key| is_value_equal_opt(left_map.get(key), right_map.get(key)))
}

fn null_matches_blank(nullish: &Value, other: &Value) -> bool {
    nullish.is_null() && (matches!(other, Value::Bool(false)) || other == "")
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number_string(number)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub(crate) fn number_string(number: &Number) -> String {
    match number.as_f64() {
        Some(float) if number.is_f64() && float.fract() == 0.0 && float.is_finite() => {
            format!("{float:.0}")
        }
        _ => number.to_string(),
    }
}

/// JavaScript-style truthiness of an attribute value.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{is_object_equal, is_truthy, is_value_equal, is_value_equal_opt};

    #[test]
    fn null_equals_empty_string() {
        assert!(is_value_equal(&Value::Null, &json!("")));
        assert!(is_value_equal(&json!(""), &Value::Null));
    }

    #[test]
    fn missing_equals_false() {
        assert!(is_value_equal_opt(None, Some(&json!(false))));
        assert!(!is_value_equal_opt(None, Some(&json!(true))));
    }

    #[test]
    fn number_equals_its_string_form() {
        assert!(is_value_equal(&json!(5), &json!("5")));
        assert!(is_value_equal(&json!(5.0), &json!("5")));
        assert!(!is_value_equal(&json!(5), &json!("6")));
    }

    #[test]
    fn zero_is_not_tolerantly_equal_to_false() {
        assert!(!is_value_equal(&json!(0), &json!(false)));
        assert!(!is_value_equal(&Value::Null, &json!(0)));
    }

    #[test]
    fn containers_compare_structurally_only() {
        assert!(is_value_equal(&json!([1, 2]), &json!([1, 2])));
        assert!(!is_value_equal(&json!([1]), &json!("1")));
        assert!(!is_value_equal(&json!({"a": 1}), &json!({"a": "1"})));
    }

    #[test]
    fn object_equality_is_key_wise_tolerant() {
        assert!(is_object_equal(
            &json!({"cid": "c1", "a": 5, "b": null}),
            &json!({"cid": "c1", "a": "5", "b": ""})
        ));
        assert!(is_object_equal(&json!({"a": 1}), &json!({"a": 1, "flag": false})));
        assert!(!is_object_equal(&json!({"a": 1}), &json!({"a": 2})));
    }

    #[test]
    fn truthiness_treats_blank_zero_and_null_as_false() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([])));
    }
}
