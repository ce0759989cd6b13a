use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::compare::number_string;
use crate::path::Path;
use crate::schema::{CollectionSpec, Field, FieldKind, InputKind, Schema};

/// The first failure found by a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    #[serde(serialize_with = "serialize_path")]
    pub path: Path,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn serialize_path<S: serde::Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.flat())
}

#[must_use]
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

#[must_use]
pub fn empty_validator(label: &str, value: Option<&Value>) -> Option<String> {
    is_empty_value(value).then(|| format!("'{label}' cannot be empty."))
}

#[must_use]
pub fn integer_validator(label: &str, value: Option<&Value>) -> Option<String> {
    if is_empty_value(value) {
        return None;
    }
    let valid = match value {
        Some(Value::Number(number)) => {
            number.is_i64() || number.is_u64() || number.as_f64().is_some_and(|n| n.fract() == 0.0)
        }
        Some(Value::String(text)) => text.trim().parse::<i64>().is_ok(),
        _ => false,
    };
    (!valid).then(|| format!("'{label}' must be an integer."))
}

#[must_use]
pub fn numeric_validator(label: &str, value: Option<&Value>) -> Option<String> {
    if is_empty_value(value) {
        return None;
    }
    (as_number(value).is_none()).then(|| format!("'{label}' must be a numeric."))
}

#[must_use]
pub fn min_max_validator(
    label: &str,
    value: Option<&Value>,
    min: Option<f64>,
    max: Option<f64>,
) -> Option<String> {
    let number = as_number(value)?;
    if let Some(min) = min.filter(|min| number < *min) {
        return Some(format!(
            "'{label}' must be greater than or equal to {}.",
            bound_string(min)
        ));
    }
    if let Some(max) = max.filter(|max| number > *max) {
        return Some(format!(
            "'{label}' must be less than or equal to {}.",
            bound_string(max)
        ));
    }
    None
}

fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn bound_string(bound: f64) -> String {
    serde_json::Number::from_f64(bound).map_or_else(|| bound.to_string(), |n| number_string(&n))
}

/// Index of the first row whose key columns repeat an earlier row.
#[must_use]
pub fn check_unique_cols(rows: &[Value], cols: &[String]) -> Option<usize> {
    if cols.is_empty() {
        return None;
    }
    let mut seen: Vec<Vec<&Value>> = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let key = cols
            .iter()
            .map(|col| row.get(col).unwrap_or(&Value::Null))
            .collect::<Vec<_>>();
        if seen.contains(&key) {
            return Some(index);
        }
        seen.push(key);
    }
    None
}

/// Walks `schema` against `data` and returns the first failure.
///
/// Collection rows are checked before their uniqueness constraint; the
/// schema's custom validator runs after every built-in check has passed.
#[must_use]
pub fn validate_schema(
    schema: &Schema,
    data: &Value,
    access_path: &Path,
    collection_label: Option<&str>,
) -> Option<ValidationError> {
    for field in schema.fields() {
        if field.id() == Some(schema.id_attribute()) {
            continue;
        }
        let failure = match field.kind() {
            FieldKind::Collection(spec) => validate_collection(field, spec, data, access_path),
            FieldKind::NestedTab(child) | FieldKind::NestedFieldset(child) => {
                validate_schema(child, data, access_path, None)
            }
            FieldKind::Input(input) => validate_input(field, *input, data, access_path, collection_label),
            FieldKind::Group | FieldKind::InlineGroup => None,
        };
        if failure.is_some() {
            return failure;
        }
    }

    let mut custom = None;
    schema.validate_custom(data, &mut |path, message| {
        if custom.is_none() {
            custom = Some(ValidationError {
                path: access_path.join(path),
                message: message.to_string(),
            });
        }
    });
    custom
}

fn validate_collection(
    field: &Field,
    spec: &CollectionSpec,
    data: &Value,
    access_path: &Path,
) -> Option<ValidationError> {
    let id = field.id()?;
    let path = access_path.child(id);
    let rows = data.get(id).and_then(Value::as_array).map_or(&[][..], Vec::as_slice);

    for (index, row) in rows.iter().enumerate() {
        let failure = validate_schema(&spec.schema, row, &path.child(index), field.label_text());
        if failure.is_some() {
            return failure;
        }
    }

    let duplicate = check_unique_cols(rows, &spec.unique_cols)?;
    debug!(collection = %path, row = duplicate, "duplicate row in unique columns");
    let names = spec
        .schema
        .fields()
        .iter()
        .filter(|col| col.id().is_some_and(|id| spec.unique_cols.iter().any(|u| u == id)))
        .map(Field::display_label)
        .collect::<Vec<_>>()
        .join(", ");
    let message = match field.label_text().filter(|label| !label.trim().is_empty()) {
        Some(label) => format!("{names} in {label} must be unique."),
        None => format!("{names} must be unique."),
    };
    Some(ValidationError { path, message })
}

fn validate_input(
    field: &Field,
    input: InputKind,
    data: &Value,
    access_path: &Path,
    collection_label: Option<&str>,
) -> Option<ValidationError> {
    let id = field.id()?;
    let value = data.get(id);
    let label = field.display_label();

    let mut message = None;
    if field.is_no_empty() {
        let empty_label = match collection_label {
            Some(collection) => format!("{label} in {collection}"),
            None => field.empty_label().unwrap_or(label).to_string(),
        };
        message = empty_validator(&empty_label, value);
    }
    if message.is_none() {
        message = match input {
            InputKind::Int { min, max } => integer_validator(label, value)
                .or_else(|| min_max_validator(label, value, min, max)),
            InputKind::Numeric { min, max } => numeric_validator(label, value)
                .or_else(|| min_max_validator(label, value, min, max)),
            _ => None,
        };
    }

    message.map(|message| ValidationError {
        path: access_path.child(id),
        message,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{
        check_unique_cols, empty_validator, integer_validator, min_max_validator,
        numeric_validator, validate_schema,
    };
    use crate::path::Path;
    use crate::schema::{CollectionSpec, Field, FieldKind, InputKind, Schema};

    fn table_schema() -> Schema {
        let column = Schema::new(vec![
            Field::text("name").label("Name").no_empty(),
            Field::new(
                "length",
                FieldKind::Input(InputKind::Int {
                    min: Some(1.0),
                    max: Some(100.0),
                }),
            )
            .label("Length"),
        ])
        .expect("column schema");

        Schema::new(vec![
            Field::text("oid").no_empty(),
            Field::text("name").label("Name").no_empty(),
            Field::collection(
                "columns",
                CollectionSpec::new(Arc::new(column)).unique_cols(["name"]),
            )
            .label("Columns"),
        ])
        .expect("table schema")
    }

    fn failure(data: &serde_json::Value) -> Option<(String, String)> {
        validate_schema(&table_schema(), data, &Path::root(), None)
            .map(|error| (error.path.flat(), error.message))
    }

    #[test]
    fn scalar_validators_produce_labelled_messages() {
        assert_eq!(
            empty_validator("Name", Some(&json!("  "))),
            Some("'Name' cannot be empty.".to_string())
        );
        assert_eq!(
            integer_validator("Len", Some(&json!("1.5"))),
            Some("'Len' must be an integer.".to_string())
        );
        assert_eq!(integer_validator("Len", Some(&json!("15"))), None);
        assert_eq!(
            numeric_validator("Cost", Some(&json!("abc"))),
            Some("'Cost' must be a numeric.".to_string())
        );
        assert_eq!(
            min_max_validator("Len", Some(&json!(0)), Some(1.0), None),
            Some("'Len' must be greater than or equal to 1.".to_string())
        );
        assert_eq!(
            min_max_validator("Len", Some(&json!(7.5)), None, Some(5.5)),
            Some("'Len' must be less than or equal to 5.5.".to_string())
        );
    }

    #[test]
    fn id_attribute_is_never_validated() {
        assert_eq!(
            failure(&json!({"name": ""})),
            Some(("name".to_string(), "'Name' cannot be empty.".to_string()))
        );
    }

    #[test]
    fn row_fields_use_the_collection_label() {
        let data = json!({"name": "t", "columns": [{"name": "a"}, {"name": ""}]});
        assert_eq!(
            failure(&data),
            Some((
                "columns.1.name".to_string(),
                "'Name in Columns' cannot be empty.".to_string()
            ))
        );
    }

    #[test]
    fn rows_are_checked_before_uniqueness() {
        let data = json!({
            "name": "t",
            "columns": [{"name": "a", "length": 500}, {"name": "a"}]
        });
        assert_eq!(
            failure(&data),
            Some((
                "columns.0.length".to_string(),
                "'Length' must be less than or equal to 100.".to_string()
            ))
        );

        let data = json!({"name": "t", "columns": [{"name": "a"}, {"name": "a"}]});
        assert_eq!(
            failure(&data),
            Some((
                "columns".to_string(),
                "Name in Columns must be unique.".to_string()
            ))
        );
    }

    #[test]
    fn unique_check_reports_the_repeating_row() {
        let rows = vec![json!({"a": 1, "b": 1}), json!({"a": 1, "b": 2}), json!({"a": 1, "b": 1})];
        assert_eq!(check_unique_cols(&rows, &["a".to_string(), "b".to_string()]), Some(2));
        assert_eq!(check_unique_cols(&rows, &["b".to_string()]), Some(2));
        assert_eq!(check_unique_cols(&rows, &[]), None);
    }

    #[test]
    fn custom_validator_runs_last_with_relative_paths() {
        let schema = Schema::new(vec![Field::text("a").no_empty()])
            .expect("schema")
            .with_validator(Arc::new(|data, set_error| {
                if data["a"] == json!("x") {
                    set_error(&Path::parse("a"), "x is reserved");
                    return true;
                }
                false
            }));

        let nested = validate_schema(&schema, &json!({"a": "x"}), &Path::parse("rows.2"), None)
            .expect("custom failure");
        assert_eq!(nested.path, Path::parse("rows.2.a"));
        assert_eq!(nested.message, "x is reserved");

        let builtin = validate_schema(&schema, &json!({}), &Path::root(), None)
            .expect("empty failure");
        assert_eq!(builtin.message, "'a' cannot be empty.");
    }
}
