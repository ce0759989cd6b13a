use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgform_core::schema::{
    CollectionSpec, Field, FieldKind, InputKind, Mode, Schema, SchemaError,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::loader::{read_document, DocumentError};

#[derive(Debug, Error)]
pub enum SchemaFileError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("invalid schema description in {path}: {source}")]
    Shape {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid schema description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("field `{field}` has unknown type `{kind}`")]
    UnknownType { field: String, kind: String },
    #[error("field `{field}` of type `{kind}` needs a nested `schema`")]
    MissingSchema { field: String, kind: String },
    #[error("field of type `{kind}` needs an `id`")]
    MissingId { kind: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Declarative schema description. Attribute expressions are literals only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaDescription {
    pub id_attribute: Option<String>,
    pub defaults: Map<String, Value>,
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldDescription {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Option<String>,
    pub group: Option<String>,
    pub mode: Vec<Mode>,
    pub server_type: Vec<String>,
    #[serde(rename = "min_version")]
    pub min_version: Option<u32>,
    #[serde(rename = "max_version")]
    pub max_version: Option<u32>,
    pub no_empty: bool,
    pub no_empty_label: Option<String>,
    pub exclude: bool,
    pub skip_change: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub schema: Option<SchemaDescription>,
    pub unique_col: Vec<String>,
    pub fixed_rows: Option<Vec<Value>>,
    pub columns: Option<Vec<String>>,
    /// Everything else: `visible`, `disabled`, `canAdd`, ...
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

pub fn load_schema_file(path: &Path) -> Result<Schema, SchemaFileError> {
    let raw = read_document(path)?;
    let description: SchemaDescription =
        serde_json::from_value(raw).map_err(|source| SchemaFileError::Shape {
            path: path.to_path_buf(),
            source,
        })?;
    build_schema(&description)
}

pub fn parse_schema(raw: &str) -> Result<Schema, SchemaFileError> {
    let description: SchemaDescription = serde_json::from_str(raw)?;
    build_schema(&description)
}

pub fn build_schema(description: &SchemaDescription) -> Result<Schema, SchemaFileError> {
    let fields = description
        .fields
        .iter()
        .map(build_field)
        .collect::<Result<Vec<_>, _>>()?;
    let mut schema = Schema::new(fields)?.with_defaults(description.defaults.clone());
    if let Some(id_attribute) = &description.id_attribute {
        schema = schema.with_id_attribute(id_attribute.as_str());
    }
    Ok(schema)
}

fn build_field(description: &FieldDescription) -> Result<Field, SchemaFileError> {
    let kind = field_kind(description)?;
    let mut field = match (&description.id, &kind) {
        (Some(id), _) => Field::new(id.as_str(), kind),
        (None, FieldKind::NestedTab(_) | FieldKind::NestedFieldset(_)) => Field::structural(kind),
        (None, _) => {
            return Err(SchemaFileError::MissingId {
                kind: description.kind.clone(),
            })
        }
    };

    if let Some(label) = &description.label {
        field = field.label(label.as_str());
    }
    if let Some(group) = &description.group {
        field = field.in_group(group.as_str());
    }
    if !description.mode.is_empty() {
        field = field.modes(description.mode.iter().copied());
    }
    if !description.server_type.is_empty() {
        field = field.server_types(description.server_type.iter().map(String::as_str));
    }
    if let Some(version) = description.min_version {
        field = field.min_version(version);
    }
    if let Some(version) = description.max_version {
        field = field.max_version(version);
    }
    if description.no_empty {
        field = field.no_empty();
    }
    if let Some(label) = &description.no_empty_label {
        field = field.no_empty_label(label.as_str());
    }
    if description.exclude {
        field = field.exclude();
    }
    if description.skip_change {
        field = field.skip_change();
    }
    for (name, value) in &description.attrs {
        field = field.attr(name.as_str(), value.clone());
    }
    Ok(field)
}

fn field_kind(description: &FieldDescription) -> Result<FieldKind, SchemaFileError> {
    let (min, max) = (description.min, description.max);
    let kind = match description.kind.as_str() {
        "" | "text" => FieldKind::Input(InputKind::Text),
        "multiline" => FieldKind::Input(InputKind::Multiline),
        "password" => FieldKind::Input(InputKind::Password),
        "int" => FieldKind::Input(InputKind::Int { min, max }),
        "numeric" => FieldKind::Input(InputKind::Numeric { min, max }),
        "switch" => FieldKind::Input(InputKind::Switch),
        "checkbox" => FieldKind::Input(InputKind::Checkbox),
        "select" => FieldKind::Input(InputKind::Select),
        "datetimepicker" => FieldKind::Input(InputKind::Date),
        "sql" => FieldKind::Input(InputKind::Sql),
        "group" => FieldKind::Group,
        "inline-groups" => FieldKind::InlineGroup,
        "nested-tab" => FieldKind::NestedTab(Arc::new(nested(description)?)),
        "nested-fieldset" => FieldKind::NestedFieldset(Arc::new(nested(description)?)),
        "collection" => {
            let mut spec = CollectionSpec::new(Arc::new(nested(description)?))
                .unique_cols(description.unique_col.iter().map(String::as_str));
            if let Some(rows) = &description.fixed_rows {
                spec = spec.fixed_rows(rows.clone());
            }
            if let Some(columns) = &description.columns {
                spec = spec.columns(columns.iter().map(String::as_str));
            }
            FieldKind::Collection(spec)
        }
        other => {
            return Err(SchemaFileError::UnknownType {
                field: description.id.clone().unwrap_or_default(),
                kind: other.to_string(),
            })
        }
    };
    Ok(kind)
}

fn nested(description: &FieldDescription) -> Result<Schema, SchemaFileError> {
    let child = description
        .schema
        .as_ref()
        .ok_or_else(|| SchemaFileError::MissingSchema {
            field: description.id.clone().unwrap_or_default(),
            kind: description.kind.clone(),
        })?;
    build_schema(child)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pgform_core::schema::{ExprContext, FieldKind, InputKind, Mode, ViewContext};
    use serde_json::json;
    use tempfile::TempDir;

    use super::{load_schema_file, parse_schema, SchemaFileError};

    const TABLE: &str = r#"{
        "defaults": {"columns": []},
        "fields": [
            {"id": "oid", "type": "int", "mode": ["edit", "properties"]},
            {"id": "name", "label": "Name", "noEmpty": true},
            {"id": "fillfactor", "type": "int", "min": 10, "max": 100, "min_version": 90600},
            {"type": "nested-fieldset", "schema": {"fields": [{"id": "comment", "type": "multiline"}]}},
            {"id": "columns", "type": "collection", "label": "Columns", "canAdd": true,
             "uniqueCol": ["name"], "columns": ["name"],
             "schema": {"fields": [{"id": "name"}, {"id": "size", "type": "int"}]}}
        ]
    }"#;

    #[test]
    fn builds_every_field_kind() {
        let schema = parse_schema(TABLE).expect("schema should parse");
        assert_eq!(schema.id_attribute(), "oid");
        assert_eq!(schema.defaults().get("columns"), Some(&json!([])));

        let oid = schema.field("oid").expect("oid field");
        assert!(!oid.is_mode_supported(Mode::Create));

        let fillfactor = schema.field("fillfactor").expect("fillfactor field");
        assert!(matches!(
            fillfactor.kind(),
            FieldKind::Input(InputKind::Int { min: Some(_), max: Some(_) })
        ));
        assert!(!fillfactor.is_supported_by_server(&ViewContext::new(Mode::Edit).with_server("pg", 90500)));

        assert!(schema.fields()[3].kind().nested_schema().is_some());

        let columns = schema.field("columns").expect("columns field");
        let spec = columns.kind().collection().expect("collection spec");
        assert_eq!(spec.unique_cols, ["name"]);
        assert_eq!(spec.columns.as_deref(), Some(&["name".to_string()][..]));

        let view = ViewContext::default();
        let ctx = ExprContext {
            schema: &schema,
            value: &json!({}),
            view: &view,
        };
        assert!(columns.attr_bool("canAdd", &ctx, false));
    }

    #[test]
    fn rejects_unknown_types_and_missing_children() {
        let unknown = parse_schema(r#"{"fields": [{"id": "a", "type": "slider"}]}"#)
            .expect_err("unknown type should fail");
        assert!(matches!(unknown, SchemaFileError::UnknownType { .. }));

        let orphan = parse_schema(r#"{"fields": [{"id": "rows", "type": "collection"}]}"#)
            .expect_err("collection without schema should fail");
        assert_eq!(orphan.to_string(), "field `rows` of type `collection` needs a nested `schema`");

        let groups = parse_schema(
            r#"{"fields": [{"id": "g", "type": "group"}, {"id": "g", "type": "group"}]}"#,
        )
        .expect_err("duplicate group should fail");
        assert!(matches!(groups, SchemaFileError::Schema(_)));
    }

    #[test]
    fn loads_schema_from_disk() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("table.schema.json");
        fs::write(&path, TABLE).expect("failed to write schema file");

        let schema = load_schema_file(&path).expect("schema should load");
        assert_eq!(schema.fields().len(), 5);

        fs::write(&path, r#"{"fields": 3}"#).expect("failed to write bad schema");
        assert!(matches!(
            load_schema_file(&path),
            Err(SchemaFileError::Shape { .. })
        ));
    }
}
