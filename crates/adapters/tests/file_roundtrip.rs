use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use pgform_adapters::{load_schema_file, read_document, FileInitDataLoader, FileSaveHandler};
use pgform_core::options::OptionEvaluatorRegistry;
use pgform_core::schema::{Mode, ViewContext};
use pgform_core::state::SchemaState;
use pgform_core::Action;
use serde_json::json;
use tempfile::TempDir;

const TABLE_SCHEMA: &str = r#"{
    "defaults": {"name": "", "columns": []},
    "fields": [
        {"id": "oid", "type": "int", "mode": ["edit", "properties"]},
        {"id": "name", "label": "Name", "noEmpty": true},
        {"id": "columns", "type": "collection", "canAdd": true, "canDelete": true,
         "schema": {"fields": [{"id": "name", "noEmpty": true}, {"id": "size", "type": "int"}]}}
    ]
}"#;

#[tokio::test]
async fn edits_loaded_from_gzip_are_saved_as_a_partitioned_payload() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let schema_path = temp_dir.path().join("table.schema.json");
    fs::write(&schema_path, TABLE_SCHEMA).expect("failed to write schema");

    let data_path = temp_dir.path().join("table.json.gz");
    let mut encoder = GzEncoder::new(
        File::create(&data_path).expect("failed to create data file"),
        Compression::default(),
    );
    encoder
        .write_all(
            br#"{"oid": 7, "name": "orders",
                 "columns": [{"oid": 1, "name": "id", "size": 4}, {"oid": 2, "name": "total", "size": 8}]}"#,
        )
        .expect("failed to write data");
    encoder.finish().expect("failed to finish data file");

    let schema = Arc::new(load_schema_file(&schema_path).expect("schema should load"));
    let mut state = SchemaState::new(
        schema,
        ViewContext::new(Mode::Edit),
        Arc::new(OptionEvaluatorRegistry::with_builtins()),
    )
    .with_loader(Arc::new(FileInitDataLoader::new(&data_path)));
    state.initialise(false).await.expect("initialise failed");
    assert!(!state.is_new());

    state.dispatch(Action::set_value("name", json!("purchase_orders")));
    state.dispatch(Action::set_value("columns.0.size", json!(16)));
    state.dispatch(Action::delete_row("columns", 1));
    assert!(state.is_dirty());

    let out_path = temp_dir.path().join("saved").join("changes.json");
    let handler = FileSaveHandler::new(&out_path);
    let payload = state.save(&handler).await.expect("save failed");

    let expected = json!({
        "oid": 7,
        "name": "purchase_orders",
        "columns": {
            "deleted": [{"oid": 2, "name": "total", "size": 8}],
            "changed": [{"oid": 1, "size": 16}]
        }
    });
    assert_eq!(payload, expected);
    assert_eq!(
        read_document(&out_path).expect("saved file should parse"),
        json!({"is_new": false, "payload": expected})
    );
}

#[tokio::test]
async fn missing_data_file_surfaces_as_a_form_error() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let schema_path = temp_dir.path().join("table.schema.json");
    fs::write(&schema_path, TABLE_SCHEMA).expect("failed to write schema");

    let schema = Arc::new(load_schema_file(&schema_path).expect("schema should load"));
    let mut state = SchemaState::new(
        schema,
        ViewContext::new(Mode::Edit),
        Arc::new(OptionEvaluatorRegistry::with_builtins()),
    )
    .with_loader(Arc::new(FileInitDataLoader::new(temp_dir.path().join("gone.json"))));
    state.initialise(false).await.expect("initialise should not fail");

    assert!(state.is_ready());
    assert!(state
        .errors()
        .message
        .as_deref()
        .is_some_and(|message| message.contains("failed to read document")));
}
