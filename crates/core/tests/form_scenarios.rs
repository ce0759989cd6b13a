use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgform_core::deps::DepChangeFn;
use pgform_core::options::{option_flag, OptionEvaluatorRegistry, CAN_ADD, READONLY, VISIBLE};
use pgform_core::schema::{CollectionSpec, DepRef, Field, Mode, Schema, ViewContext};
use pgform_core::state::{InitDataLoader, LoaderError, SchemaState};
use pgform_core::{Action, Path};
use serde_json::{json, Map, Value};

struct StaticData(Value);

#[async_trait]
impl InitDataLoader for StaticData {
    async fn load(&self) -> Result<Value, LoaderError> {
        Ok(self.0.clone())
    }
}

fn order_schema() -> Arc<Schema> {
    let item = Schema::new(vec![Field::int("qty").label("Quantity")]).expect("item schema");
    let mut defaults = Map::new();
    defaults.insert("name".to_string(), json!(""));
    defaults.insert("items".to_string(), json!([]));

    Arc::new(
        Schema::new(vec![
            Field::text("name").label("Name").no_empty(),
            Field::collection("items", CollectionSpec::new(Arc::new(item))).label("Items"),
        ])
        .expect("order schema")
        .with_defaults(defaults),
    )
}

fn registry() -> Arc<OptionEvaluatorRegistry> {
    Arc::new(OptionEvaluatorRegistry::with_builtins())
}

#[tokio::test]
async fn create_mode_form_reports_the_whole_document() {
    let mut state = SchemaState::new(order_schema(), ViewContext::new(Mode::Create), registry());
    state.initialise(false).await.expect("initialise failed");
    assert!(state.is_ready());
    assert!(state.is_new());

    state.dispatch(Action::set_value("name", json!("")));
    assert_eq!(state.errors().name.as_deref(), Some("name"));
    assert_eq!(state.errors().message.as_deref(), Some("'Name' cannot be empty."));

    state.dispatch(Action::set_value("name", json!("widget")));
    state.dispatch(Action::add_row("items", json!({"qty": 3})));

    assert!(state.is_dirty());
    assert!(state.errors().is_empty());
    assert_eq!(state.changes(false), json!({"name": "widget", "items": [{"qty": 3}]}));
}

#[tokio::test]
async fn actions_dispatched_while_loading_are_not_lost() {
    let mut state = SchemaState::new(order_schema(), ViewContext::new(Mode::Create), registry());
    state.dispatch(Action::set_value("name", json!("a")));
    state.dispatch(Action::add_row("items", json!({"qty": 1})));
    state.dispatch(Action::set_value("name", json!("c")));
    assert_eq!(state.change_id(), 0);

    state.initialise(false).await.expect("initialise failed");

    // INIT plus the three queued reductions.
    assert_eq!(state.change_id(), 4);
    assert_eq!(state.data()["name"], json!("c"));
    assert_eq!(state.data()["items"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn dependent_fields_recompute_without_touching_siblings() {
    let doubled: DepChangeFn = Arc::new(|level, _, _, _| {
        let x = level.get("x").and_then(Value::as_i64).unwrap_or_default();
        let mut patch = Map::new();
        patch.insert("y".to_string(), json!({"z": x * 42}));
        Some(patch)
    });
    let schema = Arc::new(
        Schema::new(vec![
            Field::int("x"),
            Field::int("x_other"),
            Field::text("y")
                .deps([DepRef::from("x")])
                .on_dep_change(doubled),
        ])
        .expect("schema"),
    );

    let mut state = SchemaState::new(schema, ViewContext::new(Mode::Create), registry());
    state.initialise(false).await.expect("initialise failed");
    state.dispatch(Action::set_value("x_other", json!(7)));
    assert!(state.value(&Path::parse("y.z")).is_none());

    state.dispatch(Action::set_value("x", json!(1)));
    assert_eq!(state.value(&Path::parse("y.z")), Some(json!(42)));
    assert_eq!(state.value(&Path::parse("x_other")), Some(json!(7)));
}

#[tokio::test]
async fn edit_mode_collection_changes_are_partitioned() {
    let item = Schema::new(vec![Field::text("oid"), Field::int("qty")]).expect("item schema");
    let schema = Arc::new(
        Schema::new(vec![
            Field::text("oid").modes([Mode::Edit]),
            Field::text("name"),
            Field::collection("items", CollectionSpec::new(Arc::new(item))),
        ])
        .expect("schema"),
    );
    let loader = Arc::new(StaticData(json!({
        "oid": 10,
        "name": "orders",
        "items": [{"oid": 1, "qty": 1}, {"oid": 2, "qty": 2}]
    })));

    let mut state = SchemaState::new(schema, ViewContext::new(Mode::Edit), registry())
        .with_loader(loader);
    state.initialise(false).await.expect("initialise failed");
    assert!(!state.is_new());
    assert!(!state.is_dirty());
    assert_eq!(state.changes(false), json!({}));

    state.dispatch(Action::delete_row("items", 1));
    state.dispatch(Action::add_row("items", json!({"qty": 9})));
    state.dispatch(Action::set_value("items.0.qty", json!(5)));

    assert_eq!(
        state.changes(false),
        json!({
            "oid": 10,
            "items": {
                "added": [{"qty": 9}],
                "deleted": [{"oid": 2, "qty": 2}],
                "changed": [{"oid": 1, "qty": 5}]
            }
        })
    );
}

#[tokio::test]
async fn dirty_flag_is_stable_across_repeated_change_queries() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut state = SchemaState::new(order_schema(), ViewContext::new(Mode::Create), registry())
        .on_data_change(move |dirty, _| sink.lock().expect("sink lock").push(dirty));
    state.initialise(false).await.expect("initialise failed");
    state.dispatch(Action::set_value("name", json!("widget")));

    let first = state.changes(false);
    let second = state.changes(false);
    assert_eq!(first, second);
    assert!(state.is_dirty());

    state.dispatch(Action::set_value("name", json!("")));
    assert!(!state.is_dirty());
    assert_eq!(
        seen.lock().expect("sink lock").as_slice(),
        &[false, true, false]
    );
}

#[tokio::test]
async fn properties_mode_locks_the_form() {
    let mut state = SchemaState::new(
        order_schema(),
        ViewContext::new(Mode::Properties),
        registry(),
    );
    state.initialise(false).await.expect("initialise failed");

    let tree = state.store(pgform_core::state::StoreKind::Options).get_state();
    assert_eq!(option_flag(&tree, &Path::parse("name"), READONLY), Some(true));
    assert_eq!(option_flag(&tree, &Path::parse("name"), VISIBLE), Some(true));
    assert_eq!(option_flag(&tree, &Path::parse("items"), CAN_ADD), Some(false));
}
