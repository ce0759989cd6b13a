use std::collections::BTreeSet;

use pgform_core::compare::is_truthy;
use pgform_core::data::row_cid;
use pgform_core::options::{
    ADD_ON_TOP, CAN_ADD_ROW, CAN_DELETE_ROW, CAN_EDIT_ROW, EDITABLE, EXPAND_EDIT_ON_ADD, READONLY,
    VISIBLE,
};
use pgform_core::path::{Path, PathSegment};
use pgform_core::schema::{CollectionSpec, Field, FieldKind, Schema};
use pgform_core::state::SchemaState;
use pgform_core::Action;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::feature::{
    node_flag, Column, ColumnContext, RowContext, RowDecoration, TableConfig, TableContext,
};
use crate::registry::{FeatureRegistry, FeatureSet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("no collection field at `{path}`")]
    NotACollection { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCell {
    pub column: String,
    pub value: Value,
    pub visible: bool,
    pub editable: bool,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridRow {
    pub index: usize,
    pub cid: Option<String>,
    pub cells: Vec<GridCell>,
    #[serde(flatten)]
    pub decoration: RowDecoration,
}

/// Controller for one collection rendered as a table.
#[derive(Debug)]
pub struct DataGrid {
    path: Path,
    label: String,
    spec: CollectionSpec,
    features: FeatureSet,
    columns: Vec<Column>,
    config: TableConfig,
    search_text: String,
    expanded: BTreeSet<String>,
}

impl DataGrid {
    /// Builds a grid for the collection at `path` of the form's document.
    pub fn for_path(
        schema: &Schema,
        path: Path,
        registry: &FeatureRegistry,
    ) -> Result<Self, GridError> {
        let field = find_collection(schema, path.segments()).ok_or_else(|| {
            GridError::NotACollection {
                path: path.flat(),
            }
        })?;
        Self::new(field, path, registry)
    }

    pub fn new(field: &Field, path: Path, registry: &FeatureRegistry) -> Result<Self, GridError> {
        let spec = field
            .kind()
            .collection()
            .cloned()
            .ok_or_else(|| GridError::NotACollection { path: path.flat() })?;
        let features = registry.instantiate();
        debug!(path = %path, features = ?features.names(), "created data grid");
        Ok(Self {
            label: field.display_label().to_string(),
            columns: base_columns(&spec),
            path,
            spec,
            features,
            config: TableConfig::default(),
            search_text: String::new(),
            expanded: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    #[must_use]
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn set_search(&mut self, text: impl Into<String>) {
        self.search_text = text.into();
    }

    /// Re-derives columns and table settings from the current options.
    pub fn refresh(&mut self, state: &SchemaState) {
        let options = self.collection_options(state);
        let rows = self.rows(state);

        let mut columns = base_columns(&self.spec);
        self.features.generate_columns(&mut ColumnContext {
            columns: &mut columns,
            options: &options,
            view: state.view(),
            spec: &self.spec,
        });
        self.columns = columns;

        let mut config = TableConfig::default();
        self.features.on_table(&mut TableContext {
            config: &mut config,
            options: &options,
            view: state.view(),
            spec: &self.spec,
            rows: &rows,
            search_text: &self.search_text,
        });
        self.config = config;
    }

    /// Visible rows with per-row decoration and per-cell flags.
    pub fn render_rows(&mut self, state: &SchemaState) -> Vec<GridRow> {
        self.refresh(state);
        let options = self.collection_options(state);
        let rows = self.rows(state);

        let mut rendered = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let row_options = options.get(index.to_string()).cloned().unwrap_or(Value::Null);
            let mut decoration = RowDecoration::default();
            self.features.on_row(&mut RowContext {
                index,
                row,
                row_options: &row_options,
                config: &self.config,
                columns: &self.columns,
                expanded: &self.expanded,
                decoration: &mut decoration,
            });
            if decoration.hidden {
                continue;
            }

            let cells = self
                .columns
                .iter()
                .filter_map(Column::field_id)
                .map(|id| {
                    let cell = row_options.get(id).unwrap_or(&Value::Null);
                    GridCell {
                        column: id.to_string(),
                        value: row.get(id).cloned().unwrap_or(Value::Null),
                        visible: cell.get(VISIBLE).map_or(true, is_truthy),
                        editable: cell.get(EDITABLE).map_or(true, is_truthy),
                        readonly: node_flag(cell, READONLY),
                    }
                })
                .collect();
            rendered.push(GridRow {
                index,
                cid: row_cid(row).map(str::to_string),
                cells,
                decoration,
            });
        }
        rendered
    }

    /// Adds a row built from the row schema's defaults. Returns `false` when
    /// the collection does not allow adding.
    pub fn add_row(&mut self, state: &mut SchemaState) -> bool {
        let options = self.collection_options(state);
        if !node_flag(&options, CAN_ADD_ROW) {
            return false;
        }
        let add_on_top = node_flag(&options, ADD_ON_TOP);
        state.dispatch(Action::AddRow {
            path: self.path.clone(),
            value: self.spec.schema.new_row(&Value::Null),
            add_on_top,
        });

        self.refresh(state);
        if node_flag(&options, EXPAND_EDIT_ON_ADD) && self.config.expandable {
            let rows = self.rows(state);
            let added = if add_on_top { rows.first() } else { rows.last() };
            if let Some(cid) = added.and_then(row_cid) {
                self.expanded.insert(cid.to_string());
            }
        }
        true
    }

    pub fn delete_row(&mut self, state: &mut SchemaState, index: usize) -> bool {
        self.refresh(state);
        let rows = self.rows(state);
        let Some(row) = rows.get(index) else {
            return false;
        };
        let options = self.collection_options(state);
        let allowed = self.config.deletable
            && index >= self.config.fixed_rows
            && row_option(&options, index, CAN_DELETE_ROW, true);
        if !allowed {
            return false;
        }

        if let Some(cid) = row_cid(row) {
            self.expanded.remove(cid);
        }
        state.dispatch(Action::delete_row(self.path.clone(), index));
        true
    }

    pub fn move_row(&mut self, state: &mut SchemaState, old_index: usize, new_index: usize) -> bool {
        self.refresh(state);
        let len = self.rows(state).len();
        let fixed = self.config.fixed_rows;
        let allowed = self.config.reorderable
            && old_index != new_index
            && old_index < len
            && new_index < len
            && old_index >= fixed
            && new_index >= fixed;
        if allowed {
            state.dispatch(Action::move_row(self.path.clone(), old_index, new_index));
        }
        allowed
    }

    /// Flips the inline edit form of one row. Returns whether it is now open.
    pub fn toggle_expanded(&mut self, state: &SchemaState, index: usize) -> bool {
        self.refresh(state);
        let rows = self.rows(state);
        let options = self.collection_options(state);
        let Some(cid) = rows.get(index).and_then(row_cid) else {
            return false;
        };
        if !self.config.expandable || !row_option(&options, index, CAN_EDIT_ROW, true) {
            return false;
        }
        if self.expanded.remove(cid) {
            return false;
        }
        self.expanded.insert(cid.to_string());
        true
    }

    #[must_use]
    pub fn is_expanded(&self, state: &SchemaState, index: usize) -> bool {
        self.rows(state)
            .get(index)
            .and_then(row_cid)
            .is_some_and(|cid| self.expanded.contains(cid))
    }

    #[must_use]
    pub fn cell_change_action(&self, index: usize, column: &str, value: Value) -> Action {
        Action::SetValue {
            path: self.path.child(index).child(column),
            value,
        }
    }

    /// Writes a cell when its options allow editing.
    pub fn change_cell(&self, state: &mut SchemaState, index: usize, column: &str, value: Value) -> bool {
        let options = self.collection_options(state);
        let cell = options
            .get(index.to_string())
            .and_then(|row| row.get(column))
            .unwrap_or(&Value::Null);
        if cell.is_null() || node_flag(cell, READONLY) || !cell.get(EDITABLE).map_or(true, is_truthy) {
            return false;
        }
        state.dispatch(self.cell_change_action(index, column, value));
        true
    }

    /// Radio-style column: clears `column` on every row, then sets it on
    /// row `index`.
    pub fn set_exclusive(&self, state: &mut SchemaState, index: usize, column: &str) {
        state.dispatch(Action::bulk_update(self.path.clone(), column));
        state.dispatch(self.cell_change_action(index, column, Value::Bool(true)));
    }

    fn collection_options(&self, state: &SchemaState) -> Value {
        state.options(&self.path).unwrap_or(Value::Null)
    }

    fn rows(&self, state: &SchemaState) -> Vec<Value> {
        match state.value(&self.path) {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        }
    }
}

fn row_option(options: &Value, index: usize, name: &str, default: bool) -> bool {
    options
        .get(index.to_string())
        .and_then(|row| row.get(name))
        .map_or(default, is_truthy)
}

/// Data columns of the row schema, restricted and ordered by `columns`.
fn base_columns(spec: &CollectionSpec) -> Vec<Column> {
    let cell_fields = spec
        .schema
        .fields()
        .iter()
        .filter(|field| matches!(field.kind(), FieldKind::Input(_)))
        .filter_map(|field| field.id().map(|id| (id, field)));

    match &spec.columns {
        Some(order) => order
            .iter()
            .filter_map(|wanted| {
                spec.schema
                    .field(wanted)
                    .filter(|field| matches!(field.kind(), FieldKind::Input(_)))
                    .map(|field| Column::field(wanted.as_str(), field.display_label()))
            })
            .collect(),
        None => cell_fields
            .map(|(id, field)| Column::field(id, field.display_label()))
            .collect(),
    }
}

/// Follows `segments` through collections (skipping row indices) and nested
/// schemas to the collection field they end at.
fn find_collection<'a>(schema: &'a Schema, segments: &[PathSegment]) -> Option<&'a Field> {
    let (first, rest) = segments.split_first()?;
    let PathSegment::Key(id) = first else {
        return None;
    };
    let field = find_field(schema, id)?;
    let spec = field.kind().collection()?;
    match rest {
        [] => Some(field),
        [PathSegment::Index(_), tail @ ..] => find_collection(&spec.schema, tail),
        _ => None,
    }
}

fn find_field<'a>(schema: &'a Schema, id: &str) -> Option<&'a Field> {
    schema.fields().iter().find_map(|field| {
        if field.id() == Some(id) {
            return Some(field);
        }
        field
            .kind()
            .nested_schema()
            .and_then(|child| find_field(child, id))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use pgform_core::options::OptionEvaluatorRegistry;
    use pgform_core::path::Path;
    use pgform_core::schema::{CollectionSpec, Expr, Field, Mode, Schema, ViewContext};
    use pgform_core::state::{InitDataLoader, LoaderError, SchemaState};
    use pgform_core::Action;
    use serde_json::{json, Value};

    use super::{DataGrid, GridError};
    use crate::feature::ColumnKind;
    use crate::registry::FeatureRegistry;

    struct StoredTable;

    #[async_trait]
    impl InitDataLoader for StoredTable {
        async fn load(&self) -> Result<Value, LoaderError> {
            Ok(json!({"oid": 7, "name": "t", "columns": [{"name": "id", "type": "int"}]}))
        }
    }

    fn columns_schema(mode: Mode) -> Arc<Schema> {
        let column = Schema::new(vec![
            Field::text("name").label("Name"),
            Field::text("type").label("Type"),
            Field::switch("is_pk").label("Primary key"),
        ])
        .expect("column schema");
        let spec = CollectionSpec::new(Arc::new(column)).columns(["name", "is_pk"]);
        let spec = if mode == Mode::Create {
            spec.fixed_rows(vec![json!({"name": "id", "type": "int"})])
        } else {
            spec
        };

        let mut defaults = serde_json::Map::new();
        defaults.insert("columns".to_string(), json!([{"name": "id", "type": "int"}]));
        Arc::new(
            Schema::new(vec![
                Field::text("name"),
                Field::collection("columns", spec)
                    .label("Columns")
                    .attr("canAdd", true)
                    .attr("canEdit", true)
                    .attr("canDelete", true)
                    .attr("canReorder", true)
                    .attr("canSearch", true)
                    .attr("canDeleteRow", Expr::computed(|ctx| json!(ctx.value["name"] != json!("locked")))),
            ])
            .expect("table schema")
            .with_defaults(defaults),
        )
    }

    async fn ready_state(mode: Mode) -> SchemaState {
        let mut state = SchemaState::new(
            columns_schema(mode),
            ViewContext::new(mode),
            Arc::new(OptionEvaluatorRegistry::with_builtins()),
        );
        if mode == Mode::Edit {
            state = state.with_loader(Arc::new(StoredTable));
        }
        state.initialise(false).await.expect("initialise failed");
        state
    }

    fn grid(state: &SchemaState) -> DataGrid {
        DataGrid::for_path(state.schema(), Path::parse("columns"), &FeatureRegistry::with_builtins())
            .expect("grid")
    }

    #[test]
    fn only_collections_get_grids() {
        let schema = columns_schema(Mode::Create);
        let error = DataGrid::for_path(&schema, Path::parse("name"), &FeatureRegistry::with_builtins())
            .expect_err("text field has no grid");
        assert_eq!(
            error,
            GridError::NotACollection {
                path: "name".to_string()
            }
        );
    }

    #[tokio::test]
    async fn feature_columns_precede_selected_data_columns() {
        let state = ready_state(Mode::Create).await;
        let mut grid = grid(&state);
        grid.refresh(&state);

        let kinds = grid.columns().iter().map(|column| column.kind.clone()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                ColumnKind::ReorderHandle,
                ColumnKind::EditToggle,
                ColumnKind::DeleteButton,
                ColumnKind::Field("name".to_string()),
                ColumnKind::Field("is_pk".to_string()),
            ]
        );
        assert_eq!(grid.label(), "Columns");
    }

    #[tokio::test]
    async fn fixed_rows_cannot_be_deleted_or_moved() {
        let mut state = ready_state(Mode::Create).await;
        let mut grid = grid(&state);
        // Fixed-row collections cannot add, so append through the reducer.
        assert!(!grid.add_row(&mut state));
        state.dispatch(Action::add_row("columns", json!({"name": "a"})));
        state.dispatch(Action::add_row("columns", json!({"name": "b"})));

        assert!(!grid.delete_row(&mut state, 0));
        assert!(!grid.move_row(&mut state, 0, 2));
        assert!(grid.move_row(&mut state, 2, 1));
        assert_eq!(state.value(&Path::parse("columns.1.name")), Some(json!("b")));

        assert!(grid.delete_row(&mut state, 2));
        let rows = grid.render_rows(&state);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].decoration.classes, ["reorderable", "fixed-row"]);
        assert!(!rows[0].decoration.can_delete);
        assert!(rows[1].decoration.can_delete);
    }

    #[tokio::test]
    async fn rows_expand_by_correlation_id_and_search_filters() {
        let mut state = ready_state(Mode::Edit).await;
        let mut grid = grid(&state);
        assert!(grid.add_row(&mut state));
        state.dispatch(Action::set_value("columns.1.name", json!("customer_id")));
        assert!(grid.add_row(&mut state));
        state.dispatch(Action::set_value("columns.2.name", json!("locked")));

        assert!(grid.toggle_expanded(&state, 1));
        assert!(grid.move_row(&mut state, 1, 0));
        assert!(grid.is_expanded(&state, 0));
        assert!(!grid.is_expanded(&state, 1));

        assert!(!grid.delete_row(&mut state, 2));

        grid.set_search("CUSTOMER");
        let rows = grid.render_rows(&state);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[0].value, json!("customer_id"));
        assert!(rows[0].decoration.expanded);
    }

    #[tokio::test]
    async fn exclusive_column_keeps_a_single_true_value() {
        let mut state = ready_state(Mode::Edit).await;
        let grid = grid(&state);
        state.dispatch(Action::add_row("columns", json!({"name": "a", "is_pk": true})));
        state.dispatch(Action::add_row("columns", json!({"name": "b", "is_pk": false})));

        grid.set_exclusive(&mut state, 2, "is_pk");
        let flags = (0..3)
            .map(|index| state.value(&Path::parse(&format!("columns.{index}.is_pk"))))
            .collect::<Vec<_>>();
        assert_eq!(flags, [Some(json!(false)), Some(json!(false)), Some(json!(true))]);

        assert!(grid.change_cell(&mut state, 0, "name", json!("renamed")));
        assert_eq!(state.value(&Path::parse("columns.0.name")), Some(json!("renamed")));
    }

    #[tokio::test]
    async fn properties_mode_makes_cells_read_only() {
        let mut state = ready_state(Mode::Properties).await;
        let mut grid = grid(&state);
        let rows = grid.render_rows(&state);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].cells[0].editable);
        assert!(rows[0].cells[0].readonly);
        assert!(grid.columns().iter().all(|column| column.field_id().is_some()));
        assert!(!grid.change_cell(&mut state, 0, "name", json!("x")));
    }
}
