use std::collections::BTreeSet;

use pgform_core::compare::is_truthy;
use pgform_core::schema::{CollectionSpec, ViewContext};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "field")]
pub enum ColumnKind {
    ReorderHandle,
    EditToggle,
    DeleteButton,
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub id: String,
    pub header: String,
    pub kind: ColumnKind,
    pub resizable: bool,
    pub sortable: bool,
    pub width: Option<u32>,
}

impl Column {
    #[must_use]
    pub fn field(id: impl Into<String>, header: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind: ColumnKind::Field(id.clone()),
            id,
            header: header.into(),
            resizable: true,
            sortable: true,
            width: None,
        }
    }

    /// Narrow, fixed-width column holding a row button.
    #[must_use]
    pub fn button(id: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            id: id.into(),
            header: String::new(),
            kind,
            resizable: false,
            sortable: false,
            width: Some(30),
        }
    }

    #[must_use]
    pub fn field_id(&self) -> Option<&str> {
        match &self.kind {
            ColumnKind::Field(id) => Some(id),
            _ => None,
        }
    }
}

/// Table-wide settings the features agree on for one render.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TableConfig {
    pub reorderable: bool,
    pub expandable: bool,
    pub deletable: bool,
    /// Leading rows that stay pinned.
    pub fixed_rows: usize,
    /// Lower-cased needle rows must contain to stay visible.
    pub search: Option<String>,
}

/// Per-row presentation produced by the features.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RowDecoration {
    pub classes: Vec<String>,
    pub draggable: bool,
    pub drop_target: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub expanded: bool,
    pub hidden: bool,
}

pub struct ColumnContext<'a> {
    pub columns: &'a mut Vec<Column>,
    /// Options node of the collection.
    pub options: &'a Value,
    pub view: &'a ViewContext,
    pub spec: &'a CollectionSpec,
}

impl ColumnContext<'_> {
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        node_flag(self.options, name)
    }

    /// Places a button column after the buttons already present, ahead of
    /// the data columns.
    pub fn insert_button(&mut self, column: Column) {
        let at = self
            .columns
            .iter()
            .position(|existing| existing.field_id().is_some())
            .unwrap_or(self.columns.len());
        self.columns.insert(at, column);
    }
}

pub struct TableContext<'a> {
    pub config: &'a mut TableConfig,
    pub options: &'a Value,
    pub view: &'a ViewContext,
    pub spec: &'a CollectionSpec,
    pub rows: &'a [Value],
    pub search_text: &'a str,
}

impl TableContext<'_> {
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        node_flag(self.options, name)
    }
}

pub struct RowContext<'a> {
    pub index: usize,
    pub row: &'a Value,
    /// Options node of this row: row flags plus one entry per cell.
    pub row_options: &'a Value,
    pub config: &'a TableConfig,
    pub columns: &'a [Column],
    pub expanded: &'a BTreeSet<String>,
    pub decoration: &'a mut RowDecoration,
}

impl RowContext<'_> {
    #[must_use]
    pub fn row_flag(&self, name: &str, default: bool) -> bool {
        self.row_options.get(name).map_or(default, is_truthy)
    }
}

/// One pluggable grid behaviour. Every hook is optional.
pub trait GridFeature: Send {
    fn generate_columns(&mut self, _ctx: &mut ColumnContext<'_>) {}

    fn on_table(&mut self, _ctx: &mut TableContext<'_>) {}

    fn on_row(&self, _ctx: &mut RowContext<'_>) {}
}

pub(crate) fn node_flag(node: &Value, name: &str) -> bool {
    node.get(name).is_some_and(is_truthy)
}
