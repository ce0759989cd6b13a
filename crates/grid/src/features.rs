use pgform_core::data::row_cid;
use pgform_core::options::{CAN_DELETE, CAN_DELETE_ROW, CAN_EDIT, CAN_EDIT_ROW, CAN_REORDER, CAN_SEARCH};
use pgform_core::schema::Mode;
use serde_json::Value;

use crate::feature::{Column, ColumnContext, ColumnKind, GridFeature, RowContext, TableContext};

pub const REORDER_PRIORITY: i32 = 4;
pub const EXPANDABLE_EDIT_PRIORITY: i32 = 3;
pub const DELETE_ROW_PRIORITY: i32 = 2;
pub const FIXED_ROWS_PRIORITY: i32 = 1;
pub const GLOBAL_SEARCH_PRIORITY: i32 = 0;

/// Drag handle column and drag/drop wiring.
#[derive(Debug, Default)]
pub struct Reorder {
    enabled: bool,
}

impl GridFeature for Reorder {
    fn generate_columns(&mut self, ctx: &mut ColumnContext<'_>) {
        self.enabled = ctx.flag(CAN_REORDER);
        if self.enabled {
            ctx.insert_button(Column::button("btn-reorder", ColumnKind::ReorderHandle));
        }
    }

    fn on_table(&mut self, ctx: &mut TableContext<'_>) {
        ctx.config.reorderable = self.enabled;
    }

    fn on_row(&self, ctx: &mut RowContext<'_>) {
        if ctx.config.reorderable {
            ctx.decoration.draggable = true;
            ctx.decoration.drop_target = true;
            ctx.decoration.classes.push("reorderable".to_string());
        }
    }
}

/// Edit toggle column; an expanded row shows its inline form.
#[derive(Debug, Default)]
pub struct ExpandableEdit {
    enabled: bool,
}

impl GridFeature for ExpandableEdit {
    fn generate_columns(&mut self, ctx: &mut ColumnContext<'_>) {
        self.enabled = ctx.flag(CAN_EDIT);
        if self.enabled {
            ctx.insert_button(Column::button("btn-edit", ColumnKind::EditToggle));
        }
    }

    fn on_table(&mut self, ctx: &mut TableContext<'_>) {
        ctx.config.expandable = self.enabled;
    }

    fn on_row(&self, ctx: &mut RowContext<'_>) {
        if !ctx.config.expandable {
            return;
        }
        ctx.decoration.can_edit = ctx.row_flag(CAN_EDIT_ROW, true);
        ctx.decoration.expanded = row_cid(ctx.row).is_some_and(|cid| ctx.expanded.contains(cid));
        if ctx.decoration.expanded {
            ctx.decoration.classes.push("expanded".to_string());
        }
    }
}

#[derive(Debug, Default)]
pub struct DeleteRow {
    enabled: bool,
}

impl GridFeature for DeleteRow {
    fn generate_columns(&mut self, ctx: &mut ColumnContext<'_>) {
        self.enabled = ctx.flag(CAN_DELETE);
        if self.enabled {
            ctx.insert_button(Column::button("btn-delete", ColumnKind::DeleteButton));
        }
    }

    fn on_table(&mut self, ctx: &mut TableContext<'_>) {
        ctx.config.deletable = self.enabled;
    }

    fn on_row(&self, ctx: &mut RowContext<'_>) {
        ctx.decoration.can_delete = ctx.config.deletable && ctx.row_flag(CAN_DELETE_ROW, true);
    }
}

/// Pins the rows a collection starts with in create mode.
#[derive(Debug, Default)]
pub struct FixedRows;

impl GridFeature for FixedRows {
    fn on_table(&mut self, ctx: &mut TableContext<'_>) {
        ctx.config.fixed_rows = match (&ctx.spec.fixed_rows, ctx.view.mode) {
            (Some(rows), Mode::Create) => rows.len().min(ctx.rows.len()),
            _ => 0,
        };
    }

    fn on_row(&self, ctx: &mut RowContext<'_>) {
        if ctx.index < ctx.config.fixed_rows {
            ctx.decoration.can_delete = false;
            ctx.decoration.draggable = false;
            ctx.decoration.drop_target = false;
            ctx.decoration.classes.push("fixed-row".to_string());
        }
    }
}

/// Hides rows none of whose data cells contain the search text.
#[derive(Debug, Default)]
pub struct GlobalSearch;

impl GridFeature for GlobalSearch {
    fn on_table(&mut self, ctx: &mut TableContext<'_>) {
        let needle = ctx.search_text.trim();
        ctx.config.search = (ctx.flag(CAN_SEARCH) && !needle.is_empty()).then(|| needle.to_lowercase());
    }

    fn on_row(&self, ctx: &mut RowContext<'_>) {
        let Some(needle) = ctx.config.search.as_deref() else {
            return;
        };
        let matched = ctx
            .columns
            .iter()
            .filter_map(Column::field_id)
            .filter_map(|id| ctx.row.get(id))
            .any(|value| searchable_text(value).is_some_and(|text| text.to_lowercase().contains(needle)));
        ctx.decoration.hidden = !matched;
    }
}

fn searchable_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
