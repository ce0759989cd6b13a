use serde_json::{Map, Value};

use crate::compare::{is_object_equal, is_value_equal_opt};
use crate::data::{clean_cid, row_cid};
use crate::schema::{CollectionSpec, ExprContext, Field, FieldKind, Mode, Schema, ViewContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffOptions {
    pub keep_cid: bool,
    /// Emit arrays and objects as JSON strings.
    pub stringify: bool,
    pub include_skip_change: bool,
}

/// Rows of two collection arrays partitioned by correlation id.
#[derive(Debug, Default, PartialEq)]
pub struct RowDiff<'a> {
    pub added: Vec<&'a Value>,
    /// Taken from the original array.
    pub removed: Vec<&'a Value>,
    /// Taken from the current array.
    pub updated: Vec<&'a Value>,
}

impl RowDiff<'_> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Rows without a correlation id only match an identical row.
#[must_use]
pub fn diff_rows<'a>(original: &'a [Value], current: &'a [Value]) -> RowDiff<'a> {
    let mut diff = RowDiff::default();

    for row in current {
        match find_match(original, row) {
            Some(orig) if !is_object_equal(orig, row) => diff.updated.push(row),
            Some(_) => {}
            None => diff.added.push(row),
        }
    }
    for row in original {
        if find_match(current, row).is_none() {
            diff.removed.push(row);
        }
    }
    diff
}

fn find_match<'a>(rows: &'a [Value], row: &Value) -> Option<&'a Value> {
    match row_cid(row) {
        Some(cid) => rows.iter().find(|candidate| row_cid(candidate) == Some(cid)),
        None => rows.iter().find(|candidate| *candidate == row),
    }
}

fn rows_of<'a>(data: &'a Value, id: &str) -> &'a [Value] {
    data.get(id)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

/// Computes the subset of `current` that differs from `original`.
///
/// Nested tabs and fieldsets merge their changes at the parent's level. In
/// edit mode collections report `added`/`deleted`/`changed` partitions; in
/// the other modes a changed collection is emitted whole.
#[must_use]
pub fn compute_diff(
    schema: &Schema,
    original: &Value,
    current: &Value,
    mode: Mode,
    options: DiffOptions,
) -> Map<String, Value> {
    Differ { mode, options }.level(schema, original, current, 0)
}

struct Differ {
    mode: Mode,
    options: DiffOptions,
}

impl Differ {
    fn level(&self, schema: &Schema, original: &Value, current: &Value, depth: usize) -> Map<String, Value> {
        let mut changes = Map::new();

        for field in schema.fields() {
            if field.is_excluded()
                || (field.is_skip_change() && !self.options.include_skip_change)
                || !field.is_mode_supported(self.mode)
            {
                continue;
            }

            if let Some(child) = field.kind().nested_schema() {
                changes.extend(self.level(child, original, current, depth));
                continue;
            }

            let Some(id) = field.id() else {
                continue;
            };
            let before = original.get(id);
            let after = current.get(id);

            match (self.mode, field.kind()) {
                (Mode::Edit, _) if before == after => {}
                (Mode::Edit, FieldKind::Collection(spec)) => {
                    let change = self.collection_in_edit_mode(spec, id, original, current, depth);
                    if !change.is_empty() {
                        self.emit(&mut changes, id, Value::Object(change), depth);
                    }
                }
                (_, FieldKind::Collection(spec)) => {
                    if self.collection_changed(schema, field, spec, id, original, current) {
                        let rows = current.get(id).cloned().unwrap_or(Value::Array(Vec::new()));
                        self.emit(&mut changes, id, clean_cid(&rows, self.options.keep_cid), depth);
                    }
                }
                _ => {
                    if !is_value_equal_opt(before, after) {
                        self.emit(&mut changes, id, after.cloned().unwrap_or(Value::Null), depth);
                    }
                }
            }
        }

        changes
    }

    fn emit(&self, changes: &mut Map<String, Value>, id: &str, value: Value, depth: usize) {
        let value = match value {
            Value::Array(_) | Value::Object(_) if self.options.stringify => {
                Value::String(value.to_string())
            }
            Value::Null if depth == 0 => Value::String(String::new()),
            other => other,
        };
        changes.insert(id.to_string(), value);
    }

    fn collection_in_edit_mode(
        &self,
        spec: &CollectionSpec,
        id: &str,
        original: &Value,
        current: &Value,
        depth: usize,
    ) -> Map<String, Value> {
        let keep_cid = self.options.keep_cid;
        let original_rows = rows_of(original, id);
        let diff = diff_rows(original_rows, rows_of(current, id));
        let mut change = Map::new();

        if !diff.added.is_empty() {
            let added = Value::Array(diff.added.iter().map(|row| (*row).clone()).collect());
            change.insert("added".to_string(), clean_cid(&added, keep_cid));
        }

        if !diff.removed.is_empty() {
            let deleted = Value::Array(diff.removed.iter().map(|row| (*row).clone()).collect());
            change.insert("deleted".to_string(), clean_cid(&deleted, keep_cid));
        }

        let id_attribute = spec.schema.id_attribute();
        let mut changed = Vec::new();
        for row in &diff.updated {
            let Some(orig_row) = find_match(original_rows, row) else {
                continue;
            };
            let row_changes = self.level(&spec.schema, orig_row, row, depth + 1);
            if row_changes.is_empty() {
                continue;
            }

            let mut emitted = match row.get(id_attribute) {
                Some(id_value) => {
                    let mut only_id = Map::new();
                    only_id.insert(id_attribute.to_string(), id_value.clone());
                    only_id
                }
                None => row.as_object().cloned().unwrap_or_default(),
            };
            emitted.extend(row_changes);
            changed.push(Value::Object(emitted));
        }
        if !changed.is_empty() {
            change.insert("changed".to_string(), clean_cid(&Value::Array(changed), keep_cid));
        }

        change
    }

    fn collection_changed(
        &self,
        schema: &Schema,
        field: &Field,
        spec: &CollectionSpec,
        id: &str,
        original: &Value,
        current: &Value,
    ) -> bool {
        let original_rows = rows_of(original, id);
        let current_rows = rows_of(current, id);
        let diff = diff_rows(original_rows, current_rows);

        let structural = if spec.fixed_rows.is_some() {
            !diff.updated.is_empty() || !diff.removed.is_empty()
        } else {
            !diff.is_empty()
        };
        if structural {
            return true;
        }

        let view = ViewContext::new(self.mode);
        let ctx = ExprContext {
            schema,
            value: current,
            view: &view,
        };
        field.attr_bool("canReorder", &ctx, false)
            && original_rows.iter().map(row_cid).ne(current_rows.iter().map(row_cid))
    }
}
