use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::data::prepare_data;
use crate::deps::{
    apply_listener_change, ActionContext, DepChangeFn, DepListener, DeferredChange,
    DependencyListenerGraph,
};
use crate::path::{set_at, value_at, value_at_mut, Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Init,
    SetValue,
    AddRow,
    DeleteRow,
    MoveRow,
    BulkUpdate,
    ClearDeferredQueue,
    DeferredDepchange,
}

#[derive(Clone)]
pub enum Action {
    Init {
        payload: Value,
    },
    SetValue {
        path: Path,
        value: Value,
    },
    AddRow {
        path: Path,
        value: Value,
        add_on_top: bool,
    },
    DeleteRow {
        path: Path,
        index: usize,
    },
    MoveRow {
        path: Path,
        old_index: usize,
        new_index: usize,
    },
    /// Forces column `id` to `false` on every row under `path`.
    BulkUpdate {
        path: Path,
        id: String,
    },
    ClearDeferredQueue,
    /// Re-applies one listener with the callback a deferred change resolved to.
    DeferredDepChange {
        listener: DepListener,
        callback: DepChangeFn,
        context: ActionContext,
    },
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { payload } => f.debug_struct("Init").field("payload", payload).finish(),
            Self::SetValue { path, value } => f
                .debug_struct("SetValue")
                .field("path", path)
                .field("value", value)
                .finish(),
            Self::AddRow {
                path,
                value,
                add_on_top,
            } => f
                .debug_struct("AddRow")
                .field("path", path)
                .field("value", value)
                .field("add_on_top", add_on_top)
                .finish(),
            Self::DeleteRow { path, index } => f
                .debug_struct("DeleteRow")
                .field("path", path)
                .field("index", index)
                .finish(),
            Self::MoveRow {
                path,
                old_index,
                new_index,
            } => f
                .debug_struct("MoveRow")
                .field("path", path)
                .field("old_index", old_index)
                .field("new_index", new_index)
                .finish(),
            Self::BulkUpdate { path, id } => f
                .debug_struct("BulkUpdate")
                .field("path", path)
                .field("id", id)
                .finish(),
            Self::ClearDeferredQueue => f.write_str("ClearDeferredQueue"),
            Self::DeferredDepChange { listener, .. } => f
                .debug_struct("DeferredDepChange")
                .field("listener", listener)
                .finish_non_exhaustive(),
        }
    }
}

impl Action {
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Init { .. } => ActionKind::Init,
            Self::SetValue { .. } => ActionKind::SetValue,
            Self::AddRow { .. } => ActionKind::AddRow,
            Self::DeleteRow { .. } => ActionKind::DeleteRow,
            Self::MoveRow { .. } => ActionKind::MoveRow,
            Self::BulkUpdate { .. } => ActionKind::BulkUpdate,
            Self::ClearDeferredQueue => ActionKind::ClearDeferredQueue,
            Self::DeferredDepChange { .. } => ActionKind::DeferredDepchange,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::SetValue { path, .. }
            | Self::AddRow { path, .. }
            | Self::DeleteRow { path, .. }
            | Self::MoveRow { path, .. }
            | Self::BulkUpdate { path, .. } => Some(path),
            Self::DeferredDepChange { context, .. } => Some(&context.path),
            Self::Init { .. } | Self::ClearDeferredQueue => None,
        }
    }

    pub fn set_value(path: impl Into<Path>, value: Value) -> Self {
        Self::SetValue {
            path: path.into(),
            value,
        }
    }

    pub fn add_row(path: impl Into<Path>, value: Value) -> Self {
        Self::AddRow {
            path: path.into(),
            value,
            add_on_top: false,
        }
    }

    pub fn delete_row(path: impl Into<Path>, index: usize) -> Self {
        Self::DeleteRow {
            path: path.into(),
            index,
        }
    }

    pub fn move_row(path: impl Into<Path>, old_index: usize, new_index: usize) -> Self {
        Self::MoveRow {
            path: path.into(),
            old_index,
            new_index,
        }
    }

    pub fn bulk_update(path: impl Into<Path>, id: impl Into<String>) -> Self {
        Self::BulkUpdate {
            path: path.into(),
            id: id.into(),
        }
    }
}

/// The live document plus its reduction counter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionData {
    pub value: Value,
    /// Incremented by every reduction, even when the content is unchanged.
    pub change_id: u64,
}

impl SessionData {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            change_id: 0,
        }
    }
}

/// What a reduction asks the owner to do with its pending deferred queue.
#[derive(Debug, Default)]
pub enum QueueUpdate {
    #[default]
    Keep,
    /// Appended to the pending queue.
    Push(Vec<DeferredChange>),
    Clear,
}

#[derive(Debug)]
pub struct Reduction {
    pub data: SessionData,
    pub queue: QueueUpdate,
}

/// Applies one action to a deep copy of `current`.
#[must_use]
pub fn reduce(
    current: &SessionData,
    action: &Action,
    graph: &DependencyListenerGraph,
) -> Reduction {
    let mut value = current.value.clone();
    let mut queue = QueueUpdate::Keep;
    let make_context = |path: &Path, changed: Option<&Value>| ActionContext {
        kind: action.kind(),
        path: path.clone(),
        value: changed.cloned(),
        old_state: current.value.clone(),
    };

    match action {
        Action::Init { payload } => value = payload.clone(),
        Action::SetValue { path, value: new } => {
            set_at(&mut value, path, new.clone());
            let ctx = make_context(path, Some(new));
            graph.apply_sync_change(path, &mut value, &ctx);
            queue = QueueUpdate::Push(graph.collect_deferred_changes(path, &value, &ctx));
        }
        Action::AddRow {
            path,
            value: row,
            add_on_top,
        } => {
            let mut stamped = Value::Array(vec![row.clone()]);
            prepare_data(&mut stamped, true);
            let row = match stamped {
                Value::Array(mut rows) => rows.pop().unwrap_or(Value::Null),
                other => other,
            };
            let mut rows = rows_at(&value, path);
            if *add_on_top {
                rows.insert(0, row.clone());
            } else {
                rows.push(row.clone());
            }
            set_at(&mut value, path, Value::Array(rows));
            graph.apply_sync_change(path, &mut value, &make_context(path, Some(&row)));
        }
        Action::DeleteRow { path, index } => {
            let mut rows = rows_at(&value, path);
            if *index < rows.len() {
                rows.remove(*index);
            } else {
                debug!(%path, index, "delete index out of range");
            }
            set_at(&mut value, path, Value::Array(rows));
            graph.apply_sync_change(path, &mut value, &make_context(path, Some(&Value::from(*index))));
        }
        Action::MoveRow {
            path,
            old_index,
            new_index,
        } => {
            let mut rows = rows_at(&value, path);
            if *old_index < rows.len() && *new_index < rows.len() {
                let row = rows.remove(*old_index);
                rows.insert(*new_index, row);
                set_at(&mut value, path, Value::Array(rows));
            }
        }
        Action::BulkUpdate { path, id } => {
            if let Some(Value::Array(rows)) = value_at_mut(&mut value, path) {
                for row in rows.iter_mut().filter_map(Value::as_object_mut) {
                    row.insert(id.clone(), Value::Bool(false));
                }
            }
        }
        Action::ClearDeferredQueue => queue = QueueUpdate::Clear,
        Action::DeferredDepChange {
            listener,
            callback,
            context,
        } => {
            let ctx = ActionContext {
                old_state: current.value.clone(),
                ..context.clone()
            };
            apply_listener_change(listener, callback, &mut value, &ctx);
        }
    }

    Reduction {
        data: SessionData {
            value,
            change_id: current.change_id + 1,
        },
        queue,
    }
}

fn rows_at(document: &Value, path: &Path) -> Vec<Value> {
    value_at(document, path)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::FutureExt;
    use serde_json::{json, Map, Value};

    use super::{reduce, Action, ActionKind, QueueUpdate, SessionData};
    use crate::data::{is_new_row_cid, row_cid};
    use crate::deps::{DepChangeFn, DependencyListenerGraph};
    use crate::path::Path;

    fn session(value: Value) -> SessionData {
        SessionData::new(value)
    }

    #[test]
    fn every_reduction_bumps_the_change_id() {
        let graph = DependencyListenerGraph::new();
        let start = session(json!({"a": 1}));

        let next = reduce(&start, &Action::set_value("a", json!(1)), &graph).data;
        assert_eq!(next.value, start.value);
        assert_eq!(next.change_id, 1);

        let next = reduce(&next, &Action::ClearDeferredQueue, &graph).data;
        assert_eq!(next.change_id, 2);
    }

    #[test]
    fn reductions_never_touch_the_previous_snapshot() {
        let graph = DependencyListenerGraph::new();
        let start = session(json!({"rows": [{"a": 1}]}));
        let next = reduce(&start, &Action::bulk_update("rows", "a"), &graph).data;

        assert_eq!(start.value, json!({"rows": [{"a": 1}]}));
        assert_eq!(next.value, json!({"rows": [{"a": false}]}));
    }

    #[test]
    fn add_row_stamps_a_new_cid_and_honours_add_on_top() {
        let graph = DependencyListenerGraph::new();
        let start = session(json!({"items": [{"qty": 1}]}));

        let appended = reduce(&start, &Action::add_row("items", json!({"qty": 2})), &graph).data;
        let cid = row_cid(&appended.value["items"][1]).expect("cid");
        assert!(is_new_row_cid(cid));

        let on_top = Action::AddRow {
            path: Path::parse("items"),
            value: json!({"qty": 0}),
            add_on_top: true,
        };
        let prepended = reduce(&appended, &on_top, &graph).data;
        assert_eq!(prepended.value["items"][0]["qty"], json!(0));
        assert_eq!(prepended.value["items"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn add_row_creates_missing_collections() {
        let graph = DependencyListenerGraph::new();
        let next = reduce(&session(json!({})), &Action::add_row("items", json!({"qty": 3})), &graph).data;
        assert_eq!(next.value["items"][0]["qty"], json!(3));
    }

    #[test]
    fn delete_and_move_rows() {
        let graph = DependencyListenerGraph::new();
        let start = session(json!({"r": [{"v": 1}, {"v": 2}, {"v": 3}]}));

        let moved = reduce(&start, &Action::move_row("r", 0, 2), &graph).data;
        assert_eq!(moved.value, json!({"r": [{"v": 2}, {"v": 3}, {"v": 1}]}));

        let deleted = reduce(&moved, &Action::delete_row("r", 1), &graph).data;
        assert_eq!(deleted.value, json!({"r": [{"v": 2}, {"v": 1}]}));

        let ignored = reduce(&deleted, &Action::delete_row("r", 9), &graph).data;
        assert_eq!(ignored.value, deleted.value);
    }

    #[test]
    fn set_value_runs_listeners_and_queues_deferred_changes() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(
            Path::parse("x"),
            Path::parse("y.z"),
            Some(Arc::new(|_, _, _, ctx| {
                let mut patch = Map::new();
                patch.insert("z".to_string(), json!(42));
                patch.insert("seen".to_string(), json!(ctx.old_state["x"]));
                Some(patch)
            })),
            None,
        );
        graph.add_listener(
            Path::parse("x"),
            Path::parse("remote"),
            None,
            Some(Arc::new(|_, _, _, _| {
                let resolved: DepChangeFn = Arc::new(|_, _, _, _| None);
                Some(async move { resolved }.boxed())
            })),
        );

        let start = session(json!({"x": 0, "x_other": 7, "y": {"z": 0}}));
        let reduction = reduce(&start, &Action::set_value("x", json!(1)), &graph);

        assert_eq!(
            reduction.data.value,
            json!({"x": 1, "x_other": 7, "y": {"z": 42, "seen": 0}})
        );
        match reduction.queue {
            QueueUpdate::Push(deferred) => {
                assert_eq!(deferred.len(), 1);
                assert_eq!(deferred[0].action.kind, ActionKind::SetValue);
            }
            other => panic!("expected queued deferred changes, got {other:?}"),
        }
    }

    #[test]
    fn deferred_dep_change_applies_only_its_listener() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(Path::parse("a"), Path::parse("b"), None, None);
        let listener = graph.listeners()[0].clone();
        let callback: DepChangeFn = Arc::new(|_, _, _, _| {
            let mut patch = Map::new();
            patch.insert("b".to_string(), json!("fetched"));
            Some(patch)
        });
        let context = crate::deps::ActionContext {
            kind: ActionKind::SetValue,
            path: Path::parse("a"),
            value: Some(json!(1)),
            old_state: json!({}),
        };

        let next = reduce(
            &session(json!({"a": 1, "b": null})),
            &Action::DeferredDepChange {
                listener,
                callback,
                context,
            },
            &graph,
        );
        assert_eq!(next.data.value, json!({"a": 1, "b": "fetched"}));
        assert!(matches!(next.queue, QueueUpdate::Keep));
    }

    #[test]
    fn init_replaces_the_document() {
        let graph = DependencyListenerGraph::new();
        let next = reduce(
            &session(json!({"old": true})),
            &Action::Init {
                payload: json!({"new": true}),
            },
            &graph,
        );
        assert_eq!(next.data.value, json!({"new": true}));
        assert_eq!(next.data.change_id, 1);
    }
}
