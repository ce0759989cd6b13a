use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use crate::path::{flat_is_prefix, value_at, value_at_mut, Path};
use crate::reducer::ActionKind;

/// What triggered a dependency recomputation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    pub kind: ActionKind,
    pub path: Path,
    pub value: Option<Value>,
    pub old_state: Value,
}

/// Synchronous recompute callback: `(data at the destination's level, source
/// path, full document, action)`. The returned object is merged into the
/// destination's parent object.
pub type DepChangeFn =
    Arc<dyn Fn(&Value, &Path, &Value, &ActionContext) -> Option<Map<String, Value>> + Send + Sync>;

/// Deferred recompute callback. The future resolves to the synchronous
/// callback that is applied once the I/O-bound work has finished.
pub type DeferredDepChangeFn = Arc<
    dyn Fn(&Value, &Path, &Value, &ActionContext) -> Option<BoxFuture<'static, DepChangeFn>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct DepListener {
    source: Path,
    dest: Path,
    source_flat: String,
    dest_flat: String,
    callback: Option<DepChangeFn>,
    deferred_callback: Option<DeferredDepChangeFn>,
}

impl fmt::Debug for DepListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepListener")
            .field("source", &self.source_flat)
            .field("dest", &self.dest_flat)
            .field("sync", &self.callback.is_some())
            .field("deferred", &self.deferred_callback.is_some())
            .finish()
    }
}

impl DepListener {
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    fn listens_to(&self, changed_flat: &str) -> bool {
        flat_is_prefix(&self.source_flat, changed_flat)
    }

    fn dest_level(&self) -> Path {
        self.dest.parent().unwrap_or_default()
    }
}

/// A deferred recomputation waiting on its future.
pub struct DeferredChange {
    pub listener: DepListener,
    pub action: ActionContext,
    pub future: BoxFuture<'static, DepChangeFn>,
}

impl fmt::Debug for DeferredChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredChange")
            .field("listener", &self.listener)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyListenerGraph {
    listeners: Vec<DepListener>,
}

impl DependencyListenerGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(
        &mut self,
        source: Path,
        dest: Path,
        callback: Option<DepChangeFn>,
        deferred_callback: Option<DeferredDepChangeFn>,
    ) {
        self.listeners.push(DepListener {
            source_flat: source.flat(),
            dest_flat: dest.flat(),
            source,
            dest,
            callback,
            deferred_callback,
        });
    }

    /// Drops every registration whose destination lives under `dest_prefix`.
    pub fn remove_listeners(&mut self, dest_prefix: &Path) -> usize {
        let prefix = dest_prefix.flat();
        let before = self.listeners.len();
        self.listeners
            .retain(|listener| !flat_is_prefix(&prefix, &listener.dest_flat));
        before - self.listeners.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    #[must_use]
    pub fn listeners(&self) -> &[DepListener] {
        &self.listeners
    }

    /// Runs every synchronous listener whose source covers `changed`, in
    /// registration order, merging each result into the document.
    pub fn apply_sync_change(&self, changed: &Path, document: &mut Value, action: &ActionContext) {
        let changed_flat = changed.flat();
        for listener in &self.listeners {
            if !listener.listens_to(&changed_flat) {
                continue;
            }
            if let Some(callback) = &listener.callback {
                apply_listener_change(listener, callback, document, action);
            }
        }
    }

    pub fn collect_deferred_changes(
        &self,
        changed: &Path,
        document: &Value,
        action: &ActionContext,
    ) -> Vec<DeferredChange> {
        let changed_flat = changed.flat();
        let mut deferred = Vec::new();
        for listener in &self.listeners {
            if !listener.listens_to(&changed_flat) {
                continue;
            }
            let Some(deferred_callback) = &listener.deferred_callback else {
                continue;
            };
            let level = value_at(document, &listener.dest_level()).unwrap_or(&Value::Null);
            if let Some(future) = deferred_callback(level, &listener.source, document, action) {
                debug!(source = %listener.source, dest = %listener.dest, "queued deferred dependency change");
                deferred.push(DeferredChange {
                    listener: listener.clone(),
                    action: action.clone(),
                    future,
                });
            }
        }
        deferred
    }
}

/// Applies one listener with an explicit callback. Used both by the sync
/// pass and for callbacks produced by resolved deferred changes.
pub fn apply_listener_change(
    listener: &DepListener,
    callback: &DepChangeFn,
    document: &mut Value,
    action: &ActionContext,
) {
    let level_path = listener.dest_level();
    let patch = {
        let level = value_at(document, &level_path).unwrap_or(&Value::Null);
        callback(level, &listener.source, document, action)
    };
    let Some(patch) = patch else {
        return;
    };

    match value_at_mut(document, &level_path) {
        Some(Value::Object(target)) => {
            for (key, value) in patch {
                target.insert(key, value);
            }
        }
        _ => debug!(dest = %listener.dest, "dependency target level is not an object"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::FutureExt;
    use serde_json::{json, Map, Value};

    use super::{ActionContext, DepChangeFn, DependencyListenerGraph};
    use crate::path::Path;
    use crate::reducer::ActionKind;

    fn set_value_context(path: &str) -> ActionContext {
        ActionContext {
            kind: ActionKind::SetValue,
            path: Path::parse(path),
            value: Some(json!(1)),
            old_state: json!({}),
        }
    }

    fn patch(key: &str, value: Value) -> DepChangeFn {
        let key = key.to_string();
        Arc::new(move |_, _, _, _| {
            let mut map = Map::new();
            map.insert(key.clone(), value.clone());
            Some(map)
        })
    }

    #[test]
    fn sync_change_merges_into_destination_level() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(
            Path::parse("x"),
            Path::parse("y.z"),
            Some(patch("z", json!(42))),
            None,
        );

        let mut doc = json!({"x": 1, "x_other": 5, "y": {"z": 0}});
        graph.apply_sync_change(&Path::parse("x"), &mut doc, &set_value_context("x"));

        assert_eq!(doc, json!({"x": 1, "x_other": 5, "y": {"z": 42}}));
    }

    #[test]
    fn similarly_named_sources_do_not_match() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(
            Path::parse("shared"),
            Path::parse("flag"),
            Some(patch("flag", json!(true))),
            None,
        );

        let mut doc = json!({"shared_username": "u", "flag": false});
        graph.apply_sync_change(
            &Path::parse("shared_username"),
            &mut doc,
            &set_value_context("shared_username"),
        );
        assert_eq!(doc["flag"], json!(false));

        graph.apply_sync_change(&Path::parse("shared.0.name"), &mut doc, &set_value_context("shared.0.name"));
        assert_eq!(doc["flag"], json!(true));
    }

    #[test]
    fn callback_receives_row_level_data() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(
            Path::parse("items.0.qty"),
            Path::parse("items.0.total"),
            Some(Arc::new(|row, _, _, _| {
                let qty = row.get("qty").and_then(Value::as_i64).unwrap_or_default();
                let mut map = Map::new();
                map.insert("total".to_string(), json!(qty * 10));
                Some(map)
            })),
            None,
        );

        let mut doc = json!({"items": [{"qty": 3, "total": 0}]});
        graph.apply_sync_change(&Path::parse("items.0.qty"), &mut doc, &set_value_context("items.0.qty"));
        assert_eq!(doc["items"][0]["total"], json!(30));
    }

    #[test]
    fn remove_listeners_uses_destination_prefix() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(Path::parse("a"), Path::parse("rows.0.b"), None, None);
        graph.add_listener(Path::parse("a"), Path::parse("rows.1.b"), None, None);
        graph.add_listener(Path::parse("a"), Path::parse("rows_extra"), None, None);

        assert_eq!(graph.remove_listeners(&Path::parse("rows.1")), 1);
        assert_eq!(graph.remove_listeners(&Path::parse("rows")), 1);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.listeners()[0].dest(), &Path::parse("rows_extra"));
    }

    #[tokio::test]
    async fn deferred_changes_resolve_to_sync_callbacks() {
        let mut graph = DependencyListenerGraph::new();
        graph.add_listener(
            Path::parse("server"),
            Path::parse("options"),
            None,
            Some(Arc::new(|_, _, _, _| {
                Some(async { patch("options", json!(["a", "b"])) }.boxed())
            })),
        );

        let doc = json!({"server": "s1", "options": []});
        let action = set_value_context("server");
        let mut deferred = graph.collect_deferred_changes(&Path::parse("server"), &doc, &action);
        assert_eq!(deferred.len(), 1);

        let change = deferred.remove(0);
        let callback = change.future.await;
        let mut doc = doc;
        super::apply_listener_change(&change.listener, &callback, &mut doc, &change.action);
        assert_eq!(doc["options"], json!(["a", "b"]));
    }
}
