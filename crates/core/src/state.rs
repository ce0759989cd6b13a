use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::{merge_objects, prepare_data, strip_cids};
use crate::deps::{DeferredChange, DependencyListenerGraph};
use crate::diff::{compute_diff, DiffOptions};
use crate::options::OptionEvaluatorRegistry;
use crate::path::{set_at, Path};
use crate::reducer::{reduce, Action, QueueUpdate, SessionData};
use crate::schema::{FieldKind, Mode, Schema, ViewContext};
use crate::store::{ObservableStore, Subscription};
use crate::validate::{validate_schema, ValidationError};

pub const LOADING_MESSAGE: &str = "Loading...";
pub const SAVING_MESSAGE: &str = "Saving...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingState {
    #[default]
    Init,
    Loading,
    Loaded,
    Error,
}

/// The single active form-level error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl FormError {
    pub const API_ERROR: &'static str = "apierror";
    pub const SAVE_ERROR: &'static str = "saveerror";

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }

    fn from_validation(error: ValidationError) -> Self {
        Self {
            name: Some(error.path.flat()),
            message: Some(error.message),
            response: None,
        }
    }

    fn from_loader(error: &LoaderError) -> Self {
        Self {
            name: Some(Self::API_ERROR.to_string()),
            message: Some(error.to_string()),
            response: error.response().cloned(),
        }
    }

    fn from_save(error: &SaveError) -> Self {
        Self {
            name: Some(Self::SAVE_ERROR.to_string()),
            message: Some(error.to_string()),
            response: None,
        }
    }
}

/// Form-level UI flags, mirrored into the `states` store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiState {
    pub loading: LoadingState,
    pub ready: bool,
    pub saving: bool,
    pub dirty: bool,
    pub errors: FormError,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct LoaderError {
    message: String,
    response: Option<Value>,
}

impl LoaderError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    #[must_use]
    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SaveError {
    message: String,
}

impl SaveError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Supplies the initial document.
#[async_trait]
pub trait InitDataLoader: Send + Sync {
    async fn load(&self) -> Result<Value, LoaderError>;
}

/// Persists a change payload.
#[async_trait]
pub trait SaveHandler: Send + Sync {
    async fn save(&self, is_new: bool, payload: &Value) -> Result<(), SaveError>;
}

#[derive(Debug, Error)]
pub enum SchemaStateError {
    #[error("edit mode requires an initial data loader")]
    MissingLoader,
    #[error("form is not ready")]
    NotReady,
    #[error("failed to save changes")]
    Save {
        #[source]
        source: SaveError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Data,
    Options,
    States,
}

pub type DataChangeCallback = Box<dyn FnMut(bool, &Value) + Send>;

/// Coordinates one form instance: session document, options tree, UI state,
/// dependency listeners and change tracking.
pub struct SchemaState {
    schema: Arc<Schema>,
    view: ViewContext,
    evaluators: Arc<OptionEvaluatorRegistry>,
    loader: Option<Arc<dyn InitDataLoader>>,
    immutable_data: Value,
    graph: DependencyListenerGraph,
    row_shape: Vec<(String, usize)>,
    session: SessionData,
    init_data: Value,
    data: ObservableStore,
    options: ObservableStore,
    states: ObservableStore,
    ui: UiState,
    pre_ready_queue: Option<Vec<Action>>,
    deferred: Vec<DeferredChange>,
    on_data_change: Option<DataChangeCallback>,
}

impl fmt::Debug for SchemaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaState")
            .field("view", &self.view)
            .field("session", &self.session)
            .field("ui", &self.ui)
            .field("listeners", &self.graph.len())
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl SchemaState {
    #[must_use]
    pub fn new(
        schema: Arc<Schema>,
        view: ViewContext,
        evaluators: Arc<OptionEvaluatorRegistry>,
    ) -> Self {
        Self {
            schema,
            view,
            evaluators,
            loader: None,
            immutable_data: Value::Object(Map::new()),
            graph: DependencyListenerGraph::new(),
            row_shape: Vec::new(),
            session: SessionData::new(Value::Object(Map::new())),
            init_data: Value::Object(Map::new()),
            data: ObservableStore::new(Value::Object(Map::new())),
            options: ObservableStore::new(Value::Object(Map::new())),
            states: ObservableStore::new(Value::Null),
            ui: UiState::default(),
            pre_ready_queue: Some(Vec::new()),
            deferred: Vec::new(),
            on_data_change: None,
        }
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn InitDataLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Values that override both defaults and loaded data.
    #[must_use]
    pub fn with_immutable_data(mut self, data: Value) -> Self {
        self.immutable_data = data;
        self
    }

    #[must_use]
    pub fn on_data_change(mut self, callback: impl FnMut(bool, &Value) + Send + 'static) -> Self {
        self.on_data_change = Some(Box::new(callback));
        self
    }

    /// Loads the initial document. A no-op once started unless `force`.
    pub async fn initialise(&mut self, force: bool) -> Result<(), SchemaStateError> {
        if self.ui.loading != LoadingState::Init && !force {
            return Ok(());
        }
        let create_mode = self.view.mode != Mode::Edit;
        if !create_mode && self.loader.is_none() {
            return Err(SchemaStateError::MissingLoader);
        }

        self.ui.loading = LoadingState::Loading;
        self.ui.message = LOADING_MESSAGE.to_string();
        self.publish_ui();
        info!(mode = %self.view.mode, "loading initial data");

        let loaded = match &self.loader {
            Some(loader) => loader.load().await,
            None => Ok(Value::Object(Map::new())),
        };

        match loaded {
            Ok(data) => {
                let data = if data.is_null() {
                    Value::Object(Map::new())
                } else {
                    data
                };
                let mut init = if create_mode {
                    let defaults = Value::Object(self.schema.defaults().clone());
                    merge_objects([&defaults, &data, &self.immutable_data])
                } else {
                    merge_objects([&data, &self.immutable_data])
                };
                prepare_data(&mut init, create_mode);
                self.schema.initialise(&mut init);
                self.init_data = init.clone();

                self.ui.ready = true;
                self.ui.message.clear();
                self.apply(Action::Init { payload: init });
                self.ui.loading = LoadingState::Loaded;
                self.publish_ui();
                info!(change_id = self.session.change_id, "initial data loaded");
            }
            Err(error) => {
                warn!(%error, "failed to load initial data");
                self.ui.ready = true;
                self.ui.errors = FormError::from_loader(&error);
                self.ui.message.clear();
                self.ui.loading = LoadingState::Error;
                self.publish_ui();
            }
        }

        self.replay_pre_ready_queue();
        Ok(())
    }

    /// The only way to change the live document. Actions dispatched before
    /// the form is ready are queued and replayed in order.
    pub fn dispatch(&mut self, action: Action) {
        if let Some(queue) = &mut self.pre_ready_queue {
            debug!(?action, queued = queue.len() + 1, "queued action until ready");
            queue.push(action);
            return;
        }
        self.apply(action);
    }

    fn replay_pre_ready_queue(&mut self) {
        let Some(queue) = self.pre_ready_queue.take() else {
            return;
        };
        if !queue.is_empty() {
            debug!(count = queue.len(), "replaying queued actions");
        }
        for action in queue {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: Action) {
        let reduction = reduce(&self.session, &action, &self.graph);
        self.session = reduction.data;
        match reduction.queue {
            QueueUpdate::Keep => {}
            QueueUpdate::Push(changes) => self.deferred.extend(changes),
            QueueUpdate::Clear => self.deferred.clear(),
        }

        self.sync_listeners(matches!(action, Action::Init { .. }));
        self.data.set_state(self.session.value.clone());
        self.refresh_options();
        self.validate();
    }

    /// Rebuilds the dependency graph when the set of rows changed.
    fn sync_listeners(&mut self, force: bool) {
        let mut shape = Vec::new();
        collect_row_shape(&self.schema, &self.session.value, &Path::root(), &mut shape);
        if !force && shape == self.row_shape {
            return;
        }
        let mut graph = DependencyListenerGraph::new();
        register_listeners(&mut graph, &self.schema, &self.session.value, &Path::root());
        debug!(listeners = graph.len(), "registered dependency listeners");
        self.graph = graph;
        self.row_shape = shape;
    }

    fn refresh_options(&mut self) {
        let tree = self
            .evaluators
            .evaluate_node(&self.schema, &self.session.value, &self.view);
        self.options.set_state(tree);
    }

    /// Validates the session document, recomputes the dirty flag and reports
    /// the change set. Does nothing until the form is ready.
    pub fn validate(&mut self) {
        if !self.ui.ready {
            return;
        }

        match validate_schema(&self.schema, &self.session.value, &Path::root(), None) {
            Some(error) => {
                debug!(%error, "validation failed");
                self.ui.errors = FormError::from_validation(error);
            }
            None => {
                self.ui.errors.name = None;
                self.ui.errors.response = None;
            }
        }

        let diff = self.diff(false);
        self.ui.dirty = !diff.is_empty();
        let payload = self.payload(diff);
        self.publish_ui();

        let dirty = self.ui.dirty;
        if let Some(callback) = self.on_data_change.as_mut() {
            callback(dirty, &payload);
        }
    }

    /// The change payload. Outside edit mode this is the whole document.
    #[must_use]
    pub fn changes(&self, include_skip_change: bool) -> Value {
        self.payload(self.diff(include_skip_change))
    }

    fn diff(&self, include_skip_change: bool) -> Map<String, Value> {
        compute_diff(
            &self.schema,
            &self.init_data,
            &self.session.value,
            self.view.mode,
            DiffOptions {
                keep_cid: self.view.keep_cid,
                stringify: false,
                include_skip_change,
            },
        )
    }

    fn payload(&self, diff: Map<String, Value>) -> Value {
        if self.view.mode != Mode::Edit {
            let base = if self.view.keep_cid {
                self.init_data.clone()
            } else {
                strip_cids(&self.init_data)
            };
            return merge_objects([&base, &Value::Object(diff)]);
        }

        let mut diff = diff;
        if !diff.is_empty() {
            let id_attribute = self.schema.id_attribute();
            if let Some(id) = self.init_data.get(id_attribute).filter(|id| !id.is_null()) {
                diff.insert(id_attribute.to_string(), id.clone());
            }
        }
        Value::Object(diff)
    }

    /// Drains deferred dependency changes, applying each result as soon as
    /// its future resolves. Returns how many were applied.
    pub async fn apply_deferred(&mut self) -> usize {
        let mut applied = 0;
        while !self.deferred.is_empty() {
            let pending = std::mem::take(&mut self.deferred);
            self.dispatch(Action::ClearDeferredQueue);
            debug!(count = pending.len(), "waiting on deferred dependency changes");

            let mut futures = pending
                .into_iter()
                .map(|change| {
                    let DeferredChange {
                        listener,
                        action,
                        future,
                    } = change;
                    async move { (listener, action, future.await) }
                })
                .collect::<FuturesUnordered<_>>();

            while let Some((listener, context, callback)) = futures.next().await {
                debug!(dest = %listener.dest(), "applying deferred dependency change");
                self.dispatch(Action::DeferredDepChange {
                    listener,
                    callback,
                    context,
                });
                applied += 1;
            }
        }
        applied
    }

    /// Replaces part of the initial snapshot (e.g. a lazily fetched
    /// sub-collection) and mirrors it into the session document.
    pub fn init_orig_data(&mut self, path: &Path, value: Value) {
        if path.is_empty() {
            return;
        }
        let mut value = value;
        prepare_data(&mut value, false);
        set_at(&mut self.init_data, path, value.clone());
        self.dispatch(Action::SetValue {
            path: path.clone(),
            value,
        });
    }

    /// Re-runs schema initialisation and restores the initial snapshot.
    pub fn reset(&mut self) {
        let mut init = self.init_data.clone();
        self.schema.initialise(&mut init);
        self.init_data = init.clone();
        self.dispatch(Action::Init { payload: init });
    }

    pub async fn save(&mut self, handler: &dyn SaveHandler) -> Result<Value, SchemaStateError> {
        if !self.ui.ready {
            return Err(SchemaStateError::NotReady);
        }
        let payload = self.changes(true);
        let is_new = self.is_new();

        self.ui.saving = true;
        self.ui.message = SAVING_MESSAGE.to_string();
        self.publish_ui();
        info!(is_new, "saving changes");

        let result = handler.save(is_new, &payload).await;

        self.ui.saving = false;
        self.ui.message.clear();
        match result {
            Ok(()) => {
                self.publish_ui();
                Ok(payload)
            }
            Err(source) => {
                warn!(error = %source, "save failed");
                self.ui.errors = FormError::from_save(&source);
                self.publish_ui();
                Err(SchemaStateError::Save { source })
            }
        }
    }

    pub fn set_error(&mut self, error: FormError) {
        self.ui.errors = error;
        self.publish_ui();
    }

    pub fn clear_error_message(&mut self) {
        self.ui.errors.message = None;
        self.publish_ui();
    }

    pub fn subscribe(
        &self,
        path: &Path,
        listener: impl Fn(&Value, &Value) + Send + Sync + 'static,
        kind: StoreKind,
    ) -> Subscription {
        self.store(kind).subscribe_for_path(path, listener)
    }

    #[must_use]
    pub fn store(&self, kind: StoreKind) -> &ObservableStore {
        match kind {
            StoreKind::Data => &self.data,
            StoreKind::Options => &self.options,
            StoreKind::States => &self.states,
        }
    }

    #[must_use]
    pub fn value(&self, path: &Path) -> Option<Value> {
        self.data.get(path)
    }

    #[must_use]
    pub fn options(&self, path: &Path) -> Option<Value> {
        self.options.get(path)
    }

    #[must_use]
    pub fn state(&self, path: &Path) -> Option<Value> {
        self.states.get(path)
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.session.value
    }

    #[must_use]
    pub fn change_id(&self) -> u64 {
        self.session.change_id
    }

    #[must_use]
    pub fn init_data(&self) -> &Value {
        &self.init_data
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn view(&self) -> &ViewContext {
        &self.view
    }

    #[must_use]
    pub fn evaluators(&self) -> &Arc<OptionEvaluatorRegistry> {
        &self.evaluators
    }

    #[must_use]
    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    #[must_use]
    pub fn errors(&self) -> &FormError {
        &self.ui.errors
    }

    #[must_use]
    pub fn loading_state(&self) -> LoadingState {
        self.ui.loading
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.schema.is_new(&self.init_data)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.ui.dirty
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ui.ready
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.ui.saving
    }

    #[must_use]
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.graph.len()
    }

    fn publish_ui(&self) {
        self.states
            .set_state(serde_json::to_value(&self.ui).unwrap_or(Value::Null));
    }
}

fn collect_row_shape(schema: &Schema, data: &Value, access: &Path, shape: &mut Vec<(String, usize)>) {
    for field in schema.fields() {
        match field.kind() {
            FieldKind::NestedTab(child) | FieldKind::NestedFieldset(child) => {
                collect_row_shape(child, data, access, shape);
            }
            FieldKind::Collection(spec) => {
                let Some(id) = field.id() else {
                    continue;
                };
                let path = access.child(id);
                let rows = data.get(id).and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
                shape.push((path.flat(), rows.len()));
                for (index, row) in rows.iter().enumerate() {
                    collect_row_shape(&spec.schema, row, &path.child(index), shape);
                }
            }
            _ => {}
        }
    }
}

/// Registers every field's dependency listeners, rows included. Fields with
/// a recompute callback also listen to themselves.
fn register_listeners(graph: &mut DependencyListenerGraph, schema: &Schema, data: &Value, access: &Path) {
    for field in schema.fields() {
        if let Some(child) = field.kind().nested_schema() {
            register_listeners(graph, child, data, access);
            continue;
        }
        let Some(id) = field.id() else {
            continue;
        };
        let dest = access.child(id);

        // Deferred resolvers fire from dependency sources as well as from the field itself.
        if field.dep_change().is_some() || field.deferred_dep_change().is_some() {
            let sources = std::iter::once(dest.clone())
                .chain(field.dep_refs().iter().map(|dep| dep.resolve(access)));
            for source in sources {
                graph.add_listener(
                    source,
                    dest.clone(),
                    field.dep_change().cloned(),
                    field.deferred_dep_change().cloned(),
                );
            }
        }

        if let FieldKind::Collection(spec) = field.kind() {
            let rows = data.get(id).and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
            for (index, row) in rows.iter().enumerate() {
                register_listeners(graph, &spec.schema, row, &dest.child(index));
            }
        }
    }
}
