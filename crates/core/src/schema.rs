use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::compare::is_truthy;
use crate::data::merge_objects;
use crate::deps::{DepChangeFn, DeferredDepChangeFn};
use crate::path::Path;

pub const DEFAULT_ID_ATTRIBUTE: &str = "oid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Create,
    Edit,
    Properties,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Properties => "properties",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_type: String,
    /// Numeric server version, e.g. `160002`.
    pub version: u32,
}

/// Operating context handed unchanged to every evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewContext {
    pub mode: Mode,
    pub server_info: Option<ServerInfo>,
    pub in_catalog: bool,
    pub keep_cid: bool,
}

impl ViewContext {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_server(mut self, server_type: impl Into<String>, version: u32) -> Self {
        self.server_info = Some(ServerInfo {
            server_type: server_type.into(),
            version,
        });
        self
    }

    #[must_use]
    pub fn in_catalog(mut self, in_catalog: bool) -> Self {
        self.in_catalog = in_catalog;
        self
    }

    #[must_use]
    pub fn keep_cid(mut self, keep_cid: bool) -> Self {
        self.keep_cid = keep_cid;
        self
    }

    #[must_use]
    pub fn is_properties(&self) -> bool {
        self.mode == Mode::Properties
    }
}

pub struct ExprContext<'a> {
    pub schema: &'a Schema,
    pub value: &'a Value,
    pub view: &'a ViewContext,
}

pub type ExprFn = Arc<dyn Fn(&ExprContext<'_>) -> Value + Send + Sync>;

/// An attribute expression: a literal or a pure function of
/// `(schema, value, view)`.
#[derive(Clone)]
pub enum Expr {
    Literal(Value),
    Computed(ExprFn),
}

impl Expr {
    pub fn computed(f: impl Fn(&ExprContext<'_>) -> Value + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    #[must_use]
    pub fn eval(&self, ctx: &ExprContext<'_>) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Computed(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputKind {
    Text,
    Multiline,
    Password,
    Int { min: Option<f64>, max: Option<f64> },
    Numeric { min: Option<f64>, max: Option<f64> },
    Switch,
    Checkbox,
    Select,
    Date,
    Sql,
}

impl InputKind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Multiline => "multiline",
            Self::Password => "password",
            Self::Int { .. } => "int",
            Self::Numeric { .. } => "numeric",
            Self::Switch => "switch",
            Self::Checkbox => "checkbox",
            Self::Select => "select",
            Self::Date => "datetimepicker",
            Self::Sql => "sql",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub schema: Arc<Schema>,
    /// Key columns whose combination must be unique across rows.
    pub unique_cols: Vec<String>,
    /// Rows pinned in create mode; such collections cannot add more rows.
    pub fixed_rows: Option<Vec<Value>>,
    /// Grid columns, in display order. `None` shows every cell field.
    pub columns: Option<Vec<String>>,
}

impl CollectionSpec {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            unique_cols: Vec::new(),
            fixed_rows: None,
            columns: None,
        }
    }

    #[must_use]
    pub fn unique_cols<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_cols = cols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn fixed_rows(mut self, rows: Vec<Value>) -> Self {
        self.fixed_rows = Some(rows);
        self
    }

    #[must_use]
    pub fn columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(cols.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Input(InputKind),
    Group,
    InlineGroup,
    NestedTab(Arc<Schema>),
    NestedFieldset(Arc<Schema>),
    Collection(CollectionSpec),
}

impl FieldKind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Input(input) => input.type_name(),
            Self::Group => "group",
            Self::InlineGroup => "inline-groups",
            Self::NestedTab(_) => "nested-tab",
            Self::NestedFieldset(_) => "nested-fieldset",
            Self::Collection(_) => "collection",
        }
    }

    /// Child schema merged at the parent's data level.
    #[must_use]
    pub fn nested_schema(&self) -> Option<&Arc<Schema>> {
        match self {
            Self::NestedTab(schema) | Self::NestedFieldset(schema) => Some(schema),
            _ => None,
        }
    }

    #[must_use]
    pub fn collection(&self) -> Option<&CollectionSpec> {
        match self {
            Self::Collection(spec) => Some(spec),
            _ => None,
        }
    }
}

/// A dependency of a field on another location in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepRef {
    /// Resolved against the field's own data level.
    Sibling(String),
    Absolute(Path),
}

impl DepRef {
    #[must_use]
    pub fn resolve(&self, access_path: &Path) -> Path {
        match self {
            Self::Sibling(id) => access_path.child(id.as_str()),
            Self::Absolute(path) => path.clone(),
        }
    }
}

impl From<&str> for DepRef {
    fn from(id: &str) -> Self {
        Self::Sibling(id.to_string())
    }
}

#[derive(Clone)]
pub struct Field {
    id: Option<String>,
    label: Option<String>,
    kind: FieldKind,
    group: Option<String>,
    modes: Vec<Mode>,
    server_types: Vec<String>,
    min_version: Option<u32>,
    max_version: Option<u32>,
    no_empty: bool,
    no_empty_label: Option<String>,
    exclude: bool,
    skip_change: bool,
    attrs: BTreeMap<String, Expr>,
    deps: Vec<DepRef>,
    dep_change: Option<DepChangeFn>,
    deferred_dep_change: Option<DeferredDepChangeFn>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.id)
            .field("type", &self.kind.type_name())
            .field("group", &self.group)
            .field("modes", &self.modes)
            .field("attrs", &self.attrs)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

impl Field {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        let mut field = Self::structural(kind);
        field.id = Some(id.into());
        field
    }

    /// A field without an id: nested tabs and fieldsets.
    #[must_use]
    pub fn structural(kind: FieldKind) -> Self {
        Self {
            id: None,
            label: None,
            kind,
            group: None,
            modes: Vec::new(),
            server_types: Vec::new(),
            min_version: None,
            max_version: None,
            no_empty: false,
            no_empty_label: None,
            exclude: false,
            skip_change: false,
            attrs: BTreeMap::new(),
            deps: Vec::new(),
            dep_change: None,
            deferred_dep_change: None,
        }
    }

    #[must_use]
    pub fn text(id: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Input(InputKind::Text))
    }

    #[must_use]
    pub fn int(id: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Input(InputKind::Int { min: None, max: None }))
    }

    #[must_use]
    pub fn numeric(id: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Input(InputKind::Numeric { min: None, max: None }))
    }

    #[must_use]
    pub fn switch(id: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Input(InputKind::Switch))
    }

    #[must_use]
    pub fn group(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Group).label(label)
    }

    #[must_use]
    pub fn collection(id: impl Into<String>, spec: CollectionSpec) -> Self {
        Self::new(id, FieldKind::Collection(spec))
    }

    #[must_use]
    pub fn nested_tab(schema: Arc<Schema>) -> Self {
        Self::structural(FieldKind::NestedTab(schema))
    }

    #[must_use]
    pub fn nested_fieldset(schema: Arc<Schema>) -> Self {
        Self::structural(FieldKind::NestedFieldset(schema))
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn modes(mut self, modes: impl IntoIterator<Item = Mode>) -> Self {
        self.modes = modes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn server_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn min_version(mut self, version: u32) -> Self {
        self.min_version = Some(version);
        self
    }

    #[must_use]
    pub fn max_version(mut self, version: u32) -> Self {
        self.max_version = Some(version);
        self
    }

    #[must_use]
    pub fn no_empty(mut self) -> Self {
        self.no_empty = true;
        self
    }

    #[must_use]
    pub fn no_empty_label(mut self, label: impl Into<String>) -> Self {
        self.no_empty = true;
        self.no_empty_label = Some(label.into());
        self
    }

    #[must_use]
    pub fn exclude(mut self) -> Self {
        self.exclude = true;
        self
    }

    #[must_use]
    pub fn skip_change(mut self) -> Self {
        self.skip_change = true;
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.attrs.insert(name.into(), expr.into());
        self
    }

    #[must_use]
    pub fn deps(mut self, deps: impl IntoIterator<Item = DepRef>) -> Self {
        self.deps = deps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn on_dep_change(mut self, callback: DepChangeFn) -> Self {
        self.dep_change = Some(callback);
        self
    }

    #[must_use]
    pub fn on_deferred_dep_change(mut self, callback: DeferredDepChangeFn) -> Self {
        self.deferred_dep_change = Some(callback);
        self
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Display label, falling back to the id.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn label_text(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.group.as_deref()
    }

    #[must_use]
    pub fn is_no_empty(&self) -> bool {
        self.no_empty
    }

    #[must_use]
    pub fn empty_label(&self) -> Option<&str> {
        self.no_empty_label.as_deref()
    }

    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.exclude
    }

    #[must_use]
    pub fn is_skip_change(&self) -> bool {
        self.skip_change
    }

    #[must_use]
    pub fn dep_refs(&self) -> &[DepRef] {
        &self.deps
    }

    #[must_use]
    pub fn dep_change(&self) -> Option<&DepChangeFn> {
        self.dep_change.as_ref()
    }

    #[must_use]
    pub fn deferred_dep_change(&self) -> Option<&DeferredDepChangeFn> {
        self.deferred_dep_change.as_ref()
    }

    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    #[must_use]
    pub fn is_mode_supported(&self, mode: Mode) -> bool {
        self.modes.is_empty() || self.modes.contains(&mode)
    }

    /// Server type and version gate. Passes when no server is known.
    #[must_use]
    pub fn is_supported_by_server(&self, view: &ViewContext) -> bool {
        let Some(server) = &view.server_info else {
            return true;
        };
        if !self.server_types.is_empty() && !self.server_types.contains(&server.server_type) {
            return false;
        }
        if self.min_version.is_some_and(|min| server.version < min) {
            return false;
        }
        !self.max_version.is_some_and(|max| server.version > max)
    }

    #[must_use]
    pub fn eval_attr(&self, name: &str, ctx: &ExprContext<'_>) -> Option<Value> {
        self.attrs.get(name).map(|expr| expr.eval(ctx))
    }

    #[must_use]
    pub fn attr_bool(&self, name: &str, ctx: &ExprContext<'_>, default: bool) -> bool {
        self.eval_attr(name, ctx)
            .map_or(default, |value| is_truthy(&value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("duplicate group id `{id}`")]
    DuplicateGroup { id: String },
}

pub type SchemaValidator =
    Arc<dyn Fn(&Value, &mut dyn FnMut(&Path, &str)) -> bool + Send + Sync>;
pub type SchemaInitialiser = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// Immutable, shareable description of a document shape.
#[derive(Clone)]
pub struct Schema {
    fields: Vec<Field>,
    id_attribute: String,
    defaults: Map<String, Value>,
    validator: Option<SchemaValidator>,
    initialiser: Option<SchemaInitialiser>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("id_attribute", &self.id_attribute)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut groups = HashSet::new();
        for field in &fields {
            if !matches!(field.kind, FieldKind::Group | FieldKind::InlineGroup) {
                continue;
            }
            let id = field.id().unwrap_or_default();
            if !groups.insert(id.to_string()) {
                return Err(SchemaError::DuplicateGroup { id: id.to_string() });
            }
        }

        Ok(Self {
            fields,
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            defaults: Map::new(),
            validator: None,
            initialiser: None,
        })
    }

    #[must_use]
    pub fn with_id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
        self.id_attribute = id_attribute.into();
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_initialiser(mut self, initialiser: SchemaInitialiser) -> Self {
        self.initialiser = Some(initialiser);
        self
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.id() == Some(id))
    }

    #[must_use]
    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    #[must_use]
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    #[must_use]
    pub fn is_new(&self, data: &Value) -> bool {
        data.get(&self.id_attribute).map_or(true, Value::is_null)
    }

    /// Data for a freshly added row: defaults overlaid with `data`.
    #[must_use]
    pub fn new_row(&self, data: &Value) -> Value {
        merge_objects([&Value::Object(self.defaults.clone()), data])
    }

    pub fn initialise(&self, data: &mut Value) {
        if let Some(initialiser) = &self.initialiser {
            initialiser(data);
        }
    }

    /// Runs the custom validation hook. Returns `true` when it reported an
    /// error through `set_error`.
    pub fn validate_custom(&self, data: &Value, set_error: &mut dyn FnMut(&Path, &str)) -> bool {
        self.validator
            .as_ref()
            .is_some_and(|validator| validator(data, set_error))
    }
}
