use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::compare::is_truthy;
use crate::path::{value_at, Path};
use crate::schema::{ExprContext, Field, FieldKind, Schema, ViewContext};

pub const DISABLED: &str = "disabled";
pub const VISIBLE: &str = "visible";
pub const READONLY: &str = "readonly";
pub const EDITABLE: &str = "editable";
pub const CAN_ADD: &str = "canAdd";
pub const CAN_EDIT: &str = "canEdit";
pub const CAN_DELETE: &str = "canDelete";
pub const CAN_REORDER: &str = "canReorder";
pub const CAN_ADD_ROW: &str = "canAddRow";
pub const EXPAND_EDIT_ON_ADD: &str = "expandEditOnAdd";
pub const ADD_ON_TOP: &str = "addOnTop";
pub const CAN_SEARCH: &str = "canSearch";
pub const CAN_EDIT_ROW: &str = "canEditRow";
pub const CAN_DELETE_ROW: &str = "canDeleteRow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Field,
    Collection,
    Row,
    Cell,
}

/// Inputs of a single evaluator call.
pub struct EvalContext<'a> {
    pub name: &'a str,
    pub default: &'a Value,
    pub kind: NodeKind,
    pub schema: &'a Schema,
    pub field: &'a Field,
    /// Data at the node's level: the parent object for fields, the row for
    /// rows and cells.
    pub value: &'a Value,
    pub view: &'a ViewContext,
    /// Options already computed for this node.
    pub options: &'a Map<String, Value>,
    pub parent_options: Option<&'a Map<String, Value>>,
}

impl EvalContext<'_> {
    #[must_use]
    pub fn expr_context(&self) -> ExprContext<'_> {
        ExprContext {
            schema: self.schema,
            value: self.value,
            view: self.view,
        }
    }

    /// The field's own expression for this option, or the registered default.
    #[must_use]
    pub fn own_value(&self) -> Value {
        self.field
            .eval_attr(self.name, &self.expr_context())
            .unwrap_or_else(|| self.default.clone())
    }

    #[must_use]
    pub fn own_flag(&self) -> bool {
        is_truthy(&self.own_value())
    }

    /// A flag already computed for this node by an earlier evaluator.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.options.get(name).is_some_and(is_truthy)
    }

    #[must_use]
    pub fn is_properties(&self) -> bool {
        self.view.is_properties()
    }

    #[must_use]
    pub fn is_catalog_or_properties(&self) -> bool {
        self.view.in_catalog || self.view.is_properties()
    }
}

pub type EvaluatorFn = Arc<dyn Fn(&EvalContext<'_>) -> Value + Send + Sync>;

#[derive(Clone)]
struct Registration {
    name: String,
    evaluator: Option<EvaluatorFn>,
    default: Value,
    kinds: Vec<NodeKind>,
}

/// Named option evaluators, run in registration order per node.
#[derive(Clone, Default)]
pub struct OptionEvaluatorRegistry {
    registrations: Vec<Registration>,
}

impl fmt::Debug for OptionEvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|registration| (&registration.name, &registration.kinds)),
            )
            .finish()
    }
}

impl OptionEvaluatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Without an evaluator, the option is the field's attribute of the same
    /// name, falling back to `default`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        evaluator: Option<EvaluatorFn>,
        default: Value,
        kinds: &[NodeKind],
    ) {
        self.registrations.push(Registration {
            name: name.into(),
            evaluator,
            default,
            kinds: kinds.to_vec(),
        });
    }

    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        default: Value,
        kinds: &[NodeKind],
        evaluator: impl Fn(&EvalContext<'_>) -> Value + Send + Sync + 'static,
    ) {
        self.register(name, Some(Arc::new(evaluator)), default, kinds);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Computes the options record for one node.
    #[must_use]
    pub fn evaluate(
        &self,
        kind: NodeKind,
        schema: &Schema,
        field: &Field,
        value: &Value,
        view: &ViewContext,
        parent_options: Option<&Map<String, Value>>,
    ) -> Map<String, Value> {
        let mut options = Map::new();
        for registration in &self.registrations {
            if !registration.kinds.contains(&kind) {
                continue;
            }
            let result = {
                let ctx = EvalContext {
                    name: &registration.name,
                    default: &registration.default,
                    kind,
                    schema,
                    field,
                    value,
                    view,
                    options: &options,
                    parent_options,
                };
                match &registration.evaluator {
                    Some(evaluator) => evaluator(&ctx),
                    None => ctx.own_value(),
                }
            };
            options.insert(registration.name.clone(), result);
        }
        options
    }

    /// Builds the options tree for a whole document.
    ///
    /// The tree mirrors document paths: `field -> flags`, and for a
    /// collection `collection -> flags + {"0": row flags + {cell -> flags}}`.
    /// Nested tabs and fieldsets contribute at their parent's level.
    #[must_use]
    pub fn evaluate_node(&self, schema: &Schema, document: &Value, view: &ViewContext) -> Value {
        let mut tree = Map::new();
        self.evaluate_fields(schema, document, view, NodeKind::Field, None, &mut tree);
        Value::Object(tree)
    }

    fn evaluate_fields(
        &self,
        schema: &Schema,
        data: &Value,
        view: &ViewContext,
        leaf_kind: NodeKind,
        parent_options: Option<&Map<String, Value>>,
        out: &mut Map<String, Value>,
    ) {
        for field in schema.fields() {
            match field.kind() {
                FieldKind::NestedTab(child) | FieldKind::NestedFieldset(child) => {
                    self.evaluate_fields(child, data, view, leaf_kind, parent_options, out);
                }
                FieldKind::Collection(spec) => {
                    let Some(id) = field.id() else {
                        continue;
                    };
                    let mut options = self.evaluate(
                        NodeKind::Collection,
                        schema,
                        field,
                        data,
                        view,
                        parent_options,
                    );
                    let rows = data.get(id).and_then(Value::as_array);
                    let mut row_nodes = Vec::new();
                    for row in rows.into_iter().flatten() {
                        let mut row_options = self.evaluate(
                            NodeKind::Row,
                            &spec.schema,
                            field,
                            row,
                            view,
                            Some(&options),
                        );
                        let mut cells = Map::new();
                        self.evaluate_fields(
                            &spec.schema,
                            row,
                            view,
                            NodeKind::Cell,
                            Some(&row_options),
                            &mut cells,
                        );
                        row_options.extend(cells);
                        row_nodes.push(row_options);
                    }
                    for (index, row_options) in row_nodes.into_iter().enumerate() {
                        options.insert(index.to_string(), Value::Object(row_options));
                    }
                    out.insert(id.to_string(), Value::Object(options));
                }
                _ => {
                    if let Some(id) = field.id() {
                        let options =
                            self.evaluate(leaf_kind, schema, field, data, view, parent_options);
                        out.insert(id.to_string(), Value::Object(options));
                    }
                }
            }
        }
    }
}

/// Reads a flag from an options tree, e.g. `items.0.name` + `editable`.
#[must_use]
pub fn option_flag(tree: &Value, path: &Path, name: &str) -> Option<bool> {
    value_at(tree, path)
        .and_then(|node| node.get(name))
        .map(is_truthy)
}

const FIELD_LIKE: &[NodeKind] = &[NodeKind::Field, NodeKind::Collection, NodeKind::Cell];
const COLLECTION: &[NodeKind] = &[NodeKind::Collection];
const ROW: &[NodeKind] = &[NodeKind::Row];
const CELL: &[NodeKind] = &[NodeKind::Cell];

fn register_builtins(registry: &mut OptionEvaluatorRegistry) {
    registry.register_fn(DISABLED, Value::Bool(false), FIELD_LIKE, |ctx| {
        Value::Bool(ctx.own_flag())
    });

    registry.register_fn(VISIBLE, Value::Bool(true), FIELD_LIKE, |ctx| {
        Value::Bool(
            ctx.field.is_mode_supported(ctx.view.mode)
                && ctx.field.is_supported_by_server(ctx.view)
                && ctx.own_flag(),
        )
    });

    registry.register_fn(READONLY, Value::Bool(false), FIELD_LIKE, |ctx| {
        Value::Bool(ctx.is_catalog_or_properties() || ctx.own_flag())
    });

    registry.register_fn(CAN_ADD, Value::Bool(true), COLLECTION, |ctx| {
        let fixed = ctx
            .field
            .kind()
            .collection()
            .is_some_and(|spec| spec.fixed_rows.is_some());
        Value::Bool(!ctx.is_properties() && !fixed && !ctx.flag(DISABLED) && ctx.own_flag())
    });

    for name in [CAN_EDIT, CAN_DELETE] {
        registry.register_fn(name, Value::Bool(false), COLLECTION, |ctx| {
            Value::Bool(!ctx.is_catalog_or_properties() && !ctx.flag(DISABLED) && ctx.own_flag())
        });
    }

    registry.register_fn(CAN_REORDER, Value::Bool(false), COLLECTION, |ctx| {
        Value::Bool(!ctx.is_properties() && !ctx.flag(DISABLED) && ctx.own_flag())
    });

    registry.register_fn(CAN_ADD_ROW, Value::Bool(true), COLLECTION, |ctx| {
        Value::Bool(ctx.flag(CAN_ADD) && ctx.own_flag())
    });

    for name in [EXPAND_EDIT_ON_ADD, ADD_ON_TOP, CAN_SEARCH] {
        registry.register_fn(name, Value::Bool(false), COLLECTION, |ctx| {
            Value::Bool(!ctx.is_properties() && ctx.own_flag())
        });
    }

    for name in [CAN_EDIT_ROW, CAN_DELETE_ROW] {
        registry.register_fn(name, Value::Bool(true), ROW, |ctx| {
            Value::Bool(!ctx.is_properties() && ctx.own_flag())
        });
    }

    registry.register_fn(EDITABLE, Value::Bool(true), CELL, |ctx| {
        Value::Bool(!ctx.is_catalog_or_properties() && ctx.own_flag())
    });
}
