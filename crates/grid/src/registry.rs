use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::feature::{ColumnContext, GridFeature, RowContext, TableContext};
use crate::features::{
    DeleteRow, ExpandableEdit, FixedRows, GlobalSearch, Reorder, DELETE_ROW_PRIORITY,
    EXPANDABLE_EDIT_PRIORITY, FIXED_ROWS_PRIORITY, GLOBAL_SEARCH_PRIORITY, REORDER_PRIORITY,
};

pub type FeatureFactory = Arc<dyn Fn() -> Box<dyn GridFeature> + Send + Sync>;

/// Factory producing a default-constructed `F` for every grid.
#[must_use]
pub fn feature_factory<F: GridFeature + Default + 'static>() -> FeatureFactory {
    Arc::new(|| -> Box<dyn GridFeature> { Box::new(F::default()) })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureRegistryError {
    #[error("grid feature `{name}` is already registered")]
    Duplicate { name: String },
}

#[derive(Clone)]
struct Registration {
    name: String,
    priority: i32,
    factory: FeatureFactory,
}

/// Feature classes available to grids. Each grid instantiates its own set.
#[derive(Clone, Default)]
pub struct FeatureRegistry {
    registrations: Vec<Registration>,
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|registration| (&registration.name, registration.priority)),
            )
            .finish()
    }
}

impl FeatureRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, i32, FeatureFactory); 5] = [
            ("reorder", REORDER_PRIORITY, feature_factory::<Reorder>()),
            ("expandable-edit", EXPANDABLE_EDIT_PRIORITY, feature_factory::<ExpandableEdit>()),
            ("delete-row", DELETE_ROW_PRIORITY, feature_factory::<DeleteRow>()),
            ("fixed-rows", FIXED_ROWS_PRIORITY, feature_factory::<FixedRows>()),
            ("global-search", GLOBAL_SEARCH_PRIORITY, feature_factory::<GlobalSearch>()),
        ];
        for (name, priority, factory) in builtins {
            registry.replace(name, priority, factory);
        }
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        factory: FeatureFactory,
    ) -> Result<(), FeatureRegistryError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(FeatureRegistryError::Duplicate { name });
        }
        self.registrations.push(Registration {
            name,
            priority,
            factory,
        });
        Ok(())
    }

    /// Registers `name`, overwriting an existing registration of that name.
    pub fn replace(&mut self, name: impl Into<String>, priority: i32, factory: FeatureFactory) {
        let name = name.into();
        self.remove(&name);
        self.registrations.push(Registration {
            name,
            priority,
            factory,
        });
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|registration| registration.name != name);
        before != self.registrations.len()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registrations
            .iter()
            .any(|registration| registration.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Feature names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.ordered()
            .into_iter()
            .map(|registration| registration.name.as_str())
            .collect()
    }

    /// Fresh feature instances, highest priority first.
    #[must_use]
    pub fn instantiate(&self) -> FeatureSet {
        FeatureSet {
            features: self
                .ordered()
                .into_iter()
                .map(|registration| (registration.name.clone(), (registration.factory)()))
                .collect(),
        }
    }

    fn ordered(&self) -> Vec<&Registration> {
        let mut ordered = self.registrations.iter().collect::<Vec<_>>();
        ordered.sort_by(|left, right| {
            right
                .priority
                .cmp(&left.priority)
                .then_with(|| left.name.cmp(&right.name))
        });
        ordered
    }
}

/// The features of one grid, fanned out in priority order.
#[derive(Default)]
pub struct FeatureSet {
    features: Vec<(String, Box<dyn GridFeature>)>,
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FeatureSet {
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn generate_columns(&mut self, ctx: &mut ColumnContext<'_>) {
        for (_, feature) in &mut self.features {
            feature.generate_columns(ctx);
        }
    }

    pub fn on_table(&mut self, ctx: &mut TableContext<'_>) {
        for (_, feature) in &mut self.features {
            feature.on_table(ctx);
        }
    }

    pub fn on_row(&self, ctx: &mut RowContext<'_>) {
        for (_, feature) in &self.features {
            feature.on_row(ctx);
        }
    }
}
