pub mod feature;
pub mod features;
pub mod grid;
pub mod registry;

pub use feature::{Column, ColumnKind, GridFeature, RowDecoration, TableConfig};
pub use grid::{DataGrid, GridCell, GridError, GridRow};
pub use registry::{feature_factory, FeatureRegistry, FeatureRegistryError, FeatureSet};
