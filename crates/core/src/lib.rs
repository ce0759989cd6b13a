pub mod compare;
pub mod data;
pub mod deps;
pub mod diff;
pub mod options;
pub mod path;
pub mod reducer;
pub mod schema;
pub mod settings;
pub mod state;
pub mod store;
pub mod validate;

pub use path::{InternedPath, Path, PathInterner, PathSegment};
pub use reducer::{Action, ActionKind};
pub use schema::{Field, FieldKind, Mode, Schema, ViewContext};
pub use state::SchemaState;

