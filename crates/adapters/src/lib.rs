pub mod export;
pub mod loader;
pub mod schema_file;

pub use export::{export_rows_to_csv, write_payload, ExportError, FileSaveHandler};
pub use loader::{read_document, DocumentError, FileInitDataLoader, StaticLoader};
pub use schema_file::{build_schema, load_schema_file, parse_schema, SchemaDescription, SchemaFileError};

