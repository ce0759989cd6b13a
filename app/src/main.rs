mod logging;
mod script;

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use pgform_adapters::{
    export_rows_to_csv, load_schema_file, ExportError, FileInitDataLoader, FileSaveHandler,
    SchemaFileError,
};
use pgform_core::options::OptionEvaluatorRegistry;
use pgform_core::settings::{FileSettingsStore, Settings, SettingsError};
use pgform_core::state::{SchemaState, SchemaStateError, StoreKind};
use pgform_core::{Mode, Path, Schema};
use pgform_grid::{Column, DataGrid, FeatureRegistry, GridError, GridRow};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::info;

use crate::script::{load_script, ScriptError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Create,
    Edit,
    Properties,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Create => Mode::Create,
            ModeArg::Edit => Mode::Edit,
            ModeArg::Properties => Mode::Properties,
        }
    }
}

/// Loads a schema-driven form, replays scripted edits and prints the
/// resulting form state as JSON.
#[derive(Debug, Parser)]
#[command(name = "pgform", version)]
struct Cli {
    /// Schema description (JSON, optionally `.gz`).
    schema: PathBuf,
    /// Initial document; required in edit mode.
    #[arg(long)]
    data: Option<PathBuf>,
    /// JSON array of edits to dispatch.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Settings file; defaults to the per-user config directory.
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Filters grid rows.
    #[arg(long, default_value = "")]
    search: String,
    /// Writes the change payload here after the script ran.
    #[arg(long)]
    save: Option<PathBuf>,
    /// Writes the visible rows of every grid to `<dir>/<collection>.csv`.
    #[arg(long, value_name = "DIR")]
    export_csv: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Schema(#[from] SchemaFileError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    State(#[from] SchemaStateError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

fn load_settings(path: Option<&FsPath>) -> Result<Settings, AppError> {
    let store = match path {
        Some(path) => FileSettingsStore::load_from_path(path)?,
        None => match FileSettingsStore::load_default() {
            Ok(store) => store,
            Err(SettingsError::ConfigDirUnavailable) => return Ok(Settings::default()),
            Err(error) => return Err(error.into()),
        },
    };
    Ok(store.settings().clone())
}

async fn run_app(cli: &Cli, settings: &Settings) -> Result<Value, AppError> {
    let mut view = settings.view_context();
    if let Some(mode) = cli.mode {
        view.mode = mode.into();
    }

    let schema = Arc::new(load_schema_file(&cli.schema)?);
    let steps = match &cli.script {
        Some(path) => load_script(path)?,
        None => Vec::new(),
    };

    let mut state = SchemaState::new(
        Arc::clone(&schema),
        view,
        Arc::new(OptionEvaluatorRegistry::with_builtins()),
    );
    if let Some(data) = &cli.data {
        state = state.with_loader(Arc::new(FileInitDataLoader::new(data)));
    }

    // Queued until the initial load completes.
    for step in steps {
        state.dispatch(step.into_action());
    }
    state.initialise(false).await?;
    let deferred = state.apply_deferred().await;
    info!(deferred, change_id = state.change_id(), "form settled");

    let registry = FeatureRegistry::with_builtins();
    let mut grids = Map::new();
    for id in collection_ids(&schema) {
        let mut grid = DataGrid::for_path(&schema, Path::parse(&id), &registry)?;
        grid.set_search(cli.search.as_str());
        let rows = grid.render_rows(&state);
        if let Some(dir) = &cli.export_csv {
            let headers = grid
                .columns()
                .iter()
                .filter_map(Column::field_id)
                .map(str::to_string)
                .collect::<Vec<_>>();
            let path = dir.join(format!("{id}.csv"));
            let written = export_rows_to_csv(&path, &headers, &row_records(&rows))?;
            info!(path = %path.display(), rows = written, "exported grid rows");
        }
        grids.insert(
            id,
            json!({
                "label": grid.label(),
                "columns": grid.columns(),
                "config": grid.config(),
                "rows": rows,
            }),
        );
    }

    let changes = state.changes(false);
    let saved = match &cli.save {
        Some(path) => state.save(&FileSaveHandler::new(path)).await?,
        None => Value::Null,
    };

    Ok(json!({
        "mode": state.view().mode,
        "is_new": state.is_new(),
        "ui": state.ui(),
        "data": state.data(),
        "options": state.store(StoreKind::Options).get_state(),
        "changes": changes,
        "grids": grids,
        "saved": saved,
    }))
}

/// Cell values of rendered rows keyed by column id.
fn row_records(rows: &[GridRow]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            Value::Object(
                row.cells
                    .iter()
                    .map(|cell| (cell.column.clone(), cell.value.clone()))
                    .collect(),
            )
        })
        .collect()
}

/// Ids of the collections stored at the top level of the document,
/// including those declared inside nested tabs and fieldsets.
fn collection_ids(schema: &Schema) -> Vec<String> {
    schema
        .fields()
        .iter()
        .flat_map(|field| match (field.id(), field.kind().collection()) {
            (Some(id), Some(_)) => vec![id.to_string()],
            _ => field
                .kind()
                .nested_schema()
                .map(|child| collection_ids(child))
                .unwrap_or_default(),
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_deref())?;
    logging::init(settings.log_json);

    let report = run_app(&cli, &settings).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
