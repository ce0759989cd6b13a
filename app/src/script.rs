use std::path::{Path, PathBuf};

use pgform_adapters::{read_document, DocumentError};
use pgform_core::Action;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// One scripted edit. Serialized with the action type as `type`, e.g.
/// `{"type": "SET_VALUE", "path": "name", "value": "orders"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptStep {
    SetValue {
        path: String,
        value: Value,
    },
    AddRow {
        path: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        add_on_top: bool,
    },
    DeleteRow {
        path: String,
        index: usize,
    },
    MoveRow {
        path: String,
        old_index: usize,
        new_index: usize,
    },
    BulkUpdate {
        path: String,
        id: String,
    },
}

impl ScriptStep {
    #[must_use]
    pub fn into_action(self) -> Action {
        match self {
            Self::SetValue { path, value } => Action::set_value(path.as_str(), value),
            Self::AddRow {
                path,
                value,
                add_on_top,
            } => Action::AddRow {
                path: path.as_str().into(),
                value,
                add_on_top,
            },
            Self::DeleteRow { path, index } => Action::delete_row(path.as_str(), index),
            Self::MoveRow {
                path,
                old_index,
                new_index,
            } => Action::move_row(path.as_str(), old_index, new_index),
            Self::BulkUpdate { path, id } => Action::bulk_update(path.as_str(), id),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("invalid script step {index} in {path}: {source}")]
    Step {
        path: PathBuf,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("script at {path} must be a JSON array of steps")]
    NotAList { path: PathBuf },
}

/// Reads a script file. A missing body (empty file) is an empty script.
pub fn load_script(path: &Path) -> Result<Vec<ScriptStep>, ScriptError> {
    let steps = match read_document(path)? {
        Value::Null => return Ok(Vec::new()),
        Value::Array(steps) => steps,
        _ => {
            return Err(ScriptError::NotAList {
                path: path.to_path_buf(),
            })
        }
    };
    steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            serde_json::from_value(step).map_err(|source| ScriptError::Step {
                path: path.to_path_buf(),
                index,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pgform_core::{ActionKind, Path};
    use serde_json::json;
    use tempfile::TempDir;

    use super::{load_script, ScriptError, ScriptStep};

    #[test]
    fn steps_map_onto_actions() {
        let step: ScriptStep = serde_json::from_value(json!({
            "type": "ADD_ROW", "path": "columns", "value": {"name": "id"}, "add_on_top": true
        }))
        .expect("step should parse");
        let action = step.into_action();
        assert_eq!(action.kind(), ActionKind::AddRow);
        assert_eq!(action.path(), Some(&Path::parse("columns")));

        let step: ScriptStep = serde_json::from_value(json!({
            "type": "SET_VALUE", "path": "columns.0.name", "value": "pk"
        }))
        .expect("step should parse");
        assert_eq!(step.into_action().path(), Some(&Path::parse("columns.0.name")));
    }

    #[test]
    fn loads_scripts_and_points_at_bad_steps() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("edits.json");

        fs::write(&path, "").expect("failed to write script");
        assert!(load_script(&path).expect("empty script").is_empty());

        fs::write(
            &path,
            r#"[{"type": "DELETE_ROW", "path": "columns", "index": 0}, {"type": "TELEPORT"}]"#,
        )
        .expect("failed to write script");
        let error = load_script(&path).expect_err("unknown step should fail");
        assert!(matches!(error, ScriptError::Step { index: 1, .. }));

        fs::write(&path, r#"{"type": "SET_VALUE"}"#).expect("failed to write script");
        assert!(matches!(load_script(&path), Err(ScriptError::NotAList { .. })));
    }
}
