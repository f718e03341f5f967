//! Result files: feature tables, annotated predictions and learning curves

use std::fs;
use std::path::Path;

use crate::error::{IdsError, Result};

pub mod chart;
pub mod table;

pub use chart::{render_learning_curves, DEFAULT_CHART_PATH};
pub use table::{write_annotated_csv, write_dataset_csv, write_json};

/// Create the directories above `path` when missing
pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IdsError::export(path, e))?;
    }
    Ok(())
}
