use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdsError {
    #[error("capture source unavailable: {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("no usable data: zero rows survived feature extraction")]
    EmptyDataset,

    #[error("insufficient data: {rows} rows, at least {required} needed to train and test")]
    InsufficientData { rows: usize, required: usize },

    #[error("schema mismatch: model expects input width {expected}, extractor produces {found}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("model artifact error: {}: {reason}", path.display())]
    ModelPersistence { path: PathBuf, reason: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("export failed: {}: {reason}", path.display())]
    Export { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IdsError {
    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IdsError::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IdsError::ModelPersistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn export(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IdsError::Export {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IdsError>;
