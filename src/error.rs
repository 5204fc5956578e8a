use std::path::PathBuf;

use thiserror::Error;

use crate::id::Zid;

#[derive(Error, Debug)]
pub enum BoxError {
    #[error("zettel {0} not found")]
    NotFound(Zid),

    #[error("box is read-only: {0}")]
    ReadOnly(String),

    #[error("invalid zettel identifier '{0}'")]
    InvalidId(String),

    #[error("box capacity exceeded: {0}")]
    Capacity(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("box not running: {0}")]
    Stopped(String),

    #[error("failed to {operation} {}: {source}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file worker failed: {0}")]
    Worker(String),

    #[error("invalid box URI '{0}'")]
    InvalidUri(String),

    #[error("no box registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("directory watcher error: {0}")]
    Watcher(String),
}

impl BoxError {
    /// True for errors that mean "this box does not know the zettel".
    pub fn is_not_found(&self) -> bool {
        matches!(self, BoxError::NotFound(_))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, BoxError::ReadOnly(_))
    }
}

pub type Result<T> = std::result::Result<T, BoxError>;
