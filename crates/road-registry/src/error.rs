use std::path::PathBuf;

use thiserror::Error;

/// Errors loading or publishing a registry snapshot.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read road registry {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse road registry: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Road '{road}' schema version {version} is invalid: {message}")]
    InvalidSchema {
        road: String,
        version: i32,
        message: String,
    },

    #[error("Road '{0}' is defined more than once")]
    DuplicateRoad(String),
}

/// Schema lookup failures.
///
/// `UnknownRoad` is a configuration problem; `UnknownSchemaVersion` means a
/// record references a schema the road does not (or no longer) registers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown road: {0}")]
    UnknownRoad(String),

    #[error("Road '{road}' has no schema version {version}")]
    UnknownSchemaVersion { road: String, version: i32 },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
